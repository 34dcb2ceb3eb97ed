//! PageKeep core: pure asset naming, reference rewriting, record model and job state.
mod asset;
mod badge;
mod item;
mod job;
mod page;
mod rewrite;

pub use asset::{
    asset_file_name, classify_url, is_fetchable, normalize_url, parse_srcset, resolve_reference,
    AssetDescriptor, AssetKind, AssetMap,
};
pub use badge::ArchiveBadge;
pub use item::{
    is_safe_item_id, manifest_json, ArchiveMetadata, ArchiveOutcome, ArchiveStatus, Item, ItemId,
};
pub use job::{advance, JobEvent, JobPhase};
pub use page::{CapturedPage, CapturedPayload, PayloadError};
pub use rewrite::{rewrite_css, rewrite_html, scan_css};
