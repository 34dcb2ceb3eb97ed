//! PageKeep engine: capture, asset crawl, bundling and two-tier storage.
mod bundle;
mod cookies;
mod crawl;
mod decode;
mod fetch;
mod handle;
mod metadata;
mod orchestrator;
mod persist;
mod render;
mod storage;
mod store;
mod types;

pub use bundle::{
    decode_entries, encode_entries, pack_directory, pack_file, unpack, BundleEntries, BundleError,
    BundleLimits, UnpackReport, DEFAULT_MAX_BUNDLE_BYTES,
};
pub use cookies::{SessionCookie, SessionCookies};
pub use crawl::{AssetCrawler, CrawlReport, ASSETS_DIR, PAGE_FILE, READER_FILE};
pub use decode::{decode_page, DecodedPage};
pub use fetch::{FetchSettings, Fetcher, ReqwestFetcher, DEFAULT_USER_AGENT};
pub use handle::{ArchiveEvent, ArchiveHandle};
pub use metadata::extract_metadata;
pub use orchestrator::{
    Archiver, ArchiverConfig, CaptureSource, Clock, JobReport, DEFAULT_RENDER_TIMEOUT,
};
pub use persist::{ensure_output_dir, AtomicFileWriter, PersistError};
pub use render::{NoRenderer, PageRenderer, RenderError};
pub use storage::{ResolvedArchive, ResolvedDocument, StorageError, StorageResolver, StorageTier};
pub use store::{ItemStore, MemoryItemStore, StoreError};
pub use types::{FailureKind, FetchError, FetchMetadata, FetchOutput};
