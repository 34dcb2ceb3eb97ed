use std::collections::HashMap;
use std::fs;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::Utc;
use futures_util::FutureExt;
use pagekeep_core::{
    advance, is_safe_item_id, ArchiveMetadata, ArchiveOutcome, ArchiveStatus, CapturedPage, Item,
    ItemId, JobEvent, JobPhase,
};
use pagekeep_logging::{keep_debug, keep_error, keep_info, keep_warn};
use tempfile::TempDir;
use url::Url;

use crate::bundle::{pack_directory, BundleLimits};
use crate::cookies::{SessionCookie, SessionCookies};
use crate::crawl::{AssetCrawler, PAGE_FILE};
use crate::decode::decode_page;
use crate::fetch::Fetcher;
use crate::metadata::extract_metadata;
use crate::persist::{ensure_output_dir, AtomicFileWriter, PersistError};
use crate::render::{PageRenderer, RenderError};
use crate::storage::StorageResolver;
use crate::store::ItemStore;

pub const DEFAULT_RENDER_TIMEOUT: Duration = Duration::from_secs(20);
const STAGING_PREFIX: &str = ".staging-";
const RETIRED_PREFIX: &str = ".retired-";

/// Produces the `archived_utc` stamp written onto records.
pub type Clock = Arc<dyn Fn() -> String + Send + Sync>;

#[derive(Clone)]
pub struct ArchiverConfig {
    /// Primary tier root; archives land in `{archive_root}/{item_id}/`.
    pub archive_root: PathBuf,
    /// Extracted fallback copies; an item's copy is dropped when it is re-archived.
    pub cache_root: PathBuf,
    pub render_timeout: Duration,
    pub bundle: BundleLimits,
    pub archived_utc: Clock,
}

impl ArchiverConfig {
    pub fn with_roots(archive_root: PathBuf, cache_root: PathBuf) -> Self {
        Self {
            archive_root,
            cache_root,
            render_timeout: DEFAULT_RENDER_TIMEOUT,
            bundle: BundleLimits::default(),
            archived_utc: Arc::new(|| Utc::now().to_rfc3339()),
        }
    }
}

/// Where the page content comes from.
#[derive(Debug, Clone)]
pub enum CaptureSource {
    /// Render the URL with the rendering engine.
    Rendered(Url),
    /// A page already rendered by the caller's authenticated session.
    PreCaptured {
        payload_json: String,
        cookies: Vec<SessionCookie>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobReport {
    Completed(ArchiveOutcome),
    /// A job for the same item was already running.
    Skipped,
    ItemNotFound,
}

type InFlight = Mutex<HashMap<ItemId, JobPhase>>;

/// Holds an item's slot in the in-flight set; released on drop, including unwinds.
struct JobGate<'a> {
    jobs: &'a InFlight,
    item_id: ItemId,
}

impl<'a> JobGate<'a> {
    fn acquire(jobs: &'a InFlight, item_id: &str) -> Option<Self> {
        let mut map = jobs.lock().unwrap_or_else(PoisonError::into_inner);
        if map.contains_key(item_id) {
            return None;
        }
        map.insert(item_id.to_string(), JobPhase::Idle);
        Some(Self {
            jobs,
            item_id: item_id.to_string(),
        })
    }

    fn advance(&self, event: JobEvent) -> JobPhase {
        let mut map = self.jobs.lock().unwrap_or_else(PoisonError::into_inner);
        let phase = map.entry(self.item_id.clone()).or_default();
        *phase = advance(*phase, event);
        keep_debug!("Item {} job phase {:?}", self.item_id, *phase);
        *phase
    }
}

impl Drop for JobGate<'_> {
    fn drop(&mut self) {
        let mut map = self.jobs.lock().unwrap_or_else(PoisonError::into_inner);
        map.remove(&self.item_id);
    }
}

/// Coordinates capture, crawl, bundling and persistence of archive jobs.
///
/// At most one job runs per item; duplicate requests are dropped.
pub struct Archiver {
    config: ArchiverConfig,
    renderer: Arc<dyn PageRenderer>,
    fetcher: Arc<dyn Fetcher>,
    store: Arc<dyn ItemStore>,
    in_flight: InFlight,
}

impl Archiver {
    pub fn new(
        config: ArchiverConfig,
        renderer: Arc<dyn PageRenderer>,
        fetcher: Arc<dyn Fetcher>,
        store: Arc<dyn ItemStore>,
    ) -> Self {
        Self {
            config,
            renderer,
            fetcher,
            store,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &ArchiverConfig {
        &self.config
    }

    /// Current phase of the item's job; `Idle` when nothing is running.
    pub fn phase(&self, item_id: &str) -> JobPhase {
        let map = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        map.get(item_id).copied().unwrap_or_default()
    }

    /// Render and archive the item's own link URL.
    pub async fn archive_item(&self, item_id: &str) -> JobReport {
        let url = match self.store.get(item_id) {
            Ok(Some(item)) => Url::parse(&item.link_url).map_err(|err| {
                keep_warn!("Item {} has unusable link {:?}: {}", item_id, item.link_url, err);
            }),
            Ok(None) => return JobReport::ItemNotFound,
            Err(err) => {
                keep_error!("Reading item {} failed: {}", item_id, err);
                Err(())
            }
        };
        self.run_job(item_id, url.ok().map(CaptureSource::Rendered))
            .await
    }

    /// Archive a page rendered by the caller's logged-in session.
    pub async fn archive_with_session(
        &self,
        item_id: &str,
        payload_json: String,
        cookies: Vec<SessionCookie>,
    ) -> JobReport {
        self.archive(
            item_id,
            CaptureSource::PreCaptured {
                payload_json,
                cookies,
            },
        )
        .await
    }

    /// Run one archive job. Never fails: every outcome is persisted as an
    /// `archive_status` and returned.
    pub async fn archive(&self, item_id: &str, source: CaptureSource) -> JobReport {
        self.run_job(item_id, Some(source)).await
    }

    /// Run the job on the tokio runtime.
    pub fn spawn_archive(
        self: &Arc<Self>,
        item_id: impl Into<ItemId>,
        source: CaptureSource,
    ) -> tokio::task::JoinHandle<JobReport> {
        let archiver = Arc::clone(self);
        let item_id = item_id.into();
        tokio::spawn(async move { archiver.archive(&item_id, source).await })
    }

    async fn run_job(&self, item_id: &str, source: Option<CaptureSource>) -> JobReport {
        let Some(gate) = JobGate::acquire(&self.in_flight, item_id) else {
            keep_info!("Archive of item {} already in flight; request dropped", item_id);
            return JobReport::Skipped;
        };

        let item = match self.store.get(item_id) {
            Ok(Some(item)) => Some(item),
            Ok(None) => {
                keep_warn!("Archive requested for unknown item {}", item_id);
                return JobReport::ItemNotFound;
            }
            Err(err) => {
                keep_error!("Reading item {} failed: {}", item_id, err);
                None
            }
        };

        gate.advance(JobEvent::Started);
        let outcome = match (item, source) {
            (Some(item), Some(source)) => {
                match AssertUnwindSafe(self.capture(&item, source, &gate))
                    .catch_unwind()
                    .await
                {
                    Ok(outcome) => outcome,
                    Err(_) => {
                        keep_error!("Archive pipeline for item {} panicked", item_id);
                        gate.advance(JobEvent::CaptureFailed);
                        ArchiveOutcome::failed()
                    }
                }
            }
            _ => {
                gate.advance(JobEvent::CaptureFailed);
                ArchiveOutcome::failed()
            }
        };

        self.persist(item_id, &outcome);
        gate.advance(JobEvent::Persisted);
        keep_info!(
            "Archive of item {} finished with status {}",
            item_id,
            outcome.archive_status.as_str()
        );
        JobReport::Completed(outcome)
    }

    async fn capture(&self, item: &Item, source: CaptureSource, gate: &JobGate<'_>) -> ArchiveOutcome {
        if !is_safe_item_id(&item.id) {
            keep_error!("Item id {:?} cannot be used as a directory name", item.id);
            gate.advance(JobEvent::CaptureFailed);
            return ArchiveOutcome::failed();
        }
        let link = Url::parse(&item.link_url).ok();

        let (target, captured, cookies) = match source {
            CaptureSource::Rendered(url) => {
                let captured = self.render(&url).await;
                (Some(url), captured, SessionCookies::none())
            }
            CaptureSource::PreCaptured {
                payload_json,
                cookies,
            } => {
                let captured =
                    CapturedPage::from_payload_json(&payload_json).map_err(RenderError::from);
                let target = link
                    .clone()
                    .or_else(|| captured.as_ref().ok().map(|page| page.base_url.clone()));
                let cookies = match &target {
                    Some(url) => SessionCookies::scoped_to(cookies, url),
                    None => SessionCookies::none(),
                };
                (target, captured, cookies)
            }
        };

        match captured {
            Ok(page) => {
                gate.advance(JobEvent::Captured);
                self.archive_captured(&item.id, &page, &cookies).await
            }
            Err(err) => {
                keep_warn!("Capture of item {} failed, falling back to raw fetch: {}", item.id, err);
                gate.advance(JobEvent::CaptureFailed);
                match target {
                    Some(url) => self.raw_fetch_fallback(&item.id, &url, &cookies).await,
                    None => ArchiveOutcome::failed(),
                }
            }
        }
    }

    async fn render(&self, url: &Url) -> Result<CapturedPage, RenderError> {
        let timeout = self.config.render_timeout;
        match tokio::time::timeout(timeout, self.renderer.render(url)).await {
            Ok(result) => result,
            Err(_) => Err(RenderError::Timeout(timeout)),
        }
    }

    async fn archive_captured(
        &self,
        item_id: &str,
        page: &CapturedPage,
        cookies: &SessionCookies,
    ) -> ArchiveOutcome {
        let staging = match self.staging_dir() {
            Ok(staging) => staging,
            Err(err) => {
                keep_error!("Cannot stage archive for item {}: {}", item_id, err);
                return ArchiveOutcome::failed();
            }
        };
        let report = AssetCrawler::new(self.fetcher.as_ref(), cookies)
            .crawl(page, staging.path())
            .await;
        let metadata = extract_metadata(&page.html);
        self.finish(item_id, staging, metadata, report.status(), report.asset_file_names)
    }

    /// Plain GET of the page, archived without assets.
    async fn raw_fetch_fallback(
        &self,
        item_id: &str,
        url: &Url,
        cookies: &SessionCookies,
    ) -> ArchiveOutcome {
        let output = match self.fetcher.fetch(url, cookies).await {
            Ok(output) => output,
            Err(err) => {
                keep_warn!("Raw fetch of {} for item {} failed: {}", url, item_id, err);
                return ArchiveOutcome::failed();
            }
        };
        let decoded = decode_page(&output.bytes, output.metadata.content_type.as_deref());
        if decoded.had_errors {
            keep_debug!(
                "Raw page of item {} decoded as {} with replacement characters",
                item_id,
                decoded.encoding_label
            );
        }
        let metadata = extract_metadata(&decoded.html);

        let staging = match self.staging_dir() {
            Ok(staging) => staging,
            Err(err) => {
                keep_error!("Cannot stage raw archive for item {}: {}", item_id, err);
                return ArchiveOutcome {
                    metadata,
                    ..ArchiveOutcome::failed()
                };
            }
        };
        let writer = AtomicFileWriter::new(staging.path().to_path_buf());
        let status = match writer.write(PAGE_FILE, decoded.html.as_bytes()) {
            Ok(_) => ArchiveStatus::Partial,
            Err(err) => {
                keep_error!("Writing raw page for item {} failed: {}", item_id, err);
                ArchiveStatus::Failed
            }
        };
        self.finish(item_id, staging, metadata, status, Vec::new())
    }

    /// Swap a staged capture into the primary tier and bundle it.
    ///
    /// A failed capture is discarded with its staging directory so an earlier
    /// archive of the item stays untouched.
    fn finish(
        &self,
        item_id: &str,
        staging: TempDir,
        metadata: ArchiveMetadata,
        status: ArchiveStatus,
        asset_file_names: Vec<String>,
    ) -> ArchiveOutcome {
        if status == ArchiveStatus::Failed {
            return ArchiveOutcome {
                metadata,
                ..ArchiveOutcome::failed()
            };
        }

        let archive_dir = match self.promote(&staging, item_id) {
            Ok(dir) => dir,
            Err(err) => {
                keep_error!("Publishing archive for item {} failed: {}", item_id, err);
                return ArchiveOutcome {
                    metadata,
                    ..ArchiveOutcome::failed()
                };
            }
        };

        let bundle_data = match pack_directory(&archive_dir, self.config.bundle) {
            Ok(bundle) => {
                if let Err(err) = self.storage().invalidate_archive_cache(item_id) {
                    keep_warn!("Dropping stale cache of item {} failed: {}", item_id, err);
                }
                Some(bundle)
            }
            Err(err) => {
                keep_warn!("Bundling archive of item {} failed: {}", item_id, err);
                None
            }
        };

        ArchiveOutcome {
            metadata,
            html_relative_path: Some(format!("{item_id}/{PAGE_FILE}")),
            archive_status: status,
            asset_file_names,
            bundle_data,
        }
    }

    fn storage(&self) -> StorageResolver {
        StorageResolver::new(
            self.config.archive_root.clone(),
            self.config.cache_root.clone(),
            self.config.bundle,
        )
    }

    fn staging_dir(&self) -> Result<TempDir, PersistError> {
        ensure_output_dir(&self.config.archive_root)?;
        let staging = tempfile::Builder::new()
            .prefix(STAGING_PREFIX)
            .tempdir_in(&self.config.archive_root)?;
        Ok(staging)
    }

    fn promote(&self, staging: &TempDir, item_id: &str) -> Result<PathBuf, PersistError> {
        let target = self.config.archive_root.join(item_id);
        replace_dir(staging.path(), &target)?;
        Ok(target)
    }

    fn persist(&self, item_id: &str, outcome: &ArchiveOutcome) {
        let archived_utc = (self.config.archived_utc)();
        let result = self.store.perform(item_id, &mut |item: &mut Item| {
            item.apply_outcome(outcome, &archived_utc)
        });
        if let Err(err) = result {
            keep_error!("Persisting archive outcome of item {} failed: {}", item_id, err);
        }
    }
}

/// Swap `from` into `to`, restoring the previous `to` if the swap fails.
fn replace_dir(from: &Path, to: &Path) -> Result<(), PersistError> {
    if !to.exists() {
        fs::rename(from, to)?;
        return Ok(());
    }
    let parent = to.parent().unwrap_or(Path::new("."));
    let retired = tempfile::Builder::new()
        .prefix(RETIRED_PREFIX)
        .tempdir_in(parent)?;
    let previous = retired.path().join("previous");
    fs::rename(to, &previous)?;
    if let Err(err) = fs::rename(from, to) {
        if let Err(restore) = fs::rename(&previous, to) {
            keep_error!("Could not restore previous archive {:?}: {}", to, restore);
        }
        return Err(err.into());
    }
    Ok(())
}
