use std::collections::{HashSet, VecDeque};
use std::path::Path;

use pagekeep_core::{
    classify_url, is_fetchable, parse_srcset, resolve_reference, rewrite_css, rewrite_html,
    scan_css, ArchiveStatus, AssetDescriptor, AssetKind, AssetMap, CapturedPage,
};
use pagekeep_logging::{keep_debug, keep_error, keep_info, keep_warn};
use url::Url;

use crate::cookies::SessionCookies;
use crate::fetch::Fetcher;
use crate::persist::AtomicFileWriter;

pub const PAGE_FILE: &str = "page.html";
pub const READER_FILE: &str = "reader.html";
pub const ASSETS_DIR: &str = "assets";

/// What one crawl left on disk.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CrawlReport {
    pub html_written: bool,
    pub reader_written: bool,
    /// Successfully written assets, in crawl order.
    pub asset_file_names: Vec<String>,
    pub attempted: usize,
    pub failures: usize,
}

impl CrawlReport {
    pub fn status(&self) -> ArchiveStatus {
        if !self.html_written {
            ArchiveStatus::Failed
        } else if self.failures > 0 {
            ArchiveStatus::Partial
        } else {
            ArchiveStatus::Full
        }
    }
}

/// FIFO worklist with dedup on normalized URL.
///
/// File names are assigned at enqueue time so a stylesheet can be rewritten
/// against assets that are discovered but not fetched yet.
#[derive(Debug, Default)]
struct Worklist {
    queue: VecDeque<AssetDescriptor>,
    queued: HashSet<String>,
    processed: HashSet<String>,
    assets: AssetMap,
}

impl Worklist {
    fn seeded_from(page: &CapturedPage) -> Self {
        let mut work = Self::default();
        let base = &page.base_url;
        for raw in &page.stylesheets {
            work.enqueue_raw(raw, base, Some(AssetKind::Stylesheet));
        }
        for raw in &page.icons {
            work.enqueue_raw(raw, base, Some(AssetKind::Icon));
        }
        for raw in &page.images {
            work.enqueue_raw(raw, base, Some(AssetKind::Image));
        }
        for srcset in &page.image_srcsets {
            for (raw, _descriptor) in parse_srcset(srcset) {
                work.enqueue_raw(raw, base, Some(AssetKind::Image));
            }
        }
        for raw in &page.sources {
            work.enqueue_raw(raw, base, None);
        }
        work
    }

    fn enqueue_raw(&mut self, raw: &str, base: &Url, kind: Option<AssetKind>) {
        if let Some(url) = resolve_reference(raw, base) {
            let kind = kind.unwrap_or_else(|| classify_url(&url));
            self.enqueue(url, kind);
        }
    }

    fn enqueue(&mut self, url: Url, kind: AssetKind) -> bool {
        let asset = AssetDescriptor::new(url, kind);
        if !self.queued.insert(asset.key().to_string()) {
            return false;
        }
        if is_fetchable(&asset.url) {
            self.assets.insert(asset.key().to_string(), asset.file_name());
        }
        self.queue.push_back(asset);
        true
    }

    fn next(&mut self) -> Option<AssetDescriptor> {
        while let Some(asset) = self.queue.pop_front() {
            if self.processed.insert(asset.key().to_string()) {
                return Some(asset);
            }
        }
        None
    }
}

/// Downloads the assets of a captured page and writes a rewritten, self-contained copy.
pub struct AssetCrawler<'a> {
    fetcher: &'a dyn Fetcher,
    cookies: &'a SessionCookies,
}

impl<'a> AssetCrawler<'a> {
    pub fn new(fetcher: &'a dyn Fetcher, cookies: &'a SessionCookies) -> Self {
        Self { fetcher, cookies }
    }

    /// Crawl into `archive_dir`, producing `page.html`, `reader.html` and `assets/`.
    ///
    /// Asset failures are counted, never fatal. Assets are processed strictly one
    /// at a time because stylesheet rewriting depends on the names assigned by
    /// earlier entries.
    pub async fn crawl(&self, page: &CapturedPage, archive_dir: &Path) -> CrawlReport {
        let writer = AtomicFileWriter::new(archive_dir.to_path_buf());
        let mut work = Worklist::seeded_from(page);
        let mut written = AssetMap::new();
        let mut report = CrawlReport::default();

        while let Some(asset) = work.next() {
            if !is_fetchable(&asset.url) {
                keep_debug!("Skipping non-fetchable asset {}", asset.url);
                continue;
            }
            let Some(file_name) = work.assets.get(asset.key()).cloned() else {
                continue;
            };
            report.attempted += 1;

            let bytes = match self.fetcher.fetch(&asset.url, self.cookies).await {
                Ok(output) if !output.bytes.is_empty() => output.bytes,
                Ok(_) => {
                    keep_warn!("Asset {} returned an empty body", asset.url);
                    report.failures += 1;
                    continue;
                }
                Err(err) => {
                    keep_warn!("Asset {} failed: {}", asset.url, err);
                    report.failures += 1;
                    continue;
                }
            };

            let bytes = if asset.kind == AssetKind::Stylesheet {
                let css = String::from_utf8_lossy(&bytes).into_owned();
                for (url, kind) in scan_css(&css, &asset.url) {
                    if work.enqueue(url, kind) {
                        keep_debug!("Discovered {:?} asset via {}", kind, asset.url);
                    }
                }
                rewrite_css(&css, &asset.url, &work.assets, "").into_bytes()
            } else {
                bytes
            };

            match writer.write(&format!("{ASSETS_DIR}/{file_name}"), &bytes) {
                Ok(_) => {
                    written.insert(asset.key().to_string(), file_name.clone());
                    report.asset_file_names.push(file_name);
                }
                Err(err) => {
                    keep_error!("Writing asset {} as {} failed: {}", asset.url, file_name, err);
                    report.failures += 1;
                }
            }
        }

        let prefix = format!("{ASSETS_DIR}/");
        let html = rewrite_html(&page.html, &page.base_url, &written, &prefix);
        report.html_written = match writer.write(PAGE_FILE, html.as_bytes()) {
            Ok(_) => true,
            Err(err) => {
                keep_error!("Writing {} failed: {}", PAGE_FILE, err);
                false
            }
        };

        if let Some(reader) = page.reader_html.as_deref() {
            let reader = rewrite_html(reader, &page.base_url, &written, &prefix);
            report.reader_written = match writer.write(READER_FILE, reader.as_bytes()) {
                Ok(_) => true,
                Err(err) => {
                    keep_warn!("Writing {} failed: {}", READER_FILE, err);
                    false
                }
            };
        }

        keep_info!(
            "Crawl of {} finished: {} assets written, {} failed, status {}",
            page.base_url,
            report.asset_file_names.len(),
            report.failures,
            report.status().as_str()
        );
        report
    }
}
