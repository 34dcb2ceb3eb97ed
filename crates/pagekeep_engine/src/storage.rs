use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use pagekeep_core::{is_safe_item_id, Item};
use pagekeep_logging::{keep_debug, keep_info, keep_warn};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::bundle::{unpack, BundleLimits};
use crate::crawl::{ASSETS_DIR, PAGE_FILE, READER_FILE};
use crate::persist::AtomicFileWriter;

const ARCHIVE_CACHE_DIR: &str = "archives";
const DOCUMENT_CACHE_DIR: &str = "documents";
/// Hidden file naming the SHA-256 of the bundle a cache directory came from.
const EXTRACTION_MARKER: &str = ".bundle-sha256";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageTier {
    /// The user-visible synced copy.
    Primary,
    /// Extracted from the record's fallback bundle.
    Cache,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedArchive {
    pub page: PathBuf,
    pub reader: Option<PathBuf>,
    pub assets_dir: PathBuf,
    pub tier: StorageTier,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedDocument {
    pub path: PathBuf,
    pub tier: StorageTier,
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

/// Picks the best available copy of an item's archive or document.
#[derive(Debug, Clone)]
pub struct StorageResolver {
    archive_root: PathBuf,
    cache_root: PathBuf,
    limits: BundleLimits,
}

impl StorageResolver {
    pub fn new(archive_root: PathBuf, cache_root: PathBuf, limits: BundleLimits) -> Self {
        Self {
            archive_root,
            cache_root,
            limits,
        }
    }

    /// Primary tier first (unless `force_extract`), then the fallback bundle
    /// extracted into the cache. Extraction is skipped when the cached page is
    /// present and was extracted from the record's current bundle.
    pub fn resolve(&self, item: &Item, force_extract: bool) -> Option<ResolvedArchive> {
        if !force_extract {
            if let Some(page) = self.primary_page(item) {
                keep_debug!("Item {} resolved to primary tier", item.id);
                return Some(archive_at(page, StorageTier::Primary));
            }
        }

        let Some(bundle) = item.archive_zip_data.as_deref() else {
            keep_debug!("Item {} has no archive in any tier", item.id);
            return None;
        };
        let cache_dir = self.archive_cache_dir(&item.id)?;
        let page_name = item
            .html_relative_path
            .as_deref()
            .and_then(|path| Path::new(path).file_name())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(PAGE_FILE));
        let page = cache_dir.join(page_name);

        if !self.ensure_extracted(bundle, &cache_dir, &item.id, page.is_file()) {
            return None;
        }
        if !page.is_file() {
            keep_warn!("Fallback bundle of item {} has no {:?}", item.id, page);
            discard_dir(&cache_dir);
            return None;
        }

        let resolved = archive_at(page, StorageTier::Cache);
        let missing = item
            .asset_manifest()
            .iter()
            .filter(|name| !resolved.assets_dir.join(name).is_file())
            .count();
        if missing > 0 {
            keep_warn!("Cached archive of item {} is missing {} assets", item.id, missing);
        }
        Some(resolved)
    }

    /// Drop the extracted copy once the primary tier is present locally.
    ///
    /// Returns whether cleanup happened. Callers invoke this after a sync
    /// completion signal; `resolve` never does.
    pub fn cleanup_if_primary_synced(&self, item: &mut Item) -> Result<bool, StorageError> {
        if self.primary_page(item).is_none() {
            return Ok(false);
        }
        if let Some(dir) = self.archive_cache_dir(&item.id) {
            remove_dir_if_present(&dir)?;
        }
        item.archive_zip_data = None;
        keep_info!("Item {} archive is synced; fallback copy removed", item.id);
        Ok(true)
    }

    pub fn resolve_document(&self, item: &Item, force_extract: bool) -> Option<ResolvedDocument> {
        if !force_extract {
            if let Some(path) = self.primary_document(item) {
                return Some(ResolvedDocument {
                    path,
                    tier: StorageTier::Primary,
                });
            }
        }

        let bundle = item.document_zip_data.as_deref()?;
        let cache_dir = self.document_cache_dir(&item.id)?;
        let expected = item
            .document_relative_path
            .as_deref()
            .and_then(|path| Path::new(path).file_name())
            .map(PathBuf::from);

        let present = find_document(&cache_dir, expected.as_deref()).is_some();
        if !self.ensure_extracted(bundle, &cache_dir, &item.id, present) {
            return None;
        }
        let Some(path) = find_document(&cache_dir, expected.as_deref()) else {
            keep_warn!("Document bundle of item {} held no usable file", item.id);
            discard_dir(&cache_dir);
            return None;
        };
        Some(ResolvedDocument {
            path,
            tier: StorageTier::Cache,
        })
    }

    pub fn cleanup_document_if_primary_synced(
        &self,
        item: &mut Item,
    ) -> Result<bool, StorageError> {
        if self.primary_document(item).is_none() {
            return Ok(false);
        }
        if let Some(dir) = self.document_cache_dir(&item.id) {
            remove_dir_if_present(&dir)?;
        }
        item.document_zip_data = None;
        keep_info!("Item {} document is synced; fallback copy removed", item.id);
        Ok(true)
    }

    pub fn archive_cache_dir(&self, item_id: &str) -> Option<PathBuf> {
        self.cache_dir(ARCHIVE_CACHE_DIR, item_id)
    }

    pub fn document_cache_dir(&self, item_id: &str) -> Option<PathBuf> {
        self.cache_dir(DOCUMENT_CACHE_DIR, item_id)
    }

    fn cache_dir(&self, kind: &str, item_id: &str) -> Option<PathBuf> {
        if !is_safe_item_id(item_id) {
            keep_warn!("Refusing cache path for unsafe item id {:?}", item_id);
            return None;
        }
        Some(self.cache_root.join(kind).join(item_id))
    }

    fn primary_page(&self, item: &Item) -> Option<PathBuf> {
        primary_file(&self.archive_root, item.html_relative_path.as_deref())
    }

    fn primary_document(&self, item: &Item) -> Option<PathBuf> {
        primary_file(&self.archive_root, item.document_relative_path.as_deref())
    }

    /// Remove the extracted archive of an item, e.g. after a new bundle replaced it.
    pub fn invalidate_archive_cache(&self, item_id: &str) -> Result<(), StorageError> {
        match self.archive_cache_dir(item_id) {
            Some(dir) => remove_dir_if_present(&dir),
            None => Ok(()),
        }
    }

    /// Reuse the cache when `present` and its marker names this bundle;
    /// otherwise replace it with a fresh extraction.
    fn ensure_extracted(&self, bundle: &[u8], cache_dir: &Path, item_id: &str, present: bool) -> bool {
        let digest = bundle_digest(bundle);
        if present && marker_matches(cache_dir, &digest) {
            return true;
        }
        if cache_dir.exists() {
            keep_info!("Cached copy of item {} is stale; extracting again", item_id);
            discard_dir(cache_dir);
        }
        if !self.extract(bundle, cache_dir, item_id) {
            return false;
        }
        let writer = AtomicFileWriter::new(cache_dir.to_path_buf());
        if let Err(err) = writer.write(EXTRACTION_MARKER, digest.as_bytes()) {
            keep_warn!("Could not mark cache of item {} as extracted: {}", item_id, err);
        }
        true
    }

    /// Corrupt bundles leave no cache behind and report `false`.
    fn extract(&self, bundle: &[u8], cache_dir: &Path, item_id: &str) -> bool {
        match unpack(bundle, cache_dir, self.limits) {
            Ok(report) => {
                keep_info!(
                    "Extracted {} files for item {} into {:?} ({} failed)",
                    report.written.len(),
                    item_id,
                    cache_dir,
                    report.failed.len()
                );
                true
            }
            Err(err) => {
                keep_warn!("Fallback bundle of item {} is unusable: {}", item_id, err);
                discard_dir(cache_dir);
                false
            }
        }
    }
}

fn bundle_digest(bundle: &[u8]) -> String {
    Sha256::digest(bundle)
        .iter()
        .map(|byte| format!("{byte:02x}"))
        .collect()
}

fn marker_matches(cache_dir: &Path, digest: &str) -> bool {
    fs::read_to_string(cache_dir.join(EXTRACTION_MARKER))
        .map(|marker| marker.trim() == digest)
        .unwrap_or(false)
}

fn primary_file(root: &Path, relative: Option<&str>) -> Option<PathBuf> {
    let relative = relative.filter(|path| !path.is_empty())?;
    let path = root.join(relative);
    path.is_file().then_some(path)
}

fn archive_at(page: PathBuf, tier: StorageTier) -> ResolvedArchive {
    let dir = page.parent().map(Path::to_path_buf).unwrap_or_default();
    let reader = dir.join(READER_FILE);
    ResolvedArchive {
        reader: reader.is_file().then_some(reader),
        assets_dir: dir.join(ASSETS_DIR),
        page,
        tier,
    }
}

fn find_document(dir: &Path, expected: Option<&Path>) -> Option<PathBuf> {
    if let Some(name) = expected {
        let path = dir.join(name);
        return path.is_file().then_some(path);
    }
    let mut files: Vec<PathBuf> = fs::read_dir(dir)
        .ok()?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().map(|ft| ft.is_file()).unwrap_or(false))
        .filter(|entry| !entry.file_name().to_string_lossy().starts_with('.'))
        .map(|entry| entry.path())
        .collect();
    files.sort();
    files.into_iter().next()
}

fn remove_dir_if_present(dir: &Path) -> Result<(), StorageError> {
    match fs::remove_dir_all(dir) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err.into()),
    }
}

fn discard_dir(dir: &Path) {
    if let Err(err) = remove_dir_if_present(dir) {
        keep_warn!("Could not remove cache directory {:?}: {}", dir, err);
    }
}
