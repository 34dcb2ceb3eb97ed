//! File-backed record store.
//!
//! Records live in `records.ron` under the state directory. Bundle bytes are
//! kept out of the RON file in `bundles/{id}.{kind}.pkb` sidecars.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use anyhow::{Context, Result};
use pagekeep_core::{Item, ItemId};
use pagekeep_engine::{ensure_output_dir, AtomicFileWriter, ItemStore, StoreError};
use pagekeep_logging::{keep_debug, keep_info, keep_warn};
use serde::{Deserialize, Serialize};

const RECORDS_FILENAME: &str = "records.ron";
const BUNDLES_DIR: &str = "bundles";
const ARCHIVE_BUNDLE: &str = "archive";
const DOCUMENT_BUNDLE: &str = "document";

#[derive(Debug, Default, Serialize, Deserialize)]
struct RecordFile {
    items: Vec<Item>,
}

pub struct FileItemStore {
    dir: PathBuf,
    items: Mutex<BTreeMap<ItemId, Item>>,
}

impl FileItemStore {
    pub fn open(dir: &Path) -> Result<Self> {
        let path = dir.join(RECORDS_FILENAME);
        let file: RecordFile = match fs::read_to_string(&path) {
            Ok(text) => ron::from_str(&text)
                .with_context(|| format!("parsing record file {}", path.display()))?,
            Err(err) if err.kind() == io::ErrorKind::NotFound => RecordFile::default(),
            Err(err) => {
                return Err(err).with_context(|| format!("reading {}", path.display()));
            }
        };

        let mut items = BTreeMap::new();
        for mut item in file.items {
            item.archive_zip_data = read_bundle(dir, &item.id, ARCHIVE_BUNDLE)?;
            item.document_zip_data = read_bundle(dir, &item.id, DOCUMENT_BUNDLE)?;
            items.insert(item.id.clone(), item);
        }
        keep_debug!("Loaded {} records from {:?}", items.len(), path);
        Ok(Self {
            dir: dir.to_path_buf(),
            items: Mutex::new(items),
        })
    }

    pub fn insert(&self, item: Item) -> Result<()> {
        let mut items = self.items.lock().unwrap_or_else(PoisonError::into_inner);
        self.save(&items, &item)?;
        items.insert(item.id.clone(), item);
        Ok(())
    }

    pub fn items(&self) -> Vec<Item> {
        let items = self.items.lock().unwrap_or_else(PoisonError::into_inner);
        items.values().cloned().collect()
    }

    /// Persist `items` with `changed` in place of its stored version.
    ///
    /// Only the sidecars of `changed` are written; other items' bundles are
    /// already on disk.
    fn save(&self, items: &BTreeMap<ItemId, Item>, changed: &Item) -> Result<()> {
        ensure_output_dir(&self.dir)?;
        let writer = AtomicFileWriter::new(self.dir.clone());
        write_bundle(&writer, &self.dir, &changed.id, ARCHIVE_BUNDLE, &changed.archive_zip_data)?;
        write_bundle(&writer, &self.dir, &changed.id, DOCUMENT_BUNDLE, &changed.document_zip_data)?;

        let mut view: BTreeMap<&str, &Item> =
            items.iter().map(|(id, item)| (id.as_str(), item)).collect();
        view.insert(changed.id.as_str(), changed);
        let file = RecordFile {
            items: view
                .into_values()
                .map(|item| Item {
                    archive_zip_data: None,
                    document_zip_data: None,
                    ..item.clone()
                })
                .collect(),
        };

        let pretty = ron::ser::PrettyConfig::new();
        let content =
            ron::ser::to_string_pretty(&file, pretty).context("serializing record file")?;
        writer.write(RECORDS_FILENAME, content.as_bytes())?;
        keep_debug!("Saved {} records to {:?}", file.items.len(), self.dir);
        Ok(())
    }
}

impl ItemStore for FileItemStore {
    fn get(&self, id: &str) -> Result<Option<Item>, StoreError> {
        let items = self.items.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(items.get(id).cloned())
    }

    /// The change lands in memory only once it is on disk.
    fn perform(&self, id: &str, change: &mut dyn FnMut(&mut Item)) -> Result<(), StoreError> {
        let mut items = self.items.lock().unwrap_or_else(PoisonError::into_inner);
        let mut item = items
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        change(&mut item);
        self.save(&items, &item)
            .map_err(|err| StoreError::Unavailable(format!("{err:#}")))?;
        items.insert(item.id.clone(), item);
        Ok(())
    }
}

fn bundle_name(id: &str, kind: &str) -> String {
    format!("{BUNDLES_DIR}/{id}.{kind}.pkb")
}

fn read_bundle(dir: &Path, id: &str, kind: &str) -> Result<Option<Vec<u8>>> {
    let path = dir.join(bundle_name(id, kind));
    match fs::read(&path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err).with_context(|| format!("reading bundle {}", path.display())),
    }
}

fn write_bundle(
    writer: &AtomicFileWriter,
    dir: &Path,
    id: &str,
    kind: &str,
    data: &Option<Vec<u8>>,
) -> Result<()> {
    let name = bundle_name(id, kind);
    match data {
        Some(bytes) => {
            writer.write(&name, bytes)?;
        }
        None => match fs::remove_file(dir.join(&name)) {
            Ok(()) => keep_info!("Dropped {} bundle of item {}", kind, id),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => keep_warn!("Could not remove stale bundle {}: {}", name, err),
        },
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pagekeep_core::ArchiveStatus;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[test]
    fn records_and_bundles_survive_reopen() {
        let temp = TempDir::new().unwrap();
        let store = FileItemStore::open(temp.path()).unwrap();
        store
            .insert(Item::new("a1", "https://example.com/a"))
            .unwrap();
        store
            .perform("a1", &mut |item| {
                item.archive_status = Some(ArchiveStatus::Partial);
                item.archive_zip_data = Some(vec![1, 2, 3]);
            })
            .unwrap();

        let text = fs::read_to_string(temp.path().join(RECORDS_FILENAME)).unwrap();
        assert!(!text.contains("[1, 2, 3]"));
        assert!(temp.path().join("bundles/a1.archive.pkb").is_file());

        let reopened = FileItemStore::open(temp.path()).unwrap();
        let item = reopened.get("a1").unwrap().unwrap();
        assert_eq!(item.archive_status, Some(ArchiveStatus::Partial));
        assert_eq!(item.archive_zip_data, Some(vec![1, 2, 3]));
        assert_eq!(item.document_zip_data, None);
    }

    #[test]
    fn cleared_bundle_removes_its_sidecar() {
        let temp = TempDir::new().unwrap();
        let store = FileItemStore::open(temp.path()).unwrap();
        let mut item = Item::new("b2", "https://example.com/b");
        item.archive_zip_data = Some(vec![9]);
        store.insert(item).unwrap();
        let sidecar = temp.path().join("bundles/b2.archive.pkb");
        assert!(sidecar.is_file());

        store
            .perform("b2", &mut |item| item.archive_zip_data = None)
            .unwrap();
        assert!(!sidecar.exists());
    }

    #[test]
    fn saving_one_item_leaves_other_sidecars_alone() {
        let temp = TempDir::new().unwrap();
        let store = FileItemStore::open(temp.path()).unwrap();
        let mut first = Item::new("c1", "https://example.com/c");
        first.archive_zip_data = Some(vec![1]);
        store.insert(first).unwrap();
        store
            .insert(Item::new("c2", "https://example.com/d"))
            .unwrap();

        let sidecar = temp.path().join("bundles/c1.archive.pkb");
        fs::remove_file(&sidecar).unwrap();
        store
            .perform("c2", &mut |item| item.link_title = Some("D".into()))
            .unwrap();

        assert!(!sidecar.exists());
        let text = fs::read_to_string(temp.path().join(RECORDS_FILENAME)).unwrap();
        assert!(text.contains("c1"));
        assert!(text.contains("\"D\""));
    }

    #[test]
    fn failed_save_leaves_the_item_unchanged() {
        let temp = TempDir::new().unwrap();
        let store = FileItemStore::open(temp.path()).unwrap();
        store
            .insert(Item::new("e5", "https://example.com/e"))
            .unwrap();
        let before = fs::read_to_string(temp.path().join(RECORDS_FILENAME)).unwrap();
        // A file where the bundle directory belongs makes the sidecar write fail.
        fs::write(temp.path().join(BUNDLES_DIR), b"not a dir").unwrap();

        let result = store.perform("e5", &mut |item| {
            item.archive_status = Some(ArchiveStatus::Full);
            item.archive_zip_data = Some(vec![7]);
        });

        assert!(matches!(result, Err(StoreError::Unavailable(_))));
        let item = store.get("e5").unwrap().unwrap();
        assert_eq!(item.archive_status, None);
        assert_eq!(item.archive_zip_data, None);
        assert_eq!(
            fs::read_to_string(temp.path().join(RECORDS_FILENAME)).unwrap(),
            before
        );
    }

    #[test]
    fn unknown_items_cannot_be_changed() {
        let temp = TempDir::new().unwrap();
        let store = FileItemStore::open(temp.path()).unwrap();
        let result = store.perform("missing", &mut |_| {});
        assert!(matches!(result, Err(StoreError::NotFound(_))));
    }
}
