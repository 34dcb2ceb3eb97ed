use serde::{Deserialize, Serialize};

pub type ItemId = String;

/// Final classification of an archive job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArchiveStatus {
    Full,
    Partial,
    Failed,
}

impl ArchiveStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ArchiveStatus::Full => "full",
            ArchiveStatus::Partial => "partial",
            ArchiveStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveMetadata {
    pub title: Option<String>,
    pub author: Option<String>,
    pub published_date: Option<String>,
}

/// Result of one archive job, written onto the item record and then dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveOutcome {
    pub metadata: ArchiveMetadata,
    /// Set only when a new `page.html` landed in the primary tier.
    pub html_relative_path: Option<String>,
    pub archive_status: ArchiveStatus,
    pub asset_file_names: Vec<String>,
    pub bundle_data: Option<Vec<u8>>,
}

impl ArchiveOutcome {
    pub fn failed() -> Self {
        Self {
            metadata: ArchiveMetadata::default(),
            html_relative_path: None,
            archive_status: ArchiveStatus::Failed,
            asset_file_names: Vec::new(),
            bundle_data: None,
        }
    }
}

/// The slice of a synced record this crate reads and writes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub id: ItemId,
    pub link_url: String,
    pub link_title: Option<String>,
    pub link_author: Option<String>,
    pub link_published_date: Option<String>,
    /// Primary-tier page, relative to the archive root.
    pub html_relative_path: Option<String>,
    pub archive_status: Option<ArchiveStatus>,
    pub asset_manifest_json: Option<String>,
    /// Fallback-tier bundle; cleared once the primary tier is confirmed local.
    pub archive_zip_data: Option<Vec<u8>>,
    pub document_relative_path: Option<String>,
    pub document_zip_data: Option<Vec<u8>>,
    pub archived_utc: Option<String>,
}

impl Item {
    pub fn new(id: impl Into<ItemId>, link_url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            link_url: link_url.into(),
            ..Self::default()
        }
    }

    /// Asset file names recorded by the last successful archive.
    pub fn asset_manifest(&self) -> Vec<String> {
        self.asset_manifest_json
            .as_deref()
            .and_then(|json| serde_json::from_str(json).ok())
            .unwrap_or_default()
    }

    /// Map a finished job onto the record.
    ///
    /// Metadata is only overwritten with values that were found. Archive
    /// pointers, manifest and bundle only change when the job wrote a new page,
    /// so a failed re-capture leaves the previous archive reachable.
    pub fn apply_outcome(&mut self, outcome: &ArchiveOutcome, archived_utc: &str) {
        let meta = &outcome.metadata;
        if let Some(title) = &meta.title {
            self.link_title = Some(title.clone());
        }
        if let Some(author) = &meta.author {
            self.link_author = Some(author.clone());
        }
        if let Some(date) = &meta.published_date {
            self.link_published_date = Some(date.clone());
        }

        if let Some(path) = &outcome.html_relative_path {
            self.html_relative_path = Some(path.clone());
            self.asset_manifest_json = manifest_json(&outcome.asset_file_names);
            self.archive_zip_data = outcome.bundle_data.clone();
        }

        self.archive_status = Some(outcome.archive_status);
        self.archived_utc = Some(archived_utc.to_string());
    }
}

/// JSON array of asset file names, or `None` when there are no assets.
pub fn manifest_json(file_names: &[String]) -> Option<String> {
    if file_names.is_empty() {
        return None;
    }
    serde_json::to_string(file_names).ok()
}

/// Item ids double as directory names; reject anything that could escape a root.
pub fn is_safe_item_id(id: &str) -> bool {
    !id.is_empty()
        && id != "."
        && id != ".."
        && !id.contains(['/', '\\', '\0'])
        && !id.starts_with('.')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn item_id_safety() {
        assert!(is_safe_item_id("3F2A-item"));
        for bad in ["", ".", "..", "a/b", "a\\b", ".hidden"] {
            assert!(!is_safe_item_id(bad), "{bad}");
        }
    }

    #[test]
    fn manifest_round_trips_through_item() {
        let mut item = Item::new("a", "https://example.com");
        item.asset_manifest_json = manifest_json(&["x.css".to_string(), "y.png".to_string()]);
        assert_eq!(item.asset_manifest(), vec!["x.css", "y.png"]);
        assert_eq!(manifest_json(&[]), None);
    }
}
