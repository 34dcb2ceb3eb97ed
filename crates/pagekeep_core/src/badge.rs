use crate::item::{ArchiveStatus, Item};

/// What a list row shows for an item's archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveBadge {
    Pending,
    Full,
    Partial,
    Failed,
}

impl ArchiveBadge {
    pub fn for_status(status: Option<ArchiveStatus>) -> Self {
        match status {
            None => ArchiveBadge::Pending,
            Some(ArchiveStatus::Full) => ArchiveBadge::Full,
            Some(ArchiveStatus::Partial) => ArchiveBadge::Partial,
            Some(ArchiveStatus::Failed) => ArchiveBadge::Failed,
        }
    }

    pub fn for_item(item: &Item) -> Self {
        Self::for_status(item.archive_status)
    }

    pub fn label(self) -> &'static str {
        match self {
            ArchiveBadge::Pending => "pending",
            ArchiveBadge::Full => "full",
            ArchiveBadge::Partial => "partial",
            ArchiveBadge::Failed => "failed",
        }
    }
}
