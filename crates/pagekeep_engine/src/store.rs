use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use pagekeep_core::{Item, ItemId};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("item {0} not found")]
    NotFound(ItemId),
    #[error("record store unavailable: {0}")]
    Unavailable(String),
}

/// The record store as seen by the archiver.
///
/// `perform` is the store's serialized mutation context; every change to an
/// item goes through it.
pub trait ItemStore: Send + Sync {
    fn get(&self, id: &str) -> Result<Option<Item>, StoreError>;

    fn perform(&self, id: &str, change: &mut dyn FnMut(&mut Item)) -> Result<(), StoreError>;
}

#[derive(Debug, Default)]
pub struct MemoryItemStore {
    items: Mutex<HashMap<ItemId, Item>>,
}

impl MemoryItemStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_items(items: impl IntoIterator<Item = Item>) -> Self {
        let store = Self::new();
        for item in items {
            store.insert(item);
        }
        store
    }

    pub fn insert(&self, item: Item) {
        let mut items = self.items.lock().unwrap_or_else(PoisonError::into_inner);
        items.insert(item.id.clone(), item);
    }
}

impl ItemStore for MemoryItemStore {
    fn get(&self, id: &str) -> Result<Option<Item>, StoreError> {
        let items = self.items.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(items.get(id).cloned())
    }

    fn perform(&self, id: &str, change: &mut dyn FnMut(&mut Item)) -> Result<(), StoreError> {
        let mut items = self.items.lock().unwrap_or_else(PoisonError::into_inner);
        let item = items
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        change(item);
        Ok(())
    }
}
