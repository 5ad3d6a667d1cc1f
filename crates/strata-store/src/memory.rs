//! In-memory reference store.

use crate::{Store, StoreError};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use strata_core::Key;

/// HashMap-backed store, the reference adapter for tests and demos.
///
/// Cloning shares the underlying map, so a clone observes the same data.
#[derive(Clone, Debug, Default)]
pub struct MemoryStore {
    entries: std::sync::Arc<RwLock<HashMap<Key, Vec<u8>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys, marks included.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Whether a key is present (test hook for omission checks).
    pub fn contains(&self, key: &Key) -> bool {
        self.entries.read().contains_key(key)
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get(&self, key: &Key) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.entries.read().get(key).cloned())
    }

    async fn set(&self, key: &Key, value: Vec<u8>) -> Result<(), StoreError> {
        self.entries.write().insert(*key, value);
        Ok(())
    }

    async fn remove(&self, key: &Key) -> Result<(), StoreError> {
        self.entries.write().remove(key);
        Ok(())
    }

    async fn get_many(&self, keys: &[Key]) -> Result<HashMap<Key, Vec<u8>>, StoreError> {
        let entries = self.entries.read();
        Ok(keys
            .iter()
            .filter_map(|key| entries.get(key).map(|v| (*key, v.clone())))
            .collect())
    }

    async fn put_many(&self, batch: Vec<(Key, Option<Vec<u8>>)>) -> Result<(), StoreError> {
        let mut entries = self.entries.write();
        for (key, value) in batch {
            match value {
                Some(value) => {
                    entries.insert(key, value);
                }
                None => {
                    entries.remove(&key);
                }
            }
        }
        Ok(())
    }
}
