//! Store adapter seam for the Strata delta log.
//!
//! The log consumes any backend exposing `get`/`set`/`remove` over the
//! [`Key`] space with opaque byte values. Backends may override the batch
//! operations with native implementations; the defaults synthesize them
//! from the minimal three, preserving per-key success and failure
//! semantics (the first failing key aborts the batch).

pub mod memory;

use async_trait::async_trait;
use std::collections::HashMap;
use strata_core::Key;
use thiserror::Error;

pub use memory::MemoryStore;

/// Errors surfaced by a store backend.
#[derive(Error, Debug, Clone)]
pub enum StoreError {
    #[error("store backend failure: {0}")]
    Backend(String),
}

/// Minimal key/value interface the log persists through.
#[async_trait]
pub trait Store: Send + Sync {
    /// Read a value, `None` when the key is absent.
    async fn get(&self, key: &Key) -> Result<Option<Vec<u8>>, StoreError>;

    /// Write a value.
    async fn set(&self, key: &Key, value: Vec<u8>) -> Result<(), StoreError>;

    /// Delete a key. Removing an absent key is not an error.
    async fn remove(&self, key: &Key) -> Result<(), StoreError>;

    /// Read many keys; absent keys are left out of the result map.
    async fn get_many(&self, keys: &[Key]) -> Result<HashMap<Key, Vec<u8>>, StoreError> {
        let mut found = HashMap::with_capacity(keys.len());
        for key in keys {
            if let Some(value) = self.get(key).await? {
                found.insert(*key, value);
            }
        }
        Ok(found)
    }

    /// Apply many writes; a value of `None` deletes the key.
    async fn put_many(&self, entries: Vec<(Key, Option<Vec<u8>>)>) -> Result<(), StoreError> {
        for (key, value) in entries {
            match value {
                Some(value) => self.set(&key, value).await?,
                None => self.remove(&key).await?,
            }
        }
        Ok(())
    }
}
