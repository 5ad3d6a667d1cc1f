//! Error types for the log engine.

use strata_core::PatchError;
use strata_store::StoreError;
use thiserror::Error;

/// Errors that can occur in log operations.
#[derive(Error, Debug)]
pub enum LogError {
    /// The algebra rejected a prospective patch; nothing was mutated.
    #[error("invalid patch: {0}")]
    InvalidPatch(String),

    /// A query index past the current head; nothing was read.
    #[error("index out of range: {index} is past head {head}")]
    OutOfRange { index: u64, head: u64 },

    /// A query range with its endpoints swapped; nothing was read.
    #[error("delta in incorrect order: {from} > {to}")]
    InvertedRange { from: u64, to: u64 },

    /// Rejected configuration.
    #[error("granularity must be at least 2, got {0}")]
    Granularity(u64),

    /// The backend failed a read or write; the affected operation is
    /// reported failed and is not retried.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A stored value failed to encode or decode.
    #[error("entry codec failure: {0}")]
    Codec(#[from] serde_json::Error),
}

impl From<PatchError> for LogError {
    fn from(err: PatchError) -> Self {
        LogError::InvalidPatch(err.0)
    }
}

pub type Result<T> = std::result::Result<T, LogError>;
