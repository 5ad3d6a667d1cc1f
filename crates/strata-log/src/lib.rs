//! The Strata delta log engine.
//!
//! A [`DeltaLog`] maintains an append-only sequence of opaque patches over
//! a caller-supplied algebra, answering snapshot and range-delta queries in
//! O(log_g n) store reads through power-of-g aggregate entries. Old raw
//! history can be compacted away one step at a time without disturbing
//! queries between surviving indices, and a [`ChangeStream`] exposes
//! committed patches live, with catch-up, resynchronization and coalescing
//! under consumer backpressure.
//!
//! Modules:
//!
//! - [`config`] - log configuration and builder
//! - [`error`] - error types
//! - [`log`] - the log itself: commit path, queries, compaction
//! - [`stream`] - the bidirectional change stream

pub mod config;
pub mod error;
pub mod log;
pub mod stream;

pub use config::{LogConfig, LogConfigBuilder};
pub use error::{LogError, Result};
pub use log::{Commit, DeltaLog, Stats};
pub use stream::{ChangeStream, StreamEvent};

#[cfg(test)]
pub(crate) mod testutil;
