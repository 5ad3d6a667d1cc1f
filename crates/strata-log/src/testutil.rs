//! Shared fixtures for the engine tests.

use crate::config::LogConfig;
use crate::log::DeltaLog;
use strata_core::{Algebra, PatchError};
use strata_store::MemoryStore;

/// Integer sum algebra that rejects the sentinel patch `-2`, mirroring
/// the failure injection used across the test suites.
#[derive(Clone, Copy, Debug)]
pub(crate) struct SentinelCounter;

impl Algebra for SentinelCounter {
    type State = i64;
    type Delta = i64;

    fn diff(&self, before: &i64, after: &i64) -> i64 {
        after - before
    }

    fn patch(&self, state: &i64, delta: &i64) -> Result<i64, PatchError> {
        if *delta == -2 {
            return Err(PatchError::new("sentinel rejected"));
        }
        Ok(state + delta)
    }
}

/// A fresh log over a shared in-memory store, starting from zero.
pub(crate) async fn open_counter_log(
    granularity: u64,
) -> (DeltaLog<SentinelCounter, MemoryStore>, MemoryStore) {
    let store = MemoryStore::new();
    let config = LogConfig {
        granularity,
        ..Default::default()
    };
    let log = DeltaLog::open(config, SentinelCounter, store.clone(), 0)
        .await
        .expect("open in-memory log");
    (log, store)
}

/// Append `n` unit patches.
pub(crate) async fn patch_units(log: &DeltaLog<SentinelCounter, MemoryStore>, n: u64) {
    for _ in 0..n {
        log.patch(1).await.expect("unit patch");
    }
}
