//! The delta log: commit path, queries and compaction.
//!
//! All mutations (patch appends and compaction steps) are serialized
//! through a single write gate, a queue-fair async mutex: exactly one
//! mutation runs at a time, in submission order, and its store writes
//! complete or fail as a unit before the next begins. Queries read the
//! store directly without taking the gate; that is safe against concurrent
//! appends (committed entries are never rewritten by appends) but a query
//! overlapping an in-flight compaction can observe a torn view near the
//! moving tail. See DESIGN.md for the recorded trade-off.

use crate::config::LogConfig;
use crate::error::{LogError, Result};
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use strata_core::{span_keys, Algebra, Key};
use strata_store::Store;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, trace};

/// Notification of one committed patch, broadcast to subscribers.
#[derive(Clone, Debug)]
pub struct Commit<D> {
    /// The index the patch committed at.
    pub index: u64,
    /// The patch payload.
    pub patch: D,
}

/// The current head/tail marks.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stats {
    /// Latest committed index.
    pub head: u64,
    /// Oldest index whose raw history is guaranteed retained.
    pub tail: u64,
}

struct Inner<A: Algebra, S> {
    algebra: A,
    store: S,
    start: A::State,
    granularity: u64,
    /// Canonical empty delta, `diff(start, start)`; entries equal to it
    /// are omitted from the store, and absent entries fold as it.
    empty: A::Delta,
    marks: RwLock<Stats>,
    /// The mutation sequencer. Tokio's mutex queues waiters FIFO, so
    /// mutations run one at a time in submission order.
    gate: Mutex<()>,
    commits: broadcast::Sender<Commit<A::Delta>>,
}

/// An append-only patch log with multi-resolution aggregate deltas.
///
/// Cheap to clone; clones share the same log.
pub struct DeltaLog<A: Algebra, S: Store> {
    inner: Arc<Inner<A, S>>,
}

impl<A: Algebra, S: Store> Clone for DeltaLog<A, S> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<A, S> DeltaLog<A, S>
where
    A: Algebra,
    A::Delta: Serialize + DeserializeOwned,
    S: Store,
{
    /// Open a log bound to `start` and `store`, loading the persisted
    /// head/tail marks (absent marks default to zero). The log is ready
    /// as soon as this resolves.
    pub async fn open(config: LogConfig, algebra: A, store: S, start: A::State) -> Result<Self> {
        if config.granularity < 2 {
            return Err(LogError::Granularity(config.granularity));
        }

        let head = read_mark(&store, Key::Head).await?;
        let tail = read_mark(&store, Key::Tail).await?;
        let empty = algebra.diff(&start, &start);
        let (commits, _) = broadcast::channel(config.channel_capacity.max(1));

        debug!(head, tail, granularity = config.granularity, "delta log opened");

        Ok(Self {
            inner: Arc::new(Inner {
                algebra,
                store,
                start,
                granularity: config.granularity,
                empty,
                marks: RwLock::new(Stats { head, tail }),
                gate: Mutex::new(()),
                commits,
            }),
        })
    }

    /// Current head and tail.
    pub fn stats(&self) -> Stats {
        *self.inner.marks.read()
    }

    /// Configured granularity.
    pub fn granularity(&self) -> u64 {
        self.inner.granularity
    }

    /// Subscribe to commit notifications. A receiver that falls behind
    /// the channel capacity observes a lag error, not missed correctness;
    /// [`ChangeStream`](crate::ChangeStream) turns lag into a coalesced
    /// delta.
    pub fn subscribe(&self) -> broadcast::Receiver<Commit<A::Delta>> {
        self.inner.commits.subscribe()
    }

    /// Append a patch, returning the index it committed at.
    ///
    /// The patch is validated against the current head snapshot before
    /// any store write; a rejected patch mutates nothing. Aggregate
    /// entries for every scale dividing the new index are written in one
    /// batch, and the head pointer is written strictly last.
    pub async fn patch(&self, patch: A::Delta) -> Result<u64> {
        let inner = &self.inner;
        let _gate = inner.gate.lock().await;

        let head = inner.marks.read().head;
        let current = self.snapshot_at(head).await?;
        let after = inner.algebra.patch(&current, &patch)?;
        let next = head + 1;

        let mut batch = vec![(Key::entry(next, 1), self.encode_unless_empty(&patch)?)];
        self.aggregate_batch(&mut batch, next, &after).await?;
        inner.store.put_many(batch).await?;

        // Pointer last: a crash here leaves only orphaned entries past
        // the persisted head, ignored on reopen.
        inner.store.set(&Key::Head, encode(&next)?).await?;
        inner.marks.write().head = next;

        trace!(index = next, "patch committed");
        let _ = inner.commits.send(Commit { index: next, patch });

        Ok(next)
    }

    /// The state at the current head.
    pub async fn snapshot(&self) -> Result<A::State> {
        let head = self.stats().head;
        self.snapshot_at(head).await
    }

    /// The state at `index`.
    pub async fn snapshot_at(&self, index: u64) -> Result<A::State> {
        if index == 0 {
            return Ok(self.inner.start.clone());
        }

        let head = self.inner.marks.read().head;
        if index > head {
            return Err(LogError::OutOfRange { index, head });
        }

        self.reconstruct(self.inner.start.clone(), 0, index).await
    }

    /// The compound delta from `from` to the current head.
    pub async fn delta_since(&self, from: u64) -> Result<A::Delta> {
        let head = self.stats().head;
        self.delta_between(from, head).await
    }

    /// The compound delta between two indices, `from <= to <= head`.
    ///
    /// Both range checks happen before any store access. Entries the
    /// planner names but the store no longer holds (compacted away or
    /// canonically empty) fold as no-ops, so ranges reaching behind the
    /// tail still complete and reflect merged history.
    pub async fn delta_between(&self, from: u64, to: u64) -> Result<A::Delta> {
        let head = self.inner.marks.read().head;
        if to > head {
            return Err(LogError::OutOfRange { index: to, head });
        }
        if from > to {
            return Err(LogError::InvertedRange { from, to });
        }
        if from == to {
            return Ok(self.inner.empty.clone());
        }

        let base = self.snapshot_at(from).await?;
        let end = self.reconstruct(base.clone(), from, to).await?;
        Ok(self.inner.algebra.diff(&base, &end))
    }

    /// Advance the tail by one step, discarding one raw entry while
    /// repairing every aggregate whose window crossed the old boundary.
    ///
    /// No-op once `tail + 1 >= head`. Serialized through the write gate;
    /// concurrent queries spanning the moving tail may observe a torn
    /// view while this runs.
    pub async fn compact(&self) -> Result<()> {
        let inner = &self.inner;
        let _gate = inner.gate.lock().await;

        let Stats { head, tail } = *inner.marks.read();
        if tail + 1 >= head {
            return Ok(());
        }

        let t = tail + 1;

        // Merge the two raw steps straddling the new tail, reading
        // pre-advance data, then drop the entry behind it.
        let merged = self.delta_between(t - 1, t + 1).await?;
        inner
            .store
            .put_many(vec![
                (Key::entry(t + 1, 1), self.encode_unless_empty(&merged)?),
                (Key::entry(t, 1), None),
            ])
            .await?;

        // The merge changed the fine-grained history under these two
        // positions' aggregate chains.
        self.repair_chain(t).await?;
        self.repair_chain(t + 1).await?;

        // Every scale's first boundary past the new tail had a window
        // reaching across the merge; repair each, ascending, once.
        let mut affected = BTreeSet::new();
        let mut scale = inner.granularity;
        while scale <= head {
            let boundary = ((t + scale) / scale) * scale;
            if boundary > t + 1 && boundary <= head {
                affected.insert(boundary);
            }
            match scale.checked_mul(inner.granularity) {
                Some(next) => scale = next,
                None => break,
            }
        }
        for index in affected {
            self.repair_chain(index).await?;
        }

        // Tail pointer last, same crash discipline as commits.
        inner.store.set(&Key::Tail, encode(&t)?).await?;
        inner.marks.write().tail = t;

        debug!(tail = t, head, "compacted one step");
        Ok(())
    }

    /// Fold the stored entries covering `(from, to]` onto `base`.
    async fn reconstruct(&self, base: A::State, from: u64, to: u64) -> Result<A::State> {
        let inner = &self.inner;
        let keys = span_keys(from, to, inner.granularity);
        let found = inner.store.get_many(&keys).await?;

        let mut state = base;
        for key in &keys {
            if let Some(bytes) = found.get(key) {
                let delta: A::Delta = decode(bytes)?;
                state = inner.algebra.patch(&state, &delta)?;
            }
        }
        Ok(state)
    }

    /// Recompute the aggregate chain rooted at `index` from the
    /// now-current raw entry there (absent raw means the step is a
    /// no-op). Used by compaction; the commit path shares
    /// [`aggregate_batch`](Self::aggregate_batch) with the `after` state
    /// it already has in hand.
    async fn repair_chain(&self, index: u64) -> Result<()> {
        let inner = &self.inner;
        if index == 0 || index % inner.granularity != 0 {
            return Ok(());
        }

        let prev = self.snapshot_at(index - 1).await?;
        let after = match self.read_entry(Key::entry(index, 1)).await? {
            Some(raw) => inner.algebra.patch(&prev, &raw)?,
            None => prev,
        };

        let mut batch = Vec::new();
        self.aggregate_batch(&mut batch, index, &after).await?;
        inner.store.put_many(batch).await?;
        Ok(())
    }

    /// Queue writes for every aggregate ending at `index`: one per scale
    /// `g, g², …` dividing it, stopping at the first that does not
    /// (scales are nested, so larger ones cannot divide either). All
    /// scales share the one `after` state.
    async fn aggregate_batch(
        &self,
        batch: &mut Vec<(Key, Option<Vec<u8>>)>,
        index: u64,
        after: &A::State,
    ) -> Result<()> {
        let inner = &self.inner;
        let mut scale = inner.granularity;

        while scale <= index && index % scale == 0 {
            let before = self.snapshot_at(index - scale).await?;
            let aggregate = inner.algebra.diff(&before, after);
            batch.push((Key::entry(index, scale), self.encode_unless_empty(&aggregate)?));

            match scale.checked_mul(inner.granularity) {
                Some(next) => scale = next,
                None => break,
            }
        }
        Ok(())
    }

    async fn read_entry(&self, key: Key) -> Result<Option<A::Delta>> {
        match self.inner.store.get(&key).await? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Encode a delta for storage, or `None` (delete) when it equals the
    /// canonical empty delta.
    fn encode_unless_empty(&self, delta: &A::Delta) -> Result<Option<Vec<u8>>> {
        if *delta == self.inner.empty {
            Ok(None)
        } else {
            Ok(Some(encode(delta)?))
        }
    }
}

async fn read_mark<S: Store>(store: &S, key: Key) -> Result<u64> {
    match store.get(&key).await? {
        Some(bytes) => decode(&bytes),
        None => Ok(0),
    }
}

pub(crate) fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(value)?)
}

pub(crate) fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    Ok(serde_json::from_slice(bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{open_counter_log, patch_units};

    #[tokio::test]
    async fn test_fresh_log_is_empty() {
        let (log, _store) = open_counter_log(5).await;

        assert_eq!(log.stats(), Stats { head: 0, tail: 0 });
        assert_eq!(log.snapshot().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_granularity_validated() {
        let config = LogConfig {
            granularity: 1,
            ..Default::default()
        };
        let result = DeltaLog::open(
            config,
            strata_core::CounterAlgebra,
            strata_store::MemoryStore::new(),
            0i64,
        )
        .await;

        assert!(matches!(result, Err(LogError::Granularity(1))));
    }

    #[tokio::test]
    async fn test_five_unit_patches() {
        let (log, _store) = open_counter_log(5).await;
        patch_units(&log, 5).await;

        assert_eq!(log.stats().head, 5);
        assert_eq!(log.snapshot().await.unwrap(), 5);
        assert_eq!(log.snapshot_at(5).await.unwrap(), 5);
        assert_eq!(log.delta_between(0, 5).await.unwrap(), 5);
        assert_eq!(log.delta_since(0).await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_snapshot_delta_consistency_sweep() {
        let (log, _store) = open_counter_log(5).await;
        for i in 1..=12i64 {
            log.patch(i).await.unwrap();
        }

        let head = log.stats().head;
        for i in 0..=head {
            assert_eq!(log.delta_between(i, i).await.unwrap(), 0);
            for j in i..=head {
                let si = log.snapshot_at(i).await.unwrap();
                let sj = log.snapshot_at(j).await.unwrap();
                let d = log.delta_between(i, j).await.unwrap();
                // patcher(snapshot(i), delta(i, j)) == snapshot(j)
                assert_eq!(si + d, sj, "range {}..{}", i, j);
            }
        }
    }

    #[tokio::test]
    async fn test_delta_from_arbitrary_points() {
        let (log, _store) = open_counter_log(5).await;
        patch_units(&log, 1000).await;

        assert_eq!(log.delta_between(0, 0).await.unwrap(), 0);
        assert_eq!(log.delta_between(1, 2).await.unwrap(), 1);
        assert_eq!(log.delta_between(1, 3).await.unwrap(), 2);
        assert_eq!(log.delta_between(0, 50).await.unwrap(), 50);
        assert_eq!(log.delta_between(1, 50).await.unwrap(), 49);
        assert_eq!(log.delta_between(951, 1000).await.unwrap(), 49);
    }

    #[tokio::test]
    async fn test_range_validation_errors() {
        let (log, _store) = open_counter_log(5).await;
        patch_units(&log, 3).await;

        assert!(matches!(
            log.delta_between(0, 4).await,
            Err(LogError::OutOfRange { index: 4, head: 3 })
        ));
        assert!(matches!(
            log.delta_between(3, 2).await,
            Err(LogError::InvertedRange { from: 3, to: 2 })
        ));
        assert!(matches!(
            log.snapshot_at(9).await,
            Err(LogError::OutOfRange { index: 9, head: 3 })
        ));
    }

    #[tokio::test]
    async fn test_rejected_patch_mutates_nothing() {
        let (log, store) = open_counter_log(5).await;
        patch_units(&log, 2).await;
        let len_before = store.len();

        // -2 is the sentinel the test algebra rejects.
        let result = log.patch(-2).await;
        assert!(matches!(result, Err(LogError::InvalidPatch(_))));

        assert_eq!(log.stats().head, 2);
        assert_eq!(store.len(), len_before);
        assert_eq!(log.snapshot().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_canonically_empty_patch_stores_no_entry() {
        let (log, store) = open_counter_log(5).await;

        let index = log.patch(0).await.unwrap();
        assert_eq!(index, 1);
        assert!(!store.contains(&Key::entry(1, 1)));

        // The index still exists and is queryable.
        assert_eq!(log.stats().head, 1);
        assert_eq!(log.snapshot_at(1).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_aggregates_written_on_scale_boundaries() {
        let (log, store) = open_counter_log(5).await;
        patch_units(&log, 25).await;

        assert!(store.contains(&Key::entry(5, 5)));
        assert!(store.contains(&Key::entry(10, 5)));
        assert!(store.contains(&Key::entry(25, 5)));
        assert!(store.contains(&Key::entry(25, 25)));
        assert!(!store.contains(&Key::entry(25, 125)));
        assert!(!store.contains(&Key::entry(7, 5)));
    }

    #[tokio::test]
    async fn test_compact_empty_log_does_nothing() {
        let (log, _store) = open_counter_log(2).await;

        log.compact().await.unwrap();
        assert_eq!(log.stats(), Stats { head: 0, tail: 0 });
    }

    #[tokio::test]
    async fn test_compact_single_patch_does_nothing() {
        let (log, _store) = open_counter_log(2).await;
        patch_units(&log, 1).await;

        log.compact().await.unwrap();
        assert_eq!(log.stats(), Stats { head: 1, tail: 0 });
        assert_eq!(log.delta_between(0, 1).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_compact_merges_individual_patches() {
        let (log, _store) = open_counter_log(2).await;
        patch_units(&log, 2).await;

        log.compact().await.unwrap();

        assert_eq!(log.stats(), Stats { head: 2, tail: 1 });
        assert_eq!(log.delta_between(0, 1).await.unwrap(), 0);
        assert_eq!(log.delta_between(1, 2).await.unwrap(), 2);
    }

    /// Eight unit patches under granularity 2, compacted one step at a
    /// time. After `k` compactions the value at index `i` is 0 for
    /// `i <= tail` (its history was merged forward) and `i` otherwise;
    /// every snapshot and range delta must match that model after every
    /// round.
    #[tokio::test]
    async fn test_repeated_compaction_preserves_surviving_ranges() {
        let (log, _store) = open_counter_log(2).await;
        patch_units(&log, 8).await;

        for round in 0..=8u64 {
            let tail = log.stats().tail;
            assert_eq!(tail, round.min(7), "round {}", round);

            let value = |i: u64| if i <= tail { 0i64 } else { i as i64 };
            for i in 0..=8u64 {
                assert_eq!(
                    log.snapshot_at(i).await.unwrap(),
                    value(i),
                    "round {} snapshot {}",
                    round,
                    i
                );
                for j in i..=8u64 {
                    assert_eq!(
                        log.delta_between(i, j).await.unwrap(),
                        value(j) - value(i),
                        "round {} delta {}..{}",
                        round,
                        i,
                        j
                    );
                }
            }

            log.compact().await.unwrap();
        }

        // Fully compacted and idempotent from here on.
        assert_eq!(log.stats(), Stats { head: 8, tail: 7 });
        assert_eq!(log.delta_between(7, 8).await.unwrap(), 8);
    }

    #[tokio::test]
    async fn test_compaction_then_new_patches() {
        let (log, _store) = open_counter_log(5).await;
        patch_units(&log, 5).await;
        for _ in 0..4 {
            log.compact().await.unwrap();
        }
        patch_units(&log, 1).await;

        assert_eq!(log.stats(), Stats { head: 6, tail: 4 });
        assert_eq!(log.delta_between(4, 6).await.unwrap(), 6);
        assert_eq!(log.snapshot().await.unwrap(), 6);
    }

    #[tokio::test]
    async fn test_reopen_recovers_marks_and_history() {
        let store = strata_store::MemoryStore::new();
        let config = LogConfig {
            granularity: 5,
            ..Default::default()
        };

        {
            let log = DeltaLog::open(
                config.clone(),
                strata_core::CounterAlgebra,
                store.clone(),
                0i64,
            )
            .await
            .unwrap();
            for _ in 0..7 {
                log.patch(1).await.unwrap();
            }
            log.compact().await.unwrap();
            log.compact().await.unwrap();
        }

        let log = DeltaLog::open(config, strata_core::CounterAlgebra, store, 0i64)
            .await
            .unwrap();

        assert_eq!(log.stats(), Stats { head: 7, tail: 2 });
        assert_eq!(log.snapshot().await.unwrap(), 7);
        assert_eq!(log.delta_between(2, 7).await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_subscribe_sees_commits_in_order() {
        let (log, _store) = open_counter_log(5).await;
        let mut rx = log.subscribe();

        log.patch(3).await.unwrap();
        log.patch(4).await.unwrap();

        let first = rx.recv().await.unwrap();
        assert_eq!((first.index, first.patch), (1, 3));
        let second = rx.recv().await.unwrap();
        assert_eq!((second.index, second.patch), (2, 4));
    }

    #[tokio::test]
    async fn test_sequencer_serializes_concurrent_appends() {
        let (log, _store) = open_counter_log(5).await;

        let mut handles = Vec::new();
        for _ in 0..8 {
            let log = log.clone();
            handles.push(tokio::spawn(async move {
                for _ in 0..25 {
                    log.patch(1).await.unwrap();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(log.stats().head, 200);
        assert_eq!(log.snapshot().await.unwrap(), 200);
    }
}
