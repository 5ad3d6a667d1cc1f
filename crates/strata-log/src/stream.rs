//! The bidirectional change stream.
//!
//! A stream starts in catch-up (one delta from its start index to the
//! head, tagged as a reset when the start has been compacted behind the
//! tail) and then goes live on commit notifications. Backpressure is the
//! consumer simply not polling: notifications queue in the subscription
//! while it is away, and the next poll drains them all and emits a single
//! coalesced delta instead of replaying each one. Writes feed the normal
//! commit path; a rejected patch surfaces as an inline [`StreamEvent::Rejected`]
//! record and the stream keeps going.

use crate::log::{Commit, DeltaLog};
use async_stream::stream;
use futures::stream::Stream;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::pin::Pin;
use std::task::{Context, Poll};
use strata_core::Algebra;
use strata_store::Store;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::sync::{broadcast, mpsc};
use tracing::warn;

/// One record in a change stream's output.
#[derive(Clone, Debug, PartialEq)]
pub enum StreamEvent<D> {
    /// An incremental (possibly coalesced) delta ending at `index`.
    Delta { delta: D, index: u64 },
    /// Catch-up from a start index older than the retained tail: history
    /// before the tail is gone, so the consumer must treat this as a
    /// full resynchronization, not an incremental update.
    Reset { delta: D, index: u64 },
    /// A submitted patch the algebra rejected; nothing was committed.
    Rejected { patch: D, reason: String },
}

impl<A, S> DeltaLog<A, S>
where
    A: Algebra + 'static,
    A::State: 'static,
    A::Delta: Serialize + DeserializeOwned + 'static,
    S: Store + 'static,
{
    /// A change stream over the full history (start index 0).
    pub fn stream(&self) -> ChangeStream<A, S> {
        self.stream_at(0)
    }

    /// A change stream catching up from `start`.
    pub fn stream_at(&self, start: u64) -> ChangeStream<A, S> {
        ChangeStream::new(self.clone(), start)
    }
}

/// A duplex view of the log: poll it for deltas, [`submit`](Self::submit)
/// patches into it. Dropping the stream unsubscribes it.
pub struct ChangeStream<A: Algebra, S: Store> {
    log: DeltaLog<A, S>,
    rejects: mpsc::UnboundedSender<StreamEvent<A::Delta>>,
    events: Pin<Box<dyn Stream<Item = StreamEvent<A::Delta>> + Send>>,
}

impl<A, S> ChangeStream<A, S>
where
    A: Algebra + 'static,
    A::State: 'static,
    A::Delta: Serialize + DeserializeOwned + 'static,
    S: Store + 'static,
{
    fn new(log: DeltaLog<A, S>, start: u64) -> Self {
        // Subscribe before reading the head so no commit can fall
        // between catch-up and live.
        let commits = log.subscribe();
        let (rejects, rejects_rx) = mpsc::unbounded_channel();
        let events = Box::pin(run(log.clone(), start, commits, rejects_rx));

        Self {
            log,
            rejects,
            events,
        }
    }

    /// Submit a patch through the normal commit path. On success the
    /// committed patch comes back out of the stream as a live delta; a
    /// rejection surfaces as an inline [`StreamEvent::Rejected`].
    pub async fn submit(&self, patch: A::Delta) {
        if let Err(err) = self.log.patch(patch.clone()).await {
            let _ = self.rejects.send(StreamEvent::Rejected {
                patch,
                reason: err.to_string(),
            });
        }
    }
}

impl<A, S> Stream for ChangeStream<A, S>
where
    A: Algebra,
    S: Store,
{
    type Item = StreamEvent<A::Delta>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().events.as_mut().poll_next(cx)
    }
}

enum Wake<D> {
    Inline(StreamEvent<D>),
    Commit(std::result::Result<Commit<D>, RecvError>),
}

fn run<A, S>(
    log: DeltaLog<A, S>,
    start: u64,
    mut commits: broadcast::Receiver<Commit<A::Delta>>,
    mut rejects: mpsc::UnboundedReceiver<StreamEvent<A::Delta>>,
) -> impl Stream<Item = StreamEvent<A::Delta>> + Send
where
    A: Algebra + 'static,
    A::State: 'static,
    A::Delta: Serialize + DeserializeOwned + 'static,
    S: Store + 'static,
{
    stream! {
        let stats = log.stats();
        let mut last = start.min(stats.head);

        // Catch-up phase: one delta to the current head, if anything to say.
        if start < stats.tail {
            match log.delta_between(stats.tail, stats.head).await {
                Ok(delta) => {
                    last = stats.head;
                    yield StreamEvent::Reset { delta, index: stats.head };
                }
                Err(err) => {
                    warn!(%err, "change stream catch-up failed");
                    return;
                }
            }
        } else if start < stats.head {
            match log.delta_between(start, stats.head).await {
                Ok(delta) => {
                    last = stats.head;
                    yield StreamEvent::Delta { delta, index: stats.head };
                }
                Err(err) => {
                    warn!(%err, "change stream catch-up failed");
                    return;
                }
            }
        }

        // Live phase.
        loop {
            let wake = tokio::select! {
                Some(event) = rejects.recv() => Wake::Inline(event),
                received = commits.recv() => Wake::Commit(received),
            };

            let received = match wake {
                Wake::Inline(event) => {
                    yield event;
                    continue;
                }
                Wake::Commit(received) => received,
            };

            let mut latest = last;
            let mut lagged = false;
            let mut count = 0usize;
            let mut single = None;

            match received {
                Ok(commit) => {
                    latest = commit.index;
                    count = 1;
                    single = Some(commit);
                }
                Err(RecvError::Lagged(_)) => lagged = true,
                Err(RecvError::Closed) => break,
            }

            // Drain whatever queued while the consumer was away; only
            // the newest index matters for a coalesced emission.
            loop {
                match commits.try_recv() {
                    Ok(commit) => {
                        latest = commit.index;
                        count += 1;
                        single = None;
                    }
                    Err(TryRecvError::Lagged(_)) => lagged = true,
                    Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
                }
            }
            if lagged {
                latest = log.stats().head;
            }

            if !lagged && count == 1 && latest == last + 1 {
                // Fast path: a single contiguous commit passes through
                // with its original payload.
                if let Some(commit) = single {
                    last = commit.index;
                    yield StreamEvent::Delta { delta: commit.patch, index: last };
                }
            } else if latest > last {
                match log.delta_between(last, latest).await {
                    Ok(delta) => {
                        last = latest;
                        yield StreamEvent::Delta { delta, index: latest };
                    }
                    Err(err) => {
                        warn!(%err, "change stream coalesce failed");
                        break;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{open_counter_log, patch_units};
    use futures::StreamExt;
    use std::time::Duration;
    use tokio::time::timeout;

    async fn next_event<A, S>(stream: &mut ChangeStream<A, S>) -> StreamEvent<A::Delta>
    where
        A: Algebra,
        S: Store,
    {
        timeout(Duration::from_secs(1), stream.next())
            .await
            .expect("stream event within a second")
            .expect("stream still open")
    }

    #[tokio::test]
    async fn test_catch_up_emits_full_delta() {
        let (log, _store) = open_counter_log(5).await;
        patch_units(&log, 100).await;

        let mut stream = log.stream();
        assert_eq!(
            next_event(&mut stream).await,
            StreamEvent::Delta {
                delta: 100,
                index: 100
            }
        );
    }

    #[tokio::test]
    async fn test_catch_up_from_explicit_start() {
        let (log, _store) = open_counter_log(5).await;
        patch_units(&log, 100).await;

        let mut stream = log.stream_at(50);
        assert_eq!(
            next_event(&mut stream).await,
            StreamEvent::Delta {
                delta: 50,
                index: 100
            }
        );

        log.patch(2).await.unwrap();
        assert_eq!(
            next_event(&mut stream).await,
            StreamEvent::Delta {
                delta: 2,
                index: 101
            }
        );
    }

    #[tokio::test]
    async fn test_no_emission_when_already_at_head() {
        let (log, _store) = open_counter_log(5).await;
        patch_units(&log, 100).await;

        let mut stream = log.stream_at(100);
        let poll = timeout(Duration::from_millis(50), stream.next()).await;
        assert!(poll.is_err(), "nothing should be emitted at the head");
    }

    #[tokio::test]
    async fn test_live_patch_follows_catch_up() {
        let (log, _store) = open_counter_log(5).await;
        patch_units(&log, 100).await;

        let mut stream = log.stream();
        assert_eq!(
            next_event(&mut stream).await,
            StreamEvent::Delta {
                delta: 100,
                index: 100
            }
        );

        log.patch(2).await.unwrap();
        assert_eq!(
            next_event(&mut stream).await,
            StreamEvent::Delta {
                delta: 2,
                index: 101
            }
        );
    }

    #[tokio::test]
    async fn test_reset_when_start_behind_tail() {
        let (log, _store) = open_counter_log(5).await;
        patch_units(&log, 5).await;
        for _ in 0..4 {
            log.compact().await.unwrap();
        }
        patch_units(&log, 1).await;
        assert_eq!(log.stats(), crate::Stats { head: 6, tail: 4 });

        let mut stream = log.stream_at(2);
        assert_eq!(
            next_event(&mut stream).await,
            StreamEvent::Reset { delta: 6, index: 6 }
        );
    }

    #[tokio::test]
    async fn test_rejected_patch_surfaces_inline() {
        let (log, _store) = open_counter_log(5).await;
        patch_units(&log, 100).await;

        let mut stream = log.stream_at(100);
        stream.submit(-2).await;

        match next_event(&mut stream).await {
            StreamEvent::Rejected { patch, reason } => {
                assert_eq!(patch, -2);
                assert!(reason.contains("invalid patch"));
            }
            other => panic!("expected a rejection record, got {:?}", other),
        }

        // The failed write advanced nothing.
        assert_eq!(log.stats().head, 100);
    }

    #[tokio::test]
    async fn test_submitted_patch_comes_back_as_delta() {
        let (log, _store) = open_counter_log(5).await;
        patch_units(&log, 3).await;

        let mut stream = log.stream_at(3);
        stream.submit(7).await;

        assert_eq!(
            next_event(&mut stream).await,
            StreamEvent::Delta { delta: 7, index: 4 }
        );
    }

    #[tokio::test]
    async fn test_stalled_consumer_gets_one_coalesced_delta() {
        let (log, _store) = open_counter_log(5).await;

        let mut stream = log.stream();
        // Drive the stream into its live phase, then stall it.
        let poll = timeout(Duration::from_millis(50), stream.next()).await;
        assert!(poll.is_err());

        log.patch(1).await.unwrap();
        log.patch(1).await.unwrap();
        log.patch(1).await.unwrap();

        // All three commits queued while stalled collapse into one delta.
        assert_eq!(
            next_event(&mut stream).await,
            StreamEvent::Delta { delta: 3, index: 3 }
        );

        let poll = timeout(Duration::from_millis(50), stream.next()).await;
        assert!(poll.is_err(), "nothing further to emit");
    }
}
