//! The differ/patcher contract supplied by callers.
//!
//! The log never looks inside a state or a delta; it only asks the algebra
//! to diff two states, apply a delta, and compare deltas for equality
//! (canonical-empty detection). Single-step patches and compound deltas
//! share one representation, so the algebra must satisfy:
//!
//! - `patch(s, diff(s, t)) == t` for reachable states `s`, `t`
//! - `diff(s, s)` applied to any state is the identity
//!
//! Compound deltas stored by the log are always produced by `diff`, so an
//! algebra holding the laws above for caller-produced patches holds them
//! for aggregates too.

use std::fmt;

/// Rejection of a prospective patch against a given state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PatchError(pub String);

impl PatchError {
    pub fn new(reason: impl Into<String>) -> Self {
        PatchError(reason.into())
    }
}

impl fmt::Display for PatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid patch: {}", self.0)
    }
}

impl std::error::Error for PatchError {}

/// Domain algebra over a state type and its delta type.
pub trait Algebra: Send + Sync {
    /// The evolving state reconstructed by snapshots.
    type State: Clone + Send + Sync;

    /// The change representation, shared by patches and compound deltas.
    ///
    /// `PartialEq` is the explicit equality the log uses to detect the
    /// canonical empty delta (`diff(s, s)`); no serialized-bytes
    /// comparison happens anywhere.
    type Delta: Clone + PartialEq + Send + Sync;

    /// Compute the delta turning `before` into `after`.
    fn diff(&self, before: &Self::State, after: &Self::State) -> Self::Delta;

    /// Apply `delta` to `state`, or reject it as invalid for that state.
    fn patch(&self, state: &Self::State, delta: &Self::Delta) -> Result<Self::State, PatchError>;
}

/// Reference algebra: an `i64` running sum where deltas are differences.
///
/// Used by the soak binary and throughout the test suites; diffing is
/// subtraction and patching is addition, so every aggregate identity is
/// trivially exact.
#[derive(Clone, Copy, Debug, Default)]
pub struct CounterAlgebra;

impl Algebra for CounterAlgebra {
    type State = i64;
    type Delta = i64;

    fn diff(&self, before: &i64, after: &i64) -> i64 {
        after - before
    }

    fn patch(&self, state: &i64, delta: &i64) -> Result<i64, PatchError> {
        state
            .checked_add(*delta)
            .ok_or_else(|| PatchError::new("counter overflow"))
    }
}
