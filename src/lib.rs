//! Facade over the Strata workspace crates.
//!
//! Pulls the pieces of the engine into one namespace so applications can
//! depend on `strata` alone: the [`Algebra`] contract and span planner
//! from `strata-core`, the [`Store`] abstraction from `strata-store`, and
//! the [`DeltaLog`] engine with its change streams from `strata-log`.

pub use strata_core::{Algebra, CounterAlgebra, Key, ParseKeyError, PatchError};
pub use strata_log::{
    ChangeStream, Commit, DeltaLog, LogConfig, LogConfigBuilder, LogError, Stats, StreamEvent,
};
pub use strata_store::{MemoryStore, Store, StoreError};

/// The usual imports for working with a log.
pub mod prelude {
    pub use strata_core::Algebra;
    pub use strata_log::{DeltaLog, LogConfig, StreamEvent};
    pub use strata_store::{MemoryStore, Store};
}
