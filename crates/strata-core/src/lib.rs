//! Core building blocks for the Strata delta log.
//!
//! This crate is the pure, dependency-light layer: the [`Algebra`] contract
//! supplied by callers (how to diff two states and how to apply a delta),
//! the storage [`Key`] space shared with pluggable backends, and the
//! interval planner that maps an index range to the minimal set of stored
//! aggregate entries covering it.

pub mod algebra;
pub mod key;
pub mod plan;

pub use algebra::{Algebra, CounterAlgebra, PatchError};
pub use key::{Key, ParseKeyError};
pub use plan::span_keys;
