//! fleetpatch-core — shared domain types for the patch-rollout workflow.
//!
//! This crate carries the vocabulary every other fleetpatch crate speaks:
//! rollout requests, stage names and results, fleet snapshots, and the
//! terminal outcome of a run. It holds no policy and performs no I/O.

pub mod request;
pub mod run;
pub mod types;

pub use request::{GoldenPatchRequest, PatchRequest, PollSettings};
pub use run::*;
pub use types::*;
