//! fleetpatch-poll — the convergence wait primitive.
//!
//! Every long-running provider operation in the rollout workflow is
//! awaited the same way: re-check observed state on a fixed cadence until
//! a predicate holds, the budget runs out, the provider answers in a way
//! waiting cannot fix, or the run is cancelled. This crate is that one
//! loop, parameterized; nothing else in the workspace sleeps.

pub mod cancel;
pub mod poller;

pub use cancel::{CancelToken, Canceller, cancel_pair};
pub use poller::{ConditionState, Criterion, PollOutcome, await_condition};
