//! fleetpatch-rollout — the patch-and-rollout workflows.
//!
//! Two strictly linear workflow variants over the provider gateway:
//!
//! - **single instance** ([`PatchRollout`]) — image an existing instance,
//!   launch and patch a replacement via its bootstrap script, image the
//!   result, fan out final instances, validate, then decide the fate of
//!   the previous generation.
//! - **golden image** ([`GoldenRollout`]) — launch a workbench instance
//!   from a golden image, patch it through the provider's command
//!   dispatch, image it, promote the image to the fleet's launch
//!   configuration, converge the fleet onto it, validate, and retire the
//!   old generation.
//!
//! Every stage appends exactly one [`fleetpatch_core::StageResult`]; a
//! failed, timed-out, or cancelled stage halts the run and the entry
//! points return a terminal [`fleetpatch_core::RolloutOutcome`] rather
//! than propagating errors. Resources created before a halt stay up for
//! inspection.

mod executor;
pub mod golden;
pub mod instance;
pub mod policy;

pub use golden::GoldenRollout;
pub use instance::PatchRollout;
pub use policy::{DrainPolicy, Validator, accept_all, drain_all};

pub use fleetpatch_poll::{CancelToken, Canceller, cancel_pair};
