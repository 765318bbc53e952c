//! Pluggable decision seams.
//!
//! Validation and old-instance disposition are operator policy, not
//! workflow mechanics, so both are injected callbacks with conservative
//! defaults.

use std::pin::Pin;
use std::sync::Arc;

use fleetpatch_core::InstanceId;

type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// Acceptance check for newly provisioned instances.
///
/// Invoked once per run, after the new generation is up. May perform
/// network calls; retry policy, if any, is the validator's own concern.
/// A `false` verdict aborts the rollout and leaves both generations
/// running.
pub type Validator = Arc<dyn Fn(Vec<InstanceId>) -> BoxFuture<bool> + Send + Sync>;

/// Per-instance drain decision for the old generation, evaluated
/// independently per instance so partial draining is possible.
pub type DrainPolicy = Arc<dyn Fn(&InstanceId) -> bool + Send + Sync>;

/// Validator that accepts everything. The default: validation is opt-in.
pub fn accept_all() -> Validator {
    Arc::new(|_ids: Vec<InstanceId>| -> BoxFuture<bool> { Box::pin(async { true }) })
}

/// Drain policy that drains every old instance. The default.
pub fn drain_all() -> DrainPolicy {
    Arc::new(|_id| true)
}
