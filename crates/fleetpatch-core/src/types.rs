//! Provider-facing domain types.
//!
//! These mirror what the compute provider reports about instances, patch
//! commands, and fleets. They are vendor-neutral: any SDK sitting behind
//! the gateway maps its own wire shapes onto these.

use serde::{Deserialize, Serialize};

/// Identifier of a machine image.
pub type ImageId = String;

/// Identifier of a compute instance.
pub type InstanceId = String;

/// Identifier of a dispatched patch command.
pub type CommandId = String;

/// Identifier of a managed fleet (auto-scaled instance group).
pub type FleetId = String;

// ── Instances ──────────────────────────────────────────────────────

/// Lifecycle state of a single instance as the provider reports it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InstanceState {
    /// Requested but not yet booted.
    Pending,
    /// Booted and reachable.
    Running,
    /// Shut down for good.
    Terminated,
    /// The provider could not say.
    Unknown,
}

// ── Patch commands ─────────────────────────────────────────────────

/// Status of a dispatched patch command on one target instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommandState {
    InProgress,
    Success,
    Failed,
    Cancelled,
}

// ── Fleets ─────────────────────────────────────────────────────────

/// Health of a fleet member as the provider reports it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MemberHealth {
    Healthy,
    Unhealthy,
    Unknown,
}

/// Where a fleet member is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MemberLifecycle {
    /// Launching, not yet serving.
    Pending,
    /// Counted toward serving capacity.
    InService,
    /// On its way out.
    Terminating,
}

/// One member of a fleet at one point in time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FleetMember {
    pub instance: InstanceId,
    pub health: MemberHealth,
    pub lifecycle: MemberLifecycle,
}

/// Point-in-time read of fleet membership.
///
/// A snapshot is valid for exactly one poll tick. Convergence decisions
/// must re-fetch rather than reuse one; a stale snapshot gives a wrong
/// answer about capacity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FleetSnapshot {
    pub fleet: FleetId,
    pub members: Vec<FleetMember>,
}

impl FleetSnapshot {
    /// Members the provider currently reports healthy.
    pub fn healthy_count(&self) -> u32 {
        self.members
            .iter()
            .filter(|m| m.health == MemberHealth::Healthy)
            .count() as u32
    }

    /// Members counted toward serving capacity.
    pub fn in_service_count(&self) -> u32 {
        self.members
            .iter()
            .filter(|m| m.lifecycle == MemberLifecycle::InService)
            .count() as u32
    }

    /// Instance ids of all current members, in provider order.
    pub fn member_ids(&self) -> Vec<InstanceId> {
        self.members.iter().map(|m| m.instance.clone()).collect()
    }
}
