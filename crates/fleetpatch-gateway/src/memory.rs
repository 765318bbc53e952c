//! A deterministic in-memory provider.
//!
//! Convergence is scripted rather than real: launched instances report
//! `Pending` for a configurable number of describes before `Running`,
//! patch commands report `InProgress` for a configurable number of status
//! reads before their terminal state, and fleet membership advances one
//! step per describe toward the last requested capacity. Describing a
//! steady fleet is a pure read.
//!
//! Per-method call counters and single-shot failure injection make this
//! the workhorse behind the orchestrator test suites; the CLI rehearsal
//! mode runs against it too.

use std::collections::HashMap;

use tokio::sync::Mutex;
use tracing::debug;

use fleetpatch_core::{
    CommandId, CommandState, FleetId, FleetMember, FleetSnapshot, ImageId, InstanceId,
    InstanceState, MemberHealth, MemberLifecycle,
};

use crate::error::{GatewayError, GatewayResult};
use crate::gateway::ProviderGateway;

/// Gateway operations, named for failure injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    CreateImage,
    LaunchInstances,
    DescribeInstanceStates,
    SendPatchCommand,
    GetCommandStatus,
    PublishLaunchConfig,
    UpdateFleetDesiredCapacity,
    DescribeFleetMembers,
    TerminateInstances,
}

/// Per-method invocation counts, for call-count assertions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub create_image: u32,
    pub launch_instances: u32,
    pub describe_instance_states: u32,
    pub send_patch_command: u32,
    pub get_command_status: u32,
    pub publish_launch_config: u32,
    pub update_fleet_desired_capacity: u32,
    pub describe_fleet_members: u32,
    pub terminate_instances: u32,
}

#[derive(Debug)]
struct InstanceRecord {
    /// Describe calls that have observed this instance.
    observed: u32,
    terminated: bool,
}

#[derive(Debug)]
struct CommandRecord {
    /// Status reads per target.
    reads: HashMap<InstanceId, u32>,
    /// Terminal state reported once enough reads have happened.
    outcome: CommandState,
}

#[derive(Debug)]
struct FleetRecord {
    desired: u32,
    members: Vec<FleetMember>,
    /// Launch-config generation this fleet has acted on. A capacity
    /// update after a newer publish starts replacing current members.
    seen_config_generation: u32,
}

#[derive(Debug, Default)]
struct Inner {
    instances: HashMap<InstanceId, InstanceRecord>,
    commands: HashMap<CommandId, CommandRecord>,
    fleets: HashMap<FleetId, FleetRecord>,
    config_generation: u32,
    calls: CallCounts,
    fail_next: HashMap<Op, GatewayError>,
    seq: u32,
}

/// The simulated provider.
pub struct MemoryGateway {
    inner: Mutex<Inner>,
    /// Describes before a launched instance reports `Running`.
    running_after: u32,
    /// Status reads before a patch command reports its outcome.
    command_success_after: u32,
    /// Terminal state every patch command converges to.
    command_outcome: CommandState,
}

impl Default for MemoryGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryGateway {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            running_after: 2,
            command_success_after: 2,
            command_outcome: CommandState::Success,
        }
    }

    /// Number of describes before a launched instance reports `Running`.
    pub fn with_running_after(mut self, describes: u32) -> Self {
        self.running_after = describes;
        self
    }

    /// Number of status reads before a patch command reports its outcome.
    pub fn with_command_success_after(mut self, reads: u32) -> Self {
        self.command_success_after = reads;
        self
    }

    /// Terminal state every patch command converges to.
    pub fn with_command_outcome(mut self, outcome: CommandState) -> Self {
        self.command_outcome = outcome;
        self
    }

    /// Register a fleet with the given membership. Desired capacity starts
    /// at the membership size.
    pub async fn seed_fleet(&self, fleet: &str, members: Vec<FleetMember>) {
        let mut inner = self.inner.lock().await;
        let desired = members.len() as u32;
        let generation = inner.config_generation;
        inner.fleets.insert(
            fleet.to_string(),
            FleetRecord {
                desired,
                members,
                seen_config_generation: generation,
            },
        );
    }

    /// Fail the next invocation of `op` with `err`. Single-shot.
    pub async fn fail_next(&self, op: Op, err: GatewayError) {
        let mut inner = self.inner.lock().await;
        inner.fail_next.insert(op, err);
    }

    /// Snapshot of the per-method invocation counts.
    pub async fn calls(&self) -> CallCounts {
        self.inner.lock().await.calls
    }
}

/// A fleet member that is serving and healthy.
pub fn serving_member(id: &str) -> FleetMember {
    FleetMember {
        instance: id.to_string(),
        health: MemberHealth::Healthy,
        lifecycle: MemberLifecycle::InService,
    }
}

/// A fleet member still launching.
pub fn pending_member(id: &str) -> FleetMember {
    FleetMember {
        instance: id.to_string(),
        health: MemberHealth::Unknown,
        lifecycle: MemberLifecycle::Pending,
    }
}

/// One simulation step toward the fleet's desired capacity: grow if
/// short, then promote one launching member, then reap one terminating
/// member. A steady fleet is left untouched.
fn advance_fleet(record: &mut FleetRecord, seq: &mut u32) {
    if (record.members.len() as u32) < record.desired {
        *seq += 1;
        record.members.push(pending_member(&format!("i-sim-{seq:04}")));
    } else if let Some(member) = record
        .members
        .iter_mut()
        .find(|m| m.lifecycle == MemberLifecycle::Pending)
    {
        member.lifecycle = MemberLifecycle::InService;
        member.health = MemberHealth::Healthy;
    } else if let Some(pos) = record
        .members
        .iter()
        .position(|m| m.lifecycle == MemberLifecycle::Terminating)
    {
        record.members.remove(pos);
    }
}

impl ProviderGateway for MemoryGateway {
    async fn create_image(
        &self,
        source: &str,
        name: &str,
        _description: &str,
    ) -> GatewayResult<ImageId> {
        let mut inner = self.inner.lock().await;
        inner.calls.create_image += 1;
        if let Some(err) = inner.fail_next.remove(&Op::CreateImage) {
            return Err(err);
        }
        inner.seq += 1;
        let id = format!("img-{:04}", inner.seq);
        debug!(source, name, image = %id, "created simulated image");
        Ok(id)
    }

    async fn launch_instances(
        &self,
        image: &str,
        _instance_type: &str,
        _user_data: &str,
        count: u32,
    ) -> GatewayResult<Vec<InstanceId>> {
        let mut inner = self.inner.lock().await;
        inner.calls.launch_instances += 1;
        if let Some(err) = inner.fail_next.remove(&Op::LaunchInstances) {
            return Err(err);
        }
        if count == 0 {
            return Err(GatewayError::Rejection(
                "instance count must be positive".to_string(),
            ));
        }
        let mut ids = Vec::with_capacity(count as usize);
        for _ in 0..count {
            inner.seq += 1;
            let id = format!("i-{:04}", inner.seq);
            inner.instances.insert(
                id.clone(),
                InstanceRecord {
                    observed: 0,
                    terminated: false,
                },
            );
            ids.push(id);
        }
        debug!(image, count, "launched simulated instances");
        Ok(ids)
    }

    async fn describe_instance_states(
        &self,
        ids: &[InstanceId],
    ) -> GatewayResult<HashMap<InstanceId, InstanceState>> {
        let mut inner = self.inner.lock().await;
        inner.calls.describe_instance_states += 1;
        if let Some(err) = inner.fail_next.remove(&Op::DescribeInstanceStates) {
            return Err(err);
        }
        let running_after = self.running_after;
        let mut states = HashMap::with_capacity(ids.len());
        for id in ids {
            let state = match inner.instances.get_mut(id) {
                Some(record) => {
                    record.observed += 1;
                    if record.terminated {
                        InstanceState::Terminated
                    } else if record.observed >= running_after {
                        InstanceState::Running
                    } else {
                        InstanceState::Pending
                    }
                }
                None => InstanceState::Unknown,
            };
            states.insert(id.clone(), state);
        }
        Ok(states)
    }

    async fn send_patch_command(
        &self,
        targets: &[InstanceId],
        document: &str,
    ) -> GatewayResult<CommandId> {
        let mut inner = self.inner.lock().await;
        inner.calls.send_patch_command += 1;
        if let Some(err) = inner.fail_next.remove(&Op::SendPatchCommand) {
            return Err(err);
        }
        if targets.is_empty() {
            return Err(GatewayError::Rejection(
                "no targets for patch command".to_string(),
            ));
        }
        inner.seq += 1;
        let id = format!("cmd-{:04}", inner.seq);
        let outcome = self.command_outcome;
        inner.commands.insert(
            id.clone(),
            CommandRecord {
                reads: targets.iter().map(|t| (t.clone(), 0)).collect(),
                outcome,
            },
        );
        debug!(command = %id, document, targets = targets.len(), "dispatched simulated patch command");
        Ok(id)
    }

    async fn get_command_status(
        &self,
        command: &str,
        target: &str,
    ) -> GatewayResult<CommandState> {
        let mut inner = self.inner.lock().await;
        inner.calls.get_command_status += 1;
        if let Some(err) = inner.fail_next.remove(&Op::GetCommandStatus) {
            return Err(err);
        }
        let success_after = self.command_success_after;
        let Some(record) = inner.commands.get_mut(command) else {
            return Err(GatewayError::Rejection(format!("no such command: {command}")));
        };
        let Some(reads) = record.reads.get_mut(target) else {
            return Err(GatewayError::Rejection(format!(
                "command {command} has no invocation on {target}"
            )));
        };
        *reads += 1;
        if *reads >= success_after {
            Ok(record.outcome)
        } else {
            Ok(CommandState::InProgress)
        }
    }

    async fn publish_launch_config(
        &self,
        name: &str,
        image: &str,
        _instance_type: &str,
    ) -> GatewayResult<String> {
        let mut inner = self.inner.lock().await;
        inner.calls.publish_launch_config += 1;
        if let Some(err) = inner.fail_next.remove(&Op::PublishLaunchConfig) {
            return Err(err);
        }
        inner.config_generation += 1;
        debug!(name, image, "published simulated launch configuration");
        Ok(name.to_string())
    }

    async fn update_fleet_desired_capacity(
        &self,
        fleet: &str,
        capacity: u32,
    ) -> GatewayResult<()> {
        let mut inner = self.inner.lock().await;
        inner.calls.update_fleet_desired_capacity += 1;
        if let Some(err) = inner.fail_next.remove(&Op::UpdateFleetDesiredCapacity) {
            return Err(err);
        }
        let generation = inner.config_generation;
        let Some(record) = inner.fleets.get_mut(fleet) else {
            return Err(GatewayError::Rejection(format!("no such fleet: {fleet}")));
        };
        record.desired = capacity;
        if record.seen_config_generation < generation {
            // A newer launch configuration exists; current members are the
            // old generation and get replaced as the fleet re-converges.
            for member in &mut record.members {
                member.lifecycle = MemberLifecycle::Terminating;
                member.health = MemberHealth::Unknown;
            }
            record.seen_config_generation = generation;
        }
        debug!(fleet, capacity, "updated simulated fleet capacity");
        Ok(())
    }

    async fn describe_fleet_members(&self, fleet: &str) -> GatewayResult<FleetSnapshot> {
        let mut inner = self.inner.lock().await;
        inner.calls.describe_fleet_members += 1;
        if let Some(err) = inner.fail_next.remove(&Op::DescribeFleetMembers) {
            return Err(err);
        }
        let mut seq = inner.seq;
        let Some(record) = inner.fleets.get_mut(fleet) else {
            return Err(GatewayError::Rejection(format!("no such fleet: {fleet}")));
        };
        let snapshot = FleetSnapshot {
            fleet: fleet.to_string(),
            members: record.members.clone(),
        };
        advance_fleet(record, &mut seq);
        inner.seq = seq;
        Ok(snapshot)
    }

    async fn terminate_instances(&self, ids: &[InstanceId]) -> GatewayResult<()> {
        let mut inner = self.inner.lock().await;
        inner.calls.terminate_instances += 1;
        if let Some(err) = inner.fail_next.remove(&Op::TerminateInstances) {
            return Err(err);
        }
        for id in ids {
            if let Some(record) = inner.instances.get_mut(id) {
                record.terminated = true;
            }
            for record in inner.fleets.values_mut() {
                for member in record.members.iter_mut().filter(|m| &m.instance == id) {
                    member.lifecycle = MemberLifecycle::Terminating;
                    member.health = MemberHealth::Unknown;
                }
            }
        }
        debug!(count = ids.len(), "terminated simulated instances");
        Ok(())
    }
}
