//! The provider gateway contract.

use std::collections::HashMap;
use std::future::Future;

use fleetpatch_core::{CommandId, CommandState, FleetSnapshot, ImageId, InstanceId, InstanceState};

use crate::error::GatewayResult;

/// Vendor-neutral surface over the compute, fleet, and patch-management
/// APIs the rollout workflow drives.
///
/// Implementations are pure adapters. Every method maps to a single
/// provider call; there is no retrying, no polling, and no policy here.
/// A transient error means the same call may succeed later; a rejection
/// means it will not. Implementations must be safe for concurrent use by
/// independent rollout runs.
pub trait ProviderGateway: Send + Sync {
    /// Snapshot a running instance into a new image.
    fn create_image(
        &self,
        source: &str,
        name: &str,
        description: &str,
    ) -> impl Future<Output = GatewayResult<ImageId>> + Send;

    /// Launch `count` instances from an image. Non-empty on success.
    fn launch_instances(
        &self,
        image: &str,
        instance_type: &str,
        user_data: &str,
        count: u32,
    ) -> impl Future<Output = GatewayResult<Vec<InstanceId>>> + Send;

    /// Point-in-time lifecycle states for the given instances.
    fn describe_instance_states(
        &self,
        ids: &[InstanceId],
    ) -> impl Future<Output = GatewayResult<HashMap<InstanceId, InstanceState>>> + Send;

    /// Dispatch a patch command document to the target instances.
    fn send_patch_command(
        &self,
        targets: &[InstanceId],
        document: &str,
    ) -> impl Future<Output = GatewayResult<CommandId>> + Send;

    /// Status of a dispatched command on one target.
    fn get_command_status(
        &self,
        command: &str,
        target: &str,
    ) -> impl Future<Output = GatewayResult<CommandState>> + Send;

    /// Publish a launch configuration pointing fleets at a new image.
    /// Returns the name the provider recorded.
    fn publish_launch_config(
        &self,
        name: &str,
        image: &str,
        instance_type: &str,
    ) -> impl Future<Output = GatewayResult<String>> + Send;

    /// Set a fleet's desired capacity.
    fn update_fleet_desired_capacity(
        &self,
        fleet: &str,
        capacity: u32,
    ) -> impl Future<Output = GatewayResult<()>> + Send;

    /// Point-in-time read of fleet membership and member health.
    fn describe_fleet_members(
        &self,
        fleet: &str,
    ) -> impl Future<Output = GatewayResult<FleetSnapshot>> + Send;

    /// Terminate the given instances.
    fn terminate_instances(
        &self,
        ids: &[InstanceId],
    ) -> impl Future<Output = GatewayResult<()>> + Send;
}
