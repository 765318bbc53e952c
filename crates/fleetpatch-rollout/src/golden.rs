//! The golden-image fleet workflow.
//!
//! LaunchFromGoldenImage → DispatchPatchCommand →
//! AwaitPatchCommandComplete → CreateImageFromPatchedInstance →
//! PublishLaunchConfiguration → ScaleFleetToDesiredCapacity →
//! AwaitFleetHealthy → ValidateFleet → ScaleOutOldGeneration →
//! AwaitReplacementComplete.
//!
//! A workbench instance is launched from the golden image and patched
//! through the provider's command dispatch; the image cut from it is
//! promoted to the fleet's launch configuration, and the fleet is scaled
//! onto it. Fleet membership observed just before the first capacity
//! change is the old generation; its fate is decided by the drain policy
//! once the new generation validates.

use std::sync::Arc;

use tracing::info;

use fleetpatch_core::{
    CommandState, GoldenPatchRequest, ImageId, InstanceId, RolloutOutcome, StageName,
};
use fleetpatch_gateway::ProviderGateway;
use fleetpatch_poll::{CancelToken, ConditionState, Criterion, cancel_pair};

use crate::executor::{
    Run, StageFailure, create_image_checked, finish, launch_checked, start_stage, wait_stage,
};
use crate::policy::{DrainPolicy, Validator, accept_all, drain_all};

/// Orchestrator for the golden-image fleet variant.
pub struct GoldenRollout<G> {
    gateway: Arc<G>,
    validator: Validator,
    drain: DrainPolicy,
    cancel: Option<CancelToken>,
}

impl<G: ProviderGateway> GoldenRollout<G> {
    pub fn new(gateway: Arc<G>) -> Self {
        Self {
            gateway,
            validator: accept_all(),
            drain: drain_all(),
            cancel: None,
        }
    }

    /// Acceptance check run against the converged fleet.
    pub fn with_validator(mut self, validator: Validator) -> Self {
        self.validator = validator;
        self
    }

    /// Per-instance drain decision for the old generation.
    pub fn with_drain_policy(mut self, drain: DrainPolicy) -> Self {
        self.drain = drain;
        self
    }

    /// Observe cancellation through the given token.
    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Run the workflow to completion.
    ///
    /// Always returns an outcome; failures are carried in it, never
    /// propagated. Resources created before a halt stay up for
    /// inspection.
    pub async fn run(&self, request: &GoldenPatchRequest) -> RolloutOutcome {
        info!(
            fleet = %request.fleet,
            golden_image = %request.golden_image,
            "starting golden-image fleet rollout"
        );

        let _own;
        let cancel = match &self.cancel {
            Some(token) => token.clone(),
            None => {
                let (canceller, token) = cancel_pair();
                _own = canceller;
                token
            }
        };
        let gateway = self.gateway.as_ref();
        let mut run = Run::new();

        // A workbench instance to patch and image.
        let Some(workbench_ids) = start_stage(
            &mut run,
            &cancel,
            StageName::LaunchFromGoldenImage,
            |ids: &Vec<InstanceId>| ids.clone(),
            launch_checked(
                gateway,
                &request.golden_image,
                &request.instance_type,
                &request.user_data,
                1,
            ),
        )
        .await
        else {
            return finish(run, None, Vec::new(), Vec::new(), Vec::new());
        };
        let workbench = workbench_ids[0].clone();

        let Some(command) = start_stage(
            &mut run,
            &cancel,
            StageName::DispatchPatchCommand,
            |id: &String| vec![id.clone()],
            gateway.send_patch_command(&workbench_ids, &request.patch_document),
        )
        .await
        else {
            return finish(run, None, Vec::new(), Vec::new(), Vec::new());
        };

        // All targets must report success; one failure fails the wait.
        let criterion = Criterion::new(
            format!("patch command {command} complete"),
            request.poll.interval(),
            request.poll.timeout(),
        );
        let converged = wait_stage(
            &mut run,
            &cancel,
            StageName::AwaitPatchCommandComplete,
            criterion,
            vec![command.clone()],
            || command_complete(gateway, command.clone(), &workbench_ids),
        )
        .await;
        if !converged {
            return finish(run, None, Vec::new(), Vec::new(), Vec::new());
        }

        let Some(image) = start_stage(
            &mut run,
            &cancel,
            StageName::CreateImageFromPatchedInstance,
            |id: &ImageId| vec![id.clone()],
            create_image_checked(
                gateway,
                &workbench,
                &request.patched_image_name,
                &request.patched_image_description,
            ),
        )
        .await
        else {
            return finish(run, None, Vec::new(), Vec::new(), Vec::new());
        };

        let Some(config) = start_stage(
            &mut run,
            &cancel,
            StageName::PublishLaunchConfiguration,
            |name: &String| vec![name.clone()],
            gateway.publish_launch_config(&request.launch_config_name, &image, &request.instance_type),
        )
        .await
        else {
            return finish(run, Some(image), Vec::new(), Vec::new(), Vec::new());
        };
        info!(config = %config, image = %image, "launch configuration promoted");

        // Membership observed here is the old generation; the capacity
        // update that follows starts replacing it.
        let Some(old_generation) = start_stage(
            &mut run,
            &cancel,
            StageName::ScaleFleetToDesiredCapacity,
            |ids: &Vec<InstanceId>| ids.clone(),
            capture_and_scale(gateway, &request.fleet, request.desired_capacity),
        )
        .await
        else {
            return finish(run, Some(image), Vec::new(), Vec::new(), Vec::new());
        };

        let criterion = Criterion::new(
            format!("fleet {} healthy", request.fleet),
            request.poll.interval(),
            request.poll.timeout(),
        );
        let converged = wait_stage(
            &mut run,
            &cancel,
            StageName::AwaitFleetHealthy,
            criterion,
            Vec::new(),
            || fleet_healthy(gateway, &request.fleet, request.desired_capacity),
        )
        .await;
        if !converged {
            return finish(run, Some(image), Vec::new(), Vec::new(), old_generation);
        }

        // Validate the fleet as it stands after health convergence.
        let started = run.enter(StageName::ValidateFleet);
        if cancel.is_cancelled() {
            run.fail(StageName::ValidateFleet, started, StageFailure::Cancelled);
            return finish(run, Some(image), Vec::new(), Vec::new(), old_generation);
        }
        let members = match gateway.describe_fleet_members(&request.fleet).await {
            Ok(snapshot) => snapshot.member_ids(),
            Err(err) => {
                run.fail(StageName::ValidateFleet, started, err.into());
                return finish(run, Some(image), Vec::new(), Vec::new(), old_generation);
            }
        };
        if !(self.validator)(members.clone()).await {
            run.abort(
                StageName::ValidateFleet,
                started,
                "fleet validation reported failure; new capacity left running, old generation retained",
            );
            return finish(run, Some(image), members, Vec::new(), old_generation);
        }
        run.succeed(StageName::ValidateFleet, started, Vec::new());

        // Second capacity update: this is the one that actually retires
        // the previous generation.
        let (drained, retained): (Vec<InstanceId>, Vec<InstanceId>) = old_generation
            .iter()
            .cloned()
            .partition(|id| (self.drain)(id));
        if start_stage(
            &mut run,
            &cancel,
            StageName::ScaleOutOldGeneration,
            |_: &()| drained.clone(),
            scale_out(
                gateway,
                &request.fleet,
                request.desired_capacity,
                &drained,
            ),
        )
        .await
        .is_none()
        {
            return finish(run, Some(image), members, Vec::new(), old_generation);
        }
        if !retained.is_empty() {
            info!(retained = ?retained, "old-generation instances retained by drain policy");
        }

        let criterion = Criterion::new(
            format!("fleet {} replacement complete", request.fleet),
            request.poll.interval(),
            request.poll.timeout(),
        );
        let converged = wait_stage(
            &mut run,
            &cancel,
            StageName::AwaitReplacementComplete,
            criterion,
            Vec::new(),
            || replacement_complete(gateway, &request.fleet, request.desired_capacity),
        )
        .await;
        if !converged {
            return finish(run, Some(image), Vec::new(), drained, retained);
        }

        // The validated membership minus what this run retired.
        let final_instances: Vec<InstanceId> = members
            .into_iter()
            .filter(|id| !drained.contains(id))
            .collect();

        run.complete();
        finish(run, Some(image), final_instances, drained, retained)
    }
}

/// Poll predicate: the patch command succeeded on every target.
///
/// A conjunction: one in-progress target keeps the wait going, one
/// failed or cancelled target ends it.
async fn command_complete<G: ProviderGateway>(
    gateway: &G,
    command: String,
    targets: &[InstanceId],
) -> ConditionState {
    for target in targets {
        match gateway.get_command_status(&command, target).await {
            Ok(CommandState::Success) => {}
            Ok(CommandState::InProgress) => return ConditionState::NotYet,
            Ok(CommandState::Failed) => {
                return ConditionState::Errored(format!("patch command failed on {target}"));
            }
            Ok(CommandState::Cancelled) => {
                return ConditionState::Errored(format!("patch command cancelled on {target}"));
            }
            Err(err) if err.is_transient() => return ConditionState::NotYet,
            Err(err) => return ConditionState::Errored(err.to_string()),
        }
    }
    ConditionState::Satisfied
}

/// Poll predicate: healthy members have reached desired capacity.
async fn fleet_healthy<G: ProviderGateway>(
    gateway: &G,
    fleet: &str,
    desired: u32,
) -> ConditionState {
    match gateway.describe_fleet_members(fleet).await {
        Ok(snapshot) if snapshot.healthy_count() >= desired => ConditionState::Satisfied,
        Ok(_) => ConditionState::NotYet,
        Err(err) if err.is_transient() => ConditionState::NotYet,
        Err(err) => ConditionState::Errored(err.to_string()),
    }
}

/// Poll predicate: in-service members equal desired capacity exactly.
async fn replacement_complete<G: ProviderGateway>(
    gateway: &G,
    fleet: &str,
    desired: u32,
) -> ConditionState {
    match gateway.describe_fleet_members(fleet).await {
        Ok(snapshot) if snapshot.in_service_count() == desired => ConditionState::Satisfied,
        Ok(_) => ConditionState::NotYet,
        Err(err) if err.is_transient() => ConditionState::NotYet,
        Err(err) => ConditionState::Errored(err.to_string()),
    }
}

/// Read current membership, then raise the fleet to desired capacity.
/// The membership read first is the old generation.
async fn capture_and_scale<G: ProviderGateway>(
    gateway: &G,
    fleet: &str,
    desired: u32,
) -> fleetpatch_gateway::GatewayResult<Vec<InstanceId>> {
    let before = gateway.describe_fleet_members(fleet).await?;
    gateway.update_fleet_desired_capacity(fleet, desired).await?;
    Ok(before.member_ids())
}

/// Re-assert desired capacity, then terminate the drained portion of the
/// old generation.
async fn scale_out<G: ProviderGateway>(
    gateway: &G,
    fleet: &str,
    desired: u32,
    drained: &[InstanceId],
) -> fleetpatch_gateway::GatewayResult<()> {
    gateway.update_fleet_desired_capacity(fleet, desired).await?;
    if !drained.is_empty() {
        gateway.terminate_instances(drained).await?;
    }
    Ok(())
}
