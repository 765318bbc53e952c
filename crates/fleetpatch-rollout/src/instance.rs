//! The single-instance patch workflow.
//!
//! CreateImage → LaunchPatchedInstance → AwaitInstanceRunning →
//! CreateFinalImage → LaunchFinalInstances → ValidateInstances →
//! DecideOldInstanceFate.
//!
//! Patches are applied by the replacement instance's bootstrap script on
//! first boot; the final image is cut from the instance after it has
//! settled into `Running`.

use std::sync::Arc;

use tracing::info;

use fleetpatch_core::{
    ImageId, InstanceId, InstanceState, PatchRequest, RolloutOutcome, StageName,
};
use fleetpatch_gateway::ProviderGateway;
use fleetpatch_poll::{CancelToken, ConditionState, Criterion, cancel_pair};

use crate::executor::{
    Run, StageFailure, create_image_checked, finish, launch_checked, start_stage, wait_stage,
};
use crate::policy::{DrainPolicy, Validator, accept_all, drain_all};

/// Orchestrator for the single-instance variant.
pub struct PatchRollout<G> {
    gateway: Arc<G>,
    validator: Validator,
    drain: DrainPolicy,
    cancel: Option<CancelToken>,
}

impl<G: ProviderGateway> PatchRollout<G> {
    pub fn new(gateway: Arc<G>) -> Self {
        Self {
            gateway,
            validator: accept_all(),
            drain: drain_all(),
            cancel: None,
        }
    }

    /// Acceptance check run against the final instances.
    pub fn with_validator(mut self, validator: Validator) -> Self {
        self.validator = validator;
        self
    }

    /// Per-instance drain decision for the previous generation.
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
    pub async fn run(&self, request: &PatchRequest) -> RolloutOutcome {
        info!(source = %request.source_instance, "starting instance patch rollout");

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
        let retained_on_halt = || request.previous_instances.clone();
        let mut run = Run::new();

        // Image the source instance as it is today.
        let Some(image) = start_stage(
            &mut run,
            &cancel,
            StageName::CreateImage,
            |id: &ImageId| vec![id.clone()],
            create_image_checked(
                gateway,
                &request.source_instance,
                &request.image_name,
                &request.image_description,
            ),
        )
        .await
        else {
            return finish(run, None, Vec::new(), Vec::new(), retained_on_halt());
        };

        // Launch the replacement; its bootstrap script applies the patches.
        let Some(patched_ids) = start_stage(
            &mut run,
            &cancel,
            StageName::LaunchPatchedInstance,
            |ids: &Vec<InstanceId>| ids.clone(),
            launch_checked(
                gateway,
                &image,
                &request.instance_type,
                &request.user_data,
                1,
            ),
        )
        .await
        else {
            return finish(run, None, Vec::new(), Vec::new(), retained_on_halt());
        };
        let patched = patched_ids[0].clone();

        let criterion = Criterion::new(
            format!("instance {patched} running"),
            request.poll.interval(),
            request.poll.timeout(),
        );
        let target = patched.clone();
        let converged = wait_stage(
            &mut run,
            &cancel,
            StageName::AwaitInstanceRunning,
            criterion,
            vec![patched.clone()],
            || instance_running(gateway, target.clone()),
        )
        .await;
        if !converged {
            return finish(run, None, Vec::new(), Vec::new(), retained_on_halt());
        }

        // Cut the image the fleet will actually run.
        let Some(final_image) = start_stage(
            &mut run,
            &cancel,
            StageName::CreateFinalImage,
            |id: &ImageId| vec![id.clone()],
            create_image_checked(
                gateway,
                &patched,
                &request.final_image_name,
                &request.final_image_description,
            ),
        )
        .await
        else {
            return finish(run, None, Vec::new(), Vec::new(), retained_on_halt());
        };

        // Final instances boot from the already-patched image; no bootstrap.
        let Some(final_ids) = start_stage(
            &mut run,
            &cancel,
            StageName::LaunchFinalInstances,
            |ids: &Vec<InstanceId>| ids.clone(),
            launch_checked(
                gateway,
                &final_image,
                &request.instance_type,
                "",
                request.final_count,
            ),
        )
        .await
        else {
            return finish(
                run,
                Some(final_image),
                Vec::new(),
                Vec::new(),
                retained_on_halt(),
            );
        };

        let started = run.enter(StageName::ValidateInstances);
        if cancel.is_cancelled() {
            run.fail(StageName::ValidateInstances, started, StageFailure::Cancelled);
            return finish(
                run,
                Some(final_image),
                final_ids,
                Vec::new(),
                retained_on_halt(),
            );
        }
        if !(self.validator)(final_ids.clone()).await {
            run.abort(
                StageName::ValidateInstances,
                started,
                "validation reported failure; new instances left running, old generation retained",
            );
            return finish(
                run,
                Some(final_image),
                final_ids,
                Vec::new(),
                retained_on_halt(),
            );
        }
        run.succeed(StageName::ValidateInstances, started, Vec::new());

        let started = run.enter(StageName::DecideOldInstanceFate);
        if cancel.is_cancelled() {
            run.fail(
                StageName::DecideOldInstanceFate,
                started,
                StageFailure::Cancelled,
            );
            return finish(
                run,
                Some(final_image),
                final_ids,
                Vec::new(),
                retained_on_halt(),
            );
        }
        let (drained, retained): (Vec<InstanceId>, Vec<InstanceId>) = request
            .previous_instances
            .iter()
            .cloned()
            .partition(|id| (self.drain)(id));
        if !drained.is_empty()
            && let Err(err) = gateway.terminate_instances(&drained).await
        {
            run.fail(StageName::DecideOldInstanceFate, started, err.into());
            return finish(
                run,
                Some(final_image),
                final_ids,
                Vec::new(),
                retained_on_halt(),
            );
        }
        if !retained.is_empty() {
            info!(retained = ?retained, "old instances retained by drain policy");
        }
        run.succeed(StageName::DecideOldInstanceFate, started, drained.clone());

        run.complete();
        finish(run, Some(final_image), final_ids, drained, retained)
    }
}

/// Poll predicate: the targeted instance reports `Running`.
async fn instance_running<G: ProviderGateway>(gateway: &G, id: InstanceId) -> ConditionState {
    match gateway.describe_instance_states(std::slice::from_ref(&id)).await {
        Ok(states) => match states.get(&id) {
            Some(InstanceState::Running) => ConditionState::Satisfied,
            Some(InstanceState::Terminated) => {
                ConditionState::Errored(format!("instance {id} terminated while awaited"))
            }
            _ => ConditionState::NotYet,
        },
        Err(err) if err.is_transient() => ConditionState::NotYet,
        Err(err) => ConditionState::Errored(err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use fleetpatch_core::{PollSettings, RunState, StageStatus};
    use fleetpatch_gateway::{GatewayError, MemoryGateway, Op};

    use super::*;

    fn request() -> PatchRequest {
        PatchRequest {
            source_instance: "i-source".to_string(),
            image_name: "web-pre-patch".to_string(),
            image_description: String::new(),
            instance_type: "m5.large".to_string(),
            user_data: "#!/bin/sh\nyum update -y\n".to_string(),
            final_image_name: "web-patched".to_string(),
            final_image_description: String::new(),
            final_count: 2,
            previous_instances: vec!["i-old-1".to_string(), "i-old-2".to_string()],
            poll: PollSettings {
                interval_secs: 0,
                timeout_secs: 5,
            },
        }
    }

    #[tokio::test]
    async fn happy_path_runs_every_stage_in_order() {
        let gateway = Arc::new(MemoryGateway::new());
        let outcome = PatchRollout::new(Arc::clone(&gateway)).run(&request()).await;

        assert!(outcome.success);
        assert_eq!(outcome.state, RunState::Succeeded);

        let executed: Vec<_> = outcome.stages.iter().map(|s| s.stage).collect();
        assert_eq!(executed, StageName::instance_sequence());
        assert!(
            outcome
                .stages
                .iter()
                .all(|s| s.status == StageStatus::Succeeded)
        );

        assert!(outcome.final_image.is_some());
        assert_eq!(outcome.final_instances.len(), 2);
        assert_eq!(outcome.drained, vec!["i-old-1", "i-old-2"]);
        assert!(outcome.retained.is_empty());

        let calls = gateway.calls().await;
        assert_eq!(calls.create_image, 2);
        assert_eq!(calls.launch_instances, 2);
        assert_eq!(calls.terminate_instances, 1);
    }

    #[tokio::test]
    async fn stage_timestamps_never_regress() {
        let gateway = Arc::new(MemoryGateway::new());
        let outcome = PatchRollout::new(gateway).run(&request()).await;

        let mut last = 0;
        for stage in &outcome.stages {
            assert!(stage.started_at >= last);
            assert!(stage.finished_at >= stage.started_at);
            last = stage.finished_at;
        }
    }

    #[tokio::test]
    async fn create_image_rejection_halts_before_any_launch() {
        let gateway = Arc::new(MemoryGateway::new());
        gateway
            .fail_next(
                Op::CreateImage,
                GatewayError::Rejection("source instance does not exist".to_string()),
            )
            .await;

        let outcome = PatchRollout::new(Arc::clone(&gateway)).run(&request()).await;

        assert!(!outcome.success);
        assert_eq!(outcome.failing_stage(), Some(StageName::CreateImage));
        assert_eq!(outcome.stages.len(), 1);
        assert_eq!(outcome.stages[0].status, StageStatus::Failed);
        assert_eq!(gateway.calls().await.launch_instances, 0);
    }

    #[tokio::test]
    async fn stuck_instance_times_out_distinctly() {
        let gateway = Arc::new(MemoryGateway::new().with_running_after(u32::MAX));
        let mut req = request();
        req.poll.timeout_secs = 0;

        let outcome = PatchRollout::new(gateway).run(&req).await;

        assert!(!outcome.success);
        assert_eq!(outcome.failing_stage(), Some(StageName::AwaitInstanceRunning));
        let last = outcome.stages.last().unwrap();
        assert_eq!(last.status, StageStatus::TimedOut);
    }

    #[tokio::test]
    async fn failed_validation_aborts_and_retains_old_instances() {
        let gateway = Arc::new(MemoryGateway::new());
        let validator: Validator = Arc::new(|_ids| Box::pin(async { false }));

        let outcome = PatchRollout::new(Arc::clone(&gateway))
            .with_validator(validator)
            .run(&request())
            .await;

        assert!(!outcome.success);
        assert!(matches!(outcome.state, RunState::Aborted { .. }));
        assert_eq!(outcome.failing_stage(), Some(StageName::ValidateInstances));
        assert_eq!(outcome.retained, vec!["i-old-1", "i-old-2"]);
        assert!(outcome.drained.is_empty());
        // The new instances stay up and the old generation is untouched.
        assert_eq!(outcome.final_instances.len(), 2);
        assert_eq!(gateway.calls().await.terminate_instances, 0);
    }

    #[tokio::test]
    async fn drain_policy_is_evaluated_per_instance() {
        let gateway = Arc::new(MemoryGateway::new());
        let drain: DrainPolicy = Arc::new(|id| id == "i-old-1");

        let outcome = PatchRollout::new(gateway)
            .with_drain_policy(drain)
            .run(&request())
            .await;

        assert!(outcome.success);
        assert_eq!(outcome.drained, vec!["i-old-1"]);
        assert_eq!(outcome.retained, vec!["i-old-2"]);
    }

    #[tokio::test]
    async fn transient_describe_failure_is_absorbed_by_polling() {
        let gateway = Arc::new(MemoryGateway::new());
        gateway
            .fail_next(
                Op::DescribeInstanceStates,
                GatewayError::Transient("connection reset".to_string()),
            )
            .await;

        let outcome = PatchRollout::new(gateway).run(&request()).await;
        assert!(outcome.success);
    }

    #[tokio::test]
    async fn cancelled_run_issues_no_provider_calls() {
        let gateway = Arc::new(MemoryGateway::new());
        let (canceller, token) = cancel_pair();
        canceller.cancel();

        let outcome = PatchRollout::new(Arc::clone(&gateway))
            .with_cancel(token)
            .run(&request())
            .await;

        assert!(!outcome.success);
        assert_eq!(outcome.stages.len(), 1);
        assert_eq!(outcome.stages[0].status, StageStatus::Cancelled);
        assert_eq!(gateway.calls().await.create_image, 0);
    }

    #[tokio::test]
    async fn no_previous_instances_means_nothing_to_drain() {
        let gateway = Arc::new(MemoryGateway::new());
        let mut req = request();
        req.previous_instances.clear();

        let outcome = PatchRollout::new(Arc::clone(&gateway)).run(&req).await;

        assert!(outcome.success);
        assert!(outcome.drained.is_empty());
        assert!(outcome.retained.is_empty());
        assert_eq!(gateway.calls().await.terminate_instances, 0);
    }
}
