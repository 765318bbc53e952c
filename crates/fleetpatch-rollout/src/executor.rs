//! Stage execution plumbing shared by both workflow variants.
//!
//! A stage is one named unit of the rollout: at most one provider start
//! call, at most one convergence wait, exactly one appended
//! [`StageResult`]. The [`Run`] recorder owns the append-only result list
//! and emits the structured stage-transition event; the orchestrators
//! only ever move forward through it.

use std::future::Future;

use tracing::{debug, info, warn};

use fleetpatch_core::{
    ImageId, InstanceId, RolloutOutcome, RunState, StageEvent, StageName, StageResult,
    StageStatus, epoch_secs,
};
use fleetpatch_gateway::{GatewayError, GatewayResult, ProviderGateway};
use fleetpatch_poll::{CancelToken, ConditionState, Criterion, PollOutcome, await_condition};

/// Why a stage did not succeed.
#[derive(Debug, Clone)]
pub(crate) enum StageFailure {
    /// Provider rejection, a failed start call, or an errored wait.
    Failed(String),
    /// The convergence wait exhausted its budget.
    TimedOut(String),
    /// Cancellation was observed before or during the stage.
    Cancelled,
}

impl StageFailure {
    fn status(&self) -> StageStatus {
        match self {
            Self::Failed(_) => StageStatus::Failed,
            Self::TimedOut(_) => StageStatus::TimedOut,
            Self::Cancelled => StageStatus::Cancelled,
        }
    }

    fn reason(&self) -> String {
        match self {
            Self::Failed(detail) | Self::TimedOut(detail) => detail.clone(),
            Self::Cancelled => "run cancelled at a suspension point".to_string(),
        }
    }
}

impl From<GatewayError> for StageFailure {
    fn from(err: GatewayError) -> Self {
        Self::Failed(err.to_string())
    }
}

/// Convert a finished convergence wait into stage terms.
fn poll_result(outcome: PollOutcome) -> Result<u32, StageFailure> {
    match outcome {
        PollOutcome::Converged { ticks } => Ok(ticks),
        PollOutcome::TimedOut { waited } => Err(StageFailure::TimedOut(format!(
            "condition did not hold within {}s",
            waited.as_secs()
        ))),
        PollOutcome::Failed { detail } => Err(StageFailure::Failed(detail)),
        PollOutcome::Cancelled => Err(StageFailure::Cancelled),
    }
}

/// Append-only record of a run in progress.
pub(crate) struct Run {
    stages: Vec<StageResult>,
    state: RunState,
}

impl Run {
    pub fn new() -> Self {
        Self {
            stages: Vec::new(),
            state: RunState::NotStarted,
        }
    }

    /// Mark the named stage as currently executing.
    pub fn enter(&mut self, stage: StageName) -> u64 {
        self.state = RunState::Running(stage);
        debug!(stage = %stage, "stage started");
        epoch_secs()
    }

    /// Record a successful stage with the identifiers it produced.
    pub fn succeed(&mut self, stage: StageName, started_at: u64, produced: Vec<String>) {
        let result = StageResult {
            stage,
            status: StageStatus::Succeeded,
            produced,
            started_at,
            finished_at: epoch_secs(),
            error: None,
        };
        emit(&result);
        self.stages.push(result);
    }

    /// Record a failed stage and move the run to its terminal failed state.
    pub fn fail(&mut self, stage: StageName, started_at: u64, failure: StageFailure) {
        let reason = failure.reason();
        let result = StageResult {
            stage,
            status: failure.status(),
            produced: Vec::new(),
            started_at,
            finished_at: epoch_secs(),
            error: Some(reason.clone()),
        };
        emit(&result);
        self.stages.push(result);
        self.state = RunState::Failed { stage, reason };
    }

    /// Record a rejected validation and move the run to `Aborted`.
    pub fn abort(&mut self, stage: StageName, started_at: u64, reason: &str) {
        let result = StageResult {
            stage,
            status: StageStatus::Failed,
            produced: Vec::new(),
            started_at,
            finished_at: epoch_secs(),
            error: Some(reason.to_string()),
        };
        emit(&result);
        self.stages.push(result);
        self.state = RunState::Aborted {
            stage,
            reason: reason.to_string(),
        };
    }

    /// Mark the whole run as succeeded.
    pub fn complete(&mut self) {
        self.state = RunState::Succeeded;
    }

    pub fn into_parts(self) -> (RunState, Vec<StageResult>) {
        (self.state, self.stages)
    }
}

/// Emit the structured stage-transition event.
fn emit(result: &StageResult) {
    let event = StageEvent::from(result);
    match result.status {
        StageStatus::Succeeded => info!(
            stage = %event.stage,
            status = %event.status,
            timestamp = event.timestamp,
            produced = ?event.produced,
            "stage transition"
        ),
        _ => warn!(
            stage = %event.stage,
            status = %event.status,
            timestamp = event.timestamp,
            error = ?result.error,
            "stage transition"
        ),
    }
}

/// Execute a stage whose body is a single provider start operation.
///
/// Cancellation is checked before the operation is issued; `produced`
/// extracts the identifiers to record from the operation's output.
/// Returns `None` when the stage (and therefore the run) halted.
pub(crate) async fn start_stage<T, P, Fut>(
    run: &mut Run,
    cancel: &CancelToken,
    stage: StageName,
    produced: P,
    op: Fut,
) -> Option<T>
where
    P: FnOnce(&T) -> Vec<String>,
    Fut: Future<Output = GatewayResult<T>>,
{
    let started = run.enter(stage);
    if cancel.is_cancelled() {
        run.fail(stage, started, StageFailure::Cancelled);
        return None;
    }
    match op.await {
        Ok(value) => {
            let ids = produced(&value);
            run.succeed(stage, started, ids);
            Some(value)
        }
        Err(err) => {
            run.fail(stage, started, err.into());
            None
        }
    }
}

/// Assemble the terminal outcome from a finished (or halted) run.
pub(crate) fn finish(
    run: Run,
    final_image: Option<ImageId>,
    final_instances: Vec<InstanceId>,
    drained: Vec<InstanceId>,
    retained: Vec<InstanceId>,
) -> RolloutOutcome {
    let (state, stages) = run.into_parts();
    RolloutOutcome {
        success: state == RunState::Succeeded,
        state,
        final_image,
        final_instances,
        drained,
        retained,
        stages,
    }
}

/// Create an image, refusing an empty id: every downstream stage keys off
/// the identifiers its predecessors produced.
pub(crate) async fn create_image_checked<G: ProviderGateway>(
    gateway: &G,
    source: &str,
    name: &str,
    description: &str,
) -> GatewayResult<ImageId> {
    let id = gateway.create_image(source, name, description).await?;
    if id.is_empty() {
        return Err(GatewayError::Rejection(
            "provider returned an empty image id".to_string(),
        ));
    }
    Ok(id)
}

/// Launch instances, refusing an empty or partially-empty id list.
pub(crate) async fn launch_checked<G: ProviderGateway>(
    gateway: &G,
    image: &str,
    instance_type: &str,
    user_data: &str,
    count: u32,
) -> GatewayResult<Vec<InstanceId>> {
    let ids = gateway
        .launch_instances(image, instance_type, user_data, count)
        .await?;
    if ids.is_empty() || ids.iter().any(|id| id.is_empty()) {
        return Err(GatewayError::Rejection(
            "provider returned no usable instance ids".to_string(),
        ));
    }
    Ok(ids)
}

/// Execute a stage that is a pure convergence wait.
///
/// Returns `true` when the condition converged and the run may advance.
pub(crate) async fn wait_stage<C, Fut>(
    run: &mut Run,
    cancel: &CancelToken,
    stage: StageName,
    criterion: Criterion,
    produced: Vec<String>,
    check: C,
) -> bool
where
    C: FnMut() -> Fut,
    Fut: Future<Output = ConditionState>,
{
    let started = run.enter(stage);
    let outcome = await_condition(&criterion, cancel.clone(), check).await;
    match poll_result(outcome) {
        Ok(_ticks) => {
            run.succeed(stage, started, produced);
            true
        }
        Err(failure) => {
            run.fail(stage, started, failure);
            false
        }
    }
}
