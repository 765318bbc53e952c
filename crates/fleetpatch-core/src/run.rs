//! Stage records, run states, and the terminal outcome of a rollout.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::{ImageId, InstanceId};

/// Every stage of the two workflow variants.
///
/// Stage order within a variant is total; see [`StageName::instance_sequence`]
/// and [`StageName::golden_sequence`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StageName {
    // Single-instance variant.
    CreateImage,
    LaunchPatchedInstance,
    AwaitInstanceRunning,
    CreateFinalImage,
    LaunchFinalInstances,
    ValidateInstances,
    DecideOldInstanceFate,
    // Golden-image fleet variant.
    LaunchFromGoldenImage,
    DispatchPatchCommand,
    AwaitPatchCommandComplete,
    CreateImageFromPatchedInstance,
    PublishLaunchConfiguration,
    ScaleFleetToDesiredCapacity,
    AwaitFleetHealthy,
    ValidateFleet,
    ScaleOutOldGeneration,
    AwaitReplacementComplete,
}

impl StageName {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CreateImage => "CreateImage",
            Self::LaunchPatchedInstance => "LaunchPatchedInstance",
            Self::AwaitInstanceRunning => "AwaitInstanceRunning",
            Self::CreateFinalImage => "CreateFinalImage",
            Self::LaunchFinalInstances => "LaunchFinalInstances",
            Self::ValidateInstances => "ValidateInstances",
            Self::DecideOldInstanceFate => "DecideOldInstanceFate",
            Self::LaunchFromGoldenImage => "LaunchFromGoldenImage",
            Self::DispatchPatchCommand => "DispatchPatchCommand",
            Self::AwaitPatchCommandComplete => "AwaitPatchCommandComplete",
            Self::CreateImageFromPatchedInstance => "CreateImageFromPatchedInstance",
            Self::PublishLaunchConfiguration => "PublishLaunchConfiguration",
            Self::ScaleFleetToDesiredCapacity => "ScaleFleetToDesiredCapacity",
            Self::AwaitFleetHealthy => "AwaitFleetHealthy",
            Self::ValidateFleet => "ValidateFleet",
            Self::ScaleOutOldGeneration => "ScaleOutOldGeneration",
            Self::AwaitReplacementComplete => "AwaitReplacementComplete",
        }
    }

    /// Declared order of the single-instance workflow.
    pub fn instance_sequence() -> &'static [StageName] {
        &[
            Self::CreateImage,
            Self::LaunchPatchedInstance,
            Self::AwaitInstanceRunning,
            Self::CreateFinalImage,
            Self::LaunchFinalInstances,
            Self::ValidateInstances,
            Self::DecideOldInstanceFate,
        ]
    }

    /// Declared order of the golden-image fleet workflow.
    pub fn golden_sequence() -> &'static [StageName] {
        &[
            Self::LaunchFromGoldenImage,
            Self::DispatchPatchCommand,
            Self::AwaitPatchCommandComplete,
            Self::CreateImageFromPatchedInstance,
            Self::PublishLaunchConfiguration,
            Self::ScaleFleetToDesiredCapacity,
            Self::AwaitFleetHealthy,
            Self::ValidateFleet,
            Self::ScaleOutOldGeneration,
            Self::AwaitReplacementComplete,
        ]
    }
}

impl fmt::Display for StageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome classification of one executed stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StageStatus {
    /// Declared but not yet executed.
    Pending,
    Succeeded,
    /// The provider rejected the stage's operation, or a start call failed.
    Failed,
    /// The stage's convergence wait exhausted its budget. Distinct from
    /// `Failed`: a timeout says "stuck", a failure says "refused".
    TimedOut,
    /// The run was cancelled while this stage was executing.
    Cancelled,
}

impl StageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::Succeeded => "Succeeded",
            Self::Failed => "Failed",
            Self::TimedOut => "TimedOut",
            Self::Cancelled => "Cancelled",
        }
    }
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Record of one executed stage. Append-only: the orchestrator writes each
/// stage's result exactly once and never revisits it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageResult {
    pub stage: StageName,
    pub status: StageStatus,
    /// Identifiers this stage produced or captured (image ids, instance
    /// ids, command ids, launch configuration names).
    pub produced: Vec<String>,
    /// Unix timestamp (seconds) when the stage began.
    pub started_at: u64,
    /// Unix timestamp (seconds) when the stage's result became known.
    pub finished_at: u64,
    pub error: Option<String>,
}

/// Structured event emitted on every stage transition.
///
/// The field set is the contract; how a subscriber formats it is not.
#[derive(Debug, Clone, Serialize)]
pub struct StageEvent {
    pub stage: StageName,
    pub status: StageStatus,
    pub timestamp: u64,
    pub produced: Vec<String>,
}

impl From<&StageResult> for StageEvent {
    fn from(result: &StageResult) -> Self {
        Self {
            stage: result.stage,
            status: result.status,
            timestamp: result.finished_at,
            produced: result.produced.clone(),
        }
    }
}

/// Progress of a rollout run through its stage sequence.
///
/// Strictly linear: `NotStarted → Running(stage) →` one of the three
/// terminal states. There is no stage re-entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunState {
    NotStarted,
    Running(StageName),
    Succeeded,
    /// A stage failed or timed out; `stage` names the offender.
    Failed { stage: StageName, reason: String },
    /// Validation said no. New resources stay up, the old generation is
    /// retained untouched.
    Aborted { stage: StageName, reason: String },
}

/// Terminal record of a rollout run. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RolloutOutcome {
    pub success: bool,
    pub state: RunState,
    /// The image the run promoted, once one exists.
    pub final_image: Option<ImageId>,
    /// Instances serving the new image at the end of the run.
    pub final_instances: Vec<InstanceId>,
    /// Old-generation instances this run terminated.
    pub drained: Vec<InstanceId>,
    /// Old-generation instances deliberately left running.
    pub retained: Vec<InstanceId>,
    /// Every executed stage, in execution order.
    pub stages: Vec<StageResult>,
}

impl RolloutOutcome {
    /// Stage that ended the run, if it did not succeed.
    pub fn failing_stage(&self) -> Option<StageName> {
        match &self.state {
            RunState::Failed { stage, .. } | RunState::Aborted { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}

/// Current time as Unix seconds.
pub fn epoch_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(stage: StageName, status: StageStatus) -> StageResult {
        StageResult {
            stage,
            status,
            produced: vec!["img-1".to_string()],
            started_at: 100,
            finished_at: 130,
            error: None,
        }
    }

    #[test]
    fn stage_names_are_stable() {
        assert_eq!(StageName::CreateImage.as_str(), "CreateImage");
        assert_eq!(
            StageName::AwaitReplacementComplete.as_str(),
            "AwaitReplacementComplete"
        );
        assert_eq!(StageName::instance_sequence().len(), 7);
        assert_eq!(StageName::golden_sequence().len(), 10);
    }

    #[test]
    fn sequences_do_not_overlap() {
        for stage in StageName::instance_sequence() {
            assert!(!StageName::golden_sequence().contains(stage));
        }
    }

    #[test]
    fn stage_event_carries_the_declared_field_set() {
        let event = StageEvent::from(&result(StageName::CreateImage, StageStatus::Succeeded));
        let value = serde_json::to_value(&event).unwrap();
        let obj = value.as_object().unwrap();
        let mut keys: Vec<_> = obj.keys().map(String::as_str).collect();
        keys.sort_unstable();
        assert_eq!(keys, vec!["produced", "stage", "status", "timestamp"]);
        assert_eq!(obj["timestamp"], 130);
    }

    #[test]
    fn failing_stage_names_the_offender() {
        let outcome = RolloutOutcome {
            success: false,
            state: RunState::Failed {
                stage: StageName::CreateImage,
                reason: "provider rejected request: bad source".to_string(),
            },
            final_image: None,
            final_instances: Vec::new(),
            drained: Vec::new(),
            retained: Vec::new(),
            stages: vec![result(StageName::CreateImage, StageStatus::Failed)],
        };
        assert_eq!(outcome.failing_stage(), Some(StageName::CreateImage));
    }

    #[test]
    fn succeeded_outcome_has_no_failing_stage() {
        let outcome = RolloutOutcome {
            success: true,
            state: RunState::Succeeded,
            final_image: Some("img-2".to_string()),
            final_instances: vec!["i-9".to_string()],
            drained: Vec::new(),
            retained: Vec::new(),
            stages: Vec::new(),
        };
        assert_eq!(outcome.failing_stage(), None);
    }

    #[test]
    fn stage_result_roundtrip() {
        let r = result(StageName::LaunchPatchedInstance, StageStatus::TimedOut);
        let json = serde_json::to_string(&r).unwrap();
        let back: StageResult = serde_json::from_str(&json).unwrap();
        assert_eq!(back, r);
    }
}
