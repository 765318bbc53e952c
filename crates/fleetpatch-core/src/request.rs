//! Run configuration — supplied once at workflow start, never mutated.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::types::{FleetId, ImageId, InstanceId};

/// Polling cadence and budget for convergence waits.
///
/// The interval is fixed per run; provider eventual-consistency windows
/// are short and bounded, so there is no backoff. The timeout applies to
/// each convergence wait individually, not to the run as a whole.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollSettings {
    /// Seconds between status checks.
    pub interval_secs: u64,
    /// Seconds before a single wait is declared stuck.
    pub timeout_secs: u64,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            interval_secs: 10,
            timeout_secs: 600,
        }
    }
}

impl PollSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Input for the single-instance patch workflow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchRequest {
    /// Instance whose disk becomes the pre-patch image.
    pub source_instance: InstanceId,
    /// Name for the image created from the source instance.
    pub image_name: String,
    #[serde(default)]
    pub image_description: String,
    /// Instance type for every instance this run launches.
    pub instance_type: String,
    /// Bootstrap script the patched instance runs at first boot; this is
    /// where the patches themselves are applied in this variant.
    pub user_data: String,
    /// Name for the final image created from the patched instance.
    pub final_image_name: String,
    #[serde(default)]
    pub final_image_description: String,
    /// How many instances to launch from the final image.
    pub final_count: u32,
    /// Instances serving the previous image generation, if the operator
    /// wants their fate decided at the end of the run. May be empty.
    #[serde(default)]
    pub previous_instances: Vec<InstanceId>,
    #[serde(default)]
    pub poll: PollSettings,
}

/// Input for the golden-image fleet workflow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GoldenPatchRequest {
    /// Pre-vetted baseline image the patch cycle starts from.
    pub golden_image: ImageId,
    /// Instance type for the workbench instance.
    pub instance_type: String,
    /// Bootstrap script for the workbench instance. May be empty; the
    /// patches arrive through the patch document, not user data.
    #[serde(default)]
    pub user_data: String,
    /// Patch command document the provider runs on the workbench instance.
    pub patch_document: String,
    /// Name for the image created from the patched workbench instance.
    pub patched_image_name: String,
    #[serde(default)]
    pub patched_image_description: String,
    /// Fleet whose launch configuration is promoted to the new image.
    pub fleet: FleetId,
    /// Launch configuration name to publish.
    pub launch_config_name: String,
    /// Fleet size to converge on.
    pub desired_capacity: u32,
    #[serde(default)]
    pub poll: PollSettings,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn poll_defaults() {
        let poll = PollSettings::default();
        assert_eq!(poll.interval(), Duration::from_secs(10));
        assert_eq!(poll.timeout(), Duration::from_secs(600));
    }

    #[test]
    fn patch_request_deserializes_with_defaults() {
        let json = r##"{
            "source_instance": "i-0abc",
            "image_name": "web-pre-patch",
            "instance_type": "m5.large",
            "user_data": "#!/bin/sh\nyum update -y\n",
            "final_image_name": "web-patched",
            "final_count": 2
        }"##;
        let req: PatchRequest = serde_json::from_str(json).unwrap();
        assert!(req.previous_instances.is_empty());
        assert_eq!(req.poll, PollSettings::default());
        assert_eq!(req.image_description, "");
    }

    #[test]
    fn golden_request_roundtrip() {
        let req = GoldenPatchRequest {
            golden_image: "img-golden-1".to_string(),
            instance_type: "m5.large".to_string(),
            user_data: String::new(),
            patch_document: "os-security-baseline".to_string(),
            patched_image_name: "web-2024-06".to_string(),
            patched_image_description: "monthly patch cycle".to_string(),
            fleet: "web-fleet".to_string(),
            launch_config_name: "web-lc".to_string(),
            desired_capacity: 3,
            poll: PollSettings::default(),
        };
        let json = serde_json::to_string(&req).unwrap();
        let back: GoldenPatchRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(back, req);
    }
}
