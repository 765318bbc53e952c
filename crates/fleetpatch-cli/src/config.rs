//! TOML run configuration.
//!
//! Everything the original operator workflow hard-coded — image names,
//! fleet names, capacities, patch documents — arrives here instead.

use std::fs;
use std::path::Path;

use anyhow::Context;
use serde::Deserialize;

use fleetpatch_core::{GoldenPatchRequest, PatchRequest};

/// Run configuration for `fleetpatch patch-instance`.
#[derive(Debug, Deserialize)]
pub struct InstanceRunConfig {
    pub request: PatchRequest,
}

/// Run configuration for `fleetpatch patch-fleet`.
#[derive(Debug, Deserialize)]
pub struct FleetRunConfig {
    pub request: GoldenPatchRequest,
    #[serde(default)]
    pub rehearsal: RehearsalConfig,
}

/// Shape of the simulated provider in rehearsal mode.
#[derive(Debug, Deserialize)]
pub struct RehearsalConfig {
    /// Instances the simulated fleet starts with.
    pub current_fleet_size: u32,
}

impl Default for RehearsalConfig {
    fn default() -> Self {
        Self {
            current_fleet_size: 3,
        }
    }
}

impl InstanceRunConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        toml::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
    }
}

impl FleetRunConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        toml::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instance_config_parses() {
        let raw = r##"
            [request]
            source_instance = "i-0abc123"
            image_name = "web-pre-patch"
            instance_type = "m5.large"
            user_data = "#!/bin/sh\nyum update -y\n"
            final_image_name = "web-patched"
            final_count = 2
            previous_instances = ["i-old-1", "i-old-2"]

            [request.poll]
            interval_secs = 5
            timeout_secs = 300
        "##;
        let cfg: InstanceRunConfig = toml::from_str(raw).unwrap();
        assert_eq!(cfg.request.source_instance, "i-0abc123");
        assert_eq!(cfg.request.final_count, 2);
        assert_eq!(cfg.request.poll.interval_secs, 5);
    }

    #[test]
    fn fleet_config_parses_with_default_rehearsal() {
        let raw = r#"
            [request]
            golden_image = "img-golden-1"
            instance_type = "m5.large"
            patch_document = "os-security-baseline"
            patched_image_name = "web-2024-06"
            fleet = "web-fleet"
            launch_config_name = "web-lc"
            desired_capacity = 3
        "#;
        let cfg: FleetRunConfig = toml::from_str(raw).unwrap();
        assert_eq!(cfg.request.fleet, "web-fleet");
        assert_eq!(cfg.rehearsal.current_fleet_size, 3);
        // Poll settings fall back to their defaults.
        assert_eq!(cfg.request.poll.interval_secs, 10);
    }

    #[test]
    fn fleet_config_honours_rehearsal_overrides() {
        let raw = r#"
            [request]
            golden_image = "img-golden-1"
            instance_type = "m5.large"
            patch_document = "os-security-baseline"
            patched_image_name = "web-2024-06"
            fleet = "web-fleet"
            launch_config_name = "web-lc"
            desired_capacity = 5

            [rehearsal]
            current_fleet_size = 2
        "#;
        let cfg: FleetRunConfig = toml::from_str(raw).unwrap();
        assert_eq!(cfg.rehearsal.current_fleet_size, 2);
    }
}
