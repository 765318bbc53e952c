//! Render a rollout outcome for the operator.

use fleetpatch_core::{RolloutOutcome, RunState};

pub fn render(outcome: &RolloutOutcome, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(outcome)?);
        return Ok(());
    }

    println!();
    println!("{:<32} {:<10} {}", "STAGE", "STATUS", "PRODUCED");
    for stage in &outcome.stages {
        println!(
            "{:<32} {:<10} {}",
            stage.stage.as_str(),
            stage.status.as_str(),
            stage.produced.join(", ")
        );
        if let Some(error) = &stage.error {
            println!("{:<32} {:<10} {error}", "", "");
        }
    }
    println!();

    if let Some(image) = &outcome.final_image {
        println!("final image:     {image}");
    }
    if !outcome.final_instances.is_empty() {
        println!("final instances: {}", outcome.final_instances.join(", "));
    }
    if !outcome.drained.is_empty() {
        println!("drained:         {}", outcome.drained.join(", "));
    }
    if !outcome.retained.is_empty() {
        println!("retained:        {}", outcome.retained.join(", "));
    }

    match &outcome.state {
        RunState::Succeeded => println!("rollout succeeded"),
        RunState::Failed { stage, reason } => {
            println!("rollout failed at {stage}: {reason}");
        }
        RunState::Aborted { stage, reason } => {
            println!("rollout aborted at {stage}: {reason}");
        }
        state => println!("rollout ended in unexpected state: {state:?}"),
    }
    Ok(())
}
