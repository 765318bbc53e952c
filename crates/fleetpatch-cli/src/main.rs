//! fleetpatch — operator CLI for image patch rollouts.
//!
//! Two subcommands mirror the two workflow variants: `patch-instance`
//! images and patches a single instance, `patch-fleet` runs the
//! golden-image cycle against a fleet.
//!
//! Binding a real provider SDK is out of scope for this build. The
//! `--rehearse` flag executes the workflow end to end against the
//! in-memory simulated provider, so an operator can exercise a run
//! configuration — stage order, convergence gates, drain decisions —
//! before pointing real tooling at it.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::bail;
use clap::{Parser, Subcommand};
use tracing::info;

use fleetpatch_gateway::{MemoryGateway, serving_member};
use fleetpatch_rollout::{GoldenRollout, PatchRollout, cancel_pair};

mod config;
mod output;

use config::{FleetRunConfig, InstanceRunConfig};

#[derive(Parser)]
#[command(
    name = "fleetpatch",
    about = "fleetpatch — image patch-and-rollout automation",
    version,
    propagate_version = true,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Patch a single instance: image it, patch a replacement, promote.
    PatchInstance {
        /// TOML run configuration.
        #[arg(short, long)]
        config: PathBuf,
        /// Execute against the simulated provider.
        #[arg(long)]
        rehearse: bool,
        /// Print the outcome as JSON instead of a table.
        #[arg(long)]
        json: bool,
    },
    /// Patch a fleet from its golden image and roll it out.
    PatchFleet {
        /// TOML run configuration.
        #[arg(short, long)]
        config: PathBuf,
        /// Execute against the simulated provider.
        #[arg(long)]
        rehearse: bool,
        /// Print the outcome as JSON instead of a table.
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,fleetpatch=debug".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::PatchInstance {
            config,
            rehearse,
            json,
        } => run_instance(&config, rehearse, json).await,
        Commands::PatchFleet {
            config,
            rehearse,
            json,
        } => run_fleet(&config, rehearse, json).await,
    }
}

fn require_rehearse(rehearse: bool) -> anyhow::Result<()> {
    if !rehearse {
        bail!(
            "no provider gateway is wired into this build; \
             run with --rehearse to execute against the simulated provider"
        );
    }
    Ok(())
}

/// A canceller that fires on ctrl-c, so a run stops at its next
/// suspension point instead of mid-call.
fn cancel_on_ctrl_c() -> fleetpatch_rollout::CancelToken {
    let (canceller, token) = cancel_pair();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("ctrl-c received; cancelling at the next suspension point");
            canceller.cancel();
        }
    });
    token
}

async fn run_instance(path: &Path, rehearse: bool, json: bool) -> anyhow::Result<()> {
    let cfg = InstanceRunConfig::load(path)?;
    require_rehearse(rehearse)?;

    let gateway = Arc::new(MemoryGateway::new());
    let outcome = PatchRollout::new(gateway)
        .with_cancel(cancel_on_ctrl_c())
        .run(&cfg.request)
        .await;

    output::render(&outcome, json)?;
    if outcome.success {
        Ok(())
    } else {
        bail!("rollout did not succeed");
    }
}

async fn run_fleet(path: &Path, rehearse: bool, json: bool) -> anyhow::Result<()> {
    let cfg = FleetRunConfig::load(path)?;
    require_rehearse(rehearse)?;

    let gateway = Arc::new(MemoryGateway::new());
    let members = (1..=cfg.rehearsal.current_fleet_size)
        .map(|n| serving_member(&format!("i-current-{n}")))
        .collect();
    gateway.seed_fleet(&cfg.request.fleet, members).await;

    let outcome = GoldenRollout::new(gateway)
        .with_cancel(cancel_on_ctrl_c())
        .run(&cfg.request)
        .await;

    output::render(&outcome, json)?;
    if outcome.success {
        Ok(())
    } else {
        bail!("rollout did not succeed");
    }
}
