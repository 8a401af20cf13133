//! Sensor Hub Simulator - Main Entry Point

use anyhow::Context;
use clap::Parser;
use hub_session::init_logging;
use hub_simulator::{load_recording, HubSimulator, SimulatorConfig};
use std::path::PathBuf;
use tracing::info;

/// Replays a recorded dump file to sensor hub clients
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file (TOML, YAML or JSON); HUB_SIM__* variables override it
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = SimulatorConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    init_logging(&config.log).context("Failed to initialize logging")?;

    info!("=== Sensor Hub Simulator v{} ===", env!("CARGO_PKG_VERSION"));
    let recording = load_recording(&config.input.dump_file)
        .await
        .with_context(|| format!("Failed to load {}", config.input.dump_file.display()))?;

    let simulator = HubSimulator::new(config, recording);
    simulator.run().await?;

    Ok(())
}
