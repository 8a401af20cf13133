//! Sensor Hub Client - Main Entry Point

use anyhow::Context;
use clap::Parser;
use hub_client::{execute, shutdown, MenuCommand, MENU};
use hub_session::{init_logging, ClientConfig, SessionController};
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;

/// Interactive client for a wireless sensor hub
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file (TOML, YAML or JSON); HUB_CLIENT__* variables override it
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = ClientConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    init_logging(&config.log).context("Failed to initialize logging")?;

    info!("=== Sensor Hub Client v{} ===", env!("CARGO_PKG_VERSION"));
    info!("Hub: {}", config.hub_address());
    info!("Dump file: {}", config.dump.file);
    info!("Satellites: {:?}", config.sensors.satellites);

    let mut ctl = SessionController::new(config);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        println!("\n{MENU}");
        println!("[{}] >", ctl.state());

        let Some(line) = lines.next_line().await.context("Failed to read input")? else {
            shutdown(&mut ctl).await?;
            break;
        };
        let Some(command) = MenuCommand::parse(&line) else {
            println!("Unknown command '{}'", line.trim());
            continue;
        };

        // Errors are logged by the session; the prompt always comes back
        match execute(&mut ctl, command).await {
            Ok(()) => {
                if let Some(path) = ctl.dump_path() {
                    info!("Current dump file: {}", path.display());
                }
            }
            Err(e) => eprintln!("{}: {}", command, e),
        }

        if ctl.state().is_terminal() {
            break;
        }
    }

    info!("Bye");
    Ok(())
}
