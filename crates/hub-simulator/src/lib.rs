//! Sensor Hub Simulator
//!
//! Stands in for a hub: accepts any number of clients, obeys their control
//! commands and streams frames replayed from a dump file recorded by the
//! client.

mod config;
mod recording;
mod server;

pub use config::{InputConfig, ServerConfig, SimulatorConfig, SIM_ENV_PREFIX};
pub use recording::{load_recording, RecordedFrame, Recording};
pub use server::HubSimulator;

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by the simulator
#[derive(Debug, Error)]
pub enum SimulatorError {
    /// Configuration could not be loaded
    #[error(transparent)]
    Config(#[from] hub_session::SessionError),

    /// Recording cannot be read
    #[error("Cannot read recording {path}: {source}")]
    Recording {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Recording holds no usable frame
    #[error("Recording {0} contains no valid frames")]
    EmptyRecording(PathBuf),

    /// Listening socket cannot be opened
    #[error("Could not listen on port {port}: {source}")]
    Bind {
        port: u16,
        #[source]
        source: std::io::Error,
    },

    /// Socket I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result alias for simulator operations
pub type Result<T> = std::result::Result<T, SimulatorError>;
