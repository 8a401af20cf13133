//! Simulator configuration

use crate::Result;
use hub_session::config::load_layered;
use hub_session::LogConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment prefix for simulator overrides
pub const SIM_ENV_PREFIX: &str = "HUB_SIM";

/// Listening socket
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// TCP port to listen on (0 picks a free one)
    pub port: u16,
    /// Stop accepting after this long without a new connection
    pub accept_timeout_ms: Option<u64>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 5000,
            accept_timeout_ms: None,
        }
    }
}

/// Recording to replay
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InputConfig {
    /// Dump file written by the client
    pub dump_file: PathBuf,
    /// Time between two frames sent to one client
    pub sample_period_ms: u64,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            dump_file: PathBuf::from("input.txt"),
            sample_period_ms: 20,
        }
    }
}

/// Complete simulator configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatorConfig {
    pub server: ServerConfig,
    pub input: InputConfig,
    pub log: LogConfig,
}

impl SimulatorConfig {
    /// Load from `path` (if any) and `HUB_SIM__*` environment variables
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Ok(load_layered(path, SIM_ENV_PREFIX)?)
    }

    pub fn sample_period(&self) -> Duration {
        // A zero period would make tokio's interval panic
        Duration::from_millis(self.input.sample_period_ms.max(1))
    }

    pub fn accept_timeout(&self) -> Option<Duration> {
        self.server.accept_timeout_ms.map(Duration::from_millis)
    }
}
