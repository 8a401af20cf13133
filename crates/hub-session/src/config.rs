//! Client configuration
//!
//! Loaded from an optional file (format picked by extension) layered under
//! environment overrides such as `HUB_CLIENT__HUB__PORT=6000`.

use crate::error::{Result, SessionError};
use crate::logging::LogConfig;
use crate::state::TransitionTable;
use crate::writer::WriterConfig;
use hub_protocol::{MagMode, MAX_SAT_SENSORS};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// Environment prefix for client overrides
pub const CLIENT_ENV_PREFIX: &str = "HUB_CLIENT";

/// Separator between nested keys in environment variable names
pub const ENV_SEPARATOR: &str = "__";

/// Load a layered configuration: defaults, then `path`, then the environment
pub fn load_layered<T: DeserializeOwned>(path: Option<&Path>, env_prefix: &str) -> Result<T> {
    let mut builder = config::Config::builder();
    if let Some(path) = path {
        debug!("Loading configuration from {}", path.display());
        builder = builder.add_source(config::File::from(path.to_path_buf()));
    }
    builder = builder.add_source(
        config::Environment::with_prefix(env_prefix)
            .prefix_separator(ENV_SEPARATOR)
            .separator(ENV_SEPARATOR)
            .try_parsing(true),
    );
    Ok(builder.build()?.try_deserialize()?)
}

/// Hub endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    /// Host name or address of the hub
    pub ip: String,
    /// TCP port of the hub
    pub port: u16,
    /// Bound on establishing the connection
    pub connect_timeout_ms: u64,
    /// Socket read timeout; bounds how long a reader takes to notice a stop
    pub read_timeout_ms: u64,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            ip: "127.0.0.1".to_string(),
            port: 5000,
            connect_timeout_ms: 5000,
            read_timeout_ms: 500,
        }
    }
}

/// Dump file settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DumpConfig {
    /// Path template; the last `%t` becomes the local date and time
    pub file: String,
    /// Write a per-writer sequence index instead of the hub timestamp
    pub use_sequence_index: bool,
}

impl Default for DumpConfig {
    fn default() -> Self {
        Self {
            file: "dump_%t.txt".to_string(),
            use_sequence_index: false,
        }
    }
}

/// Sensor layout
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorsConfig {
    /// Whether readings carry magnetometer data (`true`/`false` or `YES`/`NO`)
    #[serde(deserialize_with = "deserialize_flag")]
    pub magnetometer: bool,
    /// Satellite ids, as a list or a comma-separated string
    #[serde(deserialize_with = "deserialize_satellites")]
    pub satellites: Vec<u32>,
}

impl Default for SensorsConfig {
    fn default() -> Self {
        Self {
            magnetometer: true,
            satellites: Vec::new(),
        }
    }
}

impl SensorsConfig {
    /// Frame layout implied by the magnetometer setting
    pub fn mag_mode(&self) -> MagMode {
        MagMode::from_enabled(self.magnetometer)
    }
}

/// Session behaviour
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Also allow stopping a dump that was never started
    pub permissive_transitions: bool,
    /// Bound on joining each worker when it is stopped or at quit
    pub join_timeout_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            permissive_transitions: false,
            join_timeout_ms: 5000,
        }
    }
}

impl SessionConfig {
    /// Transition table selected by this configuration
    pub fn transition_table(&self) -> TransitionTable {
        if self.permissive_transitions {
            TransitionTable::Permissive
        } else {
            TransitionTable::Strict
        }
    }
}

/// Writer tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WriterSettings {
    /// Sleep between polls of an empty queue
    pub idle_interval_ms: u64,
    /// Empty polls tolerated before a writer abandons its queue
    pub max_idle_polls: u32,
}

impl Default for WriterSettings {
    fn default() -> Self {
        Self {
            idle_interval_ms: 1000,
            max_idle_polls: 3,
        }
    }
}

/// Complete client configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub hub: HubConfig,
    pub dump: DumpConfig,
    pub sensors: SensorsConfig,
    pub session: SessionConfig,
    pub writer: WriterSettings,
    pub log: LogConfig,
}

impl ClientConfig {
    /// Load from `path` (if any) and `HUB_CLIENT__*` environment variables
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let cfg: Self = load_layered(path, CLIENT_ENV_PREFIX)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject settings the session engine cannot honour
    pub fn validate(&self) -> Result<()> {
        if self.sensors.satellites.len() > MAX_SAT_SENSORS {
            return Err(SessionError::Config(format!(
                "{} satellites configured, at most {} supported",
                self.sensors.satellites.len(),
                MAX_SAT_SENSORS
            )));
        }
        if self.hub.ip.trim().is_empty() {
            return Err(SessionError::Config("hub.ip is empty".to_string()));
        }
        if self.dump.file.trim().is_empty() {
            return Err(SessionError::Config("dump.file is empty".to_string()));
        }
        if self.hub.read_timeout_ms == 0 {
            return Err(SessionError::Config(
                "hub.read_timeout_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// `host:port` of the hub
    pub fn hub_address(&self) -> String {
        format!("{}:{}", self.hub.ip, self.hub.port)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.hub.connect_timeout_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.hub.read_timeout_ms)
    }

    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.session.join_timeout_ms)
    }

    /// Writer settings for writers created by this session
    pub fn writer_config(&self) -> WriterConfig {
        WriterConfig {
            idle_interval: Duration::from_millis(self.writer.idle_interval_ms),
            max_idle_polls: self.writer.max_idle_polls,
            use_sequence_index: self.dump.use_sequence_index,
            ..WriterConfig::default()
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum FlagValue {
    Bool(bool),
    Int(i64),
    Text(String),
}

fn deserialize_flag<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<bool, D::Error> {
    match FlagValue::deserialize(deserializer)? {
        FlagValue::Bool(b) => Ok(b),
        FlagValue::Int(i) => Ok(i != 0),
        FlagValue::Text(s) => parse_flag(&s)
            .ok_or_else(|| serde::de::Error::custom(format!("expected YES/NO, got '{}'", s))),
    }
}

/// Parse a yes/no style flag
pub fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_uppercase().as_str() {
        "YES" | "Y" | "TRUE" | "ON" | "1" => Some(true),
        "NO" | "N" | "FALSE" | "OFF" | "0" => Some(false),
        _ => None,
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum SatelliteValue {
    List(Vec<u32>),
    Single(u32),
    Text(String),
}

fn deserialize_satellites<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<Vec<u32>, D::Error> {
    match SatelliteValue::deserialize(deserializer)? {
        SatelliteValue::List(ids) => Ok(ids),
        SatelliteValue::Single(id) => Ok(vec![id]),
        SatelliteValue::Text(s) => parse_satellite_list(&s).map_err(serde::de::Error::custom),
    }
}

/// Parse a comma-separated satellite list such as `"1, 2,3"`
pub fn parse_satellite_list(value: &str) -> std::result::Result<Vec<u32>, String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<u32>()
                .map_err(|e| format!("invalid satellite id '{}': {}", s, e))
        })
        .collect()
}
