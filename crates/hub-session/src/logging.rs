//! Logging setup shared by the client and the simulator

use crate::error::{Result, SessionError};
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, Layer, Registry};

/// Level used when the configured one is not recognised
pub const DEFAULT_LEVEL: LevelFilter = LevelFilter::WARN;

/// `log` section of a configuration file
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// NONE, ERROR, WARNING, INFORMATION, DEBUG or 0-4
    pub level: String,
    /// Append log lines here instead of stdout
    pub file: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "WARNING".to_string(),
            file: None,
        }
    }
}

/// Map a configured level name or number onto a filter
pub fn parse_level(value: &str) -> LevelFilter {
    match value.trim().to_ascii_uppercase().as_str() {
        "NONE" | "0" => LevelFilter::OFF,
        "ERROR" | "1" => LevelFilter::ERROR,
        "WARNING" | "2" => LevelFilter::WARN,
        "INFORMATION" | "3" => LevelFilter::INFO,
        "DEBUG" | "4" => LevelFilter::DEBUG,
        _ => DEFAULT_LEVEL,
    }
}

/// Install the global subscriber
///
/// With a log file, lines go there at the configured level and anything at
/// WARN or above is echoed to stderr for the operator. Without one, lines go
/// to stdout.
pub fn init_logging(cfg: &LogConfig) -> Result<()> {
    let level = parse_level(&cfg.level);

    let (main, echo): (Box<dyn Layer<Registry> + Send + Sync>, _) = match &cfg.file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|e| {
                    SessionError::Config(format!("cannot open log file {}: {}", path.display(), e))
                })?;
            let main = fmt::layer()
                .with_writer(Mutex::new(file))
                .with_ansi(false)
                .with_target(true)
                .with_filter(level)
                .boxed();
            let echo = fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_filter(level.min(LevelFilter::WARN));
            (main, Some(echo))
        }
        None => {
            let main = fmt::layer()
                .with_writer(std::io::stdout)
                .with_target(true)
                .with_filter(level)
                .boxed();
            (main, None)
        }
    };

    tracing_subscriber::registry()
        .with(main)
        .with(echo)
        .try_init()
        .map_err(|e| SessionError::Config(format!("Failed to set tracing subscriber: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_level_names_and_numbers() {
        assert_eq!(parse_level("NONE"), LevelFilter::OFF);
        assert_eq!(parse_level("1"), LevelFilter::ERROR);
        assert_eq!(parse_level("WARNING"), LevelFilter::WARN);
        assert_eq!(parse_level("information"), LevelFilter::INFO);
        assert_eq!(parse_level("4"), LevelFilter::DEBUG);
    }

    #[test]
    fn test_unknown_level_falls_back_to_warning() {
        assert_eq!(parse_level("VERBOSE"), DEFAULT_LEVEL);
        assert_eq!(parse_level("7"), DEFAULT_LEVEL);
        assert_eq!(parse_level(""), DEFAULT_LEVEL);
    }

    #[test]
    fn test_unwritable_log_file_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = LogConfig {
            level: "DEBUG".to_string(),
            file: Some(dir.path().join("missing").join("client.log")),
        };
        assert!(matches!(init_logging(&cfg), Err(SessionError::Config(_))));
    }
}
