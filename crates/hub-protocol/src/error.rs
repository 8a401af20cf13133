//! Hub Protocol Error Types

use thiserror::Error;

/// Errors that can occur while encoding or decoding hub traffic
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Sensor frame buffer has the wrong length for the magnetometer mode
    #[error("Malformed frame: expected {expected} bytes, got {actual}")]
    MalformedFrame { expected: usize, actual: usize },

    /// Control command buffer cannot be decoded
    #[error("Malformed command: {0}")]
    MalformedCommand(String),

    /// More satellite ids than the hub can address
    #[error("Too many satellites: {0} (max {max})", max = crate::MAX_SAT_SENSORS)]
    TooManySatellites(usize),

    /// Dump file line cannot be parsed back into a frame
    #[error("Malformed dump record: {0}")]
    MalformedRecord(String),

    /// Underlying stream error while reading a command
    #[error("Stream error: {0}")]
    Io(#[from] std::io::Error),
}
