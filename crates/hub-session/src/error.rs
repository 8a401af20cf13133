//! Session Error Types

use crate::state::SessionState;
use frame_queue::QueueError;
use hub_protocol::ProtocolError;
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by the session engine
#[derive(Debug, Error)]
pub enum SessionError {
    /// Operation not allowed in the current session state
    #[error("Illegal command: from {from} to {to}")]
    IllegalTransition { from: SessionState, to: SessionState },

    /// Could not reach the hub
    #[error("Connection error: {0}")]
    Connection(String),

    /// No socket is open
    #[error("Not connected to the hub")]
    NotConnected,

    /// The operation needs a running frame reader
    #[error("No frame reader is running")]
    ReaderNotRunning,

    /// Socket I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Codec failure
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Frame queue failure
    #[error(transparent)]
    Queue(#[from] QueueError),

    /// Peer closed the stream in the middle of a frame
    #[error("Short read: expected {expected} bytes, got {actual} before EOF")]
    ShortRead { expected: usize, actual: usize },

    /// Peer closed the stream between frames
    #[error("Stream closed by peer")]
    StreamClosed,

    /// Dump file cannot be opened or written
    #[error("Dump file {path}: {source}")]
    Sink {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A worker did not finish within the allotted time
    #[error("{0} did not terminate within {1}ms")]
    JoinTimeout(String, u64),

    /// A worker task panicked or was cancelled
    #[error("{0} task failed: {1}")]
    Worker(String, String),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<config::ConfigError> for SessionError {
    fn from(err: config::ConfigError) -> Self {
        SessionError::Config(err.to_string())
    }
}

/// Result alias for session operations
pub type Result<T> = std::result::Result<T, SessionError>;
