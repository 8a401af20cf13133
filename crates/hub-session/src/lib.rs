//! Hub Session Engine
//!
//! Connects to a sensor hub, gates the control operations through a state
//! machine and runs the frame pipeline:
//!
//! ```text
//! hub socket -> FrameReader -> FrameQueue -> FrameWriter -> dump file
//! ```
//!
//! Changing the dump file while streaming installs a new queue and writer
//! behind the running reader; the old writer drains its queue and exits.

pub mod config;
pub mod controller;
pub mod dump;
pub mod error;
pub mod logging;
pub mod reader;
pub mod state;
pub mod writer;

#[cfg(test)]
pub(crate) mod test_support;

pub use config::ClientConfig;
pub use controller::SessionController;
pub use error::{Result, SessionError};
pub use logging::{init_logging, LogConfig};
pub use reader::{FrameReader, ReaderHandle, ReaderOutcome, ReaderStats};
pub use state::{SessionState, SessionStateMachine, TransitionTable};
pub use writer::{FrameWriter, WriterConfig, WriterExit, WriterHandle, WriterStats};
