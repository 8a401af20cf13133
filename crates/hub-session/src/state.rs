//! Session state machine
//!
//! Gates which control operations are legal in which order. A request is
//! checked against the transition table and committed in the same call; a
//! rejected request leaves the state untouched.

use crate::error::{Result, SessionError};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

/// Session states, in table order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SessionState {
    #[default]
    Initial,
    Connected,
    SensorsInitialized,
    Dumping,
    /// Transient: a new dump file has just been opened
    DumpFileChanging,
    Stopped,
    Disconnected,
    Quit,
}

impl SessionState {
    /// Every state, in table order
    pub const ALL: [SessionState; 8] = [
        SessionState::Initial,
        SessionState::Connected,
        SessionState::SensorsInitialized,
        SessionState::Dumping,
        SessionState::DumpFileChanging,
        SessionState::Stopped,
        SessionState::Disconnected,
        SessionState::Quit,
    ];

    /// Row/column index in the transition table
    pub fn index(&self) -> usize {
        *self as usize
    }

    /// True once no transition can leave this state
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Quit)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Initial => "0 - Initial",
            SessionState::Connected => "1 - Connect",
            SessionState::SensorsInitialized => "2 - Init Sensors",
            SessionState::Dumping => "3 - Start Dumping",
            SessionState::DumpFileChanging => "4 - Change Dump File",
            SessionState::Stopped => "5 - Stop Dumping",
            SessionState::Disconnected => "6 - Disconnect",
            SessionState::Quit => "q - Quit",
        };
        f.write_str(name)
    }
}

/// Which transition table to enforce
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TransitionTable {
    /// Stopping requires a running dump
    #[default]
    Strict,
    /// Also allows SensorsInitialized -> Stopped
    Permissive,
}

impl TransitionTable {
    /// Check whether `from -> to` is allowed
    pub fn allows(&self, from: SessionState, to: SessionState) -> bool {
        use SessionState::*;

        match (from, to) {
            (Initial, Connected | Quit) => true,
            (Connected, SensorsInitialized | Disconnected) => true,
            (SensorsInitialized, Dumping | Disconnected) => true,
            (SensorsInitialized, Stopped) => *self == TransitionTable::Permissive,
            (Dumping, DumpFileChanging | Stopped) => true,
            (DumpFileChanging, DumpFileChanging | Stopped) => true,
            (Stopped, SensorsInitialized | Disconnected) => true,
            (Disconnected, Connected | Quit) => true,
            _ => false,
        }
    }
}

/// Session state machine (one per controller)
#[derive(Debug, Clone, Default)]
pub struct SessionStateMachine {
    current: SessionState,
    table: TransitionTable,
}

impl SessionStateMachine {
    /// Create a machine in the initial state
    pub fn new(table: TransitionTable) -> Self {
        Self {
            current: SessionState::Initial,
            table,
        }
    }

    /// Current state
    pub fn current(&self) -> SessionState {
        self.current
    }

    /// Table in force
    pub fn table(&self) -> TransitionTable {
        self.table
    }

    /// Move to `target` if the table allows it
    pub fn request(&mut self, target: SessionState) -> Result<()> {
        if !self.table.allows(self.current, target) {
            return Err(SessionError::IllegalTransition {
                from: self.current,
                to: target,
            });
        }
        debug!("Session state {} -> {}", self.current, target);
        self.current = target;
        Ok(())
    }
}
