//! Hub Client
//!
//! Single-character console menu on top of [`SessionController`].

use hub_session::{SessionController, SessionError, SessionState};
use std::fmt;
use tracing::{info, warn};

/// Menu shown before every prompt
pub const MENU: &str = "\
1 - Connect
2 - Init sensors (set RTC and satellites)
3 - Start dumping
x - Init sensors and start dumping
4 - Change dump file
5 - Stop dumping
6 - Disconnect
q - Quit";

/// One menu entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MenuCommand {
    Connect,
    InitSensors,
    StartDumping,
    InitAndStart,
    ChangeDumpFile,
    StopDumping,
    Disconnect,
    Quit,
}

impl MenuCommand {
    /// Parse a line of operator input; only the first character counts
    pub fn parse(input: &str) -> Option<Self> {
        match input.trim().chars().next()?.to_ascii_lowercase() {
            '1' => Some(Self::Connect),
            '2' => Some(Self::InitSensors),
            '3' => Some(Self::StartDumping),
            'x' => Some(Self::InitAndStart),
            '4' => Some(Self::ChangeDumpFile),
            '5' => Some(Self::StopDumping),
            '6' => Some(Self::Disconnect),
            'q' => Some(Self::Quit),
            _ => None,
        }
    }
}

impl fmt::Display for MenuCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Connect => "connect",
            Self::InitSensors => "init sensors",
            Self::StartDumping => "start dumping",
            Self::InitAndStart => "init sensors and start dumping",
            Self::ChangeDumpFile => "change dump file",
            Self::StopDumping => "stop dumping",
            Self::Disconnect => "disconnect",
            Self::Quit => "quit",
        };
        f.write_str(name)
    }
}

/// Run one menu entry against the controller
pub async fn execute(ctl: &mut SessionController, command: MenuCommand) -> Result<(), SessionError> {
    info!("Operator: {}", command);
    match command {
        MenuCommand::Connect => ctl.connect().await,
        MenuCommand::InitSensors => ctl.init_sensors(true, true).await,
        MenuCommand::StartDumping => ctl.start_dumping().await,
        MenuCommand::InitAndStart => {
            ctl.init_sensors(true, true).await?;
            ctl.start_dumping().await
        }
        MenuCommand::ChangeDumpFile => ctl.change_dump_file().await,
        MenuCommand::StopDumping => ctl.stop_dumping().await,
        MenuCommand::Disconnect => ctl.disconnect().await,
        MenuCommand::Quit => ctl.quit().await,
    }
}

/// Walk the session down to Quit from wherever it is
///
/// Used when operator input ends without a `q`. Failures along the way are
/// logged; the final quit is always attempted.
pub async fn shutdown(ctl: &mut SessionController) -> Result<(), SessionError> {
    if matches!(
        ctl.state(),
        SessionState::Dumping | SessionState::DumpFileChanging
    ) {
        if let Err(e) = ctl.stop_dumping().await {
            warn!("Stop dumping on shutdown: {}", e);
        }
    }
    if matches!(
        ctl.state(),
        SessionState::Connected | SessionState::SensorsInitialized | SessionState::Stopped
    ) {
        if let Err(e) = ctl.disconnect().await {
            warn!("Disconnect on shutdown: {}", e);
        }
    }
    if ctl.state().is_terminal() {
        return Ok(());
    }
    ctl.quit().await
}
