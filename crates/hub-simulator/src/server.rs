//! Simulated hub server
//!
//! Each connection gets two tasks: one reads control commands and updates
//! the hub flags, the other streams recorded frames at the sample period
//! while the hub is both ACTIVE and SEND.

use crate::{Recording, Result, SimulatorConfig, SimulatorError};
use hub_protocol::{read_command, ControlCommand, ProtocolError};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// How long a closing connection waits for its streaming task
const STREAMER_JOIN_TIMEOUT: Duration = Duration::from_millis(1000);

/// Per-connection hub flags
#[derive(Debug)]
struct HubFlags {
    active: AtomicBool,
    sending: AtomicBool,
    closed: AtomicBool,
}

impl HubFlags {
    /// Initial hub state: NOT_ACTIVE and SEND
    fn new() -> Self {
        Self {
            active: AtomicBool::new(false),
            sending: AtomicBool::new(true),
            closed: AtomicBool::new(false),
        }
    }

    fn streaming(&self) -> bool {
        self.active.load(Ordering::Acquire) && self.sending.load(Ordering::Acquire)
    }
}

/// Simulated hub
pub struct HubSimulator {
    config: SimulatorConfig,
    recording: Arc<Recording>,
}

impl HubSimulator {
    pub fn new(config: SimulatorConfig, recording: Recording) -> Self {
        Self {
            config,
            recording: Arc::new(recording),
        }
    }

    /// Open the listening socket on all interfaces
    pub async fn bind(&self) -> Result<TcpListener> {
        let port = self.config.server.port;
        TcpListener::bind(("0.0.0.0", port))
            .await
            .map_err(|source| SimulatorError::Bind { port, source })
    }

    /// Bind and serve until the accept timeout (if any) expires
    pub async fn run(&self) -> Result<()> {
        let listener = self.bind().await?;
        self.serve(listener).await
    }

    /// Accept clients on `listener`
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        info!("Accepting connections on {}", listener.local_addr()?);
        let mut next_id = 0usize;

        loop {
            let accepted = match self.config.accept_timeout() {
                Some(limit) => match tokio::time::timeout(limit, listener.accept()).await {
                    Ok(accepted) => accepted,
                    Err(_) => {
                        warn!("No connection within {}ms, closing", limit.as_millis());
                        break;
                    }
                },
                None => listener.accept().await,
            };

            match accepted {
                Ok((socket, peer)) => {
                    next_id += 1;
                    let recording = self.recording.clone();
                    let period = self.config.sample_period();
                    tokio::spawn(handle_client(next_id, socket, peer, recording, period));
                }
                Err(e) => error!("Accept failed: {}", e),
            }
        }

        info!("Server closing");
        Ok(())
    }
}

async fn handle_client(
    id: usize,
    socket: TcpStream,
    peer: SocketAddr,
    recording: Arc<Recording>,
    period: Duration,
) {
    let name = format!("Client {}", id);
    info!("{}: accepted connection from {}", name, peer);
    if let Err(e) = socket.set_nodelay(true) {
        debug!("{}: cannot set TCP_NODELAY: {}", name, e);
    }

    let (mut commands, frames) = socket.into_split();
    let flags = Arc::new(HubFlags::new());
    let mut streamer = tokio::spawn(stream_frames(
        name.clone(),
        frames,
        recording,
        period,
        flags.clone(),
    ));

    loop {
        match read_command(&mut commands).await {
            Ok(command) => apply_command(&name, &flags, &command),
            Err(ProtocolError::Io(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                info!("{}: EOF, closing", name);
                break;
            }
            Err(e) => {
                warn!("{}: {}, closing", name, e);
                break;
            }
        }
    }

    flags.closed.store(true, Ordering::Release);
    match tokio::time::timeout(STREAMER_JOIN_TIMEOUT, &mut streamer).await {
        Ok(Ok(sent)) => info!("{}: {} frames sent", name, sent),
        Ok(Err(e)) => error!("{}: streaming task failed: {}", name, e),
        Err(_) => {
            warn!("{}: streaming task did not stop, aborting", name);
            streamer.abort();
        }
    }
}

fn apply_command(name: &str, flags: &HubFlags, command: &ControlCommand) {
    debug!("{}: command {}", name, command.flags);

    let active = command.flags.is_active();
    if flags.active.swap(active, Ordering::AcqRel) != active {
        info!("{}: now {}", name, if active { "ACTIVE" } else { "NOT ACTIVE" });
    }
    let sending = command.flags.is_sending();
    if flags.sending.swap(sending, Ordering::AcqRel) != sending {
        info!("{}: now {}", name, if sending { "SENDING" } else { "NOT SENDING" });
    }

    if command.flags.contains(hub_protocol::CommandFlags::SET_RTC) {
        info!("{}: set RTC to {}", name, command.rtc_value);
    }
    if command.flags.contains(hub_protocol::CommandFlags::SET_SATELLITES) {
        info!("{}: set satellite list {:?}", name, command.satellite_ids());
    }
}

/// Send recorded frames while the hub streams; returns the number sent
async fn stream_frames(
    name: String,
    mut out: OwnedWriteHalf,
    recording: Arc<Recording>,
    period: Duration,
    flags: Arc<HubFlags>,
) -> u64 {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut index = 0usize;
    let mut sent = 0u64;

    loop {
        ticker.tick().await;
        if flags.closed.load(Ordering::Acquire) {
            break;
        }
        if !flags.streaming() {
            continue;
        }
        let Some(frame) = recording.cycle(index) else {
            break;
        };
        if let Err(e) = out.write_all(&frame.bytes).await {
            warn!("{}: send failed: {}", name, e);
            break;
        }
        debug!("{}: sent recorded line {}", name, frame.sequence + 1);
        index = index.wrapping_add(1);
        sent += 1;
    }

    let _ = out.shutdown().await;
    sent
}
