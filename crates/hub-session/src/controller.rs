//! Session Controller
//!
//! Owns the hub connection and drives the reader/writer pipeline. Every
//! operation first asks the state machine for its target state; the state is
//! committed before the operation runs and stays committed if it then fails.
//!
//! Workers can also end on their own: a writer gives up on a queue that stays
//! empty, and its reader then stops at the next frame. Such workers are
//! collected at the start of the next operation.

use crate::config::ClientConfig;
use crate::dump::{open_dump_file, resolve_dump_path};
use crate::error::{Result, SessionError};
use crate::reader::{FrameReader, ReaderHandle};
use crate::state::{SessionState, SessionStateMachine};
use crate::writer::{FrameWriter, WriterExit, WriterHandle};
use chrono::{Local, Utc};
use frame_queue::FrameQueue;
use hub_protocol::{encode_command, CommandFlags, ControlCommand, MagMode};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tracing::{debug, error, info, warn};

/// Client side of a hub session
pub struct SessionController {
    config: ClientConfig,
    fsm: SessionStateMachine,
    mode: MagMode,
    /// Command channel to the hub
    command_half: Option<OwnedWriteHalf>,
    /// Frame stream, when no reader holds it
    read_half: Option<OwnedReadHalf>,
    /// Bytes of a frame a stopped reader left incomplete
    partial_frame: Vec<u8>,
    reader: Option<ReaderHandle<OwnedReadHalf>>,
    /// Writers in creation order; the last one drains the reader's queue
    writers: Vec<WriterHandle>,
    readers_started: usize,
    writers_started: usize,
    dump_path: Option<PathBuf>,
}

impl SessionController {
    /// Create a controller in the initial state
    pub fn new(config: ClientConfig) -> Self {
        let fsm = SessionStateMachine::new(config.session.transition_table());
        let mode = config.sensors.mag_mode();
        Self {
            config,
            fsm,
            mode,
            command_half: None,
            read_half: None,
            partial_frame: Vec::new(),
            reader: None,
            writers: Vec::new(),
            readers_started: 0,
            writers_started: 0,
            dump_path: None,
        }
    }

    /// Current session state
    pub fn state(&self) -> SessionState {
        self.fsm.current()
    }

    /// Writers still running
    pub fn writer_count(&self) -> usize {
        self.writers.iter().filter(|w| !w.is_finished()).count()
    }

    /// File the current writer appends to
    pub fn dump_path(&self) -> Option<&Path> {
        self.dump_path.as_deref()
    }

    pub fn is_connected(&self) -> bool {
        self.command_half.is_some()
    }

    fn transition(&mut self, target: SessionState) -> Result<()> {
        self.fsm.request(target).map_err(|e| {
            warn!("{}", e);
            e
        })
    }

    /// Open the TCP connection to the hub
    pub async fn connect(&mut self) -> Result<()> {
        self.transition(SessionState::Connected)?;
        if self.command_half.is_some() {
            info!("Already connected to the hub");
            return Ok(());
        }

        let addr = self.config.hub_address();
        let timeout = self.config.connect_timeout();
        let stream = tokio::time::timeout(timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| {
                SessionError::Connection(format!(
                    "connecting to {} timed out after {}ms",
                    addr,
                    timeout.as_millis()
                ))
            })?
            .map_err(|e| {
                error!("Cannot connect to {}: {}", addr, e);
                SessionError::Connection(format!("{}: {}", addr, e))
            })?;
        stream.set_nodelay(true)?;

        let (read_half, command_half) = stream.into_split();
        self.read_half = Some(read_half);
        self.command_half = Some(command_half);
        info!("Connected to {}", addr);
        Ok(())
    }

    /// Drop the connection to the hub
    pub async fn disconnect(&mut self) -> Result<()> {
        self.transition(SessionState::Disconnected)?;
        self.reap_workers().await;
        self.retire_reader().await;
        self.read_half = None;
        self.partial_frame.clear();
        if let Some(mut command_half) = self.command_half.take() {
            if let Err(e) = command_half.shutdown().await {
                debug!("Socket shutdown: {}", e);
            }
            info!("Disconnected from hub");
        }
        Ok(())
    }

    /// Put the sensors in idle mode, optionally setting clock and satellite list
    pub async fn init_sensors(&mut self, set_rtc: bool, set_satellites: bool) -> Result<()> {
        self.transition(SessionState::SensorsInitialized)?;

        let mut flags = CommandFlags::NOT_ACTIVE | CommandFlags::SEND;
        let mut rtc_value = 0;
        if set_rtc {
            flags |= CommandFlags::SET_RTC;
            rtc_value = unix_seconds();
        }
        if set_satellites {
            flags |= CommandFlags::SET_SATELLITES;
        }
        self.send_command(flags, rtc_value).await
    }

    /// Start streaming frames into a new dump file
    pub async fn start_dumping(&mut self) -> Result<()> {
        self.transition(SessionState::Dumping)?;
        self.reap_workers().await;
        self.retire_reader().await;
        let stream = self.read_half.take().ok_or(SessionError::NotConnected)?;

        let queue = Arc::new(FrameQueue::new());
        let writer = match self.new_writer(queue.clone()).await {
            Ok(writer) => writer,
            Err(e) => {
                self.read_half = Some(stream);
                return Err(e);
            }
        };
        self.readers_started += 1;
        let reader = FrameReader::new(
            format!("Reader {}", self.readers_started),
            stream,
            queue,
            self.mode,
            self.config.read_timeout(),
        )
        .with_partial_frame(std::mem::take(&mut self.partial_frame));

        if let Err(e) = self
            .send_command(CommandFlags::ACTIVE | CommandFlags::SEND, 0)
            .await
        {
            let (stream, partial_frame) = reader.into_parts();
            self.read_half = Some(stream);
            self.partial_frame = partial_frame;
            return Err(e);
        }

        self.reader = Some(reader.spawn());
        self.writers.push(writer.spawn());
        Ok(())
    }

    /// Stop streaming; the current writer drains what is queued and exits
    pub async fn stop_dumping(&mut self) -> Result<()> {
        self.transition(SessionState::Stopped)?;
        self.reap_workers().await;
        self.send_command(CommandFlags::NOT_ACTIVE | CommandFlags::SEND, 0)
            .await?;
        self.retire_reader().await;
        Ok(())
    }

    /// Continue streaming into a fresh dump file
    pub async fn change_dump_file(&mut self) -> Result<()> {
        self.transition(SessionState::DumpFileChanging)?;
        self.reap_workers().await;
        if self.reader.is_none() {
            return Err(SessionError::ReaderNotRunning);
        }

        let queue = Arc::new(FrameQueue::new());
        let writer = self.new_writer(queue.clone()).await?.spawn();
        let reader = self.reader.as_ref().ok_or(SessionError::ReaderNotRunning)?;
        reader.change_queue(queue)?;

        if let Some(previous) = self.writers.last() {
            previous.notify_reader_death();
        }
        self.writers.push(writer);
        Ok(())
    }

    /// End the session, waiting (bounded) for every worker
    pub async fn quit(&mut self) -> Result<()> {
        self.transition(SessionState::Quit)?;
        let timeout = self.config.join_timeout();

        if let Some(reader) = self.reader.take() {
            reader.stop();
            if let Err(e) = reader.join(timeout).await {
                error!("{}", e);
            }
        }

        for writer in &self.writers {
            writer.notify_reader_death();
        }
        for writer in self.writers.drain(..) {
            match writer.join(timeout).await {
                Ok(stats) => debug!("Writer finished: {:?}", stats.exit),
                Err(e) => error!("{}", e),
            }
        }

        self.read_half = None;
        self.partial_frame.clear();
        self.command_half = None;
        info!("Session closed");
        Ok(())
    }

    async fn send_command(&mut self, flags: CommandFlags, rtc_value: u32) -> Result<()> {
        let command = ControlCommand::new(flags, rtc_value, self.config.sensors.satellites.clone())?;
        let bytes = encode_command(&command);
        let sink = self.command_half.as_mut().ok_or(SessionError::NotConnected)?;
        sink.write_all(&bytes).await?;
        sink.flush().await?;
        debug!("Command {} sent ({} bytes)", flags, bytes.len());
        Ok(())
    }

    async fn new_writer(&mut self, queue: Arc<FrameQueue>) -> Result<FrameWriter<File>> {
        self.writers_started += 1;
        let path = resolve_dump_path(&self.config.dump.file, Local::now(), self.writers_started);
        let sink = open_dump_file(&path).await?;
        self.dump_path = Some(path);

        let satellites = self.config.sensors.satellites.len();
        Ok(FrameWriter::new(
            format!("Writer {}", self.writers_started),
            sink,
            queue,
            self.mode,
            (satellites > 0).then_some(satellites),
            self.config.writer_config(),
        ))
    }

    /// Stop the reader, keep its stream and let the current writer drain
    ///
    /// A reader that does not stop within the join timeout is aborted and
    /// its stream is lost; the session then needs a reconnect.
    async fn retire_reader(&mut self) {
        let Some(reader) = self.reader.take() else {
            return;
        };
        reader.stop();
        match reader.join(self.config.join_timeout()).await {
            Ok(outcome) => {
                if let Err(e) = &outcome.result {
                    warn!("Reader had already ended: {}", e);
                }
                self.read_half = Some(outcome.stream);
                self.partial_frame = outcome.partial_frame;
            }
            Err(e) => {
                warn!("{}; continuing without the frame stream", e);
                self.partial_frame.clear();
            }
        }
        if let Some(writer) = self.writers.last() {
            writer.notify_reader_death();
        }
    }

    /// Collect a reader and writers that ended without being asked to
    async fn reap_workers(&mut self) {
        if self.reader.as_ref().is_some_and(|r| r.is_finished()) {
            error!("Frame reader ended on its own while {}", self.state());
            self.retire_reader().await;
        }

        let (finished, running): (Vec<_>, Vec<_>) =
            self.writers.drain(..).partition(|w| w.is_finished());
        self.writers = running;
        let timeout = self.config.join_timeout();
        for writer in finished {
            let name = writer.name().to_string();
            match writer.join(timeout).await {
                Ok(stats) if stats.exit == WriterExit::Drained => {
                    debug!("{}: collected after {} frames", name, stats.frames_written)
                }
                Ok(stats) => warn!(
                    "{}: ended early ({:?}) after {} frames",
                    name, stats.exit, stats.frames_written
                ),
                Err(e) => error!("{}", e),
            }
        }
    }
}

/// Seconds since the Unix epoch, truncated to the hub's 32-bit clock
fn unix_seconds() -> u32 {
    Utc::now().timestamp() as u32
}
