//! Frame Writer
//!
//! Drains one [`FrameQueue`] into one dump sink. The writer never blocks on
//! the queue: an empty poll either ends the loop (the reader is gone, so the
//! queue is drained for good) or sleeps for the idle interval. After too many
//! empty polls in a row the queue is considered abandoned and closed, so the
//! reader feeding it stops at its next frame.

use crate::error::{Result, SessionError};
use frame_queue::FrameQueue;
use hub_protocol::{decode_frame, format_record, MagMode, SensorFrame, MAX_SENSORS};
use metrics::counter;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Writer tuning
#[derive(Debug, Clone)]
pub struct WriterConfig {
    /// Sleep after an empty poll
    pub idle_interval: Duration,
    /// Empty polls tolerated before the queue counts as abandoned
    pub max_idle_polls: u32,
    /// Yield to the scheduler after each frame
    pub yield_per_frame: bool,
    /// Log slot validity every this many frames
    pub validity_log_interval: u64,
    /// Undecodable frames tolerated in a row
    pub max_consecutive_malformed: u32,
    /// Write a sequence index in place of the hub timestamp
    pub use_sequence_index: bool,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            idle_interval: Duration::from_millis(1000),
            max_idle_polls: 3,
            yield_per_frame: true,
            validity_log_interval: 50,
            max_consecutive_malformed: 10,
            use_sequence_index: false,
        }
    }
}

/// Why a writer stopped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriterExit {
    /// Reader gone and queue empty
    Drained,
    /// Queue stayed empty for too long
    Abandoned,
    /// Too many undecodable frames in a row
    Malformed,
    /// The dump sink failed
    SinkFailed(String),
    /// The queue could not be read
    QueueFailed(String),
}

/// Writer statistics
#[derive(Debug, Clone)]
pub struct WriterStats {
    pub frames_written: u64,
    /// Frames dropped because they could not be decoded
    pub malformed: u64,
    /// Per slot, frames in which the slot reported data
    pub valid_per_slot: [u64; MAX_SENSORS],
    /// Frames with at least the expected number of active slots
    pub complete_frames: u64,
    pub min_cycle: Option<Duration>,
    pub max_cycle: Duration,
    pub total_cycle: Duration,
    pub exit: WriterExit,
}

impl WriterStats {
    fn new() -> Self {
        Self {
            frames_written: 0,
            malformed: 0,
            valid_per_slot: [0; MAX_SENSORS],
            complete_frames: 0,
            min_cycle: None,
            max_cycle: Duration::ZERO,
            total_cycle: Duration::ZERO,
            exit: WriterExit::Drained,
        }
    }

    fn record(&mut self, frame: &SensorFrame, expected_active: Option<usize>, cycle: Duration) {
        self.frames_written += 1;
        for (slot, count) in self.valid_per_slot.iter_mut().enumerate() {
            if frame.is_slot_active(slot) {
                *count += 1;
            }
        }
        if expected_active.is_some_and(|n| frame.active_count() >= n) {
            self.complete_frames += 1;
        }
        self.total_cycle += cycle;
        self.max_cycle = self.max_cycle.max(cycle);
        self.min_cycle = Some(self.min_cycle.map_or(cycle, |m| m.min(cycle)));
    }

    /// Percentage of frames in which `slot` reported data
    pub fn valid_percent(&self, slot: usize) -> f64 {
        match self.valid_per_slot.get(slot) {
            Some(&n) if self.frames_written > 0 => n as f64 * 100.0 / self.frames_written as f64,
            _ => 0.0,
        }
    }

    /// Average time between consecutive frames
    pub fn avg_cycle(&self) -> Duration {
        if self.frames_written == 0 {
            Duration::ZERO
        } else {
            self.total_cycle / self.frames_written as u32
        }
    }

    fn validity_summary(&self) -> String {
        (0..MAX_SENSORS)
            .map(|slot| format!("{}:{:.0}%", slot, self.valid_percent(slot)))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Dump writer, not yet running
pub struct FrameWriter<W> {
    name: String,
    sink: W,
    queue: Arc<FrameQueue>,
    mode: MagMode,
    expected_active: Option<usize>,
    config: WriterConfig,
    reader_dead: Arc<AtomicBool>,
}

impl<W> FrameWriter<W>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    /// Create a writer draining `queue` into `sink`
    ///
    /// `expected_active` is the number of satellites that should report in
    /// every frame; `None` skips the complete-frame count.
    pub fn new(
        name: impl Into<String>,
        sink: W,
        queue: Arc<FrameQueue>,
        mode: MagMode,
        expected_active: Option<usize>,
        config: WriterConfig,
    ) -> Self {
        Self {
            name: name.into(),
            sink,
            queue,
            mode,
            expected_active,
            config,
            reader_dead: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Start the drain loop on its own task
    pub fn spawn(self) -> WriterHandle {
        let name = self.name.clone();
        let reader_dead = self.reader_dead.clone();
        let task = tokio::spawn(self.run());
        WriterHandle {
            name,
            reader_dead,
            task,
        }
    }

    async fn run(mut self) -> WriterStats {
        info!("{}: starting", self.name);
        let frames_written = counter!("hub_frames_written_total");
        let frames_malformed = counter!("hub_frames_malformed_total");

        let mut stats = WriterStats::new();
        let mut idle_polls = 0u32;
        let mut consecutive_malformed = 0u32;
        let mut abandoned = false;
        let mut last_frame = Instant::now();

        stats.exit = loop {
            // Latch first: a frame pushed before the latch was set is seen by the pop below
            let reader_dead = self.reader_dead.load(Ordering::Acquire);
            let raw = match self.queue.pop() {
                Ok(raw) => raw,
                Err(e) => break WriterExit::QueueFailed(e.to_string()),
            };

            let Some(raw) = raw else {
                if reader_dead {
                    debug!("{}: reader gone and queue empty", self.name);
                    break WriterExit::Drained;
                }
                if abandoned {
                    break WriterExit::Abandoned;
                }
                if idle_polls >= self.config.max_idle_polls {
                    warn!("{}: queue empty after {} polls, giving up", self.name, idle_polls);
                    // The reader fails its next push instead of filling a queue nobody drains
                    if let Err(e) = self.queue.close() {
                        break WriterExit::QueueFailed(e.to_string());
                    }
                    abandoned = true;
                    continue;
                }
                idle_polls += 1;
                debug!("{}: queue empty - {}", self.name, idle_polls);
                tokio::time::sleep(self.config.idle_interval).await;
                continue;
            };
            idle_polls = 0;

            let frame = match decode_frame(&raw, self.mode) {
                Ok(frame) => frame,
                Err(e) => {
                    stats.malformed += 1;
                    consecutive_malformed += 1;
                    frames_malformed.increment(1);
                    warn!("{}: dropping frame: {}", self.name, e);
                    if consecutive_malformed > self.config.max_consecutive_malformed {
                        error!(
                            "{}: {} malformed frames in a row, stopping",
                            self.name, consecutive_malformed
                        );
                        break WriterExit::Malformed;
                    }
                    continue;
                }
            };
            consecutive_malformed = 0;

            let sequence = self
                .config
                .use_sequence_index
                .then_some(stats.frames_written);
            let mut line = format_record(&frame, sequence);
            line.push('\n');
            if let Err(e) = self.sink.write_all(line.as_bytes()).await {
                error!("{}: write failed: {}", self.name, e);
                break WriterExit::SinkFailed(e.to_string());
            }

            let now = Instant::now();
            stats.record(&frame, self.expected_active, now - last_frame);
            last_frame = now;
            frames_written.increment(1);

            if self.config.validity_log_interval > 0
                && stats.frames_written % self.config.validity_log_interval == 0
            {
                info!(
                    "{}: {} frames, {} complete - valid {}",
                    self.name,
                    stats.frames_written,
                    stats.complete_frames,
                    stats.validity_summary()
                );
            }

            if self.config.yield_per_frame {
                tokio::task::yield_now().await;
            }
        };

        self.close_sink().await;
        self.log_summary(&stats);
        stats
    }

    async fn close_sink(&mut self) {
        if let Err(e) = self.sink.flush().await {
            warn!("{}: flush failed: {}", self.name, e);
        }
        if let Err(e) = self.sink.shutdown().await {
            warn!("{}: close failed: {}", self.name, e);
        }
    }

    fn log_summary(&self, stats: &WriterStats) {
        info!("{}: closing ({:?})", self.name, stats.exit);
        if stats.frames_written == 0 {
            return;
        }
        info!(
            "{}: wrote {} frames, dropped {} - valid {}",
            self.name,
            stats.frames_written,
            stats.malformed,
            stats.validity_summary()
        );
        if let Some(expected) = self.expected_active {
            info!(
                "{}: {} of {} frames had all {} satellites",
                self.name, stats.complete_frames, stats.frames_written, expected
            );
        }
        info!(
            "{}: cycle length - max {}us - min {}us - avg {}us",
            self.name,
            stats.max_cycle.as_micros(),
            stats.min_cycle.unwrap_or_default().as_micros(),
            stats.avg_cycle().as_micros()
        );
    }
}

/// Control handle of a running writer
#[derive(Debug)]
pub struct WriterHandle {
    name: String,
    reader_dead: Arc<AtomicBool>,
    task: JoinHandle<WriterStats>,
}

impl WriterHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Tell the writer nothing more will be pushed onto its queue
    pub fn notify_reader_death(&self) {
        self.reader_dead.store(true, Ordering::Release);
    }

    /// Check whether the loop has already ended
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait up to `timeout` for the writer to finish
    ///
    /// On timeout the task keeps running detached.
    pub async fn join(mut self, timeout: Duration) -> Result<WriterStats> {
        match tokio::time::timeout(timeout, &mut self.task).await {
            Ok(Ok(stats)) => Ok(stats),
            Ok(Err(e)) => Err(SessionError::Worker(self.name, e.to_string())),
            Err(_) => Err(SessionError::JoinTimeout(self.name, timeout.as_millis() as u64)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{frame_bytes, read_lines};
    use hub_protocol::parse_record;

    const MODE: MagMode = MagMode::WithMag;
    const JOIN: Duration = Duration::from_secs(5);

    fn fast_config() -> WriterConfig {
        WriterConfig {
            idle_interval: Duration::from_millis(5),
            ..WriterConfig::default()
        }
    }

    async fn writer_to_file(
        queue: Arc<FrameQueue>,
        expected: Option<usize>,
        config: WriterConfig,
    ) -> (tempfile::TempDir, std::path::PathBuf, WriterHandle) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dump.txt");
        let sink = tokio::fs::File::create(&path).await.unwrap();
        let handle = FrameWriter::new("writer-1", sink, queue, MODE, expected, config).spawn();
        (dir, path, handle)
    }

    #[tokio::test]
    async fn test_drains_queue_then_exits_on_reader_death() {
        let queue = Arc::new(FrameQueue::new());
        for ts in 0..25 {
            queue.push(frame_bytes(MODE, 0b111, ts)).unwrap();
        }
        let (_dir, path, writer) = writer_to_file(queue.clone(), Some(3), fast_config()).await;
        writer.notify_reader_death();

        let stats = writer.join(JOIN).await.unwrap();
        assert_eq!(stats.exit, WriterExit::Drained);
        assert_eq!(stats.frames_written, 25);
        assert_eq!(stats.complete_frames, 25);
        assert_eq!(stats.valid_per_slot[0], 25);
        assert_eq!(stats.valid_per_slot[3], 0);
        assert_eq!(stats.valid_percent(2), 100.0);
        assert!(queue.is_empty());

        let lines = read_lines(&path);
        assert_eq!(lines.len(), 25);
        let last = parse_record(&lines[24]).unwrap();
        assert_eq!(last.timestamp, 24);
        assert_eq!(last.bitmap, 0b111);
    }

    #[tokio::test]
    async fn test_abandons_idle_queue() {
        let queue = Arc::new(FrameQueue::new());
        let (_dir, path, writer) = writer_to_file(queue, None, fast_config()).await;

        let stats = writer.join(JOIN).await.unwrap();
        assert_eq!(stats.exit, WriterExit::Abandoned);
        assert_eq!(stats.frames_written, 0);
        assert!(read_lines(&path).is_empty());
    }

    #[tokio::test]
    async fn test_abandoned_queue_is_closed_to_producer() {
        let queue = Arc::new(FrameQueue::new());
        queue.push(frame_bytes(MODE, 1, 1)).unwrap();
        let config = WriterConfig {
            max_idle_polls: 1,
            ..fast_config()
        };
        let (_dir, path, writer) = writer_to_file(queue.clone(), None, config).await;

        let stats = writer.join(JOIN).await.unwrap();
        assert_eq!(stats.exit, WriterExit::Abandoned);
        assert_eq!(stats.frames_written, 1);
        assert_eq!(read_lines(&path).len(), 1);

        assert!(queue.is_closed());
        assert!(queue.push(frame_bytes(MODE, 1, 2)).is_err());
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_single_bad_frame_is_dropped() {
        let queue = Arc::new(FrameQueue::new());
        queue.push(frame_bytes(MODE, 1, 1)).unwrap();
        queue.push(vec![0u8; 10]).unwrap();
        queue.push(frame_bytes(MODE, 1, 2)).unwrap();
        let (_dir, path, writer) = writer_to_file(queue, None, fast_config()).await;
        writer.notify_reader_death();

        let stats = writer.join(JOIN).await.unwrap();
        assert_eq!(stats.exit, WriterExit::Drained);
        assert_eq!(stats.frames_written, 2);
        assert_eq!(stats.malformed, 1);
        assert_eq!(read_lines(&path).len(), 2);
    }

    #[tokio::test]
    async fn test_stream_of_bad_frames_is_fatal() {
        let queue = Arc::new(FrameQueue::new());
        for _ in 0..5 {
            queue.push(vec![1u8; 7]).unwrap();
        }
        queue.push(frame_bytes(MODE, 1, 1)).unwrap();
        let config = WriterConfig {
            max_consecutive_malformed: 3,
            ..fast_config()
        };
        let (_dir, path, writer) = writer_to_file(queue.clone(), None, config).await;

        let stats = writer.join(JOIN).await.unwrap();
        assert_eq!(stats.exit, WriterExit::Malformed);
        assert_eq!(stats.malformed, 4);
        assert_eq!(stats.frames_written, 0);
        assert_eq!(queue.len(), 2);
        assert!(read_lines(&path).is_empty());
    }

    #[tokio::test]
    async fn test_sequence_index_replaces_timestamp() {
        let queue = Arc::new(FrameQueue::new());
        for ts in [900, 901, 902] {
            queue.push(frame_bytes(MODE, 1, ts)).unwrap();
        }
        let config = WriterConfig {
            use_sequence_index: true,
            ..fast_config()
        };
        let (_dir, path, writer) = writer_to_file(queue, None, config).await;
        writer.notify_reader_death();
        writer.join(JOIN).await.unwrap();

        let stamps: Vec<u32> = read_lines(&path)
            .iter()
            .map(|l| parse_record(l).unwrap().timestamp)
            .collect();
        assert_eq!(stamps, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_keeps_writing_while_reader_alive() {
        let queue = Arc::new(FrameQueue::new());
        let config = WriterConfig {
            idle_interval: Duration::from_millis(20),
            ..WriterConfig::default()
        };
        let (_dir, path, writer) = writer_to_file(queue.clone(), None, config).await;

        for ts in 0..3 {
            tokio::time::sleep(Duration::from_millis(10)).await;
            queue.push(frame_bytes(MODE, 1, ts)).unwrap();
        }
        writer.notify_reader_death();
        let stats = writer.join(JOIN).await.unwrap();
        assert_eq!(stats.exit, WriterExit::Drained);
        assert_eq!(read_lines(&path).len(), 3);
    }
}
