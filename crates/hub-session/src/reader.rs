//! Frame Reader
//!
//! Pulls fixed-size frames off the hub stream and pushes each one onto the
//! queue currently installed in its [`QueueSlot`]. Runs as its own tokio task
//! until asked to stop or the stream ends.
//!
//! A reader stopped in the middle of a frame hands the bytes it already has
//! back in its [`ReaderOutcome`]; the next reader on the same stream starts
//! from them so frame boundaries stay aligned.

use crate::error::{Result, SessionError};
use frame_queue::{FrameQueue, QueueError, QueueSlot};
use hub_protocol::MagMode;
use metrics::counter;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Reader statistics
#[derive(Debug, Clone, Default)]
pub struct ReaderStats {
    /// Complete frames pushed
    pub frames: u64,
    /// Fastest frame assembly (first byte to last byte)
    pub min_latency: Option<Duration>,
    /// Slowest frame assembly
    pub max_latency: Duration,
    /// Sum of assembly times, for the average
    pub total_latency: Duration,
}

impl ReaderStats {
    fn record(&mut self, latency: Duration) {
        self.frames += 1;
        self.total_latency += latency;
        self.max_latency = self.max_latency.max(latency);
        self.min_latency = Some(self.min_latency.map_or(latency, |m| m.min(latency)));
    }

    /// Average frame assembly time
    pub fn avg_latency(&self) -> Duration {
        if self.frames == 0 {
            Duration::ZERO
        } else {
            self.total_latency / self.frames as u32
        }
    }
}

/// What a finished reader hands back
#[derive(Debug)]
pub struct ReaderOutcome<R> {
    /// The stream, so a later reader can continue on it
    pub stream: R,
    /// Start of a frame the stream has not finished sending
    pub partial_frame: Vec<u8>,
    pub stats: ReaderStats,
    /// `Ok` when stopped on request, otherwise why the loop ended
    pub result: Result<()>,
}

/// Socket reader, not yet running
pub struct FrameReader<R> {
    name: String,
    stream: R,
    slot: Arc<QueueSlot>,
    frame_size: usize,
    read_timeout: Duration,
    stop: Arc<AtomicBool>,
    partial_frame: Vec<u8>,
}

impl<R> FrameReader<R>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    /// Create a reader feeding `queue`
    ///
    /// `read_timeout` only bounds how long a stop request may go unnoticed;
    /// a timeout never loses bytes already received.
    pub fn new(
        name: impl Into<String>,
        stream: R,
        queue: Arc<FrameQueue>,
        mode: MagMode,
        read_timeout: Duration,
    ) -> Self {
        Self {
            name: name.into(),
            stream,
            slot: Arc::new(QueueSlot::new(queue)),
            frame_size: mode.frame_size(),
            read_timeout,
            stop: Arc::new(AtomicBool::new(false)),
            partial_frame: Vec::new(),
        }
    }

    /// Resume a frame an earlier reader on this stream left incomplete
    pub fn with_partial_frame(mut self, bytes: Vec<u8>) -> Self {
        self.partial_frame = bytes;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Give the stream and any partial frame back without ever running
    pub fn into_parts(self) -> (R, Vec<u8>) {
        (self.stream, self.partial_frame)
    }

    /// Start the read loop on its own task
    pub fn spawn(self) -> ReaderHandle<R> {
        let name = self.name.clone();
        let stop = self.stop.clone();
        let slot = self.slot.clone();
        let task = tokio::spawn(self.run());
        ReaderHandle {
            name,
            stop,
            slot,
            task,
        }
    }

    async fn run(mut self) -> ReaderOutcome<R> {
        info!("{}: starting (frame size {} bytes)", self.name, self.frame_size);
        let frames_read = counter!("hub_frames_read_total");

        let mut stats = ReaderStats::default();
        let mut buf = vec![0u8; self.frame_size];
        let mut filled = self.partial_frame.len().min(self.frame_size);
        buf[..filled].copy_from_slice(&self.partial_frame[..filled]);
        if filled > 0 {
            debug!("{}: resuming a frame at byte {}", self.name, filled);
        }
        let mut partial_frame = Vec::new();
        let mut frame_started = Instant::now();

        let result = loop {
            if filled == 0 && self.stop.load(Ordering::Acquire) {
                break Ok(());
            }

            let read = tokio::time::timeout(self.read_timeout, self.stream.read(&mut buf[filled..])).await;
            match read {
                Err(_) => {
                    // No data this tick; on stop the partial frame goes to the next reader
                    if filled > 0 && self.stop.load(Ordering::Acquire) {
                        info!("{}: handing over {} bytes of an incomplete frame", self.name, filled);
                        partial_frame = buf[..filled].to_vec();
                        break Ok(());
                    }
                }
                Ok(Ok(0)) if filled == 0 => break Err(SessionError::StreamClosed),
                Ok(Ok(0)) => {
                    break Err(SessionError::ShortRead {
                        expected: self.frame_size,
                        actual: filled,
                    })
                }
                Ok(Ok(n)) => {
                    if filled == 0 {
                        frame_started = Instant::now();
                    }
                    filled += n;
                    if filled < self.frame_size {
                        continue;
                    }

                    let frame = std::mem::replace(&mut buf, vec![0u8; self.frame_size]);
                    filled = 0;
                    if let Err(e) = self.slot.push(frame) {
                        break Err(e.into());
                    }
                    stats.record(frame_started.elapsed());
                    frames_read.increment(1);
                    debug!("{}: frame {} queued", self.name, stats.frames);
                }
                Ok(Err(e)) => break Err(SessionError::Io(e)),
            }
        };

        match &result {
            Ok(()) => info!("{}: stopped", self.name),
            Err(SessionError::StreamClosed) => warn!("{}: hub closed the connection", self.name),
            Err(SessionError::Queue(QueueError::Closed)) => {
                warn!("{}: dump queue closed by its writer, stopping", self.name)
            }
            Err(e) => error!("{}: {}", self.name, e),
        }
        if stats.frames > 0 {
            info!(
                "{}: read {} frames - latency max {}us - min {}us - avg {}us",
                self.name,
                stats.frames,
                stats.max_latency.as_micros(),
                stats.min_latency.unwrap_or_default().as_micros(),
                stats.avg_latency().as_micros()
            );
        }

        ReaderOutcome {
            stream: self.stream,
            partial_frame,
            stats,
            result,
        }
    }
}

/// Control handle of a running reader
#[derive(Debug)]
pub struct ReaderHandle<R> {
    name: String,
    stop: Arc<AtomicBool>,
    slot: Arc<QueueSlot>,
    task: JoinHandle<ReaderOutcome<R>>,
}

impl<R> ReaderHandle<R> {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Ask the loop to exit at the next frame boundary
    pub fn stop(&self) {
        debug!("{}: stop requested", self.name);
        self.stop.store(true, Ordering::Release);
    }

    /// Redirect subsequent frames to `queue`, returning the previous queue
    pub fn change_queue(&self, queue: Arc<FrameQueue>) -> Result<Arc<FrameQueue>> {
        Ok(self.slot.swap(queue)?)
    }

    /// Check whether the loop has already ended
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait up to `timeout` for the loop to end and take back the stream
    ///
    /// On timeout the task is aborted and the stream dropped with it.
    pub async fn join(mut self, timeout: Duration) -> Result<ReaderOutcome<R>> {
        match tokio::time::timeout(timeout, &mut self.task).await {
            Ok(Ok(outcome)) => Ok(outcome),
            Ok(Err(e)) => Err(SessionError::Worker(self.name, e.to_string())),
            Err(_) => {
                self.task.abort();
                Err(SessionError::JoinTimeout(self.name, timeout.as_millis() as u64))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{duplex, AsyncWriteExt};

    const MODE: MagMode = MagMode::WithoutMag;
    const TIMEOUT: Duration = Duration::from_millis(20);
    const JOIN: Duration = Duration::from_secs(5);

    fn frame_bytes(tag: u8) -> Vec<u8> {
        vec![tag; MODE.frame_size()]
    }

    async fn wait_for(queue: &FrameQueue, n: usize) {
        for _ in 0..500 {
            if queue.total_pushed() >= n {
                return;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        panic!("queue never reached {} frames", n);
    }

    #[tokio::test]
    async fn test_reads_frames_split_across_writes() {
        let (mut hub, client) = duplex(4096);
        let queue = Arc::new(FrameQueue::new());
        let reader = FrameReader::new("reader-1", client, queue.clone(), MODE, TIMEOUT).spawn();

        let mut bytes = frame_bytes(1);
        bytes.extend(frame_bytes(2));
        let (a, b) = bytes.split_at(100);
        hub.write_all(a).await.unwrap();
        tokio::time::sleep(TIMEOUT * 2).await;
        hub.write_all(b).await.unwrap();

        wait_for(&queue, 2).await;
        reader.stop();
        let outcome = reader.join(JOIN).await.unwrap();

        assert!(outcome.result.is_ok());
        assert_eq!(outcome.stats.frames, 2);
        assert_eq!(queue.pop().unwrap(), Some(frame_bytes(1)));
        assert_eq!(queue.pop().unwrap(), Some(frame_bytes(2)));
    }

    #[tokio::test]
    async fn test_eof_between_frames_is_stream_closed() {
        let (mut hub, client) = duplex(4096);
        let queue = Arc::new(FrameQueue::new());
        let reader = FrameReader::new("reader-1", client, queue.clone(), MODE, TIMEOUT).spawn();

        hub.write_all(&frame_bytes(7)).await.unwrap();
        drop(hub);

        let outcome = reader.join(JOIN).await.unwrap();
        assert!(matches!(outcome.result, Err(SessionError::StreamClosed)));
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test]
    async fn test_eof_inside_frame_is_short_read() {
        let (mut hub, client) = duplex(4096);
        let queue = Arc::new(FrameQueue::new());
        let reader = FrameReader::new("reader-1", client, queue.clone(), MODE, TIMEOUT).spawn();

        hub.write_all(&[0u8; 40]).await.unwrap();
        drop(hub);

        let outcome = reader.join(JOIN).await.unwrap();
        match outcome.result {
            Err(SessionError::ShortRead { expected, actual }) => {
                assert_eq!(expected, MODE.frame_size());
                assert_eq!(actual, 40);
            }
            other => panic!("unexpected result {:?}", other),
        }
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_change_queue_redirects_frames() {
        let (mut hub, client) = duplex(4096);
        let first = Arc::new(FrameQueue::new());
        let second = Arc::new(FrameQueue::new());
        let reader = FrameReader::new("reader-1", client, first.clone(), MODE, TIMEOUT).spawn();

        hub.write_all(&frame_bytes(1)).await.unwrap();
        wait_for(&first, 1).await;
        let old = reader.change_queue(second.clone()).unwrap();
        assert!(Arc::ptr_eq(&old, &first));

        hub.write_all(&frame_bytes(2)).await.unwrap();
        wait_for(&second, 1).await;
        reader.stop();
        reader.join(JOIN).await.unwrap();

        assert_eq!(first.total_pushed(), 1);
        assert_eq!(second.pop().unwrap(), Some(frame_bytes(2)));
    }

    #[tokio::test]
    async fn test_stream_returned_for_next_reader() {
        let (mut hub, client) = duplex(4096);
        let queue = Arc::new(FrameQueue::new());

        let reader = FrameReader::new("reader-1", client, queue.clone(), MODE, TIMEOUT).spawn();
        reader.stop();
        let outcome = reader.join(JOIN).await.unwrap();
        assert_eq!(outcome.stats.frames, 0);

        let reader = FrameReader::new("reader-2", outcome.stream, queue.clone(), MODE, TIMEOUT).spawn();
        hub.write_all(&frame_bytes(3)).await.unwrap();
        wait_for(&queue, 1).await;
        reader.stop();
        let outcome = reader.join(JOIN).await.unwrap();
        assert_eq!(outcome.stats.frames, 1);
    }

    #[tokio::test]
    async fn test_partial_frame_carries_over_to_next_reader() {
        let (mut hub, client) = duplex(4096);
        let queue = Arc::new(FrameQueue::new());
        let reader = FrameReader::new("reader-1", client, queue.clone(), MODE, TIMEOUT).spawn();

        let mut bytes = frame_bytes(1);
        bytes.extend(frame_bytes(2));
        let (head, tail) = bytes.split_at(100);
        hub.write_all(head).await.unwrap();
        tokio::time::sleep(TIMEOUT * 3).await;
        reader.stop();
        let outcome = reader.join(JOIN).await.unwrap();
        assert!(outcome.result.is_ok());
        assert_eq!(outcome.stats.frames, 0);
        assert_eq!(outcome.partial_frame.len(), 100);

        let reader = FrameReader::new("reader-2", outcome.stream, queue.clone(), MODE, TIMEOUT)
            .with_partial_frame(outcome.partial_frame)
            .spawn();
        hub.write_all(tail).await.unwrap();
        wait_for(&queue, 2).await;
        reader.stop();
        let outcome = reader.join(JOIN).await.unwrap();

        assert_eq!(outcome.stats.frames, 2);
        assert!(outcome.partial_frame.is_empty());
        assert_eq!(queue.pop().unwrap(), Some(frame_bytes(1)));
        assert_eq!(queue.pop().unwrap(), Some(frame_bytes(2)));
    }

    #[tokio::test]
    async fn test_closed_queue_stops_reader() {
        let (mut hub, client) = duplex(4096);
        let queue = Arc::new(FrameQueue::new());
        queue.close().unwrap();
        let reader = FrameReader::new("reader-1", client, queue.clone(), MODE, TIMEOUT).spawn();

        hub.write_all(&frame_bytes(4)).await.unwrap();
        let outcome = reader.join(JOIN).await.unwrap();
        assert!(matches!(
            outcome.result,
            Err(SessionError::Queue(QueueError::Closed))
        ));
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_join_timeout_aborts_stuck_reader() {
        let (_hub, client) = duplex(4096);
        let queue = Arc::new(FrameQueue::new());
        let reader =
            FrameReader::new("reader-1", client, queue, MODE, Duration::from_secs(30)).spawn();

        reader.stop();
        let started = Instant::now();
        let err = reader.join(Duration::from_millis(50)).await.unwrap_err();
        assert!(matches!(err, SessionError::JoinTimeout(_, 50)));
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
