//! Unbounded FIFO Implementation

use crate::{QueueError, RawFrame};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

/// Initial capacity (about one second of frames at 100 Hz)
pub const DEFAULT_CAPACITY: usize = 128;

/// Unbounded FIFO of raw frames shared by one reader and one writer
#[derive(Debug)]
pub struct FrameQueue {
    /// Queued frames, oldest first
    frames: Mutex<VecDeque<RawFrame>>,
    /// Total frames pushed (for statistics)
    total_pushed: AtomicUsize,
    /// Total frames popped (for statistics)
    total_popped: AtomicUsize,
    /// Set once the consumer has gone; pushes are refused afterwards
    closed: AtomicBool,
}

impl FrameQueue {
    /// Create an empty queue
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Create an empty queue with room for `capacity` frames before growing
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            frames: Mutex::new(VecDeque::with_capacity(capacity)),
            total_pushed: AtomicUsize::new(0),
            total_popped: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// Append a frame at the back
    ///
    /// Fails with [`QueueError::Closed`] once the queue has been closed.
    pub fn push(&self, frame: RawFrame) -> Result<(), QueueError> {
        let mut frames = self
            .frames
            .lock()
            .map_err(|e| QueueError::LockPoisoned(e.to_string()))?;
        if self.closed.load(Ordering::Acquire) {
            return Err(QueueError::Closed);
        }
        frames.push_back(frame);
        self.total_pushed.fetch_add(1, Ordering::Release);
        Ok(())
    }

    /// Take the oldest frame, never waiting for one to arrive
    pub fn pop(&self) -> Result<Option<RawFrame>, QueueError> {
        let mut frames = self
            .frames
            .lock()
            .map_err(|e| QueueError::LockPoisoned(e.to_string()))?;
        let frame = frames.pop_front();
        if frame.is_some() {
            self.total_popped.fetch_add(1, Ordering::Release);
        }
        Ok(frame)
    }

    /// Refuse every later push; frames already queued can still be popped
    pub fn close(&self) -> Result<(), QueueError> {
        // Under the lock so no push straddles the close
        let _frames = self
            .frames
            .lock()
            .map_err(|e| QueueError::LockPoisoned(e.to_string()))?;
        self.closed.store(true, Ordering::Release);
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Number of frames waiting
    pub fn len(&self) -> usize {
        self.frames.lock().map(|f| f.len()).unwrap_or(0)
    }

    /// Check if no frame is waiting
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total frames ever pushed
    pub fn total_pushed(&self) -> usize {
        self.total_pushed.load(Ordering::Acquire)
    }

    /// Total frames ever popped
    pub fn total_popped(&self) -> usize {
        self.total_popped.load(Ordering::Acquire)
    }
}

impl Default for FrameQueue {
    fn default() -> Self {
        Self::new()
    }
}
