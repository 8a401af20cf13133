//! Frame Queue
//!
//! Hands raw frame buffers from the socket reader to a dump-file writer.
//! A [`FrameQueue`] is an unbounded FIFO with one producer and one consumer;
//! a [`QueueSlot`] is the producer's view of "the queue I currently feed",
//! which the session controller swaps when the output file changes.

mod queue;
mod slot;

pub use queue::FrameQueue;
pub use slot::QueueSlot;

use thiserror::Error;

/// Raw frame bytes as read from the hub
pub type RawFrame = Vec<u8>;

/// Errors raised by queue operations
#[derive(Debug, Clone, Error)]
pub enum QueueError {
    /// A thread panicked while holding the queue lock
    #[error("Queue lock poisoned: {0}")]
    LockPoisoned(String),

    /// The consumer closed the queue
    #[error("Queue closed by its consumer")]
    Closed,
}
