//! Swappable Producer Slot

use crate::{FrameQueue, QueueError, RawFrame};
use std::sync::{Arc, Mutex};
use tracing::debug;

/// The queue a producer currently feeds
///
/// Pushes and swaps take the same lock, so every frame lands wholly in the
/// queue that was current when it was pushed. Once [`QueueSlot::swap`]
/// returns, the old queue receives nothing more.
#[derive(Debug)]
pub struct QueueSlot {
    current: Mutex<Arc<FrameQueue>>,
}

impl QueueSlot {
    /// Create a slot feeding `queue`
    pub fn new(queue: Arc<FrameQueue>) -> Self {
        Self {
            current: Mutex::new(queue),
        }
    }

    /// Push a frame onto the current queue
    pub fn push(&self, frame: RawFrame) -> Result<(), QueueError> {
        let current = self
            .current
            .lock()
            .map_err(|e| QueueError::LockPoisoned(e.to_string()))?;
        current.push(frame)
    }

    /// Replace the current queue, returning the one it replaced
    pub fn swap(&self, queue: Arc<FrameQueue>) -> Result<Arc<FrameQueue>, QueueError> {
        let mut current = self
            .current
            .lock()
            .map_err(|e| QueueError::LockPoisoned(e.to_string()))?;
        let old = std::mem::replace(&mut *current, queue);
        debug!(
            "Queue swapped; old queue holds {} frames ({} pushed in total)",
            old.len(),
            old.total_pushed()
        );
        Ok(old)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;

    #[test]
    fn test_swap_redirects_later_pushes() {
        let first = Arc::new(FrameQueue::new());
        let second = Arc::new(FrameQueue::new());
        let slot = QueueSlot::new(first.clone());

        slot.push(vec![1]).unwrap();
        slot.push(vec![2]).unwrap();
        let old = slot.swap(second.clone()).unwrap();
        slot.push(vec![3]).unwrap();

        assert!(Arc::ptr_eq(&old, &first));
        assert_eq!(first.pop().unwrap(), Some(vec![1]));
        assert_eq!(first.pop().unwrap(), Some(vec![2]));
        assert_eq!(first.pop().unwrap(), None);
        assert_eq!(second.pop().unwrap(), Some(vec![3]));
    }

    #[test]
    fn test_swap_under_running_producer_loses_nothing() {
        let first = Arc::new(FrameQueue::new());
        let second = Arc::new(FrameQueue::new());
        let slot = Arc::new(QueueSlot::new(first.clone()));
        let swapped = Arc::new(AtomicBool::new(false));

        let producer = {
            let slot = slot.clone();
            let swapped = swapped.clone();
            thread::spawn(move || {
                let mut i = 0u32;
                // Keep producing until well after the swap
                while !swapped.load(Ordering::Acquire) || i % 1000 != 0 {
                    slot.push(i.to_le_bytes().to_vec()).unwrap();
                    i += 1;
                }
                i
            })
        };

        while first.total_pushed() < 500 {
            thread::yield_now();
        }
        slot.swap(second.clone()).unwrap();
        swapped.store(true, Ordering::Release);
        let produced = producer.join().unwrap();

        let drain = |q: &FrameQueue| {
            let mut out = Vec::new();
            while let Some(f) = q.pop().unwrap() {
                out.push(u32::from_le_bytes([f[0], f[1], f[2], f[3]]));
            }
            out
        };
        let mut all = drain(&first);
        let tail = drain(&second);
        assert!(!all.is_empty());

        // Old queue holds a contiguous prefix, new queue the rest
        all.extend(tail);
        assert_eq!(all, (0..produced).collect::<Vec<_>>());
    }
}
