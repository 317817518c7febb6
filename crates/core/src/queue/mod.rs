use serde::{Deserialize, Serialize};

use crate::{Key, Result, SonicFrameError};

/// A debounced key transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyEvent {
    pub key: Key,
    pub pressed: bool,
}

impl KeyEvent {
    pub fn new(key: Key, pressed: bool) -> Self {
        Self { key, pressed }
    }
}

/// Fixed-capacity FIFO filled once per capture cycle and drained by polling.
///
/// The read cursor starts one past the write cursor so the very first poll
/// asks for a capture. After a cycle's events are drained, one extra poll
/// reports empty and moves the read cursor past the write cursor; the poll
/// after that requests the next capture.
#[derive(Debug, Clone)]
pub struct KeyEventQueue {
    events: Vec<KeyEvent>,
    capacity: usize,
    read: usize,
    write: usize,
}

impl KeyEventQueue {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            events: Vec::with_capacity(capacity),
            capacity,
            read: 1,
            write: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Events still waiting to be polled in the current cycle.
    pub fn pending(&self) -> usize {
        self.write.saturating_sub(self.read)
    }

    /// True once the previous cycle has been fully drained.
    pub fn needs_refill(&self) -> bool {
        self.read > self.write
    }

    /// Empties the queue and rewinds both cursors for a new fill cycle.
    pub fn begin_cycle(&mut self) {
        self.events.clear();
        self.read = 0;
        self.write = 0;
    }

    pub fn push(&mut self, event: KeyEvent) -> Result<()> {
        if self.write >= self.capacity {
            return Err(SonicFrameError::QueueFull {
                capacity: self.capacity,
            });
        }
        self.events.push(event);
        self.write += 1;
        Ok(())
    }

    /// Takes the next event of the current cycle.
    pub fn pop(&mut self) -> Option<KeyEvent> {
        if self.read >= self.write {
            // Only the first empty poll moves the cursor; the queue then
            // reports `needs_refill` until a new cycle begins.
            if self.read == self.write {
                self.read += 1;
            }
            return None;
        }
        let event = self.events[self.read];
        self.read += 1;
        Some(event)
    }
}
