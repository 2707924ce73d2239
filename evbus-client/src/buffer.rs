//! Bounded FIFO of events published while not authenticated
//!
//! When full, pushing evicts the oldest entry. The buffer is drained in
//! insertion order on the next transition to `Authenticated`.

use evbus_core::Event;
use std::collections::VecDeque;

/// Bounded offline event queue
#[derive(Debug, Clone)]
pub struct OfflineBuffer {
    capacity: usize,
    events: VecDeque<Event>,
}

impl OfflineBuffer {
    /// Create a buffer holding at most `capacity` events
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            events: VecDeque::with_capacity(capacity.min(1024)),
        }
    }

    /// Append an event, returning the evicted one when the buffer was full
    ///
    /// With a capacity of zero the pushed event itself is returned.
    pub fn push(&mut self, event: Event) -> Option<Event> {
        if self.capacity == 0 {
            return Some(event);
        }
        let evicted = if self.events.len() >= self.capacity {
            self.events.pop_front()
        } else {
            None
        };
        self.events.push_back(event);
        evicted
    }

    /// Remove and return every buffered event, oldest first
    pub fn drain(&mut self) -> Vec<Event> {
        self.events.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Drop every buffered event, returning how many were dropped
    pub fn clear(&mut self) -> usize {
        let dropped = self.events.len();
        self.events.clear();
        dropped
    }
}
