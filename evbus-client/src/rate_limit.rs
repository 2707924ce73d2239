//! Sliding-window rate limiting
//!
//! Each identifier owns a queue of admission timestamps. On every check the
//! timestamps older than the window are dropped; the call is admitted only if
//! fewer than `max_events` remain, in which case the current time is recorded.
//!
//! Timestamps use `tokio::time::Instant` so paused-clock tests can drive the
//! window deterministically.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::time::Instant;

/// Per-identifier sliding-window limiter
#[derive(Debug, Clone)]
pub struct RateLimiter {
    window: Duration,
    max_events: usize,
    hits: HashMap<String, VecDeque<Instant>>,
}

impl RateLimiter {
    /// Admit at most `max_events` per `window` for each identifier
    pub fn new(window: Duration, max_events: usize) -> Self {
        Self {
            window,
            max_events,
            hits: HashMap::new(),
        }
    }

    /// Window length
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Admission ceiling per window
    pub fn max_events(&self) -> usize {
        self.max_events
    }

    /// Check and record one admission for `id` at the current time
    pub fn is_allowed(&mut self, id: &str) -> bool {
        self.is_allowed_at(id, Instant::now())
    }

    /// Check and record one admission for `id` at `now`
    pub fn is_allowed_at(&mut self, id: &str, now: Instant) -> bool {
        let window = self.window;
        let hits = self.hits.entry(id.to_string()).or_default();
        expire(hits, now, window);

        if hits.len() >= self.max_events {
            return false;
        }
        hits.push_back(now);
        true
    }

    /// Admissions left for `id` in the current window
    pub fn remaining(&mut self, id: &str) -> usize {
        let window = self.window;
        match self.hits.get_mut(id) {
            Some(hits) => {
                expire(hits, Instant::now(), window);
                self.max_events.saturating_sub(hits.len())
            }
            None => self.max_events,
        }
    }

    /// Forget all recorded timestamps
    pub fn reset(&mut self) {
        self.hits.clear();
    }
}

fn expire(hits: &mut VecDeque<Instant>, now: Instant, window: Duration) {
    while let Some(&oldest) = hits.front() {
        if now.saturating_duration_since(oldest) >= window {
            hits.pop_front();
        } else {
            break;
        }
    }
}
