//! Reconnection delay strategies
//!
//! When the transport drops (or fails to open), the bus asks its strategy how
//! long to wait before the next attempt. The attempt ceiling itself is owned
//! by the bus configuration (`max_reconnect_attempts`); a strategy may give up
//! earlier by returning `None`.
//!
//! # Built-in Strategies
//!
//! - **ExponentialBackoff**: `base × 2^attempt`, capped (the default)
//! - **FixedDelay**: Constant delay between attempts
//! - **NoReconnect**: Never reconnect
//!
//! # Examples
//!
//! ```rust
//! use evbus_client::{ExponentialBackoff, ReconnectionStrategy};
//! use std::time::Duration;
//!
//! let mut backoff = ExponentialBackoff::new(Duration::from_secs(1), Duration::from_secs(30));
//! assert_eq!(backoff.next_delay(0), Some(Duration::from_secs(1)));
//! assert_eq!(backoff.next_delay(1), Some(Duration::from_secs(2)));
//! assert_eq!(backoff.next_delay(2), Some(Duration::from_secs(4)));
//! ```

use std::time::Duration;

/// Trait for reconnection strategies
///
/// # State Management
///
/// A strategy may keep state across attempts. `reset()` is called once the
/// bus reaches `Authenticated` again, or when the caller reconnects manually.
pub trait ReconnectionStrategy: Send + Sync {
    /// Returns the delay before the next reconnection attempt
    ///
    /// # Arguments
    ///
    /// * `attempt` - The attempt number (0-indexed)
    ///
    /// # Returns
    ///
    /// - `Some(duration)`: Wait this long before attempting reconnection
    /// - `None`: Give up
    fn next_delay(&mut self, attempt: u32) -> Option<Duration>;

    /// Reset the strategy state after a successful session
    fn reset(&mut self);
}

/// Exponential backoff with an upper bound and optional jitter
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    base_delay: Duration,
    max_delay: Duration,
    max_attempts: Option<u32>,
    jitter: bool,
}

impl ExponentialBackoff {
    /// Create a new exponential backoff strategy
    pub fn new(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            base_delay,
            max_delay,
            max_attempts: None,
            jitter: false,
        }
    }

    /// Give up after this many attempts, independently of the bus ceiling
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    /// Add a random 0-25% on top of each delay
    pub fn with_jitter(mut self) -> Self {
        self.jitter = true;
        self
    }

    /// Base delay for the first attempt
    pub fn base_delay(&self) -> Duration {
        self.base_delay
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(30))
    }
}

impl ReconnectionStrategy for ExponentialBackoff {
    fn next_delay(&mut self, attempt: u32) -> Option<Duration> {
        if let Some(max) = self.max_attempts {
            if attempt >= max {
                return None;
            }
        }

        // base * 2^attempt, saturating so large attempt counts hit the cap
        let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
        let base_ms = self.base_delay.as_millis() as u64;
        let delay = base_ms
            .saturating_mul(factor)
            .min(self.max_delay.as_millis() as u64);

        if self.jitter {
            use rand::Rng;
            let jitter_ms = rand::thread_rng().gen_range(0..=(delay / 4));
            return Some(Duration::from_millis(delay + jitter_ms));
        }

        Some(Duration::from_millis(delay))
    }

    fn reset(&mut self) {}
}

/// Fixed delay between attempts
#[derive(Debug, Clone)]
pub struct FixedDelay {
    delay: Duration,
    max_attempts: Option<u32>,
}

impl FixedDelay {
    /// Create a new fixed delay strategy
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            max_attempts: None,
        }
    }

    /// Give up after this many attempts
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }
}

impl ReconnectionStrategy for FixedDelay {
    fn next_delay(&mut self, attempt: u32) -> Option<Duration> {
        if let Some(max) = self.max_attempts {
            if attempt >= max {
                return None;
            }
        }
        Some(self.delay)
    }

    fn reset(&mut self) {}
}

/// Strategy that never reconnects
#[derive(Debug, Clone, Copy, Default)]
pub struct NoReconnect;

impl ReconnectionStrategy for NoReconnect {
    fn next_delay(&mut self, _attempt: u32) -> Option<Duration> {
        None
    }

    fn reset(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_backoff_doubles() {
        let mut strategy =
            ExponentialBackoff::new(Duration::from_millis(100), Duration::from_secs(10));

        assert_eq!(strategy.next_delay(0).unwrap(), Duration::from_millis(100));
        assert_eq!(strategy.next_delay(1).unwrap(), Duration::from_millis(200));
        assert_eq!(strategy.next_delay(2).unwrap(), Duration::from_millis(400));
        assert_eq!(strategy.next_delay(3).unwrap(), Duration::from_millis(800));
    }

    #[test]
    fn test_exponential_backoff_is_capped() {
        let mut strategy =
            ExponentialBackoff::new(Duration::from_millis(100), Duration::from_secs(1));

        assert_eq!(strategy.next_delay(10).unwrap(), Duration::from_secs(1));
        // Shift overflow must not panic
        assert_eq!(strategy.next_delay(200).unwrap(), Duration::from_secs(1));
    }

    #[test]
    fn test_exponential_backoff_max_attempts() {
        let mut strategy =
            ExponentialBackoff::new(Duration::from_millis(100), Duration::from_secs(10))
                .with_max_attempts(3);

        assert!(strategy.next_delay(0).is_some());
        assert!(strategy.next_delay(1).is_some());
        assert!(strategy.next_delay(2).is_some());
        assert!(strategy.next_delay(3).is_none());
    }

    #[test]
    fn test_exponential_backoff_is_stateless_across_reset() {
        let mut strategy = ExponentialBackoff::default();

        assert_eq!(strategy.next_delay(3), Some(Duration::from_secs(8)));
        strategy.reset();
        assert_eq!(strategy.next_delay(0), Some(Duration::from_secs(1)));
        assert_eq!(strategy.next_delay(3), Some(Duration::from_secs(8)));
    }

    #[test]
    fn test_exponential_backoff_jitter_bounds() {
        let mut strategy =
            ExponentialBackoff::new(Duration::from_millis(100), Duration::from_secs(10))
                .with_jitter();

        for _ in 0..50 {
            let delay = strategy.next_delay(0).unwrap();
            assert!(delay >= Duration::from_millis(100));
            assert!(delay <= Duration::from_millis(125));
        }
    }

    #[test]
    fn test_fixed_delay() {
        let mut strategy = FixedDelay::new(Duration::from_secs(1)).with_max_attempts(2);

        assert_eq!(strategy.next_delay(0).unwrap(), Duration::from_secs(1));
        assert_eq!(strategy.next_delay(1).unwrap(), Duration::from_secs(1));
        assert!(strategy.next_delay(2).is_none());
    }

    #[test]
    fn test_no_reconnect() {
        let mut strategy = NoReconnect;
        assert!(strategy.next_delay(0).is_none());
        assert!(strategy.next_delay(1).is_none());
    }
}
