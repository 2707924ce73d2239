//! Connection status and reconnection scheduling
//!
//! # Connection States
//!
//! - **Disconnected**: Initial state, or the transport closed cleanly
//! - **Connecting**: A transport is being opened
//! - **Connected**: The transport is open, authentication not yet started
//! - **Authenticating**: Credentials sent, awaiting the verdict
//! - **Authenticated**: Fully operational
//! - **Reconnecting**: A reconnect timer is pending
//! - **Error**: The transport failed to open or failed while open
//!
//! # State Transitions
//!
//! ```text
//! Disconnected → Connecting → Connected → Authenticating → Authenticated
//!       ↑             ↓           (no token) ─────────────────↗    ↓
//!       │           Error ──→ Reconnecting ──→ Connecting    transport lost
//!       └──────────────────────── disconnect() ←─────────────────────┘
//! ```
//!
//! # Reconnection Logic
//!
//! Every transport loss or failed open asks the [`ReconnectScheduler`] for a
//! delay. The scheduler increments its attempt counter, refuses once the
//! configured ceiling is reached, and otherwise consults the
//! [`ReconnectionStrategy`]. At most one reconnect timer is pending at a time.

use crate::reconnect::ReconnectionStrategy;
use std::fmt;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Lifecycle status of the bus
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionStatus {
    /// Not connected
    Disconnected,
    /// Opening a transport
    Connecting,
    /// Transport open, not yet authenticated
    Connected,
    /// Credentials sent, awaiting verdict
    Authenticating,
    /// Fully operational
    Authenticated,
    /// A reconnect timer is pending
    Reconnecting,
    /// Transport failure
    Error,
}

impl ConnectionStatus {
    /// Lowercase name used in logs
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionStatus::Disconnected => "disconnected",
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::Authenticating => "authenticating",
            ConnectionStatus::Authenticated => "authenticated",
            ConnectionStatus::Reconnecting => "reconnecting",
            ConnectionStatus::Error => "error",
        }
    }

    /// True while a transport is being opened or is open
    ///
    /// `connect()` is a no-op in these states.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            ConnectionStatus::Connecting
                | ConnectionStatus::Connected
                | ConnectionStatus::Authenticating
                | ConnectionStatus::Authenticated
        )
    }

    /// Numeric value exported on the connection state gauge
    pub fn gauge_value(&self) -> i64 {
        match self {
            ConnectionStatus::Disconnected => 0,
            ConnectionStatus::Connecting => 1,
            ConnectionStatus::Connected => 2,
            ConnectionStatus::Authenticating => 3,
            ConnectionStatus::Authenticated => 4,
            ConnectionStatus::Reconnecting => 5,
            ConnectionStatus::Error => 6,
        }
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Attempt counter plus the single pending reconnect timer
pub struct ReconnectScheduler {
    strategy: Box<dyn ReconnectionStrategy>,
    max_attempts: u32,
    attempts: u32,
    pending: Option<JoinHandle<()>>,
}

impl ReconnectScheduler {
    /// Create a scheduler allowing at most `max_attempts` consecutive attempts
    pub fn new(strategy: Box<dyn ReconnectionStrategy>, max_attempts: u32) -> Self {
        Self {
            strategy,
            max_attempts,
            attempts: 0,
            pending: None,
        }
    }

    /// Consecutive attempts since the last reset
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Maximum consecutive attempts
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// True while a reconnect timer is outstanding
    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Claim the next attempt
    ///
    /// Returns the delay to wait, or `None` once the ceiling is reached or the
    /// strategy gives up. The counter only advances when a delay is returned.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempts >= self.max_attempts {
            return None;
        }
        let delay = self.strategy.next_delay(self.attempts)?;
        self.attempts += 1;
        Some(delay)
    }

    /// Track the timer task for the claimed attempt
    pub fn set_pending(&mut self, handle: JoinHandle<()>) {
        self.cancel();
        self.pending = Some(handle);
    }

    /// Forget the pending timer without aborting it
    ///
    /// Called by the timer task itself once it fires.
    pub fn clear_pending(&mut self) {
        self.pending = None;
    }

    /// Abort the pending timer, if any
    pub fn cancel(&mut self) {
        if let Some(handle) = self.pending.take() {
            handle.abort();
        }
    }

    /// Reset the counter and the strategy
    pub fn reset(&mut self) {
        self.attempts = 0;
        self.strategy.reset();
    }
}

impl fmt::Debug for ReconnectScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReconnectScheduler")
            .field("max_attempts", &self.max_attempts)
            .field("attempts", &self.attempts)
            .field("pending", &self.pending.is_some())
            .finish()
    }
}
