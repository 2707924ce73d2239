//! Error types for evbus
//!
//! This module provides the error taxonomy shared by every evbus crate.
//! It defines two error types:
//!
//! - **Error**: Application-level errors returned by bus operations
//! - **ValidationError**: The specific reason an event was refused by the
//!   validator (wrapped by `Error::Validation`)
//!
//! # Error Categories
//!
//! - **Local, recoverable by the caller**: `Validation`, `RateLimited`.
//!   These are returned synchronously from `publish_event` so the caller can
//!   fix the payload or back off.
//! - **Connection-level**: `Auth`, `Transport`, `Disconnected`. These are
//!   handled internally by the reconnection machinery and normally surface only
//!   as connection status changes.
//! - **Processing**: `Serialization`, `Protocol`, `Config`, `Internal`.
//!
//! A request/reply timeout is deliberately *not* an error: it is reported as
//! `Ok(None)` so callers must branch on the absence of a reply.
//!
//! # Examples
//!
//! ```rust
//! use evbus_core::{Error, ValidationError};
//!
//! let error: Error = ValidationError::InvalidSource("x".into()).into();
//! assert!(error.is_validation());
//! ```

use thiserror::Error;

/// Result type for evbus operations
///
/// Used throughout the evbus crates for consistent error handling.
pub type Result<T> = std::result::Result<T, Error>;

/// Reason an event failed validation
///
/// Validation failures are never sent over the wire and never dispatched to
/// subscribers. Outbound, they are returned to the publisher; inbound, the
/// offending event is dropped and logged.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// The event type is not a member of the closed `EventType` enumeration
    #[error("unknown event type: {0}")]
    UnknownEventType(String),

    /// The source token does not match `[A-Za-z0-9_-]{3,32}`
    #[error("invalid event source: {0:?}")]
    InvalidSource(String),

    /// The serialized payload exceeds the configured ceiling
    #[error("payload too large: {size} bytes exceeds limit of {limit} bytes")]
    PayloadTooLarge {
        /// Serialized size of the rejected payload
        size: usize,
        /// Configured maximum size
        limit: usize,
    },

    /// The payload could not be serialized to JSON
    #[error("payload is not JSON-serializable: {0}")]
    NotSerializable(String),

    /// A required field was missing or empty
    #[error("missing required field: {0}")]
    MissingField(&'static str),
}

/// Application-level error type for evbus operations
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// The event was malformed, oversized or of a disallowed type
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// The caller exceeded its sliding-window quota
    ///
    /// This is a backpressure signal: the event was neither sent nor buffered.
    #[error("Rate limit exceeded for {client_id}: {limit} events per {window_ms}ms")]
    RateLimited {
        /// Client identifier the limit is keyed on
        client_id: String,
        /// Maximum events admitted per window
        limit: usize,
        /// Window length in milliseconds
        window_ms: u64,
    },

    /// Credentials were rejected by the remote endpoint
    #[error("Authentication error: {0}")]
    Auth(String),

    /// Socket-level failure (connect, read or write)
    #[error("Transport error: {0}")]
    Transport(String),

    /// The bus was disconnected while the operation was in flight
    #[error("Disconnected")]
    Disconnected,

    /// Serialization or deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A frame was well-formed JSON but not a recognised message
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Invalid configuration value
    #[error("Configuration error: {0}")]
    Config(String),

    /// Unexpected internal failure
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Returns true for validation failures
    pub fn is_validation(&self) -> bool {
        matches!(self, Error::Validation(_))
    }

    /// Returns true when the caller was rate limited
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Error::RateLimited { .. })
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}
