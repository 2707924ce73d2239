//! Event validation and payload sanitization
//!
//! The validator is the boundary every event crosses, in both directions:
//!
//! - **Outbound**: the payload is first [sanitized](EventValidator::sanitize)
//!   and the resulting event is then [validated](EventValidator::validate).
//! - **Inbound**: the raw event is validated only. Inbound events are never
//!   rewritten; one that fails is dropped before it reaches any subscriber.
//!
//! # Checks
//!
//! - `type` must belong to the closed [`EventType`](crate::EventType) set
//! - `source` must match `[A-Za-z0-9_-]{3,32}`
//! - the serialized payload must fit in `max_payload_bytes` (1 MiB by default)
//!
//! # Sanitization
//!
//! Every string leaf and every object key is stripped of `< > ' " &` and then
//! truncated to `max_string_length` characters. Arrays and objects are walked
//! recursively; numbers, booleans and null pass through untouched.
//!
//! # Examples
//!
//! ```rust
//! use evbus_core::{EventValidator, Event, EventType};
//! use serde_json::json;
//!
//! let validator = EventValidator::default();
//! let clean = validator.sanitize(&json!({"<b>title</b>": "Tom & \"Jerry\""}));
//! assert_eq!(clean, json!({"btitle/b": "Tom  Jerry"}));
//!
//! let event = Event::new(EventType::SystemStatus, "dashboard", clean);
//! assert!(validator.validate(&event).is_ok());
//! ```

use crate::error::ValidationError;
use crate::types::{Event, RawEvent};

/// Characters removed from every string leaf and object key
pub const DENYLIST: [char; 5] = ['<', '>', '\'', '"', '&'];

/// Default serialized payload ceiling (1 MiB)
pub const DEFAULT_MAX_PAYLOAD_BYTES: usize = 1024 * 1024;

/// Default maximum length of a payload string, in characters
pub const DEFAULT_MAX_STRING_LENGTH: usize = 10_000;

/// Minimum source length
pub const MIN_SOURCE_LEN: usize = 3;

/// Maximum source length
pub const MAX_SOURCE_LEN: usize = 32;

/// Limits applied by the validator and sanitizer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidationLimits {
    /// Ceiling for the serialized payload, in bytes
    pub max_payload_bytes: usize,
    /// Strings longer than this are truncated, in characters
    pub max_string_length: usize,
}

impl Default for ValidationLimits {
    fn default() -> Self {
        Self {
            max_payload_bytes: DEFAULT_MAX_PAYLOAD_BYTES,
            max_string_length: DEFAULT_MAX_STRING_LENGTH,
        }
    }
}

/// Stateless validator/sanitizer parameterized by [`ValidationLimits`]
#[derive(Debug, Clone, Copy, Default)]
pub struct EventValidator {
    limits: ValidationLimits,
}

impl EventValidator {
    /// Create a validator with custom limits
    pub fn new(limits: ValidationLimits) -> Self {
        Self { limits }
    }

    /// The limits this validator enforces
    pub fn limits(&self) -> ValidationLimits {
        self.limits
    }

    /// Validate a typed event
    ///
    /// The type is already known to be in the enumeration, so only source and
    /// size are checked.
    pub fn validate(&self, event: &Event) -> Result<(), ValidationError> {
        if event.id().is_empty() {
            return Err(ValidationError::MissingField("id"));
        }
        validate_source(event.source())?;
        self.check_payload_size(event.payload())
    }

    /// Validate an inbound raw event and convert it into an [`Event`]
    ///
    /// This is the receive-path entry point: unknown types are rejected here.
    pub fn validate_raw(&self, raw: RawEvent) -> Result<Event, ValidationError> {
        if raw.id.is_empty() {
            return Err(ValidationError::MissingField("id"));
        }
        let event = raw.into_event()?;
        validate_source(event.source())?;
        self.check_payload_size(event.payload())?;
        Ok(event)
    }

    /// Recursively sanitize a payload
    pub fn sanitize(&self, payload: &serde_json::Value) -> serde_json::Value {
        sanitize_value(payload, self.limits.max_string_length)
    }

    fn check_payload_size(&self, payload: &serde_json::Value) -> Result<(), ValidationError> {
        let size = serde_json::to_vec(payload)
            .map_err(|e| ValidationError::NotSerializable(e.to_string()))?
            .len();

        if size > self.limits.max_payload_bytes {
            return Err(ValidationError::PayloadTooLarge {
                size,
                limit: self.limits.max_payload_bytes,
            });
        }
        Ok(())
    }
}

/// Check a source token against `[A-Za-z0-9_-]{3,32}`
pub fn validate_source(source: &str) -> Result<(), ValidationError> {
    let len = source.chars().count();
    let allowed = source
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');

    if !(MIN_SOURCE_LEN..=MAX_SOURCE_LEN).contains(&len) || !allowed {
        return Err(ValidationError::InvalidSource(source.to_string()));
    }
    Ok(())
}

/// Strip denylisted characters, then truncate to `max_len` characters
pub fn sanitize_string(input: &str, max_len: usize) -> String {
    input
        .chars()
        .filter(|c| !DENYLIST.contains(c))
        .take(max_len)
        .collect()
}

fn sanitize_value(value: &serde_json::Value, max_len: usize) -> serde_json::Value {
    use serde_json::Value;

    match value {
        Value::String(s) => Value::String(sanitize_string(s, max_len)),
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| sanitize_value(item, max_len))
                .collect(),
        ),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, item)| (sanitize_string(key, max_len), sanitize_value(item, max_len)))
                .collect(),
        ),
        other => other.clone(),
    }
}
