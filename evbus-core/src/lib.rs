//! Core event types, wire frames and validation for evbus
//!
//! This crate holds everything about the event bus that does not depend on a
//! live connection:
//!
//! - **Types**: the [`Event`] message unit and the closed [`EventType`] set
//! - **Frames**: JSON wire frames exchanged with the remote endpoint
//! - **Codec**: encoding/decoding of frames
//! - **Validation**: the validator/sanitizer every event passes through
//! - **Error handling**: the shared error taxonomy
//! - **Observability**: OpenTelemetry and `tracing` setup
//!
//! # Architecture
//!
//! The crate is transport-agnostic. `evbus-client` builds the connection
//! manager, rate limiter, correlator and friends on top of it.
//!
//! # Example
//!
//! ```rust
//! use evbus_core::{codec, ClientFrame, Event, EventType, EventValidator};
//! use serde_json::json;
//!
//! let validator = EventValidator::default();
//! let payload = validator.sanitize(&json!({"station": "<gauge-7>"}));
//! let event = Event::new(EventType::HydroReadingUpdated, "gauge_feed", payload);
//! validator.validate(&event).unwrap();
//!
//! let json = codec::encode_client_frame(&ClientFrame::publish(&event)).unwrap();
//! assert!(json.contains("\"type\":\"publish_event\""));
//! ```

pub mod codec;
pub mod error;
pub mod frame;
pub mod observability;
pub mod types;
pub mod validation;

pub use error::{Error, Result, ValidationError};
pub use frame::{ClientFrame, PublishFrame, ServerFrame};
pub use observability::{init_observability, ObservabilityConfig, ObservabilityGuard};
pub use types::{Event, EventType, RawEvent, TokenData};
pub use validation::{EventValidator, ValidationLimits};
