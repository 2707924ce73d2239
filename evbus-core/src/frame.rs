//! Wire frames exchanged with the remote endpoint
//!
//! Every frame is a JSON object with a `type` discriminator. Frames sent by
//! the client are [`ClientFrame`]s, frames sent by the endpoint are
//! [`ServerFrame`]s.
//!
//! ```text
//! client → server   publish_event | subscribe | unsubscribe | ping | auth_request
//! server → client   event | pong | auth_success | auth_failed | error
//! ```
//!
//! Both enums implement `Serialize` and `Deserialize` so the same definitions
//! serve the client and any test double standing in for the endpoint.

use crate::types::{Event, EventType, RawEvent, TokenData};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Outbound publish payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishFrame {
    pub event_id: String,
    pub event_type: EventType,
    pub payload: serde_json::Value,
    pub source: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<EventType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

impl From<&Event> for PublishFrame {
    fn from(event: &Event) -> Self {
        Self {
            event_id: event.id().to_string(),
            event_type: event.event_type(),
            payload: event.payload().clone(),
            source: event.source().to_string(),
            timestamp: event.timestamp(),
            correlation_id: event.correlation_id().map(str::to_string),
            reply_to: event.reply_to(),
            user_id: event.user_id().map(str::to_string),
        }
    }
}

/// Frames sent from the client to the remote endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Publish an event to other clients
    PublishEvent(PublishFrame),
    /// Ask the endpoint to forward these event types
    Subscribe { event_types: Vec<EventType> },
    /// Stop forwarding these event types
    Unsubscribe { event_types: Vec<EventType> },
    /// Liveness probe
    Ping,
    /// Present credentials for this client
    AuthRequest { token: String, client_id: String },
}

impl ClientFrame {
    /// Build a publish frame for an event
    pub fn publish(event: &Event) -> Self {
        ClientFrame::PublishEvent(PublishFrame::from(event))
    }

    /// The `type` discriminator, for logging without exposing the body
    pub fn kind(&self) -> &'static str {
        match self {
            ClientFrame::PublishEvent(_) => "publish_event",
            ClientFrame::Subscribe { .. } => "subscribe",
            ClientFrame::Unsubscribe { .. } => "unsubscribe",
            ClientFrame::Ping => "ping",
            ClientFrame::AuthRequest { .. } => "auth_request",
        }
    }
}

/// Frames sent from the remote endpoint to the client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// An event forwarded from another client
    Event { event: RawEvent },
    /// Reply to a `ping`
    Pong,
    /// Credentials accepted
    AuthSuccess { token_data: TokenData },
    /// Credentials rejected
    AuthFailed {
        #[serde(default)]
        reason: String,
    },
    /// Endpoint-side error report
    Error { message: String },
}

impl ServerFrame {
    /// Wrap an event for delivery
    pub fn event(event: &Event) -> Self {
        ServerFrame::Event {
            event: RawEvent::from(event),
        }
    }
}
