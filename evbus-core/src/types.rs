//! Event types carried by the bus
//!
//! This module defines the atomic message unit of the bus, the [`Event`], and
//! the closed enumeration of event types it may carry.
//!
//! # Event Types
//!
//! Event types are a closed, versioned set of `domain.verb` names. Anything
//! outside the set is rejected on the receive path rather than ignored, so a
//! server running a newer schema cannot smuggle unknown traffic to handlers.
//!
//! # Immutability
//!
//! `Event` fields are private and exposed through accessors. An event is
//! stamped with its id and timestamp exactly once, at construction, and every
//! subscriber receives its own owned copy.
//!
//! # Raw Events
//!
//! [`RawEvent`] mirrors the inbound wire shape with the type left as a plain
//! string. It is the only form in which unvalidated data exists; conversion
//! into an `Event` happens in the validator.

use crate::error::ValidationError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Closed enumeration of event types understood by the bus
///
/// The wire representation is the `domain.verb` string returned by
/// [`EventType::as_str`]. Bump [`EventType::SCHEMA_VERSION`] whenever a
/// variant is added or removed.
///
/// # Examples
///
/// ```rust
/// use evbus_core::EventType;
///
/// let ty: EventType = "map.viewport_changed".parse().unwrap();
/// assert_eq!(ty, EventType::MapViewportChanged);
/// assert!("map.exploded".parse::<EventType>().is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    /// The visible map area changed
    #[serde(rename = "map.viewport_changed")]
    MapViewportChanged,
    /// A map layer was shown or hidden
    #[serde(rename = "map.layer_toggled")]
    MapLayerToggled,
    /// A feature on the map was selected
    #[serde(rename = "map.feature_selected")]
    MapFeatureSelected,
    /// A knowledge-graph search was requested
    #[serde(rename = "graph.search_requested")]
    GraphSearchRequested,
    /// Results for a knowledge-graph search
    #[serde(rename = "graph.search_results")]
    GraphSearchResults,
    /// A graph node was selected
    #[serde(rename = "graph.node_selected")]
    GraphNodeSelected,
    /// A graph node was modified
    #[serde(rename = "graph.node_updated")]
    GraphNodeUpdated,
    /// A hydrological alert was raised
    #[serde(rename = "hydro.alert_raised")]
    HydroAlertRaised,
    /// A hydrological alert was cleared
    #[serde(rename = "hydro.alert_cleared")]
    HydroAlertCleared,
    /// A new sensor reading is available
    #[serde(rename = "hydro.reading_updated")]
    HydroReadingUpdated,
    /// Component status report
    #[serde(rename = "system.status")]
    SystemStatus,
    /// User-facing notification
    #[serde(rename = "system.notification")]
    SystemNotification,
    /// Error reported by another component
    #[serde(rename = "system.error")]
    SystemError,
}

impl EventType {
    /// Version of the event-type enumeration
    pub const SCHEMA_VERSION: u32 = 1;

    /// Every known event type, in declaration order
    pub const ALL: [EventType; 13] = [
        EventType::MapViewportChanged,
        EventType::MapLayerToggled,
        EventType::MapFeatureSelected,
        EventType::GraphSearchRequested,
        EventType::GraphSearchResults,
        EventType::GraphNodeSelected,
        EventType::GraphNodeUpdated,
        EventType::HydroAlertRaised,
        EventType::HydroAlertCleared,
        EventType::HydroReadingUpdated,
        EventType::SystemStatus,
        EventType::SystemNotification,
        EventType::SystemError,
    ];

    /// Wire name of this event type
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::MapViewportChanged => "map.viewport_changed",
            EventType::MapLayerToggled => "map.layer_toggled",
            EventType::MapFeatureSelected => "map.feature_selected",
            EventType::GraphSearchRequested => "graph.search_requested",
            EventType::GraphSearchResults => "graph.search_results",
            EventType::GraphNodeSelected => "graph.node_selected",
            EventType::GraphNodeUpdated => "graph.node_updated",
            EventType::HydroAlertRaised => "hydro.alert_raised",
            EventType::HydroAlertCleared => "hydro.alert_cleared",
            EventType::HydroReadingUpdated => "hydro.reading_updated",
            EventType::SystemStatus => "system.status",
            EventType::SystemNotification => "system.notification",
            EventType::SystemError => "system.error",
        }
    }

    /// Domain part of the name (`map`, `graph`, `hydro`, `system`)
    pub fn domain(&self) -> &'static str {
        let name = self.as_str();
        name.split_once('.').map(|(domain, _)| domain).unwrap_or(name)
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventType::ALL
            .iter()
            .copied()
            .find(|ty| ty.as_str() == s)
            .ok_or_else(|| ValidationError::UnknownEventType(s.to_string()))
    }
}

/// The atomic message unit exchanged over the bus
///
/// # Examples
///
/// ```rust
/// use evbus_core::{Event, EventType};
/// use serde_json::json;
///
/// let event = Event::new(EventType::SystemStatus, "dashboard", json!({"ok": true}))
///     .with_correlation_id("req-1");
///
/// assert_eq!(event.event_type(), EventType::SystemStatus);
/// assert_eq!(event.correlation_id(), Some("req-1"));
/// assert!(event.user_id().is_none());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    id: String,
    #[serde(rename = "type")]
    event_type: EventType,
    source: String,
    timestamp: DateTime<Utc>,
    #[serde(default)]
    payload: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    correlation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    reply_to: Option<EventType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    user_id: Option<String>,
}

impl Event {
    /// Create a new event with a fresh id and the current time
    pub fn new(
        event_type: EventType,
        source: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            event_type,
            source: source.into(),
            timestamp: Utc::now(),
            payload,
            correlation_id: None,
            reply_to: None,
            user_id: None,
        }
    }

    /// Attach a correlation id linking this event to a request
    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    /// Hint which event type a reply should use
    pub fn with_reply_to(mut self, reply_to: EventType) -> Self {
        self.reply_to = Some(reply_to);
        self
    }

    /// Stamp the authenticated user id
    ///
    /// The client only calls this once the session is authenticated.
    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn event_type(&self) -> EventType {
        self.event_type
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn payload(&self) -> &serde_json::Value {
        &self.payload
    }

    pub fn correlation_id(&self) -> Option<&str> {
        self.correlation_id.as_deref()
    }

    pub fn reply_to(&self) -> Option<EventType> {
        self.reply_to
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    /// Consume the event and return its payload
    pub fn into_payload(self) -> serde_json::Value {
        self.payload
    }
}

/// Inbound event exactly as received, before validation
///
/// The type fields are plain strings so that an unknown type surfaces as a
/// validation failure instead of a decode failure of the whole frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub source: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub payload: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

impl RawEvent {
    /// Resolve the type strings into a typed [`Event`]
    ///
    /// Only the enumeration is checked here; source and size limits are the
    /// validator's job.
    pub fn into_event(self) -> Result<Event, ValidationError> {
        let event_type = self.event_type.parse()?;
        let reply_to = self.reply_to.as_deref().map(str::parse).transpose()?;

        Ok(Event {
            id: self.id,
            event_type,
            source: self.source,
            timestamp: self.timestamp,
            payload: self.payload,
            correlation_id: self.correlation_id,
            reply_to,
            user_id: self.user_id,
        })
    }
}

impl From<&Event> for RawEvent {
    fn from(event: &Event) -> Self {
        Self {
            id: event.id.clone(),
            event_type: event.event_type.as_str().to_string(),
            source: event.source.clone(),
            timestamp: event.timestamp,
            payload: event.payload.clone(),
            correlation_id: event.correlation_id.clone(),
            reply_to: event.reply_to.map(|ty| ty.as_str().to_string()),
            user_id: event.user_id.clone(),
        }
    }
}

/// Identity granted by the remote endpoint after authentication
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TokenData {
    #[serde(rename = "userId")]
    pub user_id: String,
    #[serde(default)]
    pub permissions: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashSet;

    #[test]
    fn test_event_type_names_are_unique() {
        let names: HashSet<&str> = EventType::ALL.iter().map(|ty| ty.as_str()).collect();
        assert_eq!(names.len(), EventType::ALL.len());
    }

    #[test]
    fn test_event_type_serde_matches_as_str() {
        for ty in EventType::ALL {
            let json = serde_json::to_string(&ty).unwrap();
            assert_eq!(json, format!("\"{}\"", ty.as_str()));
            assert_eq!(ty.as_str().parse::<EventType>().unwrap(), ty);
        }
    }

    #[test]
    fn test_unknown_event_type_rejected() {
        let err = "map.teleported".parse::<EventType>().unwrap_err();
        assert_eq!(err, ValidationError::UnknownEventType("map.teleported".into()));
    }

    #[test]
    fn test_event_type_domain() {
        assert_eq!(EventType::HydroAlertRaised.domain(), "hydro");
        assert_eq!(EventType::GraphSearchResults.domain(), "graph");
    }

    #[test]
    fn test_event_ids_are_unique() {
        let a = Event::new(EventType::SystemStatus, "tester", json!(null));
        let b = Event::new(EventType::SystemStatus, "tester", json!(null));
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_event_wire_shape() {
        let event = Event::new(EventType::MapLayerToggled, "map_view", json!({"layer": "rivers"}))
            .with_reply_to(EventType::SystemStatus);
        let value = serde_json::to_value(&event).unwrap();

        assert_eq!(value["type"], "map.layer_toggled");
        assert_eq!(value["reply_to"], "system.status");
        assert!(value.get("correlation_id").is_none());
        assert!(value["timestamp"].as_str().unwrap().contains('T'));
    }

    #[test]
    fn test_raw_event_into_event() {
        let raw: RawEvent = serde_json::from_value(json!({
            "id": "evt-1",
            "type": "hydro.alert_raised",
            "source": "gauge_station",
            "timestamp": "2024-05-01T12:00:00Z",
            "payload": {"level": 4.2},
            "correlation_id": "c-1"
        }))
        .unwrap();

        let event = raw.into_event().unwrap();
        assert_eq!(event.id(), "evt-1");
        assert_eq!(event.event_type(), EventType::HydroAlertRaised);
        assert_eq!(event.correlation_id(), Some("c-1"));
        assert_eq!(event.payload()["level"], 4.2);
    }

    #[test]
    fn test_raw_event_with_unknown_reply_to() {
        let mut raw = RawEvent::from(&Event::new(EventType::SystemStatus, "tester", json!(1)));
        raw.reply_to = Some("nope.never".into());
        assert!(raw.into_event().is_err());
    }

    #[test]
    fn test_token_data_uses_camel_case_user_id() {
        let data: TokenData =
            serde_json::from_value(json!({"userId": "u-7", "permissions": ["read"]})).unwrap();
        assert_eq!(data.user_id, "u-7");
        assert_eq!(data.permissions, vec!["read".to_string()]);
    }
}
