//! Secure event-bus client over WebSocket
//!
//! This crate provides the client side of a typed event bus. One
//! [`EventBus`] keeps a single long-lived connection to the remote endpoint
//! and layers publish/subscribe and request/reply on top of it.
//!
//! # Core Features
//!
//! - **Pub/Sub**: Publish typed events and register handlers per event type
//! - **Request/Reply**: Correlated requests with a timeout
//! - **Authentication**: Token handshake with bounded retries
//! - **Auto-Reconnection**: Exponential backoff with a bounded attempt count
//! - **Offline Buffer**: Events published while offline are sent on reconnect
//! - **Rate Limiting**: Sliding-window limit on outbound events
//! - **Heartbeat**: Periodic pings, with an optional liveness timeout
//! - **Validation**: Every event is validated and sanitized in both directions
//! - **Observability**: `tracing` spans and OpenTelemetry metrics
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use evbus_client::{BusConfig, EventBus, PublishOptions};
//! use evbus_core::EventType;
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let bus = EventBus::new(
//!         BusConfig::new("ws://localhost:8080").with_auth_token("secret"),
//!     );
//!     bus.connect().await?;
//!
//!     let _alerts = bus
//!         .subscribe(EventType::HydroAlertRaised, |event| async move {
//!             println!("Alert: {}", event.payload());
//!         })
//!         .await;
//!
//!     bus.publish_event(
//!         EventType::MapViewportChanged,
//!         json!({"zoom": 7}),
//!         PublishOptions::new().with_source("map_view"),
//!     )
//!     .await?;
//!
//!     let results = bus
//!         .request_reply(
//!             EventType::GraphSearchRequested,
//!             json!({"query": "river"}),
//!             EventType::GraphSearchResults,
//!             None,
//!         )
//!         .await?;
//!     println!("Results: {:?}", results.map(|event| event.into_payload()));
//!
//!     bus.disconnect().await;
//!     Ok(())
//! }
//! ```
//!
//! # With a Builder
//!
//! ```rust,no_run
//! use evbus_client::{ClientBuilder, ExponentialBackoff};
//! use std::time::Duration;
//!
//! # async fn example() -> evbus_core::Result<()> {
//! let bus = ClientBuilder::new("ws://localhost:8080")
//!     .auth_token("secret")
//!     .max_reconnect_attempts(10)
//!     .with_reconnect(Box::new(
//!         ExponentialBackoff::new(Duration::from_millis(100), Duration::from_secs(30))
//!             .with_jitter(),
//!     ))
//!     .with_metrics()
//!     .connect()
//!     .await?;
//! # Ok(())
//! # }
//! ```

mod buffer;
mod bus;
mod client_builder;
mod config;
mod connection_state;
mod correlator;
mod dispatcher;
mod heartbeat;
mod metrics;
mod rate_limit;
mod reconnect;
mod transport;

pub use buffer::OfflineBuffer;
pub use bus::{EventBus, PublishOptions, Subscription};
pub use client_builder::ClientBuilder;
pub use config::{generate_client_id, BusConfig, DEFAULT_SOURCE, DEFAULT_URL};
pub use connection_state::{ConnectionStatus, ReconnectScheduler};
pub use correlator::{Correlator, ReplyOutcome};
pub use dispatcher::{Dispatcher, EventHandlerFn, SubscriptionId, Unregistered};
pub use heartbeat::{HeartbeatMonitor, Tick};
pub use metrics::{ClientMetrics, METER_NAME};
pub use rate_limit::RateLimiter;
pub use reconnect::{ExponentialBackoff, FixedDelay, NoReconnect, ReconnectionStrategy};
pub use transport::{Connector, FrameSender, Transport, TransportEvent, WsConnector};
