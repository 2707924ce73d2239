//! evbus - Secure Event Bus over WebSocket
//!
//! This is the convenience crate that re-exports the evbus sub-crates. Use it
//! when you want a single dependency for the event types and the client.
//!
//! # Architecture
//!
//! evbus is organized into modular crates:
//!
//! - **evbus-core**: Event types, wire frames, codec, validation, errors,
//!   observability
//! - **evbus-client**: The [`EventBus`] client with auth, reconnection,
//!   offline buffering, rate limiting and request/reply
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use evbus::{BusConfig, EventBus, EventType, PublishOptions};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let bus = EventBus::new(BusConfig::from_env()?);
//!     bus.connect().await?;
//!
//!     let _status = bus
//!         .subscribe(EventType::SystemStatus, |event| async move {
//!             println!("Status: {}", event.payload());
//!         })
//!         .await;
//!
//!     bus.publish_event(
//!         EventType::MapLayerToggled,
//!         json!({"layer": "rivers", "visible": true}),
//!         PublishOptions::new().with_source("layer_panel"),
//!     )
//!     .await?;
//!
//!     Ok(())
//! }
//! ```

// Re-export the sub-crates under short names
pub use evbus_client as client;
pub use evbus_core as core;

// Convenience re-exports of the most commonly used types
pub use evbus_client::{BusConfig, ClientBuilder, ConnectionStatus, EventBus, PublishOptions};
pub use evbus_core::{Error, Event, EventType, Result};
