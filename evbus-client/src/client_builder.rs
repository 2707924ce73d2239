//! Builder for configuring a bus before connecting
//!
//! The `ClientBuilder` provides a fluent API over [`BusConfig`] plus the
//! pieces that are not plain data:
//! - A custom reconnection strategy, or none at all
//! - A custom [`Connector`] (tests, proxies, alternative transports)
//! - OpenTelemetry observability and client metrics
//!
//! # Examples
//!
//! ```rust,no_run
//! use evbus_client::{ClientBuilder, FixedDelay};
//! use std::time::Duration;
//!
//! # async fn example() -> evbus_core::Result<()> {
//! // Token auth with default backoff
//! let bus = ClientBuilder::new("ws://localhost:8080")
//!     .auth_token("secret")
//!     .connect()
//!     .await?;
//!
//! // Fixed retry delay and observability
//! let bus2 = ClientBuilder::new("ws://localhost:8080")
//!     .with_reconnect(Box::new(FixedDelay::new(Duration::from_secs(2))))
//!     .with_default_observability()
//!     .service_name("map-dashboard")
//!     .connect()
//!     .await?;
//! # Ok(())
//! # }
//! ```

use crate::bus::{default_strategy, EventBus};
use crate::config::BusConfig;
use crate::metrics::ClientMetrics;
use crate::reconnect::{NoReconnect, ReconnectionStrategy};
use crate::transport::{Connector, WsConnector};
use evbus_core::{Error, ObservabilityConfig, Result, ValidationLimits};
use std::sync::Arc;
use std::time::Duration;

/// Builder for configuring and creating an [`EventBus`]
pub struct ClientBuilder {
    config: BusConfig,
    reconnect_strategy: Option<Box<dyn ReconnectionStrategy>>,
    connector: Option<Arc<dyn Connector>>,
    observability_config: Option<ObservabilityConfig>,
    service_name: Option<String>,
    enable_metrics: bool,
}

impl ClientBuilder {
    /// Create a builder with default settings for `url`
    pub fn new(url: impl Into<String>) -> Self {
        Self::from_config(BusConfig::new(url))
    }

    /// Start from an existing configuration, e.g. [`BusConfig::from_env`]
    pub fn from_config(config: BusConfig) -> Self {
        Self {
            config,
            reconnect_strategy: None,
            connector: None,
            observability_config: None,
            service_name: None,
            enable_metrics: false,
        }
    }

    pub fn client_id(mut self, client_id: impl Into<String>) -> Self {
        self.config = self.config.with_client_id(client_id);
        self
    }

    pub fn auth_token(mut self, token: impl Into<String>) -> Self {
        self.config = self.config.with_auth_token(token);
        self
    }

    pub fn default_source(mut self, source: impl Into<String>) -> Self {
        self.config = self.config.with_default_source(source);
        self
    }

    pub fn max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.config = self.config.with_max_reconnect_attempts(attempts);
        self
    }

    pub fn heartbeat_interval(mut self, interval: Duration) -> Self {
        self.config = self.config.with_heartbeat_interval(interval);
        self
    }

    pub fn heartbeat_timeout(mut self, timeout: Duration) -> Self {
        self.config = self.config.with_heartbeat_timeout(timeout);
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config = self.config.with_request_timeout(timeout);
        self
    }

    pub fn max_event_buffer_size(mut self, size: usize) -> Self {
        self.config = self.config.with_max_event_buffer_size(size);
        self
    }

    pub fn rate_limit(mut self, window: Duration, max_events: usize) -> Self {
        self.config = self.config.with_rate_limit(window, max_events);
        self
    }

    pub fn max_auth_retries(mut self, retries: u32) -> Self {
        self.config = self.config.with_max_auth_retries(retries);
        self
    }

    pub fn validation_limits(mut self, limits: ValidationLimits) -> Self {
        self.config = self.config.with_validation_limits(limits);
        self
    }

    /// Replace the backoff derived from the configured delays
    ///
    /// `max_reconnect_attempts` still bounds the number of attempts.
    pub fn with_reconnect(mut self, strategy: Box<dyn ReconnectionStrategy>) -> Self {
        self.reconnect_strategy = Some(strategy);
        self
    }

    /// Never reconnect after a transport loss
    pub fn without_reconnect(mut self) -> Self {
        self.reconnect_strategy = Some(Box::new(NoReconnect));
        self
    }

    /// Open transports with a custom connector instead of WebSocket
    pub fn with_connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Record client metrics on the global meter provider
    pub fn with_metrics(mut self) -> Self {
        self.enable_metrics = true;
        self
    }

    /// Enable OpenTelemetry observability with custom configuration
    ///
    /// Implies [`with_metrics`](Self::with_metrics).
    pub fn with_observability(mut self, config: ObservabilityConfig) -> Self {
        self.observability_config = Some(config);
        self
    }

    /// Enable OpenTelemetry observability with default configuration
    pub fn with_default_observability(mut self) -> Self {
        self.observability_config = Some(ObservabilityConfig::default());
        self
    }

    /// Set service name for observability (used if observability is enabled)
    pub fn service_name(mut self, name: impl Into<String>) -> Self {
        self.service_name = Some(name.into());
        self
    }

    /// Create the bus without connecting
    ///
    /// # Errors
    ///
    /// Returns `Error::Internal` when observability was requested and cannot
    /// be initialized.
    pub fn build(self) -> Result<EventBus> {
        let telemetry = match self.observability_config {
            Some(mut config) => {
                if let Some(name) = self.service_name {
                    config.service_name = name;
                }
                let guard = evbus_core::init_observability(config).map_err(|e| {
                    Error::Internal(format!("Failed to initialize observability: {}", e))
                })?;
                Some(guard)
            }
            None => None,
        };

        let metrics = (self.enable_metrics || telemetry.is_some())
            .then(|| Arc::new(ClientMetrics::new()));

        let strategy = self
            .reconnect_strategy
            .unwrap_or_else(|| default_strategy(&self.config));
        let connector = self
            .connector
            .unwrap_or_else(|| Arc::new(WsConnector) as Arc<dyn Connector>);

        Ok(EventBus::from_parts(
            self.config,
            connector,
            strategy,
            metrics,
            telemetry,
        ))
    }

    /// Build the bus and open the first connection
    ///
    /// # Errors
    ///
    /// Fails when observability cannot be initialized or the first transport
    /// cannot be opened.
    pub async fn connect(self) -> Result<EventBus> {
        let bus = self.build()?;
        tracing::info!(url = %bus.config().url, client_id = %bus.client_id(), "Connecting to endpoint");
        bus.connect().await?;
        Ok(bus)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconnect::FixedDelay;
    use crate::transport::memory::MemoryConnector;
    use crate::ConnectionStatus;

    #[test]
    fn test_builder_defaults() {
        let builder = ClientBuilder::new("ws://localhost:8080");

        assert_eq!(builder.config.url, "ws://localhost:8080");
        assert!(builder.reconnect_strategy.is_none());
        assert!(builder.connector.is_none());
        assert!(builder.observability_config.is_none());
        assert!(builder.service_name.is_none());
        assert!(!builder.enable_metrics);
    }

    #[test]
    fn test_builder_forwards_config() {
        let builder = ClientBuilder::new("ws://example.com:9000/bus")
            .client_id("dashboard-1")
            .auth_token("secret")
            .default_source("dashboard")
            .max_reconnect_attempts(9)
            .heartbeat_interval(Duration::from_secs(5))
            .heartbeat_timeout(Duration::from_secs(12))
            .request_timeout(Duration::from_secs(2))
            .max_event_buffer_size(7)
            .rate_limit(Duration::from_secs(10), 50)
            .max_auth_retries(1);

        let config = &builder.config;
        assert_eq!(config.client_id, "dashboard-1");
        assert_eq!(config.auth_token.as_deref(), Some("secret"));
        assert_eq!(config.default_source, "dashboard");
        assert_eq!(config.max_reconnect_attempts, 9);
        assert_eq!(config.heartbeat_interval, Duration::from_secs(5));
        assert_eq!(config.heartbeat_timeout, Some(Duration::from_secs(12)));
        assert_eq!(config.request_timeout, Duration::from_secs(2));
        assert_eq!(config.max_event_buffer_size, 7);
        assert_eq!(config.rate_limit_window, Duration::from_secs(10));
        assert_eq!(config.max_events_per_window, 50);
        assert_eq!(config.max_auth_retries, 1);
    }

    #[test]
    fn test_builder_with_reconnect() {
        let strategy = Box::new(FixedDelay::new(Duration::from_millis(500)).with_max_attempts(10));
        let builder = ClientBuilder::new("ws://localhost:8080").with_reconnect(strategy);
        assert!(builder.reconnect_strategy.is_some());

        let builder = builder.without_reconnect();
        assert!(builder.reconnect_strategy.is_some());
    }

    #[test]
    fn test_builder_observability_config() {
        let config = ObservabilityConfig::new("test-client")
            .with_endpoint("http://localhost:4317")
            .with_log_level("debug");

        let builder = ClientBuilder::new("ws://localhost:8080")
            .with_observability(config)
            .service_name("renamed");

        let obs_config = builder.observability_config.as_ref().unwrap();
        assert_eq!(obs_config.service_name, "test-client");
        assert_eq!(obs_config.log_level, "debug");
        assert_eq!(builder.service_name.as_deref(), Some("renamed"));
    }

    #[tokio::test]
    async fn test_build_does_not_connect() {
        let (connector, _peers) = MemoryConnector::new();
        let bus = ClientBuilder::new("memory://bus")
            .with_connector(connector.clone())
            .with_metrics()
            .build()
            .unwrap();

        assert_eq!(bus.connection_status(), ConnectionStatus::Disconnected);
        assert_eq!(connector.attempts(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_without_reconnect_stays_down() {
        let (connector, _peers) = MemoryConnector::new();
        connector.refuse(true);

        let result = ClientBuilder::new("memory://bus")
            .with_connector(connector.clone())
            .without_reconnect()
            .build()
            .unwrap()
            .connect()
            .await;
        assert!(result.is_err());

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(connector.attempts(), 1);
    }

    #[tokio::test]
    async fn test_connect_returns_live_bus() {
        let (connector, mut peers) = MemoryConnector::new();
        let bus = ClientBuilder::new("memory://bus")
            .client_id("builder-test")
            .with_connector(connector)
            .connect()
            .await
            .unwrap();

        assert!(bus.is_authenticated());
        assert_eq!(bus.client_id(), "builder-test");
        assert!(peers.recv().await.is_some());
    }
}
