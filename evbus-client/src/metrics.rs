//! Client metrics definitions
//!
//! OpenTelemetry instruments for monitoring a bus. They record against the
//! global meter provider, so nothing is exported unless the application
//! installed one (for example with `evbus_core::init_observability`).
//!
//! # Metrics Collected
//!
//! - **connection.state**: Current [`ConnectionStatus`](crate::ConnectionStatus) (gauge)
//! - **events.published**: Accepted publishes, by type and `sent`/`buffered`
//! - **events.evicted**: Events dropped from a full offline buffer
//! - **events.received**: Inbound events dispatched, by type
//! - **events.rejected**: Events refused by the validator, by direction
//! - **rate_limited**: Publishes refused by the rate limiter
//! - **requests.total** / **request.duration**: request/reply outcomes and latency
//! - **reconnection.attempts**: Scheduled reconnect attempts
//! - **auth.failures**: `auth_failed` frames received
//! - **errors.total**: Transport and protocol errors, by kind

use opentelemetry::{
    global,
    metrics::{Counter, Gauge, Histogram, Meter},
    KeyValue,
};

/// Instrumentation scope used by [`ClientMetrics::new`]
pub const METER_NAME: &str = "evbus-client";

/// Client metrics for monitoring
pub struct ClientMetrics {
    pub connection_state: Gauge<i64>,
    pub events_published: Counter<u64>,
    pub events_evicted: Counter<u64>,
    pub events_received: Counter<u64>,
    pub events_rejected: Counter<u64>,
    pub rate_limited: Counter<u64>,
    pub requests_total: Counter<u64>,
    pub request_duration: Histogram<f64>,
    pub reconnection_attempts: Counter<u64>,
    pub auth_failures: Counter<u64>,
    pub errors_total: Counter<u64>,
}

impl ClientMetrics {
    /// Create instruments on the global meter provider
    pub fn new() -> Self {
        let meter = global::meter(METER_NAME);
        Self::new_with_meter(&meter)
    }

    /// Create instruments on a specific meter
    pub fn new_with_meter(meter: &Meter) -> Self {
        Self {
            connection_state: meter
                .i64_gauge("evbus.client.connection.state")
                .with_description(
                    "Connection state (0=disconnected, 1=connecting, 2=connected, \
                     3=authenticating, 4=authenticated, 5=reconnecting, 6=error)",
                )
                .build(),
            events_published: meter
                .u64_counter("evbus.client.events.published")
                .with_description("Events accepted by publish_event")
                .build(),
            events_evicted: meter
                .u64_counter("evbus.client.events.evicted")
                .with_description("Events dropped from a full offline buffer")
                .build(),
            events_received: meter
                .u64_counter("evbus.client.events.received")
                .with_description("Inbound events dispatched to subscribers")
                .build(),
            events_rejected: meter
                .u64_counter("evbus.client.events.rejected")
                .with_description("Events refused by the validator")
                .build(),
            rate_limited: meter
                .u64_counter("evbus.client.rate_limited")
                .with_description("Publishes refused by the rate limiter")
                .build(),
            requests_total: meter
                .u64_counter("evbus.client.requests.total")
                .with_description("Total request/reply calls")
                .build(),
            request_duration: meter
                .f64_histogram("evbus.client.request.duration")
                .with_description("Request/reply duration in seconds")
                .build(),
            reconnection_attempts: meter
                .u64_counter("evbus.client.reconnection.attempts")
                .with_description("Total number of reconnection attempts")
                .build(),
            auth_failures: meter
                .u64_counter("evbus.client.auth.failures")
                .with_description("Authentication attempts rejected by the endpoint")
                .build(),
            errors_total: meter
                .u64_counter("evbus.client.errors.total")
                .with_description("Total number of errors encountered")
                .build(),
        }
    }

    pub fn update_connection_state(&self, state: i64) {
        self.connection_state.record(state, &[]);
    }

    /// Record an accepted publish; `outcome` is `sent` or `buffered`
    pub fn record_published(&self, event_type: &str, outcome: &'static str) {
        let attributes = &[
            KeyValue::new("event_type", event_type.to_string()),
            KeyValue::new("outcome", outcome),
        ];
        self.events_published.add(1, attributes);
    }

    pub fn record_evicted(&self) {
        self.events_evicted.add(1, &[]);
    }

    pub fn record_received(&self, event_type: &str) {
        let attributes = &[KeyValue::new("event_type", event_type.to_string())];
        self.events_received.add(1, attributes);
    }

    /// Record a validation failure; `direction` is `inbound` or `outbound`
    pub fn record_rejected(&self, direction: &'static str) {
        self.events_rejected
            .add(1, &[KeyValue::new("direction", direction)]);
    }

    pub fn record_rate_limited(&self) {
        self.rate_limited.add(1, &[]);
    }

    /// Record a request/reply outcome
    pub fn record_request(&self, request_type: &str, outcome: &'static str, duration_secs: f64) {
        let attributes = &[
            KeyValue::new("request_type", request_type.to_string()),
            KeyValue::new("outcome", outcome),
        ];
        self.requests_total.add(1, attributes);
        self.request_duration.record(duration_secs, attributes);
    }

    pub fn record_reconnection_attempt(&self) {
        self.reconnection_attempts.add(1, &[]);
    }

    pub fn record_auth_failure(&self) {
        self.auth_failures.add(1, &[]);
    }

    pub fn record_error(&self, error_type: &'static str) {
        self.errors_total
            .add(1, &[KeyValue::new("error_type", error_type)]);
    }
}

impl Default for ClientMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ConnectionStatus;

    #[test]
    fn test_metrics_without_provider_are_noops() {
        let metrics = ClientMetrics::new();

        metrics.update_connection_state(ConnectionStatus::Authenticated.gauge_value());
        metrics.record_published("system.status", "sent");
        metrics.record_published("system.status", "buffered");
        metrics.record_evicted();
        metrics.record_received("hydro.alert_raised");
        metrics.record_rejected("inbound");
        metrics.record_rate_limited();
        metrics.record_request("graph.search_requested", "reply", 0.05);
        metrics.record_reconnection_attempt();
        metrics.record_auth_failure();
        metrics.record_error("transport");
    }

    #[test]
    fn test_metrics_with_sdk_meter() {
        use opentelemetry::metrics::MeterProvider as _;

        let provider = opentelemetry_sdk::metrics::SdkMeterProvider::builder().build();
        let meter = provider.meter("evbus-client-test");
        let metrics = ClientMetrics::new_with_meter(&meter);

        for status in [
            ConnectionStatus::Disconnected,
            ConnectionStatus::Connecting,
            ConnectionStatus::Authenticated,
        ] {
            metrics.update_connection_state(status.gauge_value());
        }
        metrics.record_request("graph.search_requested", "timeout", 1.0);
    }
}
