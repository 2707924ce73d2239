//! OpenTelemetry observability configuration and initialization
//!
//! This module wires the `tracing` macros used throughout evbus to an
//! OpenTelemetry pipeline exporting over OTLP/gRPC.
//!
//! # Overview
//!
//! - **Traces**: spans from `#[tracing::instrument]` on bus entry points
//!   (`connect`, `publish_event`, `request_reply`, ...)
//! - **Metrics**: counters and histograms recorded by the client's
//!   `ClientMetrics`
//! - **Logs**: structured JSON lines on stdout, filtered by `RUST_LOG`
//!
//! # Usage Pattern
//!
//! Initialize once at application startup, before building any bus, and keep
//! the returned guard alive for the lifetime of the process:
//!
//! ```rust,no_run
//! use evbus_core::ObservabilityConfig;
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = ObservabilityConfig::new("hydro-dashboard")
//!         .with_endpoint("http://localhost:4317")
//!         .with_log_level("debug");
//!
//!     let guard = evbus_core::init_observability(config).expect("Failed to init observability");
//!
//!     // ... run your application ...
//!
//!     guard.shutdown();
//! }
//! ```
//!
//! # Environment Variables
//!
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: Collector endpoint
//! - `RUST_LOG`: Log level filter (e.g., "info", "evbus_client=debug")

use opentelemetry::{global, KeyValue};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::metrics::SdkMeterProvider;
use opentelemetry_sdk::trace::SdkTracerProvider;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Error type returned by observability setup
pub type ObservabilityError = Box<dyn std::error::Error + Send + Sync>;

/// Observability configuration for OpenTelemetry
///
/// # Defaults
///
/// - Service name: "evbus"
/// - Service version: current crate version
/// - OTLP endpoint: `$OTEL_EXPORTER_OTLP_ENDPOINT` or "http://localhost:4317"
/// - Traces, metrics and logs enabled
/// - Log level: `$RUST_LOG` or "info"
///
/// # Examples
///
/// ```rust
/// use evbus_core::ObservabilityConfig;
///
/// let config = ObservabilityConfig::new("map-client")
///     .with_endpoint("http://collector:4317")
///     .with_metrics(false);
/// assert_eq!(config.service_name, "map-client");
/// ```
#[derive(Debug, Clone)]
pub struct ObservabilityConfig {
    /// Service name attached to every span and metric
    pub service_name: String,

    /// Service version attached to every span and metric
    pub service_version: String,

    /// OTLP/gRPC collector endpoint
    pub otlp_endpoint: String,

    /// Export spans over OTLP
    pub enable_traces: bool,

    /// Export metrics over OTLP
    pub enable_metrics: bool,

    /// Emit structured JSON logs on stdout
    pub enable_logs: bool,

    /// Filter directive used when `RUST_LOG` is unset
    pub log_level: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            service_name: "evbus".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            otlp_endpoint: std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT")
                .unwrap_or_else(|_| "http://localhost:4317".to_string()),
            enable_traces: true,
            enable_metrics: true,
            enable_logs: true,
            log_level: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
        }
    }
}

impl ObservabilityConfig {
    /// Create a new configuration with a custom service name
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            ..Default::default()
        }
    }

    /// Set the OTLP collector endpoint
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.otlp_endpoint = endpoint.into();
        self
    }

    /// Set the log level filter ("error", "warn", "info", "debug", "trace")
    pub fn with_log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    /// Set the service version
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.service_version = version.into();
        self
    }

    /// Enable or disable distributed tracing
    pub fn with_traces(mut self, enable: bool) -> Self {
        self.enable_traces = enable;
        self
    }

    /// Enable or disable metrics collection
    pub fn with_metrics(mut self, enable: bool) -> Self {
        self.enable_metrics = enable;
        self
    }

    /// Enable or disable structured log output
    pub fn with_logs(mut self, enable: bool) -> Self {
        self.enable_logs = enable;
        self
    }

    fn resource(&self) -> opentelemetry_sdk::Resource {
        opentelemetry_sdk::Resource::builder_empty()
            .with_attributes(vec![
                KeyValue::new(
                    opentelemetry_semantic_conventions::resource::SERVICE_NAME,
                    self.service_name.clone(),
                ),
                KeyValue::new(
                    opentelemetry_semantic_conventions::resource::SERVICE_VERSION,
                    self.service_version.clone(),
                ),
            ])
            .build()
    }
}

/// Handle to the installed providers
///
/// Dropping the guard leaves the providers installed; call
/// [`ObservabilityGuard::shutdown`] to flush pending telemetry before exit.
#[derive(Debug, Default)]
pub struct ObservabilityGuard {
    tracer_provider: Option<SdkTracerProvider>,
    meter_provider: Option<SdkMeterProvider>,
}

impl ObservabilityGuard {
    /// Flush and shut down every provider installed by `init_observability`
    pub fn shutdown(self) {
        tracing::info!("Shutting down OpenTelemetry");

        if let Some(provider) = self.tracer_provider {
            if let Err(e) = provider.shutdown() {
                tracing::warn!(error = %e, "Tracer provider shutdown failed");
            }
        }
        if let Some(provider) = self.meter_provider {
            if let Err(e) = provider.shutdown() {
                tracing::warn!(error = %e, "Meter provider shutdown failed");
            }
        }
    }

    pub fn traces_enabled(&self) -> bool {
        self.tracer_provider.is_some()
    }

    pub fn metrics_enabled(&self) -> bool {
        self.meter_provider.is_some()
    }
}

/// Initialize OpenTelemetry with the given configuration
///
/// Installs the global tracer and meter providers (when enabled) and a
/// `tracing` subscriber. Call this once per process; a second call fails
/// because the global subscriber is already set.
///
/// # Errors
///
/// - the OTLP exporters cannot be built
/// - the log filter directive is invalid
/// - a global subscriber is already installed
pub fn init_observability(
    config: ObservabilityConfig,
) -> Result<ObservabilityGuard, ObservabilityError> {
    let mut guard = ObservabilityGuard::default();

    let tracer = if config.enable_traces {
        let (provider, tracer) = init_tracer(&config)?;
        guard.tracer_provider = Some(provider);
        Some(tracer)
    } else {
        None
    };

    if config.enable_metrics {
        guard.meter_provider = Some(init_metrics(&config)?);
    }

    init_tracing_subscriber(&config, tracer)?;

    tracing::info!(
        service_name = %config.service_name,
        otlp_endpoint = %config.otlp_endpoint,
        traces = config.enable_traces,
        metrics = config.enable_metrics,
        logs = config.enable_logs,
        "OpenTelemetry initialized"
    );

    Ok(guard)
}

fn init_tracer(
    config: &ObservabilityConfig,
) -> Result<(SdkTracerProvider, opentelemetry_sdk::trace::Tracer), ObservabilityError> {
    use opentelemetry::trace::TracerProvider as _;
    use opentelemetry_sdk::trace::{RandomIdGenerator, Sampler};

    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(config.otlp_endpoint.clone())
        .build()?;

    let provider = SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .with_resource(config.resource())
        .with_sampler(Sampler::AlwaysOn)
        .with_id_generator(RandomIdGenerator::default())
        .build();

    // The subscriber layer needs the tracer before the provider goes global.
    let tracer = provider.tracer(config.service_name.clone());
    global::set_tracer_provider(provider.clone());

    Ok((provider, tracer))
}

fn init_metrics(config: &ObservabilityConfig) -> Result<SdkMeterProvider, ObservabilityError> {
    let exporter = opentelemetry_otlp::MetricExporter::builder()
        .with_tonic()
        .with_endpoint(config.otlp_endpoint.clone())
        .build()?;

    let reader = opentelemetry_sdk::metrics::PeriodicReader::builder(exporter)
        .with_interval(Duration::from_secs(30))
        .build();

    let provider = SdkMeterProvider::builder()
        .with_reader(reader)
        .with_resource(config.resource())
        .build();

    global::set_meter_provider(provider.clone());
    Ok(provider)
}

/// Install the `tracing` subscriber: optional OpenTelemetry layer, env
/// filter, optional JSON fmt layer.
fn init_tracing_subscriber(
    config: &ObservabilityConfig,
    tracer: Option<opentelemetry_sdk::trace::Tracer>,
) -> Result<(), ObservabilityError> {
    let env_filter =
        EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&config.log_level))?;

    let telemetry_layer = tracer.map(|tracer| tracing_opentelemetry::layer().with_tracer(tracer));

    let fmt_layer = config.enable_logs.then(|| {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_thread_ids(true)
            .with_line_number(true)
            .json()
    });

    tracing_subscriber::registry()
        .with(telemetry_layer)
        .with(env_filter)
        .with(fmt_layer)
        .try_init()?;

    Ok(())
}
