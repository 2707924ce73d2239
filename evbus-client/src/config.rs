//! Bus configuration
//!
//! [`BusConfig`] holds every tunable of the bus. Values come from
//! [`BusConfig::default`], the `with_*` setters, or the environment via
//! [`BusConfig::from_env`].
//!
//! # Environment Variables
//!
//! | Variable                          | Field                    |
//! |-----------------------------------|--------------------------|
//! | `EVBUS_URL`                       | `url`                    |
//! | `EVBUS_CLIENT_ID`                 | `client_id`              |
//! | `EVBUS_AUTH_TOKEN`                | `auth_token`             |
//! | `EVBUS_DEFAULT_SOURCE`            | `default_source`         |
//! | `EVBUS_MAX_RECONNECT_ATTEMPTS`    | `max_reconnect_attempts` |
//! | `EVBUS_RECONNECT_DELAY_MS`        | `reconnect_base_delay`   |
//! | `EVBUS_RECONNECT_MAX_DELAY_MS`    | `reconnect_max_delay`    |
//! | `EVBUS_HEARTBEAT_INTERVAL_MS`     | `heartbeat_interval`     |
//! | `EVBUS_HEARTBEAT_TIMEOUT_MS`      | `heartbeat_timeout`      |
//! | `EVBUS_REQUEST_TIMEOUT_MS`        | `request_timeout`        |
//! | `EVBUS_MAX_EVENT_BUFFER_SIZE`     | `max_event_buffer_size`  |
//! | `EVBUS_RATE_LIMIT_WINDOW_MS`      | `rate_limit_window`      |
//! | `EVBUS_MAX_EVENTS_PER_WINDOW`     | `max_events_per_window`  |
//! | `EVBUS_MAX_AUTH_RETRIES`          | `max_auth_retries`       |
//!
//! Unset variables keep their default; unparsable ones are an error.

use evbus_core::{Error, Result, ValidationLimits};
use std::str::FromStr;
use std::time::Duration;

/// Default endpoint
pub const DEFAULT_URL: &str = "ws://localhost:8080";

/// Source stamped on events published without an explicit one
pub const DEFAULT_SOURCE: &str = "client";

/// Complete bus configuration
#[derive(Debug, Clone, PartialEq)]
pub struct BusConfig {
    /// WebSocket endpoint
    pub url: String,
    /// Identifier sent with authentication, also the rate-limit key
    pub client_id: String,
    /// Credential presented after connecting; `None` skips authentication
    pub auth_token: Option<String>,
    /// Source used when `PublishOptions` does not name one
    pub default_source: String,
    /// Consecutive reconnect attempts before giving up
    pub max_reconnect_attempts: u32,
    /// Delay before the first reconnect attempt
    pub reconnect_base_delay: Duration,
    /// Upper bound on the reconnect delay
    pub reconnect_max_delay: Duration,
    /// Add 0-25% random jitter to reconnect delays
    pub reconnect_jitter: bool,
    /// Ping period while authenticated
    pub heartbeat_interval: Duration,
    /// Treat the transport as dead when a ping goes unanswered this long
    pub heartbeat_timeout: Option<Duration>,
    /// Default `request_reply` deadline
    pub request_timeout: Duration,
    /// Offline buffer capacity
    pub max_event_buffer_size: usize,
    /// Rate-limit window
    pub rate_limit_window: Duration,
    /// Events admitted per window
    pub max_events_per_window: usize,
    /// Authentication retries before giving up
    pub max_auth_retries: u32,
    /// Validator and sanitizer limits
    pub validation: ValidationLimits,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_URL.to_string(),
            client_id: generate_client_id(),
            auth_token: None,
            default_source: DEFAULT_SOURCE.to_string(),
            max_reconnect_attempts: 5,
            reconnect_base_delay: Duration::from_secs(1),
            reconnect_max_delay: Duration::from_secs(30),
            reconnect_jitter: false,
            heartbeat_interval: Duration::from_secs(30),
            heartbeat_timeout: None,
            request_timeout: Duration::from_secs(10),
            max_event_buffer_size: 100,
            rate_limit_window: Duration::from_secs(60),
            max_events_per_window: 100,
            max_auth_retries: 3,
            validation: ValidationLimits::default(),
        }
    }
}

impl BusConfig {
    /// Default configuration for the given endpoint
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    /// Load configuration from `EVBUS_*` environment variables
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` when a variable is set but cannot be parsed.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(url) = lookup("EVBUS_URL") {
            config.url = url;
        }
        if let Some(client_id) = lookup("EVBUS_CLIENT_ID") {
            config.client_id = client_id;
        }
        if let Some(token) = lookup("EVBUS_AUTH_TOKEN") {
            config.auth_token = Some(token).filter(|t| !t.is_empty());
        }
        if let Some(source) = lookup("EVBUS_DEFAULT_SOURCE") {
            config.default_source = source;
        }
        if let Some(v) = parse(&lookup, "EVBUS_MAX_RECONNECT_ATTEMPTS")? {
            config.max_reconnect_attempts = v;
        }
        if let Some(v) = parse_millis(&lookup, "EVBUS_RECONNECT_DELAY_MS")? {
            config.reconnect_base_delay = v;
        }
        if let Some(v) = parse_millis(&lookup, "EVBUS_RECONNECT_MAX_DELAY_MS")? {
            config.reconnect_max_delay = v;
        }
        if let Some(v) = parse_millis(&lookup, "EVBUS_HEARTBEAT_INTERVAL_MS")? {
            config.heartbeat_interval = v;
        }
        if let Some(v) = parse_millis(&lookup, "EVBUS_HEARTBEAT_TIMEOUT_MS")? {
            config.heartbeat_timeout = Some(v);
        }
        if let Some(v) = parse_millis(&lookup, "EVBUS_REQUEST_TIMEOUT_MS")? {
            config.request_timeout = v;
        }
        if let Some(v) = parse(&lookup, "EVBUS_MAX_EVENT_BUFFER_SIZE")? {
            config.max_event_buffer_size = v;
        }
        if let Some(v) = parse_millis(&lookup, "EVBUS_RATE_LIMIT_WINDOW_MS")? {
            config.rate_limit_window = v;
        }
        if let Some(v) = parse(&lookup, "EVBUS_MAX_EVENTS_PER_WINDOW")? {
            config.max_events_per_window = v;
        }
        if let Some(v) = parse(&lookup, "EVBUS_MAX_AUTH_RETRIES")? {
            config.max_auth_retries = v;
        }

        Ok(config)
    }

    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = client_id.into();
        self
    }

    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    pub fn with_default_source(mut self, source: impl Into<String>) -> Self {
        self.default_source = source.into();
        self
    }

    pub fn with_max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.max_reconnect_attempts = attempts;
        self
    }

    pub fn with_reconnect_delay(mut self, base: Duration, max: Duration) -> Self {
        self.reconnect_base_delay = base;
        self.reconnect_max_delay = max;
        self
    }

    pub fn with_reconnect_jitter(mut self, jitter: bool) -> Self {
        self.reconnect_jitter = jitter;
        self
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    pub fn with_heartbeat_timeout(mut self, timeout: Duration) -> Self {
        self.heartbeat_timeout = Some(timeout);
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_max_event_buffer_size(mut self, size: usize) -> Self {
        self.max_event_buffer_size = size;
        self
    }

    pub fn with_rate_limit(mut self, window: Duration, max_events: usize) -> Self {
        self.rate_limit_window = window;
        self.max_events_per_window = max_events;
        self
    }

    pub fn with_max_auth_retries(mut self, retries: u32) -> Self {
        self.max_auth_retries = retries;
        self
    }

    pub fn with_validation_limits(mut self, limits: ValidationLimits) -> Self {
        self.validation = limits;
        self
    }
}

/// Random client identifier of the form `client-<uuid>`
pub fn generate_client_id() -> String {
    format!("client-{}", uuid::Uuid::new_v4().simple())
}

fn parse<T, F>(lookup: &F, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| Error::Config(format!("{}={:?}: {}", key, raw, e))),
    }
}

fn parse_millis<F>(lookup: &F, key: &str) -> Result<Option<Duration>>
where
    F: Fn(&str) -> Option<String>,
{
    Ok(parse::<u64, F>(lookup, key)?.map(Duration::from_millis))
}
