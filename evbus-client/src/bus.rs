//! The event bus client
//!
//! [`EventBus`] owns one logical session with the remote endpoint and keeps
//! it alive across transport churn. A session outlives any single transport:
//! reconnecting does not reset the client id, the offline buffer or the
//! subscriptions.
//!
//! # Session Lifecycle
//!
//! 1. **Connect**: open a transport; status goes `Connecting → Connected`
//! 2. **Authenticate**: with a token, send `auth_request` and wait for the
//!    verdict; without one, go straight to `Authenticated`
//! 3. **Operate**: flush the offline buffer, re-announce subscriptions, start
//!    the heartbeat
//! 4. **Recover**: on transport loss, schedule a reconnect with backoff
//! 5. **Disconnect**: explicit `disconnect()` cancels everything
//!
//! # Transport Generations
//!
//! Every transport opened by the bus gets a generation number. Reader and
//! heartbeat tasks carry the generation they were started for and are ignored
//! once it is stale, so a late close from an old socket never disturbs the
//! current one.
//!
//! # Handlers
//!
//! Subscriber handlers run on the transport's reader task, one at a time, in
//! registration order. A handler that needs to wait on the bus (for example
//! another `request_reply`) should spawn its own task.
//!
//! # Cloning
//!
//! `EventBus` is cheaply cloneable; all clones share one session.

use crate::buffer::OfflineBuffer;
use crate::config::BusConfig;
use crate::connection_state::{ConnectionStatus, ReconnectScheduler};
use crate::correlator::{Correlator, ReplyOutcome};
use crate::dispatcher::{Dispatcher, SubscriptionId};
use crate::heartbeat::{HeartbeatMonitor, Tick};
use crate::metrics::ClientMetrics;
use crate::rate_limit::RateLimiter;
use crate::reconnect::{ExponentialBackoff, ReconnectionStrategy};
use crate::transport::{Connector, FrameSender, TransportEvent, WsConnector};
use evbus_core::{
    codec, ClientFrame, Error, Event, EventType, EventValidator, ObservabilityGuard, RawEvent,
    Result, ServerFrame, TokenData,
};
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::time::Instant;

/// Optional fields for [`EventBus::publish_event`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishOptions {
    /// Source token; defaults to the configured `default_source`
    pub source: Option<String>,
    /// Correlation id linking the event to a request
    pub correlation_id: Option<String>,
    /// Event type a responder should reply with
    pub reply_to: Option<EventType>,
}

impl PublishOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    pub fn with_reply_to(mut self, reply_to: EventType) -> Self {
        self.reply_to = Some(reply_to);
        self
    }
}

/// Handle to one registered handler
///
/// Dropping the handle keeps the handler registered; call
/// [`Subscription::unsubscribe`] to remove it.
#[derive(Debug)]
#[must_use = "the handler stays registered until unsubscribe() is called"]
pub struct Subscription {
    shared: Weak<Shared>,
    event_type: EventType,
    id: SubscriptionId,
}

impl Subscription {
    pub fn event_type(&self) -> EventType {
        self.event_type
    }

    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Remove the handler
    ///
    /// When it was the last handler for its type and the bus is
    /// authenticated, the endpoint is told to stop forwarding the type.
    pub async fn unsubscribe(self) {
        if let Some(bus) = EventBus::upgrade(&self.shared) {
            bus.remove_handler(self.event_type, self.id).await;
        }
    }
}

/// Correlator entry and reply handler owned by one `request_reply` call
///
/// Dropped without `release` (the caller abandoned the future), it removes
/// both on a spawned task.
struct PendingRequest {
    shared: Weak<Shared>,
    correlation_id: String,
    reply_type: EventType,
    handler: Option<SubscriptionId>,
    released: bool,
}

impl PendingRequest {
    async fn release(mut self) {
        if let Some(bus) = EventBus::upgrade(&self.shared) {
            bus.release_request(&self.correlation_id, self.reply_type, self.handler)
                .await;
        }
        self.released = true;
    }
}

impl Drop for PendingRequest {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let shared = self.shared.clone();
        let correlation_id = std::mem::take(&mut self.correlation_id);
        let reply_type = self.reply_type;
        let handler = self.handler;
        runtime.spawn(async move {
            if let Some(bus) = EventBus::upgrade(&shared) {
                tracing::debug!(correlation_id = %correlation_id, "Request abandoned");
                bus.release_request(&correlation_id, reply_type, handler)
                    .await;
            }
        });
    }
}

fn settled(outcome: ReplyOutcome) -> (&'static str, Result<Option<Event>>) {
    match outcome {
        ReplyOutcome::Reply(event) => ("reply", Ok(Some(event))),
        ReplyOutcome::Cancelled => ("cancelled", Err(Error::Disconnected)),
        ReplyOutcome::Rejected(reason) => ("rejected", Err(Error::Auth(reason))),
    }
}

/// Mutable session state, guarded by one lock
struct Session {
    status: ConnectionStatus,
    client_id: String,
    auth_token: Option<String>,
    user_id: Option<String>,
    permissions: Vec<String>,
    auth_retries: u32,
    generation: u64,
    transport: Option<FrameSender>,
    rate_limiter: RateLimiter,
    buffer: OfflineBuffer,
    reconnect: ReconnectScheduler,
    heartbeat: HeartbeatMonitor,
}

impl Session {
    fn send_frame(&self, frame: &ClientFrame) -> Result<()> {
        let sender = self.transport.as_ref().ok_or(Error::Disconnected)?;
        let text = codec::encode_client_frame(frame)?;
        tracing::trace!(frame = frame.kind(), "Sending frame");
        sender.send(text)
    }
}

pub(crate) struct Shared {
    config: BusConfig,
    validator: EventValidator,
    connector: Arc<dyn Connector>,
    session: Mutex<Session>,
    dispatcher: Dispatcher,
    correlator: Correlator,
    status_tx: watch::Sender<ConnectionStatus>,
    metrics: Option<Arc<ClientMetrics>>,
    telemetry: std::sync::Mutex<Option<ObservabilityGuard>>,
}

/// Secure event-bus client
#[derive(Clone)]
pub struct EventBus {
    shared: Arc<Shared>,
}

/// Backoff strategy derived from the configured delays
pub(crate) fn default_strategy(config: &BusConfig) -> Box<dyn ReconnectionStrategy> {
    let backoff = ExponentialBackoff::new(config.reconnect_base_delay, config.reconnect_max_delay);
    if config.reconnect_jitter {
        Box::new(backoff.with_jitter())
    } else {
        Box::new(backoff)
    }
}

impl EventBus {
    /// Create a bus over WebSocket with exponential backoff
    ///
    /// Nothing is opened until [`connect`](Self::connect) is called. Use
    /// [`ClientBuilder`](crate::ClientBuilder) for custom strategies,
    /// connectors or metrics.
    pub fn new(config: BusConfig) -> Self {
        let strategy = default_strategy(&config);
        Self::from_parts(config, Arc::new(WsConnector), strategy, None, None)
    }

    pub(crate) fn from_parts(
        config: BusConfig,
        connector: Arc<dyn Connector>,
        strategy: Box<dyn ReconnectionStrategy>,
        metrics: Option<Arc<ClientMetrics>>,
        telemetry: Option<ObservabilityGuard>,
    ) -> Self {
        let session = Session {
            status: ConnectionStatus::Disconnected,
            client_id: config.client_id.clone(),
            auth_token: config.auth_token.clone(),
            user_id: None,
            permissions: Vec::new(),
            auth_retries: 0,
            generation: 0,
            transport: None,
            rate_limiter: RateLimiter::new(config.rate_limit_window, config.max_events_per_window),
            buffer: OfflineBuffer::new(config.max_event_buffer_size),
            reconnect: ReconnectScheduler::new(strategy, config.max_reconnect_attempts),
            heartbeat: HeartbeatMonitor::new(),
        };
        let (status_tx, _) = watch::channel(ConnectionStatus::Disconnected);

        Self {
            shared: Arc::new(Shared {
                validator: EventValidator::new(config.validation),
                config,
                connector,
                session: Mutex::new(session),
                dispatcher: Dispatcher::new(),
                correlator: Correlator::new(),
                status_tx,
                metrics,
                telemetry: std::sync::Mutex::new(telemetry),
            }),
        }
    }

    fn upgrade(shared: &Weak<Shared>) -> Option<Self> {
        shared.upgrade().map(|shared| Self { shared })
    }

    /// Open the transport and start a session
    ///
    /// A no-op while already connecting, connected or authenticated. A manual
    /// call cancels any pending reconnect timer and resets the attempt
    /// counter.
    ///
    /// # Errors
    ///
    /// Returns the connector's error when the transport cannot be opened. A
    /// reconnect is scheduled in that case.
    #[tracing::instrument(skip(self), fields(url = %self.shared.config.url))]
    pub async fn connect(&self) -> Result<()> {
        let generation = {
            let mut guard = self.shared.session.lock().await;
            let s = &mut *guard;
            if s.status.is_active() {
                tracing::debug!(status = %s.status, "Already connected or connecting");
                return Ok(());
            }
            s.reconnect.cancel();
            s.reconnect.reset();
            self.begin_connecting(s)
        };
        self.open_transport(generation).await
    }

    /// Close the session
    ///
    /// Cancels the heartbeat and any pending reconnect, rejects every pending
    /// `request_reply` with `Error::Disconnected`, discards the offline buffer
    /// and resets the rate limiter. Subscriptions stay registered and are
    /// announced again on the next `connect()`.
    #[tracing::instrument(skip(self), fields(client_id = %self.shared.config.client_id))]
    pub async fn disconnect(&self) {
        {
            let mut guard = self.shared.session.lock().await;
            let s = &mut *guard;
            tracing::info!("Disconnecting");

            let dropped = s.buffer.clear();
            if dropped > 0 {
                tracing::warn!(dropped, "Discarding buffered events");
            }
            self.teardown(s);
        }

        let cancelled = self.shared.correlator.cancel_all().await;
        if cancelled > 0 {
            tracing::debug!(cancelled, "Cancelled pending requests");
        }
    }

    /// Publish an event
    ///
    /// The payload is sanitized, the event is built and validated, and the
    /// rate limit is checked. The event is then sent when authenticated, or
    /// buffered for the next session otherwise.
    ///
    /// Returns the id of the new event.
    ///
    /// # Errors
    ///
    /// - `Error::Validation` when the event is invalid (nothing is sent or
    ///   buffered)
    /// - `Error::RateLimited` when the sliding-window quota is exhausted
    ///   (nothing is sent or buffered)
    #[tracing::instrument(skip(self, payload, options), fields(event_type = %event_type))]
    pub async fn publish_event(
        &self,
        event_type: EventType,
        payload: serde_json::Value,
        options: PublishOptions,
    ) -> Result<String> {
        let validator = &self.shared.validator;
        let payload = validator.sanitize(&payload);
        let source = options
            .source
            .unwrap_or_else(|| self.shared.config.default_source.clone());

        let mut guard = self.shared.session.lock().await;
        let s = &mut *guard;

        let mut event = Event::new(event_type, source, payload);
        if let Some(correlation_id) = options.correlation_id {
            event = event.with_correlation_id(correlation_id);
        }
        if let Some(reply_to) = options.reply_to {
            event = event.with_reply_to(reply_to);
        }
        if s.status == ConnectionStatus::Authenticated {
            if let Some(user_id) = &s.user_id {
                event = event.with_user_id(user_id.clone());
            }
        }

        if let Err(e) = validator.validate(&event) {
            tracing::warn!(error = %e, "Refusing invalid event");
            if let Some(ref m) = self.shared.metrics {
                m.record_rejected("outbound");
            }
            return Err(e.into());
        }

        if !s.rate_limiter.is_allowed(&s.client_id) {
            tracing::warn!(client_id = %s.client_id, "Rate limit exceeded");
            if let Some(ref m) = self.shared.metrics {
                m.record_rate_limited();
            }
            return Err(Error::RateLimited {
                client_id: s.client_id.clone(),
                limit: s.rate_limiter.max_events(),
                window_ms: s.rate_limiter.window().as_millis() as u64,
            });
        }

        let event_id = event.id().to_string();
        if s.status == ConnectionStatus::Authenticated {
            match s.send_frame(&ClientFrame::publish(&event)) {
                Ok(()) => {
                    tracing::debug!(event_id = %event_id, "Event sent");
                    if let Some(ref m) = self.shared.metrics {
                        m.record_published(event_type.as_str(), "sent");
                    }
                    return Ok(event_id);
                }
                Err(e) => tracing::debug!(error = %e, "Transport unavailable, buffering"),
            }
        }

        self.buffer_event(s, event);
        Ok(event_id)
    }

    /// Register a handler for an event type
    ///
    /// When authenticated, the endpoint is told to forward the type. The
    /// intent is re-announced on every later transition to `Authenticated`.
    pub async fn subscribe<F, Fut>(&self, event_type: EventType, handler: F) -> Subscription
    where
        F: Fn(Event) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let id = self.shared.dispatcher.register(event_type, handler).await;

        let s = self.shared.session.lock().await;
        if s.status == ConnectionStatus::Authenticated {
            let frame = ClientFrame::Subscribe {
                event_types: vec![event_type],
            };
            if let Err(e) = s.send_frame(&frame) {
                tracing::debug!(error = %e, "Subscribe intent not sent");
            }
        }
        tracing::debug!(event_type = %event_type, "Handler registered");

        Subscription {
            shared: Arc::downgrade(&self.shared),
            event_type,
            id,
        }
    }

    /// Publish a request and wait for the correlated reply
    ///
    /// Returns `Ok(None)` when no reply arrives within `timeout` (defaults to
    /// the configured `request_timeout`), when the bus is not authenticated,
    /// or when the request could not be published.
    ///
    /// # Errors
    ///
    /// - `Error::Disconnected` if `disconnect()` is called while the request
    ///   is pending
    /// - `Error::Auth` if the session gives up on authentication while the
    ///   request is pending
    ///
    /// Dropping the returned future before it completes releases the pending
    /// entry and the reply handler.
    #[tracing::instrument(
        skip(self, payload),
        fields(request_type = %request_type, reply_type = %reply_type)
    )]
    pub async fn request_reply(
        &self,
        request_type: EventType,
        payload: serde_json::Value,
        reply_type: EventType,
        timeout: Option<Duration>,
    ) -> Result<Option<Event>> {
        let timeout = timeout.unwrap_or(self.shared.config.request_timeout);
        let started = Instant::now();

        if !self.is_authenticated() {
            tracing::debug!("Not authenticated, request resolves without reply");
            self.record_request(request_type, "unavailable", started);
            return Ok(None);
        }

        let correlation_id = uuid::Uuid::new_v4().to_string();
        let correlator = &self.shared.correlator;
        let mut reply_rx = correlator.register(correlation_id.clone(), reply_type).await;
        let mut pending = PendingRequest {
            shared: Arc::downgrade(&self.shared),
            correlation_id: correlation_id.clone(),
            reply_type,
            handler: None,
            released: false,
        };

        let subscription = {
            let correlator = correlator.clone();
            let expected = correlation_id.clone();
            self.subscribe(reply_type, move |event| {
                let correlator = correlator.clone();
                let expected = expected.clone();
                async move {
                    if event.correlation_id() == Some(expected.as_str()) {
                        correlator.resolve(event).await;
                    }
                }
            })
            .await
        };
        pending.handler = Some(subscription.id());

        let options = PublishOptions::new()
            .with_correlation_id(correlation_id.clone())
            .with_reply_to(reply_type);

        let (outcome, result) = match self.publish_event(request_type, payload, options).await {
            Err(e) => {
                tracing::warn!(error = %e, "Request not published");
                correlator.expire(&correlation_id).await;
                ("unavailable", Ok(None))
            }
            Ok(_) => match tokio::time::timeout(timeout, &mut reply_rx).await {
                Ok(Ok(outcome)) => settled(outcome),
                Ok(Err(_)) => ("cancelled", Err(Error::Disconnected)),
                Err(_) => {
                    if correlator.expire(&correlation_id).await {
                        tracing::debug!(timeout_ms = timeout.as_millis() as u64, "Request timed out");
                        ("timeout", Ok(None))
                    } else {
                        // settled between the deadline and the expiry
                        match reply_rx.try_recv() {
                            Ok(outcome) => settled(outcome),
                            Err(_) => ("cancelled", Err(Error::Disconnected)),
                        }
                    }
                }
            },
        };

        pending.release().await;
        self.record_request(request_type, outcome, started);
        result
    }

    /// Replace the credential
    ///
    /// With a live transport the session re-authenticates immediately;
    /// otherwise the token is used on the next connection.
    #[tracing::instrument(skip(self, token))]
    pub async fn set_auth_token(&self, token: Option<String>) {
        let mut guard = self.shared.session.lock().await;
        let s = &mut *guard;
        s.auth_token = token;

        let live = matches!(
            s.status,
            ConnectionStatus::Connected
                | ConnectionStatus::Authenticating
                | ConnectionStatus::Authenticated
        );
        if !live || s.transport.is_none() {
            tracing::debug!("Credential stored for the next connection");
            return;
        }

        tracing::info!("Credential changed, re-authenticating");
        s.auth_retries = 0;
        s.heartbeat.stop();
        self.begin_authentication(s).await;
    }

    /// Current status
    pub fn connection_status(&self) -> ConnectionStatus {
        *self.shared.status_tx.borrow()
    }

    /// True when the session is authenticated
    pub fn is_authenticated(&self) -> bool {
        self.connection_status() == ConnectionStatus::Authenticated
    }

    /// Receiver notified on every status change
    pub fn status_changes(&self) -> watch::Receiver<ConnectionStatus> {
        self.shared.status_tx.subscribe()
    }

    pub fn client_id(&self) -> &str {
        &self.shared.config.client_id
    }

    pub fn config(&self) -> &BusConfig {
        &self.shared.config
    }

    /// User id granted by the endpoint, once authenticated
    pub async fn user_id(&self) -> Option<String> {
        self.shared.session.lock().await.user_id.clone()
    }

    /// Permissions granted by the endpoint, once authenticated
    pub async fn permissions(&self) -> Vec<String> {
        self.shared.session.lock().await.permissions.clone()
    }

    /// Events waiting in the offline buffer
    pub async fn buffered_len(&self) -> usize {
        self.shared.session.lock().await.buffer.len()
    }

    /// Outstanding `request_reply` calls
    pub async fn pending_replies(&self) -> usize {
        self.shared.correlator.pending_count().await
    }

    /// Consecutive reconnect attempts since the last successful session
    pub async fn reconnect_attempts(&self) -> u32 {
        self.shared.session.lock().await.reconnect.attempts()
    }

    /// Flush and shut down telemetry installed by the builder
    pub fn shutdown_telemetry(&self) {
        let guard = self
            .shared
            .telemetry
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take();
        if let Some(guard) = guard {
            guard.shutdown();
        }
    }

    fn set_status(&self, s: &mut Session, status: ConnectionStatus) {
        if s.status == status {
            return;
        }
        tracing::info!(from = %s.status, to = %status, "Connection status changed");
        s.status = status;
        self.shared.status_tx.send_replace(status);
        if let Some(ref m) = self.shared.metrics {
            m.update_connection_state(status.gauge_value());
        }
    }

    fn begin_connecting(&self, s: &mut Session) -> u64 {
        s.generation += 1;
        self.set_status(s, ConnectionStatus::Connecting);
        s.generation
    }

    async fn open_transport(&self, generation: u64) -> Result<()> {
        let url = &self.shared.config.url;
        tracing::info!(url = %url, generation, "Opening transport");
        let opened = self.shared.connector.connect(url).await;

        let mut guard = self.shared.session.lock().await;
        let s = &mut *guard;

        if s.generation != generation {
            // superseded by disconnect() while the connector was running
            if let Ok(transport) = &opened {
                transport.sender.close();
            }
            return Err(Error::Disconnected);
        }

        match opened {
            Ok(transport) => {
                s.transport = Some(transport.sender);
                self.set_status(s, ConnectionStatus::Connected);
                self.spawn_reader(generation, transport.events);
                self.begin_authentication(s).await;
                Ok(())
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to open transport");
                if let Some(ref m) = self.shared.metrics {
                    m.record_error("connect");
                }
                self.set_status(s, ConnectionStatus::Error);
                self.schedule_reconnect(s);
                Err(e)
            }
        }
    }

    fn spawn_reader(&self, generation: u64, events: mpsc::UnboundedReceiver<TransportEvent>) {
        tokio::spawn(read_loop(Arc::downgrade(&self.shared), generation, events));
    }

    async fn begin_authentication(&self, s: &mut Session) {
        match s.auth_token.clone() {
            None => {
                tracing::info!("No credential configured, skipping authentication");
                self.on_authenticated(s, None, Vec::new()).await;
            }
            Some(token) => {
                self.set_status(s, ConnectionStatus::Authenticating);
                self.send_auth_request(s, token);
            }
        }
    }

    fn send_auth_request(&self, s: &Session, token: String) {
        let frame = ClientFrame::AuthRequest {
            token,
            client_id: s.client_id.clone(),
        };
        if let Err(e) = s.send_frame(&frame) {
            tracing::warn!(error = %e, "Failed to send auth request");
        }
    }

    async fn on_authenticated(
        &self,
        s: &mut Session,
        user_id: Option<String>,
        permissions: Vec<String>,
    ) {
        let event_types = self.shared.dispatcher.event_types().await;

        s.user_id = user_id;
        s.permissions = permissions;
        s.auth_retries = 0;
        s.reconnect.reset();
        self.set_status(s, ConnectionStatus::Authenticated);
        tracing::info!(
            client_id = %s.client_id,
            user_id = ?s.user_id,
            "Session authenticated"
        );

        if !event_types.is_empty() {
            tracing::debug!(count = event_types.len(), "Re-announcing subscriptions");
            if let Err(e) = s.send_frame(&ClientFrame::Subscribe { event_types }) {
                tracing::warn!(error = %e, "Failed to announce subscriptions");
            }
        }

        self.flush_buffer(s);
        self.start_heartbeat(s);
    }

    fn buffer_event(&self, s: &mut Session, event: Event) {
        let event_type = event.event_type();
        if s.buffer.capacity() == 0 {
            tracing::warn!(event_id = %event.id(), "Offline buffering disabled, dropping event");
            if let Some(ref m) = self.shared.metrics {
                m.record_evicted();
                m.record_published(event_type.as_str(), "dropped");
            }
            return;
        }
        if let Some(evicted) = s.buffer.push(event) {
            tracing::warn!(evicted_id = %evicted.id(), "Offline buffer full, dropping oldest event");
            if let Some(ref m) = self.shared.metrics {
                m.record_evicted();
            }
        }
        tracing::debug!(buffered = s.buffer.len(), "Event buffered");
        if let Some(ref m) = self.shared.metrics {
            m.record_published(event_type.as_str(), "buffered");
        }
    }

    fn flush_buffer(&self, s: &mut Session) {
        let events = s.buffer.drain();
        if events.is_empty() {
            return;
        }
        tracing::info!(count = events.len(), "Flushing offline buffer");

        let mut pending = events.into_iter();
        while let Some(event) = pending.next() {
            if let Err(e) = s.send_frame(&ClientFrame::publish(&event)) {
                tracing::warn!(error = %e, "Transport lost while flushing, keeping remaining events");
                for event in std::iter::once(event).chain(pending) {
                    s.buffer.push(event);
                }
                return;
            }
            if let Some(ref m) = self.shared.metrics {
                m.record_published(event.event_type().as_str(), "sent");
            }
        }
    }

    fn start_heartbeat(&self, s: &mut Session) {
        let shared = Arc::downgrade(&self.shared);
        let generation = s.generation;
        s.heartbeat
            .start(self.shared.config.heartbeat_interval, move || {
                let shared = shared.clone();
                async move {
                    match EventBus::upgrade(&shared) {
                        Some(bus) => bus.heartbeat_tick(generation).await,
                        None => Tick::Stop,
                    }
                }
            });
    }

    async fn heartbeat_tick(&self, generation: u64) -> Tick {
        let mut guard = self.shared.session.lock().await;
        let s = &mut *guard;
        if s.generation != generation || s.status != ConnectionStatus::Authenticated {
            return Tick::Stop;
        }

        let now = Instant::now();
        if let Some(timeout) = self.shared.config.heartbeat_timeout {
            if s.heartbeat.is_overdue(now, timeout) {
                tracing::warn!(
                    timeout_ms = timeout.as_millis() as u64,
                    "Heartbeat unanswered, dropping transport"
                );
                if let Some(ref m) = self.shared.metrics {
                    m.record_error("heartbeat_timeout");
                }
                self.transport_lost(s, ConnectionStatus::Error);
                return Tick::Stop;
            }
        }

        match s.send_frame(&ClientFrame::Ping) {
            Ok(()) => s.heartbeat.record_ping(now),
            Err(e) => tracing::debug!(error = %e, "Ping not sent"),
        }
        Tick::Continue
    }

    async fn is_current(&self, generation: u64) -> bool {
        self.shared.session.lock().await.generation == generation
    }

    async fn handle_frame(&self, generation: u64, text: &str) {
        let frame = match codec::decode_server_frame(text) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(error = %e, "Dropping undecodable frame");
                if let Some(ref m) = self.shared.metrics {
                    m.record_error("decode");
                }
                return;
            }
        };

        match frame {
            ServerFrame::Event { event } => self.handle_inbound_event(event).await,
            ServerFrame::Pong => {
                let mut s = self.shared.session.lock().await;
                if s.generation == generation {
                    s.heartbeat.record_pong(Instant::now());
                }
                tracing::trace!("Pong received");
            }
            ServerFrame::AuthSuccess { token_data } => {
                self.handle_auth_success(generation, token_data).await
            }
            ServerFrame::AuthFailed { reason } => self.handle_auth_failed(generation, reason).await,
            ServerFrame::Error { message } => {
                tracing::warn!(message = %message, "Endpoint reported an error");
                if let Some(ref m) = self.shared.metrics {
                    m.record_error("remote");
                }
            }
        }
    }

    async fn handle_inbound_event(&self, raw: RawEvent) {
        let event_id = raw.id.clone();
        match self.shared.validator.validate_raw(raw) {
            Ok(event) => {
                let event_type = event.event_type();
                if let Some(ref m) = self.shared.metrics {
                    m.record_received(event_type.as_str());
                }
                let handlers = self.shared.dispatcher.dispatch(event).await;
                tracing::debug!(event_type = %event_type, handlers, "Event dispatched");
            }
            Err(e) => {
                tracing::warn!(event_id = %event_id, error = %e, "Dropping invalid inbound event");
                if let Some(ref m) = self.shared.metrics {
                    m.record_rejected("inbound");
                }
            }
        }
    }

    async fn handle_auth_success(&self, generation: u64, token_data: TokenData) {
        let mut guard = self.shared.session.lock().await;
        let s = &mut *guard;
        if s.generation != generation || s.status != ConnectionStatus::Authenticating {
            tracing::debug!(status = %s.status, "Ignoring unexpected auth_success");
            return;
        }
        self.on_authenticated(s, Some(token_data.user_id), token_data.permissions)
            .await;
    }

    async fn handle_auth_failed(&self, generation: u64, reason: String) {
        let mut guard = self.shared.session.lock().await;
        let s = &mut *guard;
        if s.generation != generation || s.status != ConnectionStatus::Authenticating {
            tracing::debug!(status = %s.status, "Ignoring unexpected auth_failed");
            return;
        }
        if let Some(ref m) = self.shared.metrics {
            m.record_auth_failure();
        }

        s.auth_retries += 1;
        let max_retries = self.shared.config.max_auth_retries;
        if s.auth_retries <= max_retries {
            tracing::warn!(
                attempt = s.auth_retries,
                max_retries,
                reason = %reason,
                "Authentication failed, retrying"
            );
            match s.auth_token.clone() {
                Some(token) => self.send_auth_request(s, token),
                None => self.on_authenticated(s, None, Vec::new()).await,
            }
            return;
        }

        tracing::error!(reason = %reason, "Authentication failed, giving up");
        self.teardown(s);
        drop(guard);
        let rejected = self.shared.correlator.reject_all(&reason).await;
        if rejected > 0 {
            tracing::debug!(rejected, "Rejected pending requests");
        }
    }

    async fn handle_transport_closed(&self, generation: u64, reason: Option<String>) {
        let mut guard = self.shared.session.lock().await;
        let s = &mut *guard;
        if s.generation != generation {
            tracing::debug!(generation, "Ignoring close of a stale transport");
            return;
        }
        tracing::info!(reason = ?reason, "Transport closed");
        self.transport_lost(s, ConnectionStatus::Disconnected);
    }

    async fn handle_transport_error(&self, generation: u64, error: String) {
        let mut guard = self.shared.session.lock().await;
        let s = &mut *guard;
        if s.generation != generation {
            tracing::debug!(generation, "Ignoring error from a stale transport");
            return;
        }
        tracing::warn!(error = %error, "Transport failed");
        if let Some(ref m) = self.shared.metrics {
            m.record_error("transport");
        }
        self.transport_lost(s, ConnectionStatus::Error);
    }

    /// Drop the current transport and schedule a reconnect
    fn transport_lost(&self, s: &mut Session, status: ConnectionStatus) {
        s.generation += 1;
        if let Some(sender) = s.transport.take() {
            sender.close();
        }
        s.heartbeat.stop();
        self.set_status(s, status);
        self.schedule_reconnect(s);
    }

    /// Stop everything without scheduling a reconnect
    fn teardown(&self, s: &mut Session) {
        s.generation += 1;
        if let Some(sender) = s.transport.take() {
            sender.close();
        }
        s.heartbeat.stop();
        s.reconnect.cancel();
        s.reconnect.reset();
        s.rate_limiter.reset();
        s.user_id = None;
        s.permissions.clear();
        s.auth_retries = 0;
        self.set_status(s, ConnectionStatus::Disconnected);
    }

    fn schedule_reconnect(&self, s: &mut Session) {
        if s.reconnect.is_pending() {
            return;
        }
        let Some(delay) = s.reconnect.next_delay() else {
            tracing::warn!(
                attempts = s.reconnect.attempts(),
                "Reconnection attempts exhausted"
            );
            return;
        };

        tracing::info!(
            attempt = s.reconnect.attempts(),
            max_attempts = s.reconnect.max_attempts(),
            delay_ms = delay.as_millis() as u64,
            "Scheduling reconnect"
        );
        if let Some(ref m) = self.shared.metrics {
            m.record_reconnection_attempt();
        }
        self.set_status(s, ConnectionStatus::Reconnecting);

        let shared = Arc::downgrade(&self.shared);
        let timer = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(bus) = EventBus::upgrade(&shared) {
                bus.reconnect_now().await;
            }
        });
        s.reconnect.set_pending(timer);
    }

    async fn reconnect_now(&self) {
        let generation = {
            let mut guard = self.shared.session.lock().await;
            let s = &mut *guard;
            s.reconnect.clear_pending();
            if s.status != ConnectionStatus::Reconnecting {
                tracing::debug!(status = %s.status, "Reconnect no longer needed");
                return;
            }
            tracing::info!(attempt = s.reconnect.attempts(), "Reconnecting");
            self.begin_connecting(s)
        };
        // failures reschedule from inside open_transport
        let _ = self.open_transport(generation).await;
    }

    async fn remove_handler(&self, event_type: EventType, id: SubscriptionId) {
        if self.shared.dispatcher.unregister(event_type, id).await.is_none() {
            return;
        }

        let s = self.shared.session.lock().await;
        if s.status != ConnectionStatus::Authenticated
            || self.shared.dispatcher.handler_count(event_type).await > 0
        {
            return;
        }
        let frame = ClientFrame::Unsubscribe {
            event_types: vec![event_type],
        };
        if let Err(e) = s.send_frame(&frame) {
            tracing::debug!(error = %e, "Unsubscribe intent not sent");
        }
    }

    async fn release_request(
        &self,
        correlation_id: &str,
        reply_type: EventType,
        handler: Option<SubscriptionId>,
    ) {
        self.shared.correlator.expire(correlation_id).await;
        if let Some(id) = handler {
            self.remove_handler(reply_type, id).await;
        }
    }

    fn record_request(&self, request_type: EventType, outcome: &'static str, started: Instant) {
        if let Some(ref m) = self.shared.metrics {
            m.record_request(request_type.as_str(), outcome, started.elapsed().as_secs_f64());
        }
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("url", &self.shared.config.url)
            .field("client_id", &self.shared.config.client_id)
            .field("status", &self.connection_status())
            .finish()
    }
}

async fn read_loop(
    shared: Weak<Shared>,
    generation: u64,
    mut events: mpsc::UnboundedReceiver<TransportEvent>,
) {
    while let Some(event) = events.recv().await {
        let Some(bus) = EventBus::upgrade(&shared) else {
            return;
        };
        match event {
            TransportEvent::Frame(text) => {
                if !bus.is_current(generation).await {
                    tracing::debug!(generation, "Stopping reader of a stale transport");
                    return;
                }
                bus.handle_frame(generation, &text).await
            }
            TransportEvent::Closed(reason) => {
                bus.handle_transport_closed(generation, reason).await;
                return;
            }
            TransportEvent::Error(error) => {
                bus.handle_transport_error(generation, error).await;
                return;
            }
        }
    }

    if let Some(bus) = EventBus::upgrade(&shared) {
        bus.handle_transport_closed(generation, None).await;
    }
}
