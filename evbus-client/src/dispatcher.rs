//! Subscription registry and inbound dispatch
//!
//! Handlers are async closures registered per [`EventType`]. A type may have
//! any number of handlers; they run in registration order and each receives
//! its own clone of the event.
//!
//! # Examples
//!
//! ```rust
//! use evbus_client::Dispatcher;
//! use evbus_core::{Event, EventType};
//! use serde_json::json;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let dispatcher = Dispatcher::new();
//! let id = dispatcher
//!     .register(EventType::HydroAlertRaised, |event| async move {
//!         println!("alert: {}", event.payload());
//!     })
//!     .await;
//!
//! let alert = Event::new(EventType::HydroAlertRaised, "gauge_feed", json!({"level": 3}));
//! assert_eq!(dispatcher.dispatch(alert).await, 1);
//!
//! dispatcher.unregister(EventType::HydroAlertRaised, id).await;
//! # }
//! ```

use evbus_core::{Event, EventType};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Type for event handler functions
pub type EventHandlerFn =
    Arc<dyn Fn(Event) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Identifies one registered handler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

#[derive(Default)]
struct Registry {
    next_id: u64,
    handlers: HashMap<EventType, Vec<(SubscriptionId, EventHandlerFn)>>,
}

/// Result of removing a handler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Unregistered {
    /// Handlers still registered for the type
    pub remaining: usize,
}

/// Registry of handlers per event type
#[derive(Clone, Default)]
pub struct Dispatcher {
    registry: Arc<Mutex<Registry>>,
}

impl Dispatcher {
    /// Create an empty dispatcher
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for an event type
    pub async fn register<F, Fut>(&self, event_type: EventType, handler: F) -> SubscriptionId
    where
        F: Fn(Event) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handler: EventHandlerFn = Arc::new(move |event| Box::pin(handler(event)));

        let mut registry = self.registry.lock().await;
        let id = SubscriptionId(registry.next_id);
        registry.next_id += 1;
        registry
            .handlers
            .entry(event_type)
            .or_default()
            .push((id, handler));
        id
    }

    /// Remove one handler
    ///
    /// Returns `None` if the handler was already removed.
    pub async fn unregister(&self, event_type: EventType, id: SubscriptionId) -> Option<Unregistered> {
        let mut registry = self.registry.lock().await;
        let handlers = registry.handlers.get_mut(&event_type)?;
        let position = handlers.iter().position(|(hid, _)| *hid == id)?;
        handlers.remove(position);

        let remaining = handlers.len();
        if remaining == 0 {
            registry.handlers.remove(&event_type);
        }
        Some(Unregistered { remaining })
    }

    /// Deliver an event to every handler registered for its type
    ///
    /// Returns the number of handlers invoked. The registry lock is released
    /// before any handler runs, so handlers may subscribe or unsubscribe.
    pub async fn dispatch(&self, event: Event) -> usize {
        let handlers: Vec<EventHandlerFn> = {
            let registry = self.registry.lock().await;
            match registry.handlers.get(&event.event_type()) {
                Some(handlers) => handlers.iter().map(|(_, h)| Arc::clone(h)).collect(),
                None => return 0,
            }
        };

        for handler in &handlers {
            handler(event.clone()).await;
        }
        handlers.len()
    }

    /// Event types with at least one handler, in a stable order
    pub async fn event_types(&self) -> Vec<EventType> {
        let mut types: Vec<EventType> = self.registry.lock().await.handlers.keys().copied().collect();
        types.sort_by_key(|t| t.as_str());
        types
    }

    /// Number of handlers for an event type
    pub async fn handler_count(&self, event_type: EventType) -> usize {
        self.registry
            .lock()
            .await
            .handlers
            .get(&event_type)
            .map_or(0, Vec::len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex as StdMutex;

    fn event(event_type: EventType) -> Event {
        Event::new(event_type, "tester", json!({"k": "v"}))
    }

    #[tokio::test]
    async fn test_handlers_run_in_registration_order() {
        let dispatcher = Dispatcher::new();
        let order = Arc::new(StdMutex::new(Vec::new()));

        for n in 0..3 {
            let order = Arc::clone(&order);
            dispatcher
                .register(EventType::MapLayerToggled, move |_| {
                    let order = Arc::clone(&order);
                    async move { order.lock().unwrap().push(n) }
                })
                .await;
        }

        assert_eq!(dispatcher.dispatch(event(EventType::MapLayerToggled)).await, 3);
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_dispatch_only_matches_type() {
        let dispatcher = Dispatcher::new();
        dispatcher
            .register(EventType::MapLayerToggled, |_| async {})
            .await;

        assert_eq!(dispatcher.dispatch(event(EventType::SystemError)).await, 0);
    }

    #[tokio::test]
    async fn test_each_handler_gets_its_own_copy() {
        let dispatcher = Dispatcher::new();
        let seen = Arc::new(StdMutex::new(Vec::new()));

        for _ in 0..2 {
            let seen = Arc::clone(&seen);
            dispatcher
                .register(EventType::SystemStatus, move |event| {
                    let seen = Arc::clone(&seen);
                    async move {
                        let mut payload = event.into_payload();
                        payload["k"] = json!("mutated");
                        seen.lock().unwrap().push(payload);
                    }
                })
                .await;
        }

        let original = event(EventType::SystemStatus);
        dispatcher.dispatch(original.clone()).await;

        assert_eq!(original.payload()["k"], "v");
        assert_eq!(seen.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_unregister_reports_remaining() {
        let dispatcher = Dispatcher::new();
        let a = dispatcher.register(EventType::SystemStatus, |_| async {}).await;
        let b = dispatcher.register(EventType::SystemStatus, |_| async {}).await;

        assert_eq!(
            dispatcher.unregister(EventType::SystemStatus, a).await,
            Some(Unregistered { remaining: 1 })
        );
        assert_eq!(dispatcher.unregister(EventType::SystemStatus, a).await, None);
        assert_eq!(
            dispatcher.unregister(EventType::SystemStatus, b).await,
            Some(Unregistered { remaining: 0 })
        );
        assert!(dispatcher.event_types().await.is_empty());
    }

    #[tokio::test]
    async fn test_handler_may_unsubscribe_during_dispatch() {
        let dispatcher = Dispatcher::new();
        let id_slot = Arc::new(StdMutex::new(None));

        let inner = dispatcher.clone();
        let slot = Arc::clone(&id_slot);
        let id = dispatcher
            .register(EventType::SystemStatus, move |_| {
                let inner = inner.clone();
                let slot = Arc::clone(&slot);
                async move {
                    let id = slot.lock().unwrap().take();
                    if let Some(id) = id {
                        inner.unregister(EventType::SystemStatus, id).await;
                    }
                }
            })
            .await;
        *id_slot.lock().unwrap() = Some(id);

        assert_eq!(dispatcher.dispatch(event(EventType::SystemStatus)).await, 1);
        assert_eq!(dispatcher.handler_count(EventType::SystemStatus).await, 0);
    }

    #[tokio::test]
    async fn test_event_types_sorted() {
        let dispatcher = Dispatcher::new();
        dispatcher.register(EventType::SystemStatus, |_| async {}).await;
        dispatcher.register(EventType::GraphNodeSelected, |_| async {}).await;
        dispatcher.register(EventType::HydroAlertCleared, |_| async {}).await;

        assert_eq!(
            dispatcher.event_types().await,
            vec![
                EventType::GraphNodeSelected,
                EventType::HydroAlertCleared,
                EventType::SystemStatus
            ]
        );
    }
}
