//! Request/reply correlation
//!
//! Tracks outstanding `request_reply` calls by correlation id.
//!
//! # Request Lifecycle
//!
//! 1. **Register**: a fresh correlation id gets a oneshot channel and the
//!    expected reply type
//! 2. **Send**: the request event goes out carrying that correlation id
//! 3. **Resolve**: an inbound event of the expected type with the same
//!    correlation id completes the channel
//! 4. **Expire / cancel**: on timeout, `disconnect()` or auth give-up the
//!    entry is removed
//!
//! Removal from the table is the single point of truth: whichever of resolve,
//! expire or cancel removes the entry first wins, so each request settles
//! exactly once.

use evbus_core::{Event, EventType};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{oneshot, Mutex};

/// How a pending request settled
#[derive(Debug)]
pub enum ReplyOutcome {
    /// A matching reply arrived
    Reply(Event),
    /// The bus was disconnected first
    Cancelled,
    /// The session gave up on authentication first
    Rejected(String),
}

struct PendingReply {
    reply_type: EventType,
    tx: oneshot::Sender<ReplyOutcome>,
}

/// Table of outstanding requests keyed by correlation id
#[derive(Clone, Default)]
pub struct Correlator {
    pending: Arc<Mutex<HashMap<String, PendingReply>>>,
}

impl Correlator {
    /// Create an empty correlator
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a pending request
    pub async fn register(
        &self,
        correlation_id: impl Into<String>,
        reply_type: EventType,
    ) -> oneshot::Receiver<ReplyOutcome> {
        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .await
            .insert(correlation_id.into(), PendingReply { reply_type, tx });
        rx
    }

    /// Complete the request this event answers
    ///
    /// Returns false when the event carries no correlation id, the id is not
    /// pending, or the event type is not the expected reply type.
    pub async fn resolve(&self, event: Event) -> bool {
        let Some(correlation_id) = event.correlation_id().map(str::to_string) else {
            return false;
        };

        let mut pending = self.pending.lock().await;
        match pending.get(&correlation_id) {
            Some(entry) if entry.reply_type == event.event_type() => {}
            _ => return false,
        }
        if let Some(entry) = pending.remove(&correlation_id) {
            let _ = entry.tx.send(ReplyOutcome::Reply(event));
            return true;
        }
        false
    }

    /// Remove a request whose deadline passed
    ///
    /// Returns true if it was still pending, false if a reply won the race.
    pub async fn expire(&self, correlation_id: &str) -> bool {
        self.pending.lock().await.remove(correlation_id).is_some()
    }

    /// Cancel every pending request
    pub async fn cancel_all(&self) -> usize {
        self.settle_all(|| ReplyOutcome::Cancelled).await
    }

    /// Fail every pending request with an authentication rejection
    pub async fn reject_all(&self, reason: &str) -> usize {
        self.settle_all(|| ReplyOutcome::Rejected(reason.to_string()))
            .await
    }

    async fn settle_all(&self, outcome: impl Fn() -> ReplyOutcome) -> usize {
        let mut pending = self.pending.lock().await;
        let count = pending.len();
        for (_, entry) in pending.drain() {
            let _ = entry.tx.send(outcome());
        }
        count
    }

    /// Number of outstanding requests
    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.len()
    }
}
