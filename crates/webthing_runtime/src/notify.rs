//! Notification fan-out
//!
//! Bridges property-changed, action-status-changed, and event-added signals
//! to subscriber sinks. Subscribers are explicit observer registrations
//! keyed by selector; a delivery failure unsubscribes the failed sink and
//! never reaches the operation that triggered the notification.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

// ─────────────────────────────────────────────────────────────────────────────
// Sink
// ─────────────────────────────────────────────────────────────────────────────

/// A sink reported that it can no longer accept frames
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("sink closed")]
pub struct SinkClosed;

/// One delivery target for outbound notification frames
///
/// Typically one open WebSocket connection. `deliver` must not block for
/// long; a queueing sink should hand the frame to its own channel and
/// return `Err(SinkClosed)` once the connection is gone.
pub trait NotificationSink: Send + Sync {
    fn deliver(&self, frame: &serde_json::Value) -> Result<(), SinkClosed>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Selectors & Subscriptions
// ─────────────────────────────────────────────────────────────────────────────

/// What a subscriber wants to receive
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selector {
    /// All property-changed frames on the Thing
    Properties,
    /// All action-status frames on the Thing
    Actions,
    /// Frames for one event name
    Event(String),
    /// Frames for every event name
    AllEvents,
}

impl Selector {
    fn accepts_event(&self, name: &str) -> bool {
        match self {
            Selector::AllEvents => true,
            Selector::Event(wanted) => wanted == name,
            _ => false,
        }
    }
}

/// Identifies one subscription for explicit unsubscribe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Subscriber {
    id: SubscriptionId,
    selector: Selector,
    sink: Arc<dyn NotificationSink>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Notification Hub
// ─────────────────────────────────────────────────────────────────────────────

/// Per-Thing fan-out of notification frames to subscribed sinks
pub struct NotificationHub {
    thing: String,
    next_id: AtomicU64,
    subscribers: Mutex<Vec<Subscriber>>,
}

impl NotificationHub {
    pub fn new(thing: impl Into<String>) -> Self {
        Self {
            thing: thing.into(),
            next_id: AtomicU64::new(1),
            subscribers: Mutex::new(Vec::new()),
        }
    }

    /// Register a sink under a selector
    pub fn subscribe(
        &self,
        selector: Selector,
        sink: Arc<dyn NotificationSink>,
    ) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.subscribers.lock().push(Subscriber {
            id,
            selector,
            sink,
        });
        tracing::debug!(thing = %self.thing, subscription = id.0, "subscriber added");
        id
    }

    /// Remove a subscription; returns false if it was already gone
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.subscribers.lock();
        let before = subscribers.len();
        subscribers.retain(|s| s.id != id);
        subscribers.len() != before
    }

    /// Number of live subscriptions
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }

    /// Publish a property-changed frame
    pub fn property_status(&self, name: &str, value: serde_json::Value) {
        let frame = envelope(
            "propertyStatus",
            serde_json::json!({ name: value }),
        );
        self.dispatch(|s| matches!(s, Selector::Properties), &frame);
    }

    /// Publish an action-status frame
    pub fn action_status(&self, action_name: &str, description: serde_json::Value) {
        let frame = envelope(
            "actionStatus",
            serde_json::json!({ action_name: description }),
        );
        self.dispatch(|s| matches!(s, Selector::Actions), &frame);
    }

    /// Publish an event-added frame
    pub fn event(&self, event_name: &str, record: serde_json::Value) {
        let frame = envelope("event", serde_json::json!({ event_name: record }));
        self.dispatch(|s| s.accepts_event(event_name), &frame);
    }

    /// Deliver a frame to every matching sink, in registration order
    ///
    /// Failed sinks are unsubscribed; the failure never propagates to the
    /// caller and never stops delivery to the remaining sinks.
    fn dispatch(&self, matches: impl Fn(&Selector) -> bool, frame: &serde_json::Value) {
        // Clone the matching sinks out of the lock so a slow sink cannot
        // hold up subscribe/unsubscribe, and a sink may itself subscribe.
        let targets: Vec<(SubscriptionId, Arc<dyn NotificationSink>)> = self
            .subscribers
            .lock()
            .iter()
            .filter(|s| matches(&s.selector))
            .map(|s| (s.id, Arc::clone(&s.sink)))
            .collect();

        let mut failed = Vec::new();
        for (id, sink) in targets {
            if sink.deliver(frame).is_err() {
                failed.push(id);
            }
        }

        if !failed.is_empty() {
            let mut subscribers = self.subscribers.lock();
            subscribers.retain(|s| !failed.contains(&s.id));
            tracing::debug!(
                thing = %self.thing,
                dropped = failed.len(),
                "unsubscribed failed sinks"
            );
        }
    }
}

fn envelope(message_type: &str, data: serde_json::Value) -> serde_json::Value {
    serde_json::json!({
        "messageType": message_type,
        "data": data,
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
