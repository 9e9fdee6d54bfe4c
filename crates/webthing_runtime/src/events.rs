//! Bounded event log
//!
//! Per-event-name FIFO of immutable, timestamped records. Once the per-name
//! length exceeds the configured capacity the oldest records are evicted,
//! so the log never grows without bound.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;

use webthing_types::Value;

// ─────────────────────────────────────────────────────────────────────────────
// Event
// ─────────────────────────────────────────────────────────────────────────────

/// An immutable event record: name, optional payload, creation timestamp
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    name: String,
    data: Option<Value>,
    timestamp: DateTime<Utc>,
}

impl Event {
    /// Create an event stamped with the current UTC time
    pub fn new(name: impl Into<String>, data: Option<Value>) -> Self {
        Self {
            name: name.into(),
            data,
            timestamp: Utc::now(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn data(&self) -> Option<&Value> {
        self.data.as_ref()
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Wire-format record: `{"data"?: <value>, "timestamp": <RFC 3339>}`
    pub fn describe(&self) -> serde_json::Value {
        let mut map = serde_json::Map::new();
        if let Some(data) = &self.data {
            map.insert("data".to_string(), data.to_wire());
        }
        map.insert(
            "timestamp".to_string(),
            self.timestamp
                .to_rfc3339_opts(SecondsFormat::Millis, true)
                .into(),
        );
        serde_json::Value::Object(map)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Event Log
// ─────────────────────────────────────────────────────────────────────────────

/// Bounded per-name FIFO store of event records
pub struct EventLog {
    capacity: usize,
    queues: Mutex<HashMap<String, VecDeque<Arc<Event>>>>,
}

impl EventLog {
    /// Create a log with the given per-name capacity
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            queues: Mutex::new(HashMap::new()),
        }
    }

    /// Append an event, evicting oldest-first once over capacity
    ///
    /// The per-name length never exceeds the capacity after this returns.
    pub fn push(&self, event: Arc<Event>) {
        let mut queues = self.queues.lock();
        let queue = queues.entry(event.name().to_string()).or_default();
        queue.push_back(event);
        while queue.len() > self.capacity {
            queue.pop_front();
        }
    }

    /// Point-in-time copy of the stored events, oldest first
    ///
    /// With a name, only that name's queue; without, every queue merged in
    /// timestamp order. Concurrent pushes never block or corrupt the copy.
    pub fn snapshot(&self, name: Option<&str>) -> Vec<Arc<Event>> {
        let queues = self.queues.lock();
        match name {
            Some(name) => queues
                .get(name)
                .map(|q| q.iter().cloned().collect())
                .unwrap_or_default(),
            None => {
                let mut all: Vec<Arc<Event>> =
                    queues.values().flatten().cloned().collect();
                all.sort_by_key(|e| e.timestamp());
                all
            }
        }
    }

    /// Number of stored events for one name
    pub fn len(&self, name: &str) -> usize {
        self.queues.lock().get(name).map_or(0, VecDeque::len)
    }

    pub fn is_empty(&self, name: &str) -> bool {
        self.len(name) == 0
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
