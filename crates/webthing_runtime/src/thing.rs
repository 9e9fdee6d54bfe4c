//! Thing aggregate
//!
//! A Thing is the unit a transport serves: identity and metadata, a frozen
//! property table, an action engine, declared event types with their bounded
//! log, and the notification hub. Built once through [`ThingBuilder`];
//! the set of properties, actions, and events never changes afterwards.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Deserialize;

use webthing_types::{Schema, Value};

use crate::action::{Action, ActionDescriptor, ActionEngine, SubmitError};
use crate::events::{Event, EventLog};
use crate::notify::{NotificationHub, NotificationSink, Selector, SubscriptionId};
use crate::property::{
    PropertyError, PropertyGetter, PropertyRegistry, PropertySetter, SetPropertyResult,
};

// ─────────────────────────────────────────────────────────────────────────────
// Options
// ─────────────────────────────────────────────────────────────────────────────

/// Tunables for one Thing's runtime
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ThingOptions {
    /// Per-event-name log capacity
    pub event_capacity: usize,
    /// Case-insensitive property lookup
    pub ignore_case: bool,
    /// Bounded depth of the action work queue
    pub action_queue_depth: usize,
    /// Background workers draining the action queue
    pub worker_count: usize,
    /// Terminal actions retained before oldest-first eviction
    pub max_completed_actions: usize,
}

impl Default for ThingOptions {
    fn default() -> Self {
        Self {
            event_capacity: 100,
            ignore_case: false,
            action_queue_depth: 256,
            worker_count: 4,
            max_completed_actions: 1024,
        }
    }
}

impl ThingOptions {
    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    pub fn with_ignore_case(mut self, ignore_case: bool) -> Self {
        self.ignore_case = ignore_case;
        self
    }

    pub fn with_action_queue_depth(mut self, depth: usize) -> Self {
        self.action_queue_depth = depth;
        self
    }

    pub fn with_worker_count(mut self, count: usize) -> Self {
        self.worker_count = count;
        self
    }

    pub fn with_max_completed_actions(mut self, max: usize) -> Self {
        self.max_completed_actions = max;
        self
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Errors
// ─────────────────────────────────────────────────────────────────────────────

/// Failures when emitting an event
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EventError {
    #[error("unknown event: {0}")]
    UnknownEvent(String),

    #[error("event payload rejected: {0}")]
    InvalidData(String),
}

// ─────────────────────────────────────────────────────────────────────────────
// Builder
// ─────────────────────────────────────────────────────────────────────────────

struct EventDecl {
    schema: Option<Schema>,
    description: Option<String>,
    /// Serializes append + notification per name, so subscribers see
    /// events in exactly the order the log stores them
    emit_lock: Mutex<()>,
}

/// Assembles a Thing's capability table before freezing it
///
/// Registration happens only here; once [`build`](Self::build) returns, the
/// Thing's surface is immutable and lookups are lock-free reads.
pub struct ThingBuilder {
    name: String,
    title: Option<String>,
    description: Option<String>,
    attypes: Vec<String>,
    base_href: Option<String>,
    options: ThingOptions,
    properties: Vec<(String, Schema, PropertyGetter, PropertySetter)>,
    actions: Vec<(String, ActionDescriptor)>,
    events: Vec<(String, EventDecl)>,
}

impl ThingBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            title: None,
            description: None,
            attypes: Vec::new(),
            base_href: None,
            options: ThingOptions::default(),
            properties: Vec::new(),
            actions: Vec::new(),
            events: Vec::new(),
        }
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn description(mut self, desc: impl Into<String>) -> Self {
        self.description = Some(desc.into());
        self
    }

    /// Add a semantic `@type` annotation
    pub fn attype(mut self, attype: impl Into<String>) -> Self {
        self.attypes.push(attype.into());
        self
    }

    /// Base href the Thing's links hang off; defaults to `/things/{name}`
    pub fn base_href(mut self, href: impl Into<String>) -> Self {
        self.base_href = Some(href.into());
        self
    }

    pub fn options(mut self, options: ThingOptions) -> Self {
        self.options = options;
        self
    }

    /// Register a property with its schema and bound accessors
    pub fn property(
        mut self,
        name: impl Into<String>,
        schema: Schema,
        getter: PropertyGetter,
        setter: PropertySetter,
    ) -> Self {
        self.properties.push((name.into(), schema, getter, setter));
        self
    }

    /// Register an action type
    pub fn action(mut self, name: impl Into<String>, descriptor: ActionDescriptor) -> Self {
        self.actions.push((name.into(), descriptor));
        self
    }

    /// Declare an event type with no payload schema
    pub fn event(mut self, name: impl Into<String>) -> Self {
        self.events.push((
            name.into(),
            EventDecl {
                schema: None,
                description: None,
                emit_lock: Mutex::new(()),
            },
        ));
        self
    }

    /// Declare an event type whose payloads must satisfy a schema
    pub fn event_with_schema(mut self, name: impl Into<String>, schema: Schema) -> Self {
        self.events.push((
            name.into(),
            EventDecl {
                schema: Some(schema),
                description: None,
                emit_lock: Mutex::new(()),
            },
        ));
        self
    }

    /// Freeze the capability table and start the action workers
    ///
    /// Must be called within a Tokio runtime.
    pub fn build(self) -> Arc<Thing> {
        let base_href = self
            .base_href
            .unwrap_or_else(|| format!("/things/{}", self.name));
        let hub = Arc::new(NotificationHub::new(self.name.clone()));

        let mut properties =
            PropertyRegistry::new(self.name.clone(), self.options.ignore_case, Arc::clone(&hub));
        for (name, schema, getter, setter) in self.properties {
            properties.insert(name, schema, getter, setter);
        }

        let descriptors: HashMap<String, Arc<ActionDescriptor>> = self
            .actions
            .into_iter()
            .map(|(name, d)| (name, Arc::new(d)))
            .collect();
        let action_names: Vec<String> = descriptors.keys().cloned().collect();
        let engine = ActionEngine::new(
            self.name.clone(),
            base_href.clone(),
            descriptors,
            Arc::clone(&hub),
            self.options.action_queue_depth,
            self.options.worker_count,
            self.options.max_completed_actions,
        );

        let mut event_order = Vec::with_capacity(self.events.len());
        let mut event_decls = HashMap::with_capacity(self.events.len());
        for (name, decl) in self.events {
            event_order.push(name.clone());
            event_decls.insert(name, decl);
        }

        tracing::info!(
            thing = %self.name,
            properties = properties.names().count(),
            actions = action_names.len(),
            events = event_order.len(),
            "thing built"
        );

        Arc::new(Thing {
            name: self.name,
            title: self.title,
            description: self.description,
            attypes: self.attypes,
            base_href,
            properties,
            engine,
            action_names,
            events: EventLog::new(self.options.event_capacity),
            event_decls,
            event_order,
            hub,
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Thing
// ─────────────────────────────────────────────────────────────────────────────

/// A device exposed over the WebThing surface
pub struct Thing {
    name: String,
    title: Option<String>,
    description: Option<String>,
    attypes: Vec<String>,
    base_href: String,
    properties: PropertyRegistry,
    engine: ActionEngine,
    action_names: Vec<String>,
    events: EventLog,
    event_decls: HashMap<String, EventDecl>,
    event_order: Vec<String>,
    hub: Arc<NotificationHub>,
}

impl Thing {
    pub fn builder(name: impl Into<String>) -> ThingBuilder {
        ThingBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn base_href(&self) -> &str {
        &self.base_href
    }

    // ── Properties ──────────────────────────────────────────────────────────

    /// The property table, for direct schema and name queries
    pub fn properties(&self) -> &PropertyRegistry {
        &self.properties
    }

    /// Read one property as its wire value
    pub fn get_property(&self, name: &str) -> Result<serde_json::Value, PropertyError> {
        self.properties.get(name)
    }

    /// Write one property from a wire value
    pub fn set_property(&self, name: &str, wire: &serde_json::Value) -> SetPropertyResult {
        self.properties.set(name, wire)
    }

    /// Current wire value of every property
    pub fn property_snapshot(&self) -> serde_json::Map<String, serde_json::Value> {
        self.properties.snapshot()
    }

    // ── Actions ─────────────────────────────────────────────────────────────

    /// Submit an action invocation from its wire input
    pub async fn submit_action(
        &self,
        name: &str,
        wire_input: &serde_json::Value,
    ) -> Result<Arc<Action>, SubmitError> {
        self.engine.submit(name, wire_input).await
    }

    /// Look up a live action by name and id
    pub fn action(&self, name: &str, id: uuid::Uuid) -> Option<Arc<Action>> {
        self.engine.get(name, id)
    }

    /// Actions in submission order, optionally filtered by name
    pub fn actions(&self, name: Option<&str>) -> Vec<Arc<Action>> {
        self.engine.actions(name)
    }

    /// Remove an action, cancelling it first if still running
    pub fn remove_action(&self, name: &str, id: uuid::Uuid) -> bool {
        self.engine.remove(name, id)
    }

    // ── Events ──────────────────────────────────────────────────────────────

    /// Emit an event; the payload must satisfy the declared schema
    pub fn emit_event(&self, name: &str, data: Option<Value>) -> Result<(), EventError> {
        let decl = self
            .event_decls
            .get(name)
            .ok_or_else(|| EventError::UnknownEvent(name.to_string()))?;

        if let Some(schema) = &decl.schema {
            match &data {
                Some(value) => {
                    if !schema.data_type().matches(value) || !schema.is_valid(value) {
                        return Err(EventError::InvalidData(name.to_string()));
                    }
                }
                None => {
                    if !schema.is_nullable() {
                        return Err(EventError::InvalidData(name.to_string()));
                    }
                }
            }
        }

        // Append and notify under the per-name emit lock: concurrent
        // emitters of the same name must reach subscribers in log order.
        {
            let _emit = decl.emit_lock.lock();
            let event = Arc::new(Event::new(name, data));
            let record = event.describe();
            self.events.push(event);
            self.hub.event(name, record);
        }
        tracing::debug!(thing = %self.name, event = %name, "event emitted");
        Ok(())
    }

    /// Stored events, oldest first; all names merged when `name` is `None`
    pub fn events(&self, name: Option<&str>) -> Vec<Arc<Event>> {
        self.events.snapshot(name)
    }

    // ── Notifications ───────────────────────────────────────────────────────

    /// Register a notification sink under a selector
    pub fn subscribe(
        &self,
        selector: Selector,
        sink: Arc<dyn NotificationSink>,
    ) -> SubscriptionId {
        self.hub.subscribe(selector, sink)
    }

    /// Remove a subscription
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.hub.unsubscribe(id)
    }

    // ── Lifecycle ───────────────────────────────────────────────────────────

    /// Stop accepting actions, cancel outstanding work, await the workers
    pub async fn shutdown(&self) {
        self.engine.shutdown().await;
    }

    // ── Description ─────────────────────────────────────────────────────────

    /// Description of one property: schema metadata plus its link
    pub fn describe_property(&self, name: &str) -> Option<serde_json::Value> {
        let schema = self.properties.schema(name)?;
        let mut entry = match schema.describe() {
            serde_json::Value::Object(obj) => obj,
            _ => serde_json::Map::new(),
        };
        entry.insert(
            "links".to_string(),
            serde_json::json!([{
                "rel": "property",
                "href": format!("{}/properties/{name}", self.base_href),
            }]),
        );
        Some(serde_json::Value::Object(entry))
    }

    /// Description of one action type: metadata, input schema, link
    pub fn describe_action_type(&self, name: &str) -> Option<serde_json::Value> {
        let descriptor = self.engine.descriptor(name)?;
        let mut entry = match descriptor.describe_type() {
            serde_json::Value::Object(obj) => obj,
            _ => serde_json::Map::new(),
        };
        entry.insert(
            "links".to_string(),
            serde_json::json!([{
                "rel": "action",
                "href": format!("{}/actions/{name}", self.base_href),
            }]),
        );
        Some(serde_json::Value::Object(entry))
    }

    /// Description of one event type: payload schema (if any) plus link
    pub fn describe_event_type(&self, name: &str) -> Option<serde_json::Value> {
        let decl = self.event_decls.get(name)?;
        let mut entry = serde_json::Map::new();
        if let Some(desc) = &decl.description {
            entry.insert("description".to_string(), desc.as_str().into());
        }
        if let Some(schema) = &decl.schema {
            if let serde_json::Value::Object(obj) = schema.describe() {
                for (k, v) in obj {
                    entry.insert(k, v);
                }
            }
        }
        entry.insert(
            "links".to_string(),
            serde_json::json!([{
                "rel": "event",
                "href": format!("{}/events/{name}", self.base_href),
            }]),
        );
        Some(serde_json::Value::Object(entry))
    }

    /// The Thing description document
    pub fn describe(&self) -> serde_json::Value {
        let mut map = serde_json::Map::new();
        map.insert("name".to_string(), self.name.as_str().into());
        if let Some(title) = &self.title {
            map.insert("title".to_string(), title.as_str().into());
        }
        if let Some(desc) = &self.description {
            map.insert("description".to_string(), desc.as_str().into());
        }
        if !self.attypes.is_empty() {
            map.insert(
                "@type".to_string(),
                serde_json::Value::Array(
                    self.attypes.iter().map(|t| t.as_str().into()).collect(),
                ),
            );
        }

        let mut properties = serde_json::Map::new();
        for name in self.properties.names() {
            if let Some(entry) = self.describe_property(name) {
                properties.insert(name.to_string(), entry);
            }
        }
        map.insert("properties".to_string(), serde_json::Value::Object(properties));

        let mut actions = serde_json::Map::new();
        for name in &self.action_names {
            if let Some(entry) = self.describe_action_type(name) {
                actions.insert(name.clone(), entry);
            }
        }
        map.insert("actions".to_string(), serde_json::Value::Object(actions));

        let mut events = serde_json::Map::new();
        for name in &self.event_order {
            if let Some(entry) = self.describe_event_type(name) {
                events.insert(name.clone(), entry);
            }
        }
        map.insert("events".to_string(), serde_json::Value::Object(events));

        map.insert(
            "links".to_string(),
            serde_json::json!([
                { "rel": "properties", "href": format!("{}/properties", self.base_href) },
                { "rel": "actions", "href": format!("{}/actions", self.base_href) },
                { "rel": "events", "href": format!("{}/events", self.base_href) },
            ]),
        );

        serde_json::Value::Object(map)
    }
}

impl std::fmt::Debug for Thing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Thing")
            .field("name", &self.name)
            .field("properties", &self.properties.names().count())
            .field("actions", &self.action_names.len())
            .field("events", &self.event_order.len())
            .finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
