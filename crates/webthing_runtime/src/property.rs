//! Property registry
//!
//! A name-keyed table of bound property accessors, populated once when the
//! Thing is built and read-only thereafter. Sets run through conversion and
//! validation before the bound setter is invoked; every failure kind is a
//! distinct return value so the transport can map it to a status code.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use webthing_types::{Schema, Value};

use crate::NotificationHub;

/// Bound getter: reads the current native value from the device state
pub type PropertyGetter = Box<dyn Fn() -> Value + Send + Sync>;

/// Bound setter: writes an already-validated native value
pub type PropertySetter = Box<dyn Fn(Value) + Send + Sync>;

// ─────────────────────────────────────────────────────────────────────────────
// Results
// ─────────────────────────────────────────────────────────────────────────────

/// Outcome of a property write
///
/// All failure kinds are reported as values, never panics, so the caller
/// must handle each and the transport can map them to distinct codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetPropertyResult {
    /// Converted, validated, written, and notified
    Ok,
    /// Conversion or constraint failure; nothing was mutated
    InvalidValue,
    /// The property rejects writes; nothing was converted
    ReadOnly,
    /// No property under that name
    NotFound,
}

/// Errors from property reads
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PropertyError {
    #[error("unknown property: {0}")]
    NotFound(String),
}

// ─────────────────────────────────────────────────────────────────────────────
// Registry
// ─────────────────────────────────────────────────────────────────────────────

struct PropertySlot {
    /// Canonical name as registered (lookup keys may be case-folded)
    name: String,
    schema: Schema,
    getter: PropertyGetter,
    setter: PropertySetter,
    /// Serializes the convert/validate/write/notify sequence per property
    write_lock: Mutex<()>,
}

/// Per-Thing table of property accessors
pub struct PropertyRegistry {
    thing: String,
    ignore_case: bool,
    slots: HashMap<String, PropertySlot>,
    order: Vec<String>,
    hub: Arc<NotificationHub>,
}

impl PropertyRegistry {
    pub(crate) fn new(
        thing: impl Into<String>,
        ignore_case: bool,
        hub: Arc<NotificationHub>,
    ) -> Self {
        Self {
            thing: thing.into(),
            ignore_case,
            slots: HashMap::new(),
            order: Vec::new(),
            hub,
        }
    }

    fn key(&self, name: &str) -> String {
        if self.ignore_case {
            name.to_lowercase()
        } else {
            name.to_string()
        }
    }

    /// Register an accessor; build-time only, the table is frozen afterwards
    pub(crate) fn insert(
        &mut self,
        name: impl Into<String>,
        schema: Schema,
        getter: PropertyGetter,
        setter: PropertySetter,
    ) {
        let name = name.into();
        let key = self.key(&name);
        self.order.push(name.clone());
        self.slots.insert(
            key,
            PropertySlot {
                name,
                schema,
                getter,
                setter,
                write_lock: Mutex::new(()),
            },
        );
    }

    /// Registered property names, in registration order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.slots.contains_key(&self.key(name))
    }

    /// Declared schema for a property
    pub fn schema(&self, name: &str) -> Option<&Schema> {
        self.slots.get(&self.key(name)).map(|slot| &slot.schema)
    }

    /// Read a property as its wire value
    ///
    /// Works for read-only properties too.
    pub fn get(&self, name: &str) -> Result<serde_json::Value, PropertyError> {
        let slot = self
            .slots
            .get(&self.key(name))
            .ok_or_else(|| PropertyError::NotFound(name.to_string()))?;
        Ok((slot.getter)().to_wire())
    }

    /// Write a property from a wire value
    ///
    /// Lookup, then the read-only gate (before any conversion), then
    /// conversion and validation; only a fully valid value reaches the
    /// setter, and only a successful write raises a notification.
    pub fn set(&self, name: &str, wire: &serde_json::Value) -> SetPropertyResult {
        let slot = match self.slots.get(&self.key(name)) {
            Some(slot) => slot,
            None => return SetPropertyResult::NotFound,
        };
        if slot.schema.is_read_only() {
            return SetPropertyResult::ReadOnly;
        }

        let _write = slot.write_lock.lock();
        let native = match slot.schema.interpret(wire) {
            Ok(native) => native,
            Err(err) => {
                tracing::debug!(
                    thing = %self.thing,
                    property = %slot.name,
                    error = %err,
                    "property write rejected"
                );
                return SetPropertyResult::InvalidValue;
            }
        };
        if !slot.schema.is_valid(&native) {
            tracing::debug!(
                thing = %self.thing,
                property = %slot.name,
                "property write violates constraints"
            );
            return SetPropertyResult::InvalidValue;
        }

        let wire_value = native.to_wire();
        (slot.setter)(native);
        self.hub.property_status(&slot.name, wire_value);
        SetPropertyResult::Ok
    }

    /// Current wire value of every property, in registration order
    pub fn snapshot(&self) -> serde_json::Map<String, serde_json::Value> {
        let mut map = serde_json::Map::new();
        for name in &self.order {
            if let Some(slot) = self.slots.get(&self.key(name)) {
                map.insert(slot.name.clone(), (slot.getter)().to_wire());
            }
        }
        map
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use webthing_types::DataType;

    fn bound_slot(initial: Value) -> (Arc<Mutex<Value>>, PropertyGetter, PropertySetter) {
        let state = Arc::new(Mutex::new(initial));
        let get_state = Arc::clone(&state);
        let set_state = Arc::clone(&state);
        let getter: PropertyGetter = Box::new(move || get_state.lock().clone());
        let setter: PropertySetter = Box::new(move |v| *set_state.lock() = v);
        (state, getter, setter)
    }

    fn registry() -> PropertyRegistry {
        PropertyRegistry::new("lamp", false, Arc::new(NotificationHub::new("lamp")))
    }

    #[test]
    fn test_non_nullable_bool_rejects_null() {
        let mut reg = registry();
        let (state, getter, setter) = bound_slot(Value::Bool(true));
        reg.insert("on", Schema::new(DataType::Bool), getter, setter);

        assert_eq!(reg.set("on", &serde_json::json!(true)), SetPropertyResult::Ok);
        assert_eq!(
            reg.set("on", &serde_json::Value::Null),
            SetPropertyResult::InvalidValue
        );
        assert_eq!(*state.lock(), Value::Bool(true));
        assert_eq!(reg.get("on").unwrap(), serde_json::json!(true));
    }

    #[test]
    fn test_nullable_property_accepts_null() {
        let mut reg = registry();
        let (_, getter, setter) = bound_slot(Value::Bool(false));
        reg.insert("mode", Schema::new(DataType::Bool).nullable(), getter, setter);

        assert_eq!(
            reg.set("mode", &serde_json::Value::Null),
            SetPropertyResult::Ok
        );
        assert_eq!(reg.get("mode").unwrap(), serde_json::Value::Null);
    }

    #[test]
    fn test_range_constrained_integer() {
        let mut reg = registry();
        let (state, getter, setter) = bound_slot(Value::Int32(10));
        reg.insert(
            "brightness",
            Schema::new(DataType::Int32)
                .with_minimum(0.0)
                .with_maximum(100.0),
            getter,
            setter,
        );

        assert_eq!(
            reg.set("brightness", &serde_json::json!(150)),
            SetPropertyResult::InvalidValue
        );
        assert_eq!(*state.lock(), Value::Int32(10));
        assert_eq!(
            reg.set("brightness", &serde_json::json!(50)),
            SetPropertyResult::Ok
        );
        assert_eq!(*state.lock(), Value::Int32(50));
    }

    #[test]
    fn test_read_only_never_mutates() {
        let mut reg = registry();
        let (state, getter, setter) = bound_slot(Value::Int32(7));
        reg.insert(
            "serial",
            Schema::new(DataType::Int32).read_only(),
            getter,
            setter,
        );

        // Valid input or not, a read-only property never changes.
        assert_eq!(
            reg.set("serial", &serde_json::json!(9)),
            SetPropertyResult::ReadOnly
        );
        assert_eq!(
            reg.set("serial", &serde_json::json!("junk")),
            SetPropertyResult::ReadOnly
        );
        assert_eq!(*state.lock(), Value::Int32(7));
        // Reads still work.
        assert_eq!(reg.get("serial").unwrap(), serde_json::json!(7));
    }

    #[test]
    fn test_unknown_property() {
        let reg = registry();
        assert_eq!(
            reg.set("ghost", &serde_json::json!(1)),
            SetPropertyResult::NotFound
        );
        assert_eq!(
            reg.get("ghost"),
            Err(PropertyError::NotFound("ghost".to_string()))
        );
    }

    #[test]
    fn test_case_insensitive_lookup() {
        let hub = Arc::new(NotificationHub::new("lamp"));
        let mut reg = PropertyRegistry::new("lamp", true, hub);
        let (_, getter, setter) = bound_slot(Value::Bool(false));
        reg.insert("On", Schema::new(DataType::Bool), getter, setter);

        assert!(reg.contains("on"));
        assert!(reg.contains("ON"));
        assert_eq!(reg.set("oN", &serde_json::json!(true)), SetPropertyResult::Ok);
        // The canonical spelling survives in snapshots.
        assert!(reg.snapshot().contains_key("On"));
    }

    #[test]
    fn test_set_notifies_with_new_value() {
        use crate::{NotificationSink, Selector, SinkClosed};

        struct Capture(Mutex<Vec<serde_json::Value>>);
        impl NotificationSink for Capture {
            fn deliver(&self, frame: &serde_json::Value) -> Result<(), SinkClosed> {
                self.0.lock().push(frame.clone());
                Ok(())
            }
        }

        let hub = Arc::new(NotificationHub::new("lamp"));
        let sink = Arc::new(Capture(Mutex::new(Vec::new())));
        hub.subscribe(Selector::Properties, sink.clone());

        let mut reg = PropertyRegistry::new("lamp", false, Arc::clone(&hub));
        let (_, getter, setter) = bound_slot(Value::Bool(false));
        reg.insert("on", Schema::new(DataType::Bool), getter, setter);

        reg.set("on", &serde_json::json!(true));
        // A failed write must not notify.
        reg.set("on", &serde_json::json!("junk"));

        let frames = sink.0.lock().clone();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0]["data"]["on"], true);
    }
}
