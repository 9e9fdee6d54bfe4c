//! Schema descriptors and validation
//!
//! A [`Schema`] is the immutable constraint descriptor built once per
//! property or action parameter at registration time. It owns the declared
//! [`DataType`], the nullability and read-only flags, and the declared
//! constraint set. Validation is conjunctive: every declared constraint
//! must pass, and an absent constraint never fails a value.

use regex::Regex;

use crate::{ConvertError, ConvertResult, DataType, Value};

/// Tolerance for the float `multipleOf` check
const MULTIPLE_OF_EPSILON: f64 = 1e-9;

// ─────────────────────────────────────────────────────────────────────────────
// Schema
// ─────────────────────────────────────────────────────────────────────────────

/// Declared metadata and constraints for one property or parameter
#[derive(Debug, Clone)]
pub struct Schema {
    data_type: DataType,
    nullable: bool,
    read_only: bool,
    title: Option<String>,
    description: Option<String>,
    unit: Option<String>,
    minimum: Option<f64>,
    maximum: Option<f64>,
    exclusive_minimum: Option<f64>,
    exclusive_maximum: Option<f64>,
    multiple_of: Option<f64>,
    min_length: Option<u64>,
    max_length: Option<u64>,
    pattern: Option<Regex>,
    enumeration: Option<Vec<Value>>,
    min_items: Option<u64>,
    max_items: Option<u64>,
    unique_items: bool,
}

impl Schema {
    /// Create a schema for a declared kind, with no constraints
    pub fn new(data_type: DataType) -> Self {
        Self {
            data_type,
            nullable: false,
            read_only: false,
            title: None,
            description: None,
            unit: None,
            minimum: None,
            maximum: None,
            exclusive_minimum: None,
            exclusive_maximum: None,
            multiple_of: None,
            min_length: None,
            max_length: None,
            pattern: None,
            enumeration: None,
            min_items: None,
            max_items: None,
            unique_items: false,
        }
    }

    /// Mark the value as nullable
    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    /// Mark the property as read-only
    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    /// Set a human-readable title
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Set a human-readable description
    pub fn with_description(mut self, desc: impl Into<String>) -> Self {
        self.description = Some(desc.into());
        self
    }

    /// Set a unit annotation
    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    /// Set the inclusive minimum
    pub fn with_minimum(mut self, value: f64) -> Self {
        self.minimum = Some(value);
        self
    }

    /// Set the inclusive maximum
    pub fn with_maximum(mut self, value: f64) -> Self {
        self.maximum = Some(value);
        self
    }

    /// Set the exclusive minimum
    pub fn with_exclusive_minimum(mut self, value: f64) -> Self {
        self.exclusive_minimum = Some(value);
        self
    }

    /// Set the exclusive maximum
    pub fn with_exclusive_maximum(mut self, value: f64) -> Self {
        self.exclusive_maximum = Some(value);
        self
    }

    /// Require the value to be a multiple of the given step
    pub fn with_multiple_of(mut self, value: f64) -> Self {
        self.multiple_of = Some(value);
        self
    }

    /// Set the minimum string length (in characters)
    pub fn with_min_length(mut self, value: u64) -> Self {
        self.min_length = Some(value);
        self
    }

    /// Set the maximum string length (in characters)
    pub fn with_max_length(mut self, value: u64) -> Self {
        self.max_length = Some(value);
        self
    }

    /// Require strings to match a compiled pattern
    pub fn with_pattern(mut self, pattern: Regex) -> Self {
        self.pattern = Some(pattern);
        self
    }

    /// Restrict the value (or each array element) to an allowed set
    pub fn with_enumeration(mut self, values: Vec<Value>) -> Self {
        self.enumeration = Some(values);
        self
    }

    /// Set the minimum array length
    pub fn with_min_items(mut self, value: u64) -> Self {
        self.min_items = Some(value);
        self
    }

    /// Set the maximum array length
    pub fn with_max_items(mut self, value: u64) -> Self {
        self.max_items = Some(value);
        self
    }

    /// Require array elements to be pairwise distinct
    pub fn unique_items(mut self) -> Self {
        self.unique_items = true;
        self
    }

    /// The declared kind
    pub fn data_type(&self) -> &DataType {
        &self.data_type
    }

    /// Whether wire `null` is accepted
    pub fn is_nullable(&self) -> bool {
        self.nullable
    }

    /// Whether the property rejects writes
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    // ─────────────────────────────────────────────────────────────────────
    // Interpretation & Validation
    // ─────────────────────────────────────────────────────────────────────

    /// Convert a wire value through this schema's nullability gate and kind
    ///
    /// This is the single entry point the property registry and action
    /// engine use: `null` maps to [`Value::Null`] iff the schema is
    /// nullable, everything else goes through [`DataType::convert`].
    pub fn interpret(&self, wire: &serde_json::Value) -> ConvertResult<Value> {
        if wire.is_null() {
            return if self.nullable {
                Ok(Value::Null)
            } else {
                Err(ConvertError::UnexpectedNull)
            };
        }
        self.data_type.convert(wire)
    }

    /// Check a native value against every declared constraint
    ///
    /// Checks are independent and conjunctive. A value of the right kind
    /// with no declared constraints is always valid.
    pub fn is_valid(&self, value: &Value) -> bool {
        if value.is_null() {
            return self.nullable;
        }

        if let Some(number) = value.as_f64() {
            if !self.numeric_constraints_hold(number) {
                return false;
            }
        }

        if let Some(s) = value.as_str() {
            if !self.string_constraints_hold(s) {
                return false;
            }
        }

        if let Value::Array(elements) = value {
            if !self.array_constraints_hold(elements) {
                return false;
            }
        } else if let Some(allowed) = &self.enumeration {
            if !allowed.contains(value) {
                return false;
            }
        }

        true
    }

    fn numeric_constraints_hold(&self, v: f64) -> bool {
        if let Some(min) = self.minimum {
            if v < min {
                return false;
            }
        }
        if let Some(max) = self.maximum {
            if v > max {
                return false;
            }
        }
        if let Some(min) = self.exclusive_minimum {
            if v <= min {
                return false;
            }
        }
        if let Some(max) = self.exclusive_maximum {
            if v >= max {
                return false;
            }
        }
        if let Some(step) = self.multiple_of {
            if step != 0.0 {
                let remainder = (v % step).abs();
                if remainder > MULTIPLE_OF_EPSILON
                    && (step.abs() - remainder) > MULTIPLE_OF_EPSILON
                {
                    return false;
                }
            }
        }
        true
    }

    fn string_constraints_hold(&self, s: &str) -> bool {
        let chars = s.chars().count() as u64;
        if let Some(min) = self.min_length {
            if chars < min {
                return false;
            }
        }
        if let Some(max) = self.max_length {
            if chars > max {
                return false;
            }
        }
        if let Some(pattern) = &self.pattern {
            if !pattern.is_match(s) {
                return false;
            }
        }
        true
    }

    fn array_constraints_hold(&self, elements: &[Value]) -> bool {
        let len = elements.len() as u64;
        if let Some(min) = self.min_items {
            if len < min {
                return false;
            }
        }
        if let Some(max) = self.max_items {
            if len > max {
                return false;
            }
        }
        if self.unique_items {
            for (i, a) in elements.iter().enumerate() {
                if elements[i + 1..].contains(a) {
                    return false;
                }
            }
        }
        // Per-element checks: enum membership, and kind conformance when an
        // item type is declared.
        let item_type = match &self.data_type {
            DataType::Array { items } => items.as_deref(),
            _ => None,
        };
        for element in elements {
            if let Some(allowed) = &self.enumeration {
                if !allowed.contains(element) {
                    return false;
                }
            }
            if let Some(item_type) = item_type {
                if !item_type.matches(element) {
                    return false;
                }
            }
        }
        true
    }

    // ─────────────────────────────────────────────────────────────────────
    // Description
    // ─────────────────────────────────────────────────────────────────────

    /// Project the declared metadata as a JSON-Schema-like description map
    pub fn describe(&self) -> serde_json::Value {
        let mut map = serde_json::Map::new();
        map.insert(
            "type".to_string(),
            serde_json::Value::String(self.data_type.json_type_name().to_string()),
        );
        if let Some(title) = &self.title {
            map.insert("title".to_string(), title.as_str().into());
        }
        if let Some(desc) = &self.description {
            map.insert("description".to_string(), desc.as_str().into());
        }
        if let Some(unit) = &self.unit {
            map.insert("unit".to_string(), unit.as_str().into());
        }
        if self.read_only {
            map.insert("readOnly".to_string(), true.into());
        }
        if let Some(v) = self.minimum {
            map.insert("minimum".to_string(), v.into());
        }
        if let Some(v) = self.maximum {
            map.insert("maximum".to_string(), v.into());
        }
        if let Some(v) = self.exclusive_minimum {
            map.insert("exclusiveMinimum".to_string(), v.into());
        }
        if let Some(v) = self.exclusive_maximum {
            map.insert("exclusiveMaximum".to_string(), v.into());
        }
        if let Some(v) = self.multiple_of {
            map.insert("multipleOf".to_string(), v.into());
        }
        if let Some(v) = self.min_length {
            map.insert("minLength".to_string(), v.into());
        }
        if let Some(v) = self.max_length {
            map.insert("maxLength".to_string(), v.into());
        }
        if let Some(pattern) = &self.pattern {
            map.insert("pattern".to_string(), pattern.as_str().into());
        }
        if let Some(values) = &self.enumeration {
            map.insert(
                "enum".to_string(),
                serde_json::Value::Array(values.iter().map(Value::to_wire).collect()),
            );
        }
        if let Some(v) = self.min_items {
            map.insert("minItems".to_string(), v.into());
        }
        if let Some(v) = self.max_items {
            map.insert("maxItems".to_string(), v.into());
        }
        if self.unique_items {
            map.insert("uniqueItems".to_string(), true.into());
        }
        serde_json::Value::Object(map)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_unconstrained_is_always_valid() {
        let schema = Schema::new(DataType::Int32);
        assert!(schema.is_valid(&Value::Int32(i32::MIN)));
        assert!(schema.is_valid(&Value::Int32(i32::MAX)));
    }

    #[test]
    fn test_range_constraints() {
        let schema = Schema::new(DataType::Int32)
            .with_minimum(0.0)
            .with_maximum(100.0);
        assert!(schema.is_valid(&Value::Int32(0)));
        assert!(schema.is_valid(&Value::Int32(100)));
        assert!(!schema.is_valid(&Value::Int32(-1)));
        assert!(!schema.is_valid(&Value::Int32(150)));
    }

    #[test]
    fn test_exclusive_bounds() {
        let schema = Schema::new(DataType::Float64)
            .with_exclusive_minimum(0.0)
            .with_exclusive_maximum(1.0);
        assert!(schema.is_valid(&Value::Float64(0.5)));
        assert!(!schema.is_valid(&Value::Float64(0.0)));
        assert!(!schema.is_valid(&Value::Float64(1.0)));
    }

    #[test]
    fn test_multiple_of() {
        let schema = Schema::new(DataType::Int32).with_multiple_of(5.0);
        assert!(schema.is_valid(&Value::Int32(0)));
        assert!(schema.is_valid(&Value::Int32(15)));
        assert!(!schema.is_valid(&Value::Int32(7)));

        let float_schema = Schema::new(DataType::Float64).with_multiple_of(0.1);
        assert!(float_schema.is_valid(&Value::Float64(0.3)));
        assert!(!float_schema.is_valid(&Value::Float64(0.35)));
    }

    #[test]
    fn test_string_constraints() {
        let schema = Schema::new(DataType::String)
            .with_min_length(2)
            .with_max_length(4)
            .with_pattern(Regex::new("^[a-z]+$").unwrap());
        assert!(schema.is_valid(&Value::from("abc")));
        assert!(!schema.is_valid(&Value::from("a")));
        assert!(!schema.is_valid(&Value::from("abcde")));
        assert!(!schema.is_valid(&Value::from("ABC")));
    }

    #[test]
    fn test_enumeration_membership() {
        let schema = Schema::new(DataType::String)
            .with_enumeration(vec![Value::from("on"), Value::from("off")]);
        assert!(schema.is_valid(&Value::from("on")));
        assert!(!schema.is_valid(&Value::from("dim")));
    }

    #[test]
    fn test_array_constraints() {
        let schema = Schema::new(DataType::Array {
            items: Some(Box::new(DataType::UInt8)),
        })
        .with_min_items(1)
        .with_max_items(3)
        .unique_items();

        let ok = Value::Array(vec![Value::UInt8(1), Value::UInt8(2)]);
        assert!(schema.is_valid(&ok));

        let empty = Value::Array(vec![]);
        assert!(!schema.is_valid(&empty));

        let too_long = Value::Array(vec![
            Value::UInt8(1),
            Value::UInt8(2),
            Value::UInt8(3),
            Value::UInt8(4),
        ]);
        assert!(!schema.is_valid(&too_long));

        let duplicate = Value::Array(vec![Value::UInt8(1), Value::UInt8(1)]);
        assert!(!schema.is_valid(&duplicate));

        // Wrong element kind fails even when the count is in range.
        let wrong_kind = Value::Array(vec![Value::Int64(1)]);
        assert!(!schema.is_valid(&wrong_kind));
    }

    #[test]
    fn test_per_element_enumeration() {
        let schema = Schema::new(DataType::Array { items: None })
            .with_enumeration(vec![Value::Int64(1), Value::Int64(2)]);
        assert!(schema.is_valid(&Value::Array(vec![Value::Int64(1), Value::Int64(2)])));
        assert!(!schema.is_valid(&Value::Array(vec![Value::Int64(3)])));
    }

    #[test]
    fn test_null_validity_follows_nullability() {
        assert!(!Schema::new(DataType::Bool).is_valid(&Value::Null));
        assert!(Schema::new(DataType::Bool).nullable().is_valid(&Value::Null));
    }

    #[test]
    fn test_interpret_null_gate() {
        let strict = Schema::new(DataType::Bool);
        assert_eq!(
            strict.interpret(&serde_json::Value::Null),
            Err(ConvertError::UnexpectedNull)
        );

        let relaxed = Schema::new(DataType::Bool).nullable();
        assert_eq!(relaxed.interpret(&serde_json::Value::Null), Ok(Value::Null));
        assert_eq!(relaxed.interpret(&json!(true)), Ok(Value::Bool(true)));
    }

    #[test]
    fn test_describe_metadata() {
        let schema = Schema::new(DataType::UInt8)
            .with_minimum(0.0)
            .with_maximum(100.0)
            .with_unit("percent")
            .read_only();
        let desc = schema.describe();
        assert_eq!(desc["type"], "integer");
        assert_eq!(desc["minimum"], 0.0);
        assert_eq!(desc["maximum"], 100.0);
        assert_eq!(desc["unit"], "percent");
        assert_eq!(desc["readOnly"], true);
    }
}
