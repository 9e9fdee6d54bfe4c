//! Native value model
//!
//! A closed tagged union over every native type the runtime can hold: the
//! full primitive matrix (booleans, all integer widths, floats, decimal,
//! string, char, enum-by-name, UUID, date/time variants, duration) plus
//! homogeneous arrays and keyed objects of the same.

use std::collections::BTreeMap;

use chrono::{DateTime, FixedOffset, NaiveDateTime};

// ─────────────────────────────────────────────────────────────────────────────
// Value
// ─────────────────────────────────────────────────────────────────────────────

/// A typed native value held by a property, action input, or event payload
///
/// Width information is preserved: a `UInt8` stays a `UInt8` rather than
/// collapsing into a generic integer, so re-serialization and validation
/// never widen or truncate.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Null (only reachable through a nullable schema)
    Null,
    /// Boolean value
    Bool(bool),
    /// Signed 8-bit integer
    Int8(i8),
    /// Signed 16-bit integer
    Int16(i16),
    /// Signed 32-bit integer
    Int32(i32),
    /// Signed 64-bit integer
    Int64(i64),
    /// Unsigned 8-bit integer
    UInt8(u8),
    /// Unsigned 16-bit integer
    UInt16(u16),
    /// Unsigned 32-bit integer
    UInt32(u32),
    /// Unsigned 64-bit integer
    UInt64(u64),
    /// 32-bit floating point
    Float32(f32),
    /// 64-bit floating point
    Float64(f64),
    /// Arbitrary-precision decimal, digits preserved verbatim
    Decimal(serde_json::Number),
    /// UTF-8 string
    String(String),
    /// Single character
    Char(char),
    /// Canonical variant name of an enum-by-name type
    Enum(String),
    /// UUID in the canonical hyphenated form
    Uuid(uuid::Uuid),
    /// Date-time without an offset
    DateTime(NaiveDateTime),
    /// Date-time with an explicit offset
    DateTimeOffset(DateTime<FixedOffset>),
    /// Signed duration (ISO-8601 on the wire)
    Duration(chrono::Duration),
    /// Ordered array of values
    Array(Vec<Value>),
    /// Keyed object of values
    Object(BTreeMap<String, Value>),
}

impl Default for Value {
    fn default() -> Self {
        Value::Null
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Value Accessors
// ─────────────────────────────────────────────────────────────────────────────

impl Value {
    /// Check if value is null
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Get as boolean
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Get as i64, widening from any signed or in-range unsigned width
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int8(v) => Some(i64::from(*v)),
            Value::Int16(v) => Some(i64::from(*v)),
            Value::Int32(v) => Some(i64::from(*v)),
            Value::Int64(v) => Some(*v),
            Value::UInt8(v) => Some(i64::from(*v)),
            Value::UInt16(v) => Some(i64::from(*v)),
            Value::UInt32(v) => Some(i64::from(*v)),
            Value::UInt64(v) => i64::try_from(*v).ok(),
            Value::Decimal(n) => n.as_i64(),
            _ => None,
        }
    }

    /// Get as u64, widening from any unsigned or non-negative signed width
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Value::UInt8(v) => Some(u64::from(*v)),
            Value::UInt16(v) => Some(u64::from(*v)),
            Value::UInt32(v) => Some(u64::from(*v)),
            Value::UInt64(v) => Some(*v),
            Value::Int8(v) => u64::try_from(*v).ok(),
            Value::Int16(v) => u64::try_from(*v).ok(),
            Value::Int32(v) => u64::try_from(*v).ok(),
            Value::Int64(v) => u64::try_from(*v).ok(),
            Value::Decimal(n) => n.as_u64(),
            _ => None,
        }
    }

    /// Get as f64, widening from any numeric kind
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float32(v) => Some(f64::from(*v)),
            Value::Float64(v) => Some(*v),
            Value::Decimal(n) => n.as_f64(),
            _ => self.as_i64().map(|i| i as f64).or_else(|| {
                if let Value::UInt64(v) = self {
                    Some(*v as f64)
                } else {
                    None
                }
            }),
        }
    }

    /// Get as string reference (plain strings and enum variant names)
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            Value::Enum(s) => Some(s),
            _ => None,
        }
    }

    /// Get as array reference
    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(arr) => Some(arr),
            _ => None,
        }
    }

    /// Get as object reference
    pub fn as_object(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Object(fields) => Some(fields),
            _ => None,
        }
    }

    /// Get a field from an object
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.as_object().and_then(|obj| obj.get(key))
    }

    /// Name of the value's kind, for diagnostics
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int8(_) => "int8",
            Value::Int16(_) => "int16",
            Value::Int32(_) => "int32",
            Value::Int64(_) => "int64",
            Value::UInt8(_) => "uint8",
            Value::UInt16(_) => "uint16",
            Value::UInt32(_) => "uint32",
            Value::UInt64(_) => "uint64",
            Value::Float32(_) => "float32",
            Value::Float64(_) => "float64",
            Value::Decimal(_) => "decimal",
            Value::String(_) => "string",
            Value::Char(_) => "char",
            Value::Enum(_) => "enum",
            Value::Uuid(_) => "uuid",
            Value::DateTime(_) => "datetime",
            Value::DateTimeOffset(_) => "datetime-offset",
            Value::Duration(_) => "duration",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// From Implementations
// ─────────────────────────────────────────────────────────────────────────────

impl From<()> for Value {
    fn from(_: ()) -> Self {
        Value::Null
    }
}

macro_rules! impl_value_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    Value::$variant(v)
                }
            }
        )*
    };
}

impl_value_from! {
    bool => Bool,
    i8 => Int8,
    i16 => Int16,
    i32 => Int32,
    i64 => Int64,
    u8 => UInt8,
    u16 => UInt16,
    u32 => UInt32,
    u64 => UInt64,
    f32 => Float32,
    f64 => Float64,
    char => Char,
    String => String,
    uuid::Uuid => Uuid,
    NaiveDateTime => DateTime,
    chrono::Duration => Duration,
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<DateTime<FixedOffset>> for Value {
    fn from(v: DateTime<FixedOffset>) -> Self {
        Value::DateTimeOffset(v)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Value::Array(v.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(val) => val.into(),
            None => Value::Null,
        }
    }
}

impl From<BTreeMap<String, Value>> for Value {
    fn from(fields: BTreeMap<String, Value>) -> Self {
        Value::Object(fields)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
