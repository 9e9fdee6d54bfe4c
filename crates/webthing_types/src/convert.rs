//! Wire/native conversion layer
//!
//! `DataType` is the closed catalogue of native kinds a property or action
//! parameter may declare. Conversion maps a wire `serde_json::Value` into a
//! typed [`Value`] without loss: a number that does not fit the declared
//! width is rejected, never truncated. The inverse, [`Value::to_wire`],
//! re-serializes a native value into its exact wire form.
//!
//! Conversion is purely functional and never panics on malformed input;
//! every failure is a [`ConvertError`] value so callers can surface a
//! client error instead of crashing.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDateTime, SecondsFormat};

use crate::Value;

// ─────────────────────────────────────────────────────────────────────────────
// Convert Error
// ─────────────────────────────────────────────────────────────────────────────

/// Errors produced by wire-to-native conversion
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConvertError {
    #[error("expected {expected}, got {actual}")]
    TypeMismatch {
        expected: &'static str,
        actual: &'static str,
    },

    #[error("value does not fit {kind}")]
    OutOfRange { kind: &'static str },

    #[error("expected a single-character string")]
    NotACharacter,

    #[error("unknown enum variant: {variant}")]
    UnknownVariant { variant: String },

    #[error("malformed {kind} string")]
    MalformedString { kind: &'static str },

    #[error("null is not allowed here")]
    UnexpectedNull,

    #[error("unknown field: {field}")]
    UnknownField { field: String },

    #[error("missing field: {field}")]
    MissingField { field: String },
}

/// Result type for conversion operations
pub type ConvertResult<T> = Result<T, ConvertError>;

fn wire_kind(wire: &serde_json::Value) -> &'static str {
    match wire {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Data Type Catalogue
// ─────────────────────────────────────────────────────────────────────────────

/// The closed set of native kinds a schema can declare
///
/// The kind is resolved once at registration time and stored in the schema;
/// the runtime never re-inspects type metadata after that.
#[derive(Debug, Clone, PartialEq)]
pub enum DataType {
    Bool,
    Int8,
    Int16,
    Int32,
    Int64,
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    Float32,
    Float64,
    /// Arbitrary-precision decimal; wire digits are preserved verbatim
    Decimal,
    String,
    /// A string of exactly one character
    Char,
    /// Enum-by-name; matching is case-insensitive, the canonical spelling
    /// is stored
    Enum { variants: Vec<String> },
    Uuid,
    /// ISO-8601 date-time without an offset
    DateTime,
    /// ISO-8601 date-time with an explicit offset
    DateTimeOffset,
    /// ISO-8601 duration
    Duration,
    /// Homogeneous array; `None` items accept any convertible element
    Array { items: Option<Box<DataType>> },
    /// Keyed object with a declared type per field
    Object { fields: BTreeMap<String, DataType> },
}

impl DataType {
    /// Name of the kind, for diagnostics
    pub fn name(&self) -> &'static str {
        match self {
            DataType::Bool => "bool",
            DataType::Int8 => "int8",
            DataType::Int16 => "int16",
            DataType::Int32 => "int32",
            DataType::Int64 => "int64",
            DataType::UInt8 => "uint8",
            DataType::UInt16 => "uint16",
            DataType::UInt32 => "uint32",
            DataType::UInt64 => "uint64",
            DataType::Float32 => "float32",
            DataType::Float64 => "float64",
            DataType::Decimal => "decimal",
            DataType::String => "string",
            DataType::Char => "char",
            DataType::Enum { .. } => "enum",
            DataType::Uuid => "uuid",
            DataType::DateTime => "datetime",
            DataType::DateTimeOffset => "datetime-offset",
            DataType::Duration => "duration",
            DataType::Array { .. } => "array",
            DataType::Object { .. } => "object",
        }
    }

    /// The JSON type name used in descriptions ("integer", "number", ...)
    pub fn json_type_name(&self) -> &'static str {
        match self {
            DataType::Bool => "boolean",
            DataType::Int8
            | DataType::Int16
            | DataType::Int32
            | DataType::Int64
            | DataType::UInt8
            | DataType::UInt16
            | DataType::UInt32
            | DataType::UInt64 => "integer",
            DataType::Float32 | DataType::Float64 | DataType::Decimal => "number",
            DataType::String
            | DataType::Char
            | DataType::Enum { .. }
            | DataType::Uuid
            | DataType::DateTime
            | DataType::DateTimeOffset
            | DataType::Duration => "string",
            DataType::Array { .. } => "array",
            DataType::Object { .. } => "object",
        }
    }

    /// Check whether a native value is of this kind (no constraint checks)
    pub fn matches(&self, value: &Value) -> bool {
        match (self, value) {
            (DataType::Bool, Value::Bool(_)) => true,
            (DataType::Int8, Value::Int8(_)) => true,
            (DataType::Int16, Value::Int16(_)) => true,
            (DataType::Int32, Value::Int32(_)) => true,
            (DataType::Int64, Value::Int64(_)) => true,
            (DataType::UInt8, Value::UInt8(_)) => true,
            (DataType::UInt16, Value::UInt16(_)) => true,
            (DataType::UInt32, Value::UInt32(_)) => true,
            (DataType::UInt64, Value::UInt64(_)) => true,
            (DataType::Float32, Value::Float32(_)) => true,
            (DataType::Float64, Value::Float64(_)) => true,
            (DataType::Decimal, Value::Decimal(_)) => true,
            (DataType::String, Value::String(_)) => true,
            (DataType::Char, Value::Char(_)) => true,
            (DataType::Enum { .. }, Value::Enum(_)) => true,
            (DataType::Uuid, Value::Uuid(_)) => true,
            (DataType::DateTime, Value::DateTime(_)) => true,
            (DataType::DateTimeOffset, Value::DateTimeOffset(_)) => true,
            (DataType::Duration, Value::Duration(_)) => true,
            (DataType::Array { .. }, Value::Array(_)) => true,
            (DataType::Object { .. }, Value::Object(_)) => true,
            _ => false,
        }
    }

    /// Convert a wire value into a native value of this kind
    ///
    /// Wire `null` is rejected here; the schema layer short-circuits it via
    /// the nullability flag before conversion is reached.
    pub fn convert(&self, wire: &serde_json::Value) -> ConvertResult<Value> {
        if wire.is_null() {
            return Err(ConvertError::UnexpectedNull);
        }

        match self {
            DataType::Bool => wire
                .as_bool()
                .map(Value::Bool)
                .ok_or(ConvertError::TypeMismatch {
                    expected: "boolean",
                    actual: wire_kind(wire),
                }),

            DataType::Int8 => convert_signed(wire, self.name(), |i| {
                i8::try_from(i).map(Value::Int8)
            }),
            DataType::Int16 => convert_signed(wire, self.name(), |i| {
                i16::try_from(i).map(Value::Int16)
            }),
            DataType::Int32 => convert_signed(wire, self.name(), |i| {
                i32::try_from(i).map(Value::Int32)
            }),
            DataType::Int64 => convert_signed(wire, self.name(), |i| {
                i64::try_from(i).map(Value::Int64)
            }),
            DataType::UInt8 => convert_signed(wire, self.name(), |i| {
                u8::try_from(i).map(Value::UInt8)
            }),
            DataType::UInt16 => convert_signed(wire, self.name(), |i| {
                u16::try_from(i).map(Value::UInt16)
            }),
            DataType::UInt32 => convert_signed(wire, self.name(), |i| {
                u32::try_from(i).map(Value::UInt32)
            }),
            DataType::UInt64 => convert_signed(wire, self.name(), |i| {
                u64::try_from(i).map(Value::UInt64)
            }),

            DataType::Float32 => {
                let f = wire.as_f64().ok_or(ConvertError::TypeMismatch {
                    expected: "number",
                    actual: wire_kind(wire),
                })?;
                let narrowed = f as f32;
                if narrowed.is_infinite() && f.is_finite() {
                    return Err(ConvertError::OutOfRange { kind: "float32" });
                }
                Ok(Value::Float32(narrowed))
            }
            DataType::Float64 => wire
                .as_f64()
                .map(Value::Float64)
                .ok_or(ConvertError::TypeMismatch {
                    expected: "number",
                    actual: wire_kind(wire),
                }),
            DataType::Decimal => match wire {
                serde_json::Value::Number(n) => Ok(Value::Decimal(n.clone())),
                _ => Err(ConvertError::TypeMismatch {
                    expected: "number",
                    actual: wire_kind(wire),
                }),
            },

            DataType::String => wire
                .as_str()
                .map(|s| Value::String(s.to_string()))
                .ok_or(ConvertError::TypeMismatch {
                    expected: "string",
                    actual: wire_kind(wire),
                }),
            DataType::Char => {
                let s = wire.as_str().ok_or(ConvertError::TypeMismatch {
                    expected: "string",
                    actual: wire_kind(wire),
                })?;
                let mut chars = s.chars();
                match (chars.next(), chars.next()) {
                    (Some(c), None) => Ok(Value::Char(c)),
                    _ => Err(ConvertError::NotACharacter),
                }
            }
            DataType::Enum { variants } => {
                let s = wire.as_str().ok_or(ConvertError::TypeMismatch {
                    expected: "string",
                    actual: wire_kind(wire),
                })?;
                variants
                    .iter()
                    .find(|v| v.eq_ignore_ascii_case(s))
                    .map(|v| Value::Enum(v.clone()))
                    .ok_or_else(|| ConvertError::UnknownVariant {
                        variant: s.to_string(),
                    })
            }
            DataType::Uuid => {
                let s = wire.as_str().ok_or(ConvertError::TypeMismatch {
                    expected: "string",
                    actual: wire_kind(wire),
                })?;
                uuid::Uuid::parse_str(s)
                    .map(Value::Uuid)
                    .map_err(|_| ConvertError::MalformedString { kind: "uuid" })
            }
            DataType::DateTime => {
                let s = wire.as_str().ok_or(ConvertError::TypeMismatch {
                    expected: "string",
                    actual: wire_kind(wire),
                })?;
                parse_datetime(s)
                    .map(Value::DateTime)
                    .ok_or(ConvertError::MalformedString { kind: "datetime" })
            }
            DataType::DateTimeOffset => {
                let s = wire.as_str().ok_or(ConvertError::TypeMismatch {
                    expected: "string",
                    actual: wire_kind(wire),
                })?;
                DateTime::parse_from_rfc3339(s)
                    .map(Value::DateTimeOffset)
                    .map_err(|_| ConvertError::MalformedString {
                        kind: "datetime-offset",
                    })
            }
            DataType::Duration => {
                let s = wire.as_str().ok_or(ConvertError::TypeMismatch {
                    expected: "string",
                    actual: wire_kind(wire),
                })?;
                parse_iso8601_duration(s)
                    .map(Value::Duration)
                    .ok_or(ConvertError::MalformedString { kind: "duration" })
            }

            DataType::Array { items } => {
                let arr = wire.as_array().ok_or(ConvertError::TypeMismatch {
                    expected: "array",
                    actual: wire_kind(wire),
                })?;
                // Any element failure fails the whole array.
                arr.iter()
                    .map(|element| match items {
                        Some(item_type) => item_type.convert(element),
                        None => Value::from_wire_untyped(element),
                    })
                    .collect::<ConvertResult<Vec<_>>>()
                    .map(Value::Array)
            }
            DataType::Object { fields } => {
                let obj = wire.as_object().ok_or(ConvertError::TypeMismatch {
                    expected: "object",
                    actual: wire_kind(wire),
                })?;
                for key in obj.keys() {
                    if !fields.contains_key(key) {
                        return Err(ConvertError::UnknownField { field: key.clone() });
                    }
                }
                let mut converted = BTreeMap::new();
                for (name, field_type) in fields {
                    let wire_field =
                        obj.get(name).ok_or_else(|| ConvertError::MissingField {
                            field: name.clone(),
                        })?;
                    converted.insert(name.clone(), field_type.convert(wire_field)?);
                }
                Ok(Value::Object(converted))
            }
        }
    }
}

/// Shared integer path: the wire number must be a whole number that fits
/// the target width.
fn convert_signed<T>(
    wire: &serde_json::Value,
    kind: &'static str,
    narrow: impl FnOnce(i128) -> Result<Value, T>,
) -> ConvertResult<Value> {
    let number = match wire {
        serde_json::Value::Number(n) => n,
        _ => {
            return Err(ConvertError::TypeMismatch {
                expected: "integer",
                actual: wire_kind(wire),
            })
        }
    };
    let whole = if let Some(i) = number.as_i64() {
        i128::from(i)
    } else if let Some(u) = number.as_u64() {
        i128::from(u)
    } else {
        // Fractional numbers never convert to an integer kind.
        return Err(ConvertError::TypeMismatch {
            expected: "integer",
            actual: "number",
        });
    };
    narrow(whole).map_err(|_| ConvertError::OutOfRange { kind })
}

// ─────────────────────────────────────────────────────────────────────────────
// Untyped Conversion
// ─────────────────────────────────────────────────────────────────────────────

impl Value {
    /// Convert a wire value without a declared kind
    ///
    /// Used for untyped array elements and free-form event payloads:
    /// integers land in the widest fitting kind, everything else maps
    /// structurally.
    pub fn from_wire_untyped(wire: &serde_json::Value) -> ConvertResult<Value> {
        match wire {
            serde_json::Value::Null => Ok(Value::Null),
            serde_json::Value::Bool(b) => Ok(Value::Bool(*b)),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Ok(Value::Int64(i))
                } else if let Some(u) = n.as_u64() {
                    Ok(Value::UInt64(u))
                } else if let Some(f) = n.as_f64() {
                    Ok(Value::Float64(f))
                } else {
                    Ok(Value::Decimal(n.clone()))
                }
            }
            serde_json::Value::String(s) => Ok(Value::String(s.clone())),
            serde_json::Value::Array(arr) => arr
                .iter()
                .map(Value::from_wire_untyped)
                .collect::<ConvertResult<Vec<_>>>()
                .map(Value::Array),
            serde_json::Value::Object(obj) => {
                let mut fields = BTreeMap::new();
                for (k, v) in obj {
                    fields.insert(k.clone(), Value::from_wire_untyped(v)?);
                }
                Ok(Value::Object(fields))
            }
        }
    }

    /// Re-serialize a native value into its wire form
    ///
    /// The exact inverse of conversion: dates come out as RFC 3339,
    /// durations as ISO-8601, UUIDs hyphenated, decimals digit-for-digit.
    pub fn to_wire(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int8(v) => serde_json::Value::from(*v),
            Value::Int16(v) => serde_json::Value::from(*v),
            Value::Int32(v) => serde_json::Value::from(*v),
            Value::Int64(v) => serde_json::Value::from(*v),
            Value::UInt8(v) => serde_json::Value::from(*v),
            Value::UInt16(v) => serde_json::Value::from(*v),
            Value::UInt32(v) => serde_json::Value::from(*v),
            Value::UInt64(v) => serde_json::Value::from(*v),
            Value::Float32(v) => serde_json::Number::from_f64(f64::from(*v))
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::Float64(v) => serde_json::Number::from_f64(*v)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::Decimal(n) => serde_json::Value::Number(n.clone()),
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Char(c) => serde_json::Value::String(c.to_string()),
            Value::Enum(s) => serde_json::Value::String(s.clone()),
            Value::Uuid(u) => serde_json::Value::String(u.to_string()),
            Value::DateTime(dt) => {
                serde_json::Value::String(dt.format("%Y-%m-%dT%H:%M:%S%.f").to_string())
            }
            Value::DateTimeOffset(dt) => {
                serde_json::Value::String(dt.to_rfc3339_opts(SecondsFormat::AutoSi, true))
            }
            Value::Duration(d) => serde_json::Value::String(format_iso8601_duration(*d)),
            Value::Array(arr) => {
                serde_json::Value::Array(arr.iter().map(Value::to_wire).collect())
            }
            Value::Object(fields) => serde_json::Value::Object(
                fields
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_wire()))
                    .collect(),
            ),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Date-Time & Duration Strings
// ─────────────────────────────────────────────────────────────────────────────

/// Accepts the plain `YYYY-MM-DDTHH:MM:SS[.f]` form, or an RFC 3339 string
/// whose offset is discarded after normalizing to UTC.
fn parse_datetime(s: &str) -> Option<NaiveDateTime> {
    if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(dt);
    }
    DateTime::parse_from_rfc3339(s).ok().map(|dt| dt.naive_utc())
}

/// Parse an ISO-8601 duration: `[-]P[nW|nD][T[nH][nM][n[.f]S]]`
///
/// Calendar components (years, months) have no fixed length and are
/// rejected. Returns `None` on any malformed input.
fn parse_iso8601_duration(s: &str) -> Option<chrono::Duration> {
    let (negative, rest) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s),
    };
    let rest = rest.strip_prefix('P')?;
    if rest.is_empty() {
        return None;
    }

    let (date_part, time_part) = match rest.split_once('T') {
        Some((d, t)) => {
            if t.is_empty() {
                return None;
            }
            (d, Some(t))
        }
        None => (rest, None),
    };

    let mut millis: i64 = 0;
    let mut saw_component = false;

    let mut date_rest = date_part;
    for (unit, per_unit_ms) in [('W', 7 * 86_400_000i64), ('D', 86_400_000i64)] {
        if let Some(pos) = date_rest.find(unit) {
            let n = parse_component_int(&date_rest[..pos])?;
            millis = millis.checked_add(n.checked_mul(per_unit_ms)?)?;
            date_rest = &date_rest[pos + 1..];
            saw_component = true;
        }
    }
    if !date_rest.is_empty() {
        return None;
    }

    if let Some(time_part) = time_part {
        let mut time_rest = time_part;
        for (unit, per_unit_ms) in [('H', 3_600_000i64), ('M', 60_000i64)] {
            if let Some(pos) = time_rest.find(unit) {
                let n = parse_component_int(&time_rest[..pos])?;
                millis = millis.checked_add(n.checked_mul(per_unit_ms)?)?;
                time_rest = &time_rest[pos + 1..];
                saw_component = true;
            }
        }
        if let Some(pos) = time_rest.find('S') {
            let seconds = parse_component_seconds(&time_rest[..pos])?;
            millis = millis.checked_add((seconds * 1000.0).round() as i64)?;
            time_rest = &time_rest[pos + 1..];
            saw_component = true;
        }
        if !time_rest.is_empty() {
            return None;
        }
    }

    if !saw_component {
        return None;
    }
    if negative {
        millis = -millis;
    }
    Some(chrono::Duration::milliseconds(millis))
}

/// A component is an unsigned digit run; the only sign the grammar allows
/// is the single leading `-` before `P`.
fn parse_component_int(digits: &str) -> Option<i64> {
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

fn parse_component_seconds(digits: &str) -> Option<f64> {
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit() || b == b'.') {
        return None;
    }
    digits.parse().ok()
}

/// Format a duration as ISO-8601 with millisecond precision
fn format_iso8601_duration(d: chrono::Duration) -> String {
    let mut millis = d.num_milliseconds();
    let mut out = String::new();
    if millis < 0 {
        out.push('-');
        millis = -millis;
    }
    out.push('P');

    let days = millis / 86_400_000;
    millis %= 86_400_000;
    if days > 0 {
        out.push_str(&format!("{days}D"));
    }

    let hours = millis / 3_600_000;
    millis %= 3_600_000;
    let minutes = millis / 60_000;
    millis %= 60_000;
    let whole_seconds = millis / 1000;
    let frac_millis = millis % 1000;

    if hours > 0 || minutes > 0 || whole_seconds > 0 || frac_millis > 0 || days == 0 {
        out.push('T');
        if hours > 0 {
            out.push_str(&format!("{hours}H"));
        }
        if minutes > 0 {
            out.push_str(&format!("{minutes}M"));
        }
        if frac_millis > 0 {
            let frac = format!("{frac_millis:03}");
            out.push_str(&format!("{whole_seconds}.{}S", frac.trim_end_matches('0')));
        } else if whole_seconds > 0 || (hours == 0 && minutes == 0 && days == 0) {
            out.push_str(&format!("{whole_seconds}S"));
        }
    }
    out
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn roundtrip(dt: &DataType, wire: serde_json::Value) {
        let native = dt.convert(&wire).unwrap();
        let back = native.to_wire();
        let again = dt.convert(&back).unwrap();
        assert_eq!(native, again, "round-trip diverged for {wire}");
    }

    #[test]
    fn test_bool_conversion() {
        assert_eq!(DataType::Bool.convert(&json!(true)), Ok(Value::Bool(true)));
        assert!(matches!(
            DataType::Bool.convert(&json!(1)),
            Err(ConvertError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn test_integer_boundaries_roundtrip() {
        for wire in [json!(0), json!(-1), json!(i64::from(i8::MIN)), json!(i64::from(i8::MAX))] {
            roundtrip(&DataType::Int8, wire);
        }
        for wire in [json!(0), json!(u64::from(u8::MAX))] {
            roundtrip(&DataType::UInt8, wire);
        }
        roundtrip(&DataType::Int64, json!(i64::MIN));
        roundtrip(&DataType::Int64, json!(i64::MAX));
        roundtrip(&DataType::UInt64, json!(u64::MAX));
    }

    #[test]
    fn test_out_of_range_integers_rejected() {
        assert_eq!(
            DataType::UInt8.convert(&json!(256)),
            Err(ConvertError::OutOfRange { kind: "uint8" })
        );
        assert_eq!(
            DataType::UInt8.convert(&json!(-1)),
            Err(ConvertError::OutOfRange { kind: "uint8" })
        );
        assert_eq!(
            DataType::UInt64.convert(&json!(-1)),
            Err(ConvertError::OutOfRange { kind: "uint64" })
        );
        assert_eq!(
            DataType::Int8.convert(&json!(300)),
            Err(ConvertError::OutOfRange { kind: "int8" })
        );
        assert_eq!(
            DataType::Int32.convert(&json!(i64::from(i32::MAX) + 1)),
            Err(ConvertError::OutOfRange { kind: "int32" })
        );
    }

    #[test]
    fn test_fractional_never_converts_to_integer() {
        assert!(matches!(
            DataType::Int32.convert(&json!(3.5)),
            Err(ConvertError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn test_float_conversion() {
        roundtrip(&DataType::Float64, json!(1.5));
        roundtrip(&DataType::Float32, json!(0.5));
        // A finite f64 beyond f32 range must not silently become infinity.
        assert_eq!(
            DataType::Float32.convert(&json!(1e39)),
            Err(ConvertError::OutOfRange { kind: "float32" })
        );
    }

    #[test]
    fn test_decimal_preserves_digits() {
        let wire = json!(0.1);
        let native = DataType::Decimal.convert(&wire).unwrap();
        assert_eq!(native.to_wire(), wire);
    }

    #[test]
    fn test_char_conversion() {
        assert_eq!(DataType::Char.convert(&json!("x")), Ok(Value::Char('x')));
        assert_eq!(
            DataType::Char.convert(&json!("xy")),
            Err(ConvertError::NotACharacter)
        );
        assert_eq!(
            DataType::Char.convert(&json!("")),
            Err(ConvertError::NotACharacter)
        );
    }

    #[test]
    fn test_enum_case_insensitive_canonical() {
        let dt = DataType::Enum {
            variants: vec!["Warm".to_string(), "Cool".to_string()],
        };
        assert_eq!(
            dt.convert(&json!("warm")),
            Ok(Value::Enum("Warm".to_string()))
        );
        assert_eq!(
            dt.convert(&json!("freezing")),
            Err(ConvertError::UnknownVariant {
                variant: "freezing".to_string()
            })
        );
    }

    #[test]
    fn test_uuid_roundtrip() {
        roundtrip(&DataType::Uuid, json!("936da01f-9abd-4d9d-80c7-02af85c822a8"));
        assert!(matches!(
            DataType::Uuid.convert(&json!("not-a-uuid")),
            Err(ConvertError::MalformedString { kind: "uuid" })
        ));
    }

    #[test]
    fn test_datetime_conversion() {
        roundtrip(&DataType::DateTime, json!("2024-05-01T12:30:00"));
        roundtrip(&DataType::DateTimeOffset, json!("2024-05-01T12:30:00+02:00"));
        // Offset form is normalized to UTC for the offset-less kind.
        let v = DataType::DateTime
            .convert(&json!("2024-05-01T12:30:00+02:00"))
            .unwrap();
        assert_eq!(v.to_wire(), json!("2024-05-01T10:30:00"));
        assert!(DataType::DateTime.convert(&json!("yesterday")).is_err());
    }

    #[test]
    fn test_duration_parsing() {
        let cases = [
            ("PT1S", 1_000),
            ("PT0.5S", 500),
            ("PT1H2M3S", 3_723_000),
            ("P1DT1H", 90_000_000),
            ("P1W", 604_800_000),
            ("-PT2S", -2_000),
        ];
        for (s, expect_ms) in cases {
            let v = DataType::Duration.convert(&json!(s)).unwrap();
            match v {
                Value::Duration(d) => assert_eq!(d.num_milliseconds(), expect_ms, "{s}"),
                other => panic!("expected duration, got {other:?}"),
            }
        }
        assert!(DataType::Duration.convert(&json!("P")).is_err());
        assert!(DataType::Duration.convert(&json!("1H")).is_err());
        assert!(DataType::Duration.convert(&json!("P1Y")).is_err());
    }

    #[test]
    fn test_duration_rejects_signed_components() {
        // Only a single leading `-` before `P` is allowed; a sign inside
        // any digit run is malformed.
        for s in ["P-1D", "PT-5S", "PT5H-2M", "PT+2S", "P+1W", "PT1e3S"] {
            assert_eq!(
                DataType::Duration.convert(&json!(s)),
                Err(ConvertError::MalformedString { kind: "duration" }),
                "{s}"
            );
        }
    }

    #[test]
    fn test_duration_roundtrip() {
        for s in ["PT1S", "PT1H2M3S", "P2DT4H", "-PT2.25S", "PT0S"] {
            roundtrip(&DataType::Duration, json!(s));
        }
    }

    #[test]
    fn test_typed_array_all_or_nothing() {
        let dt = DataType::Array {
            items: Some(Box::new(DataType::UInt8)),
        };
        assert_eq!(
            dt.convert(&json!([1, 2, 3])),
            Ok(Value::Array(vec![
                Value::UInt8(1),
                Value::UInt8(2),
                Value::UInt8(3)
            ]))
        );
        // One bad element fails the whole array.
        assert_eq!(
            dt.convert(&json!([1, 300, 3])),
            Err(ConvertError::OutOfRange { kind: "uint8" })
        );
    }

    #[test]
    fn test_untyped_array() {
        let dt = DataType::Array { items: None };
        let v = dt.convert(&json!([1, "two", true])).unwrap();
        let arr = v.as_array().unwrap();
        assert_eq!(arr[0], Value::Int64(1));
        assert_eq!(arr[1], Value::String("two".to_string()));
        assert_eq!(arr[2], Value::Bool(true));
    }

    #[test]
    fn test_object_conversion() {
        let dt = DataType::Object {
            fields: [
                ("level".to_string(), DataType::UInt8),
                ("label".to_string(), DataType::String),
            ]
            .into_iter()
            .collect(),
        };
        let v = dt.convert(&json!({"level": 5, "label": "hall"})).unwrap();
        assert_eq!(v.get("level"), Some(&Value::UInt8(5)));

        assert_eq!(
            dt.convert(&json!({"level": 5})),
            Err(ConvertError::MissingField {
                field: "label".to_string()
            })
        );
        assert_eq!(
            dt.convert(&json!({"level": 5, "label": "x", "extra": 1})),
            Err(ConvertError::UnknownField {
                field: "extra".to_string()
            })
        );
    }

    #[test]
    fn test_null_rejected_by_conversion() {
        assert_eq!(
            DataType::Bool.convert(&serde_json::Value::Null),
            Err(ConvertError::UnexpectedNull)
        );
    }
}
