//! Typed access to loosely-typed JSON fields returned by Shelly devices.
//!
//! Every converter follows the same contract: a missing field or JSON `null`
//! yields `None` (or an empty list), a value of the wrong shape yields
//! [`NormalizeError::TypeMismatch`]. Missing is fine; wrong-shaped is a
//! malformed payload.

use serde_json::{Map, Value};

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum NormalizeError {
    /// The value could not be interpreted as the requested type.
    #[error("type mismatch: cannot convert {found} to {expected}{}", detail_suffix(.detail))]
    TypeMismatch {
        expected: &'static str,
        found: &'static str,
        detail: Option<String>,
    },
}

fn detail_suffix(detail: &Option<String>) -> String {
    match detail {
        Some(d) => format!(" ({d})"),
        None => String::new(),
    }
}

fn mismatch(expected: &'static str, value: &Value) -> NormalizeError {
    NormalizeError::TypeMismatch {
        expected,
        found: kind_of(value),
        detail: None,
    }
}

fn parse_failure(expected: &'static str, detail: impl ToString) -> NormalizeError {
    NormalizeError::TypeMismatch {
        expected,
        found: "string",
        detail: Some(detail.to_string()),
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// ---------------------------------------------------------------------------
// Objects
// ---------------------------------------------------------------------------

/// Borrow `value` as a JSON object.
pub fn as_object(value: &Value) -> Result<&Map<String, Value>, NormalizeError> {
    value.as_object().ok_or_else(|| mismatch("object", value))
}

/// Borrow the object stored under `key`, if any. `null` counts as missing.
pub fn object_or_none<'a>(
    fields: &'a Map<String, Value>,
    key: &str,
) -> Result<Option<&'a Map<String, Value>>, NormalizeError> {
    match fields.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => as_object(v).map(Some),
    }
}

// ---------------------------------------------------------------------------
// Scalar converters
// ---------------------------------------------------------------------------

pub fn to_string_or_none(value: Option<&Value>) -> Result<Option<String>, NormalizeError> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(Value::Number(n)) => Ok(Some(n.to_string())),
        Some(Value::Bool(b)) => Ok(Some(b.to_string())),
        Some(other) => Err(mismatch("string", other)),
    }
}

pub fn to_float_or_none(value: Option<&Value>) -> Result<Option<f64>, NormalizeError> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n
            .as_f64()
            .map(Some)
            .ok_or_else(|| parse_failure("float", format!("unrepresentable number {n}"))),
        Some(Value::String(s)) => s
            .trim()
            .parse::<f64>()
            .map(Some)
            .map_err(|e| parse_failure("float", format!("{s:?}: {e}"))),
        Some(other) => Err(mismatch("float", other)),
    }
}

/// Integers accept whole numbers, floats (truncated toward zero) and numeric
/// strings.
pub fn to_int_or_none(value: Option<&Value>) -> Result<Option<i64>, NormalizeError> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => {
            if let Some(i) = n.as_i64() {
                Ok(Some(i))
            } else if let Some(f) = n.as_f64() {
                Ok(Some(f.trunc() as i64))
            } else {
                Err(parse_failure("int", format!("unrepresentable number {n}")))
            }
        }
        Some(Value::String(s)) => {
            let s = s.trim();
            match s.parse::<i64>() {
                Ok(i) => Ok(Some(i)),
                // "12.7" is still a number, just not an integral one.
                Err(int_err) => s
                    .parse::<f64>()
                    .map(|f| Some(f.trunc() as i64))
                    .map_err(|_| parse_failure("int", format!("{s:?}: {int_err}"))),
            }
        }
        Some(other) => Err(mismatch("int", other)),
    }
}

pub fn to_bool_or_none(value: Option<&Value>) -> Result<Option<bool>, NormalizeError> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Bool(b)) => Ok(Some(*b)),
        Some(Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
            "true" => Ok(Some(true)),
            "false" => Ok(Some(false)),
            _ => Err(parse_failure("bool", format!("{s:?} is not true/false"))),
        },
        Some(other) => Err(mismatch("bool", other)),
    }
}

// ---------------------------------------------------------------------------
// List converters
// ---------------------------------------------------------------------------

pub fn to_list_of_float(value: Option<&Value>) -> Result<Vec<f64>, NormalizeError> {
    to_list(value, "list of float", |v| to_float_or_none(Some(v)))
}

pub fn to_list_of_str(value: Option<&Value>) -> Result<Vec<String>, NormalizeError> {
    to_list(value, "list of string", |v| to_string_or_none(Some(v)))
}

fn to_list<T>(
    value: Option<&Value>,
    expected: &'static str,
    convert: impl Fn(&Value) -> Result<Option<T>, NormalizeError>,
) -> Result<Vec<T>, NormalizeError> {
    match value {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(items)) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                match convert(item)? {
                    Some(v) => out.push(v),
                    None => return Err(mismatch(expected, item)),
                }
            }
            Ok(out)
        }
        Some(other) => Err(mismatch(expected, other)),
    }
}

// ===========================================================================
// Tests
// ===========================================================================
