use core::fmt;

use chrono::{DateTime, SecondsFormat, Utc};

/// A resolved or intermediate merge value.
///
/// Every value flowing through the engine is one of these variants. `Object`
/// keeps its entries as an explicitly ordered pair list: dispatch iterates
/// entries in insertion order, and connector frames pushed by earlier keys
/// must stay visible to later keys of the same object. Collapsing this into
/// an unordered map would break that invariant.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Date(DateTime<Utc>),
    Array(Vec<Value>),
    Object(Vec<(String, Value)>),
    /// Opaque external identifier. Never rescanned, never descended into.
    Id(String),
    /// Protected value: final, excluded from macro re-scanning.
    Opaque(Box<Value>),
}

impl Value {
    /// Key lookup on object values. `None` for every other variant.
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Value::Object(pairs) => pairs.iter().find(|(k, _)| k == key).map(|(_, v)| v),
            Value::Opaque(inner) => inner.get(key),
            _ => None,
        }
    }

    /// Loose JS-style truthiness: empty strings, zero, NaN and null are
    /// false; containers are always true.
    pub fn truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::String(s) => !s.is_empty(),
            Value::Opaque(inner) => inner.truthy(),
            _ => true,
        }
    }

    /// Numeric coercion with loose JS-style rules: empty strings and null
    /// coerce to `0`, non-numeric text yields `None`.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Value::Null => Some(0.0),
            Value::String(s) => {
                let trimmed = s.trim();
                if trimmed.is_empty() {
                    Some(0.0)
                } else {
                    trimmed.parse::<f64>().ok()
                }
            }
            Value::Date(d) => Some(d.timestamp_millis() as f64),
            Value::Opaque(inner) => inner.as_number(),
            _ => None,
        }
    }

    pub fn from_json(json: serde_json::Value) -> Value {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => {
                Value::Array(items.into_iter().map(Value::from_json).collect())
            }
            serde_json::Value::Object(map) => Value::Object(
                map.into_iter()
                    .map(|(k, v)| (k, Value::from_json(v)))
                    .collect(),
            ),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Number(n) => {
                if n.fract() == 0.0 && n.is_finite() && n.abs() < 9_007_199_254_740_992.0 {
                    serde_json::Value::from(*n as i64)
                } else {
                    serde_json::Number::from_f64(*n)
                        .map(serde_json::Value::Number)
                        .unwrap_or(serde_json::Value::Null)
                }
            }
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Date(d) => {
                serde_json::Value::String(d.to_rfc3339_opts(SecondsFormat::Millis, true))
            }
            Value::Array(items) => {
                serde_json::Value::Array(items.iter().map(Value::to_json).collect())
            }
            Value::Object(pairs) => serde_json::Value::Object(
                pairs.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
            Value::Id(s) => serde_json::Value::String(s.clone()),
            Value::Opaque(inner) => inner.to_json(),
        }
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        Value::from_json(json)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(n as f64)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Number(n) => {
                if n.fract() == 0.0 && n.is_finite() && n.abs() < 9_007_199_254_740_992.0 {
                    write!(f, "{}", *n as i64)
                } else {
                    write!(f, "{}", n)
                }
            }
            Value::String(s) => write!(f, "{}", s),
            Value::Date(d) => write!(f, "{}", d.to_rfc3339_opts(SecondsFormat::Millis, true)),
            Value::Array(items) => {
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{}", item)?;
                }
                Ok(())
            }
            Value::Object(pairs) => {
                // objects render in query-string form inside text
                for (k, v) in pairs {
                    write!(f, "&{}={}", k, v)?;
                }
                Ok(())
            }
            Value::Id(s) => write!(f, "{}", s),
            Value::Opaque(inner) => write!(f, "{}", inner),
        }
    }
}

/// The tokenizer's unit of currency: a value plus its protect flag.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolved {
    pub value: Value,
    pub protect: bool,
}

impl Resolved {
    pub fn new(value: Value, protect: bool) -> Self {
        Self { value, protect }
    }

    pub fn plain(value: Value) -> Self {
        Self {
            value,
            protect: false,
        }
    }
}

/// Deep-flatten any left-over protected wrappers into plain data.
///
/// Arrays and objects are normalized element-wise; `Id` and primitives pass
/// through untouched. Idempotent: normalizing a normalized value is a no-op.
pub fn normalize(value: Value) -> Value {
    match value {
        Value::Opaque(inner) => normalize(*inner),
        Value::Array(items) => Value::Array(items.into_iter().map(normalize).collect()),
        Value::Object(pairs) => {
            Value::Object(pairs.into_iter().map(|(k, v)| (k, normalize(v))).collect())
        }
        other => other,
    }
}
