//! Immutable scalar values.

use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};

/// A scalar stored in a `Primitive` element.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum PrimitiveValue {
    Null,
    Boolean(bool),
    Integer(i32),
    Long(i64),
    Double(f64),
    String(String),
    Bytes(Vec<u8>),
    /// Milliseconds since the Unix epoch.
    Date(i64),
}

impl PrimitiveValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            PrimitiveValue::Null => "null",
            PrimitiveValue::Boolean(_) => "boolean",
            PrimitiveValue::Integer(_) => "integer",
            PrimitiveValue::Long(_) => "long",
            PrimitiveValue::Double(_) => "double",
            PrimitiveValue::String(_) => "string",
            PrimitiveValue::Bytes(_) => "bytes",
            PrimitiveValue::Date(_) => "date",
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            PrimitiveValue::Integer(_) | PrimitiveValue::Long(_) | PrimitiveValue::Double(_)
        )
    }

    /// Integral view of a numeric value; doubles truncate toward zero.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            PrimitiveValue::Integer(v) => Some(i64::from(*v)),
            PrimitiveValue::Long(v) => Some(*v),
            PrimitiveValue::Double(v) => Some(*v as i64),
            _ => None,
        }
    }

    /// Arithmetic inverse, used for reverse counter operations.
    pub fn negated(&self) -> Option<PrimitiveValue> {
        match self {
            PrimitiveValue::Integer(v) => Some(PrimitiveValue::Integer(v.wrapping_neg())),
            PrimitiveValue::Long(v) => Some(PrimitiveValue::Long(v.wrapping_neg())),
            PrimitiveValue::Double(v) => Some(PrimitiveValue::Double(-v)),
            _ => None,
        }
    }

    pub fn to_json_value(&self) -> Value {
        match self {
            PrimitiveValue::Null => Value::Null,
            PrimitiveValue::Boolean(b) => Value::Bool(*b),
            PrimitiveValue::Integer(v) => Value::from(*v),
            PrimitiveValue::Long(v) | PrimitiveValue::Date(v) => Value::from(*v),
            PrimitiveValue::Double(v) => Number::from_f64(*v).map_or(Value::Null, Value::Number),
            PrimitiveValue::String(s) => Value::String(s.clone()),
            PrimitiveValue::Bytes(bytes) => {
                Value::Array(bytes.iter().map(|b| Value::from(*b)).collect())
            }
        }
    }

    /// Maps a JSON scalar onto the narrowest primitive type. Returns `None`
    /// for arrays and objects.
    pub fn from_json_scalar(value: &Value) -> Option<PrimitiveValue> {
        match value {
            Value::Null => Some(PrimitiveValue::Null),
            Value::Bool(b) => Some(PrimitiveValue::Boolean(*b)),
            Value::Number(n) => Some(match n.as_i64() {
                Some(i) => match i32::try_from(i) {
                    Ok(small) => PrimitiveValue::Integer(small),
                    Err(_) => PrimitiveValue::Long(i),
                },
                None => PrimitiveValue::Double(n.as_f64().unwrap_or(f64::NAN)),
            }),
            Value::String(s) => Some(PrimitiveValue::String(s.clone())),
            Value::Array(_) | Value::Object(_) => None,
        }
    }
}

impl From<&str> for PrimitiveValue {
    fn from(s: &str) -> Self {
        PrimitiveValue::String(s.to_owned())
    }
}

impl From<String> for PrimitiveValue {
    fn from(s: String) -> Self {
        PrimitiveValue::String(s)
    }
}

impl From<i32> for PrimitiveValue {
    fn from(v: i32) -> Self {
        PrimitiveValue::Integer(v)
    }
}

impl From<i64> for PrimitiveValue {
    fn from(v: i64) -> Self {
        PrimitiveValue::Long(v)
    }
}

impl From<f64> for PrimitiveValue {
    fn from(v: f64) -> Self {
        PrimitiveValue::Double(v)
    }
}

impl From<bool> for PrimitiveValue {
    fn from(v: bool) -> Self {
        PrimitiveValue::Boolean(v)
    }
}
