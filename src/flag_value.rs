use log::warn;
use serde::{Deserialize, Serialize};

use crate::util::f64_to_i64_safe;

/// The value of one flag variation, or the caller's default value.
///
/// Variations are JSON typed; every variation of a flag must share the same [JsonType]. JSON
/// integers that fit in an `i64` become [FlagValue::Int]; other numbers become [FlagValue::Float].
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum FlagValue {
    Bool(bool),
    Str(String),
    Int(i64),
    Float(f64),
    Json(serde_json::Value),
}

/// The JSON type of a [FlagValue], used to check that the variations of a flag are homogeneous.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JsonType {
    Boolean,
    String,
    Number,
    Array,
    Object,
}

impl Default for FlagValue {
    fn default() -> Self {
        FlagValue::Json(serde_json::Value::Null)
    }
}

impl From<bool> for FlagValue {
    fn from(b: bool) -> FlagValue {
        FlagValue::Bool(b)
    }
}

impl From<&str> for FlagValue {
    fn from(s: &str) -> FlagValue {
        FlagValue::Str(s.to_owned())
    }
}

impl From<String> for FlagValue {
    fn from(s: String) -> FlagValue {
        FlagValue::Str(s)
    }
}

impl From<f64> for FlagValue {
    fn from(f: f64) -> FlagValue {
        FlagValue::Float(f)
    }
}

impl From<i64> for FlagValue {
    fn from(i: i64) -> FlagValue {
        FlagValue::Int(i)
    }
}

impl From<serde_json::Value> for FlagValue {
    fn from(v: serde_json::Value) -> Self {
        use serde_json::Value;
        match v {
            Value::Bool(b) => b.into(),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    i.into()
                } else if let Some(f) = n.as_f64() {
                    f.into()
                } else {
                    warn!("unrepresentable number {}, converting to string", n);
                    FlagValue::Json(format!("{}", n).into())
                }
            }
            Value::String(s) => s.into(),
            Value::Null | Value::Object(_) | Value::Array(_) => FlagValue::Json(v),
        }
    }
}

impl FlagValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            FlagValue::Bool(b) => Some(*b),
            _ => {
                warn!("variation type is not bool but {:?}", self);
                None
            }
        }
    }

    pub fn as_string(&self) -> Option<String> {
        match self {
            FlagValue::Str(s) => Some(s.clone()),
            _ => {
                warn!("variation type is not str but {:?}", self);
                None
            }
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            FlagValue::Float(f) => Some(*f),
            FlagValue::Int(i) => Some(*i as f64),
            _ => {
                warn!("variation type is not float but {:?}", self);
                None
            }
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            FlagValue::Int(i) => Some(*i),
            FlagValue::Float(f) => f64_to_i64_safe(*f),
            _ => None,
        }
    }

    pub fn as_json(&self) -> Option<serde_json::Value> {
        use serde_json::Value;
        match self {
            FlagValue::Bool(b) => Some(Value::from(*b)),
            FlagValue::Str(s) => Some(Value::from(s.as_str())),
            FlagValue::Float(f) => Some(Value::from(*f)),
            FlagValue::Int(i) => Some(Value::from(*i)),
            FlagValue::Json(v) => Some(v.clone()),
        }
    }

    /// Returns the JSON type of this value, or None for `null`, which is never a valid variation.
    pub fn json_type(&self) -> Option<JsonType> {
        use serde_json::Value;
        match self {
            FlagValue::Bool(_) => Some(JsonType::Boolean),
            FlagValue::Str(_) => Some(JsonType::String),
            FlagValue::Float(_) | FlagValue::Int(_) => Some(JsonType::Number),
            FlagValue::Json(Value::Bool(_)) => Some(JsonType::Boolean),
            FlagValue::Json(Value::String(_)) => Some(JsonType::String),
            FlagValue::Json(Value::Number(_)) => Some(JsonType::Number),
            FlagValue::Json(Value::Array(_)) => Some(JsonType::Array),
            FlagValue::Json(Value::Object(_)) => Some(JsonType::Object),
            FlagValue::Json(Value::Null) => None,
        }
    }
}
