//! Variable values and scopes
//!
//! Values are plain data so that every binding survives a preserve/restore
//! cycle unchanged.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Visibility of a variable binding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Scope {
    /// Visible from the defining frame and every descendant frame
    Inherit,
    /// Visible only while the defining frame is the top frame
    Local,
}

/// A variable value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// Boolean
    Bool(bool),
    /// Signed integer
    Int(i64),
    /// Floating point number
    Float(f64),
    /// UTF-8 string
    String(String),
    /// Any other JSON shape (object, array, null)
    Object(serde_json::Value),
}

impl Value {
    /// Human readable kind, used in type mismatch errors.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Bool(_) => "boolean",
            Value::Int(_) => "integer",
            Value::Float(_) => "number",
            Value::String(_) => "string",
            Value::Object(_) => "object",
        }
    }

    /// Build a value from arbitrary JSON, picking the narrowest kind.
    pub fn from_json(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => n
                    .as_f64()
                    .map(Value::Float)
                    .unwrap_or(Value::Object(serde_json::Value::Number(n))),
            },
            other => Value::Object(other),
        }
    }

    /// Whether the value encodes to JSON and decodes back unchanged.
    ///
    /// JSON has no NaN or infinity; serde_json writes them as `null`.
    pub fn is_persistable(&self) -> bool {
        match self {
            Value::Float(f) => f.is_finite(),
            _ => true,
        }
    }

    /// Convert back to JSON.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(i) => serde_json::Value::from(*i),
            Value::Float(f) => serde_json::Value::from(*f),
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Object(v) => v.clone(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::String(s) => write!(f, "{s}"),
            Value::Object(v) => write!(f, "{v}"),
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int(value.into())
    }
}

impl From<u32> for Value {
    fn from(value: u32) -> Self {
        Value::Int(value.into())
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<serde_json::Value> for Value {
    fn from(value: serde_json::Value) -> Self {
        Value::from_json(value)
    }
}

/// Typed extraction used by the variable store accessors.
pub trait FromValue: Sized {
    /// Kind name reported on mismatch.
    const EXPECTED: &'static str;

    /// Extract the typed value, `None` when the kinds disagree.
    fn from_value(value: &Value) -> Option<Self>;
}

impl FromValue for bool {
    const EXPECTED: &'static str = "boolean";

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

impl FromValue for i64 {
    const EXPECTED: &'static str = "integer";

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }
}

// Integers are numbers too.
impl FromValue for f64 {
    const EXPECTED: &'static str = "number";

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            _ => None,
        }
    }
}

impl FromValue for String {
    const EXPECTED: &'static str = "string";

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) => Some(s.clone()),
            _ => None,
        }
    }
}

impl FromValue for serde_json::Value {
    const EXPECTED: &'static str = "object";

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Object(v) => Some(v.clone()),
            _ => None,
        }
    }
}

impl FromValue for Value {
    const EXPECTED: &'static str = "value";

    fn from_value(value: &Value) -> Option<Self> {
        Some(value.clone())
    }
}

/// A named binding stored in a stack frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variable {
    /// Binding name
    pub name: String,
    /// Visibility rule
    pub scope: Scope,
    /// Current value
    pub value: Value,
}

impl Variable {
    /// Create a new binding.
    pub fn new(name: impl Into<String>, scope: Scope, value: Value) -> Self {
        Self {
            name: name.into(),
            scope,
            value,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_value_json_shapes() {
        let values = vec![
            Value::Bool(true),
            Value::Int(40),
            Value::Float(2.5),
            Value::String("Maks".into()),
            Value::Object(json!({"a": [1, 2]})),
        ];
        let text = serde_json::to_string(&values).unwrap();
        assert_eq!(text, r#"[true,40,2.5,"Maks",{"a":[1,2]}]"#);

        let decoded: Vec<Value> = serde_json::from_str(&text).unwrap();
        assert_eq!(decoded, values);
    }

    #[test]
    fn test_whole_float_stays_float() {
        let text = serde_json::to_string(&Value::Float(2.0)).unwrap();
        let decoded: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(decoded, Value::Float(2.0));
    }

    #[test]
    fn test_scope_wire_names() {
        assert_eq!(serde_json::to_string(&Scope::Inherit).unwrap(), "\"INHERIT\"");
        assert_eq!(serde_json::to_string(&Scope::Local).unwrap(), "\"LOCAL\"");
    }

    #[test]
    fn test_number_accessor_accepts_integer() {
        assert_eq!(f64::from_value(&Value::Int(3)), Some(3.0));
        assert_eq!(i64::from_value(&Value::Float(3.0)), None);
        assert_eq!(bool::from_value(&Value::Int(1)), None);
    }
}
