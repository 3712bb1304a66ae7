use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// An operator argument or evaluation result. Everything crossing the wire
/// to the platform is one of these; the JSON representation is the wire
/// format itself.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<Value>),
    Dict(BTreeMap<String, Value>),
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(left), Value::Bool(right)) => left == right,
            (Value::Int(left), Value::Int(right)) => left == right,
            (Value::Float(left), Value::Float(right)) => left.to_bits() == right.to_bits(),
            (Value::Str(left), Value::Str(right)) => left == right,
            (Value::List(left), Value::List(right)) => left == right,
            (Value::Dict(left), Value::Dict(right)) => left == right,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_bool(&self) -> bool {
        match self {
            Value::Bool(value) => *value,
            _ => panic!("Value is not a bool"),
        }
    }
    pub fn as_int(&self) -> i64 {
        match self {
            Value::Int(value) => *value,
            _ => panic!("Value is not an int"),
        }
    }
    pub fn as_float(&self) -> f64 {
        match self {
            Value::Float(value) => *value,
            Value::Int(value) => *value as f64,
            _ => panic!("Value is not a float"),
        }
    }
    pub fn as_str(&self) -> &str {
        match self {
            Value::Str(value) => value,
            _ => panic!("Value is not a string"),
        }
    }
    pub fn as_list(&self) -> &[Value] {
        match self {
            Value::List(values) => values,
            _ => panic!("Value is not a list"),
        }
    }
    pub fn as_dict(&self) -> &BTreeMap<String, Value> {
        match self {
            Value::Dict(map) => map,
            _ => panic!("Value is not a dict"),
        }
    }

    // try_* accessors are for parsing remote replies, which are not trusted
    // to have the shape the graph promised.
    pub fn try_int(&self) -> Option<i64> {
        match self {
            Value::Int(value) => Some(*value),
            _ => None,
        }
    }
    pub fn try_float(&self) -> Option<f64> {
        match self {
            Value::Float(value) => Some(*value),
            Value::Int(value) => Some(*value as f64),
            _ => None,
        }
    }
    pub fn try_str(&self) -> Option<&str> {
        match self {
            Value::Str(value) => Some(value),
            _ => None,
        }
    }
    pub fn try_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(values) => Some(values),
            _ => None,
        }
    }
    pub fn try_dict(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Dict(map) => Some(map),
            _ => None,
        }
    }

    /// Numeric class labels arrive from the platform as ints or floats
    /// depending on the source table's column type; both coerce to i64.
    pub fn try_label(&self) -> Option<i64> {
        match self {
            Value::Int(value) => Some(*value),
            Value::Float(value) => Some(value.round() as i64),
            _ => None,
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
        Value::Int(value as i64)
    }
}

impl From<u32> for Value {
    fn from(value: u32) -> Self {
        Value::Int(value as i64)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Str(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Str(value)
    }
}

impl From<Vec<Value>> for Value {
    fn from(values: Vec<Value>) -> Self {
        Value::List(values)
    }
}

impl<T> FromIterator<T> for Value
where
    T: Into<Value>,
{
    fn from_iter<It: IntoIterator<Item = T>>(iter: It) -> Self {
        Value::List(iter.into_iter().map(Into::into).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn float_equality_is_bitwise() {
        assert_eq!(Value::Float(0.5), Value::Float(0.5));
        assert_ne!(Value::Float(0.5), Value::Float(0.25));
        // NaN compares equal to itself under the bitwise rule
        assert_eq!(Value::Float(f64::NAN), Value::Float(f64::NAN));
    }

    #[test]
    fn label_coercion_rounds_floats() {
        assert_eq!(Value::Int(6).try_label(), Some(6));
        assert_eq!(Value::Float(6.0).try_label(), Some(6));
        assert_eq!(Value::Float(5.6).try_label(), Some(6));
        assert_eq!(Value::Str("6".to_string()).try_label(), None);
    }

    #[test]
    fn wire_json_shapes() -> anyhow::Result<()> {
        let value: Value = [Value::Int(1), Value::Str("a".to_string())]
            .into_iter()
            .collect();
        let json = serde_json::to_string(&value)?;
        assert_eq!(json, r#"[1,"a"]"#);

        let parsed: Value = serde_json::from_str(r#"{"importance":{"red":1.5}}"#)?;
        let dict = parsed.as_dict();
        assert_eq!(dict["importance"].as_dict()["red"], Value::Float(1.5));

        Ok(())
    }
}
