//! Decoded argument values and the ordered argument record.

use std::fmt;

use serde_json::{Map, Number, Value};

use crate::data::variable::{ArgType, ScalarType};

/// A single decoded argument value.
#[derive(Debug, Clone, PartialEq)]
pub enum ArgValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Array(Vec<ArgValue>),
    /// Payload of an `any` argument.
    Json(Value),
}

impl ArgValue {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ArgValue::Int(v) => Some(*v),
            ArgValue::Bool(b) => Some(*b as i64),
            ArgValue::Float(f) if f.fract() == 0.0 => Some(*f as i64),
            ArgValue::Json(v) => v.as_i64(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ArgValue::Int(v) => Some(*v as f64),
            ArgValue::Float(f) => Some(*f),
            ArgValue::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            ArgValue::Json(v) => v.as_f64(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ArgValue::String(s) => Some(s),
            ArgValue::Json(Value::String(s)) => Some(s),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, ArgValue::Null | ArgValue::Json(Value::Null))
    }

    pub fn to_json(&self) -> Value {
        match self {
            ArgValue::Null => Value::Null,
            ArgValue::Bool(b) => Value::Bool(*b),
            ArgValue::Int(v) => Value::Number((*v).into()),
            ArgValue::Float(f) => Number::from_f64(*f).map_or(Value::Null, Value::Number),
            ArgValue::String(s) => Value::String(s.clone()),
            ArgValue::Array(items) => Value::Array(items.iter().map(ArgValue::to_json).collect()),
            ArgValue::Json(v) => v.clone(),
        }
    }

    /// Coerce a JSON value into the shape the given argument type decodes to.
    pub fn from_json(value: &Value, arg_type: ArgType) -> ArgValue {
        match arg_type {
            ArgType::Scalar(scalar) => scalar_from_json(value, scalar),
            ArgType::Array(element) => match value {
                Value::Null => ArgValue::Null,
                Value::String(s) if matches!(element, ScalarType::Char | ScalarType::Wchar) => {
                    ArgValue::String(s.clone())
                }
                Value::Array(items) => {
                    ArgValue::Array(items.iter().map(|v| scalar_from_json(v, element)).collect())
                }
                other => ArgValue::Json(other.clone()),
            },
        }
    }
}

fn scalar_from_json(value: &Value, scalar: ScalarType) -> ArgValue {
    match (scalar, value) {
        (_, Value::Null) => ArgValue::Null,
        (ScalarType::Any, v) => ArgValue::Json(v.clone()),
        (ScalarType::Bool, Value::Bool(b)) => ArgValue::Bool(*b),
        (ScalarType::Bool, Value::Number(n)) => ArgValue::Bool(n.as_f64() != Some(0.0)),
        (ScalarType::Float32, Value::Number(n)) => ArgValue::Float(n.as_f64().unwrap_or(0.0)),
        (ScalarType::Ascii | ScalarType::Utf8 | ScalarType::Char | ScalarType::Wchar, Value::String(s)) => {
            ArgValue::String(s.clone())
        }
        (_, Value::Number(n)) => match n.as_i64() {
            Some(v) => ArgValue::Int(v),
            None => ArgValue::Float(n.as_f64().unwrap_or(0.0)),
        },
        (_, Value::String(s)) => ArgValue::String(s.clone()),
        (_, Value::Bool(b)) => ArgValue::Bool(*b),
        (_, other) => ArgValue::Json(other.clone()),
    }
}

impl fmt::Display for ArgValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgValue::Null => write!(f, "null"),
            ArgValue::Bool(b) => write!(f, "{b}"),
            ArgValue::Int(v) => write!(f, "{v}"),
            ArgValue::Float(v) => write!(f, "{v}"),
            ArgValue::String(s) => write!(f, "{s}"),
            other => write!(f, "{}", other.to_json()),
        }
    }
}

/// Ordered key/value argument record. Order follows the event type's
/// argument list; appended scope data lands at the end.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ArgumentData {
    entries: Vec<(String, ArgValue)>,
}

impl ArgumentData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&ArgValue> {
        self.entries.iter().find(|(k, _)| k == name).map(|(_, v)| v)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Set a value, replacing an existing entry in place.
    pub fn set(&mut self, name: impl Into<String>, value: ArgValue) {
        let name = name.into();
        match self.entries.iter_mut().find(|(k, _)| *k == name) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((name, value)),
        }
    }

    /// Merge every entry of `other` into this record.
    pub fn merge(&mut self, other: &ArgumentData) {
        for (k, v) in other.iter() {
            self.set(k, v.clone());
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ArgValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn to_json(&self) -> Value {
        let map: Map<String, Value> = self
            .entries
            .iter()
            .map(|(k, v)| (k.clone(), v.to_json()))
            .collect();
        Value::Object(map)
    }
}

impl<K: Into<String>> FromIterator<(K, ArgValue)> for ArgumentData {
    fn from_iter<I: IntoIterator<Item = (K, ArgValue)>>(iter: I) -> Self {
        let mut data = ArgumentData::new();
        for (k, v) in iter {
            data.set(k, v);
        }
        data
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_set_replaces_in_place() {
        let mut args: ArgumentData = [("a", ArgValue::Int(1)), ("b", ArgValue::Int(2))]
            .into_iter()
            .collect();
        args.set("a", ArgValue::String("x".into()));
        let keys: Vec<&str> = args.keys().collect();
        assert_eq!(keys, vec!["a", "b"]);
        assert_eq!(args.get("a").and_then(ArgValue::as_str), Some("x"));
    }

    #[test]
    fn test_merge_appends_new_keys() {
        let mut args: ArgumentData = [("a", ArgValue::Int(1))].into_iter().collect();
        let extra: ArgumentData = [("a", ArgValue::Int(5)), ("z", ArgValue::Bool(true))]
            .into_iter()
            .collect();
        args.merge(&extra);
        assert_eq!(args.to_json(), json!({"a": 5, "z": true}));
    }

    #[test]
    fn test_from_json_coercion() {
        let uint = ArgType::parse("uint32").unwrap();
        assert_eq!(ArgValue::from_json(&json!(7), uint), ArgValue::Int(7));
        let floats = ArgType::parse("float32[]").unwrap();
        assert_eq!(
            ArgValue::from_json(&json!([1.5, 2]), floats),
            ArgValue::Array(vec![ArgValue::Float(1.5), ArgValue::Float(2.0)])
        );
        let any = ArgType::parse("any").unwrap();
        assert_eq!(
            ArgValue::from_json(&json!({"k": 1}), any),
            ArgValue::Json(json!({"k": 1}))
        );
        assert_eq!(ArgValue::from_json(&Value::Null, uint), ArgValue::Null);
    }
}
