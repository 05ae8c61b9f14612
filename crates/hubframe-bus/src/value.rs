//! Typed values carried by bus messages.
//!
//! The wire format splits a value into a `val_t` discriminator and a `val`
//! JSON payload; [`Value`] keeps the two together in memory.

use hubframe_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Wire-level value type discriminator (`val_t`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    Null,
    Bool,
    Int,
    Float,
    String,
    StrArray,
    IntArray,
    FloatArray,
    BoolArray,
    StrMap,
    IntMap,
    FloatMap,
    BoolMap,
    Object,
}

impl ValueType {
    /// Wire name of the type.
    pub fn as_str(&self) -> &'static str {
        match self {
            ValueType::Null => "null",
            ValueType::Bool => "bool",
            ValueType::Int => "int",
            ValueType::Float => "float",
            ValueType::String => "string",
            ValueType::StrArray => "str_array",
            ValueType::IntArray => "int_array",
            ValueType::FloatArray => "float_array",
            ValueType::BoolArray => "bool_array",
            ValueType::StrMap => "str_map",
            ValueType::IntMap => "int_map",
            ValueType::FloatMap => "float_map",
            ValueType::BoolMap => "bool_map",
            ValueType::Object => "object",
        }
    }
}

impl std::fmt::Display for ValueType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ValueType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "null" => Ok(ValueType::Null),
            "bool" => Ok(ValueType::Bool),
            "int" => Ok(ValueType::Int),
            "float" => Ok(ValueType::Float),
            "string" => Ok(ValueType::String),
            "str_array" => Ok(ValueType::StrArray),
            "int_array" => Ok(ValueType::IntArray),
            "float_array" => Ok(ValueType::FloatArray),
            "bool_array" => Ok(ValueType::BoolArray),
            "str_map" => Ok(ValueType::StrMap),
            "int_map" => Ok(ValueType::IntMap),
            "float_map" => Ok(ValueType::FloatMap),
            "bool_map" => Ok(ValueType::BoolMap),
            "object" => Ok(ValueType::Object),
            other => Err(Error::Decode(format!("unknown value type: {other}"))),
        }
    }
}

/// A typed message value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    StrArray(Vec<String>),
    IntArray(Vec<i64>),
    FloatArray(Vec<f64>),
    BoolArray(Vec<bool>),
    StrMap(HashMap<String, String>),
    IntMap(HashMap<String, i64>),
    FloatMap(HashMap<String, f64>),
    BoolMap(HashMap<String, bool>),
    Object(serde_json::Value),
}

impl Value {
    /// The wire discriminator for this value.
    pub fn value_type(&self) -> ValueType {
        match self {
            Value::Null => ValueType::Null,
            Value::Bool(_) => ValueType::Bool,
            Value::Int(_) => ValueType::Int,
            Value::Float(_) => ValueType::Float,
            Value::String(_) => ValueType::String,
            Value::StrArray(_) => ValueType::StrArray,
            Value::IntArray(_) => ValueType::IntArray,
            Value::FloatArray(_) => ValueType::FloatArray,
            Value::BoolArray(_) => ValueType::BoolArray,
            Value::StrMap(_) => ValueType::StrMap,
            Value::IntMap(_) => ValueType::IntMap,
            Value::FloatMap(_) => ValueType::FloatMap,
            Value::BoolMap(_) => ValueType::BoolMap,
            Value::Object(_) => ValueType::Object,
        }
    }

    /// Render the `val` field for the wire.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(v) => serde_json::json!(v),
            Value::Int(v) => serde_json::json!(v),
            Value::Float(v) => serde_json::json!(v),
            Value::String(v) => serde_json::json!(v),
            Value::StrArray(v) => serde_json::json!(v),
            Value::IntArray(v) => serde_json::json!(v),
            Value::FloatArray(v) => serde_json::json!(v),
            Value::BoolArray(v) => serde_json::json!(v),
            Value::StrMap(v) => serde_json::json!(v),
            Value::IntMap(v) => serde_json::json!(v),
            Value::FloatMap(v) => serde_json::json!(v),
            Value::BoolMap(v) => serde_json::json!(v),
            Value::Object(v) => v.clone(),
        }
    }

    /// Rebuild a value from the wire pair `(val_t, val)`.
    pub fn from_json(value_type: ValueType, val: serde_json::Value) -> Result<Self> {
        let mismatch =
            |vt: ValueType| Error::Decode(format!("value does not match declared type {vt}"));
        match value_type {
            ValueType::Null => Ok(Value::Null),
            ValueType::Bool => val
                .as_bool()
                .map(Value::Bool)
                .ok_or_else(|| mismatch(value_type)),
            ValueType::Int => val
                .as_i64()
                .map(Value::Int)
                .ok_or_else(|| mismatch(value_type)),
            // Integers are accepted where a float is declared; JSON does not
            // distinguish 1 from 1.0.
            ValueType::Float => val
                .as_f64()
                .map(Value::Float)
                .ok_or_else(|| mismatch(value_type)),
            ValueType::String => val
                .as_str()
                .map(|s| Value::String(s.to_string()))
                .ok_or_else(|| mismatch(value_type)),
            ValueType::StrArray => serde_json::from_value(val)
                .map(Value::StrArray)
                .map_err(|_| mismatch(value_type)),
            ValueType::IntArray => serde_json::from_value(val)
                .map(Value::IntArray)
                .map_err(|_| mismatch(value_type)),
            ValueType::FloatArray => serde_json::from_value(val)
                .map(Value::FloatArray)
                .map_err(|_| mismatch(value_type)),
            ValueType::BoolArray => serde_json::from_value(val)
                .map(Value::BoolArray)
                .map_err(|_| mismatch(value_type)),
            ValueType::StrMap => serde_json::from_value(val)
                .map(Value::StrMap)
                .map_err(|_| mismatch(value_type)),
            ValueType::IntMap => serde_json::from_value(val)
                .map(Value::IntMap)
                .map_err(|_| mismatch(value_type)),
            ValueType::FloatMap => serde_json::from_value(val)
                .map(Value::FloatMap)
                .map_err(|_| mismatch(value_type)),
            ValueType::BoolMap => serde_json::from_value(val)
                .map(Value::BoolMap)
                .map_err(|_| mismatch(value_type)),
            ValueType::Object => Ok(Value::Object(val)),
        }
    }

    /// Extract a bool, or a decode error.
    pub fn as_bool(&self) -> Result<bool> {
        match self {
            Value::Bool(v) => Ok(*v),
            other => Err(type_error("bool", other)),
        }
    }

    /// Extract an int, or a decode error.
    pub fn as_int(&self) -> Result<i64> {
        match self {
            Value::Int(v) => Ok(*v),
            other => Err(type_error("int", other)),
        }
    }

    /// Extract a float; an int is widened.
    pub fn as_float(&self) -> Result<f64> {
        match self {
            Value::Float(v) => Ok(*v),
            Value::Int(v) => Ok(*v as f64),
            other => Err(type_error("float", other)),
        }
    }

    /// Extract a string slice, or a decode error.
    pub fn as_str(&self) -> Result<&str> {
        match self {
            Value::String(v) => Ok(v),
            other => Err(type_error("string", other)),
        }
    }

    /// Extract a string array, or a decode error.
    pub fn as_str_array(&self) -> Result<&[String]> {
        match self {
            Value::StrArray(v) => Ok(v),
            other => Err(type_error("str_array", other)),
        }
    }

    /// Extract a float map, or a decode error.
    pub fn as_float_map(&self) -> Result<&HashMap<String, f64>> {
        match self {
            Value::FloatMap(v) => Ok(v),
            other => Err(type_error("float_map", other)),
        }
    }

    /// Extract a string map, or a decode error.
    pub fn as_str_map(&self) -> Result<&HashMap<String, String>> {
        match self {
            Value::StrMap(v) => Ok(v),
            other => Err(type_error("str_map", other)),
        }
    }

    /// Extract a raw object, or a decode error.
    pub fn as_object(&self) -> Result<&serde_json::Value> {
        match self {
            Value::Object(v) => Ok(v),
            other => Err(type_error("object", other)),
        }
    }

    /// True for `Value::Null`.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

fn type_error(expected: &str, got: &Value) -> Error {
    Error::Decode(format!(
        "expected {expected} value, got {}",
        got.value_type()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_type_roundtrip() {
        for vt in [
            ValueType::Null,
            ValueType::Bool,
            ValueType::FloatMap,
            ValueType::StrArray,
            ValueType::Object,
        ] {
            let parsed: ValueType = vt.as_str().parse().unwrap();
            assert_eq!(parsed, vt);
        }
        assert!("floatmap".parse::<ValueType>().is_err());
    }

    #[test]
    fn test_from_json_type_checked() {
        let v = Value::from_json(ValueType::Int, serde_json::json!(42)).unwrap();
        assert_eq!(v.as_int().unwrap(), 42);

        // Declared float accepts an integer literal.
        let v = Value::from_json(ValueType::Float, serde_json::json!(3)).unwrap();
        assert_eq!(v.as_float().unwrap(), 3.0);

        assert!(Value::from_json(ValueType::Bool, serde_json::json!("true")).is_err());
        assert!(Value::from_json(ValueType::StrArray, serde_json::json!([1, 2])).is_err());
    }

    #[test]
    fn test_accessor_mismatch() {
        let v = Value::String("on".to_string());
        assert!(v.as_bool().is_err());
        assert_eq!(v.as_str().unwrap(), "on");
    }
}
