//! # Value Model
//!
//! Purpose: Describe every kind of value the toolkit can store as one closed
//! union, so the codec dispatches with an exhaustive `match` instead of
//! inspecting runtime types.
//!
//! ## Design Principles
//! 1. **Closed Union**: Each wire envelope kind maps to exactly one variant.
//! 2. **Deterministic Layout**: Dictionaries use `BTreeMap`, so encoding the
//!    same value always yields the same bytes.
//! 3. **Self-Describing Opaque Data**: `Array` and `Object` derive serde so the
//!    opaque binary codec can carry them losslessly.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{CodecError, CodecResult};

/// Any value the toolkit can encode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// Absence of a value.
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    /// Raw binary data.
    Bytes(Vec<u8>),
    List(Vec<Value>),
    /// Fixed-arity sequence; encodes like a list but keeps its own kind tag.
    Tuple(Vec<Value>),
    Dict(BTreeMap<String, Value>),
    /// Dense numeric array (tensor-like).
    Array(NumericArray),
    /// Any other structured object.
    Object(Object),
}

impl Value {
    /// Kind tag this value is written under.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Null => "NoneType",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::Bytes(_) => "bytes",
            Value::List(_) => "list",
            Value::Tuple(_) => "tuple",
            Value::Dict(_) => "dict",
            Value::Array(_) => "numpy",
            Value::Object(_) => "pickle",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(n) => Some(*n as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// Number of direct children for containers, bytes for `Bytes` and
    /// characters for `Str`. `None` for every other kind.
    pub fn child_count(&self) -> Option<usize> {
        match self {
            Value::List(items) | Value::Tuple(items) => Some(items.len()),
            Value::Dict(map) => Some(map.len()),
            Value::Bytes(data) => Some(data.len()),
            Value::Str(text) => Some(text.chars().count()),
            _ => None,
        }
    }

    /// Builds a dictionary from key/value pairs.
    pub fn dict<K, V, I>(entries: I) -> Value
    where
        K: Into<String>,
        V: Into<Value>,
        I: IntoIterator<Item = (K, V)>,
    {
        Value::Dict(
            entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// Dense row-major array of `f64` elements.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawArray")]
pub struct NumericArray {
    shape: Vec<usize>,
    data: Vec<f64>,
}

/// Unchecked wire form; deserialization goes through `NumericArray::new`.
#[derive(Deserialize)]
struct RawArray {
    shape: Vec<usize>,
    data: Vec<f64>,
}

impl TryFrom<RawArray> for NumericArray {
    type Error = CodecError;

    fn try_from(raw: RawArray) -> CodecResult<Self> {
        NumericArray::new(raw.shape, raw.data)
    }
}

impl NumericArray {
    /// Creates an array, rejecting shapes that do not cover `data` exactly.
    pub fn new(shape: Vec<usize>, data: Vec<f64>) -> CodecResult<Self> {
        let expected: usize = shape.iter().product();
        if expected != data.len() {
            return Err(CodecError::ShapeMismatch {
                shape,
                len: data.len(),
            });
        }
        Ok(NumericArray { shape, data })
    }

    /// Creates a one-dimensional array.
    pub fn vector(data: Vec<f64>) -> Self {
        NumericArray {
            shape: vec![data.len()],
            data,
        }
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn data(&self) -> &[f64] {
        &self.data
    }
}

/// Named record used for values outside the JSON and array families.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Object {
    pub type_name: String,
    pub fields: BTreeMap<String, Value>,
}

impl Object {
    pub fn new(type_name: impl Into<String>) -> Self {
        Object {
            type_name: type_name.into(),
            fields: BTreeMap::new(),
        }
    }

    /// Adds a field, builder style.
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Int(n as i64)
    }
}

impl From<u32> for Value {
    fn from(n: u32) -> Self {
        Value::Int(n as i64)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<Vec<u8>> for Value {
    fn from(data: Vec<u8>) -> Self {
        Value::Bytes(data)
    }
}

impl From<&[u8]> for Value {
    fn from(data: &[u8]) -> Self {
        Value::Bytes(data.to_vec())
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::List(items)
    }
}

impl From<BTreeMap<String, Value>> for Value {
    fn from(map: BTreeMap<String, Value>) -> Self {
        Value::Dict(map)
    }
}

impl From<NumericArray> for Value {
    fn from(array: NumericArray) -> Self {
        Value::Array(array)
    }
}

impl From<Object> for Value {
    fn from(object: Object) -> Self {
        Value::Object(object)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Value::Null, Into::into)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(n) => write!(f, "{}", n),
            Value::Float(x) => write!(f, "{:?}", x),
            Value::Str(s) => write!(f, "{:?}", s),
            Value::Bytes(data) => write!(f, "b\"{}\"", data.escape_ascii()),
            Value::List(items) => write_seq(f, "[", items, "]"),
            Value::Tuple(items) => write_seq(f, "(", items, ")"),
            Value::Dict(map) => {
                f.write_str("{")?;
                for (idx, (key, value)) in map.iter().enumerate() {
                    if idx > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{:?}: {}", key, value)?;
                }
                f.write_str("}")
            }
            Value::Array(array) => write!(f, "array(shape={:?}, {:?})", array.shape, array.data),
            Value::Object(object) => {
                write!(f, "{} {{", object.type_name)?;
                for (idx, (key, value)) in object.fields.iter().enumerate() {
                    if idx > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, " {}: {}", key, value)?;
                }
                f.write_str(" }")
            }
        }
    }
}

fn write_seq(f: &mut fmt::Formatter<'_>, open: &str, items: &[Value], close: &str) -> fmt::Result {
    f.write_str(open)?;
    for (idx, item) in items.iter().enumerate() {
        if idx > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{}", item)?;
    }
    f.write_str(close)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn array_rejects_mismatched_shape() {
        let err = NumericArray::new(vec![2, 2], vec![1.0, 2.0, 3.0]).unwrap_err();
        assert_eq!(
            err,
            CodecError::ShapeMismatch {
                shape: vec![2, 2],
                len: 3
            }
        );
        assert!(NumericArray::new(vec![2, 2], vec![0.0; 4]).is_ok());
    }

    #[test]
    fn deserialized_arrays_are_shape_checked() {
        let bad = serde_json::from_str::<NumericArray>(r#"{"shape":[3],"data":[1.0]}"#);
        assert!(bad.is_err());

        let good: NumericArray =
            serde_json::from_str(r#"{"shape":[2,1],"data":[1.0,2.0]}"#).unwrap();
        assert_eq!(good.shape(), &[2, 1]);
        assert_eq!(good.data(), &[1.0, 2.0]);
    }

    #[test]
    fn child_count_covers_containers_and_text() {
        assert_eq!(Value::List(vec![Value::Null, Value::Int(1)]).child_count(), Some(2));
        assert_eq!(Value::dict([("a", 1i64)]).child_count(), Some(1));
        assert_eq!(Value::Str("héllo".into()).child_count(), Some(5));
        assert_eq!(Value::Bytes(vec![0; 3]).child_count(), Some(3));
        assert_eq!(Value::Int(42).child_count(), None);
        assert_eq!(Value::from(NumericArray::vector(vec![1.0])).child_count(), None);
    }

    #[test]
    fn kind_names_follow_envelope_tags() {
        assert_eq!(Value::Null.kind_name(), "NoneType");
        assert_eq!(Value::Tuple(vec![]).kind_name(), "tuple");
        assert_eq!(Value::from(NumericArray::vector(vec![1.0])).kind_name(), "numpy");
        assert_eq!(Value::from(Object::new("Point")).kind_name(), "pickle");
    }

    #[test]
    fn display_is_readable() {
        let value = Value::dict([
            ("a", Value::Int(1)),
            ("b", Value::List(vec![Value::Bool(true), Value::Null])),
        ]);
        assert_eq!(value.to_string(), r#"{"a": 1, "b": [true, null]}"#);
        assert_eq!(Value::Float(1.0).to_string(), "1.0");
        assert_eq!(Value::Bytes(vec![0, b'a']).to_string(), r#"b"\x00a""#);
        assert_eq!(Value::Tuple(vec![Value::Int(1)]).to_string(), "(1)");
    }

    #[test]
    fn option_converts_to_null() {
        assert_eq!(Value::from(None::<i64>), Value::Null);
        assert_eq!(Value::from(Some("x")), Value::Str("x".into()));
    }
}
