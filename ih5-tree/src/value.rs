//! Typed values for datasets and attributes.

use serde::{Deserialize, Serialize};

/// A dataset or attribute payload.
///
/// `Empty` mirrors the "no storage" values used by structural stubs: the
/// entity exists and has a place in the tree, but carries no data. `Raw` is
/// an opaque scalar byte value; it is reserved for internal sentinels and is
/// rejected for user data at the overlay boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// Entity exists but holds no data
    Empty,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    /// Binary string data
    Bytes(Vec<u8>),
    /// Opaque scalar bytes (internal sentinel carrier)
    Raw(Vec<u8>),
    BoolArray(Vec<bool>),
    IntArray(Vec<i64>),
    FloatArray(Vec<f64>),
    StrArray(Vec<String>),
}

impl Value {
    /// Returns true for the empty (no storage) value.
    pub fn is_empty(&self) -> bool {
        matches!(self, Value::Empty)
    }

    /// Short name of the contained value shape, for error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Empty => "empty",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::Bytes(_) => "bytes",
            Value::Raw(_) => "raw",
            Value::BoolArray(_) => "bool[]",
            Value::IntArray(_) => "int[]",
            Value::FloatArray(_) => "float[]",
            Value::StrArray(_) => "str[]",
        }
    }

    /// Number of elements for array values, `None` for scalars.
    pub fn len(&self) -> Option<usize> {
        match self {
            Value::BoolArray(v) => Some(v.len()),
            Value::IntArray(v) => Some(v.len()),
            Value::FloatArray(v) => Some(v.len()),
            Value::StrArray(v) => Some(v.len()),
            _ => None,
        }
    }

    /// Element of an array value as a scalar, `None` for scalars or
    /// out-of-range indexes.
    pub fn element(&self, idx: usize) -> Option<Value> {
        match self {
            Value::BoolArray(v) => v.get(idx).map(|x| Value::Bool(*x)),
            Value::IntArray(v) => v.get(idx).map(|x| Value::Int(*x)),
            Value::FloatArray(v) => v.get(idx).map(|x| Value::Float(*x)),
            Value::StrArray(v) => v.get(idx).map(|x| Value::Str(x.clone())),
            _ => None,
        }
    }

    /// Replace an element of an array value with a matching scalar.
    ///
    /// Returns false if this is not an array, the index is out of range, or
    /// the scalar shape does not match the element type.
    pub fn set_element(&mut self, idx: usize, val: Value) -> bool {
        match (self, val) {
            (Value::BoolArray(v), Value::Bool(x)) if idx < v.len() => {
                v[idx] = x;
                true
            }
            (Value::IntArray(v), Value::Int(x)) if idx < v.len() => {
                v[idx] = x;
                true
            }
            (Value::FloatArray(v), Value::Float(x)) if idx < v.len() => {
                v[idx] = x;
                true
            }
            (Value::StrArray(v), Value::Str(x)) if idx < v.len() => {
                v[idx] = x;
                true
            }
            _ => false,
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

impl From<Vec<bool>> for Value {
    fn from(v: Vec<bool>) -> Self {
        Value::BoolArray(v)
    }
}

impl From<Vec<i64>> for Value {
    fn from(v: Vec<i64>) -> Self {
        Value::IntArray(v)
    }
}

impl From<Vec<f64>> for Value {
    fn from(v: Vec<f64>) -> Self {
        Value::FloatArray(v)
    }
}

impl From<Vec<String>> for Value {
    fn from(v: Vec<String>) -> Self {
        Value::StrArray(v)
    }
}

impl From<Vec<&str>> for Value {
    fn from(v: Vec<&str>) -> Self {
        Value::StrArray(v.into_iter().map(str::to_string).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_conversions() {
        assert_eq!(Value::from(true), Value::Bool(true));
        assert_eq!(Value::from(42), Value::Int(42));
        assert_eq!(Value::from(1.5), Value::Float(1.5));
        assert_eq!(Value::from("hi"), Value::Str("hi".into()));
    }

    #[test]
    fn array_element_access() {
        let mut v = Value::from(vec![1i64, 2, 3]);
        assert_eq!(v.len(), Some(3));
        assert_eq!(v.element(1), Some(Value::Int(2)));
        assert_eq!(v.element(3), None);
        assert!(v.set_element(1, Value::Int(20)));
        assert_eq!(v.element(1), Some(Value::Int(20)));
        assert!(!v.set_element(1, Value::Bool(false)));
        assert!(!v.set_element(9, Value::Int(0)));
    }

    #[test]
    fn scalars_have_no_elements() {
        let v = Value::Int(7);
        assert_eq!(v.len(), None);
        assert_eq!(v.element(0), None);
    }
}
