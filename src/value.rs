//! Dynamic state values.
//!
//! State is a plain nested structure, but containers are shared handles so
//! that the same raw object can be recognised again (identity) when it is
//! reached through another path or wrapped a second time.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

/// Property key: object field name or array index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Key {
    Field(String),
    Index(usize),
}

impl Key {
    /// Field name as written to objects (indices become decimal strings).
    pub fn as_field(&self) -> String {
        match self {
            Key::Field(name) => name.clone(),
            Key::Index(index) => index.to_string(),
        }
    }

    /// Index as used by arrays. Numeric field names parse as indices.
    pub fn as_index(&self) -> Option<usize> {
        match self {
            Key::Field(name) => name.parse().ok(),
            Key::Index(index) => Some(*index),
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Field(name) => write!(f, "{}", name),
            Key::Index(index) => write!(f, "{}", index),
        }
    }
}

impl From<&str> for Key {
    fn from(name: &str) -> Self {
        Key::Field(name.to_string())
    }
}

impl From<String> for Key {
    fn from(name: String) -> Self {
        Key::Field(name)
    }
}

impl From<&String> for Key {
    fn from(name: &String) -> Self {
        Key::Field(name.clone())
    }
}

impl From<usize> for Key {
    fn from(index: usize) -> Self {
        Key::Index(index)
    }
}

/// A raw object container. Clones share the same underlying map.
#[derive(Clone, Default)]
pub struct RawObject(Arc<Mutex<BTreeMap<String, Value>>>);

impl RawObject {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(map: BTreeMap<String, Value>) -> Self {
        Self(Arc::new(Mutex::new(map)))
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.0.lock().get(key).cloned()
    }

    /// Inserts a value and returns the previous one.
    pub fn insert(&self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0.lock().insert(key.into(), value.into())
    }

    pub fn remove(&self, key: &str) -> Option<Value> {
        self.0.lock().remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.lock().contains_key(key)
    }

    pub fn keys(&self) -> Vec<String> {
        self.0.lock().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.0.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.lock().is_empty()
    }

    /// Shallow copy of the entries (nested containers stay shared).
    pub fn entries(&self) -> Vec<(String, Value)> {
        self.0
            .lock()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Identity of the underlying container.
    pub fn addr(&self) -> usize {
        Arc::as_ptr(&self.0) as *const () as usize
    }

    pub fn ptr_eq(&self, other: &RawObject) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

/// A raw array container. Clones share the same underlying vector.
#[derive(Clone, Default)]
pub struct RawArray(Arc<Mutex<Vec<Value>>>);

impl RawArray {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_vec(items: Vec<Value>) -> Self {
        Self(Arc::new(Mutex::new(items)))
    }

    pub fn get(&self, index: usize) -> Option<Value> {
        self.0.lock().get(index).cloned()
    }

    /// Largest number of `Null` slots a single write may pad.
    pub const MAX_GAP: usize = 1 << 16;

    /// Whether [`RawArray::set`] would store a value at `index`.
    pub fn accepts(&self, index: usize) -> bool {
        index - index.min(self.len()) <= Self::MAX_GAP
    }

    /// Assigns `index`, padding with `Null` when writing past the end.
    /// Returns the previous value at that slot. A write more than
    /// [`RawArray::MAX_GAP`] slots past the end is dropped.
    pub fn set(&self, index: usize, value: impl Into<Value>) -> Option<Value> {
        let mut items = self.0.lock();
        if index - index.min(items.len()) > Self::MAX_GAP {
            tracing::trace!(index, len = items.len(), "Dropping array write far past the end");
            return None;
        }
        if index >= items.len() {
            items.resize(index, Value::Null);
            items.push(value.into());
            None
        } else {
            Some(std::mem::replace(&mut items[index], value.into()))
        }
    }

    pub fn push(&self, value: impl Into<Value>) -> usize {
        let mut items = self.0.lock();
        items.push(value.into());
        items.len() - 1
    }

    pub fn pop(&self) -> Option<Value> {
        self.0.lock().pop()
    }

    /// Inserts at `index` (clamped to the length). Returns the actual index.
    pub fn insert(&self, index: usize, value: impl Into<Value>) -> usize {
        let mut items = self.0.lock();
        let index = index.min(items.len());
        items.insert(index, value.into());
        index
    }

    pub fn remove(&self, index: usize) -> Option<Value> {
        let mut items = self.0.lock();
        (index < items.len()).then(|| items.remove(index))
    }

    pub fn len(&self) -> usize {
        self.0.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.lock().is_empty()
    }

    /// Shallow copy of the items (nested containers stay shared).
    pub fn items(&self) -> Vec<Value> {
        self.0.lock().clone()
    }

    /// Identity of the underlying container.
    pub fn addr(&self) -> usize {
        Arc::as_ptr(&self.0) as *const () as usize
    }

    pub fn ptr_eq(&self, other: &RawArray) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

/// A state value.
///
/// `PartialEq` is deep structural equality; use [`Value::same`] for the
/// strict identity check that decides whether a write notifies.
#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Array(RawArray),
    Object(RawObject),
}

impl Value {
    /// Empty object container.
    pub fn object() -> Self {
        Value::Object(RawObject::new())
    }

    /// Empty array container.
    pub fn array() -> Self {
        Value::Array(RawArray::new())
    }

    /// Strict identity: primitives by value, containers by handle.
    pub fn same(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Int(a), Value::Float(b)) | (Value::Float(b), Value::Int(a)) => {
                (*a as f64) == *b
            }
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => a.ptr_eq(b),
            (Value::Object(a), Value::Object(b)) => a.ptr_eq(b),
            _ => false,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn is_container(&self) -> bool {
        matches!(self, Value::Array(_) | Value::Object(_))
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
            Value::Float(f) if f.fract() == 0.0 => Some(*f as i64),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(n) => Some(*n as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&RawObject> {
        match self {
            Value::Object(obj) => Some(obj),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&RawArray> {
        match self {
            Value::Array(arr) => Some(arr),
            _ => None,
        }
    }

    /// Deep copy into a `serde_json::Value`.
    ///
    /// Non-finite floats become `null`. Cyclic containers are not supported.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(n) => serde_json::Value::from(*n),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Array(arr) => {
                serde_json::Value::Array(arr.items().iter().map(Value::to_json).collect())
            }
            Value::Object(obj) => serde_json::Value::Object(
                obj.entries()
                    .into_iter()
                    .map(|(k, v)| (k, v.to_json()))
                    .collect(),
            ),
        }
    }

    /// Deep copy from a `serde_json::Value`; every container is fresh.
    pub fn from_json(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => Value::Array(RawArray::from_vec(
                items.into_iter().map(Value::from_json).collect(),
            )),
            serde_json::Value::Object(map) => Value::Object(RawObject::from_map(
                map.into_iter()
                    .map(|(k, v)| (k, Value::from_json(v)))
                    .collect(),
            )),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Array(a), Value::Array(b)) => a.ptr_eq(b) || a.items() == b.items(),
            (Value::Object(a), Value::Object(b)) => a.ptr_eq(b) || a.entries() == b.entries(),
            _ => self.same(other),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(n) => write!(f, "{}", n),
            Value::Float(x) => write!(f, "{:?}", x),
            Value::String(s) => write!(f, "{:?}", s),
            Value::Array(arr) => f.debug_list().entries(arr.items()).finish(),
            Value::Object(obj) => f.debug_map().entries(obj.entries()).finish(),
        }
    }
}

impl fmt::Debug for RawObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.entries()).finish()
    }
}

impl fmt::Debug for RawArray {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.items()).finish()
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        Value::from_json(json)
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
        Value::Int(n.into())
    }
}

impl From<u32> for Value {
    fn from(n: u32) -> Self {
        Value::Int(n.into())
    }
}

impl From<usize> for Value {
    fn from(n: usize) -> Self {
        Value::Int(n as i64)
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Float(x)
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

impl From<RawObject> for Value {
    fn from(obj: RawObject) -> Self {
        Value::Object(obj)
    }
}

impl From<RawArray> for Value {
    fn from(arr: RawArray) -> Self {
        Value::Array(arr)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::Array(RawArray::from_vec(items))
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(opt: Option<T>) -> Self {
        opt.map(Into::into).unwrap_or(Value::Null)
    }
}

/// Build a `Vec<Value>` of action arguments.
///
/// ```
/// let args = ministore::args![1, "two", 3.0];
/// assert_eq!(args.len(), 3);
/// ```
#[macro_export]
macro_rules! args {
    () => { ::std::vec::Vec::<$crate::Value>::new() };
    ($($arg:expr),+ $(,)?) => {
        ::std::vec![$($crate::Value::from($arg)),+]
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn containers_compare_by_identity() {
        let a = Value::from(json!({"x": 1}));
        let b = Value::from(json!({"x": 1}));
        assert!(!a.same(&b));
        assert!(a.same(&a.clone()));
        assert_eq!(a, b);
    }

    #[test]
    fn primitives_compare_by_value() {
        assert!(Value::from(1).same(&Value::from(1.0)));
        assert!(Value::from("a").same(&Value::from("a")));
        assert!(!Value::from(true).same(&Value::from(1)));
        assert!(!Value::Float(f64::NAN).same(&Value::Float(f64::NAN)));
    }

    #[test]
    fn json_roundtrip_preserves_structure() {
        let source = json!({"list": [1, 2.5, "s", null], "nested": {"flag": true}});
        let value = Value::from(source.clone());
        assert_eq!(value.to_json(), source);
    }

    #[test]
    fn array_set_pads_with_null() {
        let arr = RawArray::new();
        arr.set(2, 7);
        assert_eq!(arr.items(), vec![Value::Null, Value::Null, Value::from(7)]);
    }

    #[test]
    fn array_set_far_past_the_end_is_dropped() {
        let arr = RawArray::from_vec(vec![Value::from(1)]);
        assert!(!arr.accepts(usize::MAX));
        assert_eq!(arr.set(usize::MAX, 7), None);
        assert_eq!(arr.set(RawArray::MAX_GAP + 2, 7), None);
        assert_eq!(arr.len(), 1);

        assert!(arr.accepts(RawArray::MAX_GAP + 1));
        arr.set(RawArray::MAX_GAP + 1, 7);
        assert_eq!(arr.len(), RawArray::MAX_GAP + 2);
    }

    #[test]
    fn numeric_field_parses_as_index() {
        assert_eq!(Key::from("3").as_index(), Some(3));
        assert_eq!(Key::from("name").as_index(), None);
        assert_eq!(Key::from(4usize).as_field(), "4");
    }
}
