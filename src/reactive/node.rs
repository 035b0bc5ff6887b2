use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::value::{Key, RawArray, RawObject, Value};

use super::{Mutation, MutationKind, ReactiveEngine};

pub(crate) enum Container {
    Object(RawObject),
    Array(RawArray),
}

pub(crate) struct NodeInner {
    pub(crate) raw: Container,
    /// Top-level state keys this subtree has been reached through, most
    /// recent first. Empty for the root.
    pub(crate) origins: RwLock<Vec<String>>,
    pub(crate) engine: ReactiveEngine,
}

/// Observed wrapper around exactly one raw container.
///
/// Cloning is cheap and keeps identity: clones compare equal.
#[derive(Clone)]
pub struct ReactiveNode {
    inner: Arc<NodeInner>,
}

/// Result of reading a property through a node.
#[derive(Debug, Clone)]
pub enum Item {
    /// A nested container, wrapped (deep observation).
    Node(ReactiveNode),
    /// A primitive, or a raw container when observation is shallow.
    Value(Value),
}

impl Item {
    pub fn as_node(&self) -> Option<&ReactiveNode> {
        match self {
            Item::Node(node) => Some(node),
            Item::Value(_) => None,
        }
    }

    pub fn into_node(self) -> Option<ReactiveNode> {
        match self {
            Item::Node(node) => Some(node),
            Item::Value(_) => None,
        }
    }

    /// The underlying value; nodes give back their raw container.
    pub fn into_value(self) -> Value {
        match self {
            Item::Node(node) => node.raw(),
            Item::Value(value) => value,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Item::Value(value) => value.as_i64(),
            Item::Node(_) => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Item::Value(value) => value.as_f64(),
            Item::Node(_) => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Item::Value(value) => value.as_bool(),
            Item::Node(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Item::Value(value) => value.as_str(),
            Item::Node(_) => None,
        }
    }
}

impl ReactiveNode {
    pub(crate) fn from_inner(inner: Arc<NodeInner>) -> Self {
        Self { inner }
    }

    pub(crate) fn engine(&self) -> &ReactiveEngine {
        &self.inner.engine
    }

    /// Read a property, wrapping nested containers when observation is deep.
    pub fn get(&self, key: impl Into<Key>) -> Option<Item> {
        let key = key.into();
        let value = self.read_raw(&key)?;
        Some(self.lift(value, &key))
    }

    /// Read a property without wrapping.
    pub fn value(&self, key: impl Into<Key>) -> Option<Value> {
        self.read_raw(&key.into())
    }

    /// Read a nested container as a node.
    pub fn node(&self, key: impl Into<Key>) -> Option<ReactiveNode> {
        self.get(key).and_then(Item::into_node)
    }

    pub fn get_i64(&self, key: impl Into<Key>) -> Option<i64> {
        self.value(key).and_then(|v| v.as_i64())
    }

    pub fn get_f64(&self, key: impl Into<Key>) -> Option<f64> {
        self.value(key).and_then(|v| v.as_f64())
    }

    pub fn get_bool(&self, key: impl Into<Key>) -> Option<bool> {
        self.value(key).and_then(|v| v.as_bool())
    }

    pub fn get_str(&self, key: impl Into<Key>) -> Option<String> {
        self.value(key).and_then(|v| v.as_str().map(str::to_string))
    }

    /// Assign a property.
    ///
    /// The assignment always happens. The change hook fires only when the
    /// new value is not strictly identical to the old one.
    pub fn set(&self, key: impl Into<Key>, value: impl Into<Value>) {
        let key = key.into();
        let value = value.into();
        let old = match &self.inner.raw {
            Container::Object(obj) => obj.insert(key.as_field(), value.clone()),
            Container::Array(arr) => match key.as_index() {
                Some(index) if arr.accepts(index) => arr.set(index, value.clone()),
                _ => {
                    tracing::trace!(key = %key, "Ignoring non-index or out-of-range write on array");
                    return;
                }
            },
        };

        // A missing key has no current value, so even `Null` is a change.
        let unchanged = old.as_ref().is_some_and(|old| old.same(&value));
        if unchanged {
            return;
        }
        self.commit(MutationKind::Set, key, old, Some(value));
    }

    /// Read-modify-write of a single property.
    pub fn update(&self, key: impl Into<Key>, f: impl FnOnce(Option<Value>) -> Value) {
        let key = key.into();
        let next = f(self.value(key.clone()));
        self.set(key, next);
    }

    /// Delete a property. Always notifies.
    ///
    /// On arrays the slot becomes `Null` and the length is unchanged.
    pub fn delete(&self, key: impl Into<Key>) -> Option<Value> {
        let key = key.into();
        let old = match &self.inner.raw {
            Container::Object(obj) => obj.remove(&key.as_field()),
            Container::Array(arr) => match key.as_index() {
                Some(index) if index < arr.len() => arr.set(index, Value::Null),
                _ => None,
            },
        };
        self.commit(MutationKind::Delete, key, old.clone(), None);
        old
    }

    /// Append to an array node. `None` on object nodes.
    pub fn push(&self, value: impl Into<Value>) -> Option<usize> {
        let Container::Array(arr) = &self.inner.raw else {
            return None;
        };
        let value = value.into();
        let index = arr.push(value.clone());
        self.commit(MutationKind::Set, Key::Index(index), None, Some(value));
        Some(index)
    }

    /// Remove the last element of an array node.
    pub fn pop(&self) -> Option<Value> {
        let Container::Array(arr) = &self.inner.raw else {
            return None;
        };
        let old = arr.pop()?;
        let index = arr.len();
        self.commit(MutationKind::Delete, Key::Index(index), Some(old.clone()), None);
        Some(old)
    }

    /// Insert into an array node, shifting later elements.
    pub fn insert(&self, index: usize, value: impl Into<Value>) -> Option<usize> {
        let Container::Array(arr) = &self.inner.raw else {
            return None;
        };
        let value = value.into();
        let index = arr.insert(index, value.clone());
        self.commit(MutationKind::Set, Key::Index(index), None, Some(value));
        Some(index)
    }

    /// Remove from an array node, shifting later elements.
    pub fn remove(&self, index: usize) -> Option<Value> {
        let Container::Array(arr) = &self.inner.raw else {
            return None;
        };
        let old = arr.remove(index)?;
        self.commit(MutationKind::Delete, Key::Index(index), Some(old.clone()), None);
        Some(old)
    }

    /// Keys in iteration order (field names, or indices for arrays).
    pub fn keys(&self) -> Vec<Key> {
        match &self.inner.raw {
            Container::Object(obj) => obj.keys().into_iter().map(Key::Field).collect(),
            Container::Array(arr) => (0..arr.len()).map(Key::Index).collect(),
        }
    }

    pub fn contains_key(&self, key: impl Into<Key>) -> bool {
        self.read_raw(&key.into()).is_some()
    }

    pub fn len(&self) -> usize {
        match &self.inner.raw {
            Container::Object(obj) => obj.len(),
            Container::Array(arr) => arr.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_array(&self) -> bool {
        matches!(self.inner.raw, Container::Array(_))
    }

    /// The wrapped raw container.
    pub fn raw(&self) -> Value {
        match &self.inner.raw {
            Container::Object(obj) => Value::Object(obj.clone()),
            Container::Array(arr) => Value::Array(arr.clone()),
        }
    }

    /// Deep copy of the current contents.
    pub fn snapshot(&self) -> serde_json::Value {
        self.raw().to_json()
    }

    pub fn ptr_eq(&self, other: &ReactiveNode) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    fn read_raw(&self, key: &Key) -> Option<Value> {
        match &self.inner.raw {
            Container::Object(obj) => obj.get(&key.as_field()),
            Container::Array(arr) => key.as_index().and_then(|index| arr.get(index)),
        }
    }

    fn lift(&self, value: Value, key: &Key) -> Item {
        let engine = &self.inner.engine;
        if value.is_container() && engine.is_deep() {
            if let Some(node) = engine.wrap_with_origin(value.clone(), self.top_keys(key)) {
                return Item::Node(node);
            }
        }
        Item::Value(value)
    }

    fn top_keys(&self, key: &Key) -> Vec<String> {
        let origins = self.inner.origins.read();
        if origins.is_empty() {
            vec![key.as_field()]
        } else {
            origins.clone()
        }
    }

    fn commit(&self, kind: MutationKind, key: Key, old: Option<Value>, new: Option<Value>) {
        let top_keys = self.top_keys(&key);
        let mutation = Mutation {
            kind,
            top_key: top_keys.first().cloned().unwrap_or_else(|| key.as_field()),
            top_keys,
            key,
            old_value: old,
            new_value: new,
        };
        self.inner.engine.notify(&mutation);
    }
}

impl PartialEq for ReactiveNode {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for ReactiveNode {}

impl fmt::Debug for ReactiveNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ReactiveNode").field(&self.raw()).finish()
    }
}

impl From<ReactiveNode> for Value {
    fn from(node: ReactiveNode) -> Self {
        node.raw()
    }
}

impl From<&ReactiveNode> for Value {
    fn from(node: &ReactiveNode) -> Self {
        node.raw()
    }
}

impl From<Item> for Value {
    fn from(item: Item) -> Self {
        item.into_value()
    }
}
