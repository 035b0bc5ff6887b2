//! Derived value cache.
//!
//! Every getter runs against a [`TrackedState`] view that records the
//! top-level keys it reads. A keyed refresh only recomputes getters whose
//! recorded dependencies contain the changed key.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, BTreeSet};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::reactive::{Item, ReactiveNode};
use crate::value::{Key, Value};

pub type GetterFn = Arc<dyn Fn(&TrackedState<'_>) -> anyhow::Result<Value> + Send + Sync>;

/// Read-only view of the state that records every top-level key touched.
pub struct TrackedState<'a> {
    state: &'a ReactiveNode,
    deps: RefCell<BTreeSet<String>>,
    enumerated: Cell<bool>,
}

impl<'a> TrackedState<'a> {
    pub fn new(state: &'a ReactiveNode) -> Self {
        Self {
            state,
            deps: RefCell::new(BTreeSet::new()),
            enumerated: Cell::new(false),
        }
    }

    fn track(&self, key: &Key) {
        self.deps.borrow_mut().insert(key.as_field());
    }

    pub fn get(&self, key: impl Into<Key>) -> Option<Item> {
        let key = key.into();
        self.track(&key);
        self.state.get(key)
    }

    pub fn value(&self, key: impl Into<Key>) -> Option<Value> {
        let key = key.into();
        self.track(&key);
        self.state.value(key)
    }

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

    /// Enumerating keys depends on every key returned, and on keys being
    /// added or removed.
    pub fn keys(&self) -> Vec<Key> {
        self.enumerated.set(true);
        let keys = self.state.keys();
        for key in &keys {
            self.track(key);
        }
        keys
    }

    /// Whether the top-level key set was enumerated.
    pub fn enumerated(&self) -> bool {
        self.enumerated.get()
    }

    pub fn into_deps(self) -> BTreeSet<String> {
        self.deps.into_inner()
    }
}

#[derive(Default)]
struct CacheEntry {
    value: Option<Value>,
    deps: BTreeSet<String>,
    enumerates: bool,
    dirty: bool,
    computations: u64,
}

/// Cached getter outputs for one store.
pub struct GetterCache {
    getters: Vec<(String, GetterFn)>,
    entries: Mutex<BTreeMap<String, CacheEntry>>,
}

impl GetterCache {
    pub fn new(getters: Vec<(String, GetterFn)>) -> Self {
        let entries = getters
            .iter()
            .map(|(name, _)| {
                (
                    name.clone(),
                    CacheEntry {
                        dirty: true,
                        ..CacheEntry::default()
                    },
                )
            })
            .collect();
        Self {
            getters,
            entries: Mutex::new(entries),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.getters.is_empty()
    }

    /// Refresh cached values.
    ///
    /// `None` recomputes everything. `Some(key)` recomputes getters that
    /// depend on `key` plus any getter that has never computed successfully.
    /// Returns the names of the getters that were recomputed.
    pub fn recompute(&self, state: &ReactiveNode, changed_key: Option<&str>) -> Vec<String> {
        match changed_key {
            Some(key) => self.refresh(state, |entry| entry.deps.contains(key)),
            None => self.refresh(state, |_| true),
        }
    }

    /// Keyed refresh for a write visible under several top-level keys.
    /// `structural` marks a write that added or removed a key, which also
    /// refreshes getters that enumerated the state's keys.
    pub fn recompute_keys(
        &self,
        state: &ReactiveNode,
        changed_keys: &[String],
        structural: bool,
    ) -> Vec<String> {
        self.refresh(state, |entry| {
            (structural && entry.enumerates)
                || changed_keys.iter().any(|key| entry.deps.contains(key))
        })
    }

    fn refresh(&self, state: &ReactiveNode, affected: impl Fn(&CacheEntry) -> bool) -> Vec<String> {
        let mut recomputed = Vec::new();

        for (name, getter) in &self.getters {
            let stale = {
                let entries = self.entries.lock();
                entries
                    .get(name)
                    .map_or(true, |entry| entry.dirty || affected(entry))
            };
            if !stale {
                continue;
            }

            // The lock is released while the getter runs.
            let tracked = TrackedState::new(state);
            let result = catch_unwind(AssertUnwindSafe(|| getter(&tracked)))
                .unwrap_or_else(|_| Err(anyhow::anyhow!("getter panicked")));
            let enumerates = tracked.enumerated();
            let deps = tracked.into_deps();

            let mut entries = self.entries.lock();
            let entry = entries.entry(name.clone()).or_default();
            entry.deps = deps;
            entry.enumerates = enumerates;
            entry.computations += 1;
            match result {
                Ok(value) => {
                    entry.value = Some(value);
                    entry.dirty = false;
                }
                Err(e) => {
                    tracing::error!(getter = %name, error = %e, "Getter computation failed");
                }
            }
            recomputed.push(name.clone());
        }

        recomputed
    }

    pub fn value(&self, name: &str) -> Option<Value> {
        self.entries.lock().get(name).and_then(|e| e.value.clone())
    }

    /// Number of times the getter has been evaluated.
    pub fn computations(&self, name: &str) -> u64 {
        self.entries.lock().get(name).map_or(0, |e| e.computations)
    }

    /// Top-level keys read during the last evaluation.
    pub fn dependencies(&self, name: &str) -> BTreeSet<String> {
        self.entries
            .lock()
            .get(name)
            .map(|e| e.deps.clone())
            .unwrap_or_default()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.getters.iter().map(|(name, _)| name.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::ReactiveEngine;
    use serde_json::json;

    fn state(json: serde_json::Value) -> ReactiveNode {
        ReactiveEngine::new(true, |_| {}).wrap(json).unwrap()
    }

    fn getter(f: impl Fn(&TrackedState<'_>) -> anyhow::Result<Value> + Send + Sync + 'static) -> GetterFn {
        Arc::new(f)
    }

    #[test]
    fn keyed_refresh_only_touches_dependents() {
        let state = state(json!({"a": 1, "b": 2}));
        let cache = GetterCache::new(vec![
            ("g1".into(), getter(|s| Ok(Value::from(s.get_i64("a").unwrap_or(0) * 10)))),
            ("g2".into(), getter(|s| Ok(Value::from(s.get_i64("b").unwrap_or(0) * 10)))),
        ]);
        cache.recompute(&state, None);

        state.set("b", 5);
        let recomputed = cache.recompute(&state, Some("b"));

        assert_eq!(recomputed, vec!["g2".to_string()]);
        assert_eq!(cache.value("g1"), Some(Value::from(10)));
        assert_eq!(cache.value("g2"), Some(Value::from(50)));
        assert_eq!(cache.computations("g1"), 1);
        assert_eq!(cache.computations("g2"), 2);
    }

    #[test]
    fn dependencies_are_replaced_each_run() {
        let state = state(json!({"flag": true, "x": 1, "y": 2}));
        let cache = GetterCache::new(vec![(
            "pick".into(),
            getter(|s| {
                Ok(if s.get_bool("flag").unwrap_or(false) {
                    s.value("x").unwrap_or_default()
                } else {
                    s.value("y").unwrap_or_default()
                })
            }),
        )]);
        cache.recompute(&state, None);
        assert_eq!(
            cache.dependencies("pick"),
            BTreeSet::from(["flag".to_string(), "x".to_string()])
        );

        state.set("flag", false);
        cache.recompute(&state, Some("flag"));
        assert_eq!(
            cache.dependencies("pick"),
            BTreeSet::from(["flag".to_string(), "y".to_string()])
        );
        assert_eq!(cache.value("pick"), Some(Value::from(2)));

        // x is no longer a dependency
        assert!(cache.recompute(&state, Some("x")).is_empty());
    }

    #[test]
    fn failing_getter_keeps_previous_value_and_spares_others() {
        let state = state(json!({"n": 1}));
        let cache = GetterCache::new(vec![
            (
                "strict".into(),
                getter(|s| {
                    let n = s.get_i64("n").unwrap_or(0);
                    anyhow::ensure!(n < 5, "n too large: {n}");
                    Ok(Value::from(n))
                }),
            ),
            ("plain".into(), getter(|s| Ok(Value::from(s.get_i64("n").unwrap_or(0))))),
        ]);
        cache.recompute(&state, None);

        state.set("n", 9);
        cache.recompute(&state, Some("n"));
        assert_eq!(cache.value("strict"), Some(Value::from(1)));
        assert_eq!(cache.value("plain"), Some(Value::from(9)));
    }

    #[test]
    fn never_computed_getter_is_retried_on_any_key() {
        let state = state(json!({"ready": false, "other": 0}));
        let cache = GetterCache::new(vec![(
            "gate".into(),
            getter(|s| {
                anyhow::ensure!(s.get_bool("ready").unwrap_or(false), "not ready");
                Ok(Value::from(true))
            }),
        )]);
        cache.recompute(&state, None);
        assert_eq!(cache.value("gate"), None);

        state.set("ready", true);
        cache.recompute(&state, Some("other"));
        assert_eq!(cache.value("gate"), Some(Value::from(true)));
    }

    #[test]
    fn panicking_getter_is_contained() {
        let state = state(json!({"n": 1}));
        let cache = GetterCache::new(vec![
            (
                "boom".into(),
                getter(|s| {
                    let n = s.get_i64("n").unwrap_or(0);
                    assert!(n < 5, "n too large: {n}");
                    Ok(Value::from(n))
                }),
            ),
            ("plain".into(), getter(|s| Ok(Value::from(s.get_i64("n").unwrap_or(0))))),
        ]);
        cache.recompute(&state, None);

        state.set("n", 9);
        let recomputed = cache.recompute(&state, Some("n"));
        assert_eq!(recomputed, vec!["boom".to_string(), "plain".to_string()]);
        assert_eq!(cache.value("boom"), Some(Value::from(1)));
        assert_eq!(cache.value("plain"), Some(Value::from(9)));
        assert_eq!(cache.dependencies("boom"), BTreeSet::from(["n".to_string()]));
    }

    #[test]
    fn keyed_refresh_over_several_keys() {
        let state = state(json!({"a": 1, "b": 2, "c": 3}));
        let cache = GetterCache::new(vec![
            ("ga".into(), getter(|s| Ok(s.value("a").unwrap_or_default()))),
            ("gb".into(), getter(|s| Ok(s.value("b").unwrap_or_default()))),
            ("gc".into(), getter(|s| Ok(s.value("c").unwrap_or_default()))),
        ]);
        cache.recompute(&state, None);

        let recomputed = cache.recompute_keys(&state, &["a".to_string(), "c".to_string()], false);
        assert_eq!(recomputed, vec!["ga".to_string(), "gc".to_string()]);
    }

    #[test]
    fn enumerating_getter_refreshes_on_added_keys() {
        let state = state(json!({"a": 1}));
        let cache = GetterCache::new(vec![
            ("count".into(), getter(|s| Ok(Value::from(s.keys().len())))),
            ("ga".into(), getter(|s| Ok(s.value("a").unwrap_or_default()))),
        ]);
        cache.recompute(&state, None);

        state.set("b", 2);
        let recomputed = cache.recompute_keys(&state, &["b".to_string()], true);
        assert_eq!(recomputed, vec!["count".to_string()]);
        assert_eq!(cache.value("count"), Some(Value::from(2)));
    }
}
