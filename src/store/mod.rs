//! Store instances.
//!
//! A store owns one reactive state tree and wires everything else to it:
//!
//! ```text
//!                ┌──────────────── Store ────────────────┐
//!   dispatch ──→ │ ActionPipeline ──→ action body         │
//!                │                       │ writes         │
//!                │                       ▼                │
//!   set/get ───→ │ ReactiveNode ──→ Bus(state topic) ─────┼──→ getters (first)
//!                │                                        │──→ persistence
//!                │                                        │──→ selector queue
//!                │                                        └──→ user subscribers
//!                └────────────────────────────────────────┘
//! ```
//!
//! Internal handlers are registered before anything a plugin or user can
//! add, so subscribers always observe refreshed getters.

mod batch;
mod definition;
mod plugin;
mod subscription;

use std::collections::BTreeMap;
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use serde_json::Map;
use tokio::runtime::Handle;

use crate::action::{Action, ActionEvent, ActionPipeline, ActionResult, MiddlewareContext, Outcome};
use crate::bus::{Bus, Topic};
use crate::error::StoreError;
use crate::getters::GetterCache;
use crate::modules::SharedContext;
use crate::persist::Persistence;
use crate::reactive::{Item, Mutation, ReactiveEngine, ReactiveNode};
use crate::value::{Key, RawObject, Value};

use batch::SelectorQueue;
pub use definition::StoreDefinition;
pub use plugin::{Plugin, PluginContext};
pub use subscription::Subscription;

/// Payload carried on a store's bus topics.
#[derive(Debug, Clone)]
pub enum StoreEvent {
    Mutation(Mutation),
    Action(ActionEvent),
}

/// Shared handle to a live store. Clones refer to the same store.
#[derive(Clone)]
pub struct Store {
    inner: Arc<StoreInner>,
}

pub(crate) struct StoreInner {
    path: String,
    definition: Arc<StoreDefinition>,
    state: ReactiveNode,
    bus: Arc<Bus<StoreEvent>>,
    state_topic: Topic,
    action_topic: Topic,
    getters: GetterCache,
    pipeline: ActionPipeline,
    persistence: Option<Persistence>,
    pub(crate) batch: SelectorQueue,
    modules: BTreeMap<String, Store>,
    extensions: RwLock<BTreeMap<String, Value>>,
}

impl Store {
    /// Create a standalone store with default engine settings.
    pub fn new(definition: StoreDefinition) -> Store {
        let shared = SharedContext::default();
        let path = definition.name.clone().unwrap_or_else(|| "store".to_string());
        Store::with_context(definition, &shared, &path)
    }

    /// Create a store registered in `shared` under `path`. Nested modules
    /// are created first and registered as `path.name`.
    pub fn with_context(definition: StoreDefinition, shared: &SharedContext, path: &str) -> Store {
        let config = shared.config();
        let definition = Arc::new(definition);
        let deep = definition.deep.unwrap_or(config.deep);

        let modules: BTreeMap<String, Store> = definition
            .modules
            .iter()
            .map(|(name, child)| {
                let child_path = format!("{path}.{name}");
                (name.clone(), Store::with_context(child.clone(), shared, &child_path))
            })
            .collect();

        let persistence = definition
            .persist
            .clone()
            .map(|persist| Persistence::new(persist, config));
        let restored = persistence.as_ref().and_then(Persistence::restore);
        let root = initial_state(&definition, restored, path);

        let bus = shared.bus();
        let state_topic = Topic::new();
        let action_topic = Topic::new();

        let inner = Arc::new_cyclic(|weak: &Weak<StoreInner>| {
            let engine = {
                let bus = bus.clone();
                ReactiveEngine::new(deep, move |mutation: &Mutation| {
                    bus.emit(&state_topic, &StoreEvent::Mutation(mutation.clone()));
                })
            };
            let state = engine.wrap_object(root, None);

            let context = MiddlewareContext::new(weak.clone(), state.clone(), definition.clone());
            let pipeline = {
                let bus = bus.clone();
                ActionPipeline::bind(
                    definition.actions.clone(),
                    definition.middleware.clone(),
                    context,
                    move |event: &ActionEvent| {
                        bus.emit(&action_topic, &StoreEvent::Action(event.clone()));
                    },
                )
            };

            StoreInner {
                path: path.to_string(),
                getters: GetterCache::new(definition.getters.clone()),
                definition: definition.clone(),
                state,
                bus: bus.clone(),
                state_topic,
                action_topic,
                pipeline,
                persistence,
                batch: SelectorQueue::new(),
                modules,
                extensions: RwLock::new(BTreeMap::new()),
            }
        });

        let store = Store { inner };
        store.register_internal_handlers();
        store.inner.getters.recompute(&store.inner.state, None);
        shared.register(path, store.clone());

        tracing::debug!(
            store = %path,
            deep,
            actions = definition.actions.len(),
            getters = definition.getters.len(),
            modules = store.inner.modules.len(),
            persisted = store.inner.persistence.is_some(),
            "Store created"
        );

        store.install_plugins(shared);
        store
    }

    pub(crate) fn from_inner(inner: Arc<StoreInner>) -> Store {
        Store { inner }
    }

    fn register_internal_handlers(&self) {
        let weak = Arc::downgrade(&self.inner);
        self.inner.bus.on(&self.inner.state_topic, move |event: &StoreEvent| {
            let (Some(inner), StoreEvent::Mutation(mutation)) = (weak.upgrade(), event) else {
                return Ok(());
            };

            if !inner.getters.is_empty() {
                let structural = mutation.old_value.is_none() || mutation.new_value.is_none();
                inner
                    .getters
                    .recompute_keys(&inner.state, &mutation.top_keys, structural);
            }
            if let Some(persistence) = &inner.persistence {
                persistence.schedule(&inner.state);
            }
            if inner.batch.has_watchers() && inner.batch.mark() {
                schedule_flush(Arc::downgrade(&inner));
            }
            Ok(())
        });
    }

    fn install_plugins(&self, shared: &SharedContext) {
        let definition = self.inner.definition.clone();
        let ctx = PluginContext {
            store: self,
            definition: &definition,
            shared,
        };
        for plugin in &definition.plugins {
            if let Err(e) = plugin.install(&ctx) {
                tracing::error!(
                    store = %self.inner.path,
                    plugin = %plugin.name(),
                    error = %e,
                    "Plugin installation failed"
                );
            }
        }
    }

    /// Registry path of this store (its name, or `parent.child`).
    pub fn label(&self) -> &str {
        &self.inner.path
    }

    pub fn definition(&self) -> &StoreDefinition {
        &self.inner.definition
    }

    /// The canonical reactive state.
    pub fn state(&self) -> &ReactiveNode {
        &self.inner.state
    }

    pub fn get(&self, key: impl Into<Key>) -> Option<Item> {
        self.inner.state.get(key)
    }

    pub fn value(&self, key: impl Into<Key>) -> Option<Value> {
        self.inner.state.value(key)
    }

    pub fn set(&self, key: impl Into<Key>, value: impl Into<Value>) {
        self.inner.state.set(key, value);
    }

    /// Deep copy of the current state.
    pub fn snapshot(&self) -> serde_json::Value {
        self.inner.state.snapshot()
    }

    /// Cached value of a getter.
    pub fn getter(&self, name: &str) -> Option<Value> {
        self.inner.getters.value(name)
    }

    pub fn getters(&self) -> &GetterCache {
        &self.inner.getters
    }

    /// Invoke an action through the middleware chain. Await the outcome
    /// for deferred actions.
    pub fn dispatch(&self, name: &str, args: Vec<Value>) -> Outcome {
        self.inner.pipeline.dispatch(name, args)
    }

    /// Invoke an action that settles synchronously.
    ///
    /// A deferred outcome is dropped and reported as
    /// [`StoreError::Deferred`]; any writes made before its first await
    /// stand.
    pub fn dispatch_sync(&self, name: &str, args: Vec<Value>) -> ActionResult {
        self.dispatch(name, args)
            .into_ready()
            .unwrap_or_else(|| {
                Err(StoreError::Deferred {
                    action: name.to_string(),
                })
            })
    }

    pub fn has_action(&self, name: &str) -> bool {
        self.inner.pipeline.contains(name)
    }

    pub fn action_names(&self) -> Vec<String> {
        self.inner.pipeline.names()
    }

    /// Swap an action body at runtime, returning the previous one.
    pub fn replace_action(&self, name: &str, action: Action) -> Option<Action> {
        self.inner.pipeline.replace_action(name, action)
    }

    pub fn remove_action(&self, name: &str) -> Option<Action> {
        self.inner.pipeline.remove_action(name)
    }

    /// Observe every committed write. The handler gets the mutation and
    /// the state after it.
    pub fn subscribe<F>(&self, f: F) -> Subscription
    where
        F: Fn(&Mutation, &ReactiveNode) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let weak = Arc::downgrade(&self.inner);
        let id = self.inner.bus.on(&self.inner.state_topic, move |event: &StoreEvent| {
            match (weak.upgrade(), event) {
                (Some(inner), StoreEvent::Mutation(mutation)) => f(mutation, &inner.state),
                _ => Ok(()),
            }
        });
        Subscription::handler(Arc::downgrade(&self.inner.bus), self.inner.state_topic, id)
    }

    /// Observe action start, completion and failure.
    pub fn subscribe_action<F>(&self, f: F) -> Subscription
    where
        F: Fn(&ActionEvent, &ReactiveNode) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let weak = Arc::downgrade(&self.inner);
        let id = self.inner.bus.on(&self.inner.action_topic, move |event: &StoreEvent| {
            match (weak.upgrade(), event) {
                (Some(inner), StoreEvent::Action(action)) => f(action, &inner.state),
                _ => Ok(()),
            }
        });
        Subscription::handler(Arc::downgrade(&self.inner.bus), self.inner.action_topic, id)
    }

    /// Watch a selection of the store.
    ///
    /// Writes only mark the watcher queue. On the next flush the selector
    /// runs once and `callback(new, old)` fires if the selection is not
    /// strictly identical to the previous one. A flush is spawned on the
    /// current tokio runtime when there is one; otherwise call
    /// [`Store::flush`].
    pub fn select<S, C>(&self, selector: S, callback: C) -> Subscription
    where
        S: Fn(&Store) -> Value + Send + Sync + 'static,
        C: Fn(&Value, &Value) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let initial = selector(self);
        let id = self
            .inner
            .batch
            .watch(initial, Arc::new(selector), Arc::new(callback));
        Subscription::watcher(Arc::downgrade(&self.inner), id)
    }

    /// Evaluate pending selector watchers now. Returns the number of
    /// callbacks that fired.
    pub fn flush(&self) -> usize {
        self.inner.batch.flush(self)
    }

    /// Replace the state wholesale: every provided top-level key is
    /// written, keys missing from `state` are deleted, then every getter
    /// is recomputed. Returns false if `state` is not an object.
    pub fn restore_state(&self, state: impl Into<Value>) -> bool {
        let state = state.into();
        let Some(incoming) = state.as_object() else {
            tracing::warn!(store = %self.inner.path, "Ignoring non-object state restore");
            return false;
        };

        let current = &self.inner.state;
        for key in current.keys() {
            if !incoming.contains_key(&key.as_field()) {
                current.delete(key);
            }
        }
        for (key, value) in incoming.entries() {
            current.set(key, value);
        }
        self.inner.getters.recompute(current, None);
        tracing::debug!(store = %self.inner.path, "State restored");
        true
    }

    /// Reassign every key of a fresh state factory output.
    pub fn reset(&self) {
        match self.inner.definition.initial_state() {
            Value::Object(fresh) => {
                for (key, value) in fresh.entries() {
                    self.inner.state.set(key, value);
                }
            }
            _ => tracing::warn!(store = %self.inner.path, "State factory returned a non-object"),
        }
    }

    /// Attach a named property, typically from a plugin.
    pub fn set_extension(&self, name: impl Into<String>, value: impl Into<Value>) {
        self.inner.extensions.write().insert(name.into(), value.into());
    }

    pub fn extension(&self, name: &str) -> Option<Value> {
        self.inner.extensions.read().get(name).cloned()
    }

    /// Child store created from a nested module definition.
    pub fn module(&self, name: &str) -> Option<Store> {
        self.inner.modules.get(name).cloned()
    }

    pub fn module_names(&self) -> Vec<String> {
        self.inner.modules.keys().cloned().collect()
    }

    /// Write persisted state now instead of waiting for the debounce.
    pub fn flush_persistence(&self) {
        if let Some(persistence) = &self.inner.persistence {
            persistence.flush(&self.inner.state);
        }
    }

    pub fn ptr_eq(&self, other: &Store) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("path", &self.inner.path)
            .field("state", &self.inner.state)
            .finish()
    }
}

/// Defaults shallow-merged with restored keys.
fn initial_state(
    definition: &StoreDefinition,
    restored: Option<Map<String, serde_json::Value>>,
    path: &str,
) -> RawObject {
    let root = match definition.initial_state() {
        Value::Object(root) => root,
        _ => {
            tracing::warn!(store = %path, "State factory returned a non-object; starting empty");
            RawObject::new()
        }
    };
    for (key, value) in restored.into_iter().flatten() {
        root.insert(key, Value::from(value));
    }
    root
}

/// Flush selector watchers on the next scheduler tick, when a runtime is
/// available.
fn schedule_flush(inner: Weak<StoreInner>) {
    let Ok(handle) = Handle::try_current() else {
        return;
    };
    handle.spawn(async move {
        tokio::task::yield_now().await;
        if let Some(inner) = inner.upgrade() {
            Store::from_inner(inner).flush();
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use serde_json::json;

    fn counter() -> StoreDefinition {
        StoreDefinition::new(|| json!({"count": 5, "label": "c"}))
            .getter("doubleCount", |s| {
                Ok(Value::from(s.get_i64("count").unwrap_or(0) * 2))
            })
            .action_fn("increment", |state, _| {
                state.update("count", |n| {
                    Value::from(n.and_then(|n| n.as_i64()).unwrap_or(0) + 1)
                });
                Ok(Value::Null)
            })
    }

    #[test]
    fn subscribers_see_fresh_getters() {
        let store = Store::new(counter());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let reader = store.clone();
        store.subscribe(move |_, _| {
            sink.lock().push(reader.getter("doubleCount"));
            Ok(())
        });

        store.dispatch_sync("increment", vec![]).unwrap();
        assert_eq!(*seen.lock(), vec![Some(Value::from(12))]);
    }

    #[test]
    fn restore_state_replaces_keys_and_refreshes_getters() {
        let store = Store::new(counter());
        assert!(store.restore_state(json!({"count": 10, "extra": true})));
        assert_eq!(store.snapshot(), json!({"count": 10, "extra": true}));
        assert_eq!(store.getter("doubleCount"), Some(Value::from(20)));

        assert!(!store.restore_state(3));
    }

    #[test]
    fn reset_reassigns_factory_output() {
        let store = Store::new(counter());
        store.set("count", 99);
        store.set("label", "changed");
        store.reset();
        assert_eq!(store.snapshot(), json!({"count": 5, "label": "c"}));
        assert_eq!(store.getter("doubleCount"), Some(Value::from(10)));
    }

    #[test]
    fn non_object_factory_starts_empty() {
        let store = Store::new(StoreDefinition::new(|| 3));
        assert_eq!(store.snapshot(), json!({}));
    }

    #[test]
    fn deferred_action_is_reported_by_dispatch_sync() {
        let store = Store::new(
            StoreDefinition::new(|| json!({})).async_action("later", |_, _| async { Ok(Value::Null) }),
        );
        let err = store.dispatch_sync("later", vec![]).unwrap_err();
        assert!(matches!(err, StoreError::Deferred { .. }));
    }

    #[test]
    fn select_without_runtime_needs_flush() {
        let store = Store::new(counter());
        let calls = Arc::new(Mutex::new(Vec::new()));
        let sink = calls.clone();
        store.select(
            |s| s.value("count").unwrap_or_default(),
            move |new, old| {
                sink.lock().push((old.as_i64(), new.as_i64()));
                Ok(())
            },
        );

        store.set("count", 6);
        store.set("count", 7);
        store.set("label", "x");
        assert!(calls.lock().is_empty());

        assert_eq!(store.flush(), 1);
        assert_eq!(*calls.lock(), vec![(Some(5), Some(7))]);

        // Only an unrelated key changed: selection is identical.
        store.set("label", "y");
        assert_eq!(store.flush(), 0);
    }

    #[test]
    fn extensions_are_per_store() {
        let a = Store::new(counter());
        let b = Store::new(counter());
        a.set_extension("version", "1.0");
        assert_eq!(a.extension("version"), Some(Value::from("1.0")));
        assert_eq!(b.extension("version"), None);
    }
}
