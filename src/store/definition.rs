use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use crate::action::{Action, Middleware};
use crate::getters::{GetterFn, TrackedState};
use crate::persist::PersistConfig;
use crate::reactive::ReactiveNode;
use crate::value::Value;

use super::plugin::Plugin;

type StateFactory = Arc<dyn Fn() -> Value + Send + Sync>;

/// Declarative description of a store.
///
/// Built with chained setters and immutable once a store is created from
/// it.
///
/// ```
/// use ministore::{Store, StoreDefinition, Value};
/// use serde_json::json;
///
/// let counter = StoreDefinition::new(|| json!({"count": 5}))
///     .getter("doubleCount", |s| Ok(Value::from(s.get_i64("count").unwrap_or(0) * 2)))
///     .action_fn("increment", |state, _| {
///         state.update("count", |n| Value::from(n.and_then(|n| n.as_i64()).unwrap_or(0) + 1));
///         Ok(Value::Null)
///     });
///
/// let store = Store::new(counter);
/// store.dispatch_sync("increment", vec![]).unwrap();
/// assert_eq!(store.getter("doubleCount"), Some(Value::from(12)));
/// ```
#[derive(Clone)]
pub struct StoreDefinition {
    pub(crate) name: Option<String>,
    pub(crate) state: StateFactory,
    pub(crate) actions: BTreeMap<String, Action>,
    pub(crate) getters: Vec<(String, GetterFn)>,
    pub(crate) persist: Option<PersistConfig>,
    pub(crate) deep: Option<bool>,
    pub(crate) middleware: Vec<Arc<dyn Middleware>>,
    pub(crate) plugins: Vec<Arc<dyn Plugin>>,
    pub(crate) modules: BTreeMap<String, StoreDefinition>,
}

impl StoreDefinition {
    /// `state` produces the initial state object. It is called once per
    /// store creation and again by `reset`.
    pub fn new<F, V>(state: F) -> Self
    where
        F: Fn() -> V + Send + Sync + 'static,
        V: Into<Value>,
    {
        Self {
            name: None,
            state: Arc::new(move || state().into()),
            actions: BTreeMap::new(),
            getters: Vec::new(),
            persist: None,
            deep: None,
            middleware: Vec::new(),
            plugins: Vec::new(),
            modules: BTreeMap::new(),
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn action(mut self, name: impl Into<String>, action: Action) -> Self {
        self.actions.insert(name.into(), action);
        self
    }

    /// Shorthand for a synchronous [`Action::new`].
    pub fn action_fn<F>(self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&ReactiveNode, &[Value]) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        self.action(name, Action::new(f))
    }

    /// Shorthand for [`Action::deferred`].
    pub fn async_action<F, Fut>(self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&ReactiveNode, &[Value]) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        self.action(name, Action::deferred(f))
    }

    /// Getters are evaluated in declaration order.
    pub fn getter<F>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&TrackedState<'_>) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        let name = name.into();
        self.getters.retain(|(existing, _)| *existing != name);
        self.getters.push((name, Arc::new(f)));
        self
    }

    pub fn persist(mut self, config: PersistConfig) -> Self {
        self.persist = Some(config);
        self
    }

    pub fn deep(mut self, deep: bool) -> Self {
        self.deep = Some(deep);
        self
    }

    /// Appended after (inside) previously added middleware.
    pub fn middleware(mut self, middleware: impl Middleware + 'static) -> Self {
        self.middleware.push(Arc::new(middleware));
        self
    }

    pub fn plugin(mut self, plugin: impl Plugin + 'static) -> Self {
        self.plugins.push(Arc::new(plugin));
        self
    }

    /// Nested definition, created as a child store.
    pub fn module(mut self, name: impl Into<String>, definition: StoreDefinition) -> Self {
        self.modules.insert(name.into(), definition);
        self
    }

    pub fn get_name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Fresh output of the state factory.
    pub fn initial_state(&self) -> Value {
        (self.state)()
    }

    pub fn action_names(&self) -> impl Iterator<Item = &str> {
        self.actions.keys().map(String::as_str)
    }

    pub fn getter_names(&self) -> impl Iterator<Item = &str> {
        self.getters.iter().map(|(name, _)| name.as_str())
    }

    pub fn module_names(&self) -> impl Iterator<Item = &str> {
        self.modules.keys().map(String::as_str)
    }

    pub fn persist_config(&self) -> Option<&PersistConfig> {
        self.persist.as_ref()
    }

    /// Copy with `middleware` and `plugins` placed before (outside) the
    /// definition's own.
    pub(crate) fn with_outer(
        &self,
        middleware: &[Arc<dyn Middleware>],
        plugins: &[Arc<dyn Plugin>],
    ) -> StoreDefinition {
        let mut def = self.clone();
        def.middleware = middleware.iter().chain(&self.middleware).cloned().collect();
        def.plugins = plugins.iter().chain(&self.plugins).cloned().collect();
        def
    }
}

impl fmt::Debug for StoreDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreDefinition")
            .field("name", &self.name)
            .field("actions", &self.actions.keys().collect::<Vec<_>>())
            .field("getters", &self.getter_names().collect::<Vec<_>>())
            .field("persist", &self.persist)
            .field("deep", &self.deep)
            .field("middleware", &self.middleware.len())
            .field("plugins", &self.plugins.len())
            .field("modules", &self.modules.keys().collect::<Vec<_>>())
            .finish()
    }
}
