//! Module composition.
//!
//! Assembles independently defined stores into one addressable collection.
//! Global middleware and plugins wrap every store's own, at every nesting
//! level; child modules become separate stores reachable through their
//! parent.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::action::Middleware;
use crate::bus::Bus;
use crate::config::EngineConfig;
use crate::store::{Plugin, Store, StoreDefinition, StoreEvent};

/// State shared by every store of one composition: engine settings, the
/// notification bus and the registry of created stores by dotted path.
///
/// Created explicitly; there is no process-global instance.
pub struct SharedContext {
    config: EngineConfig,
    bus: Arc<Bus<StoreEvent>>,
    registry: RwLock<BTreeMap<String, Store>>,
}

impl Default for SharedContext {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl SharedContext {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            bus: Arc::new(Bus::new()),
            registry: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub(crate) fn bus(&self) -> Arc<Bus<StoreEvent>> {
        self.bus.clone()
    }

    pub(crate) fn register(&self, path: &str, store: Store) {
        if self.registry.write().insert(path.to_string(), store).is_some() {
            tracing::warn!(store = %path, "Replaced a registered store with the same path");
        }
    }

    /// Store registered under `path` (`name` or `parent.child`).
    pub fn get(&self, path: &str) -> Option<Store> {
        self.registry.read().get(path).cloned()
    }

    pub fn paths(&self) -> Vec<String> {
        self.registry.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.registry.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.registry.read().is_empty()
    }
}

/// Options applied to every store of a composition.
#[derive(Default)]
pub struct GlobalOptions {
    pub config: EngineConfig,
    pub middleware: Vec<Arc<dyn Middleware>>,
    pub plugins: Vec<Arc<dyn Plugin>>,
}

impl GlobalOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn middleware(mut self, middleware: impl Middleware + 'static) -> Self {
        self.middleware.push(Arc::new(middleware));
        self
    }

    pub fn plugin(mut self, plugin: impl Plugin + 'static) -> Self {
        self.plugins.push(Arc::new(plugin));
        self
    }
}

/// Top-level stores of a composition, by name.
pub struct StoreCollection {
    stores: BTreeMap<String, Store>,
    shared: SharedContext,
}

impl StoreCollection {
    pub fn get(&self, name: &str) -> Option<&Store> {
        self.stores.get(name)
    }

    /// Resolve a dotted path such as `app.settings`.
    pub fn resolve(&self, path: &str) -> Option<Store> {
        self.shared.get(path)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.stores.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Store)> {
        self.stores.iter().map(|(name, store)| (name.as_str(), store))
    }

    pub fn shared(&self) -> &SharedContext {
        &self.shared
    }

    pub fn len(&self) -> usize {
        self.stores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stores.is_empty()
    }
}

/// Create one store per definition, with `options` wrapped around each.
pub fn compose<I, S>(definitions: I, options: GlobalOptions) -> StoreCollection
where
    I: IntoIterator<Item = (S, StoreDefinition)>,
    S: Into<String>,
{
    let shared = SharedContext::new(options.config.clone());
    let mut stores = BTreeMap::new();

    for (name, definition) in definitions {
        let name = name.into();
        if stores.contains_key(&name) {
            tracing::warn!(store = %name, "Duplicate module name; keeping the first");
            continue;
        }
        let definition = with_globals(&definition, &options);
        let store = Store::with_context(definition, &shared, &name);
        stores.insert(name, store);
    }

    tracing::info!(stores = stores.len(), registered = shared.len(), "Stores composed");
    StoreCollection { stores, shared }
}

fn with_globals(definition: &StoreDefinition, options: &GlobalOptions) -> StoreDefinition {
    let mut def = definition.with_outer(&options.middleware, &options.plugins);
    def.modules = def
        .modules
        .iter()
        .map(|(name, child)| (name.clone(), with_globals(child, options)))
        .collect();
    def
}
