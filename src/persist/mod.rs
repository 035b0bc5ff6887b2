//! State persistence.
//!
//! ```text
//! restore:  storage.get ─→ decrypt ─→ deserialize ─→ object? ─→ before_restore ─→ state
//!                                                                          └──→ after_restore
//! persist:  snapshot ─→ pick paths ─→ serialize ─→ encrypt ─→ storage.set
//! ```
//!
//! Writes are debounced; every failure is logged and swallowed.

mod debounce;
mod error;
mod storage;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value as Json};

use crate::config::EngineConfig;
use crate::reactive::ReactiveNode;

pub use debounce::Debouncer;
pub use error::{PersistError, StorageError};
pub use storage::{session_storage, FileStorage, MemoryStorage, StorageBackend, StorageKind};

/// Converts a state snapshot to and from its stored text form.
pub trait Serializer: Send + Sync {
    fn serialize(&self, state: &Json) -> anyhow::Result<String>;
    fn deserialize(&self, raw: &str) -> anyhow::Result<Json>;
}

/// Default structural encoding.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSerializer;

impl Serializer for JsonSerializer {
    fn serialize(&self, state: &Json) -> anyhow::Result<String> {
        Ok(serde_json::to_string(state)?)
    }

    fn deserialize(&self, raw: &str) -> anyhow::Result<Json> {
        Ok(serde_json::from_str(raw)?)
    }
}

/// Reversible transform applied to the serialized text.
pub trait Encryption: Send + Sync {
    fn encrypt(&self, plain: &str) -> anyhow::Result<String>;
    fn decrypt(&self, cipher: &str) -> anyhow::Result<String>;
}

/// Where a persisted store keeps its payload.
#[derive(Clone)]
pub enum StorageTarget {
    Kind(StorageKind),
    Backend(Arc<dyn StorageBackend>),
}

impl StorageTarget {
    fn resolve(&self, config: &EngineConfig) -> Arc<dyn StorageBackend> {
        match self {
            StorageTarget::Kind(kind) => kind.resolve(config),
            StorageTarget::Backend(backend) => backend.clone(),
        }
    }
}

impl fmt::Debug for StorageTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageTarget::Kind(kind) => f.debug_tuple("Kind").field(kind).finish(),
            StorageTarget::Backend(_) => f.write_str("Backend(..)"),
        }
    }
}

type BeforeRestore = Arc<dyn Fn(Json) -> anyhow::Result<Json> + Send + Sync>;
type AfterRestore = Arc<dyn Fn(&Json) + Send + Sync>;

/// Persistence settings of one store.
#[derive(Clone)]
pub struct PersistConfig {
    key: String,
    storage: StorageTarget,
    paths: Option<Vec<String>>,
    serializer: Arc<dyn Serializer>,
    encryption: Option<Arc<dyn Encryption>>,
    before_restore: Option<BeforeRestore>,
    after_restore: Option<AfterRestore>,
    debug: bool,
    debounce: Option<Duration>,
}

impl PersistConfig {
    /// Persist under `key` in local storage with JSON encoding.
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            storage: StorageTarget::Kind(StorageKind::Local),
            paths: None,
            serializer: Arc::new(JsonSerializer),
            encryption: None,
            before_restore: None,
            after_restore: None,
            debug: false,
            debounce: None,
        }
    }

    pub fn storage(mut self, kind: StorageKind) -> Self {
        self.storage = StorageTarget::Kind(kind);
        self
    }

    pub fn backend(mut self, backend: Arc<dyn StorageBackend>) -> Self {
        self.storage = StorageTarget::Backend(backend);
        self
    }

    /// Persist only these top-level keys.
    pub fn paths<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.paths = Some(paths.into_iter().map(Into::into).collect());
        self
    }

    pub fn serializer(mut self, serializer: impl Serializer + 'static) -> Self {
        self.serializer = Arc::new(serializer);
        self
    }

    pub fn encryption(mut self, encryption: impl Encryption + 'static) -> Self {
        self.encryption = Some(Arc::new(encryption));
        self
    }

    /// Transform the decoded payload before it is merged into the defaults.
    pub fn before_restore(
        mut self,
        hook: impl Fn(Json) -> anyhow::Result<Json> + Send + Sync + 'static,
    ) -> Self {
        self.before_restore = Some(Arc::new(hook));
        self
    }

    pub fn after_restore(mut self, hook: impl Fn(&Json) + Send + Sync + 'static) -> Self {
        self.after_restore = Some(Arc::new(hook));
        self
    }

    /// Log restore and write failures at warn level instead of debug.
    pub fn debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Override the engine-wide debounce window.
    pub fn debounce(mut self, delay: Duration) -> Self {
        self.debounce = Some(delay);
        self
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

impl fmt::Debug for PersistConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PersistConfig")
            .field("key", &self.key)
            .field("storage", &self.storage)
            .field("paths", &self.paths)
            .field("encrypted", &self.encryption.is_some())
            .field("debug", &self.debug)
            .field("debounce", &self.debounce)
            .finish()
    }
}

/// Restore and write pipelines bound to a resolved backend.
pub struct PersistPipeline {
    config: PersistConfig,
    backend: Arc<dyn StorageBackend>,
}

impl PersistPipeline {
    pub fn new(config: PersistConfig, backend: Arc<dyn StorageBackend>) -> Self {
        Self { config, backend }
    }

    pub fn config(&self) -> &PersistConfig {
        &self.config
    }

    /// Previously stored state, or `None` when there is none or it cannot
    /// be read back.
    pub fn restore(&self) -> Option<Map<String, Json>> {
        match self.try_restore() {
            Ok(Some(state)) => {
                if let Some(hook) = &self.config.after_restore {
                    hook(&Json::Object(state.clone()));
                }
                tracing::debug!(key = %self.config.key, keys = state.len(), "Restored state");
                Some(state)
            }
            Ok(None) => None,
            Err(e) => {
                if self.config.debug {
                    tracing::warn!(key = %self.config.key, error = %e, "Failed to restore state");
                } else {
                    tracing::debug!(key = %self.config.key, error = %e, "Failed to restore state");
                }
                None
            }
        }
    }

    pub fn try_restore(&self) -> Result<Option<Map<String, Json>>, PersistError> {
        let key = &self.config.key;
        let Some(raw) = self.backend.get(key)? else {
            return Ok(None);
        };

        let plain = match &self.config.encryption {
            Some(encryption) => encryption
                .decrypt(&raw)
                .map_err(|source| PersistError::Decrypt {
                    key: key.clone(),
                    source,
                })?,
            None => raw,
        };

        let decoded = self
            .config
            .serializer
            .deserialize(&plain)
            .map_err(|source| PersistError::Deserialize {
                key: key.clone(),
                source,
            })?;
        if !decoded.is_object() {
            return Err(PersistError::NotAnObject { key: key.clone() });
        }

        let restored = match &self.config.before_restore {
            Some(hook) => hook(decoded).map_err(|source| PersistError::Hook {
                key: key.clone(),
                source,
            })?,
            None => decoded,
        };
        match restored {
            Json::Object(map) => Ok(Some(map)),
            _ => Err(PersistError::NotAnObject { key: key.clone() }),
        }
    }

    /// Write `state`, logging any failure.
    pub fn persist(&self, state: &Json) {
        if let Err(e) = self.try_persist(state) {
            if self.config.debug {
                tracing::warn!(key = %self.config.key, error = %e, "Failed to persist state");
            } else {
                tracing::debug!(key = %self.config.key, error = %e, "Failed to persist state");
            }
        }
    }

    pub fn try_persist(&self, state: &Json) -> Result<(), PersistError> {
        let key = &self.config.key;
        let selected = self.select(state);
        let text = self
            .config
            .serializer
            .serialize(&selected)
            .map_err(|source| PersistError::Serialize {
                key: key.clone(),
                source,
            })?;
        let payload = match &self.config.encryption {
            Some(encryption) => encryption
                .encrypt(&text)
                .map_err(|source| PersistError::Encrypt {
                    key: key.clone(),
                    source,
                })?,
            None => text,
        };
        self.backend.set(key, &payload)?;
        tracing::trace!(key = %key, bytes = payload.len(), "Persisted state");
        Ok(())
    }

    /// Top-level keys named in `paths`, or the whole state.
    fn select(&self, state: &Json) -> Json {
        match (&self.config.paths, state) {
            (Some(paths), Json::Object(map)) => Json::Object(
                paths
                    .iter()
                    .filter_map(|path| map.get(path).map(|v| (path.clone(), v.clone())))
                    .collect(),
            ),
            _ => state.clone(),
        }
    }
}

/// Persistence attached to a live store: pipeline plus debounced writes.
pub(crate) struct Persistence {
    pipeline: Arc<PersistPipeline>,
    debouncer: Debouncer,
}

impl Persistence {
    pub(crate) fn new(config: PersistConfig, engine: &EngineConfig) -> Self {
        let backend = config.storage.resolve(engine);
        let delay = config.debounce.unwrap_or_else(|| engine.persist_debounce());
        Self {
            pipeline: Arc::new(PersistPipeline::new(config, backend)),
            debouncer: Debouncer::new(delay),
        }
    }

    pub(crate) fn restore(&self) -> Option<Map<String, Json>> {
        self.pipeline.restore()
    }

    /// Write the state once the debounce window passes quietly.
    pub(crate) fn schedule(&self, state: &ReactiveNode) {
        let pipeline = self.pipeline.clone();
        let state = state.clone();
        self.debouncer
            .schedule(move || pipeline.persist(&state.snapshot()));
    }

    /// Write now, dropping any pending write.
    pub(crate) fn flush(&self, state: &ReactiveNode) {
        self.debouncer.cancel();
        self.pipeline.persist(&state.snapshot());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Reverse;

    impl Encryption for Reverse {
        fn encrypt(&self, plain: &str) -> anyhow::Result<String> {
            Ok(plain.chars().rev().collect())
        }

        fn decrypt(&self, cipher: &str) -> anyhow::Result<String> {
            Ok(cipher.chars().rev().collect())
        }
    }

    struct Broken;

    impl Encryption for Broken {
        fn encrypt(&self, _: &str) -> anyhow::Result<String> {
            anyhow::bail!("no key")
        }

        fn decrypt(&self, _: &str) -> anyhow::Result<String> {
            anyhow::bail!("no key")
        }
    }

    fn pipeline(config: PersistConfig) -> (PersistPipeline, Arc<MemoryStorage>) {
        let storage = Arc::new(MemoryStorage::new());
        (PersistPipeline::new(config, storage.clone()), storage)
    }

    #[test]
    fn paths_filter_top_level_keys() {
        let (p, storage) = pipeline(PersistConfig::new("k").paths(["count"]));
        p.persist(&json!({"count": 1, "secret": "y"}));
        assert_eq!(storage.get("k").unwrap().as_deref(), Some("{\"count\":1}"));
        assert_eq!(p.restore().unwrap(), json!({"count": 1}).as_object().cloned().unwrap());
    }

    #[test]
    fn encrypted_roundtrip() {
        let (p, storage) = pipeline(PersistConfig::new("k").encryption(Reverse));
        let state = json!({"user": {"name": "Alice"}, "n": [1, 2]});
        p.persist(&state);
        let stored = storage.get("k").unwrap().unwrap();
        assert!(stored.starts_with('}'));
        assert_eq!(Json::Object(p.restore().unwrap()), state);
    }

    #[test]
    fn failures_mean_no_prior_state() {
        let (p, storage) = pipeline(PersistConfig::new("k"));
        storage.set("k", "not json").unwrap();
        assert!(matches!(p.try_restore(), Err(PersistError::Deserialize { .. })));
        assert_eq!(p.restore(), None);

        storage.set("k", "[1,2]").unwrap();
        assert!(matches!(p.try_restore(), Err(PersistError::NotAnObject { .. })));

        let (p, storage) = pipeline(PersistConfig::new("k").encryption(Broken));
        storage.set("k", "{}").unwrap();
        assert!(matches!(p.try_restore(), Err(PersistError::Decrypt { .. })));

        p.persist(&json!({"a": 1}));
        assert_eq!(storage.get("k").unwrap().as_deref(), Some("{}"));
    }

    #[test]
    fn restore_hooks_run_in_order() {
        let seen = Arc::new(parking_lot::Mutex::new(None));
        let sink = seen.clone();
        let (p, storage) = pipeline(
            PersistConfig::new("k")
                .before_restore(|mut state| {
                    state["migrated"] = json!(true);
                    Ok(state)
                })
                .after_restore(move |state| *sink.lock() = Some(state.clone())),
        );
        storage.set("k", "{\"count\":3}").unwrap();

        let restored = p.restore().unwrap();
        assert_eq!(Json::Object(restored), json!({"count": 3, "migrated": true}));
        assert_eq!(*seen.lock(), Some(json!({"count": 3, "migrated": true})));
    }

    #[test]
    fn missing_key_is_not_an_error() {
        let (p, _) = pipeline(PersistConfig::new("absent"));
        assert!(p.try_restore().unwrap().is_none());
    }
}
