mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{counter, VersionedSerializer, XorCipher};
use ministore::persist::{FileStorage, MemoryStorage, StorageBackend};
use ministore::{EngineConfig, PersistConfig, SharedContext, StorageKind, Store, StoreDefinition, Value};
use parking_lot::Mutex;
use serde_json::json;

fn stored(storage: &MemoryStorage, key: &str) -> Option<serde_json::Value> {
    storage
        .get(key)
        .unwrap()
        .map(|raw| serde_json::from_str(&raw).unwrap())
}

#[tokio::test(start_paused = true)]
async fn debounced_write_keeps_only_selected_paths() {
    let storage = Arc::new(MemoryStorage::new());
    let store = Store::new(
        StoreDefinition::new(|| json!({"count": 0, "draft": "unsaved"}))
            .action_fn("increment", |state, _| {
                common::increment_count(state);
                Ok(Value::Null)
            })
            .persist(
                PersistConfig::new("counter")
                    .backend(storage.clone())
                    .paths(["count"]),
            ),
    );

    for _ in 0..3 {
        store.dispatch_sync("increment", vec![]).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    // Each write restarted the window.
    assert!(storage.is_empty());

    tokio::time::sleep(Duration::from_millis(350)).await;
    assert_eq!(stored(&storage, "counter"), Some(json!({"count": 3})));
    assert_eq!(storage.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn per_store_debounce_overrides_engine_default() {
    let storage = Arc::new(MemoryStorage::new());
    let store = Store::new(counter().persist(
        PersistConfig::new("fast")
            .backend(storage.clone())
            .debounce(Duration::from_millis(20)),
    ));

    store.set("count", 9);
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(stored(&storage, "fast"), Some(json!({"count": 9})));
}

#[test]
fn writes_immediately_without_a_runtime() {
    let storage = Arc::new(MemoryStorage::new());
    let store = Store::new(counter().persist(PersistConfig::new("sync").backend(storage.clone())));

    store.dispatch_sync("increment", vec![]).unwrap();
    assert_eq!(stored(&storage, "sync"), Some(json!({"count": 6})));
}

#[test]
fn restore_merges_over_defaults() {
    let storage = Arc::new(MemoryStorage::new());
    storage.set("prefs", r#"{"count": 42}"#).unwrap();

    let store = Store::new(
        StoreDefinition::new(|| json!({"count": 0, "theme": "light"}))
            .getter("doubleCount", |s| {
                Ok(Value::from(s.get_i64("count").unwrap_or(0) * 2))
            })
            .persist(PersistConfig::new("prefs").backend(storage.clone())),
    );

    assert_eq!(store.snapshot(), json!({"count": 42, "theme": "light"}));
    assert_eq!(store.getter("doubleCount"), Some(Value::from(84)));
}

#[test]
fn unreadable_payload_falls_back_to_defaults() {
    let storage = Arc::new(MemoryStorage::new());
    storage.set("broken", "{not json").unwrap();
    storage.set("list", "[1, 2, 3]").unwrap();

    let broken = Store::new(counter().persist(PersistConfig::new("broken").backend(storage.clone()).debug(true)));
    let list = Store::new(counter().persist(PersistConfig::new("list").backend(storage.clone())));

    assert_eq!(broken.value("count"), Some(Value::from(5)));
    assert_eq!(list.value("count"), Some(Value::from(5)));
}

#[test]
fn custom_serializer_and_encryption_round_trip() {
    let storage = Arc::new(MemoryStorage::new());
    let config = || {
        PersistConfig::new("vault")
            .backend(storage.clone())
            .serializer(VersionedSerializer)
            .encryption(XorCipher(0x5a))
    };

    let first = Store::new(counter().persist(config()));
    first.set("count", 11);
    first.flush_persistence();

    let raw = storage.get("vault").unwrap().unwrap();
    assert!(!raw.contains("count"));
    assert!(raw.chars().all(|c| c.is_ascii_hexdigit()));

    let second = Store::new(counter().persist(config()));
    assert_eq!(second.value("count"), Some(Value::from(11)));
    assert_eq!(second.getter("doubleCount"), Some(Value::from(22)));
}

#[test]
fn wrong_key_leaves_defaults_in_place() {
    let storage = Arc::new(MemoryStorage::new());
    let writer = Store::new(counter().persist(
        PersistConfig::new("vault")
            .backend(storage.clone())
            .encryption(XorCipher(1)),
    ));
    writer.set("count", 100);

    let reader = Store::new(counter().persist(
        PersistConfig::new("vault")
            .backend(storage.clone())
            .encryption(XorCipher(2)),
    ));
    assert_eq!(reader.value("count"), Some(Value::from(5)));
}

#[test]
fn restore_hooks_migrate_and_observe() {
    let storage = Arc::new(MemoryStorage::new());
    storage.set("legacy", r#"{"counter": 7}"#).unwrap();
    let observed = Arc::new(Mutex::new(None));
    let sink = observed.clone();

    let store = Store::new(
        counter().persist(
            PersistConfig::new("legacy")
                .backend(storage.clone())
                .before_restore(|mut payload| {
                    if let Some(map) = payload.as_object_mut() {
                        if let Some(old) = map.remove("counter") {
                            map.insert("count".into(), old);
                        }
                    }
                    Ok(payload)
                })
                .after_restore(move |state| {
                    *sink.lock() = Some(state.clone());
                }),
        ),
    );

    assert_eq!(store.value("count"), Some(Value::from(7)));
    assert_eq!(*observed.lock(), Some(json!({"count": 7})));
}

#[test]
fn failing_before_restore_skips_the_payload() {
    let storage = Arc::new(MemoryStorage::new());
    storage.set("strict", r#"{"count": 1}"#).unwrap();
    let after_calls = Arc::new(Mutex::new(0));
    let sink = after_calls.clone();

    let store = Store::new(
        counter().persist(
            PersistConfig::new("strict")
                .backend(storage.clone())
                .before_restore(|_| anyhow::bail!("schema too old"))
                .after_restore(move |_| *sink.lock() += 1),
        ),
    );

    assert_eq!(store.value("count"), Some(Value::from(5)));
    assert_eq!(*after_calls.lock(), 0);
}

#[test]
fn local_storage_lands_in_configured_directory() {
    let dir = tempfile::tempdir().unwrap();
    let shared = SharedContext::new(EngineConfig {
        storage_dir: Some(dir.path().to_path_buf()),
        ..EngineConfig::default()
    });

    let store = Store::with_context(
        counter().persist(PersistConfig::new("app/settings").storage(StorageKind::Local)),
        &shared,
        "settings",
    );
    store.set("count", 12);
    store.flush_persistence();

    let files = FileStorage::new(dir.path());
    let path = files.path_for("app/settings");
    assert!(path.starts_with(dir.path()));
    let on_disk: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(on_disk, json!({"count": 12}));

    // A second context over the same directory restores it.
    let other = SharedContext::new(EngineConfig {
        storage_dir: Some(dir.path().to_path_buf()),
        ..EngineConfig::default()
    });
    let restored = Store::with_context(
        counter().persist(PersistConfig::new("app/settings")),
        &other,
        "settings",
    );
    assert_eq!(restored.getter("doubleCount"), Some(Value::from(24)));
}

#[test]
fn session_storage_is_shared_across_stores() {
    let key = format!("session-{}", uuid::Uuid::new_v4());
    let first = Store::new(counter().persist(PersistConfig::new(key.clone()).storage(StorageKind::Session)));
    first.set("count", 3);

    let second = Store::new(counter().persist(PersistConfig::new(key).storage(StorageKind::Session)));
    assert_eq!(second.value("count"), Some(Value::from(3)));
}
