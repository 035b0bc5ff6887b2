//! Helpers for testing code built on stores.

use crate::action::Action;
use crate::store::{Store, StoreDefinition};

/// A store plus reset, snapshot and action mocking.
///
/// ```
/// use ministore::testing::TestStore;
/// use ministore::{Action, StoreDefinition, Value};
/// use serde_json::json;
///
/// let test = TestStore::new(
///     StoreDefinition::new(|| json!({"count": 0}))
///         .action_fn("fetch", |_, _| anyhow::bail!("network")),
/// );
/// let guard = test.mock_action("fetch", Action::new(|_, _| Ok(Value::from(42))));
/// assert_eq!(test.store().dispatch_sync("fetch", vec![]).unwrap(), Value::from(42));
/// guard.restore();
/// assert!(test.store().dispatch_sync("fetch", vec![]).is_err());
/// ```
pub struct TestStore {
    store: Store,
}

impl TestStore {
    pub fn new(definition: StoreDefinition) -> Self {
        Self {
            store: Store::new(definition),
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Reassign every key from a fresh state factory output.
    pub fn reset(&self) {
        self.store.reset();
    }

    /// Replace an action until the returned guard is restored or dropped.
    pub fn mock_action(&self, name: &str, action: Action) -> MockGuard {
        let original = self.store.replace_action(name, action);
        if original.is_none() {
            tracing::warn!(store = %self.store.label(), action = %name, "Mocked an action that does not exist");
        }
        MockGuard {
            store: self.store.clone(),
            name: name.to_string(),
            original: Some(original),
        }
    }

    /// Deep copy of the current state.
    pub fn snapshot(&self) -> serde_json::Value {
        self.store.snapshot()
    }
}

/// Puts the original action back when restored or dropped.
#[must_use = "dropping the guard restores the original action immediately"]
pub struct MockGuard {
    store: Store,
    name: String,
    // Outer `None` once restored; inner `None` if there was no original.
    original: Option<Option<Action>>,
}

impl MockGuard {
    pub fn restore(mut self) {
        self.put_back();
    }

    fn put_back(&mut self) {
        match self.original.take() {
            Some(Some(action)) => {
                self.store.replace_action(&self.name, action);
            }
            Some(None) => {
                self.store.remove_action(&self.name);
            }
            None => {}
        }
    }
}

impl Drop for MockGuard {
    fn drop(&mut self) {
        self.put_back();
    }
}
