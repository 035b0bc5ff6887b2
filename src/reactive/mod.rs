//! Reactive node engine.
//!
//! Wraps raw containers so that reads, writes and deletes go through
//! [`ReactiveNode`] methods. Writes report a [`Mutation`] to the engine's
//! change hook synchronously, before the write call returns.
//!
//! ```text
//! raw container ──wrap──→ ReactiveNode ──set/delete──→ on_change(Mutation)
//!       ↑                     │
//!       └──── identity ───────┘   (same raw ⇒ same node)
//! ```

mod identity;
mod node;

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::value::{Key, RawObject, Value};

use identity::IdentityTable;
pub use node::{Item, ReactiveNode};
use node::{Container, NodeInner};

/// Kind of committed write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationKind {
    Set,
    Delete,
}

/// Record of a single committed write, built at write time and not retained.
#[derive(Debug, Clone)]
pub struct Mutation {
    pub kind: MutationKind,
    /// Key written on the node that changed.
    pub key: Key,
    /// Top-level state key the changed node was last reached through.
    /// Equals `key` for writes on the root node.
    pub top_key: String,
    /// Every top-level key the changed node has been reached through,
    /// starting with `top_key`. More than one after a subtree is moved or
    /// shared between keys.
    pub top_keys: Vec<String>,
    pub old_value: Option<Value>,
    pub new_value: Option<Value>,
}

type ChangeHook = Arc<dyn Fn(&Mutation) + Send + Sync>;

/// Wrapping context shared by every node of one state tree.
#[derive(Clone)]
pub struct ReactiveEngine {
    shared: Arc<EngineShared>,
}

struct EngineShared {
    deep: bool,
    on_change: ChangeHook,
    identities: Mutex<IdentityTable>,
}

impl ReactiveEngine {
    /// Create an engine. With `deep = false` nested containers are handed
    /// out raw, so only writes on wrapped nodes are observed.
    pub fn new(deep: bool, on_change: impl Fn(&Mutation) + Send + Sync + 'static) -> Self {
        Self {
            shared: Arc::new(EngineShared {
                deep,
                on_change: Arc::new(on_change),
                identities: Mutex::new(IdentityTable::new()),
            }),
        }
    }

    pub fn is_deep(&self) -> bool {
        self.shared.deep
    }

    /// Wrap a container. Returns `None` for primitive values.
    ///
    /// Wrapping the same raw container twice yields the same node, and
    /// wrapping a node (converted into a `Value`) yields that node again.
    pub fn wrap(&self, value: impl Into<Value>) -> Option<ReactiveNode> {
        self.wrap_with_origin(value.into(), Vec::new())
    }

    pub(crate) fn wrap_with_origin(
        &self,
        value: Value,
        origins: Vec<String>,
    ) -> Option<ReactiveNode> {
        let (raw, addr) = match value {
            Value::Object(obj) => {
                let addr = obj.addr();
                (Container::Object(obj), addr)
            }
            Value::Array(arr) => {
                let addr = arr.addr();
                (Container::Array(arr), addr)
            }
            _ => return None,
        };
        Some(self.wrap_container(raw, addr, origins))
    }

    pub(crate) fn wrap_object(&self, obj: RawObject, origin: Option<String>) -> ReactiveNode {
        let addr = obj.addr();
        self.wrap_container(Container::Object(obj), addr, origin.into_iter().collect())
    }

    fn wrap_container(&self, raw: Container, addr: usize, origins: Vec<String>) -> ReactiveNode {
        let mut table = self.shared.identities.lock();
        if let Some(existing) = table.lookup(addr) {
            // A subtree moved or aliased under another top-level key reports
            // writes under every key it has been reached through.
            if !origins.is_empty() {
                let mut current = existing.origins.write();
                current.retain(|key| !origins.contains(key));
                for key in origins.into_iter().rev() {
                    current.insert(0, key);
                }
            }
            return ReactiveNode::from_inner(existing);
        }
        let inner = Arc::new(NodeInner {
            raw,
            origins: RwLock::new(origins),
            engine: self.clone(),
        });
        table.register(addr, &inner);
        ReactiveNode::from_inner(inner)
    }

    pub(crate) fn notify(&self, mutation: &Mutation) {
        (self.shared.on_change)(mutation);
    }

    #[cfg(test)]
    fn tracked_wrappers(&self) -> usize {
        self.shared.identities.lock().len()
    }
}
