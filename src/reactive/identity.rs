//! Raw container → wrapper identity table.
//!
//! Entries hold weak references so a subtree removed from the state can be
//! freed together with its wrappers. A live node keeps its raw container
//! alive, so a live entry's address can never be reused by another
//! container.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use super::node::NodeInner;

/// Initial table size before dead entries are pruned.
const PRUNE_THRESHOLD: usize = 64;

pub(crate) struct IdentityTable {
    by_raw: HashMap<usize, Weak<NodeInner>>,
    prune_at: usize,
}

impl IdentityTable {
    pub(crate) fn new() -> Self {
        Self {
            by_raw: HashMap::new(),
            prune_at: PRUNE_THRESHOLD,
        }
    }

    /// Live wrapper registered for the raw container at `addr`.
    pub(crate) fn lookup(&self, addr: usize) -> Option<Arc<NodeInner>> {
        self.by_raw.get(&addr).and_then(Weak::upgrade)
    }

    pub(crate) fn register(&mut self, addr: usize, node: &Arc<NodeInner>) {
        self.by_raw.insert(addr, Arc::downgrade(node));
        if self.by_raw.len() >= self.prune_at {
            self.by_raw.retain(|_, weak| weak.strong_count() > 0);
            self.prune_at = (self.by_raw.len() * 2).max(PRUNE_THRESHOLD);
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.by_raw.len()
    }
}
