//! Batched selector watchers.
//!
//! Mutations only mark the queue. A flush, run on the next scheduler tick
//! or explicitly, evaluates each selector once no matter how many writes
//! happened since the previous flush.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::value::Value;

use super::Store;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct WatcherId(u64);

pub(crate) type Selector = Arc<dyn Fn(&Store) -> Value + Send + Sync>;
pub(crate) type Callback = Arc<dyn Fn(&Value, &Value) -> anyhow::Result<()> + Send + Sync>;

struct Watcher {
    id: WatcherId,
    selector: Selector,
    callback: Callback,
    last: Value,
}

pub(crate) struct SelectorQueue {
    watchers: Mutex<Vec<Watcher>>,
    next_id: AtomicU64,
    pending: AtomicBool,
}

impl SelectorQueue {
    pub(crate) fn new() -> Self {
        Self {
            watchers: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            pending: AtomicBool::new(false),
        }
    }

    pub(crate) fn watch(&self, initial: Value, selector: Selector, callback: Callback) -> WatcherId {
        let id = WatcherId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.watchers.lock().push(Watcher {
            id,
            selector,
            callback,
            last: initial,
        });
        id
    }

    pub(crate) fn unwatch(&self, id: WatcherId) -> bool {
        let mut watchers = self.watchers.lock();
        let before = watchers.len();
        watchers.retain(|w| w.id != id);
        watchers.len() != before
    }

    pub(crate) fn has_watchers(&self) -> bool {
        !self.watchers.lock().is_empty()
    }

    /// Mark the queue dirty. Returns true for the first mark since the
    /// last flush, which is when a flush needs scheduling.
    pub(crate) fn mark(&self) -> bool {
        !self.pending.swap(true, Ordering::AcqRel)
    }

    /// Evaluate every selector once and notify those whose selection is
    /// no longer strictly identical. Returns the number of callbacks run.
    pub(crate) fn flush(&self, store: &Store) -> usize {
        if !self.pending.swap(false, Ordering::AcqRel) {
            return 0;
        }

        let snapshot: Vec<(WatcherId, Selector, Callback)> = self
            .watchers
            .lock()
            .iter()
            .map(|w| (w.id, w.selector.clone(), w.callback.clone()))
            .collect();

        let mut notified = 0;
        for (id, selector, callback) in snapshot {
            let next = selector(store);
            let previous = {
                let mut watchers = self.watchers.lock();
                let Some(watcher) = watchers.iter_mut().find(|w| w.id == id) else {
                    continue;
                };
                if watcher.last.same(&next) {
                    continue;
                }
                std::mem::replace(&mut watcher.last, next.clone())
            };

            notified += 1;
            if let Err(e) = callback(&next, &previous) {
                tracing::warn!(store = %store.label(), error = %e, "Selector callback failed");
            }
        }
        notified
    }
}
