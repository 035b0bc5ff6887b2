//! Notification bus.
//!
//! A small publish/subscribe registry keyed by opaque [`Topic`] handles.
//! Handlers run in subscription order; a failing or panicking handler is
//! logged and never stops its siblings or the emitter.

use std::collections::HashMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use uuid::Uuid;

/// Unforgeable topic handle. Two topics are equal only if one was cloned
/// from the other.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Topic(Uuid);

impl Topic {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for Topic {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Topic({})", self.0)
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifies one handler registration, for targeted removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

pub type Handler<T> = Arc<dyn Fn(&T) -> anyhow::Result<()> + Send + Sync>;

struct Listener<T> {
    id: HandlerId,
    handler: Handler<T>,
}

impl<T> Clone for Listener<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            handler: self.handler.clone(),
        }
    }
}

pub struct Bus<T> {
    listeners: Mutex<HashMap<Topic, Vec<Listener<T>>>>,
    next_id: AtomicU64,
}

impl<T> Default for Bus<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Bus<T> {
    pub fn new() -> Self {
        Self {
            listeners: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a handler for `topic`.
    pub fn on(
        &self,
        topic: &Topic,
        handler: impl Fn(&T) -> anyhow::Result<()> + Send + Sync + 'static,
    ) -> HandlerId {
        let id = HandlerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners
            .lock()
            .entry(*topic)
            .or_default()
            .push(Listener {
                id,
                handler: Arc::new(handler),
            });
        id
    }

    /// Deliver `payload` to every handler of `topic`.
    ///
    /// The handler list is snapshotted first, so handlers may subscribe or
    /// unsubscribe while the emission is running.
    pub fn emit(&self, topic: &Topic, payload: &T) {
        let snapshot = match self.listeners.lock().get(topic) {
            Some(listeners) => listeners.clone(),
            None => return,
        };

        for listener in snapshot {
            match catch_unwind(AssertUnwindSafe(|| (listener.handler)(payload))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::warn!(
                        topic = %topic,
                        handler = listener.id.0,
                        error = %e,
                        "Notification handler failed"
                    );
                }
                Err(_) => {
                    tracing::error!(
                        topic = %topic,
                        handler = listener.id.0,
                        "Notification handler panicked"
                    );
                }
            }
        }
    }

    /// Remove one registration, or every handler of `topic` when `handler`
    /// is `None`. Returns how many handlers were removed.
    pub fn off(&self, topic: &Topic, handler: Option<HandlerId>) -> usize {
        let mut listeners = self.listeners.lock();
        let Some(list) = listeners.get_mut(topic) else {
            return 0;
        };
        let before = list.len();
        match handler {
            Some(id) => list.retain(|l| l.id != id),
            None => list.clear(),
        }
        let removed = before - list.len();
        if list.is_empty() {
            listeners.remove(topic);
        }
        removed
    }

    pub fn handler_count(&self, topic: &Topic) -> usize {
        self.listeners.lock().get(topic).map_or(0, Vec::len)
    }
}
