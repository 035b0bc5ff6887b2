//! Loading/error/data bookkeeping around an async operation.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures_core::future::BoxFuture;

use crate::reactive::{ReactiveEngine, ReactiveNode};
use crate::value::{RawObject, Value};

type Runner = Arc<dyn Fn(Value) -> BoxFuture<'static, anyhow::Result<Value>> + Send + Sync>;

/// An async operation whose status lives in a reactive object
/// `{ loading, error, data }`.
///
/// Attached to a store's state, every status transition is an ordinary
/// write on that state, so subscribers and getters see it.
#[derive(Clone)]
pub struct AsyncAction {
    status: ReactiveNode,
    run: Runner,
}

fn idle() -> RawObject {
    let status = RawObject::new();
    status.insert("loading", false);
    status.insert("error", Value::Null);
    status.insert("data", Value::Null);
    status
}

impl AsyncAction {
    /// A detached action with its own private status object.
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        let engine = ReactiveEngine::new(true, |_| {});
        Self::with_status(engine.wrap_object(idle(), None), f)
    }

    /// Store the status object under `key` of `state` and bind to it.
    pub fn attach<F, Fut>(state: &ReactiveNode, key: &str, f: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        let raw = idle();
        state.set(key, raw.clone());
        let status = state
            .node(key)
            .unwrap_or_else(|| state.engine().wrap_object(raw, Some(key.to_string())));
        Self::with_status(status, f)
    }

    fn with_status<F, Fut>(status: ReactiveNode, f: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        let run: Runner = Arc::new(move |payload: Value| {
            Box::pin(f(payload)) as BoxFuture<'static, anyhow::Result<Value>>
        });
        Self { status, run }
    }

    /// Run the operation. `loading` is set before the first await and
    /// cleared once it settles; the previous error is cleared up front.
    pub async fn execute(&self, payload: impl Into<Value>) -> anyhow::Result<Value> {
        self.status.set("loading", true);
        self.status.set("error", Value::Null);

        let result = (self.run)(payload.into()).await;
        match &result {
            Ok(data) => self.status.set("data", data.clone()),
            Err(e) => self.status.set("error", e.to_string()),
        }
        self.status.set("loading", false);
        result
    }

    pub fn reset(&self) {
        self.status.set("loading", false);
        self.status.set("error", Value::Null);
        self.status.set("data", Value::Null);
    }

    pub fn is_loading(&self) -> bool {
        self.status.get_bool("loading").unwrap_or(false)
    }

    /// Message of the last failure, cleared by the next execution.
    pub fn error(&self) -> Option<String> {
        self.status.get_str("error")
    }

    pub fn data(&self) -> Option<Value> {
        self.status.value("data").filter(|v| !v.is_null())
    }

    pub fn status(&self) -> &ReactiveNode {
        &self.status
    }
}

impl fmt::Debug for AsyncAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncAction")
            .field("status", &self.status)
            .finish()
    }
}
