//! Action pipeline.
//!
//! Actions are named mutators bound to the reactive state. Every dispatch
//! flows through the middleware chain before reaching the action body:
//!
//! ```text
//! dispatch ──→ [Started] ──→ M1 ──→ M2 ──→ action ──→ M2 ──→ M1 ──→ [Completed|Failed]
//! ```
//!
//! Bodies and middleware may settle synchronously or return a deferred
//! result; [`Outcome::map`] keeps after-hooks in the same order either way.

mod async_action;
mod middleware;
mod pipeline;

use std::fmt;
use std::future::{Future, IntoFuture};
use std::sync::Arc;
use std::time::SystemTime;

use futures_core::future::BoxFuture;

use crate::error::StoreError;
use crate::reactive::ReactiveNode;
use crate::value::Value;

pub use async_action::AsyncAction;
pub use middleware::{compose, Middleware, MiddlewareContext, Next};
pub use pipeline::ActionPipeline;

pub type ActionResult = Result<Value, StoreError>;

/// A pending action invocation, threaded through the middleware chain.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionCall {
    pub name: String,
    pub args: Vec<Value>,
}

impl ActionCall {
    pub fn new(name: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            name: name.into(),
            args,
        }
    }
}

/// Result of an action or middleware stage: settled now, or later.
pub enum Outcome {
    Ready(ActionResult),
    Deferred(BoxFuture<'static, ActionResult>),
}

impl Outcome {
    pub fn ok(value: impl Into<Value>) -> Self {
        Outcome::Ready(Ok(value.into()))
    }

    pub fn err(error: StoreError) -> Self {
        Outcome::Ready(Err(error))
    }

    pub fn deferred<F>(future: F) -> Self
    where
        F: Future<Output = ActionResult> + Send + 'static,
    {
        Outcome::Deferred(Box::pin(future))
    }

    pub fn is_deferred(&self) -> bool {
        matches!(self, Outcome::Deferred(_))
    }

    /// Apply `f` once the result has settled: immediately for ready
    /// outcomes, after the future completes for deferred ones.
    pub fn map<F>(self, f: F) -> Self
    where
        F: FnOnce(ActionResult) -> ActionResult + Send + 'static,
    {
        match self {
            Outcome::Ready(result) => Outcome::Ready(f(result)),
            Outcome::Deferred(future) => Outcome::deferred(async move { f(future.await) }),
        }
    }

    /// The settled result, or `None` for a deferred outcome. Dropping a
    /// deferred outcome drops the remainder of the action.
    pub fn into_ready(self) -> Option<ActionResult> {
        match self {
            Outcome::Ready(result) => Some(result),
            Outcome::Deferred(_) => None,
        }
    }
}

impl IntoFuture for Outcome {
    type Output = ActionResult;
    type IntoFuture = BoxFuture<'static, ActionResult>;

    fn into_future(self) -> Self::IntoFuture {
        match self {
            Outcome::Ready(result) => Box::pin(std::future::ready(result)),
            Outcome::Deferred(future) => future,
        }
    }
}

impl fmt::Debug for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Ready(result) => f.debug_tuple("Ready").field(result).finish(),
            Outcome::Deferred(_) => f.write_str("Deferred(..)"),
        }
    }
}

type SyncBody = Arc<dyn Fn(&ReactiveNode, &[Value]) -> anyhow::Result<Value> + Send + Sync>;
type DeferredBody =
    Arc<dyn Fn(&ReactiveNode, &[Value]) -> BoxFuture<'static, anyhow::Result<Value>> + Send + Sync>;

#[derive(Clone)]
enum Body {
    Sync(SyncBody),
    Deferred(DeferredBody),
}

/// A user-declared action body. The body receives the reactive state, so
/// writes inside it notify exactly like external writes.
#[derive(Clone)]
pub struct Action {
    body: Body,
}

impl Action {
    /// A synchronous action.
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&ReactiveNode, &[Value]) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        Self {
            body: Body::Sync(Arc::new(f)),
        }
    }

    /// An asynchronous action. The closure runs synchronously up to the
    /// point where it returns its future; clone the state into the future
    /// to keep mutating after an await.
    pub fn deferred<F, Fut>(f: F) -> Self
    where
        F: Fn(&ReactiveNode, &[Value]) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        Self {
            body: Body::Deferred(Arc::new(move |state: &ReactiveNode, args: &[Value]| {
                Box::pin(f(state, args)) as BoxFuture<'static, anyhow::Result<Value>>
            })),
        }
    }

    /// Run the body, attributing failures to `name`.
    pub fn call(&self, name: &str, state: &ReactiveNode, args: &[Value]) -> Outcome {
        let fail = {
            let name = name.to_string();
            move |source: anyhow::Error| StoreError::ActionFailed {
                action: name,
                source,
            }
        };
        match &self.body {
            Body::Sync(body) => Outcome::Ready(body(state, args).map_err(fail)),
            Body::Deferred(body) => {
                let future = body(state, args);
                Outcome::deferred(async move { future.await.map_err(fail) })
            }
        }
    }
}

impl fmt::Debug for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.body {
            Body::Sync(_) => f.write_str("Action::Sync"),
            Body::Deferred(_) => f.write_str("Action::Deferred"),
        }
    }
}

/// Lifecycle stage reported to action subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum ActionPhase {
    Started,
    Completed(Value),
    Failed(String),
}

/// Action notification delivered to subscribers and tooling.
#[derive(Debug, Clone)]
pub struct ActionEvent {
    pub call: ActionCall,
    pub phase: ActionPhase,
    pub timestamp: SystemTime,
}

impl ActionEvent {
    pub fn new(call: ActionCall, phase: ActionPhase) -> Self {
        Self {
            call,
            phase,
            timestamp: SystemTime::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::ReactiveEngine;
    use serde_json::json;

    #[test]
    fn map_runs_immediately_for_ready() {
        let outcome = Outcome::ok(1).map(|r| r.map(|v| Value::from(v.as_i64().unwrap() + 1)));
        assert_eq!(outcome.into_ready().unwrap().unwrap(), Value::from(2));
    }

    #[tokio::test]
    async fn map_runs_after_deferred_settles() {
        let outcome = Outcome::deferred(async { Ok(Value::from("x")) })
            .map(|r| r.map(|v| Value::from(format!("{}!", v.as_str().unwrap()))));
        assert!(outcome.is_deferred());
        assert_eq!(outcome.await.unwrap(), Value::from("x!"));
    }

    #[test]
    fn sync_action_failure_is_attributed() {
        let state = ReactiveEngine::new(true, |_| {}).wrap(json!({})).unwrap();
        let action = Action::new(|_, _| anyhow::bail!("nope"));
        let err = action.call("explode", &state, &[]).into_ready().unwrap().unwrap_err();
        assert_eq!(err.action(), "explode");
        assert!(err.to_string().contains("nope"));
    }
}
