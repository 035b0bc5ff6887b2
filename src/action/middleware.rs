//! Middleware chain.

use std::sync::{Arc, Weak};

use crate::reactive::ReactiveNode;
use crate::store::{Store, StoreDefinition, StoreInner};

use super::{ActionCall, Outcome};

pub(crate) type Terminal = Arc<dyn Fn(ActionCall) -> Outcome + Send + Sync>;

/// Interceptor around action execution.
///
/// A stage may rewrite the call before forwarding it, transform the result
/// of `next` (use [`Outcome::map`] so the after-logic also works for
/// deferred results), or skip `next` entirely, in which case its own
/// outcome becomes the action's result.
///
/// Implemented for closures of the same shape.
pub trait Middleware: Send + Sync {
    fn handle(&self, ctx: &MiddlewareContext, call: ActionCall, next: Next) -> Outcome;
}

impl<F> Middleware for F
where
    F: Fn(&MiddlewareContext, ActionCall, Next) -> Outcome + Send + Sync,
{
    fn handle(&self, ctx: &MiddlewareContext, call: ActionCall, next: Next) -> Outcome {
        self(ctx, call, next)
    }
}

/// What a middleware stage can see of its store.
pub struct MiddlewareContext {
    store: Weak<StoreInner>,
    state: ReactiveNode,
    definition: Arc<StoreDefinition>,
}

impl MiddlewareContext {
    pub(crate) fn new(
        store: Weak<StoreInner>,
        state: ReactiveNode,
        definition: Arc<StoreDefinition>,
    ) -> Self {
        Self {
            store,
            state,
            definition,
        }
    }

    /// The owning store, while it is alive.
    pub fn store(&self) -> Option<Store> {
        self.store.upgrade().map(Store::from_inner)
    }

    /// Current reactive state.
    pub fn get_state(&self) -> &ReactiveNode {
        &self.state
    }

    pub fn definition(&self) -> &StoreDefinition {
        &self.definition
    }
}

/// Continuation into the rest of the chain.
///
/// Owned and cheap to clone, so a stage can move it into a future.
#[derive(Clone)]
pub struct Next {
    chain: Arc<[Arc<dyn Middleware>]>,
    index: usize,
    context: Arc<MiddlewareContext>,
    terminal: Terminal,
}

impl Next {
    pub(crate) fn new(
        chain: Arc<[Arc<dyn Middleware>]>,
        context: Arc<MiddlewareContext>,
        terminal: Terminal,
    ) -> Self {
        Self {
            chain,
            index: 0,
            context,
            terminal,
        }
    }

    /// Forward `call` to the next stage, or to the action body when the
    /// chain is exhausted.
    pub fn run(self, call: ActionCall) -> Outcome {
        match self.chain.get(self.index).cloned() {
            Some(stage) => {
                let context = self.context.clone();
                let next = Next {
                    index: self.index + 1,
                    ..self
                };
                stage.handle(&context, call, next)
            }
            None => (self.terminal)(call),
        }
    }
}

struct Composed {
    stages: Arc<[Arc<dyn Middleware>]>,
}

impl Middleware for Composed {
    fn handle(&self, _ctx: &MiddlewareContext, call: ActionCall, next: Next) -> Outcome {
        let context = next.context.clone();
        let outer: Terminal = Arc::new(move |call| next.clone().run(call));
        Next::new(self.stages.clone(), context, outer).run(call)
    }
}

/// Fold several middleware into one stage. The first element is the
/// outermost wrapper.
pub fn compose(stages: Vec<Arc<dyn Middleware>>) -> Arc<dyn Middleware> {
    Arc::new(Composed {
        stages: stages.into(),
    })
}
