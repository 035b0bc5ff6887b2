//! Binding of actions to state and dispatch through middleware.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::StoreError;

use super::middleware::{Middleware, MiddlewareContext, Next, Terminal};
use super::{Action, ActionCall, ActionEvent, ActionPhase, Outcome};

type Notify = Arc<dyn Fn(&ActionEvent) + Send + Sync>;

/// Bound actions of one store.
pub struct ActionPipeline {
    actions: Arc<RwLock<BTreeMap<String, Action>>>,
    chain: Arc<[Arc<dyn Middleware>]>,
    context: Arc<MiddlewareContext>,
    terminal: Terminal,
    notify: Notify,
}

impl ActionPipeline {
    /// Bind `actions` to the context's state behind `middleware`
    /// (first element outermost). `notify` receives start and
    /// completion/failure events.
    pub fn bind(
        actions: BTreeMap<String, Action>,
        middleware: Vec<Arc<dyn Middleware>>,
        context: MiddlewareContext,
        notify: impl Fn(&ActionEvent) + Send + Sync + 'static,
    ) -> Self {
        let actions = Arc::new(RwLock::new(actions));
        let context = Arc::new(context);

        let terminal: Terminal = {
            let actions = actions.clone();
            let state = context.get_state().clone();
            Arc::new(move |call: ActionCall| {
                // Clone out so the lock is not held while the body runs.
                let action = actions.read().get(&call.name).cloned();
                match action {
                    Some(action) => action.call(&call.name, &state, &call.args),
                    None => Outcome::err(StoreError::UnknownAction { name: call.name }),
                }
            })
        };

        Self {
            actions,
            chain: middleware.into(),
            context,
            terminal,
            notify: Arc::new(notify),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.actions.read().contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.actions.read().keys().cloned().collect()
    }

    /// Swap an action body, returning the previous one.
    pub fn replace_action(&self, name: &str, action: Action) -> Option<Action> {
        self.actions.write().insert(name.to_string(), action)
    }

    pub fn remove_action(&self, name: &str) -> Option<Action> {
        self.actions.write().remove(name)
    }

    /// Invoke an action through the middleware chain.
    pub fn dispatch(&self, name: &str, args: Vec<crate::Value>) -> Outcome {
        if !self.contains(name) {
            tracing::warn!(action = %name, "Dispatch of unknown action");
            return Outcome::err(StoreError::UnknownAction {
                name: name.to_string(),
            });
        }

        let call = ActionCall::new(name, args);
        (self.notify)(&ActionEvent::new(call.clone(), ActionPhase::Started));
        tracing::trace!(action = %name, args = call.args.len(), "Action started");

        let notify = self.notify.clone();
        let next = Next::new(self.chain.clone(), self.context.clone(), self.terminal.clone());
        next.run(call.clone()).map(move |result| {
            let phase = match &result {
                Ok(value) => ActionPhase::Completed(value.clone()),
                Err(e) => {
                    tracing::debug!(action = %call.name, error = %e, "Action failed");
                    ActionPhase::Failed(e.to_string())
                }
            };
            notify(&ActionEvent::new(call, phase));
            result
        })
    }
}
