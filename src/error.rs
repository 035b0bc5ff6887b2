//! Error types surfaced to action callers.

use thiserror::Error;

/// Errors returned from dispatching an action.
///
/// Getter, plugin, subscriber and persistence failures never reach callers;
/// they are logged where they happen.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Action '{name}' is not defined")]
    UnknownAction { name: String },

    #[error("Action '{action}' failed: {source}")]
    ActionFailed {
        action: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Middleware rejected action '{action}': {source}")]
    Middleware {
        action: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Action '{action}' returned a deferred result; await it instead")]
    Deferred { action: String },
}

impl StoreError {
    /// Name of the action the error belongs to.
    pub fn action(&self) -> &str {
        match self {
            StoreError::UnknownAction { name } => name,
            StoreError::ActionFailed { action, .. }
            | StoreError::Middleware { action, .. }
            | StoreError::Deferred { action } => action,
        }
    }
}
