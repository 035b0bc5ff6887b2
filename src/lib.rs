//! Reactive state container.
//!
//! A store wraps a plain nested state object, observes every write made
//! through it, keeps getters cached against precisely the keys they read,
//! routes actions through composable middleware, and persists state
//! through pluggable serialization and encryption.
//!
//! ```
//! use ministore::{Store, StoreDefinition, Value};
//! use serde_json::json;
//!
//! let store = Store::new(
//!     StoreDefinition::new(|| json!({"todos": []}))
//!         .getter("open", |s| Ok(Value::from(s.node("todos").map_or(0, |t| t.len()))))
//!         .action_fn("add", |state, args| {
//!             if let Some(todos) = state.node("todos") {
//!                 todos.push(args.first().cloned().unwrap_or_default());
//!             }
//!             Ok(Value::Null)
//!         }),
//! );
//!
//! store.dispatch_sync("add", ministore::args!["write docs"]).unwrap();
//! assert_eq!(store.getter("open"), Some(Value::from(1)));
//! ```

pub mod action;
pub mod bus;
pub mod config;
pub mod error;
pub mod getters;
pub mod logging;
pub mod modules;
pub mod persist;
pub mod reactive;
pub mod store;
pub mod testing;
pub mod value;

pub use action::{Action, ActionCall, ActionEvent, ActionPhase, AsyncAction, Middleware, MiddlewareContext, Next, Outcome};
pub use config::EngineConfig;
pub use error::StoreError;
pub use modules::{compose, GlobalOptions, SharedContext, StoreCollection};
pub use persist::{PersistConfig, StorageKind};
pub use reactive::{Item, Mutation, MutationKind, ReactiveEngine, ReactiveNode};
pub use store::{Plugin, PluginContext, Store, StoreDefinition, Subscription};
pub use value::{Key, Value};
