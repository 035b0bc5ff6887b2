use crate::modules::SharedContext;

use super::{Store, StoreDefinition};

/// What a plugin receives at store creation.
pub struct PluginContext<'a> {
    pub store: &'a Store,
    pub definition: &'a StoreDefinition,
    pub shared: &'a SharedContext,
}

/// Extension hook installed once per store, after the store is fully
/// built and registered.
///
/// Plugins typically subscribe to the store or attach properties with
/// [`Store::set_extension`]. An error is logged and does not affect the
/// store or the remaining plugins.
///
/// Implemented for closures taking `&PluginContext`.
pub trait Plugin: Send + Sync {
    fn install(&self, ctx: &PluginContext<'_>) -> anyhow::Result<()>;

    /// Name used in log lines.
    fn name(&self) -> &str {
        "anonymous"
    }
}

impl<F> Plugin for F
where
    F: Fn(&PluginContext<'_>) -> anyhow::Result<()> + Send + Sync,
{
    fn install(&self, ctx: &PluginContext<'_>) -> anyhow::Result<()> {
        self(ctx)
    }
}
