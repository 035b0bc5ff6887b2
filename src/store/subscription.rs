use std::sync::Weak;

use crate::bus::{Bus, HandlerId, Topic};

use super::batch::WatcherId;
use super::{StoreEvent, StoreInner};

/// Handle to a registered subscriber or selector watcher.
///
/// Dropping the handle leaves the registration in place; call
/// [`Subscription::unsubscribe`] to remove it.
#[derive(Debug)]
pub struct Subscription {
    target: Target,
}

#[derive(Debug)]
enum Target {
    Handler {
        bus: Weak<Bus<StoreEvent>>,
        topic: Topic,
        id: HandlerId,
    },
    Watcher {
        store: Weak<StoreInner>,
        id: WatcherId,
    },
}

impl Subscription {
    pub(crate) fn handler(bus: Weak<Bus<StoreEvent>>, topic: Topic, id: HandlerId) -> Self {
        Self {
            target: Target::Handler { bus, topic, id },
        }
    }

    pub(crate) fn watcher(store: Weak<StoreInner>, id: WatcherId) -> Self {
        Self {
            target: Target::Watcher { store, id },
        }
    }

    /// Remove the registration. Returns whether it was still present.
    pub fn unsubscribe(self) -> bool {
        match self.target {
            Target::Handler { bus, topic, id } => bus
                .upgrade()
                .is_some_and(|bus| bus.off(&topic, Some(id)) > 0),
            Target::Watcher { store, id } => store
                .upgrade()
                .is_some_and(|store| store.batch.unwatch(id)),
        }
    }
}
