use std::fmt;
use std::sync::Arc;
use std::sync::Mutex;

use actlet::prelude::*;
use indexmap::IndexMap;
use serde::Serialize;

/// Lifecycle and data-change notifications.
#[derive(Clone, Copy, Debug, Eq, Hash, Message, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum PvrEvent {
    // manager lifecycle
    ManagerError,
    ManagerStopped,
    ManagerStarting,
    ManagerStopping,
    ManagerInterrupted,
    ManagerStarted,

    // channels
    ChannelPlaybackStopped,
    ChannelGroup,
    ChannelGroupInvalidated,
    ChannelGroupsInvalidated,
    ChannelGroupsLoaded,

    // timers and recordings
    RecordingsInvalidated,
    AnnounceReminder,
    Timers,
    TimersInvalidated,

    // epg
    Epg,
    EpgActiveItem,
    EpgContainer,
    EpgItemUpdate,
    EpgUpdatePending,

    CurrentItem,
}

impl PvrEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::ManagerError => "manager-error",
            Self::ManagerStopped => "manager-stopped",
            Self::ManagerStarting => "manager-starting",
            Self::ManagerStopping => "manager-stopping",
            Self::ManagerInterrupted => "manager-interrupted",
            Self::ManagerStarted => "manager-started",
            Self::ChannelPlaybackStopped => "channel-playback-stopped",
            Self::ChannelGroup => "channel-group",
            Self::ChannelGroupInvalidated => "channel-group-invalidated",
            Self::ChannelGroupsInvalidated => "channel-groups-invalidated",
            Self::ChannelGroupsLoaded => "channel-groups-loaded",
            Self::RecordingsInvalidated => "recordings-invalidated",
            Self::AnnounceReminder => "announce-reminder",
            Self::Timers => "timers",
            Self::TimersInvalidated => "timers-invalidated",
            Self::Epg => "epg",
            Self::EpgActiveItem => "epg-active-item",
            Self::EpgContainer => "epg-container",
            Self::EpgItemUpdate => "epg-item-update",
            Self::EpgUpdatePending => "epg-update-pending",
            Self::CurrentItem => "current-item",
        }
    }
}

impl fmt::Display for PvrEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct SubscriberId(u64);

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

type EventHandler = Arc<dyn Fn(&PvrEvent) + Send + Sync>;

/// A publish/subscribe channel for [`PvrEvent`]s.
///
/// Cloning returns another handle to the same bus.
#[derive(Clone, Default)]
pub struct EventBus {
    registry: Arc<Mutex<Registry>>,
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    // Keeps the subscription order.
    handlers: IndexMap<SubscriberId, EventHandler>,
}

impl EventBus {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn subscribe<F>(&self, handler: F) -> SubscriberId
    where
        F: Fn(&PvrEvent) + Send + Sync + 'static,
    {
        let mut registry = self.lock_registry();
        registry.next_id += 1;
        let id = SubscriberId(registry.next_id);
        registry.handlers.insert(id, Arc::new(handler));
        tracing::debug!(subscriber.id = %id, "Subscribed");
        id
    }

    /// Delivers events to an actor as messages.
    pub fn subscribe_emitter(&self, emitter: Emitter<PvrEvent>) -> SubscriberId {
        self.subscribe(move |event| emitter.fire(*event))
    }

    /// Returns `false` if `id` has already been unsubscribed.
    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        let removed = self.lock_registry().handlers.shift_remove(&id).is_some();
        if removed {
            tracing::debug!(subscriber.id = %id, "Unsubscribed");
        }
        removed
    }

    /// Delivers `event` to the current subscribers in the subscription order.
    ///
    /// Handlers are called without holding the registry lock.  Subscribers
    /// added or removed by a handler take effect from the next publish.
    pub fn publish(&self, event: PvrEvent) {
        let handlers: Vec<EventHandler> = self.lock_registry().handlers.values().cloned().collect();
        tracing::trace!(%event, subscribers = handlers.len(), "Publish");
        for handler in handlers.iter() {
            handler(&event);
        }
    }

    pub fn num_subscribers(&self) -> usize {
        self.lock_registry().handlers.len()
    }

    fn lock_registry(&self) -> std::sync::MutexGuard<'_, Registry> {
        // A handler never runs while the lock is held, so a poisoned lock
        // still contains a consistent registry.
        self.registry
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

// </coverage:exclude>
