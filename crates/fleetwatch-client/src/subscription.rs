//! Event subscriptions.

use fleetwatch_core::{EventKind, FleetEvent};
use std::sync::Arc;

/// What a subscriber wants to hear about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    /// One kind of event.
    Kind(EventKind),
    /// Every event.
    All,
}

impl Topic {
    fn matches(self, kind: EventKind) -> bool {
        match self {
            Self::Kind(k) => k == kind,
            Self::All => true,
        }
    }
}

impl From<EventKind> for Topic {
    fn from(kind: EventKind) -> Self {
        Self::Kind(kind)
    }
}

/// Returned by `subscribe`; pass to `unsubscribe` to remove that handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

pub(crate) type Handler = Arc<dyn Fn(&FleetEvent) + Send + Sync>;

struct Entry {
    id: SubscriptionId,
    topic: Topic,
    handler: Handler,
}

/// Handlers in subscription order.
#[derive(Default)]
pub(crate) struct Registry {
    next_id: u64,
    entries: Vec<Entry>,
}

impl Registry {
    pub fn insert(&mut self, topic: Topic, handler: Handler) -> SubscriptionId {
        let id = SubscriptionId(self.next_id);
        self.next_id += 1;
        self.entries.push(Entry { id, topic, handler });
        id
    }

    pub fn remove(&mut self, id: SubscriptionId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|entry| entry.id != id);
        self.entries.len() != before
    }

    /// Handlers for `kind`, copied out so they can run without the registry
    /// borrowed.
    pub fn matching(&self, kind: EventKind) -> Vec<Handler> {
        self.entries
            .iter()
            .filter(|entry| entry.topic.matches(kind))
            .map(|entry| Arc::clone(&entry.handler))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}
