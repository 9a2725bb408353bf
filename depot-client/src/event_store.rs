use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use depot_core::DeploymentMessage;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// What an upsert did to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Replaced,
    /// The stored entry is newer; nothing changed.
    Stale,
}

#[derive(Debug, Clone)]
struct ReceivedEvent {
    // receipt sequence of the stored snapshot
    sequence: u64,
    message: DeploymentMessage,
}

/// Last-known snapshot per deployment id, built only from consumed messages.
///
/// In memory and lost on restart. Cloning shares the same map.
#[derive(Debug, Clone, Default)]
pub struct ReceivedEvents {
    events: Arc<DashMap<u64, ReceivedEvent>>,
    sequence: Arc<AtomicU64>,
}

impl ReceivedEvents {
    pub fn new() -> Self {
        ReceivedEvents::default()
    }

    /// Stores `message` under `id` unless the stored entry has a later
    /// `updated_at`. Identical content always overwrites, so a redelivery
    /// leaves the store as it was.
    pub fn upsert(&self, id: u64, message: DeploymentMessage) -> UpsertOutcome {
        match self.events.entry(id) {
            Entry::Occupied(mut entry) => {
                if entry.get().message.updated_at > message.updated_at {
                    UpsertOutcome::Stale
                } else {
                    entry.insert(self.received(message));
                    UpsertOutcome::Replaced
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(self.received(message));
                UpsertOutcome::Inserted
            }
        }
    }

    fn received(&self, message: DeploymentMessage) -> ReceivedEvent {
        ReceivedEvent {
            sequence: self.sequence.fetch_add(1, Ordering::Relaxed),
            message,
        }
    }

    pub fn get(&self, id: u64) -> Option<DeploymentMessage> {
        self.events.get(&id).map(|entry| entry.message.clone())
    }

    /// Every stored snapshot, oldest receipt first.
    pub fn list(&self) -> Vec<DeploymentMessage> {
        let mut events: Vec<ReceivedEvent> =
            self.events.iter().map(|entry| entry.value().clone()).collect();
        events.sort_unstable_by_key(|event| event.sequence);
        events.into_iter().map(|event| event.message).collect()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}
