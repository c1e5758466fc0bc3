//! Change notification
//!
//! Observers are called after a mutation has completed. They receive only
//! the event, never the coordinator, so a callback cannot re-enter it while
//! a dispatch is in progress.

use serde::Serialize;
use types::connection::ConnectionState;
use types::log::LogRecord;
use types::sort::SortSpec;

use crate::store::ApplySummary;

/// What changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChangeEvent {
    /// The projection changed (snapshot or push).
    DatasetChanged { revision: u64, summary: ApplySummary },
    /// The sort spec changed; the projection was re-sorted.
    SortChanged(SortSpec),
    LogAppended(LogRecord),
    /// The log was cleared down to its marker record.
    LogCleared,
    ConnectionChanged {
        from: ConnectionState,
        to: ConnectionState,
    },
}

/// Callback registered with [`Observers::subscribe`].
pub type Observer = Box<dyn FnMut(&ChangeEvent) + Send>;

/// Handle for removing an observer again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

/// Ordered observer list; notification follows subscription order.
#[derive(Default)]
pub struct Observers {
    next_id: u64,
    entries: Vec<(SubscriptionId, Observer)>,
}

impl Observers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, observer: Observer) -> SubscriptionId {
        let id = SubscriptionId(self.next_id);
        self.next_id += 1;
        self.entries.push((id, observer));
        id
    }

    /// Returns whether the subscription existed.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(existing, _)| *existing != id);
        self.entries.len() != before
    }

    pub fn notify(&mut self, event: &ChangeEvent) {
        for (_, observer) in self.entries.iter_mut() {
            observer(event);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl std::fmt::Debug for Observers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Observers")
            .field("count", &self.entries.len())
            .finish()
    }
}
