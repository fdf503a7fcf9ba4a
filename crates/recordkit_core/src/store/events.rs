//! Change notifications emitted by the store.

use crate::model::entity::EntityId;
use std::fmt::{Display, Formatter};
use std::sync::mpsc::{channel, Receiver, Sender};

/// What kind of committed operation produced an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Loaded,
    Created,
    Updated,
    Archived,
    Restored,
    Deleted,
    ArchiveCleared,
    Imported,
}

impl ChangeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Loaded => "loaded",
            Self::Created => "created",
            Self::Updated => "updated",
            Self::Archived => "archived",
            Self::Restored => "restored",
            Self::Deleted => "deleted",
            Self::ArchiveCleared => "archive_cleared",
            Self::Imported => "imported",
        }
    }
}

impl Display for ChangeKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One event per committed logical operation, however many collections it
/// touched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreEvent {
    /// Monotonic per-store revision; the first event is revision 1.
    pub revision: u64,
    pub kind: ChangeKind,
    /// Collections whose contents changed, sorted by name.
    pub collections: Vec<&'static str>,
    /// Every record id the operation touched, cascades included.
    pub ids: Vec<EntityId>,
    /// `false` when the persistence write failed.
    pub durable: bool,
}

impl StoreEvent {
    pub fn touches(&self, collection: &str) -> bool {
        self.collections.iter().any(|name| *name == collection)
    }
}

/// Fan-out list of channel senders; disconnected receivers are pruned on
/// publish.
#[derive(Debug)]
pub(crate) struct Subscribers<E> {
    senders: Vec<Sender<E>>,
}

impl<E: Clone> Subscribers<E> {
    pub(crate) fn new() -> Self {
        Self {
            senders: Vec::new(),
        }
    }

    pub(crate) fn subscribe(&mut self) -> Receiver<E> {
        let (sender, receiver) = channel();
        self.senders.push(sender);
        receiver
    }

    pub(crate) fn publish(&mut self, event: &E) {
        self.senders
            .retain(|sender| sender.send(event.clone()).is_ok());
    }

    pub(crate) fn len(&self) -> usize {
        self.senders.len()
    }
}

impl<E: Clone> Default for Subscribers<E> {
    fn default() -> Self {
        Self::new()
    }
}
