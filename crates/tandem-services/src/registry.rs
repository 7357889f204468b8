//! Client registry: who is online, and how to reach them.
//!
//! A single lock guards the whole map. Client counts are small and every
//! critical section is a handful of map operations, so one exclusion domain
//! is enough and makes every snapshot consistent. The lock is never held
//! across an `.await`; broadcasters copy a snapshot and write afterwards.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::connection::{ConnectionId, FrameWriter};

/// A logged-in connection as seen in a snapshot.
#[derive(Debug, Clone)]
pub struct RegisteredPeer {
    pub id: ConnectionId,
    pub name: String,
    pub writer: FrameWriter,
}

/// Shared map from connection to display name.
///
/// Names need not be unique. Only the relay engine mutates it.
#[derive(Clone, Default)]
pub struct ClientRegistry {
    // BTreeMap keeps snapshots in login order (ids are monotonic).
    entries: Arc<Mutex<BTreeMap<ConnectionId, RegisteredPeer>>>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<ConnectionId, RegisteredPeer>> {
        // A panic elsewhere cannot leave a half-written entry: every mutation
        // is a single insert or remove.
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Insert an entry and return everyone who was already present,
    /// in one critical section.
    pub(crate) fn register(
        &self,
        id: ConnectionId,
        name: &str,
        writer: FrameWriter,
    ) -> Vec<RegisteredPeer> {
        let mut entries = self.lock();
        let existing = entries.values().cloned().collect();
        entries.insert(
            id,
            RegisteredPeer {
                id,
                name: name.to_string(),
                writer,
            },
        );
        existing
    }

    /// Remove an entry. Returns its name if it was registered.
    pub(crate) fn unregister(&self, id: ConnectionId) -> Option<String> {
        self.lock().remove(&id).map(|peer| peer.name)
    }

    /// Every registered connection.
    pub fn snapshot(&self) -> Vec<RegisteredPeer> {
        self.lock().values().cloned().collect()
    }

    /// Every registered connection except `origin`.
    pub fn peers_except(&self, origin: ConnectionId) -> Vec<RegisteredPeer> {
        self.lock()
            .values()
            .filter(|peer| peer.id != origin)
            .cloned()
            .collect()
    }

    pub fn names(&self) -> Vec<String> {
        self.lock().values().map(|peer| peer.name.clone()).collect()
    }

    pub fn name_of(&self, id: ConnectionId) -> Option<String> {
        self.lock().get(&id).map(|peer| peer.name.clone())
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
