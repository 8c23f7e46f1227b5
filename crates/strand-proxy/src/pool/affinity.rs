//! Connection to worker assignment.

use parking_lot::RwLock;
use std::collections::HashMap;

use crate::connection::ConnectionId;

/// Assign-once, read-many map from connection to worker index.
///
/// The first lookup for a connection picks a worker; every later lookup
/// returns the same one until the connection is released on close.
#[derive(Debug, Default)]
pub struct AffinityMap {
    assignments: RwLock<HashMap<ConnectionId, usize>>,
}

impl AffinityMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the worker pinned to `id`, pinning the one chosen by `assign` if none is yet.
    pub fn get_or_assign(&self, id: ConnectionId, assign: impl FnOnce() -> usize) -> usize {
        if let Some(index) = self.assignments.read().get(&id) {
            return *index;
        }
        // Re-check under the write lock: another thread may have pinned it meanwhile
        *self.assignments.write().entry(id).or_insert_with(assign)
    }

    pub fn get(&self, id: ConnectionId) -> Option<usize> {
        self.assignments.read().get(&id).copied()
    }

    pub fn release(&self, id: ConnectionId) -> Option<usize> {
        self.assignments.write().remove(&id)
    }

    pub fn len(&self) -> usize {
        self.assignments.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
