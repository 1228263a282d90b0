//! Process-wide table of authenticated connections.
//!
//! The registry only ever holds connections in the `Authenticated` state. It
//! is the single source of truth for "who is connected right now" and is
//! shared by the auth gate (admission), the session loop (eviction), the
//! broadcast engine (snapshots) and the shutdown coordinator.
//!
//! All mutations and snapshots go through one [`RwLock`], so a snapshot either
//! observes a mutation entirely or not at all. The lock is a blocking
//! `std::sync` lock and is never held across an `.await`.
//!
//! # Example
//!
//! ```rust
//! use gatehouse_server::registry::ConnectionRegistry;
//!
//! let registry = ConnectionRegistry::new();
//! assert!(registry.is_empty());
//! assert!(registry.is_accepting());
//!
//! registry.stop_admissions();
//! assert!(!registry.is_accepting());
//! ```

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::{debug, warn};

use crate::connection::{Connection, ConnectionId};

/// Outcome of [`ConnectionRegistry::admit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// The connection was added.
    Admitted,

    /// A connection with the same id is already present; nothing changed.
    Duplicate,

    /// The registry has stopped accepting connections.
    Closed,
}

#[derive(Debug)]
struct Inner {
    accepting: bool,
    next_seq: u64,
    /// Admission sequence → connection. Iterates in insertion order.
    order: BTreeMap<u64, Arc<Connection>>,
    index: HashMap<ConnectionId, u64>,
}

/// In-memory connection registry.
#[derive(Debug)]
pub struct ConnectionRegistry {
    inner: RwLock<Inner>,
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionRegistry {
    /// Creates an empty registry that accepts admissions.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                accepting: true,
                next_seq: 0,
                order: BTreeMap::new(),
                index: HashMap::new(),
            }),
        }
    }

    // A panic while holding the lock cannot leave the maps half-updated, so a
    // poisoned lock is still safe to use.
    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Adds an authenticated connection.
    pub fn admit(&self, connection: Arc<Connection>) -> Admission {
        let mut inner = self.write();

        if !inner.accepting {
            return Admission::Closed;
        }

        if inner.index.contains_key(connection.id()) {
            warn!(
                connection_id = %connection.id(),
                correlation_id = %connection.correlation_id(),
                "Duplicate admission ignored"
            );
            return Admission::Duplicate;
        }

        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.index.insert(connection.id().clone(), seq);
        inner.order.insert(seq, connection);
        Admission::Admitted
    }

    /// Removes a connection. Evicting an unknown id is a no-op.
    pub fn evict(&self, id: &ConnectionId) -> Option<Arc<Connection>> {
        let mut inner = self.write();
        let seq = inner.index.remove(id)?;
        let removed = inner.order.remove(&seq);
        if removed.is_some() {
            debug!(connection_id = %id, remaining = inner.order.len(), "Connection evicted");
        }
        removed
    }

    /// Point-in-time copy of every registered connection, oldest first.
    pub fn snapshot(&self) -> Vec<Arc<Connection>> {
        self.read().order.values().cloned().collect()
    }

    /// Looks up a connection by id.
    pub fn get(&self, id: &ConnectionId) -> Option<Arc<Connection>> {
        let inner = self.read();
        let seq = inner.index.get(id)?;
        inner.order.get(seq).cloned()
    }

    pub fn size(&self) -> usize {
        self.read().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    pub fn is_accepting(&self) -> bool {
        self.read().accepting
    }

    /// Refuses every admission from now on.
    pub fn stop_admissions(&self) {
        self.write().accepting = false;
    }

    /// Drops every registered connection, returning how many were removed.
    pub fn clear(&self) -> usize {
        let mut inner = self.write();
        let removed = inner.order.len();
        inner.order.clear();
        inner.index.clear();
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::test_support::{connection, connection_with_id};

    #[test]
    fn admit_and_evict() {
        let registry = ConnectionRegistry::new();
        let (conn, _rx) = connection("u1");
        let conn = Arc::new(conn);
        let id = conn.id().clone();

        assert_eq!(registry.admit(conn), Admission::Admitted);
        assert_eq!(registry.size(), 1);
        assert!(registry.get(&id).is_some());

        assert!(registry.evict(&id).is_some());
        assert!(registry.is_empty());
    }

    #[test]
    fn evict_is_idempotent() {
        let registry = ConnectionRegistry::new();
        let (conn, _rx) = connection("u1");
        let conn = Arc::new(conn);
        let id = conn.id().clone();
        registry.admit(conn);

        assert!(registry.evict(&id).is_some());
        assert!(registry.evict(&id).is_none());
        assert!(registry.evict(&ConnectionId::from("never-seen")).is_none());
        assert_eq!(registry.size(), 0);
    }

    #[test]
    fn duplicate_admission_is_a_no_op() {
        let registry = ConnectionRegistry::new();
        let (first, _rx1) = connection_with_id("dup", "u1");
        let (second, _rx2) = connection_with_id("dup", "u2");

        assert_eq!(registry.admit(Arc::new(first)), Admission::Admitted);
        assert_eq!(registry.admit(Arc::new(second)), Admission::Duplicate);

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].subject_id(), "u1");
    }

    #[test]
    fn snapshot_preserves_insertion_order() {
        let registry = ConnectionRegistry::new();
        let mut receivers = Vec::new();
        for subject in ["a", "b", "c", "d"] {
            let (conn, rx) = connection(subject);
            receivers.push(rx);
            registry.admit(Arc::new(conn));
        }

        let first = registry.snapshot();
        let b_id = first[1].id().clone();
        registry.evict(&b_id);
        let (late, _late_rx) = connection("e");
        registry.admit(Arc::new(late));

        let subjects: Vec<_> = registry
            .snapshot()
            .iter()
            .map(|c| c.subject_id().to_string())
            .collect();
        assert_eq!(subjects, vec!["a", "c", "d", "e"]);
    }

    #[test]
    fn snapshot_is_a_copy() {
        let registry = ConnectionRegistry::new();
        let (conn, _rx) = connection("u1");
        let conn = Arc::new(conn);
        let id = conn.id().clone();
        registry.admit(conn);

        let snapshot = registry.snapshot();
        registry.evict(&id);
        assert_eq!(snapshot.len(), 1);
        assert_eq!(registry.size(), 0);
    }

    #[test]
    fn stopped_registry_refuses_admission() {
        let registry = ConnectionRegistry::new();
        registry.stop_admissions();

        let (conn, _rx) = connection("u1");
        assert_eq!(registry.admit(Arc::new(conn)), Admission::Closed);
        assert!(registry.is_empty());
    }

    #[test]
    fn clear_removes_everything() {
        let registry = ConnectionRegistry::new();
        let mut receivers = Vec::new();
        for subject in ["a", "b"] {
            let (conn, rx) = connection(subject);
            receivers.push(rx);
            registry.admit(Arc::new(conn));
        }

        assert_eq!(registry.clear(), 2);
        assert!(registry.is_empty());
        assert!(registry.snapshot().is_empty());
    }

    #[test]
    fn concurrent_admit_and_evict_leave_consistent_state() {
        let registry = Arc::new(ConnectionRegistry::new());
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || {
                    for i in 0..50 {
                        let (conn, _rx) = connection_with_id(&format!("t{t}-{i}"), "u");
                        let conn = Arc::new(conn);
                        let id = conn.id().clone();
                        assert_eq!(registry.admit(conn), Admission::Admitted);
                        if i % 2 == 0 {
                            registry.evict(&id);
                        }
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(registry.size(), 8 * 25);
        assert_eq!(registry.snapshot().len(), registry.size());
    }
}
