//! Connection registry
//!
//! The set of admitted connections plus the capacity bound. This is the
//! only shared mutable state in the server; every mutation happens under
//! a single lock that is never held across an `.await`.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::connection::Connection;
use crate::types::ConnectionId;

/// Result of an admission check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// A capacity slot was reserved for the caller
    Admitted,
    /// Capacity is exhausted
    Rejected,
}

#[derive(Debug, Default)]
struct Inner {
    /// Registered members by identity
    members: HashMap<ConnectionId, Connection>,
    /// Reserved capacity slots (admitted, registered or about to be)
    active: usize,
}

/// Registry of active connections
///
/// Created once per server and shared with every session through an `Arc`.
#[derive(Debug)]
pub struct ConnectionRegistry {
    inner: Mutex<Inner>,
    capacity: usize,
}

impl ConnectionRegistry {
    /// Create an empty registry with the given capacity
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            capacity,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // No statement leaves Inner half-updated, so a poisoned guard is still usable
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Reserve a capacity slot if one is free
    ///
    /// Check and increment happen in one critical section.
    pub fn try_admit(&self) -> Admission {
        let mut inner = self.lock();
        if inner.active < self.capacity {
            inner.active += 1;
            Admission::Admitted
        } else {
            Admission::Rejected
        }
    }

    /// Add an admitted connection to the member set
    ///
    /// Must follow a successful [`try_admit`](Self::try_admit), once per
    /// connection.
    pub fn register(&self, conn: Connection) {
        let mut inner = self.lock();
        inner.members.insert(conn.id, conn);
    }

    /// Remove a connection and release its slot
    ///
    /// Removing an absent connection is a no-op and returns `None`.
    pub fn remove(&self, id: ConnectionId) -> Option<Connection> {
        let mut inner = self.lock();
        let removed = inner.members.remove(&id);
        if removed.is_some() {
            inner.active = inner.active.saturating_sub(1);
        }
        removed
    }

    /// Point-in-time copy of the members, safe to iterate without the lock
    pub fn snapshot(&self) -> Vec<Connection> {
        self.lock().members.values().cloned().collect()
    }

    /// Number of registered members
    pub fn size(&self) -> usize {
        self.lock().members.len()
    }

    /// Number of reserved capacity slots
    pub fn active(&self) -> usize {
        self.lock().active
    }

    /// Maximum number of concurrent members
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Check if a connection is currently registered
    pub fn contains(&self, id: ConnectionId) -> bool {
        self.lock().members.contains_key(&id)
    }
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;
    use std::sync::Arc;
    use std::thread;

    use super::*;

    fn conn(port: u16) -> Connection {
        let addr: SocketAddr = format!("127.0.0.1:{port}").parse().unwrap();
        Connection::with_outbox(addr).0
    }

    #[test]
    fn test_admission_up_to_capacity() {
        let registry = ConnectionRegistry::new(2);

        assert_eq!(registry.try_admit(), Admission::Admitted);
        assert_eq!(registry.try_admit(), Admission::Admitted);
        assert_eq!(registry.try_admit(), Admission::Rejected);
        assert_eq!(registry.active(), 2);
        // Rejection never touches the member set
        assert_eq!(registry.size(), 0);
    }

    #[test]
    fn test_zero_capacity_rejects_everything() {
        let registry = ConnectionRegistry::new(0);
        assert_eq!(registry.try_admit(), Admission::Rejected);
        assert_eq!(registry.active(), 0);
    }

    #[test]
    fn test_register_and_remove() {
        let registry = ConnectionRegistry::new(3);
        let a = conn(1);
        let b = conn(2);

        registry.try_admit();
        registry.register(a.clone());
        registry.try_admit();
        registry.register(b.clone());
        assert_eq!(registry.size(), 2);
        assert!(registry.contains(a.id));

        let removed = registry.remove(a.id).expect("a was registered");
        assert_eq!(removed.id, a.id);
        assert_eq!(registry.size(), 1);
        assert_eq!(registry.active(), 1);
        assert!(!registry.contains(a.id));
    }

    #[test]
    fn test_remove_is_idempotent() {
        let registry = ConnectionRegistry::new(1);
        let a = conn(1);

        registry.try_admit();
        registry.register(a.clone());

        assert!(registry.remove(a.id).is_some());
        assert!(registry.remove(a.id).is_none());
        assert_eq!(registry.active(), 0);

        // The released slot can be reused
        assert_eq!(registry.try_admit(), Admission::Admitted);
    }

    #[test]
    fn test_snapshot_is_detached() {
        let registry = ConnectionRegistry::new(3);
        let a = conn(1);
        let b = conn(2);
        registry.try_admit();
        registry.register(a.clone());

        let snapshot = registry.snapshot();

        registry.try_admit();
        registry.register(b);
        registry.remove(a.id);

        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].id, a.id);
        let after: Vec<_> = registry.snapshot().into_iter().map(|c| c.id).collect();
        assert!(!after.contains(&a.id));
    }

    #[test]
    fn test_concurrent_admission_never_exceeds_capacity() {
        let registry = Arc::new(ConnectionRegistry::new(3));

        let handles: Vec<_> = (0..32)
            .map(|_| {
                let registry = Arc::clone(&registry);
                thread::spawn(move || registry.try_admit())
            })
            .collect();

        let admitted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|a| *a == Admission::Admitted)
            .count();

        assert_eq!(admitted, 3);
        assert_eq!(registry.active(), 3);
    }

    #[test]
    fn test_concurrent_churn_keeps_counts_consistent() {
        let registry = Arc::new(ConnectionRegistry::new(4));

        let handles: Vec<_> = (0..16u16)
            .map(|i| {
                let registry = Arc::clone(&registry);
                thread::spawn(move || {
                    for round in 0..50u16 {
                        if registry.try_admit() == Admission::Admitted {
                            let c = conn(i * 100 + round);
                            registry.register(c.clone());
                            assert!(registry.size() <= registry.capacity());
                            registry.remove(c.id);
                            assert!(!registry.contains(c.id));
                        }
                    }
                })
            })
            .collect();

        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(registry.size(), 0);
        assert_eq!(registry.active(), 0);
    }
}
