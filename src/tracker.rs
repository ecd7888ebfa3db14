//! Registry of open client connections.
//!
//! The accept loop registers every accepted socket, each handler holds the
//! returned `Registration` for as long as it owns the socket, and shutdown
//! asks every registered handler to close. All mutations go through one
//! mutex.

use slab::Slab;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;
use tracing::debug;

/// Shared set of open connections.
#[derive(Debug, Default)]
pub struct ConnectionTracker {
    connections: Mutex<Slab<TrackedConnection>>,
}

#[derive(Debug)]
struct TrackedConnection {
    peer: SocketAddr,
    close: Arc<Notify>,
}

impl ConnectionTracker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Add a connection to the set.
    ///
    /// The connection stays tracked until the returned handle is dropped.
    pub fn register(self: &Arc<Self>, peer: SocketAddr) -> Registration {
        let close = Arc::new(Notify::new());
        let id = self.lock().insert(TrackedConnection {
            peer,
            close: Arc::clone(&close),
        });
        debug!(conn_id = id, peer = %peer, "Connection tracked");

        Registration {
            id,
            close,
            tracker: Arc::clone(self),
        }
    }

    /// Ask every tracked connection to close. Returns how many were signalled.
    pub fn close_all(&self) -> usize {
        let connections = self.lock();
        for (id, conn) in connections.iter() {
            debug!(conn_id = id, peer = %conn.peer, "Closing connection");
            // notify_one keeps a permit, so a handler that is not waiting yet
            // still sees the request.
            conn.close.notify_one();
        }
        connections.len()
    }

    /// Number of open connections.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Check if there are no open connections.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn remove(&self, id: usize) {
        let mut connections = self.lock();
        if connections.contains(id) {
            let conn = connections.remove(id);
            debug!(conn_id = id, peer = %conn.peer, "Connection untracked");
        }
    }

    fn lock(&self) -> MutexGuard<'_, Slab<TrackedConnection>> {
        // The slab is consistent after every single call, so a poisoned
        // lock is still usable.
        self.connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Membership of one connection in a `ConnectionTracker`.
///
/// Dropping it removes the connection from the set.
#[derive(Debug)]
pub struct Registration {
    id: usize,
    close: Arc<Notify>,
    tracker: Arc<ConnectionTracker>,
}

impl Registration {
    pub fn id(&self) -> usize {
        self.id
    }

    /// Resolves once shutdown asked this connection to close.
    pub async fn closed(&self) {
        self.close.notified().await;
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.tracker.remove(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    #[test]
    fn test_register_and_drop() {
        let tracker = ConnectionTracker::new();

        let r1 = tracker.register(addr(1000));
        let r2 = tracker.register(addr(1001));
        assert_eq!(tracker.len(), 2);
        assert_ne!(r1.id(), r2.id());

        drop(r1);
        assert_eq!(tracker.len(), 1);

        drop(r2);
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_slot_reuse() {
        let tracker = ConnectionTracker::new();

        let r1 = tracker.register(addr(1000));
        let first = r1.id();
        drop(r1);

        let r2 = tracker.register(addr(1001));
        assert_eq!(r2.id(), first);
        assert_eq!(tracker.len(), 1);
    }

    #[tokio::test]
    async fn test_close_all_before_wait() {
        let tracker = ConnectionTracker::new();
        let registration = tracker.register(addr(1000));

        assert_eq!(tracker.close_all(), 1);

        tokio::time::timeout(Duration::from_secs(1), registration.closed())
            .await
            .expect("close request should be kept");
    }

    #[tokio::test]
    async fn test_close_all_wakes_waiters() {
        let tracker = ConnectionTracker::new();

        let mut waiters = Vec::new();
        for port in 0..10 {
            let registration = tracker.register(addr(2000 + port));
            waiters.push(tokio::spawn(async move {
                registration.closed().await;
            }));
        }

        tokio::task::yield_now().await;
        assert_eq!(tracker.close_all(), 10);

        for waiter in waiters {
            tokio::time::timeout(Duration::from_secs(1), waiter)
                .await
                .unwrap()
                .unwrap();
        }
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_concurrent_register() {
        let tracker = ConnectionTracker::new();

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let tracker = Arc::clone(&tracker);
                std::thread::spawn(move || {
                    for i in 0..100 {
                        let registration = tracker.register(addr(t * 100 + i));
                        drop(registration);
                    }
                    tracker.register(addr(60000 + t))
                })
            })
            .collect();

        let kept: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(tracker.len(), 8);

        drop(kept);
        assert!(tracker.is_empty());
    }
}
