//! User → live connection registry.
//!
//! The registry is the single source of truth for "who is connected". It
//! holds at most one [`ConnectionHandle`] per user id. Removal is guarded by
//! connection identity: a superseded connection's late disconnect must not
//! evict the session that replaced it.
//!
//! One coarse lock covers the whole map. Writes happen only on connect and
//! disconnect, so contention is low, and holding the lock across
//! check-then-act makes admission atomic per user id.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Notify};

use crate::error::SessionConflict;
use crate::protocol::ServerEvent;

/// Outcome of handing an event to a connection's writer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Queued,
    /// The outbound queue was full; the event was discarded.
    Dropped,
    /// The writer task is gone.
    Closed,
}

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Handle to one live WebSocket session.
///
/// Cloning is cheap; all clones refer to the same connection and compare
/// equal by [`id`](Self::id).
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: u64,
    user_id: String,
    connected_at: DateTime<Utc>,
    tx: mpsc::Sender<ServerEvent>,
    close: Arc<Notify>,
}

impl ConnectionHandle {
    pub fn new(user_id: impl Into<String>, tx: mpsc::Sender<ServerEvent>) -> Self {
        Self {
            id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
            user_id: user_id.into(),
            connected_at: Utc::now(),
            tx,
            close: Arc::new(Notify::new()),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    /// Queue an event for the socket writer without waiting for room.
    pub fn send(&self, event: ServerEvent) -> Delivery {
        match self.tx.try_send(event) {
            Ok(()) => Delivery::Queued,
            Err(TrySendError::Full(_)) => Delivery::Dropped,
            Err(TrySendError::Closed(_)) => Delivery::Closed,
        }
    }

    /// Ask the connection task to close the socket.
    ///
    /// The signal is latched, so it is not lost if the task is not yet
    /// waiting on [`closed`](Self::closed).
    pub fn force_close(&self) {
        self.close.notify_one();
    }

    /// Resolves once [`force_close`](Self::force_close) has been called.
    pub async fn closed(&self) {
        self.close.notified().await;
    }
}

impl PartialEq for ConnectionHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ConnectionHandle {}

#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    entries: Mutex<HashMap<String, ConnectionHandle>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lookup(&self, user_id: &str) -> Option<ConnectionHandle> {
        self.entries.lock().get(user_id).cloned()
    }

    /// Insert unconditionally, returning whatever entry was displaced.
    pub fn register(&self, conn: ConnectionHandle) -> Option<ConnectionHandle> {
        self.entries.lock().insert(conn.user_id.clone(), conn)
    }

    /// Atomic admission: insert `conn` unless its user already has a live
    /// connection and `overwrite` is false.
    ///
    /// On takeover the displaced connection is returned; the caller is
    /// responsible for closing it.
    pub fn claim(
        &self,
        conn: ConnectionHandle,
        overwrite: bool,
    ) -> Result<Option<ConnectionHandle>, SessionConflict> {
        let mut entries = self.entries.lock();
        if entries.contains_key(&conn.user_id) && !overwrite {
            return Err(SessionConflict::AlreadyConnected);
        }
        Ok(entries.insert(conn.user_id.clone(), conn))
    }

    /// Remove the entry for `user_id` only if it is still `conn`.
    pub fn unregister(&self, user_id: &str, conn: &ConnectionHandle) -> bool {
        let mut entries = self.entries.lock();
        match entries.get(user_id) {
            Some(current) if current == conn => {
                entries.remove(user_id);
                true
            }
            _ => false,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Force-close every live connection and empty the registry.
    /// Returns how many connections were closed.
    pub fn shutdown(&self) -> usize {
        let drained: Vec<ConnectionHandle> =
            self.entries.lock().drain().map(|(_, conn)| conn).collect();
        for conn in &drained {
            conn.force_close();
        }
        drained.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conn(user_id: &str) -> (ConnectionHandle, mpsc::Receiver<ServerEvent>) {
        let (tx, rx) = mpsc::channel(8);
        (ConnectionHandle::new(user_id, tx), rx)
    }

    #[test]
    fn clones_share_identity() {
        let (a, _rx) = conn("alice");
        let (b, _rx2) = conn("alice");
        assert_eq!(a, a.clone());
        assert_ne!(a, b);
    }

    #[test]
    fn claim_rejects_duplicate_without_overwrite() {
        let registry = ConnectionRegistry::new();
        let (first, _rx1) = conn("alice");
        let (second, _rx2) = conn("alice");

        assert!(registry.claim(first.clone(), false).unwrap().is_none());
        let err = registry.claim(second, false).unwrap_err();
        assert!(matches!(err, SessionConflict::AlreadyConnected));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.lookup("alice"), Some(first));
    }

    #[test]
    fn claim_with_overwrite_replaces_and_returns_prior() {
        let registry = ConnectionRegistry::new();
        let (first, _rx1) = conn("alice");
        let (second, _rx2) = conn("alice");

        registry.claim(first.clone(), false).unwrap();
        let displaced = registry.claim(second.clone(), true).unwrap();
        assert_eq!(displaced, Some(first));
        assert_eq!(registry.lookup("alice"), Some(second));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn stale_unregister_keeps_newer_entry() {
        let registry = ConnectionRegistry::new();
        let (old, _rx1) = conn("alice");
        let (new, _rx2) = conn("alice");

        registry.register(old.clone());
        registry.claim(new.clone(), true).unwrap();

        assert!(!registry.unregister("alice", &old));
        assert_eq!(registry.lookup("alice"), Some(new.clone()));

        assert!(registry.unregister("alice", &new));
        assert!(registry.is_empty());
    }

    #[test]
    fn unregister_unknown_user_is_noop() {
        let registry = ConnectionRegistry::new();
        let (c, _rx) = conn("bob");
        assert!(!registry.unregister("bob", &c));
    }

    #[test]
    fn users_are_independent() {
        let registry = ConnectionRegistry::new();
        let (a, _rx1) = conn("alice");
        let (b, _rx2) = conn("bob");
        registry.claim(a, false).unwrap();
        registry.claim(b, false).unwrap();
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn concurrent_claims_admit_exactly_one() {
        let registry = ConnectionRegistry::new();
        let handles: Vec<_> = (0..32).map(|_| conn("alice")).collect();

        let admitted = std::thread::scope(|s| {
            let joins: Vec<_> = handles
                .iter()
                .map(|(c, _)| {
                    let registry = &registry;
                    s.spawn(move || registry.claim(c.clone(), false).is_ok())
                })
                .collect();
            joins
                .into_iter()
                .map(|j| j.join().unwrap())
                .filter(|ok| *ok)
                .count()
        });

        assert_eq!(admitted, 1);
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn shutdown_closes_everyone() {
        let registry = ConnectionRegistry::new();
        let (a, _rx1) = conn("alice");
        let (b, _rx2) = conn("bob");
        registry.register(a.clone());
        registry.register(b.clone());

        assert_eq!(registry.shutdown(), 2);
        assert!(registry.is_empty());
        // Latched signal: resolves even though nobody was waiting.
        tokio::time::timeout(std::time::Duration::from_secs(1), a.closed())
            .await
            .unwrap();
    }

    #[test]
    fn send_reports_closed_writer() {
        let (c, rx) = conn("alice");
        assert_eq!(c.send(ServerEvent::connected()), Delivery::Queued);
        drop(rx);
        assert_eq!(c.send(ServerEvent::connected()), Delivery::Closed);
    }

    #[test]
    fn send_never_waits_on_a_full_queue() {
        let (tx, mut rx) = mpsc::channel(1);
        let c = ConnectionHandle::new("alice", tx);
        assert_eq!(c.send(ServerEvent::connected()), Delivery::Queued);
        assert_eq!(c.send(ServerEvent::connected()), Delivery::Dropped);

        // The queued event is intact; the dropped one never arrives.
        assert_eq!(rx.try_recv().unwrap(), ServerEvent::connected());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn connected_at_is_stamped_on_creation() {
        let before = Utc::now();
        let (c, _rx) = conn("alice");
        assert!(c.connected_at() >= before);
        assert!(c.connected_at() <= Utc::now());
    }
}
