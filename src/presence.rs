//! In-memory presence registry.
//!
//! Process-wide map of user id to live session handle. Single active session
//! per user: the last registration wins, and a disconnect only clears the
//! entry if it still belongs to the disconnecting handle, so a stale
//! disconnect never clobbers a newer session.
//!
//! Last-seen timestamps live outside the live-entry map: they survive
//! reconnects and are only rewritten on the *next* disconnect, which is what
//! the "last seen" presence text needs.
//!
//! All operations are short map manipulations under one mutex; nothing here
//! blocks on I/O.

use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::{broadcast, mpsc};

use crate::dispatch::WsEvent;

/// Opaque handle addressing one live WebSocket session. Cloneable; sending
/// never blocks (unbounded channel drained by the session task).
#[derive(Debug, Clone)]
pub struct SessionHandle {
    pub session_id: u64,
    tx: mpsc::UnboundedSender<WsEvent>,
}

impl SessionHandle {
    pub fn new(session_id: u64, tx: mpsc::UnboundedSender<WsEvent>) -> Self {
        Self { session_id, tx }
    }

    /// Push an event to the session. Returns false if the session task has
    /// already gone away; callers treat that as an offline receiver.
    pub fn send(&self, event: WsEvent) -> bool {
        self.tx.send(event).is_ok()
    }
}

#[derive(Debug, Clone)]
pub struct PresenceEntry {
    pub handle: SessionHandle,
    pub connected_at: u64,
}

#[derive(Default)]
struct Inner {
    live: HashMap<String, PresenceEntry>,
    last_seen: HashMap<String, u64>,
}

/// Lock-protected presence service. Injected where needed; created once at
/// process start and drained at shutdown.
pub struct PresenceRegistry {
    inner: Mutex<Inner>,
    events: broadcast::Sender<WsEvent>,
}

impl PresenceRegistry {
    pub fn new(event_capacity: usize) -> Self {
        let (events, _) = broadcast::channel(event_capacity);
        Self {
            inner: Mutex::new(Inner::default()),
            events,
        }
    }

    /// Subscribe to online/offline broadcast events (one receiver per
    /// connected session).
    pub fn subscribe(&self) -> broadcast::Receiver<WsEvent> {
        self.events.subscribe()
    }

    /// Register a session for a user, superseding any prior entry
    /// (last-writer-wins on reconnect or multi-tab). Broadcasts an online
    /// event to all peers.
    pub fn register(&self, user_id: &str, handle: SessionHandle, now: u64) {
        let superseded = {
            let mut inner = self.inner.lock().unwrap();
            inner
                .live
                .insert(
                    user_id.to_string(),
                    PresenceEntry {
                        handle,
                        connected_at: now,
                    },
                )
                .is_some()
        };
        if superseded {
            crate::wlog!(
                "presence: {} re-registered, prior session superseded",
                crate::logging::user_id(user_id)
            );
        }
        // Re-registration is not an offline/online flap, but peers that
        // missed the first online event still learn the user is reachable.
        let _ = self.events.send(WsEvent::UserOnline {
            user_id: user_id.to_string(),
        });
    }

    /// Deregister a session, but only if the live entry still carries this
    /// session id. Records the last-seen timestamp and broadcasts offline.
    /// Returns whether the entry was actually removed.
    pub fn deregister(&self, user_id: &str, session_id: u64, now: u64) -> bool {
        let removed = {
            let mut inner = self.inner.lock().unwrap();
            match inner.live.get(user_id) {
                Some(entry) if entry.handle.session_id == session_id => {
                    inner.live.remove(user_id);
                    inner.last_seen.insert(user_id.to_string(), now);
                    true
                }
                // A newer session owns the entry, or it is already gone:
                // this disconnect is stale and must not clobber anything.
                _ => false,
            }
        };
        if removed {
            let _ = self.events.send(WsEvent::UserOffline {
                user_id: user_id.to_string(),
                last_seen_at: now,
            });
        }
        removed
    }

    pub fn is_online(&self, user_id: &str) -> bool {
        self.inner.lock().unwrap().live.contains_key(user_id)
    }

    /// Resolve the live session handle for a user, if any.
    pub fn resolve(&self, user_id: &str) -> Option<SessionHandle> {
        self.inner
            .lock()
            .unwrap()
            .live
            .get(user_id)
            .map(|e| e.handle.clone())
    }

    /// Last-seen timestamp recorded at the user's most recent disconnect.
    /// Remains queryable while the user is online again (rewritten only on
    /// the next disconnect).
    pub fn last_seen(&self, user_id: &str) -> Option<u64> {
        self.inner.lock().unwrap().last_seen.get(user_id).copied()
    }

    pub fn online_count(&self) -> usize {
        self.inner.lock().unwrap().live.len()
    }

    /// Shutdown: drop every live session, recording last-seen for each.
    /// Returns the drained user ids and their timestamps so the caller can
    /// persist them.
    pub fn drain(&self, now: u64) -> Vec<(String, u64)> {
        let mut inner = self.inner.lock().unwrap();
        let users: Vec<String> = inner.live.keys().cloned().collect();
        inner.live.clear();
        let mut drained = Vec::with_capacity(users.len());
        for user in users {
            inner.last_seen.insert(user.clone(), now);
            drained.push((user, now));
        }
        drained
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(session_id: u64) -> (SessionHandle, mpsc::UnboundedReceiver<WsEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (SessionHandle::new(session_id, tx), rx)
    }

    #[test]
    fn register_and_resolve() {
        let registry = PresenceRegistry::new(16);
        let (h1, _rx) = handle(1);

        assert!(!registry.is_online("alice"));
        registry.register("alice", h1, 100);
        assert!(registry.is_online("alice"));
        assert_eq!(registry.resolve("alice").unwrap().session_id, 1);
        assert_eq!(registry.online_count(), 1);
    }

    #[test]
    fn last_registration_wins() {
        let registry = PresenceRegistry::new(16);
        let (h1, _rx1) = handle(1);
        let (h2, _rx2) = handle(2);

        registry.register("alice", h1, 100);
        registry.register("alice", h2, 101);
        assert_eq!(registry.resolve("alice").unwrap().session_id, 2);
        assert_eq!(registry.online_count(), 1);
    }

    #[test]
    fn stale_disconnect_is_a_no_op() {
        let registry = PresenceRegistry::new(16);
        let (h1, _rx1) = handle(1);
        let (h2, _rx2) = handle(2);

        registry.register("alice", h1, 100);
        registry.register("alice", h2, 101);

        // The old tab's disconnect arrives late; it must not clear the new
        // session's entry.
        assert!(!registry.deregister("alice", 1, 102));
        assert!(registry.is_online("alice"));
        assert_eq!(registry.resolve("alice").unwrap().session_id, 2);

        assert!(registry.deregister("alice", 2, 103));
        assert!(!registry.is_online("alice"));
    }

    #[test]
    fn last_seen_survives_reconnect() {
        let registry = PresenceRegistry::new(16);
        let (h1, _rx1) = handle(1);

        registry.register("alice", h1, 100);
        assert!(registry.last_seen("alice").is_none());
        registry.deregister("alice", 1, 150);
        assert_eq!(registry.last_seen("alice"), Some(150));

        // Registering again does not clear the last-seen value; only the
        // next disconnect rewrites it.
        let (h2, _rx2) = handle(2);
        registry.register("alice", h2, 200);
        assert_eq!(registry.last_seen("alice"), Some(150));
        registry.deregister("alice", 2, 250);
        assert_eq!(registry.last_seen("alice"), Some(250));
    }

    #[test]
    fn register_broadcasts_online_event() {
        let registry = PresenceRegistry::new(16);
        let mut events = registry.subscribe();
        let (h1, _rx1) = handle(1);

        registry.register("alice", h1, 100);
        match events.try_recv().unwrap() {
            WsEvent::UserOnline { user_id } => assert_eq!(user_id, "alice"),
            other => panic!("unexpected event: {other:?}"),
        }

        registry.deregister("alice", 1, 150);
        match events.try_recv().unwrap() {
            WsEvent::UserOffline {
                user_id,
                last_seen_at,
            } => {
                assert_eq!(user_id, "alice");
                assert_eq!(last_seen_at, 150);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn drain_records_last_seen_for_everyone() {
        let registry = PresenceRegistry::new(16);
        let (h1, _rx1) = handle(1);
        let (h2, _rx2) = handle(2);
        registry.register("alice", h1, 100);
        registry.register("bob", h2, 101);

        let mut drained = registry.drain(200);
        drained.sort();
        assert_eq!(
            drained,
            vec![("alice".to_string(), 200), ("bob".to_string(), 200)]
        );
        assert_eq!(registry.online_count(), 0);
        assert_eq!(registry.last_seen("bob"), Some(200));
    }
}
