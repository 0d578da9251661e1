//! Live delivery dispatcher.
//!
//! Routes a freshly created notification to the receiver's session if they
//! are reachable, with the sender's display profile denormalized into the
//! payload. Delivery is fire-and-forget: the durable notification row is the
//! system's actual guarantee, so a failed or impossible push is logged and
//! otherwise ignored; the receiver recovers it on the next pull.

use serde::Serialize;

use crate::presence::PresenceRegistry;
use crate::storage::{NotificationRow, Storage};

/// Sender profile embedded in pushed notification payloads.
#[derive(Debug, Clone, Serialize, Default)]
pub struct SenderProfile {
    pub username: Option<String>,
    pub full_name: Option<String>,
    pub profile_picture: Option<String>,
}

/// Events pushed to connected WebSocket sessions.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WsEvent {
    Notification {
        id: i64,
        kind: String,
        sender_id: String,
        sender_profile: SenderProfile,
        body: Option<String>,
        created_at: u64,
    },
    UserOnline {
        user_id: String,
    },
    UserOffline {
        user_id: String,
        last_seen_at: u64,
    },
}

/// Push a notification to the receiver's live session, exactly once, if one
/// exists. Never an error: offline receivers and dead sessions both fall
/// back to pull-based retrieval.
pub fn deliver(presence: &PresenceRegistry, storage: &Storage, row: &NotificationRow) {
    let Some(handle) = presence.resolve(&row.receiver_id) else {
        return;
    };

    let sender_profile = match storage.get_user(&row.sender_id) {
        Ok(Some(user)) => SenderProfile {
            username: user.username,
            full_name: user.full_name,
            profile_picture: user.profile_picture,
        },
        Ok(None) => SenderProfile::default(),
        Err(e) => {
            crate::wlog!(
                "deliver: failed to load sender profile for {}: {}",
                crate::logging::user_id(&row.sender_id),
                e
            );
            SenderProfile::default()
        }
    };

    let event = WsEvent::Notification {
        id: row.id,
        kind: row.kind.clone(),
        sender_id: row.sender_id.clone(),
        sender_profile,
        body: row.body.clone(),
        created_at: row.created_at,
    };

    if handle.send(event) {
        crate::wlog!(
            "deliver: pushed {} notification {} -> {} ({})",
            row.kind,
            crate::logging::user_id(&row.sender_id),
            crate::logging::user_id(&row.receiver_id),
            crate::logging::session_id(handle.session_id)
        );
    } else {
        // Session task is gone; the record stays queryable.
        crate::wlog!(
            "deliver: session {} for {} is dead, notification stays queued",
            crate::logging::session_id(handle.session_id),
            crate::logging::user_id(&row.receiver_id)
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::presence::SessionHandle;
    use crate::storage::unix_now;
    use tokio::sync::mpsc;

    fn notification(receiver: &str, sender: &str) -> NotificationRow {
        NotificationRow {
            id: 1,
            receiver_id: receiver.to_string(),
            sender_id: sender.to_string(),
            family: "follow".to_string(),
            kind: "follow".to_string(),
            body: None,
            created_at: unix_now(),
            is_read: false,
            hidden: false,
        }
    }

    #[test]
    fn delivers_to_online_receiver_with_profile() {
        let storage = Storage::open_in_memory().unwrap();
        storage
            .upsert_user("alice", Some("alice"), Some("Alice A"), None, unix_now())
            .unwrap();
        let presence = PresenceRegistry::new(16);
        let (tx, mut rx) = mpsc::unbounded_channel();
        presence.register("bob", SessionHandle::new(7, tx), unix_now());

        deliver(&presence, &storage, &notification("bob", "alice"));

        match rx.try_recv().unwrap() {
            WsEvent::Notification {
                kind,
                sender_id,
                sender_profile,
                ..
            } => {
                assert_eq!(kind, "follow");
                assert_eq!(sender_id, "alice");
                assert_eq!(sender_profile.full_name, Some("Alice A".to_string()));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn offline_receiver_is_not_an_error() {
        let storage = Storage::open_in_memory().unwrap();
        let presence = PresenceRegistry::new(16);
        // No session registered: deliver must be a silent no-op.
        deliver(&presence, &storage, &notification("bob", "alice"));
    }

    #[test]
    fn dead_session_is_swallowed() {
        let storage = Storage::open_in_memory().unwrap();
        let presence = PresenceRegistry::new(16);
        let (tx, rx) = mpsc::unbounded_channel();
        presence.register("bob", SessionHandle::new(7, tx), unix_now());
        drop(rx);

        deliver(&presence, &storage, &notification("bob", "alice"));
    }
}
