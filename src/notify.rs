//! Notification dedup window logic.
//!
//! A user rapidly toggling follow/unfollow or hammering the like button must
//! not spam the receiver with near-duplicate notifications. Per dedup key
//! `(sender, receiver, family)` at most one record exists, and repeated
//! actions inside the window rewrite it in place instead of creating more.
//!
//! The whole merge-vs-delete-vs-fresh policy lives in [`decide`]; every
//! action site feeds its outcome through [`Notifier::apply`] so there is
//! exactly one implementation of the branching.

use crate::dispatch;
use crate::presence::PresenceRegistry;
use crate::storage::{NotificationRow, Storage, StorageError};

/// Window within which repeated actions on the same key are merged rather
/// than treated as distinct events.
pub const DEDUP_WINDOW_SECS: u64 = 7;

/// Dedup key type-family. Raise and revoke actions on the same family hit
/// the same record regardless of the concrete kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyFamily {
    Follow,
    Connection,
    Like,
    Message,
}

impl NotifyFamily {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotifyFamily::Follow => "follow",
            NotifyFamily::Connection => "connection",
            NotifyFamily::Like => "like",
            NotifyFamily::Message => "message",
        }
    }
}

/// Concrete notification variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyKind {
    Follow,
    FriendRequest,
    FriendAccept,
    Like,
    Message,
}

impl NotifyKind {
    pub fn family(&self) -> NotifyFamily {
        match self {
            NotifyKind::Follow => NotifyFamily::Follow,
            NotifyKind::FriendRequest | NotifyKind::FriendAccept => NotifyFamily::Connection,
            NotifyKind::Like => NotifyFamily::Like,
            NotifyKind::Message => NotifyFamily::Message,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            NotifyKind::Follow => "follow",
            NotifyKind::FriendRequest => "friend_request",
            NotifyKind::FriendAccept => "friend_accept",
            NotifyKind::Like => "like",
            NotifyKind::Message => "message",
        }
    }

    /// The hidden/cancelled variant a reversal rewrites the record to.
    pub fn withdrawn_str(family: NotifyFamily) -> &'static str {
        match family {
            NotifyFamily::Follow => "follow_withdrawn",
            NotifyFamily::Connection => "request_withdrawn",
            NotifyFamily::Like => "like_withdrawn",
            NotifyFamily::Message => "message_withdrawn",
        }
    }
}

/// What the caller wants to do to the key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DedupAction {
    /// A new occurrence of the event.
    Raise(NotifyKind),
    /// A reversal of a prior occurrence (unfollow, cancel, unlike).
    Revoke(NotifyFamily),
}

/// Outcome of the dedup decision, consumed uniformly by [`Notifier::apply`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DedupDecision {
    /// No fresh copy exists: write the record (insert, or rewrite-as-fresh
    /// when an aged row occupies the key) and deliver live.
    Create,
    /// A fresh copy exists: rewrite kind/created_at/is_read in place and
    /// suppress the live delivery.
    MergeInPlace,
    /// Reversal inside the window: rewrite to the hidden variant rather than
    /// deleting, since a live delivery may be racing.
    Suppress,
    /// Reversal outside the window: delete the record outright so a stale
    /// duplicate does not linger unread.
    Delete,
    /// Reversal with no record: nothing to do.
    Ignore,
}

/// The one decision function, keyed by record presence, record age, and
/// action type.
pub fn decide(existing_age: Option<u64>, action: &DedupAction) -> DedupDecision {
    match (action, existing_age) {
        (DedupAction::Raise(_), None) => DedupDecision::Create,
        (DedupAction::Raise(_), Some(age)) if age < DEDUP_WINDOW_SECS => DedupDecision::MergeInPlace,
        (DedupAction::Raise(_), Some(_)) => DedupDecision::Create,
        (DedupAction::Revoke(_), None) => DedupDecision::Ignore,
        (DedupAction::Revoke(_), Some(age)) if age < DEDUP_WINDOW_SECS => DedupDecision::Suppress,
        (DedupAction::Revoke(_), Some(_)) => DedupDecision::Delete,
    }
}

/// Applies dedup decisions: storage writes plus (for `Create`) the live
/// delivery hand-off. The single application site for the policy.
pub struct Notifier;

impl Notifier {
    /// Run `action` from `sender` to `receiver` through the dedup window.
    /// Returns whether a live delivery was attempted.
    pub fn apply(
        storage: &Storage,
        presence: &PresenceRegistry,
        sender: &str,
        receiver: &str,
        action: DedupAction,
        body: Option<&str>,
        now: u64,
    ) -> Result<bool, StorageError> {
        let family = match action {
            DedupAction::Raise(kind) => kind.family(),
            DedupAction::Revoke(family) => family,
        };
        let existing = storage.find_notification(receiver, sender, family.as_str())?;
        let age = existing.as_ref().map(|n| now.saturating_sub(n.created_at));

        match (decide(age, &action), action, existing) {
            (DedupDecision::Create, DedupAction::Raise(kind), existing) => {
                let row = match existing {
                    Some(old) => {
                        // Aged row occupies the key: rewrite as fresh.
                        storage.rewrite_notification(
                            old.id,
                            kind.as_str(),
                            body,
                            now,
                            false,
                            false,
                        )?;
                        NotificationRow {
                            kind: kind.as_str().to_string(),
                            body: body.map(|b| b.to_string()),
                            created_at: now,
                            is_read: false,
                            hidden: false,
                            ..old
                        }
                    }
                    None => {
                        let mut row = NotificationRow {
                            id: 0,
                            receiver_id: receiver.to_string(),
                            sender_id: sender.to_string(),
                            family: family.as_str().to_string(),
                            kind: kind.as_str().to_string(),
                            body: body.map(|b| b.to_string()),
                            created_at: now,
                            is_read: false,
                            hidden: false,
                        };
                        row.id = storage.insert_notification(&row)?;
                        row
                    }
                };
                dispatch::deliver(presence, storage, &row);
                Ok(true)
            }
            (DedupDecision::MergeInPlace, DedupAction::Raise(kind), Some(old)) => {
                // The receiver already has a fresh copy; refresh it silently.
                storage.rewrite_notification(old.id, kind.as_str(), body, now, false, false)?;
                Ok(false)
            }
            (DedupDecision::Suppress, _, Some(old)) => {
                storage.rewrite_notification(
                    old.id,
                    NotifyKind::withdrawn_str(family),
                    old.body.as_deref(),
                    old.created_at,
                    old.is_read,
                    true,
                )?;
                Ok(false)
            }
            (DedupDecision::Delete, _, Some(old)) => {
                storage.delete_notification(old.id)?;
                Ok(false)
            }
            // Ignore, plus decision/record combinations decide() never emits.
            _ => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const W: u64 = DEDUP_WINDOW_SECS;

    #[test]
    fn raise_with_no_record_creates() {
        assert_eq!(
            decide(None, &DedupAction::Raise(NotifyKind::Follow)),
            DedupDecision::Create
        );
    }

    #[test]
    fn raise_inside_window_merges_and_suppresses_delivery() {
        assert_eq!(
            decide(Some(0), &DedupAction::Raise(NotifyKind::Follow)),
            DedupDecision::MergeInPlace
        );
        assert_eq!(
            decide(Some(W - 1), &DedupAction::Raise(NotifyKind::Like)),
            DedupDecision::MergeInPlace
        );
    }

    #[test]
    fn raise_at_or_past_window_is_fresh() {
        assert_eq!(
            decide(Some(W), &DedupAction::Raise(NotifyKind::Follow)),
            DedupDecision::Create
        );
        assert_eq!(
            decide(Some(W * 10), &DedupAction::Raise(NotifyKind::Message)),
            DedupDecision::Create
        );
    }

    #[test]
    fn revoke_inside_window_hides_rather_than_deletes() {
        assert_eq!(
            decide(Some(2), &DedupAction::Revoke(NotifyFamily::Follow)),
            DedupDecision::Suppress
        );
    }

    #[test]
    fn revoke_outside_window_deletes() {
        assert_eq!(
            decide(Some(W), &DedupAction::Revoke(NotifyFamily::Follow)),
            DedupDecision::Delete
        );
    }

    #[test]
    fn revoke_without_record_is_ignored() {
        assert_eq!(
            decide(None, &DedupAction::Revoke(NotifyFamily::Like)),
            DedupDecision::Ignore
        );
    }

    #[test]
    fn kinds_map_to_families() {
        assert_eq!(NotifyKind::FriendRequest.family(), NotifyFamily::Connection);
        assert_eq!(NotifyKind::FriendAccept.family(), NotifyFamily::Connection);
        assert_eq!(NotifyKind::Follow.family(), NotifyFamily::Follow);
        assert_eq!(NotifyKind::Like.family(), NotifyFamily::Like);
    }
}
