//! Connection engine: the controller behind every client-facing graph
//! operation.
//!
//! Validates input, enforces the block precondition, re-reads the current
//! edge state from storage (client-provided state is never authoritative),
//! runs the pure transition function, and applies the resulting side effects
//! in order: edge writes first, then connection-set writes, then deduped
//! notifications.

use crate::notify::{DedupAction, Notifier, NotifyFamily, NotifyKind};
use crate::presence::PresenceRegistry;
use crate::state_machine::{transition, ConnAction, EdgeWrite, PairState, SideEffect, Transition};
use crate::storage::{EdgeRow, EdgeStatus, Storage, StorageError, UserRow};

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors surfaced synchronously to the triggering request. Transport
/// failures never appear here; live-push problems are swallowed downstream.
#[derive(Debug)]
pub enum EngineError {
    /// Rejected before touching storage: self-action, empty target id.
    Validation(String),
    /// Action not legal from the current state; no mutation performed.
    StateConflict(String),
    /// The pair is blocked in at least one direction.
    Blocked,
    /// Referenced user or edge does not exist.
    NotFound(String),
    /// Storage-layer failure.
    Storage(StorageError),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::Validation(msg) => write!(f, "invalid request: {msg}"),
            EngineError::StateConflict(msg) => write!(f, "conflict: {msg}"),
            EngineError::Blocked => write!(f, "action not allowed between blocked users"),
            EngineError::NotFound(msg) => write!(f, "not found: {msg}"),
            EngineError::Storage(e) => write!(f, "storage error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}

impl From<StorageError> for EngineError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::NotFound(msg) => EngineError::NotFound(msg),
            other => EngineError::Storage(other),
        }
    }
}

/// Success result: a human-readable message for the UI layer.
#[derive(Debug, Clone)]
pub struct ActionOutcome {
    pub message: String,
}

impl ActionOutcome {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Borrowed view of the engine's collaborators for one operation.
pub struct EngineCtx<'a> {
    pub storage: &'a Storage,
    pub presence: &'a PresenceRegistry,
}

// ---------------------------------------------------------------------------
// Validation helpers
// ---------------------------------------------------------------------------

fn validate_pair(actor: &str, target: &str) -> Result<(), EngineError> {
    if target.trim().is_empty() {
        return Err(EngineError::Validation("target user id is empty".into()));
    }
    if actor == target {
        return Err(EngineError::Validation(
            "cannot perform this action on yourself".into(),
        ));
    }
    Ok(())
}

fn ensure_not_blocked(cx: &EngineCtx<'_>, a: &str, b: &str) -> Result<(), EngineError> {
    if cx.storage.blocked_either_way(a, b)? {
        return Err(EngineError::Blocked);
    }
    Ok(())
}

/// Current pair state from the actor's perspective, re-read from storage
/// immediately before every mutation.
fn read_pair_state(
    cx: &EngineCtx<'_>,
    actor: &str,
    other: &str,
) -> Result<(PairState, Option<EdgeRow>), EngineError> {
    let edge = cx.storage.find_edge(actor, other)?;
    let state = match &edge {
        Some(e) => match e.status {
            EdgeStatus::Pending if e.from_user == actor => PairState::Sent,
            EdgeStatus::Pending => PairState::Received,
            EdgeStatus::Accepted => PairState::Friend,
            // Rejected and removed rows occupy the pair slot but carry no
            // live relationship.
            EdgeStatus::Rejected | EdgeStatus::Removed => PairState::None,
        },
        None => PairState::None,
    };
    Ok((state, edge))
}

/// Apply a transition's side effects in order.
fn apply_transition(
    cx: &EngineCtx<'_>,
    actor: &str,
    other: &str,
    existing: Option<&EdgeRow>,
    t: &Transition,
    now: u64,
) -> Result<(), EngineError> {
    for effect in &t.effects {
        match effect {
            SideEffect::Edge(EdgeWrite::Create) => match existing {
                // A rejected/removed row still holds the pair slot: reuse it.
                Some(edge) => {
                    cx.storage.reset_edge(edge.id, actor, other, now)?;
                }
                None => match cx.storage.insert_edge(actor, other, now) {
                    Ok(_) => {}
                    // A concurrent request won the unique-pair race.
                    Err(StorageError::AlreadyExists(_)) => {
                        return Err(EngineError::StateConflict(
                            "a connection request is already pending".into(),
                        ))
                    }
                    Err(e) => return Err(e.into()),
                },
            },
            SideEffect::Edge(EdgeWrite::Accept) => {
                let edge = existing.ok_or_else(|| {
                    EngineError::NotFound("connection request edge".into())
                })?;
                cx.storage.set_edge_status(edge.id, EdgeStatus::Accepted, now)?;
            }
            SideEffect::Edge(EdgeWrite::Reject) => {
                let edge = existing.ok_or_else(|| {
                    EngineError::NotFound("connection request edge".into())
                })?;
                cx.storage.set_edge_status(edge.id, EdgeStatus::Rejected, now)?;
            }
            SideEffect::Edge(EdgeWrite::Delete) => {
                let edge = existing
                    .ok_or_else(|| EngineError::NotFound("connection edge".into()))?;
                cx.storage.delete_edge(edge.id)?;
            }
            SideEffect::AddConnection => {
                cx.storage.add_connection(actor, other, now)?;
            }
            SideEffect::RemoveConnection => {
                cx.storage.remove_connection(actor, other)?;
            }
            SideEffect::Notify(kind) => {
                Notifier::apply(
                    cx.storage,
                    cx.presence,
                    actor,
                    other,
                    DedupAction::Raise(*kind),
                    None,
                    now,
                )?;
            }
            SideEffect::Revoke(family) => {
                Notifier::apply(
                    cx.storage,
                    cx.presence,
                    actor,
                    other,
                    DedupAction::Revoke(*family),
                    None,
                    now,
                )?;
            }
        }
    }
    Ok(())
}

/// Run one connection action end to end: validate, block-check (request
/// only), re-read state, transition, apply.
fn run_connection_action(
    cx: &EngineCtx<'_>,
    actor: &str,
    other: &str,
    action: ConnAction,
    now: u64,
) -> Result<Transition, EngineError> {
    validate_pair(actor, other)?;
    cx.storage.require_user(other)?;
    if action == ConnAction::Request {
        ensure_not_blocked(cx, actor, other)?;
    }

    let (state, edge) = read_pair_state(cx, actor, other)?;
    let t = transition(state, action)
        .map_err(|e| EngineError::StateConflict(e.to_string()))?;
    apply_transition(cx, actor, other, edge.as_ref(), &t, now)?;

    crate::wlog!(
        "connection: {} {} -> {} (now {:?})",
        action.as_str(),
        crate::logging::user_id(actor),
        crate::logging::user_id(other),
        t.next
    );
    Ok(t)
}

// ---------------------------------------------------------------------------
// Follow operations
// ---------------------------------------------------------------------------

/// Follow a user. Idempotent: a second call reports "already following" and
/// raises no duplicate notification.
pub fn follow(
    cx: &EngineCtx<'_>,
    actor: &str,
    target: &str,
    now: u64,
) -> Result<ActionOutcome, EngineError> {
    validate_pair(actor, target)?;
    cx.storage.require_user(target)?;
    ensure_not_blocked(cx, actor, target)?;

    if !cx.storage.add_follow(actor, target, now)? {
        return Ok(ActionOutcome::new("already following"));
    }
    Notifier::apply(
        cx.storage,
        cx.presence,
        actor,
        target,
        DedupAction::Raise(NotifyKind::Follow),
        None,
        now,
    )?;
    crate::wlog!(
        "follow: {} -> {}",
        crate::logging::user_id(actor),
        crate::logging::user_id(target)
    );
    Ok(ActionOutcome::new("now following"))
}

/// Unfollow a user. Idempotent; reverses the follow notification through
/// the dedup window (hidden inside the window, deleted outside it).
pub fn unfollow(
    cx: &EngineCtx<'_>,
    actor: &str,
    target: &str,
    now: u64,
) -> Result<ActionOutcome, EngineError> {
    validate_pair(actor, target)?;
    cx.storage.require_user(target)?;

    if !cx.storage.remove_follow(actor, target)? {
        return Ok(ActionOutcome::new("not following"));
    }
    Notifier::apply(
        cx.storage,
        cx.presence,
        actor,
        target,
        DedupAction::Revoke(NotifyFamily::Follow),
        None,
        now,
    )?;
    crate::wlog!(
        "unfollow: {} -/-> {}",
        crate::logging::user_id(actor),
        crate::logging::user_id(target)
    );
    Ok(ActionOutcome::new("unfollowed"))
}

// ---------------------------------------------------------------------------
// Connection request operations
// ---------------------------------------------------------------------------

pub fn send_request(
    cx: &EngineCtx<'_>,
    actor: &str,
    other: &str,
    now: u64,
) -> Result<ActionOutcome, EngineError> {
    let t = run_connection_action(cx, actor, other, ConnAction::Request, now)?;
    // A request against a pending reverse request auto-accepts.
    if t.next == PairState::Friend {
        Ok(ActionOutcome::new("mutual request, you are now connected"))
    } else {
        Ok(ActionOutcome::new("connection request sent"))
    }
}

pub fn cancel_request(
    cx: &EngineCtx<'_>,
    actor: &str,
    other: &str,
    now: u64,
) -> Result<ActionOutcome, EngineError> {
    run_connection_action(cx, actor, other, ConnAction::Cancel, now)?;
    Ok(ActionOutcome::new("connection request cancelled"))
}

pub fn accept_request(
    cx: &EngineCtx<'_>,
    actor: &str,
    other: &str,
    now: u64,
) -> Result<ActionOutcome, EngineError> {
    run_connection_action(cx, actor, other, ConnAction::Accept, now)?;
    Ok(ActionOutcome::new("connection request accepted"))
}

pub fn reject_request(
    cx: &EngineCtx<'_>,
    actor: &str,
    other: &str,
    now: u64,
) -> Result<ActionOutcome, EngineError> {
    run_connection_action(cx, actor, other, ConnAction::Reject, now)?;
    Ok(ActionOutcome::new("connection request rejected"))
}

pub fn remove_friend(
    cx: &EngineCtx<'_>,
    actor: &str,
    other: &str,
    now: u64,
) -> Result<ActionOutcome, EngineError> {
    run_connection_action(cx, actor, other, ConnAction::Remove, now)?;
    Ok(ActionOutcome::new("connection removed"))
}

// ---------------------------------------------------------------------------
// Block operations
// ---------------------------------------------------------------------------

/// Block a user: cascade-removes follows, the mutual connection, and any
/// edge between the pair, then drops pending connection notifications in
/// both directions so no stale friend-request toast survives.
pub fn block(
    cx: &EngineCtx<'_>,
    actor: &str,
    target: &str,
    now: u64,
) -> Result<ActionOutcome, EngineError> {
    validate_pair(actor, target)?;
    cx.storage.require_user(target)?;

    cx.storage.block_cascade(actor, target, now)?;
    let family = NotifyFamily::Connection.as_str();
    cx.storage.delete_notification_by_key(target, actor, family)?;
    cx.storage.delete_notification_by_key(actor, target, family)?;

    crate::wlog!(
        "block: {} blocked {}",
        crate::logging::user_id(actor),
        crate::logging::user_id(target)
    );
    Ok(ActionOutcome::new("user blocked"))
}

/// Unblock a user. Prior follow/friend state is not restored.
pub fn unblock(
    cx: &EngineCtx<'_>,
    actor: &str,
    target: &str,
) -> Result<ActionOutcome, EngineError> {
    validate_pair(actor, target)?;
    cx.storage.require_user(target)?;

    if !cx.storage.remove_block(actor, target)? {
        return Err(EngineError::StateConflict("user is not blocked".into()));
    }
    crate::wlog!(
        "unblock: {} unblocked {}",
        crate::logging::user_id(actor),
        crate::logging::user_id(target)
    );
    Ok(ActionOutcome::new("user unblocked"))
}

// ---------------------------------------------------------------------------
// Interaction events (content layer)
// ---------------------------------------------------------------------------

/// A like from `actor` on `owner`'s content. Repeated taps inside the dedup
/// window merge into one notification.
pub fn notify_like(
    cx: &EngineCtx<'_>,
    actor: &str,
    owner: &str,
    body: Option<&str>,
    now: u64,
) -> Result<ActionOutcome, EngineError> {
    validate_pair(actor, owner)?;
    cx.storage.require_user(owner)?;
    ensure_not_blocked(cx, actor, owner)?;

    Notifier::apply(
        cx.storage,
        cx.presence,
        actor,
        owner,
        DedupAction::Raise(NotifyKind::Like),
        body,
        now,
    )?;
    Ok(ActionOutcome::new("like recorded"))
}

/// A like reversal (un-like) from `actor`.
pub fn revoke_like(
    cx: &EngineCtx<'_>,
    actor: &str,
    owner: &str,
    now: u64,
) -> Result<ActionOutcome, EngineError> {
    validate_pair(actor, owner)?;
    cx.storage.require_user(owner)?;

    Notifier::apply(
        cx.storage,
        cx.presence,
        actor,
        owner,
        DedupAction::Revoke(NotifyFamily::Like),
        None,
        now,
    )?;
    Ok(ActionOutcome::new("like withdrawn"))
}

/// Message-arrival notification from the (external) messaging layer.
pub fn notify_message(
    cx: &EngineCtx<'_>,
    sender: &str,
    receiver: &str,
    preview: Option<&str>,
    now: u64,
) -> Result<ActionOutcome, EngineError> {
    validate_pair(sender, receiver)?;
    cx.storage.require_user(receiver)?;
    ensure_not_blocked(cx, sender, receiver)?;

    Notifier::apply(
        cx.storage,
        cx.presence,
        sender,
        receiver,
        DedupAction::Raise(NotifyKind::Message),
        preview,
        now,
    )?;
    Ok(ActionOutcome::new("message notification recorded"))
}

// ---------------------------------------------------------------------------
// Queries
// ---------------------------------------------------------------------------

/// Full relationship status between the actor and another user, including
/// presence.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ConnectionStatus {
    pub following: bool,
    pub followed_by: bool,
    /// "none", "sent", "received", or "friend".
    pub connection: &'static str,
    pub blocked: bool,
    pub blocked_by: bool,
    pub online: bool,
    pub last_seen_at: Option<u64>,
}

pub fn connection_status(
    cx: &EngineCtx<'_>,
    actor: &str,
    other: &str,
) -> Result<ConnectionStatus, EngineError> {
    validate_pair(actor, other)?;
    let user = cx.storage.require_user(other)?;

    let (state, _) = read_pair_state(cx, actor, other)?;
    let connection = match state {
        PairState::None => "none",
        PairState::Sent => "sent",
        PairState::Received => "received",
        PairState::Friend => "friend",
    };
    // In-memory last-seen wins over the persisted value; the persisted one
    // covers process restarts.
    let last_seen_at = cx.presence.last_seen(other).or(user.last_seen_at);

    Ok(ConnectionStatus {
        following: cx.storage.is_following(actor, other)?,
        followed_by: cx.storage.is_following(other, actor)?,
        connection,
        blocked: cx.storage.has_block(actor, other)?,
        blocked_by: cx.storage.has_block(other, actor)?,
        online: cx.presence.is_online(other),
        last_seen_at,
    })
}

/// Which membership list to fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListKind {
    Followers,
    Following,
    Friends,
    Blocked,
    PendingIncoming,
    PendingOutgoing,
}

impl ListKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "followers" => Some(ListKind::Followers),
            "following" => Some(ListKind::Following),
            "friends" => Some(ListKind::Friends),
            "blocked" => Some(ListKind::Blocked),
            "pending-incoming" => Some(ListKind::PendingIncoming),
            "pending-outgoing" => Some(ListKind::PendingOutgoing),
            _ => None,
        }
    }
}

/// A membership list: user profiles for set-based lists, edges for pending
/// request lists.
pub enum ConnectionList {
    Users(Vec<UserRow>),
    Pending(Vec<EdgeRow>),
}

pub fn connections_list(
    cx: &EngineCtx<'_>,
    user: &str,
    kind: ListKind,
) -> Result<ConnectionList, EngineError> {
    let list = match kind {
        ListKind::Followers => ConnectionList::Users(cx.storage.list_followers(user)?),
        ListKind::Following => ConnectionList::Users(cx.storage.list_following(user)?),
        ListKind::Friends => ConnectionList::Users(cx.storage.list_friends(user)?),
        ListKind::Blocked => ConnectionList::Users(cx.storage.list_blocked(user)?),
        ListKind::PendingIncoming => {
            ConnectionList::Pending(cx.storage.list_pending_edges(user, true)?)
        }
        ListKind::PendingOutgoing => {
            ConnectionList::Pending(cx.storage.list_pending_edges(user, false)?)
        }
    };
    Ok(list)
}
