//! Pure connection state machine.
//!
//! Computes the legal transition for a relationship pair given the current
//! state and an action, returning the side effects the caller must apply.
//! Nothing here touches storage or transport, so the whole transition table
//! is unit-testable in isolation. Blocking pre-empts every state in this
//! table and is enforced by the engine before `transition` is consulted.

use crate::notify::{NotifyFamily, NotifyKind};

/// Connection state of an ordered pair, from the acting user's perspective.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairState {
    /// No live edge between the pair.
    None,
    /// The actor has a pending request out to the other user.
    Sent,
    /// The other user has a pending request in to the actor.
    Received,
    /// The pair are connected (mutual friends).
    Friend,
}

/// Action a user can take on a connection pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnAction {
    Request,
    Cancel,
    Accept,
    Reject,
    Remove,
}

impl ConnAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnAction::Request => "request",
            ConnAction::Cancel => "cancel",
            ConnAction::Accept => "accept",
            ConnAction::Reject => "reject",
            ConnAction::Remove => "remove",
        }
    }
}

/// Writes the caller must apply to the edge record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeWrite {
    /// Create a new pending edge from the actor to the other user.
    Create,
    /// Mark the existing edge accepted.
    Accept,
    /// Mark the existing edge rejected.
    Reject,
    /// Delete the existing edge outright.
    Delete,
}

/// Side effects of a transition, applied in order by the engine. All
/// notifications and revocations target the non-acting user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SideEffect {
    Edge(EdgeWrite),
    /// Add the pair to both users' connection sets.
    AddConnection,
    /// Remove the pair from both users' connection sets.
    RemoveConnection,
    /// Raise a notification to the other user (subject to dedup).
    Notify(NotifyKind),
    /// Revoke a previously raised notification family (subject to dedup).
    Revoke(NotifyFamily),
}

/// Result of a legal transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub next: PairState,
    pub effects: Vec<SideEffect>,
}

/// Illegal `(state, action)` combinations, reported to the caller without
/// any mutation having been performed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionError {
    /// Request while one is already pending from the actor.
    AlreadyPending,
    /// Request or accept while the pair are already friends.
    AlreadyFriends,
    /// Cancel/accept/reject with no pending request in the right direction.
    NoPendingRequest,
    /// Remove when the pair are not friends.
    NotFriends,
}

impl std::fmt::Display for TransitionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransitionError::AlreadyPending => write!(f, "a connection request is already pending"),
            TransitionError::AlreadyFriends => write!(f, "users are already connected"),
            TransitionError::NoPendingRequest => write!(f, "no pending connection request"),
            TransitionError::NotFriends => write!(f, "users are not connected"),
        }
    }
}

impl std::error::Error for TransitionError {}

/// The transition table. One function, every branch; action handlers never
/// re-derive any of this locally.
pub fn transition(current: PairState, action: ConnAction) -> Result<Transition, TransitionError> {
    use ConnAction::*;
    use PairState::*;

    match (current, action) {
        (None, Request) => Ok(Transition {
            next: Sent,
            effects: vec![
                SideEffect::Edge(EdgeWrite::Create),
                SideEffect::Notify(NotifyKind::FriendRequest),
            ],
        }),
        (Sent, Request) => Err(TransitionError::AlreadyPending),
        // Symmetric race: the other user's request is still pending, so a
        // request in the opposite direction auto-accepts instead of trying
        // to create a second edge.
        (Received, Request) => Ok(Transition {
            next: Friend,
            effects: vec![
                SideEffect::Edge(EdgeWrite::Accept),
                SideEffect::AddConnection,
                SideEffect::Notify(NotifyKind::FriendAccept),
            ],
        }),
        (Friend, Request) => Err(TransitionError::AlreadyFriends),

        (Sent, Cancel) => Ok(Transition {
            next: None,
            effects: vec![
                SideEffect::Edge(EdgeWrite::Delete),
                SideEffect::Revoke(NotifyFamily::Connection),
            ],
        }),
        (None | Received | Friend, Cancel) => Err(TransitionError::NoPendingRequest),

        (Received, Accept) => Ok(Transition {
            next: Friend,
            effects: vec![
                SideEffect::Edge(EdgeWrite::Accept),
                SideEffect::AddConnection,
                SideEffect::Notify(NotifyKind::FriendAccept),
            ],
        }),
        (Friend, Accept) => Err(TransitionError::AlreadyFriends),
        (None | Sent, Accept) => Err(TransitionError::NoPendingRequest),

        // Rejection is silent: the edge is marked rejected and no
        // notification is raised.
        (Received, Reject) => Ok(Transition {
            next: None,
            effects: vec![SideEffect::Edge(EdgeWrite::Reject)],
        }),
        (None | Sent | Friend, Reject) => Err(TransitionError::NoPendingRequest),

        (Friend, Remove) => Ok(Transition {
            next: None,
            effects: vec![
                SideEffect::Edge(EdgeWrite::Delete),
                SideEffect::RemoveConnection,
            ],
        }),
        (None | Sent | Received, Remove) => Err(TransitionError::NotFriends),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_from_none_creates_pending_edge_and_notifies() {
        let t = transition(PairState::None, ConnAction::Request).unwrap();
        assert_eq!(t.next, PairState::Sent);
        assert_eq!(
            t.effects,
            vec![
                SideEffect::Edge(EdgeWrite::Create),
                SideEffect::Notify(NotifyKind::FriendRequest),
            ]
        );
    }

    #[test]
    fn duplicate_request_is_a_conflict() {
        assert_eq!(
            transition(PairState::Sent, ConnAction::Request),
            Err(TransitionError::AlreadyPending)
        );
        assert_eq!(
            transition(PairState::Friend, ConnAction::Request),
            Err(TransitionError::AlreadyFriends)
        );
    }

    #[test]
    fn symmetric_race_auto_accepts() {
        // A requests while B's earlier request to A is still pending: the
        // result is a single friend edge, not two pending edges.
        let t = transition(PairState::Received, ConnAction::Request).unwrap();
        assert_eq!(t.next, PairState::Friend);
        assert!(t.effects.contains(&SideEffect::Edge(EdgeWrite::Accept)));
        assert!(t.effects.contains(&SideEffect::AddConnection));
        assert!(t
            .effects
            .contains(&SideEffect::Notify(NotifyKind::FriendAccept)));
    }

    #[test]
    fn cancel_deletes_edge_and_revokes_notification() {
        let t = transition(PairState::Sent, ConnAction::Cancel).unwrap();
        assert_eq!(t.next, PairState::None);
        assert_eq!(
            t.effects,
            vec![
                SideEffect::Edge(EdgeWrite::Delete),
                SideEffect::Revoke(NotifyFamily::Connection),
            ]
        );
        // Cancelling someone else's request (or nothing) is illegal.
        assert_eq!(
            transition(PairState::Received, ConnAction::Cancel),
            Err(TransitionError::NoPendingRequest)
        );
        assert_eq!(
            transition(PairState::None, ConnAction::Cancel),
            Err(TransitionError::NoPendingRequest)
        );
    }

    #[test]
    fn accept_requires_received_request() {
        let t = transition(PairState::Received, ConnAction::Accept).unwrap();
        assert_eq!(t.next, PairState::Friend);

        // The sender cannot accept their own request.
        assert_eq!(
            transition(PairState::Sent, ConnAction::Accept),
            Err(TransitionError::NoPendingRequest)
        );
        assert_eq!(
            transition(PairState::Friend, ConnAction::Accept),
            Err(TransitionError::AlreadyFriends)
        );
    }

    #[test]
    fn reject_is_silent() {
        let t = transition(PairState::Received, ConnAction::Reject).unwrap();
        assert_eq!(t.next, PairState::None);
        assert_eq!(t.effects, vec![SideEffect::Edge(EdgeWrite::Reject)]);
        assert!(!t
            .effects
            .iter()
            .any(|e| matches!(e, SideEffect::Notify(_))));
    }

    #[test]
    fn remove_requires_friendship() {
        let t = transition(PairState::Friend, ConnAction::Remove).unwrap();
        assert_eq!(t.next, PairState::None);
        assert!(t.effects.contains(&SideEffect::RemoveConnection));

        assert_eq!(
            transition(PairState::Sent, ConnAction::Remove),
            Err(TransitionError::NotFriends)
        );
    }
}
