//! In-flight negotiation session table
//!
//! A session exists from the moment an offer is accepted until it reaches a
//! terminal state; terminal entries are removed immediately, so a lookup
//! miss answers "unknown connection" for both never-existed and
//! already-finished ids. Connection ids are never reissued.

use crate::error::{Result, SignalError};
use crate::protocol::{ConnectionId, PeerId, SessionKind};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::task::AbortHandle;
use tracing::debug;

/// Lifecycle of one negotiation session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Created, offer not yet delivered to the target
    Pending,
    /// Offer delivered, waiting for the target's answer
    AwaitingAnswer,
    /// Answer delivered back to the initiator
    Established,
    /// Completed session torn down by a participant's disconnection
    Closed,
    /// Target explicitly refused the offer
    Rejected,
    /// No answer within the negotiation window
    TimedOut,
    /// A participant disconnected before the session was established
    Aborted,
}

impl SessionState {
    /// Whether the state admits no further transitions
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionState::Closed
                | SessionState::Rejected
                | SessionState::TimedOut
                | SessionState::Aborted
        )
    }

    fn can_transition_to(self, to: SessionState) -> bool {
        match (self, to) {
            (SessionState::Pending, SessionState::AwaitingAnswer) => true,
            (SessionState::AwaitingAnswer, SessionState::Established) => true,
            (SessionState::Established, SessionState::Closed) => true,
            (
                from,
                SessionState::Rejected | SessionState::TimedOut | SessionState::Aborted,
            ) => !from.is_terminal(),
            _ => false,
        }
    }
}

/// One in-flight negotiation between two peers
#[derive(Debug)]
pub struct Session {
    /// Correlation key for everything belonging to this negotiation
    pub connection_id: ConnectionId,

    /// Peer that issued the offer
    pub initiator: PeerId,

    /// Peer the offer is addressed to
    pub target: PeerId,

    /// Call or raw data exchange
    pub kind: SessionKind,

    /// Current lifecycle state
    pub state: SessionState,

    /// Negotiation timer, armed while AwaitingAnswer
    pub timeout: Option<AbortHandle>,
}

impl Session {
    /// Create a session in the `Pending` state
    pub fn new(
        connection_id: ConnectionId,
        initiator: PeerId,
        target: PeerId,
        kind: SessionKind,
    ) -> Self {
        Self {
            connection_id,
            initiator,
            target,
            kind,
            state: SessionState::Pending,
            timeout: None,
        }
    }

    /// Whether the peer is one of the two participants
    pub fn involves(&self, peer_id: &str) -> bool {
        self.initiator == peer_id || self.target == peer_id
    }

    /// The participant that is not `peer_id`, if `peer_id` participates
    pub fn other_participant(&self, peer_id: &str) -> Option<&str> {
        if self.initiator == peer_id {
            Some(&self.target)
        } else if self.target == peer_id {
            Some(&self.initiator)
        } else {
            None
        }
    }

    /// Move to a new state, enforcing the transition table
    ///
    /// # Errors
    ///
    /// Returns [`SignalError::InvalidState`] for an illegal edge.
    pub fn advance(&mut self, to: SessionState) -> Result<()> {
        if !self.state.can_transition_to(to) {
            return Err(SignalError::InvalidState(format!(
                "{}: {:?} -> {:?}",
                self.connection_id, self.state, to
            )));
        }
        debug!(
            "session {} transition: {:?} -> {:?}",
            self.connection_id, self.state, to
        );
        self.state = to;
        Ok(())
    }

    /// Cancel the negotiation timer, if armed
    pub fn disarm_timeout(&mut self) {
        if let Some(handle) = self.timeout.take() {
            handle.abort();
        }
    }
}

/// Session table: connection id → in-flight session
#[derive(Debug, Default)]
pub struct SessionTable {
    sessions: DashMap<ConnectionId, Session>,
}

impl SessionTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a freshly created session
    ///
    /// # Errors
    ///
    /// Returns [`SignalError::InvalidState`] if the connection id is
    /// already in flight.
    pub fn insert(&self, session: Session) -> Result<()> {
        match self.sessions.entry(session.connection_id.clone()) {
            Entry::Occupied(_) => Err(SignalError::InvalidState(format!(
                "connection id already in flight: {}",
                session.connection_id
            ))),
            Entry::Vacant(slot) => {
                slot.insert(session);
                Ok(())
            }
        }
    }

    /// Run a closure against one session under its shard lock
    ///
    /// The closure must not block or await; it returns whatever summary the
    /// caller needs so message sends can happen after the lock is released.
    pub fn with_session<T>(
        &self,
        connection_id: &str,
        f: impl FnOnce(&mut Session) -> T,
    ) -> Option<T> {
        self.sessions.get_mut(connection_id).map(|mut entry| f(&mut entry))
    }

    /// Remove a session, disarming its timer
    pub fn remove(&self, connection_id: &str) -> Option<Session> {
        self.sessions.remove(connection_id).map(|(_, mut session)| {
            session.disarm_timeout();
            session
        })
    }

    /// Whether the connection id references an in-flight session
    pub fn contains(&self, connection_id: &str) -> bool {
        self.sessions.contains_key(connection_id)
    }

    /// Connection ids of every session the peer participates in
    pub fn sessions_of(&self, peer_id: &str) -> Vec<ConnectionId> {
        self.sessions
            .iter()
            .filter(|entry| entry.value().involves(peer_id))
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Number of in-flight sessions
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether no session is in flight
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
