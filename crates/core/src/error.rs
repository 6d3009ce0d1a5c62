//! Error types for the signalling layer

use crate::protocol::error_codes;

/// Result type alias using the signalling error
pub type Result<T> = std::result::Result<T, SignalError>;

/// Errors that can occur in signalling operations
#[derive(Debug, thiserror::Error)]
pub enum SignalError {
    /// Requested peer id is already held by a connected peer
    #[error("peer id already taken: {0}")]
    PeerIdTaken(String),

    /// `connect` was invoked on a facade that is already connected
    #[error("already connected to a coordinator")]
    AlreadyConnected,

    /// Operation requires a connected facade
    #[error("not connected to a coordinator")]
    NotConnected,

    /// Target peer is not in the active peer set
    #[error("unknown peer: {0}")]
    UnknownPeer(String),

    /// Connection id does not reference an in-flight session
    #[error("unknown connection: {0}")]
    UnknownConnection(String),

    /// Session exists but is in the wrong state for the operation
    #[error("invalid session state: {0}")]
    InvalidState(String),

    /// Negotiation timed out before the target answered
    #[error("negotiation timed out")]
    Timeout,

    /// The other participant disconnected before the session completed
    #[error("target peer disconnected")]
    TargetDisconnected,

    /// No reply from the coordinator within the configured window
    #[error("coordinator unreachable")]
    CoordinatorUnreachable,

    /// A local `disconnect` released this pending operation
    #[error("disconnected while the operation was in flight")]
    Disconnected,

    /// The channel to the coordinator is gone
    #[error("signalling channel closed")]
    ChannelClosed,

    /// Invalid configuration parameter
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Malformed or unexpected wire traffic
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl SignalError {
    /// True for precondition violations detected without a network round trip
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            SignalError::AlreadyConnected
                | SignalError::NotConnected
                | SignalError::UnknownPeer(_)
                | SignalError::UnknownConnection(_)
                | SignalError::InvalidState(_)
                | SignalError::PeerIdTaken(_)
        )
    }

    /// True if the error ended an in-flight negotiation
    pub fn is_session_fatal(&self) -> bool {
        matches!(
            self,
            SignalError::Timeout
                | SignalError::TargetDisconnected
                | SignalError::Disconnected
                | SignalError::CoordinatorUnreachable
        )
    }

    /// JSON-RPC error code carried on the wire for this error
    pub fn wire_code(&self) -> i32 {
        match self {
            SignalError::UnknownPeer(_) => error_codes::PEER_NOT_FOUND,
            SignalError::PeerIdTaken(_) => error_codes::PEER_ID_TAKEN,
            SignalError::AlreadyConnected => error_codes::ALREADY_REGISTERED,
            SignalError::NotConnected => error_codes::NOT_REGISTERED,
            SignalError::UnknownConnection(_) => error_codes::UNKNOWN_CONNECTION,
            SignalError::InvalidState(_) => error_codes::INVALID_STATE,
            SignalError::TargetDisconnected => error_codes::TARGET_DISCONNECTED,
            SignalError::Protocol(_) => error_codes::INVALID_REQUEST,
            _ => error_codes::INTERNAL_ERROR,
        }
    }

    /// Reconstruct an error from a wire code and message
    pub fn from_wire(code: i32, message: String) -> Self {
        match code {
            error_codes::PEER_NOT_FOUND => SignalError::UnknownPeer(message),
            error_codes::PEER_ID_TAKEN => SignalError::PeerIdTaken(message),
            error_codes::ALREADY_REGISTERED => SignalError::AlreadyConnected,
            error_codes::NOT_REGISTERED => SignalError::NotConnected,
            error_codes::UNKNOWN_CONNECTION => SignalError::UnknownConnection(message),
            error_codes::INVALID_STATE => SignalError::InvalidState(message),
            error_codes::TARGET_DISCONNECTED => SignalError::TargetDisconnected,
            _ => SignalError::Protocol(format!("{}: {}", code, message)),
        }
    }
}
