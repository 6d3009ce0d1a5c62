//! JSON-RPC 2.0 signalling protocol types
//!
//! Every frame that crosses a peer's channel to the coordinator is one of
//! the types defined here. Payloads (`SessionDescription`, `IceCandidate`)
//! are carried verbatim and never interpreted.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// JSON-RPC 2.0 protocol version
pub const JSONRPC_VERSION: &str = "2.0";

/// Opaque peer identity, unique among currently-connected peers
pub type PeerId = String;

/// Correlation key identifying one negotiation session
pub type ConnectionId = String;

/// Allocate a fresh connection id for a new negotiation
pub fn new_connection_id() -> ConnectionId {
    format!("c-{}", Uuid::new_v4())
}

/// Role of a negotiation payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpKind {
    /// Initiating side of the exchange
    Offer,
    /// Replying side of the exchange
    Answer,
}

/// Opaque negotiation payload, carried between peers without inspection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionDescription {
    /// Payload role
    pub kind: SdpKind,

    /// Negotiation data (SDP or any other blob the peers agree on)
    pub sdp: String,
}

impl SessionDescription {
    /// Build an offer payload
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Offer,
            sdp: sdp.into(),
        }
    }

    /// Build an answer payload
    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Answer,
            sdp: sdp.into(),
        }
    }
}

/// Opaque connectivity candidate, scoped to one connection id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IceCandidate {
    /// Candidate string
    pub candidate: String,

    /// SDP media line identifier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,

    /// SDP media line index
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_m_line_index: Option<u16>,
}

/// What the initiating peer wants from a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionKind {
    /// Audio/video call
    Call,
    /// Raw data channel
    ExchangeData,
}

/// Standard JSON-RPC 2.0 error codes plus signalling-specific codes
pub mod error_codes {
    /// Invalid JSON was received
    pub const PARSE_ERROR: i32 = -32700;

    /// The JSON sent is not a valid request object
    pub const INVALID_REQUEST: i32 = -32600;

    /// The method does not exist / is not available
    pub const METHOD_NOT_FOUND: i32 = -32601;

    /// Internal error
    pub const INTERNAL_ERROR: i32 = -32603;

    // Signalling-specific error codes

    /// Target peer not in the active peer set
    pub const PEER_NOT_FOUND: i32 = -32000;

    /// Requested peer id is already registered
    pub const PEER_ID_TAKEN: i32 = -32001;

    /// Connection already completed registration
    pub const ALREADY_REGISTERED: i32 = -32002;

    /// Operation requires a completed registration
    pub const NOT_REGISTERED: i32 = -32003;

    /// Connection id does not reference an in-flight session
    pub const UNKNOWN_CONNECTION: i32 = -32004;

    /// Session is in the wrong state for the operation
    pub const INVALID_STATE: i32 = -32005;

    /// Target peer dropped before the message could be delivered
    pub const TARGET_DISCONNECTED: i32 = -32006;
}

// ---------------------------------------------------------------------------
// peer → coordinator
// ---------------------------------------------------------------------------

/// Requests and notifications a peer sends to the coordinator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", content = "params")]
pub enum ClientRequest {
    /// Join the active peer set
    #[serde(rename = "peer.register")]
    Register(RegisterParams),

    /// Leave the active peer set (notification, idempotent)
    #[serde(rename = "peer.unregister")]
    Unregister,

    /// Snapshot of the active peer set
    #[serde(rename = "peer.list")]
    ListPeers,

    /// Open a negotiation toward another peer
    #[serde(rename = "peer.offer")]
    Offer(OfferParams),

    /// Answer a previously delivered offer (notification)
    #[serde(rename = "peer.answer")]
    Answer(AnswerParams),

    /// Relay one connectivity candidate (notification)
    #[serde(rename = "peer.candidate")]
    Candidate(CandidateParams),

    /// Refuse a previously delivered offer (notification)
    #[serde(rename = "peer.decline")]
    Decline(DeclineParams),
}

/// Parameters for `peer.register`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisterParams {
    /// Identity requested by the joining peer; generated when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requested_id: Option<PeerId>,
}

/// Parameters for `peer.offer`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OfferParams {
    /// Connection id allocated by the issuing facade
    pub connection_id: ConnectionId,

    /// Target peer
    pub to: PeerId,

    /// Session intent
    pub kind: SessionKind,

    /// Offer payload
    pub description: SessionDescription,
}

/// Parameters for `peer.answer`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnswerParams {
    /// Session being answered
    pub connection_id: ConnectionId,

    /// Answer payload
    pub description: SessionDescription,
}

/// Parameters for `peer.candidate`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateParams {
    /// Session the candidate belongs to
    pub connection_id: ConnectionId,

    /// Candidate payload
    pub candidate: IceCandidate,
}

/// Parameters for `peer.decline`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeclineParams {
    /// Session being refused
    pub connection_id: ConnectionId,
}

/// One frame from a peer to the coordinator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientFrame {
    /// Protocol version (must be "2.0")
    pub jsonrpc: String,

    /// Method and parameters
    #[serde(flatten)]
    pub request: ClientRequest,

    /// Correlation id; absent for notifications
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
}

impl ClientFrame {
    /// Build a request expecting a correlated reply
    pub fn request(id: u64, request: ClientRequest) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            request,
            id: Some(id),
        }
    }

    /// Build a one-way notification
    pub fn notification(request: ClientRequest) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            request,
            id: None,
        }
    }
}

// ---------------------------------------------------------------------------
// coordinator → peer
// ---------------------------------------------------------------------------

/// Notifications the coordinator pushes to a peer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", content = "params")]
pub enum ServerNotice {
    /// An offer from another peer was delivered to this peer
    #[serde(rename = "peer.offer")]
    Offer(IncomingOffer),

    /// The target answered an offer this peer initiated
    #[serde(rename = "peer.answer")]
    Answer(IncomingAnswer),

    /// A candidate from the other participant of a session
    #[serde(rename = "peer.candidate")]
    Candidate(IncomingCandidate),

    /// A session this peer participates in ended abnormally
    #[serde(rename = "session.error")]
    SessionError(SessionErrorParams),
}

/// Payload of a delivered offer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncomingOffer {
    /// Session the offer opened
    pub connection_id: ConnectionId,

    /// Initiating peer
    pub from: PeerId,

    /// Session intent
    pub kind: SessionKind,

    /// Offer payload
    pub description: SessionDescription,
}

/// Payload of a delivered answer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncomingAnswer {
    /// Session being answered
    pub connection_id: ConnectionId,

    /// Answer payload
    pub description: SessionDescription,
}

/// Payload of a relayed candidate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncomingCandidate {
    /// Session the candidate belongs to
    pub connection_id: ConnectionId,

    /// Candidate payload
    pub candidate: IceCandidate,
}

/// Why a session was driven to a terminal state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionErrorKind {
    /// No answer within the negotiation window
    Timeout,

    /// The other participant disconnected
    TargetDisconnected,

    /// The target explicitly refused the offer
    Rejected,

    /// The referenced session is not in flight
    UnknownConnection,

    /// The operation was illegal for the session's current state
    InvalidState,
}

/// Parameters for `session.error`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionErrorParams {
    /// Affected session
    pub connection_id: ConnectionId,

    /// Terminal reason
    pub kind: SessionErrorKind,
}

/// JSON-RPC error object carried in failed replies
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorObject {
    /// Error code
    pub code: i32,

    /// Human-readable error message
    pub message: String,
}

/// Reply to a correlated request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplyFrame {
    /// Protocol version (must be "2.0")
    pub jsonrpc: String,

    /// Request id this reply corresponds to; null when the request id
    /// could not be recovered (e.g. a parse failure)
    #[serde(default)]
    pub id: Option<u64>,

    /// Result data on success
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,

    /// Error details on failure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorObject>,
}

/// Notification pushed by the coordinator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoticeFrame {
    /// Protocol version (must be "2.0")
    pub jsonrpc: String,

    /// Method and parameters
    #[serde(flatten)]
    pub notice: ServerNotice,
}

/// One frame from the coordinator to a peer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ServerFrame {
    /// Server-initiated notification (distinguished by its `method` key)
    Notice(NoticeFrame),

    /// Reply to a correlated request
    Reply(ReplyFrame),
}

impl ServerFrame {
    /// Build a successful reply
    pub fn ok(id: u64, result: serde_json::Value) -> Self {
        ServerFrame::Reply(ReplyFrame {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: Some(id),
            result: Some(result),
            error: None,
        })
    }

    /// Build an error reply
    pub fn err(id: Option<u64>, code: i32, message: impl Into<String>) -> Self {
        ServerFrame::Reply(ReplyFrame {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: None,
            error: Some(ErrorObject {
                code,
                message: message.into(),
            }),
        })
    }

    /// Build a notification
    pub fn notice(notice: ServerNotice) -> Self {
        ServerFrame::Notice(NoticeFrame {
            jsonrpc: JSONRPC_VERSION.to_string(),
            notice,
        })
    }
}

/// Result payload of a successful `peer.register`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisterAck {
    /// Identity assigned to the peer
    pub peer_id: PeerId,
}

/// Result payload of a successful `peer.list`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerList {
    /// Sorted snapshot of the active peer set
    pub peers: Vec<PeerId>,
}

/// Result payload of an accepted `peer.offer`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OfferAck {
    /// Echo of the session's connection id
    pub connection_id: ConnectionId,
}
