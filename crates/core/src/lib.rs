//! Signalling coordinator core
//!
//! The signalling layer that lets two peers discover each other and
//! negotiate a direct peer-to-peer session before any peer-to-peer
//! transport exists: registration/identity, discovery, and a correlated
//! request/response protocol carrying offer/answer and connectivity
//! candidates between exactly two peers.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │  Application peers                                   │
//! │  ↓ (call / exchange_data / answer / send_candidate)  │
//! │  SignalingClient (per-peer facade, pending awaits)   │
//! │  ↕ ClientLink (reliable ordered frame channel)       │
//! │  SignalingEngine (request dispatch, relay, timers)   │
//! │  ├─ PeerRegistry (active peer set + outbound queues) │
//! │  └─ SessionTable (connection id → in-flight session) │
//! └──────────────────────────────────────────────────────┘
//! ```
//!
//! Payloads are opaque: the engine carries offers, answers and candidates
//! verbatim and never inspects them. The crate is transport-free: an
//! in-process link pair serves embedded use and tests, and network
//! bindings (e.g. the WebSocket transport crate) pump their sockets into
//! the same frame types.
//!
//! # Example
//!
//! ```no_run
//! use switchboard_core::{SessionDescription, SignalingConfig, SignalingEngine, SignalingClient};
//!
//! # async fn example() -> switchboard_core::Result<()> {
//! let engine = SignalingEngine::new(SignalingConfig::default())?;
//!
//! let (alice, _alice_events) =
//!     SignalingClient::new(engine.open_local_link(), SignalingConfig::default());
//! let (bob, _bob_events) =
//!     SignalingClient::new(engine.open_local_link(), SignalingConfig::default());
//!
//! alice.connect(None).await?;
//! let bob_id = bob.connect(Some("bob")).await?;
//!
//! let answer = alice
//!     .call(&bob_id, SessionDescription::offer("v=0"), |connection_id| {
//!         println!("negotiating over {connection_id}");
//!     })
//!     .await?;
//! # let _ = answer;
//! # Ok(())
//! # }
//! ```

#![warn(clippy::all)]

pub mod client;
pub mod config;
pub mod engine;
pub mod error;
pub mod link;
pub mod protocol;
pub mod registry;
pub mod session;

// Re-exports for public API
pub use client::{SignalingClient, SignalingEvent};
pub use config::SignalingConfig;
pub use engine::{PeerConn, SignalingEngine};
pub use error::{Result, SignalError};
pub use link::ClientLink;
pub use protocol::{
    ClientFrame, ConnectionId, IceCandidate, PeerId, SdpKind, ServerFrame, SessionDescription,
    SessionErrorKind, SessionKind,
};
pub use registry::{PeerHandle, PeerRegistry};
pub use session::{Session, SessionState, SessionTable};

/// Get the version of this crate
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
