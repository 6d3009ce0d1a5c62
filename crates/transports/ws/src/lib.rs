//! WebSocket transport for the switchboard signalling coordinator
//!
//! Binds the transport-free core to real sockets: one WebSocket per peer,
//! JSON-RPC 2.0 text frames, per-connection outbound queue.
//!
//! ```no_run
//! use switchboard_core::{SignalingConfig, SignalingEngine};
//! use switchboard_ws::WsSignalingServer;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let engine = SignalingEngine::new(SignalingConfig::default())?;
//! let server = WsSignalingServer::new("127.0.0.1:9300".parse()?, engine);
//! let handle = server.start().await?;
//!
//! let (client, _events) =
//!     switchboard_ws::connect_client("ws://127.0.0.1:9300", SignalingConfig::default()).await?;
//! let peer_id = client.connect(None).await?;
//! # let _ = (peer_id, handle);
//! # Ok(())
//! # }
//! ```

#![warn(clippy::all)]

pub mod client;
pub mod server;

pub use client::{connect_client, open_link};
pub use server::{WsServerHandle, WsSignalingServer};
