//! WebSocket coordinator server
//!
//! Accepts one WebSocket connection per peer and pumps its JSON-RPC 2.0
//! text frames into the engine. Each connection gets an outbound mpsc
//! queue drained by a writer task, so engine-side sends never touch the
//! socket directly and per-peer delivery order is preserved.

use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use switchboard_core::engine::PeerConn;
use switchboard_core::protocol::{error_codes, ClientFrame, ServerFrame};
use switchboard_core::SignalingEngine;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_tungstenite::{
    accept_async,
    tungstenite::{Message, Result as WsResult},
};
use tracing::{debug, error, info, warn};

/// WebSocket front end for a signalling engine
pub struct WsSignalingServer {
    addr: SocketAddr,
    engine: SignalingEngine,
}

impl WsSignalingServer {
    /// Create a server that will bind to `addr`
    pub fn new(addr: SocketAddr, engine: SignalingEngine) -> Self {
        Self { addr, engine }
    }

    /// Bind and start the accept loop
    ///
    /// Returns once the listener is bound; the returned handle shuts the
    /// server down and reports the actual local address (useful with port
    /// 0).
    pub async fn start(self) -> std::io::Result<WsServerHandle> {
        let listener = TcpListener::bind(&self.addr).await?;
        let local_addr = listener.local_addr()?;
        info!("signalling coordinator listening on ws://{}", local_addr);

        let (shutdown_tx, mut shutdown_rx) = broadcast::channel::<()>(1);
        let engine = self.engine;

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    result = listener.accept() => {
                        match result {
                            Ok((stream, peer_addr)) => {
                                debug!("accepted connection from {}", peer_addr);
                                let engine = engine.clone();
                                tokio::spawn(async move {
                                    if let Err(e) = handle_connection(stream, engine).await {
                                        debug!("connection from {} ended: {}", peer_addr, e);
                                    }
                                });
                            }
                            Err(e) => {
                                error!("failed to accept connection: {}", e);
                            }
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        info!("coordinator accept loop shutting down");
                        break;
                    }
                }
            }
        });

        Ok(WsServerHandle {
            local_addr,
            shutdown_tx,
            task,
        })
    }
}

/// Handle for controlling a running server
pub struct WsServerHandle {
    local_addr: SocketAddr,
    shutdown_tx: broadcast::Sender<()>,
    task: JoinHandle<()>,
}

impl WsServerHandle {
    /// Address the listener actually bound to
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting connections and wait for the accept loop to exit
    ///
    /// Established connections keep running until their peers hang up.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(());
        let _ = self.task.await;
    }
}

/// Pump one peer's WebSocket into the engine
async fn handle_connection(stream: TcpStream, engine: SignalingEngine) -> WsResult<()> {
    let ws_stream = accept_async(stream).await?;
    let (mut ws_tx, mut ws_rx) = ws_stream.split();

    // Outbound queue: the engine writes frames here, the writer task owns
    // the socket sink.
    let (tx, mut rx) = mpsc::channel::<ServerFrame>(engine.config().channel_capacity);
    let writer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            let json = match serde_json::to_string(&frame) {
                Ok(json) => json,
                Err(e) => {
                    warn!("failed to serialize outbound frame: {}", e);
                    continue;
                }
            };
            if ws_tx.send(Message::Text(json)).await.is_err() {
                break;
            }
        }
        let _ = ws_tx.send(Message::Close(None)).await;
    });

    let mut conn = PeerConn::new(tx);
    while let Some(msg) = ws_rx.next().await {
        match msg {
            Ok(Message::Text(text)) => match serde_json::from_str::<ClientFrame>(&text) {
                Ok(frame) => engine.dispatch(&mut conn, frame).await,
                Err(e) => {
                    warn!("unparseable frame from peer: {}", e);
                    let reply = ServerFrame::err(
                        None,
                        error_codes::PARSE_ERROR,
                        format!("failed to parse frame: {}", e),
                    );
                    if conn.tx.send(reply).await.is_err() {
                        break;
                    }
                }
            },
            Ok(Message::Close(_)) => {
                debug!("peer closed the socket");
                break;
            }
            // Ping/pong is handled by tungstenite itself; binary frames are
            // not part of this protocol.
            Ok(_) => {}
            Err(e) => {
                debug!("socket error: {}", e);
                break;
            }
        }
    }

    engine.connection_closed(&mut conn).await;
    writer.abort();
    Ok(())
}
