//! WebSocket client connector
//!
//! Adapts a WebSocket to the core's [`ClientLink`], so a
//! [`SignalingClient`](switchboard_core::SignalingClient) built on top of
//! it behaves exactly like one riding an in-process link.

use futures_util::{SinkExt, StreamExt};
use switchboard_core::protocol::{ClientFrame, ServerFrame};
use switchboard_core::{
    ClientLink, Result, SignalError, SignalingClient, SignalingConfig, SignalingEvent,
};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, warn};

/// Open a WebSocket to the coordinator and wrap it into a link
///
/// # Errors
///
/// Returns [`SignalError::CoordinatorUnreachable`] if the socket cannot be
/// established.
pub async fn open_link(url: &str, config: &SignalingConfig) -> Result<ClientLink> {
    let (ws_stream, _response) = connect_async(url).await.map_err(|e| {
        debug!("websocket connect to {} failed: {}", url, e);
        SignalError::CoordinatorUnreachable
    })?;
    let (mut ws_tx, mut ws_rx) = ws_stream.split();

    let (client_tx, mut client_rx) = mpsc::unbounded_channel::<ClientFrame>();
    let (server_tx, server_rx) = mpsc::channel::<ServerFrame>(config.channel_capacity);

    // Outbound pump: facade frames → socket.
    tokio::spawn(async move {
        while let Some(frame) = client_rx.recv().await {
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
        // Facade dropped its sender: tell the coordinator we are gone.
        let _ = ws_tx.send(Message::Close(None)).await;
    });

    // Inbound pump: socket → facade reader; exits drop server_tx, which the
    // facade observes as a closed channel.
    tokio::spawn(async move {
        while let Some(msg) = ws_rx.next().await {
            match msg {
                Ok(Message::Text(text)) => match serde_json::from_str::<ServerFrame>(&text) {
                    Ok(frame) => {
                        if server_tx.send(frame).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!("unparseable frame from coordinator: {}", e),
                },
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(e) => {
                    debug!("socket error: {}", e);
                    break;
                }
            }
        }
    });

    Ok(ClientLink {
        tx: client_tx,
        rx: server_rx,
    })
}

/// Connect a ready-to-use facade over a WebSocket
pub async fn connect_client(
    url: &str,
    config: SignalingConfig,
) -> Result<(SignalingClient, mpsc::Receiver<SignalingEvent>)> {
    let link = open_link(url, &config).await?;
    Ok(SignalingClient::new(link, config))
}
