//! Signalling coordinator server binary
//!
//! # Usage
//!
//! ```bash
//! # Listen on the default port
//! cargo run --bin switchboard-server
//!
//! # Custom bind address and a tighter negotiation window
//! cargo run --bin switchboard-server -- \
//!   --bind 0.0.0.0:9300 \
//!   --negotiation-timeout 15
//! ```

use clap::Parser;
use std::net::SocketAddr;
use switchboard_core::{SignalingConfig, SignalingEngine};
use switchboard_ws::WsSignalingServer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Switchboard signalling coordinator
///
/// Mediates peer discovery and offer/answer/candidate exchange so two
/// peers can negotiate a direct connection.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Bind address for the WebSocket listener
    #[arg(long, default_value = "0.0.0.0:9300", env = "SWITCHBOARD_BIND")]
    bind: SocketAddr,

    /// Seconds an offer may wait for an answer
    #[arg(long, default_value_t = 30, env = "SWITCHBOARD_NEGOTIATION_TIMEOUT")]
    negotiation_timeout: u64,

    /// Seconds a client waits for a coordinator reply
    #[arg(long, default_value_t = 10, env = "SWITCHBOARD_CONNECT_TIMEOUT")]
    connect_timeout: u64,

    /// Outbound frame queue capacity per peer
    #[arg(long, default_value_t = 128, env = "SWITCHBOARD_CHANNEL_CAPACITY")]
    channel_capacity: usize,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let config = SignalingConfig {
        connect_timeout_secs: args.connect_timeout,
        negotiation_timeout_secs: args.negotiation_timeout,
        channel_capacity: args.channel_capacity,
    };

    let engine = SignalingEngine::new(config)?;
    let handle = WsSignalingServer::new(args.bind, engine).start().await?;
    info!("coordinator ready on ws://{}", handle.local_addr());

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    handle.shutdown().await;
    Ok(())
}
