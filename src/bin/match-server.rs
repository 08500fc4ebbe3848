// Match signaling server
// Pairs two players by session code and relays their handshake payloads
//
// Usage: cargo run --bin match-server

use p2volley::config;
use p2volley::relay::{router, RelayState};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let cfg = config::load_config()?;

    // Deployment platforms hand out the port via env; config file otherwise
    let port = std::env::var("PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(cfg.relay.listen_port);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    info!("🚀 Match server listening on {}", addr);

    let state = RelayState::new(cfg.relay.heartbeat_interval());
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("Shutdown signal received");
}
