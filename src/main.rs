//! Arena Gateway - authoritative relay for a real-time multiplayer ship arena
//!
//! This is the main entry point for the gateway. It handles:
//! - WebSocket connections for real-time gameplay
//! - The fixed-period simulation tick and snapshot fanout
//! - Liveness sweeps that evict dead connections

mod app;
mod config;
mod fanout;
mod game;
mod http;
mod util;
mod ws;

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::app::AppState;
use crate::config::Config;
use crate::fanout::{Broker, LocalBroker, RedisBroker};
use crate::http::build_router;
use crate::util::time::init_server_time;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Load configuration
    let config = Config::from_env()?;

    // Initialize tracing
    init_tracing(&config.log_level, config.log_json);

    // Initialize server time tracking
    init_server_time();

    info!("Starting Arena Gateway");
    info!("Server address: {}", config.server_addr);
    info!(
        arena = %config.arena_channel,
        tick_ms = config.tick_period.as_millis() as u64,
        liveness_ms = config.liveness_period.as_millis() as u64,
        "Arena configuration"
    );

    // Pick the fanout transport
    let broker: Arc<dyn Broker> = match config.redis_url.as_deref() {
        Some(url) => {
            info!("Fanout via Redis pub/sub");
            Arc::new(RedisBroker::new(url)?)
        }
        None => {
            info!("Fanout in-process only (set REDIS_URL to share the arena across processes)");
            LocalBroker::shared()
        }
    };

    // Create application state
    let state = AppState::new(config.clone(), broker);

    // Spawn simulation ticker
    tokio::spawn(state.ticker.clone().run());

    // Spawn liveness monitor
    tokio::spawn(state.liveness.clone().run());

    // Build router
    let router = build_router(state);

    // Start server
    let addr: SocketAddr = config.server_addr;
    let listener = TcpListener::bind(addr).await?;

    info!("Server listening on {}", addr);
    info!("Health check: http://{}/health", addr);
    info!("WebSocket endpoint: ws://{}/ws", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");
    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str, json: bool) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    let registry = tracing_subscriber::registry().with(env_filter);

    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_target(true))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_target(true))
            .init();
    }
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown");
        }
        _ = terminate => {
            info!("Received terminate signal, starting graceful shutdown");
        }
    }
}
