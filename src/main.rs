//! Tank Royale battle server
//!
//! Authoritative turn-based server for tank battles between remote bots.
//! It handles:
//! - WebSocket connections for bots and controllers
//! - Game setup, the ready phase, rounds and scoring
//! - Deterministic turn resolution
//! - A small HTTP surface for health and game type presets

mod app;
mod config;
mod game;
mod http;
mod session;
mod util;
mod ws;

use std::net::SocketAddr;

use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::app::AppState;
use crate::config::Config;
use crate::http::build_router;
use crate::session::{GameServer, GameServerHandle, ServerSettings};
use crate::util::time::init_server_time;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Load configuration
    let config = Config::from_env()?;

    // Initialize tracing
    init_tracing(&config.log_level);

    // Initialize server time tracking
    init_server_time();

    info!("Starting Tank Royale server");
    info!("Server address: {}", config.server_addr);

    let presets = config.load_presets()?;
    if presets.get(&config.default_game_type).is_none() {
        anyhow::bail!("no preset for default game type '{}'", config.default_game_type);
    }

    // Spawn the game server actor
    let (server, handle) = GameServer::new(ServerSettings::from_config(&config, presets.clone()));
    let server_task = tokio::spawn(server.run());

    let state = AppState::new(config.clone(), presets, handle.clone());
    let router = build_router(state);

    // Start server
    let addr: SocketAddr = config.server_addr;
    let listener = TcpListener::bind(addr).await?;
    let port = listener.local_addr()?.port();

    info!(port, "Server listening on {}", addr);
    info!("Health check: http://{}/health", addr);
    info!("WebSocket endpoint: ws://{}/", addr);
    println!("PORT={port}");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown(handle))
        .await?;

    if let Err(e) = server_task.await {
        error!(error = %e, "Game server task failed");
    }

    info!("Server shutdown complete");
    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();
}

/// Wait for a signal, then tell the game server to close every connection
async fn shutdown(handle: GameServerHandle) {
    shutdown_signal().await;
    handle.shutdown();
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
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
