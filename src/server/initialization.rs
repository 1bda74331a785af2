// src/server/initialization.rs

//! Builds the shared server state and binds the device listener.

use super::context::ServerContext;
use crate::config::Config;
use crate::core::ServerState;
use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tracing::info;

/// Initializes all server components before starting the main loop.
pub async fn setup(config: Config) -> Result<ServerContext> {
    log_startup_info(&config);
    let (shutdown_tx, _) = broadcast::channel(1);

    let state = ServerState::new(config);
    info!("Server state initialized.");

    let (host, port) = (state.config.host.clone(), state.config.port);
    let listener = TcpListener::bind((host.as_str(), port))
        .await
        .with_context(|| format!("Failed to bind device listener on {host}:{port}"))?;
    info!("Lockgate listening for devices on {}:{}", host, port);

    Ok(ServerContext {
        state,
        listener,
        shutdown_tx,
        background_tasks: JoinSet::new(),
    })
}

/// Logs key configuration parameters at startup.
fn log_startup_info(config: &Config) {
    info!(
        "Idle timeout {:?}, checked every {:?}.",
        config.connection.idle_timeout, config.connection.check_interval
    );
    info!(
        "Status codes: open {:?}, closed {:?}.",
        config.protocol.open_status, config.protocol.closed_status
    );
    if config.connection.greeting.is_empty() {
        info!("No greeting is sent to new devices.");
    }
}
