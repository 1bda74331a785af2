// src/server/connection_loop.rs

//! Contains the main server loop for accepting device connections and handling
//! graceful shutdown.

use super::context::ServerContext;
use crate::core::metrics;
use std::time::Duration;
use tokio::signal::unix::{SignalKind, signal};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// The main server loop that accepts connections and handles graceful shutdown.
pub async fn run(mut ctx: ServerContext) {
    let mut connection_setups = JoinSet::new();

    let (mut sigint, mut sigterm) = match (
        signal(SignalKind::interrupt()),
        signal(SignalKind::terminate()),
    ) {
        (Ok(sigint), Ok(sigterm)) => (sigint, sigterm),
        (Err(e), _) | (_, Err(e)) => {
            error!("Failed to register signal handlers: {}", e);
            return;
        }
    };

    loop {
        tokio::select! {
            biased;

            _ = sigint.recv() => {
                info!("SIGINT received, initiating graceful shutdown.");
                break;
            }
            _ = sigterm.recv() => {
                info!("SIGTERM received, initiating graceful shutdown.");
                break;
            }

            Some(res) = ctx.background_tasks.join_next() => {
                match res {
                    Ok(Ok(())) => warn!("A background task finished unexpectedly without an error."),
                    Ok(Err(e)) => { error!("CRITICAL: Background task failed: {:#}. Shutting down.", e); break; }
                    Err(e) => { error!("CRITICAL: Background task panicked: {e:?}. Shutting down."); break; }
                }
            },

            res = ctx.listener.accept() => {
                match res {
                    Ok((socket, addr)) => {
                        info!("Welcome {} join!", addr);
                        metrics::CONNECTIONS_ACCEPTED_TOTAL.inc();
                        if let Err(e) = socket.set_nodelay(true) {
                            debug!("Could not set TCP_NODELAY for {}: {}", addr, e);
                        }
                        let state = ctx.state.clone();
                        connection_setups.spawn(async move {
                            let conn = state.accept(socket, Some(addr)).await;
                            debug!("Connection {} started for {}.", conn.id(), addr);
                        });
                    }
                    Err(e) => error!("Failed to accept connection: {}", e),
                }
            },

            Some(res) = connection_setups.join_next() => {
                if let Err(e) = res
                    && e.is_panic()
                {
                    error!("A connection setup task panicked: {e:?}");
                }
            },
        }
    }

    info!("Shutting down. Sending signal to all tasks.");
    if ctx.shutdown_tx.send(()).is_err() {
        debug!("No background task is listening for the shutdown signal.");
    }

    // Let sessions mid-setup finish starting so they are tracked below.
    if tokio::time::timeout(Duration::from_secs(1), async {
        while connection_setups.join_next().await.is_some() {}
    })
    .await
    .is_err()
    {
        warn!("Timed out waiting for connection setups; aborting the rest.");
        connection_setups.shutdown().await;
    }
    let devices = ctx.state.registry.len();
    ctx.state.registry.close_all().await;
    let unidentified = ctx.state.sessions.close_all().await;
    info!(
        "Closed {} device connections and {} unidentified sessions.",
        devices, unidentified
    );

    info!("Waiting for background tasks to finish...");
    if tokio::time::timeout(Duration::from_secs(10), async {
        while ctx.background_tasks.join_next().await.is_some() {}
    })
    .await
    .is_err()
    {
        warn!("Timed out waiting for background tasks to finish cleanly.");
    };
    info!("Server shutdown complete.");
}
