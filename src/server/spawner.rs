// src/server/spawner.rs

//! Spawns the server's long-running background tasks.

use super::context::ServerContext;
use super::monitor_server;
use tracing::info;

/// Spawns all background tasks into the context's JoinSet.
pub fn spawn_all(ctx: &mut ServerContext) {
    if ctx.state.config.monitor.enabled {
        let monitor_state = ctx.state.clone();
        let shutdown_rx_monitor = ctx.shutdown_tx.subscribe();
        ctx.background_tasks.spawn(async move {
            monitor_server::run_monitor_server(monitor_state, shutdown_rx_monitor).await
        });
    } else {
        info!("Monitor server is disabled in the configuration.");
    }
}
