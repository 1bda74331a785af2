// src/core/lifecycle.rs

//! Binds connections to the device registry through their lifecycle hooks.

use crate::config::ProtocolConfig;
use crate::connection::{Connection, ConnectionOptions, DisconnectReason};
use crate::core::metrics;
use crate::core::registry::DeviceRegistry;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// The glue between connections and the registry. Cheap to clone; every hook
/// closure holds its own copy.
#[derive(Debug, Clone)]
pub struct Lifecycle {
    registry: Arc<DeviceRegistry>,
    protocol: Arc<ProtocolConfig>,
}

impl Lifecycle {
    pub fn new(registry: Arc<DeviceRegistry>, protocol: ProtocolConfig) -> Self {
        Self {
            registry,
            protocol: Arc::new(protocol),
        }
    }

    /// Attaches all lifecycle hooks to `options`.
    pub fn attach(&self, options: ConnectionOptions) -> ConnectionOptions {
        let on_identified = self.clone();
        let on_message = self.clone();
        let on_timeout = self.clone();
        let on_disconnect = self.clone();
        options
            .on_identified(move |conn| {
                let lifecycle = on_identified.clone();
                async move { lifecycle.claim(conn).await }
            })
            .on_message(move |conn, msg| {
                let lifecycle = on_message.clone();
                async move { lifecycle.handle_message(conn, msg).await }
            })
            .on_timeout(move |conn| {
                let lifecycle = on_timeout.clone();
                async move { lifecycle.expire(conn).await }
            })
            .on_disconnect(move |conn, reason| {
                let lifecycle = on_disconnect.clone();
                async move { lifecycle.release(conn, reason) }
            })
    }

    /// Makes `conn` the authoritative connection for its device, closing
    /// whichever connection held the identity before.
    pub async fn claim(&self, conn: Arc<Connection>) {
        let Some(device_id) = conn.device_id() else {
            warn!("Connection {} has no device id to claim.", conn.id());
            return;
        };
        info!("Device '{}' bound to connection {}.", device_id, conn.id());

        if let Some(previous) = self.registry.add(device_id.clone(), conn.clone())
            && previous.id() != conn.id()
        {
            info!(
                "Evicting stale connection {} of device '{}'.",
                previous.id(),
                device_id
            );
            metrics::DEVICE_EVICTIONS_TOTAL.inc();
            if let Err(e) = previous.close().await {
                warn!(
                    "Failed to close stale connection {} of device '{}': {}",
                    previous.id(),
                    device_id,
                    e
                );
            }
        }

        // The connection may have been closed while it was being registered.
        if conn.is_closed() {
            self.registry.remove_if_current(&device_id, conn.id());
        }
    }

    /// Moves `conn` to a new identity, dropping the registry entry of its old
    /// one if that entry still points at it.
    pub async fn rebind(&self, conn: Arc<Connection>, device_id: impl Into<String>) {
        let device_id = device_id.into();
        if let Some(previous) = conn.device_id() {
            if previous == device_id {
                return;
            }
            if self.registry.remove_if_current(&previous, conn.id()) {
                info!(
                    "Device '{}' renamed to '{}' on connection {}.",
                    previous,
                    device_id,
                    conn.id()
                );
            }
        }
        conn.set_device_id(device_id);
        self.claim(conn).await;
    }

    /// Handles a message from an identified device.
    pub async fn handle_message(&self, conn: Arc<Connection>, msg: String) {
        let device_id = conn.device_id().unwrap_or_default();
        debug!("Device [{}] received: {}", device_id, msg);

        if self.protocol.quit.iter().any(|q| *q == msg) {
            info!("Device '{}' asked to disconnect.", device_id);
            self.disconnect(&conn).await;
        } else if msg == self.protocol.heartbeat {
            debug!("Device '{}': PING", device_id);
        }
    }

    /// Disconnects a device that stayed silent past its idle limit.
    pub async fn expire(&self, conn: Arc<Connection>) {
        error!(
            "Device '{}' (connection {}) timed out.",
            conn.device_id().unwrap_or_default(),
            conn.id()
        );
        self.disconnect(&conn).await;
    }

    /// Forgets a connection that closed itself.
    pub fn release(&self, conn: Arc<Connection>, reason: DisconnectReason) {
        if let Some(device_id) = conn.device_id()
            && self.registry.remove_if_current(&device_id, conn.id())
        {
            info!("Device '{}' removed from registry: {}.", device_id, reason);
        }
    }

    async fn disconnect(&self, conn: &Arc<Connection>) {
        if let Err(e) = conn.close().await {
            warn!("Error closing connection {}: {}", conn.id(), e);
        }
        if let Some(device_id) = conn.device_id() {
            self.registry.remove_if_current(&device_id, conn.id());
        }
    }
}
