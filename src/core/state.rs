// src/core/state.rs

//! The process-wide state shared by the accept loop and the monitor server.

use crate::config::Config;
use crate::connection::{Connection, ConnectionOptions};
use crate::core::lifecycle::Lifecycle;
use crate::core::registry::DeviceRegistry;
use crate::core::sessions::SessionSet;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};

/// Holds the configuration and the device registry for the lifetime of the
/// process.
#[derive(Debug)]
pub struct ServerState {
    pub config: Config,
    pub registry: Arc<DeviceRegistry>,
    pub lifecycle: Lifecycle,
    /// Every accepted connection, including ones that never identified.
    pub sessions: SessionSet,
}

impl ServerState {
    pub fn new(config: Config) -> Arc<Self> {
        let registry = Arc::new(DeviceRegistry::new());
        let lifecycle = Lifecycle::new(registry.clone(), config.protocol.clone());
        Arc::new(Self {
            config,
            registry,
            lifecycle,
            sessions: SessionSet::new(),
        })
    }

    /// The options every accepted device connection is started with.
    pub fn connection_options(&self) -> ConnectionOptions {
        self.lifecycle.attach(self.config.connection_options())
    }

    /// Starts a device session over `transport` and tracks it until it ends.
    pub async fn accept<T>(&self, transport: T, peer: Option<SocketAddr>) -> Arc<Connection>
    where
        T: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let conn = Connection::start(transport, peer, self.connection_options()).await;
        self.sessions.track(&conn);
        conn
    }
}
