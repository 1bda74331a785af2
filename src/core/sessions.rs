// src/core/sessions.rs

//! Tracks every accepted connection, identified or not, so shutdown can
//! reach sessions the device registry never saw.

use crate::connection::Connection;
use dashmap::DashMap;
use std::sync::{Arc, Weak};
use tracing::{debug, warn};

/// Weak handles to all connections started by the server, keyed by
/// connection id. A connection drops out once its tasks have exited.
#[derive(Debug, Default)]
pub struct SessionSet {
    sessions: DashMap<u64, Weak<Connection>>,
}

impl SessionSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn track(&self, conn: &Arc<Connection>) {
        self.sessions.retain(|_, session| session.strong_count() > 0);
        self.sessions.insert(conn.id(), Arc::downgrade(conn));
    }

    /// Number of tracked connections that are still open.
    pub fn live_count(&self) -> usize {
        self.sessions
            .iter()
            .filter_map(|entry| entry.value().upgrade())
            .filter(|conn| !conn.is_closed())
            .count()
    }

    /// Closes every tracked connection and forgets all of them.
    pub async fn close_all(&self) -> usize {
        let conns: Vec<Arc<Connection>> = self
            .sessions
            .iter()
            .filter_map(|entry| entry.value().upgrade())
            .collect();
        self.sessions.clear();

        let mut closed = 0;
        for conn in conns {
            if conn.is_closed() {
                continue;
            }
            match conn.close().await {
                Ok(()) => closed += 1,
                Err(e) => warn!("Failed to close connection {}: {}", conn.id(), e),
            }
        }
        debug!("Closed {} tracked sessions.", closed);
        closed
    }
}
