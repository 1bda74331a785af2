// src/core/registry.rs

//! The device registry: maps a device identity to the one live connection
//! currently representing it.

use crate::connection::{Connection, Property};
use crate::core::metrics;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// A concurrent map from device identity to its authoritative connection.
///
/// The registry never closes connections on its own. Eviction of a displaced
/// session is the caller's job (see `Lifecycle`).
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    devices: DashMap<String, Arc<Connection>>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces the entry for `device_id`, returning the connection
    /// it displaced.
    pub fn add(
        &self,
        device_id: impl Into<String>,
        conn: Arc<Connection>,
    ) -> Option<Arc<Connection>> {
        let device_id = device_id.into();
        debug!("Registry: '{}' -> connection {}.", device_id, conn.id());
        let previous = self.devices.insert(device_id, conn);
        self.update_gauge();
        previous
    }

    /// Removes the entry for `device_id` if there is one.
    pub fn remove(&self, device_id: &str) -> Option<Arc<Connection>> {
        let removed = self.devices.remove(device_id).map(|(_, conn)| conn);
        self.update_gauge();
        removed
    }

    /// Removes the entry for `device_id` only while it still points at the
    /// connection with `connection_id`.
    pub fn remove_if_current(&self, device_id: &str, connection_id: u64) -> bool {
        let removed = self
            .devices
            .remove_if(device_id, |_, conn| conn.id() == connection_id)
            .is_some();
        if removed {
            self.update_gauge();
        }
        removed
    }

    pub fn get(&self, device_id: &str) -> Option<Arc<Connection>> {
        self.devices.get(device_id).map(|entry| entry.value().clone())
    }

    /// Snapshots every registered device. Ordering is unspecified.
    pub fn list(&self) -> Vec<Property> {
        let conns: Vec<Arc<Connection>> = self
            .devices
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        conns.iter().map(|conn| conn.property()).collect()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Removes and closes every registered connection.
    pub async fn close_all(&self) {
        let device_ids: Vec<String> = self.devices.iter().map(|e| e.key().clone()).collect();
        for device_id in device_ids {
            if let Some(conn) = self.remove(&device_id)
                && let Err(e) = conn.close().await
            {
                warn!("Failed to close connection for device '{}': {}", device_id, e);
            }
        }
    }

    fn update_gauge(&self) {
        metrics::REGISTERED_DEVICES.set(self.devices.len() as f64);
    }
}
