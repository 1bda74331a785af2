// src/connection/state.rs

//! Defines the mutable state of a single device session.

use crate::core::protocol::LockStatus;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::Instant;

/// A point-in-time view of a device session, as reported by the monitor surface.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Property {
    /// The identity the device announced on its first line. Empty until then.
    pub device_id: String,
    /// The last lock state reported by the device.
    pub status: LockStatus,
    /// Wall-clock time of the last line received from the device.
    pub last_message_time: DateTime<Utc>,
}

/// All mutable fields of a connection. Always accessed under the connection's
/// state lock so readers never observe a torn combination.
#[derive(Debug)]
pub(crate) struct ConnectionState {
    pub(crate) device_id: Option<String>,
    pub(crate) status: LockStatus,
    pub(crate) last_activity: Instant,
    pub(crate) last_message_time: DateTime<Utc>,
    pub(crate) sequence: u64,
    pub(crate) closed: bool,
}

impl ConnectionState {
    pub(crate) fn new() -> Self {
        Self {
            device_id: None,
            status: LockStatus::default(),
            last_activity: Instant::now(),
            last_message_time: Utc::now(),
            sequence: 0,
            closed: false,
        }
    }

    /// Records inbound traffic.
    pub(crate) fn touch(&mut self) {
        self.last_activity = Instant::now();
        self.last_message_time = Utc::now();
    }

    pub(crate) fn property(&self) -> Property {
        Property {
            device_id: self.device_id.clone().unwrap_or_default(),
            status: self.status,
            last_message_time: self.last_message_time,
        }
    }
}
