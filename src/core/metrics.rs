// src/core/metrics.rs

//! Defines and registers Prometheus metrics for gateway monitoring.
//!
//! This module uses `lazy_static` to ensure that metrics are registered only once
//! globally for the entire application lifecycle.

use lazy_static::lazy_static;
use prometheus::{
    Counter, CounterVec, Gauge, TextEncoder, register_counter, register_counter_vec,
    register_gauge,
};

lazy_static! {
    // --- Gauges ---
    /// The number of device connections that have not been closed yet.
    pub static ref OPEN_CONNECTIONS: Gauge =
        register_gauge!("lockgate_open_connections", "Number of device connections currently open.").unwrap();
    /// The number of identified devices held by the registry.
    pub static ref REGISTERED_DEVICES: Gauge =
        register_gauge!("lockgate_registered_devices", "Number of devices currently in the registry.").unwrap();

    // --- Counters ---
    /// The total number of connections accepted since startup.
    pub static ref CONNECTIONS_ACCEPTED_TOTAL: Counter =
        register_counter!("lockgate_connections_accepted_total", "Total number of device connections accepted.").unwrap();
    /// The total number of non-empty lines received from devices.
    pub static ref MESSAGES_RECEIVED_TOTAL: Counter =
        register_counter!("lockgate_messages_received_total", "Total number of lines received from devices.").unwrap();
    /// The total number of idle checks that found a connection past its limit.
    pub static ref IDLE_TIMEOUTS_TOTAL: Counter =
        register_counter!("lockgate_idle_timeouts_total", "Total number of idle timeouts detected.").unwrap();
    /// The total number of sessions closed because a newer one claimed the same device.
    pub static ref DEVICE_EVICTIONS_TOTAL: Counter =
        register_counter!("lockgate_device_evictions_total", "Total number of stale device sessions evicted.").unwrap();
    /// The total number of commands written to devices, labeled by command.
    pub static ref COMMANDS_SENT_TOTAL: CounterVec =
        register_counter_vec!("lockgate_commands_sent_total", "Total number of commands sent to devices, labeled by command.", &["command"]).unwrap();
}

/// Gathers all registered metrics and encodes them in the Prometheus text format.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder.encode_to_string(&metric_families).unwrap_or_default()
}
