// src/core/dispatch.rs

//! Relays control commands from the monitor surface to a registered device.

use crate::connection::Property;
use crate::core::GatewayError;
use crate::core::metrics;
use crate::core::protocol::{CommandCodes, LockCommand, LockStatus};
use crate::core::registry::DeviceRegistry;
use tracing::{debug, warn};

/// What a successful dispatch produced.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    /// The command was handed to the device.
    Sent,
    /// A query was sent; carries the session snapshot taken right after.
    Queried(Property),
}

/// Validates `code` against the device's last reported state and writes it
/// to the device.
///
/// Delivery is best effort: a failed write is logged and not reported, since
/// the device answers asynchronously through its own status reports.
pub async fn dispatch(
    registry: &DeviceRegistry,
    commands: &CommandCodes,
    device_id: &str,
    code: &str,
) -> Result<DispatchOutcome, GatewayError> {
    let conn = registry
        .get(device_id)
        .ok_or_else(|| GatewayError::DeviceNotFound(device_id.to_string()))?;
    let command = commands
        .resolve(code)
        .ok_or_else(|| GatewayError::UnsupportedCommand(code.to_string()))?;

    match (command, conn.status()) {
        (LockCommand::Open, LockStatus::Open) => {
            return Err(GatewayError::AlreadyOpen(device_id.to_string()));
        }
        (LockCommand::Close, LockStatus::Closed) => {
            return Err(GatewayError::AlreadyClosed(device_id.to_string()));
        }
        _ => {}
    }

    debug!("{} device '{}'", command, device_id);
    match conn.write(code.as_bytes()).await {
        Ok(_) => metrics::COMMANDS_SENT_TOTAL
            .with_label_values(&[command.to_string().as_str()])
            .inc(),
        Err(e) => warn!(
            "Failed to send '{}' to device '{}': {}",
            command, device_id, e
        ),
    }

    if command == LockCommand::Query {
        Ok(DispatchOutcome::Queried(conn.property()))
    } else {
        Ok(DispatchOutcome::Sent)
    }
}
