// src/core/errors.rs

//! Defines the primary error type for the gateway.

use std::sync::Arc;
use thiserror::Error;

/// The main error enum, representing all failures surfaced by connections,
/// the device registry and command dispatch.
#[derive(Error, Debug, Clone)]
pub enum GatewayError {
    #[error("IO Error: {0}")]
    Io(Arc<std::io::Error>),

    #[error("Connection is closed")]
    ConnectionClosed,

    #[error("Device '{0}' not found")]
    DeviceNotFound(String),

    #[error("Unsupported command '{0}'")]
    UnsupportedCommand(String),

    #[error("Device '{0}' is already open")]
    AlreadyOpen(String),

    #[error("Device '{0}' is already closed")]
    AlreadyClosed(String),

    #[error("Line exceeds the maximum length of {0} bytes")]
    LineTooLong(usize),
}

impl GatewayError {
    /// Returns true for errors that the HTTP boundary reports back to the
    /// caller as a rejected request.
    pub fn is_client_rejection(&self) -> bool {
        matches!(
            self,
            GatewayError::DeviceNotFound(_)
                | GatewayError::UnsupportedCommand(_)
                | GatewayError::AlreadyOpen(_)
                | GatewayError::AlreadyClosed(_)
        )
    }
}

impl PartialEq for GatewayError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (GatewayError::Io(e1), GatewayError::Io(e2)) => e1.to_string() == e2.to_string(),
            (GatewayError::DeviceNotFound(s1), GatewayError::DeviceNotFound(s2)) => s1 == s2,
            (GatewayError::UnsupportedCommand(s1), GatewayError::UnsupportedCommand(s2)) => {
                s1 == s2
            }
            (GatewayError::AlreadyOpen(s1), GatewayError::AlreadyOpen(s2)) => s1 == s2,
            (GatewayError::AlreadyClosed(s1), GatewayError::AlreadyClosed(s2)) => s1 == s2,
            (GatewayError::LineTooLong(n1), GatewayError::LineTooLong(n2)) => n1 == n2,
            _ => core::mem::discriminant(self) == core::mem::discriminant(other),
        }
    }
}

// --- From trait implementations for easy error conversion ---

impl From<std::io::Error> for GatewayError {
    fn from(e: std::io::Error) -> Self {
        GatewayError::Io(Arc::new(e))
    }
}
