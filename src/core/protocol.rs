// src/core/protocol.rs

//! The device-side and control-side vocabulary of the lock protocol.
//!
//! Devices report their lock state with short status codes (`010A`, `010D`
//! mean open, `010B`, `010C` mean closed by default). The control surface
//! sends a distinct set of command codes to the device. Both sets are
//! deployment-specific and come from the configuration.

use serde::{Deserialize, Serialize, Serializer};
use strum_macros::Display;

/// The lock state last reported by a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash, Display)]
#[strum(serialize_all = "lowercase")]
pub enum LockStatus {
    Open,
    #[default]
    Closed,
}

impl LockStatus {
    /// The numeric wire representation used by the monitor surface.
    pub fn code(self) -> u8 {
        match self {
            LockStatus::Open => 1,
            LockStatus::Closed => 0,
        }
    }
}

impl Serialize for LockStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.code())
    }
}

/// Maps inbound status codes to lock states.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusCodes {
    open: Vec<String>,
    closed: Vec<String>,
}

impl StatusCodes {
    pub fn new(open: Vec<String>, closed: Vec<String>) -> Self {
        Self { open, closed }
    }

    /// Returns the lock state a status code reports, or `None` when the line
    /// is not part of the status vocabulary.
    pub fn classify(&self, line: &str) -> Option<LockStatus> {
        if self.open.iter().any(|c| c == line) {
            Some(LockStatus::Open)
        } else if self.closed.iter().any(|c| c == line) {
            Some(LockStatus::Closed)
        } else {
            None
        }
    }

    pub fn open_codes(&self) -> &[String] {
        &self.open
    }

    pub fn closed_codes(&self) -> &[String] {
        &self.closed
    }
}

impl Default for StatusCodes {
    fn default() -> Self {
        Self {
            open: default_open_status(),
            closed: default_closed_status(),
        }
    }
}

pub(crate) fn default_open_status() -> Vec<String> {
    vec!["010A".to_string(), "010D".to_string()]
}

pub(crate) fn default_closed_status() -> Vec<String> {
    vec!["010B".to_string(), "010C".to_string()]
}

/// A control command understood by lock devices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum LockCommand {
    Open,
    Close,
    Query,
}

/// The wire codes for each control command.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct CommandCodes {
    #[serde(default = "default_open_command")]
    pub open: String,
    #[serde(default = "default_close_command")]
    pub close: String,
    #[serde(default = "default_query_command")]
    pub query: String,
}

impl CommandCodes {
    /// Resolves a raw command code into a `LockCommand`.
    pub fn resolve(&self, code: &str) -> Option<LockCommand> {
        if code == self.open {
            Some(LockCommand::Open)
        } else if code == self.close {
            Some(LockCommand::Close)
        } else if code == self.query {
            Some(LockCommand::Query)
        } else {
            None
        }
    }
}

impl Default for CommandCodes {
    fn default() -> Self {
        Self {
            open: default_open_command(),
            close: default_close_command(),
            query: default_query_command(),
        }
    }
}

fn default_open_command() -> String {
    "0108".to_string()
}
fn default_close_command() -> String {
    "0107".to_string()
}
fn default_query_command() -> String {
    "0109".to_string()
}
