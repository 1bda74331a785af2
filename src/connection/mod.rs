// src/connection/mod.rs

//! Manages the lifecycle of a single device TCP connection: identity binding,
//! status tracking, idle detection and outbound writes.

// Declare the private sub-modules of the `connection` module.
mod codec;
mod handler;
mod options;
mod state;

// Publicly re-export the primary types from the sub-modules.
pub use codec::{Framing, LineCodec};
pub use handler::Connection;
pub use options::{
    ConnectionHook, ConnectionOptions, DEFAULT_CHECK_INTERVAL, DEFAULT_IDLE_TIMEOUT,
    DEFAULT_MAX_LINE_LENGTH, DisconnectHook, DisconnectReason, MessageHook,
};
pub use state::Property;
