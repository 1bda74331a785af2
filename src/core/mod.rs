// src/core/mod.rs

//! The central module containing the device registry, lifecycle glue and
//! protocol vocabulary of the gateway.

pub mod dispatch;
pub mod errors;
pub mod lifecycle;
pub mod metrics;
pub mod protocol;
pub mod registry;
pub mod sessions;
pub mod state;

pub use errors::GatewayError;
pub use lifecycle::Lifecycle;
pub use registry::DeviceRegistry;
pub use sessions::SessionSet;
pub use state::ServerState;
