// src/connection/options.rs

//! Construction-time configuration for a `Connection`: tunables plus the
//! lifecycle hooks through which the registry attaches to a session.

use super::Connection;
use super::codec::Framing;
use crate::core::protocol::StatusCodes;
use futures::FutureExt;
use futures::future::BoxFuture;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use strum_macros::Display;

/// The default idle ceiling before the timeout hook fires.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(30);
/// How often the idle watchdog wakes up.
pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_secs(5);
/// The default maximum length of one inbound line.
pub const DEFAULT_MAX_LINE_LENGTH: usize = 1024;

/// A hook invoked with the connection it fired for.
pub type ConnectionHook = Arc<dyn Fn(Arc<Connection>) -> BoxFuture<'static, ()> + Send + Sync>;
/// A hook invoked for every message after the identity line.
pub type MessageHook =
    Arc<dyn Fn(Arc<Connection>, String) -> BoxFuture<'static, ()> + Send + Sync>;
/// A hook invoked once a connection has shut itself down.
pub type DisconnectHook =
    Arc<dyn Fn(Arc<Connection>, DisconnectReason) -> BoxFuture<'static, ()> + Send + Sync>;

/// Why a connection closed itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum DisconnectReason {
    /// The device closed its side of the stream.
    #[strum(serialize = "closed by peer")]
    PeerClosed,
    /// The transport returned an unrecoverable error.
    #[strum(serialize = "transport error")]
    TransportError,
    /// The device sent data that cannot be framed.
    #[strum(serialize = "protocol violation")]
    ProtocolViolation,
}

/// Everything a `Connection` needs at construction.
#[derive(Clone)]
pub struct ConnectionOptions {
    pub idle_timeout: Duration,
    pub check_interval: Duration,
    /// Sent to the device right after the session starts.
    pub greeting: Option<String>,
    pub status_codes: StatusCodes,
    pub framing: Framing,
    pub max_line_length: usize,
    pub on_message: Option<MessageHook>,
    pub on_timeout: Option<ConnectionHook>,
    pub on_identified: Option<ConnectionHook>,
    pub on_disconnect: Option<DisconnectHook>,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            check_interval: DEFAULT_CHECK_INTERVAL,
            greeting: None,
            status_codes: StatusCodes::default(),
            framing: Framing::default(),
            max_line_length: DEFAULT_MAX_LINE_LENGTH,
            on_message: None,
            on_timeout: None,
            on_identified: None,
            on_disconnect: None,
        }
    }
}

impl ConnectionOptions {
    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    pub fn with_check_interval(mut self, check_interval: Duration) -> Self {
        self.check_interval = check_interval;
        self
    }

    pub fn with_greeting(mut self, greeting: impl Into<String>) -> Self {
        self.greeting = Some(greeting.into());
        self
    }

    pub fn with_status_codes(mut self, status_codes: StatusCodes) -> Self {
        self.status_codes = status_codes;
        self
    }

    pub fn with_framing(mut self, framing: Framing, max_line_length: usize) -> Self {
        self.framing = framing;
        self.max_line_length = max_line_length;
        self
    }

    pub fn on_message<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(Arc<Connection>, String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.on_message = Some(Arc::new(move |conn, msg| hook(conn, msg).boxed()));
        self
    }

    pub fn on_timeout<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(Arc<Connection>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.on_timeout = Some(Arc::new(move |conn| hook(conn).boxed()));
        self
    }

    pub fn on_identified<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(Arc<Connection>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.on_identified = Some(Arc::new(move |conn| hook(conn).boxed()));
        self
    }

    pub fn on_disconnect<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(Arc<Connection>, DisconnectReason) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.on_disconnect = Some(Arc::new(move |conn, reason| hook(conn, reason).boxed()));
        self
    }
}

/// The hooks as moved into the background tasks.
#[derive(Clone)]
pub(crate) struct Hooks {
    pub(crate) on_message: Option<MessageHook>,
    pub(crate) on_timeout: Option<ConnectionHook>,
    pub(crate) on_identified: Option<ConnectionHook>,
    pub(crate) on_disconnect: Option<DisconnectHook>,
}
