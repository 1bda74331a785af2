// src/connection/handler.rs

//! Defines `Connection`, which owns one device transport and runs its read loop
//! and idle watchdog until the session is closed.

use super::codec::LineCodec;
use super::options::{ConnectionHook, ConnectionOptions, DisconnectReason, Hooks};
use super::state::{ConnectionState, Property};
use crate::core::GatewayError;
use crate::core::metrics;
use crate::core::protocol::{LockStatus, StatusCodes};
use bytes::BytesMut;
use parking_lot::Mutex;
use std::io::ErrorKind;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::codec::Decoder;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

const READ_BUFFER_SIZE: usize = 1024;
/// Consecutive transient read failures tolerated before the session is dropped.
const MAX_TRANSIENT_READ_FAILURES: u32 = 5;
const READ_RETRY_BASE_DELAY: Duration = Duration::from_millis(50);
const READ_RETRY_MAX_DELAY: Duration = Duration::from_secs(1);

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// A live session with one lock device.
pub struct Connection {
    id: u64,
    peer: Option<SocketAddr>,
    state: Mutex<ConnectionState>,
    writer: tokio::sync::Mutex<Option<BoxedWriter>>,
    cancel: CancellationToken,
    status_codes: StatusCodes,
}

impl Connection {
    /// Takes ownership of `transport`, spawns the read loop and the idle
    /// watchdog, then sends the configured greeting.
    pub async fn start<T>(
        transport: T,
        peer: Option<SocketAddr>,
        options: ConnectionOptions,
    ) -> Arc<Self>
    where
        T: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let (reader, writer) = tokio::io::split(transport);
        let conn = Arc::new(Self {
            id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
            peer,
            state: Mutex::new(ConnectionState::new()),
            writer: tokio::sync::Mutex::new(Some(Box::new(writer))),
            cancel: CancellationToken::new(),
            status_codes: options.status_codes.clone(),
        });
        metrics::OPEN_CONNECTIONS.inc();

        let hooks = Hooks {
            on_message: options.on_message.clone(),
            on_timeout: options.on_timeout.clone(),
            on_identified: options.on_identified.clone(),
            on_disconnect: options.on_disconnect.clone(),
        };
        let codec = LineCodec::new(options.framing, options.max_line_length);

        tokio::spawn(conn.clone().read_loop(Box::new(reader), codec, hooks.clone()));
        tokio::spawn(conn.clone().watch_idle(
            options.check_interval,
            options.idle_timeout,
            hooks.on_timeout,
        ));

        if let Some(greeting) = &options.greeting {
            debug!("Connection {}: sending greeting.", conn.id);
            if let Err(e) = conn.write(greeting.as_bytes()).await {
                warn!("Connection {}: failed to send greeting: {}", conn.id, e);
            }
        }
        conn
    }

    /// The process-unique id of this connection.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    fn peer_label(&self) -> String {
        self.peer
            .map(|addr| addr.to_string())
            .unwrap_or_else(|| "unknown peer".to_string())
    }

    /// Writes `data` to the device. Failures are returned and never close the
    /// connection.
    pub async fn write(&self, data: &[u8]) -> Result<usize, GatewayError> {
        let mut writer = self.writer.lock().await;
        let Some(stream) = writer.as_mut() else {
            return Err(GatewayError::ConnectionClosed);
        };
        stream.write_all(data).await?;
        stream.flush().await?;
        Ok(data.len())
    }

    /// Closes the session. Only the first call has any effect.
    pub async fn close(&self) -> Result<(), GatewayError> {
        self.close_inner().await.map(|_| ())
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Overwrites the identity of this session only. A registered session must
    /// be renamed through `Lifecycle::rebind` so its registry key moves too.
    pub fn set_device_id(&self, device_id: impl Into<String>) {
        self.state.lock().device_id = Some(device_id.into());
    }

    /// The identity announced by the device, if it has sent its first line.
    pub fn device_id(&self) -> Option<String> {
        self.state.lock().device_id.clone()
    }

    /// Applies a status report. Returns false, leaving the status untouched,
    /// when `code` is not a known status code.
    pub fn set_status(&self, code: &str) -> bool {
        match self.status_codes.classify(code) {
            Some(status) => {
                self.state.lock().status = status;
                true
            }
            None => {
                warn!("Connection {}: unsupported status code '{}'.", self.id, code);
                false
            }
        }
    }

    pub fn status(&self) -> LockStatus {
        self.state.lock().status
    }

    /// A consistent snapshot of identity, status and last message time.
    pub fn property(&self) -> Property {
        self.state.lock().property()
    }

    /// Time elapsed since the device last sent anything.
    pub fn idle_for(&self) -> Duration {
        self.state.lock().last_activity.elapsed()
    }

    /// Number of lines received, the identity line included.
    pub fn received_count(&self) -> u64 {
        self.state.lock().sequence
    }

    /// Closes the session, returning true if this call performed the close.
    async fn close_inner(&self) -> Result<bool, GatewayError> {
        {
            let mut state = self.state.lock();
            if state.closed {
                return Ok(false);
            }
            state.closed = true;
        }
        self.cancel.cancel();
        metrics::OPEN_CONNECTIONS.dec();
        debug!("Connection {}: closing.", self.id);

        let writer = self.writer.lock().await.take();
        if let Some(mut stream) = writer {
            stream.shutdown().await?;
        }
        Ok(true)
    }

    /// Closes the session from inside a background task and reports why.
    async fn terminate(self: &Arc<Self>, reason: DisconnectReason, hooks: &Hooks) {
        let closed_here = match self.close_inner().await {
            Ok(closed_here) => closed_here,
            Err(e) => {
                debug!("Connection {}: error while shutting down: {}", self.id, e);
                true
            }
        };
        if !closed_here {
            return;
        }
        info!(
            "Connection {} ({}) from {} terminated: {}.",
            self.id,
            self.device_id().unwrap_or_default(),
            self.peer_label(),
            reason
        );
        if let Some(hook) = &hooks.on_disconnect {
            hook(self.clone(), reason).await;
        }
    }

    /// Reads and dispatches lines until the connection is cancelled or the
    /// transport fails for good.
    async fn read_loop(self: Arc<Self>, mut reader: BoxedReader, mut codec: LineCodec, hooks: Hooks) {
        let mut buffer = BytesMut::with_capacity(READ_BUFFER_SIZE);
        let mut failures: u32 = 0;

        loop {
            loop {
                if self.cancel.is_cancelled() {
                    debug!("Connection {}: read loop exiting.", self.id);
                    return;
                }
                match codec.decode(&mut buffer) {
                    Ok(Some(line)) => self.handle_line(line, &hooks).await,
                    Ok(None) => break,
                    Err(e) => {
                        warn!("Connection {}: {}", self.id, e);
                        self.terminate(DisconnectReason::ProtocolViolation, &hooks)
                            .await;
                        return;
                    }
                }
            }

            let result = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    debug!("Connection {}: read loop exiting.", self.id);
                    return;
                }
                res = reader.read_buf(&mut buffer) => res,
            };

            match result {
                Ok(0) => {
                    if let Ok(Some(line)) = codec.decode_eof(&mut buffer) {
                        self.handle_line(line, &hooks).await;
                    }
                    self.terminate(DisconnectReason::PeerClosed, &hooks).await;
                    return;
                }
                Ok(_) => failures = 0,
                Err(e) if is_transient(&e) && failures < MAX_TRANSIENT_READ_FAILURES => {
                    failures += 1;
                    let delay = retry_delay(failures);
                    debug!(
                        "Connection {}: transient read error ({}), retrying in {:?}.",
                        self.id, e, delay
                    );
                    tokio::select! {
                        biased;
                        _ = self.cancel.cancelled() => return,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Err(e) => {
                    if is_normal_disconnect(&e) {
                        debug!("Connection {}: closed by peer: {}", self.id, e);
                    } else {
                        warn!("Connection {}: read error: {}", self.id, e);
                    }
                    self.terminate(DisconnectReason::TransportError, &hooks).await;
                    return;
                }
            }
        }
    }

    /// Records one inbound line and hands it to the matching hook.
    async fn handle_line(self: &Arc<Self>, line: String, hooks: &Hooks) {
        debug!("Connection {}: received {:?}", self.id, line);
        let Some(sequence) = self.record_line(&line) else {
            return;
        };
        metrics::MESSAGES_RECEIVED_TOTAL.inc();

        if sequence == 0 {
            info!("Connection {}: identified as device '{}'.", self.id, line);
            if let Some(hook) = &hooks.on_identified {
                hook(self.clone()).await;
            }
        } else if let Some(hook) = &hooks.on_message {
            hook(self.clone(), line).await;
        }
    }

    /// Applies a line to the session state under a single lock acquisition.
    /// Returns the line's sequence number, or `None` for an empty keepalive line.
    fn record_line(&self, line: &str) -> Option<u64> {
        let mut state = self.state.lock();
        state.touch();
        if line.is_empty() {
            return None;
        }
        if let Some(status) = self.status_codes.classify(line) {
            state.status = status;
        }
        let sequence = state.sequence;
        if sequence == 0 {
            state.device_id = Some(line.to_string());
        }
        state.sequence += 1;
        Some(sequence)
    }

    /// Fires the timeout hook on every check while the device stays silent.
    async fn watch_idle(
        self: Arc<Self>,
        check_interval: Duration,
        idle_timeout: Duration,
        on_timeout: Option<ConnectionHook>,
    ) {
        let mut ticker = tokio::time::interval_at(Instant::now() + check_interval, check_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    debug!("Connection {}: idle watchdog exiting.", self.id);
                    return;
                }
                _ = ticker.tick() => {
                    let idle = self.idle_for();
                    if idle > idle_timeout {
                        warn!(
                            "Connection {}: idle for {:?}, limit is {:?}.",
                            self.id, idle, idle_timeout
                        );
                        metrics::IDLE_TIMEOUTS_TOTAL.inc();
                        if let Some(hook) = &on_timeout {
                            hook(self.clone()).await;
                        }
                    }
                }
            }
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .finish_non_exhaustive()
    }
}

/// Errors after which a retried read may succeed.
fn is_transient(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        ErrorKind::Interrupted | ErrorKind::WouldBlock | ErrorKind::TimedOut
    )
}

/// Helper function to check for non-critical disconnection errors.
fn is_normal_disconnect(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        ErrorKind::ConnectionReset
            | ErrorKind::BrokenPipe
            | ErrorKind::UnexpectedEof
            | ErrorKind::ConnectionAborted
    )
}

fn retry_delay(attempt: u32) -> Duration {
    let factor = 1u32 << attempt.saturating_sub(1).min(5);
    (READ_RETRY_BASE_DELAY * factor).min(READ_RETRY_MAX_DELAY)
}
