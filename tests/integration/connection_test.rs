// tests/integration/connection_test.rs

//! Tests for a single `Connection`: identity binding, status tracking,
//! outbound writes, self-termination and the idle watchdog.

use super::fixtures::*;
use super::test_helpers::{DUPLEX_CAPACITY, TestDevice, eventually};
use lockgate::connection::{Connection, ConnectionOptions, DisconnectReason, Framing};
use lockgate::core::GatewayError;
use lockgate::core::protocol::LockStatus;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::io::{self, ErrorKind};
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::time::Instant;

/// Everything the hooks of a recorded connection observed.
#[derive(Default)]
struct Recorder {
    messages: Mutex<Vec<String>>,
    identified: AtomicUsize,
    timeouts: AtomicUsize,
    disconnects: Mutex<Vec<DisconnectReason>>,
}

fn recorded_options(recorder: &Arc<Recorder>) -> ConnectionOptions {
    let on_message = recorder.clone();
    let on_identified = recorder.clone();
    let on_timeout = recorder.clone();
    let on_disconnect = recorder.clone();
    ConnectionOptions::default()
        .on_message(move |_, msg| {
            let recorder = on_message.clone();
            async move { recorder.messages.lock().push(msg) }
        })
        .on_identified(move |_| {
            let recorder = on_identified.clone();
            async move {
                recorder.identified.fetch_add(1, Ordering::SeqCst);
            }
        })
        .on_timeout(move |_| {
            let recorder = on_timeout.clone();
            async move {
                recorder.timeouts.fetch_add(1, Ordering::SeqCst);
            }
        })
        .on_disconnect(move |_, reason| {
            let recorder = on_disconnect.clone();
            async move { recorder.disconnects.lock().push(reason) }
        })
}

async fn start(options: ConnectionOptions) -> TestDevice {
    let (device_side, gateway_side) = tokio::io::duplex(DUPLEX_CAPACITY);
    let conn = Connection::start(gateway_side, None, options).await;
    TestDevice {
        conn,
        io: device_side,
    }
}

#[tokio::test]
async fn test_first_line_binds_identity_and_is_not_forwarded() {
    let recorder = Arc::new(Recorder::default());
    let mut device = start(recorded_options(&recorder)).await;
    assert_eq!(device.conn.device_id(), None);

    device.send_line(DEVICE_A).await;
    device.send_line(STATUS_OPEN).await;
    device.send_line("hello").await;

    assert!(eventually(|| recorder.messages.lock().len() == 2).await);
    assert_eq!(*recorder.messages.lock(), vec![STATUS_OPEN, "hello"]);
    assert_eq!(device.conn.device_id().as_deref(), Some(DEVICE_A));
    assert_eq!(recorder.identified.load(Ordering::SeqCst), 1);
    assert_eq!(device.conn.received_count(), 3);
}

#[tokio::test]
async fn test_lines_in_one_write_are_split_in_order() {
    let recorder = Arc::new(Recorder::default());
    let mut device = start(recorded_options(&recorder)).await;

    device
        .io
        .write_all(b"LOCK-9\r\nfirst\nsecond\r\nthird\r\n")
        .await
        .unwrap();

    assert!(eventually(|| recorder.messages.lock().len() == 3).await);
    assert_eq!(*recorder.messages.lock(), vec!["first", "second", "third"]);
    assert_eq!(device.conn.device_id().as_deref(), Some("LOCK-9"));
}

#[tokio::test]
async fn test_empty_lines_are_keepalives_only() {
    let recorder = Arc::new(Recorder::default());
    let mut device = start(recorded_options(&recorder)).await;

    device.send_line("").await;
    device.send_line(DEVICE_A).await;
    device.send_line("").await;
    device.send_line("ping").await;

    assert!(eventually(|| recorder.messages.lock().len() == 1).await);
    assert_eq!(device.conn.device_id().as_deref(), Some(DEVICE_A));
    assert_eq!(*recorder.messages.lock(), vec!["ping"]);
    assert_eq!(device.conn.received_count(), 2);
}

#[tokio::test]
async fn test_every_status_code_maps_to_its_state() {
    let recorder = Arc::new(Recorder::default());
    let mut device = start(recorded_options(&recorder)).await;
    device.send_line(DEVICE_A).await;
    assert_eq!(device.conn.status(), LockStatus::Closed);

    let reports = [
        (STATUS_OPEN, LockStatus::Open),
        (STATUS_CLOSED, LockStatus::Closed),
        (STATUS_OPEN_ALT, LockStatus::Open),
        (STATUS_CLOSED_ALT, LockStatus::Closed),
    ];
    for (i, (code, expected)) in reports.into_iter().enumerate() {
        device.send_line(code).await;
        assert!(eventually(|| recorder.messages.lock().len() == i + 1).await);
        assert_eq!(device.conn.status(), expected, "after {code}");
    }
}

#[tokio::test]
async fn test_unknown_code_leaves_status_and_is_forwarded() {
    let recorder = Arc::new(Recorder::default());
    let mut device = start(recorded_options(&recorder)).await;
    device.send_line(DEVICE_A).await;
    device.send_line(STATUS_OPEN).await;
    device.send_line("01FF").await;

    assert!(eventually(|| recorder.messages.lock().len() == 2).await);
    assert_eq!(device.conn.status(), LockStatus::Open);
    assert_eq!(recorder.messages.lock()[1], "01FF");
}

#[tokio::test]
async fn test_open_then_close_reflected_in_property() {
    let recorder = Arc::new(Recorder::default());
    let mut device = start(recorded_options(&recorder)).await;
    device.send_line(DEVICE_A).await;

    device.send_line(STATUS_OPEN).await;
    assert!(eventually(|| recorder.messages.lock().len() == 1).await);
    let property = device.conn.property();
    assert_eq!(property.device_id, DEVICE_A);
    assert_eq!(property.status, LockStatus::Open);

    device.send_line(STATUS_CLOSED).await;
    assert!(eventually(|| recorder.messages.lock().len() == 2).await);
    let later = device.conn.property();
    assert_eq!(later.status, LockStatus::Closed);
    assert!(later.last_message_time >= property.last_message_time);
}

#[tokio::test]
async fn test_set_status_accepts_only_known_codes() {
    let device = start(ConnectionOptions::default()).await;

    assert!(device.conn.set_status(STATUS_OPEN_ALT));
    assert_eq!(device.conn.status(), LockStatus::Open);
    assert!(!device.conn.set_status("XXXX"));
    assert_eq!(device.conn.status(), LockStatus::Open);
    assert!(device.conn.set_status(STATUS_CLOSED_ALT));
    assert_eq!(device.conn.status(), LockStatus::Closed);
}

#[tokio::test]
async fn test_set_device_id_rebinds_identity() {
    let device = start(ConnectionOptions::default()).await;
    device.conn.set_device_id("manual");
    assert_eq!(device.conn.device_id().as_deref(), Some("manual"));
    assert_eq!(device.conn.property().device_id, "manual");
}

#[tokio::test]
async fn test_write_reaches_device_and_keeps_status() {
    let recorder = Arc::new(Recorder::default());
    let mut device = start(recorded_options(&recorder)).await;
    device.send_line(DEVICE_A).await;
    device.send_line(STATUS_OPEN).await;
    assert!(eventually(|| recorder.messages.lock().len() == 1).await);

    let written = device.conn.write(CMD_CLOSE.as_bytes()).await.unwrap();
    assert_eq!(written, CMD_CLOSE.len());
    assert_eq!(device.conn.property().status, LockStatus::Open);
    assert_eq!(device.read_exact_text(CMD_CLOSE.len()).await, CMD_CLOSE);
}

#[tokio::test]
async fn test_greeting_is_sent_on_start() {
    let mut device = start(ConnectionOptions::default().with_greeting("who are you?")).await;
    assert_eq!(device.read_exact_text(12).await, "who are you?");
}

#[tokio::test]
async fn test_close_is_idempotent_and_blocks_writes() {
    let recorder = Arc::new(Recorder::default());
    let mut device = start(recorded_options(&recorder)).await;

    device.conn.close().await.unwrap();
    device.conn.close().await.unwrap();
    assert!(device.conn.is_closed());

    let err = device.conn.write(b"0108").await.unwrap_err();
    assert_eq!(err, GatewayError::ConnectionClosed);

    // The device sees the stream end; an explicit close fires no disconnect hook.
    assert!(device.read_until_closed().await.is_empty());
    assert!(recorder.disconnects.lock().is_empty());
}

#[tokio::test]
async fn test_concurrent_close_calls_are_harmless() {
    let device = start(ConnectionOptions::default()).await;
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let conn = device.conn.clone();
            tokio::spawn(async move { conn.close().await })
        })
        .collect();
    for handle in handles {
        assert!(handle.await.unwrap().is_ok());
    }
    assert!(device.conn.is_closed());
}

#[tokio::test]
async fn test_lines_after_close_are_ignored() {
    let recorder = Arc::new(Recorder::default());
    let mut device = start(recorded_options(&recorder)).await;
    device.send_line(DEVICE_A).await;
    assert!(eventually(|| device.conn.received_count() == 1).await);

    device.conn.close().await.unwrap();
    let _ = device.io.write_all(b"010A\r\n").await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(device.conn.received_count(), 1);
    assert!(recorder.messages.lock().is_empty());
}

#[tokio::test]
async fn test_peer_close_terminates_connection() {
    let recorder = Arc::new(Recorder::default());
    let mut device = start(recorded_options(&recorder)).await;
    device.send_line(DEVICE_A).await;
    assert!(eventually(|| device.conn.received_count() == 1).await);

    let conn = device.conn.clone();
    drop(device);

    assert!(eventually(|| conn.is_closed()).await);
    assert!(eventually(|| recorder.disconnects.lock().len() == 1).await);
    assert_eq!(recorder.disconnects.lock()[0], DisconnectReason::PeerClosed);
}

#[tokio::test]
async fn test_unterminated_tail_is_delivered_at_eof() {
    let recorder = Arc::new(Recorder::default());
    let mut device = start(recorded_options(&recorder)).await;
    device.io.write_all(b"LOCK-7\r\nbye").await.unwrap();
    device.io.shutdown().await.unwrap();

    assert!(eventually(|| device.conn.is_closed()).await);
    assert_eq!(*recorder.messages.lock(), vec!["bye"]);
}

#[tokio::test]
async fn test_oversized_line_is_a_protocol_violation() {
    let recorder = Arc::new(Recorder::default());
    let options = recorded_options(&recorder).with_framing(Framing::Lines, 16);
    let mut device = start(options).await;

    device.io.write_all(&[b'x'; 64]).await.unwrap();

    assert!(eventually(|| device.conn.is_closed()).await);
    assert!(eventually(|| recorder.disconnects.lock().len() == 1).await);
    assert_eq!(
        recorder.disconnects.lock()[0],
        DisconnectReason::ProtocolViolation
    );
}

#[tokio::test]
async fn test_chunk_framing_takes_each_read_as_a_message() {
    let recorder = Arc::new(Recorder::default());
    let options = recorded_options(&recorder).with_framing(Framing::Chunks, 1024);
    let mut device = start(options).await;

    device.io.write_all(b"LOCK-3").await.unwrap();
    assert!(eventually(|| device.conn.device_id().is_some()).await);
    device.io.write_all(b"010A").await.unwrap();

    assert!(eventually(|| recorder.messages.lock().len() == 1).await);
    assert_eq!(device.conn.device_id().as_deref(), Some("LOCK-3"));
    assert_eq!(device.conn.status(), LockStatus::Open);
}

#[tokio::test(start_paused = true)]
async fn test_idle_connection_triggers_timeout_hook() {
    let recorder = Arc::new(Recorder::default());
    let options = recorded_options(&recorder)
        .with_idle_timeout(Duration::from_secs(1))
        .with_check_interval(Duration::from_secs(5));
    let _device = start(options).await;

    tokio::time::sleep(Duration::from_secs(4)).await;
    assert_eq!(recorder.timeouts.load(Ordering::SeqCst), 0);

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(recorder.timeouts.load(Ordering::SeqCst), 1);

    // A hook that does not close the connection fires again on the next check.
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(recorder.timeouts.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn test_traffic_keeps_connection_alive() {
    let recorder = Arc::new(Recorder::default());
    let options = recorded_options(&recorder)
        .with_idle_timeout(Duration::from_secs(4))
        .with_check_interval(Duration::from_secs(5));
    let mut device = start(options).await;

    for line in [DEVICE_A, HEARTBEAT, HEARTBEAT, HEARTBEAT] {
        device.send_line(line).await;
        tokio::time::sleep(Duration::from_secs(3)).await;
    }

    assert_eq!(recorder.timeouts.load(Ordering::SeqCst), 0);
    assert!(device.conn.idle_for() <= Duration::from_secs(4));
}

#[tokio::test(start_paused = true)]
async fn test_closed_connection_stops_watchdog() {
    let recorder = Arc::new(Recorder::default());
    let options = recorded_options(&recorder)
        .with_idle_timeout(Duration::from_secs(1))
        .with_check_interval(Duration::from_secs(5));
    let device = start(options).await;

    device.conn.close().await.unwrap();
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(recorder.timeouts.load(Ordering::SeqCst), 0);
}

/// One scripted outcome of a read on a `ScriptedTransport`.
enum ReadStep {
    Fail(ErrorKind),
    Data(&'static [u8]),
}

/// A transport whose reads follow a script, then stay pending forever.
/// Writes are accepted and discarded.
struct ScriptedTransport {
    steps: VecDeque<ReadStep>,
}

impl ScriptedTransport {
    fn new(steps: impl IntoIterator<Item = ReadStep>) -> Self {
        Self {
            steps: steps.into_iter().collect(),
        }
    }
}

impl AsyncRead for ScriptedTransport {
    fn poll_read(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.steps.pop_front() {
            Some(ReadStep::Fail(kind)) => Poll::Ready(Err(io::Error::from(kind))),
            Some(ReadStep::Data(bytes)) => {
                buf.put_slice(bytes);
                Poll::Ready(Ok(()))
            }
            None => Poll::Pending,
        }
    }
}

impl AsyncWrite for ScriptedTransport {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

#[tokio::test(start_paused = true)]
async fn test_transient_read_errors_are_retried_with_backoff() {
    let recorder = Arc::new(Recorder::default());
    let transport = ScriptedTransport::new([
        ReadStep::Fail(ErrorKind::Interrupted),
        ReadStep::Fail(ErrorKind::WouldBlock),
        ReadStep::Fail(ErrorKind::TimedOut),
        ReadStep::Data(b"LOCK-0001\r\n"),
    ]);
    let started = Instant::now();
    let conn = Connection::start(transport, None, recorded_options(&recorder)).await;

    assert!(eventually(|| conn.device_id().is_some()).await);

    // Three retries wait 50ms, 100ms and 200ms.
    assert!(started.elapsed() >= Duration::from_millis(350));
    assert_eq!(conn.device_id().as_deref(), Some(DEVICE_A));
    assert_eq!(recorder.identified.load(Ordering::SeqCst), 1);
    assert!(!conn.is_closed());
    assert!(recorder.disconnects.lock().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_successful_read_resets_transient_budget() {
    let recorder = Arc::new(Recorder::default());
    // Eight failures in total, but never more than four in a row.
    let mut steps: Vec<ReadStep> = (0..4).map(|_| ReadStep::Fail(ErrorKind::TimedOut)).collect();
    steps.push(ReadStep::Data(b"LOCK-0001\r\n"));
    steps.extend((0..4).map(|_| ReadStep::Fail(ErrorKind::TimedOut)));
    steps.push(ReadStep::Data(b"010A\r\n"));
    let conn = Connection::start(ScriptedTransport::new(steps), None, recorded_options(&recorder)).await;

    assert!(eventually(|| recorder.messages.lock().len() == 1).await);

    assert_eq!(conn.status(), LockStatus::Open);
    assert!(!conn.is_closed());
    assert!(recorder.disconnects.lock().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_persistent_transient_errors_end_the_session() {
    let recorder = Arc::new(Recorder::default());
    let steps = (0..6).map(|_| ReadStep::Fail(ErrorKind::TimedOut));
    let started = Instant::now();
    let conn = Connection::start(ScriptedTransport::new(steps), None, recorded_options(&recorder)).await;

    assert!(eventually(|| conn.is_closed()).await);

    // Five retries (50+100+200+400+800ms) before the sixth failure is terminal.
    assert!(started.elapsed() >= Duration::from_millis(1550));
    assert!(eventually(|| recorder.disconnects.lock().len() == 1).await);
    assert_eq!(
        *recorder.disconnects.lock(),
        vec![DisconnectReason::TransportError]
    );
}

#[tokio::test(start_paused = true)]
async fn test_connection_reset_ends_the_session_immediately() {
    let recorder = Arc::new(Recorder::default());
    let transport = ScriptedTransport::new([
        ReadStep::Data(b"LOCK-0001\r\n"),
        ReadStep::Fail(ErrorKind::ConnectionReset),
    ]);
    let started = Instant::now();
    let conn = Connection::start(transport, None, recorded_options(&recorder)).await;

    assert!(eventually(|| recorder.disconnects.lock().len() == 1).await);

    assert!(conn.is_closed());
    assert!(started.elapsed() < Duration::from_millis(50));
    assert_eq!(
        *recorder.disconnects.lock(),
        vec![DisconnectReason::TransportError]
    );
    assert_eq!(conn.device_id().as_deref(), Some(DEVICE_A));
}
