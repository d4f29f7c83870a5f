//! Control session engine
//!
//! One socket, two directions, three kinds of traffic:
//!
//! - **Requests** go out with a freshly allocated transaction id and wait on
//!   a one-shot registered in the pending table.
//! - **Responses** come back carrying the same id; the reader thread matches
//!   them against the table and completes the waiter.
//! - **Unsolicited events** (key presses, unmatched frames) are published on
//!   the control-event channel.
//!
//! # Threading
//!
//! A single reader thread owns the receive path. Writers are serialized by
//! the transport mutex; the reader holds that mutex only for the duration of
//! one short-timeout read, so a write waits at most one poll interval.
//!
//! # Teardown
//!
//! Whatever ends the reader — remote EOF, a local `close()`, a socket error,
//! an unrecoverable framing violation — every pending transaction fails with
//! the terminal cause, and later sends fail with `ConnectionClosed`.

use crate::error::{Error, Result};
use crate::protocol::control::{self, FRAME_HEADER_LEN, FrameHeader};
use crate::session::pending::PendingTable;
use crate::transport::Transport;
use crate::types::{ControlEvent, KeyEvent};
use crossbeam_channel::Sender;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Largest control frame body accepted from the device
const MAX_FRAME_BODY: usize = 1024 * 1024;

/// Pause between empty reads to keep the transport mutex mostly free
const READER_IDLE_SLEEP: Duration = Duration::from_millis(1);

/// Why the reader loop ended; cloneable so it can fail many waiters
#[derive(Debug, Clone)]
enum TerminalCause {
    Closed(String),
    Io(String),
    Protocol(String),
}

impl TerminalCause {
    fn to_error(&self) -> Error {
        match self {
            TerminalCause::Closed(m) => Error::ConnectionClosed(m.clone()),
            TerminalCause::Io(m) => Error::Io(std::io::Error::other(m.clone())),
            TerminalCause::Protocol(m) => Error::Protocol(m.clone()),
        }
    }
}

/// A connected control session
pub struct ControlSession {
    transport: Arc<Mutex<Box<dyn Transport>>>,
    pending: Arc<PendingTable>,
    closed: Arc<AtomicBool>,
    next_tx_id: AtomicU32,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl ControlSession {
    /// Take ownership of a connected transport and start the reader thread
    pub fn start(transport: Box<dyn Transport>, events: Sender<ControlEvent>) -> Result<Self> {
        let transport = Arc::new(Mutex::new(transport));
        let pending = Arc::new(PendingTable::new());
        let closed = Arc::new(AtomicBool::new(false));

        let reader = thread::Builder::new()
            .name("xreal-control-reader".to_string())
            .spawn({
                let transport = Arc::clone(&transport);
                let pending = Arc::clone(&pending);
                let closed = Arc::clone(&closed);
                move || reader_loop(transport, pending, closed, events)
            })
            .map_err(Error::Io)?;

        Ok(ControlSession {
            transport,
            pending,
            closed,
            next_tx_id: AtomicU32::new(1),
            reader: Mutex::new(Some(reader)),
        })
    }

    /// True until the session is torn down (locally or by the remote)
    pub fn is_healthy(&self) -> bool {
        !self.closed.load(Ordering::Acquire)
    }

    /// Allocate the next transaction id: strictly positive, wrapping from
    /// `i32::MAX` back to 1
    fn allocate_tx_id(&self) -> u32 {
        self.next_tx_id
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |v| {
                Some(if v >= i32::MAX as u32 { 1 } else { v + 1 })
            })
            .expect("tx id update never fails")
    }

    /// Send a request and wait for the correlated response payload.
    ///
    /// The registration is removed on every exit path, so a timed-out
    /// transaction cannot leak or complete a later caller.
    pub fn send_transaction(
        &self,
        magic: u16,
        body: &[u8],
        timeout: Duration,
    ) -> Result<Vec<u8>> {
        if timeout.is_zero() {
            return Err(Error::InvalidArgument(
                "transaction timeout must be positive".to_string(),
            ));
        }
        if !self.is_healthy() {
            return Err(Error::ConnectionClosed("control session closed".to_string()));
        }

        let tx_id = self.allocate_tx_id();
        let key = (tx_id, magic);
        let receiver = self.pending.register(key)?;

        let frame = control::encode_frame(magic, tx_id, body);
        let write_result = {
            let mut transport = self.transport.lock();
            if !self.is_healthy() {
                Err(Error::ConnectionClosed("control session closed".to_string()))
            } else {
                transport.write_all(&frame).and_then(|_| transport.flush())
            }
        };
        if let Err(e) = write_result {
            self.pending.cancel(key);
            return Err(e);
        }
        log::debug!(
            "Sent transaction {} magic 0x{:04X} ({} body bytes)",
            tx_id,
            magic,
            body.len()
        );

        match receiver.recv_timeout(timeout) {
            Ok(completion) => completion,
            Err(std::sync::mpsc::RecvTimeoutError::Timeout) => {
                self.pending.cancel(key);
                Err(Error::Timeout(format!(
                    "transaction {} magic 0x{:04X} got no response within {:?}",
                    tx_id, magic, timeout
                )))
            }
            Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => {
                self.pending.cancel(key);
                Err(Error::ConnectionClosed("control session closed".to_string()))
            }
        }
    }

    /// Tear the session down: stop the reader, shut the socket, fail all
    /// pending transactions. Idempotent.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            log::info!("Closing control session");
            if let Err(e) = self.transport.lock().shutdown() {
                log::debug!("Transport shutdown during close: {}", e);
            }
        }
        // Join even when the reader terminated on its own (it sets the
        // closed flag too); the handle is taken exactly once
        if let Some(handle) = self.reader.lock().take() {
            if handle.join().is_err() {
                log::error!("Control reader thread panicked");
            }
        }
        // The reader's terminal path also drains; this covers a reader that
        // was already gone
        self.pending
            .fail_all(&|| Error::ConnectionClosed("control session closed".to_string()));
    }

    /// In-flight transaction count (diagnostic)
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

impl Drop for ControlSession {
    fn drop(&mut self) {
        self.close();
    }
}

/// Receive path: frame, dispatch, repeat until a terminal condition
fn reader_loop(
    transport: Arc<Mutex<Box<dyn Transport>>>,
    pending: Arc<PendingTable>,
    closed: Arc<AtomicBool>,
    events: Sender<ControlEvent>,
) {
    let mut buffer: Vec<u8> = Vec::with_capacity(4096);
    let mut chunk = [0u8; 4096];

    let cause = loop {
        if closed.load(Ordering::Acquire) {
            break TerminalCause::Closed("control session closed".to_string());
        }

        let read_result = {
            let mut transport = transport.lock();
            transport.read(&mut chunk)
        };
        let n = match read_result {
            Ok(0) => {
                thread::sleep(READER_IDLE_SLEEP);
                continue;
            }
            Ok(n) => n,
            Err(Error::ConnectionClosed(m)) => break TerminalCause::Closed(m),
            Err(e) => {
                if closed.load(Ordering::Acquire) {
                    // Socket errors during an active shutdown are just the
                    // shutdown being observed
                    break TerminalCause::Closed("control session closed".to_string());
                }
                break TerminalCause::Io(e.to_string());
            }
        };
        buffer.extend_from_slice(&chunk[..n]);

        match drain_frames(&mut buffer, &pending, &events) {
            Ok(()) => {}
            Err(e) => break TerminalCause::Protocol(e.to_string()),
        }
    };

    log::info!("Control reader exiting: {:?}", cause);
    closed.store(true, Ordering::Release);
    pending.fail_all(&|| cause.to_error());
}

/// Parse every complete frame sitting in the buffer
fn drain_frames(
    buffer: &mut Vec<u8>,
    pending: &PendingTable,
    events: &Sender<ControlEvent>,
) -> Result<()> {
    loop {
        if buffer.len() < FRAME_HEADER_LEN {
            return Ok(());
        }
        let mut header_bytes = [0u8; FRAME_HEADER_LEN];
        header_bytes.copy_from_slice(&buffer[..FRAME_HEADER_LEN]);
        let header = FrameHeader::decode(&header_bytes)?;
        let body_len = header.length as usize;
        if body_len > MAX_FRAME_BODY {
            return Err(Error::Protocol(format!(
                "control frame body of {} bytes exceeds limit",
                body_len
            )));
        }
        if buffer.len() < FRAME_HEADER_LEN + body_len {
            return Ok(());
        }

        let body = buffer[FRAME_HEADER_LEN..FRAME_HEADER_LEN + body_len].to_vec();
        buffer.drain(0..FRAME_HEADER_LEN + body_len);
        dispatch_frame(header.magic, body, pending, events);
    }
}

/// Route one inbound frame
fn dispatch_frame(
    magic: u16,
    body: Vec<u8>,
    pending: &PendingTable,
    events: &Sender<ControlEvent>,
) {
    if magic == control::magic::KEY_STATE_CHANGE {
        match KeyEvent::parse(&body) {
            Ok(event) => publish(events, ControlEvent::Key(event)),
            Err(e) => {
                log::warn!("Undecodable key-state frame: {}", e);
                publish(events, ControlEvent::Unknown { magic, payload: body });
            }
        }
        return;
    }

    if body.len() < control::TX_ID_LEN {
        log::debug!(
            "Inbound frame magic 0x{:04X} too short for a transaction id ({} bytes)",
            magic,
            body.len()
        );
        publish(events, ControlEvent::Unknown { magic, payload: body });
        return;
    }

    let wire_tx = i32::from_be_bytes([body[0], body[1], body[2], body[3]]);
    let tx_id = control::normalize_tx_id(wire_tx);
    let payload = body[control::TX_ID_LEN..].to_vec();
    if pending.resolve((tx_id, magic), payload) {
        log::debug!("Resolved transaction {} magic 0x{:04X}", tx_id, magic);
    } else {
        log::debug!(
            "No pending transaction {} for magic 0x{:04X}",
            tx_id,
            magic
        );
        publish(events, ControlEvent::Unknown { magic, payload: body });
    }
}

/// Non-blocking publish with bounded overflow: a slow consumer drops events
fn publish(events: &Sender<ControlEvent>, event: ControlEvent) {
    if events.try_send(event).is_err() {
        log::trace!("Control event channel full, dropping event");
    }
}
