//! In-memory transport for tests and simulation
//!
//! Records every write and control-line change, and feeds inbound bytes to
//! the reader either from a scripted responder or from explicit injection.

use super::{ControlLines, TransportError, TransportStats, TransportTrait};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;

/// Scripted device side: called with every write, returns the bytes the
/// device answers with (empty for no answer).
pub type Responder = Box<dyn FnMut(&[u8]) -> Vec<u8> + Send>;

/// `None` marks end of input
type Inbound = Option<Bytes>;

/// Mock transport
pub struct MockTransport {
    open: AtomicBool,
    fail_open: AtomicBool,
    fail_writes: AtomicBool,
    writes: Mutex<Vec<Bytes>>,
    control_lines: Mutex<Vec<ControlLines>>,
    responder: Mutex<Option<Responder>>,
    inbound_tx: mpsc::UnboundedSender<Inbound>,
    inbound_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Inbound>>,
    stats: RwLock<TransportStats>,
}

impl MockTransport {
    /// Create a mock with no device behind it
    pub fn new() -> Self {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        Self {
            open: AtomicBool::new(false),
            fail_open: AtomicBool::new(false),
            fail_writes: AtomicBool::new(false),
            writes: Mutex::new(Vec::new()),
            control_lines: Mutex::new(Vec::new()),
            responder: Mutex::new(None),
            inbound_tx,
            inbound_rx: tokio::sync::Mutex::new(inbound_rx),
            stats: RwLock::new(TransportStats::default()),
        }
    }

    /// Create a mock whose inbound bytes are produced by `responder`
    pub fn with_responder<F>(responder: F) -> Self
    where
        F: FnMut(&[u8]) -> Vec<u8> + Send + 'static,
    {
        let mock = Self::new();
        *mock.responder.lock() = Some(Box::new(responder));
        mock
    }

    /// Push bytes to the reader as if the device sent them
    pub fn inject(&self, data: &[u8]) {
        if !data.is_empty() {
            let _ = self.inbound_tx.send(Some(Bytes::copy_from_slice(data)));
        }
    }

    /// Signal end of input to the reader
    pub fn end_input(&self) {
        let _ = self.inbound_tx.send(None);
    }

    /// Make the next `open` calls fail
    pub fn set_fail_open(&self, fail: bool) {
        self.fail_open.store(fail, Ordering::SeqCst);
    }

    /// Make the next `send` calls fail
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Every write observed so far, one entry per `send` call
    pub fn writes(&self) -> Vec<Bytes> {
        self.writes.lock().clone()
    }

    /// All written bytes concatenated in order
    pub fn written_bytes(&self) -> Vec<u8> {
        self.writes.lock().iter().flat_map(|w| w.iter().copied()).collect()
    }

    /// Forget recorded writes
    pub fn clear_writes(&self) {
        self.writes.lock().clear();
    }

    /// Every control-line state applied so far
    pub fn control_lines(&self) -> Vec<ControlLines> {
        self.control_lines.lock().clone()
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TransportTrait for MockTransport {
    async fn open(&self) -> Result<(), TransportError> {
        if self.fail_open.load(Ordering::SeqCst) {
            return Err(TransportError::PortNotFound("mock".to_string()));
        }
        self.open.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.open.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn send(&self, data: &[u8]) -> Result<usize, TransportError> {
        if !self.is_open() {
            return Err(TransportError::Closed);
        }
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(TransportError::SendError("mock write failure".to_string()));
        }

        self.writes.lock().push(Bytes::copy_from_slice(data));
        {
            let mut stats = self.stats.write();
            stats.bytes_sent += data.len() as u64;
            stats.writes += 1;
        }

        let reply = self.responder.lock().as_mut().map(|respond| respond(data));
        if let Some(reply) = reply {
            self.inject(&reply);
        }
        Ok(data.len())
    }

    async fn receive(&self) -> Result<Option<Bytes>, TransportError> {
        let next = self.inbound_rx.lock().await.recv().await;
        match next {
            Some(Some(bytes)) => {
                let mut stats = self.stats.write();
                stats.bytes_received += bytes.len() as u64;
                stats.chunks_received += 1;
                Ok(Some(bytes))
            }
            Some(None) | None => Ok(None),
        }
    }

    async fn set_control_lines(&self, lines: ControlLines) -> Result<(), TransportError> {
        if !self.is_open() {
            return Err(TransportError::Closed);
        }
        self.control_lines.lock().push(lines);
        Ok(())
    }

    fn connection_info(&self) -> String {
        "mock transport".to_string()
    }

    fn stats(&self) -> TransportStats {
        self.stats.read().clone()
    }
}
