//! Read routing
//!
//! One task reads the transport for the lifetime of a connection. Each chunk
//! either lands raw in the [`ByteAccumulator`] (protocol capture) or is
//! decoded to text and handed to whichever consumer currently owns the wire.

use super::accumulator::ByteAccumulator;
use super::codec::Utf8StreamDecoder;
use super::transport::{TransportError, TransportTrait};
use parking_lot::{ReentrantMutex, RwLock};
use std::cell::RefCell;
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Callback receiving decoded device output
pub type DataCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Where inbound bytes go. Exactly one is active at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RoutingMode {
    /// Decoded and delivered to the console consumer
    #[default]
    Console,
    /// Decoded and delivered to the live session's consumer
    Session,
    /// Appended raw to the byte accumulator, never decoded
    ProtocolCapture,
}

impl fmt::Display for RoutingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Console => write!(f, "console"),
            Self::Session => write!(f, "session"),
            Self::ProtocolCapture => write!(f, "capture"),
        }
    }
}

/// Why the read loop stopped
#[derive(Debug)]
pub enum ReadLoopExit {
    /// Cancelled by disconnect
    Cancelled,
    /// The transport reported end of input
    EndOfInput,
    /// The transport failed
    Failed(TransportError),
}

/// Dispatches inbound chunks according to the current [`RoutingMode`]
pub struct ReadRouter {
    /// Held across every dispatch and every mode change so the two are
    /// totally ordered. Consumer callbacks run under it and may re-enter the
    /// router on the same thread; the decoder is never borrowed across one.
    delivery: ReentrantMutex<RefCell<Utf8StreamDecoder>>,
    mode: RwLock<RoutingMode>,
    accumulator: ByteAccumulator,
    console: RwLock<Option<DataCallback>>,
    session: RwLock<Option<DataCallback>>,
}

impl ReadRouter {
    /// Create a router in console mode with no consumers
    pub fn new() -> Self {
        Self {
            delivery: ReentrantMutex::new(RefCell::new(Utf8StreamDecoder::new())),
            mode: RwLock::new(RoutingMode::Console),
            accumulator: ByteAccumulator::new(),
            console: RwLock::new(None),
            session: RwLock::new(None),
        }
    }

    /// Current routing mode
    pub fn mode(&self) -> RoutingMode {
        *self.mode.read()
    }

    /// Capture buffer
    pub fn accumulator(&self) -> &ByteAccumulator {
        &self.accumulator
    }

    /// Route one inbound chunk
    pub fn route(&self, chunk: &[u8]) {
        let delivery = self.delivery.lock();
        let mode = self.mode();
        match mode {
            RoutingMode::ProtocolCapture => self.accumulator.append(chunk),
            RoutingMode::Console | RoutingMode::Session => {
                let text = delivery.borrow_mut().decode(chunk);
                self.deliver(mode, &text);
            }
        }
    }

    /// Switch routing mode. Engaging capture drops any half-decoded character.
    pub fn set_mode(&self, mode: RoutingMode) {
        let delivery = self.delivery.lock();
        let previous = std::mem::replace(&mut *self.mode.write(), mode);
        if previous != mode {
            if mode == RoutingMode::ProtocolCapture {
                delivery.borrow_mut().reset();
            }
            tracing::trace!(from = %previous, to = %mode, "routing mode changed");
        }
    }

    /// Leave capture for a text mode, delivering whatever is still queued in
    /// the accumulator to the new consumer before any later chunk.
    pub fn release_capture(&self, to: RoutingMode) -> usize {
        let delivery = self.delivery.lock();
        let leftover = self.accumulator.drain();
        *self.mode.write() = to;
        tracing::trace!(to = %to, leftover = leftover.len(), "capture released");

        if to != RoutingMode::ProtocolCapture && !leftover.is_empty() {
            let text = {
                let mut decoder = delivery.borrow_mut();
                decoder.reset();
                decoder.decode(&leftover)
            };
            self.deliver(to, &text);
        }
        leftover.len()
    }

    /// Deliver locally generated text to the console consumer, ordered with
    /// device output.
    pub fn deliver_console(&self, text: &str) {
        let _ordering = self.delivery.lock();
        self.deliver(RoutingMode::Console, text);
    }

    /// Install or clear the console consumer
    pub fn set_console_sink(&self, sink: Option<DataCallback>) {
        *self.console.write() = sink;
    }

    /// Install or clear the session consumer
    pub fn set_session_sink(&self, sink: Option<DataCallback>) {
        *self.session.write() = sink;
    }

    fn deliver(&self, mode: RoutingMode, text: &str) {
        if text.is_empty() {
            return;
        }
        let sink = match mode {
            RoutingMode::Session => self.session.read().clone(),
            _ => self.console.read().clone(),
        };
        match sink {
            Some(sink) => sink(text),
            None => tracing::trace!(mode = %mode, len = text.len(), "no consumer, output dropped"),
        }
    }
}

impl Default for ReadRouter {
    fn default() -> Self {
        Self::new()
    }
}

/// Read the transport until cancelled, end of input, or a read failure
pub(crate) async fn run_read_loop(
    router: &ReadRouter,
    transport: &dyn TransportTrait,
    cancel: &CancellationToken,
) -> ReadLoopExit {
    loop {
        let chunk = tokio::select! {
            biased;
            () = cancel.cancelled() => return ReadLoopExit::Cancelled,
            chunk = transport.receive() => chunk,
        };

        match chunk {
            Ok(Some(bytes)) => router.route(&bytes),
            Ok(None) => return ReadLoopExit::EndOfInput,
            Err(e) => return ReadLoopExit::Failed(e),
        }
    }
}
