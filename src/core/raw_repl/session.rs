//! Exclusive raw REPL session
//!
//! A session owns the wire from a successful negotiation until `close`.
//! While it is live the console's sends are dropped and device output is
//! routed to the session's consumer.

use super::negotiate;
use super::output::{ExecOutput, RawOutputParser};
use super::paste::{self, TransferMode, TransferReport};
use super::{ProbeOutcome, SessionCapability, EXIT_RAW};
use crate::core::error::LinkError;
use crate::core::link::{LinkEvent, LinkShared};
use crate::core::routing::RoutingMode;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

/// Session lifetime
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Owns the wire
    Active,
    /// `close` is running
    Closing,
    /// Released
    Closed,
}

/// Handle to the live raw REPL session
pub struct RawSession {
    shared: Arc<LinkShared>,
    id: u64,
    reason: String,
    capability: SessionCapability,
    state: Mutex<SessionState>,
    /// One transfer at a time: transfers are the only accumulator readers
    transfer: tokio::sync::Mutex<()>,
    transfers: AtomicUsize,
}

impl RawSession {
    pub(crate) fn new(
        shared: Arc<LinkShared>,
        id: u64,
        reason: &str,
        capability: SessionCapability,
    ) -> Self {
        Self {
            shared,
            id,
            reason: reason.to_string(),
            capability,
            state: Mutex::new(SessionState::Active),
            transfer: tokio::sync::Mutex::new(()),
            transfers: AtomicUsize::new(0),
        }
    }

    /// Reason tag the session was opened with
    pub fn reason(&self) -> &str {
        &self.reason
    }

    /// Negotiated capability
    pub fn capability(&self) -> SessionCapability {
        self.capability
    }

    /// Current state
    pub fn state(&self) -> SessionState {
        *self.state.lock()
    }

    /// Check if the session still owns the wire
    pub fn is_active(&self) -> bool {
        self.state() == SessionState::Active && self.shared.owns_session(self.id)
    }

    /// Send a program. Plain raw mode returns once the end-of-data byte is
    /// written; raw-paste returns once the device has acknowledged it.
    ///
    /// A device abort is reported in the [`TransferReport`], not as an error.
    /// Routing is back on the session afterwards whether this fails or the
    /// future is dropped mid-transfer.
    pub async fn send(&self, text: &str) -> Result<TransferReport, LinkError> {
        let _transfer = self.transfer.lock().await;
        if !self.is_active() {
            return Err(LinkError::NotConnected);
        }

        let payload = text.as_bytes();
        if !self.capability.use_raw_paste {
            return paste::send_plain(&self.shared, payload).await;
        }

        let router = &self.shared.router;
        router.set_mode(RoutingMode::ProtocolCapture);
        router.accumulator().reset();
        let _capture = CaptureRelease { session: self };

        self.send_raw_paste(payload).await
    }

    async fn send_raw_paste(&self, payload: &[u8]) -> Result<TransferReport, LinkError> {
        // The device leaves raw-paste after every program; re-enter it for
        // all but the first transfer.
        let window_size = if self.transfers.fetch_add(1, Ordering::SeqCst) == 0 {
            self.capability.window_size
        } else {
            match negotiate::probe_raw_paste(&self.shared).await? {
                ProbeOutcome::RawPasteConfirmed { window_size } => window_size,
                other => {
                    tracing::debug!(?other, "raw-paste not re-entered, sending in plain raw mode");
                    return paste::send_plain(&self.shared, payload).await;
                }
            }
        };

        paste::send_raw_paste(&self.shared, payload, window_size).await
    }

    /// Install the consumer for device output while the session is live
    pub fn on_data<F>(&self, callback: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        if self.shared.owns_session(self.id) {
            self.shared.router.set_session_sink(Some(Arc::new(callback)));
        }
    }

    /// Show text on the console consumer, in order with device output
    pub fn write_terminal(&self, text: &str) {
        self.shared.router.deliver_console(text);
    }

    /// Send a program and collect its output.
    ///
    /// Replaces the `on_data` consumer for the rest of the session.
    pub async fn exec(&self, code: &str) -> Result<ExecOutput, LinkError> {
        let parser = Arc::new(Mutex::new(RawOutputParser::default()));
        let finished = Arc::new(Notify::new());

        {
            let parser = Arc::clone(&parser);
            let finished = Arc::clone(&finished);
            self.on_data(move |text| {
                let mut parser = parser.lock();
                let was_complete = parser.is_complete();
                parser.feed(text);
                if !was_complete && parser.is_complete() {
                    finished.notify_one();
                }
            });
        }

        let report = self.send(code).await?;
        // A later transfer may have fallen back to plain mode
        parser.lock().set_expect_ok(report.mode == TransferMode::Plain);

        let timeout = self.shared.timings.exec_timeout();
        if tokio::time::timeout(timeout, finished.notified()).await.is_err() {
            return Err(LinkError::ExecTimeout(self.shared.timings.exec_timeout_ms));
        }

        let output = parser.lock().output();
        Ok(output)
    }

    /// Leave raw mode and release the wire.
    ///
    /// Routing flips to the console before the exit byte goes out so the
    /// device's friendly prompt reaches the console. Busy status, the data
    /// consumer, the capture buffer and exclusivity are released even when
    /// the exit write fails.
    pub async fn close(self) -> Result<(), LinkError> {
        *self.state.lock() = SessionState::Closing;
        if !self.shared.owns_session(self.id) {
            // Lost the wire to a disconnect; nothing left to release
            *self.state.lock() = SessionState::Closed;
            return Ok(());
        }

        let timings = &self.shared.timings;
        tokio::time::sleep(timings.close_drain()).await;

        let result = self.exit_raw_repl().await;
        self.release();
        result
    }

    async fn exit_raw_repl(&self) -> Result<(), LinkError> {
        self.shared.router.set_mode(RoutingMode::Console);
        self.shared.write_all(&[EXIT_RAW]).await?;
        tokio::time::sleep(self.shared.timings.close_settle()).await;
        Ok(())
    }

    fn release(&self) {
        if self.shared.release_session(self.id) {
            tracing::info!("Session '{}' closed", self.reason);
            self.shared.emit(LinkEvent::SessionClosed {
                reason: self.reason.clone(),
            });
        }
        *self.state.lock() = SessionState::Closed;
    }
}

/// Hands routing back to the session when a raw-paste transfer ends
struct CaptureRelease<'a> {
    session: &'a RawSession,
}

impl Drop for CaptureRelease<'_> {
    fn drop(&mut self) {
        let shared = &self.session.shared;
        if shared.owns_session(self.session.id) {
            shared.router.release_capture(RoutingMode::Session);
        }
    }
}

impl Drop for RawSession {
    fn drop(&mut self) {
        if self.state() != SessionState::Closed {
            if self.shared.owns_session(self.id) {
                tracing::warn!("Session '{}' dropped without close, releasing", self.reason);
            }
            self.release();
        }
    }
}

impl std::fmt::Debug for RawSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawSession")
            .field("id", &self.id)
            .field("reason", &self.reason)
            .field("capability", &self.capability)
            .field("state", &self.state())
            .finish()
    }
}
