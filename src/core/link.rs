//! Device link engine
//!
//! Owns the connection to one device and multiplexes its byte stream
//! between the always-available console and at most one exclusive raw REPL
//! session.

use super::codec::hex_preview;
use super::console::ConsoleShell;
use super::error::LinkError;
use super::raw_repl::{
    negotiate, RawSession, SessionCapability, INTERRUPT, SOFT_RESET, WAKE_NEWLINE,
};
use super::routing::{run_read_loop, ReadLoopExit, ReadRouter, RoutingMode};
use super::timings::LinkTimings;
use super::transport::{ControlLines, TransportError, TransportStats, TransportTrait};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// No live session
const NO_SESSION: u64 = 0;

/// What the link is busy with, for observers
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BusyStatus {
    /// Why the session was opened
    pub reason: String,
    /// Current step, if any
    pub detail: Option<String>,
}

impl BusyStatus {
    /// Busy for `reason` with no detail
    pub fn new(reason: &str) -> Self {
        Self {
            reason: reason.to_string(),
            detail: None,
        }
    }

    /// Attach a detail
    #[must_use]
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// Link events
#[derive(Debug, Clone)]
pub enum LinkEvent {
    /// Connected; carries the transport's connection info
    Connected(String),
    /// Disconnected
    Disconnected,
    /// The read loop stopped on its own (end of input or read failure)
    ReadLoopEnded(String),
    /// A session finished negotiating
    SessionOpened {
        /// Session reason tag
        reason: String,
        /// Negotiated capability
        capability: SessionCapability,
    },
    /// A session released the wire
    SessionClosed {
        /// Session reason tag
        reason: String,
    },
    /// Busy status changed
    BusyChanged(Option<BusyStatus>),
}

struct ReaderHandle {
    id: u64,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl ReaderHandle {
    /// Cancel the in-flight read and wait for the loop to finish
    async fn shutdown(&mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::warn!("Read loop task failed: {}", e);
            }
        }
    }
}

impl Drop for ReaderHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

struct Connection {
    info: String,
    connected_at: Instant,
    reader: Option<ReaderHandle>,
}

/// State shared by the link, its console and its session
pub(crate) struct LinkShared {
    pub(crate) transport: Arc<dyn TransportTrait>,
    pub(crate) timings: LinkTimings,
    pub(crate) router: Arc<ReadRouter>,
    /// Serializes connect and disconnect
    lifecycle: tokio::sync::Mutex<()>,
    connection: Mutex<Option<Connection>>,
    live_session: AtomicU64,
    next_session: AtomicU64,
    next_reader: AtomicU64,
    busy: watch::Sender<Option<BusyStatus>>,
    events: broadcast::Sender<LinkEvent>,
}

impl LinkShared {
    pub(crate) fn is_connected(&self) -> bool {
        self.connection.lock().is_some()
    }

    pub(crate) fn session_active(&self) -> bool {
        self.live_session.load(Ordering::SeqCst) != NO_SESSION
    }

    pub(crate) fn owns_session(&self, id: u64) -> bool {
        self.live_session.load(Ordering::SeqCst) == id
    }

    pub(crate) fn emit(&self, event: LinkEvent) {
        let _ = self.events.send(event);
    }

    pub(crate) fn set_busy(&self, status: Option<BusyStatus>) {
        let previous = self.busy.send_replace(status.clone());
        if previous != status {
            self.emit(LinkEvent::BusyChanged(status));
        }
    }

    /// Write once, returning how many bytes the transport accepted
    pub(crate) async fn write(&self, data: &[u8]) -> Result<usize, LinkError> {
        if !self.is_connected() {
            return Err(LinkError::NotConnected);
        }
        tracing::trace!(len = data.len(), bytes = %hex_preview(data, 32), "tx");
        Ok(self.transport.send(data).await?)
    }

    /// Write every byte of `data`
    pub(crate) async fn write_all(&self, mut data: &[u8]) -> Result<(), LinkError> {
        while !data.is_empty() {
            let written = self.write(data).await?;
            if written == 0 {
                return Err(TransportError::SendError("transport accepted no bytes".into()).into());
            }
            data = &data[written.min(data.len())..];
        }
        Ok(())
    }

    /// Claim exclusivity for session `id`. Check and set are one atomic step.
    /// The claim is released when the returned guard drops unless it was
    /// handed over with [`SessionClaim::keep`].
    pub(crate) fn claim_session(&self, id: u64) -> Option<SessionClaim<'_>> {
        self.live_session
            .compare_exchange(NO_SESSION, id, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| SessionClaim {
                shared: self,
                id,
                kept: false,
            })
    }

    /// Release session `id` if it is still the live one. Returns whether
    /// anything was released.
    pub(crate) fn release_session(&self, id: u64) -> bool {
        if !self.owns_session(id) {
            return false;
        }
        self.clear_session_state();
        self.live_session
            .compare_exchange(id, NO_SESSION, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    fn clear_session_state(&self) {
        self.set_busy(None);
        self.router.set_session_sink(None);
        self.router.accumulator().reset();
        self.router.set_mode(RoutingMode::Console);
    }

    fn next_session_id(&self) -> u64 {
        self.next_session.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn spawn_reader(self: &Arc<Self>) -> ReaderHandle {
        let id = self.next_reader.fetch_add(1, Ordering::SeqCst) + 1;
        let cancel = CancellationToken::new();

        let router = Arc::clone(&self.router);
        let transport = Arc::clone(&self.transport);
        let shared: Weak<Self> = Arc::downgrade(self);
        let token = cancel.clone();

        let task = tokio::spawn(async move {
            let exit = run_read_loop(&router, transport.as_ref(), &token).await;
            if let Some(shared) = shared.upgrade() {
                shared.on_reader_exit(id, exit);
            }
        });

        ReaderHandle {
            id,
            cancel,
            task: Some(task),
        }
    }

    fn on_reader_exit(&self, id: u64, exit: ReadLoopExit) {
        let reason = match exit {
            ReadLoopExit::Cancelled => return,
            ReadLoopExit::EndOfInput => {
                tracing::info!("Device stream ended");
                "end of input".to_string()
            }
            ReadLoopExit::Failed(e) => {
                tracing::warn!("Read loop failed: {}", e);
                e.to_string()
            }
        };

        // A newer connection may have replaced ours while we were exiting
        let mut connection = self.connection.lock();
        if let Some(conn) = connection.as_mut() {
            if conn.reader.as_ref().is_some_and(|reader| reader.id == id) {
                conn.reader = None;
            }
        }
        drop(connection);

        self.emit(LinkEvent::ReadLoopEnded(reason));
    }

    /// Stop the reader, release every session-owned resource and close the
    /// transport
    async fn tear_down(&self) -> Result<(), TransportError> {
        let connection = self.connection.lock().take();
        if let Some(mut connection) = connection {
            if let Some(reader) = connection.reader.as_mut() {
                reader.shutdown().await;
            }
        }

        self.live_session.store(NO_SESSION, Ordering::SeqCst);
        self.clear_session_state();
        self.transport.close().await
    }
}

/// Session exclusivity held while a session is being opened
pub(crate) struct SessionClaim<'a> {
    shared: &'a LinkShared,
    id: u64,
    kept: bool,
}

impl SessionClaim<'_> {
    /// Hand the claim over to the opened session
    fn keep(mut self) -> u64 {
        self.kept = true;
        self.id
    }
}

impl Drop for SessionClaim<'_> {
    fn drop(&mut self) {
        if !self.kept && self.shared.release_session(self.id) {
            tracing::debug!(session = self.id, "unfinished session open rolled back");
        }
    }
}

/// Connection to one device over a byte transport
#[derive(Clone)]
pub struct DeviceLink {
    shared: Arc<LinkShared>,
}

impl DeviceLink {
    /// Create a link with default timings. Nothing is opened yet.
    pub fn new(transport: Arc<dyn TransportTrait>) -> Self {
        Self::with_timings(transport, LinkTimings::default())
    }

    /// Create a link with explicit timings
    pub fn with_timings(transport: Arc<dyn TransportTrait>, timings: LinkTimings) -> Self {
        let (busy, _) = watch::channel(None);
        let (events, _) = broadcast::channel(256);

        Self {
            shared: Arc::new(LinkShared {
                transport,
                timings,
                router: Arc::new(ReadRouter::new()),
                lifecycle: tokio::sync::Mutex::new(()),
                connection: Mutex::new(None),
                live_session: AtomicU64::new(NO_SESSION),
                next_session: AtomicU64::new(NO_SESSION),
                next_reader: AtomicU64::new(0),
                busy,
                events,
            }),
        }
    }

    /// Open the transport, start reading and wake the interpreter.
    ///
    /// On failure nothing is kept: the reader is stopped and the transport
    /// closed. Connecting an already connected link does nothing.
    pub async fn connect(&self) -> Result<(), LinkError> {
        let shared = &self.shared;
        let _lifecycle = shared.lifecycle.lock().await;
        if shared.is_connected() {
            tracing::debug!("connect() on an open link ignored");
            return Ok(());
        }

        shared.transport.open().await?;
        if let Err(e) = self.bring_up().await {
            tracing::warn!("Connect failed: {}", e);
            if let Err(close_err) = shared.tear_down().await {
                tracing::debug!("Close after failed connect: {}", close_err);
            }
            return Err(e);
        }
        Ok(())
    }

    async fn bring_up(&self) -> Result<(), LinkError> {
        let shared = &self.shared;
        let timings = &shared.timings;

        shared.transport.set_control_lines(ControlLines::CONNECTED).await?;
        tokio::time::sleep(timings.control_settle()).await;

        let info = shared.transport.connection_info();
        let reader = shared.spawn_reader();
        *shared.connection.lock() = Some(Connection {
            info: info.clone(),
            connected_at: Instant::now(),
            reader: Some(reader),
        });

        // Interrupt, soft reset, newline: leave the interpreter at an idle prompt
        shared.write_all(&[INTERRUPT]).await?;
        tokio::time::sleep(timings.wake_gap()).await;
        shared.write_all(&[SOFT_RESET]).await?;
        tokio::time::sleep(timings.wake_gap()).await;
        shared.write_all(WAKE_NEWLINE).await?;

        tracing::info!("Connected to {}", info);
        shared.emit(LinkEvent::Connected(info));
        Ok(())
    }

    /// Stop reading and close the transport. A live session loses the wire;
    /// busy status and routing are reset. Does nothing when not connected.
    pub async fn disconnect(&self) -> Result<(), LinkError> {
        let shared = &self.shared;
        let _lifecycle = shared.lifecycle.lock().await;
        if !shared.is_connected() {
            return Ok(());
        }

        let result = shared.tear_down().await;
        tracing::info!("Disconnected");
        shared.emit(LinkEvent::Disconnected);
        result.map_err(LinkError::from)
    }

    /// Enter raw REPL mode and open the exclusive session.
    ///
    /// Fails with [`LinkError::NotConnected`] without a connection and with
    /// [`LinkError::SessionAlreadyActive`] while another session is live.
    /// A failed or cancelled negotiation leaves no busy status and routes to
    /// the console.
    pub async fn open_session(&self, reason: &str) -> Result<RawSession, LinkError> {
        let shared = &self.shared;
        if !shared.is_connected() {
            return Err(LinkError::NotConnected);
        }

        let id = shared.next_session_id();
        let Some(claim) = shared.claim_session(id) else {
            return Err(LinkError::SessionAlreadyActive);
        };
        shared.set_busy(Some(BusyStatus::new(reason).with_detail("negotiating")));

        let capability = match negotiate::negotiate(shared).await {
            Ok(capability) => capability,
            Err(e) => {
                tracing::warn!("Session '{}' negotiation failed: {}", reason, e);
                return Err(e);
            }
        };

        shared.router.accumulator().reset();
        shared.router.set_mode(RoutingMode::Session);
        shared.set_busy(Some(BusyStatus::new(reason)));

        if !shared.owns_session(id) {
            // A disconnect took the wire while negotiating
            if !shared.session_active() {
                shared.clear_session_state();
            }
            tracing::warn!("Session '{}' lost the link during negotiation", reason);
            return Err(LinkError::NotConnected);
        }

        tracing::info!("Session '{}' open: {}", reason, capability);
        shared.emit(LinkEvent::SessionOpened {
            reason: reason.to_string(),
            capability,
        });
        let id = claim.keep();
        Ok(RawSession::new(Arc::clone(shared), id, reason, capability))
    }

    /// Console handle; cheap to clone
    pub fn console(&self) -> ConsoleShell {
        ConsoleShell::new(Arc::clone(&self.shared))
    }

    /// Check if connected
    pub fn is_connected(&self) -> bool {
        self.shared.is_connected()
    }

    /// Check if a session is live
    pub fn session_active(&self) -> bool {
        self.shared.session_active()
    }

    /// Current routing mode
    pub fn routing_mode(&self) -> RoutingMode {
        self.shared.router.mode()
    }

    /// Current busy status
    pub fn busy_status(&self) -> Option<BusyStatus> {
        self.shared.busy.borrow().clone()
    }

    /// Observe busy status changes
    pub fn watch_busy(&self) -> watch::Receiver<Option<BusyStatus>> {
        self.shared.busy.subscribe()
    }

    /// Subscribe to link events
    pub fn subscribe(&self) -> broadcast::Receiver<LinkEvent> {
        self.shared.events.subscribe()
    }

    /// Connection info string while connected
    pub fn connection_info(&self) -> Option<String> {
        self.shared.connection.lock().as_ref().map(|c| c.info.clone())
    }

    /// Time since connect
    pub fn uptime(&self) -> Option<Duration> {
        self.shared
            .connection
            .lock()
            .as_ref()
            .map(|c| c.connected_at.elapsed())
    }

    /// Check if the read loop is still running
    pub fn is_reading(&self) -> bool {
        self.shared
            .connection
            .lock()
            .as_ref()
            .is_some_and(|c| c.reader.is_some())
    }

    /// Transport statistics
    pub fn stats(&self) -> TransportStats {
        self.shared.transport.stats()
    }

    /// Timings in use
    pub fn timings(&self) -> &LinkTimings {
        &self.shared.timings
    }
}
