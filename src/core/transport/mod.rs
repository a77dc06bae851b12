//! Byte transport layer
//!
//! The link engine only needs a duplex byte stream with two control lines.
//! Supports:
//! - Serial ports (RS-232, USB-Serial, USB CDC)
//! - An in-memory mock for tests and simulation

mod mock;
mod serial;

pub use mock::{MockTransport, Responder};
pub use serial::{list_ports, SerialConfig, SerialFlowControl, SerialParity, SerialTransport};

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

/// Transport error types
#[derive(Error, Debug)]
pub enum TransportError {
    /// Connection failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Port not found
    #[error("Port not found: {0}")]
    PortNotFound(String),

    /// Permission denied
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Transport is not open
    #[error("Transport is not open")]
    Closed,

    /// Send error
    #[error("Send error: {0}")]
    SendError(String),

    /// Receive error
    #[error("Receive error: {0}")]
    ReceiveError(String),
}

/// Transport statistics
#[derive(Debug, Clone, Default)]
pub struct TransportStats {
    /// Bytes sent
    pub bytes_sent: u64,
    /// Bytes received
    pub bytes_received: u64,
    /// Write calls
    pub writes: u64,
    /// Chunks received
    pub chunks_received: u64,
    /// Connection uptime in seconds
    pub uptime_secs: u64,
}

/// State of the two discrete output control lines.
///
/// `ready` maps to DTR and `request` to RTS on a serial port.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ControlLines {
    /// Data Terminal Ready
    pub ready: bool,
    /// Request To Send
    pub request: bool,
}

impl ControlLines {
    /// Line state applied on connect: ready asserted, request released
    pub const CONNECTED: Self = Self {
        ready: true,
        request: false,
    };
}

/// Duplex byte transport consumed by the link engine.
///
/// All methods take `&self`: a read may be in flight on the router task
/// while the session side writes.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TransportTrait: Send + Sync {
    /// Open the transport and apply its line configuration
    async fn open(&self) -> Result<(), TransportError>;

    /// Close the transport. Closing a closed transport is not an error.
    async fn close(&self) -> Result<(), TransportError>;

    /// Check if open
    fn is_open(&self) -> bool;

    /// Write bytes, returning how many were accepted
    async fn send(&self, data: &[u8]) -> Result<usize, TransportError>;

    /// Wait for the next chunk of inbound bytes.
    ///
    /// Returns `Ok(None)` once the stream has ended. The router only drops
    /// this future when the link is shutting down, so a chunk read by a
    /// dropped call may be discarded.
    async fn receive(&self) -> Result<Option<Bytes>, TransportError>;

    /// Drive the output control lines
    async fn set_control_lines(&self, lines: ControlLines) -> Result<(), TransportError>;

    /// Get connection info string
    fn connection_info(&self) -> String;

    /// Get statistics
    fn stats(&self) -> TransportStats;
}
