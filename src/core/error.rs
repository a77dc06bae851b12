//! Link engine errors

use super::transport::TransportError;
use thiserror::Error;

/// Errors surfaced by the link engine, its sessions and the console
#[derive(Error, Debug)]
pub enum LinkError {
    /// No connection when an operation requires one
    #[error("Not connected")]
    NotConnected,

    /// A session is already live on this connection
    #[error("A session is already active")]
    SessionAlreadyActive,

    /// The raw REPL entry prompt was never observed
    #[error("Timed out waiting for the raw REPL prompt")]
    HandshakeTimeout,

    /// Underlying transport read/write failure
    #[error("Port I/O error: {0}")]
    PortIo(#[from] TransportError),

    /// The device asked to stop a raw-paste transfer early
    #[error("Device aborted the transfer after {sent} of {total} bytes")]
    DeviceAbort {
        /// Payload bytes written before the abort
        sent: usize,
        /// Payload length
        total: usize,
    },

    /// The send window was exhausted and no flow-control byte arrived
    #[error("Timed out waiting for a flow-control byte")]
    FlowControlTimeout,

    /// Something other than continue/abort arrived as a flow-control byte
    #[error("Unexpected flow-control byte 0x{0:02x}")]
    UnexpectedFlowByte(u8),

    /// The device did not finish running a program in time
    #[error("Program did not finish within {0} ms")]
    ExecTimeout(u64),
}

impl LinkError {
    /// Check if the error is a timeout of any kind
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Self::HandshakeTimeout | Self::FlowControlTimeout | Self::ExecTimeout(_)
        )
    }
}
