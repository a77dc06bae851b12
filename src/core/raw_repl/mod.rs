//! Raw REPL protocol
//!
//! The device's raw REPL accepts a whole program terminated by an
//! end-of-data byte. Raw-paste is an optional extension negotiated per
//! program that adds a send window and flow-control bytes.
//!
//! - `negotiate`: enter raw mode and probe for raw-paste
//! - [`paste`]: plain and windowed program transfer
//! - [`session`]: the exclusive session handle
//! - [`output`]: splitting program output on end-of-output markers

pub(crate) mod negotiate;
pub mod output;
pub mod paste;
pub mod session;

pub use output::{ExecOutput, RawOutputParser};
pub use paste::{TransferMode, TransferReport};
pub use session::{RawSession, SessionState};

use serde::Serialize;

/// Ctrl-C: interrupt the running program
pub const INTERRUPT: u8 = 0x03;
/// Ctrl-D at the friendly prompt: soft reset
pub const SOFT_RESET: u8 = 0x04;
/// Ctrl-A: enter raw REPL
pub const ENTER_RAW: u8 = 0x01;
/// Ctrl-B: leave raw REPL
pub const EXIT_RAW: u8 = 0x02;
/// Raw-paste probe: Ctrl-E, 'A', Ctrl-A
pub const RAW_PASTE_PROBE: [u8; 3] = [0x05, b'A', 0x01];
/// Probe reply: raw-paste supported, window size follows
pub const RAW_PASTE_ACK: [u8; 2] = [b'R', 0x01];
/// Probe reply: protocol understood, raw-paste disabled
pub const RAW_PASTE_DECLINE: [u8; 2] = [b'R', 0x00];
/// Probe reply from firmware without raw-paste: start of "raw REPL"
pub const LEGACY_PROMPT_PREFIX: [u8; 2] = *b"ra";
/// Flow control: window replenished
pub const FLOW_CONTINUE: u8 = 0x01;
/// Flow control: device requests early termination
pub const FLOW_ABORT: u8 = 0x04;
/// Ctrl-D in raw mode: end of program data
pub const END_OF_DATA: u8 = 0x04;
/// Line terminator closing the wake sequence
pub const WAKE_NEWLINE: &[u8] = b"\r\n";
/// Text the raw REPL banner must contain
pub const RAW_REPL_BANNER: &str = "raw REPL";
/// Raw REPL prompt
pub const RAW_PROMPT: &str = ">";

/// Which branch the raw-paste probe took
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ProbeOutcome {
    /// Raw-paste supported with the given window
    RawPasteConfirmed {
        /// Bytes the device accepts before it must send a flow-control byte
        window_size: u16,
    },
    /// Device understood the probe but raw-paste is disabled
    RawPasteDeclined,
    /// Device did not understand the probe, or did not answer it
    LegacyDevice,
}

/// Capability negotiated for a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SessionCapability {
    /// Programs are sent with windowed flow control
    pub use_raw_paste: bool,
    /// Negotiated window; 0 when raw-paste is not in use
    pub window_size: u16,
    /// Probe branch that produced this capability
    pub probe: ProbeOutcome,
}

impl From<ProbeOutcome> for SessionCapability {
    fn from(probe: ProbeOutcome) -> Self {
        match probe {
            ProbeOutcome::RawPasteConfirmed { window_size } => Self {
                use_raw_paste: true,
                window_size,
                probe,
            },
            ProbeOutcome::RawPasteDeclined | ProbeOutcome::LegacyDevice => Self {
                use_raw_paste: false,
                window_size: 0,
                probe,
            },
        }
    }
}

impl std::fmt::Display for SessionCapability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.probe {
            ProbeOutcome::RawPasteConfirmed { window_size } => {
                write!(f, "raw-paste (window {window_size})")
            }
            ProbeOutcome::RawPasteDeclined => write!(f, "raw (raw-paste disabled)"),
            ProbeOutcome::LegacyDevice => write!(f, "raw (legacy)"),
        }
    }
}
