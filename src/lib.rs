//! # replink core library
//!
//! Session transport for microcontroller interpreters reachable over a
//! serial line:
//! - Interactive console pass-through
//! - Exclusive raw REPL sessions for programmatic code execution
//! - Raw-paste windowed transfer with device flow control
//! - Connection lifecycle with a single background reader
//!
//! ## Example
//!
//! ```rust,no_run
//! use replink_core::{DeviceLink, SerialConfig, SerialTransport};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let port = SerialTransport::new(SerialConfig::new("/dev/ttyACM0", 115200));
//!     let link = DeviceLink::new(Arc::new(port));
//!     link.connect().await?;
//!
//!     let session = link.open_session("exec").await?;
//!     let output = session.exec("print(1 + 1)").await?;
//!     println!("{}", output.stdout);
//!     session.close().await?;
//!
//!     link.disconnect().await?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod cli;
pub mod config;
pub mod core;

// Re-exports for convenience
pub use crate::cli::{exit_code_description, exit_code_for, CliResult, ExitCodes, OutputFormat};
pub use crate::config::{AppConfig, ConfigError, LoggingConfig, SerialSettings};
pub use crate::core::console::ConsoleShell;
pub use crate::core::error::LinkError;
pub use crate::core::link::{BusyStatus, DeviceLink, LinkEvent};
pub use crate::core::raw_repl::{
    ExecOutput, ProbeOutcome, RawOutputParser, RawSession, SessionCapability, SessionState,
    TransferMode, TransferReport,
};
pub use crate::core::routing::RoutingMode;
pub use crate::core::simulator::{DeviceSimulator, RawPasteSupport, SimulatorConfig};
pub use crate::core::timings::LinkTimings;
pub use crate::core::transport::{
    list_ports, MockTransport, SerialConfig, SerialFlowControl, SerialParity, SerialTransport,
    TransportError, TransportTrait,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
