//! Core of the device link
//!
//! This module provides:
//! - Transport layer (serial port, in-memory mock)
//! - Byte accumulator and read routing
//! - Raw REPL negotiation, raw-paste transfer and output framing
//! - Console shell and connection lifecycle
//! - Interpreter simulator for tests and demos

pub mod accumulator;
pub mod codec;
pub mod console;
pub mod error;
pub mod link;
pub mod raw_repl;
pub mod routing;
pub mod simulator;
pub mod timings;
pub mod transport;
