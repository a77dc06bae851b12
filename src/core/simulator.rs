//! Virtual interpreter simulator
//!
//! Speaks the device side of the friendly REPL, raw REPL and raw-paste
//! protocols well enough to drive the link engine without hardware. Plug
//! it into a [`MockTransport`] with [`DeviceSimulator::into_transport`].

use super::raw_repl::{
    END_OF_DATA, ENTER_RAW, EXIT_RAW, FLOW_ABORT, FLOW_CONTINUE, INTERRUPT, RAW_PASTE_ACK,
    RAW_PASTE_DECLINE, RAW_PASTE_PROBE,
};
use super::transport::MockTransport;
use parking_lot::Mutex;
use std::sync::Arc;

const FRIENDLY_PROMPT: &[u8] = b">>> ";
const RAW_BANNER: &[u8] = b"raw REPL; CTRL-B to exit\r\n>";
const VERSION_BANNER: &[u8] = b"MicroPython v1.22.0 on 2024-01-01; replink simulator\r\n\
    Type \"help()\" for more information.\r\n";

/// How the simulated firmware answers the raw-paste probe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawPasteSupport {
    /// `R\x01`, window size, initial flow byte
    Enabled {
        /// Window advertised to the host
        window_size: u16,
    },
    /// `R\x00`
    Disabled,
    /// Old firmware: treats the probe's Ctrl-A as a raw REPL re-entry
    Legacy,
    /// No answer at all
    Silent,
    /// Two bytes that mean nothing
    Garbled,
}

/// Simulator configuration
#[derive(Debug, Clone)]
pub struct SimulatorConfig {
    /// Probe behaviour
    pub raw_paste: RawPasteSupport,
    /// Printed to stdout by every program
    pub program_output: String,
    /// Printed to stderr by every program
    pub program_error: String,
    /// Abort a raw-paste transfer after this many payload bytes
    pub abort_after: Option<usize>,
    /// Never print the raw REPL banner
    pub refuse_raw: bool,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            raw_paste: RawPasteSupport::Enabled { window_size: 128 },
            program_output: String::new(),
            program_error: String::new(),
            abort_after: None,
            refuse_raw: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Friendly,
    Raw,
    Paste { since_flow: usize, received: usize },
    PasteAborted,
}

/// Programs the simulator has received, in order
pub type ProgramLog = Arc<Mutex<Vec<String>>>;

/// Simulated interpreter
#[derive(Debug)]
pub struct DeviceSimulator {
    config: SimulatorConfig,
    mode: Mode,
    program: Vec<u8>,
    programs: ProgramLog,
}

impl Default for DeviceSimulator {
    fn default() -> Self {
        Self::new(SimulatorConfig::default())
    }
}

impl DeviceSimulator {
    /// Create a simulator at the friendly prompt
    pub fn new(config: SimulatorConfig) -> Self {
        Self {
            config,
            mode: Mode::Friendly,
            program: Vec::new(),
            programs: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Simulator with the given probe behaviour and defaults otherwise
    pub fn with_raw_paste(raw_paste: RawPasteSupport) -> Self {
        Self::new(SimulatorConfig {
            raw_paste,
            ..SimulatorConfig::default()
        })
    }

    /// Shared log of received programs
    pub fn program_log(&self) -> ProgramLog {
        Arc::clone(&self.programs)
    }

    /// Wrap in a mock transport whose writes feed this simulator
    pub fn into_transport(mut self) -> MockTransport {
        MockTransport::with_responder(move |data| self.process(data))
    }

    /// Feed host bytes, returning the device's reply
    pub fn process(&mut self, input: &[u8]) -> Vec<u8> {
        let mut reply = Vec::new();
        for &byte in input {
            match self.mode {
                Mode::Friendly => self.friendly_byte(byte, &mut reply),
                Mode::Raw => self.raw_byte(byte, &mut reply),
                Mode::Paste { since_flow, received } => {
                    self.paste_byte(byte, since_flow, received, &mut reply);
                }
                Mode::PasteAborted => {
                    if byte == END_OF_DATA {
                        reply.push(END_OF_DATA);
                        self.program.clear();
                        self.mode = Mode::Raw;
                    }
                }
            }
        }
        reply
    }

    fn friendly_byte(&mut self, byte: u8, reply: &mut Vec<u8>) {
        match byte {
            ENTER_RAW if !self.config.refuse_raw => {
                self.program.clear();
                reply.extend_from_slice(RAW_BANNER);
                self.mode = Mode::Raw;
            }
            INTERRUPT => {
                reply.extend_from_slice(b"\r\n");
                reply.extend_from_slice(FRIENDLY_PROMPT);
            }
            // Ctrl-D at the friendly prompt
            0x04 => {
                reply.extend_from_slice(b"MPY: soft reboot\r\n");
                reply.extend_from_slice(VERSION_BANNER);
                reply.extend_from_slice(FRIENDLY_PROMPT);
            }
            b'\r' => {
                reply.extend_from_slice(b"\r\n");
                reply.extend_from_slice(FRIENDLY_PROMPT);
            }
            b'\n' => {}
            other => reply.push(other),
        }
    }

    fn raw_byte(&mut self, byte: u8, reply: &mut Vec<u8>) {
        match byte {
            END_OF_DATA => {
                self.finish_program(reply, b"OK");
                self.mode = Mode::Raw;
            }
            EXIT_RAW => {
                self.program.clear();
                reply.extend_from_slice(b"\r\n");
                reply.extend_from_slice(VERSION_BANNER);
                reply.extend_from_slice(FRIENDLY_PROMPT);
                self.mode = Mode::Friendly;
            }
            INTERRUPT => self.program.clear(),
            _ => {
                self.program.push(byte);
                if self.program.ends_with(&RAW_PASTE_PROBE) {
                    self.program.clear();
                    self.answer_probe(reply);
                } else if byte == ENTER_RAW {
                    self.program.clear();
                    reply.extend_from_slice(RAW_BANNER);
                }
            }
        }
    }

    fn answer_probe(&mut self, reply: &mut Vec<u8>) {
        match self.config.raw_paste {
            RawPasteSupport::Enabled { window_size } => {
                reply.extend_from_slice(&RAW_PASTE_ACK);
                reply.extend_from_slice(&window_size.to_le_bytes());
                reply.push(FLOW_CONTINUE);
                self.mode = Mode::Paste {
                    since_flow: 0,
                    received: 0,
                };
            }
            RawPasteSupport::Disabled => reply.extend_from_slice(&RAW_PASTE_DECLINE),
            RawPasteSupport::Legacy => reply.extend_from_slice(RAW_BANNER),
            RawPasteSupport::Silent => {}
            RawPasteSupport::Garbled => reply.extend_from_slice(b"??"),
        }
    }

    fn paste_byte(&mut self, byte: u8, since_flow: usize, received: usize, reply: &mut Vec<u8>) {
        if byte == END_OF_DATA {
            reply.push(END_OF_DATA);
            self.finish_program(reply, b"");
            self.mode = Mode::Raw;
            return;
        }

        self.program.push(byte);
        let received = received + 1;
        let mut since_flow = since_flow + 1;

        if self.config.abort_after == Some(received) {
            reply.push(FLOW_ABORT);
            self.mode = Mode::PasteAborted;
            return;
        }

        let window = match self.config.raw_paste {
            RawPasteSupport::Enabled { window_size } => usize::from(window_size).max(1),
            _ => 1,
        };
        if since_flow >= window {
            reply.push(FLOW_CONTINUE);
            since_flow = 0;
        }
        self.mode = Mode::Paste {
            since_flow,
            received,
        };
    }

    fn finish_program(&mut self, reply: &mut Vec<u8>, preamble: &[u8]) {
        let program = String::from_utf8_lossy(&self.program).into_owned();
        self.programs.lock().push(program);
        self.program.clear();

        reply.extend_from_slice(preamble);
        reply.extend_from_slice(self.config.program_output.as_bytes());
        reply.push(0x04);
        reply.extend_from_slice(self.config.program_error.as_bytes());
        reply.push(0x04);
        reply.push(b'>');
    }
}
