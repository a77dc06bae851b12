//! Serial port transport implementation

use super::{ControlLines, TransportError, TransportStats, TransportTrait};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serialport::{DataBits, FlowControl, Parity, SerialPort, StopBits};
use std::io::{Read, Write};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Port read timeout. Bounds how long a cancelled read keeps the reader busy.
const READ_TIMEOUT: Duration = Duration::from_millis(100);

/// Largest chunk handed to the router in one read
const READ_CHUNK: usize = 4096;

type PortSlot = Arc<Mutex<Option<Box<dyn SerialPort>>>>;

/// Serial port flow control type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SerialFlowControl {
    /// No flow control
    #[default]
    None,
    /// Hardware flow control (RTS/CTS)
    Hardware,
    /// Software flow control (XON/XOFF)
    Software,
}

impl std::str::FromStr for SerialFlowControl {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "none" | "n" => Ok(Self::None),
            "hardware" | "hw" | "rtscts" => Ok(Self::Hardware),
            "software" | "sw" | "xonxoff" => Ok(Self::Software),
            other => Err(format!("unknown flow control: {other}")),
        }
    }
}

/// Serial port parity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SerialParity {
    /// No parity
    #[default]
    None,
    /// Odd parity
    Odd,
    /// Even parity
    Even,
}

impl std::str::FromStr for SerialParity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "none" | "n" => Ok(Self::None),
            "odd" | "o" => Ok(Self::Odd),
            "even" | "e" => Ok(Self::Even),
            other => Err(format!("unknown parity: {other}")),
        }
    }
}

/// Serial port configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerialConfig {
    /// Port name (e.g., COM3, /dev/ttyACM0)
    pub port: String,
    /// Baud rate
    pub baud_rate: u32,
    /// Data bits (5, 6, 7, 8)
    pub data_bits: u8,
    /// Stop bits (1, 2)
    pub stop_bits: u8,
    /// Parity
    pub parity: SerialParity,
    /// Flow control
    pub flow_control: SerialFlowControl,
}

impl SerialConfig {
    /// Create a new serial configuration with 8N1 and no flow control
    pub fn new(port: &str, baud_rate: u32) -> Self {
        Self {
            port: port.to_string(),
            baud_rate,
            data_bits: 8,
            stop_bits: 1,
            parity: SerialParity::None,
            flow_control: SerialFlowControl::None,
        }
    }

    /// Set data bits
    #[must_use]
    pub fn data_bits(mut self, bits: u8) -> Self {
        self.data_bits = bits;
        self
    }

    /// Set stop bits
    #[must_use]
    pub fn stop_bits(mut self, bits: u8) -> Self {
        self.stop_bits = bits;
        self
    }

    /// Set parity
    #[must_use]
    pub fn parity(mut self, parity: SerialParity) -> Self {
        self.parity = parity;
        self
    }

    /// Set flow control
    #[must_use]
    pub fn flow_control(mut self, flow: SerialFlowControl) -> Self {
        self.flow_control = flow;
        self
    }
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self::new("/dev/ttyACM0", 115_200)
    }
}

/// Serial port transport.
///
/// Holds two handles to the same port: reads happen on the blocking pool
/// through `reader`, writes and control lines go through `writer`.
pub struct SerialTransport {
    config: SerialConfig,
    reader: PortSlot,
    writer: PortSlot,
    stats: Arc<RwLock<TransportStats>>,
    connected_at: RwLock<Option<Instant>>,
}

impl SerialTransport {
    /// Create a new serial transport; the port is not opened until `open`
    pub fn new(config: SerialConfig) -> Self {
        Self {
            config,
            reader: Arc::new(Mutex::new(None)),
            writer: Arc::new(Mutex::new(None)),
            stats: Arc::new(RwLock::new(TransportStats::default())),
            connected_at: RwLock::new(None),
        }
    }

    /// Get the configuration
    pub fn config(&self) -> &SerialConfig {
        &self.config
    }

    fn map_open_error(&self, e: &serialport::Error) -> TransportError {
        match e.kind() {
            serialport::ErrorKind::NoDevice => {
                TransportError::PortNotFound(self.config.port.clone())
            }
            serialport::ErrorKind::Io(std::io::ErrorKind::NotFound) => {
                TransportError::PortNotFound(self.config.port.clone())
            }
            serialport::ErrorKind::Io(std::io::ErrorKind::PermissionDenied) => {
                TransportError::PermissionDenied(self.config.port.clone())
            }
            _ => TransportError::ConnectionFailed(e.to_string()),
        }
    }
}

fn line_error(e: serialport::Error) -> TransportError {
    TransportError::IoError(std::io::Error::new(std::io::ErrorKind::Other, e))
}

/// Blocking read of one chunk. `Ok(Some(empty))` means the port timed out.
fn read_chunk(reader: &PortSlot) -> Result<Option<Bytes>, TransportError> {
    let mut guard = reader.lock();
    let Some(port) = guard.as_mut() else {
        return Ok(None);
    };

    let mut buffer = vec![0u8; READ_CHUNK];
    match port.read(&mut buffer) {
        Ok(0) => Ok(None),
        Ok(n) => {
            buffer.truncate(n);
            Ok(Some(Bytes::from(buffer)))
        }
        Err(ref e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(Some(Bytes::new())),
        Err(e) => Err(TransportError::IoError(e)),
    }
}

#[async_trait]
impl TransportTrait for SerialTransport {
    async fn open(&self) -> Result<(), TransportError> {
        let data_bits = match self.config.data_bits {
            5 => DataBits::Five,
            6 => DataBits::Six,
            7 => DataBits::Seven,
            _ => DataBits::Eight,
        };

        let stop_bits = match self.config.stop_bits {
            2 => StopBits::Two,
            _ => StopBits::One,
        };

        let parity = match self.config.parity {
            SerialParity::Odd => Parity::Odd,
            SerialParity::Even => Parity::Even,
            SerialParity::None => Parity::None,
        };

        let flow_control = match self.config.flow_control {
            SerialFlowControl::Hardware => FlowControl::Hardware,
            SerialFlowControl::Software => FlowControl::Software,
            SerialFlowControl::None => FlowControl::None,
        };

        let port = serialport::new(&self.config.port, self.config.baud_rate)
            .data_bits(data_bits)
            .stop_bits(stop_bits)
            .parity(parity)
            .flow_control(flow_control)
            .timeout(READ_TIMEOUT)
            .open()
            .map_err(|e| self.map_open_error(&e))?;

        let reader = port
            .try_clone()
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;

        *self.reader.lock() = Some(reader);
        *self.writer.lock() = Some(port);
        *self.connected_at.write() = Some(Instant::now());
        *self.stats.write() = TransportStats::default();

        tracing::info!("Opened serial port {}", self.connection_info());
        Ok(())
    }

    async fn close(&self) -> Result<(), TransportError> {
        *self.writer.lock() = None;
        *self.reader.lock() = None;
        *self.connected_at.write() = None;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.writer.lock().is_some()
    }

    async fn send(&self, data: &[u8]) -> Result<usize, TransportError> {
        let mut port_guard = self.writer.lock();
        let port = port_guard.as_mut().ok_or(TransportError::Closed)?;

        port.write_all(data).map_err(TransportError::IoError)?;
        port.flush().map_err(TransportError::IoError)?;

        let mut stats = self.stats.write();
        stats.bytes_sent += data.len() as u64;
        stats.writes += 1;

        Ok(data.len())
    }

    async fn receive(&self) -> Result<Option<Bytes>, TransportError> {
        loop {
            let reader = Arc::clone(&self.reader);
            let chunk = tokio::task::spawn_blocking(move || read_chunk(&reader))
                .await
                .map_err(|e| TransportError::ReceiveError(e.to_string()))??;

            match chunk {
                Some(bytes) if bytes.is_empty() => continue,
                Some(bytes) => {
                    let mut stats = self.stats.write();
                    stats.bytes_received += bytes.len() as u64;
                    stats.chunks_received += 1;
                    return Ok(Some(bytes));
                }
                None => return Ok(None),
            }
        }
    }

    async fn set_control_lines(&self, lines: ControlLines) -> Result<(), TransportError> {
        let mut port_guard = self.writer.lock();
        let port = port_guard.as_mut().ok_or(TransportError::Closed)?;
        port.write_data_terminal_ready(lines.ready).map_err(line_error)?;
        port.write_request_to_send(lines.request).map_err(line_error)?;
        Ok(())
    }

    fn connection_info(&self) -> String {
        format!(
            "{} @ {} baud ({}{}{} {})",
            self.config.port,
            self.config.baud_rate,
            self.config.data_bits,
            match self.config.parity {
                SerialParity::None => "N",
                SerialParity::Odd => "O",
                SerialParity::Even => "E",
            },
            self.config.stop_bits,
            match self.config.flow_control {
                SerialFlowControl::None => "No FC",
                SerialFlowControl::Hardware => "HW FC",
                SerialFlowControl::Software => "SW FC",
            }
        )
    }

    fn stats(&self) -> TransportStats {
        let mut stats = self.stats.read().clone();
        if let Some(connected_at) = *self.connected_at.read() {
            stats.uptime_secs = connected_at.elapsed().as_secs();
        }
        stats
    }
}

/// List available serial ports
pub fn list_ports() -> Result<Vec<serialport::SerialPortInfo>, TransportError> {
    serialport::available_ports().map_err(|e| TransportError::IoError(e.into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_line_settings() {
        assert_eq!("E".parse::<SerialParity>().unwrap(), SerialParity::Even);
        assert_eq!("hw".parse::<SerialFlowControl>().unwrap(), SerialFlowControl::Hardware);
        assert!("mark".parse::<SerialParity>().is_err());
    }

    #[test]
    fn test_connection_info() {
        let transport = SerialTransport::new(
            SerialConfig::new("/dev/ttyUSB0", 9600).parity(SerialParity::Odd).stop_bits(2),
        );
        assert_eq!(transport.connection_info(), "/dev/ttyUSB0 @ 9600 baud (8O2 No FC)");
        assert!(!transport.is_open());
    }

    #[tokio::test]
    async fn test_closed_port_rejects_io() {
        let transport = SerialTransport::new(SerialConfig::default());
        assert!(matches!(transport.send(b"x").await, Err(TransportError::Closed)));
        assert!(transport.receive().await.unwrap().is_none());
    }
}
