use std::collections::VecDeque;
use std::io::{ErrorKind, Read, Write};
use std::time::Duration;
use serialport::{ClearBuffer, DataBits, Parity, SerialPort, SerialPortType, StopBits};

use super::{LinkError, Result, SerialDeviceInfo};
use crate::config::LinkConfig;

const READ_CHUNK: usize = 256;
// Longest partial line kept while waiting for a terminator; the device never sends more than this per line.
const MAX_PARTIAL_LINE: usize = 4096;

/// Line-oriented access to the device. Implementations are owned and used by
/// the link worker thread only.
pub trait LineTransport: Send {
    /// Write one line. The transport appends the `\n` terminator.
    fn write_line(&mut self, line: &str) -> Result<()>;

    /// Wait up to `timeout` for one complete line, returned without its terminator.
    /// `Ok(None)` or `Err(LinkError::ReadTimeout)` means nothing complete
    /// arrived in time; the link treats both as idle.
    fn read_line(&mut self, timeout: Duration) -> Result<Option<String>>;
}

/// Splits a byte stream into lines.
#[derive(Debug, Default)]
pub struct LineAssembler {
    partial: Vec<u8>,
    ready: VecDeque<String>,
    trims: u64,
}

impl LineAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, bytes: &[u8]) {
        for &b in bytes {
            if b == b'\n' {
                let raw = std::mem::take(&mut self.partial);
                let line = String::from_utf8_lossy(&raw);
                self.ready.push_back(line.trim_end_matches('\r').to_string());
            } else {
                self.partial.push(b);
            }
        }
        if self.partial.len() > MAX_PARTIAL_LINE {
            // Garbage without terminators; keep only the tail so a later line can still resync
            let excess = self.partial.len() - MAX_PARTIAL_LINE / 2;
            self.partial.drain(..excess);
            self.trims += 1;
            log::warn!("Discarded {} bytes of unterminated input", excess);
        }
    }

    pub fn next_line(&mut self) -> Option<String> {
        self.ready.pop_front()
    }

    /// Number of times an overlong partial line was cut back.
    pub fn trims(&self) -> u64 {
        self.trims
    }
}

/// serialport-backed transport with the controller's line settings.
pub struct SerialInterface {
    port: Box<dyn SerialPort>,
    port_name: String,
    lines: LineAssembler,
    timeout: Duration,
}

impl SerialInterface {
    /// List every serial port the OS reports
    pub fn discover_ports() -> Result<Vec<SerialDeviceInfo>> {
        let ports = serialport::available_ports()?;
        let devices = ports
            .into_iter()
            .map(|port| match port.port_type {
                SerialPortType::UsbPort(usb_info) => SerialDeviceInfo {
                    port_name: port.port_name,
                    vid: Some(usb_info.vid),
                    pid: Some(usb_info.pid),
                    serial_number: usb_info.serial_number,
                    manufacturer: usb_info.manufacturer,
                    product: usb_info.product,
                },
                _ => SerialDeviceInfo {
                    port_name: port.port_name,
                    vid: None,
                    pid: None,
                    serial_number: None,
                    manufacturer: None,
                    product: None,
                },
            })
            .collect();

        Ok(devices)
    }

    /// Open and configure a port
    pub fn open(port_name: &str, config: &LinkConfig) -> Result<Self> {
        let open_failed = |e: serialport::Error| LinkError::OpenFailed {
            port: port_name.to_string(),
            reason: e.to_string(),
        };

        let mut port = serialport::new(port_name, config.baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(config.flow_control.into())
            .timeout(config.read_timeout())
            .open()
            .map_err(open_failed)?;

        port.clear(ClearBuffer::All).map_err(open_failed)?;
        if config.assert_dtr {
            // The firmware runs its setup routine when DTR goes high
            port.write_data_terminal_ready(true).map_err(open_failed)?;
        }

        log::info!(
            "Opened {} at {} baud ({:?} flow control)",
            port_name,
            config.baud_rate,
            config.flow_control
        );

        Ok(Self {
            port,
            port_name: port_name.to_string(),
            lines: LineAssembler::new(),
            timeout: config.read_timeout(),
        })
    }

    /// Boxed constructor matching the link's transport factory signature
    pub fn open_boxed(port_name: &str, config: &LinkConfig) -> Result<Box<dyn LineTransport>> {
        Ok(Box::new(Self::open(port_name, config)?))
    }

    pub fn port_name(&self) -> &str {
        &self.port_name
    }
}

impl LineTransport for SerialInterface {
    fn write_line(&mut self, line: &str) -> Result<()> {
        let mut data = Vec::with_capacity(line.len() + 1);
        data.extend_from_slice(line.as_bytes());
        data.push(b'\n');

        self.port
            .write_all(&data)
            .and_then(|_| self.port.flush())
            .map_err(|e| LinkError::WriteFailed(e.to_string()))
    }

    fn read_line(&mut self, timeout: Duration) -> Result<Option<String>> {
        if let Some(line) = self.lines.next_line() {
            return Ok(Some(line));
        }

        if timeout != self.timeout {
            self.port.set_timeout(timeout)?;
            self.timeout = timeout;
        }

        let mut buf = [0u8; READ_CHUNK];
        match self.port.read(&mut buf) {
            Ok(0) => Err(LinkError::Disconnected(format!("{} reached end of stream", self.port_name))),
            Ok(n) => {
                self.lines.push(&buf[..n]);
                Ok(self.lines.next_line())
            }
            Err(ref e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::Interrupted) => Ok(None),
            Err(e) => Err(LinkError::Disconnected(e.to_string())),
        }
    }
}

impl Drop for SerialInterface {
    fn drop(&mut self) {
        log::info!("Closing {}", self.port_name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assembler_splits_lines_across_chunks() {
        let mut lines = LineAssembler::new();
        lines.push(b"[1,2");
        assert_eq!(lines.next_line(), None);
        lines.push(b",3]\r\n!overheat\n[4");
        assert_eq!(lines.next_line().as_deref(), Some("[1,2,3]"));
        assert_eq!(lines.next_line().as_deref(), Some("!overheat"));
        assert_eq!(lines.next_line(), None);
        lines.push(b",5]\n");
        assert_eq!(lines.next_line().as_deref(), Some("[4,5]"));
    }

    #[test]
    fn test_assembler_trims_unterminated_garbage() {
        let mut lines = LineAssembler::new();
        lines.push(&vec![b'x'; MAX_PARTIAL_LINE + 10]);
        assert_eq!(lines.trims(), 1);
        lines.push(b"\n[1]\n");
        // The trimmed garbage still forms one (junk) line before the real one
        assert!(lines.next_line().is_some());
        assert_eq!(lines.next_line().as_deref(), Some("[1]"));
    }

    #[test]
    fn test_assembler_replaces_invalid_utf8() {
        let mut lines = LineAssembler::new();
        lines.push(&[b'[', 0xFF, b']', b'\n']);
        assert_eq!(lines.next_line().as_deref(), Some("[\u{FFFD}]"));
    }
}
