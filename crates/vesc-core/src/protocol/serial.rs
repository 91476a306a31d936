//! Serial port handling
//!
//! Provides the byte-stream transport the interface reads from and writes to,
//! and the connector that opens it.

use serialport::{SerialPort, SerialPortInfo, SerialPortType};
use std::io::{self, Read, Write};
use std::time::Duration;

use super::{InterfaceConfig, ProtocolError};

/// Byte-stream link to a device.
///
/// `read` blocks for at most the timeout the transport was opened with. A
/// timeout is reported as `ErrorKind::TimedOut` (or `WouldBlock`), never as
/// `Ok(0)`; `Ok(0)` means the link was closed by the other side.
pub trait Transport: Send {
    /// Read available bytes into `buf`
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Write all of `data` to the link
    fn write_all(&mut self, data: &[u8]) -> io::Result<()>;

    /// Open an independent handle to the same link
    fn try_clone(&self) -> io::Result<Box<dyn Transport>>;

    /// Release the link. Called exactly once per connection.
    fn close(&mut self);
}

/// Opens transports by port name
pub trait Connector: Send + Sync {
    /// Open the port, failing with [`ProtocolError::ConnectionError`]
    fn open(&self, port: &str) -> Result<Box<dyn Transport>, ProtocolError>;
}

/// Information about an available serial port
#[derive(Debug, Clone)]
pub struct PortInfo {
    /// Port name (e.g., "/dev/ttyACM0" or "COM3")
    pub name: String,

    /// USB vendor ID (if USB device)
    pub vid: Option<u16>,

    /// USB product ID (if USB device)
    pub pid: Option<u16>,

    /// Product name (if available)
    pub product: Option<String>,
}

impl From<SerialPortInfo> for PortInfo {
    fn from(info: SerialPortInfo) -> Self {
        let (vid, pid, product) = match info.port_type {
            SerialPortType::UsbPort(usb_info) => {
                (Some(usb_info.vid), Some(usb_info.pid), usb_info.product)
            }
            _ => (None, None, None),
        };

        Self {
            name: info.port_name,
            vid,
            pid,
            product,
        }
    }
}

/// Sort key placing USB CDC ports (how VESC enumerates) first, numerically
fn port_sort_key(name: &str) -> (u8, usize, String) {
    let basename = name.rsplit('/').next().unwrap_or(name);
    if let Some(rest) = basename.strip_prefix("ttyACM") {
        let num = rest.parse::<usize>().unwrap_or(usize::MAX);
        return (0, num, basename.to_string());
    }
    if let Some(rest) = basename.strip_prefix("ttyUSB") {
        let num = rest.parse::<usize>().unwrap_or(usize::MAX);
        return (1, num, basename.to_string());
    }
    (2, 0, basename.to_string())
}

/// List available serial ports, likely VESC ports first
pub fn list_ports() -> Vec<PortInfo> {
    let mut ports: Vec<PortInfo> = serialport::available_ports()
        .unwrap_or_default()
        .into_iter()
        .map(PortInfo::from)
        .collect();
    ports.sort_by_key(|p| port_sort_key(&p.name));
    ports
}

/// Opens real serial ports with the `serialport` crate
#[derive(Debug, Clone, Default)]
pub struct SerialConnector {
    config: InterfaceConfig,
}

impl SerialConnector {
    /// Create a connector using the given baud rate and read timeout
    pub fn new(config: InterfaceConfig) -> Self {
        Self { config }
    }
}

impl Connector for SerialConnector {
    fn open(&self, port: &str) -> Result<Box<dyn Transport>, ProtocolError> {
        let port = serialport::new(port, self.config.baud_rate)
            .data_bits(serialport::DataBits::Eight)
            .parity(serialport::Parity::None)
            .stop_bits(serialport::StopBits::One)
            .flow_control(serialport::FlowControl::None)
            .timeout(Duration::from_millis(self.config.read_timeout_ms))
            .open()
            .map_err(|e| ProtocolError::ConnectionError(e.to_string()))?;

        Ok(Box::new(SerialTransport::new(port)))
    }
}

/// Serial port wrapper implementing [`Transport`]
pub struct SerialTransport {
    port: Option<Box<dyn SerialPort>>,
}

impl SerialTransport {
    /// Wrap an open port
    pub fn new(port: Box<dyn SerialPort>) -> Self {
        Self { port: Some(port) }
    }

    fn port(&mut self) -> io::Result<&mut Box<dyn SerialPort>> {
        self.port
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "serial port closed"))
    }
}

impl Transport for SerialTransport {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.port()?.read(buf)
    }

    fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        // write_all lands in the kernel tty buffer; flush() would tcdrain and
        // stall the caller for the full transmit time
        self.port()?.write_all(data)
    }

    fn try_clone(&self) -> io::Result<Box<dyn Transport>> {
        let port = self
            .port
            .as_ref()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "serial port closed"))?;
        let clone = port.try_clone().map_err(io::Error::other)?;
        Ok(Box::new(SerialTransport::new(clone)))
    }

    fn close(&mut self) {
        // Dropping the handle closes the file descriptor
        self.port = None;
    }
}
