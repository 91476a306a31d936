//! Connection management
//!
//! Handles the connection lifecycle, the command path to the VESC and the
//! handler registration surface.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use super::handlers::HandlerRegistry;
use super::reader::{join_retired, ReaderHandle, Retired};
use super::{
    Connector, ErrorSink, Packet, PacketCodec, PacketSink, ProtocolError, SerialConnector,
    Transport, VescCodec, DEFAULT_BAUD_RATE, DEFAULT_READ_CHUNK_SIZE, DEFAULT_READ_TIMEOUT_MS,
};

/// Interface configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InterfaceConfig {
    /// Baud rate
    pub baud_rate: u32,
    /// Upper bound on a single read in milliseconds; also bounds disconnect
    pub read_timeout_ms: u64,
    /// Size of the buffer handed to each read
    pub read_chunk_size: usize,
}

impl Default for InterfaceConfig {
    fn default() -> Self {
        Self {
            baud_rate: DEFAULT_BAUD_RATE,
            read_timeout_ms: DEFAULT_READ_TIMEOUT_MS,
            read_chunk_size: DEFAULT_READ_CHUNK_SIZE,
        }
    }
}

/// Cumulative traffic counters for one interface
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkStats {
    /// Bytes written to the transport
    pub tx_bytes: u64,
    /// Bytes read from the transport
    pub rx_bytes: u64,
    /// Packets written
    pub tx_packets: u64,
    /// Packets decoded and dispatched
    pub rx_packets: u64,
    /// Frames rejected by the codec
    pub malformed_packets: u64,
}

#[derive(Debug, Default)]
pub(crate) struct Counters {
    tx_bytes: AtomicU64,
    rx_bytes: AtomicU64,
    tx_packets: AtomicU64,
    rx_packets: AtomicU64,
    malformed_packets: AtomicU64,
}

impl Counters {
    fn record_tx(&self, bytes: usize) {
        self.tx_bytes.fetch_add(bytes as u64, Ordering::Relaxed);
        self.tx_packets.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_rx_bytes(&self, bytes: usize) {
        self.rx_bytes.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_rx_packet(&self) {
        self.rx_packets.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_malformed(&self) {
        self.malformed_packets.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> LinkStats {
        LinkStats {
            tx_bytes: self.tx_bytes.load(Ordering::Relaxed),
            rx_bytes: self.rx_bytes.load(Ordering::Relaxed),
            tx_packets: self.tx_packets.load(Ordering::Relaxed),
            rx_packets: self.rx_packets.load(Ordering::Relaxed),
            malformed_packets: self.malformed_packets.load(Ordering::Relaxed),
        }
    }
}

/// Motor commands understood by a VESC.
///
/// All commands are fire-and-forget: they return once the frame has been
/// written. Replies arrive later through the packet handler.
pub trait MotorController {
    /// Encode and write a packet
    fn send(&self, packet: &Packet) -> Result<(), ProtocolError>;

    /// Request the firmware version
    fn request_fw_version(&self) -> Result<(), ProtocolError> {
        self.send(&Packet::RequestFwVersion)
    }

    /// Request the motor state ("values") packet
    fn request_state(&self) -> Result<(), ProtocolError> {
        self.send(&Packet::RequestValues)
    }

    /// Set duty cycle, -1.0 to 1.0
    fn set_duty_cycle(&self, duty_cycle: f64) -> Result<(), ProtocolError> {
        self.send(&Packet::SetDuty(duty_cycle))
    }

    /// Set motor current in amps
    fn set_current(&self, current: f64) -> Result<(), ProtocolError> {
        self.send(&Packet::SetCurrent(current))
    }

    /// Set braking current in amps
    fn set_brake(&self, brake: f64) -> Result<(), ProtocolError> {
        self.send(&Packet::SetCurrentBrake(brake))
    }

    /// Set electrical RPM
    fn set_speed(&self, speed: f64) -> Result<(), ProtocolError> {
        self.send(&Packet::SetRpm(speed))
    }

    /// Set rotor position in degrees
    fn set_position(&self, position: f64) -> Result<(), ProtocolError> {
        self.send(&Packet::SetPosition(position))
    }

    /// Set servo position, 0.0 to 1.0
    fn set_servo(&self, servo: f64) -> Result<(), ProtocolError> {
        self.send(&Packet::SetServo(servo))
    }
}

/// An open link: the write half plus the reader thread owning the read half
struct Link {
    port: String,
    writer: Box<dyn Transport>,
    reader: ReaderHandle,
    write_failed: bool,
}

impl Link {
    fn is_usable(&self) -> bool {
        !self.write_failed && self.reader.is_alive()
    }
}

impl Drop for Link {
    fn drop(&mut self) {
        // The reader must be gone before the transport is released
        self.reader.shutdown();
        self.writer.close();
    }
}

/// Serial interface to a VESC motor controller.
///
/// `connect` and `disconnect` must not be called concurrently with each other
/// on the same instance. Every other method may be called from any thread.
pub struct VescInterface {
    config: InterfaceConfig,
    connector: Arc<dyn Connector>,
    codec: Arc<dyn PacketCodec>,
    handlers: Arc<HandlerRegistry>,
    counters: Arc<Counters>,
    /// Doubles as the write lock
    link: Mutex<Option<Link>>,
    retired: Retired,
}

impl VescInterface {
    /// Create an interface on the serial port at `port`.
    ///
    /// An empty `port` leaves the interface disconnected until
    /// [`connect`](Self::connect) is called.
    pub fn new(
        port: &str,
        packet_handler: Option<PacketSink>,
        error_handler: Option<ErrorSink>,
    ) -> Result<Self, ProtocolError> {
        let mut builder = Self::builder().port(port);
        builder.packet_handler = packet_handler;
        builder.error_handler = error_handler;
        builder.build()
    }

    /// Start building an interface with custom configuration or collaborators
    pub fn builder() -> VescInterfaceBuilder {
        VescInterfaceBuilder::default()
    }

    fn lock_link(&self) -> MutexGuard<'_, Option<Link>> {
        self.link.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Replace the packet handler
    pub fn set_packet_handler<F>(&self, handler: F)
    where
        F: Fn(&Packet) + Send + Sync + 'static,
    {
        self.handlers.set_packet_handler(Some(Arc::new(handler)));
    }

    /// Remove the packet handler
    pub fn clear_packet_handler(&self) {
        self.handlers.set_packet_handler(None);
    }

    /// Replace the error handler
    pub fn set_error_handler<F>(&self, handler: F)
    where
        F: Fn(&ProtocolError) + Send + Sync + 'static,
    {
        self.handlers.set_error_handler(Some(Arc::new(handler)));
    }

    /// Remove the error handler
    pub fn clear_error_handler(&self) {
        self.handlers.set_error_handler(None);
    }

    /// Open the link to the VESC and start the reader thread
    pub fn connect(&self, port: &str) -> Result<(), ProtocolError> {
        let stale = {
            let mut link = self.lock_link();
            if link.as_ref().is_some_and(Link::is_usable) {
                return Err(ProtocolError::AlreadyConnected);
            }
            link.take()
        };
        if let Some(stale) = stale {
            tracing::debug!("Releasing terminated link to {}", stale.port);
            drop(stale);
        }
        join_retired(&self.retired);

        let link = self.open_link(port)?;
        *self.lock_link() = Some(link);

        tracing::info!("Connected to VESC on {}", port);
        Ok(())
    }

    fn open_link(&self, port: &str) -> Result<Link, ProtocolError> {
        if port.is_empty() {
            return Err(ProtocolError::ConnectionError(
                "no serial port specified".to_string(),
            ));
        }

        let mut writer = self.connector.open(port).map_err(|e| match e {
            ProtocolError::ConnectionError(_) => e,
            other => ProtocolError::ConnectionError(other.to_string()),
        })?;

        let spawned = writer
            .try_clone()
            .map_err(|e| ProtocolError::ConnectionError(e.to_string()))
            .and_then(|read_half| {
                ReaderHandle::spawn(
                    read_half,
                    Arc::clone(&self.codec),
                    Arc::clone(&self.handlers),
                    Arc::clone(&self.counters),
                    self.config.read_chunk_size,
                    Arc::clone(&self.retired),
                )
            });

        match spawned {
            Ok(reader) => Ok(Link {
                port: port.to_string(),
                writer,
                reader,
                write_failed: false,
            }),
            Err(e) => {
                writer.close();
                Err(e)
            }
        }
    }

    /// Stop the reader thread and close the link. Does nothing when already
    /// disconnected.
    pub fn disconnect(&self) {
        let link = self.lock_link().take();
        if let Some(link) = link {
            let port = link.port.clone();
            drop(link);
            tracing::info!("Disconnected from VESC on {}", port);
        }
        join_retired(&self.retired);
    }

    /// Check if the link is open and healthy
    pub fn is_connected(&self) -> bool {
        self.lock_link().as_ref().is_some_and(Link::is_usable)
    }

    /// Port of the current link, if any
    pub fn port(&self) -> Option<String> {
        self.lock_link().as_ref().map(|link| link.port.clone())
    }

    /// Interface configuration
    pub fn config(&self) -> &InterfaceConfig {
        &self.config
    }

    /// Cumulative tx/rx counters
    pub fn stats(&self) -> LinkStats {
        self.counters.snapshot()
    }
}

impl MotorController for VescInterface {
    fn send(&self, packet: &Packet) -> Result<(), ProtocolError> {
        let mut guard = self.lock_link();
        let link = match guard.as_mut() {
            Some(link) if link.is_usable() => link,
            _ => return Err(ProtocolError::NotConnected),
        };

        let frame = self.codec.encode(packet)?;
        if let Err(e) = link.writer.write_all(&frame) {
            tracing::warn!("Write to {} failed: {}", link.port, e);
            link.write_failed = true;
            link.reader.request_stop();
            return Err(ProtocolError::TransportWriteError(e.to_string()));
        }

        self.counters.record_tx(frame.len());
        tracing::debug!(
            "Sent {} packet ({} bytes{})",
            packet.name(),
            frame.len(),
            if packet.command_id().expects_response() {
                ", reply expected"
            } else {
                ""
            }
        );
        Ok(())
    }
}

impl Drop for VescInterface {
    fn drop(&mut self) {
        self.disconnect();
    }
}

/// Builder for [`VescInterface`]
#[derive(Default)]
pub struct VescInterfaceBuilder {
    port: String,
    packet_handler: Option<PacketSink>,
    error_handler: Option<ErrorSink>,
    config: InterfaceConfig,
    connector: Option<Arc<dyn Connector>>,
    codec: Option<Arc<dyn PacketCodec>>,
}

impl VescInterfaceBuilder {
    /// Port to connect to on build; empty means stay disconnected
    pub fn port(mut self, port: &str) -> Self {
        self.port = port.to_string();
        self
    }

    /// Initial packet handler
    pub fn packet_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&Packet) + Send + Sync + 'static,
    {
        self.packet_handler = Some(Arc::new(handler));
        self
    }

    /// Initial error handler
    pub fn error_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&ProtocolError) + Send + Sync + 'static,
    {
        self.error_handler = Some(Arc::new(handler));
        self
    }

    /// Interface configuration
    pub fn config(mut self, config: InterfaceConfig) -> Self {
        self.config = config;
        self
    }

    /// Transport connector, defaults to [`SerialConnector`]
    pub fn connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Packet codec, defaults to [`VescCodec`]
    pub fn codec(mut self, codec: Arc<dyn PacketCodec>) -> Self {
        self.codec = Some(codec);
        self
    }

    /// Build the interface, connecting if a port was given
    pub fn build(self) -> Result<VescInterface, ProtocolError> {
        let connector = self
            .connector
            .unwrap_or_else(|| Arc::new(SerialConnector::new(self.config.clone())));
        let codec = self.codec.unwrap_or_else(|| Arc::new(VescCodec::new()));

        let interface = VescInterface {
            config: self.config,
            connector,
            codec,
            handlers: Arc::new(HandlerRegistry::new(
                self.packet_handler,
                self.error_handler,
            )),
            counters: Arc::new(Counters::default()),
            link: Mutex::new(None),
            retired: Retired::default(),
        };

        if !self.port.is_empty() {
            interface.connect(&self.port)?;
        }

        Ok(interface)
    }
}
