//! VESC Serial Protocol
//!
//! Implements the connection and packet-dispatch layer for the VESC serial
//! protocol.
//!
//! Outbound commands are encoded by a [`PacketCodec`] and written to a
//! [`Transport`] under a write lock. A single reader thread per connection
//! feeds inbound bytes through the codec and hands each decoded packet, or
//! each detected error, to the registered handlers.

pub mod codec;
pub mod commands;
mod connection;
mod crc;
mod error;
mod handlers;
mod packet;
mod reader;
pub mod serial;

pub use codec::{Decoded, PacketCodec, VescCodec};
pub use commands::CommandId;
pub use connection::{
    InterfaceConfig, LinkStats, MotorController, VescInterface, VescInterfaceBuilder,
};
pub use crc::crc16;
pub use error::{FrameError, ProtocolError};
pub use handlers::{ErrorSink, PacketSink};
pub use packet::{FaultCode, MotorValues, Packet};
pub use serial::{list_ports, Connector, PortInfo, SerialConnector, Transport};

/// Default baud rate for VESC communication
pub const DEFAULT_BAUD_RATE: u32 = 115200;

/// Default bound on a single transport read, in milliseconds.
/// This is also the worst-case latency of `disconnect`.
pub const DEFAULT_READ_TIMEOUT_MS: u64 = 100;

/// Default size of the buffer handed to each transport read
pub const DEFAULT_READ_CHUNK_SIZE: usize = 1024;

/// Maximum payload size accepted in a frame
pub const MAX_PAYLOAD_SIZE: usize = 1024;
