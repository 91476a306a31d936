//! Protocol errors

use thiserror::Error;

/// Errors that can occur during protocol communication
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// The transport could not be opened
    #[error("Connection failed: {0}")]
    ConnectionError(String),

    /// `connect` while a link is open
    #[error("Already connected")]
    AlreadyConnected,

    /// Send without an open link
    #[error("Not connected to VESC")]
    NotConnected,

    /// Read failure; ends the reader
    #[error("Serial read failed: {0}")]
    TransportReadError(String),

    /// End of stream; ends the reader
    #[error("Serial port closed by peer")]
    TransportClosed,

    /// Write failure; the link is dead afterwards
    #[error("Serial write failed: {0}")]
    TransportWriteError(String),

    /// Frame rejected by the codec
    #[error("Malformed packet: {0}")]
    MalformedPacket(#[from] FrameError),

    /// Command that cannot be encoded
    #[error("Invalid command: {0}")]
    InvalidCommand(String),
}

/// Reasons a frame was rejected by the codec
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// Bytes skipped to reach the next frame
    #[error("out of sync with VESC, discarded {0} bytes before a start byte")]
    OutOfSync(usize),

    /// Length field out of range
    #[error("invalid payload length {0}")]
    InvalidLength(usize),

    /// Missing end-of-frame byte
    #[error("invalid end byte {0:#04x}")]
    InvalidEndByte(u8),

    /// Checksum does not match the payload
    #[error("CRC mismatch: expected {expected:#06x}, got {actual:#06x}")]
    CrcMismatch {
        /// CRC computed over the received payload
        expected: u16,
        /// CRC carried by the frame
        actual: u16,
    },

    /// Command byte with no known packet
    #[error("unknown command id {0}")]
    UnknownCommand(u8),

    /// Known command with a payload of the wrong size
    #[error("invalid payload length {len} for command {command}")]
    InvalidPayload {
        /// Command name
        command: &'static str,
        /// Payload length received
        len: usize,
    },
}
