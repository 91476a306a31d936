//! # VESC Core Library
//!
//! Host-side link layer for VESC motor controllers.

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

//!
//! This library provides:
//! - Connection lifecycle over a serial port
//! - A background reader that decodes framed, CRC-checked packets
//! - Thread-safe, fire-and-forget motor commands
//! - Replaceable packet and error handlers
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use vesc_core::prelude::*;
//!
//! let vesc = VescInterface::new(
//!     "/dev/ttyACM0",
//!     Some(Arc::new(|packet: &Packet| println!("{:?}", packet))),
//!     Some(Arc::new(|err: &ProtocolError| eprintln!("{}", err))),
//! )?;
//!
//! vesc.request_fw_version()?;
//! vesc.set_duty_cycle(0.1)?;
//! ```

pub mod protocol;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::protocol::{
        Connector, Decoded, ErrorSink, FaultCode, FrameError, InterfaceConfig, LinkStats,
        MotorController, MotorValues, Packet, PacketCodec, PacketSink, ProtocolError,
        SerialConnector, Transport, VescCodec, VescInterface,
    };
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
