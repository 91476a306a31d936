//! Handler registry
//!
//! Single-slot, replaceable packet and error handlers. Each dispatch takes a
//! snapshot of the slot under the lock and invokes it after releasing the
//! lock, so a concurrent replacement lands either before or after a given
//! dispatch and a handler may safely replace itself.

use std::sync::{Arc, RwLock};

use super::{Packet, ProtocolError};

/// Callback invoked with each decoded packet
pub type PacketSink = Arc<dyn Fn(&Packet) + Send + Sync>;

/// Callback invoked with each asynchronously detected error
pub type ErrorSink = Arc<dyn Fn(&ProtocolError) + Send + Sync>;

/// Current packet and error handlers
#[derive(Default)]
pub(crate) struct HandlerRegistry {
    packet: RwLock<Option<PacketSink>>,
    error: RwLock<Option<ErrorSink>>,
}

impl HandlerRegistry {
    pub(crate) fn new(packet: Option<PacketSink>, error: Option<ErrorSink>) -> Self {
        Self {
            packet: RwLock::new(packet),
            error: RwLock::new(error),
        }
    }

    pub(crate) fn set_packet_handler(&self, handler: Option<PacketSink>) {
        *self.packet.write().unwrap_or_else(|e| e.into_inner()) = handler;
    }

    pub(crate) fn set_error_handler(&self, handler: Option<ErrorSink>) {
        *self.error.write().unwrap_or_else(|e| e.into_inner()) = handler;
    }

    /// Invoke the current packet handler, if any
    pub(crate) fn dispatch_packet(&self, packet: &Packet) {
        let handler = self
            .packet
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        if let Some(handler) = handler {
            handler(packet);
        }
    }

    /// Invoke the current error handler, if any
    pub(crate) fn dispatch_error(&self, error: &ProtocolError) {
        let handler = self
            .error
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        match handler {
            Some(handler) => handler(error),
            None => tracing::debug!("No error handler registered, dropping: {}", error),
        }
    }
}
