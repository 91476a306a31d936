//! Background reader
//!
//! One thread per open connection pulls bytes from the transport, feeds them
//! through the codec and dispatches every outcome to the handler registry.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use super::connection::Counters;
use super::handlers::HandlerRegistry;
use super::{Decoded, FrameError, Packet, PacketCodec, ProtocolError, Transport};

/// Receive buffer holding bytes not yet decoded
#[derive(Debug, Default)]
pub(crate) struct FrameBuffer {
    pending: Vec<u8>,
    resyncing: bool,
}

impl FrameBuffer {
    pub(crate) fn extend(&mut self, bytes: &[u8]) {
        self.pending.extend_from_slice(bytes);
    }

    /// Extract every complete frame from the front of the buffer.
    ///
    /// Decoded packets and malformed frames are reported in wire order. Bytes
    /// of an incomplete trailing frame stay buffered for the next call.
    ///
    /// Only the first rejection of a resync run is reported; the run lasts
    /// until the next packet decodes, across calls. Extraction stops as soon
    /// as `stop` is set.
    pub(crate) fn drain(
        &mut self,
        codec: &dyn PacketCodec,
        stop: &AtomicBool,
        mut on_packet: impl FnMut(Packet),
        mut on_error: impl FnMut(FrameError),
    ) {
        let mut offset = 0;
        while offset < self.pending.len() && !stop.load(Ordering::Acquire) {
            match codec.decode_next(&self.pending[offset..]) {
                Decoded::Packet { packet, consumed } => {
                    offset += consumed.max(1);
                    self.resyncing = false;
                    on_packet(packet);
                }
                Decoded::Malformed { error, discard } => {
                    offset += discard.max(1);
                    if self.resyncing {
                        tracing::trace!("Skipping while resynchronising: {}", error);
                    } else {
                        self.resyncing = true;
                        on_error(error);
                    }
                }
                Decoded::Incomplete => break,
            }
        }
        let offset = offset.min(self.pending.len());
        self.pending.drain(..offset);
    }
}

/// Reader threads stopped from their own thread, joined later from another
pub(crate) type Retired = Arc<Mutex<Vec<JoinHandle<()>>>>;

/// Join every retired reader except one running the calling code
pub(crate) fn join_retired(retired: &Mutex<Vec<JoinHandle<()>>>) {
    let current = thread::current().id();
    let handles = {
        let mut retired = retired.lock().unwrap_or_else(|e| e.into_inner());
        let (own, others): (Vec<_>, Vec<_>) = retired
            .drain(..)
            .partition(|handle| handle.thread().id() == current);
        *retired = own;
        others
    };

    for handle in handles {
        if handle.join().is_err() {
            tracing::warn!("VESC reader thread panicked");
        }
    }
}

fn is_timeout(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}

/// Owner of a running reader thread
pub(crate) struct ReaderHandle {
    stop: Arc<AtomicBool>,
    alive: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
    retired: Retired,
}

impl ReaderHandle {
    /// Start the reader thread on its own handle to the link
    pub(crate) fn spawn(
        transport: Box<dyn Transport>,
        codec: Arc<dyn PacketCodec>,
        handlers: Arc<HandlerRegistry>,
        counters: Arc<Counters>,
        chunk_size: usize,
        retired: Retired,
    ) -> Result<Self, ProtocolError> {
        let stop = Arc::new(AtomicBool::new(false));
        let alive = Arc::new(AtomicBool::new(true));

        let reader = ReaderLoop {
            transport,
            codec,
            handlers,
            counters,
            stop: Arc::clone(&stop),
            alive: Arc::clone(&alive),
            chunk_size: chunk_size.max(1),
        };

        let thread = thread::Builder::new()
            .name("vesc-reader".to_string())
            .spawn(move || reader.run())
            .map_err(|e| {
                ProtocolError::ConnectionError(format!("failed to spawn reader thread: {}", e))
            })?;

        Ok(Self {
            stop,
            alive,
            thread: Some(thread),
            retired,
        })
    }

    /// False once the loop has exited for any reason
    pub(crate) fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    /// Ask the loop to exit after its current read
    pub(crate) fn request_stop(&self) {
        self.stop.store(true, Ordering::Release);
    }

    /// Stop the loop and wait for the thread to finish
    pub(crate) fn shutdown(&mut self) {
        self.request_stop();
        let Some(thread) = self.thread.take() else {
            return;
        };

        // A handler running on the reader thread may disconnect; joining
        // ourselves would deadlock. The loop sees the stop flag on return
        // and the next connect, disconnect or drop joins it.
        if thread.thread().id() == thread::current().id() {
            self.retired
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(thread);
            return;
        }

        if thread.join().is_err() {
            tracing::warn!("VESC reader thread panicked");
        }
    }
}

impl Drop for ReaderHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct ReaderLoop {
    transport: Box<dyn Transport>,
    codec: Arc<dyn PacketCodec>,
    handlers: Arc<HandlerRegistry>,
    counters: Arc<Counters>,
    stop: Arc<AtomicBool>,
    alive: Arc<AtomicBool>,
    chunk_size: usize,
}

impl ReaderLoop {
    fn run(mut self) {
        tracing::debug!("VESC reader started");

        let mut chunk = vec![0u8; self.chunk_size];
        let mut frames = FrameBuffer::default();

        while !self.stop.load(Ordering::Acquire) {
            let n = match self.transport.read(&mut chunk) {
                Ok(0) => {
                    self.fail(ProtocolError::TransportClosed);
                    break;
                }
                Ok(n) => n,
                Err(e) if is_timeout(&e) => continue,
                Err(e) => {
                    self.fail(ProtocolError::TransportReadError(e.to_string()));
                    break;
                }
            };

            self.counters.record_rx_bytes(n);
            frames.extend(&chunk[..n]);

            let handlers = &self.handlers;
            let counters = &self.counters;
            frames.drain(
                self.codec.as_ref(),
                &self.stop,
                |packet| {
                    counters.record_rx_packet();
                    tracing::debug!("Received {} packet", packet.name());
                    handlers.dispatch_packet(&packet);
                },
                |error| {
                    counters.record_malformed();
                    tracing::warn!("Discarding malformed frame: {}", error);
                    handlers.dispatch_error(&ProtocolError::MalformedPacket(error));
                },
            );
        }

        self.alive.store(false, Ordering::Release);
        tracing::debug!("VESC reader exiting");
    }

    /// Report a terminal transport failure, unless a disconnect is already underway
    fn fail(&self, error: ProtocolError) {
        if !self.stop.load(Ordering::Acquire) {
            tracing::warn!("VESC link terminated: {}", error);
            self.handlers.dispatch_error(&error);
        }
        self.alive.store(false, Ordering::Release);
    }
}
