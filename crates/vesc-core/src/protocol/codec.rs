//! Frame encoding/decoding
//!
//! Implements the VESC serial framing around packet payloads.
//!
//! Frame format:
//! - Small frame: `0x02`, 1 byte length, payload, 2 byte CRC16, `0x03`
//! - Large frame: `0x03`, 2 byte length (big-endian), payload, 2 byte CRC16, `0x03`
//!
//! The CRC is CRC-16/XMODEM over the payload only, big-endian on the wire.

use byteorder::{BigEndian, ByteOrder};

use super::{crc16, FrameError, Packet, ProtocolError, MAX_PAYLOAD_SIZE};

/// Start byte of a frame with a one byte length field
pub const SOF_SMALL: u8 = 0x02;

/// Start byte of a frame with a two byte length field
pub const SOF_LARGE: u8 = 0x03;

/// End-of-frame byte
pub const EOF_BYTE: u8 = 0x03;

/// Largest payload carried by a small frame
const SMALL_FRAME_MAX: usize = 255;

/// Frame overhead besides the length field: start, CRC, end
const CRC_AND_EOF_LEN: usize = 3;

/// Outcome of one decode attempt at the front of a buffer
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    /// A complete, valid packet occupying the first `consumed` bytes
    Packet {
        /// The decoded packet
        packet: Packet,
        /// Number of bytes the frame occupied
        consumed: usize,
    },
    /// More bytes are needed before anything can be decided
    Incomplete,
    /// The bytes at the front are not a valid frame
    Malformed {
        /// Why the bytes were rejected
        error: FrameError,
        /// Number of bytes to drop before scanning again (always at least 1)
        discard: usize,
    },
}

/// Translates between packets and wire frames.
///
/// Implementations are stateless: all partial-frame state lives in the
/// caller's buffer, so decoding is resumable across arbitrary chunk
/// boundaries.
pub trait PacketCodec: Send + Sync {
    /// Encode a packet into a complete frame
    fn encode(&self, packet: &Packet) -> Result<Vec<u8>, ProtocolError>;

    /// Try to extract the next frame from the front of `buffer`
    fn decode_next(&self, buffer: &[u8]) -> Decoded;
}

/// The VESC framing codec
#[derive(Debug, Clone, Copy, Default)]
pub struct VescCodec;

impl VescCodec {
    /// Create a new codec
    pub fn new() -> Self {
        Self
    }

    /// Wrap an already encoded payload in a frame
    pub fn frame_payload(payload: &[u8]) -> Result<Vec<u8>, ProtocolError> {
        if payload.is_empty() || payload.len() > MAX_PAYLOAD_SIZE {
            return Err(ProtocolError::InvalidCommand(format!(
                "payload of {} bytes cannot be framed",
                payload.len()
            )));
        }

        let mut frame = Vec::with_capacity(payload.len() + 6);
        if payload.len() <= SMALL_FRAME_MAX {
            frame.push(SOF_SMALL);
            frame.push(payload.len() as u8);
        } else {
            let mut len_bytes = [0u8; 2];
            BigEndian::write_u16(&mut len_bytes, payload.len() as u16);
            frame.push(SOF_LARGE);
            frame.extend_from_slice(&len_bytes);
        }

        frame.extend_from_slice(payload);

        let mut crc_bytes = [0u8; 2];
        BigEndian::write_u16(&mut crc_bytes, crc16(payload));
        frame.extend_from_slice(&crc_bytes);
        frame.push(EOF_BYTE);

        Ok(frame)
    }
}

impl PacketCodec for VescCodec {
    fn encode(&self, packet: &Packet) -> Result<Vec<u8>, ProtocolError> {
        Self::frame_payload(&packet.to_payload()?)
    }

    fn decode_next(&self, buffer: &[u8]) -> Decoded {
        match decode_frame(buffer) {
            Decoded::Incomplete => next_complete_frame(buffer)
                .map(|start| Decoded::Malformed {
                    error: FrameError::OutOfSync(start),
                    discard: start,
                })
                .unwrap_or(Decoded::Incomplete),
            decoded => decoded,
        }
    }
}

/// Offset of the first valid frame after the start of `buffer`.
///
/// A corrupted length byte, or the end byte of a damaged frame read as a
/// large-frame start, can announce more bytes than will ever arrive. A valid
/// frame already buffered behind it means that header was bogus.
fn next_complete_frame(buffer: &[u8]) -> Option<usize> {
    (1..buffer.len())
        .filter(|&i| buffer[i] == SOF_SMALL || buffer[i] == SOF_LARGE)
        .find(|&i| matches!(decode_frame(&buffer[i..]), Decoded::Packet { .. }))
}

fn decode_frame(buffer: &[u8]) -> Decoded {
    let Some(&first) = buffer.first() else {
        return Decoded::Incomplete;
    };

    // Leading garbage is reported once for the whole run
    if first != SOF_SMALL && first != SOF_LARGE {
        let skipped = buffer
            .iter()
            .position(|&b| b == SOF_SMALL || b == SOF_LARGE)
            .unwrap_or(buffer.len());
        return Decoded::Malformed {
            error: FrameError::OutOfSync(skipped),
            discard: skipped,
        };
    }

    let header_len = if first == SOF_SMALL { 2 } else { 3 };
    if buffer.len() < header_len {
        return Decoded::Incomplete;
    }

    let payload_len = if first == SOF_SMALL {
        buffer[1] as usize
    } else {
        BigEndian::read_u16(&buffer[1..3]) as usize
    };

    let length_valid = if first == SOF_SMALL {
        payload_len >= 1
    } else {
        payload_len > SMALL_FRAME_MAX && payload_len <= MAX_PAYLOAD_SIZE
    };
    if !length_valid {
        return Decoded::Malformed {
            error: FrameError::InvalidLength(payload_len),
            discard: 1,
        };
    }

    let frame_len = header_len + payload_len + CRC_AND_EOF_LEN;
    if buffer.len() < frame_len {
        return Decoded::Incomplete;
    }

    let end = buffer[frame_len - 1];
    if end != EOF_BYTE {
        return Decoded::Malformed {
            error: FrameError::InvalidEndByte(end),
            discard: 1,
        };
    }

    let payload = &buffer[header_len..header_len + payload_len];
    let received_crc = BigEndian::read_u16(&buffer[header_len + payload_len..frame_len - 1]);
    let expected_crc = crc16(payload);
    // A damaged length byte can make a frame swallow its successor, so a bad
    // CRC only drops the start byte
    if received_crc != expected_crc {
        return Decoded::Malformed {
            error: FrameError::CrcMismatch {
                expected: expected_crc,
                actual: received_crc,
            },
            discard: 1,
        };
    }

    match Packet::from_payload(payload) {
        Ok(packet) => Decoded::Packet {
            packet,
            consumed: frame_len,
        },
        Err(error) => Decoded::Malformed {
            error,
            discard: frame_len,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_small_frame_layout() {
        let frame = VescCodec.encode(&Packet::RequestFwVersion).unwrap();
        // crc16([0x00]) == 0x0000
        assert_eq!(frame, vec![0x02, 0x01, 0x00, 0x00, 0x00, 0x03]);
    }

    #[test]
    fn test_large_frame_layout() {
        let payload = vec![0x04; 300];
        let frame = VescCodec::frame_payload(&payload).unwrap();
        assert_eq!(frame[0], SOF_LARGE);
        assert_eq!(BigEndian::read_u16(&frame[1..3]), 300);
        assert_eq!(frame.len(), 3 + 300 + 3);
        assert_eq!(*frame.last().unwrap(), EOF_BYTE);
    }

    #[test]
    fn test_decode_single_packet() {
        let frame = VescCodec.encode(&Packet::SetRpm(1234.0)).unwrap();
        assert_eq!(
            VescCodec.decode_next(&frame),
            Decoded::Packet {
                packet: Packet::SetRpm(1234.0),
                consumed: frame.len()
            }
        );
    }

    #[test]
    fn test_decode_incomplete_prefixes() {
        let frame = VescCodec.encode(&Packet::SetCurrent(1.5)).unwrap();
        for cut in 0..frame.len() {
            assert_eq!(VescCodec.decode_next(&frame[..cut]), Decoded::Incomplete);
        }
    }

    #[test]
    fn test_decode_out_of_sync_run() {
        let mut buffer = vec![0xAA, 0xBB, 0xCC];
        buffer.extend(VescCodec.encode(&Packet::RequestValues).unwrap());
        assert_eq!(
            VescCodec.decode_next(&buffer),
            Decoded::Malformed {
                error: FrameError::OutOfSync(3),
                discard: 3
            }
        );
    }

    #[test]
    fn test_decode_crc_mismatch_drops_start_byte() {
        let mut frame = VescCodec.encode(&Packet::SetDuty(0.2)).unwrap();
        frame[3] ^= 0xFF;
        match VescCodec.decode_next(&frame) {
            Decoded::Malformed {
                error: FrameError::CrcMismatch { .. },
                discard,
            } => assert_eq!(discard, 1),
            other => panic!("Expected CRC mismatch, got {:?}", other),
        }
    }

    #[test]
    fn test_length_byte_spanning_next_frame() {
        // Length 7 makes the damaged frame end on the next frame's end byte
        let mut buffer = VescCodec.encode(&Packet::RequestFwVersion).unwrap();
        buffer[1] = 7;
        buffer.extend(VescCodec.encode(&Packet::RequestValues).unwrap());
        assert!(matches!(
            VescCodec.decode_next(&buffer),
            Decoded::Malformed {
                error: FrameError::CrcMismatch { .. },
                discard: 1
            }
        ));
    }

    #[test]
    fn test_bogus_header_skipped_when_valid_frame_follows() {
        // End byte of a damaged frame read as a large-frame start
        let mut buffer = vec![SOF_LARGE];
        buffer.extend(VescCodec.encode(&Packet::RequestValues).unwrap());
        assert_eq!(
            VescCodec.decode_next(&buffer),
            Decoded::Malformed {
                error: FrameError::OutOfSync(1),
                discard: 1
            }
        );
    }

    #[test]
    fn test_bogus_header_waits_without_later_frame() {
        let buffer = [SOF_SMALL, 0x40, 0x04, 0x00, 0x01];
        assert_eq!(VescCodec.decode_next(&buffer), Decoded::Incomplete);
    }

    #[test]
    fn test_decode_bad_end_byte() {
        let mut frame = VescCodec.encode(&Packet::RequestFwVersion).unwrap();
        let last = frame.len() - 1;
        frame[last] = 0x7F;
        assert_eq!(
            VescCodec.decode_next(&frame),
            Decoded::Malformed {
                error: FrameError::InvalidEndByte(0x7F),
                discard: 1
            }
        );
    }

    #[test]
    fn test_decode_zero_length() {
        assert_eq!(
            VescCodec.decode_next(&[0x02, 0x00, 0x00, 0x00, 0x03]),
            Decoded::Malformed {
                error: FrameError::InvalidLength(0),
                discard: 1
            }
        );
    }

    #[test]
    fn test_decode_oversized_large_frame() {
        assert_eq!(
            VescCodec.decode_next(&[0x03, 0xFF, 0xFF]),
            Decoded::Malformed {
                error: FrameError::InvalidLength(0xFFFF),
                discard: 1
            }
        );
    }

    #[test]
    fn test_decode_unknown_command() {
        let frame = VescCodec::frame_payload(&[0x42]).unwrap();
        assert_eq!(
            VescCodec.decode_next(&frame),
            Decoded::Malformed {
                error: FrameError::UnknownCommand(0x42),
                discard: frame.len()
            }
        );
    }

    #[test]
    fn test_frame_payload_rejects_empty() {
        assert!(VescCodec::frame_payload(&[]).is_err());
        assert!(VescCodec::frame_payload(&vec![0; MAX_PAYLOAD_SIZE + 1]).is_err());
    }
}
