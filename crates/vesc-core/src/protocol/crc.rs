//! CRC-16 used by the VESC framing
//!
//! CRC-16/XMODEM: polynomial 0x1021, init 0x0000, no reflection, no final XOR.

use crc::{Crc, CRC_16_XMODEM};

const VESC_CRC: Crc<u16> = Crc::<u16>::new(&CRC_16_XMODEM);

/// Calculate the CRC-16/XMODEM of `data`
pub fn crc16(data: &[u8]) -> u16 {
    VESC_CRC.checksum(data)
}
