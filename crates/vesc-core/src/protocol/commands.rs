//! Protocol commands
//!
//! Command identifiers carried in the first payload byte of every VESC packet.

use serde::{Deserialize, Serialize};

/// VESC command identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum CommandId {
    /// Firmware version request and response
    FwVersion = 0,

    /// Motor state ("values") request and response
    GetValues = 4,

    /// Set duty cycle
    SetDuty = 5,

    /// Set motor current
    SetCurrent = 6,

    /// Set braking current
    SetCurrentBrake = 7,

    /// Set electrical RPM
    SetRpm = 8,

    /// Set rotor position
    SetPos = 9,

    /// Set servo output position
    SetServoPos = 11,
}

impl CommandId {
    /// Look up a command id from its wire value
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(CommandId::FwVersion),
            4 => Some(CommandId::GetValues),
            5 => Some(CommandId::SetDuty),
            6 => Some(CommandId::SetCurrent),
            7 => Some(CommandId::SetCurrentBrake),
            8 => Some(CommandId::SetRpm),
            9 => Some(CommandId::SetPos),
            11 => Some(CommandId::SetServoPos),
            _ => None,
        }
    }

    /// Wire value of this command
    pub fn as_byte(self) -> u8 {
        self as u8
    }

    /// Human-readable command name, used in diagnostics
    pub fn name(self) -> &'static str {
        match self {
            CommandId::FwVersion => "FWVersion",
            CommandId::GetValues => "Values",
            CommandId::SetDuty => "SetDuty",
            CommandId::SetCurrent => "SetCurrent",
            CommandId::SetCurrentBrake => "SetCurrentBrake",
            CommandId::SetRpm => "SetRPM",
            CommandId::SetPos => "SetPos",
            CommandId::SetServoPos => "SetServoPos",
        }
    }

    /// Check if the device answers this command with a packet
    pub fn expects_response(self) -> bool {
        matches!(self, CommandId::FwVersion | CommandId::GetValues)
    }
}
