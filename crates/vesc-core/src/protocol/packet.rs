//! Packet payloads
//!
//! A [`Packet`] is the decoded, validated form of a VESC message. The first
//! payload byte is the [`CommandId`]; the remaining bytes are big-endian
//! fixed-point fields whose scale depends on the command.

use byteorder::{BigEndian, ByteOrder};
use serde::{Deserialize, Serialize};

use super::{CommandId, FrameError, ProtocolError};

/// Length of a request payload (command byte only)
const REQUEST_LEN: usize = 1;

/// Minimum length of a firmware version response payload
const FW_VERSION_LEN: usize = 3;

/// Minimum length of a values response payload
const VALUES_LEN: usize = 56;

const DUTY_SCALE: f64 = 100_000.0;
const CURRENT_SCALE: f64 = 1_000.0;
const POSITION_SCALE: f64 = 1_000_000.0;
const SERVO_SCALE: f64 = 1_000.0;

/// A VESC protocol packet, in either direction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Packet {
    /// Ask the device for its firmware version
    RequestFwVersion,
    /// Ask the device for its current motor state
    RequestValues,
    /// Firmware version reported by the device
    FwVersion {
        /// Major version
        major: u8,
        /// Minor version
        minor: u8,
    },
    /// Motor state reported by the device
    Values(MotorValues),
    /// Duty cycle, -1.0 to 1.0
    SetDuty(f64),
    /// Motor current in amps
    SetCurrent(f64),
    /// Braking current in amps
    SetCurrentBrake(f64),
    /// Electrical RPM
    SetRpm(f64),
    /// Rotor position in degrees
    SetPosition(f64),
    /// Servo position, 0.0 to 1.0
    SetServo(f64),
}

/// Motor controller fault codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FaultCode {
    /// No fault
    None,
    /// Input voltage above the configured limit
    OverVoltage,
    /// Input voltage below the configured limit
    UnderVoltage,
    /// Gate driver fault
    Drv,
    /// Absolute current limit exceeded
    AbsOverCurrent,
    /// MOSFET temperature limit exceeded
    OverTempFet,
    /// Motor temperature limit exceeded
    OverTempMotor,
    /// Code not known to this driver
    Unknown(u8),
}

impl FaultCode {
    fn from_byte(byte: u8) -> Self {
        match byte {
            0 => FaultCode::None,
            1 => FaultCode::OverVoltage,
            2 => FaultCode::UnderVoltage,
            3 => FaultCode::Drv,
            4 => FaultCode::AbsOverCurrent,
            5 => FaultCode::OverTempFet,
            6 => FaultCode::OverTempMotor,
            other => FaultCode::Unknown(other),
        }
    }

    fn as_byte(self) -> u8 {
        match self {
            FaultCode::None => 0,
            FaultCode::OverVoltage => 1,
            FaultCode::UnderVoltage => 2,
            FaultCode::Drv => 3,
            FaultCode::AbsOverCurrent => 4,
            FaultCode::OverTempFet => 5,
            FaultCode::OverTempMotor => 6,
            FaultCode::Unknown(other) => other,
        }
    }
}

/// Motor state snapshot from a values packet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MotorValues {
    /// MOSFET temperatures in °C
    pub temp_mos: [f64; 6],
    /// PCB temperature in °C
    pub temp_pcb: f64,
    /// Motor current in amps
    pub current_motor: f64,
    /// Input current in amps
    pub current_input: f64,
    /// Duty cycle, -1.0 to 1.0
    pub duty_cycle: f64,
    /// Electrical RPM
    pub rpm: f64,
    /// Input voltage in volts
    pub voltage_input: f64,
    /// Consumed charge in amp hours
    pub amp_hours: f64,
    /// Regenerated charge in amp hours
    pub amp_hours_charged: f64,
    /// Consumed energy in watt hours
    pub watt_hours: f64,
    /// Regenerated energy in watt hours
    pub watt_hours_charged: f64,
    /// Signed tachometer count
    pub tachometer: i32,
    /// Absolute tachometer count
    pub tachometer_abs: i32,
    /// Active fault
    pub fault_code: FaultCode,
}

impl Default for MotorValues {
    fn default() -> Self {
        Self {
            temp_mos: [0.0; 6],
            temp_pcb: 0.0,
            current_motor: 0.0,
            current_input: 0.0,
            duty_cycle: 0.0,
            rpm: 0.0,
            voltage_input: 0.0,
            amp_hours: 0.0,
            amp_hours_charged: 0.0,
            watt_hours: 0.0,
            watt_hours_charged: 0.0,
            tachometer: 0,
            tachometer_abs: 0,
            fault_code: FaultCode::None,
        }
    }
}

impl Packet {
    /// Command id carried by this packet
    pub fn command_id(&self) -> CommandId {
        match self {
            Packet::RequestFwVersion | Packet::FwVersion { .. } => CommandId::FwVersion,
            Packet::RequestValues | Packet::Values(_) => CommandId::GetValues,
            Packet::SetDuty(_) => CommandId::SetDuty,
            Packet::SetCurrent(_) => CommandId::SetCurrent,
            Packet::SetCurrentBrake(_) => CommandId::SetCurrentBrake,
            Packet::SetRpm(_) => CommandId::SetRpm,
            Packet::SetPosition(_) => CommandId::SetPos,
            Packet::SetServo(_) => CommandId::SetServoPos,
        }
    }

    /// Packet name, used in diagnostics
    pub fn name(&self) -> &'static str {
        self.command_id().name()
    }

    /// Encode the payload (command byte plus fields, without framing)
    pub fn to_payload(&self) -> Result<Vec<u8>, ProtocolError> {
        let writer = PayloadWriter::new(self.command_id());
        let writer = match self {
            Packet::RequestFwVersion | Packet::RequestValues => writer,
            Packet::FwVersion { major, minor } => writer.byte(*major).byte(*minor),
            Packet::Values(values) => write_values(writer, values)?,
            Packet::SetDuty(duty) => writer.i32_be(scaled_i32("duty cycle", *duty, DUTY_SCALE)?),
            Packet::SetCurrent(current) => {
                writer.i32_be(scaled_i32("current", *current, CURRENT_SCALE)?)
            }
            Packet::SetCurrentBrake(brake) => {
                writer.i32_be(scaled_i32("brake", *brake, CURRENT_SCALE)?)
            }
            Packet::SetRpm(rpm) => writer.i32_be(scaled_i32("speed", *rpm, 1.0)?),
            Packet::SetPosition(position) => {
                writer.i32_be(scaled_i32("position", *position, POSITION_SCALE)?)
            }
            Packet::SetServo(servo) => writer.i16_be(scaled_i16("servo", *servo, SERVO_SCALE)?),
        };
        Ok(writer.build())
    }

    /// Decode a packet from a validated payload
    pub fn from_payload(payload: &[u8]) -> Result<Self, FrameError> {
        let first = *payload.first().ok_or(FrameError::InvalidLength(0))?;
        let command = CommandId::from_byte(first).ok_or(FrameError::UnknownCommand(first))?;
        let invalid = || FrameError::InvalidPayload {
            command: command.name(),
            len: payload.len(),
        };
        let fixed = |len: usize| {
            if payload.len() == len {
                Ok(PayloadReader::new(payload))
            } else {
                Err(invalid())
            }
        };

        let packet = match command {
            CommandId::FwVersion => match payload.len() {
                REQUEST_LEN => Packet::RequestFwVersion,
                len if len >= FW_VERSION_LEN => Packet::FwVersion {
                    major: payload[1],
                    minor: payload[2],
                },
                _ => return Err(invalid()),
            },
            CommandId::GetValues => match payload.len() {
                REQUEST_LEN => Packet::RequestValues,
                len if len >= VALUES_LEN => Packet::Values(read_values(PayloadReader::new(payload))),
                _ => return Err(invalid()),
            },
            CommandId::SetDuty => Packet::SetDuty(fixed(5)?.i32_scaled(DUTY_SCALE)),
            CommandId::SetCurrent => Packet::SetCurrent(fixed(5)?.i32_scaled(CURRENT_SCALE)),
            CommandId::SetCurrentBrake => {
                Packet::SetCurrentBrake(fixed(5)?.i32_scaled(CURRENT_SCALE))
            }
            CommandId::SetRpm => Packet::SetRpm(fixed(5)?.i32_scaled(1.0)),
            CommandId::SetPos => Packet::SetPosition(fixed(5)?.i32_scaled(POSITION_SCALE)),
            CommandId::SetServoPos => Packet::SetServo(fixed(3)?.i16_scaled(SERVO_SCALE)),
        };
        Ok(packet)
    }
}

fn write_values(writer: PayloadWriter, v: &MotorValues) -> Result<PayloadWriter, ProtocolError> {
    let mut writer = writer;
    for temp in v.temp_mos {
        writer = writer.i16_be(scaled_i16("MOSFET temperature", temp, 10.0)?);
    }
    Ok(writer
        .i16_be(scaled_i16("PCB temperature", v.temp_pcb, 10.0)?)
        .i32_be(scaled_i32("motor current", v.current_motor, 100.0)?)
        .i32_be(scaled_i32("input current", v.current_input, 100.0)?)
        .i16_be(scaled_i16("duty cycle", v.duty_cycle, 1000.0)?)
        .i32_be(scaled_i32("rpm", v.rpm, 1.0)?)
        .i16_be(scaled_i16("input voltage", v.voltage_input, 10.0)?)
        .i32_be(scaled_i32("amp hours", v.amp_hours, 10_000.0)?)
        .i32_be(scaled_i32("amp hours charged", v.amp_hours_charged, 10_000.0)?)
        .i32_be(scaled_i32("watt hours", v.watt_hours, 10_000.0)?)
        .i32_be(scaled_i32("watt hours charged", v.watt_hours_charged, 10_000.0)?)
        .i32_be(v.tachometer)
        .i32_be(v.tachometer_abs)
        .byte(v.fault_code.as_byte()))
}

fn read_values(mut r: PayloadReader<'_>) -> MotorValues {
    let mut temp_mos = [0.0; 6];
    for temp in temp_mos.iter_mut() {
        *temp = r.i16_scaled(10.0);
    }
    MotorValues {
        temp_mos,
        temp_pcb: r.i16_scaled(10.0),
        current_motor: r.i32_scaled(100.0),
        current_input: r.i32_scaled(100.0),
        duty_cycle: r.i16_scaled(1000.0),
        rpm: r.i32_scaled(1.0),
        voltage_input: r.i16_scaled(10.0),
        amp_hours: r.i32_scaled(10_000.0),
        amp_hours_charged: r.i32_scaled(10_000.0),
        watt_hours: r.i32_scaled(10_000.0),
        watt_hours_charged: r.i32_scaled(10_000.0),
        tachometer: r.i32(),
        tachometer_abs: r.i32(),
        fault_code: FaultCode::from_byte(r.byte()),
    }
}

fn scaled_i32(field: &str, value: f64, scale: f64) -> Result<i32, ProtocolError> {
    let scaled = (value * scale).round();
    if !scaled.is_finite() || scaled < i32::MIN as f64 || scaled > i32::MAX as f64 {
        return Err(ProtocolError::InvalidCommand(format!(
            "{} {} is out of range",
            field, value
        )));
    }
    Ok(scaled as i32)
}

fn scaled_i16(field: &str, value: f64, scale: f64) -> Result<i16, ProtocolError> {
    let scaled = (value * scale).round();
    if !scaled.is_finite() || scaled < i16::MIN as f64 || scaled > i16::MAX as f64 {
        return Err(ProtocolError::InvalidCommand(format!(
            "{} {} is out of range",
            field, value
        )));
    }
    Ok(scaled as i16)
}

/// Builder for packet payloads
struct PayloadWriter {
    payload: Vec<u8>,
}

impl PayloadWriter {
    fn new(command: CommandId) -> Self {
        Self {
            payload: vec![command.as_byte()],
        }
    }

    fn byte(mut self, b: u8) -> Self {
        self.payload.push(b);
        self
    }

    fn i16_be(mut self, value: i16) -> Self {
        let mut bytes = [0u8; 2];
        BigEndian::write_i16(&mut bytes, value);
        self.payload.extend_from_slice(&bytes);
        self
    }

    fn i32_be(mut self, value: i32) -> Self {
        let mut bytes = [0u8; 4];
        BigEndian::write_i32(&mut bytes, value);
        self.payload.extend_from_slice(&bytes);
        self
    }

    fn build(self) -> Vec<u8> {
        self.payload
    }
}

/// Sequential field reader over a payload whose length was already checked.
/// Reading starts after the command byte.
struct PayloadReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> PayloadReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 1 }
    }

    fn byte(&mut self) -> u8 {
        let b = self.data[self.pos];
        self.pos += 1;
        b
    }

    fn i32(&mut self) -> i32 {
        let value = BigEndian::read_i32(&self.data[self.pos..self.pos + 4]);
        self.pos += 4;
        value
    }

    fn i32_scaled(&mut self, scale: f64) -> f64 {
        self.i32() as f64 / scale
    }

    fn i16_scaled(&mut self, scale: f64) -> f64 {
        let value = BigEndian::read_i16(&self.data[self.pos..self.pos + 2]);
        self.pos += 2;
        value as f64 / scale
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sample_values() -> MotorValues {
        MotorValues {
            temp_mos: [25.5, 26.0, 26.5, 27.0, 27.5, 28.0],
            temp_pcb: 30.1,
            current_motor: 12.34,
            current_input: 5.67,
            duty_cycle: 0.25,
            rpm: 4200.0,
            voltage_input: 24.3,
            amp_hours: 1.2345,
            amp_hours_charged: 0.0123,
            watt_hours: 29.5,
            watt_hours_charged: 0.25,
            tachometer: -1500,
            tachometer_abs: 9000,
            fault_code: FaultCode::None,
        }
    }

    #[test]
    fn test_request_payloads() {
        assert_eq!(Packet::RequestFwVersion.to_payload().unwrap(), vec![0]);
        assert_eq!(Packet::RequestValues.to_payload().unwrap(), vec![4]);
    }

    #[test]
    fn test_set_duty_scaling() {
        let payload = Packet::SetDuty(0.5).to_payload().unwrap();
        // 0.5 * 100000 = 50000 = 0x0000C350
        assert_eq!(payload, vec![5, 0x00, 0x00, 0xC3, 0x50]);
    }

    #[test]
    fn test_set_servo_scaling() {
        let payload = Packet::SetServo(0.5).to_payload().unwrap();
        // 0.5 * 1000 = 500 = 0x01F4
        assert_eq!(payload, vec![11, 0x01, 0xF4]);
    }

    #[test]
    fn test_negative_current() {
        let payload = Packet::SetCurrent(-2.0).to_payload().unwrap();
        assert_eq!(payload, vec![6, 0xFF, 0xFF, 0xF8, 0x30]);
        assert_eq!(Packet::from_payload(&payload).unwrap(), Packet::SetCurrent(-2.0));
    }

    #[test]
    fn test_out_of_range_rejected() {
        assert!(matches!(
            Packet::SetServo(1000.0).to_payload(),
            Err(ProtocolError::InvalidCommand(_))
        ));
        assert!(matches!(
            Packet::SetDuty(f64::NAN).to_payload(),
            Err(ProtocolError::InvalidCommand(_))
        ));
    }

    #[test]
    fn test_fw_version_response() {
        let packet = Packet::from_payload(&[0, 6, 2]).unwrap();
        assert_eq!(packet, Packet::FwVersion { major: 6, minor: 2 });
    }

    #[test]
    fn test_fw_version_with_trailing_hardware_name() {
        let packet = Packet::from_payload(&[0, 5, 3, b'4', b'1', 0]).unwrap();
        assert_eq!(packet, Packet::FwVersion { major: 5, minor: 3 });
    }

    #[test]
    fn test_values_decode() {
        let values = sample_values();
        let payload = Packet::Values(values.clone()).to_payload().unwrap();
        assert_eq!(payload.len(), VALUES_LEN);

        match Packet::from_payload(&payload).unwrap() {
            Packet::Values(decoded) => {
                assert_eq!(decoded.temp_mos[0], 25.5);
                assert_eq!(decoded.rpm, 4200.0);
                assert_eq!(decoded.tachometer, -1500);
                assert_eq!(decoded.voltage_input, 24.3);
                assert_eq!(decoded.fault_code, FaultCode::None);
            }
            other => panic!("Expected values packet, got {:?}", other),
        }
    }

    #[test]
    fn test_fault_code_unknown_preserved() {
        let mut values = sample_values();
        values.fault_code = FaultCode::Unknown(42);
        let payload = Packet::Values(values).to_payload().unwrap();
        assert_eq!(payload[VALUES_LEN - 1], 42);
    }

    #[test]
    fn test_invalid_payload_lengths() {
        assert_eq!(
            Packet::from_payload(&[0, 1]),
            Err(FrameError::InvalidPayload {
                command: "FWVersion",
                len: 2
            })
        );
        assert!(matches!(
            Packet::from_payload(&[4, 0, 0]),
            Err(FrameError::InvalidPayload { .. })
        ));
        assert!(matches!(
            Packet::from_payload(&[5, 0, 0]),
            Err(FrameError::InvalidPayload { .. })
        ));
    }

    #[test]
    fn test_unknown_command() {
        assert_eq!(
            Packet::from_payload(&[0x42]),
            Err(FrameError::UnknownCommand(0x42))
        );
    }

    #[test]
    fn test_empty_payload() {
        assert_eq!(Packet::from_payload(&[]), Err(FrameError::InvalidLength(0)));
    }
}
