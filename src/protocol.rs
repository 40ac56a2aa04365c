use crate::error::{Error, Result};

use num_enum::{FromPrimitive, IntoPrimitive, TryFromPrimitive};
use serde::{Deserialize, Serialize};

// Tion S3 breezer frames, as observed on the wire. Every frame is 20 bytes
// long and ends with `FRAME_SUFFIX`.

/// Length of every request and response frame
pub const FRAME_LEN: usize = 20;

const REQUEST_PREFIX: u8 = 0x3d;
const RESPONSE_PREFIX: u8 = 0xb3;
const FRAME_SUFFIX: u8 = 0x5a;

/// Frame type, second byte of every frame
#[derive(Copy, Clone, Debug, Eq, PartialEq, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
enum FrameType {
    StatusRequest = 0x01,
    SetParams = 0x02,
    Status = 0x10,
}

// Bits of the flags byte, shared by status responses and set-params commands
const FLAG_HEATER: u8 = 1 << 0;
const FLAG_ON: u8 = 1 << 1;
const FLAG_TIMER: u8 = 1 << 2;
const FLAG_SOUND: u8 = 1 << 3;

/// Position of the air intake gate
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, FromPrimitive, IntoPrimitive, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum Gate {
    /// Outside valve shut, air is recirculated
    #[serde(alias = "indoor")]
    Closed = 0,
    Mixed = 1,
    /// Fresh air only
    #[serde(alias = "outdoor")]
    Open = 2,
    /// Reserved position reported by the device, kept as is
    #[num_enum(catch_all)]
    #[serde(skip_deserializing)]
    Other(u8),
}

// num_enum also reads `#[default]` and rejects it next to `catch_all`
#[allow(clippy::derivable_impls)]
impl Default for Gate {
    fn default() -> Self {
        Gate::Closed
    }
}

/// Full device state carried by a status frame
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct Status {
    pub on: bool,
    pub speed: u8,
    pub heater: bool,
    pub sound: bool,
    pub timer: bool,
    /// Heater target temperature, °C
    pub target: i8,
    pub gate: Gate,
    /// Outside air temperature, °C
    pub temp_out: i8,
    /// Supplied air temperature, °C
    pub temp_in: i8,
    pub filter_days: u16,
    pub hours: u8,
    pub minutes: u8,
    pub error_code: u8,
    pub productivity: u8,
    pub run_days: u16,
    pub firmware: u16,
}

/// Frame asking the device to publish its status on the read characteristic
pub fn status_request() -> [u8; FRAME_LEN] {
    let mut frame = [0u8; FRAME_LEN];
    frame[0] = REQUEST_PREFIX;
    frame[1] = FrameType::StatusRequest.into();
    frame[FRAME_LEN - 1] = FRAME_SUFFIX;
    frame
}

impl Status {
    /// Decode a status response frame.
    ///
    /// Trailing bytes past [`FRAME_LEN`] and the reserved bytes 5-6 are ignored.
    pub fn decode(bytes: &[u8]) -> Result<Status> {
        if bytes.len() < FRAME_LEN {
            return Err(Error::MalformedFrame(format!(
                "too short, {} of {} bytes ({:x?})",
                bytes.len(),
                FRAME_LEN,
                bytes
            )));
        }
        if bytes[0] != RESPONSE_PREFIX {
            return Err(Error::MalformedFrame(format!("unexpected prefix {:#04x}", bytes[0])));
        }
        match FrameType::try_from(bytes[1]) {
            Ok(FrameType::Status) => {}
            _ => return Err(Error::MalformedFrame(format!("unexpected frame type {:#04x}", bytes[1]))),
        }
        if bytes[FRAME_LEN - 1] != FRAME_SUFFIX {
            return Err(Error::MalformedFrame(format!(
                "unexpected suffix {:#04x}",
                bytes[FRAME_LEN - 1]
            )));
        }

        let flags = bytes[4];
        Ok(Status {
            on: flags & FLAG_ON != 0,
            speed: bytes[2] & 0x0f,
            heater: flags & FLAG_HEATER != 0,
            sound: flags & FLAG_SOUND != 0,
            timer: flags & FLAG_TIMER != 0,
            target: bytes[3] as i8,
            gate: Gate::from(bytes[2] >> 4),
            temp_out: bytes[7] as i8,
            temp_in: bytes[8] as i8,
            filter_days: u16::from_le_bytes([bytes[9], bytes[10]]),
            hours: bytes[11],
            minutes: bytes[12],
            error_code: bytes[13],
            productivity: bytes[14],
            run_days: u16::from_le_bytes([bytes[15], bytes[16]]),
            firmware: u16::from_le_bytes([bytes[17], bytes[18]]),
        })
    }

    /// Encode into the status response layout, the inverse of [`Status::decode`]
    pub fn encode(&self) -> [u8; FRAME_LEN] {
        let mut frame = [0u8; FRAME_LEN];
        frame[0] = RESPONSE_PREFIX;
        frame[1] = FrameType::Status.into();
        frame[2] = self.speed_gate();
        frame[3] = self.target as u8;
        frame[4] = self.flags();
        frame[7] = self.temp_out as u8;
        frame[8] = self.temp_in as u8;
        frame[9..11].copy_from_slice(&self.filter_days.to_le_bytes());
        frame[11] = self.hours;
        frame[12] = self.minutes;
        frame[13] = self.error_code;
        frame[14] = self.productivity;
        frame[15..17].copy_from_slice(&self.run_days.to_le_bytes());
        frame[17..19].copy_from_slice(&self.firmware.to_le_bytes());
        frame[FRAME_LEN - 1] = FRAME_SUFFIX;
        frame
    }

    /// Encode the writable settings as a set-params command.
    ///
    /// Telemetry fields are not part of the command.
    pub fn encode_update(&self) -> [u8; FRAME_LEN] {
        let mut frame = [0u8; FRAME_LEN];
        frame[0] = REQUEST_PREFIX;
        frame[1] = FrameType::SetParams.into();
        frame[2] = self.speed;
        frame[3] = self.target as u8;
        frame[4] = self.gate.into();
        frame[5] = self.flags();
        frame[FRAME_LEN - 1] = FRAME_SUFFIX;
        frame
    }

    fn speed_gate(&self) -> u8 {
        let gate: u8 = self.gate.into();
        (self.speed & 0x0f) | (gate << 4)
    }

    fn flags(&self) -> u8 {
        let mut flags = 0;
        if self.heater {
            flags |= FLAG_HEATER;
        }
        if self.on {
            flags |= FLAG_ON;
        }
        if self.timer {
            flags |= FLAG_TIMER;
        }
        if self.sound {
            flags |= FLAG_SOUND;
        }
        flags
    }
}

/// Tion S3 service & characteristic UUIDs
#[allow(dead_code)]
pub mod tion_uuids {
    use uuid::Uuid;
    /// UART-like service
    pub const SERVICE: Uuid = Uuid::from_u128(0x6E400001_B5A3_F393_E0A9_E50E24DCCA9E);
    /// Requests and commands are written here
    pub const WRITE: Uuid = Uuid::from_u128(0x6E400002_B5A3_F393_E0A9_E50E24DCCA9E);
    /// Status responses are read from here
    pub const READ: Uuid = Uuid::from_u128(0x6E400003_B5A3_F393_E0A9_E50E24DCCA9E);
}
