use crate::error::{Error, Result};
use crate::protocol::{Gate, Status};

use serde::{Deserialize, Serialize};

pub const MIN_SPEED: u8 = 1;
pub const MAX_SPEED: u8 = 6;
pub const MIN_TARGET: i8 = 0;
pub const MAX_TARGET: i8 = 30;

/// Sparse set of requested changes, as received on the control topic.
///
/// `None` leaves the field untouched; `Some(false)` is applied like any other value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartialUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heater: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<i8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gate: Option<Gate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sound: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on: Option<bool>,
}

impl PartialUpdate {
    pub fn is_empty(&self) -> bool {
        *self == PartialUpdate::default()
    }

    /// Reject values the device cannot represent
    pub fn validate(&self) -> Result<()> {
        if let Some(speed) = self.speed {
            if !(MIN_SPEED..=MAX_SPEED).contains(&speed) {
                return Err(Error::InvalidRequest(format!(
                    "speed {speed} out of range {MIN_SPEED}..={MAX_SPEED}"
                )));
            }
        }
        if let Some(target) = self.target {
            if !(MIN_TARGET..=MAX_TARGET).contains(&target) {
                return Err(Error::InvalidRequest(format!(
                    "target {target} out of range {MIN_TARGET}..={MAX_TARGET}"
                )));
            }
        }
        if let Some(Gate::Other(raw)) = self.gate {
            return Err(Error::InvalidRequest(format!("gate position {raw} is reserved")));
        }
        Ok(())
    }
}

fn merge<T: PartialEq + Copy>(field: &mut T, requested: Option<T>, changed: &mut bool) {
    if let Some(value) = requested {
        if *field != value {
            *field = value;
            *changed = true;
        }
    }
}

impl Status {
    /// Overwrite every present field of `request` that differs from `self`.
    ///
    /// Returns the merged status and whether anything changed.
    pub fn apply_partial(&self, request: &PartialUpdate) -> (Status, bool) {
        let mut updated = *self;
        let mut changed = false;
        merge(&mut updated.speed, request.speed, &mut changed);
        merge(&mut updated.heater, request.heater, &mut changed);
        merge(&mut updated.target, request.target, &mut changed);
        merge(&mut updated.gate, request.gate, &mut changed);
        merge(&mut updated.sound, request.sound, &mut changed);
        merge(&mut updated.on, request.on, &mut changed);
        (updated, changed)
    }

    /// Project into the outbound state message
    pub fn to_report(&self) -> StateReport {
        StateReport::from(self)
    }
}

/// Published state: every writable field plus read-only telemetry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateReport {
    #[serde(flatten)]
    pub settings: PartialUpdate,
    pub timer: bool,
    pub temp_in: i8,
    pub temp_out: i8,
    pub filter_days: u16,
    pub error_code: u8,
    pub productivity: u8,
    pub run_days: u16,
    pub firmware: String,
    pub clock: String,
}

impl From<&Status> for StateReport {
    fn from(status: &Status) -> Self {
        StateReport {
            settings: PartialUpdate {
                speed: Some(status.speed),
                heater: Some(status.heater),
                target: Some(status.target),
                gate: Some(status.gate),
                sound: Some(status.sound),
                on: Some(status.on),
            },
            timer: status.timer,
            temp_in: status.temp_in,
            temp_out: status.temp_out,
            filter_days: status.filter_days,
            error_code: status.error_code,
            productivity: status.productivity,
            run_days: status.run_days,
            firmware: format!("{:04x}", status.firmware),
            clock: format!("{:02}:{:02}", status.hours, status.minutes),
        }
    }
}
