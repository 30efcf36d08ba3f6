//! QPIGS query/response codec for the PCM60x charge controller.
//!
//! The response is ASCII with every value at a fixed byte offset:
//!
//! ```text
//! (BBB.B CC.CC DD.DD EE.EE FF.FF GGGG ±HHH ...
//!  |     |     |     |     |     |    |
//!  1     7     13    19    25    31   36
//! ```

use crate::error::FrameError;
use chrono::{DateTime, Local, Timelike};

/// "QPIGS", CRC-16 (0xB7A9), carriage return.
pub const QPIGS: [u8; 8] = [0x51, 0x50, 0x49, 0x47, 0x53, 0xB7, 0xA9, 0x0D];

/// Shortest response that still covers every decoded field.
pub const MIN_FRAME_LEN: usize = 40;

/// Bytes requested in the main read of an exchange.
pub const RESPONSE_READ_LEN: usize = 70;

/// Single-byte reads discarded after the main read.
pub const TRAILING_READS: usize = 2;

const FIELDS: [(&str, usize, usize); 7] = [
    ("pv_voltage", 1, 6),
    ("battery_voltage", 7, 12),
    ("charging_current", 13, 18),
    ("charging_current_1", 19, 24),
    ("charging_current_2", 25, 30),
    ("charging_power", 31, 35),
    ("temperature", 36, 40),
];

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StatusFrame {
    pub pv_voltage: f64,
    pub battery_voltage: f64,
    pub charging_current: f64,
    pub charging_current_1: f64,
    pub charging_current_2: f64,
    /// Watts; this is the power integrated into the session energy total.
    pub charging_power: f64,
    /// Opaque signed channel at the end of the decoded range.
    pub temperature: f64,
}

impl StatusFrame {
    /// Channels in frame order.
    pub fn channels(&self) -> [f64; 7] {
        [
            self.pv_voltage,
            self.battery_voltage,
            self.charging_current,
            self.charging_current_1,
            self.charging_current_2,
            self.charging_power,
            self.temperature,
        ]
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    pub timestamp: DateTime<Local>,
    pub status: StatusFrame,
}

impl Reading {
    pub fn new(timestamp: DateTime<Local>, status: StatusFrame) -> Self {
        Self { timestamp, status }
    }

    pub fn hour_of_day(&self) -> f64 {
        hour_of_day(&self.timestamp)
    }

    pub fn power_w(&self) -> f64 {
        self.status.charging_power
    }
}

/// Clock hour as a fraction, e.g. 13:30:00 -> 13.5.
pub fn hour_of_day(ts: &DateTime<Local>) -> f64 {
    ts.hour() as f64 + ts.minute() as f64 / 60.0 + ts.second() as f64 / 3600.0
}

pub fn encode_query() -> &'static [u8] {
    &QPIGS
}

/// Decode one response. All seven fields must parse or nothing is returned.
pub fn decode_response(raw: &[u8]) -> Result<StatusFrame, FrameError> {
    if raw.len() < MIN_FRAME_LEN {
        return Err(FrameError::TooShort {
            len: raw.len(),
            min: MIN_FRAME_LEN,
        });
    }

    let mut values = [0.0_f64; 7];
    for (slot, (name, start, end)) in values.iter_mut().zip(FIELDS) {
        *slot = parse_field(name, &raw[start..end])?;
    }
    let [pv_voltage, battery_voltage, charging_current, charging_current_1, charging_current_2, charging_power, temperature] =
        values;

    Ok(StatusFrame {
        pv_voltage,
        battery_voltage,
        charging_current,
        charging_current_1,
        charging_current_2,
        charging_power,
        temperature,
    })
}

fn parse_field(field: &'static str, bytes: &[u8]) -> Result<f64, FrameError> {
    let text = std::str::from_utf8(bytes).map_err(|_| FrameError::NotText { field })?;
    let trimmed = text.trim_matches(|c: char| c.is_ascii_whitespace());
    match trimmed.parse::<f64>() {
        Ok(v) if v.is_finite() => Ok(v),
        _ => Err(FrameError::NotNumeric {
            field,
            text: text.to_string(),
        }),
    }
}
