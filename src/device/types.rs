use std::f64::consts::PI;
use std::fmt;
use std::str::FromStr;
use serde::{Deserialize, Serialize};

use crate::error::{AngleError, DeviceError};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceReference {
    pub id: String,
    pub name: Option<String>,
}

impl fmt::Display for DeviceReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{} ({})", name, self.id),
            None => write!(f, "<unnamed> ({})", self.id),
        }
    }
}

/// Whole degrees in [0, 180].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AngleValue(u8);

impl AngleValue {
    pub const MIN: AngleValue = AngleValue(0);
    pub const MAX: AngleValue = AngleValue(180);

    pub fn new(degrees: i64) -> Result<Self, AngleError> {
        if !(0..=180).contains(&degrees) {
            return Err(AngleError::OutOfRange(degrees));
        }
        Ok(AngleValue(degrees as u8))
    }

    pub fn clamped(degrees: i64) -> Self {
        AngleValue(degrees.clamp(0, 180) as u8)
    }

    /// Maps a position on the upper half circle (0 = right, PI = left) to degrees, 0 on the left.
    pub fn from_radians(theta: f64) -> Self {
        let theta = if theta.is_nan() { PI / 2.0 } else { theta.clamp(0.0, PI) };
        Self::clamped((180.0 - theta * (180.0 / PI)).round() as i64)
    }

    pub fn degrees(&self) -> u8 {
        self.0
    }
}

impl fmt::Display for AngleValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for AngleValue {
    type Err = AngleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let degrees = trimmed.parse::<i64>()
            .map_err(|_| AngleError::NotANumber(trimmed.to_string()))?;
        AngleValue::new(degrees)
    }
}

/// What a transport hands over per notification: the base64 value, if the peripheral sent one.
pub type NotifyResult = Result<Option<String>, DeviceError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    DeviceFound(DeviceReference),
    Connected(DeviceReference),
    Disconnected,
    ValueUpdate(String),
    AngleWritten(AngleValue),
    WriteFailed { angle: AngleValue, reason: String },
}
