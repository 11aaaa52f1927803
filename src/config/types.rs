use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::device::constants::{
    ANGLE_CHARACTERISTIC_NOTIFY, ANGLE_CHARACTERISTIC_READ, ANGLE_CHARACTERISTIC_WRITE, ANGLE_SERVICE,
    COLOR_CHARACTERISTIC_NOTIFY, COLOR_CHARACTERISTIC_READ, COLOR_CHARACTERISTIC_WRITE, COLOR_SERVICE,
    DEBOUNCE_DELAY, DEFAULT_ALLOWED_NAMES,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "camelCase")]
pub enum FirmwareKind {
    /// The peripheral notifies a hex color string
    #[default]
    Color,
    /// The peripheral notifies the current angle in degrees
    Angle,
}

impl std::fmt::Display for FirmwareKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let result = match self {
            FirmwareKind::Color => "color",
            FirmwareKind::Angle => "angle",
        };

        write!(f, "{}", result)
    }
}

/// The characteristics one firmware variant exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FirmwareProfile {
    pub kind: FirmwareKind,
    pub service: Uuid,
    pub notify: Uuid,
    pub write: Uuid,
    pub read: Uuid,
}

impl FirmwareProfile {
    pub fn for_kind(kind: FirmwareKind) -> Self {
        match kind {
            FirmwareKind::Color => FirmwareProfile {
                kind,
                service: COLOR_SERVICE,
                notify: COLOR_CHARACTERISTIC_NOTIFY,
                write: COLOR_CHARACTERISTIC_WRITE,
                read: COLOR_CHARACTERISTIC_READ,
            },
            FirmwareKind::Angle => FirmwareProfile {
                kind,
                service: ANGLE_SERVICE,
                notify: ANGLE_CHARACTERISTIC_NOTIFY,
                write: ANGLE_CHARACTERISTIC_WRITE,
                read: ANGLE_CHARACTERISTIC_READ,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UuidOverrides {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notify: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub write: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read: Option<Uuid>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    pub firmware: FirmwareKind,
    pub allowed_names: Vec<String>,
    pub debounce_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uuids: Option<UuidOverrides>,
}

impl Config {
    pub fn profile(&self) -> FirmwareProfile {
        let mut profile = FirmwareProfile::for_kind(self.firmware);

        if let Some(overrides) = &self.uuids {
            profile.service = overrides.service.unwrap_or(profile.service);
            profile.notify = overrides.notify.unwrap_or(profile.notify);
            profile.write = overrides.write.unwrap_or(profile.write);
            profile.read = overrides.read.unwrap_or(profile.read);
        }

        profile
    }

    // drop empty entries, an empty fragment would match every named device
    pub fn normalize(&mut self) {
        self.allowed_names.retain(|name| !name.trim().is_empty());
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            firmware: FirmwareKind::default(),
            allowed_names: DEFAULT_ALLOWED_NAMES.iter().map(|name| name.to_string()).collect(),
            debounce_ms: DEBOUNCE_DELAY,
            uuids: None,
        }
    }
}
