use std::io;
use std::str::Utf8Error;
use std::string::FromUtf8Error;
use thiserror::Error;
use btleplug;
use serde_json;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to determine path to config file")]
    NoConfigPath,

    #[error("Failed to acquire file lock on config file: {source}")]
    CanNotLock { source: io::Error },

    #[error("Failed to encode/decode config as utf-8: {source}")]
    Utf8Error { #[from] source: Utf8Error },

    #[error("Failed to read/write config file: {source}")]
    IOError { #[from] source: io::Error },

    #[error("Failed to parse/build config file: {source}")]
    JsonError { #[from] source: serde_json::Error },
}

impl ConfigError {
    pub fn is_file_not_found_error(&self) -> bool {
        match self {
            ConfigError::IOError { source } => source.kind() == io::ErrorKind::NotFound,
            _ => false,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PayloadError {
    #[error("Payload is not valid base64: {reason}")]
    Base64 { reason: String },

    #[error("Payload is not valid utf-8: {reason}")]
    Utf8 { reason: String },
}

impl From<base64::DecodeError> for PayloadError {
    fn from(source: base64::DecodeError) -> Self {
        PayloadError::Base64 { reason: source.to_string() }
    }
}

impl From<FromUtf8Error> for PayloadError {
    fn from(source: FromUtf8Error) -> Self {
        PayloadError::Utf8 { reason: source.to_string() }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AngleError {
    #[error("Angle {0} is outside of [0, 180] degrees")]
    OutOfRange(i64),

    #[error("Angle {0:?} is not a whole number")]
    NotANumber(String),
}

#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("Error communicating with device (btleplug): {source}")]
    Btle { #[from] source: btleplug::Error },

    #[error("No bluetooth adapter is available")]
    NoAdapter,

    #[error("No peripheral with id {id} has been discovered")]
    UnknownPeripheral { id: String },

    #[error("No device is connected")]
    NotConnected,

    #[error("The bluetooth characteristic {characteristic} of service {service} is not available")]
    MissingCharacteristic { service: Uuid, characteristic: Uuid },

    #[error("Failed to decode characteristic value: {source}")]
    Payload { #[from] source: PayloadError },

    #[error("The device event channel was closed")]
    ChannelClosed,
}

#[derive(Error, Debug)]
pub enum AppRunError {
    #[error("Failed to start application (config): {source}")]
    ConfigError { #[from] source: ConfigError },

    #[error("Failed to communicate with the device: {source}")]
    DeviceError { #[from] source: DeviceError },

    #[error("Failed to read from stdin: {source}")]
    IOError { #[from] source: io::Error },
}
