//! Characteristic values travel as base64 text of a utf-8 string.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;

use crate::error::PayloadError;

pub fn decode(payload: &str) -> Result<String, PayloadError> {
    let bytes = STANDARD.decode(payload.trim())?;
    Ok(String::from_utf8(bytes)?)
}

/// Raw characteristic bytes, as delivered by the BLE stack, in base64 text form.
pub fn encode_bytes(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

pub fn text_from_bytes(bytes: Vec<u8>) -> Result<String, PayloadError> {
    Ok(String::from_utf8(bytes)?)
}
