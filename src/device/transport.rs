use async_trait::async_trait;
use futures::channel::mpsc::Sender;
use uuid::Uuid;

use crate::device::types::{DeviceReference, NotifyResult};
use crate::error::DeviceError;

/// The operations the session needs from a BLE client.
///
/// Written and read values are plain text; the transport owns their encoding on the air.
/// Notified values are handed over undecoded, as base64 text (see [`crate::device::codec`]),
/// so the receiver decides what an undecodable value means.
/// Implementations log failures at the boundary and still return them.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Starts an unfiltered scan. Every advertisement is sent to `on_found`, so the same
    /// device can show up more than once. Runs until [`Transport::stop_scan`].
    async fn scan(&self, on_found: Sender<DeviceReference>) -> Result<(), DeviceError>;

    /// Stops a running scan. Does nothing if no scan is running.
    async fn stop_scan(&self) -> Result<(), DeviceError>;

    /// Connects to a previously discovered peripheral and discovers its services.
    async fn connect(&self, id: &str) -> Result<(), DeviceError>;

    async fn disconnect(&self) -> Result<(), DeviceError>;

    /// Encodes `payload` and writes it with response.
    async fn write(&self, service: Uuid, characteristic: Uuid, payload: &str) -> Result<(), DeviceError>;

    /// Reads the characteristic once and decodes it.
    async fn read(&self, service: Uuid, characteristic: Uuid) -> Result<String, DeviceError>;

    /// Forwards every notification of the characteristic to `on_value`, until disconnected.
    async fn subscribe(
        &self,
        service: Uuid,
        characteristic: Uuid,
        on_value: Sender<NotifyResult>,
    ) -> Result<(), DeviceError>;
}
