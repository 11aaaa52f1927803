use std::sync::{Arc, Mutex};
use async_trait::async_trait;
use futures::channel::mpsc::Sender;
use futures::SinkExt;
use tokio::time::{sleep, Duration};
use uuid::Uuid;

use crate::device::transport::Transport;
use crate::device::types::{DeviceReference, NotifyResult};
use crate::error::DeviceError;

#[derive(Default)]
pub struct MockState {
    pub scanning: bool,
    pub scan_calls: usize,
    pub stop_scan_calls: usize,
    pub connected: Option<String>,
    pub fail_connect: bool,
    pub fail_write: bool,
    pub write_delay: Option<Duration>,
    pub writes: Vec<(Uuid, Uuid, String)>,
    pub reads: Vec<(Uuid, Uuid)>,
    pub read_value: String,
    pub subscriptions: Vec<(Uuid, Uuid)>,
    scan_sender: Option<Sender<DeviceReference>>,
    notify_sender: Option<Sender<NotifyResult>>,
}

/// Records what the session asks for, and lets a test play the peripheral.
#[derive(Clone, Default)]
pub struct MockTransport {
    pub state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }

    pub async fn discover(&self, id: &str, name: Option<&str>) {
        let sender = self.state().scan_sender.clone();
        let mut sender = sender.expect("not scanning");
        sender.send(DeviceReference { id: id.to_string(), name: name.map(str::to_string) })
            .await
            .unwrap();
    }

    pub async fn notify(&self, value: NotifyResult) {
        let sender = self.state().notify_sender.clone();
        let mut sender = sender.expect("not subscribed");
        sender.send(value).await.unwrap();
    }

    pub fn written_payloads(&self) -> Vec<String> {
        self.state().writes.iter().map(|(_, _, payload)| payload.clone()).collect()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn scan(&self, on_found: Sender<DeviceReference>) -> Result<(), DeviceError> {
        let mut state = self.state();
        state.scanning = true;
        state.scan_calls += 1;
        state.scan_sender = Some(on_found);
        Ok(())
    }

    async fn stop_scan(&self) -> Result<(), DeviceError> {
        let mut state = self.state();
        state.scanning = false;
        state.stop_scan_calls += 1;
        state.scan_sender = None;
        Ok(())
    }

    async fn connect(&self, id: &str) -> Result<(), DeviceError> {
        let mut state = self.state();
        if state.fail_connect {
            return Err(DeviceError::UnknownPeripheral { id: id.to_string() });
        }
        state.connected = Some(id.to_string());
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), DeviceError> {
        let mut state = self.state();
        state.connected = None;
        state.notify_sender = None;
        Ok(())
    }

    async fn write(&self, service: Uuid, characteristic: Uuid, payload: &str) -> Result<(), DeviceError> {
        let delay = self.state().write_delay;
        if let Some(delay) = delay {
            sleep(delay).await;
        }

        let mut state = self.state();
        if state.fail_write {
            return Err(DeviceError::NotConnected);
        }
        state.writes.push((service, characteristic, payload.to_string()));
        Ok(())
    }

    async fn read(&self, service: Uuid, characteristic: Uuid) -> Result<String, DeviceError> {
        let mut state = self.state();
        state.reads.push((service, characteristic));
        Ok(state.read_value.clone())
    }

    async fn subscribe(&self, service: Uuid, characteristic: Uuid, on_value: Sender<NotifyResult>) -> Result<(), DeviceError> {
        let mut state = self.state();
        state.subscriptions.push((service, characteristic));
        state.notify_sender = Some(on_value);
        Ok(())
    }
}
