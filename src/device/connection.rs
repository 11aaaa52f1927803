use std::future::Future;
use std::sync::Arc;
use async_trait::async_trait;
use btleplug::api::{
    Central, CentralEvent, Characteristic, Manager as _, Peripheral as _, ScanFilter, ValueNotification, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use futures::channel::mpsc::Sender;
use futures::stream::select_all;
use futures::{SinkExt, Stream, StreamExt};
use indexmap::IndexMap;
use log::{debug, info, warn};
use tokio::spawn;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::device::codec::{encode_bytes, text_from_bytes};
use crate::device::transport::Transport;
use crate::device::types::{DeviceReference, NotifyResult};
use crate::error::DeviceError;

struct ActivePeripheral {
    peripheral: Peripheral,
    // cancelled on disconnect, stops the notification forwarders
    cancel: CancellationToken,
}

#[derive(Default)]
struct TransportState {
    adapters: Option<Vec<Adapter>>,
    // every peripheral seen while scanning, by the id handed out in DeviceReference
    discovered: IndexMap<String, Peripheral>,
    scan_cancel: Option<CancellationToken>,
    active: Option<ActivePeripheral>,
}

/// [`Transport`] on top of the platform BLE stack, through btleplug.
pub struct BtleTransport {
    manager: Manager,
    state: Arc<Mutex<TransportState>>,
}

fn peripheral_key(id: &PeripheralId) -> String {
    format!("{:?}", id)
}

fn logged<T>(what: &str, result: Result<T, DeviceError>) -> Result<T, DeviceError> {
    if let Err(err) = &result {
        warn!("{} failed: {}", what, err);
    }
    result
}

async fn get_adapters(manager: &Manager, state: &Mutex<TransportState>) -> Result<Vec<Adapter>, DeviceError> {
    let mut state = state.lock().await;

    if let Some(adapters) = &state.adapters {
        return Ok(adapters.clone());
    }

    let adapters = manager.adapters().await?;
    if adapters.is_empty() {
        return Err(DeviceError::NoAdapter);
    }

    for adapter in &adapters {
        info!("Using adapter {}", adapter.adapter_info().await.unwrap_or("UNKNOWN".to_string()));
    }

    state.adapters = Some(adapters.clone());
    Ok(adapters)
}

async fn describe_peripheral(peripheral: &Peripheral) -> DeviceReference {
    let name = match peripheral.properties().await {
        Ok(Some(properties)) => properties.local_name,
        Ok(None) => None,
        Err(err) => {
            debug!("Could not query peripheral for properties: {:?}", err);
            None
        },
    };

    DeviceReference {
        id: peripheral_key(&peripheral.id()),
        name,
    }
}

fn find_characteristic(peripheral: &Peripheral, service: Uuid, characteristic: Uuid) -> Result<Characteristic, DeviceError> {
    peripheral.characteristics()
        .into_iter()
        .find(|c| c.service_uuid == service && c.uuid == characteristic)
        .ok_or(DeviceError::MissingCharacteristic { service, characteristic })
}

fn scan_events_task(
    cancel: CancellationToken,
    adapters: Vec<Adapter>,
    events: Vec<std::pin::Pin<Box<dyn futures::Stream<Item = CentralEvent> + Send>>>,
    state: Arc<Mutex<TransportState>>,
    mut on_found: Sender<DeviceReference>,
) {
    // tag every event with the adapter it came from
    let tagged = events.into_iter()
        .zip(adapters)
        .map(|(stream, adapter)| stream.map(move |event| (adapter.clone(), event)).boxed());
    let mut events = select_all(tagged);

    spawn(async move {
        'mainloop: loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    break 'mainloop;
                },
                next = events.next() => {
                    let (adapter, id) = match next {
                        Some((adapter, CentralEvent::DeviceDiscovered(id))) => (adapter, id),
                        Some((adapter, CentralEvent::DeviceUpdated(id))) => (adapter, id),
                        Some(_) => continue 'mainloop,
                        None => break 'mainloop,
                    };

                    let peripheral = match adapter.peripheral(&id).await {
                        Ok(peripheral) => peripheral,
                        Err(err) => {
                            debug!("Discovered peripheral vanished: {:?}", err);
                            continue 'mainloop;
                        },
                    };

                    let device = describe_peripheral(&peripheral).await;
                    state.lock().await.discovered.insert(device.id.clone(), peripheral);

                    if on_found.send(device).await.is_err() {
                        debug!("Scan result receiver dropped");
                        break 'mainloop;
                    }
                }
            }
        }

        debug!("Scan forwarder stopped");
    });
}

fn forward_notifications<S>(
    cancel: CancellationToken,
    mut notification_stream: S,
    characteristic: Uuid,
    mut on_value: Sender<NotifyResult>,
)
where
    S: Stream<Item = ValueNotification> + Send + Unpin + 'static,
{
    spawn(async move {
        'mainloop: loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    break 'mainloop;
                },
                next = notification_stream.next() => {
                    let Some(data) = next else {
                        info!("Notification stream ended");
                        break 'mainloop;
                    };

                    if !data.uuid.eq(&characteristic) {
                        continue 'mainloop;
                    }

                    let value = if data.value.is_empty() { None } else { Some(encode_bytes(&data.value)) };
                    if on_value.send(Ok(value)).await.is_err() {
                        debug!("Notification receiver dropped");
                        break 'mainloop;
                    }
                }
            }
        }
    });
}

/// Starts every item in order. If one fails, the items started before it are stopped again.
async fn start_all<T, Start, StartFut, Stop, StopFut>(items: &[T], mut start: Start, mut stop: Stop) -> Result<(), DeviceError>
where
    T: Clone,
    Start: FnMut(T) -> StartFut,
    StartFut: Future<Output = Result<(), DeviceError>>,
    Stop: FnMut(T) -> StopFut,
    StopFut: Future<Output = Result<(), DeviceError>>,
{
    for (index, item) in items.iter().enumerate() {
        if let Err(err) = start(item.clone()).await {
            for started in &items[..index] {
                if let Err(stop_err) = stop(started.clone()).await {
                    warn!("Failed to roll back: {}", stop_err);
                }
            }
            return Err(err);
        }
    }
    Ok(())
}

impl BtleTransport {
    pub async fn new() -> Result<Self, DeviceError> {
        let manager = Manager::new().await?;

        Ok(BtleTransport {
            manager,
            state: Arc::new(Mutex::new(TransportState::default())),
        })
    }

    async fn lookup_peripheral(&self, id: &str) -> Result<Peripheral, DeviceError> {
        if let Some(peripheral) = self.state.lock().await.discovered.get(id) {
            return Ok(peripheral.clone());
        }

        // not seen by our own scan, but the adapter may still know it
        for adapter in get_adapters(&self.manager, &self.state).await? {
            let peripherals = match adapter.peripherals().await {
                Ok(v) => v,
                Err(err) => {
                    warn!("Failed to query BLE adapter for peripherals: {}", err);
                    continue;
                },
            };

            if let Some(peripheral) = peripherals.into_iter().find(|p| peripheral_key(&p.id()) == id) {
                return Ok(peripheral);
            }
        }

        Err(DeviceError::UnknownPeripheral { id: id.to_string() })
    }

    async fn active_peripheral(&self) -> Result<(Peripheral, CancellationToken), DeviceError> {
        let state = self.state.lock().await;
        let active = state.active.as_ref().ok_or(DeviceError::NotConnected)?;
        Ok((active.peripheral.clone(), active.cancel.clone()))
    }

    async fn connect_peripheral(&self, id: &str) -> Result<(), DeviceError> {
        let peripheral = self.lookup_peripheral(id).await?;

        info!("Connecting to peripheral {}...", id);
        peripheral.connect().await?;

        info!("Connected; Discovering services...");
        if let Err(err) = peripheral.discover_services().await {
            let _ = peripheral.disconnect().await;
            return Err(err.into());
        }

        let previous = self.state.lock().await.active.replace(ActivePeripheral {
            peripheral,
            cancel: CancellationToken::new(),
        });

        if let Some(previous) = previous {
            previous.cancel.cancel();
            if let Err(err) = previous.peripheral.disconnect().await {
                warn!("Failed to disconnect previous peripheral: {:?}", err);
            }
        }

        info!("Peripheral ready");
        Ok(())
    }

    async fn subscribe_characteristic(&self, service: Uuid, characteristic: Uuid, on_value: Sender<NotifyResult>) -> Result<(), DeviceError> {
        let (peripheral, cancel) = self.active_peripheral().await?;
        let data_char = find_characteristic(&peripheral, service, characteristic)?;

        // opened first, so values notified right after subscribing are not missed
        let notification_stream = peripheral.notifications().await?;

        info!("Subscribing to characteristic {:?} {:?}", service, characteristic);
        peripheral.subscribe(&data_char).await?;
        forward_notifications(cancel.child_token(), notification_stream, characteristic, on_value);
        Ok(())
    }
}

#[async_trait]
impl Transport for BtleTransport {
    async fn scan(&self, on_found: Sender<DeviceReference>) -> Result<(), DeviceError> {
        let result = async {
            let adapters = get_adapters(&self.manager, &self.state).await?;

            let mut events = Vec::with_capacity(adapters.len());
            for adapter in &adapters {
                events.push(adapter.events().await?);
            }

            start_all(
                &adapters,
                |adapter: Adapter| async move { adapter.start_scan(ScanFilter::default()).await.map_err(DeviceError::from) },
                |adapter: Adapter| async move { adapter.stop_scan().await.map_err(DeviceError::from) },
            ).await?;
            info!("Scanning for peripherals...");

            let cancel = CancellationToken::new();
            if let Some(previous) = self.state.lock().await.scan_cancel.replace(cancel.clone()) {
                previous.cancel();
            }

            scan_events_task(cancel, adapters, events, self.state.clone(), on_found);
            Ok::<(), DeviceError>(())
        }.await;

        logged("Scanning", result)
    }

    async fn stop_scan(&self) -> Result<(), DeviceError> {
        let (cancel, adapters) = {
            let mut state = self.state.lock().await;
            (state.scan_cancel.take(), state.adapters.clone())
        };

        let Some(cancel) = cancel else {
            return Ok(());
        };
        cancel.cancel();

        let mut result = Ok(());
        for adapter in adapters.unwrap_or_default() {
            if let Err(err) = adapter.stop_scan().await {
                result = Err(err.into());
            }
        }

        info!("Scan stopped");
        logged("Stopping scan", result)
    }

    async fn connect(&self, id: &str) -> Result<(), DeviceError> {
        logged("Connecting", self.connect_peripheral(id).await)
    }

    async fn disconnect(&self) -> Result<(), DeviceError> {
        let Some(active) = self.state.lock().await.active.take() else {
            return Ok(());
        };

        active.cancel.cancel();
        info!("Disconnecting from peripheral");
        logged("Disconnecting", active.peripheral.disconnect().await.map_err(DeviceError::from))
    }

    async fn write(&self, service: Uuid, characteristic: Uuid, payload: &str) -> Result<(), DeviceError> {
        let result = async {
            let (peripheral, _) = self.active_peripheral().await?;
            let data_char = find_characteristic(&peripheral, service, characteristic)?;

            debug!("Writing {:?} to {:?}", payload, characteristic);
            peripheral.write(&data_char, payload.as_bytes(), WriteType::WithResponse).await?;
            Ok::<(), DeviceError>(())
        }.await;

        logged("Writing characteristic", result)
    }

    async fn read(&self, service: Uuid, characteristic: Uuid) -> Result<String, DeviceError> {
        let result = async {
            let (peripheral, _) = self.active_peripheral().await?;
            let data_char = find_characteristic(&peripheral, service, characteristic)?;

            let value = peripheral.read(&data_char).await?;
            let text = text_from_bytes(value)?;
            Ok::<String, DeviceError>(text)
        }.await;

        logged("Reading characteristic", result)
    }

    async fn subscribe(&self, service: Uuid, characteristic: Uuid, on_value: Sender<NotifyResult>) -> Result<(), DeviceError> {
        logged("Subscribing", self.subscribe_characteristic(service, characteristic, on_value).await)
    }
}
