use std::sync::Arc;
use futures::channel::mpsc::{channel, Receiver, Sender};
use futures::{SinkExt, StreamExt};
use log::{debug, info, warn};
use tokio::spawn;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::config::types::{Config, FirmwareProfile};
use crate::device::codec::decode;
use crate::device::constants::{EVENT_CHANNEL_CAPACITY, NOTIFY_ERROR_SENTINEL};
use crate::device::debounce::Debouncer;
use crate::device::transport::Transport;
use crate::device::types::{AngleValue, DeviceReference, NotifyResult, SessionEvent};
use crate::error::DeviceError;

/// The one device this process talks to.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Session {
    pub device: Option<DeviceReference>,
    // only true while `device` is set
    pub is_listening: bool,
}

/// True if the device name contains one of the allowed fragments. Unnamed devices never match.
pub fn name_matches(name: Option<&str>, allowed_names: &[String]) -> bool {
    match name {
        Some(name) => allowed_names.iter().any(|allowed| name.contains(allowed.as_str())),
        None => false,
    }
}

/// Turns one notification into the text forwarded upstream.
pub fn notification_value(result: NotifyResult) -> String {
    match result {
        Ok(Some(payload)) => match decode(&payload) {
            Ok(value) => value,
            Err(err) => {
                warn!("Failed to decode notified value {:?}: {}", payload, err);
                NOTIFY_ERROR_SENTINEL.to_string()
            },
        },
        Ok(None) => {
            warn!("No data was received");
            NOTIFY_ERROR_SENTINEL.to_string()
        },
        Err(err) => {
            warn!("Notification failed: {}", err);
            NOTIFY_ERROR_SENTINEL.to_string()
        },
    }
}

async fn emit(sender: &Sender<SessionEvent>, event: SessionEvent) {
    let mut sender = sender.clone();
    if sender.send(event).await.is_err() {
        debug!("Session event receiver dropped");
    }
}

fn scan_filter_task(
    cancel: CancellationToken,
    mut found: Receiver<DeviceReference>,
    allowed_names: Vec<String>,
    mut events: Sender<SessionEvent>,
) {
    spawn(async move {
        'mainloop: loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    break 'mainloop;
                },
                next = found.next() => {
                    let Some(device) = next else {
                        break 'mainloop;
                    };

                    if !name_matches(device.name.as_deref(), &allowed_names) {
                        debug!("Ignoring device {}", device);
                        continue 'mainloop;
                    }

                    info!("Found device {}", device);
                    if events.send(SessionEvent::DeviceFound(device)).await.is_err() {
                        break 'mainloop;
                    }
                }
            }
        }
    });
}

fn notification_task(cancel: CancellationToken, mut values: Receiver<NotifyResult>, mut events: Sender<SessionEvent>) {
    spawn(async move {
        'mainloop: loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    break 'mainloop;
                },
                next = values.next() => {
                    let Some(result) = next else {
                        break 'mainloop;
                    };

                    let value = notification_value(result);
                    debug!("Value update {:?}", value);
                    if events.send(SessionEvent::ValueUpdate(value)).await.is_err() {
                        break 'mainloop;
                    }
                }
            }
        }
    });
}

/// Sequences scan, connect, subscribe and writes on top of a [`Transport`].
pub struct SessionController {
    transport: Arc<dyn Transport>,
    profile: FirmwareProfile,
    allowed_names: Vec<String>,
    debounce_delay: Duration,
    events: Sender<SessionEvent>,
    session: Session,
    scan_cancel: Option<CancellationToken>,
    listen_cancel: Option<CancellationToken>,
    angle_debouncer: Option<Debouncer<AngleValue>>,
}

impl SessionController {
    pub fn new(transport: Arc<dyn Transport>, config: &Config) -> (Self, Receiver<SessionEvent>) {
        let (events, receiver) = channel::<SessionEvent>(EVENT_CHANNEL_CAPACITY);

        let controller = SessionController {
            transport,
            profile: config.profile(),
            allowed_names: config.allowed_names.clone(),
            debounce_delay: Duration::from_millis(config.debounce_ms),
            events,
            session: Session::default(),
            scan_cancel: None,
            listen_cancel: None,
            angle_debouncer: None,
        };

        (controller, receiver)
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn profile(&self) -> &FirmwareProfile {
        &self.profile
    }

    pub fn is_connected(&self) -> bool {
        self.session.device.is_some()
    }

    pub fn is_scanning(&self) -> bool {
        self.scan_cancel.is_some()
    }

    fn require_device(&self) -> Result<&DeviceReference, DeviceError> {
        self.session.device.as_ref().ok_or(DeviceError::NotConnected)
    }

    /// Forwards discovered devices whose name is on the allow list as [`SessionEvent::DeviceFound`].
    pub async fn start_scanning(&mut self) -> Result<(), DeviceError> {
        if self.scan_cancel.is_some() {
            return Ok(());
        }

        let (sender, receiver) = channel::<DeviceReference>(EVENT_CHANNEL_CAPACITY);
        self.transport.scan(sender).await?;

        let cancel = CancellationToken::new();
        scan_filter_task(cancel.clone(), receiver, self.allowed_names.clone(), self.events.clone());
        self.scan_cancel = Some(cancel);
        Ok(())
    }

    pub async fn stop_scanning(&mut self) -> Result<(), DeviceError> {
        if let Some(cancel) = self.scan_cancel.take() {
            cancel.cancel();
        }
        self.transport.stop_scan().await
    }

    /// Connects, then stops scanning whatever the outcome, then records the device.
    pub async fn connect(&mut self, device: DeviceReference) -> Result<(), DeviceError> {
        let connected = self.transport.connect(&device.id).await;

        if let Err(err) = self.stop_scanning().await {
            warn!("Failed to stop scanning after connecting: {}", err);
        }

        connected?;

        self.stop_listening();
        self.angle_debouncer = None;
        self.session.device = Some(device.clone());

        info!("Connected to {}", device);
        emit(&self.events, SessionEvent::Connected(device)).await;
        Ok(())
    }

    pub async fn disconnect(&mut self) -> Result<(), DeviceError> {
        self.stop_listening();
        if let Some(debouncer) = self.angle_debouncer.take() {
            debouncer.cancel();
        }

        let result = self.transport.disconnect().await;

        if let Some(device) = self.session.device.take() {
            info!("Disconnected from {}", device);
            emit(&self.events, SessionEvent::Disconnected).await;
        }

        result
    }

    fn stop_listening(&mut self) {
        if let Some(cancel) = self.listen_cancel.take() {
            cancel.cancel();
        }
        self.session.is_listening = false;
    }

    /// Subscribes to the profile's notify characteristic. Only the first call after connecting
    /// registers a handler.
    pub async fn start_listening(&mut self) -> Result<(), DeviceError> {
        self.require_device()?;

        if self.session.is_listening {
            debug!("Already listening");
            return Ok(());
        }

        let (sender, receiver) = channel::<NotifyResult>(EVENT_CHANNEL_CAPACITY);
        self.transport.subscribe(self.profile.service, self.profile.notify, sender).await?;

        let cancel = CancellationToken::new();
        notification_task(cancel.clone(), receiver, self.events.clone());
        self.listen_cancel = Some(cancel);
        self.session.is_listening = true;
        Ok(())
    }

    pub async fn read_value(&self) -> Result<String, DeviceError> {
        self.require_device()?;
        self.transport.read(self.profile.service, self.profile.read).await
    }

    /// Writes `value` right away.
    pub async fn send_value(&self, value: &str) -> Result<(), DeviceError> {
        self.require_device()?;
        self.transport.write(self.profile.service, self.profile.write, value).await
    }

    /// Writes a debounced angle that is still waiting for its delay, and waits for the write.
    pub async fn flush_angle(&self) {
        if let Some(debouncer) = &self.angle_debouncer {
            debouncer.flush().await;
        }
    }

    pub async fn send_angle_now(&self, angle: AngleValue) -> Result<(), DeviceError> {
        self.send_value(&angle.to_string()).await
    }

    /// Schedules a write of `angle`. Calls closer together than the debounce delay collapse
    /// into one write of the last angle, reported as [`SessionEvent::AngleWritten`] or
    /// [`SessionEvent::WriteFailed`].
    pub fn send_angle(&mut self, angle: AngleValue) -> Result<(), DeviceError> {
        self.require_device()?;

        let debouncer = match self.angle_debouncer.take() {
            Some(debouncer) if !debouncer.is_cancelled() => debouncer,
            _ => self.make_angle_debouncer(),
        };
        debouncer.call(angle);
        self.angle_debouncer = Some(debouncer);
        Ok(())
    }

    fn make_angle_debouncer(&self) -> Debouncer<AngleValue> {
        let transport = self.transport.clone();
        let profile = self.profile;
        let events = self.events.clone();

        Debouncer::new(self.debounce_delay, move |angle: AngleValue| {
            let transport = transport.clone();
            let events = events.clone();

            async move {
                let event = match transport.write(profile.service, profile.write, &angle.to_string()).await {
                    Ok(()) => SessionEvent::AngleWritten(angle),
                    Err(err) => SessionEvent::WriteFailed { angle, reason: err.to_string() },
                };
                emit(&events, event).await;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::FirmwareKind;
    use crate::device::constants::{COLOR_CHARACTERISTIC_NOTIFY, COLOR_CHARACTERISTIC_WRITE, COLOR_SERVICE, ANGLE_CHARACTERISTIC_READ, ANGLE_SERVICE};
    use crate::device::mock::MockTransport;
    use tokio::time::sleep;

    fn arduino() -> DeviceReference {
        DeviceReference { id: "dev-1".to_string(), name: Some("Arduino Nano 33".to_string()) }
    }

    fn controller(config: &Config) -> (SessionController, Receiver<SessionEvent>, MockTransport) {
        let mock = MockTransport::new();
        let (controller, events) = SessionController::new(Arc::new(mock.clone()), config);
        (controller, events, mock)
    }

    async fn connected(config: &Config) -> (SessionController, Receiver<SessionEvent>, MockTransport) {
        let (mut controller, mut events, mock) = controller(config);
        controller.connect(arduino()).await.unwrap();
        assert_eq!(events.next().await, Some(SessionEvent::Connected(arduino())));
        (controller, events, mock)
    }

    #[test]
    fn allow_list_is_a_substring_match() {
        let allowed = vec!["Arduino".to_string(), "Friyia".to_string()];
        assert!(name_matches(Some("Arduino"), &allowed));
        assert!(name_matches(Some("My Friyia Lamp"), &allowed));
        assert!(!name_matches(Some("arduino"), &allowed));
        assert!(!name_matches(Some("Headphones"), &allowed));
        assert!(!name_matches(None, &allowed));
        assert!(!name_matches(Some("Arduino"), &[]));
    }

    #[test]
    fn notification_values() {
        assert_eq!(notification_value(Ok(Some("MTgw".to_string()))), "180");
        assert_eq!(notification_value(Ok(Some("I0ZGODgwMA==".to_string()))), "#FF8800");
        assert_eq!(notification_value(Ok(None)), NOTIFY_ERROR_SENTINEL);
        assert_eq!(notification_value(Ok(Some("%%%".to_string()))), NOTIFY_ERROR_SENTINEL);
        assert_eq!(notification_value(Err(DeviceError::NotConnected)), NOTIFY_ERROR_SENTINEL);
    }

    #[tokio::test]
    async fn forwards_only_allowed_devices() {
        let (mut controller, mut events, mock) = controller(&Config::default());

        controller.start_scanning().await.unwrap();
        assert!(controller.is_scanning());
        assert!(mock.state().scanning);

        mock.discover("a", Some("Headphones")).await;
        mock.discover("b", None).await;
        mock.discover("c", Some("Arduino Uno")).await;
        mock.discover("d", Some("TV")).await;
        mock.discover("e", Some("Friyia")).await;
        // the same advertisement again is forwarded again
        mock.discover("c", Some("Arduino Uno")).await;

        let found: Vec<String> = events.by_ref().take(3).map(|event| match event {
            SessionEvent::DeviceFound(device) => device.id,
            other => panic!("unexpected event {:?}", other),
        }).collect().await;
        assert_eq!(found, vec!["c", "e", "c"]);

        controller.stop_scanning().await.unwrap();
        tokio::task::yield_now().await;
        assert!(events.try_next().is_err());
    }

    #[tokio::test]
    async fn starting_a_scan_twice_scans_once() {
        let (mut controller, _events, mock) = controller(&Config::default());
        controller.start_scanning().await.unwrap();
        controller.start_scanning().await.unwrap();
        assert_eq!(mock.state().scan_calls, 1);
    }

    #[tokio::test]
    async fn connect_stops_scanning_and_records_device() {
        let (mut controller, mut events, mock) = controller(&Config::default());
        controller.start_scanning().await.unwrap();

        controller.connect(arduino()).await.unwrap();

        assert!(!mock.state().scanning);
        assert!(!controller.is_scanning());
        assert_eq!(mock.state().connected.as_deref(), Some("dev-1"));
        assert_eq!(controller.session(), &Session { device: Some(arduino()), is_listening: false });
        assert_eq!(events.next().await, Some(SessionEvent::Connected(arduino())));
    }

    #[tokio::test]
    async fn failed_connect_still_stops_scanning() {
        let (mut controller, _events, mock) = controller(&Config::default());
        mock.state().fail_connect = true;
        controller.start_scanning().await.unwrap();

        let result = controller.connect(arduino()).await;

        assert!(matches!(result, Err(DeviceError::UnknownPeripheral { .. })));
        assert!(!mock.state().scanning);
        assert!(!controller.is_connected());
    }

    #[tokio::test]
    async fn operations_require_a_device() {
        let (mut controller, _events, mock) = controller(&Config::default());

        assert!(matches!(controller.start_listening().await, Err(DeviceError::NotConnected)));
        assert!(matches!(controller.read_value().await, Err(DeviceError::NotConnected)));
        assert!(matches!(controller.send_value("#000000").await, Err(DeviceError::NotConnected)));
        assert!(matches!(controller.send_angle(AngleValue::MAX), Err(DeviceError::NotConnected)));
        assert!(!controller.session().is_listening);
        assert!(mock.state().subscriptions.is_empty());
    }

    #[tokio::test]
    async fn listening_twice_subscribes_once() {
        let (mut controller, _events, mock) = connected(&Config::default()).await;

        controller.start_listening().await.unwrap();
        controller.start_listening().await.unwrap();

        assert!(controller.session().is_listening);
        assert_eq!(mock.state().subscriptions, vec![(COLOR_SERVICE, COLOR_CHARACTERISTIC_NOTIFY)]);
    }

    #[tokio::test]
    async fn notifications_are_decoded_and_errors_become_the_sentinel() {
        let (mut controller, mut events, mock) = connected(&Config::default()).await;
        controller.start_listening().await.unwrap();

        mock.notify(Ok(Some("MTgw".to_string()))).await;
        mock.notify(Err(DeviceError::NotConnected)).await;
        mock.notify(Ok(None)).await;

        assert_eq!(events.next().await, Some(SessionEvent::ValueUpdate("180".to_string())));
        assert_eq!(events.next().await, Some(SessionEvent::ValueUpdate(NOTIFY_ERROR_SENTINEL.to_string())));
        assert_eq!(events.next().await, Some(SessionEvent::ValueUpdate(NOTIFY_ERROR_SENTINEL.to_string())));
    }

    #[tokio::test]
    async fn disconnect_resets_the_session() {
        let (mut controller, mut events, mock) = connected(&Config::default()).await;
        controller.start_listening().await.unwrap();

        controller.disconnect().await.unwrap();

        assert_eq!(controller.session(), &Session::default());
        assert_eq!(mock.state().connected, None);
        assert_eq!(events.next().await, Some(SessionEvent::Disconnected));

        // a new connection listens again
        controller.connect(arduino()).await.unwrap();
        controller.start_listening().await.unwrap();
        assert_eq!(mock.state().subscriptions.len(), 2);

        // disconnecting twice is harmless
        controller.disconnect().await.unwrap();
        controller.disconnect().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn rapid_angles_write_once_with_the_last_value() {
        let (mut controller, mut events, mock) = connected(&Config::default()).await;

        for degrees in [0, 45, 90, 135, 180, 120] {
            controller.send_angle(AngleValue::new(degrees).unwrap()).unwrap();
            sleep(Duration::from_millis(50)).await;
        }
        assert!(mock.written_payloads().is_empty());

        sleep(Duration::from_millis(600)).await;

        assert_eq!(mock.written_payloads(), vec!["120"]);
        assert_eq!(mock.state().writes[0].1, COLOR_CHARACTERISTIC_WRITE);
        assert_eq!(events.next().await, Some(SessionEvent::AngleWritten(AngleValue::new(120).unwrap())));
    }

    #[tokio::test(start_paused = true)]
    async fn debounce_window_comes_from_config() {
        let config = Config { debounce_ms: 100, ..Config::default() };
        let (mut controller, _events, mock) = connected(&config).await;

        controller.send_angle(AngleValue::new(10).unwrap()).unwrap();
        sleep(Duration::from_millis(150)).await;
        controller.send_angle(AngleValue::new(20).unwrap()).unwrap();
        sleep(Duration::from_millis(150)).await;

        assert_eq!(mock.written_payloads(), vec!["10", "20"]);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_angle_write_is_reported() {
        let (mut controller, mut events, mock) = connected(&Config::default()).await;
        mock.state().fail_write = true;

        controller.send_angle(AngleValue::new(33).unwrap()).unwrap();
        sleep(Duration::from_millis(600)).await;

        match events.next().await {
            Some(SessionEvent::WriteFailed { angle, .. }) => assert_eq!(angle.degrees(), 33),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_drops_pending_angle() {
        let (mut controller, _events, mock) = connected(&Config::default()).await;

        controller.send_angle(AngleValue::new(60).unwrap()).unwrap();
        controller.disconnect().await.unwrap();
        sleep(Duration::from_secs(1)).await;

        assert!(mock.written_payloads().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn flush_writes_pending_angle_before_disconnect() {
        let (mut controller, mut events, mock) = connected(&Config::default()).await;

        controller.send_angle(AngleValue::new(90).unwrap()).unwrap();
        controller.flush_angle().await;
        controller.disconnect().await.unwrap();
        sleep(Duration::from_secs(2)).await;

        assert_eq!(mock.written_payloads(), vec!["90"]);
        assert_eq!(events.next().await, Some(SessionEvent::AngleWritten(AngleValue::new(90).unwrap())));
        assert_eq!(events.next().await, Some(SessionEvent::Disconnected));
    }

    #[tokio::test(start_paused = true)]
    async fn flush_without_pending_angle_writes_nothing() {
        let (controller, _events, mock) = connected(&Config::default()).await;

        controller.flush_angle().await;

        assert!(mock.written_payloads().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn write_in_flight_at_disconnect_reports_nothing() {
        let (mut controller, mut events, mock) = connected(&Config::default()).await;
        mock.state().write_delay = Some(Duration::from_secs(1));

        controller.send_angle(AngleValue::new(45).unwrap()).unwrap();
        // the write starts at 500ms and would finish at 1500ms
        sleep(Duration::from_millis(700)).await;
        controller.disconnect().await.unwrap();
        sleep(Duration::from_secs(2)).await;

        assert_eq!(events.next().await, Some(SessionEvent::Disconnected));
        assert!(events.try_next().is_err());
        assert!(mock.written_payloads().is_empty());
    }

    #[tokio::test]
    async fn immediate_writes_and_reads_use_the_profile() {
        let config = Config { firmware: FirmwareKind::Angle, ..Config::default() };
        let (controller, _events, mock) = connected(&config).await;
        mock.state().read_value = "90".to_string();

        controller.send_value("#00FF00").await.unwrap();
        controller.send_angle_now(AngleValue::MIN).await.unwrap();
        let value = controller.read_value().await.unwrap();

        assert_eq!(mock.written_payloads(), vec!["#00FF00", "0"]);
        assert_eq!(value, "90");
        assert_eq!(mock.state().reads, vec![(ANGLE_SERVICE, ANGLE_CHARACTERISTIC_READ)]);
    }
}
