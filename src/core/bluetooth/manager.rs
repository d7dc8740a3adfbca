//! Connection state machine and main interface for lamp operations.
//!
//! `LampManager` owns the link lifecycle: scan → connect → service
//! discovery → characteristic discovery → notification subscription →
//! ready. All transport events arrive on one mpsc channel and are applied
//! by a single task, so state mutations are serialized; the UI layer reads
//! `LinkSnapshot`s published through a watch channel after every event.
//!
//! There is no automatic retry and no discovery timeout: every failure is
//! logged, reflected in the snapshot, and left for the user to recover from
//! with a fresh scan or a disconnect.

use std::sync::Arc;

use log::{debug, error, info, warn};
use tokio::sync::{watch, Mutex};
use uuid::Uuid;

use crate::core::bluetooth::commands::{CommandWriter, WriteTarget};
use crate::core::bluetooth::constants::{
    UUID_LAMP_NOTIFY_CHAR, UUID_LAMP_SERVICE, UUID_LAMP_WRITE_CHAR,
};
use crate::core::bluetooth::error::LampError;
use crate::core::bluetooth::notification::NotificationHandler;
use crate::core::bluetooth::protocol::{Hsv, PatternKind};
use crate::core::bluetooth::transport::{EventReceiver, LampTransport, TransportEvent};
use crate::core::bluetooth::types::{
    AdapterState, ConnectionPhase, DeviceId, DiscoveredDevice, LinkSnapshot, ScanMode,
};

/// Mutable link state. Touched only while holding the manager's mutex;
/// transport events mutate it from the event-loop task.
struct LinkState {
    adapter_state: AdapterState,
    phase: ConnectionPhase,
    scan_mode: ScanMode,
    discovered: Vec<DiscoveredDevice>,
    selected: Option<DiscoveredDevice>,
    is_connected: bool,
    is_connecting: bool,
    outbound: Option<Uuid>,
    inbound: Option<Uuid>,
    last_error: Option<String>,
}

impl LinkState {
    fn new() -> Self {
        Self {
            adapter_state: AdapterState::Unknown,
            phase: ConnectionPhase::Idle,
            scan_mode: ScanMode::AutoConnect,
            discovered: Vec::new(),
            selected: None,
            is_connected: false,
            is_connecting: false,
            outbound: None,
            inbound: None,
            last_error: None,
        }
    }

    /// Clears the session back to `Idle`. Endpoints and flags always go
    /// together; the discovered-device list is left alone.
    fn reset_session(&mut self) {
        self.phase = ConnectionPhase::Idle;
        self.selected = None;
        self.is_connected = false;
        self.is_connecting = false;
        self.outbound = None;
        self.inbound = None;
    }

    fn matches_selected(&self, id: &DeviceId) -> bool {
        self.selected.as_ref().map(|d| &d.id) == Some(id)
    }

    fn snapshot(&self) -> LinkSnapshot {
        LinkSnapshot {
            adapter_state: self.adapter_state,
            phase: self.phase,
            discovered: self.discovered.clone(),
            selected: self.selected.clone(),
            is_connected: self.is_connected,
            is_connecting: self.is_connecting,
            last_error: self.last_error.clone(),
        }
    }
}

/// Manages the single lamp connection and exposes the command surface.
pub struct LampManager {
    transport: Arc<dyn LampTransport>,
    state: Arc<Mutex<LinkState>>,
    snapshot_tx: Arc<watch::Sender<LinkSnapshot>>,
    snapshot_rx: watch::Receiver<LinkSnapshot>,
    device_name: String,
}

impl LampManager {
    /// Creates the manager and spawns its event-loop task over `events`.
    pub fn new(
        transport: Arc<dyn LampTransport>,
        events: EventReceiver,
        device_name: impl Into<String>,
    ) -> Self {
        let device_name = device_name.into();
        let state = Arc::new(Mutex::new(LinkState::new()));
        let (snapshot_tx, snapshot_rx) = watch::channel(LinkSnapshot::default());
        let snapshot_tx = Arc::new(snapshot_tx);

        tokio::spawn(run_event_loop(
            transport.clone(),
            state.clone(),
            snapshot_tx.clone(),
            events,
            NotificationHandler::new(),
            device_name.clone(),
        ));

        Self {
            transport,
            state,
            snapshot_tx,
            snapshot_rx,
            device_name,
        }
    }

    /// Current published state.
    pub fn snapshot(&self) -> LinkSnapshot {
        self.snapshot_rx.borrow().clone()
    }

    /// A receiver that wakes whenever the link state changes, for the UI
    /// layer to redraw on.
    pub fn subscribe(&self) -> watch::Receiver<LinkSnapshot> {
        self.snapshot_rx.clone()
    }

    /// Starts scanning. Fails with `AdapterNotReady` unless the radio is
    /// powered on; a new scan always clears the previous discoveries.
    pub async fn start_scan(&self, mode: ScanMode) -> Result<(), LampError> {
        let mut state = self.state.lock().await;
        if state.adapter_state != AdapterState::PoweredOn {
            error!(
                "Cannot start scan: Bluetooth is {}",
                state.adapter_state.description()
            );
            return Err(LampError::AdapterNotReady(state.adapter_state));
        }

        // A fresh scan abandons any stalled previous session.
        state.reset_session();
        state.discovered.clear();
        state.scan_mode = mode;
        state.phase = ConnectionPhase::Scanning;
        state.is_connecting = matches!(mode, ScanMode::AutoConnect);
        state.last_error = None;

        self.transport.start_scan().await.map_err(|e| {
            error!("Failed to start scan: {}", e);
            state.phase = ConnectionPhase::Idle;
            state.is_connecting = false;
            LampError::Transport(e.to_string())
        })?;
        info!("Started scanning for BLE devices");
        self.publish(&state);
        Ok(())
    }

    /// Stops an in-progress scan. Idempotent.
    pub async fn stop_scan(&self) -> Result<(), LampError> {
        self.transport
            .stop_scan()
            .await
            .map_err(|e| LampError::Transport(e.to_string()))?;
        let mut state = self.state.lock().await;
        if state.phase == ConnectionPhase::Scanning {
            state.phase = ConnectionPhase::Idle;
            state.is_connecting = false;
            self.publish(&state);
        }
        Ok(())
    }

    /// Connects to a previously discovered device (the picker flow).
    pub async fn connect_to(&self, device: &DeviceId) -> Result<(), LampError> {
        let mut state = self.state.lock().await;
        let target = state
            .discovered
            .iter()
            .find(|d| &d.id == device)
            .cloned()
            .ok_or_else(|| LampError::Transport(format!("Device not found with ID: {}", device)))?;

        info!("Connecting to {}...", target.display_name());
        state.selected = Some(target);
        state.phase = ConnectionPhase::Connecting;
        state.is_connecting = true;
        state.is_connected = false;
        self.transport
            .connect(device)
            .await
            .map_err(|e| LampError::Transport(e.to_string()))?;
        self.publish(&state);
        Ok(())
    }

    /// Disconnects from the current device. Idempotent; the session is
    /// cleared when the transport reports the link down.
    pub async fn disconnect(&self) -> Result<(), LampError> {
        let state = self.state.lock().await;
        let Some(selected) = state.selected.clone() else {
            debug!("Disconnect requested with no selected device");
            return Ok(());
        };
        drop(state);
        self.transport
            .disconnect(&selected.id)
            .await
            .map_err(|e| LampError::Transport(e.to_string()))
    }

    /// Sends a pattern selection, with an optional solid-fill color.
    pub async fn set_pattern(
        &self,
        pattern: PatternKind,
        color: Option<Hsv>,
    ) -> Result<(), LampError> {
        let writer = self.writer("pattern").await?;
        writer.set_pattern(pattern, color).await?;
        info!("Sent pattern message: {}", pattern);
        Ok(())
    }

    /// Sends a rotation interval in seconds.
    pub async fn set_rotation(&self, duration_secs: u16) -> Result<(), LampError> {
        let writer = self.writer("rotation").await?;
        writer.set_rotation(duration_secs).await?;
        info!("Sent rotation message: {} seconds", duration_secs);
        Ok(())
    }

    /// Sends a color change.
    pub async fn set_color(&self, color: Hsv) -> Result<(), LampError> {
        let writer = self.writer("color").await?;
        writer.set_color(color).await?;
        info!("Sent color message: {}", color);
        Ok(())
    }

    /// Asks the lamp to report its status; the reply is logged when it
    /// arrives on the notify endpoint.
    pub async fn request_status(&self) -> Result<(), LampError> {
        let writer = self.writer("status request").await?;
        writer.request_status().await?;
        info!("Sent status request");
        Ok(())
    }

    /// The configured lamp name used for auto-connect matching.
    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    /// Readiness guard shared by every command: the session must be `Ready`
    /// with both endpoints resolved, otherwise nothing touches the
    /// transport.
    async fn writer(&self, what: &str) -> Result<CommandWriter, LampError> {
        let state = self.state.lock().await;
        if state.phase != ConnectionPhase::Ready || !state.is_connected {
            error!("Cannot send {}: Not connected to device", what);
            return Err(LampError::NotConnected);
        }
        let device = state
            .selected
            .as_ref()
            .map(|d| d.id.clone())
            .ok_or(LampError::NotConnected)?;
        let characteristic = state.outbound.ok_or(LampError::NotConnected)?;
        Ok(CommandWriter::new(
            self.transport.clone(),
            WriteTarget {
                device,
                characteristic,
            },
        ))
    }

    fn publish(&self, state: &LinkState) {
        let _ = self.snapshot_tx.send(state.snapshot());
    }
}

async fn run_event_loop(
    transport: Arc<dyn LampTransport>,
    state: Arc<Mutex<LinkState>>,
    snapshot_tx: Arc<watch::Sender<LinkSnapshot>>,
    mut events: EventReceiver,
    handler: NotificationHandler,
    device_name: String,
) {
    while let Some(event) = events.recv().await {
        let mut state = state.lock().await;
        apply_event(&transport, &mut state, &handler, &device_name, event).await;
        let _ = snapshot_tx.send(state.snapshot());
    }
    debug!("Transport event channel closed; state machine stopped");
}

/// One state-machine step. Events for a peripheral that is not the current
/// selection are stale leftovers from a previous session and are ignored.
async fn apply_event(
    transport: &Arc<dyn LampTransport>,
    state: &mut LinkState,
    handler: &NotificationHandler,
    device_name: &str,
    event: TransportEvent,
) {
    match event {
        TransportEvent::AdapterStateChanged(new_state) => {
            let old = state.adapter_state;
            state.adapter_state = new_state;
            info!(
                "Bluetooth state changed from {} to {}",
                old.description(),
                new_state.description()
            );
            match new_state {
                AdapterState::PoweredOn => info!("Bluetooth is ready to use."),
                AdapterState::PoweredOff => {
                    warn!("Bluetooth is powered off. Please turn on Bluetooth to use the lamp.");
                    state.discovered.clear();
                    state.reset_session();
                }
                AdapterState::Unauthorized => {
                    error!("Bluetooth permission denied. Please enable Bluetooth access.")
                }
                AdapterState::Unsupported => {
                    error!("This device does not support Bluetooth Low Energy.")
                }
                AdapterState::Resetting => warn!("Bluetooth is resetting. Please wait..."),
                AdapterState::Unknown => warn!("Bluetooth state is unknown. Please wait..."),
            }
        }

        TransportEvent::DeviceDiscovered(device) => {
            if state.phase != ConnectionPhase::Scanning {
                debug!("Ignoring discovery outside of a scan: {}", device.id);
                return;
            }
            match state.scan_mode {
                ScanMode::AutoConnect => {
                    if !device.is_lamp(device_name) {
                        return;
                    }
                    info!("Found {} device, connecting...", device_name);
                    if let Err(e) = transport.stop_scan().await {
                        warn!("Failed to stop scan: {}", e);
                    }
                    let id = device.id.clone();
                    state.selected = Some(device);
                    state.phase = ConnectionPhase::Connecting;
                    state.is_connecting = true;
                    if let Err(e) = transport.connect(&id).await {
                        error!("Failed to initiate connection: {}", e);
                        state.last_error = Some(e.to_string());
                        state.reset_session();
                    }
                }
                ScanMode::DiscoverOnly => {
                    if state.discovered.iter().any(|d| d.id == device.id) {
                        return;
                    }
                    info!(
                        "Discovered device: {} ({})",
                        device.display_name(),
                        device.id
                    );
                    state.discovered.push(device);
                }
            }
        }

        TransportEvent::Connected(id) => {
            if !state.matches_selected(&id) || state.is_connected {
                debug!("Ignoring connect report for {}", id);
                return;
            }
            let name = state
                .selected
                .as_ref()
                .map(|d| d.display_name().to_string())
                .unwrap_or_default();
            info!("Connection Complete to {}", name);
            state.phase = ConnectionPhase::DiscoveringServices;
            info!("Starting service discovery...");
            if let Err(e) = transport.discover_services(&id).await {
                error!("Failed to start service discovery: {}", e);
                state.last_error = Some(e.to_string());
            }
        }

        TransportEvent::ConnectFailed { device, reason } => {
            if !state.matches_selected(&device) {
                return;
            }
            error!("Connection to {} failed: {}", device, reason);
            state.last_error = Some(reason);
            state.reset_session();
        }

        TransportEvent::Disconnected(id) => {
            if !state.matches_selected(&id) {
                debug!("Ignoring disconnect for non-selected device {}", id);
                return;
            }
            let name = state
                .selected
                .as_ref()
                .map(|d| d.display_name().to_string())
                .unwrap_or_default();
            info!("Disconnected from {}", name);
            state.reset_session();
        }

        TransportEvent::ServicesDiscovered { device, services } => {
            if !state.matches_selected(&device)
                || state.phase != ConnectionPhase::DiscoveringServices
            {
                return;
            }
            info!("Discovered {} services", services.len());
            for uuid in &services {
                debug!("  Service UUID: {}", uuid);
            }
            if services.contains(&UUID_LAMP_SERVICE) {
                info!("Found lamp service, discovering characteristics...");
                state.phase = ConnectionPhase::DiscoveringCharacteristics;
                if let Err(e) = transport
                    .discover_characteristics(&device, UUID_LAMP_SERVICE)
                    .await
                {
                    error!("Failed to start characteristic discovery: {}", e);
                    state.last_error = Some(e.to_string());
                }
            } else {
                // The transport link stays up, but this device cannot be
                // the lamp; the session is cleared.
                error!("{}", LampError::ServiceNotFound);
                state.last_error = Some(LampError::ServiceNotFound.to_string());
                state.reset_session();
            }
        }

        TransportEvent::CharacteristicsDiscovered {
            device,
            service,
            characteristics,
        } => {
            if !state.matches_selected(&device)
                || state.phase != ConnectionPhase::DiscoveringCharacteristics
                || service != UUID_LAMP_SERVICE
            {
                return;
            }
            info!(
                "Discovered {} characteristics for the lamp service",
                characteristics.len()
            );
            for uuid in &characteristics {
                if *uuid == UUID_LAMP_WRITE_CHAR {
                    info!("Found outbound (write) characteristic");
                    state.outbound = Some(*uuid);
                } else if *uuid == UUID_LAMP_NOTIFY_CHAR {
                    info!("Found inbound (notify) characteristic");
                    state.inbound = Some(*uuid);
                } else {
                    debug!("  Characteristic UUID: {}", uuid);
                }
            }

            // Missing endpoints do not reset the session; the dispatcher's
            // readiness guard refuses writes independently.
            if state.outbound.is_none() {
                let err = LampError::CharacteristicNotFound("outbound (write)");
                error!("{}", err);
                state.last_error = Some(err.to_string());
            }
            match state.inbound {
                Some(inbound) => {
                    if state.outbound.is_some() {
                        state.phase = ConnectionPhase::SubscribingNotifications;
                    }
                    info!("Discovering descriptors for the inbound characteristic");
                    if let Err(e) = transport.discover_descriptors(&device, inbound).await {
                        error!("Failed to start descriptor discovery: {}", e);
                        state.last_error = Some(e.to_string());
                    }
                }
                None => {
                    let err = LampError::CharacteristicNotFound("inbound (notify)");
                    error!("{}", err);
                    state.last_error = Some(err.to_string());
                }
            }
        }

        TransportEvent::DescriptorsDiscovered {
            characteristic,
            descriptors,
        } => {
            if state.inbound != Some(characteristic) {
                return;
            }
            info!(
                "Discovered {} descriptors for the inbound characteristic",
                descriptors.len()
            );
            for uuid in &descriptors {
                debug!("  Descriptor UUID: {}", uuid);
            }
            let Some(device) = state.selected.as_ref().map(|d| d.id.clone()) else {
                return;
            };
            info!("Enabling notifications for the inbound characteristic");
            if let Err(e) = transport.subscribe(&device, characteristic).await {
                error!("Failed to arm notifications: {}", e);
                state.last_error = Some(e.to_string());
            }
        }

        TransportEvent::NotificationsEnabled(id) => {
            if !state.matches_selected(&id) {
                return;
            }
            state.phase = ConnectionPhase::Ready;
            state.is_connected = true;
            state.is_connecting = false;
            state.last_error = None;
            info!("Notifications enabled; lamp session is ready");
        }

        TransportEvent::NotificationReceived { device, payload } => {
            if !state.matches_selected(&device) {
                debug!("Dropping notification from non-selected device {}", device);
                return;
            }
            handler.handle_frame(&payload);
        }

        TransportEvent::DiscoveryFailed {
            device,
            stage,
            reason,
        } => {
            if !state.matches_selected(&device) {
                return;
            }
            // Reported but not fatal: the machine stalls in place and the
            // user recovers with a disconnect.
            let err = LampError::Transport(format!("{} failed: {}", stage, reason));
            error!("{}", err);
            state.last_error = Some(err.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::bluetooth::constants::{LAMP_NAME, UUID_CCC_DESCRIPTOR};
    use crate::core::bluetooth::protocol::OutboundMessage;
    use crate::core::bluetooth::transport::{event_channel, EventSender};
    use anyhow::Result;
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    #[derive(Debug, Clone, PartialEq)]
    enum FakeCall {
        StartScan,
        StopScan,
        Connect(DeviceId),
        Disconnect(DeviceId),
        DiscoverServices(DeviceId),
        DiscoverCharacteristics(Uuid),
        DiscoverDescriptors(Uuid),
        Subscribe(Uuid),
        Write { characteristic: Uuid, payload: Vec<u8> },
    }

    /// Records every transport command; tests inject the events by hand.
    #[derive(Default)]
    struct FakeTransport {
        calls: StdMutex<Vec<FakeCall>>,
    }

    impl FakeTransport {
        fn calls(&self) -> Vec<FakeCall> {
            self.calls.lock().unwrap().clone()
        }

        fn writes(&self) -> Vec<(Uuid, Vec<u8>)> {
            self.calls()
                .into_iter()
                .filter_map(|c| match c {
                    FakeCall::Write {
                        characteristic,
                        payload,
                    } => Some((characteristic, payload)),
                    _ => None,
                })
                .collect()
        }

        fn record(&self, call: FakeCall) {
            self.calls.lock().unwrap().push(call);
        }
    }

    #[async_trait]
    impl LampTransport for FakeTransport {
        async fn start_scan(&self) -> Result<()> {
            self.record(FakeCall::StartScan);
            Ok(())
        }
        async fn stop_scan(&self) -> Result<()> {
            self.record(FakeCall::StopScan);
            Ok(())
        }
        async fn connect(&self, device: &DeviceId) -> Result<()> {
            self.record(FakeCall::Connect(device.clone()));
            Ok(())
        }
        async fn disconnect(&self, device: &DeviceId) -> Result<()> {
            self.record(FakeCall::Disconnect(device.clone()));
            Ok(())
        }
        async fn discover_services(&self, device: &DeviceId) -> Result<()> {
            self.record(FakeCall::DiscoverServices(device.clone()));
            Ok(())
        }
        async fn discover_characteristics(&self, _device: &DeviceId, service: Uuid) -> Result<()> {
            self.record(FakeCall::DiscoverCharacteristics(service));
            Ok(())
        }
        async fn discover_descriptors(
            &self,
            _device: &DeviceId,
            characteristic: Uuid,
        ) -> Result<()> {
            self.record(FakeCall::DiscoverDescriptors(characteristic));
            Ok(())
        }
        async fn subscribe(&self, _device: &DeviceId, characteristic: Uuid) -> Result<()> {
            self.record(FakeCall::Subscribe(characteristic));
            Ok(())
        }
        async fn write(
            &self,
            _device: &DeviceId,
            characteristic: Uuid,
            payload: &[u8],
        ) -> Result<()> {
            self.record(FakeCall::Write {
                characteristic,
                payload: payload.to_vec(),
            });
            Ok(())
        }
    }

    struct Harness {
        fake: Arc<FakeTransport>,
        manager: LampManager,
        events: EventSender,
        snapshots: watch::Receiver<LinkSnapshot>,
    }

    fn harness() -> Harness {
        let (events, rx) = event_channel();
        let fake = Arc::new(FakeTransport::default());
        let manager = LampManager::new(fake.clone(), rx, LAMP_NAME);
        let snapshots = manager.subscribe();
        Harness {
            fake,
            manager,
            events,
            snapshots,
        }
    }

    fn lamp_id() -> DeviceId {
        DeviceId::new("peripheral-0001")
    }

    fn lamp_device() -> DiscoveredDevice {
        DiscoveredDevice::new(lamp_id(), Some(LAMP_NAME.to_string()))
    }

    async fn wait_for(
        rx: &mut watch::Receiver<LinkSnapshot>,
        pred: impl Fn(&LinkSnapshot) -> bool,
    ) -> LinkSnapshot {
        tokio::time::timeout(Duration::from_secs(1), async {
            loop {
                {
                    let current = rx.borrow_and_update();
                    if pred(&current) {
                        return current.clone();
                    }
                }
                rx.changed().await.expect("snapshot channel closed");
            }
        })
        .await
        .expect("snapshot condition not reached in time")
    }

    /// Lets already-queued events drain through the single event-loop task.
    async fn settle() {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    async fn power_on(h: &mut Harness) {
        h.events
            .send(TransportEvent::AdapterStateChanged(AdapterState::PoweredOn))
            .unwrap();
        wait_for(&mut h.snapshots, |s| {
            s.adapter_state == AdapterState::PoweredOn
        })
        .await;
    }

    /// Drives the full ladder from powered-on to a ready session.
    async fn drive_to_ready(h: &mut Harness) {
        power_on(h).await;
        h.manager.start_scan(ScanMode::AutoConnect).await.unwrap();
        h.events
            .send(TransportEvent::DeviceDiscovered(lamp_device()))
            .unwrap();
        wait_for(&mut h.snapshots, |s| s.phase == ConnectionPhase::Connecting).await;

        h.events.send(TransportEvent::Connected(lamp_id())).unwrap();
        wait_for(&mut h.snapshots, |s| {
            s.phase == ConnectionPhase::DiscoveringServices
        })
        .await;

        h.events
            .send(TransportEvent::ServicesDiscovered {
                device: lamp_id(),
                services: vec![Uuid::from_u128(0x1800), UUID_LAMP_SERVICE],
            })
            .unwrap();
        wait_for(&mut h.snapshots, |s| {
            s.phase == ConnectionPhase::DiscoveringCharacteristics
        })
        .await;

        h.events
            .send(TransportEvent::CharacteristicsDiscovered {
                device: lamp_id(),
                service: UUID_LAMP_SERVICE,
                characteristics: vec![UUID_LAMP_WRITE_CHAR, UUID_LAMP_NOTIFY_CHAR],
            })
            .unwrap();
        wait_for(&mut h.snapshots, |s| {
            s.phase == ConnectionPhase::SubscribingNotifications
        })
        .await;

        h.events
            .send(TransportEvent::DescriptorsDiscovered {
                characteristic: UUID_LAMP_NOTIFY_CHAR,
                descriptors: vec![UUID_CCC_DESCRIPTOR],
            })
            .unwrap();
        settle().await;

        h.events
            .send(TransportEvent::NotificationsEnabled(lamp_id()))
            .unwrap();
        wait_for(&mut h.snapshots, |s| s.is_connected).await;
    }

    #[tokio::test]
    async fn scan_requires_powered_on_adapter() {
        let h = harness();
        let result = h.manager.start_scan(ScanMode::AutoConnect).await;
        assert!(matches!(result, Err(LampError::AdapterNotReady(_))));
        assert_eq!(h.manager.snapshot().phase, ConnectionPhase::Idle);
        assert!(h.fake.calls().is_empty());
    }

    #[tokio::test]
    async fn scan_clears_previous_discoveries_and_dedups() {
        let mut h = harness();
        power_on(&mut h).await;
        h.manager.start_scan(ScanMode::DiscoverOnly).await.unwrap();

        let other = DiscoveredDevice::new(DeviceId::new("other"), Some("Desk Fan".into()));
        h.events
            .send(TransportEvent::DeviceDiscovered(other.clone()))
            .unwrap();
        h.events
            .send(TransportEvent::DeviceDiscovered(lamp_device()))
            .unwrap();
        // Same identifier seen twice never duplicates the entry.
        h.events
            .send(TransportEvent::DeviceDiscovered(lamp_device()))
            .unwrap();
        let snap = wait_for(&mut h.snapshots, |s| s.discovered.len() == 2).await;
        assert_eq!(snap.discovered, vec![other, lamp_device()]);
        settle().await;
        assert_eq!(h.manager.snapshot().discovered.len(), 2);

        // Discovery-only scans never auto-connect.
        assert!(!h
            .fake
            .calls()
            .iter()
            .any(|c| matches!(c, FakeCall::Connect(_))));

        // A fresh scan starts from an empty set.
        h.manager.start_scan(ScanMode::DiscoverOnly).await.unwrap();
        assert!(h.manager.snapshot().discovered.is_empty());
    }

    #[tokio::test]
    async fn auto_connect_reaches_ready_and_writes_color() {
        let mut h = harness();
        drive_to_ready(&mut h).await;

        let snap = h.manager.snapshot();
        assert_eq!(snap.phase, ConnectionPhase::Ready);
        assert!(snap.is_connected);
        assert!(!snap.is_connecting);

        let calls = h.fake.calls();
        assert!(calls.contains(&FakeCall::StopScan));
        assert!(calls.contains(&FakeCall::Connect(lamp_id())));
        assert!(calls.contains(&FakeCall::DiscoverServices(lamp_id())));
        assert!(calls.contains(&FakeCall::DiscoverCharacteristics(UUID_LAMP_SERVICE)));
        assert!(calls.contains(&FakeCall::DiscoverDescriptors(UUID_LAMP_NOTIFY_CHAR)));
        assert!(calls.contains(&FakeCall::Subscribe(UUID_LAMP_NOTIFY_CHAR)));

        h.manager.set_color(Hsv::new(10, 200, 255)).await.unwrap();
        let writes = h.fake.writes();
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].0, UUID_LAMP_WRITE_CHAR);
        assert_eq!(writes[0].1, vec![0x03, 0x0A, 0xC8, 0xFF]);

        h.manager.request_status().await.unwrap();
        assert_eq!(h.fake.writes()[1].1, vec![0x04]);
    }

    #[tokio::test]
    async fn every_command_round_trips_through_the_codec() {
        let mut h = harness();
        drive_to_ready(&mut h).await;

        h.manager
            .set_pattern(PatternKind::Meteor, Some(Hsv::new(1, 2, 3)))
            .await
            .unwrap();
        h.manager.set_rotation(300).await.unwrap();
        h.manager.set_color(Hsv::new(40, 50, 60)).await.unwrap();
        h.manager.request_status().await.unwrap();

        let decoded: Vec<_> = h
            .fake
            .writes()
            .iter()
            .map(|(_, bytes)| OutboundMessage::from_bytes(bytes).expect("valid frame"))
            .collect();
        assert_eq!(
            decoded,
            vec![
                OutboundMessage::SetPattern {
                    pattern: PatternKind::Meteor,
                    color: Hsv::new(1, 2, 3),
                },
                OutboundMessage::SetRotation { duration_secs: 300 },
                OutboundMessage::SetColor {
                    color: Hsv::new(40, 50, 60),
                },
                OutboundMessage::GetStatus,
            ]
        );
    }

    #[tokio::test]
    async fn commands_without_a_session_touch_nothing() {
        let h = harness();
        let result = h.manager.set_pattern(PatternKind::SolidFill, None).await;
        assert!(matches!(result, Err(LampError::NotConnected)));
        assert!(h.fake.writes().is_empty());
    }

    #[tokio::test]
    async fn non_matching_advertisements_are_ignored() {
        let mut h = harness();
        power_on(&mut h).await;
        h.manager.start_scan(ScanMode::AutoConnect).await.unwrap();

        h.events
            .send(TransportEvent::DeviceDiscovered(DiscoveredDevice::new(
                DeviceId::new("other"),
                Some("BLE LAMPSHADE".into()),
            )))
            .unwrap();
        settle().await;

        let snap = h.manager.snapshot();
        assert_eq!(snap.phase, ConnectionPhase::Scanning);
        assert!(snap.selected.is_none());
        assert!(!h
            .fake
            .calls()
            .iter()
            .any(|c| matches!(c, FakeCall::Connect(_))));
    }

    #[tokio::test]
    async fn stale_disconnect_is_a_noop() {
        let mut h = harness();
        drive_to_ready(&mut h).await;

        h.events
            .send(TransportEvent::Disconnected(DeviceId::new("someone-else")))
            .unwrap();
        settle().await;
        assert!(h.manager.snapshot().is_connected);

        h.events
            .send(TransportEvent::Disconnected(lamp_id()))
            .unwrap();
        let snap = wait_for(&mut h.snapshots, |s| !s.is_connected).await;
        assert_eq!(snap.phase, ConnectionPhase::Idle);
        assert!(snap.selected.is_none());
        assert!(!snap.is_connecting);
    }

    #[tokio::test]
    async fn missing_lamp_service_clears_the_session() {
        let mut h = harness();
        power_on(&mut h).await;
        h.manager.start_scan(ScanMode::AutoConnect).await.unwrap();
        h.events
            .send(TransportEvent::DeviceDiscovered(lamp_device()))
            .unwrap();
        h.events.send(TransportEvent::Connected(lamp_id())).unwrap();
        wait_for(&mut h.snapshots, |s| {
            s.phase == ConnectionPhase::DiscoveringServices
        })
        .await;

        h.events
            .send(TransportEvent::ServicesDiscovered {
                device: lamp_id(),
                services: vec![Uuid::from_u128(0x1800)],
            })
            .unwrap();
        let snap = wait_for(&mut h.snapshots, |s| s.phase == ConnectionPhase::Idle).await;
        assert!(snap.last_error.is_some());
        assert!(!snap.is_connected);
        // The transport link is not torn down for this.
        assert!(!h
            .fake
            .calls()
            .iter()
            .any(|c| matches!(c, FakeCall::Disconnect(_))));
    }

    #[tokio::test]
    async fn missing_characteristic_stalls_without_reset() {
        let mut h = harness();
        power_on(&mut h).await;
        h.manager.start_scan(ScanMode::AutoConnect).await.unwrap();
        h.events
            .send(TransportEvent::DeviceDiscovered(lamp_device()))
            .unwrap();
        h.events.send(TransportEvent::Connected(lamp_id())).unwrap();
        h.events
            .send(TransportEvent::ServicesDiscovered {
                device: lamp_id(),
                services: vec![UUID_LAMP_SERVICE],
            })
            .unwrap();
        wait_for(&mut h.snapshots, |s| {
            s.phase == ConnectionPhase::DiscoveringCharacteristics
        })
        .await;

        h.events
            .send(TransportEvent::CharacteristicsDiscovered {
                device: lamp_id(),
                service: UUID_LAMP_SERVICE,
                characteristics: vec![UUID_LAMP_WRITE_CHAR],
            })
            .unwrap();
        settle().await;

        let snap = h.manager.snapshot();
        assert_eq!(snap.phase, ConnectionPhase::DiscoveringCharacteristics);
        assert!(snap.last_error.is_some());
        assert!(matches!(
            h.manager.set_color(Hsv::new(1, 1, 1)).await,
            Err(LampError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn adapter_power_off_clears_everything() {
        let mut h = harness();
        drive_to_ready(&mut h).await;

        h.events
            .send(TransportEvent::AdapterStateChanged(
                AdapterState::PoweredOff,
            ))
            .unwrap();
        let snap = wait_for(&mut h.snapshots, |s| {
            s.adapter_state == AdapterState::PoweredOff
        })
        .await;
        assert_eq!(snap.phase, ConnectionPhase::Idle);
        assert!(snap.discovered.is_empty());
        assert!(snap.selected.is_none());
        assert!(!snap.is_connected);
        assert!(!snap.is_connecting);
    }

    #[tokio::test]
    async fn truncated_status_notification_changes_nothing() {
        let mut h = harness();
        drive_to_ready(&mut h).await;

        h.events
            .send(TransportEvent::NotificationReceived {
                device: lamp_id(),
                payload: vec![0x04, 0x02, 0x00, 0x3C, 0x10, 0x20, 0x30],
            })
            .unwrap();
        settle().await;

        let snap = h.manager.snapshot();
        assert_eq!(snap.phase, ConnectionPhase::Ready);
        assert!(snap.is_connected);
    }

    #[tokio::test]
    async fn discovery_failure_stalls_in_place() {
        let mut h = harness();
        power_on(&mut h).await;
        h.manager.start_scan(ScanMode::AutoConnect).await.unwrap();
        h.events
            .send(TransportEvent::DeviceDiscovered(lamp_device()))
            .unwrap();
        h.events.send(TransportEvent::Connected(lamp_id())).unwrap();
        wait_for(&mut h.snapshots, |s| {
            s.phase == ConnectionPhase::DiscoveringServices
        })
        .await;

        h.events
            .send(TransportEvent::DiscoveryFailed {
                device: lamp_id(),
                stage: crate::core::bluetooth::transport::DiscoveryStage::Services,
                reason: "platform said no".into(),
            })
            .unwrap();
        let snap = wait_for(&mut h.snapshots, |s| s.last_error.is_some()).await;
        // No automatic retry or teardown: still parked in the same phase.
        assert_eq!(snap.phase, ConnectionPhase::DiscoveringServices);
        assert_eq!(
            h.fake
                .calls()
                .iter()
                .filter(|c| matches!(c, FakeCall::DiscoverServices(_)))
                .count(),
            1
        );
    }

    #[tokio::test]
    async fn restore_path_skips_scan_and_connect_steps() {
        let mut h = harness();
        power_on(&mut h).await;
        h.manager.start_scan(ScanMode::AutoConnect).await.unwrap();

        // The transport reports a pre-existing connection at scan start:
        // discovery leads straight into the service ladder.
        h.events
            .send(TransportEvent::DeviceDiscovered(lamp_device()))
            .unwrap();
        h.events.send(TransportEvent::Connected(lamp_id())).unwrap();
        let snap = wait_for(&mut h.snapshots, |s| {
            s.phase == ConnectionPhase::DiscoveringServices
        })
        .await;
        assert_eq!(snap.selected, Some(lamp_device()));
    }

    #[tokio::test]
    async fn explicit_disconnect_goes_through_the_transport() {
        let mut h = harness();
        drive_to_ready(&mut h).await;

        h.manager.disconnect().await.unwrap();
        assert!(h.fake.calls().contains(&FakeCall::Disconnect(lamp_id())));

        // Disconnect with no session is an accepted no-op.
        h.events
            .send(TransportEvent::Disconnected(lamp_id()))
            .unwrap();
        wait_for(&mut h.snapshots, |s| !s.is_connected).await;
        h.manager.disconnect().await.unwrap();
    }
}
