//! Transport abstraction for the lamp bridge.
//!
//! The platform BLE stack is callback-driven; here it is flattened into a
//! single stream of [`TransportEvent`]s pushed onto one mpsc channel, which
//! the state machine consumes on its own task. Transport commands never
//! block the caller — long-running work is spawned inside the transport and
//! its outcome arrives later as an event.

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::core::bluetooth::types::{AdapterState, DeviceId, DiscoveredDevice};

/// Which step of the discovery ladder a failure belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryStage {
    Services,
    Characteristics,
    Descriptors,
    Subscription,
}

impl std::fmt::Display for DiscoveryStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            DiscoveryStage::Services => "service discovery",
            DiscoveryStage::Characteristics => "characteristic discovery",
            DiscoveryStage::Descriptors => "descriptor discovery",
            DiscoveryStage::Subscription => "notification subscription",
        };
        f.write_str(name)
    }
}

/// Asynchronous events delivered by the transport to the state machine.
/// Delivery order for a given peripheral follows the order the platform
/// issues them; the state machine never reorders.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// The local radio changed state.
    AdapterStateChanged(AdapterState),
    /// An advertisement was seen during a scan, or a pre-existing connected
    /// device was reported at scan start (the restore path).
    DeviceDiscovered(DiscoveredDevice),
    /// Transport-level connect completed for the given device.
    Connected(DeviceId),
    /// Transport-level connect failed; the session is torn down.
    ConnectFailed { device: DeviceId, reason: String },
    /// The link to the given device dropped (explicit disconnect, device
    /// power loss, or the notify stream ending).
    Disconnected(DeviceId),
    /// Service enumeration finished.
    ServicesDiscovered {
        device: DeviceId,
        services: Vec<Uuid>,
    },
    /// Characteristic enumeration finished for one service.
    CharacteristicsDiscovered {
        device: DeviceId,
        service: Uuid,
        characteristics: Vec<Uuid>,
    },
    /// Descriptor enumeration finished for one characteristic.
    DescriptorsDiscovered {
        characteristic: Uuid,
        descriptors: Vec<Uuid>,
    },
    /// The notify subscription is armed; inbound frames will now flow.
    NotificationsEnabled(DeviceId),
    /// One inbound frame from the notify endpoint.
    NotificationReceived { device: DeviceId, payload: Vec<u8> },
    /// A discovery step reported an opaque platform failure. The state
    /// machine logs it and stalls in place; recovery is user-initiated.
    DiscoveryFailed {
        device: DeviceId,
        stage: DiscoveryStage,
        reason: String,
    },
}

/// Sender half of the transport event channel.
pub type EventSender = mpsc::UnboundedSender<TransportEvent>;
/// Receiver half, owned by the state machine task.
pub type EventReceiver = mpsc::UnboundedReceiver<TransportEvent>;

/// Creates the event channel a transport and manager share.
pub fn event_channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}

/// Commands the state machine and dispatcher issue to the BLE stack.
///
/// Implementations must be cheap to call: anything that waits on the radio
/// is spawned internally and reported back as a [`TransportEvent`]. The one
/// exception is [`write`](LampTransport::write), which hands a frame to the
/// platform in unacknowledged mode and returns once it has been accepted —
/// "accepted" is all the protocol can promise; delivery is not confirmed.
#[async_trait]
pub trait LampTransport: Send + Sync {
    /// Begin scanning for advertisements. Reports already-connected devices
    /// first, then streams advertisements as `DeviceDiscovered` events.
    async fn start_scan(&self) -> Result<()>;

    /// Stop an in-progress scan. Idempotent.
    async fn stop_scan(&self) -> Result<()>;

    /// Initiate a transport-level connection. A no-op connect to an
    /// already-connected device still reports `Connected`.
    async fn connect(&self, device: &DeviceId) -> Result<()>;

    /// Tear down the transport-level connection. Idempotent.
    async fn disconnect(&self, device: &DeviceId) -> Result<()>;

    /// Enumerate all services on the device.
    async fn discover_services(&self, device: &DeviceId) -> Result<()>;

    /// Enumerate characteristics of one service.
    async fn discover_characteristics(&self, device: &DeviceId, service: Uuid) -> Result<()>;

    /// Enumerate descriptors of one characteristic.
    async fn discover_descriptors(&self, device: &DeviceId, characteristic: Uuid) -> Result<()>;

    /// Arm notifications on a characteristic and pump inbound frames as
    /// `NotificationReceived` events until the link drops.
    async fn subscribe(&self, device: &DeviceId, characteristic: Uuid) -> Result<()>;

    /// Write one frame to a characteristic, unacknowledged.
    async fn write(&self, device: &DeviceId, characteristic: Uuid, payload: &[u8]) -> Result<()>;
}
