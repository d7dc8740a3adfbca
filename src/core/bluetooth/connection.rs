//! Bluest-backed transport for the lamp bridge.
//! Owns the adapter handle and the platform objects negotiated for the
//! current session (device, service, characteristics), and turns every
//! asynchronous platform callback into a [`TransportEvent`]. Nothing in
//! here decides what a transition means — that is the state machine's job.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use bluest::{Adapter, AdapterEvent, Characteristic, Device, Service};
use futures_util::StreamExt;
use log::{debug, error, info, warn};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::core::bluetooth::scanner::LampScanner;
use crate::core::bluetooth::transport::{
    DiscoveryStage, EventSender, LampTransport, TransportEvent,
};
use crate::core::bluetooth::types::{AdapterState, DeviceId};

/// Transport implementation over the `bluest` cross-platform BLE stack.
pub struct BluestTransport {
    adapter: Adapter,
    events: EventSender,
    devices: Arc<Mutex<HashMap<DeviceId, Device>>>,
    services: Arc<Mutex<HashMap<Uuid, Service>>>,
    characteristics: Arc<Mutex<HashMap<Uuid, Characteristic>>>,
    notify_cancel: Mutex<Option<CancellationToken>>,
    scanner: tokio::sync::Mutex<LampScanner>,
}

impl BluestTransport {
    /// Opens the default adapter and starts the availability watcher.
    pub async fn new(events: EventSender) -> Result<Self> {
        let adapter = Adapter::default()
            .await
            .ok_or_else(|| anyhow!("No Bluetooth adapter found"))?;
        let devices = Arc::new(Mutex::new(HashMap::new()));
        let scanner = LampScanner::new(adapter.clone(), events.clone(), devices.clone());

        let transport = Self {
            adapter,
            events,
            devices,
            services: Arc::new(Mutex::new(HashMap::new())),
            characteristics: Arc::new(Mutex::new(HashMap::new())),
            notify_cancel: Mutex::new(None),
            scanner: tokio::sync::Mutex::new(scanner),
        };
        transport.spawn_adapter_watcher();
        Ok(transport)
    }

    /// Reports radio availability as adapter-state events. `bluest` only
    /// distinguishes available/unavailable; the richer states in
    /// [`AdapterState`] come from other backends.
    fn spawn_adapter_watcher(&self) {
        let adapter = self.adapter.clone();
        let events = self.events.clone();
        tokio::spawn(async move {
            if adapter.wait_available().await.is_ok() {
                info!("Bluetooth adapter is available.");
                let _ = events.send(TransportEvent::AdapterStateChanged(AdapterState::PoweredOn));
            }

            let stream = match adapter.events().await {
                Ok(stream) => stream,
                Err(e) => {
                    error!("Failed to watch adapter events: {}", e);
                    return;
                }
            };
            futures_util::pin_mut!(stream);
            while let Some(event) = stream.next().await {
                let state = match event {
                    Ok(AdapterEvent::Available) => AdapterState::PoweredOn,
                    Ok(AdapterEvent::Unavailable) => AdapterState::PoweredOff,
                    Err(e) => {
                        warn!("Adapter event stream error: {}", e);
                        continue;
                    }
                };
                if events
                    .send(TransportEvent::AdapterStateChanged(state))
                    .is_err()
                {
                    break;
                }
            }
        });
    }

    fn device(&self, id: &DeviceId) -> Result<Device> {
        self.devices
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or_else(|| anyhow!("Device not found with ID: {}", id))
    }

    fn characteristic(&self, uuid: Uuid) -> Result<Characteristic> {
        self.characteristics
            .lock()
            .unwrap()
            .get(&uuid)
            .cloned()
            .ok_or_else(|| anyhow!("Characteristic not negotiated: {}", uuid))
    }

    fn send(&self, event: TransportEvent) {
        if self.events.send(event).is_err() {
            debug!("Event channel closed; transport event dropped");
        }
    }
}

#[async_trait]
impl LampTransport for BluestTransport {
    async fn start_scan(&self) -> Result<()> {
        self.scanner.lock().await.start().await
    }

    async fn stop_scan(&self) -> Result<()> {
        self.scanner.lock().await.stop().await
    }

    async fn connect(&self, device: &DeviceId) -> Result<()> {
        let target = self.device(device)?;
        let adapter = self.adapter.clone();
        let events = self.events.clone();
        let id = device.clone();
        tokio::spawn(async move {
            if target.is_connected().await {
                info!("Device {} already connected.", id);
                let _ = events.send(TransportEvent::Connected(id));
                return;
            }
            info!("Initiating connection to {}...", id);
            match adapter.connect_device(&target).await {
                Ok(()) => {
                    let _ = events.send(TransportEvent::Connected(id));
                }
                Err(e) => {
                    let _ = events.send(TransportEvent::ConnectFailed {
                        device: id,
                        reason: e.to_string(),
                    });
                }
            }
        });
        Ok(())
    }

    async fn disconnect(&self, device: &DeviceId) -> Result<()> {
        // Stop the notify pump first so its wind-down is not mistaken for a
        // link drop.
        if let Some(token) = self.notify_cancel.lock().unwrap().take() {
            token.cancel();
        }
        self.services.lock().unwrap().clear();
        self.characteristics.lock().unwrap().clear();

        let target = self.device(device)?;
        let adapter = self.adapter.clone();
        let events = self.events.clone();
        let id = device.clone();
        tokio::spawn(async move {
            if target.is_connected().await {
                info!("Disconnecting from device {}", id);
                if let Err(e) = adapter.disconnect_device(&target).await {
                    error!("Disconnect failed: {}", e);
                }
            } else {
                info!("Device {} not connected", id);
            }
            let _ = events.send(TransportEvent::Disconnected(id));
        });
        Ok(())
    }

    async fn discover_services(&self, device: &DeviceId) -> Result<()> {
        let target = self.device(device)?;
        let events = self.events.clone();
        let id = device.clone();
        let cache = SharedServiceCache::clone_from(self);
        tokio::spawn(async move {
            match target.services().await {
                Ok(services) => {
                    let uuids: Vec<Uuid> = services.iter().map(|s| s.uuid()).collect();
                    cache.store_services(services);
                    let _ = events.send(TransportEvent::ServicesDiscovered {
                        device: id,
                        services: uuids,
                    });
                }
                Err(e) => {
                    let _ = events.send(TransportEvent::DiscoveryFailed {
                        device: id,
                        stage: DiscoveryStage::Services,
                        reason: e.to_string(),
                    });
                }
            }
        });
        Ok(())
    }

    async fn discover_characteristics(&self, device: &DeviceId, service: Uuid) -> Result<()> {
        let handle = self
            .services
            .lock()
            .unwrap()
            .get(&service)
            .cloned()
            .ok_or_else(|| anyhow!("Service not discovered: {}", service))?;
        let events = self.events.clone();
        let id = device.clone();
        let cache = SharedServiceCache::clone_from(self);
        tokio::spawn(async move {
            match handle.characteristics().await {
                Ok(characteristics) => {
                    let uuids: Vec<Uuid> =
                        characteristics.iter().map(|c| c.uuid()).collect();
                    cache.store_characteristics(characteristics);
                    let _ = events.send(TransportEvent::CharacteristicsDiscovered {
                        device: id,
                        service,
                        characteristics: uuids,
                    });
                }
                Err(e) => {
                    let _ = events.send(TransportEvent::DiscoveryFailed {
                        device: id,
                        stage: DiscoveryStage::Characteristics,
                        reason: e.to_string(),
                    });
                }
            }
        });
        Ok(())
    }

    async fn discover_descriptors(&self, device: &DeviceId, characteristic: Uuid) -> Result<()> {
        let handle = self.characteristic(characteristic)?;
        let events = self.events.clone();
        let id = device.clone();
        tokio::spawn(async move {
            match handle.descriptors().await {
                Ok(descriptors) => {
                    let uuids: Vec<Uuid> = descriptors.iter().map(|d| d.uuid()).collect();
                    let _ = events.send(TransportEvent::DescriptorsDiscovered {
                        characteristic,
                        descriptors: uuids,
                    });
                }
                Err(e) => {
                    let _ = events.send(TransportEvent::DiscoveryFailed {
                        device: id,
                        stage: DiscoveryStage::Descriptors,
                        reason: e.to_string(),
                    });
                }
            }
        });
        Ok(())
    }

    async fn subscribe(&self, device: &DeviceId, characteristic: Uuid) -> Result<()> {
        let handle = self.characteristic(characteristic)?;
        let events = self.events.clone();
        let id = device.clone();

        let token = CancellationToken::new();
        *self.notify_cancel.lock().unwrap() = Some(token.clone());

        tokio::spawn(async move {
            info!("Subscribing to notifications...");
            let stream = match handle.notify().await {
                Ok(stream) => stream,
                Err(e) => {
                    let _ = events.send(TransportEvent::DiscoveryFailed {
                        device: id,
                        stage: DiscoveryStage::Subscription,
                        reason: e.to_string(),
                    });
                    return;
                }
            };
            let _ = events.send(TransportEvent::NotificationsEnabled(id.clone()));

            futures_util::pin_mut!(stream);
            loop {
                tokio::select! {
                    frame = stream.next() => {
                        match frame {
                            Some(Ok(payload)) => {
                                let _ = events.send(TransportEvent::NotificationReceived {
                                    device: id.clone(),
                                    payload,
                                });
                            }
                            Some(Err(e)) => {
                                error!("Error in notification stream: {}", e);
                                break;
                            }
                            None => {
                                info!("Notification stream ended");
                                break;
                            }
                        }
                    }
                    _ = token.cancelled() => {
                        debug!("Notification pump cancelled");
                        return;
                    }
                }
            }
            // The stream only ends when the link is gone; report it as a
            // disconnect so the state machine can reset the session.
            let _ = events.send(TransportEvent::Disconnected(id));
        });
        Ok(())
    }

    async fn write(&self, _device: &DeviceId, characteristic: Uuid, payload: &[u8]) -> Result<()> {
        let handle = self.characteristic(characteristic)?;
        // Unacknowledged write: the frame is handed to the platform, and a
        // silently dropped frame is indistinguishable from a delivered one.
        handle.write_without_response(payload).await?;
        Ok(())
    }
}

/// Clonable view of the negotiated-handle caches for the discovery tasks.
struct SharedServiceCache {
    services: Arc<Mutex<HashMap<Uuid, Service>>>,
    characteristics: Arc<Mutex<HashMap<Uuid, Characteristic>>>,
}

impl SharedServiceCache {
    fn clone_from(transport: &BluestTransport) -> Self {
        Self {
            services: transport.services.clone(),
            characteristics: transport.characteristics.clone(),
        }
    }

    fn store_services(&self, services: Vec<Service>) {
        let mut map = self.services.lock().unwrap();
        map.clear();
        for service in services {
            map.insert(service.uuid(), service);
        }
    }

    fn store_characteristics(&self, characteristics: Vec<Characteristic>) {
        let mut map = self.characteristics.lock().unwrap();
        map.clear();
        for characteristic in characteristics {
            map.insert(characteristic.uuid(), characteristic);
        }
    }
}
