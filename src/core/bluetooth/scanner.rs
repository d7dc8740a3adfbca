//! Advertisement scanning for the lamp bridge.
//! Runs the bluest scan stream on its own task and forwards every sighting
//! to the state machine as a `DeviceDiscovered` event. Name filtering and
//! deduplication are the state machine's job; the scanner also keeps the
//! platform `Device` handles so a later connect can find them.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use bluest::{Adapter, Device};
use futures_util::StreamExt;
use log::{debug, error, info};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::core::bluetooth::transport::{EventSender, TransportEvent};
use crate::core::bluetooth::types::{DeviceId, DiscoveredDevice};

pub struct LampScanner {
    adapter: Adapter,
    events: EventSender,
    devices: Arc<Mutex<HashMap<DeviceId, Device>>>,
    cancel_token: CancellationToken,
    scan_task_handle: Option<JoinHandle<()>>,
}

impl LampScanner {
    pub fn new(
        adapter: Adapter,
        events: EventSender,
        devices: Arc<Mutex<HashMap<DeviceId, Device>>>,
    ) -> Self {
        Self {
            adapter,
            events,
            devices,
            cancel_token: CancellationToken::new(),
            scan_task_handle: None,
        }
    }

    /// Starts the scan task. Any previous scan is stopped first and the
    /// device-handle map is cleared for the new session.
    pub async fn start(&mut self) -> Result<()> {
        if self.scan_task_handle.is_some() {
            self.stop().await?;
        }
        self.devices.lock().unwrap().clear();

        self.cancel_token = CancellationToken::new();
        let cancel_token = self.cancel_token.clone();
        let adapter = self.adapter.clone();
        let events = self.events.clone();
        let devices = self.devices.clone();

        let handle = tokio::spawn(async move {
            if let Err(e) = Self::scan_task(adapter, events, devices, cancel_token).await {
                error!("Scan task failed: {}", e);
            }
        });
        self.scan_task_handle = Some(handle);
        info!("Device scan task started.");
        Ok(())
    }

    /// Stops the scan task and waits for it to wind down. Idempotent.
    pub async fn stop(&mut self) -> Result<()> {
        self.cancel_token.cancel();
        if let Some(handle) = self.scan_task_handle.take() {
            if let Err(e) = handle.await {
                if !e.is_cancelled() {
                    error!("Scan task finished with a join error: {:?}", e);
                }
            }
            info!("Bluetooth scan stopped.");
        }
        Ok(())
    }

    async fn scan_task(
        adapter: Adapter,
        events: EventSender,
        devices: Arc<Mutex<HashMap<DeviceId, Device>>>,
        cancel_token: CancellationToken,
    ) -> Result<()> {
        // Report devices the platform already holds a connection to, so a
        // relaunch can resume without a fresh advertisement. The state
        // machine decides whether any of them is the lamp.
        match adapter.connected_devices().await {
            Ok(connected) => {
                for device in connected {
                    Self::report_device(&events, &devices, device, None);
                }
            }
            Err(e) => debug!("Could not list connected devices: {}", e),
        }

        info!("Starting bluetooth scan");
        let mut scan_stream = adapter.scan(&[]).await?;

        loop {
            tokio::select! {
                advert = scan_stream.next() => {
                    match advert {
                        Some(discovered) => {
                            debug!(
                                "Advertisement - Device: {:?}, RSSI: {:?}",
                                discovered.device, discovered.rssi
                            );
                            let adv_name = discovered.adv_data.local_name.clone();
                            Self::report_device(&events, &devices, discovered.device, adv_name);
                        }
                        None => {
                            info!("Bluetooth scan stream has ended.");
                            break;
                        }
                    }
                }
                _ = cancel_token.cancelled() => {
                    break;
                }
            }
        }
        Ok(())
    }

    /// Stores the platform handle and forwards the sighting to the state
    /// machine.
    fn report_device(
        events: &EventSender,
        devices: &Arc<Mutex<HashMap<DeviceId, Device>>>,
        device: Device,
        adv_name: Option<String>,
    ) {
        let id = DeviceId::new(device.id().to_string());
        let name = adv_name.or_else(|| device.name().ok());

        devices.lock().unwrap().insert(id.clone(), device);

        let discovered = DiscoveredDevice::new(id, name);
        if events
            .send(TransportEvent::DeviceDiscovered(discovered))
            .is_err()
        {
            debug!("Event channel closed; dropping discovery report");
        }
    }
}
