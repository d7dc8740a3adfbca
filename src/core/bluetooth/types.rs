//! Defines shared data structures for the Bluetooth module.

use serde::Serialize;

/// Opaque, platform-assigned identifier for a peripheral. Stable for one
/// device across a scan session; never parsed, only compared.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct DeviceId(String);

impl DeviceId {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for DeviceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A peripheral reported by the transport during a scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiscoveredDevice {
    /// Platform-specific unique identifier for the device
    pub id: DeviceId,
    /// The advertised name of the device, if available
    pub name: Option<String>,
}

impl DiscoveredDevice {
    pub fn new(id: DeviceId, name: Option<String>) -> Self {
        Self { id, name }
    }

    /// Returns true if this device advertises exactly the given lamp name.
    pub fn is_lamp(&self, lamp_name: &str) -> bool {
        self.name.as_deref() == Some(lamp_name)
    }

    /// Display name for logs and pickers.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("Unknown Device")
    }
}

/// State of the local radio, mirrored read-only from the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AdapterState {
    Unknown,
    Resetting,
    Unsupported,
    Unauthorized,
    PoweredOff,
    PoweredOn,
}

impl AdapterState {
    /// Human-readable description, used in every log line that mentions the
    /// radio.
    pub fn description(self) -> &'static str {
        match self {
            AdapterState::Unknown => "Unknown",
            AdapterState::Resetting => "Resetting",
            AdapterState::Unsupported => "Unsupported",
            AdapterState::Unauthorized => "Unauthorized",
            AdapterState::PoweredOff => "Powered Off",
            AdapterState::PoweredOn => "Powered On",
        }
    }
}

impl std::fmt::Display for AdapterState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.description())
    }
}

/// Where the connection lifecycle currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConnectionPhase {
    Idle,
    Scanning,
    Connecting,
    DiscoveringServices,
    DiscoveringCharacteristics,
    SubscribingNotifications,
    Ready,
}

/// How a scan treats advertisements.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanMode {
    /// Stop at the first exact lamp-name match and connect to it.
    AutoConnect,
    /// Accumulate every advertisement (deduplicated) for a device picker.
    DiscoverOnly,
}

/// Read-only snapshot of the link state, published after every transition
/// for the UI layer to render.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LinkSnapshot {
    pub adapter_state: AdapterState,
    pub phase: ConnectionPhase,
    pub discovered: Vec<DiscoveredDevice>,
    pub selected: Option<DiscoveredDevice>,
    pub is_connected: bool,
    pub is_connecting: bool,
    /// Last user-visible failure, for an inline transient message.
    pub last_error: Option<String>,
}

impl Default for LinkSnapshot {
    fn default() -> Self {
        Self {
            adapter_state: AdapterState::Unknown,
            phase: ConnectionPhase::Idle,
            discovered: Vec::new(),
            selected: None,
            is_connected: false,
            is_connecting: false,
            last_error: None,
        }
    }
}
