//! BLE lamp bridge library.
//! This is the main library for the lamp bridge: the device communication
//! layer (connection state machine + binary protocol), the preset store,
//! and the logging/config glue around them.

// Module declarations
pub mod config;
pub mod core;
pub mod logging;
pub mod store;
pub mod utils;

// Re-export the primary surface
pub use crate::core::bluetooth::{
    event_channel, AdapterState, BluestTransport, ConnectionPhase, DeviceId, DiscoveredDevice,
    Hsv, LampError, LampManager, LampTransport, LinkSnapshot, PatternKind, ScanMode,
    TransportEvent,
};
pub use config::LampConfig;
pub use store::{LampPreset, PresetStore};
