//! Bluetooth functionality for the lamp bridge.
//! This module handles all bluetooth operations: scanning, connecting,
//! negotiating the lamp's endpoints, and exchanging protocol frames.

mod commands;
mod connection;
mod constants;
mod error;
mod manager;
mod notification;
mod protocol;
mod scanner;
mod transport;
mod types;

// Re-export types that should be publicly accessible
pub use commands::{CommandWriter, WriteTarget};
pub use connection::BluestTransport;
pub use constants::*; // Re-export all constants
pub use error::LampError;
pub use manager::LampManager;
pub use notification::NotificationHandler;
pub use protocol::{decode, Hsv, InboundEvent, OutboundMessage, PatternKind};
pub use scanner::LampScanner;
pub use transport::{
    event_channel, DiscoveryStage, EventReceiver, EventSender, LampTransport, TransportEvent,
};
pub use types::{
    AdapterState, ConnectionPhase, DeviceId, DiscoveredDevice, LinkSnapshot, ScanMode,
};
