//! Constants used throughout the application
//! This module contains the constant values the bridge needs to find and
//! talk to the lamp: the advertised name, service/characteristic UUIDs and
//! the notification descriptor.

use uuid::Uuid;

/// The advertised name of the lamp. Auto-connect matches this exactly.
pub const LAMP_NAME: &str = "BLE LAMP";

/// The UUID of the lamp's primary service (Nordic UART Service).
pub const UUID_LAMP_SERVICE: Uuid = Uuid::from_u128(0x6e400001_b5a3_f393_e0a9_e50e24dcca9e);

/// The UUID of the outbound (write) characteristic — commands go here.
pub const UUID_LAMP_WRITE_CHAR: Uuid = Uuid::from_u128(0x6e400002_b5a3_f393_e0a9_e50e24dcca9e);

/// The UUID of the inbound (notify) characteristic — status and heartbeats
/// arrive here.
pub const UUID_LAMP_NOTIFY_CHAR: Uuid = Uuid::from_u128(0x6e400003_b5a3_f393_e0a9_e50e24dcca9e);

/// The standard client-characteristic-configuration descriptor (BLE2902)
/// used to arm notifications on the inbound characteristic.
pub const UUID_CCC_DESCRIPTOR: Uuid = Uuid::from_u128(0x00002902_0000_1000_8000_00805f9b34fb);

/// Largest inbound frame the codec will look at. One notification payload;
/// anything longer is firmware misbehavior and is dropped before decoding.
pub const MAX_INBOUND_FRAME: usize = 244;
