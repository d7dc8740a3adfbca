//! Error types for the lamp bridge.

use thiserror::Error;

use crate::core::bluetooth::types::AdapterState;

/// Failures surfaced by the connection state machine and the command
/// dispatcher. None of these are fatal; the bridge stays interactive and a
/// fresh scan/disconnect cycle recovers from all of them.
#[derive(Debug, Error)]
pub enum LampError {
    /// The radio is not powered on; only `start_scan` is blocked by this.
    #[error("Bluetooth adapter is not ready: {0}")]
    AdapterNotReady(AdapterState),

    /// The lamp service was absent after service discovery.
    #[error("lamp service not found on the connected device")]
    ServiceNotFound,

    /// One or both endpoints were missing after characteristic discovery.
    #[error("lamp characteristic not found: {0}")]
    CharacteristicNotFound(&'static str),

    /// A command was issued without a ready session. No transport action
    /// was performed.
    #[error("not connected to the lamp")]
    NotConnected,

    /// Inbound bytes could not be interpreted.
    #[error("malformed inbound frame")]
    MalformedFrame,

    /// Opaque failure reported by the transport.
    #[error("transport error: {0}")]
    Transport(String),
}
