//! Core functionality for the lamp bridge.
//! This module contains the device communication layer: the connection
//! state machine and the binary protocol used to talk to the lamp.

pub mod bluetooth;

// Re-export commonly used types
pub use bluetooth::{LampManager, LinkSnapshot};
