//! Lamp command writing.
//! Builds protocol frames and hands them to the transport's outbound
//! endpoint. Readiness is checked by the manager before a writer is ever
//! constructed; the writer itself only encodes and writes.

use std::sync::Arc;

use log::debug;
use uuid::Uuid;

use crate::core::bluetooth::error::LampError;
use crate::core::bluetooth::protocol::{Hsv, OutboundMessage, PatternKind};
use crate::core::bluetooth::transport::LampTransport;
use crate::core::bluetooth::types::DeviceId;

/// The resolved outbound endpoint of a ready session.
#[derive(Debug, Clone)]
pub struct WriteTarget {
    pub device: DeviceId,
    pub characteristic: Uuid,
}

/// Writes commands to a ready session's outbound endpoint.
///
/// Writes are fire-and-forget: `Ok(())` means the frame was handed to the
/// transport, not that the lamp applied it.
pub struct CommandWriter {
    transport: Arc<dyn LampTransport>,
    target: WriteTarget,
}

impl CommandWriter {
    pub fn new(transport: Arc<dyn LampTransport>, target: WriteTarget) -> Self {
        Self { transport, target }
    }

    /// Select an animation pattern, with an optional color for solid fill.
    pub async fn set_pattern(
        &self,
        pattern: PatternKind,
        color: Option<Hsv>,
    ) -> Result<(), LampError> {
        self.send(OutboundMessage::SetPattern {
            pattern,
            color: color.unwrap_or(Hsv::new(0, 0, 0)),
        })
        .await
    }

    /// Set the seconds between pattern changes in rotation mode.
    pub async fn set_rotation(&self, duration_secs: u16) -> Result<(), LampError> {
        self.send(OutboundMessage::SetRotation { duration_secs }).await
    }

    /// Set the lamp color.
    pub async fn set_color(&self, color: Hsv) -> Result<(), LampError> {
        self.send(OutboundMessage::SetColor { color }).await
    }

    /// Ask the lamp for its current status; the reply arrives as a
    /// notification.
    pub async fn request_status(&self) -> Result<(), LampError> {
        self.send(OutboundMessage::GetStatus).await
    }

    async fn send(&self, message: OutboundMessage) -> Result<(), LampError> {
        let data = message.to_bytes();
        debug!("Sending command to lamp: {:?}", message);
        self.transport
            .write(&self.target.device, self.target.characteristic, &data)
            .await
            .map_err(|e| LampError::Transport(e.to_string()))
    }
}
