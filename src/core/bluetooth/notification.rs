//! Notification handling for the lamp.
//! Decodes each inbound frame and reacts: status and heartbeats are logged,
//! malformed or unknown frames are logged and dropped. Nothing here mutates
//! session state and nothing terminates the connection.

use log::{trace, warn};

use crate::core::bluetooth::constants::MAX_INBOUND_FRAME;
use crate::core::bluetooth::protocol::{self, InboundEvent};

/// Consumes frames from the inbound endpoint.
#[derive(Debug, Default, Clone)]
pub struct NotificationHandler;

impl NotificationHandler {
    pub fn new() -> Self {
        Self
    }

    /// Handle one inbound frame, returning the decoded event for observers.
    pub fn handle_frame(&self, data: &[u8]) -> Option<InboundEvent> {
        if data.len() > MAX_INBOUND_FRAME {
            warn!(
                "Dropping oversized inbound frame ({} bytes): {}",
                data.len(),
                hex_string(&data[..MAX_INBOUND_FRAME])
            );
            return Some(InboundEvent::Malformed);
        }

        trace!("Received notification: {}", hex_string(data));
        let event = protocol::decode(data)?;
        match event {
            InboundEvent::StatusReport {
                pattern,
                rotation_duration,
                color,
            } => {
                log::info!(
                    "Received status: Pattern={}, Rotation={}s, Color={}",
                    pattern,
                    rotation_duration,
                    color
                );
            }
            InboundEvent::Heartbeat {
                sequence,
                uptime_secs,
            } => {
                let hours = uptime_secs / 3600;
                let minutes = (uptime_secs % 3600) / 60;
                let seconds = uptime_secs % 60;
                trace!(
                    "Received heartbeat: sequence={}, uptime={}h {}m {}s",
                    sequence,
                    hours,
                    minutes,
                    seconds
                );
            }
            InboundEvent::Unknown { raw_type } => {
                warn!("Received unknown message type: 0x{:02x}", raw_type);
            }
            InboundEvent::Malformed => {
                warn!("Received malformed frame: {}", hex_string(data));
            }
        }
        Some(event)
    }
}

/// Hex rendering for log lines, e.g. "04 02 00 3c".
fn hex_string(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::bluetooth::protocol::Hsv;

    #[test]
    fn truncated_status_produces_nothing() {
        let handler = NotificationHandler::new();
        let frame = [0x04, 0x02, 0x00, 0x3C, 0x10, 0x20, 0x30];
        assert_eq!(handler.handle_frame(&frame), None);
    }

    #[test]
    fn status_frame_is_surfaced() {
        let handler = NotificationHandler::new();
        let frame = [0x04, 0x00, 0x00, 0x0A, 1, 2, 3, 0];
        assert_eq!(
            handler.handle_frame(&frame),
            Some(InboundEvent::StatusReport {
                pattern: 0,
                rotation_duration: 10,
                color: Hsv::new(1, 2, 3),
            })
        );
    }

    #[test]
    fn garbage_is_dropped_not_fatal() {
        let handler = NotificationHandler::new();
        assert_eq!(
            handler.handle_frame(&[0xEE]),
            Some(InboundEvent::Unknown { raw_type: 0xEE })
        );
        assert_eq!(handler.handle_frame(&[]), Some(InboundEvent::Malformed));
    }
}
