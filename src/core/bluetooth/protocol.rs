//! Binary wire protocol for the lamp.
//!
//! Outbound frames are tag-prefixed with fixed-size payloads; all multi-byte
//! outbound fields are big-endian. Inbound frames are dispatched on the first
//! byte. Encoding and decoding are pure; nothing here touches the transport.

/// HSV color triple, matching the lamp firmware's FastLED CHSV layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Hsv {
    pub hue: u8,
    pub saturation: u8,
    pub value: u8,
}

impl Hsv {
    pub fn new(hue: u8, saturation: u8, value: u8) -> Self {
        Self {
            hue,
            saturation,
            value,
        }
    }
}

impl std::fmt::Display for Hsv {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "H:{} S:{} V:{}", self.hue, self.saturation, self.value)
    }
}

/// Animation patterns the lamp understands, by wire tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternKind {
    SolidFill,
    Fire,
    Pacifica,
    Rainbow,
    Meteor,
    Rotate,
}

impl PatternKind {
    /// Every selectable pattern, in picker order.
    pub const ALL: [PatternKind; 6] = [
        PatternKind::SolidFill,
        PatternKind::Fire,
        PatternKind::Pacifica,
        PatternKind::Rainbow,
        PatternKind::Meteor,
        PatternKind::Rotate,
    ];

    pub fn tag(self) -> u8 {
        match self {
            PatternKind::SolidFill => 0x00,
            PatternKind::Fire => 0x01,
            PatternKind::Pacifica => 0x02,
            PatternKind::Rainbow => 0x03,
            PatternKind::Meteor => 0x04,
            PatternKind::Rotate => 0xFF,
        }
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0x00 => Some(PatternKind::SolidFill),
            0x01 => Some(PatternKind::Fire),
            0x02 => Some(PatternKind::Pacifica),
            0x03 => Some(PatternKind::Rainbow),
            0x04 => Some(PatternKind::Meteor),
            0xFF => Some(PatternKind::Rotate),
            _ => None,
        }
    }

    /// Human-readable name for pickers and logs.
    pub fn label(self) -> &'static str {
        match self {
            PatternKind::SolidFill => "Solid Fill",
            PatternKind::Fire => "Fire",
            PatternKind::Pacifica => "Pacifica",
            PatternKind::Rainbow => "Rainbow",
            PatternKind::Meteor => "Meteor",
            PatternKind::Rotate => "Rotate",
        }
    }
}

impl std::fmt::Display for PatternKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Message type tags shared by both directions.
mod tag {
    pub const SET_PATTERN: u8 = 0x01;
    pub const SET_ROTATION: u8 = 0x02;
    pub const SET_COLOR: u8 = 0x03;
    pub const GET_STATUS: u8 = 0x04;
    pub const HEARTBEAT: u8 = 0x05;
}

/// Commands the bridge can send to the lamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutboundMessage {
    /// Select an animation pattern; the color only matters for SolidFill.
    SetPattern { pattern: PatternKind, color: Hsv },
    /// Seconds between pattern changes in rotation mode.
    SetRotation { duration_secs: u16 },
    /// Set the lamp color directly.
    SetColor { color: Hsv },
    /// Ask the lamp to report its current status.
    GetStatus,
}

impl OutboundMessage {
    /// Encode to the wire layout. Multi-byte fields are big-endian.
    pub fn to_bytes(&self) -> Vec<u8> {
        match *self {
            OutboundMessage::SetPattern { pattern, color } => vec![
                tag::SET_PATTERN,
                pattern.tag(),
                color.hue,
                color.saturation,
                color.value,
            ],
            OutboundMessage::SetRotation { duration_secs } => {
                let d = duration_secs.to_be_bytes();
                vec![tag::SET_ROTATION, d[0], d[1]]
            }
            OutboundMessage::SetColor { color } => {
                vec![tag::SET_COLOR, color.hue, color.saturation, color.value]
            }
            OutboundMessage::GetStatus => vec![tag::GET_STATUS],
        }
    }

    /// Decode an outbound frame back into a message. Used by tests and
    /// simulated lamps; returns `None` for anything that is not a complete,
    /// well-formed command frame.
    pub fn from_bytes(data: &[u8]) -> Option<Self> {
        match *data.first()? {
            tag::SET_PATTERN if data.len() == 5 => Some(OutboundMessage::SetPattern {
                pattern: PatternKind::from_tag(data[1])?,
                color: Hsv::new(data[2], data[3], data[4]),
            }),
            tag::SET_ROTATION if data.len() == 3 => Some(OutboundMessage::SetRotation {
                duration_secs: u16::from_be_bytes([data[1], data[2]]),
            }),
            tag::SET_COLOR if data.len() == 4 => Some(OutboundMessage::SetColor {
                color: Hsv::new(data[1], data[2], data[3]),
            }),
            tag::GET_STATUS if data.len() == 1 => Some(OutboundMessage::GetStatus),
            _ => None,
        }
    }
}

/// Events decoded from the lamp's notification frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboundEvent {
    /// Reply to a status request.
    StatusReport {
        pattern: u8,
        rotation_duration: u16,
        color: Hsv,
    },
    /// Periodic liveness message.
    Heartbeat { sequence: u32, uptime_secs: u32 },
    /// Tag the bridge does not know about.
    Unknown { raw_type: u8 },
    /// Frame too damaged to interpret.
    Malformed,
}

/// Decode one inbound frame.
///
/// Returns `None` for a truncated status frame — the firmware occasionally
/// sends short status replies and they are tolerated, not errors. Everything
/// else produces an event, including `Unknown`/`Malformed` for bytes the
/// bridge cannot interpret; decoding never fails hard.
pub fn decode(data: &[u8]) -> Option<InboundEvent> {
    let first = match data.first() {
        Some(&b) => b,
        None => return Some(InboundEvent::Malformed),
    };

    match first {
        tag::GET_STATUS => {
            if data.len() < 8 {
                return None;
            }
            Some(InboundEvent::StatusReport {
                pattern: data[1],
                rotation_duration: u16::from_be_bytes([data[2], data[3]]),
                color: Hsv::new(data[4], data[5], data[6]),
            })
        }
        tag::HEARTBEAT => {
            if data.len() < 9 {
                return Some(InboundEvent::Malformed);
            }
            // Firmware quirk, kept for wire compatibility: outbound
            // multi-byte fields are big-endian, but the heartbeat assembles
            // both fields least-significant byte first. Do not "fix" this
            // without the firmware owner.
            let sequence = (u32::from(data[4]) << 24)
                | (u32::from(data[3]) << 16)
                | (u32::from(data[2]) << 8)
                | u32::from(data[1]);
            let uptime_secs = (u32::from(data[8]) << 24)
                | (u32::from(data[7]) << 16)
                | (u32::from(data[6]) << 8)
                | u32::from(data[5]);
            Some(InboundEvent::Heartbeat {
                sequence,
                uptime_secs,
            })
        }
        other => Some(InboundEvent::Unknown { raw_type: other }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_pattern_layout() {
        let msg = OutboundMessage::SetPattern {
            pattern: PatternKind::Fire,
            color: Hsv::new(1, 2, 3),
        };
        assert_eq!(msg.to_bytes(), vec![0x01, 0x01, 1, 2, 3]);
    }

    #[test]
    fn set_rotation_is_big_endian() {
        for duration in [0u16, 1, 60, 0x1234, u16::MAX] {
            let bytes = OutboundMessage::SetRotation {
                duration_secs: duration,
            }
            .to_bytes();
            assert_eq!(bytes[0], 0x02);
            assert_eq!(u16::from_be_bytes([bytes[1], bytes[2]]), duration);
        }
    }

    #[test]
    fn set_color_layout() {
        let msg = OutboundMessage::SetColor {
            color: Hsv::new(10, 200, 255),
        };
        assert_eq!(msg.to_bytes(), vec![0x03, 0x0A, 0xC8, 0xFF]);
    }

    #[test]
    fn get_status_is_one_byte() {
        assert_eq!(OutboundMessage::GetStatus.to_bytes(), vec![0x04]);
    }

    #[test]
    fn outbound_round_trips() {
        let messages = [
            OutboundMessage::SetPattern {
                pattern: PatternKind::Rotate,
                color: Hsv::new(255, 0, 128),
            },
            OutboundMessage::SetRotation { duration_secs: 300 },
            OutboundMessage::SetColor {
                color: Hsv::new(0, 0, 0),
            },
            OutboundMessage::GetStatus,
        ];
        for msg in messages {
            assert_eq!(OutboundMessage::from_bytes(&msg.to_bytes()), Some(msg));
        }
    }

    #[test]
    fn every_pattern_tag_round_trips() {
        for pattern in PatternKind::ALL {
            assert_eq!(PatternKind::from_tag(pattern.tag()), Some(pattern));
            let msg = OutboundMessage::SetPattern {
                pattern,
                color: Hsv::new(7, 8, 9),
            };
            assert_eq!(OutboundMessage::from_bytes(&msg.to_bytes()), Some(msg));
        }
    }

    #[test]
    fn status_decodes() {
        let frame = [0x04, 0x02, 0x00, 0x3C, 0x10, 0x20, 0x30, 0x00];
        assert_eq!(
            decode(&frame),
            Some(InboundEvent::StatusReport {
                pattern: 0x02,
                rotation_duration: 60,
                color: Hsv::new(0x10, 0x20, 0x30),
            })
        );
    }

    #[test]
    fn short_status_yields_no_event() {
        // Seven bytes: one short of the required minimum.
        let frame = [0x04, 0x02, 0x00, 0x3C, 0x10, 0x20, 0x30];
        assert_eq!(decode(&frame), None);
        assert_eq!(decode(&[0x04]), None);
    }

    #[test]
    fn heartbeat_assembles_fields_least_significant_first() {
        // sequence bytes [1..=4], uptime bytes [5..=8], both LSB first.
        let frame = [0x05, 0x01, 0x00, 0x00, 0x00, 0x3C, 0x00, 0x00, 0x00];
        assert_eq!(
            decode(&frame),
            Some(InboundEvent::Heartbeat {
                sequence: 1,
                uptime_secs: 60,
            })
        );

        let frame = [0x05, 0x78, 0x56, 0x34, 0x12, 0x21, 0x43, 0x65, 0x87];
        assert_eq!(
            decode(&frame),
            Some(InboundEvent::Heartbeat {
                sequence: 0x12345678,
                uptime_secs: 0x87654321,
            })
        );
    }

    #[test]
    fn heartbeat_boundary_values() {
        let zeros = [0x05, 0, 0, 0, 0, 0, 0, 0, 0];
        assert_eq!(
            decode(&zeros),
            Some(InboundEvent::Heartbeat {
                sequence: 0,
                uptime_secs: 0,
            })
        );

        let ones = [0x05, 1, 0, 0, 0, 1, 0, 0, 0];
        assert_eq!(
            decode(&ones),
            Some(InboundEvent::Heartbeat {
                sequence: 1,
                uptime_secs: 1,
            })
        );

        let max = [0x05, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF];
        assert_eq!(
            decode(&max),
            Some(InboundEvent::Heartbeat {
                sequence: u32::MAX,
                uptime_secs: u32::MAX,
            })
        );
    }

    #[test]
    fn short_heartbeat_is_malformed() {
        let frame = [0x05, 0x01, 0x00, 0x00, 0x00, 0x3C, 0x00, 0x00];
        assert_eq!(decode(&frame), Some(InboundEvent::Malformed));
    }

    #[test]
    fn unknown_tag_and_empty_frame() {
        assert_eq!(decode(&[0x7F, 0x00]), Some(InboundEvent::Unknown { raw_type: 0x7F }));
        assert_eq!(decode(&[]), Some(InboundEvent::Malformed));
    }
}
