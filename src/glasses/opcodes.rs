//! Wire primitives for the glasses protocol (spec.md §4.10).
//!
//! First byte of every payload is one of these opcodes. Kept as a
//! plain byte-tagged enum rather than a bitflags/bitfield type since
//! the wire format itself is a simple tag byte.

/// Status byte meaning "accepted" in an arm's ACK response.
pub const STATUS_ACK: u8 = 0xC9;

pub const OP_TEXT: u8 = 0x4E;
pub const OP_BMP_CHUNK: u8 = 0x15;
pub const OP_BMP_END: u8 = 0x20;
pub const OP_BMP_CRC: u8 = 0x16;
pub const OP_MIC: u8 = 0x0E;
pub const OP_MIC_DATA: u8 = 0xF1;
pub const OP_EVENT: u8 = 0xF5;
pub const OP_HEARTBEAT: u8 = 0x25;

/// `Event` sub-codes carried as the second byte of an `0xF5` payload
/// (GLOSSARY: "Dashboard (glasses)").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum GlassesEvent {
    DashboardOpen,
    DashboardClose,
    TapSingle,
    TapDouble,
    TapTriple,
    LongPress,
    Other(u8),
}

impl GlassesEvent {
    pub fn from_code(code: u8) -> Self {
        match code {
            0x02 => Self::DashboardOpen,
            0x03 => Self::DashboardClose,
            0x10 => Self::TapSingle,
            0x11 => Self::TapDouble,
            0x12 => Self::TapTriple,
            0x13 => Self::LongPress,
            other => Self::Other(other),
        }
    }
}

/// One incoming packet from an arm, reduced to what the queue/bitmap
/// FSMs need to react to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArmMessage {
    /// `0x4E` with a trailing status byte.
    TextAck { status: u8 },
    /// `0x20` with a trailing status byte (BmpEnd ack).
    BmpEndAck { status: u8 },
    /// `0x16` with a trailing status byte (BmpCrc ack).
    BmpCrcAck { status: u8 },
    /// `0xF5` event, which for some commands doubles as an implicit
    /// ACK (spec.md §9 design note on ACK coupling).
    Event(GlassesEvent),
    /// Anything else (unrecognised opcode).
    Unknown,
}

impl ArmMessage {
    pub fn parse(data: &[u8]) -> Self {
        let Some((&opcode, rest)) = data.split_first() else {
            return Self::Unknown;
        };
        match opcode {
            OP_TEXT => rest
                .first()
                .map(|&status| Self::TextAck { status })
                .unwrap_or(Self::Unknown),
            OP_BMP_END => rest
                .first()
                .map(|&status| Self::BmpEndAck { status })
                .unwrap_or(Self::Unknown),
            OP_BMP_CRC => rest
                .first()
                .map(|&status| Self::BmpCrcAck { status })
                .unwrap_or(Self::Unknown),
            OP_EVENT => rest
                .first()
                .map(|&code| Self::Event(GlassesEvent::from_code(code)))
                .unwrap_or(Self::Unknown),
            _ => Self::Unknown,
        }
    }

    /// Whether this message counts as an ACK for the explicit
    /// `AckKind` set a dual-arm command may be waiting on.
    pub fn is_ack(&self) -> bool {
        matches!(
            self,
            Self::TextAck { status: STATUS_ACK }
                | Self::BmpEndAck { status: STATUS_ACK }
                | Self::BmpCrcAck { status: STATUS_ACK }
        )
    }

    /// Whether this message is a protocol error: a formal response
    /// arrived but with a non-ACK status byte.
    pub fn is_protocol_error(&self) -> bool {
        matches!(
            self,
            Self::TextAck { status } | Self::BmpEndAck { status } | Self::BmpCrcAck { status }
            if *status != STATUS_ACK
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_text_ack() {
        let msg = ArmMessage::parse(&[OP_TEXT, STATUS_ACK]);
        assert_eq!(msg, ArmMessage::TextAck { status: STATUS_ACK });
        assert!(msg.is_ack());
    }

    #[test]
    fn parses_bmp_end_and_crc_ack() {
        assert!(ArmMessage::parse(&[OP_BMP_END, STATUS_ACK]).is_ack());
        assert!(ArmMessage::parse(&[OP_BMP_CRC, STATUS_ACK]).is_ack());
    }

    #[test]
    fn non_ack_status_is_protocol_error() {
        let msg = ArmMessage::parse(&[OP_TEXT, 0x00]);
        assert!(!msg.is_ack());
        assert!(msg.is_protocol_error());
    }

    #[test]
    fn event_parses_dashboard_open() {
        let msg = ArmMessage::parse(&[OP_EVENT, 0x02]);
        assert_eq!(msg, ArmMessage::Event(GlassesEvent::DashboardOpen));
        assert!(!msg.is_ack());
    }

    #[test]
    fn unknown_opcode_is_unknown() {
        assert_eq!(ArmMessage::parse(&[0xFF, 0x00]), ArmMessage::Unknown);
    }

    #[test]
    fn empty_payload_is_unknown() {
        assert_eq!(ArmMessage::parse(&[]), ArmMessage::Unknown);
    }
}
