//! Host application envelope (spec.md §3, protobuf-variant payload).
//!
//! No `.proto` schema ships with this system, so rather than fabricate
//! one or pull in `prost` against a guessed schema, the envelope is
//! modelled directly as Rust enums with a small TLV encoding, carried
//! inside the same `[0xAA 0x55 Len ... Crc]` frame the raw/framed
//! variants use (see `host::framing`). This is a deliberate
//! substitution for true wire-format protobuf — see DESIGN.md.
//!
//! `destination` addresses which NUS-bearing peer a pass-through
//! message targets; today that is always the wearable, but the field
//! is carried through so a future glasses pass-through path doesn't
//! need a wire change.

use crate::config::MAX_PASSTHROUGH_PAYLOAD;
use crate::error::PassThroughStatus;
use heapless::Vec;

/// `AppToRelay{destination, messageBody}` (spec.md §3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppToRelay {
    BleConnectionStatusRead,
    DeviceInfoRead,
    ClearBondsWrite,
    DfuWrite,
    PassThroughToMouthpad(Vec<u8, MAX_PASSTHROUGH_PAYLOAD>),
}

/// `RelayToApp{…Response… | PassThroughToApp{bytes}}` (spec.md §3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayToApp {
    BleConnectionStatusResponse { connected: bool, name_len: u8 },
    DeviceInfoResponse { fw_major: u8, fw_minor: u8, fw_patch: u8 },
    ClearBondsResponse { ok: bool },
    DfuResponse { ok: bool },
    PassThroughStatusResponse(PassThroughStatus),
    PassThroughToApp(Vec<u8, MAX_PASSTHROUGH_PAYLOAD>),
}

// TLV tags for the minimal on-wire encoding (first byte of the framed
// payload), chosen to not collide with the glasses opcode space since
// they never appear on the same transport.
mod tag {
    pub const BLE_CONNECTION_STATUS_READ: u8 = 0x01;
    pub const DEVICE_INFO_READ: u8 = 0x02;
    pub const CLEAR_BONDS_WRITE: u8 = 0x03;
    pub const DFU_WRITE: u8 = 0x04;
    pub const PASS_THROUGH_TO_MOUTHPAD: u8 = 0x05;

    pub const BLE_CONNECTION_STATUS_RESPONSE: u8 = 0x81;
    pub const DEVICE_INFO_RESPONSE: u8 = 0x82;
    pub const CLEAR_BONDS_RESPONSE: u8 = 0x83;
    pub const DFU_RESPONSE: u8 = 0x84;
    pub const PASS_THROUGH_STATUS_RESPONSE: u8 = 0x85;
    pub const PASS_THROUGH_TO_APP: u8 = 0x86;
}

fn status_tag(status: PassThroughStatus) -> u8 {
    match status {
        PassThroughStatus::Ok => 0,
        PassThroughStatus::NotConnected => 1,
        PassThroughStatus::TooLarge => 2,
        PassThroughStatus::Timeout => 3,
        PassThroughStatus::Unknown => 4,
    }
}

fn status_from_tag(tag: u8) -> PassThroughStatus {
    match tag {
        0 => PassThroughStatus::Ok,
        1 => PassThroughStatus::NotConnected,
        2 => PassThroughStatus::TooLarge,
        3 => PassThroughStatus::Timeout,
        _ => PassThroughStatus::Unknown,
    }
}

impl AppToRelay {
    /// Decode a framed-payload body (the bytes already stripped of
    /// the `[0xAA 0x55 Len ... Crc]` envelope by `host::framing`).
    pub fn decode(data: &[u8]) -> Option<Self> {
        let (&t, rest) = data.split_first()?;
        match t {
            tag::BLE_CONNECTION_STATUS_READ => Some(Self::BleConnectionStatusRead),
            tag::DEVICE_INFO_READ => Some(Self::DeviceInfoRead),
            tag::CLEAR_BONDS_WRITE => Some(Self::ClearBondsWrite),
            tag::DFU_WRITE => Some(Self::DfuWrite),
            tag::PASS_THROUGH_TO_MOUTHPAD => {
                Vec::from_slice(rest).ok().map(Self::PassThroughToMouthpad)
            }
            _ => None,
        }
    }

    pub fn encode(&self, out: &mut Vec<u8, MAX_FRAMED_ENVELOPE>) -> bool {
        match self {
            Self::BleConnectionStatusRead => out.push(tag::BLE_CONNECTION_STATUS_READ).is_ok(),
            Self::DeviceInfoRead => out.push(tag::DEVICE_INFO_READ).is_ok(),
            Self::ClearBondsWrite => out.push(tag::CLEAR_BONDS_WRITE).is_ok(),
            Self::DfuWrite => out.push(tag::DFU_WRITE).is_ok(),
            Self::PassThroughToMouthpad(payload) => {
                out.push(tag::PASS_THROUGH_TO_MOUTHPAD).is_ok() && out.extend_from_slice(payload).is_ok()
            }
        }
    }
}

/// Largest envelope we ever encode/decode: 1 tag byte + the largest
/// carried payload.
pub const MAX_FRAMED_ENVELOPE: usize = MAX_PASSTHROUGH_PAYLOAD + 1;

impl RelayToApp {
    pub fn decode(data: &[u8]) -> Option<Self> {
        let (&t, rest) = data.split_first()?;
        match t {
            tag::BLE_CONNECTION_STATUS_RESPONSE => {
                let connected = *rest.first()? != 0;
                let name_len = *rest.get(1)?;
                Some(Self::BleConnectionStatusResponse { connected, name_len })
            }
            tag::DEVICE_INFO_RESPONSE => Some(Self::DeviceInfoResponse {
                fw_major: *rest.first()?,
                fw_minor: *rest.get(1)?,
                fw_patch: *rest.get(2)?,
            }),
            tag::CLEAR_BONDS_RESPONSE => Some(Self::ClearBondsResponse { ok: *rest.first()? != 0 }),
            tag::DFU_RESPONSE => Some(Self::DfuResponse { ok: *rest.first()? != 0 }),
            tag::PASS_THROUGH_STATUS_RESPONSE => {
                Some(Self::PassThroughStatusResponse(status_from_tag(*rest.first()?)))
            }
            tag::PASS_THROUGH_TO_APP => Vec::from_slice(rest).ok().map(Self::PassThroughToApp),
            _ => None,
        }
    }

    pub fn encode(&self, out: &mut Vec<u8, MAX_FRAMED_ENVELOPE>) -> bool {
        match self {
            Self::BleConnectionStatusResponse { connected, name_len } => {
                out.push(tag::BLE_CONNECTION_STATUS_RESPONSE).is_ok()
                    && out.push(*connected as u8).is_ok()
                    && out.push(*name_len).is_ok()
            }
            Self::DeviceInfoResponse { fw_major, fw_minor, fw_patch } => {
                out.push(tag::DEVICE_INFO_RESPONSE).is_ok()
                    && out.push(*fw_major).is_ok()
                    && out.push(*fw_minor).is_ok()
                    && out.push(*fw_patch).is_ok()
            }
            Self::ClearBondsResponse { ok } => {
                out.push(tag::CLEAR_BONDS_RESPONSE).is_ok() && out.push(*ok as u8).is_ok()
            }
            Self::DfuResponse { ok } => {
                out.push(tag::DFU_RESPONSE).is_ok() && out.push(*ok as u8).is_ok()
            }
            Self::PassThroughStatusResponse(status) => {
                out.push(tag::PASS_THROUGH_STATUS_RESPONSE).is_ok() && out.push(status_tag(*status)).is_ok()
            }
            Self::PassThroughToApp(payload) => {
                out.push(tag::PASS_THROUGH_TO_APP).is_ok() && out.extend_from_slice(payload).is_ok()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clear_bonds_write_round_trips() {
        let msg = AppToRelay::ClearBondsWrite;
        let mut buf = Vec::new();
        assert!(msg.encode(&mut buf));
        assert_eq!(AppToRelay::decode(&buf), Some(msg));
    }

    #[test]
    fn pass_through_to_mouthpad_round_trips() {
        let payload = Vec::from_slice(b"hello").unwrap();
        let msg = AppToRelay::PassThroughToMouthpad(payload);
        let mut buf = Vec::new();
        assert!(msg.encode(&mut buf));
        assert_eq!(AppToRelay::decode(&buf), Some(msg));
    }

    #[test]
    fn device_info_response_round_trips() {
        let msg = RelayToApp::DeviceInfoResponse { fw_major: 1, fw_minor: 2, fw_patch: 3 };
        let mut buf = Vec::new();
        assert!(msg.encode(&mut buf));
        assert_eq!(RelayToApp::decode(&buf), Some(msg));
    }

    #[test]
    fn pass_through_status_response_round_trips() {
        let msg = RelayToApp::PassThroughStatusResponse(PassThroughStatus::NotConnected);
        let mut buf = Vec::new();
        assert!(msg.encode(&mut buf));
        assert_eq!(RelayToApp::decode(&buf), Some(msg));
    }

    #[test]
    fn unknown_tag_fails_to_decode() {
        assert_eq!(AppToRelay::decode(&[0xFF]), None);
        assert_eq!(RelayToApp::decode(&[0xFF]), None);
    }

    #[test]
    fn empty_input_fails_to_decode() {
        assert_eq!(AppToRelay::decode(&[]), None);
    }
}
