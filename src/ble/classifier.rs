//! Device-kind classification (C1), pure and host-testable.
//!
//! Classification depends only on advertisement contents, never on
//! hardware, so this module carries no BLE-stack imports and is
//! re-exported into the host test surface via `lib.rs`.
//!
//! The identification rule used to be embedded MAC/name-prefix string
//! literals scattered through the connection logic; here it is lifted
//! into a single `ClassifierConfig` table (spec.md §9 design note) so
//! it can be changed without touching `ble::central`/`ble::scanner`.

use heapless::String;

/// `{Wearable, GlassesLeft, GlassesRight, GenericUart, Unknown}`
/// (spec.md §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DeviceKind {
    Wearable,
    GlassesLeft,
    GlassesRight,
    GenericUart,
    Unknown,
}

/// The 16-bit BLE service UUIDs this system looks for in advertisement
/// data, little-endian on the wire as everywhere else in GAP AD
/// structures.
pub struct ClassifierConfig {
    /// HID-over-GATT Profile service (0x1812).
    pub hid_service_uuid: u16,
    /// Nordic UART Service 16-bit alias is nonstandard (NUS is a
    /// 128-bit vendor UUID); `has_uart_service` below matches on the
    /// full 128-bit UUID instead. This field is kept for symmetry and
    /// documents that HOGP classification is UUID-based.
    pub uart_service_uuid_128: [u8; 16],
    /// Substring marking a glasses-left advertised name, e.g. `"_L_"`.
    pub glasses_left_token: &'static str,
    /// Substring marking a glasses-right advertised name, e.g. `"_R_"`.
    pub glasses_right_token: &'static str,
}

/// Nordic UART Service UUID `6E400001-B5A3-F393-E0A9-E50E24DCCA9E`,
/// stored little-endian (least-significant octet first) as BLE GATT
/// 128-bit UUIDs are transmitted.
pub const NUS_SERVICE_UUID_128: [u8; 16] = [
    0x9E, 0xCA, 0xDC, 0x24, 0x0E, 0xE5, 0xA9, 0xE0, 0x93, 0xF3, 0xA3, 0xB5, 0x01, 0x00, 0x40, 0x6E,
];

pub const DEFAULT_CLASSIFIER_CONFIG: ClassifierConfig = ClassifierConfig {
    hid_service_uuid: 0x1812,
    uart_service_uuid_128: NUS_SERVICE_UUID_128,
    glasses_left_token: "_L_",
    glasses_right_token: "_R_",
};

/// One parsed advertisement, reduced to what classification needs.
pub struct AdvRecord {
    pub has_hid_service: bool,
    pub has_uart_service: bool,
    pub name: String<32>,
}

/// Classify an advertisement per spec.md §3:
/// "a GATT-advertised HID service UUID together with a UART service
/// UUID ⇒ `Wearable`; a UART service UUID alone plus a name matching
/// the glasses prefix with arm suffix ⇒ `GlassesLeft|Right`; UART
/// alone ⇒ `GenericUart`; otherwise `Unknown`."
pub fn classify(adv: &AdvRecord, config: &ClassifierConfig) -> DeviceKind {
    if adv.has_hid_service && adv.has_uart_service {
        return DeviceKind::Wearable;
    }
    if adv.has_uart_service {
        if adv.name.as_str().contains(config.glasses_left_token) {
            return DeviceKind::GlassesLeft;
        }
        if adv.name.as_str().contains(config.glasses_right_token) {
            return DeviceKind::GlassesRight;
        }
        return DeviceKind::GenericUart;
    }
    DeviceKind::Unknown
}

/// Scan advertisement data (the raw AD-structure byte stream) for a
/// given 16-bit service UUID, checking both Complete (0x03) and
/// Incomplete (0x02) 16-bit UUID list AD types.
pub fn contains_16bit_service_uuid(data: &[u8], uuid: u16) -> bool {
    let target = uuid.to_le_bytes();
    let mut i = 0;
    while i < data.len() {
        let len = data[i] as usize;
        if len == 0 || i + len >= data.len() {
            break;
        }
        let ad_type = data[i + 1];
        if ad_type == 0x02 || ad_type == 0x03 {
            let uuid_data = &data[i + 2..i + 1 + len];
            for chunk in uuid_data.chunks_exact(2) {
                if chunk == target {
                    return true;
                }
            }
        }
        i += len + 1;
    }
    false
}

/// Scan advertisement data for a given 128-bit service UUID (Complete
/// 0x07 / Incomplete 0x06 AD types).
pub fn contains_128bit_service_uuid(data: &[u8], uuid: &[u8; 16]) -> bool {
    let mut i = 0;
    while i < data.len() {
        let len = data[i] as usize;
        if len == 0 || i + len >= data.len() {
            break;
        }
        let ad_type = data[i + 1];
        if ad_type == 0x06 || ad_type == 0x07 {
            let uuid_data = &data[i + 2..i + 1 + len];
            for chunk in uuid_data.chunks_exact(16) {
                if chunk == uuid {
                    return true;
                }
            }
        }
        i += len + 1;
    }
    false
}

/// Extract `CompleteLocalName` (0x09) / `ShortenedLocalName` (0x08)
/// from advertisement data, defaulting to `"Unknown"`.
pub fn extract_device_name(data: &[u8]) -> String<32> {
    let mut i = 0;
    while i < data.len() {
        let len = data[i] as usize;
        if len == 0 || i + len >= data.len() {
            break;
        }
        let ad_type = data[i + 1];
        if ad_type == 0x08 || ad_type == 0x09 {
            let name_bytes = &data[i + 2..i + 1 + len];
            let mut name = String::new();
            for &b in name_bytes {
                if name.push(b as char).is_err() {
                    break;
                }
            }
            return name;
        }
        i += len + 1;
    }

    let mut s = String::new();
    let _ = s.push_str("Unknown");
    s
}

/// Build an `AdvRecord` directly from raw advertisement bytes, the
/// entry point `ble::scanner` calls for each received advertisement.
pub fn parse_adv_record(data: &[u8], config: &ClassifierConfig) -> AdvRecord {
    AdvRecord {
        has_hid_service: contains_16bit_service_uuid(data, config.hid_service_uuid),
        has_uart_service: contains_128bit_service_uuid(data, &config.uart_service_uuid_128),
        name: extract_device_name(data),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adv(hid: bool, uart: bool, name: &str) -> AdvRecord {
        let mut n = String::new();
        let _ = n.push_str(name);
        AdvRecord {
            has_hid_service: hid,
            has_uart_service: uart,
            name: n,
        }
    }

    #[test]
    fn hid_plus_uart_is_wearable() {
        let kind = classify(&adv(true, true, "MouthPad-ABC"), &DEFAULT_CLASSIFIER_CONFIG);
        assert_eq!(kind, DeviceKind::Wearable);
    }

    #[test]
    fn uart_plus_left_token_is_glasses_left() {
        let kind = classify(&adv(false, true, "Frame_L_1234"), &DEFAULT_CLASSIFIER_CONFIG);
        assert_eq!(kind, DeviceKind::GlassesLeft);
    }

    #[test]
    fn uart_plus_right_token_is_glasses_right() {
        let kind = classify(&adv(false, true, "Frame_R_1234"), &DEFAULT_CLASSIFIER_CONFIG);
        assert_eq!(kind, DeviceKind::GlassesRight);
    }

    #[test]
    fn uart_only_without_arm_token_is_generic_uart() {
        let kind = classify(&adv(false, true, "SomeUartDevice"), &DEFAULT_CLASSIFIER_CONFIG);
        assert_eq!(kind, DeviceKind::GenericUart);
    }

    #[test]
    fn neither_service_is_unknown() {
        let kind = classify(&adv(false, false, "Anything"), &DEFAULT_CLASSIFIER_CONFIG);
        assert_eq!(kind, DeviceKind::Unknown);
    }

    #[test]
    fn hid_without_uart_is_not_wearable() {
        // A plain HID peripheral (keyboard/mouse) with no NUS is not
        // classified as the wearable: HOGP alone doesn't carry the
        // glasses/dongle's UART transport.
        let kind = classify(&adv(true, false, "Bluetooth Mouse"), &DEFAULT_CLASSIFIER_CONFIG);
        assert_eq!(kind, DeviceKind::Unknown);
    }

    #[test]
    fn detect_hid_uuid_little_endian() {
        let ad_data = [0x03, 0x03, 0x12, 0x18];
        assert!(contains_16bit_service_uuid(&ad_data, 0x1812));
    }

    #[test]
    fn detect_hid_uuid_incomplete_list() {
        let ad_data = [0x03, 0x02, 0x12, 0x18];
        assert!(contains_16bit_service_uuid(&ad_data, 0x1812));
    }

    #[test]
    fn no_hid_uuid_present() {
        let ad_data = [0x03, 0x03, 0x0F, 0x18];
        assert!(!contains_16bit_service_uuid(&ad_data, 0x1812));
    }

    #[test]
    fn detect_nus_128bit_uuid() {
        let mut ad_data = [0u8; 18];
        ad_data[0] = 17;
        ad_data[1] = 0x07;
        ad_data[2..18].copy_from_slice(&NUS_SERVICE_UUID_128);
        assert!(contains_128bit_service_uuid(&ad_data, &NUS_SERVICE_UUID_128));
    }

    #[test]
    fn malformed_ad_length_zero_does_not_panic() {
        let ad_data = [0x00];
        assert!(!contains_16bit_service_uuid(&ad_data, 0x1812));
        assert!(!contains_128bit_service_uuid(&ad_data, &NUS_SERVICE_UUID_128));
    }

    #[test]
    fn extract_complete_local_name() {
        let ad_data = [0x09, 0x09, b'M', b'o', b'u', b't', b'h', b'P', b'a', b'd'];
        assert_eq!(extract_device_name(&ad_data).as_str(), "MouthPad");
    }

    #[test]
    fn extract_name_defaults_to_unknown() {
        let ad_data = [0x02, 0x01, 0x06];
        assert_eq!(extract_device_name(&ad_data).as_str(), "Unknown");
    }

    #[test]
    fn parse_adv_record_builds_full_classification_input() {
        let mut ad_data = Vec::<u8>::new();
        // Complete 16-bit UUID list: HID service
        ad_data.extend_from_slice(&[0x03, 0x03, 0x12, 0x18]);
        // Complete 128-bit UUID list: NUS
        ad_data.push(17);
        ad_data.push(0x07);
        ad_data.extend_from_slice(&NUS_SERVICE_UUID_128);
        // Name
        ad_data.push(9);
        ad_data.push(0x09);
        ad_data.extend_from_slice(b"MouthPad");

        let record = parse_adv_record(&ad_data, &DEFAULT_CLASSIFIER_CONFIG);
        assert!(record.has_hid_service);
        assert!(record.has_uart_service);
        assert_eq!(record.name.as_str(), "MouthPad");
        assert_eq!(classify(&record, &DEFAULT_CLASSIFIER_CONFIG), DeviceKind::Wearable);
    }
}
