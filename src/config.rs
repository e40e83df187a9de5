//! Application-wide constants and compile-time configuration.
//!
//! All timing parameters, protocol limits, and the BLE/USB identity
//! strings live here so they can be tuned in one place.

// ═══════════════════════════════════════════════════════════════════════════
// BLE central
// ═══════════════════════════════════════════════════════════════════════════

/// Maximum simultaneous BLE links: one wearable + two glasses arms, plus
/// one spare slot (spec.md §3: "N=4 suffices").
pub const MAX_LINKS: usize = 4;

/// Maximum BLE peripherals remembered from a single scan pass.
pub const BLE_MAX_DISCOVERED: usize = 8;

/// BLE connection interval range (1.25 ms units). 6 = 7.5 ms.
pub const BLE_CONN_INTERVAL_MIN: u16 = 6;
pub const BLE_CONN_INTERVAL_MAX: u16 = 12;

/// BLE slave latency (connection events the peripheral may skip).
pub const BLE_SLAVE_LATENCY: u16 = 0;

/// BLE supervision timeout (10 ms units). 400 = 4 s.
pub const BLE_SUP_TIMEOUT: u16 = 400;

/// Settling delay after stopping the scanner and before issuing
/// `bt_conn_le_create`, per spec.md §4.4 step 2.
pub const SCAN_STOP_SETTLE_MS: u64 = 100;

/// Minimum spacing between connection attempts to the same arm, to avoid
/// attempt spam (spec.md §4.4 edge-case policy).
pub const CONNECT_ATTEMPT_COOLDOWN_MS: u64 = 2_000;

/// Ceiling on the whole dual-arm adoption process before the FSM gives up
/// and resumes scanning (spec.md §4.4).
pub const DUAL_ARM_FSM_CEILING_SECS: u64 = 30;

// ═══════════════════════════════════════════════════════════════════════════
// USB identity
// ═══════════════════════════════════════════════════════════════════════════

/// USB VID/PID - "pid.codes" open-source test VID.
/// Replace with an allocated VID/PID before shipping hardware.
pub const USB_VID: u16 = 0x1209;
pub const USB_PID: u16 = 0x0001;

pub const USB_MANUFACTURER: &str = "Augmental Tech";
pub const USB_PRODUCT: &str = "MouthPad^USB";
pub const USB_SERIAL_NUMBER: &str = "000001";

/// USB HID polling interval (ms). 1 ms = 1000 Hz for lowest latency.
pub const USB_HID_POLL_MS: u8 = 1;

/// Firmware version, `MAJOR.MINOR.PATCH`, mirrored from the `VERSION` file
/// at the repository root. Kept as constants (rather than read by
/// `build.rs`) so `bcdDevice` and the `version` CDC command agree at
/// compile time without extra build-script plumbing.
pub const FW_VERSION_MAJOR: u8 = 0;
pub const FW_VERSION_MINOR: u8 = 1;
pub const FW_VERSION_PATCH: u8 = 0;

/// Encode `MAJOR.MINOR.PATCH` into the USB `bcdDevice` field as `0xMMNP`
/// (open question #2 in SPEC_FULL.md: we take the spec's stated lean that
/// `bcdDevice` must match `VERSION` exactly, not a subset).
pub const fn usb_bcd_device() -> u16 {
    ((FW_VERSION_MAJOR as u16) << 8) | ((FW_VERSION_MINOR as u16) << 4) | (FW_VERSION_PATCH as u16 & 0x0F)
}

// ═══════════════════════════════════════════════════════════════════════════
// Capacity limits (spec.md §7 "Capacity" error class)
// ═══════════════════════════════════════════════════════════════════════════

/// Maximum payload of a framed host-CDC packet.
pub const MAX_FRAMED_PAYLOAD: usize = 64;

/// Maximum payload forwarded through `PassThroughToMouthpad`/`PassThroughToApp`.
pub const MAX_PASSTHROUGH_PAYLOAD: usize = 240;

/// Maximum UTF-8 glyph payload in one glasses text packet.
pub const MAX_TEXT_GLYPH_PAYLOAD: usize = 180;

/// Maximum payload bytes in one bitmap chunk packet.
pub const MAX_BITMAP_CHUNK_PAYLOAD: usize = 194;

// ═══════════════════════════════════════════════════════════════════════════
// Glasses protocol engine (C10)
// ═══════════════════════════════════════════════════════════════════════════

/// Command queue capacity (ring buffer, spec.md §3).
pub const GLASSES_QUEUE_CAPACITY: usize = 8;

/// Per-command ACK timeout.
pub const GLASSES_COMMAND_TIMEOUT_MS: u64 = 2_000;

/// Per-arm bitmap packet retry budget before giving up on that arm.
pub const BITMAP_MAX_RETRIES: u8 = 3;

/// Heartbeat check period.
pub const HEARTBEAT_PERIOD_SECS: u64 = 8;

/// Activity age beyond which a heartbeat is sent.
pub const HEARTBEAT_ACTIVITY_THRESHOLD_SECS: u64 = 6;

/// Glasses display width/height for the canonical bitmap asset.
pub const GLASSES_DISPLAY_WIDTH: usize = 576;
pub const GLASSES_DISPLAY_HEIGHT: usize = 135;

/// Four-byte destination address the glasses firmware expects prefixed to
/// the first bitmap chunk (spec.md GLOSSARY: "Bitmap address").
pub const BITMAP_ADDRESS: [u8; 4] = [0x00, 0x1C, 0x00, 0x00];

/// Largest raw bitmap payload the transfer FSM will hold at once:
/// `576 * 135` monochrome pixels packed 8 per byte.
pub const GLASSES_BITMAP_MAX_BYTES: usize = (GLASSES_DISPLAY_WIDTH * GLASSES_DISPLAY_HEIGHT) / 8;

// ═══════════════════════════════════════════════════════════════════════════
// Status/telemetry (C11)
// ═══════════════════════════════════════════════════════════════════════════

/// RSSI poll period per active link.
pub const RSSI_POLL_PERIOD_SECS: u64 = 2;

/// Activity window used by the "data within last N ms" flag.
pub const ACTIVITY_WINDOW_MS: u64 = 100;

/// Battery client periodic-read fallback interval, used when the peer
/// does not support notifications.
pub const BATTERY_POLL_PERIOD_SECS: u64 = 10;

// ═══════════════════════════════════════════════════════════════════════════
// Bond store (C2)
// ═══════════════════════════════════════════════════════════════════════════

/// Flash page size for nRF52840 (4 KB).
pub const FLASH_PAGE_SIZE: u32 = 4096;

/// Flash page index where the bond record starts.
pub const STORAGE_FLASH_PAGE_START: u32 = 240;

/// Number of flash pages reserved for the bond record.
pub const STORAGE_FLASH_PAGE_COUNT: u32 = 4;
