//! Unified error type for the bridge firmware.
//!
//! We avoid `alloc` - all error variants carry only fixed-size data.
//! Implements `defmt::Format` for efficient on-target logging. The
//! variant set is the taxonomy of spec.md §7, used consistently at every
//! layer: leaf drivers return `BleError`/raw codes, clients translate
//! them into `Error`, user-visible surfaces (CDC `version`/`device`,
//! pass-through status bytes) render a compact status from it.

use defmt::Format;

/// Top-level error type used across the application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Format)]
pub enum Error {
    /// Transport not yet discovered/enabled (GATT service not yet found,
    /// CCCD not yet subscribed).
    NotReady,

    /// No active link of the kind the operation requires.
    NotConnected,

    /// A mutually-exclusive resource (bitmap transfer, scanner) is
    /// already in use.
    Busy,

    /// The controller returned transient back-pressure (e.g. the
    /// SoftDevice's `-EBUSY`/`NRF_ERROR_RESOURCES`). Recovery: local
    /// retry with bounded backoff.
    Congestion,

    /// An expected ACK, notification, or callback did not arrive before
    /// its deadline.
    Timeout,

    /// A peer sent a bad opcode, wrong status byte, or a CRC mismatch.
    ProtocolMismatch,

    /// Payload exceeds the relevant capacity limit (see `config`).
    Capacity,

    /// A BLE-level error surfaced from the SoftDevice.
    Ble(BleError),

    /// Unrecoverable failure (allocation failure, USB enable failure).
    /// Recovery: log and halt; the watchdog resets the device.
    Fatal,
}

/// Subset of BLE errors we propagate (keeps the enum `Copy`-friendly).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Format)]
pub enum BleError {
    /// GAP/GATT raw error code from the SoftDevice.
    Raw(u32),
    /// Scan was cancelled or could not start.
    ScanFailed,
    /// A scan is already running; the SoftDevice only supports one
    /// concurrent scan procedure.
    ScanBusy,
    /// Connection attempt failed.
    ConnectFailed,
    /// GATT discovery failed (service or characteristic not found).
    DiscoveryFailed,
    /// CCCD subscribe/notify failed.
    NotifyFailed,
    /// Security elevation (pairing/bonding) failed.
    SecurityFailed,
    /// MTU exchange failed.
    MtuFailed,
    /// Peer disconnected.
    Disconnected,
}

// Convenience conversions

impl From<BleError> for Error {
    fn from(e: BleError) -> Self {
        Error::Ble(e)
    }
}

/// Status reported back to the host app for `PassThroughToMouthpad` /
/// `PassThroughToApp` failures (spec.md §4.9).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Format)]
pub enum PassThroughStatus {
    Ok,
    NotConnected,
    TooLarge,
    Timeout,
    Unknown,
}

impl From<Error> for PassThroughStatus {
    fn from(e: Error) -> Self {
        match e {
            Error::NotConnected | Error::NotReady => PassThroughStatus::NotConnected,
            Error::Capacity => PassThroughStatus::TooLarge,
            Error::Timeout => PassThroughStatus::Timeout,
            _ => PassThroughStatus::Unknown,
        }
    }
}
