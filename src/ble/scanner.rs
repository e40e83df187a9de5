//! BLE GAP scanner (spec.md §4.1/§4.2).
//!
//! Runs in one of two modes: **open scan**, which reports every
//! advertisement that classifies to a known `DeviceKind`, and **smart
//! scan**, which only reports advertisements for kinds the registry
//! still has room/need for (an unbonded wearable, or either missing
//! glasses arm). `ble::central` stops calling this once the wearable
//! and both glasses arms are connected.

use crate::ble::classifier::{classify, parse_adv_record, DeviceKind, DEFAULT_CLASSIFIER_CONFIG};
use crate::ble::registry::Registry;
use crate::config::BLE_MAX_DISCOVERED;
use crate::error::{BleError, Error};
use core::sync::atomic::{AtomicBool, Ordering};
use defmt::{info, warn};
use heapless::Vec;
use nrf_softdevice::ble::{central, Address};
use nrf_softdevice::Softdevice;

/// The SoftDevice only supports one active scan procedure; `central_task`'s
/// adoption loop and `telemetry::refresh_forever` both call `scan()` off
/// independent timers and would otherwise race. Whichever call wins the
/// flag owns the SoftDevice's scanner until its pass completes; the other
/// sees `ScanBusy` and retries on its own schedule (spec.md §4.1).
static SCAN_OWNER: AtomicBool = AtomicBool::new(false);

/// RAII guard releasing `SCAN_OWNER` when a scan pass finishes, including
/// on early return via `?`.
struct ScanOwnerGuard;

impl Drop for ScanOwnerGuard {
    fn drop(&mut self) {
        SCAN_OWNER.store(false, Ordering::Release);
    }
}

fn try_acquire_scan_owner() -> Option<ScanOwnerGuard> {
    SCAN_OWNER
        .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
        .ok()
        .map(|_| ScanOwnerGuard)
}

/// Whether the scanner reports everything it classifies, or only what
/// the registry currently needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanMode {
    Open,
    Smart,
}

/// A single classified, not-yet-connected advertisement.
#[derive(Clone)]
pub struct ScanHit {
    pub address: Address,
    pub kind: DeviceKind,
    pub rssi: i8,
}

/// Whether `kind` is still wanted, given what the registry already
/// holds. Mirrors `Registry::need_glasses_pair` for the glasses arms
/// and treats the wearable slot as wanted until filled.
fn still_wanted(registry: &Registry, kind: DeviceKind) -> bool {
    match kind {
        DeviceKind::Wearable => !registry.has_kind(DeviceKind::Wearable),
        DeviceKind::GlassesLeft => !registry.has_kind(DeviceKind::GlassesLeft) && registry.need_glasses_pair(),
        DeviceKind::GlassesRight => {
            !registry.has_kind(DeviceKind::GlassesRight) && registry.need_glasses_pair()
        }
        DeviceKind::GenericUart => true,
        DeviceKind::Unknown => false,
    }
}

/// Run one scan pass. Stops when the SoftDevice's internal scan
/// window elapses or the discovered-device buffer fills.
pub async fn scan(
    sd: &Softdevice,
    mode: ScanMode,
    registry: &Registry,
) -> Result<Vec<ScanHit, BLE_MAX_DISCOVERED>, Error> {
    let _owner = try_acquire_scan_owner().ok_or(Error::Ble(BleError::ScanBusy))?;

    info!("BLE scan starting (mode={})", if mode == ScanMode::Open { "open" } else { "smart" });

    let mut found: Vec<ScanHit, BLE_MAX_DISCOVERED> = Vec::new();
    let config = central::ScanConfig { active: true, ..Default::default() };

    let scan_result = central::scan(sd, &config, |params| {
        let data = unsafe { core::slice::from_raw_parts(params.data.p_data, params.data.len as usize) };
        let record = parse_adv_record(data, &DEFAULT_CLASSIFIER_CONFIG);
        let kind = classify(&record, &DEFAULT_CLASSIFIER_CONFIG);
        if kind == DeviceKind::Unknown {
            return if found.is_full() { Some(()) } else { None };
        }
        if mode == ScanMode::Smart && !still_wanted(registry, kind) {
            return if found.is_full() { Some(()) } else { None };
        }
        let address = Address::from_raw(params.peer_addr);
        let already_seen = found.iter().any(|h| h.address == address);
        if !already_seen && !found.is_full() {
            let _ = found.push(ScanHit { address, kind, rssi: params.rssi });
        }
        if found.is_full() {
            Some(())
        } else {
            None
        }
    })
    .await;

    if scan_result.is_err() {
        warn!("BLE scan ended with error");
        return Err(Error::Ble(BleError::ScanFailed));
    }

    info!("BLE scan complete - {} classified devices", found.len());
    Ok(found)
}
