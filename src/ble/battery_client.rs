//! Battery client (C7): Battery Service discovery, notify-preferred
//! with periodic-read fallback, and a level→color mapping helper for
//! the status line (spec.md §4.7). New module; grounded in the
//! teacher's `hid_client.rs` discovery/subscribe shape, generalized to
//! the standard Battery Service (0x180F) instead of HOGP.

use crate::ble::registry::{LinkFlag, LinkHandle, Registry};
use crate::config::BATTERY_POLL_PERIOD_SECS;
use crate::error::{BleError, Error};
use defmt::{info, warn};
use embassy_time::{Duration, Timer};
use nrf_softdevice::ble::{gatt_client, Connection};

#[nrf_softdevice::gatt_client(uuid = "180f")]
pub struct BatteryServiceClient {
    #[characteristic(uuid = "2a19", read, notify)]
    pub battery_level: u8,
}

/// `level()→0..100|Invalid` (spec.md §4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatteryLevel {
    Percent(u8),
    Invalid,
}

/// Color-mapping mode for the status line's battery glyph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorMode {
    Discrete,
    Gradient,
}

/// RGB triple for a status-line battery indicator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rgb(pub u8, pub u8, pub u8);

const RED: Rgb = Rgb(255, 0, 0);
const YELLOW: Rgb = Rgb(255, 200, 0);
const GREEN: Rgb = Rgb(0, 200, 0);

/// `color(mode)→RGB`. `Discrete` buckets into red/yellow/green bands;
/// `Gradient` linearly interpolates red→green across 0..100.
pub fn color(level: BatteryLevel, mode: ColorMode) -> Rgb {
    let percent = match level {
        BatteryLevel::Percent(p) => p.min(100),
        BatteryLevel::Invalid => return Rgb(64, 64, 64),
    };
    match mode {
        ColorMode::Discrete => {
            if percent <= 20 {
                RED
            } else if percent <= 50 {
                YELLOW
            } else {
                GREEN
            }
        }
        ColorMode::Gradient => {
            let t = percent as u32;
            let r = (255 - (255 * t) / 100) as u8;
            let g = ((200 * t) / 100) as u8;
            Rgb(r, g, 0)
        }
    }
}

/// Discover the Battery Service. Prefers notifications; if CCCD
/// subscribe fails the caller should fall back to
/// `poll_forever`'s periodic read instead.
pub async fn discover(
    conn: &Connection,
    handle: LinkHandle,
    registry: &mut Registry,
) -> Result<(BatteryServiceClient, bool), Error> {
    let client: BatteryServiceClient =
        gatt_client::discover(conn).await.map_err(|_| Error::Ble(BleError::DiscoveryFailed))?;

    let notify_ok = client.battery_level_cccd_write(true).await.is_ok();
    if !notify_ok {
        warn!("battery notify subscribe failed on handle {}, falling back to polling", handle);
    }
    let _ = registry.set_flag(handle, LinkFlag::BasReady, true);
    Ok((client, notify_ok))
}

/// Periodic-read fallback loop (~`BATTERY_POLL_PERIOD_SECS`). Only
/// needed when `discover` couldn't establish notifications; runs
/// until the connection drops.
pub async fn poll_forever(client: &BatteryServiceClient, on_level: impl Fn(BatteryLevel)) -> ! {
    loop {
        match client.battery_level_read().await {
            Ok(raw) if raw <= 100 => on_level(BatteryLevel::Percent(raw)),
            Ok(_) => on_level(BatteryLevel::Invalid),
            Err(_) => {
                info!("battery read failed, will retry next poll");
                on_level(BatteryLevel::Invalid);
            }
        }
        Timer::after(Duration::from_secs(BATTERY_POLL_PERIOD_SECS)).await;
    }
}
