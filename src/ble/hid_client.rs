//! HID client (C6): wraps the HOGP client and routes input reports
//! verbatim to the USB HID forwarder (spec.md §4.6). Unlike the
//! teacher's typed classify/parse pipeline this never reshapes a
//! report - descriptor-mirroring means the USB side already speaks
//! the wearable's own report-ID layout, so notifications pass through
//! byte-identical.

use crate::ble::registry::{LinkFlag, LinkHandle, Registry};
use crate::error::{BleError, Error};
use crate::hid::RawHidReport;
use defmt::{info, warn};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Sender;
use nrf_softdevice::ble::{gatt_client, Connection};

/// nrf-softdevice GATT client struct for the HID-over-GATT service.
#[nrf_softdevice::gatt_client(uuid = "1812")]
pub struct HidServiceClient {
    #[characteristic(uuid = "2a4d", read, notify)]
    pub hid_report: [u8; 20],

    #[characteristic(uuid = "2a4e", read, write)]
    pub protocol_mode: u8,
}

/// Discover the HID service and subscribe to report notifications.
/// Marks the link `HidReady` in the registry on success.
pub async fn discover_and_subscribe(
    conn: &Connection,
    handle: LinkHandle,
    registry: &mut Registry,
) -> Result<HidServiceClient, Error> {
    info!("discovering HID service on handle {}", handle);

    let client: HidServiceClient =
        gatt_client::discover(conn).await.map_err(|_| Error::Ble(BleError::DiscoveryFailed))?;

    if client.protocol_mode_write(&1u8).await.is_err() {
        warn!("could not set HID report protocol mode");
    }

    client.hid_report_cccd_write(true).await.map_err(|_| Error::Ble(BleError::NotifyFailed))?;

    let _ = registry.set_flag(handle, LinkFlag::HidReady, true);
    info!("HID link {} ready", handle);
    Ok(client)
}

/// Run the notification loop until the connection drops, forwarding
/// every recognised report verbatim to the USB HID forwarder's queue.
/// Unrecognised report IDs are dropped rather than guessed at.
pub async fn run_notification_loop(
    conn: &Connection,
    client: &HidServiceClient,
    forward_tx: &Sender<'_, CriticalSectionRawMutex, RawHidReport, 16>,
) {
    info!("HID notification loop started");

    let _ = gatt_client::run(conn, client, |event| match event {
        HidServiceClientEvent::HidReportNotification(data) => {
            if let Some(report) = RawHidReport::from_notification(&data) {
                if forward_tx.try_send(report).is_err() {
                    warn!("HID forward queue full - dropping report");
                }
            }
        }
    })
    .await;

    info!("HID notification loop ended (connection closed)");
}
