//! MouthPad^USB bridge firmware entry point.
//!
//! Wires together the pure logic modules exported by the `mouthpad_bridge`
//! library crate with the embedded-only BLE/USB/flash glue: the central
//! controller adopts the wearable and both glasses arms (spec.md §4.1-4.4),
//! forwards the wearable's HID/Battery services to USB and the NUS
//! pass-through to the CDC data port (§4.6-4.9), and drives the glasses
//! protocol engine over the two glasses arms' NUS links (§4.10-4.11).
//!
//! ## Async tasks (Embassy)
//!
//! | Task                 | Responsibility                                      |
//! |----------------------|------------------------------------------------------|
//! | `softdevice_task`    | Runs the Nordic SoftDevice event loop                |
//! | `central_task`       | Scan / adopt the wearable + dual-arm glasses pair    |
//! | `wearable_link_task` | Connect, secure, discover HID/BAS/NUS on the wearable|
//! | `glasses_link_task`  | Connect, secure, discover NUS on one glasses arm     |
//! | `usb_device_task`    | USB enumeration and endpoint servicing                |
//! | `hid_forward_task`   | BLE HID reports → USB HID writer                      |
//! | `cdc_data_task`      | CDC data port ↔ wearable NUS pass-through              |
//! | `cdc_command_task`   | CDC log/command port line parsing                     |
//! | `command_handler_task` | Acts on parsed CDC commands                          |
//! | `glasses_task`       | Drives `GlassesEngine` over both arms' NUS links      |
//! | `telemetry_task`     | Periodic RSSI refresh scan                            |

#![no_std]
#![no_main]

use defmt::{info, unwrap, warn};
use defmt_rtt as _; // global logger
use panic_probe as _; // panic handler → defmt

use embassy_executor::Spawner;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use embassy_sync::mutex::Mutex;
use embassy_time::{Duration, Instant, Timer};
use embassy_usb::class::cdc_acm::CdcAcmClass;
use embassy_usb::class::hid::HidWriter;
use embassy_usb::UsbDevice;
use heapless::Vec;
use nrf_softdevice::ble::{gatt_client, Connection};
use nrf_softdevice::Softdevice;
use static_cell::StaticCell;

use mouthpad_bridge::ble::battery_client::{self, BatteryLevel};
use mouthpad_bridge::ble::central::{self, Bonder};
use mouthpad_bridge::ble::classifier::DeviceKind;
use mouthpad_bridge::ble::hid_client;
use mouthpad_bridge::ble::nus_client::{NusClientTable, NusServiceClient, NusServiceClientEvent};
use mouthpad_bridge::ble::registry::{LinkHandle, Registry};
use mouthpad_bridge::ble::scanner::ScanHit;
use mouthpad_bridge::config::{CONNECT_ATTEMPT_COOLDOWN_MS, MAX_LINKS, MAX_PASSTHROUGH_PAYLOAD};
use mouthpad_bridge::glasses::bitmap::Arm;
use mouthpad_bridge::glasses::engine::GlassesEngine;
use mouthpad_bridge::hid::RawHidReport;
use mouthpad_bridge::host::commands::CdcCommand;
use mouthpad_bridge::host::bridge;
use mouthpad_bridge::storage::BOND_STORE;
use mouthpad_bridge::telemetry;
use mouthpad_bridge::usb::hid_device::{self, UsbDriver};

/// Maximum single NUS notification payload, matching the characteristic
/// width declared in `nus_client::NusServiceClient`.
const MAX_NUS_PAYLOAD: usize = 244;

static REGISTRY: Mutex<CriticalSectionRawMutex, Registry> = Mutex::new(Registry::new());
static NUS_TABLE: Mutex<CriticalSectionRawMutex, NusClientTable> = Mutex::new(NusClientTable::new());
static DUAL_ARM: Mutex<CriticalSectionRawMutex, central::DualArmController> =
    Mutex::new(central::DualArmController::new());
static CONNECTIONS: Mutex<CriticalSectionRawMutex, Vec<(LinkHandle, Connection), MAX_LINKS>> =
    Mutex::new(Vec::new());

static BONDER: StaticCell<Bonder> = StaticCell::new();

/// Wearable HID reports bound for the USB HID forwarder.
static HID_FORWARD_CHANNEL: Channel<CriticalSectionRawMutex, RawHidReport, 16> = Channel::new();
/// CDC data port → wearable NUS pass-through.
static CDC_TO_WEARABLE: Channel<CriticalSectionRawMutex, Vec<u8, MAX_PASSTHROUGH_PAYLOAD>, 4> = Channel::new();
/// Wearable NUS notifications → CDC data port.
static CDC_FROM_WEARABLE: Channel<CriticalSectionRawMutex, Vec<u8, MAX_PASSTHROUGH_PAYLOAD>, 4> = Channel::new();
/// CDC command/log port → command handler.
static CDC_COMMANDS: Channel<CriticalSectionRawMutex, CdcCommand, 2> = Channel::new();
/// Glasses-arm NUS notifications → the glasses engine task: `(from_left, bytes)`.
static GLASSES_NOTIFY_CHANNEL: Channel<CriticalSectionRawMutex, (bool, Vec<u8, MAX_NUS_PAYLOAD>), 8> = Channel::new();

fn softdevice_config() -> nrf_softdevice::Config {
    nrf_softdevice::Config {
        clock: Some(nrf_softdevice::raw::nrf_clock_lf_cfg_t {
            source: nrf_softdevice::raw::NRF_CLOCK_LF_SRC_RC as u8,
            rc_ctiv: 16,
            rc_temp_ctiv: 2,
            accuracy: nrf_softdevice::raw::NRF_CLOCK_LF_ACCURACY_500_PPM as u8,
        }),
        conn_gap: Some(nrf_softdevice::raw::ble_gap_conn_cfg_t {
            conn_count: MAX_LINKS as u8,
            event_length: 24,
        }),
        conn_gatt: Some(nrf_softdevice::raw::ble_gatt_conn_cfg_t { att_mtu: 247 }),
        gap_role_count: Some(nrf_softdevice::raw::ble_gap_cfg_role_count_t {
            adv_set_count: 0,     // we don't advertise
            periph_role_count: 0, // we don't act as peripheral
            central_role_count: MAX_LINKS as u8,
            central_sec_count: MAX_LINKS as u8,
            _bitfield_1: nrf_softdevice::raw::ble_gap_cfg_role_count_t::new_bitfield_1(0),
        }),
        ..Default::default()
    }
}

/// Drop a link's state from every shared table on disconnect/failure, and
/// release the dual-arm FSM if this was the arm it was bringing up.
async fn cleanup_link(handle: LinkHandle) {
    let _ = REGISTRY.lock().await.remove(handle);
    NUS_TABLE.lock().await.remove(handle);
    {
        let mut conns = CONNECTIONS.lock().await;
        if let Some(pos) = conns.iter().position(|(h, _)| *h == handle) {
            conns.remove(pos);
        }
    }
    {
        let mut dual_arm = DUAL_ARM.lock().await;
        if dual_arm.is_pending(handle) {
            dual_arm.reset();
        }
    }
    info!("link {} cleaned up", handle);
}

/// Serialize `handle`'s queued NUS discovery through the shared table,
/// waiting for its turn in the FIFO.
async fn discover_nus(handle: LinkHandle, conn: &Connection) {
    let _ = NUS_TABLE.lock().await.add(handle);
    loop {
        if NUS_TABLE.lock().await.should_discover_now(handle) {
            break;
        }
        Timer::after(Duration::from_millis(20)).await;
    }
    if let Err(e) = NUS_TABLE.lock().await.discover(handle, conn).await {
        warn!("NUS discovery failed on handle {}: {:?}", handle, e);
    }
}

/// Pump `CDC_TO_WEARABLE`/glasses engine sends into `handle`'s NUS RX
/// characteristic via the shared table. Runs until the connection drops.
async fn run_nus_send_pump(
    handle: LinkHandle,
    conn: &Connection,
    rx: embassy_sync::channel::Receiver<'static, CriticalSectionRawMutex, Vec<u8, MAX_PASSTHROUGH_PAYLOAD>, 4>,
) -> ! {
    loop {
        let bytes = rx.receive().await;
        if let Err(e) = NUS_TABLE.lock().await.send(handle, conn, &bytes).await {
            warn!("NUS send to handle {} failed: {:?}", handle, e);
        }
    }
}

/// Run a dedicated (duplicate-discovered) NUS TX-notification loop for
/// `handle`, forwarding every notification through `on_notify`. A second,
/// independent discovery is cheaper than serializing every link's receive
/// path behind the shared `NusClientTable`'s single mutex for the whole
/// connection lifetime.
async fn run_nus_receive(conn: &Connection, on_notify: impl Fn(&[u8])) {
    let client: NusServiceClient = match gatt_client::discover(conn).await {
        Ok(c) => c,
        Err(_) => {
            warn!("NUS receive-side discovery failed");
            return;
        }
    };
    if client.tx_cccd_write(true).await.is_err() {
        warn!("NUS receive-side CCCD subscribe failed");
        return;
    }
    let _ = gatt_client::run(conn, &client, |event| match event {
        NusServiceClientEvent::TxNotification(data) => on_notify(&data),
    })
    .await;
}

#[embassy_executor::task]
async fn softdevice_task(sd: &'static Softdevice) -> ! {
    sd.run().await
}

#[embassy_executor::task]
async fn central_task(sd: &'static Softdevice, spawner: Spawner, bonder: &'static Bonder) -> ! {
    loop {
        let hit = {
            let registry = REGISTRY.lock().await;
            let mut dual_arm = DUAL_ARM.lock().await;
            central::adoption_tick(sd, &registry, &mut dual_arm).await
        };
        match hit {
            Some(hit) if hit.kind == DeviceKind::Wearable => {
                if spawner.spawn(wearable_link_task(sd, bonder, hit)).is_err() {
                    warn!("wearable link task pool exhausted");
                }
            }
            Some(hit) => {
                if spawner.spawn(glasses_link_task(sd, bonder, hit)).is_err() {
                    warn!("glasses link task pool exhausted");
                }
            }
            None => Timer::after(Duration::from_millis(CONNECT_ATTEMPT_COOLDOWN_MS / 4)).await,
        }
    }
}

#[embassy_executor::task(pool_size = 1)]
async fn wearable_link_task(sd: &'static Softdevice, bonder: &'static Bonder, hit: ScanHit) {
    const HANDLE: LinkHandle = 1;

    let conn = match central::connect_and_secure(sd, bonder, &hit).await {
        Ok(c) => c,
        Err(e) => {
            warn!("wearable connect failed: {:?}", e);
            return;
        }
    };
    info!("wearable connected, securing link");

    let record = central::link_record_from_hit(&hit, HANDLE, "");
    if REGISTRY.lock().await.insert(record).is_err() {
        warn!("wearable registry insert failed");
        let _ = conn.disconnect();
        return;
    }
    let _ = CONNECTIONS.lock().await.push((HANDLE, conn.clone()));

    match central::exchange_mtu(&conn).await {
        Ok(mtu) => {
            let _ = REGISTRY.lock().await.set_mtu(HANDLE, mtu);
        }
        Err(e) => warn!("wearable MTU exchange failed: {:?}", e),
    }

    let hid = {
        let mut registry = REGISTRY.lock().await;
        hid_client::discover_and_subscribe(&conn, HANDLE, &mut registry).await.ok()
    };
    let battery = {
        let mut registry = REGISTRY.lock().await;
        battery_client::discover(&conn, HANDLE, &mut registry).await.ok()
    };
    discover_nus(HANDLE, &conn).await;
    info!("wearable ready");

    let hid_fut = async {
        match &hid {
            Some(client) => hid_client::run_notification_loop(&conn, client, &HID_FORWARD_CHANNEL.sender()).await,
            None => core::future::pending::<()>().await,
        }
    };
    let battery_fut = async {
        match &battery {
            Some((client, notify_ok)) if !*notify_ok => {
                battery_client::poll_forever(client, |level| {
                    if let BatteryLevel::Percent(p) = level {
                        info!("wearable battery: {}%", p);
                    }
                })
                .await;
            }
            _ => core::future::pending::<()>().await,
        }
    };
    let nus_receive_fut = run_nus_receive(&conn, |data| {
        if let Ok(bytes) = Vec::from_slice(data) {
            if CDC_FROM_WEARABLE.try_send(bytes).is_err() {
                warn!("CDC from-wearable queue full, dropping");
            }
        }
    });
    let nus_send_fut = run_nus_send_pump(HANDLE, &conn, CDC_TO_WEARABLE.receiver());

    embassy_futures::select::select4(hid_fut, battery_fut, nus_receive_fut, nus_send_fut).await;

    cleanup_link(HANDLE).await;
    info!("wearable link ended");
}

#[embassy_executor::task(pool_size = 2)]
async fn glasses_link_task(sd: &'static Softdevice, bonder: &'static Bonder, hit: ScanHit) {
    let from_left = hit.kind == DeviceKind::GlassesLeft;
    let handle: LinkHandle = if from_left { 2 } else { 3 };

    let conn = match central::connect_and_secure(sd, bonder, &hit).await {
        Ok(c) => c,
        Err(e) => {
            warn!("glasses arm connect failed: {:?}", e);
            return;
        }
    };
    {
        let mut dual_arm = DUAL_ARM.lock().await;
        dual_arm.on_connected(handle);
    }
    info!("glasses arm (left={}) connected", from_left);

    let record = central::link_record_from_hit(&hit, handle, "");
    if REGISTRY.lock().await.insert(record).is_err() {
        warn!("glasses registry insert failed");
        let _ = conn.disconnect();
        return;
    }
    let _ = CONNECTIONS.lock().await.push((handle, conn.clone()));

    discover_nus(handle, &conn).await;
    {
        let mut dual_arm = DUAL_ARM.lock().await;
        dual_arm.on_discovered(handle);
    }

    match central::exchange_mtu(&conn).await {
        Ok(mtu) => {
            let _ = REGISTRY.lock().await.set_mtu(handle, mtu);
        }
        Err(e) => warn!("glasses arm MTU exchange failed: {:?}", e),
    }
    {
        let mut dual_arm = DUAL_ARM.lock().await;
        dual_arm.on_mtu_exchanged(handle);
        dual_arm.on_ready(handle);
    }
    info!("glasses arm (left={}) ready", from_left);

    let receive_fut = run_nus_receive(&conn, |data| {
        if let Ok(bytes) = Vec::from_slice(data) {
            if GLASSES_NOTIFY_CHANNEL.try_send((from_left, bytes)).is_err() {
                warn!("glasses notify queue full, dropping");
            }
        }
    });

    receive_fut.await;

    cleanup_link(handle).await;
    info!("glasses arm (left={}) link ended", from_left);
}

#[embassy_executor::task]
async fn glasses_task() -> ! {
    let mut engine = GlassesEngine::new();
    loop {
        let now_ms = Instant::now().as_millis();

        if let Some(job) = engine.poll(now_ms) {
            let kind = match job.arm {
                Arm::Left => DeviceKind::GlassesLeft,
                Arm::Right => DeviceKind::GlassesRight,
            };
            let handle = REGISTRY.lock().await.lookup_by_kind(kind).map(|l| l.handle);
            let ok = match handle {
                Some(handle) => {
                    let conns = CONNECTIONS.lock().await;
                    match conns.iter().find(|(h, _)| *h == handle) {
                        Some((_, conn)) => NUS_TABLE.lock().await.send(handle, conn, &job.bytes).await.is_ok(),
                        None => false,
                    }
                }
                None => false,
            };
            engine.on_send_result(ok);
        } else {
            let now_secs = now_ms / 1000;
            if engine.heartbeat_due(now_secs) {
                let packet = engine.build_heartbeat();
                for kind in [DeviceKind::GlassesLeft, DeviceKind::GlassesRight] {
                    let handle = REGISTRY.lock().await.lookup_by_kind(kind).map(|l| l.handle);
                    if let Some(handle) = handle {
                        let conns = CONNECTIONS.lock().await;
                        if let Some((_, conn)) = conns.iter().find(|(h, _)| *h == handle) {
                            let _ = NUS_TABLE.lock().await.send(handle, conn, &packet).await;
                        }
                    }
                }
            }
        }

        match embassy_futures::select::select(GLASSES_NOTIFY_CHANNEL.receive(), Timer::after(Duration::from_millis(20)))
            .await
        {
            embassy_futures::select::Either::First((from_left, data)) => {
                engine.on_notification(from_left, &data, now_ms);
            }
            embassy_futures::select::Either::Second(_) => {}
        }
    }
}

#[embassy_executor::task]
async fn telemetry_task(sd: &'static Softdevice) -> ! {
    telemetry::refresh_forever(sd, &REGISTRY).await
}

#[embassy_executor::task]
async fn usb_device_task(device: UsbDevice<'static, UsbDriver>) -> ! {
    hid_device::run_usb_device(device).await
}

#[embassy_executor::task]
async fn hid_forward_task(mut writer: HidWriter<'static, UsbDriver, { hid_device::MAX_WIRE_REPORT }>) -> ! {
    loop {
        let report = HID_FORWARD_CHANNEL.receive().await;
        let _ = hid_device::send(&mut writer, &report).await;
    }
}

#[cfg(feature = "host-raw")]
#[embassy_executor::task]
async fn cdc_data_task(port: CdcAcmClass<'static, UsbDriver>) -> ! {
    bridge::run_data_port(port, CDC_TO_WEARABLE.sender(), CDC_FROM_WEARABLE.receiver()).await
}

#[cfg(feature = "host-framed")]
#[embassy_executor::task]
async fn cdc_data_task(port: CdcAcmClass<'static, UsbDriver>) -> ! {
    bridge::run_data_port(port, CDC_TO_WEARABLE.sender(), CDC_FROM_WEARABLE.receiver()).await
}

#[cfg(feature = "host-protobuf")]
#[embassy_executor::task]
async fn cdc_data_task(port: CdcAcmClass<'static, UsbDriver>) -> ! {
    bridge::run_data_port(port, CDC_TO_WEARABLE.sender(), CDC_FROM_WEARABLE.receiver(), CDC_COMMANDS.sender(), || {
        REGISTRY.try_lock().map(|r| r.has_kind(DeviceKind::Wearable)).unwrap_or(false)
    })
    .await
}

#[embassy_executor::task]
async fn cdc_command_task(port: CdcAcmClass<'static, UsbDriver>) -> ! {
    bridge::run_command_port(port, CDC_COMMANDS.sender()).await
}

#[embassy_executor::task]
async fn command_handler_task(sd: &'static Softdevice) -> ! {
    loop {
        match CDC_COMMANDS.receive().await {
            CdcCommand::PrintDeviceInfo => info!(
                "fw {}.{}.{}",
                mouthpad_bridge::config::FW_VERSION_MAJOR,
                mouthpad_bridge::config::FW_VERSION_MINOR,
                mouthpad_bridge::config::FW_VERSION_PATCH
            ),
            CdcCommand::Disconnect => {
                let handle = REGISTRY.lock().await.lookup_by_kind(DeviceKind::Wearable).map(|l| l.handle);
                if let Some(handle) = handle {
                    let conns = CONNECTIONS.lock().await;
                    if let Some((_, conn)) = conns.iter().find(|(h, _)| *h == handle) {
                        let _ = conn.disconnect();
                    }
                }
            }
            CdcCommand::Reset => {
                BOND_STORE.lock().await.clear();
                let mut flash = nrf_softdevice::Flash::take(sd);
                BOND_STORE.lock().await.save_to_flash(&mut flash).await;
                info!("bond store cleared, resetting MCU");
                cortex_m::peripheral::SCB::sys_reset();
            }
            CdcCommand::Restart => {
                info!("restart requested, resetting MCU");
                cortex_m::peripheral::SCB::sys_reset();
            }
            CdcCommand::Dfu => {
                warn!("DFU requested; no bootloader handoff implemented");
            }
        }
    }
}

#[embassy_executor::main]
async fn main(spawner: Spawner) {
    info!("MouthPad^USB bridge starting");

    let mut nrf_config = embassy_nrf::config::Config::default();
    nrf_config.gpiote_interrupt_priority = embassy_nrf::interrupt::Priority::P2;
    nrf_config.time_interrupt_priority = embassy_nrf::interrupt::Priority::P2;
    let p = embassy_nrf::init(nrf_config);

    let sd = Softdevice::enable(&softdevice_config());
    unwrap!(spawner.spawn(softdevice_task(sd)));
    info!("SoftDevice started");

    let mut flash = nrf_softdevice::Flash::take(sd);
    BOND_STORE.lock().await.load_from_flash(&mut flash).await;
    drop(flash);

    let bonder: &'static Bonder = BONDER.init(Bonder::new());

    let mut builder = hid_device::new_builder(p.USBD);
    let hid = hid_device::register_hid(&mut builder);
    let cdc = bridge::init(&mut builder);
    let usb_device = hid_device::finish(builder);

    unwrap!(spawner.spawn(usb_device_task(usb_device)));
    unwrap!(spawner.spawn(hid_forward_task(hid.writer)));
    unwrap!(spawner.spawn(cdc_data_task(cdc.data)));
    unwrap!(spawner.spawn(cdc_command_task(cdc.command)));
    info!("USB composite device started (1 HID + 2 CDC ACM interfaces)");

    unwrap!(spawner.spawn(command_handler_task(sd)));
    unwrap!(spawner.spawn(central_task(sd, spawner, bonder)));
    unwrap!(spawner.spawn(glasses_task()));
    unwrap!(spawner.spawn(telemetry_task(sd)));
    info!("central/glasses/telemetry tasks started");
}
