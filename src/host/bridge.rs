//! CDC/framing bridge (C9): the two logical USB CDC ACM ports — a data
//! port (raw/framed/protobuf, selected at compile time by the
//! `host-raw`/`host-framed`/`host-protobuf` features) and a
//! line-delimited log/command port (spec.md §4.9/§6). Embedded-only;
//! line parsing itself lives in `host::commands` so it stays
//! host-testable.
//!
//! Grounded in the teacher's `usb::hid_device` task shape (one async
//! task per endpoint pumping a channel) generalised from HID reports to
//! CDC byte streams; `embassy_usb::class::cdc_acm` replaces
//! `embassy_usb::class::hid` as the endpoint wrapper.

use crate::config::MAX_PASSTHROUGH_PAYLOAD;
use crate::error::PassThroughStatus;
use crate::host::commands::{parse_command, local_reply, CdcCommand};
use crate::host::framing::{self, FeedResult, FrameDecoder};
use crate::usb::hid_device::UsbDriver;
use defmt::{info, warn};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::{Receiver, Sender};
use embassy_usb::class::cdc_acm::{CdcAcmClass, State};
use embassy_usb::driver::EndpointError;
use embassy_usb::Builder;
use heapless::{String, Vec};
use static_cell::StaticCell;

const CDC_MAX_PACKET_SIZE: u16 = 64;

static DATA_STATE: StaticCell<State> = StaticCell::new();
static COMMAND_STATE: StaticCell<State> = StaticCell::new();

pub struct CdcPorts {
    pub data: CdcAcmClass<'static, UsbDriver>,
    pub command: CdcAcmClass<'static, UsbDriver>,
}

/// Register both CDC ACM interfaces on the composite USB builder
/// (spec.md §6: "one or two CDC ACM interfaces"; both are always
/// present per SPEC_FULL.md's open-question resolution).
pub fn init(builder: &mut Builder<'static, UsbDriver>) -> CdcPorts {
    let data_state = DATA_STATE.init(State::new());
    let command_state = COMMAND_STATE.init(State::new());
    let data = CdcAcmClass::new(builder, data_state, CDC_MAX_PACKET_SIZE);
    let command = CdcAcmClass::new(builder, command_state, CDC_MAX_PACKET_SIZE);
    CdcPorts { data, command }
}

/// Data port: raw-forward variant. Every received packet is forwarded
/// byte-for-byte to the wearable's NUS RX characteristic.
#[cfg(feature = "host-raw")]
pub async fn run_data_port(
    mut port: CdcAcmClass<'static, UsbDriver>,
    to_wearable: Sender<'static, CriticalSectionRawMutex, Vec<u8, MAX_PASSTHROUGH_PAYLOAD>, 4>,
    from_wearable: Receiver<'static, CriticalSectionRawMutex, Vec<u8, MAX_PASSTHROUGH_PAYLOAD>, 4>,
) -> ! {
    loop {
        port.wait_connection().await;
        info!("CDC data port (raw) connected");
        let (mut sender, mut receiver) = port.split();
        let mut buf = [0u8; 64];
        loop {
            match embassy_futures::select::select(receiver.read_packet(&mut buf), from_wearable.receive()).await {
                embassy_futures::select::Either::First(Ok(n)) => {
                    if let Ok(bytes) = Vec::from_slice(&buf[..n]) {
                        if to_wearable.try_send(bytes).is_err() {
                            warn!("CDC raw data port: wearable send queue full, dropping");
                        }
                    }
                }
                embassy_futures::select::Either::First(Err(EndpointError::Disabled)) => break,
                embassy_futures::select::Either::First(Err(_)) => {}
                embassy_futures::select::Either::Second(bytes) => {
                    if sender.write_packet(&bytes).await.is_err() {
                        break;
                    }
                }
            }
        }
        info!("CDC data port (raw) disconnected");
    }
}

/// Data port: framed variant. Decodes `[0xAA 0x55 Len Payload Crc]`
/// frames and forwards the payload to the wearable; replies are
/// re-encoded the same way.
#[cfg(feature = "host-framed")]
pub async fn run_data_port(
    mut port: CdcAcmClass<'static, UsbDriver>,
    to_wearable: Sender<'static, CriticalSectionRawMutex, Vec<u8, MAX_PASSTHROUGH_PAYLOAD>, 4>,
    from_wearable: Receiver<'static, CriticalSectionRawMutex, Vec<u8, MAX_PASSTHROUGH_PAYLOAD>, 4>,
) -> ! {
    loop {
        port.wait_connection().await;
        info!("CDC data port (framed) connected");
        let (mut sender, mut receiver) = port.split();
        let mut buf = [0u8; 64];
        let mut decoder = FrameDecoder::new();
        loop {
            match embassy_futures::select::select(receiver.read_packet(&mut buf), from_wearable.receive()).await {
                embassy_futures::select::Either::First(Ok(n)) => {
                    for &b in &buf[..n] {
                        match decoder.feed(b) {
                            FeedResult::Frame(payload) => {
                                if let Ok(bytes) = Vec::from_slice(&payload) {
                                    if to_wearable.try_send(bytes).is_err() {
                                        warn!("CDC framed data port: wearable send queue full, dropping");
                                    }
                                }
                            }
                            FeedResult::Discarded => warn!("CDC framed data port: bad frame discarded"),
                            FeedResult::Pending => {}
                        }
                    }
                }
                embassy_futures::select::Either::First(Err(EndpointError::Disabled)) => break,
                embassy_futures::select::Either::First(Err(_)) => {}
                embassy_futures::select::Either::Second(bytes) => {
                    if let Some(frame) = framing::encode(&bytes) {
                        if sender.write_packet(&frame).await.is_err() {
                            break;
                        }
                    }
                }
            }
        }
        info!("CDC data port (framed) disconnected");
    }
}

/// Data port: protobuf-variant (modelled as the TLV envelope in
/// `host::protocol`, see that module's doc comment). Decodes
/// `AppToRelay`, answers local reads directly, and forwards
/// `PassThroughToMouthpad` to the wearable; inbound wearable NUS
/// notifications arrive pre-wrapped as `PassThroughToApp` bytes.
/// `ClearBondsWrite`/`DfuWrite` are acknowledged once `commands` has
/// accepted the corresponding request for the main task.
#[cfg(feature = "host-protobuf")]
pub async fn run_data_port(
    mut port: CdcAcmClass<'static, UsbDriver>,
    to_wearable: Sender<'static, CriticalSectionRawMutex, Vec<u8, MAX_PASSTHROUGH_PAYLOAD>, 4>,
    from_wearable: Receiver<'static, CriticalSectionRawMutex, Vec<u8, MAX_PASSTHROUGH_PAYLOAD>, 4>,
    commands: Sender<'static, CriticalSectionRawMutex, CdcCommand, 2>,
    wearable_connected: impl Fn() -> bool,
) -> ! {
    use crate::host::protocol::{AppToRelay, RelayToApp};

    loop {
        port.wait_connection().await;
        info!("CDC data port (protobuf) connected");
        let (mut sender, mut receiver) = port.split();
        let mut buf = [0u8; 64];
        let mut decoder = FrameDecoder::new();
        loop {
            match embassy_futures::select::select(receiver.read_packet(&mut buf), from_wearable.receive()).await {
                embassy_futures::select::Either::First(Ok(n)) => {
                    for &b in &buf[..n] {
                        let FeedResult::Frame(payload) = decoder.feed(b) else { continue };
                        let Some(msg) = AppToRelay::decode(&payload) else {
                            warn!("CDC protobuf data port: undecodable envelope");
                            continue;
                        };
                        let reply = match msg {
                            AppToRelay::BleConnectionStatusRead => Some(RelayToApp::BleConnectionStatusResponse {
                                connected: wearable_connected(),
                                name_len: 0,
                            }),
                            AppToRelay::DeviceInfoRead => Some(RelayToApp::DeviceInfoResponse {
                                fw_major: crate::config::FW_VERSION_MAJOR,
                                fw_minor: crate::config::FW_VERSION_MINOR,
                                fw_patch: crate::config::FW_VERSION_PATCH,
                            }),
                            AppToRelay::ClearBondsWrite => {
                                let ok = commands.try_send(CdcCommand::Reset).is_ok();
                                Some(RelayToApp::ClearBondsResponse { ok })
                            }
                            AppToRelay::DfuWrite => {
                                let ok = commands.try_send(CdcCommand::Dfu).is_ok();
                                Some(RelayToApp::DfuResponse { ok })
                            }
                            AppToRelay::PassThroughToMouthpad(payload) => {
                                let status = if !wearable_connected() {
                                    PassThroughStatus::NotConnected
                                } else if to_wearable.try_send(payload).is_ok() {
                                    PassThroughStatus::Ok
                                } else {
                                    PassThroughStatus::Unknown
                                };
                                Some(RelayToApp::PassThroughStatusResponse(status))
                            }
                        };
                        if let Some(reply) = reply {
                            let mut envelope: Vec<u8, { crate::host::protocol::MAX_FRAMED_ENVELOPE }> = Vec::new();
                            if reply.encode(&mut envelope) {
                                if let Some(frame) = framing::encode(&envelope) {
                                    let _ = sender.write_packet(&frame).await;
                                }
                            }
                        }
                    }
                }
                embassy_futures::select::Either::First(Err(EndpointError::Disabled)) => break,
                embassy_futures::select::Either::First(Err(_)) => {}
                embassy_futures::select::Either::Second(bytes) => {
                    let reply = RelayToApp::PassThroughToApp(bytes);
                    let mut envelope: Vec<u8, { crate::host::protocol::MAX_FRAMED_ENVELOPE }> = Vec::new();
                    if reply.encode(&mut envelope) {
                        if let Some(frame) = framing::encode(&envelope) {
                            let _ = sender.write_packet(&frame).await;
                        }
                    }
                }
            }
        }
        info!("CDC data port (protobuf) disconnected");
    }
}

/// Command/log port: reads line-delimited ASCII, answers `serial`/
/// `version` locally, and forwards everything else to `commands` for
/// the main task to act on.
pub async fn run_command_port(
    mut port: CdcAcmClass<'static, UsbDriver>,
    commands: Sender<'static, CriticalSectionRawMutex, CdcCommand, 2>,
) -> ! {
    loop {
        port.wait_connection().await;
        info!("CDC command port connected");
        let (mut sender, mut receiver) = port.split();
        let mut line: String<64> = String::new();
        let mut buf = [0u8; 64];
        loop {
            let n = match receiver.read_packet(&mut buf).await {
                Ok(n) => n,
                Err(EndpointError::Disabled) => break,
                Err(_) => continue,
            };
            for &b in &buf[..n] {
                if b == b'\n' || b == b'\r' {
                    if !line.is_empty() {
                        if let Some(reply) = local_reply(&line) {
                            let _ = sender.write_packet(reply.as_bytes()).await;
                        } else if let Some(cmd) = parse_command(&line) {
                            if commands.try_send(cmd).is_err() {
                                warn!("CDC command port: command queue full, dropping");
                            }
                        } else {
                            warn!("CDC command port: unrecognised line");
                        }
                        line.clear();
                    }
                } else if line.push(b as char).is_err() {
                    line.clear(); // overlong line: drop and resync
                }
            }
        }
        info!("CDC command port disconnected");
    }
}
