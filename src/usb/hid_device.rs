//! USB HID forwarder (C8): one composite HID interface carrying three
//! report IDs (buttons+wheel, X/Y, consumer control) so the wearable's
//! own HOGP reports can be forwarded byte-identical (spec.md §4.6
//! "descriptor-mirroring strategy", §4.8).

use crate::config;
use crate::error::Error;
use crate::hid::{RawHidReport, MAX_REPORT_PAYLOAD, REPORT_ID_BUTTONS_WHEEL, REPORT_ID_CONSUMER, REPORT_ID_XY};
use defmt::{info, warn};
use embassy_nrf::usb::vbus_detect::HardwareVbusDetect;
use embassy_nrf::usb::Driver;
use embassy_nrf::{self, bind_interrupts, peripherals};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;
use embassy_time::{Duration, Instant};
use embassy_usb::class::hid::{Config as HidConfig, HidWriter, State};
use embassy_usb::{Builder, Config, UsbDevice};
use static_cell::StaticCell;

bind_interrupts!(struct Irqs {
    USBD => embassy_nrf::usb::InterruptHandler<peripherals::USBD>;
    CLOCK_POWER => embassy_nrf::usb::vbus_detect::InterruptHandler;
});

static USB_CONFIG_DESC: StaticCell<[u8; 256]> = StaticCell::new();
static USB_BOS_DESC: StaticCell<[u8; 256]> = StaticCell::new();
static USB_MSOS_DESC: StaticCell<[u8; 256]> = StaticCell::new();
static USB_CTRL_BUF: StaticCell<[u8; 128]> = StaticCell::new();
static USB_POWER_HANDLER: StaticCell<UsbPowerHandler> = StaticCell::new();
static USB_SUSPEND_SIGNAL: Signal<CriticalSectionRawMutex, bool> = Signal::new();

struct UsbPowerHandler;

impl embassy_usb::Handler for UsbPowerHandler {
    fn suspended(&mut self, suspended: bool) {
        USB_SUSPEND_SIGNAL.signal(suspended);
    }
}

/// USB bus suspend/resume signal: `true` when the host suspends the
/// bus, `false` on resume (spec.md §4.8 "supports remote-wakeup").
pub fn suspend_signal() -> &'static Signal<CriticalSectionRawMutex, bool> {
    &USB_SUSPEND_SIGNAL
}

/// Report size including the leading report-ID byte.
pub const MAX_WIRE_REPORT: usize = 1 + MAX_REPORT_PAYLOAD;

/// `send()`'s wait budget for the endpoint-in semaphore before giving
/// up (spec.md §4.8 "short timeout").
const SEND_TIMEOUT: Duration = Duration::from_millis(50);

static HID_STATE: StaticCell<State> = StaticCell::new();

/// Composite HID report descriptor: one collection, three report IDs.
/// Report 1 = buttons (3 bits) + wheel (signed byte). Report 2 = X/Y
/// (signed bytes). Report 3 = consumer control (16-bit usage).
pub const COMPOSITE_REPORT_DESCRIPTOR: &[u8] = &[
    0x05, 0x01, //   Usage Page (Generic Desktop)
    0x09, 0x02, //   Usage (Mouse)
    0xA1, 0x01, //   Collection (Application)
    0x09, 0x01, //     Usage (Pointer)
    0xA1, 0x00, //     Collection (Physical)
    0x85, REPORT_ID_BUTTONS_WHEEL,
    0x05, 0x09, //       Usage Page (Buttons)
    0x19, 0x01, //       Usage Minimum (Button 1)
    0x29, 0x03, //       Usage Maximum (Button 3)
    0x15, 0x00, //       Logical Minimum (0)
    0x25, 0x01, //       Logical Maximum (1)
    0x95, 0x03, //       Report Count (3)
    0x75, 0x01, //       Report Size (1)
    0x81, 0x02, //       Input (Data, Variable, Absolute)
    0x95, 0x01, //       Report Count (1)
    0x75, 0x05, //       Report Size (5)
    0x81, 0x01, //       Input (Constant) - padding
    0x09, 0x38, //       Usage (Wheel)
    0x15, 0x81, //       Logical Minimum (-127)
    0x25, 0x7F, //       Logical Maximum (127)
    0x75, 0x08, //       Report Size (8)
    0x95, 0x01, //       Report Count (1)
    0x81, 0x06, //       Input (Data, Variable, Relative)
    0x85, REPORT_ID_XY,
    0x09, 0x30, //       Usage (X)
    0x09, 0x31, //       Usage (Y)
    0x15, 0x81, //       Logical Minimum (-127)
    0x25, 0x7F, //       Logical Maximum (127)
    0x75, 0x08, //       Report Size (8)
    0x95, 0x02, //       Report Count (2)
    0x81, 0x06, //       Input (Data, Variable, Relative)
    0xC0, //     End Collection (Physical)
    0xC0, // End Collection (Application)
    0x05, 0x0C, // Usage Page (Consumer)
    0x09, 0x01, // Usage (Consumer Control)
    0xA1, 0x01, // Collection (Application)
    0x85, REPORT_ID_CONSUMER,
    0x19, 0x00, //   Usage Minimum (0)
    0x2A, 0xFF, 0x03, //   Usage Maximum (0x3FF)
    0x15, 0x00, //   Logical Minimum (0)
    0x26, 0xFF, 0x03, //   Logical Maximum (0x3FF)
    0x75, 0x10, //   Report Size (16)
    0x95, 0x01, //   Report Count (1)
    0x81, 0x00, //   Input (Data, Array, Absolute)
    0xC0, // End Collection
];

/// Driver type shared with `host::bridge`: one physical USB peripheral
/// carries the HID class and both CDC ACM classes on a single
/// composite `Builder`.
pub type UsbDriver = Driver<'static, peripherals::USBD, HardwareVbusDetect>;

pub struct UsbHidDevice {
    pub writer: HidWriter<'static, UsbDriver, MAX_WIRE_REPORT>,
}

/// Create the low-level USB driver and an empty composite `Builder`
/// with the device-level config already set (spec.md §4.6 descriptor
/// strings/VID:PID). The caller registers every class (HID here, the
/// two CDC ACM ports via `host::bridge::init`) on the same builder
/// before calling `finish` exactly once.
pub fn new_builder(usbd: peripherals::USBD) -> Builder<'static, UsbDriver> {
    let driver = Driver::new(usbd, Irqs, HardwareVbusDetect::new(Irqs));

    let mut usb_config = Config::new(config::USB_VID, config::USB_PID);
    usb_config.manufacturer = Some(config::USB_MANUFACTURER);
    usb_config.product = Some(config::USB_PRODUCT);
    usb_config.serial_number = Some(config::USB_SERIAL_NUMBER);
    usb_config.device_release = config::usb_bcd_device();
    usb_config.max_power = 100;
    usb_config.max_packet_size_0 = 64;
    usb_config.supports_remote_wakeup = true;

    let config_desc = USB_CONFIG_DESC.init([0u8; 256]);
    let bos_desc = USB_BOS_DESC.init([0u8; 256]);
    let msos_desc = USB_MSOS_DESC.init([0u8; 256]);
    let ctrl_buf = USB_CTRL_BUF.init([0u8; 128]);

    let mut builder = Builder::new(driver, usb_config, config_desc, bos_desc, msos_desc, ctrl_buf);

    let usb_handler = USB_POWER_HANDLER.init(UsbPowerHandler);
    builder.handler(usb_handler);
    builder
}

/// Register the composite HID interface on `builder`.
pub fn register_hid(builder: &mut Builder<'static, UsbDriver>) -> UsbHidDevice {
    let hid_state = HID_STATE.init(State::new());
    let hid_config = HidConfig {
        report_descriptor: COMPOSITE_REPORT_DESCRIPTOR,
        request_handler: None,
        poll_ms: config::USB_HID_POLL_MS,
        max_packet_size: MAX_WIRE_REPORT as u16,
    };
    let writer = HidWriter::new(builder, hid_state, hid_config);
    info!("USB composite HID interface registered (3 report IDs)");
    UsbHidDevice { writer }
}

/// Consume the fully-populated builder into a runnable `UsbDevice`.
/// Must be called exactly once, after every class is registered.
pub fn finish(builder: Builder<'static, UsbDriver>) -> UsbDevice<'static, UsbDriver> {
    builder.build()
}

/// Run the USB device stack. Handles enumeration, suspend/resume, and
/// endpoint servicing; runs forever.
pub async fn run_usb_device(mut device: UsbDevice<'static, UsbDriver>) -> ! {
    info!("USB device task started");
    device.run().await
}

/// Send one report with a short timeout (spec.md §4.8). `NotReady` if
/// the endpoint doesn't accept the write within `SEND_TIMEOUT`.
pub async fn send(
    writer: &mut HidWriter<'static, UsbDriver, MAX_WIRE_REPORT>,
    report: &RawHidReport,
) -> Result<(), Error> {
    let mut buf = [0u8; MAX_WIRE_REPORT];
    let Some(bytes) = report.serialize(&mut buf) else {
        return Err(Error::Capacity);
    };
    let deadline = Instant::now() + SEND_TIMEOUT;
    loop {
        match writer.write(bytes).await {
            Ok(()) => return Ok(()),
            Err(_) if Instant::now() < deadline => continue,
            Err(_) => {
                warn!("USB HID write failed/timed out");
                return Err(Error::NotReady);
            }
        }
    }
}

/// Send three neutral reports in a fixed order (spec.md §4.8
/// `releaseAll`). Idempotent: errors are logged and ignored so a
/// disconnect can always clear host-visible state.
pub async fn release_all(writer: &mut HidWriter<'static, UsbDriver, MAX_WIRE_REPORT>) {
    for id in [REPORT_ID_BUTTONS_WHEEL, REPORT_ID_XY, REPORT_ID_CONSUMER] {
        let neutral = RawHidReport::neutral(id);
        if send(writer, &neutral).await.is_err() {
            warn!("releaseAll: failed to clear report {}", id);
        }
    }
}

/// Ask the host to wake the bus if it is currently suspended
/// (spec.md §4.8 "supports remote-wakeup").
pub async fn request_remote_wakeup(device: &mut UsbDevice<'static, UsbDriver>) {
    if device.remote_wakeup().await.is_err() {
        warn!("remote wakeup request failed");
    }
}
