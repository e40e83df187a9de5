//! USB device subsystem (C8): presents a composite device to the host
//! with one HID interface (mirroring the wearable's HOGP reports) and
//! two CDC ACM interfaces (`host::bridge`) on a single `embassy-usb`
//! `Builder`.

pub mod hid_device;
