//! MouthPad^USB bridge library interface.
//!
//! Re-exports the pure logic modules (BLE classification/registry,
//! the glasses protocol engine, the host CDC framing/protocol, HID
//! passthrough shaping, telemetry scheduling) so they can be
//! exercised by `cargo test` on the host, independent of the embedded
//! hardware. Submodules that unconditionally depend on
//! `embassy-*`/`nrf-softdevice` are gated behind the `embedded`
//! feature at their declaration site, which is not enabled for host
//! tests.
//!
//! The embedded binary entry point is `main.rs`
//! (`#![no_std] #![no_main]`); this file only exists so the pure
//! modules have a crate root `cargo test --lib` can compile against.

#![cfg_attr(not(test), no_std)]

pub mod ble;
pub mod config;
pub mod crc;
pub mod error;
pub mod glasses;
pub mod hid;
pub mod host;
#[cfg(feature = "embedded")]
pub mod storage;
pub mod telemetry;
#[cfg(feature = "embedded")]
pub mod usb;
