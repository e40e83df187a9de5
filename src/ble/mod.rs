//! Bluetooth Low Energy subsystem.
//!
//! Drives the Nordic SoftDevice S140 in **Central** role across three
//! peer kinds: the wearable (HOGP + BAS + NUS), and two glasses arms
//! (NUS only). Submodules:
//!
//! - [`classifier`] - turns raw advertisement bytes into a `DeviceKind`.
//! - [`scanner`] - open/smart scan passes (C1).
//! - [`registry`] - the in-memory link table (C3).
//! - [`central`] - the per-link and dual-arm glasses FSMs (C4).
//! - [`nus_client`] - the multi-handle NUS client table (C5).
//! - [`hid_client`] - HOGP discovery and raw report forwarding (C6).
//! - [`battery_client`] - BAS discovery, notify/poll, color mapping (C7).

#[cfg(feature = "embedded")]
pub mod battery_client;
#[cfg(feature = "embedded")]
pub mod central;
pub mod classifier;
#[cfg(feature = "embedded")]
pub mod hid_client;
#[cfg(feature = "embedded")]
pub mod nus_client;
pub mod registry;
#[cfg(feature = "embedded")]
pub mod scanner;

use crate::ble::classifier::DeviceKind;
use crate::ble::registry::LinkHandle;
use defmt::Format;

/// Lifecycle events the registry/central controller publish for other
/// tasks (the glasses engine, telemetry, USB forwarder) to react to,
/// per spec.md §4.3's `onInsert`/`onRemove` subscriber model.
#[derive(Clone, Copy, Format)]
pub enum LinkEvent {
    Ready { handle: LinkHandle, kind: DeviceKind },
    Lost { handle: LinkHandle, kind: DeviceKind },
}
