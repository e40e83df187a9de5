//! CDC/framing bridge (C9): data port framing + pass-through envelope
//! + the async CDC task wiring.

#[cfg(feature = "embedded")]
pub mod bridge;
pub mod commands;
pub mod framing;
pub mod protocol;
