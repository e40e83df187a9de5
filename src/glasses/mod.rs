//! Glasses protocol engine (C10): opcode table, dual-arm command
//! queue, bitmap transmission FSM, heartbeat, status rendering, and
//! the async task tying them together.

pub mod bitmap;
pub mod engine;
pub mod heartbeat;
pub mod opcodes;
pub mod queue;
pub mod status;
