//! Bitmap transmission state machine (spec.md §4.10 steps 1-5), pure
//! and host-testable.
//!
//! Driven by two kinds of external events: `on_send_result` for a
//! GATT write-without-response completion (or failure) to whichever
//! arm is currently being sent to, and `on_arm_message` for the
//! explicit `BmpEnd`/`BmpCrc` ACK replies. The FSM never performs I/O
//! itself; `glasses::engine` asks it for the next packet via
//! `current_packet()`, writes it, and reports back the outcome.

use crate::config::{
    BITMAP_ADDRESS, GLASSES_BITMAP_MAX_BYTES, GLASSES_DISPLAY_HEIGHT, GLASSES_DISPLAY_WIDTH,
    MAX_BITMAP_CHUNK_PAYLOAD,
};
use crate::crc::Crc32XzDigest;
use crate::glasses::opcodes::{ArmMessage, OP_BMP_CHUNK, OP_BMP_CRC, OP_BMP_END, STATUS_ACK};
use heapless::Vec;

/// Per-arm send failures are retried this many times before the whole
/// transfer is aborted (spec.md §4.10 step 2).
pub const MAX_SEND_RETRIES: u8 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arm {
    Left,
    Right,
}

/// Internal phase. Any phase named `*Send` has an outstanding packet
/// sent first to `Arm::Left`, then (on success) to `Arm::Right`, with
/// up to `MAX_SEND_RETRIES` retries per arm before aborting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Chunk { seq: u8 },
    BmpEndSend,
    BmpEndAck { left: bool, right: bool },
    BmpCrcSend,
    BmpCrcAck { left: bool, right: bool },
    Done,
    Aborted,
}

/// Outcome reported after driving the FSM with an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Still in progress; call `current_packet()` for the next send.
    InProgress,
    /// Both arms accepted the transfer.
    Completed,
    /// The transfer was abandoned (retry budget exhausted, protocol
    /// error, or an explicit `abort()`/disconnect).
    Aborted,
}

pub const PACKET_CAP: usize = MAX_BITMAP_CHUNK_PAYLOAD + 2;

/// `{inProgress, data, size, …}` (spec.md §3 "Bitmap transmission
/// state").
pub struct BitmapTransfer {
    phase: Phase,
    data: Vec<u8, GLASSES_BITMAP_MAX_BYTES>,
    arm_turn: Arm,
    retries: u8,
    crc: u32,
}

impl BitmapTransfer {
    pub fn new() -> Self {
        Self {
            phase: Phase::Idle,
            data: Vec::new(),
            arm_turn: Arm::Left,
            retries: 0,
            crc: 0,
        }
    }

    pub fn in_progress(&self) -> bool {
        !matches!(self.phase, Phase::Idle | Phase::Done | Phase::Aborted)
    }

    /// Begin a new transfer. `data` is the raw monochrome pixel bytes
    /// for the canonical `GLASSES_DISPLAY_WIDTH × GLASSES_DISPLAY_HEIGHT`
    /// asset (or a full BMP file, depending on which form the caller
    /// uses) — whatever is ultimately hashed together with the display
    /// address below. Returns `false` if `data` exceeds capacity or a
    /// transfer is already running.
    pub fn start(&mut self, data: &[u8]) -> bool {
        if self.in_progress() || data.len() > GLASSES_BITMAP_MAX_BYTES {
            return false;
        }
        self.data.clear();
        if self.data.extend_from_slice(data).is_err() {
            return false;
        }
        let mut digest = Crc32XzDigest::new();
        digest.update(&BITMAP_ADDRESS);
        digest.update(data);
        self.crc = digest.finalize();
        self.phase = Phase::Chunk { seq: 0 };
        self.arm_turn = Arm::Left;
        self.retries = 0;
        true
    }

    pub fn abort(&mut self) {
        self.data.clear();
        self.phase = Phase::Aborted;
    }

    fn chunk_bounds(&self, seq: u8) -> Option<(usize, usize)> {
        let first_cap = MAX_BITMAP_CHUNK_PAYLOAD - BITMAP_ADDRESS.len();
        if self.data.is_empty() {
            return if seq == 0 { Some((0, 0)) } else { None };
        }
        let start = if seq == 0 {
            0
        } else {
            first_cap + (seq as usize - 1) * MAX_BITMAP_CHUNK_PAYLOAD
        };
        if start >= self.data.len() {
            return None;
        }
        let cap = if seq == 0 { first_cap } else { MAX_BITMAP_CHUNK_PAYLOAD };
        let end = core::cmp::min(start + cap, self.data.len());
        Some((start, end))
    }

    fn is_last_chunk(&self, seq: u8) -> bool {
        match self.chunk_bounds(seq) {
            Some((_, end)) => end == self.data.len(),
            None => true,
        }
    }

    /// The next packet to send to `self.arm_turn()`, or `None` if the
    /// FSM is idle/done/aborted.
    pub fn current_packet(&self) -> Option<Vec<u8, PACKET_CAP>> {
        let mut out: Vec<u8, PACKET_CAP> = Vec::new();
        match self.phase {
            Phase::Chunk { seq } => {
                let (start, end) = self.chunk_bounds(seq)?;
                out.push(OP_BMP_CHUNK).ok()?;
                out.push(seq).ok()?;
                if seq == 0 {
                    out.extend_from_slice(&BITMAP_ADDRESS).ok()?;
                }
                out.extend_from_slice(&self.data[start..end]).ok()?;
                Some(out)
            }
            Phase::BmpEndSend => {
                out.extend_from_slice(&[OP_BMP_END, 0x0D, 0x0E]).ok()?;
                Some(out)
            }
            Phase::BmpCrcSend => {
                out.push(OP_BMP_CRC).ok()?;
                out.extend_from_slice(&self.crc.to_be_bytes()).ok()?;
                Some(out)
            }
            _ => None,
        }
    }

    pub fn arm_turn(&self) -> Arm {
        self.arm_turn
    }

    /// Report the outcome of sending `current_packet()` to
    /// `arm_turn()`.
    pub fn on_send_result(&mut self, ok: bool) -> Outcome {
        if !ok {
            self.retries += 1;
            if self.retries > MAX_SEND_RETRIES {
                self.phase = Phase::Aborted;
                return Outcome::Aborted;
            }
            return Outcome::InProgress;
        }
        self.retries = 0;
        match (self.phase, self.arm_turn) {
            (Phase::Chunk { .. }, Arm::Left) => {
                self.arm_turn = Arm::Right;
                Outcome::InProgress
            }
            (Phase::Chunk { seq }, Arm::Right) => {
                self.arm_turn = Arm::Left;
                if self.is_last_chunk(seq) {
                    self.phase = Phase::BmpEndSend;
                } else {
                    self.phase = Phase::Chunk { seq: seq.wrapping_add(1) };
                }
                Outcome::InProgress
            }
            (Phase::BmpEndSend, Arm::Left) => {
                self.arm_turn = Arm::Right;
                Outcome::InProgress
            }
            (Phase::BmpEndSend, Arm::Right) => {
                self.arm_turn = Arm::Left;
                self.phase = Phase::BmpEndAck { left: false, right: false };
                Outcome::InProgress
            }
            (Phase::BmpCrcSend, Arm::Left) => {
                self.arm_turn = Arm::Right;
                Outcome::InProgress
            }
            (Phase::BmpCrcSend, Arm::Right) => {
                self.arm_turn = Arm::Left;
                self.phase = Phase::BmpCrcAck { left: false, right: false };
                Outcome::InProgress
            }
            _ => Outcome::InProgress,
        }
    }

    /// Feed an incoming message from one arm (`from_left` selects
    /// which). Only meaningful while awaiting `BmpEnd`/`BmpCrc` acks.
    pub fn on_arm_message(&mut self, from_left: bool, msg: &ArmMessage) -> Outcome {
        match self.phase {
            Phase::BmpEndAck { left, right } => match msg {
                ArmMessage::BmpEndAck { status } if *status == STATUS_ACK => {
                    let (left, right) = if from_left { (true, right) } else { (left, true) };
                    if left && right {
                        self.phase = Phase::BmpCrcSend;
                        self.arm_turn = Arm::Left;
                    } else {
                        self.phase = Phase::BmpEndAck { left, right };
                    }
                    Outcome::InProgress
                }
                ArmMessage::BmpEndAck { .. } => {
                    self.phase = Phase::Aborted;
                    Outcome::Aborted
                }
                _ => Outcome::InProgress,
            },
            Phase::BmpCrcAck { left, right } => match msg {
                ArmMessage::BmpCrcAck { status } if *status == STATUS_ACK => {
                    let (left, right) = if from_left { (true, right) } else { (left, true) };
                    if left && right {
                        self.phase = Phase::Done;
                        self.data.clear();
                        Outcome::Completed
                    } else {
                        self.phase = Phase::BmpCrcAck { left, right };
                        Outcome::InProgress
                    }
                }
                ArmMessage::BmpCrcAck { .. } => {
                    self.phase = Phase::Aborted;
                    Outcome::Aborted
                }
                _ => Outcome::InProgress,
            },
            _ => Outcome::InProgress,
        }
    }
}

impl Default for BitmapTransfer {
    fn default() -> Self {
        Self::new()
    }
}

pub const CANONICAL_ASSET_BYTES: usize = (GLASSES_DISPLAY_WIDTH * GLASSES_DISPLAY_HEIGHT) / 8;

#[cfg(test)]
mod tests {
    use super::*;

    fn drive_chunks(t: &mut BitmapTransfer) {
        while matches!(t.current_packet(), Some(p) if p[0] == OP_BMP_CHUNK) {
            assert_eq!(t.arm_turn(), Arm::Left);
            assert_eq!(t.on_send_result(true), Outcome::InProgress);
            assert_eq!(t.arm_turn(), Arm::Right);
            assert_eq!(t.on_send_result(true), Outcome::InProgress);
        }
    }

    #[test]
    fn small_payload_completes_single_chunk_transfer() {
        let mut t = BitmapTransfer::new();
        assert!(t.start(b"hello"));
        let packet = t.current_packet().unwrap();
        assert_eq!(packet[0], OP_BMP_CHUNK);
        assert_eq!(packet[1], 0);
        assert_eq!(&packet[2..6], &BITMAP_ADDRESS);
        assert_eq!(&packet[6..], b"hello");

        drive_chunks(&mut t);

        let end = t.current_packet().unwrap();
        assert_eq!(&end[..], &[OP_BMP_END, 0x0D, 0x0E]);
        assert_eq!(t.on_send_result(true), Outcome::InProgress); // Left
        assert_eq!(t.on_send_result(true), Outcome::InProgress); // Right

        assert_eq!(
            t.on_arm_message(true, &ArmMessage::BmpEndAck { status: STATUS_ACK }),
            Outcome::InProgress
        );
        assert_eq!(
            t.on_arm_message(false, &ArmMessage::BmpEndAck { status: STATUS_ACK }),
            Outcome::InProgress
        );

        let crc_packet = t.current_packet().unwrap();
        assert_eq!(crc_packet[0], OP_BMP_CRC);
        assert_eq!(t.on_send_result(true), Outcome::InProgress); // Left
        assert_eq!(t.on_send_result(true), Outcome::InProgress); // Right

        assert_eq!(
            t.on_arm_message(true, &ArmMessage::BmpCrcAck { status: STATUS_ACK }),
            Outcome::InProgress
        );
        assert_eq!(
            t.on_arm_message(false, &ArmMessage::BmpCrcAck { status: STATUS_ACK }),
            Outcome::Completed
        );
        assert!(!t.in_progress());
    }

    #[test]
    fn multi_chunk_payload_advances_sequence_numbers() {
        let mut t = BitmapTransfer::new();
        let first_cap = MAX_BITMAP_CHUNK_PAYLOAD - BITMAP_ADDRESS.len();
        let payload = {
            let mut v = Vec::<u8, GLASSES_BITMAP_MAX_BYTES>::new();
            for i in 0..(first_cap + MAX_BITMAP_CHUNK_PAYLOAD + 10) {
                let _ = v.push((i % 256) as u8);
            }
            v
        };
        assert!(t.start(&payload));

        let p0 = t.current_packet().unwrap();
        assert_eq!(p0[1], 0);
        t.on_send_result(true);
        t.on_send_result(true);

        let p1 = t.current_packet().unwrap();
        assert_eq!(p1[1], 1);
        assert_eq!(p1.len() - 2, MAX_BITMAP_CHUNK_PAYLOAD);
        t.on_send_result(true);
        t.on_send_result(true);

        let p2 = t.current_packet().unwrap();
        assert_eq!(p2[1], 2);
        assert_eq!(p2.len() - 2, 10);
        t.on_send_result(true);
        t.on_send_result(true);

        // Fourth call: no more chunk data, must already be BmpEnd.
        let next = t.current_packet().unwrap();
        assert_eq!(next[0], OP_BMP_END);
    }

    #[test]
    fn exhausted_retries_abort_the_transfer() {
        let mut t = BitmapTransfer::new();
        assert!(t.start(b"x"));
        for _ in 0..MAX_SEND_RETRIES {
            assert_eq!(t.on_send_result(false), Outcome::InProgress);
        }
        assert_eq!(t.on_send_result(false), Outcome::Aborted);
        assert!(!t.in_progress());
    }

    #[test]
    fn bad_bmp_end_status_aborts() {
        let mut t = BitmapTransfer::new();
        t.start(b"x");
        drive_chunks(&mut t);
        t.on_send_result(true);
        t.on_send_result(true);
        let outcome = t.on_arm_message(true, &ArmMessage::BmpEndAck { status: 0x00 });
        assert_eq!(outcome, Outcome::Aborted);
    }

    #[test]
    fn start_rejects_oversize_payload() {
        let mut t = BitmapTransfer::new();
        let big = [0u8; GLASSES_BITMAP_MAX_BYTES + 1];
        assert!(!t.start(&big));
    }

    #[test]
    fn abort_resets_to_idle_like_state() {
        let mut t = BitmapTransfer::new();
        t.start(b"hi");
        t.abort();
        assert!(!t.in_progress());
        // A fresh transfer can start again after an abort.
        assert!(t.start(b"again"));
    }

    #[test]
    fn cannot_start_while_already_in_progress() {
        let mut t = BitmapTransfer::new();
        assert!(t.start(b"first"));
        assert!(!t.start(b"second"));
    }
}
