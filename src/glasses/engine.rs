//! Glasses protocol engine (C10): ties the command queue, the bitmap
//! transfer FSM, the heartbeat timer and the display-mode toggle into
//! one driver the NUS-facing task can poll.
//!
//! Mirrors the relationship `ble::central` has with `ble::registry`/
//! `DualArmController`: this struct holds no I/O itself.
//! `poll()`/`poll_heartbeat()` tell the caller what bytes to write to
//! which arm; `on_send_result()`/`on_notification()` feed the results
//! back in. The caller (the glasses task in `main`) owns the actual
//! NUS writes via `ble::nus_client::NusClientTable`.
//!
//! A bitmap transfer is represented in the command queue as a single
//! placeholder `CommandKind::BmpChunk` entry: while it is current and
//! `bitmap.in_progress()`, the bitmap FSM has exclusive control of the
//! wire and the queue placeholder just rides along, marked `Done`/
//! `Failed` once the FSM finishes so normal dequeue logic still
//! applies.

use crate::config::{GLASSES_COMMAND_TIMEOUT_MS, MAX_TEXT_GLYPH_PAYLOAD};
use crate::glasses::bitmap::{Arm, BitmapTransfer, Outcome as BitmapOutcome};
use crate::glasses::heartbeat::{self, HeartbeatTimer};
use crate::glasses::opcodes::{ArmMessage, OP_MIC, OP_TEXT};
use crate::glasses::queue::{CmdState, Command, CommandKind, CommandQueue};
use crate::glasses::status::{DisplayMode, ModeToggle};
use heapless::Vec;

pub const MAX_PACKET: usize = 256;

/// What the caller must write next, and to which arm.
pub struct SendJob {
    pub arm: Arm,
    pub bytes: Vec<u8, MAX_PACKET>,
}

pub struct GlassesEngine {
    queue: CommandQueue,
    bitmap: BitmapTransfer,
    mode: ModeToggle,
    heartbeat: HeartbeatTimer,
    text_seq: u8,
}

impl GlassesEngine {
    pub fn new() -> Self {
        Self {
            queue: CommandQueue::new(),
            bitmap: BitmapTransfer::new(),
            mode: ModeToggle::new(),
            heartbeat: HeartbeatTimer::new(),
            text_seq: 0,
        }
    }

    pub fn mode(&self) -> DisplayMode {
        self.mode.mode()
    }

    /// Switch display mode, clearing the modality being left first
    /// (spec.md §4.10 "Display-mode toggle"). Returns the command the
    /// caller must enqueue to clear the old modality, if any.
    pub fn switch_mode(&mut self, mode: DisplayMode, now_ms: u64) {
        if let Some(previous) = self.mode.switch_to(mode) {
            match previous {
                DisplayMode::Bitmap => self.bitmap.abort(),
                DisplayMode::Text => {
                    self.enqueue_clear(now_ms);
                }
            }
        }
    }

    /// Build and enqueue a text packet: `[0x4E, seq, totalPkg=1,
    /// currentPkg=0, screenMode=0x71, charPos0=0, charPos1=0,
    /// curPage=0, maxPage=1, utf8Payload]` (spec.md §4.10 "Text
    /// framing"). Truncates silently at `MAX_TEXT_GLYPH_PAYLOAD`.
    pub fn enqueue_text(&mut self, utf8: &[u8], now_ms: u64) -> bool {
        let seq = self.text_seq;
        self.text_seq = self.text_seq.wrapping_add(1);
        let n = utf8.len().min(MAX_TEXT_GLYPH_PAYLOAD);
        let mut wire: Vec<u8, MAX_PACKET> = Vec::new();
        let header = [OP_TEXT, seq, 1, 0, 0x71, 0, 0, 0, 1];
        if wire.extend_from_slice(&header).is_err() || wire.extend_from_slice(&utf8[..n]).is_err() {
            return false;
        }
        self.queue.enqueue(Command::new(CommandKind::Text, true, &wire, now_ms))
    }

    /// Clear the current text: the same framing as a text packet with
    /// an empty payload. Spec.md leaves the exact "Clear" wire bytes
    /// unspecified; this follows the Text channel since `Clear`
    /// accepts the same formal ACK (`0x4E`/`0xC9`) as Text, plus the
    /// dashboard-close event as an alternate ACK.
    pub fn enqueue_clear(&mut self, now_ms: u64) -> bool {
        let seq = self.text_seq;
        self.text_seq = self.text_seq.wrapping_add(1);
        let wire: [u8; 9] = [OP_TEXT, seq, 1, 0, 0x71, 0, 0, 0, 1];
        self.queue.enqueue(Command::new(CommandKind::Clear, true, &wire, now_ms))
    }

    /// Forward a mic-control payload: `[0x0E, ...payload]`.
    pub fn enqueue_mic(&mut self, payload: &[u8], now_ms: u64) -> bool {
        let mut wire: Vec<u8, MAX_PACKET> = Vec::new();
        if wire.push(OP_MIC).is_err() || wire.extend_from_slice(payload).is_err() {
            return false;
        }
        self.queue.enqueue(Command::new(CommandKind::Mic, true, &wire, now_ms))
    }

    /// Start a bitmap transfer. Switches to `DisplayMode::Bitmap`
    /// first (clearing any pending text), then hands `data` to the
    /// bitmap FSM behind a placeholder queue entry so ordinary queue
    /// dequeue logic keeps working once it finishes.
    pub fn start_bitmap(&mut self, data: &[u8], now_ms: u64) -> bool {
        if self.bitmap.in_progress() {
            return false;
        }
        self.switch_mode(DisplayMode::Bitmap, now_ms);
        if !self.bitmap.start(data) {
            return false;
        }
        self.heartbeat.note_activity(now_ms);
        self.queue.enqueue(Command::new(CommandKind::BmpChunk, true, &[], now_ms))
    }

    pub fn bitmap_in_progress(&self) -> bool {
        self.bitmap.in_progress()
    }

    /// Next packet to send and which arm it goes to, or `None` if
    /// nothing is currently due (awaiting an ACK, or queue empty).
    pub fn poll(&mut self, now_ms: u64) -> Option<SendJob> {
        if self.bitmap.in_progress() {
            let bytes = self.bitmap.current_packet()?;
            let mut out: Vec<u8, MAX_PACKET> = Vec::new();
            let _ = out.extend_from_slice(&bytes);
            return Some(SendJob { arm: self.bitmap.arm_turn(), bytes: out });
        }

        if self.queue.check_timeout(now_ms, GLASSES_COMMAND_TIMEOUT_MS) {
            self.queue.advance();
        }
        if matches!(self.queue.current(), Some(c) if matches!(c.state, CmdState::Done | CmdState::Failed)) {
            self.queue.advance();
        }

        let cmd = self.queue.current()?;
        match cmd.state {
            CmdState::Pending => {
                let bytes = Vec::from_slice(&cmd.payload).ok()?;
                self.queue.mark_left_sent(now_ms);
                Some(SendJob { arm: Arm::Left, bytes })
            }
            CmdState::LeftAcked => {
                let bytes = Vec::from_slice(&cmd.payload).ok()?;
                self.queue.mark_right_sent(now_ms);
                Some(SendJob { arm: Arm::Right, bytes })
            }
            _ => None,
        }
    }

    /// Report the outcome of writing `poll()`'s last packet. Only the
    /// bitmap FSM cares about send-completion directly; command-queue
    /// entries are driven entirely by `on_notification`'s ACKs.
    pub fn on_send_result(&mut self, ok: bool) {
        if self.bitmap.in_progress() {
            if self.bitmap.on_send_result(ok) != BitmapOutcome::InProgress {
                self.finish_bitmap_placeholder();
            }
        }
    }

    /// Feed an inbound NUS notification from one arm into whichever
    /// FSM currently owns the wire.
    pub fn on_notification(&mut self, from_left: bool, data: &[u8], now_ms: u64) {
        let msg = ArmMessage::parse(data);
        self.heartbeat.note_activity(now_ms);
        if self.bitmap.in_progress() {
            if self.bitmap.on_arm_message(from_left, &msg) != BitmapOutcome::InProgress {
                self.finish_bitmap_placeholder();
            }
            return;
        }
        self.queue.on_arm_message(from_left, &msg);
    }

    fn finish_bitmap_placeholder(&mut self) {
        if let Some(cmd) = self.queue.current_mut() {
            if cmd.kind == CommandKind::BmpChunk {
                cmd.state = CmdState::Done;
            }
        }
        self.queue.advance();
    }

    /// Whether a heartbeat is due; only meaningful when `poll()` has
    /// nothing else to send (heartbeats never preempt real traffic).
    pub fn heartbeat_due(&self, now_secs: u64) -> bool {
        self.heartbeat.due(now_secs)
    }

    /// Build the next heartbeat packet (sent to both arms by the
    /// caller) and record it as activity... no: heartbeats
    /// deliberately do NOT count as activity (spec.md §4.10).
    pub fn build_heartbeat(&mut self) -> Vec<u8, { heartbeat::PACKET_LEN }> {
        self.heartbeat.next_packet()
    }
}

impl Default for GlassesEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::glasses::opcodes::STATUS_ACK;

    #[test]
    fn text_command_goes_left_then_right_then_done() {
        let mut e = GlassesEngine::new();
        assert!(e.enqueue_text(b"hi", 0));

        let job = e.poll(0).unwrap();
        assert_eq!(job.arm, Arm::Left);
        assert_eq!(job.bytes[0], OP_TEXT);
        e.on_notification(true, &[OP_TEXT, STATUS_ACK], 0);

        let job2 = e.poll(0).unwrap();
        assert_eq!(job2.arm, Arm::Right);
        e.on_notification(false, &[OP_TEXT, STATUS_ACK], 0);

        assert!(e.poll(0).is_none());
    }

    #[test]
    fn timeout_fails_and_advances_past_stuck_command() {
        let mut e = GlassesEngine::new();
        e.enqueue_text(b"hi", 0);
        e.enqueue_text(b"bye", 0);
        e.poll(0); // Left sent at t=0, never acked

        let job = e.poll(10_000).unwrap(); // second command's Left send
        assert_eq!(job.arm, Arm::Left);
    }

    #[test]
    fn clear_accepts_dashboard_close_as_ack() {
        let mut e = GlassesEngine::new();
        e.enqueue_clear(0);
        let job = e.poll(0).unwrap();
        assert_eq!(job.arm, Arm::Left);
        e.on_notification(true, &[0xF5, 0x03], 0); // DashboardClose
        let job2 = e.poll(0).unwrap();
        assert_eq!(job2.arm, Arm::Right);
        e.on_notification(false, &[0xF5, 0x03], 0);
        assert!(e.poll(0).is_none());
    }

    #[test]
    fn bitmap_transfer_drives_via_send_result_not_notification() {
        let mut e = GlassesEngine::new();
        assert!(e.start_bitmap(b"hello", 0));
        assert!(e.bitmap_in_progress());

        let job = e.poll(0).unwrap();
        assert_eq!(job.arm, Arm::Left);
        e.on_send_result(true);
        let job2 = e.poll(0).unwrap();
        assert_eq!(job2.arm, Arm::Right);
        e.on_send_result(true);

        // Single small chunk -> straight to BmpEnd.
        let end = e.poll(0).unwrap();
        assert_eq!(end.bytes[0], 0x20);
    }

    #[test]
    fn switching_to_bitmap_mode_clears_pending_text() {
        let mut e = GlassesEngine::new();
        assert_eq!(e.mode(), DisplayMode::Text);
        e.switch_mode(DisplayMode::Bitmap, 0);
        assert_eq!(e.mode(), DisplayMode::Bitmap);
    }

    #[test]
    fn heartbeat_not_due_right_after_activity() {
        let mut e = GlassesEngine::new();
        e.enqueue_text(b"hi", 100);
        e.on_notification(true, &[OP_TEXT, STATUS_ACK], 100);
        assert!(!e.heartbeat_due(102));
    }

    #[test]
    fn unrelated_event_is_ignored_by_idle_queue() {
        let mut e = GlassesEngine::new();
        e.on_notification(true, &[0xF5, 0x10], 0); // TapSingle, nothing queued
        assert!(e.poll(0).is_none());
    }

    #[test]
    fn second_bitmap_start_while_in_progress_is_rejected() {
        let mut e = GlassesEngine::new();
        assert!(e.start_bitmap(b"first", 0));
        assert!(!e.start_bitmap(b"second", 0));
    }
}
