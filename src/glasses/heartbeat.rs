//! Heartbeat/keepalive timer (spec.md §4.10 "Heartbeat"), pure and
//! host-testable.
//!
//! The engine checks this on a fixed period; if the glasses link has
//! been idle too long it emits a heartbeat to both arms. Heartbeats
//! themselves never count as activity, otherwise a healthy link would
//! keep itself alive forever without ever doing real work.

use crate::config::HEARTBEAT_ACTIVITY_THRESHOLD_SECS;
use crate::glasses::opcodes::OP_HEARTBEAT;
use heapless::Vec;

pub const PACKET_LEN: usize = 6;

/// Tracks the last time real (non-heartbeat) traffic was seen and
/// produces heartbeat payloads on demand.
pub struct HeartbeatTimer {
    last_activity_secs: u64,
    seq: u8,
}

impl HeartbeatTimer {
    pub const fn new() -> Self {
        Self { last_activity_secs: 0, seq: 0 }
    }

    /// Record that real traffic was seen at `now_secs`.
    pub fn note_activity(&mut self, now_secs: u64) {
        self.last_activity_secs = now_secs;
    }

    /// Whether a heartbeat should fire, given the current tick.
    pub fn due(&self, now_secs: u64) -> bool {
        now_secs.saturating_sub(self.last_activity_secs) >= HEARTBEAT_ACTIVITY_THRESHOLD_SECS
    }

    /// Build `[0x25, 0x06, 0x00, seq, 0x04, seq]` and advance the
    /// sequence counter. Does not touch `last_activity_secs`, per
    /// spec: heartbeats aren't activity.
    pub fn next_packet(&mut self) -> Vec<u8, PACKET_LEN> {
        let seq = self.seq;
        self.seq = self.seq.wrapping_add(1);
        let mut out = Vec::new();
        let _ = out.extend_from_slice(&[OP_HEARTBEAT, 0x06, 0x00, seq, 0x04, seq]);
        out
    }
}

impl Default for HeartbeatTimer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_due_immediately_after_activity() {
        let mut hb = HeartbeatTimer::new();
        hb.note_activity(100);
        assert!(!hb.due(103));
    }

    #[test]
    fn due_after_activity_threshold_elapses() {
        let mut hb = HeartbeatTimer::new();
        hb.note_activity(100);
        assert!(hb.due(106));
    }

    #[test]
    fn packet_matches_wire_format_and_increments_seq() {
        let mut hb = HeartbeatTimer::new();
        let p0 = hb.next_packet();
        assert_eq!(p0.as_slice(), &[OP_HEARTBEAT, 0x06, 0x00, 0, 0x04, 0]);
        let p1 = hb.next_packet();
        assert_eq!(p1.as_slice(), &[OP_HEARTBEAT, 0x06, 0x00, 1, 0x04, 1]);
    }

    #[test]
    fn sending_a_heartbeat_does_not_count_as_activity() {
        let mut hb = HeartbeatTimer::new();
        hb.note_activity(100);
        let _ = hb.next_packet();
        assert!(hb.due(106));
    }

    #[test]
    fn sequence_wraps_at_u8_boundary() {
        let mut hb = HeartbeatTimer::new();
        for _ in 0..255 {
            hb.next_packet();
        }
        let p = hb.next_packet();
        assert_eq!(p[3], 255);
        let wrapped = hb.next_packet();
        assert_eq!(wrapped[3], 0);
    }
}
