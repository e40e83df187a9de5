//! Dual-arm command queue & ACK protocol (spec.md §3/§4.10), pure and
//! host-testable.
//!
//! For any dual-arm command: send to Left, wait for its ACK, send the
//! identical packet to Right, wait for its ACK, mark Done, pull next.
//! A per-command timeout marks it Failed and advances the queue.
//!
//! The former implicit coupling ("this event also counts as that
//! command's ACK") is modelled explicitly here as `expectedAcks: set
//! of AckKind` (spec.md §9 design note), rather than left as opcode
//! collisions the caller has to remember.

use crate::config::GLASSES_QUEUE_CAPACITY;
use crate::glasses::opcodes::{ArmMessage, GlassesEvent};
use heapless::{Deque, Vec};

/// What kind of command this is; determines `expected_acks` and the
/// bytes placed on the wire by `glasses::engine`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    Text,
    Clear,
    Mic,
    BmpChunk,
    BmpEnd,
    BmpCrc,
}

/// `CmdState = {Pending, LeftSent, LeftAcked, RightSent, Done, Failed}`
/// (spec.md §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmdState {
    Pending,
    LeftSent,
    LeftAcked,
    RightSent,
    Done,
    Failed,
}

/// The closed set of ACK kinds a command may be satisfied by
/// (spec.md §9: "keep the set closed and documented").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckKind {
    /// The formal `0x4E`/`0xC9`-style response for this command's
    /// opcode.
    Formal,
    /// A specific `0xF5` event known to fire before the formal
    /// response for some commands (e.g. dashboard close acking a
    /// `Clear`).
    Event(GlassesEvent),
}

pub const MAX_PAYLOAD: usize = 256;

/// `{type, dualArm, payload, state, tStart}` (spec.md §3).
#[derive(Debug, Clone)]
pub struct Command {
    pub kind: CommandKind,
    pub dual_arm: bool,
    pub payload: Vec<u8, MAX_PAYLOAD>,
    pub state: CmdState,
    /// Monotonic tick (milliseconds) this command entered its current
    /// `*Sent` state; used by the engine to detect the ~2s timeout.
    pub t_start: u64,
    /// ACK kinds this command accepts in its current phase.
    pub expected_acks: [Option<AckKind>; 2],
}

impl Command {
    pub fn new(kind: CommandKind, dual_arm: bool, payload: &[u8], now_ms: u64) -> Self {
        Self {
            kind,
            dual_arm,
            payload: Vec::from_slice(payload).unwrap_or_default(),
            state: CmdState::Pending,
            t_start: now_ms,
            expected_acks: expected_acks_for(kind),
        }
    }

    fn accepts(&self, msg: &ArmMessage) -> bool {
        self.expected_acks.iter().flatten().any(|ack| match ack {
            AckKind::Formal => msg.is_ack(),
            AckKind::Event(e) => matches!(msg, ArmMessage::Event(ev) if ev == e),
        })
    }
}

/// Which ACK kinds satisfy a command of this kind. Only `Clear`
/// (which the glasses may acknowledge either formally or via a
/// dashboard-close event) has a second member; everything else uses
/// only the formal response.
fn expected_acks_for(kind: CommandKind) -> [Option<AckKind>; 2] {
    match kind {
        CommandKind::Clear => [Some(AckKind::Formal), Some(AckKind::Event(GlassesEvent::DashboardClose))],
        _ => [Some(AckKind::Formal), None],
    }
}

/// Bounded ring buffer (capacity `GLASSES_QUEUE_CAPACITY`). If full,
/// the oldest `Pending` entry is dropped before enqueue; the entry
/// currently in flight is never dropped (spec.md §3).
pub struct CommandQueue {
    entries: Deque<Command, GLASSES_QUEUE_CAPACITY>,
}

impl CommandQueue {
    pub fn new() -> Self {
        Self { entries: Deque::new() }
    }

    /// Enqueue a new command, evicting the oldest `Pending` entry if
    /// the queue is full. Returns `false` if no entry could be
    /// evicted (queue is full of in-flight/active work).
    pub fn enqueue(&mut self, cmd: Command) -> bool {
        if self.entries.is_full() {
            let evicted = self.evict_oldest_pending();
            if !evicted {
                return false;
            }
        }
        self.entries.push_back(cmd).is_ok()
    }

    fn evict_oldest_pending(&mut self) -> bool {
        // Deque has no in-place remove; rebuild without the first
        // Pending entry found (capacity is small, 8 entries).
        let mut rebuilt: Deque<Command, GLASSES_QUEUE_CAPACITY> = Deque::new();
        let mut evicted = false;
        while let Some(entry) = self.entries.pop_front() {
            if !evicted && entry.state == CmdState::Pending {
                evicted = true;
                continue;
            }
            let _ = rebuilt.push_back(entry);
        }
        self.entries = rebuilt;
        evicted
    }

    /// The command currently in flight (front of the queue), if any.
    pub fn current(&self) -> Option<&Command> {
        self.entries.front()
    }

    pub fn current_mut(&mut self) -> Option<&mut Command> {
        self.entries.front_mut()
    }

    /// Pop the front entry once it reaches `Done`/`Failed`.
    pub fn advance(&mut self) -> Option<Command> {
        match self.entries.front() {
            Some(c) if matches!(c.state, CmdState::Done | CmdState::Failed) => self.entries.pop_front(),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drive the front command's state machine with an incoming
    /// message from the given arm side. Returns `true` if the
    /// message was consumed as a state transition.
    pub fn on_arm_message(&mut self, from_left: bool, msg: &ArmMessage) -> bool {
        let Some(cmd) = self.entries.front_mut() else {
            return false;
        };
        if msg.is_protocol_error() {
            cmd.state = CmdState::Failed;
            return true;
        }
        if !cmd.accepts(msg) {
            return false;
        }
        match (cmd.state, from_left) {
            (CmdState::LeftSent, true) => {
                cmd.state = CmdState::LeftAcked;
                true
            }
            (CmdState::RightSent, false) => {
                cmd.state = if cmd.dual_arm { CmdState::Done } else { CmdState::Done };
                true
            }
            _ => false,
        }
    }

    /// Mark the front command as having been dispatched to Left.
    pub fn mark_left_sent(&mut self, now_ms: u64) {
        if let Some(cmd) = self.entries.front_mut() {
            cmd.state = CmdState::LeftSent;
            cmd.t_start = now_ms;
        }
    }

    /// Mark the front command as having been dispatched to Right
    /// (only valid once Left has acked, for dual-arm commands).
    pub fn mark_right_sent(&mut self, now_ms: u64) {
        if let Some(cmd) = self.entries.front_mut() {
            cmd.state = CmdState::RightSent;
            cmd.t_start = now_ms;
        }
    }

    /// Timeout check: if the front command has been in a `*Sent`
    /// state for longer than `timeout_ms`, mark it `Failed`.
    pub fn check_timeout(&mut self, now_ms: u64, timeout_ms: u64) -> bool {
        if let Some(cmd) = self.entries.front_mut() {
            let in_flight = matches!(cmd.state, CmdState::LeftSent | CmdState::RightSent);
            if in_flight && now_ms.saturating_sub(cmd.t_start) >= timeout_ms {
                cmd.state = CmdState::Failed;
                return true;
            }
        }
        false
    }
}

impl Default for CommandQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enqueue_and_current_roundtrip() {
        let mut q = CommandQueue::new();
        assert!(q.enqueue(Command::new(CommandKind::Text, true, b"hi", 0)));
        assert_eq!(q.len(), 1);
        assert_eq!(q.current().unwrap().kind, CommandKind::Text);
    }

    #[test]
    fn full_queue_evicts_oldest_pending() {
        let mut q = CommandQueue::new();
        for _ in 0..GLASSES_QUEUE_CAPACITY {
            assert!(q.enqueue(Command::new(CommandKind::Text, true, b"x", 0)));
        }
        assert_eq!(q.len(), GLASSES_QUEUE_CAPACITY);
        // Queue is full of Pending entries; enqueueing one more evicts
        // the oldest Pending rather than failing.
        assert!(q.enqueue(Command::new(CommandKind::Clear, true, b"y", 0)));
        assert_eq!(q.len(), GLASSES_QUEUE_CAPACITY);
    }

    #[test]
    fn in_flight_entry_is_never_evicted() {
        let mut q = CommandQueue::new();
        for _ in 0..GLASSES_QUEUE_CAPACITY {
            assert!(q.enqueue(Command::new(CommandKind::Text, true, b"x", 0)));
        }
        q.mark_left_sent(0); // front entry is now LeftSent, not Pending
        assert!(q.enqueue(Command::new(CommandKind::Clear, true, b"y", 0)));
        assert_eq!(q.current().unwrap().state, CmdState::LeftSent);
    }

    #[test]
    fn left_ack_then_right_ack_completes_dual_arm_command() {
        let mut q = CommandQueue::new();
        q.enqueue(Command::new(CommandKind::Text, true, b"hi", 0));
        q.mark_left_sent(0);
        assert!(q.on_arm_message(true, &ArmMessage::TextAck { status: 0xC9 }));
        assert_eq!(q.current().unwrap().state, CmdState::LeftAcked);

        q.mark_right_sent(0);
        assert!(q.on_arm_message(false, &ArmMessage::TextAck { status: 0xC9 }));
        assert_eq!(q.current().unwrap().state, CmdState::Done);

        let popped = q.advance().unwrap();
        assert_eq!(popped.state, CmdState::Done);
        assert!(q.is_empty());
    }

    #[test]
    fn right_ack_before_left_sent_is_ignored() {
        let mut q = CommandQueue::new();
        q.enqueue(Command::new(CommandKind::Text, true, b"hi", 0));
        // Still Pending: a stray Right ack should not be consumed.
        assert!(!q.on_arm_message(false, &ArmMessage::TextAck { status: 0xC9 }));
        assert_eq!(q.current().unwrap().state, CmdState::Pending);
    }

    #[test]
    fn protocol_error_fails_the_command() {
        let mut q = CommandQueue::new();
        q.enqueue(Command::new(CommandKind::Text, true, b"hi", 0));
        q.mark_left_sent(0);
        assert!(q.on_arm_message(true, &ArmMessage::TextAck { status: 0x00 }));
        assert_eq!(q.current().unwrap().state, CmdState::Failed);
    }

    #[test]
    fn timeout_fails_an_in_flight_command() {
        let mut q = CommandQueue::new();
        q.enqueue(Command::new(CommandKind::Text, true, b"hi", 0));
        q.mark_left_sent(1_000);
        assert!(!q.check_timeout(1_500, 2_000));
        assert!(q.check_timeout(3_500, 2_000));
        assert_eq!(q.current().unwrap().state, CmdState::Failed);
    }

    #[test]
    fn clear_command_accepts_dashboard_close_event_as_ack() {
        let mut q = CommandQueue::new();
        q.enqueue(Command::new(CommandKind::Clear, true, b"", 0));
        q.mark_left_sent(0);
        let consumed = q.on_arm_message(true, &ArmMessage::Event(GlassesEvent::DashboardClose));
        assert!(consumed);
        assert_eq!(q.current().unwrap().state, CmdState::LeftAcked);
    }

    #[test]
    fn unrelated_event_does_not_advance_other_commands() {
        let mut q = CommandQueue::new();
        q.enqueue(Command::new(CommandKind::Text, true, b"hi", 0));
        q.mark_left_sent(0);
        let consumed = q.on_arm_message(true, &ArmMessage::Event(GlassesEvent::TapSingle));
        assert!(!consumed);
        assert_eq!(q.current().unwrap().state, CmdState::LeftSent);
    }
}
