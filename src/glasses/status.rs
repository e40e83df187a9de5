//! Display-mode toggle and status-line assembly (spec.md §4.10
//! "Display-mode toggle", §4.11), pure and host-testable.
//!
//! The glasses only ever show one modality at a time. `ModeToggle`
//! tracks which, and tells the caller when it must clear the other
//! one before switching.

use core::fmt::Write as _;
use heapless::String;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayMode {
    Text,
    Bitmap,
}

/// Tracks `bitmapMode` (spec.md §4.10). Switching modes is the
/// caller's cue to clear the modality being left.
pub struct ModeToggle {
    mode: DisplayMode,
}

impl ModeToggle {
    pub const fn new() -> Self {
        Self { mode: DisplayMode::Text }
    }

    pub fn mode(&self) -> DisplayMode {
        self.mode
    }

    /// Switch to `mode`. Returns `Some(previous_mode)` if this was an
    /// actual change the caller must clear, `None` if already in that
    /// mode.
    pub fn switch_to(&mut self, mode: DisplayMode) -> Option<DisplayMode> {
        if self.mode == mode {
            return None;
        }
        let previous = self.mode;
        self.mode = mode;
        Some(previous)
    }
}

impl Default for ModeToggle {
    fn default() -> Self {
        Self::new()
    }
}

pub const BAR_LEVELS: u8 = 5;
pub const STATUS_LINE_CAP: usize = 96;

/// Quantize a battery percentage into `0..=BAR_LEVELS` bars.
pub fn battery_bars(percent: Option<u8>) -> u8 {
    match percent {
        None => 0,
        Some(p) => {
            let clamped = p.min(100) as u32;
            (((clamped * BAR_LEVELS as u32) + 99) / 100).min(BAR_LEVELS as u32) as u8
        }
    }
}

/// Quantize an RSSI reading (dBm, typically negative) into
/// `0..=BAR_LEVELS` bars. Thresholds follow the common "5-bar" Wi-Fi
/// style convention: stronger (less negative) is more bars.
pub fn rssi_bars(rssi_dbm: Option<i8>) -> u8 {
    match rssi_dbm {
        None => 0,
        Some(r) if r >= -50 => 5,
        Some(r) if r >= -60 => 4,
        Some(r) if r >= -70 => 3,
        Some(r) if r >= -80 => 2,
        Some(_) => 1,
    }
}

fn bar_glyphs(level: u8, out: &mut String<STATUS_LINE_CAP>) {
    for i in 0..BAR_LEVELS {
        let _ = out.push(if i < level { '|' } else { '.' });
    }
}

/// Inputs the glasses engine assembles into the text-mode status
/// line: connected device name, connection state, battery level, and
/// link RSSI.
pub struct StatusSnapshot {
    pub device_name: String<31>,
    pub connected: bool,
    pub battery_percent: Option<u8>,
    pub rssi_dbm: Option<i8>,
}

impl StatusSnapshot {
    /// Render `"<name> <CONNECTED|DISCONNECTED> BAT:||||. RSSI:|||.."`.
    /// Truncates silently at `STATUS_LINE_CAP` rather than erroring;
    /// this is a display string, not a protocol payload.
    pub fn render(&self) -> String<STATUS_LINE_CAP> {
        let mut line: String<STATUS_LINE_CAP> = String::new();
        let name = if self.device_name.is_empty() { "no device" } else { self.device_name.as_str() };
        let state = if self.connected { "CONNECTED" } else { "DISCONNECTED" };
        let _ = write!(&mut line, "{} {} BAT:", name, state);
        bar_glyphs(battery_bars(self.battery_percent), &mut line);
        let _ = line.push_str(" RSSI:");
        bar_glyphs(rssi_bars(self.rssi_dbm), &mut line);
        line
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn toggle_reports_previous_mode_on_change() {
        let mut m = ModeToggle::new();
        assert_eq!(m.mode(), DisplayMode::Text);
        assert_eq!(m.switch_to(DisplayMode::Bitmap), Some(DisplayMode::Text));
        assert_eq!(m.mode(), DisplayMode::Bitmap);
    }

    #[test]
    fn toggle_is_noop_when_already_in_mode() {
        let mut m = ModeToggle::new();
        assert_eq!(m.switch_to(DisplayMode::Text), None);
    }

    #[test]
    fn battery_bars_quantizes_full_and_empty() {
        assert_eq!(battery_bars(Some(100)), 5);
        assert_eq!(battery_bars(Some(0)), 0);
        assert_eq!(battery_bars(None), 0);
        assert_eq!(battery_bars(Some(1)), 1);
    }

    #[test]
    fn rssi_bars_quantizes_by_threshold() {
        assert_eq!(rssi_bars(Some(-40)), 5);
        assert_eq!(rssi_bars(Some(-65)), 3);
        assert_eq!(rssi_bars(Some(-95)), 1);
        assert_eq!(rssi_bars(None), 0);
    }

    #[test]
    fn render_includes_name_state_and_bars() {
        let mut name: String<31> = String::new();
        let _ = name.push_str("MouthPad");
        let snapshot = StatusSnapshot {
            device_name: name,
            connected: true,
            battery_percent: Some(80),
            rssi_dbm: Some(-55),
        };
        let line = snapshot.render();
        assert!(line.contains("MouthPad"));
        assert!(line.contains("CONNECTED"));
        assert!(line.contains("BAT:"));
        assert!(line.contains("RSSI:"));
    }

    #[test]
    fn render_falls_back_when_no_device_name() {
        let snapshot = StatusSnapshot {
            device_name: String::new(),
            connected: false,
            battery_percent: None,
            rssi_dbm: None,
        };
        let line = snapshot.render();
        assert!(line.contains("no device"));
        assert!(line.contains("DISCONNECTED"));
    }
}
