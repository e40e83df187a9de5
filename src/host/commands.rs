//! CDC log/command port line parsing (spec.md §6), pure and
//! host-testable. Split out from `host::bridge` so the parsing logic
//! itself never depends on the embedded-only USB/CDC stack.

use heapless::String;

/// Request the main task must satisfy on the bridge's behalf: these
/// touch BLE/bond state or the bootloader, which the bridge does not
/// own (spec.md §6 command port).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CdcCommand {
    Dfu,
    Disconnect,
    Reset,
    Restart,
    PrintDeviceInfo,
}

/// Parse one line of the log/command port (spec.md §6: "line-delimited
/// commands, case-sensitive ASCII"). Unrecognised lines are ignored.
pub fn parse_command(line: &str) -> Option<CdcCommand> {
    match line.trim_end() {
        "dfu" => Some(CdcCommand::Dfu),
        "disconnect" => Some(CdcCommand::Disconnect),
        "reset" => Some(CdcCommand::Reset),
        "restart" => Some(CdcCommand::Restart),
        "device" => Some(CdcCommand::PrintDeviceInfo),
        _ => None,
    }
}

/// `serial`/`version` are answered locally; everything else in
/// `CdcCommand` needs the main task.
pub fn local_reply(line: &str) -> Option<String<64>> {
    match line.trim_end() {
        "serial" => {
            let mut s = String::new();
            let _ = s.push_str(crate::config::USB_SERIAL_NUMBER);
            Some(s)
        }
        "version" => {
            let mut s = String::new();
            let _ = core::fmt::Write::write_fmt(
                &mut s,
                format_args!(
                    "{}.{}.{}",
                    crate::config::FW_VERSION_MAJOR,
                    crate::config::FW_VERSION_MINOR,
                    crate::config::FW_VERSION_PATCH
                ),
            );
            Some(s)
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_every_documented_command() {
        assert_eq!(parse_command("dfu"), Some(CdcCommand::Dfu));
        assert_eq!(parse_command("disconnect"), Some(CdcCommand::Disconnect));
        assert_eq!(parse_command("reset"), Some(CdcCommand::Reset));
        assert_eq!(parse_command("restart"), Some(CdcCommand::Restart));
        assert_eq!(parse_command("device"), Some(CdcCommand::PrintDeviceInfo));
    }

    #[test]
    fn unrecognised_line_is_none() {
        assert_eq!(parse_command("bogus"), None);
        assert_eq!(parse_command(""), None);
    }

    #[test]
    fn serial_and_version_are_answered_locally() {
        assert!(local_reply("serial").is_some());
        assert!(local_reply("version").is_some());
        assert!(local_reply("dfu").is_none());
    }

    #[test]
    fn commands_take_no_local_reply() {
        for cmd in ["dfu", "disconnect", "reset", "restart", "device"] {
            assert!(local_reply(cmd).is_none());
            assert!(parse_command(cmd).is_some());
        }
    }

    #[test]
    fn trailing_whitespace_is_trimmed() {
        assert_eq!(parse_command("dfu\r"), Some(CdcCommand::Dfu));
        assert_eq!(parse_command("dfu\n"), Some(CdcCommand::Dfu));
    }
}
