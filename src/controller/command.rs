//! Operator commands accepted at the prompt.

pub const PROMPT: &str = "Enter command: ";
pub const RESTART_CONFIRMATION: &str = "Are you sure you want to restart the ESP32? (y/n): ";

pub const HELP: &str = "\nAvailable Commands:
   on      - Turn LED ON
   off     - Turn LED OFF
   status  - Request device status
   restart - Restart ESP32 device
   help    - Show this help
   quit    - Exit program
";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    LedOn,
    LedOff,
    Status,
    Restart,
    Help,
    Quit,
    /// Anything else, normalized
    Unknown(String),
}

impl Command {
    /// Parses one input line; case and surrounding whitespace are ignored.
    pub fn parse(line: &str) -> Self {
        let normalized = line.trim().to_lowercase();
        match normalized.as_str() {
            "on" => Command::LedOn,
            "off" => Command::LedOff,
            "status" => Command::Status,
            "restart" => Command::Restart,
            "help" => Command::Help,
            "quit" | "exit" | "q" => Command::Quit,
            _ => Command::Unknown(normalized),
        }
    }
}

/// Only a bare `y` or `Y` confirms a restart.
pub fn is_confirmation(answer: &str) -> bool {
    answer == "y" || answer == "Y"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_commands() {
        assert_eq!(Command::parse("on"), Command::LedOn);
        assert_eq!(Command::parse("  OFF \t"), Command::LedOff);
        assert_eq!(Command::parse("Status"), Command::Status);
        assert_eq!(Command::parse("restart"), Command::Restart);
        assert_eq!(Command::parse("HELP"), Command::Help);
        for quit in ["quit", "exit", "q", " Q "] {
            assert_eq!(Command::parse(quit), Command::Quit);
        }
    }

    #[test]
    fn unknown_input_is_echoed_normalized() {
        assert_eq!(
            Command::parse("  Blink "),
            Command::Unknown("blink".to_string())
        );
        assert_eq!(Command::parse(""), Command::Unknown(String::new()));
        assert_eq!(
            Command::parse("on off"),
            Command::Unknown("on off".to_string())
        );
    }

    #[test]
    fn restart_needs_exact_y() {
        assert!(is_confirmation("y"));
        assert!(is_confirmation("Y"));
        for answer in ["", "n", "yes", " y", "y ", "YY"] {
            assert!(!is_confirmation(answer), "{:?} must not confirm", answer);
        }
    }
}
