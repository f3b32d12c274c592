//! Line-based commands from the host.

use std::fmt;
use std::str::FromStr;

/// A command received on the serial/stdin line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Start a recording session.
    On,
    /// Stop the session.
    Off,
    /// Capture a snapshot around now.
    Snap,
}

/// A non-empty line that is not a known command.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown command: {0}")]
pub struct UnknownCommand(pub String);

impl FromStr for Command {
    type Err = UnknownCommand;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "on" => Ok(Command::On),
            "off" => Ok(Command::Off),
            "snap" => Ok(Command::Snap),
            _ => Err(UnknownCommand(s.trim().to_string())),
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Command::On => "on",
            Command::Off => "off",
            Command::Snap => "snap",
        };
        f.write_str(name)
    }
}

/// Parse one input line. Blank lines yield `Ok(None)`.
pub fn parse_line(line: &str) -> Result<Option<Command>, UnknownCommand> {
    if line.trim().is_empty() {
        return Ok(None);
    }
    line.parse().map(Some)
}
