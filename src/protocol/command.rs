//! Downlink command scanning.
//!
//! The tracking server configures a device by writing short text commands onto the same
//! connection the device reports on. This module defines the [`Command`] type and the
//! scanner that recovers commands from the raw inbound byte stream.
//!
//! # Grammar
//!
//! ```text
//! (SET|GET|CLR) <KEY>[:<VALUE>]
//! ```
//!
//! - Verbs are case-sensitive and followed by one whitespace character.
//! - `KEY` is one or more uppercase ASCII letters.
//! - `VALUE` runs to the end of the buffer, a line terminator, or the start of the next
//!   command. The server does not delimit commands, so `SET PIP:1.2.3.4GET UR` carries
//!   two of them.
//!
//! # Reassembly
//!
//! TCP delivers the stream in arbitrary pieces. [`InboundBuffer`] accumulates reads and
//! hands out every complete command it can find, removing exactly the matched bytes and
//! leaving noise and trailing partial commands in place for the next read.
//!
//! A command at the end of the buffer is complete, since the server sends the last
//! one without a terminator. The flip side is that a read boundary inside a key
//! splits it: `SET U` followed later by `RE:20` yields `SET U` and leaves `RE:20`
//! behind as noise. Boundaries inside a value are rare because a read keeps draining
//! the socket until it has been quiet for half a second.
//!
//! # Example
//! ```rust
//! use ais140::protocol::{InboundBuffer, Verb};
//!
//! let mut inbound = InboundBuffer::new();
//! inbound.push(b"SET PIP:1.2.3.4GET UR");
//!
//! let commands = inbound.drain_commands();
//! assert_eq!(commands[0].verb, Verb::Set);
//! assert_eq!(commands[0].value, "1.2.3.4");
//! assert_eq!(commands[1].key, "UR");
//! assert!(inbound.is_empty());
//! ```
use std::fmt;

use log::warn;
use thiserror::Error;

/// Inbound bytes kept while no command can be found in them.
pub const MAX_INBOUND: usize = 4096;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("no command provided")]
    Empty,

    #[error("unrecognized command '{0}'")]
    UnrecognizedCommand(String),

    #[error("'{0}' command requires an uppercase key. Example: SET UR:10")]
    MissingKey(String),

    #[error("unexpected trailing input '{0}'")]
    Trailing(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verb {
    Set,
    Get,
    Clr,
}

impl Verb {
    const ALL: [Verb; 3] = [Verb::Set, Verb::Get, Verb::Clr];

    pub fn as_str(&self) -> &'static str {
        match self {
            Verb::Set => "SET",
            Verb::Get => "GET",
            Verb::Clr => "CLR",
        }
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Device settings a server can address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConfigKey {
    PrimaryServerIp,
    PrimaryServerPort,
    SecondaryServerIp,
    SecondaryServerPort,
    EmergencyOff,
    EmergencyDuration,
    Apn,
    SpeedLimit,
    VehicleRegistration,
    UpdateRate,
    UpdateRateEmergency,
    UpdateRateHealth,
    VendorId,
    Odometer,
}

impl ConfigKey {
    pub fn from_code(code: &str) -> Option<Self> {
        let key = match code {
            "PIP" => ConfigKey::PrimaryServerIp,
            "PPT" => ConfigKey::PrimaryServerPort,
            "SIP" => ConfigKey::SecondaryServerIp,
            "SPT" => ConfigKey::SecondaryServerPort,
            "EO" => ConfigKey::EmergencyOff,
            "ED" => ConfigKey::EmergencyDuration,
            "APN" => ConfigKey::Apn,
            "SL" => ConfigKey::SpeedLimit,
            "VN" => ConfigKey::VehicleRegistration,
            "UR" => ConfigKey::UpdateRate,
            "URE" => ConfigKey::UpdateRateEmergency,
            "URH" => ConfigKey::UpdateRateHealth,
            "VID" => ConfigKey::VendorId,
            "ODM" => ConfigKey::Odometer,
            _ => return None,
        };
        Some(key)
    }

    pub fn code(&self) -> &'static str {
        match self {
            ConfigKey::PrimaryServerIp => "PIP",
            ConfigKey::PrimaryServerPort => "PPT",
            ConfigKey::SecondaryServerIp => "SIP",
            ConfigKey::SecondaryServerPort => "SPT",
            ConfigKey::EmergencyOff => "EO",
            ConfigKey::EmergencyDuration => "ED",
            ConfigKey::Apn => "APN",
            ConfigKey::SpeedLimit => "SL",
            ConfigKey::VehicleRegistration => "VN",
            ConfigKey::UpdateRate => "UR",
            ConfigKey::UpdateRateEmergency => "URE",
            ConfigKey::UpdateRateHealth => "URH",
            ConfigKey::VendorId => "VID",
            ConfigKey::Odometer => "ODM",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            ConfigKey::PrimaryServerIp => "primary server ip",
            ConfigKey::PrimaryServerPort => "primary server port",
            ConfigKey::SecondaryServerIp => "secondary server ip",
            ConfigKey::SecondaryServerPort => "secondary server port",
            ConfigKey::EmergencyOff => "emergency off",
            ConfigKey::EmergencyDuration => "emergency duration",
            ConfigKey::Apn => "network APN",
            ConfigKey::SpeedLimit => "speed limit",
            ConfigKey::VehicleRegistration => "vehicle registration number",
            ConfigKey::UpdateRate => "update rate",
            ConfigKey::UpdateRateEmergency => "update rate in emergency",
            ConfigKey::UpdateRateHealth => "health packet update rate",
            ConfigKey::VendorId => "vendor id",
            ConfigKey::Odometer => "odometer",
        }
    }
}

/// A single downlink command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub verb: Verb,
    pub key: String,
    /// Text after `KEY:`; empty when the command carries no value.
    pub value: String,
}

impl Command {
    pub fn new(verb: Verb, key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            verb,
            key: key.into(),
            value: value.into(),
        }
    }

    /// The setting this command addresses, if it is a known one.
    pub fn config_key(&self) -> Option<ConfigKey> {
        ConfigKey::from_code(&self.key)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.value.is_empty() {
            write!(f, "{} {}", self.verb, self.key)
        } else {
            write!(f, "{} {}:{}", self.verb, self.key, self.value)
        }
    }
}

impl TryFrom<&str> for Command {
    type Error = CommandError;

    /// Parses a string holding exactly one command.
    fn try_from(s: &str) -> Result<Self, Self::Error> {
        let s = s.trim();
        if s.is_empty() {
            return Err(CommandError::Empty);
        }

        match find_command(s.as_bytes()) {
            Some(m) if m.start == 0 && m.end == s.len() => Ok(m.command),
            Some(m) if m.start == 0 => Err(CommandError::Trailing(s[m.end..].to_string())),
            _ => match Verb::ALL.iter().find(|v| s.starts_with(v.as_str())) {
                Some(verb) => Err(CommandError::MissingKey(verb.to_string())),
                None => Err(CommandError::UnrecognizedCommand(s.to_string())),
            },
        }
    }
}

/// Bytes received from the server that have not yet formed a command.
#[derive(Debug, Default, Clone)]
pub struct InboundBuffer {
    bytes: Vec<u8>,
}

impl InboundBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, data: &[u8]) {
        self.bytes.extend_from_slice(data);
    }

    /// Removes and returns every complete command, in stream order.
    pub fn drain_commands(&mut self) -> Vec<Command> {
        let commands = extract_commands(&mut self.bytes);

        if self.bytes.len() > MAX_INBOUND {
            let excess = self.bytes.len() - MAX_INBOUND;
            warn!("discarding {excess} unparsed inbound bytes");
            self.bytes.drain(..excess);
        }
        commands
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn clear(&mut self) {
        self.bytes.clear();
    }
}

/// Removes every complete command from `buffer`, keeping unmatched bytes.
pub fn extract_commands(buffer: &mut Vec<u8>) -> Vec<Command> {
    let mut commands = Vec::new();
    while let Some(m) = find_command(buffer) {
        buffer.drain(m.start..m.end);
        commands.push(m.command);
    }
    commands
}

struct Match {
    start: usize,
    end: usize,
    command: Command,
}

fn find_command(buf: &[u8]) -> Option<Match> {
    let (start, verb) = (0..buf.len()).find_map(|i| command_at(buf, i).map(|v| (i, v)))?;

    let key_start = start + 4;
    let key_end = key_start
        + buf[key_start..]
            .iter()
            .take_while(|b| b.is_ascii_uppercase())
            .count();

    let value_start = match buf.get(key_end) {
        Some(b':') => key_end + 1,
        _ => key_end,
    };
    let value_end = (value_start..buf.len())
        .find(|&j| matches!(buf[j], b'\r' | b'\n') || command_at(buf, j).is_some())
        .unwrap_or(buf.len());

    let end = match &buf[value_end..] {
        [b'\r', b'\n', ..] => value_end + 2,
        [b'\r' | b'\n', ..] => value_end + 1,
        _ => value_end,
    };

    let command = Command {
        verb,
        key: String::from_utf8_lossy(&buf[key_start..key_end]).into_owned(),
        value: String::from_utf8_lossy(&buf[value_start..value_end]).into_owned(),
    };
    Some(Match {
        start,
        end,
        command,
    })
}

/// A verb, one whitespace byte and the first key letter starting at `i`.
fn command_at(buf: &[u8], i: usize) -> Option<Verb> {
    let rest = buf.get(i..)?;
    let verb = Verb::ALL
        .into_iter()
        .find(|v| rest.starts_with(v.as_str().as_bytes()))?;
    match rest.get(3..5)? {
        [ws, key] if ws.is_ascii_whitespace() && key.is_ascii_uppercase() => Some(verb),
        _ => None,
    }
}
