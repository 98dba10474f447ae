//! Buzzer Protocol Types

use std::fmt;

use crate::protocol::constants::{ACTIVATE_PREFIX, ACTIVATION_HOLD, OUTPUT_ID_OFFSET, REPLY_INVALID};

/// Identifier of a single controllable output.
///
/// The wire protocol addresses outputs by exactly one character, so the
/// identifier is a thin wrapper around that character. The set of known
/// identifiers is fixed at startup from the configured pin map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OutputId(char);

impl OutputId {
    /// Create an identifier from its wire character
    pub fn new(token: char) -> Self {
        Self(token)
    }

    /// The wire character naming this output
    pub fn as_char(&self) -> char {
        self.0
    }
}

impl From<char> for OutputId {
    fn from(token: char) -> Self {
        Self(token)
    }
}

impl fmt::Display for OutputId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A single command parsed from one inbound message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Drive the named output for the fixed hold window
    Activate { id: OutputId },
    /// Anything that does not match the activate grammar
    Invalid,
}

/// Parse one inbound message against the fixed-offset grammar.
///
/// A message is an activation iff its first two characters equal `"on"`,
/// a character exists at offset 3, and that character names a known
/// output. Offset 2 and anything past offset 3 carry no meaning and are
/// never inspected, matching the wire format existing clients speak.
pub fn parse_command(raw: &str, known: &[OutputId]) -> Command {
    let prefix: String = raw.chars().take(ACTIVATE_PREFIX.len()).collect();
    if prefix != ACTIVATE_PREFIX {
        return Command::Invalid;
    }

    match raw.chars().nth(OUTPUT_ID_OFFSET) {
        Some(token) if known.contains(&OutputId::new(token)) => Command::Activate {
            id: OutputId::new(token),
        },
        _ => Command::Invalid,
    }
}

/// Server reply for one processed message.
///
/// These are the only three things a client ever reads back; the literal
/// texts are part of the wire contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    TurnedOn(OutputId),
    TurnedOff(OutputId),
    Invalid,
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reply::TurnedOn(id) => write!(f, "Buzzer {} turned ON", id),
            Reply::TurnedOff(id) => write!(
                f,
                "Buzzer {} turned OFF after {} seconds",
                id,
                ACTIVATION_HOLD.as_secs()
            ),
            Reply::Invalid => f.write_str(REPLY_INVALID),
        }
    }
}
