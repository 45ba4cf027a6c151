use thiserror::Error;

// Carriage return closing every AT command line.
pub const CR: u8 = 0x0D;
// Control-Z closing an SMS body submitted after the `>` prompt.
pub const CTRL_Z: u8 = 0x1A;

const MAX_COMMAND_LEN: usize = 256;
const MAX_SMS_BODY_LEN: usize = 160;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("command text is empty")]
    Empty,
    #[error("command text is {len} bytes, limit is {limit}")]
    TooLong { len: usize, limit: usize },
    #[error("command text contains a non-printable byte 0x{byte:02X} at offset {offset}")]
    InvalidByte { byte: u8, offset: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Terminator {
    CarriageReturn,
    CtrlZ,
}

impl Terminator {
    pub fn byte(self) -> u8 {
        match self {
            Terminator::CarriageReturn => CR,
            Terminator::CtrlZ => CTRL_Z,
        }
    }
}

// One framed line of text for the modem.
// The text is validated once at construction and can never contain a
// terminator byte, so `encode` always yields exactly one frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    text: String,
    terminator: Terminator,
}

impl Command {
    // Build an AT command line closed by `\r`.
    pub fn at(text: impl Into<String>) -> Result<Self, CommandError> {
        Self::build(text.into(), Terminator::CarriageReturn, MAX_COMMAND_LEN)
    }

    // Build an SMS body closed by control-Z.
    pub fn sms_body(text: impl Into<String>) -> Result<Self, CommandError> {
        Self::build(text.into(), Terminator::CtrlZ, MAX_SMS_BODY_LEN)
    }

    fn build(text: String, terminator: Terminator, limit: usize) -> Result<Self, CommandError> {
        if text.is_empty() {
            return Err(CommandError::Empty);
        }
        if text.len() > limit {
            return Err(CommandError::TooLong {
                len: text.len(),
                limit,
            });
        }
        if let Some((offset, &byte)) = text
            .as_bytes()
            .iter()
            .enumerate()
            .find(|(_, byte)| !is_printable_ascii(**byte))
        {
            return Err(CommandError::InvalidByte { byte, offset });
        }
        Ok(Self { text, terminator })
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    // Wire bytes: payload followed by the terminator.
    pub fn encode(&self) -> Vec<u8> {
        let mut frame = Vec::with_capacity(self.text.len() + 1);
        frame.extend_from_slice(self.text.as_bytes());
        frame.push(self.terminator.byte());
        frame
    }
}

// Quoted AT arguments must not carry a quote of their own.
pub fn quoted(value: &str) -> Result<String, CommandError> {
    if let Some(offset) = value.find('"') {
        return Err(CommandError::InvalidByte { byte: b'"', offset });
    }
    Ok(format!("\"{value}\""))
}

fn is_printable_ascii(byte: u8) -> bool {
    (0x20..=0x7E).contains(&byte)
}
