use crate::modem::command::{Command, quoted};
use crate::modem::matcher::ResponsePattern;
use crate::modem::parse::{ParseError, contains, find};
use crate::modem::session::{CommandSession, StepError, Timeouts};
use crate::modem::transport::Transport;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use tracing::info;

// Sentinel the sender appends to close a command message.
pub const MESSAGE_BOUNDARY: &[u8] = b"MSGOVER";
const MESSAGE_BOUNDARY_NAME: &str = "MSGOVER";
const TOKEN_DIGITS: usize = 10;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("authorization token must be exactly {TOKEN_DIGITS} digits")]
pub struct InvalidToken;

// The 10-digit phone number allowed to command the vehicle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthToken(String);

impl AuthToken {
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl FromStr for AuthToken {
    type Err = InvalidToken;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        if raw.len() == TOKEN_DIGITS && raw.bytes().all(|byte| byte.is_ascii_digit()) {
            Ok(Self(raw.to_string()))
        } else {
            Err(InvalidToken)
        }
    }
}

impl fmt::Display for AuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keyword {
    Stop,
    Reset,
}

impl Keyword {
    fn as_bytes(self) -> &'static [u8] {
        match self {
            Keyword::Stop => b"STOP",
            Keyword::Reset => b"RESET",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SmsCommand {
    pub authorized: bool,
    pub keyword: Option<Keyword>,
}

pub fn envelope_pattern() -> ResponsePattern {
    ResponsePattern::one(MESSAGE_BOUNDARY)
}

// Interpret one inbound envelope. Only bytes before `MSGOVER` are considered.
// `STOP` is checked before `RESET` when a message carries both.
pub fn parse_envelope(raw: &[u8], token: &AuthToken) -> Result<SmsCommand, ParseError> {
    let end = find(raw, MESSAGE_BOUNDARY).ok_or(ParseError::MissingSentinel {
        sentinel: MESSAGE_BOUNDARY_NAME,
    })?;
    let body = &raw[..end];

    let authorized = contains(body, token.as_bytes());
    let keyword = [Keyword::Stop, Keyword::Reset]
        .into_iter()
        .find(|keyword| contains(body, keyword.as_bytes()));

    Ok(SmsCommand {
        authorized,
        keyword,
    })
}

// Send a text-mode SMS: select text mode, open the prompt, submit the body with control-Z.
pub fn send_sms<T: Transport>(
    session: &mut CommandSession<T>,
    recipient: &str,
    body: &str,
    timeouts: Timeouts,
) -> Result<(), StepError> {
    // Validate everything before the first byte goes out.
    let body = Command::sms_body(body)?;
    let open_prompt = Command::at(format!("AT+CMGS={}", quoted(recipient)?))?;

    session.run_step("AT", &ResponsePattern::ok(), timeouts.command)?;
    session.run_step("AT+CMGF=1", &ResponsePattern::ok(), timeouts.command)?;
    session
        .send_and_await(&open_prompt, &ResponsePattern::one(">"), timeouts.command)
        .into_result()
        .map_err(|source| StepError::exchange(open_prompt.text(), source))?;
    session
        .send_and_await(&body, &ResponsePattern::ok(), timeouts.network)
        .into_result()
        .map_err(|source| StepError::exchange("SMS body", source))?;

    info!(recipient, "message sent");
    Ok(())
}
