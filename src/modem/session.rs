use crate::modem::command::{Command, CommandError};
use crate::modem::matcher::{ResponseMatcher, ResponsePattern, Scan};
use crate::modem::transport::Transport;
use std::io;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, trace, warn};

pub const DEFAULT_MAX_RESPONSE_BYTES: usize = 512;

// Response deadlines: `command` for local settings, `network` for anything that waits on the operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub command: Duration,
    pub network: Duration,
}

// Transport-level failure detail (the IOFailure class).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LinkFailure {
    #[error("transport write failed: {0}")]
    Write(io::ErrorKind),
    #[error("short write: {written} of {expected} bytes")]
    ShortWrite { written: usize, expected: usize },
    #[error("transport read failed: {0}")]
    Read(io::ErrorKind),
    #[error("no terminator within {0:?}")]
    Timeout(Duration),
    #[error("response exceeded {limit} bytes without a terminator")]
    BufferOverflow { limit: usize },
}

// Classified result of one exchange. Nothing else escapes the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutcome {
    // Index of the pattern target that completed the response.
    Matched(usize),
    // The modem answered `ERROR`.
    ProtocolError,
    IoFailure(LinkFailure),
}

impl SessionOutcome {
    pub fn into_result(self) -> Result<usize, ExchangeError> {
        match self {
            SessionOutcome::Matched(index) => Ok(index),
            SessionOutcome::ProtocolError => Err(ExchangeError::Protocol),
            SessionOutcome::IoFailure(failure) => Err(ExchangeError::Io(failure)),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ExchangeError {
    #[error("modem answered ERROR")]
    Protocol,
    #[error(transparent)]
    Io(#[from] LinkFailure),
}

// A named protocol step that did not reach its target.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StepError {
    #[error("invalid command: {0}")]
    Command(#[from] CommandError),
    #[error("{step}: {source}")]
    Exchange {
        step: String,
        #[source]
        source: ExchangeError,
    },
}

impl StepError {
    pub fn exchange(step: impl Into<String>, source: ExchangeError) -> Self {
        StepError::Exchange {
            step: step.into(),
            source,
        }
    }

    pub fn is_io(&self) -> bool {
        matches!(
            self,
            StepError::Exchange {
                source: ExchangeError::Io(_),
                ..
            }
        )
    }
}

// Outcome plus every byte scanned to reach it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub outcome: SessionOutcome,
    pub bytes: Vec<u8>,
}

impl Reply {
    fn failed(failure: LinkFailure) -> Self {
        Self {
            outcome: SessionOutcome::IoFailure(failure),
            bytes: Vec::new(),
        }
    }
}

// Half-duplex command session over an exclusively owned transport.
// Every exchange takes `&mut self` and returns only after its response is
// classified, so a second command can never be issued while one is
// outstanding. The session keeps no state between exchanges.
pub struct CommandSession<T: Transport> {
    transport: T,
    max_response_bytes: usize,
}

impl<T: Transport> CommandSession<T> {
    pub fn new(transport: T, max_response_bytes: usize) -> Self {
        Self {
            transport,
            max_response_bytes: max_response_bytes.max(16),
        }
    }

    pub fn send_and_await(
        &mut self,
        command: &Command,
        pattern: &ResponsePattern,
        timeout: Duration,
    ) -> SessionOutcome {
        self.exchange(command, pattern, timeout).outcome
    }

    // Build, send and require a match in one go.
    pub fn run_step(
        &mut self,
        text: impl Into<String>,
        pattern: &ResponsePattern,
        timeout: Duration,
    ) -> Result<usize, StepError> {
        let command = Command::at(text)?;
        self.send_and_await(&command, pattern, timeout)
            .into_result()
            .map_err(|source| StepError::exchange(command.text(), source))
    }

    // Wait for a follow-up line on an already accepted command.
    pub fn await_step(
        &mut self,
        step: &str,
        pattern: &ResponsePattern,
        timeout: Duration,
    ) -> Result<usize, StepError> {
        self.await_response(pattern, timeout)
            .outcome
            .into_result()
            .map_err(|source| StepError::exchange(step, source))
    }

    // Send one command and keep the scanned response for callers that parse it.
    pub fn exchange(
        &mut self,
        command: &Command,
        pattern: &ResponsePattern,
        timeout: Duration,
    ) -> Reply {
        debug!(command = command.text(), "sending command");
        if let Err(failure) = self.write_frame(&command.encode()) {
            warn!(command = command.text(), %failure, "command write failed");
            return Reply::failed(failure);
        }
        let reply = self.await_reply(pattern, timeout, self.max_response_bytes);
        log_outcome(command.text(), &reply.outcome);
        reply
    }

    // Raw binary write path. The payload goes out untouched, terminator bytes included.
    pub fn write_raw_and_await(
        &mut self,
        payload: &[u8],
        pattern: &ResponsePattern,
        timeout: Duration,
    ) -> SessionOutcome {
        debug!(bytes = payload.len(), "writing raw payload");
        if let Err(failure) = self.write_frame(payload) {
            warn!(bytes = payload.len(), %failure, "raw payload write failed");
            return SessionOutcome::IoFailure(failure);
        }
        let outcome = self
            .await_reply(pattern, timeout, self.max_response_bytes)
            .outcome;
        log_outcome("<raw payload>", &outcome);
        outcome
    }

    // Wait for unsolicited output (URCs, forwarded SMS) without sending anything.
    pub fn await_response(&mut self, pattern: &ResponsePattern, timeout: Duration) -> Reply {
        self.await_reply(pattern, timeout, self.max_response_bytes)
    }

    // Like `await_response`, but `idle` restarts on every byte received and the
    // byte budget is the caller's. A message trickling in slower than `idle`
    // overall still completes as long as it never pauses that long.
    pub fn await_until_idle(
        &mut self,
        pattern: &ResponsePattern,
        idle: Duration,
        max_bytes: usize,
    ) -> Reply {
        self.read_until(pattern, idle, max_bytes, Window::Idle)
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    fn write_frame(&mut self, frame: &[u8]) -> Result<(), LinkFailure> {
        match self.transport.write(frame) {
            Ok(written) if written == frame.len() => Ok(()),
            Ok(written) => Err(LinkFailure::ShortWrite {
                written,
                expected: frame.len(),
            }),
            Err(err) => Err(LinkFailure::Write(err.kind())),
        }
    }

    fn await_reply(&mut self, pattern: &ResponsePattern, timeout: Duration, max_bytes: usize) -> Reply {
        self.read_until(pattern, timeout, max_bytes, Window::Total)
    }

    // Bounded read loop: every byte wait is capped by what is left of the deadline.
    fn read_until(
        &mut self,
        pattern: &ResponsePattern,
        timeout: Duration,
        max_bytes: usize,
        window: Window,
    ) -> Reply {
        let mut deadline = Instant::now() + timeout;
        let mut matcher = ResponseMatcher::new(pattern, max_bytes);

        let outcome = loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break SessionOutcome::IoFailure(LinkFailure::Timeout(timeout));
            }

            let byte = match self.transport.read_byte(remaining) {
                Ok(byte) => byte,
                Err(err) if err.kind() == io::ErrorKind::TimedOut => {
                    break SessionOutcome::IoFailure(LinkFailure::Timeout(timeout));
                }
                Err(err) => break SessionOutcome::IoFailure(LinkFailure::Read(err.kind())),
            };

            match matcher.push(byte) {
                Ok(Scan::Pending) => {
                    if window == Window::Idle {
                        deadline = Instant::now() + timeout;
                    }
                }
                Ok(Scan::Target(index)) => break SessionOutcome::Matched(index),
                Ok(Scan::Error) => break SessionOutcome::ProtocolError,
                Err(overflow) => {
                    break SessionOutcome::IoFailure(LinkFailure::BufferOverflow {
                        limit: overflow.limit,
                    });
                }
            }
        };

        let bytes = matcher.into_buffer();
        trace!(response = %String::from_utf8_lossy(&bytes), "response bytes");
        Reply { outcome, bytes }
    }
}

// How a read timeout is measured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Window {
    // From the start of the wait.
    Total,
    // From the most recent byte.
    Idle,
}

fn log_outcome(command: &str, outcome: &SessionOutcome) {
    match outcome {
        SessionOutcome::Matched(index) => debug!(command, target = index, "command matched"),
        SessionOutcome::ProtocolError => warn!(command, "modem returned ERROR"),
        SessionOutcome::IoFailure(failure) => warn!(command, %failure, "exchange failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modem::testing::ScriptedTransport;
    use pretty_assertions::assert_eq;

    const TIMEOUT: Duration = Duration::from_secs(1);

    fn at(text: &str) -> Command {
        Command::at(text).unwrap()
    }

    #[test]
    fn at_is_matched_by_ok() {
        let transport = ScriptedTransport::new().reply("AT\r\nOK\r\n");
        let mut session = CommandSession::new(transport, 256);

        let outcome = session.send_and_await(&at("AT"), &ResponsePattern::ok(), TIMEOUT);

        assert_eq!(outcome, SessionOutcome::Matched(0));
        assert_eq!(session.transport().frames(), vec![b"AT\r".to_vec()]);
    }

    #[test]
    fn error_reply_is_a_protocol_error() {
        let transport = ScriptedTransport::new().reply("AT+SAPBR=1,1\r\nERROR\r\n");
        let mut session = CommandSession::new(transport, 256);

        let outcome = session.send_and_await(&at("AT+SAPBR=1,1"), &ResponsePattern::ok(), TIMEOUT);

        assert_eq!(outcome, SessionOutcome::ProtocolError);
    }

    #[test]
    fn failed_write_skips_the_read() {
        let transport = ScriptedTransport::new()
            .fail_write(io::ErrorKind::BrokenPipe)
            .with_inbound("OK\r\n");
        let mut session = CommandSession::new(transport, 256);

        let outcome = session.send_and_await(&at("AT"), &ResponsePattern::ok(), TIMEOUT);

        assert_eq!(
            outcome,
            SessionOutcome::IoFailure(LinkFailure::Write(io::ErrorKind::BrokenPipe))
        );
        assert_eq!(session.transport().unread(), 4);
    }

    #[test]
    fn short_write_is_an_io_failure() {
        let transport = ScriptedTransport::new().short_write(1);
        let mut session = CommandSession::new(transport, 256);

        let outcome = session.send_and_await(&at("AT"), &ResponsePattern::ok(), TIMEOUT);

        assert_eq!(
            outcome,
            SessionOutcome::IoFailure(LinkFailure::ShortWrite {
                written: 1,
                expected: 3
            })
        );
    }

    #[test]
    fn silent_modem_times_out() {
        let transport = ScriptedTransport::new().reply("AT\r\n");
        let mut session = CommandSession::new(transport, 256);

        let outcome = session.send_and_await(&at("AT"), &ResponsePattern::ok(), TIMEOUT);

        assert_eq!(outcome, SessionOutcome::IoFailure(LinkFailure::Timeout(TIMEOUT)));
    }

    #[test]
    fn read_error_is_an_io_failure() {
        let transport = ScriptedTransport::new()
            .reply("AT\r\n")
            .fail_read(io::ErrorKind::BrokenPipe);
        let mut session = CommandSession::new(transport, 256);

        let outcome = session.send_and_await(&at("AT"), &ResponsePattern::ok(), TIMEOUT);

        assert_eq!(
            outcome,
            SessionOutcome::IoFailure(LinkFailure::Read(io::ErrorKind::BrokenPipe))
        );
    }

    #[test]
    fn oversized_response_overflows() {
        let noise = "x".repeat(64);
        let transport = ScriptedTransport::new().reply(noise);
        let mut session = CommandSession::new(transport, 32);

        let outcome = session.send_and_await(&at("AT"), &ResponsePattern::ok(), TIMEOUT);

        assert_eq!(
            outcome,
            SessionOutcome::IoFailure(LinkFailure::BufferOverflow { limit: 32 })
        );
    }

    #[test]
    fn raw_payload_is_written_verbatim() {
        let transport = ScriptedTransport::new().reply("OK\r\n");
        let mut session = CommandSession::new(transport, 256);
        let payload = [0x00, 0x0D, 0x1A, 0xFF, b'O', b'K'];

        let outcome = session.write_raw_and_await(&payload, &ResponsePattern::ok(), TIMEOUT);

        assert_eq!(outcome, SessionOutcome::Matched(0));
        assert_eq!(session.transport().frames(), vec![payload.to_vec()]);
    }

    #[test]
    fn exchange_keeps_the_scanned_bytes() {
        let transport = ScriptedTransport::new().reply("AT+CGPSINF=32\r\n32,A,1\r\nOK");
        let mut session = CommandSession::new(transport, 256);

        let reply = session.exchange(&at("AT+CGPSINF=32"), &ResponsePattern::ok(), TIMEOUT);

        assert_eq!(reply.outcome, SessionOutcome::Matched(0));
        assert_eq!(reply.bytes, b"AT+CGPSINF=32\r\n32,A,1\r\nOK".to_vec());
    }

    #[test]
    fn leftover_bytes_do_not_leak_into_the_next_match() {
        let transport = ScriptedTransport::new()
            .reply("OK\r\n+FTPPUT:1,1,1360\r\n")
            .reply("ERROR\r\n");
        let mut session = CommandSession::new(transport, 256);

        assert_eq!(
            session.send_and_await(&at("AT+FTPPUT=1"), &ResponsePattern::ok(), TIMEOUT),
            SessionOutcome::Matched(0)
        );
        let urc = ResponsePattern::one("+FTPPUT:1,1,");
        assert_eq!(
            session.await_response(&urc, TIMEOUT).outcome,
            SessionOutcome::Matched(0)
        );
        assert_eq!(
            session.send_and_await(&at("AT"), &ResponsePattern::ok(), TIMEOUT),
            SessionOutcome::ProtocolError
        );
    }

    // Delivers one byte per `gap`, like a slow SMS forward.
    struct Trickle {
        bytes: std::collections::VecDeque<u8>,
        gap: Duration,
    }

    impl Transport for Trickle {
        fn write(&mut self, bytes: &[u8]) -> io::Result<usize> {
            Ok(bytes.len())
        }

        fn read_byte(&mut self, timeout: Duration) -> io::Result<u8> {
            if self.bytes.is_empty() || self.gap > timeout {
                std::thread::sleep(timeout);
                return Err(io::Error::from(io::ErrorKind::TimedOut));
            }
            std::thread::sleep(self.gap);
            self.bytes.pop_front().ok_or_else(|| io::Error::from(io::ErrorKind::TimedOut))
        }
    }

    fn trickle(text: &str) -> CommandSession<Trickle> {
        let transport = Trickle {
            bytes: text.bytes().collect(),
            gap: Duration::from_millis(20),
        };
        CommandSession::new(transport, 256)
    }

    #[test]
    fn idle_window_restarts_on_every_byte() {
        let pattern = ResponsePattern::one("MSGOVER");
        let window = Duration::from_millis(80);

        let reply = trickle("5551234567 STOP MSGOVER").await_until_idle(&pattern, window, 256);
        assert_eq!(reply.outcome, SessionOutcome::Matched(0));
        assert_eq!(reply.bytes, b"5551234567 STOP MSGOVER".to_vec());

        // The same stream against a fixed deadline runs out part way.
        let reply = trickle("5551234567 STOP MSGOVER").await_response(&pattern, window);
        assert_eq!(reply.outcome, SessionOutcome::IoFailure(LinkFailure::Timeout(window)));
    }

    #[test]
    fn idle_window_still_times_out_on_silence() {
        let pattern = ResponsePattern::one("MSGOVER");
        let window = Duration::from_millis(30);

        let reply = trickle("").await_until_idle(&pattern, window, 256);

        assert_eq!(reply.outcome, SessionOutcome::IoFailure(LinkFailure::Timeout(window)));
        assert!(reply.bytes.is_empty());
    }
}
