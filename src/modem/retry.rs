use crate::modem::session::{LinkFailure, SessionOutcome};
use std::thread;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TerminalFailure {
    #[error("step still failing after {attempts} attempt(s)")]
    Exhausted { attempts: u32 },
    #[error("transport unusable: {0}")]
    Io(LinkFailure),
}

// Bounded retry for one retryable step.
// Only `ProtocolError` is retried. An `IoFailure` is returned on first sight.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    max_attempts: u32,
    delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay: Duration::ZERO,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    // Run `step` until it matches. The closure receives the 1-based attempt number.
    pub fn run_with_retry<F>(&self, mut step: F) -> Result<usize, TerminalFailure>
    where
        F: FnMut(u32) -> SessionOutcome,
    {
        for attempt in 1..=self.max_attempts {
            match step(attempt) {
                SessionOutcome::Matched(index) => {
                    if attempt > 1 {
                        info!(attempt, "step succeeded after retry");
                    }
                    return Ok(index);
                }
                SessionOutcome::IoFailure(failure) => return Err(TerminalFailure::Io(failure)),
                SessionOutcome::ProtocolError => {
                    let remaining = self.max_attempts - attempt;
                    warn!(attempt, remaining, "step returned ERROR");
                    if remaining > 0 && !self.delay.is_zero() {
                        thread::sleep(self.delay);
                    }
                }
            }
        }
        Err(TerminalFailure::Exhausted {
            attempts: self.max_attempts,
        })
    }
}
