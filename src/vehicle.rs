use crate::modem::gps::{self, GpsFix};
use crate::modem::matcher::ResponsePattern;
use crate::modem::session::{CommandSession, LinkFailure, SessionOutcome, StepError, Timeouts};
use crate::modem::sms::{self, AuthToken, Keyword, SmsCommand};
use crate::modem::transport::Transport;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};

// Vehicle enable line.
pub trait Actuator {
    fn set_stopped(&mut self, stopped: bool);
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("image capture failed: {0}")]
pub struct CaptureError(pub String);

// Best-effort still capture taken when the vehicle is stopped.
pub trait Capture {
    fn capture_image(&mut self) -> Result<(), CaptureError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VehicleState {
    Running,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Stopped,
    Resumed,
    Unchanged,
}

// Result of one wait for an envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Poll {
    Handled(Transition),
    // Envelope arrived but could not be interpreted.
    Ignored,
    // Nothing arrived before the envelope timeout.
    Idle,
    Failed(LinkFailure),
}

#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub auth: AuthToken,
    pub report_number: String,
    pub timeouts: Timeouts,
    pub envelope_timeout: Duration,
    pub max_envelope_bytes: usize,
    pub error_backoff: Duration,
}

pub struct VehicleController<T: Transport, A: Actuator, C: Capture> {
    session: CommandSession<T>,
    actuator: A,
    capture: C,
    state: VehicleState,
    config: ControllerConfig,
}

impl<T: Transport, A: Actuator, C: Capture> VehicleController<T, A, C> {
    // Starts in `Running` with the actuator enabled.
    pub fn new(session: CommandSession<T>, mut actuator: A, capture: C, config: ControllerConfig) -> Self {
        actuator.set_stopped(false);
        info!(state = ?VehicleState::Running, "vehicle controller started");
        Self {
            session,
            actuator,
            capture,
            state: VehicleState::Running,
            config,
        }
    }

    pub fn state(&self) -> VehicleState {
        self.state
    }

    pub fn actuator(&self) -> &A {
        &self.actuator
    }

    pub fn session(&self) -> &CommandSession<T> {
        &self.session
    }

    // GPS power-up, SMS text mode, and forwarding of new messages to the serial line.
    pub fn prepare_modem(&mut self) -> Result<(), StepError> {
        let ok = ResponsePattern::ok();
        let timeouts = self.config.timeouts;
        self.session.run_step("AT", &ok, timeouts.command)?;
        gps::power_on(&mut self.session, timeouts)?;
        self.session.run_step("AT+CMGF=1", &ok, timeouts.command)?;
        self.session.run_step("AT+CNMI=2,2,0,0,0", &ok, timeouts.command)?;

        match self.locate() {
            GpsFix::Position(_) => info!("GPS fix acquired"),
            GpsFix::NoFix => info!("GPS coordinates not yet available"),
        }
        Ok(())
    }

    // Loop on envelopes until `running` clears. Transport failures are logged and waited out.
    pub fn run(&mut self, running: &AtomicBool) {
        while running.load(Ordering::SeqCst) {
            if let Poll::Failed(failure) = self.poll_once() {
                error!(%failure, "waiting for SMS failed");
                thread::sleep(self.config.error_backoff);
            }
        }
        info!(state = ?self.state, "vehicle controller stopped");
    }

    pub fn poll_once(&mut self) -> Poll {
        let reply = self.session.await_until_idle(
            &sms::envelope_pattern(),
            self.config.envelope_timeout,
            self.config.max_envelope_bytes,
        );
        match reply.outcome {
            SessionOutcome::Matched(_) => match sms::parse_envelope(&reply.bytes, &self.config.auth) {
                Ok(command) => Poll::Handled(self.handle_command(command)),
                Err(err) => {
                    warn!(%err, "envelope ignored");
                    Poll::Ignored
                }
            },
            SessionOutcome::IoFailure(LinkFailure::Timeout(_)) => Poll::Idle,
            SessionOutcome::IoFailure(LinkFailure::BufferOverflow { limit }) => {
                warn!(limit, "envelope exceeded its byte budget; ignored");
                Poll::Ignored
            }
            SessionOutcome::ProtocolError => {
                warn!("ERROR line while waiting for an envelope; ignored");
                Poll::Ignored
            }
            SessionOutcome::IoFailure(failure) => Poll::Failed(failure),
        }
    }

    pub fn handle_command(&mut self, command: SmsCommand) -> Transition {
        if !command.authorized {
            info!(keyword = ?command.keyword, "command from unauthorized sender ignored");
            return Transition::Unchanged;
        }
        match (self.state, command.keyword) {
            (VehicleState::Running, Some(Keyword::Stop)) => {
                self.stop();
                Transition::Stopped
            }
            (VehicleState::Stopped, Some(Keyword::Reset)) => {
                self.actuator.set_stopped(false);
                self.state = VehicleState::Running;
                info!(state = ?self.state, "vehicle resumed");
                Transition::Resumed
            }
            (state, keyword) => {
                debug!(?state, ?keyword, "no transition");
                Transition::Unchanged
            }
        }
    }

    fn stop(&mut self) {
        if let Err(err) = self.capture.capture_image() {
            warn!(%err, "continuing without image");
        }
        self.actuator.set_stopped(true);

        let body = self.locate().sms_body();
        if let Err(err) = sms::send_sms(
            &mut self.session,
            &self.config.report_number,
            &body,
            self.config.timeouts,
        ) {
            error!(%err, "location report not sent");
        }

        self.state = VehicleState::Stopped;
        info!(state = ?self.state, "vehicle stopped");
    }

    // Any failure to read a fix collapses to NoFix for reporting.
    fn locate(&mut self) -> GpsFix {
        match gps::query_fix(&mut self.session, self.config.timeouts.command) {
            Ok(GpsFix::Position(position)) => {
                if let Some((lat, lon)) = position.decimal_degrees() {
                    info!("GPS fix at {lat:.6}, {lon:.6}");
                }
                GpsFix::Position(position)
            }
            Ok(GpsFix::NoFix) => GpsFix::NoFix,
            Err(err) => {
                warn!(%err, "GPS fix unavailable");
                GpsFix::NoFix
            }
        }
    }
}
