use crate::vehicle::{Actuator, Capture, CaptureError};
use std::io;
use std::process::{Command, ExitStatus};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum ExternalError {
    #[error("starting `{command}` failed")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },
    #[error("`{command}` exited with {status}")]
    Failed { command: String, status: ExitStatus },
}

// Run an opaque helper (converter, webcam, GPIO script) through the shell; only success matters.
pub fn run_shell(command: &str) -> Result<(), ExternalError> {
    let status = Command::new("sh")
        .arg("-c")
        .arg(command)
        .status()
        .map_err(|source| ExternalError::Spawn {
            command: command.to_string(),
            source,
        })?;
    if !status.success() {
        return Err(ExternalError::Failed {
            command: command.to_string(),
            status,
        });
    }
    Ok(())
}

pub struct ShellCapture {
    command: String,
}

impl ShellCapture {
    pub fn new(command: String) -> Self {
        Self { command }
    }
}

impl Capture for ShellCapture {
    fn capture_image(&mut self) -> Result<(), CaptureError> {
        run_shell(&self.command).map_err(|err| CaptureError(err.to_string()))
    }
}

// Drives the vehicle enable line through optional stop/resume hooks.
// Without hooks the transition is only logged.
pub struct ShellActuator {
    stop_cmd: Option<String>,
    resume_cmd: Option<String>,
}

impl ShellActuator {
    pub fn new(stop_cmd: Option<String>, resume_cmd: Option<String>) -> Self {
        Self {
            stop_cmd,
            resume_cmd,
        }
    }
}

impl Actuator for ShellActuator {
    fn set_stopped(&mut self, stopped: bool) {
        let hook = if stopped {
            self.stop_cmd.as_deref()
        } else {
            self.resume_cmd.as_deref()
        };
        let Some(command) = hook else {
            info!(stopped, "actuator hook not configured");
            return;
        };
        match run_shell(command) {
            Ok(()) => info!(stopped, "actuator updated"),
            Err(err) => warn!(stopped, %err, "actuator hook failed"),
        }
    }
}
