use crate::args::VehicleArgs;
use crate::shared::external::{ShellActuator, ShellCapture};
use crate::shared::link::open_session;
use crate::shared::lock::ModemLock;
use crate::shared::signal::install_ctrlc_handler;
use crate::vehicle::{ControllerConfig, VehicleController};
use anyhow::{Context, Result};
use std::time::Duration;
use tracing::info;

// Vehicle mode: prepare GPS and SMS, then serve commands until Ctrl-C.
pub fn run_vehicle(args: VehicleArgs) -> Result<()> {
    let running = install_ctrlc_handler()?;
    let _lock = ModemLock::claim(&args.link.lock_file)?;

    let report_number = args
        .report_number
        .clone()
        .unwrap_or_else(|| args.auth_number.to_string());
    let config = ControllerConfig {
        auth: args.auth_number.clone(),
        report_number,
        timeouts: args.link.timeouts(),
        envelope_timeout: Duration::from_millis(args.envelope_timeout_ms),
        max_envelope_bytes: args.max_envelope_bytes,
        error_backoff: Duration::from_millis(args.error_backoff_ms),
    };

    let session = open_session(&args.link)?;
    let actuator = ShellActuator::new(args.stop_cmd.clone(), args.resume_cmd.clone());
    let capture = ShellCapture::new(args.capture_cmd.clone());
    let mut controller = VehicleController::new(session, actuator, capture, config);

    controller
        .prepare_modem()
        .context("preparing modem for GPS and SMS failed")?;
    info!(auth = %args.auth_number, "listening for vehicle commands");
    controller.run(&running);
    Ok(())
}
