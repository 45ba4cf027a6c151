mod args;
mod commands;
mod modem;
mod shared;
mod vehicle;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use args::{AppCommand, Cli};
use commands::{run_sms, run_upload, run_vehicle};

// Top-level entrypoint: parse CLI args, set up logging, dispatch to a command module.
fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);
    match cli.command {
        AppCommand::Upload(args) => run_upload(args),
        AppCommand::Vehicle(args) => run_vehicle(args),
        AppCommand::Sms(args) => run_sms(args),
    }
}

// RUST_LOG wins over --log-level when both are set.
fn init_tracing(default_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
