use crate::modem::session::{DEFAULT_MAX_RESPONSE_BYTES, Timeouts};
use crate::modem::sms::AuthToken;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

// CLI root definition. Every flag can also come from a MODEM_CTL_* variable.
#[derive(Parser, Debug)]
#[command(name = "modem-ctl", version)]
#[command(about = "AT-command modem driver for FTP uploads and SMS vehicle control")]
pub struct Cli {
    /// Default tracing filter when RUST_LOG is unset
    #[arg(long, global = true, env = "MODEM_CTL_LOG_LEVEL", default_value = "info")]
    pub log_level: String,
    #[command(subcommand)]
    pub command: AppCommand,
}

// Subcommands map directly to one module each under src/commands/.
#[derive(Subcommand, Debug)]
pub enum AppCommand {
    /// Upload one file to an FTP server over the modem's GPRS bearer
    Upload(UploadArgs),
    /// Wait for authorized STOP/RESET text messages and drive the vehicle
    Vehicle(VehicleArgs),
    /// Send a single text message
    Sms(SmsArgs),
}

// Serial link and exchange limits shared by every subcommand.
#[derive(Args, Debug, Clone)]
pub struct LinkArgs {
    #[arg(long, env = "MODEM_CTL_SERIAL_PORT", default_value = "/dev/ttyAMA0")]
    pub serial_port: String,
    #[arg(long, env = "MODEM_CTL_BAUD_RATE", default_value_t = 115_200)]
    pub baud_rate: u32,
    /// Deadline for local configuration commands
    #[arg(long, env = "MODEM_CTL_COMMAND_TIMEOUT_MS", default_value_t = 5_000)]
    pub command_timeout_ms: u64,
    /// Deadline for commands that wait on the network (bearer, FTP, SMS submit)
    #[arg(long, env = "MODEM_CTL_NETWORK_TIMEOUT_MS", default_value_t = 85_000)]
    pub network_timeout_ms: u64,
    #[arg(long, env = "MODEM_CTL_MAX_RESPONSE_BYTES", default_value_t = DEFAULT_MAX_RESPONSE_BYTES)]
    pub max_response_bytes: usize,
    #[arg(long, env = "MODEM_CTL_LOCK_FILE", default_value = "modem.lock")]
    pub lock_file: PathBuf,
}

impl LinkArgs {
    pub fn timeouts(&self) -> Timeouts {
        Timeouts {
            command: Duration::from_millis(self.command_timeout_ms),
            network: Duration::from_millis(self.network_timeout_ms),
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct UploadArgs {
    #[command(flatten)]
    pub link: LinkArgs,
    #[arg(long, env = "MODEM_CTL_APN", default_value = "internet")]
    pub apn: String,
    #[arg(long, env = "MODEM_CTL_FTP_SERVER")]
    pub ftp_server: String,
    #[arg(long, env = "MODEM_CTL_FTP_PORT", default_value_t = 21)]
    pub ftp_port: u16,
    #[arg(long, env = "MODEM_CTL_FTP_USER")]
    pub ftp_user: String,
    #[arg(long, env = "MODEM_CTL_FTP_PASSWORD", hide_env_values = true)]
    pub ftp_password: String,
    #[arg(long, env = "MODEM_CTL_REMOTE_PATH", default_value = "/")]
    pub remote_path: String,
    /// Remote file name; defaults to upload_<UTC timestamp>.<local extension>
    #[arg(long, env = "MODEM_CTL_REMOTE_NAME")]
    pub remote_name: Option<String>,
    #[arg(long, env = "MODEM_CTL_BEARER_ATTEMPTS", default_value_t = 5)]
    pub bearer_attempts: u32,
    #[arg(long, env = "MODEM_CTL_BEARER_RETRY_DELAY_MS", default_value_t = 1_000)]
    pub bearer_retry_delay_ms: u64,
    /// Shell command run before the upload, e.g. an image format conversion
    #[arg(long, env = "MODEM_CTL_CONVERT_CMD")]
    pub convert_cmd: Option<String>,
    /// Local file to upload
    pub file: PathBuf,
}

#[derive(Args, Debug, Clone)]
pub struct VehicleArgs {
    #[command(flatten)]
    pub link: LinkArgs,
    /// Ten-digit number whose messages are obeyed
    #[arg(long, env = "MODEM_CTL_AUTH_NUMBER")]
    pub auth_number: AuthToken,
    /// Recipient of the location report; defaults to the authorized number
    #[arg(long, env = "MODEM_CTL_REPORT_NUMBER")]
    pub report_number: Option<String>,
    /// How long one wait for an incoming message may block
    #[arg(long, env = "MODEM_CTL_ENVELOPE_TIMEOUT_MS", default_value_t = 10_000)]
    pub envelope_timeout_ms: u64,
    #[arg(long, env = "MODEM_CTL_MAX_ENVELOPE_BYTES", default_value_t = 1_024)]
    pub max_envelope_bytes: usize,
    /// Pause after a transport failure before listening again
    #[arg(long, env = "MODEM_CTL_ERROR_BACKOFF_MS", default_value_t = 1_000)]
    pub error_backoff_ms: u64,
    #[arg(long, env = "MODEM_CTL_CAPTURE_CMD", default_value = "fswebcam image.jpeg")]
    pub capture_cmd: String,
    /// Shell hook that disables the vehicle
    #[arg(long, env = "MODEM_CTL_STOP_CMD")]
    pub stop_cmd: Option<String>,
    /// Shell hook that re-enables the vehicle
    #[arg(long, env = "MODEM_CTL_RESUME_CMD")]
    pub resume_cmd: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct SmsArgs {
    #[command(flatten)]
    pub link: LinkArgs,
    #[arg(long, env = "MODEM_CTL_SMS_TO")]
    pub to: String,
    /// Message text, printable ASCII up to 160 characters
    pub text: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn every_flag_has_an_environment_fallback() {
        let cli = Cli::command();
        let mut args: Vec<_> = cli.get_arguments().map(|arg| (cli.get_name(), arg)).collect();
        for sub in cli.get_subcommands() {
            args.extend(sub.get_arguments().map(|arg| (sub.get_name(), arg)));
        }
        for (owner, arg) in args {
            let id = arg.get_id().as_str();
            if arg.get_long().is_none() || id == "help" || id == "version" {
                continue;
            }
            assert!(arg.get_env().is_some(), "--{id} of `{owner}` has no env");
        }
    }

    #[test]
    fn vehicle_requires_a_ten_digit_token() {
        let parsed = Cli::try_parse_from(["modem-ctl", "vehicle", "--auth-number", "5551234567"]);
        let cli = parsed.unwrap();
        let AppCommand::Vehicle(args) = cli.command else {
            panic!("expected vehicle subcommand");
        };
        assert_eq!(args.auth_number.to_string(), "5551234567");
        assert_eq!(args.link.serial_port, "/dev/ttyAMA0");
        assert_eq!(args.link.timeouts().network, Duration::from_secs(85));

        assert!(Cli::try_parse_from(["modem-ctl", "vehicle", "--auth-number", "12345"]).is_err());
    }

    #[test]
    fn upload_takes_the_file_positionally() {
        let cli = Cli::try_parse_from([
            "modem-ctl",
            "upload",
            "--ftp-server",
            "ftp.example.net",
            "--ftp-user",
            "cam",
            "--ftp-password",
            "secret",
            "image.jpeg",
        ])
        .unwrap();
        let AppCommand::Upload(args) = cli.command else {
            panic!("expected upload subcommand");
        };
        assert_eq!(args.file, PathBuf::from("image.jpeg"));
        assert_eq!(args.bearer_attempts, 5);
        assert_eq!(args.remote_name, None);
    }
}
