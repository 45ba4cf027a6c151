use crate::args::UploadArgs;
use crate::modem::ftp::{self, BearerConfig, ChunkedUploader, FtpTarget, TransferPlan};
use crate::shared::external::run_shell;
use crate::shared::link::open_session;
use crate::shared::lock::ModemLock;
use crate::shared::signal::install_ctrlc_handler;
use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use std::fs::File;
use std::path::Path;
use std::time::Duration;
use tracing::info;

// Upload mode: optional conversion, then bearer + FTP session + chunked PUT.
pub fn run_upload(args: UploadArgs) -> Result<()> {
    let running = install_ctrlc_handler()?;
    let _lock = ModemLock::claim(&args.link.lock_file)?;

    if let Some(command) = args.convert_cmd.as_deref() {
        info!(command, "running pre-upload conversion");
        run_shell(command).context("pre-upload conversion failed")?;
    }

    let (mut file, plan) = open_upload_file(&args.file)?;
    let remote_name = args
        .remote_name
        .clone()
        .unwrap_or_else(|| default_remote_name(&args.file, Utc::now()));
    info!(
        file = %args.file.display(),
        remote = %remote_name,
        size = plan.file_size,
        chunks = plan.chunk_count(),
        remainder = plan.remainder,
        "upload planned"
    );

    let timeouts = args.link.timeouts();
    let bearer = BearerConfig {
        apn: args.apn.clone(),
        attempts: args.bearer_attempts,
        retry_delay: Duration::from_millis(args.bearer_retry_delay_ms),
    };
    let target = FtpTarget {
        server: args.ftp_server.clone(),
        port: args.ftp_port,
        user: args.ftp_user.clone(),
        password: args.ftp_password.clone(),
        remote_path: args.remote_path.clone(),
        remote_name,
    };

    let mut session = open_session(&args.link)?;
    let uploader = ChunkedUploader::new(timeouts, running);
    let sent = ftp::transfer(
        &mut session,
        &bearer,
        &target,
        &uploader,
        &mut file,
        &plan,
        timeouts,
    )
    .with_context(|| format!("uploading {} failed", args.file.display()))?;

    info!(bytes = sent, remote = %target.remote_name, "upload complete");
    Ok(())
}

// Size is taken once up front; the plan is fixed before the modem hears anything.
fn open_upload_file(path: &Path) -> Result<(File, TransferPlan)> {
    let file =
        File::open(path).with_context(|| format!("opening upload file failed: {}", path.display()))?;
    let metadata = file
        .metadata()
        .with_context(|| format!("reading metadata failed: {}", path.display()))?;
    if !metadata.is_file() {
        bail!("not a regular file: {}", path.display());
    }
    Ok((file, TransferPlan::new(metadata.len())))
}

fn default_remote_name(path: &Path, now: DateTime<Utc>) -> String {
    let ext = path
        .extension()
        .and_then(|ext| ext.to_str())
        .filter(|ext| !ext.is_empty())
        .unwrap_or("bin");
    format!("upload_{}.{ext}", now.format("%Y%m%d_%H%M%S"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    #[test]
    fn remote_name_keeps_the_local_extension() {
        let now = Utc.with_ymd_and_hms(2024, 3, 9, 7, 5, 1).unwrap();
        assert_eq!(
            default_remote_name(Path::new("/tmp/one.jpeg"), now),
            "upload_20240309_070501.jpeg"
        );
        assert_eq!(
            default_remote_name(Path::new("capture"), now),
            "upload_20240309_070501.bin"
        );
    }

    #[test]
    fn plan_follows_file_size() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&vec![0xAB; 2_500]).unwrap();
        file.flush().unwrap();

        let (_, plan) = open_upload_file(file.path()).unwrap();
        assert_eq!(plan.file_size, 2_500);
        assert_eq!(plan.full_chunks, 2);
        assert_eq!(plan.remainder, 500);
    }

    #[test]
    fn missing_file_and_directory_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        assert!(open_upload_file(&dir.path().join("absent.jpeg")).is_err());
        assert!(open_upload_file(dir.path()).is_err());
    }
}
