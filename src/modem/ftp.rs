use crate::modem::command::{Command, CommandError, quoted};
use crate::modem::matcher::ResponsePattern;
use crate::modem::retry::{RetryPolicy, TerminalFailure};
use crate::modem::session::{CommandSession, StepError, Timeouts};
use crate::modem::transport::Transport;
use std::io::{self, Read};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

pub const CHUNK_SIZE: usize = 1_000;

// Put-session status line `+FTPPUT:1,<code>[,<max chunk len>]`.
const PUT_STATUS: &str = "+FTPPUT:1,";
const STATUS_READY: &str = "1";
const STATUS_CLOSED: &str = "0";

#[derive(Debug, Error)]
pub enum UploadError {
    #[error(transparent)]
    Step(#[from] StepError),
    #[error("bearer activation failed: {0}")]
    Bearer(#[source] TerminalFailure),
    #[error("{stage}: modem FTP client reported code {code:?}")]
    Refused { stage: &'static str, code: String },
    #[error("chunk {chunk}: file yielded {got} of {expected} bytes")]
    ShortRead {
        chunk: u64,
        expected: usize,
        got: usize,
    },
    #[error("reading chunk {chunk} from file failed")]
    FileRead {
        chunk: u64,
        #[source]
        source: io::Error,
    },
    #[error("file grew past the planned {planned} bytes during upload")]
    FileGrew { planned: u64 },
    #[error("upload interrupted after {transferred} bytes")]
    Interrupted { transferred: u64 },
}

impl From<CommandError> for UploadError {
    fn from(err: CommandError) -> Self {
        UploadError::Step(StepError::Command(err))
    }
}

// Chunk layout for one file: `full_chunks * chunk_size + remainder == file_size`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferPlan {
    pub file_size: u64,
    pub chunk_size: usize,
    pub full_chunks: u64,
    pub remainder: usize,
}

impl TransferPlan {
    pub fn new(file_size: u64) -> Self {
        Self::with_chunk_size(file_size, CHUNK_SIZE)
    }

    pub fn with_chunk_size(file_size: u64, chunk_size: usize) -> Self {
        let chunk_size = chunk_size.max(1);
        let step = chunk_size as u64;
        Self {
            file_size,
            chunk_size,
            full_chunks: file_size / step,
            remainder: (file_size % step) as usize,
        }
    }

    // Length of every chunk in send order; no trailing chunk when the remainder is zero.
    pub fn chunks(&self) -> impl Iterator<Item = usize> + '_ {
        let full = (0..self.full_chunks).map(move |_| self.chunk_size);
        let tail = (self.remainder > 0).then_some(self.remainder);
        full.chain(tail)
    }

    pub fn chunk_count(&self) -> u64 {
        self.full_chunks + u64::from(self.remainder > 0)
    }
}

#[derive(Debug, Clone)]
pub struct BearerConfig {
    pub apn: String,
    pub attempts: u32,
    pub retry_delay: Duration,
}

#[derive(Debug, Clone)]
pub struct FtpTarget {
    pub server: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub remote_path: String,
    pub remote_name: String,
}

// Configure and activate the GPRS bearer. Activation (`AT+SAPBR=1,1`) is retried on `ERROR`.
// Once this returns Ok the bearer is up and must be released with `close_bearer`.
pub fn open_bearer<T: Transport>(
    session: &mut CommandSession<T>,
    bearer: &BearerConfig,
    timeouts: Timeouts,
) -> Result<(), UploadError> {
    let ok = ResponsePattern::ok();
    session.run_step("AT", &ok, timeouts.command)?;
    session.run_step("AT+SAPBR=3,1,\"Contype\",\"GPRS\"", &ok, timeouts.command)?;
    session.run_step(
        format!("AT+SAPBR=3,1,\"APN\",{}", quoted(&bearer.apn)?),
        &ok,
        timeouts.command,
    )?;

    let activate = Command::at("AT+SAPBR=1,1")?;
    RetryPolicy::new(bearer.attempts)
        .with_delay(bearer.retry_delay)
        .run_with_retry(|attempt| {
            debug!(attempt, "activating bearer");
            session.send_and_await(&activate, &ok, timeouts.network)
        })
        .map_err(UploadError::Bearer)?;
    info!(apn = %bearer.apn, "bearer activated");
    Ok(())
}

// Ask the modem for the bearer's IP context.
pub fn query_bearer<T: Transport>(
    session: &mut CommandSession<T>,
    timeouts: Timeouts,
) -> Result<(), UploadError> {
    session.run_step("AT+SAPBR=2,1", &ResponsePattern::ok(), timeouts.command)?;
    Ok(())
}

pub fn close_bearer<T: Transport>(
    session: &mut CommandSession<T>,
    timeouts: Timeouts,
) -> Result<(), StepError> {
    session.run_step("AT+SAPBR=0,1", &ResponsePattern::ok(), timeouts.network)?;
    Ok(())
}

// Configure the modem FTP client and open a put session.
pub fn open_put_session<T: Transport>(
    session: &mut CommandSession<T>,
    target: &FtpTarget,
    timeouts: Timeouts,
) -> Result<(), UploadError> {
    let ok = ResponsePattern::ok();
    let settings = [
        "AT+FTPCID=1".to_string(),
        format!("AT+FTPSERV={}", quoted(&target.server)?),
        format!("AT+FTPPORT={}", target.port),
        format!("AT+FTPUN={}", quoted(&target.user)?),
        format!("AT+FTPPW={}", quoted(&target.password)?),
        format!("AT+FTPPUTNAME={}", quoted(&target.remote_name)?),
        format!("AT+FTPPUTPATH={}", quoted(&target.remote_path)?),
    ];
    for setting in settings {
        session.run_step(setting, &ok, timeouts.command)?;
    }

    session.run_step("AT+FTPPUT=1", &ok, timeouts.command)?;
    expect_put_status(session, "FTP session open", STATUS_READY, timeouts)?;
    info!(
        server = %target.server,
        path = %target.remote_path,
        name = %target.remote_name,
        "FTP put session open"
    );
    Ok(())
}

// Wait for the next put-session status line and read its code digits.
fn await_put_status<T: Transport>(
    session: &mut CommandSession<T>,
    stage: &str,
    timeouts: Timeouts,
) -> Result<String, StepError> {
    session.await_step(stage, &ResponsePattern::one(PUT_STATUS), timeouts.network)?;
    let rest = session.await_response(&ResponsePattern::new(["\r", "\n"]), timeouts.command);
    rest.outcome
        .into_result()
        .map_err(|source| StepError::exchange(stage, source))?;
    Ok(rest
        .bytes
        .iter()
        .take_while(|byte| byte.is_ascii_digit())
        .map(|&byte| char::from(byte))
        .collect())
}

fn expect_put_status<T: Transport>(
    session: &mut CommandSession<T>,
    stage: &'static str,
    expected: &str,
    timeouts: Timeouts,
) -> Result<(), UploadError> {
    let code = await_put_status(session, stage, timeouts)?;
    if code != expected {
        warn!(stage, %code, "FTP put session failed");
        return Err(UploadError::Refused { stage, code });
    }
    Ok(())
}

// Pushes a payload through an open put session, one declared chunk at a time.
pub struct ChunkedUploader {
    timeouts: Timeouts,
    running: Arc<AtomicBool>,
}

impl ChunkedUploader {
    pub fn new(timeouts: Timeouts, running: Arc<AtomicBool>) -> Self {
        Self { timeouts, running }
    }

    // Returns the byte total, which always equals `plan.file_size` on success.
    pub fn upload<T: Transport, R: Read>(
        &self,
        file: &mut R,
        plan: &TransferPlan,
        session: &mut CommandSession<T>,
    ) -> Result<u64, UploadError> {
        let mut buffer = vec![0_u8; plan.chunk_size];
        let mut transferred: u64 = 0;
        let total_chunks = plan.chunk_count();

        for (index, len) in plan.chunks().enumerate() {
            let chunk = index as u64 + 1;
            // Only stop between chunks, when nothing is outstanding on the line.
            if !self.running.load(Ordering::SeqCst) {
                return Err(UploadError::Interrupted { transferred });
            }

            let payload = &mut buffer[..len];
            read_chunk(file, payload, chunk)?;
            if chunk == total_chunks && has_trailing_bytes(file, chunk)? {
                return Err(UploadError::FileGrew {
                    planned: plan.file_size,
                });
            }
            self.send_chunk(session, payload, chunk)?;
            transferred += len as u64;
            debug!(chunk, total_chunks, bytes = len, transferred, "chunk sent");
        }

        if total_chunks > 0 {
            expect_put_status(session, "data ready", STATUS_READY, self.timeouts)?;
        }

        session.run_step("AT+FTPPUT=2,0", &ResponsePattern::ok(), self.timeouts.command)?;
        expect_put_status(session, "transfer close", STATUS_CLOSED, self.timeouts)?;

        info!(bytes = transferred, chunks = total_chunks, "upload complete");
        Ok(transferred)
    }

    fn send_chunk<T: Transport>(
        &self,
        session: &mut CommandSession<T>,
        payload: &[u8],
        chunk: u64,
    ) -> Result<(), UploadError> {
        let len = payload.len();
        // The echo reads `AT+FTPPUT=2,<n>`; only the modem's own line uses a colon.
        let accepted = ResponsePattern::one(format!("+FTPPUT:2,{len}\r"));
        session.run_step(format!("AT+FTPPUT=2,{len}"), &accepted, self.timeouts.network)?;

        session
            .write_raw_and_await(payload, &ResponsePattern::ok(), self.timeouts.network)
            .into_result()
            .map_err(|source| StepError::exchange(format!("chunk {chunk} payload"), source))?;
        Ok(())
    }
}

// Fill `buf` completely or report how far the file got.
fn read_chunk<R: Read>(file: &mut R, buf: &mut [u8], chunk: u64) -> Result<(), UploadError> {
    let mut filled = 0;
    while filled < buf.len() {
        match file.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
            Err(source) => return Err(UploadError::FileRead { chunk, source }),
        }
    }
    if filled < buf.len() {
        return Err(UploadError::ShortRead {
            chunk,
            expected: buf.len(),
            got: filled,
        });
    }
    Ok(())
}

// One byte past the plan means the file changed after it was sized.
fn has_trailing_bytes<R: Read>(file: &mut R, chunk: u64) -> Result<bool, UploadError> {
    let mut probe = [0_u8; 1];
    loop {
        match file.read(&mut probe) {
            Ok(read) => return Ok(read > 0),
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
            Err(source) => return Err(UploadError::FileRead { chunk, source }),
        }
    }
}

// Full upload: bearer, FTP session, chunks. The bearer is released on every path once activated.
pub fn transfer<T: Transport, R: Read>(
    session: &mut CommandSession<T>,
    bearer: &BearerConfig,
    target: &FtpTarget,
    uploader: &ChunkedUploader,
    file: &mut R,
    plan: &TransferPlan,
    timeouts: Timeouts,
) -> Result<u64, UploadError> {
    open_bearer(session, bearer, timeouts)?;

    let result = query_bearer(session, timeouts)
        .and_then(|()| open_put_session(session, target, timeouts))
        .and_then(|()| uploader.upload(file, plan, session));

    // A dead transport cannot carry the teardown either.
    let transport_dead = matches!(&result, Err(UploadError::Step(err)) if err.is_io());
    if !transport_dead {
        if let Err(err) = close_bearer(session, timeouts) {
            warn!(%err, "bearer teardown failed");
        }
    }
    result
}
