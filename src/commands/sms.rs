use crate::args::SmsArgs;
use crate::modem::sms::send_sms;
use crate::shared::link::open_session;
use crate::shared::lock::ModemLock;
use anyhow::{Context, Result};

pub fn run_sms(args: SmsArgs) -> Result<()> {
    let _lock = ModemLock::claim(&args.link.lock_file)?;
    let mut session = open_session(&args.link)?;
    send_sms(&mut session, &args.to, &args.text, args.link.timeouts())
        .with_context(|| format!("sending message to {} failed", args.to))
}
