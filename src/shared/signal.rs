use anyhow::{Context, Result};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::warn;

// Shared run flag cleared on Ctrl-C. Long loops check it between exchanges so
// the modem is never abandoned mid-command.
pub fn install_ctrlc_handler() -> Result<Arc<AtomicBool>> {
    let running = Arc::new(AtomicBool::new(true));
    let flag = Arc::clone(&running);
    ctrlc::set_handler(move || {
        if flag.swap(false, Ordering::SeqCst) {
            warn!("interrupt received, finishing current exchange");
        }
    })
    .context("installing Ctrl-C handler failed")?;
    Ok(running)
}
