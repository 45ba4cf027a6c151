use crate::args::LinkArgs;
use crate::modem::session::CommandSession;
use crate::modem::transport::SerialTransport;
use anyhow::{Context, Result};
use tracing::info;

// Open the configured serial port and wrap it in a command session.
pub fn open_session(link: &LinkArgs) -> Result<CommandSession<SerialTransport>> {
    let transport = SerialTransport::open(&link.serial_port, link.baud_rate).with_context(|| {
        format!(
            "opening serial port failed: {} @ {}",
            link.serial_port, link.baud_rate
        )
    })?;
    info!(
        port = %link.serial_port,
        baud = link.baud_rate,
        max_response_bytes = link.max_response_bytes,
        "modem link open"
    );
    Ok(CommandSession::new(transport, link.max_response_bytes))
}
