use serialport::SerialPort;
use std::io::{self, Read, Write};
use std::time::Duration;

const MIN_READ_TIMEOUT: Duration = Duration::from_millis(1);

// Byte stream to the modem.
// `read_byte` blocks for at most `timeout` and reports an expired wait as
// `io::ErrorKind::TimedOut`.
pub trait Transport {
    fn write(&mut self, bytes: &[u8]) -> io::Result<usize>;
    fn read_byte(&mut self, timeout: Duration) -> io::Result<u8>;
}

// Serial line already configured for the modem (baud rate, framing).
pub struct SerialTransport {
    port: Box<dyn SerialPort>,
    current_timeout: Option<Duration>,
}

impl SerialTransport {
    pub fn new(port: Box<dyn SerialPort>) -> Self {
        Self {
            port,
            current_timeout: None,
        }
    }

    pub fn open(path: &str, baud_rate: u32) -> serialport::Result<Self> {
        let port = serialport::new(path, baud_rate)
            .timeout(Duration::from_millis(250))
            .open()?;
        Ok(Self::new(port))
    }

    fn set_timeout(&mut self, timeout: Duration) -> io::Result<()> {
        let timeout = timeout.max(MIN_READ_TIMEOUT);
        if self.current_timeout != Some(timeout) {
            self.port.set_timeout(timeout)?;
            self.current_timeout = Some(timeout);
        }
        Ok(())
    }
}

impl Transport for SerialTransport {
    // One write call per frame; the port is flushed so the frame leaves before we wait on a reply.
    fn write(&mut self, bytes: &[u8]) -> io::Result<usize> {
        self.port.write_all(bytes)?;
        self.port.flush()?;
        Ok(bytes.len())
    }

    fn read_byte(&mut self, timeout: Duration) -> io::Result<u8> {
        self.set_timeout(timeout)?;
        let mut byte = [0_u8; 1];
        loop {
            match self.port.read(&mut byte) {
                Ok(0) => {
                    return Err(io::Error::new(
                        io::ErrorKind::TimedOut,
                        "no byte received from serial port",
                    ));
                }
                Ok(_) => return Ok(byte[0]),
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                Err(err) => return Err(err),
            }
        }
    }
}
