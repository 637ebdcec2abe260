use crate::prelude::DriverResult;
use serialport::{ClearBuffer, SerialPort};
use std::io::{self, Read, Write};
use std::thread;
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Byte-level link to a motion controller.
pub trait Transport: Send {
    fn write_bytes(&mut self, bytes: &[u8]) -> io::Result<()>;

    /// Returns whatever arrived, waiting at most `wait` for the first byte.
    fn read_available(&mut self, wait: Duration) -> io::Result<Vec<u8>>;

    fn clear_input(&mut self) -> io::Result<()>;
}

/// [`Transport`] over a `serialport` device.
pub struct SerialTransport {
    port: Box<dyn SerialPort>,
}

impl SerialTransport {
    pub fn open(path: &str, baud_rate: u32) -> DriverResult<Self> {
        let port = serialport::new(path, baud_rate)
            .timeout(Duration::from_millis(50))
            .open()?;
        Ok(Self { port })
    }

    /// Toggles DTR to reboot the controller, then drops the boot chatter.
    pub fn pulse_reset(&mut self, low: Duration, boot: Duration) -> DriverResult<()> {
        self.port.write_data_terminal_ready(false)?;
        thread::sleep(low);
        self.port.clear(ClearBuffer::Input)?;
        self.port.write_data_terminal_ready(true)?;
        thread::sleep(boot);
        Ok(())
    }
}

impl Transport for SerialTransport {
    fn write_bytes(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.port.write_all(bytes)?;
        self.port.flush()
    }

    fn read_available(&mut self, wait: Duration) -> io::Result<Vec<u8>> {
        let deadline = Instant::now() + wait;
        loop {
            let pending = self.port.bytes_to_read().map_err(io::Error::from)? as usize;
            if pending > 0 {
                let mut buffer = vec![0u8; pending];
                let read = match self.port.read(&mut buffer) {
                    Ok(read) => read,
                    Err(err) if err.kind() == io::ErrorKind::TimedOut => 0,
                    Err(err) => return Err(err),
                };
                buffer.truncate(read);
                return Ok(buffer);
            }
            if Instant::now() >= deadline {
                return Ok(Vec::new());
            }
            thread::sleep(POLL_INTERVAL);
        }
    }

    fn clear_input(&mut self) -> io::Result<()> {
        self.port
            .clear(ClearBuffer::Input)
            .map_err(io::Error::from)
    }
}
