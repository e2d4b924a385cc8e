//! Serial-port transport backed by the `serialport` crate.

use crate::error::{Error, Result};
use crate::transport::Transport;
use serialport::SerialPort;
use std::io::{Read, Write};
use std::time::Duration;

/// Data bits of the RTU character frame.
pub const DATA_BITS: serialport::DataBits = serialport::DataBits::Eight;
/// Parity of the RTU character frame.
pub const PARITY: serialport::Parity = serialport::Parity::None;
/// Stop bits of the RTU character frame.
pub const STOP_BITS: serialport::StopBits = serialport::StopBits::One;

/// [`Transport`] implementation for an RS-485 or RS-232 serial link,
/// fixed at 8N1 with no flow control.
pub struct SerialTransport {
    path: String,
    baud_rate: u32,
    port: Option<Box<dyn SerialPort>>,
}

impl SerialTransport {
    /// Creates a closed transport for the given device path and baud rate.
    pub fn new(path: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            path: path.into(),
            baud_rate,
            port: None,
        }
    }

    /// The configured device path.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// The configured baud rate.
    pub fn baud_rate(&self) -> u32 {
        self.baud_rate
    }
}

impl Transport for SerialTransport {
    fn open(&mut self) -> Result<()> {
        if self.port.is_some() {
            return Ok(());
        }
        let port = serialport::new(&self.path, self.baud_rate)
            .data_bits(DATA_BITS)
            .parity(PARITY)
            .stop_bits(STOP_BITS)
            .flow_control(serialport::FlowControl::None)
            .timeout(Duration::from_millis(50))
            .open()
            .map_err(|err| Error::Io(err.into()))?;
        self.port = Some(port);
        Ok(())
    }

    fn close(&mut self) {
        // Dropping the handle closes the descriptor.
        self.port = None;
    }

    fn is_open(&self) -> bool {
        self.port.is_some()
    }

    fn write(&mut self, data: &[u8]) -> Result<()> {
        let port = self.port.as_mut().ok_or(Error::NotConnected)?;
        // Stale bytes from a previous exchange would shift every frame
        // that follows.
        port.clear(serialport::ClearBuffer::Input)
            .map_err(|err| Error::Io(err.into()))?;
        port.write_all(data)?;
        port.flush()?;
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        let port = self.port.as_mut().ok_or(Error::NotConnected)?;
        port.set_timeout(timeout)
            .map_err(|err| Error::Io(err.into()))?;
        match port.read(buf) {
            Ok(n) => Ok(n),
            Err(err) if err.kind() == std::io::ErrorKind::TimedOut => Ok(0),
            Err(err) => Err(err.into()),
        }
    }

    fn describe(&self) -> String {
        format!("RTU {} ({} baud)", self.path, self.baud_rate)
    }
}
