//! Serial port management for ELM327-family scan tools
//!
//! This module handles the low-level byte stream between the computer and
//! the scan tool: delimiter-based reads with dual time budgets, buffer
//! flushing, and baud rate changes.

use std::io::{Read, Write};
use std::time::{Duration, Instant};

use crate::error::{Error, Result};

/// Boot-default baud rate of ELM327 interfaces
pub const DEFAULT_BAUD: u32 = 38400;

/// Default read timeout when a port is first opened
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);

/// Maximum tolerated overshoot past the overall read deadline
pub const MAX_READ_OVERRUN: Duration = Duration::from_millis(10);

// Below this remaining budget the interval is no longer shrunk
const SHRINK_EPSILON: Duration = Duration::from_millis(1);

/// Serial link to a scan tool.
///
/// Reads operate under two budgets set by [`SerialLink::set_timeout`]: a
/// polling interval (the longest acceptable silence) and an overall
/// deadline.  NUL bytes are discarded from the incoming stream per the
/// ELM327 datasheet.
pub struct SerialLink {
    port: Box<dyn serialport::SerialPort>,
    name: String,
    deadline: Instant,
    interval: Duration,
}

impl SerialLink {
    /// Open a serial port at the ELM boot defaults (38400 baud, 8N1).
    pub fn open(port_name: &str) -> Result<Self> {
        let port = serialport::new(port_name, DEFAULT_BAUD)
            .timeout(DEFAULT_TIMEOUT)
            .data_bits(serialport::DataBits::Eight)
            .parity(serialport::Parity::None)
            .stop_bits(serialport::StopBits::One)
            .flow_control(serialport::FlowControl::None)
            .open()?;

        log::info!("Opened {} at {} baud", port_name, DEFAULT_BAUD);
        Ok(Self {
            port,
            name: port_name.to_string(),
            deadline: Instant::now() + DEFAULT_TIMEOUT,
            interval: DEFAULT_TIMEOUT,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Write bytes to the scan tool.
    ///
    /// Both buffers are flushed first so that a response cannot be
    /// contaminated by leftovers from an earlier, interrupted exchange.
    pub fn write(&mut self, data: &[u8]) -> Result<()> {
        self.port.clear(serialport::ClearBuffer::Output)?;
        self.port.clear(serialport::ClearBuffer::Input)?;
        self.port.write_all(data)?;
        self.port.flush()?;
        Ok(())
    }

    /// Read until the accumulated response ends with `marker`.
    ///
    /// An empty marker returns after the first byte.  Fails with
    /// [`Error::IntervalTimeout`] if a full polling interval passes with no
    /// data, or [`Error::ReadTimeout`] when the overall deadline expires;
    /// both carry the partial response.  To avoid overshooting the
    /// deadline, the effective interval is halved once the remaining
    /// budget drops below it (while at least 1 ms remains); the configured
    /// interval is restored before returning.
    pub fn read_until(&mut self, marker: &str) -> Result<String> {
        let mut buffer = String::new();
        let mut interval = self.interval;
        let result = self.read_until_inner(marker, &mut buffer, &mut interval);
        if interval != self.interval {
            // restore the temporarily dialed-down port timeout
            self.port.set_timeout(self.interval)?;
        }
        result.map(|()| buffer)
    }

    fn read_until_inner(
        &mut self,
        marker: &str,
        buffer: &mut String,
        interval: &mut Duration,
    ) -> Result<()> {
        loop {
            let now = Instant::now();
            if now >= self.deadline {
                return Err(Error::ReadTimeout {
                    partial: buffer.clone(),
                });
            }
            let remaining = self.deadline - now;
            // make sure the blocking read doesn't gallop past the deadline
            if remaining < *interval && remaining >= SHRINK_EPSILON {
                *interval = remaining / 2;
                self.port.set_timeout(*interval)?;
            }

            let mut byte = [0u8; 1];
            let n = match self.port.read(&mut byte) {
                Ok(n) => n,
                Err(ref e) if e.kind() == std::io::ErrorKind::TimedOut => 0,
                Err(e) => return Err(e.into()),
            };
            if n == 0 {
                if *interval == self.interval {
                    // a full polling interval passed in silence
                    return Err(Error::IntervalTimeout {
                        partial: buffer.clone(),
                    });
                }
                continue;
            }
            if byte[0] == 0x00 {
                continue; // per note on p.6 of the ELM327 data sheet
            }
            buffer.push(byte[0] as char);
            if buffer.ends_with(marker) {
                return Ok(());
            }
        }
    }

    /// Set the overall deadline and polling interval for subsequent reads.
    ///
    /// `interval` defaults to `timeout` when not given.  The port timeout
    /// is only reconfigured when the interval actually changes, since that
    /// requires reconfiguring the device on some platforms.
    pub fn set_timeout(&mut self, timeout: Duration, interval: Option<Duration>) -> Result<()> {
        self.deadline = Instant::now() + timeout;
        let interval = interval.unwrap_or(timeout);
        if interval != self.interval {
            self.interval = interval;
            self.port.set_timeout(interval)?;
        }
        Ok(())
    }

    pub fn baud_rate(&self) -> Result<u32> {
        Ok(self.port.baud_rate()?)
    }

    pub fn set_baud_rate(&mut self, baud: u32) -> Result<()> {
        self.port.set_baud_rate(baud)?;
        log::debug!("{}: baud rate set to {}", self.name, baud);
        Ok(())
    }

    /// Clear the receive buffer
    pub fn clear_rx(&mut self) -> Result<()> {
        self.port.clear(serialport::ClearBuffer::Input)?;
        Ok(())
    }

    /// Clear the transmission buffer
    pub fn clear_tx(&mut self) -> Result<()> {
        self.port.clear(serialport::ClearBuffer::Output)?;
        Ok(())
    }
}

impl std::fmt::Debug for SerialLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialLink")
            .field("name", &self.name)
            .field("interval", &self.interval)
            .finish()
    }
}
