use std::io::{Read, Write};
use std::time::{Duration, Instant};

use log::{debug, trace};

use crate::Error;

/// Which line is used to drive the target into the bootloader.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ResetLine {
    Dtr,
    Rts,
}

/// How the target is put into the bootloader.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum ResetMode {
    /// Toggle a modem control line.
    Line {
        line: ResetLine,
        /// Logic level that asserts reset.
        active_high: bool,
    },
    /// Send an application-level command string and wait for its own
    /// confirmation before talking to the bootloader.
    Command(String),
}

/// Owns the serial port and knows how to reset the target and perform the
/// adjustable-deadline reads the TSB wire protocol needs.
pub struct Transport {
    port: Box<dyn serialport::SerialPort>,
    reset_mode: ResetMode,
    /// Time to hold reset asserted/deasserted, and to wait after a
    /// command-triggered reset, in milliseconds.
    pub reset_settle_ms: u64,
}

impl Transport {
    pub fn open(path: &str, baud_rate: u32, reset_mode: ResetMode) -> Result<Self, Error> {
        debug!("opening serial port {}", path);

        let mut port = serialport::new(path, baud_rate)
            .timeout(Duration::from_millis(50))
            .open()?;

        port.set_data_bits(serialport::DataBits::Eight)?;
        port.set_parity(serialport::Parity::None)?;
        port.set_stop_bits(serialport::StopBits::One)?;
        port.set_flow_control(serialport::FlowControl::None)?;

        Ok(Transport {
            port,
            reset_mode,
            reset_settle_ms: 200,
        })
    }

    /// Holds one control line high for power, matching the original
    /// loader's `setPower` (used to feed an RS-232 level converter from the
    /// line not used for reset).
    pub fn set_power(&mut self) -> Result<(), Error> {
        match &self.reset_mode {
            ResetMode::Command(_) => {
                self.port.write_data_terminal_ready(true)?;
                self.port.write_request_to_send(true)?;
            }
            ResetMode::Line { line, .. } => match line {
                ResetLine::Dtr => self.port.write_request_to_send(true)?,
                ResetLine::Rts => self.port.write_data_terminal_ready(true)?,
            },
        }
        std::thread::sleep(Duration::from_millis(100));
        Ok(())
    }

    /// Resets the target, either by toggling the configured line or by
    /// sending the configured application command.
    pub fn reset(&mut self) -> Result<(), Error> {
        match self.reset_mode.clone() {
            ResetMode::Command(cmd) => {
                debug!("resetting target via application command {:?}", cmd);
                self.write_all(cmd.as_bytes())?;
                let _ = self.read_available(64, Duration::from_millis(self.reset_settle_ms));
            }
            ResetMode::Line { line, active_high } => {
                debug!("resetting target via {:?} line", line);
                let (assert, deassert) = if active_high { (true, false) } else { (false, true) };

                self.set_line(line, assert)?;
                std::thread::sleep(Duration::from_millis(1));
                self.set_line(line, deassert)?;
                std::thread::sleep(Duration::from_millis(self.reset_settle_ms));
            }
        }
        Ok(())
    }

    fn set_line(&mut self, line: ResetLine, value: bool) -> Result<(), Error> {
        match line {
            ResetLine::Dtr => self.port.write_data_terminal_ready(value)?,
            ResetLine::Rts => self.port.write_request_to_send(value)?,
        }
        Ok(())
    }

    pub fn write_all(&mut self, data: &[u8]) -> Result<(), Error> {
        self.port.write_all(data)?;
        Ok(())
    }

    /// Reads up to `size` bytes, extending the deadline by `timeout` each
    /// time new data arrives. Returns fewer bytes than `size` (possibly
    /// zero) if the deadline elapses with no further data — this is not an
    /// error, callers interpret a short read per the operation's own rules.
    pub fn read_available(&mut self, size: usize, timeout: Duration) -> Result<Vec<u8>, Error> {
        let mut data = Vec::with_capacity(size);
        let mut deadline = Instant::now() + timeout;
        let mut buf = [0u8; 256];

        while data.len() < size && Instant::now() < deadline {
            let want = (size - data.len()).min(buf.len());
            match self.port.read(&mut buf[..want]) {
                Ok(0) => break,
                Ok(n) => {
                    trace!("read {} bytes", n);
                    data.extend_from_slice(&buf[..n]);
                    deadline = Instant::now() + timeout;
                }
                Err(e) if e.kind() == std::io::ErrorKind::TimedOut => break,
                Err(e) => return Err(e.into()),
            }
        }

        Ok(data)
    }

    /// Reads exactly `expect.len()` bytes and checks they equal `expect`,
    /// used for the one-wire echo check and for confirm/request handshakes.
    pub fn expect(&mut self, expect: &[u8], timeout: Duration) -> Result<(), Error> {
        let got = self.read_available(expect.len(), timeout)?;
        if got.is_empty() {
            return Err(Error::NoResponse(timeout));
        }
        if got.len() != expect.len() {
            return Err(Error::TruncatedStream {
                expected: expect.len(),
                got: got.len(),
            });
        }
        if got != expect {
            if expect.len() == 1 {
                return Err(Error::UnexpectedReply(got[0]));
            }
            return Err(Error::EchoMismatch {
                sent: expect[0],
                echoed: got[0],
            });
        }
        Ok(())
    }
}
