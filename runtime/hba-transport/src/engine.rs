//! Packet Protocol Engine
//!
//! One exchange is: write the request, then collect exactly the expected
//! number of response bytes into the same buffer. The wait is an inactivity
//! timeout that restarts whenever bytes arrive, so a slow but live FPGA is
//! never cut off mid-response while a silent one costs one timeout.

use std::io;
use std::os::unix::io::RawFd;
use std::thread;
use std::time::{Duration, Instant};

use hba_platform::Link;
use log::{debug, error, trace, warn};

use crate::packet::{expected_response_len, MAX_PACKET};
use crate::ProtocolError;

/// Pause before the single retry of a short write
const WRITE_RETRY_DELAY: Duration = Duration::from_millis(1);

type Result<T> = core::result::Result<T, ProtocolError>;

/// Owns the link and runs exchanges on it
pub struct ProtocolEngine {
    link: Option<Box<dyn Link>>,
    timeout: Duration,
}

impl ProtocolEngine {
    pub fn new(timeout: Duration) -> Self {
        Self {
            link: None,
            timeout,
        }
    }

    pub fn with_link(link: Box<dyn Link>, timeout: Duration) -> Self {
        Self {
            link: Some(link),
            timeout,
        }
    }

    /// Install a link, returning the one it replaces
    pub fn attach(&mut self, link: Box<dyn Link>) -> Option<Box<dyn Link>> {
        self.link.replace(link)
    }

    /// Take the link out, leaving the engine closed
    pub fn detach(&mut self) -> Option<Box<dyn Link>> {
        self.link.take()
    }

    pub fn is_open(&self) -> bool {
        self.link.is_some()
    }

    pub fn link_mut(&mut self) -> Option<&mut (dyn Link + 'static)> {
        self.link.as_deref_mut()
    }

    /// Descriptor of the open link, for event loop registration
    pub fn raw_fd(&self) -> Option<RawFd> {
        self.link.as_ref().and_then(|link| link.raw_fd())
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    /// Send `buf[..count]` and read the response into `buf` in place.
    ///
    /// # Returns
    /// Response length: `count - 2` for reads, `1` for writes.
    ///
    /// # Errors
    /// - `NotSendable`: bad arguments, link closed, or the write failed
    ///   after one retry
    /// - `NotReceivable`: the response was incomplete when the link went
    ///   quiet for a full timeout, or a read failed
    /// - `MultiplexerFailure`: the readiness wait itself failed
    pub fn exchange(&mut self, count: usize, buf: &mut [u8]) -> Result<usize> {
        if count == 0 || count > buf.len() || count > MAX_PACKET {
            debug!("refusing to send {} bytes from a {} byte buffer", count, buf.len());
            return Err(ProtocolError::NotSendable);
        }
        let Some(expected) = expected_response_len(buf[0], count) else {
            debug!("read request of {} bytes has no room for a response", count);
            return Err(ProtocolError::NotSendable);
        };
        let Some(link) = self.link.as_deref_mut() else {
            debug!("link closed, dropping {:02x?}", &buf[..count]);
            return Err(ProtocolError::NotSendable);
        };

        trace!("tx {:02x?}", &buf[..count]);
        send(link, &buf[..count])?;
        receive(link, &mut buf[..expected], self.timeout)?;
        trace!("rx {:02x?}", &buf[..expected]);
        Ok(expected)
    }
}

fn is_retryable(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
    )
}

fn send(link: &mut dyn Link, frame: &[u8]) -> Result<()> {
    let sent = match link.write(frame) {
        Ok(n) if n == frame.len() => return Ok(()),
        Ok(n) => n,
        Err(e) if is_retryable(&e) => 0,
        Err(e) => {
            error!("serial write failed: {}", e);
            return Err(ProtocolError::NotSendable);
        }
    };

    debug!("short write ({}/{} bytes), retrying once", sent, frame.len());
    thread::sleep(WRITE_RETRY_DELAY);
    let rest = &frame[sent..];
    match link.write(rest) {
        Ok(n) if n == rest.len() => Ok(()),
        Ok(n) => {
            error!("serial write stalled after {} of {} bytes", sent + n, frame.len());
            Err(ProtocolError::NotSendable)
        }
        Err(e) => {
            error!("serial write retry failed: {}", e);
            Err(ProtocolError::NotSendable)
        }
    }
}

fn receive(link: &mut dyn Link, out: &mut [u8], timeout: Duration) -> Result<()> {
    let expected = out.len();
    let mut received = 0;
    let mut deadline = Instant::now() + timeout;

    while received < expected {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match link.wait_readable(remaining) {
            Ok(true) => {}
            Ok(false) => {
                warn!("response timed out with {} of {} bytes", received, expected);
                return Err(ProtocolError::NotReceivable);
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                error!("waiting for response failed: {}", e);
                return Err(ProtocolError::MultiplexerFailure);
            }
        }

        match link.read(&mut out[received..]) {
            Ok(0) => {
                error!("serial link closed mid-response");
                return Err(ProtocolError::NotReceivable);
            }
            Ok(n) => {
                received += n;
                deadline = Instant::now() + timeout;
            }
            Err(e) if is_retryable(&e) => {
                if Instant::now() >= deadline {
                    warn!("response timed out with {} of {} bytes", received, expected);
                    return Err(ProtocolError::NotReceivable);
                }
            }
            Err(e) => {
                error!("serial read failed: {}", e);
                return Err(ProtocolError::NotReceivable);
            }
        }
    }
    Ok(())
}
