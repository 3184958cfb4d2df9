//! Link abstractions
//!
//! A [`Link`] is a full-duplex byte pipe to the FPGA (a serial port in
//! production, a socket pair or simulator in tests). An [`InterruptLine`] is
//! the level/edge side channel the FPGA raises when a core needs service.

use std::io;
use std::os::unix::io::RawFd;
use std::path::Path;
use std::time::Duration;

/// Byte transport to the FPGA
pub trait Link {
    /// Write as many bytes of `buf` as the device accepts right now.
    fn write(&mut self, buf: &[u8]) -> io::Result<usize>;

    /// Read whatever is available into `buf`.
    ///
    /// `Ok(0)` means the peer hung up.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Block until at least one byte is readable or `timeout` elapses.
    ///
    /// # Returns
    /// `Ok(true)` when readable, `Ok(false)` on timeout. An interrupted wait
    /// surfaces as [`io::ErrorKind::Interrupted`]; any other error means the
    /// readiness multiplexer itself failed.
    fn wait_readable(&mut self, timeout: Duration) -> io::Result<bool>;

    /// Re-apply line settings at a new bit rate without closing the handle.
    fn set_baud_rate(&mut self, baud: u32) -> io::Result<()> {
        let _ = baud;
        Ok(())
    }

    /// Descriptor to register with the event loop, if the link has one
    fn raw_fd(&self) -> Option<RawFd> {
        None
    }
}

/// Interrupt request line from the FPGA
pub trait InterruptLine {
    /// Sample the current level. `true` means a request is outstanding.
    fn is_asserted(&mut self) -> io::Result<bool>;

    /// Descriptor that signals edges as priority data (`POLLPRI`)
    fn raw_fd(&self) -> Option<RawFd> {
        None
    }
}

/// Opens links and interrupt lines by name
///
/// The transport holds a connector so it can close and reopen its link when
/// the port path or interrupt pin is reconfigured at runtime.
pub trait Connector {
    fn open_link(&self, path: &Path, baud: u32) -> io::Result<Box<dyn Link>>;

    fn open_interrupt_line(&self, pin: u32) -> io::Result<Box<dyn InterruptLine>>;
}
