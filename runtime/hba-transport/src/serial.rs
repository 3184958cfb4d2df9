//! Link Configurator: serial device
//!
//! Opens the FPGA's serial port at 8-N-1 with no flow control, in raw mode
//! (`VMIN=1`, `VTIME=0`, breaks ignored, modem lines ignored) and
//! non-blocking. On Linux the driver is also asked for low-latency mode so
//! single-byte acks are not held back by the USB serial adapter's timer.

use std::io::{self, Read, Write};
use std::os::unix::io::{AsRawFd, RawFd};
use std::path::{Path, PathBuf};
use std::time::Duration;

use hba_platform::fd::{poll_fd, set_nonblocking};
use hba_platform::Link;
use log::{debug, info};
use serialport::{DataBits, FlowControl, Parity, SerialPort, StopBits, TTYPort};

use crate::config::BaudRate;
use crate::{Result, TransportError};

/// Open serial connection to the FPGA
pub struct SerialLink {
    port: TTYPort,
    path: PathBuf,
    baud: u32,
}

impl SerialLink {
    /// Open and configure `path` at `baud` bits per second
    pub fn open(path: &Path, baud: u32) -> io::Result<Self> {
        let port = serialport::new(path.to_string_lossy(), baud)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(Duration::ZERO)
            .open_native()?;

        let mut link = Self {
            port,
            path: path.to_path_buf(),
            baud,
        };
        link.configure(baud)?;
        set_nonblocking(link.port.as_raw_fd())?;

        #[cfg(target_os = "linux")]
        if let Err(e) = request_low_latency(link.port.as_raw_fd()) {
            debug!("{}: low latency mode unavailable: {}", path.display(), e);
        }

        info!("{}: opened at {} baud", path.display(), baud);
        Ok(link)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn baud(&self) -> u32 {
        self.baud
    }

    /// Raw mode first, then the rate, so a custom-rate termios2 setting made
    /// by the port layer is not clobbered by the legacy termios write.
    fn configure(&mut self, baud: u32) -> io::Result<()> {
        apply_raw_mode(self.port.as_raw_fd())?;
        self.port.set_baud_rate(baud)?;
        self.baud = baud;
        Ok(())
    }
}

impl Link for SerialLink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.port.write(buf)
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.port.read(buf)
    }

    fn wait_readable(&mut self, timeout: Duration) -> io::Result<bool> {
        let revents = poll_fd(self.port.as_raw_fd(), libc::POLLIN, timeout)?;
        Ok(revents != 0)
    }

    fn set_baud_rate(&mut self, baud: u32) -> io::Result<()> {
        self.configure(baud)?;
        info!("{}: now at {} baud", self.path.display(), baud);
        Ok(())
    }

    fn raw_fd(&self) -> Option<RawFd> {
        Some(self.port.as_raw_fd())
    }
}

/// Open the FPGA serial link
///
/// # Errors
/// [`TransportError::LinkUnavailable`] if the device cannot be opened or
/// configured
pub fn open_link(path: &Path, baud: BaudRate) -> Result<SerialLink> {
    SerialLink::open(path, baud.bps()).map_err(|source| TransportError::LinkUnavailable {
        path: path.to_path_buf(),
        source,
    })
}

/// Switch an open link to a new rate without closing it
pub fn reconfigure(link: &mut SerialLink, baud: BaudRate) -> Result<()> {
    link.set_baud_rate(baud.bps())
        .map_err(|source| TransportError::LinkUnavailable {
            path: link.path.clone(),
            source,
        })
}

fn apply_raw_mode(fd: RawFd) -> io::Result<()> {
    let mut tio: libc::termios = unsafe { std::mem::zeroed() };
    if unsafe { libc::tcgetattr(fd, &mut tio) } < 0 {
        return Err(io::Error::last_os_error());
    }

    unsafe { libc::cfmakeraw(&mut tio) };
    tio.c_iflag |= libc::IGNBRK;
    tio.c_cflag &= !(libc::CSIZE | libc::PARENB | libc::CSTOPB | libc::CRTSCTS);
    tio.c_cflag |= libc::CS8 | libc::CREAD | libc::CLOCAL;
    tio.c_cc[libc::VMIN] = 1;
    tio.c_cc[libc::VTIME] = 0;

    if unsafe { libc::tcsetattr(fd, libc::TCSANOW, &tio) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// `struct serial_struct` from `<linux/serial.h>`
#[cfg(target_os = "linux")]
#[repr(C)]
struct SerialStruct {
    kind: libc::c_int,
    line: libc::c_int,
    port: libc::c_uint,
    irq: libc::c_int,
    flags: libc::c_int,
    xmit_fifo_size: libc::c_int,
    custom_divisor: libc::c_int,
    baud_base: libc::c_int,
    close_delay: libc::c_ushort,
    io_type: libc::c_char,
    reserved_char: [libc::c_char; 1],
    hub6: libc::c_int,
    closing_wait: libc::c_ushort,
    closing_wait2: libc::c_ushort,
    iomem_base: *mut libc::c_uchar,
    iomem_reg_shift: libc::c_ushort,
    port_high: libc::c_uint,
    iomap_base: libc::c_ulong,
}

#[cfg(target_os = "linux")]
const ASYNC_LOW_LATENCY: libc::c_int = 1 << 13;

#[cfg(target_os = "linux")]
fn request_low_latency(fd: RawFd) -> io::Result<()> {
    let mut serial: SerialStruct = unsafe { std::mem::zeroed() };
    if unsafe { libc::ioctl(fd, libc::TIOCGSERIAL, &mut serial as *mut SerialStruct) } < 0 {
        return Err(io::Error::last_os_error());
    }
    serial.flags |= ASYNC_LOW_LATENCY;
    if unsafe { libc::ioctl(fd, libc::TIOCSSERIAL, &serial as *const SerialStruct) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_device_is_link_unavailable() {
        let path = Path::new("/dev/hba-no-such-tty");
        match open_link(path, BaudRate::B115200) {
            Err(TransportError::LinkUnavailable { path: p, .. }) => assert_eq!(p, path),
            Err(e) => panic!("unexpected error: {e}"),
            Ok(_) => panic!("opened a device that does not exist"),
        }
    }

    #[test]
    fn test_raw_mode_rejects_non_tty() {
        let file = tempfile::tempfile().unwrap();
        assert!(apply_raw_mode(file.as_raw_fd()).is_err());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_serial_struct_matches_kernel_layout() {
        // 72 bytes on LP64 targets (x86_64, aarch64)
        if std::mem::size_of::<libc::c_ulong>() == 8 {
            assert_eq!(std::mem::size_of::<SerialStruct>(), 72);
        }
    }
}
