//! Raw descriptor helpers and a generic fd-backed [`Link`]

use std::io::{self, Read, Write};
use std::os::unix::io::{AsRawFd, RawFd};
use std::time::Duration;

use crate::link::Link;

/// Convert a wait bound to poll(2) milliseconds, rounding sub-millisecond
/// remainders up so a short non-zero timeout never degrades into a busy poll.
pub fn poll_millis(timeout: Duration) -> libc::c_int {
    let mut millis = timeout.as_millis();
    if timeout.subsec_nanos() % 1_000_000 != 0 {
        millis += 1;
    }
    millis.min(libc::c_int::MAX as u128) as libc::c_int
}

/// Wait for `events` on a single descriptor.
///
/// # Returns
/// The returned event mask, `0` on timeout.
///
/// # Errors
/// The raw poll(2) error, including `EINTR` as [`io::ErrorKind::Interrupted`].
pub fn poll_fd(fd: RawFd, events: libc::c_short, timeout: Duration) -> io::Result<libc::c_short> {
    let mut pfd = libc::pollfd {
        fd,
        events,
        revents: 0,
    };
    let ret = unsafe { libc::poll(&mut pfd, 1, poll_millis(timeout)) };
    if ret < 0 {
        return Err(io::Error::last_os_error());
    }
    if ret == 0 {
        return Ok(0);
    }
    Ok(pfd.revents)
}

/// Put a descriptor into non-blocking mode
pub fn set_nonblocking(fd: RawFd) -> io::Result<()> {
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    if flags & libc::O_NONBLOCK != 0 {
        return Ok(());
    }
    if unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// [`Link`] over any readable/writable descriptor
///
/// Used for sockets, pipes and pseudo-terminals. The descriptor is switched
/// to non-blocking mode on construction; readiness comes from poll(2).
pub struct FdLink<T> {
    inner: T,
}

impl<T: Read + Write + AsRawFd> FdLink<T> {
    pub fn new(inner: T) -> io::Result<Self> {
        set_nonblocking(inner.as_raw_fd())?;
        Ok(Self { inner })
    }

    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    pub fn into_inner(self) -> T {
        self.inner
    }
}

impl<T: Read + Write + AsRawFd> Link for FdLink<T> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.inner.flush()?;
        Ok(n)
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }

    fn wait_readable(&mut self, timeout: Duration) -> io::Result<bool> {
        // HUP/ERR count as readable so the following read reports them
        let revents = poll_fd(self.inner.as_raw_fd(), libc::POLLIN, timeout)?;
        Ok(revents != 0)
    }

    fn raw_fd(&self) -> Option<RawFd> {
        Some(self.inner.as_raw_fd())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::net::UnixStream;

    #[test]
    fn test_poll_millis_rounds_up() {
        assert_eq!(poll_millis(Duration::ZERO), 0);
        assert_eq!(poll_millis(Duration::from_micros(10)), 1);
        assert_eq!(poll_millis(Duration::from_millis(100)), 100);
        assert_eq!(poll_millis(Duration::from_secs(u64::MAX)), libc::c_int::MAX);
    }

    #[test]
    fn test_fd_link_reads_peer_bytes() {
        let (a, mut b) = UnixStream::pair().unwrap();
        let mut link = FdLink::new(a).unwrap();

        b.write_all(&[0x81, 0x01, 0x2A]).unwrap();
        assert!(link.wait_readable(Duration::from_secs(1)).unwrap());

        let mut buf = [0u8; 8];
        let n = link.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], &[0x81, 0x01, 0x2A]);
    }

    #[test]
    fn test_fd_link_wait_times_out() {
        let (a, _b) = UnixStream::pair().unwrap();
        let mut link = FdLink::new(a).unwrap();
        assert!(!link.wait_readable(Duration::from_millis(5)).unwrap());
    }

    #[test]
    fn test_fd_link_is_nonblocking() {
        let (a, _b) = UnixStream::pair().unwrap();
        let mut link = FdLink::new(a).unwrap();
        let mut buf = [0u8; 4];
        let err = link.read(&mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::WouldBlock);
    }

    #[test]
    fn test_fd_link_reports_hangup() {
        let (a, b) = UnixStream::pair().unwrap();
        let mut link = FdLink::new(a).unwrap();
        drop(b);

        assert!(link.wait_readable(Duration::from_secs(1)).unwrap());
        let mut buf = [0u8; 4];
        assert_eq!(link.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn test_fd_link_exposes_descriptor() {
        let (a, _b) = UnixStream::pair().unwrap();
        let fd = a.as_raw_fd();
        let link = FdLink::new(a).unwrap();
        assert_eq!(link.raw_fd(), Some(fd));
    }
}
