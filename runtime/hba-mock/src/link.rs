//! Mock link, interrupt line and connector backed by a [`MockFpga`]

use std::io;
use std::path::Path;
use std::time::Duration;

use hba_platform::{Connector, InterruptLine, Link};

use crate::fpga::MockFpga;

/// Serial link to a [`MockFpga`]
///
/// Waits never block: a wait reports readable exactly when response bytes
/// are queued, so a missing response behaves like an expired timeout.
pub struct MockLink {
    fpga: MockFpga,
}

impl MockLink {
    pub(crate) fn new(fpga: MockFpga) -> Self {
        Self { fpga }
    }
}

impl Link for MockLink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self.fpga.state_mut();
        if state.hung_up {
            return Err(io::ErrorKind::BrokenPipe.into());
        }
        if let Some(kind) = state.write_errors.pop_front() {
            return Err(kind.into());
        }
        let n = state
            .write_limits
            .pop_front()
            .map_or(buf.len(), |limit| limit.min(buf.len()));
        state.receive(&buf[..n]);
        Ok(n)
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut state = self.fpga.state_mut();
        if state.tx.is_empty() {
            if state.hung_up {
                return Ok(0);
            }
            return Err(io::ErrorKind::WouldBlock.into());
        }
        let mut n = buf.len().min(state.tx.len());
        if let Some(chunk) = state.read_chunk {
            n = n.min(chunk.max(1));
        }
        for (slot, byte) in buf.iter_mut().zip(state.tx.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }

    fn wait_readable(&mut self, _timeout: Duration) -> io::Result<bool> {
        let state = self.fpga.state();
        if let Some(kind) = state.wait_error {
            return Err(kind.into());
        }
        Ok(!state.tx.is_empty() || state.hung_up)
    }

    fn set_baud_rate(&mut self, baud: u32) -> io::Result<()> {
        self.fpga.state_mut().baud_changes.push(baud);
        Ok(())
    }
}

/// Interrupt line driven by a [`MockFpga`]
pub struct MockInterruptLine {
    fpga: MockFpga,
}

impl MockInterruptLine {
    pub(crate) fn new(fpga: MockFpga) -> Self {
        Self { fpga }
    }
}

impl InterruptLine for MockInterruptLine {
    fn is_asserted(&mut self) -> io::Result<bool> {
        let mut state = self.fpga.state_mut();
        state.line_reads += 1;
        if let Some(kind) = state.line_error {
            return Err(kind.into());
        }
        Ok(state.line_level)
    }
}

/// Connector whose every link and line leads to the same [`MockFpga`]
pub struct MockConnector {
    fpga: MockFpga,
}

impl MockConnector {
    pub(crate) fn new(fpga: MockFpga) -> Self {
        Self { fpga }
    }
}

impl Connector for MockConnector {
    fn open_link(&self, path: &Path, baud: u32) -> io::Result<Box<dyn Link>> {
        let mut state = self.fpga.state_mut();
        if state.refuse_links {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("{}: no such device", path.display()),
            ));
        }
        state.opened_links.push((path.to_path_buf(), baud));
        drop(state);
        Ok(Box::new(self.fpga.link()))
    }

    fn open_interrupt_line(&self, pin: u32) -> io::Result<Box<dyn InterruptLine>> {
        let mut state = self.fpga.state_mut();
        if state.refuse_lines {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("gpio{}: not exported", pin),
            ));
        }
        state.opened_lines.push(pin);
        drop(state);
        Ok(Box::new(self.fpga.interrupt_line()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ACK;

    #[test]
    fn test_link_round_trip() {
        let fpga = MockFpga::new();
        let mut link = fpga.link();

        assert!(!link.wait_readable(Duration::ZERO).unwrap());
        assert_eq!(link.write(&[0x00, 0x00, 0xAA, 0x00]).unwrap(), 4);
        assert!(link.wait_readable(Duration::ZERO).unwrap());

        let mut buf = [0u8; 4];
        assert_eq!(link.read(&mut buf).unwrap(), 1);
        assert_eq!(buf[0], ACK);
        assert_eq!(fpga.register(0, 0), 0xAA);
    }

    #[test]
    fn test_scripted_short_write() {
        let fpga = MockFpga::new();
        let mut link = fpga.link();
        fpga.limit_next_write(2);

        assert_eq!(link.write(&[0x81, 0x01, 0, 0, 0]).unwrap(), 2);
        assert_eq!(link.write(&[0, 0, 0]).unwrap(), 3);
        assert_eq!(fpga.request_count(), 1);
    }

    #[test]
    fn test_read_chunking() {
        let fpga = MockFpga::new();
        let mut link = fpga.link();
        fpga.set_read_chunk(Some(1));
        fpga.inject(&[1, 2, 3]);

        let mut buf = [0u8; 3];
        assert_eq!(link.read(&mut buf).unwrap(), 1);
        assert_eq!(fpga.unread(), 2);
    }

    #[test]
    fn test_hang_up() {
        let fpga = MockFpga::new();
        let mut link = fpga.link();
        fpga.hang_up();

        assert!(link.wait_readable(Duration::ZERO).unwrap());
        assert_eq!(link.read(&mut [0u8; 2]).unwrap(), 0);
        assert_eq!(
            link.write(&[0]).unwrap_err().kind(),
            io::ErrorKind::BrokenPipe
        );
    }

    #[test]
    fn test_connector_records_opens() {
        let fpga = MockFpga::new();
        let connector = fpga.connector();

        connector.open_link(Path::new("/dev/ttyUSB1"), 115_200).unwrap();
        connector.open_interrupt_line(17).unwrap();
        assert_eq!(fpga.opened_links().len(), 1);
        assert_eq!(fpga.opened_lines(), vec![17]);

        fpga.refuse_links(true);
        assert!(connector.open_link(Path::new("/dev/ttyUSB9"), 9600).is_err());
    }

    #[test]
    fn test_line_level_and_reads() {
        let fpga = MockFpga::new();
        let mut line = fpga.interrupt_line();
        assert!(!line.is_asserted().unwrap());
        fpga.raise_interrupt(4);
        assert!(line.is_asserted().unwrap());
        assert_eq!(fpga.line_reads(), 2);
    }
}
