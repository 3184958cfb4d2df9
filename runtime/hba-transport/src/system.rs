//! Connector for real hardware: tty serial ports and sysfs GPIO

use std::io;
use std::path::{Path, PathBuf};

use hba_platform::{Connector, InterruptLine, Link};

use crate::gpio::SysfsGpio;
use crate::serial::SerialLink;

/// Opens serial devices by path and GPIO pins under a sysfs root
pub struct SystemConnector {
    gpio_root: PathBuf,
}

impl SystemConnector {
    pub fn new(gpio_root: impl Into<PathBuf>) -> Self {
        Self {
            gpio_root: gpio_root.into(),
        }
    }

    pub fn gpio_root(&self) -> &Path {
        &self.gpio_root
    }
}

impl Connector for SystemConnector {
    fn open_link(&self, path: &Path, baud: u32) -> io::Result<Box<dyn Link>> {
        Ok(Box::new(SerialLink::open(path, baud)?))
    }

    fn open_interrupt_line(&self, pin: u32) -> io::Result<Box<dyn InterruptLine>> {
        Ok(Box::new(SysfsGpio::open(&self.gpio_root, pin)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_lines_open_under_configured_root() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("gpio12");
        fs::create_dir(&dir).unwrap();
        for file in ["direction", "edge", "value"] {
            fs::write(dir.join(file), "0").unwrap();
        }

        let connector = SystemConnector::new(root.path());
        let mut line = connector.open_interrupt_line(12).unwrap();
        assert!(!line.is_asserted().unwrap());
        assert!(connector.open_interrupt_line(13).is_err());
    }

    #[test]
    fn test_missing_serial_device() {
        let connector = SystemConnector::new("/sys/class/gpio");
        assert!(connector.open_link(Path::new("/dev/hba-no-such-tty"), 115_200).is_err());
    }
}
