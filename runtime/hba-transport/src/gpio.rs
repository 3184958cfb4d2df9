//! Link Configurator: sysfs GPIO interrupt line
//!
//! The FPGA drives one GPIO input high while any core has an interrupt
//! pending. The pin is exported through the sysfs GPIO class, configured as
//! a rising-edge input, and its `value` file is watched for `POLLPRI`.

use std::fs::{self, File};
use std::io::{self, Read, Seek, SeekFrom};
use std::os::unix::io::{AsRawFd, RawFd};
use std::path::{Path, PathBuf};

use hba_platform::InterruptLine;
use log::{debug, info};

use crate::{Result, TransportError};

/// Exported sysfs GPIO input
#[derive(Debug)]
pub struct SysfsGpio {
    pin: u32,
    value: File,
}

impl SysfsGpio {
    /// Export `pin` under `root` and configure it for rising edges
    pub fn open(root: &Path, pin: u32) -> io::Result<Self> {
        let dir = pin_dir(root, pin);
        if dir.is_dir() {
            debug!("gpio{} already exported", pin);
        } else {
            export(root, pin)?;
        }

        fs::write(dir.join("direction"), "in")?;
        fs::write(dir.join("edge"), "rising")?;
        let value = File::open(dir.join("value"))?;

        info!("gpio{}: interrupt line ready", pin);
        Ok(Self { pin, value })
    }

    pub fn pin(&self) -> u32 {
        self.pin
    }
}

impl InterruptLine for SysfsGpio {
    /// Reading the value also clears the pending `POLLPRI` event
    fn is_asserted(&mut self) -> io::Result<bool> {
        let mut level = [0u8; 2];
        self.value.seek(SeekFrom::Start(0))?;
        let n = self.value.read(&mut level)?;
        Ok(n > 0 && level[0] == b'1')
    }

    fn raw_fd(&self) -> Option<RawFd> {
        Some(self.value.as_raw_fd())
    }
}

fn pin_dir(root: &Path, pin: u32) -> PathBuf {
    root.join(format!("gpio{}", pin))
}

fn export(root: &Path, pin: u32) -> io::Result<()> {
    match fs::write(root.join("export"), pin.to_string()) {
        Ok(()) => Ok(()),
        // Exported by someone else between our check and the write
        Err(e) if e.raw_os_error() == Some(libc::EBUSY) => Ok(()),
        Err(e) => Err(e),
    }
}

/// Open the FPGA interrupt line
///
/// # Errors
/// [`TransportError::InterruptLineUnavailable`] if the pin cannot be
/// exported, configured or opened
pub fn open_interrupt_line(root: &Path, pin: u32) -> Result<SysfsGpio> {
    SysfsGpio::open(root, pin)
        .map_err(|source| TransportError::InterruptLineUnavailable { pin, source })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn fake_sysfs(pin: u32) -> TempDir {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join(format!("gpio{}", pin));
        fs::create_dir(&dir).unwrap();
        fs::write(dir.join("direction"), "out").unwrap();
        fs::write(dir.join("edge"), "none").unwrap();
        fs::write(dir.join("value"), "0\n").unwrap();
        root
    }

    #[test]
    fn test_configures_exported_pin() {
        let root = fake_sysfs(17);
        let gpio = open_interrupt_line(root.path(), 17).unwrap();
        assert_eq!(gpio.pin(), 17);

        let dir = root.path().join("gpio17");
        assert_eq!(fs::read_to_string(dir.join("direction")).unwrap(), "in");
        assert_eq!(fs::read_to_string(dir.join("edge")).unwrap(), "rising");
        // Already exported: export is left alone
        assert!(!root.path().join("export").exists());
    }

    #[test]
    fn test_reads_level_from_value_file() {
        let root = fake_sysfs(4);
        let mut gpio = open_interrupt_line(root.path(), 4).unwrap();
        assert!(!gpio.is_asserted().unwrap());

        fs::write(root.path().join("gpio4/value"), "1\n").unwrap();
        assert!(gpio.is_asserted().unwrap());
        assert!(gpio.is_asserted().unwrap());

        fs::write(root.path().join("gpio4/value"), "0\n").unwrap();
        assert!(!gpio.is_asserted().unwrap());
    }

    #[test]
    fn test_exports_missing_pin() {
        let root = tempfile::tempdir().unwrap();
        // The fake tree never grows gpio23/, so configuration fails after export
        let err = open_interrupt_line(root.path(), 23).unwrap_err();
        assert!(matches!(err, TransportError::InterruptLineUnavailable { pin: 23, .. }));
        assert_eq!(fs::read_to_string(root.path().join("export")).unwrap(), "23");
    }

    #[test]
    fn test_missing_sysfs_root() {
        let err = open_interrupt_line(Path::new("/nonexistent/gpio"), 5).unwrap_err();
        assert!(matches!(err, TransportError::InterruptLineUnavailable { pin: 5, .. }));
    }

    #[test]
    fn test_value_fd_is_exposed() {
        let root = fake_sysfs(6);
        let gpio = open_interrupt_line(root.path(), 6).unwrap();
        assert!(gpio.raw_fd().is_some());
    }
}
