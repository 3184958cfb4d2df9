//! Transport configuration

use core::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::TransportError;

/// Serial bit rates the FPGA's UART can be switched to
///
/// The discriminant order is the FPGA baud code written to core 0
/// register 2.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum BaudRate {
    B1200,
    B1800,
    B2400,
    B4800,
    B9600,
    B19200,
    B38400,
    B57600,
    #[default]
    B115200,
    B230400,
    B460800,
    B500000,
    B576000,
    B921600,
}

impl BaudRate {
    pub const ALL: [BaudRate; 14] = [
        BaudRate::B1200,
        BaudRate::B1800,
        BaudRate::B2400,
        BaudRate::B4800,
        BaudRate::B9600,
        BaudRate::B19200,
        BaudRate::B38400,
        BaudRate::B57600,
        BaudRate::B115200,
        BaudRate::B230400,
        BaudRate::B460800,
        BaudRate::B500000,
        BaudRate::B576000,
        BaudRate::B921600,
    ];

    pub const fn bps(self) -> u32 {
        match self {
            BaudRate::B1200 => 1_200,
            BaudRate::B1800 => 1_800,
            BaudRate::B2400 => 2_400,
            BaudRate::B4800 => 4_800,
            BaudRate::B9600 => 9_600,
            BaudRate::B19200 => 19_200,
            BaudRate::B38400 => 38_400,
            BaudRate::B57600 => 57_600,
            BaudRate::B115200 => 115_200,
            BaudRate::B230400 => 230_400,
            BaudRate::B460800 => 460_800,
            BaudRate::B500000 => 500_000,
            BaudRate::B576000 => 576_000,
            BaudRate::B921600 => 921_600,
        }
    }

    /// Code the FPGA expects in core 0 register 2
    pub const fn fpga_code(self) -> u8 {
        self as u8
    }

    pub fn from_bps(bps: u32) -> Option<Self> {
        Self::ALL.into_iter().find(|b| b.bps() == bps)
    }
}

impl TryFrom<u32> for BaudRate {
    type Error = TransportError;

    fn try_from(bps: u32) -> Result<Self, Self::Error> {
        Self::from_bps(bps).ok_or(TransportError::UnsupportedBaud { baud: bps })
    }
}

impl From<BaudRate> for u32 {
    fn from(baud: BaudRate) -> u32 {
        baud.bps()
    }
}

impl fmt::Display for BaudRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.bps())
    }
}

/// Link, interrupt line and timing settings
///
/// Loaded from the `[transport]` table of the daemon's TOML file; every
/// field is optional.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TransportConfig {
    /// Serial device path
    pub device: PathBuf,

    pub baud: BaudRate,

    /// sysfs GPIO pin wired to the FPGA interrupt output
    pub interrupt_pin: Option<u32>,

    /// sysfs GPIO class directory
    pub gpio_root: PathBuf,

    /// Inactivity timeout while waiting for a response
    pub response_timeout_ms: u64,

    /// Fallback poll of the interrupt line; 0 disables it
    pub interrupt_poll_ms: u64,

    /// Pause between telling the FPGA a new baud rate and switching the host
    pub baud_settle_ms: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            device: PathBuf::from("/dev/ttyUSB1"),
            baud: BaudRate::default(),
            interrupt_pin: None,
            gpio_root: PathBuf::from("/sys/class/gpio"),
            response_timeout_ms: 100,
            interrupt_poll_ms: 250,
            baud_settle_ms: 2_000,
        }
    }
}

impl TransportConfig {
    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }

    pub fn interrupt_poll_interval(&self) -> Option<Duration> {
        match self.interrupt_poll_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }

    pub fn baud_settle(&self) -> Duration {
        Duration::from_millis(self.baud_settle_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_baud_codes_follow_table_order() {
        assert_eq!(BaudRate::B1200.fpga_code(), 0);
        assert_eq!(BaudRate::B9600.fpga_code(), 4);
        assert_eq!(BaudRate::B115200.fpga_code(), 8);
        assert_eq!(BaudRate::B921600.fpga_code(), 13);
        for (code, baud) in BaudRate::ALL.iter().enumerate() {
            assert_eq!(usize::from(baud.fpga_code()), code);
        }
    }

    #[test]
    fn test_baud_from_bps() {
        assert_eq!(BaudRate::try_from(460_800).unwrap(), BaudRate::B460800);
        assert!(matches!(
            BaudRate::try_from(14_400),
            Err(TransportError::UnsupportedBaud { baud: 14_400 })
        ));
    }

    #[test]
    fn test_defaults() {
        let config = TransportConfig::default();
        assert_eq!(config.device, PathBuf::from("/dev/ttyUSB1"));
        assert_eq!(config.baud, BaudRate::B115200);
        assert_eq!(config.response_timeout(), Duration::from_millis(100));
        assert_eq!(config.interrupt_poll_interval(), Some(Duration::from_millis(250)));
        assert_eq!(config.baud_settle(), Duration::from_secs(2));
    }

    #[test]
    fn test_partial_toml() {
        let config: TransportConfig = toml::from_str(
            r#"
            device = "/dev/ttyACM0"
            baud = 921600
            interrupt_pin = 17
            interrupt_poll_ms = 0
            "#,
        )
        .unwrap();
        assert_eq!(config.device, PathBuf::from("/dev/ttyACM0"));
        assert_eq!(config.baud, BaudRate::B921600);
        assert_eq!(config.interrupt_pin, Some(17));
        assert_eq!(config.interrupt_poll_interval(), None);
        assert_eq!(config.response_timeout_ms, 100);
    }

    #[test]
    fn test_toml_rejects_unsupported_baud() {
        let err = toml::from_str::<TransportConfig>("baud = 14400").unwrap_err();
        assert!(err.to_string().contains("Unsupported baud rate 14400"));
    }
}
