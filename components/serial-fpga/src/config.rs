//! Daemon configuration file and command-line overrides
//!
//! ```toml
//! [transport]
//! device = "/dev/ttyUSB1"
//! baud = 115200
//! interrupt_pin = 17
//! ```

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use hba_transport::{BaudRate, TransportConfig, TransportError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Cannot read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Invalid configuration in {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error(transparent)]
    Override(#[from] TransportError),
}

pub type Result<T> = core::result::Result<T, ConfigError>;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DaemonConfig {
    pub transport: TransportConfig,
}

impl DaemonConfig {
    pub fn from_toml(text: &str, path: &Path) -> Result<Self> {
        toml::from_str(text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Load `path`, or the built-in defaults when no file is given
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&text, path)
    }

    /// Apply command-line settings on top of the file
    pub fn apply(&mut self, overrides: &Overrides) -> Result<()> {
        let transport = &mut self.transport;
        if let Some(port) = &overrides.port {
            transport.device = port.clone();
        }
        if let Some(bps) = overrides.baud {
            transport.baud = BaudRate::try_from(bps)?;
        }
        if let Some(pin) = overrides.interrupt_pin {
            transport.interrupt_pin = Some(pin);
        }
        Ok(())
    }
}

/// Settings given on the command line; `None` keeps the file's value
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub port: Option<PathBuf>,
    pub baud: Option<u32>,
    pub interrupt_pin: Option<u32>,
}
