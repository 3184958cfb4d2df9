//! Serial FPGA Transport - request/response link to HBA peripheral cores
//!
//! # Purpose
//! Every HBA peripheral (LEDs and buttons, motor PWM, quadrature encoders,
//! sonar, GPIO) lives in an FPGA "core" behind one serial link. This crate
//! frames register reads and writes onto that link, waits for and validates
//! the responses, and demultiplexes the FPGA's interrupt line to the driver
//! that owns the requesting core.
//!
//! # Integration Points
//! - Depends on: `hba-platform` (links, reactor, broadcaster)
//! - Provides to: peripheral drivers, through the [`FpgaBus`] trait
//! - Wire format: see [`packet`]
//! - Capabilities required: a serial device and, optionally, a sysfs GPIO pin
//!
//! # Architecture
//! [`SerialFpga`] assembles four parts:
//! - the Link Configurator ([`serial`], [`gpio`]) opening the device and line
//! - the [`ProtocolEngine`] that owns the link for one exchange at a time
//! - the [`InterruptTable`] mapping core ids to handlers
//! - the interrupt service routine ([`interrupt`]) reading the pending mask
//!   from core 0 and dispatching in ascending core order
//!
//! # Testing Strategy
//! - Unit tests: codec, engine recovery paths, dispatch order
//! - Integration tests: full transport against `hba-mock`'s simulated FPGA
//! - Hardware tests: N/A (needs a board on `/dev/ttyUSB*`)

use std::io;
use std::path::PathBuf;

use thiserror::Error;

pub mod config;
pub mod dispatch;
pub mod engine;
pub mod gpio;
pub mod interrupt;
pub mod packet;
pub mod raw;
pub mod regs;
pub mod serial;
mod system;
mod transport;

pub use config::{BaudRate, TransportConfig};
pub use dispatch::InterruptTable;
pub use engine::ProtocolEngine;
pub use interrupt::{InterruptOutcome, PendingMask};
pub use packet::{CoreId, Header, Packet, ACK, MAX_PACKET, MAX_REGISTERS, NUM_CORES};
pub use regs::RegisterBlock;
pub use system::SystemConnector;
pub use transport::{SerialFpga, COMPONENT, RESOURCES};

/// Failures of a single exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("Packet could not be sent")]
    NotSendable,

    #[error("Response not received")]
    NotReceivable,

    #[error("Bad acknowledgement: expected 0xac, got {got:#04x}")]
    BadAcknowledgement { got: u8 },

    #[error("Link busy with another exchange")]
    Busy,

    #[error("Readiness multiplexer failed")]
    MultiplexerFailure,
}

impl ProtocolError {
    /// Whether the transport can no longer make progress
    pub fn is_fatal(&self) -> bool {
        matches!(self, ProtocolError::MultiplexerFailure)
    }
}

/// Transport configuration and lifecycle failures
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Serial link {path} unavailable: {source}")]
    LinkUnavailable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Interrupt line gpio{pin} unavailable: {source}")]
    InterruptLineUnavailable {
        pin: u32,
        #[source]
        source: io::Error,
    },

    #[error("Invalid core id {core} (valid: 1-15)")]
    InvalidCore { core: u8 },

    #[error("Unsupported baud rate {baud}")]
    UnsupportedBaud { baud: u32 },

    #[error("Invalid raw byte {token:?}")]
    InvalidRawByte { token: String },

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

pub type Result<T> = core::result::Result<T, TransportError>;

/// Capability surface the transport offers to peripheral drivers
pub trait FpgaBus {
    /// Send the first `count` bytes of `buf` as one request and read the
    /// response back into `buf` in place.
    ///
    /// # Returns
    /// Number of response bytes: `count - 2` for a read (two echoed header
    /// bytes, then data), `1` for a write (the ack byte).
    fn exchange(&self, count: usize, buf: &mut [u8]) -> core::result::Result<usize, ProtocolError>;

    /// Route interrupts of `core_id` to `handler`.
    ///
    /// # Errors
    /// [`TransportError::InvalidCore`] for core 0 (reserved) or ids >= 16
    fn register_interrupt_handler(
        &self,
        core_id: u8,
        handler: std::rc::Rc<dyn InterruptHandler>,
    ) -> Result<()>;

    /// Whether the bus hit a fatal failure and will refuse every further
    /// exchange
    fn has_failed(&self) -> bool {
        false
    }
}

/// Interrupt service entry point of a peripheral driver
///
/// Closures taking the bus implement this, so a driver usually registers a
/// closure capturing an `Rc` of its own state.
pub trait InterruptHandler {
    fn on_interrupt(&self, bus: &dyn FpgaBus);
}

impl<F> InterruptHandler for F
where
    F: Fn(&dyn FpgaBus),
{
    fn on_interrupt(&self, bus: &dyn FpgaBus) {
        self(bus)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_multiplexer_failure_is_fatal() {
        assert!(ProtocolError::MultiplexerFailure.is_fatal());
        assert!(!ProtocolError::NotReceivable.is_fatal());
        assert!(!ProtocolError::Busy.is_fatal());
    }

    #[test]
    fn test_error_messages() {
        let err = ProtocolError::BadAcknowledgement { got: 0x55 };
        assert_eq!(err.to_string(), "Bad acknowledgement: expected 0xac, got 0x55");

        let err = TransportError::from(ProtocolError::NotSendable);
        assert!(matches!(err, TransportError::Protocol(ProtocolError::NotSendable)));
        assert_eq!(err.to_string(), "Protocol error: Packet could not be sent");
    }
}
