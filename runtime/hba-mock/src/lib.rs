//! ⚠️  MOCK FPGA for host-side testing
//!
//! # WARNING: This is NOT real hardware!
//!
//! A register-file model of an HBA FPGA sitting on the other end of a mock
//! serial link, plus a mock interrupt line and connector, so the transport
//! and drivers can be exercised without a board attached.
//!
//! ## What is modelled
//!
//! - 16 cores x 256 byte-wide registers
//! - Request framing from the header byte (reads: `count + 4` bytes, writes:
//!   `count + 3` bytes)
//! - Read responses echoing the two header bytes followed by register data
//! - Write responses of a single `0xAC` acknowledgement
//! - The pending-interrupt mask in core 0 registers 0/1 and the interrupt line
//!
//! ## Fault injection
//!
//! Short writes, write errors, partial/missing responses, bad acks, failing
//! readiness waits and link hang-up can all be scripted through [`MockFpga`].
//!
//! ## Current Limitations
//!
//! - No timing model: waits return immediately
//! - Registers have no side effects beyond storage
//! - Used ONLY for tests and benchmarks

mod fpga;
mod link;

pub use fpga::{Fault, MockFpga, ACK};
pub use link::{MockConnector, MockInterruptLine, MockLink};
