//! serial-fpga daemon
//!
//! Loads the configuration, opens the transport on the host's serial port
//! and GPIO, and drives the event loop until the reactor is stopped or the
//! transport can no longer make progress.

pub mod config;

use std::io::{self, Write};
use std::time::Duration;

use crossbeam::channel::Receiver;
use hba_platform::{Reactor, ReactorError};
use hba_transport::{ProtocolError, SerialFpga};
use log::error;
use thiserror::Error;

pub use config::{ConfigError, DaemonConfig, Overrides};

/// Longest the loop sleeps before checking transport health and the trace
pub const TICK: Duration = Duration::from_millis(200);

#[derive(Debug, Error)]
pub enum DaemonError {
    #[error(transparent)]
    Reactor(#[from] ReactorError),

    #[error("Transport failed: {0}")]
    Transport(#[from] ProtocolError),

    #[error("Cannot write raw trace: {0}")]
    Trace(#[from] io::Error),
}

/// Run the event loop.
///
/// Lines received on `trace` (the `rawin` subscription, if any) are copied
/// to `out` after every iteration.
///
/// # Errors
/// - [`DaemonError::Reactor`] if poll(2) fails in the reactor
/// - [`DaemonError::Transport`] once the transport latched a multiplexer
///   failure
pub fn run(
    transport: &SerialFpga,
    reactor: &Reactor,
    trace: Option<&Receiver<String>>,
    out: &mut dyn Write,
) -> Result<(), DaemonError> {
    while !reactor.is_stopped() {
        if let Err(e) = reactor.run_once(Some(TICK)) {
            error!("{}", e);
            return Err(e.into());
        }
        if let Some(trace) = trace {
            copy_trace(trace, out)?;
        }
        transport.check_health()?;
    }
    Ok(())
}

fn copy_trace(trace: &Receiver<String>, out: &mut dyn Write) -> io::Result<()> {
    let mut wrote = false;
    for line in trace.try_iter() {
        out.write_all(line.as_bytes())?;
        wrote = true;
    }
    if wrote {
        out.flush()?;
    }
    Ok(())
}
