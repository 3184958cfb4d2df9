//! Interrupt service
//!
//! Runs on every interrupt-line edge and on the fallback poll:
//! confirm the line is high, read the pending mask from core 0, then call
//! each pending core's handler in ascending core order. Nothing here is
//! fatal except a multiplexer failure inside the query exchange, which the
//! transport latches separately.

use core::fmt;
use std::io;

use log::{debug, error, trace, warn};

use crate::dispatch::InterruptTable;
use crate::packet::{CoreId, REG_PENDING_LO};
use crate::{regs, FpgaBus, ProtocolError};

/// Bitmask of cores requesting service, from core 0 registers 0/1
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct PendingMask(u16);

impl PendingMask {
    pub const fn new(bits: u16) -> Self {
        Self(bits)
    }

    pub const fn from_registers(lo: u8, hi: u8) -> Self {
        Self(regs::u16_le(lo, hi))
    }

    pub const fn bits(self) -> u16 {
        self.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn contains(self, core: CoreId) -> bool {
        self.0 & (1 << core.get()) != 0
    }

    /// Pending peripheral cores, ascending. Bit 0 is never reported.
    pub fn cores(self) -> impl Iterator<Item = CoreId> {
        CoreId::peripherals().filter(move |core| self.contains(*core))
    }
}

impl fmt::Display for PendingMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#06x}", self.0)
    }
}

/// What one pass of the service routine did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InterruptOutcome {
    /// No interrupt line is configured
    NoLine,
    /// Line low: nothing to do, no exchange made
    Spurious,
    /// The line level could not be read
    LineUnreadable,
    /// The pending-mask query failed
    QueryFailed(ProtocolError),
    /// Line high but no core pending
    NothingPending,
    Dispatched {
        pending: PendingMask,
        handled: Vec<CoreId>,
        unhandled: Vec<CoreId>,
    },
}

/// Read the pending mask from core 0 (one 2-register read)
pub fn read_pending(bus: &dyn FpgaBus) -> Result<PendingMask, ProtocolError> {
    let block = regs::read_registers(bus, CoreId::TRANSPORT, REG_PENDING_LO, 2)?;
    Ok(PendingMask::from_registers(block[0], block[1]))
}

/// Confirm, query, and dispatch
///
/// # Arguments
/// * `read_level` - Samples the interrupt line; called once, before any exchange
/// * `bus` - Bus for the query and handed to every handler
/// * `table` - Handler registrations
pub fn service<F>(read_level: F, bus: &dyn FpgaBus, table: &InterruptTable) -> InterruptOutcome
where
    F: FnOnce() -> io::Result<bool>,
{
    match read_level() {
        Ok(true) => {}
        Ok(false) => {
            trace!("interrupt line low, ignoring");
            return InterruptOutcome::Spurious;
        }
        Err(e) => {
            error!("failed to read interrupt line: {}", e);
            return InterruptOutcome::LineUnreadable;
        }
    }

    let pending = match read_pending(bus) {
        Ok(pending) => pending,
        Err(e) => {
            error!("failed to read pending interrupts: {}", e);
            return InterruptOutcome::QueryFailed(e);
        }
    };
    if pending.is_empty() {
        warn!("interrupt line high but no core is pending");
        return InterruptOutcome::NothingPending;
    }

    dispatch(pending, bus, table)
}

/// Call the handler of every core set in `pending`, ascending
pub fn dispatch(pending: PendingMask, bus: &dyn FpgaBus, table: &InterruptTable) -> InterruptOutcome {
    debug!("pending interrupts {}", pending);
    let mut handled = Vec::new();
    let mut unhandled = Vec::new();

    for core in pending.cores() {
        if bus.has_failed() {
            error!("transport failed, core {} and later not dispatched", core);
            break;
        }
        match table.handler(core) {
            Some(handler) => {
                handler.on_interrupt(bus);
                handled.push(core);
            }
            None => {
                warn!("unhandled interrupt from core {}", core);
                unhandled.push(core);
            }
        }
    }

    InterruptOutcome::Dispatched {
        pending,
        handled,
        unhandled,
    }
}
