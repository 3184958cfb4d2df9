//! Interrupt Dispatch Table
//!
//! Sixteen slots, one per core id. Core 0 is the transport itself and can
//! never hold a driver's handler. Registrations live as long as the table.

use std::cell::RefCell;
use std::rc::Rc;

use log::{debug, error, warn};

use crate::packet::{CoreId, NUM_CORES};
use crate::{InterruptHandler, Result, TransportError};

pub struct InterruptTable {
    slots: RefCell<[Option<Rc<dyn InterruptHandler>>; NUM_CORES]>,
}

impl Default for InterruptTable {
    fn default() -> Self {
        Self::new()
    }
}

impl InterruptTable {
    pub fn new() -> Self {
        Self {
            slots: RefCell::new(std::array::from_fn(|_| None)),
        }
    }

    /// Install `handler` for `core_id`
    ///
    /// # Arguments
    /// * `core_id` - Peripheral core, 1-15
    /// * `handler` - Invoked with the bus whenever the core's pending bit is set
    ///
    /// # Returns
    /// The validated core id
    ///
    /// # Errors
    /// [`TransportError::InvalidCore`] for core 0 or ids >= 16. The table is
    /// left unchanged.
    pub fn register(&self, core_id: u8, handler: Rc<dyn InterruptHandler>) -> Result<CoreId> {
        let core = match CoreId::new(core_id) {
            Some(core) if !core.is_reserved() => core,
            _ => {
                error!("cannot register interrupt handler for core {}", core_id);
                return Err(TransportError::InvalidCore { core: core_id });
            }
        };

        let previous = self.slots.borrow_mut()[core.index()].replace(handler);
        if previous.is_some() {
            warn!("core {}: interrupt handler replaced", core);
        } else {
            debug!("core {}: interrupt handler registered", core);
        }
        Ok(core)
    }

    /// Clone of the handler for `core`, so the table is not borrowed while
    /// the handler runs
    pub fn handler(&self, core: CoreId) -> Option<Rc<dyn InterruptHandler>> {
        self.slots.borrow()[core.index()].clone()
    }

    pub fn is_registered(&self, core: CoreId) -> bool {
        self.slots.borrow()[core.index()].is_some()
    }

    pub fn registered_cores(&self) -> Vec<CoreId> {
        CoreId::peripherals()
            .filter(|core| self.is_registered(*core))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{FpgaBus, ProtocolError};
    use std::cell::Cell;

    struct NullBus;

    impl FpgaBus for NullBus {
        fn exchange(&self, _: usize, _: &mut [u8]) -> core::result::Result<usize, ProtocolError> {
            Err(ProtocolError::NotSendable)
        }

        fn register_interrupt_handler(&self, _: u8, _: Rc<dyn InterruptHandler>) -> Result<()> {
            Ok(())
        }
    }

    fn noop() -> Rc<dyn InterruptHandler> {
        Rc::new(|_: &dyn FpgaBus| {})
    }

    #[test]
    fn test_register_and_lookup() {
        let table = InterruptTable::new();
        let core = table.register(3, noop()).unwrap();
        assert_eq!(core.get(), 3);
        assert!(table.handler(core).is_some());
        assert!(table.handler(CoreId::new(4).unwrap()).is_none());
        assert_eq!(table.registered_cores(), vec![core]);
    }

    #[test]
    fn test_reserved_and_out_of_range_cores() {
        let table = InterruptTable::new();
        assert!(matches!(
            table.register(0, noop()),
            Err(TransportError::InvalidCore { core: 0 })
        ));
        assert!(matches!(
            table.register(16, noop()),
            Err(TransportError::InvalidCore { core: 16 })
        ));
        assert!(table.registered_cores().is_empty());
    }

    #[test]
    fn test_last_registration_wins() {
        struct Tagged(Rc<Cell<u8>>, u8);
        impl InterruptHandler for Tagged {
            fn on_interrupt(&self, _bus: &dyn FpgaBus) {
                self.0.set(self.1);
            }
        }

        let table = InterruptTable::new();
        let seen = Rc::new(Cell::new(0));
        table.register(5, Rc::new(Tagged(Rc::clone(&seen), 1))).unwrap();
        table.register(5, Rc::new(Tagged(Rc::clone(&seen), 2))).unwrap();

        let core = CoreId::new(5).unwrap();
        table.handler(core).unwrap().on_interrupt(&NullBus);
        assert_eq!(seen.get(), 2);
    }

    #[test]
    fn test_handler_clone_does_not_hold_the_table() {
        let table = Rc::new(InterruptTable::new());
        let t = Rc::clone(&table);
        table
            .register(
                2,
                Rc::new(move |_: &dyn FpgaBus| {
                    t.register(7, noop()).unwrap();
                }),
            )
            .unwrap();

        let handler = table.handler(CoreId::new(2).unwrap()).unwrap();
        handler.on_interrupt(&NullBus);
        assert!(table.is_registered(CoreId::new(7).unwrap()));
    }
}
