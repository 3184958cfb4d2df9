//! SerialFpga - the assembled transport
//!
//! Owns the link (through the [`ProtocolEngine`]), the interrupt line and
//! the dispatch table, and exposes the transport's own resources: `port`,
//! `config` (baud rate), `intrr_pin`, `rawout` and the `rawin` broadcast.

use std::cell::{Cell, RefCell, RefMut};
use std::io;
use std::path::PathBuf;
use std::rc::{Rc, Weak};
use std::thread;

use hba_platform::{
    Broadcaster, Connector, Interest, InterruptLine, Reactor, Resource, ResourceFlags,
    TimerId, WatchId,
};
use log::{debug, error, info, warn};

use crate::config::{BaudRate, TransportConfig};
use crate::dispatch::InterruptTable;
use crate::engine::ProtocolEngine;
use crate::interrupt::{self, InterruptOutcome, PendingMask};
use crate::packet::{CoreId, REG_BAUD_CODE};
use crate::raw::{self, MAX_RAW};
use crate::system::SystemConnector;
use crate::{regs, FpgaBus, InterruptHandler, ProtocolError, Result, TransportError};

/// Component name, prefix of the transport's broadcast keys
pub const COMPONENT: &str = "serial_fpga";

const READ_WRITE: ResourceFlags = ResourceFlags::READABLE.union(ResourceFlags::WRITABLE);

pub const RESOURCES: [Resource; 5] = [
    Resource::new("port", READ_WRITE, "serial device of the FPGA link"),
    Resource::new("config", READ_WRITE, "link baud rate"),
    Resource::new("intrr_pin", READ_WRITE, "GPIO pin wired to the FPGA interrupt"),
    Resource::new("rawout", ResourceFlags::WRITABLE, "hex bytes written straight to the link"),
    Resource::new("rawin", ResourceFlags::BROADCAST, "bytes received outside an exchange"),
];

const RAWIN: usize = 4;

/// Serial transport to an HBA FPGA
///
/// Create with [`SerialFpga::new`], hand `Rc` clones to peripheral drivers
/// (as `&dyn FpgaBus`), and [`SerialFpga::attach`] it to the reactor so
/// interrupts and unsolicited input are serviced.
pub struct SerialFpga {
    config: RefCell<TransportConfig>,
    connector: Box<dyn Connector>,
    engine: RefCell<ProtocolEngine>,
    table: InterruptTable,
    line: RefCell<Option<Box<dyn InterruptLine>>>,
    broadcaster: Rc<Broadcaster>,
    rawin_key: String,

    reactor: RefCell<Option<Rc<Reactor>>>,
    link_watch: Cell<Option<WatchId>>,
    line_watch: Cell<Option<WatchId>>,
    poll_timer: Cell<Option<TimerId>>,

    failed: Cell<bool>,
    this: Weak<SerialFpga>,
}

impl SerialFpga {
    /// Build the transport and open its link and interrupt line.
    ///
    /// Neither failing to open is fatal: the failure is logged and the
    /// transport runs without it until it is reconfigured.
    pub fn new(
        config: TransportConfig,
        connector: Box<dyn Connector>,
        broadcaster: Rc<Broadcaster>,
    ) -> Rc<Self> {
        let timeout = config.response_timeout();
        let pin = config.interrupt_pin;
        let transport = Rc::new_cyclic(|this| Self {
            config: RefCell::new(config),
            connector,
            engine: RefCell::new(ProtocolEngine::new(timeout)),
            table: InterruptTable::new(),
            line: RefCell::new(None),
            broadcaster,
            rawin_key: RESOURCES[RAWIN].key(COMPONENT),
            reactor: RefCell::new(None),
            link_watch: Cell::new(None),
            line_watch: Cell::new(None),
            poll_timer: Cell::new(None),
            failed: Cell::new(false),
            this: this.clone(),
        });

        // Both failures are already logged
        let _ = transport.open_link();
        if let Some(pin) = pin {
            let _ = transport.open_line(pin);
        }
        transport
    }

    /// Build the transport on the host's serial ports and sysfs GPIO
    pub fn open_system(config: TransportConfig, broadcaster: Rc<Broadcaster>) -> Rc<Self> {
        let connector = SystemConnector::new(config.gpio_root.clone());
        Self::new(config, Box::new(connector), broadcaster)
    }

    pub fn resources(&self) -> &'static [Resource] {
        &RESOURCES
    }

    /// Broadcast key of the `rawin` resource
    pub fn rawin_key(&self) -> &str {
        &self.rawin_key
    }

    pub fn config(&self) -> TransportConfig {
        self.config.borrow().clone()
    }

    pub fn port(&self) -> PathBuf {
        self.config.borrow().device.clone()
    }

    pub fn baud(&self) -> BaudRate {
        self.config.borrow().baud
    }

    pub fn interrupt_pin(&self) -> Option<u32> {
        self.config.borrow().interrupt_pin
    }

    pub fn is_link_open(&self) -> bool {
        self.engine.try_borrow().map_or(true, |engine| engine.is_open())
    }

    pub fn has_interrupt_line(&self) -> bool {
        self.line.borrow().is_some()
    }

    pub fn registered_cores(&self) -> Vec<CoreId> {
        self.table.registered_cores()
    }

    /// Whether a multiplexer failure has been seen. The transport cannot
    /// recover from one; the process should exit.
    pub fn has_failed(&self) -> bool {
        self.failed.get()
    }

    pub fn check_health(&self) -> core::result::Result<(), ProtocolError> {
        if self.failed.get() {
            Err(ProtocolError::MultiplexerFailure)
        } else {
            Ok(())
        }
    }

    fn engine_mut(&self) -> core::result::Result<RefMut<'_, ProtocolEngine>, ProtocolError> {
        self.engine.try_borrow_mut().map_err(|_| {
            error!("link busy with another exchange");
            ProtocolError::Busy
        })
    }

    // Event loop wiring

    /// Register the link, the interrupt line and the fallback poll with
    /// `reactor`. Replaces any earlier attachment.
    pub fn attach(&self, reactor: &Rc<Reactor>) {
        self.detach();
        *self.reactor.borrow_mut() = Some(Rc::clone(reactor));

        self.watch_link();
        self.watch_line();

        if let Some(period) = self.config.borrow().interrupt_poll_interval() {
            let this = self.this.clone();
            let id = reactor.add_timer(period, move || {
                if let Some(transport) = this.upgrade() {
                    if transport.has_interrupt_line() {
                        transport.service_interrupts();
                    }
                }
            });
            self.poll_timer.set(Some(id));
        }
    }

    /// Remove every registration made by [`SerialFpga::attach`]
    pub fn detach(&self) {
        self.unwatch_link();
        self.unwatch_line();
        let reactor = self.reactor.borrow_mut().take();
        if let (Some(reactor), Some(id)) = (reactor, self.poll_timer.take()) {
            reactor.cancel_timer(id);
        }
    }

    fn reactor(&self) -> Option<Rc<Reactor>> {
        self.reactor.borrow().clone()
    }

    fn watch_link(&self) {
        let Some(reactor) = self.reactor() else {
            return;
        };
        let Some(fd) = self.engine.borrow().raw_fd() else {
            return;
        };
        let this = self.this.clone();
        let id = reactor.watch_fd(fd, Interest::READABLE, move |_, _| {
            if let Some(transport) = this.upgrade() {
                transport.on_link_readable();
            }
        });
        self.link_watch.set(Some(id));
    }

    fn unwatch_link(&self) {
        if let (Some(id), Some(reactor)) = (self.link_watch.take(), self.reactor()) {
            reactor.unwatch(id);
        }
    }

    fn watch_line(&self) {
        let Some(reactor) = self.reactor() else {
            return;
        };
        let Some(fd) = self.line.borrow().as_ref().and_then(|line| line.raw_fd()) else {
            return;
        };
        let this = self.this.clone();
        let id = reactor.watch_fd(fd, Interest::PRIORITY, move |_, _| {
            if let Some(transport) = this.upgrade() {
                transport.service_interrupts();
            }
        });
        self.line_watch.set(Some(id));
    }

    fn unwatch_line(&self) {
        if let (Some(id), Some(reactor)) = (self.line_watch.take(), self.reactor()) {
            reactor.unwatch(id);
        }
    }

    // Link lifecycle

    fn open_link(&self) -> Result<()> {
        let (path, baud) = {
            let config = self.config.borrow();
            (config.device.clone(), config.baud)
        };
        let link = match self.connector.open_link(&path, baud.bps()) {
            Ok(link) => link,
            Err(source) => {
                let err = TransportError::LinkUnavailable { path, source };
                error!("{}", err);
                return Err(err);
            }
        };
        self.engine_mut()?.attach(link);
        self.watch_link();
        Ok(())
    }

    fn close_link(&self) {
        self.unwatch_link();
        if let Ok(mut engine) = self.engine.try_borrow_mut() {
            if engine.detach().is_some() {
                info!("{}: closed", self.config.borrow().device.display());
            }
        }
    }

    fn open_line(&self, pin: u32) -> Result<()> {
        match self.connector.open_interrupt_line(pin) {
            Ok(line) => {
                *self.line.borrow_mut() = Some(line);
                self.watch_line();
                Ok(())
            }
            Err(source) => {
                let err = TransportError::InterruptLineUnavailable { pin, source };
                error!("{}; interrupts disabled", err);
                Err(err)
            }
        }
    }

    fn close_line(&self) {
        self.unwatch_line();
        self.line.borrow_mut().take();
    }

    fn read_line_level(&self) -> io::Result<bool> {
        match self.line.borrow_mut().as_mut() {
            Some(line) => line.is_asserted(),
            None => Err(io::Error::new(io::ErrorKind::NotFound, "no interrupt line")),
        }
    }

    /// Bytes that arrive while no exchange is running
    fn on_link_readable(&self) {
        let mut buf = [0u8; MAX_RAW];
        let result = {
            let Ok(mut engine) = self.engine.try_borrow_mut() else {
                return;
            };
            let Some(link) = engine.link_mut() else {
                return;
            };
            link.read(&mut buf)
        };

        match result {
            Ok(0) => {
                error!("{}: device hung up", self.port().display());
                self.close_link();
            }
            Ok(n) => {
                debug!("{} unsolicited byte(s)", n);
                self.broadcaster
                    .publish_with(&self.rawin_key, || raw::format_hex(&buf[..n]));
            }
            Err(e) if is_transient(&e) => {}
            Err(e) => {
                error!("{}: read failed: {}", self.port().display(), e);
                self.close_link();
            }
        }
    }

    // Interrupts

    /// Run the interrupt service routine once
    pub fn service_interrupts(&self) -> InterruptOutcome {
        if !self.has_interrupt_line() {
            return InterruptOutcome::NoLine;
        }
        interrupt::service(|| self.read_line_level(), self, &self.table)
    }

    /// Check the FPGA answers by reading its pending-interrupt registers
    pub fn probe(&self) -> core::result::Result<PendingMask, ProtocolError> {
        match interrupt::read_pending(self) {
            Ok(pending) => {
                info!("FPGA responding, pending interrupts {}", pending);
                Ok(pending)
            }
            Err(e) => {
                error!("FPGA not responding on {}: {}", self.port().display(), e);
                Err(e)
            }
        }
    }

    // Resources

    /// `port`: close the current link and open `path` instead
    pub fn set_port(&self, path: impl Into<PathBuf>) -> Result<()> {
        self.close_link();
        self.config.borrow_mut().device = path.into();
        self.open_link()
    }

    /// `config`: switch the FPGA and then the host to `bps`
    ///
    /// # Errors
    /// - [`TransportError::UnsupportedBaud`] before anything is sent
    /// - [`TransportError::LinkUnavailable`] if the host side cannot follow
    pub fn set_baud(&self, bps: u32) -> Result<()> {
        let baud = BaudRate::try_from(bps).inspect_err(|e| error!("{}", e))?;

        info!("switching link to {} baud (code {})", baud, baud.fpga_code());
        if let Err(e) = regs::write_register(self, CoreId::TRANSPORT, REG_BAUD_CODE, baud.fpga_code()) {
            error!("FPGA did not take baud code {}: {}", baud.fpga_code(), e);
        }

        let settle = {
            let mut config = self.config.borrow_mut();
            config.baud = baud;
            config.baud_settle()
        };
        thread::sleep(settle);
        self.reconfigure_link(baud)
    }

    fn reconfigure_link(&self, baud: BaudRate) -> Result<()> {
        let result = self
            .engine_mut()?
            .link_mut()
            .map(|link| link.set_baud_rate(baud.bps()));

        match result {
            Some(Ok(())) => Ok(()),
            Some(Err(source)) => {
                let err = TransportError::LinkUnavailable {
                    path: self.port(),
                    source,
                };
                error!("{}", err);
                self.close_link();
                Err(err)
            }
            // Closed: try again from scratch at the new rate
            None => self.open_link(),
        }
    }

    /// `intrr_pin`: move the interrupt line to `pin`
    pub fn set_interrupt_pin(&self, pin: u32) -> Result<()> {
        self.close_line();
        self.config.borrow_mut().interrupt_pin = Some(pin);
        self.open_line(pin)
    }

    /// `rawout`: write hex bytes straight to the link, bypassing framing
    ///
    /// # Returns
    /// Bytes actually written; a short write is logged, not retried.
    pub fn send_raw(&self, text: &str) -> Result<usize> {
        let bytes = raw::parse_hex_bytes(text)?;
        if bytes.is_empty() {
            return Ok(0);
        }

        let result = {
            let mut engine = self.engine_mut()?;
            let Some(link) = engine.link_mut() else {
                return Err(ProtocolError::NotSendable.into());
            };
            link.write(&bytes)
        };

        match result {
            Ok(n) => {
                if n != bytes.len() {
                    warn!("raw write sent {} of {} bytes", n, bytes.len());
                }
                Ok(n)
            }
            Err(e) if is_transient(&e) => {
                warn!("raw write deferred: {}", e);
                Ok(0)
            }
            Err(source) => {
                let err = TransportError::LinkUnavailable {
                    path: self.port(),
                    source,
                };
                error!("{}", err);
                self.close_link();
                Err(err)
            }
        }
    }
}

fn is_transient(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
    )
}

impl FpgaBus for SerialFpga {
    fn exchange(&self, count: usize, buf: &mut [u8]) -> core::result::Result<usize, ProtocolError> {
        if self.failed.get() {
            debug!("transport failed, dropping {} byte request", count);
            return Err(ProtocolError::MultiplexerFailure);
        }
        let result = self.engine_mut()?.exchange(count, buf);
        if let Err(e) = result {
            if e.is_fatal() && !self.failed.replace(true) {
                error!("transport failed: {}", e);
            }
        }
        result
    }

    fn register_interrupt_handler(&self, core_id: u8, handler: Rc<dyn InterruptHandler>) -> Result<()> {
        self.table.register(core_id, handler).map(|_| ())
    }

    fn has_failed(&self) -> bool {
        self.failed.get()
    }
}

impl Drop for SerialFpga {
    fn drop(&mut self) {
        self.detach();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hba_mock::MockFpga;

    fn config() -> TransportConfig {
        TransportConfig {
            interrupt_pin: Some(17),
            baud_settle_ms: 0,
            ..TransportConfig::default()
        }
    }

    fn transport(fpga: &MockFpga) -> Rc<SerialFpga> {
        SerialFpga::new(config(), Box::new(fpga.connector()), Rc::new(Broadcaster::new()))
    }

    #[test]
    fn test_new_opens_link_and_line() {
        let fpga = MockFpga::new();
        let t = transport(&fpga);
        assert!(t.is_link_open());
        assert!(t.has_interrupt_line());
        assert_eq!(fpga.opened_links(), vec![(PathBuf::from("/dev/ttyUSB1"), 115_200)]);
        assert_eq!(fpga.opened_lines(), vec![17]);
    }

    #[test]
    fn test_resource_table() {
        let fpga = MockFpga::new();
        let t = transport(&fpga);
        let names: Vec<&str> = t.resources().iter().map(|r| r.name).collect();
        assert_eq!(names, ["port", "config", "intrr_pin", "rawout", "rawin"]);
        assert_eq!(t.rawin_key(), "serial_fpga/rawin");
        assert!(RESOURCES[RAWIN].is_broadcast());
    }

    #[test]
    fn test_unavailable_link_is_not_fatal() {
        let fpga = MockFpga::new();
        fpga.refuse_links(true);
        let t = transport(&fpga);
        assert!(!t.is_link_open());

        let mut buf = [0x81, 0x01, 0, 0, 0];
        assert_eq!(t.exchange(5, &mut buf), Err(ProtocolError::NotSendable));
        assert!(!t.has_failed());

        fpga.refuse_links(false);
        t.set_port("/dev/ttyUSB0").unwrap();
        assert!(t.is_link_open());
        assert_eq!(t.port(), PathBuf::from("/dev/ttyUSB0"));
    }

    #[test]
    fn test_core_zero_cannot_be_registered() {
        let fpga = MockFpga::new();
        let t = transport(&fpga);
        let err = t
            .register_interrupt_handler(0, Rc::new(|_: &dyn FpgaBus| {}))
            .unwrap_err();
        assert!(matches!(err, TransportError::InvalidCore { core: 0 }));
        assert!(t.registered_cores().is_empty());
    }
}
