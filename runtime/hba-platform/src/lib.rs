//! # HBA Host Platform
//!
//! Host-side collaborators shared by every HBA transport and peripheral driver:
//! - **Links**: byte transports ([`Link`]) and edge-signalling interrupt lines
//!   ([`InterruptLine`]), opened through a [`Connector`]
//! - **Event loop**: a single-threaded, poll-based [`Reactor`] that owns fd
//!   and timer registration
//! - **Broadcast**: per-resource fan-out of formatted text lines ([`Broadcaster`])
//! - **Resources**: descriptors naming what a component exposes ([`Resource`])
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::rc::Rc;
//! use std::time::Duration;
//! use hba_platform::{Broadcaster, Reactor};
//!
//! let reactor = Rc::new(Reactor::new());
//! let broadcaster = Rc::new(Broadcaster::new());
//! let updates = broadcaster.subscribe("serial_fpga/rawin");
//!
//! reactor.add_timer(Duration::from_millis(250), || log::trace!("tick"));
//! reactor.run_once(Some(Duration::from_millis(10))).ok();
//! for line in updates.try_iter() {
//!     print!("{line}");
//! }
//! ```
//!
//! Everything here is `Rc`/`RefCell` based and meant to live on one thread.

pub mod broadcast;
pub mod fd;
pub mod link;
pub mod reactor;
pub mod resource;

pub use broadcast::Broadcaster;
pub use fd::FdLink;
pub use link::{Connector, InterruptLine, Link};
pub use reactor::{Interest, Reactor, ReactorError, Readiness, TimerId, WatchId};
pub use resource::{Resource, ResourceFlags};
