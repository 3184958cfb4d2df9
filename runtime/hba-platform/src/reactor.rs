//! Reactor - single-threaded poll(2) event loop
//!
//! The reactor owns every descriptor watch and periodic timer of the process.
//! Callbacks run on the loop thread, one at a time, and may freely add or
//! remove watches and timers (including their own) while they run.

use std::cell::{Cell, RefCell};
use std::io;
use std::os::unix::io::RawFd;
use std::rc::Rc;
use std::time::{Duration, Instant};

use bitflags::bitflags;
use log::{error, trace, warn};
use thiserror::Error;

use crate::fd::poll_millis;

bitflags! {
    /// Events a watch asks for
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Interest: libc::c_short {
        /// Data available to read
        const READABLE = libc::POLLIN;
        /// Priority data (sysfs GPIO edges)
        const PRIORITY = libc::POLLPRI;
    }
}

bitflags! {
    /// Events reported to a watch callback
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Readiness: libc::c_short {
        const READABLE = libc::POLLIN;
        const PRIORITY = libc::POLLPRI;
        const ERROR = libc::POLLERR;
        const HANGUP = libc::POLLHUP;
        const INVALID = libc::POLLNVAL;
    }
}

/// Reactor errors
#[derive(Debug, Error)]
pub enum ReactorError {
    /// poll(2) itself failed with something other than `EINTR`
    #[error("Event multiplexer failed: {0}")]
    Multiplexer(#[source] io::Error),
}

pub type Result<T> = core::result::Result<T, ReactorError>;

/// Handle to a descriptor watch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WatchId(u64);

/// Handle to a periodic timer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(u64);

type FdCallback = Rc<RefCell<dyn FnMut(RawFd, Readiness)>>;
type TimerCallback = Rc<RefCell<dyn FnMut()>>;

struct Watch {
    id: WatchId,
    fd: RawFd,
    interest: Interest,
    callback: FdCallback,
}

struct Timer {
    id: TimerId,
    period: Duration,
    due: Instant,
    callback: TimerCallback,
}

/// Poll-based event loop
pub struct Reactor {
    watches: RefCell<Vec<Watch>>,
    timers: RefCell<Vec<Timer>>,
    next_id: Cell<u64>,
    stopped: Cell<bool>,
}

impl Default for Reactor {
    fn default() -> Self {
        Self::new()
    }
}

impl Reactor {
    pub fn new() -> Self {
        Self {
            watches: RefCell::new(Vec::new()),
            timers: RefCell::new(Vec::new()),
            next_id: Cell::new(1),
            stopped: Cell::new(false),
        }
    }

    fn allocate_id(&self) -> u64 {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        id
    }

    /// Register `callback` to run whenever `fd` reports one of `interest`.
    ///
    /// Error and hang-up conditions are always reported, whatever the interest.
    pub fn watch_fd<F>(&self, fd: RawFd, interest: Interest, callback: F) -> WatchId
    where
        F: FnMut(RawFd, Readiness) + 'static,
    {
        let id = WatchId(self.allocate_id());
        let callback: FdCallback = Rc::new(RefCell::new(callback));
        self.watches.borrow_mut().push(Watch {
            id,
            fd,
            interest,
            callback,
        });
        trace!("watching fd {} for {:?}", fd, interest);
        id
    }

    /// Remove a watch. Returns `false` if it was already gone.
    pub fn unwatch(&self, id: WatchId) -> bool {
        let mut watches = self.watches.borrow_mut();
        let before = watches.len();
        watches.retain(|w| w.id != id);
        watches.len() != before
    }

    /// Run `callback` every `period`, starting one period from now.
    pub fn add_timer<F>(&self, period: Duration, callback: F) -> TimerId
    where
        F: FnMut() + 'static,
    {
        let id = TimerId(self.allocate_id());
        let callback: TimerCallback = Rc::new(RefCell::new(callback));
        self.timers.borrow_mut().push(Timer {
            id,
            period,
            due: Instant::now() + period,
            callback,
        });
        id
    }

    pub fn cancel_timer(&self, id: TimerId) -> bool {
        let mut timers = self.timers.borrow_mut();
        let before = timers.len();
        timers.retain(|t| t.id != id);
        timers.len() != before
    }

    pub fn watch_count(&self) -> usize {
        self.watches.borrow().len()
    }

    pub fn timer_count(&self) -> usize {
        self.timers.borrow().len()
    }

    /// Ask [`Reactor::run`] to return after the current iteration
    pub fn stop(&self) {
        self.stopped.set(true);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.get()
    }

    fn watch_callback(&self, id: WatchId) -> Option<FdCallback> {
        self.watches
            .borrow()
            .iter()
            .find(|w| w.id == id)
            .map(|w| Rc::clone(&w.callback))
    }

    fn timer_callback(&self, id: TimerId) -> Option<TimerCallback> {
        self.timers
            .borrow()
            .iter()
            .find(|t| t.id == id)
            .map(|t| Rc::clone(&t.callback))
    }

    /// Wait for at most one round of events and dispatch them.
    ///
    /// # Arguments
    /// * `max_wait` - Upper bound on the wait; `None` waits until a watch or
    ///   timer fires. The wait is shortened to the next timer deadline.
    ///
    /// # Returns
    /// Number of callbacks invoked. Returns immediately with `0` if nothing
    /// is registered and no bound was given.
    ///
    /// # Errors
    /// [`ReactorError::Multiplexer`] if poll(2) fails. An interrupted poll is
    /// not an error.
    pub fn run_once(&self, max_wait: Option<Duration>) -> Result<usize> {
        let now = Instant::now();
        let next_timer = self
            .timers
            .borrow()
            .iter()
            .map(|t| t.due.saturating_duration_since(now))
            .min();
        let wait = match (max_wait, next_timer) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };

        let (ids, mut pollfds): (Vec<WatchId>, Vec<libc::pollfd>) = self
            .watches
            .borrow()
            .iter()
            .map(|w| {
                let pfd = libc::pollfd {
                    fd: w.fd,
                    events: w.interest.bits(),
                    revents: 0,
                };
                (w.id, pfd)
            })
            .unzip();

        if pollfds.is_empty() && wait.is_none() {
            return Ok(0);
        }

        let timeout = wait.map(poll_millis).unwrap_or(-1);
        let ret = unsafe {
            libc::poll(
                pollfds.as_mut_ptr(),
                pollfds.len() as libc::nfds_t,
                timeout,
            )
        };
        if ret < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(0);
            }
            error!("poll failed: {}", err);
            return Err(ReactorError::Multiplexer(err));
        }

        let mut dispatched = 0;
        for (id, pfd) in ids.iter().zip(&pollfds) {
            if pfd.revents == 0 {
                continue;
            }
            // An earlier callback in this round may have removed it
            let Some(callback) = self.watch_callback(*id) else {
                continue;
            };
            let readiness = Readiness::from_bits_truncate(pfd.revents);
            if readiness.contains(Readiness::INVALID) {
                warn!("fd {} is not open, dropping its watch", pfd.fd);
                self.unwatch(*id);
                continue;
            }
            match callback.try_borrow_mut() {
                Ok(mut cb) => {
                    (&mut *cb)(pfd.fd, readiness);
                    dispatched += 1;
                }
                Err(_) => trace!("callback for fd {} is already running", pfd.fd),
            };
        }

        dispatched += self.fire_due_timers();
        Ok(dispatched)
    }

    fn fire_due_timers(&self) -> usize {
        let now = Instant::now();
        let due: Vec<TimerId> = {
            let mut timers = self.timers.borrow_mut();
            timers
                .iter_mut()
                .filter(|t| t.due <= now)
                .map(|t| {
                    t.due = now + t.period;
                    t.id
                })
                .collect()
        };

        let mut fired = 0;
        for id in due {
            let Some(callback) = self.timer_callback(id) else {
                continue;
            };
            if let Ok(mut cb) = callback.try_borrow_mut() {
                (&mut *cb)();
                fired += 1;
            };
        }
        fired
    }

    /// Dispatch events until [`Reactor::stop`] is called or nothing is left
    /// to wait for.
    pub fn run(&self) -> Result<()> {
        self.stopped.set(false);
        while !self.stopped.get() {
            if self.watch_count() == 0 && self.timer_count() == 0 {
                break;
            }
            self.run_once(None)?;
        }
        Ok(())
    }
}
