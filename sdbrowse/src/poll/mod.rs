//! Poll adapter: lets a discovery client schedule its I/O and timers on an
//! event loop owned by the embedding process.
//!
//! The client never talks to the loop directly. It asks the adapter, through
//! the object-safe [`Poll`] trait, to watch a descriptor or to arm a timer,
//! and later receives [`PollEvent`]s for them from the caller's dispatch pass.
//! The adapter owns every registration, so destroying it releases whatever is
//! still registered.
//!
//! # Driving the adapter
//!
//! ```rust,ignore
//! use sansio::Protocol;
//!
//! let mut adapter = PollAdapter::new(event_loop)?;
//! let watch = adapter.register_watch(fd, Interest::READABLE)?;
//! let timer = adapter.register_timeout(Some(Instant::now() + Duration::from_secs(1)))?;
//!
//! while !adapter.exit_requested() && !adapter.is_idle() {
//!     adapter.turn()?;
//!     while let Some(event) = adapter.poll_event() {
//!         match event {
//!             PollEvent::Ready(id, readiness) => { /* descriptor is ready */ }
//!             PollEvent::Expired(id) => { /* timer fired, now disarmed */ }
//!         }
//!     }
//! }
//! adapter.destroy()?;
//! ```


use std::collections::VecDeque;
use std::fmt;
use std::ops::{BitOr, BitOrAssign};
use std::os::fd::RawFd;
use std::time::{Duration, Instant};

use crate::arena::{Arena, Index};
use shared::error::{Error, Result};

/// Readiness conditions a watch is interested in.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Hash)]
pub struct Interest(u8);

impl Interest {
    pub const EMPTY: Interest = Interest(0);
    pub const READABLE: Interest = Interest(1);
    pub const WRITABLE: Interest = Interest(1 << 1);

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn is_readable(&self) -> bool {
        self.0 & Self::READABLE.0 != 0
    }

    pub fn is_writable(&self) -> bool {
        self.0 & Self::WRITABLE.0 != 0
    }
}

impl BitOr for Interest {
    type Output = Interest;

    fn bitor(self, rhs: Interest) -> Interest {
        Interest(self.0 | rhs.0)
    }
}

impl BitOrAssign for Interest {
    fn bitor_assign(&mut self, rhs: Interest) {
        self.0 |= rhs.0;
    }
}

/// Conditions reported for a watched descriptor.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Hash)]
pub struct Readiness(u8);

impl Readiness {
    pub const EMPTY: Readiness = Readiness(0);
    pub const READABLE: Readiness = Readiness(1);
    pub const WRITABLE: Readiness = Readiness(1 << 1);
    pub const ERROR: Readiness = Readiness(1 << 2);
    pub const HANGUP: Readiness = Readiness(1 << 3);

    pub fn contains(&self, other: Readiness) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn is_readable(&self) -> bool {
        self.contains(Self::READABLE)
    }

    pub fn is_writable(&self) -> bool {
        self.contains(Self::WRITABLE)
    }

    /// Error or hang-up, reported regardless of interest.
    pub fn is_failure(&self) -> bool {
        self.0 & (Self::ERROR.0 | Self::HANGUP.0) != 0
    }

    /// Keeps only the conditions a watch asked for, plus failures.
    fn filter(self, interest: Interest) -> Readiness {
        let mut mask = Self::ERROR.0 | Self::HANGUP.0;
        if interest.is_readable() {
            mask |= Self::READABLE.0;
        }
        if interest.is_writable() {
            mask |= Self::WRITABLE.0;
        }
        Readiness(self.0 & mask)
    }
}

impl BitOr for Readiness {
    type Output = Readiness;

    fn bitor(self, rhs: Readiness) -> Readiness {
        Readiness(self.0 | rhs.0)
    }
}

impl BitOrAssign for Readiness {
    fn bitor_assign(&mut self, rhs: Readiness) {
        self.0 |= rhs.0;
    }
}

/// Key under which a watch is registered with the event loop.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct Token(pub usize);

/// Handle to a registered descriptor watch.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct WatchId(Index);

/// Handle to a registered timeout.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct TimeoutId(Index);

impl fmt::Display for WatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "watch#{}", self.0)
    }
}

impl fmt::Display for TimeoutId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "timeout#{}", self.0)
    }
}

impl From<Index> for WatchId {
    fn from(index: Index) -> Self {
        WatchId(index)
    }
}

impl From<WatchId> for Index {
    fn from(id: WatchId) -> Self {
        id.0
    }
}

impl From<Index> for TimeoutId {
    fn from(index: Index) -> Self {
        TimeoutId(index)
    }
}

impl From<TimeoutId> for Index {
    fn from(id: TimeoutId) -> Self {
        id.0
    }
}

/// Notifications handed back to the client that owns the registration.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PollEvent {
    /// The watched descriptor is ready.
    Ready(WatchId, Readiness),
    /// The timeout's deadline passed. It stays disarmed until rescheduled.
    Expired(TimeoutId),
}

/// What a discovery client may ask of the poll adapter.
pub trait Poll {
    fn register_watch(&mut self, fd: RawFd, interest: Interest) -> Result<WatchId>;

    /// Changes the interest set. An empty set suspends the watch.
    fn update_interest(&mut self, id: WatchId, interest: Interest) -> Result<()>;

    fn release_watch(&mut self, id: WatchId) -> Result<()>;

    /// Registers a timeout; `None` registers it disarmed.
    fn register_timeout(&mut self, deadline: Option<Instant>) -> Result<TimeoutId>;

    /// Re-arms (or with `None`, disarms) a timeout.
    fn reschedule(&mut self, id: TimeoutId, deadline: Option<Instant>) -> Result<()>;

    fn release_timeout(&mut self, id: TimeoutId) -> Result<()>;

    /// Asks the owning loop to stop after the current dispatch pass.
    fn request_exit(&mut self);
}

/// The embedding event loop, as seen by the adapter.
pub trait EventLoop {
    /// Binds the loop to an adapter. A loop serves one adapter at a time.
    fn bind(&mut self) -> Result<()>;

    fn unbind(&mut self);

    fn register(&mut self, fd: RawFd, token: Token, interest: Interest) -> Result<()>;

    fn reregister(&mut self, fd: RawFd, token: Token, interest: Interest) -> Result<()>;

    fn deregister(&mut self, fd: RawFd) -> Result<()>;

    /// Blocks until a descriptor is ready, the timeout elapses, or the loop
    /// is woken, appending ready descriptors to `ready`.
    fn wait(&mut self, timeout: Option<Duration>, ready: &mut Vec<(Token, Readiness)>)
    -> Result<()>;

    fn request_exit(&mut self);

    fn exit_requested(&self) -> bool;
}

#[derive(Debug)]
struct Watch {
    fd: RawFd,
    interest: Interest,
    registered: bool,
}

#[derive(Debug)]
struct Timer {
    deadline: Option<Instant>,
}

/// Adapter between a discovery client and an [`EventLoop`].
///
/// Implements [`sansio::Protocol`]: loop readiness goes in through
/// `handle_read`, timer expiry through `handle_timeout`, and the resulting
/// [`PollEvent`]s come out of `poll_event`. `close` destroys the adapter.
pub struct PollAdapter<L: EventLoop> {
    event_loop: L,
    watches: Arena<Watch>,
    timeouts: Arena<Timer>,
    ready: Vec<(Token, Readiness)>,
    event_outs: VecDeque<PollEvent>,
    destroyed: bool,
}

impl<L: EventLoop> PollAdapter<L> {
    /// Binds a new adapter to `event_loop`.
    ///
    /// # Errors
    ///
    /// [`Error::ErrAllocation`] when the loop cannot be bound, e.g. because
    /// it already serves another adapter.
    pub fn new(mut event_loop: L) -> Result<Self> {
        event_loop
            .bind()
            .map_err(|err| Error::ErrAllocation(err.to_string()))?;
        Ok(Self {
            event_loop,
            watches: Arena::new(),
            timeouts: Arena::new(),
            ready: Vec::new(),
            event_outs: VecDeque::new(),
            destroyed: false,
        })
    }

    pub fn event_loop(&self) -> &L {
        &self.event_loop
    }

    /// Runs one loop iteration: waits for readiness or the earliest armed
    /// deadline, then queues the resulting events.
    pub fn turn(&mut self) -> Result<()> {
        self.check_alive()?;
        let timeout = self
            .next_deadline()
            .map(|deadline| deadline.saturating_duration_since(Instant::now()));

        let mut ready = std::mem::take(&mut self.ready);
        ready.clear();
        let result = self.event_loop.wait(timeout, &mut ready);
        for (token, readiness) in ready.drain(..) {
            self.on_ready(token, readiness);
        }
        self.ready = ready;
        result?;

        self.fire_due(Instant::now());
        Ok(())
    }

    /// Nothing is registered that could ever wake the loop.
    pub fn is_idle(&self) -> bool {
        self.watches.is_empty() && self.next_deadline().is_none()
    }

    pub fn exit_requested(&self) -> bool {
        self.event_loop.exit_requested()
    }

    pub fn watch_count(&self) -> usize {
        self.watches.len()
    }

    pub fn timeout_count(&self) -> usize {
        self.timeouts.len()
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    /// Releases every still-registered watch and timeout and unbinds the
    /// loop. Calling it again does nothing.
    pub fn destroy(&mut self) -> Result<()> {
        if self.destroyed {
            return Ok(());
        }
        self.destroyed = true;

        let mut first_err = None;
        for (_, watch) in self.watches.drain() {
            if watch.registered
                && let Err(err) = self.event_loop.deregister(watch.fd)
            {
                log::warn!("failed to deregister fd {}: {}", watch.fd, err);
                first_err.get_or_insert(err);
            }
        }
        let timeouts = self.timeouts.drain().len();
        self.event_outs.clear();
        self.event_loop.unbind();
        log::trace!("poll adapter destroyed ({timeouts} timeouts dropped)");

        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn check_alive(&self) -> Result<()> {
        if self.destroyed {
            Err(Error::ErrAdapterDestroyed)
        } else {
            Ok(())
        }
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.timeouts
            .iter()
            .filter_map(|(_, timer)| timer.deadline)
            .min()
    }

    fn on_ready(&mut self, token: Token, readiness: Readiness) {
        let Some(index) = self.watches.index_at(token.0) else {
            log::trace!("readiness for released token {}", token.0);
            return;
        };
        let Some(watch) = self.watches.get(index) else {
            return;
        };
        let readiness = readiness.filter(watch.interest);
        if !watch.registered || readiness.is_empty() {
            return;
        }
        self.event_outs
            .push_back(PollEvent::Ready(WatchId(index), readiness));
    }

    fn fire_due(&mut self, now: Instant) {
        let mut due: Vec<(Instant, Index)> = self
            .timeouts
            .iter()
            .filter_map(|(index, timer)| match timer.deadline {
                Some(deadline) if deadline <= now => Some((deadline, index)),
                _ => None,
            })
            .collect();
        due.sort();
        for (_, index) in due {
            if let Some(timer) = self.timeouts.get_mut(index) {
                timer.deadline = None;
                self.event_outs.push_back(PollEvent::Expired(TimeoutId(index)));
            }
        }
    }
}

impl<L: EventLoop> Poll for PollAdapter<L> {
    fn register_watch(&mut self, fd: RawFd, interest: Interest) -> Result<WatchId> {
        self.check_alive()?;
        let index = self.watches.insert(Watch {
            fd,
            interest,
            registered: false,
        });
        if !interest.is_empty() {
            if let Err(err) = self
                .event_loop
                .register(fd, Token(index.slot()), interest)
            {
                self.watches.remove(index);
                return Err(err);
            }
            if let Some(watch) = self.watches.get_mut(index) {
                watch.registered = true;
            }
        }
        log::trace!("registered fd {fd} as {index} with {interest:?}");
        Ok(WatchId(index))
    }

    fn update_interest(&mut self, id: WatchId, interest: Interest) -> Result<()> {
        self.check_alive()?;
        let watch = self.watches.get_mut(id.0).ok_or(Error::ErrUnknownWatch)?;
        if watch.interest == interest {
            return Ok(());
        }
        let token = Token(id.0.slot());
        match (watch.registered, interest.is_empty()) {
            (true, true) => {
                self.event_loop.deregister(watch.fd)?;
                watch.registered = false;
            }
            (true, false) => self.event_loop.reregister(watch.fd, token, interest)?,
            (false, false) => {
                self.event_loop.register(watch.fd, token, interest)?;
                watch.registered = true;
            }
            (false, true) => {}
        }
        watch.interest = interest;
        Ok(())
    }

    fn release_watch(&mut self, id: WatchId) -> Result<()> {
        self.check_alive()?;
        let watch = self.watches.remove(id.0).ok_or(Error::ErrUnknownWatch)?;
        self.event_outs
            .retain(|event| !matches!(event, PollEvent::Ready(w, _) if *w == id));
        if watch.registered {
            self.event_loop.deregister(watch.fd)?;
        }
        log::trace!("released {id}");
        Ok(())
    }

    fn register_timeout(&mut self, deadline: Option<Instant>) -> Result<TimeoutId> {
        self.check_alive()?;
        Ok(TimeoutId(self.timeouts.insert(Timer { deadline })))
    }

    fn reschedule(&mut self, id: TimeoutId, deadline: Option<Instant>) -> Result<()> {
        self.check_alive()?;
        let timer = self.timeouts.get_mut(id.0).ok_or(Error::ErrUnknownTimeout)?;
        timer.deadline = deadline;
        Ok(())
    }

    fn release_timeout(&mut self, id: TimeoutId) -> Result<()> {
        self.check_alive()?;
        self.timeouts.remove(id.0).ok_or(Error::ErrUnknownTimeout)?;
        self.event_outs
            .retain(|event| !matches!(event, PollEvent::Expired(t) if *t == id));
        Ok(())
    }

    fn request_exit(&mut self) {
        log::debug!("loop exit requested");
        self.event_loop.request_exit();
    }
}

impl<L: EventLoop> sansio::Protocol<(Token, Readiness), (), ()> for PollAdapter<L> {
    type Rout = ();
    type Wout = ();
    type Eout = PollEvent;
    type Error = Error;
    type Time = Instant;

    /// Feeds one readiness notification from the loop.
    fn handle_read(&mut self, msg: (Token, Readiness)) -> Result<()> {
        self.check_alive()?;
        self.on_ready(msg.0, msg.1);
        Ok(())
    }

    fn poll_read(&mut self) -> Option<Self::Rout> {
        None
    }

    fn handle_write(&mut self, _msg: ()) -> Result<()> {
        Ok(())
    }

    fn poll_write(&mut self) -> Option<Self::Wout> {
        None
    }

    fn handle_event(&mut self, _evt: ()) -> Result<()> {
        Ok(())
    }

    fn poll_event(&mut self) -> Option<Self::Eout> {
        self.event_outs.pop_front()
    }

    /// Fires every armed timeout whose deadline is at or before `now`, in
    /// deadline order. Each fired timeout is disarmed.
    fn handle_timeout(&mut self, now: Self::Time) -> Result<()> {
        self.check_alive()?;
        self.fire_due(now);
        Ok(())
    }

    fn poll_timeout(&mut self) -> Option<Self::Time> {
        self.next_deadline()
    }

    fn close(&mut self) -> Result<()> {
        self.destroy()
    }
}

impl<L: EventLoop> Drop for PollAdapter<L> {
    fn drop(&mut self) {
        if let Err(err) = self.destroy() {
            log::warn!("poll adapter teardown: {err}");
        }
    }
}
