//! A [`mio`] backed [`EventLoop`].

use std::io;
use std::os::fd::RawFd;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use mio::unix::SourceFd;
use mio::{Events, Waker};

use crate::poll::{EventLoop, Interest, Readiness, Token};
use shared::error::{Error, Result};

const WAKE_TOKEN: mio::Token = mio::Token(usize::MAX);

const DEFAULT_EVENTS_CAPACITY: usize = 64;

/// Single-threaded event loop over `epoll`/`kqueue`.
pub struct MioLoop {
    poll: mio::Poll,
    events: Events,
    waker: Arc<Waker>,
    interrupted: Arc<AtomicBool>,
    exit: bool,
    bound: bool,
    verbose: bool,
    turns: u64,
}

/// Wakes a [`MioLoop`] from another thread and marks it interrupted.
///
/// Meant for signal handlers such as the one installed with `ctrlc`.
#[derive(Clone)]
pub struct Interrupter {
    waker: Arc<Waker>,
    interrupted: Arc<AtomicBool>,
}

impl Interrupter {
    pub fn interrupt(&self) {
        self.interrupted.store(true, Ordering::SeqCst);
        if let Err(err) = self.waker.wake() {
            log::warn!("failed to wake event loop: {err}");
        }
    }
}

impl MioLoop {
    pub fn new() -> Result<Self> {
        let poll = mio::Poll::new()?;
        let waker = Arc::new(Waker::new(poll.registry(), WAKE_TOKEN)?);
        Ok(Self {
            poll,
            events: Events::with_capacity(DEFAULT_EVENTS_CAPACITY),
            waker,
            interrupted: Arc::new(AtomicBool::new(false)),
            exit: false,
            bound: false,
            verbose: false,
            turns: 0,
        })
    }

    /// Logs every wait and its outcome at trace level.
    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn interrupter(&self) -> Interrupter {
        Interrupter {
            waker: Arc::clone(&self.waker),
            interrupted: Arc::clone(&self.interrupted),
        }
    }

    pub fn interrupted(&self) -> bool {
        self.interrupted.load(Ordering::SeqCst)
    }

    fn to_mio(interest: Interest) -> Result<mio::Interest> {
        match (interest.is_readable(), interest.is_writable()) {
            (true, true) => Ok(mio::Interest::READABLE | mio::Interest::WRITABLE),
            (true, false) => Ok(mio::Interest::READABLE),
            (false, true) => Ok(mio::Interest::WRITABLE),
            (false, false) => Err(Error::Other("cannot register an empty interest".to_owned())),
        }
    }
}

impl EventLoop for MioLoop {
    fn bind(&mut self) -> Result<()> {
        if self.bound {
            return Err(Error::ErrLoopAlreadyBound);
        }
        self.bound = true;
        Ok(())
    }

    fn unbind(&mut self) {
        self.bound = false;
    }

    fn register(&mut self, fd: RawFd, token: Token, interest: Interest) -> Result<()> {
        let interest = Self::to_mio(interest)?;
        self.poll
            .registry()
            .register(&mut SourceFd(&fd), mio::Token(token.0), interest)?;
        Ok(())
    }

    fn reregister(&mut self, fd: RawFd, token: Token, interest: Interest) -> Result<()> {
        let interest = Self::to_mio(interest)?;
        self.poll
            .registry()
            .reregister(&mut SourceFd(&fd), mio::Token(token.0), interest)?;
        Ok(())
    }

    fn deregister(&mut self, fd: RawFd) -> Result<()> {
        self.poll.registry().deregister(&mut SourceFd(&fd))?;
        Ok(())
    }

    fn wait(
        &mut self,
        timeout: Option<Duration>,
        ready: &mut Vec<(Token, Readiness)>,
    ) -> Result<()> {
        self.turns += 1;
        if self.verbose {
            log::trace!("loop turn {}: waiting {:?}", self.turns, timeout);
        }

        match self.poll.poll(&mut self.events, timeout) {
            Ok(()) => {}
            // A signal arrived; the interrupter flag tells the rest.
            Err(err) if err.kind() == io::ErrorKind::Interrupted => return Ok(()),
            Err(err) => return Err(err.into()),
        }

        for event in self.events.iter() {
            if event.token() == WAKE_TOKEN {
                continue;
            }
            let mut readiness = Readiness::EMPTY;
            if event.is_readable() {
                readiness |= Readiness::READABLE;
            }
            if event.is_writable() {
                readiness |= Readiness::WRITABLE;
            }
            if event.is_error() {
                readiness |= Readiness::ERROR;
            }
            if event.is_read_closed() || event.is_write_closed() {
                readiness |= Readiness::HANGUP;
            }
            ready.push((Token(event.token().0), readiness));
        }

        if self.verbose {
            log::trace!("loop turn {}: {} ready", self.turns, ready.len());
        }
        Ok(())
    }

    fn request_exit(&mut self) {
        self.exit = true;
    }

    fn exit_requested(&self) -> bool {
        self.exit || self.interrupted()
    }
}
