//! The discovery context: one poll adapter, one session, one browser and the
//! resolver tasks it spawns, driven by a single-threaded loop.
//!
//! Events flow in one direction. The event loop reports readiness and timer
//! expiry to the [`PollAdapter`], whose [`PollEvent`](crate::poll::PollEvent)s are handed to the
//! client. The client turns them into [`ClientEvent`]s, which [`Discovery`]
//! routes to the session, browser and resolver registry and renders through
//! the [`Reporter`]. A session or browser failure requests loop exit exactly
//! once; everything the client reports after that is dropped.

use std::fmt;

use sansio::Protocol;

use crate::browser::Browser;
use crate::client::{BrowseEvent, ClientEvent, ClientState, DiscoveryClient, ResolveOutcome};
use crate::config::BrowseConfig;
use crate::poll::{EventLoop, Poll, PollAdapter};
use crate::reporter::{LogReporter, Report, Reporter};
use crate::resolver::{Resolvers, TaskKey};
use crate::session::Session;
use crate::types::{IpProtocol, ServiceType};
use shared::error::{Error, Result};

/// Why the loop stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Termination {
    /// Nothing was left that could wake the loop.
    Graceful,
    SessionFailure(String),
    BrowserFailure(String),
    /// The loop was asked to stop from outside, e.g. by a signal.
    Interrupted,
}

impl Termination {
    /// Process exit code for this termination.
    pub fn exit_code(&self) -> u8 {
        match self {
            Termination::Graceful => 0,
            Termination::SessionFailure(_) | Termination::BrowserFailure(_) => 1,
            Termination::Interrupted => 130,
        }
    }
}

impl fmt::Display for Termination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Termination::Graceful => write!(f, "graceful"),
            Termination::SessionFailure(reason) => write!(f, "session failure: {reason}"),
            Termination::BrowserFailure(reason) => write!(f, "browser failure: {reason}"),
            Termination::Interrupted => write!(f, "interrupted"),
        }
    }
}

/// Wires a [`DiscoveryClient`] to an [`EventLoop`].
pub struct Discovery<C: DiscoveryClient, L: EventLoop> {
    poll: PollAdapter<L>,
    session: Session<C>,
    service_type: ServiceType,
    family: IpProtocol,
    browser: Option<Browser>,
    resolvers: Resolvers,
    reporter: Box<dyn Reporter>,
    termination: Option<Termination>,
    shut_down: bool,
}

impl<C: DiscoveryClient, L: EventLoop> Discovery<C, L> {
    /// Binds `event_loop`, connects `client` and, as soon as the session is
    /// ready, starts browsing. Reports go through the `log` facade.
    ///
    /// # Errors
    ///
    /// Setup errors: the loop cannot be bound, the client cannot connect, or
    /// the session or browser fails before `new` returns.
    pub fn new(event_loop: L, client: C, config: BrowseConfig) -> Result<Self> {
        Self::with_reporter(event_loop, client, config, Box::new(LogReporter))
    }

    pub fn with_reporter(
        event_loop: L,
        client: C,
        config: BrowseConfig,
        reporter: Box<dyn Reporter>,
    ) -> Result<Self> {
        let mut poll = PollAdapter::new(event_loop)?;
        let session = Session::connect(client, &mut poll, config.client_flags)?;

        let mut discovery = Self {
            poll,
            session,
            service_type: config.service_type,
            family: config.family,
            browser: None,
            resolvers: Resolvers::new(),
            reporter,
            termination: None,
            shut_down: false,
        };

        discovery.dispatch()?;
        discovery.ensure_browser();
        discovery.dispatch()?;

        let setup_error = match &discovery.termination {
            Some(Termination::SessionFailure(reason)) => {
                Some(Error::ErrConnectionFailure(reason.clone()))
            }
            Some(Termination::BrowserFailure(reason)) => {
                Some(Error::ErrBrowserFailure(reason.clone()))
            }
            _ => None,
        };
        match setup_error {
            Some(err) => Err(err),
            None => Ok(discovery),
        }
    }

    pub fn service_type(&self) -> &ServiceType {
        &self.service_type
    }

    pub fn termination(&self) -> Option<&Termination> {
        self.termination.as_ref()
    }

    pub fn session(&self) -> &Session<C> {
        &self.session
    }

    pub fn browser(&self) -> Option<&Browser> {
        self.browser.as_ref()
    }

    pub fn resolvers(&self) -> &Resolvers {
        &self.resolvers
    }

    pub fn poll(&self) -> &PollAdapter<L> {
        &self.poll
    }

    /// Runs the loop until a failure, an exit request, or until nothing is
    /// left to wait for.
    pub fn run(&mut self) -> Result<Termination> {
        loop {
            if let Some(termination) = &self.termination {
                return Ok(termination.clone());
            }
            if self.poll.exit_requested() {
                log::debug!("loop interrupted");
                self.termination = Some(Termination::Interrupted);
                continue;
            }
            if self.poll.is_idle() {
                log::debug!("nothing left to wait for");
                self.termination = Some(Termination::Graceful);
                continue;
            }
            self.poll.turn()?;
            self.dispatch()?;
            self.ensure_browser();
        }
    }

    /// Delivers queued poll events to the client and routes everything the
    /// client reports, until both queues are empty.
    pub fn dispatch(&mut self) -> Result<()> {
        loop {
            let mut progressed = false;

            while let Some(event) = self.poll.poll_event() {
                progressed = true;
                if self.termination.is_some() || self.session.is_released() {
                    log::trace!("dropping {event:?} after termination");
                    continue;
                }
                if let Err(err) = self
                    .session
                    .client_mut()
                    .handle_poll_event(&mut self.poll, event)
                {
                    log::warn!("client could not handle {event:?}: {err}");
                }
            }

            while let Some(event) = self.session.client_mut().poll_event() {
                progressed = true;
                self.on_client_event(event);
            }

            if !progressed {
                return Ok(());
            }
        }
    }

    /// Releases the browse subscription. Resolutions already started keep
    /// running. Safe to call more than once.
    pub fn stop_browsing(&mut self) {
        if let Some(browser) = self.browser.as_mut() {
            browser.stop(&mut self.session, &mut self.poll);
        }
    }

    /// Releases the session, and with it every pending resolver task.
    /// Safe to call more than once.
    pub fn disconnect(&mut self) {
        self.session.disconnect(&mut self.poll);
        // The client dropped its resolutions along with the session.
        let dropped = self.resolvers.clear();
        if dropped > 0 {
            log::debug!("dropping {dropped} pending resolver tasks");
        }
    }

    /// Tears everything down in order: browser, session with its pending
    /// resolver tasks, poll adapter. Safe to call more than once.
    pub fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        self.shut_down = true;

        self.stop_browsing();
        self.disconnect();
        if let Err(err) = self.poll.destroy() {
            log::warn!("poll adapter teardown: {err}");
        }
    }

    fn ensure_browser(&mut self) {
        if self.browser.is_some() || self.termination.is_some() || !self.session.is_ready() {
            return;
        }
        match Browser::start(&mut self.session, &mut self.poll, &self.service_type) {
            Ok(browser) => self.browser = Some(browser),
            Err(err) => {
                let reason = format!("failed to create service browser: {err}");
                self.reporter.report(&Report::BrowserFailure(&reason));
                self.fail(Termination::BrowserFailure(reason));
            }
        }
    }

    fn fail(&mut self, termination: Termination) {
        if self.termination.is_some() {
            return;
        }
        log::debug!("terminating: {termination}");
        self.termination = Some(termination);
        self.poll.request_exit();
    }

    fn on_client_event(&mut self, event: ClientEvent) {
        if self.termination.is_some() {
            log::trace!("dropping {event:?} after termination");
            return;
        }
        match event {
            ClientEvent::StateChanged(state) => self.on_state_changed(state),
            ClientEvent::Browse(id, event) => {
                let current = self
                    .browser
                    .as_ref()
                    .is_some_and(|browser| browser.id() == id && browser.is_active());
                if current {
                    self.on_browse_event(event);
                } else {
                    log::trace!("dropping {event:?} for {id}");
                }
            }
            ClientEvent::Resolve(key, outcome) => self.on_resolve_outcome(key, outcome),
        }
    }

    fn on_state_changed(&mut self, state: ClientState) {
        if !self.session.handle_state(state.clone()) {
            return;
        }
        match state {
            ClientState::Connecting => {}
            ClientState::Ready => self.ensure_browser(),
            ClientState::Failure(reason) => {
                self.reporter.report(&Report::SessionFailure(&reason));
                self.fail(Termination::SessionFailure(reason));
            }
            ClientState::Disconnected => {
                let reason = "disconnected by the server".to_owned();
                self.reporter.report(&Report::SessionFailure(&reason));
                self.fail(Termination::SessionFailure(reason));
            }
        }
    }

    fn on_browse_event(&mut self, event: BrowseEvent) {
        match event {
            BrowseEvent::InstanceAdded(instance, flags) => {
                self.reporter
                    .report(&Report::InstanceAdded(&instance, flags));
                if let Err(err) =
                    self.resolvers
                        .start(&mut self.session, &mut self.poll, &instance, self.family)
                {
                    self.reporter
                        .report(&Report::ResolveStartFailed(&instance, &err));
                }
            }
            BrowseEvent::InstanceRemoved(instance, flags, interface) => {
                self.reporter.report(&Report::InstanceRemoved(
                    &instance,
                    flags,
                    interface.as_deref(),
                ));
            }
            BrowseEvent::SyncMilestone(milestone) => {
                self.reporter.report(&Report::Milestone(milestone));
            }
            BrowseEvent::Failure(reason) => {
                if let Some(browser) = self.browser.as_mut() {
                    browser.fail(&reason);
                }
                self.reporter.report(&Report::BrowserFailure(&reason));
                self.fail(Termination::BrowserFailure(reason));
            }
        }
    }

    fn on_resolve_outcome(&mut self, key: TaskKey, outcome: ResolveOutcome) {
        let task = match self.resolvers.complete(key) {
            Ok(task) => task,
            Err(err) => {
                log::warn!("dropping outcome for {key}: {err}");
                return;
            }
        };
        match outcome {
            ResolveOutcome::Resolved(result) => self.reporter.report(&Report::Resolved(&result)),
            ResolveOutcome::Failed(reason) => self
                .reporter
                .report(&Report::ResolveFailed(&task.instance, &reason)),
        }
    }
}

impl<C: DiscoveryClient, L: EventLoop> Drop for Discovery<C, L> {
    fn drop(&mut self) {
        self.shutdown();
    }
}
