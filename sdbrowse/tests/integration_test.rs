//! Integration tests for sdbrowse
//!
//! These tests drive the discovery core through its public API with a fake
//! discovery client and a fake event loop, without any network I/O.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::os::fd::RawFd;
use std::rc::Rc;
use std::time::Duration;

use sdbrowse::{
    BrowseConfig, BrowseEvent, BrowseId, ClientEvent, ClientFlags, ClientState, Discovery,
    DiscoveryClient, Error, EventLoop, IfIndex, Interest, IpProtocol, LookupFlags, Milestone,
    Poll, PollEvent, Readiness, Report, Reporter, ResolutionResult, ResolveOutcome, Result,
    ServiceInstance, ServiceType, TaskKey, Termination, Token, TxtRecord,
};

#[derive(Default)]
struct LoopState {
    bound: bool,
    exit_requests: usize,
    interrupted: bool,
}

#[derive(Clone, Default)]
struct FakeLoop(Rc<RefCell<LoopState>>);

impl EventLoop for FakeLoop {
    fn bind(&mut self) -> Result<()> {
        let mut state = self.0.borrow_mut();
        if state.bound {
            return Err(Error::ErrLoopAlreadyBound);
        }
        state.bound = true;
        Ok(())
    }

    fn unbind(&mut self) {
        self.0.borrow_mut().bound = false;
    }

    fn register(&mut self, _fd: RawFd, _token: Token, _interest: Interest) -> Result<()> {
        Ok(())
    }

    fn reregister(&mut self, _fd: RawFd, _token: Token, _interest: Interest) -> Result<()> {
        Ok(())
    }

    fn deregister(&mut self, _fd: RawFd) -> Result<()> {
        Ok(())
    }

    fn wait(
        &mut self,
        _timeout: Option<Duration>,
        _ready: &mut Vec<(Token, Readiness)>,
    ) -> Result<()> {
        Ok(())
    }

    fn request_exit(&mut self) {
        self.0.borrow_mut().exit_requests += 1;
    }

    fn exit_requested(&self) -> bool {
        let state = self.0.borrow();
        state.exit_requests > 0 || state.interrupted
    }
}

/// Everything the fake client was asked to do, plus the events it will
/// report on the next dispatch.
#[derive(Default)]
struct ClientLog {
    connects: usize,
    disconnects: usize,
    browses: Vec<ServiceType>,
    stopped: Vec<BrowseId>,
    resolves: Vec<(TaskKey, ServiceInstance, IpProtocol)>,
    poll_events: Vec<PollEvent>,
    queued: VecDeque<ClientEvent>,
    fail_connect: bool,
    fail_browse: bool,
    refuse_resolve: bool,
    stay_connecting: bool,
}

#[derive(Clone, Default)]
struct FakeClient(Rc<RefCell<ClientLog>>);

impl FakeClient {
    fn push(&self, event: ClientEvent) {
        self.0.borrow_mut().queued.push_back(event);
    }
}

const BROWSE_ID: BrowseId = BrowseId(7);

impl DiscoveryClient for FakeClient {
    fn connect(&mut self, _poll: &mut dyn Poll, _flags: ClientFlags) -> Result<()> {
        let mut log = self.0.borrow_mut();
        if log.fail_connect {
            return Err(Error::ErrConnectionFailure("no daemon".to_owned()));
        }
        log.connects += 1;
        log.queued
            .push_back(ClientEvent::StateChanged(ClientState::Connecting));
        if !log.stay_connecting {
            log.queued
                .push_back(ClientEvent::StateChanged(ClientState::Ready));
        }
        Ok(())
    }

    fn disconnect(&mut self, _poll: &mut dyn Poll) -> Result<()> {
        let mut log = self.0.borrow_mut();
        assert_eq!(log.disconnects, 0, "session released twice");
        log.disconnects += 1;
        Ok(())
    }

    fn start_browsing(&mut self, _poll: &mut dyn Poll, service_type: &ServiceType) -> Result<BrowseId> {
        let mut log = self.0.borrow_mut();
        if log.fail_browse {
            return Err(Error::ErrBrowserFailure("bad state".to_owned()));
        }
        log.browses.push(service_type.clone());
        Ok(BROWSE_ID)
    }

    fn stop_browsing(&mut self, _poll: &mut dyn Poll, id: BrowseId) -> Result<()> {
        let mut log = self.0.borrow_mut();
        assert!(!log.stopped.contains(&id), "{id} released twice");
        log.stopped.push(id);
        Ok(())
    }

    fn start_resolving(
        &mut self,
        _poll: &mut dyn Poll,
        key: TaskKey,
        instance: &ServiceInstance,
        family: IpProtocol,
    ) -> Result<()> {
        let mut log = self.0.borrow_mut();
        if log.refuse_resolve {
            return Err(Error::ErrInvalidInstance(instance.name.clone()));
        }
        log.resolves.push((key, instance.clone(), family));
        Ok(())
    }

    fn handle_poll_event(&mut self, _poll: &mut dyn Poll, event: PollEvent) -> Result<()> {
        self.0.borrow_mut().poll_events.push(event);
        Ok(())
    }

    fn poll_event(&mut self) -> Option<ClientEvent> {
        self.0.borrow_mut().queued.pop_front()
    }
}

#[derive(Clone, Default)]
struct RecordingReporter(Rc<RefCell<Vec<(log::Level, String)>>>);

impl Reporter for RecordingReporter {
    fn report(&mut self, report: &Report<'_>) {
        self.0
            .borrow_mut()
            .push((report.level(), report.to_string()));
    }
}

impl RecordingReporter {
    fn lines(&self) -> Vec<String> {
        self.0.borrow().iter().map(|(_, line)| line.clone()).collect()
    }
}

struct Harness {
    discovery: Discovery<FakeClient, FakeLoop>,
    client: FakeClient,
    event_loop: FakeLoop,
    reporter: RecordingReporter,
}

fn example_type() -> ServiceType {
    ServiceType::new("_example._tcp").unwrap()
}

fn setup_with(client: FakeClient) -> Result<Harness> {
    let event_loop = FakeLoop::default();
    let reporter = RecordingReporter::default();
    let discovery = Discovery::with_reporter(
        event_loop.clone(),
        client.clone(),
        BrowseConfig::new(example_type()),
        Box::new(reporter.clone()),
    )?;
    Ok(Harness {
        discovery,
        client,
        event_loop,
        reporter,
    })
}

fn setup() -> Harness {
    setup_with(FakeClient::default()).unwrap()
}

fn instance(name: &str) -> ServiceInstance {
    ServiceInstance {
        interface: IfIndex(1),
        protocol: IpProtocol::Inet,
        name: name.to_owned(),
        service_type: example_type(),
        domain: "local".to_owned(),
    }
}

fn added(name: &str) -> ClientEvent {
    ClientEvent::Browse(
        BROWSE_ID,
        BrowseEvent::InstanceAdded(instance(name), LookupFlags::MULTICAST),
    )
}

fn resolved(name: &str) -> ResolveOutcome {
    ResolveOutcome::Resolved(ResolutionResult {
        instance: instance(name),
        host_name: format!("{name}.local"),
        address: "10.0.0.5".parse().unwrap(),
        port: 7000,
        txt: TxtRecord(vec!["v=1".to_owned()]),
        flags: LookupFlags::MULTICAST,
    })
}

fn resolve_keys(client: &FakeClient) -> Vec<TaskKey> {
    client.0.borrow().resolves.iter().map(|(key, _, _)| *key).collect()
}

#[test]
fn test_browser_starts_once_session_is_ready() {
    let h = setup();
    let log = h.client.0.borrow();
    assert_eq!(log.connects, 1);
    assert_eq!(log.browses, vec![example_type()]);
    assert_eq!(h.discovery.session().state(), &ClientState::Ready);
    assert!(h.discovery.browser().is_some_and(|b| b.is_active()));
    assert!(h.discovery.termination().is_none());
}

#[test]
fn test_browser_waits_for_ready() {
    let client = FakeClient::default();
    client.0.borrow_mut().stay_connecting = true;
    let mut h = setup_with(client).unwrap();
    assert!(h.discovery.browser().is_none());
    assert!(h.client.0.borrow().browses.is_empty());

    h.client.push(ClientEvent::StateChanged(ClientState::Ready));
    h.discovery.dispatch().unwrap();
    assert!(h.discovery.browser().is_some());
    assert_eq!(h.client.0.borrow().browses.len(), 1);
}

#[test]
fn test_new_instance_starts_one_resolver() {
    let mut h = setup();
    h.client.push(added("device-a"));
    h.discovery.dispatch().unwrap();

    let log = h.client.0.borrow();
    assert_eq!(log.resolves.len(), 1);
    let (key, resolved_instance, family) = &log.resolves[0];
    assert_eq!(resolved_instance, &instance("device-a"));
    assert_eq!(*family, IpProtocol::Unspec);
    assert!(h.discovery.resolvers().is_pending(*key));
    assert!(
        h.reporter.lines()[0]
            .starts_with("(Browser) NEW: service 'device-a' of type '_example._tcp' in domain 'local'")
    );
}

#[test]
fn test_resolved_is_reported_and_task_released() {
    let mut h = setup();
    h.client.push(added("device-a"));
    h.discovery.dispatch().unwrap();
    let key = resolve_keys(&h.client)[0];

    h.client.push(ClientEvent::Resolve(key, resolved("device-a")));
    h.discovery.dispatch().unwrap();

    let lines = h.reporter.lines();
    let line = lines.last().unwrap();
    assert!(line.starts_with("(Resolver) Service 'device-a'"));
    assert!(line.contains("10.0.0.5"));
    assert!(line.contains("7000"));
    assert!(line.contains("TXT=\"v=1\""));
    assert!(!h.discovery.resolvers().is_pending(key));
    assert_eq!(h.discovery.resolvers().completed(), 1);

    // The released task accepts no further outcome.
    let reported = lines.len();
    h.client.push(ClientEvent::Resolve(
        key,
        ResolveOutcome::Failed("late".to_owned()),
    ));
    h.discovery.dispatch().unwrap();
    assert_eq!(h.reporter.lines().len(), reported);
    assert_eq!(h.discovery.resolvers().completed(), 1);
}

#[test]
fn test_every_resolver_reaches_one_outcome() {
    let mut h = setup();
    let names = ["a", "b", "c", "d"];
    for name in names {
        h.client.push(added(name));
    }
    h.discovery.dispatch().unwrap();

    let keys = resolve_keys(&h.client);
    assert_eq!(keys.len(), names.len());
    assert_eq!(h.discovery.resolvers().pending_count(), names.len());

    for (i, key) in keys.iter().enumerate() {
        let outcome = if i % 2 == 0 {
            resolved(names[i])
        } else {
            ResolveOutcome::Failed("timeout reached".to_owned())
        };
        h.client.push(ClientEvent::Resolve(*key, outcome));
    }
    h.discovery.dispatch().unwrap();

    assert_eq!(h.discovery.resolvers().pending_count(), 0);
    assert_eq!(h.discovery.resolvers().created(), 4);
    assert_eq!(h.discovery.resolvers().completed(), 4);
    let failures = h
        .reporter
        .0
        .borrow()
        .iter()
        .filter(|(level, line)| *level == log::Level::Warn && line.contains("timeout reached"))
        .count();
    assert_eq!(failures, 2);
    assert!(h.discovery.termination().is_none());
}

#[test]
fn test_removed_instance_keeps_resolver() {
    let mut h = setup();
    h.client.push(added("device-a"));
    h.client.push(ClientEvent::Browse(
        BROWSE_ID,
        BrowseEvent::InstanceRemoved(
            instance("device-a"),
            LookupFlags::MULTICAST,
            Some("eth0".to_owned()),
        ),
    ));
    h.discovery.dispatch().unwrap();

    let key = resolve_keys(&h.client)[0];
    assert!(h.discovery.resolvers().is_pending(key));
    let lines = h.reporter.lines();
    let removed = &lines[1];
    assert!(removed.starts_with("(Browser) REMOVE: service 'device-a'"));
    assert!(removed.contains(" if=eth0 "));

    h.client.push(ClientEvent::Resolve(key, resolved("device-a")));
    h.discovery.dispatch().unwrap();
    assert!(!h.discovery.resolvers().is_pending(key));
}

#[test]
fn test_session_failure_requests_exit_once() {
    let mut h = setup();
    h.client.push(ClientEvent::StateChanged(ClientState::Failure(
        "daemon disconnected".to_owned(),
    )));
    h.client.push(ClientEvent::Browse(
        BROWSE_ID,
        BrowseEvent::Failure("gone".to_owned()),
    ));
    h.client.push(added("device-a"));
    h.discovery.dispatch().unwrap();

    assert_eq!(h.event_loop.0.borrow().exit_requests, 1);
    assert!(h.client.0.borrow().resolves.is_empty());
    assert_eq!(
        h.reporter.lines(),
        vec!["(Session) Server connection failure: daemon disconnected".to_owned()]
    );
    assert_eq!(
        h.discovery.run().unwrap(),
        Termination::SessionFailure("daemon disconnected".to_owned())
    );
    assert_eq!(h.discovery.termination().map(Termination::exit_code), Some(1));
}

#[test]
fn test_browser_failure_requests_exit_once() {
    let mut h = setup();
    h.client.push(ClientEvent::Browse(
        BROWSE_ID,
        BrowseEvent::Failure("bad state".to_owned()),
    ));
    h.client.push(ClientEvent::Browse(
        BROWSE_ID,
        BrowseEvent::Failure("bad state".to_owned()),
    ));
    h.discovery.dispatch().unwrap();

    assert_eq!(h.event_loop.0.borrow().exit_requests, 1);
    assert!(!h.discovery.browser().unwrap().is_active());
    assert_eq!(
        h.discovery.termination(),
        Some(&Termination::BrowserFailure("bad state".to_owned()))
    );
}

#[test]
fn test_unsolicited_disconnect_is_a_session_failure() {
    let mut h = setup();
    h.client
        .push(ClientEvent::StateChanged(ClientState::Disconnected));
    h.discovery.dispatch().unwrap();
    assert!(matches!(
        h.discovery.termination(),
        Some(Termination::SessionFailure(_))
    ));
    assert_eq!(h.event_loop.0.borrow().exit_requests, 1);
}

#[test]
fn test_duplicate_instance_gets_two_resolvers() {
    let mut h = setup();
    h.client.push(added("device-a"));
    h.client.push(added("device-a"));
    h.discovery.dispatch().unwrap();

    let keys = resolve_keys(&h.client);
    assert_eq!(keys.len(), 2);
    assert_ne!(keys[0], keys[1]);
    assert_eq!(h.discovery.resolvers().pending_count(), 2);

    h.client.push(ClientEvent::Resolve(keys[1], resolved("device-a")));
    h.client.push(ClientEvent::Resolve(keys[0], resolved("device-a")));
    h.discovery.dispatch().unwrap();
    assert_eq!(h.discovery.resolvers().pending_count(), 0);
}

#[test]
fn test_refused_resolution_is_logged_only() {
    let mut h = setup();
    h.client.0.borrow_mut().refuse_resolve = true;
    h.client.push(added("device-a"));
    h.discovery.dispatch().unwrap();

    assert_eq!(h.discovery.resolvers().pending_count(), 0);
    assert_eq!(h.discovery.resolvers().created(), 0);
    assert!(h.discovery.browser().unwrap().is_active());
    assert!(h.discovery.termination().is_none());
    let lines = h.reporter.lines();
    assert!(lines.last().unwrap().starts_with("(Browser) Failed to resolve service 'device-a'"));
}

#[test]
fn test_milestones_and_foreign_browse_events() {
    let mut h = setup();
    h.client.push(ClientEvent::Browse(
        BROWSE_ID,
        BrowseEvent::SyncMilestone(Milestone::CacheExhausted),
    ));
    h.client.push(ClientEvent::Browse(
        BROWSE_ID,
        BrowseEvent::SyncMilestone(Milestone::AllForNow),
    ));
    h.client.push(ClientEvent::Browse(
        BrowseId(99),
        BrowseEvent::InstanceAdded(instance("stray"), LookupFlags::MULTICAST),
    ));
    h.discovery.dispatch().unwrap();

    assert_eq!(
        h.reporter.lines(),
        vec![
            "(Browser) CACHE_EXHAUSTED".to_owned(),
            "(Browser) ALL_FOR_NOW".to_owned()
        ]
    );
    assert!(h.client.0.borrow().resolves.is_empty());
}

#[test]
fn test_release_is_idempotent() {
    let mut h = setup();
    h.discovery.stop_browsing();
    h.discovery.stop_browsing();
    h.discovery.disconnect();
    h.discovery.disconnect();
    h.discovery.shutdown();
    h.discovery.shutdown();

    let log = h.client.0.borrow();
    assert_eq!(log.stopped, vec![BROWSE_ID]);
    assert_eq!(log.disconnects, 1);
    assert!(h.discovery.poll().is_destroyed());
    assert!(!h.event_loop.0.borrow().bound);
}

#[test]
fn test_disconnect_before_stop_skips_client() {
    let mut h = setup();
    h.discovery.disconnect();
    h.discovery.stop_browsing();
    drop(h.discovery);

    let log = h.client.0.borrow();
    assert!(log.stopped.is_empty());
    assert_eq!(log.disconnects, 1);
}

#[test]
fn test_disconnect_drops_pending_resolvers() {
    let mut h = setup();
    h.client.push(added("device-a"));
    h.client.push(added("device-b"));
    h.discovery.dispatch().unwrap();
    assert_eq!(h.discovery.resolvers().pending_count(), 2);

    h.discovery.disconnect();
    assert_eq!(h.discovery.resolvers().pending_count(), 0);
    assert_eq!(h.client.0.borrow().disconnects, 1);

    h.discovery.shutdown();
    assert_eq!(h.client.0.borrow().disconnects, 1);
}

#[test]
fn test_shutdown_drops_pending_resolvers() {
    let mut h = setup();
    h.client.push(added("device-a"));
    h.discovery.dispatch().unwrap();
    assert_eq!(h.discovery.resolvers().pending_count(), 1);

    h.discovery.shutdown();
    assert_eq!(h.discovery.resolvers().pending_count(), 0);
    assert_eq!(h.client.0.borrow().disconnects, 1);
}

#[test]
fn test_setup_errors() {
    let client = FakeClient::default();
    client.0.borrow_mut().fail_connect = true;
    assert_eq!(
        setup_with(client).err(),
        Some(Error::ErrConnectionFailure("no daemon".to_owned()))
    );

    let client = FakeClient::default();
    client.0.borrow_mut().fail_browse = true;
    let err = setup_with(client.clone()).err();
    assert!(matches!(err, Some(Error::ErrBrowserFailure(_))));
    // The failed setup still released the session.
    assert_eq!(client.0.borrow().disconnects, 1);

    let client = FakeClient::default();
    client.0.borrow_mut().stay_connecting = true;
    client.push(ClientEvent::StateChanged(ClientState::Failure(
        "daemon not running".to_owned(),
    )));
    assert_eq!(
        setup_with(client).err(),
        Some(Error::ErrConnectionFailure("daemon not running".to_owned()))
    );
}

#[test]
fn test_loop_binds_to_one_discovery() {
    let h = setup();
    let second = Discovery::new(
        h.event_loop.clone(),
        FakeClient::default(),
        BrowseConfig::new(example_type()),
    );
    assert!(matches!(second.err(), Some(Error::ErrAllocation(_))));
}

#[test]
fn test_run_terminations() {
    let mut h = setup();
    // Nothing registered on the loop: the run ends gracefully.
    assert_eq!(h.discovery.run().unwrap(), Termination::Graceful);
    assert_eq!(Termination::Graceful.exit_code(), 0);

    let mut h = setup();
    h.event_loop.0.borrow_mut().interrupted = true;
    let termination = h.discovery.run().unwrap();
    assert_eq!(termination, Termination::Interrupted);
    assert_eq!(termination.exit_code(), 130);
}
