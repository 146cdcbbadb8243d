//! The discovery-client collaborator interface.
//!
//! A [`DiscoveryClient`] is the piece that actually speaks the discovery
//! protocol. It performs all of its I/O through the [`Poll`] it is handed and
//! reports everything that happens as [`ClientEvent`]s, drained by the core
//! after each dispatch pass.

use std::fmt;
use std::ops::BitOr;

use crate::poll::{Poll, PollEvent};
use crate::resolver::TaskKey;
use crate::types::{IpProtocol, LookupFlags, ResolutionResult, ServiceInstance, ServiceType};
use shared::error::Result;

/// Options for [`DiscoveryClient::connect`].
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct ClientFlags(u32);

impl ClientFlags {
    pub const NONE: ClientFlags = ClientFlags(0);
    /// Drop announcements that originate from this host.
    pub const IGNORE_OWN: ClientFlags = ClientFlags(1);

    pub fn contains(&self, other: ClientFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for ClientFlags {
    type Output = ClientFlags;

    fn bitor(self, rhs: ClientFlags) -> ClientFlags {
        ClientFlags(self.0 | rhs.0)
    }
}

/// Connection state of a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientState {
    Connecting,
    Ready,
    Disconnected,
    /// Terminal; carries the reason reported by the client.
    Failure(String),
}

impl ClientState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ClientState::Disconnected | ClientState::Failure(_))
    }
}

impl fmt::Display for ClientState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientState::Connecting => write!(f, "connecting"),
            ClientState::Ready => write!(f, "ready"),
            ClientState::Disconnected => write!(f, "disconnected"),
            ClientState::Failure(reason) => write!(f, "failure: {reason}"),
        }
    }
}

/// Batch boundary markers of a browse subscription.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Milestone {
    /// No more events are expected in the near future.
    AllForNow,
    /// Everything that was cached has been delivered.
    CacheExhausted,
}

impl fmt::Display for Milestone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Milestone::AllForNow => write!(f, "ALL_FOR_NOW"),
            Milestone::CacheExhausted => write!(f, "CACHE_EXHAUSTED"),
        }
    }
}

/// Identifies one browse subscription of a client.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BrowseId(pub u64);

impl fmt::Display for BrowseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "browse#{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrowseEvent {
    Failure(String),
    InstanceAdded(ServiceInstance, LookupFlags),
    /// Carries the name of the interface the instance was seen on, when
    /// the client knows it.
    InstanceRemoved(ServiceInstance, LookupFlags, Option<String>),
    SyncMilestone(Milestone),
}

/// Terminal outcome of one resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolveOutcome {
    Resolved(ResolutionResult),
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    StateChanged(ClientState),
    Browse(BrowseId, BrowseEvent),
    Resolve(TaskKey, ResolveOutcome),
}

/// A discovery protocol client running on a caller-supplied [`Poll`].
pub trait DiscoveryClient {
    /// Starts connecting. State changes are reported as events.
    fn connect(&mut self, poll: &mut dyn Poll, flags: ClientFlags) -> Result<()>;

    /// Releases the connection together with everything registered on
    /// `poll`. Pending resolutions are dropped without an outcome.
    fn disconnect(&mut self, poll: &mut dyn Poll) -> Result<()>;

    fn start_browsing(&mut self, poll: &mut dyn Poll, service_type: &ServiceType)
    -> Result<BrowseId>;

    fn stop_browsing(&mut self, poll: &mut dyn Poll, id: BrowseId) -> Result<()>;

    /// Starts resolving `instance`. Exactly one [`ClientEvent::Resolve`]
    /// carrying `key` follows, unless the client is disconnected first.
    fn start_resolving(
        &mut self,
        poll: &mut dyn Poll,
        key: TaskKey,
        instance: &ServiceInstance,
        family: IpProtocol,
    ) -> Result<()>;

    /// Delivers readiness or expiry for one of the client's registrations.
    fn handle_poll_event(&mut self, poll: &mut dyn Poll, event: PollEvent) -> Result<()>;

    fn poll_event(&mut self) -> Option<ClientEvent>;
}
