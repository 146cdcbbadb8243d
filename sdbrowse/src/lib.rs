//! # sdbrowse
//!
//! Browse and resolve DNS-SD services from an event loop you own.
//!
//! This crate discovers services advertised with multicast DNS service
//! discovery (mDNS/DNS-SD), resolves every instance it sees to a host name,
//! address, port and TXT metadata, and reports each event as it happens.
//!
//! ## Design
//!
//! The discovery protocol is spoken by a [`DiscoveryClient`]. Clients never
//! run a loop of their own: they ask a [`PollAdapter`], through the
//! object-safe [`Poll`] trait, to watch descriptors and arm timeouts on the
//! caller's [`EventLoop`], and they report what happens as typed
//! [`ClientEvent`]s. [`Discovery`] owns the adapter, the single [`Session`],
//! the [`Browser`] and the registry of one-shot resolver tasks, and routes
//! events between them:
//!
//! ```text
//! EventLoop -> PollAdapter -> DiscoveryClient -> Discovery -> Reporter
//!                                   ^                |
//!                                   +-- start_resolving
//! ```
//!
//! Everything runs on one thread. Session and browser failures request loop
//! exit exactly once; a failed resolution is reported and forgotten.
//!
//! ## Bundled pieces
//!
//! - [`MioLoop`]: an [`EventLoop`] over `mio`, interruptible from a signal
//!   handler through an [`Interrupter`]
//! - [`MdnsClient`]: a [`DiscoveryClient`] that queries the network itself
//!   with the sans-I/O [`DnsSd`] engine
//! - [`LogReporter`]: renders every event through the `log` facade
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use sdbrowse::{BrowseConfig, Discovery, DnsSdConfig, MdnsClient, MioLoop, ServiceType};
//!
//! # fn main() -> Result<(), sdbrowse::Error> {
//! let event_loop = MioLoop::new()?;
//! let client = MdnsClient::new(DnsSdConfig::default());
//! let config = BrowseConfig::new(ServiceType::new("_http._tcp")?);
//!
//! let mut discovery = Discovery::new(event_loop, client, config)?;
//! let termination = discovery.run()?;
//! discovery.shutdown();
//! std::process::exit(termination.exit_code().into());
//! # }
//! ```
//!
//! ## Sans-I/O engine
//!
//! [`DnsSd`] implements [`sansio::Protocol`] and can be driven without the
//! rest of the crate:
//!
//! ```rust
//! use sdbrowse::{DnsSd, DnsSdConfig, DnsSdEvent, Milestone, ServiceType};
//! use sansio::Protocol;
//! use std::time::Instant;
//!
//! let mut engine = DnsSd::new(DnsSdConfig::default());
//! let id = engine.browse(&ServiceType::new("_ipp._tcp").unwrap(), Instant::now()).unwrap();
//!
//! // Send this to 224.0.0.251:5353
//! let query = engine.poll_write().unwrap();
//! assert!(!query.message.is_empty());
//!
//! // Nothing was cached yet
//! assert_eq!(
//!     engine.poll_event(),
//!     Some(DnsSdEvent::Milestone(id, Milestone::CacheExhausted))
//! );
//! ```

#![warn(rust_2018_idioms)]
#![allow(dead_code)]

pub(crate) mod arena;
pub(crate) mod browser;
pub(crate) mod client;
pub(crate) mod config;
pub(crate) mod discovery;
pub(crate) mod iface;
pub(crate) mod mdns;
pub(crate) mod message;
pub(crate) mod poll;
pub(crate) mod proto;
pub(crate) mod reactor;
pub(crate) mod reporter;
pub(crate) mod resolver;
pub(crate) mod session;
pub(crate) mod socket;
pub(crate) mod types;

pub use arena::Index;
pub use browser::{Browser, BrowserState};
pub use client::{
    BrowseEvent, BrowseId, ClientEvent, ClientFlags, ClientState, DiscoveryClient, Milestone,
    ResolveOutcome,
};
pub use config::{BrowseConfig, DEFAULT_SERVICE_TYPE, DnsSdConfig};
pub use discovery::{Discovery, Termination};
pub use iface::{InterfaceEntry, InterfaceTable};
pub use mdns::MdnsClient;
pub use poll::{
    EventLoop, Interest, Poll, PollAdapter, PollEvent, Readiness, TimeoutId, Token, WatchId,
};
pub use proto::{
    DnsSd, DnsSdEvent, MDNS_DEST_ADDR, MDNS_MULTICAST_IPV4, MDNS_PORT, RESOLVE_TIMEOUT_REASON,
    ResolveId,
};
pub use reactor::{Interrupter, MioLoop};
pub use reporter::{LogReporter, Report, Reporter};
pub use resolver::{ResolverTask, Resolvers, TaskKey};
pub use session::Session;
pub use socket::MulticastSocket;
pub use types::{
    DEFAULT_DOMAIN, IfIndex, IpProtocol, LookupFlags, ResolutionResult, ServiceInstance,
    ServiceType, TxtRecord,
};

pub use shared::error::{Error, Result};
