//! Sans-I/O multicast DNS-SD engine.
//!
//! This module provides [`DnsSd`], a sans-I/O implementation of the querying
//! half of DNS service discovery over multicast DNS. It implements the
//! [`sansio::Protocol`] trait and performs no I/O of its own.
//!
//! # Overview
//!
//! The caller is responsible for:
//!
//! 1. **Network I/O**: feeding datagrams received on 224.0.0.251:5353 into
//!    `handle_read()` and sending whatever `poll_write()` yields
//! 2. **Timing**: calling `handle_timeout()` once `poll_timeout()` passes
//! 3. **Event processing**: draining [`DnsSdEvent`]s from `poll_event()`
//!
//! # Browsing
//!
//! [`DnsSd::browse()`] asks for the PTR records of `<type>.local.`. The query
//! is retried with a doubling interval. Each instance named by a PTR answer is
//! reported once per (interface, family, name) with
//! [`DnsSdEvent::InstanceAdded`], and reported again with
//! [`DnsSdEvent::InstanceRemoved`] when it says goodbye or its record expires.
//!
//! # Resolving
//!
//! [`DnsSd::resolve()`] looks for the instance's SRV and TXT records and the
//! address of the SRV target. Records received with any response are cached
//! for their TTL, so a resolution often completes from the additionals that
//! arrived with the PTR answer. Only records that an active browse or
//! resolution asks for are cached, and at most
//! [`DnsSdConfig::max_cache_entries`] of them. A resolution ends with exactly one
//! [`DnsSdEvent::Resolved`] or [`DnsSdEvent::ResolveFailed`].
//!
//! ```rust
//! use sdbrowse::{DnsSd, DnsSdConfig, ServiceType};
//! use sansio::Protocol;
//! use std::time::Instant;
//!
//! let mut engine = DnsSd::new(DnsSdConfig::default());
//! let service_type = ServiceType::new("_http._tcp").unwrap();
//! let browse = engine.browse(&service_type, Instant::now()).unwrap();
//!
//! let packet = engine.poll_write().expect("PTR question should be queued");
//! assert_eq!(packet.transport.peer_addr.to_string(), "224.0.0.251:5353");
//! assert!(engine.is_browsing(browse));
//! ```

#[cfg(test)]
mod dnssd_test;

use std::collections::{HashMap, VecDeque};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::{Duration, Instant};

use bytes::BytesMut;
use shared::{TaggedBytesMut, TransportContext, TransportMessage};

use crate::client::{BrowseId, Milestone};
use crate::config::{DEFAULT_QUERY_INTERVAL, DnsSdConfig, MAX_MESSAGE_RECORDS, MAX_TIMER_DELAY};
use crate::message::header::Header;
use crate::message::name::Name;
use crate::message::question::Question;
use crate::message::resource::Resource;
use crate::message::resource::a::AResource;
use crate::message::resource::aaaa::AaaaResource;
use crate::message::resource::ptr::PtrResource;
use crate::message::resource::srv::SrvResource;
use crate::message::resource::txt::TxtResource;
use crate::message::{DNSCLASS_INET, DnsType, Message};
use crate::types::{
    DEFAULT_DOMAIN, IfIndex, IpProtocol, LookupFlags, ResolutionResult, ServiceInstance,
    ServiceType, TxtRecord,
};
use shared::error::{Error, Result};

/// The mDNS multicast group address (224.0.0.251).
pub const MDNS_MULTICAST_IPV4: Ipv4Addr = Ipv4Addr::new(224, 0, 0, 251);

/// The standard mDNS port (5353).
pub const MDNS_PORT: u16 = 5353;

/// mDNS multicast destination address (224.0.0.251:5353).
///
/// ```rust
/// use sdbrowse::MDNS_DEST_ADDR;
///
/// assert_eq!(MDNS_DEST_ADDR.to_string(), "224.0.0.251:5353");
/// ```
pub const MDNS_DEST_ADDR: SocketAddr = SocketAddr::new(IpAddr::V4(MDNS_MULTICAST_IPV4), MDNS_PORT);

/// Failure reason of a resolution that ran out of time.
pub const RESOLVE_TIMEOUT_REASON: &str = "timeout reached";

/// Unique identifier of one resolution.
pub type ResolveId = u64;

/// Events emitted by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DnsSdEvent {
    InstanceAdded(BrowseId, ServiceInstance, LookupFlags),
    InstanceRemoved(BrowseId, ServiceInstance, LookupFlags),
    Milestone(BrowseId, Milestone),
    /// Terminal; the resolution is forgotten afterwards.
    Resolved(ResolveId, ResolutionResult),
    /// Terminal; carries the failure reason.
    ResolveFailed(ResolveId, String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum RecordData {
    A(Ipv4Addr),
    Aaaa(Ipv6Addr),
    Ptr(Name),
    Srv { port: u16, target: Name },
    Txt(Vec<Vec<u8>>),
}

impl RecordData {
    fn from_resource(resource: &Resource) -> Option<Self> {
        match resource.header.typ {
            DnsType::A => resource
                .body_as::<AResource>()
                .map(|body| RecordData::A(Ipv4Addr::from(body.a))),
            DnsType::Aaaa => resource
                .body_as::<AaaaResource>()
                .map(|body| RecordData::Aaaa(Ipv6Addr::from(body.aaaa))),
            DnsType::Ptr => resource
                .body_as::<PtrResource>()
                .map(|body| RecordData::Ptr(body.ptr.clone())),
            DnsType::Srv => resource.body_as::<SrvResource>().map(|body| RecordData::Srv {
                port: body.port,
                target: body.target.clone(),
            }),
            DnsType::Txt => resource
                .body_as::<TxtResource>()
                .map(|body| RecordData::Txt(body.txt.clone())),
            _ => None,
        }
    }

    fn typ(&self) -> DnsType {
        match self {
            RecordData::A(_) => DnsType::A,
            RecordData::Aaaa(_) => DnsType::Aaaa,
            RecordData::Ptr(_) => DnsType::Ptr,
            RecordData::Srv { .. } => DnsType::Srv,
            RecordData::Txt(_) => DnsType::Txt,
        }
    }
}

#[derive(Debug, Clone)]
struct CachedRecord {
    data: RecordData,
    expires: Instant,
    flags: LookupFlags,
}

/// Where a received packet came from.
#[derive(Debug, Copy, Clone)]
struct Origin {
    interface: IfIndex,
    protocol: IpProtocol,
    flags: LookupFlags,
}

type InstanceKey = (IfIndex, IpProtocol, String);

#[derive(Debug)]
struct KnownInstance {
    instance: ServiceInstance,
    flags: LookupFlags,
    expires: Instant,
}

#[derive(Debug)]
struct Browse {
    id: BrowseId,
    service_type: ServiceType,
    question: Name,
    interval: Duration,
    next_query: Instant,
    all_for_now_at: Option<Instant>,
    known: HashMap<InstanceKey, KnownInstance>,
}

#[derive(Debug)]
struct Resolve {
    id: ResolveId,
    instance: ServiceInstance,
    family: IpProtocol,
    fullname: Name,
    interval: Duration,
    next_query: Instant,
    deadline: Instant,
    host_queried: bool,
}

/// Sans-I/O DNS-SD querier.
///
/// # Example
///
/// ```rust
/// use sdbrowse::{DnsSd, DnsSdConfig};
/// use sansio::Protocol;
///
/// let mut engine = DnsSd::new(DnsSdConfig::default());
///
/// // Nothing to do yet
/// assert!(engine.poll_write().is_none());
/// assert!(engine.poll_timeout().is_none());
/// ```
pub struct DnsSd {
    config: DnsSdConfig,
    query_interval: Duration,

    browses: Vec<Browse>,
    resolves: Vec<Resolve>,
    next_browse_id: u64,
    next_resolve_id: ResolveId,

    /// Records by (case-folded name, type)
    cache: HashMap<(String, DnsType), Vec<CachedRecord>>,

    local_addresses: Vec<IpAddr>,
    ignore_own: bool,

    write_outs: VecDeque<TaggedBytesMut>,
    event_outs: VecDeque<DnsSdEvent>,
    closed: bool,
}

impl DnsSd {
    pub fn new(mut config: DnsSdConfig) -> Self {
        config.max_query_interval = config.max_query_interval.min(MAX_TIMER_DELAY);
        config.resolve_timeout = config.resolve_timeout.min(MAX_TIMER_DELAY);
        config.all_for_now_delay = config.all_for_now_delay.min(MAX_TIMER_DELAY);
        let query_interval = if config.query_interval == Duration::ZERO {
            DEFAULT_QUERY_INTERVAL
        } else {
            config.query_interval.min(MAX_TIMER_DELAY)
        };

        Self {
            config,
            query_interval,
            browses: Vec::new(),
            resolves: Vec::new(),
            next_browse_id: 1,
            next_resolve_id: 1,
            cache: HashMap::new(),
            local_addresses: Vec::new(),
            ignore_own: false,
            write_outs: VecDeque::new(),
            event_outs: VecDeque::new(),
            closed: false,
        }
    }

    /// Addresses of this host. Records arriving from one of them, or from a
    /// loopback address, carry [`LookupFlags::LOCAL`] and
    /// [`LookupFlags::OUR_OWN`].
    pub fn set_local_addresses(&mut self, addresses: Vec<IpAddr>) {
        self.local_addresses = addresses;
    }

    /// Drop responses that originate from this host.
    pub fn set_ignore_own(&mut self, ignore_own: bool) {
        self.ignore_own = ignore_own;
    }

    /// Starts browsing for `service_type` in the `local` domain.
    ///
    /// Instances already in the record cache are reported straight away,
    /// followed by [`Milestone::CacheExhausted`]. [`Milestone::AllForNow`]
    /// follows once the configured delay has passed.
    pub fn browse(&mut self, service_type: &ServiceType, now: Instant) -> Result<BrowseId> {
        self.check_open()?;
        let question = Name::new(&format!("{service_type}.{DEFAULT_DOMAIN}."))?;

        let id = BrowseId(self.next_browse_id);
        self.next_browse_id += 1;

        let mut browse = Browse {
            id,
            service_type: service_type.clone(),
            question,
            interval: self.query_interval,
            next_query: after(now, self.query_interval),
            all_for_now_at: Some(after(now, self.config.all_for_now_delay)),
            known: HashMap::new(),
        };

        let cached: Vec<(Name, LookupFlags, Instant)> = self
            .cache
            .get(&(browse.question.key(), DnsType::Ptr))
            .into_iter()
            .flatten()
            .filter(|record| record.expires > now)
            .filter_map(|record| match &record.data {
                RecordData::Ptr(target) => Some((target.clone(), record.flags, record.expires)),
                _ => None,
            })
            .collect();
        for (target, flags, expires) in cached {
            // The interface a cached record came from is not kept.
            let origin = Origin {
                interface: IfIndex::UNSPEC,
                protocol: IpProtocol::Unspec,
                flags: flags | LookupFlags::CACHED,
            };
            if let Some(event) =
                add_instance(&mut browse, &target, origin, expires, self.config.max_cache_entries)
            {
                self.event_outs.push_back(event);
            }
        }
        self.event_outs
            .push_back(DnsSdEvent::Milestone(id, Milestone::CacheExhausted));

        let question = browse.question.clone();
        self.browses.push(browse);
        log::debug!("{id} browsing {service_type}");
        self.send_questions(vec![(question, DnsType::Ptr)], now);
        Ok(id)
    }

    /// Stops a browse; no more events are emitted for it.
    pub fn cancel_browse(&mut self, id: BrowseId) -> Result<()> {
        let before = self.browses.len();
        self.browses.retain(|browse| browse.id != id);
        if self.browses.len() == before {
            return Err(Error::ErrUnknownBrowse);
        }
        self.event_outs.retain(|event| match event {
            DnsSdEvent::InstanceAdded(browse, ..)
            | DnsSdEvent::InstanceRemoved(browse, ..)
            | DnsSdEvent::Milestone(browse, _) => *browse != id,
            _ => true,
        });
        log::debug!("{id} cancelled");
        Ok(())
    }

    pub fn is_browsing(&self, id: BrowseId) -> bool {
        self.browses.iter().any(|browse| browse.id == id)
    }

    /// Starts resolving `instance`, preferring addresses of `family`.
    ///
    /// When the cache already holds everything, the result is queued right
    /// away with [`LookupFlags::CACHED`] and nothing is sent.
    pub fn resolve(
        &mut self,
        instance: &ServiceInstance,
        family: IpProtocol,
        now: Instant,
    ) -> Result<ResolveId> {
        self.check_open()?;
        let fullname = Name::new(&instance.fullname())?;

        let id = self.next_resolve_id;
        self.next_resolve_id += 1;

        let mut resolve = Resolve {
            id,
            instance: instance.clone(),
            family,
            fullname,
            interval: self.query_interval,
            next_query: after(now, self.query_interval),
            deadline: after(now, self.config.resolve_timeout),
            host_queried: false,
        };

        if let Some(mut result) = self.lookup(&resolve, now) {
            result.flags |= LookupFlags::CACHED;
            log::trace!("resolve {id} answered from cache");
            self.event_outs.push_back(DnsSdEvent::Resolved(id, result));
            return Ok(id);
        }

        let questions = self.resolve_questions(&mut resolve, now);
        self.resolves.push(resolve);
        log::debug!("resolve {id} started for {}", instance.fullname());
        self.send_questions(questions, now);
        Ok(id)
    }

    pub fn is_resolving(&self, id: ResolveId) -> bool {
        self.resolves.iter().any(|resolve| resolve.id == id)
    }

    pub fn pending_resolve_count(&self) -> usize {
        self.resolves.len()
    }

    /// Number of instances the browse currently knows about.
    pub fn known_instance_count(&self, id: BrowseId) -> usize {
        self.browses
            .iter()
            .find(|browse| browse.id == id)
            .map_or(0, |browse| browse.known.len())
    }

    /// Number of records currently held in the record cache.
    pub fn cached_record_count(&self) -> usize {
        self.cache.values().map(Vec::len).sum()
    }

    fn check_open(&self) -> Result<()> {
        if self.closed {
            Err(Error::ErrConnectionClosed)
        } else {
            Ok(())
        }
    }

    fn is_local(&self, addr: &IpAddr) -> bool {
        addr.is_loopback() || self.local_addresses.contains(addr)
    }

    fn send_questions(&mut self, questions: Vec<(Name, DnsType)>, now: Instant) {
        if questions.is_empty() {
            return;
        }

        let mut msg = Message {
            header: Header::default(),
            questions: questions
                .into_iter()
                .map(|(name, typ)| Question {
                    name,
                    typ,
                    class: DNSCLASS_INET,
                })
                .collect(),
            ..Default::default()
        };

        let raw = match msg.pack() {
            Ok(raw) => raw,
            Err(err) => {
                log::error!("Failed to construct mDNS packet: {err}");
                return;
            }
        };

        log::trace!("Queuing mDNS query with {} questions", msg.questions.len());
        self.write_outs.push_back(TransportMessage {
            now,
            transport: TransportContext {
                local_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0),
                peer_addr: MDNS_DEST_ADDR,
                interface: 0,
            },
            message: BytesMut::from(&raw[..]),
        });
    }

    /// Questions still needed to complete `resolve`.
    fn resolve_questions(&self, resolve: &mut Resolve, now: Instant) -> Vec<(Name, DnsType)> {
        let mut questions = Vec::new();
        let srv = self.find_srv(&resolve.fullname, now);
        if srv.is_none() {
            questions.push((resolve.fullname.clone(), DnsType::Srv));
        }
        if self.find_txt(&resolve.fullname, now).is_none() {
            questions.push((resolve.fullname.clone(), DnsType::Txt));
        }
        if let Some((_, target, _)) = srv {
            for typ in address_types(resolve) {
                if !self.has_record(&target, typ, now) {
                    questions.push((target.clone(), typ));
                }
            }
            resolve.host_queried = true;
        }
        questions
    }

    fn records(&self, name: &Name, typ: DnsType, now: Instant) -> impl Iterator<Item = &CachedRecord> {
        self.cache
            .get(&(name.key(), typ))
            .into_iter()
            .flatten()
            .filter(move |record| record.expires > now)
    }

    fn has_record(&self, name: &Name, typ: DnsType, now: Instant) -> bool {
        self.records(name, typ, now).next().is_some()
    }

    fn find_srv(&self, name: &Name, now: Instant) -> Option<(u16, Name, LookupFlags)> {
        self.records(name, DnsType::Srv, now)
            .find_map(|record| match &record.data {
                RecordData::Srv { port, target } => Some((*port, target.clone(), record.flags)),
                _ => None,
            })
    }

    fn find_txt(&self, name: &Name, now: Instant) -> Option<(Vec<Vec<u8>>, LookupFlags)> {
        self.records(name, DnsType::Txt, now)
            .find_map(|record| match &record.data {
                RecordData::Txt(txt) => Some((txt.clone(), record.flags)),
                _ => None,
            })
    }

    fn find_address(&self, target: &Name, resolve: &Resolve, now: Instant) -> Option<(IpAddr, LookupFlags)> {
        address_types(resolve).into_iter().find_map(|typ| {
            self.records(target, typ, now)
                .find_map(|record| match record.data {
                    RecordData::A(ip) => Some((IpAddr::V4(ip), record.flags)),
                    RecordData::Aaaa(ip) => Some((IpAddr::V6(ip), record.flags)),
                    _ => None,
                })
        })
    }

    /// Builds the result for `resolve` if the cache holds all of it.
    fn lookup(&self, resolve: &Resolve, now: Instant) -> Option<ResolutionResult> {
        let (port, target, srv_flags) = self.find_srv(&resolve.fullname, now)?;
        let (txt, txt_flags) = self.find_txt(&resolve.fullname, now)?;
        let (address, addr_flags) = self.find_address(&target, resolve, now)?;

        Some(ResolutionResult {
            instance: resolve.instance.clone(),
            host_name: target.data.trim_end_matches('.').to_owned(),
            address,
            port,
            txt: TxtRecord(
                txt.iter()
                    .map(|entry| String::from_utf8_lossy(entry).into_owned())
                    .collect(),
            ),
            flags: srv_flags | txt_flags | addr_flags,
        })
    }

    fn process_message(&mut self, msg: &TaggedBytesMut) {
        let mut message = Message::default();
        if let Err(err) = message.unpack(&msg.message) {
            log::warn!("Failed to parse mDNS packet: {err}");
            return;
        }
        if !message.header.response {
            log::trace!("ignoring mDNS query from {}", msg.transport.peer_addr);
            return;
        }

        let source = msg.transport.peer_addr.ip();
        let mut flags = LookupFlags::MULTICAST;
        if self.is_local(&source) {
            if self.ignore_own {
                log::trace!("ignoring own response from {source}");
                return;
            }
            flags |= LookupFlags::LOCAL | LookupFlags::OUR_OWN;
        }
        let origin = Origin {
            interface: IfIndex(msg.transport.interface),
            protocol: IpProtocol::of(&source),
            flags,
        };

        let records: Vec<(&Resource, RecordData)> = message
            .answers
            .iter()
            .take(MAX_MESSAGE_RECORDS)
            .chain(message.additionals.iter().take(MAX_MESSAGE_RECORDS))
            .filter_map(|resource| Some((resource, RecordData::from_resource(resource)?)))
            .collect();
        let targets: Vec<&Name> = records
            .iter()
            .filter_map(|(resource, data)| match data {
                RecordData::Srv { target, .. } if self.wants_instance(&resource.header.name) => {
                    Some(target)
                }
                _ => None,
            })
            .collect();
        let wanted: Vec<bool> = records
            .iter()
            .map(|(resource, data)| self.wants_record(&resource.header.name, data, &targets))
            .collect();

        for ((resource, data), wanted) in records.into_iter().zip(wanted) {
            if !wanted {
                log::trace!("ignoring unsolicited {} record {}", data.typ(), resource.header.name);
                continue;
            }
            self.process_record(&resource.header.name, resource.header.ttl, data, origin, msg.now);
        }

        self.advance_resolves(msg.now);
    }

    /// Whether `name` is the SRV/TXT owner an active browse or resolution
    /// may need: a resolved instance, or an instance of a browsed type.
    fn wants_instance(&self, name: &Name) -> bool {
        if self
            .resolves
            .iter()
            .any(|resolve| resolve.fullname.eq_ignore_case(name))
        {
            return true;
        }
        let Ok(labels) = name.labels() else {
            return false;
        };
        self.browses.iter().any(|browse| match browse.question.labels() {
            Ok(question) => {
                labels.len() == question.len() + 1
                    && labels[1..]
                        .iter()
                        .zip(&question)
                        .all(|(a, b)| a.eq_ignore_ascii_case(b))
            }
            Err(_) => false,
        })
    }

    /// Whether `name` is an SRV target, either in `targets` or in the cache.
    fn wants_host(&self, name: &Name, targets: &[&Name]) -> bool {
        if targets.iter().any(|target| target.eq_ignore_case(name)) {
            return true;
        }
        self.cache
            .iter()
            .filter(|((_, typ), _)| *typ == DnsType::Srv)
            .flat_map(|(_, records)| records)
            .any(|record| {
                matches!(&record.data, RecordData::Srv { target, .. } if target.eq_ignore_case(name))
            })
    }

    fn wants_record(&self, name: &Name, data: &RecordData, targets: &[&Name]) -> bool {
        match data {
            RecordData::Ptr(_) => self
                .browses
                .iter()
                .any(|browse| browse.question.eq_ignore_case(name)),
            RecordData::Srv { .. } | RecordData::Txt(_) => self.wants_instance(name),
            RecordData::A(_) | RecordData::Aaaa(_) => self.wants_host(name, targets),
        }
    }

    /// Makes room for one more record. Expired records go first, then the
    /// ones closest to expiry.
    fn make_room(&mut self, now: Instant) -> bool {
        let max = self.config.max_cache_entries;
        if max == 0 {
            return false;
        }
        if self.cached_record_count() >= max {
            self.purge_cache(now);
        }
        while self.cached_record_count() >= max {
            let soonest = self
                .cache
                .iter()
                .flat_map(|(key, records)| {
                    records
                        .iter()
                        .enumerate()
                        .map(move |(i, record)| (record.expires, key, i))
                })
                .min_by_key(|(expires, ..)| *expires)
                .map(|(_, key, i)| (key.clone(), i));
            let Some((key, i)) = soonest else {
                break;
            };
            if let Some(records) = self.cache.get_mut(&key) {
                let evicted = records.remove(i);
                log::debug!("cache full, evicting {} record {}", evicted.data.typ(), key.0);
                if records.is_empty() {
                    self.cache.remove(&key);
                }
            }
        }
        true
    }

    fn purge_cache(&mut self, now: Instant) {
        for records in self.cache.values_mut() {
            records.retain(|record| record.expires > now);
        }
        self.cache.retain(|_, records| !records.is_empty());
    }

    fn process_record(&mut self, name: &Name, ttl: u32, data: RecordData, origin: Origin, now: Instant) {
        let key = (name.key(), data.typ());

        if ttl == 0 {
            if let Some(records) = self.cache.get_mut(&key) {
                records.retain(|record| record.data != data);
            }
            if let RecordData::Ptr(target) = &data {
                for browse in &mut self.browses {
                    if browse.question.eq_ignore_case(name)
                        && let Some(event) = remove_instance(browse, target, origin)
                    {
                        self.event_outs.push_back(event);
                    }
                }
            }
            return;
        }

        let expires = after(now, Duration::from_secs(u64::from(ttl)));
        if let RecordData::Ptr(target) = &data {
            let max_known = self.config.max_cache_entries;
            for browse in &mut self.browses {
                if browse.question.eq_ignore_case(name)
                    && let Some(event) = add_instance(browse, target, origin, expires, max_known)
                {
                    self.event_outs.push_back(event);
                }
            }
        }

        if let Some(record) = self
            .cache
            .get_mut(&key)
            .and_then(|records| records.iter_mut().find(|record| record.data == data))
        {
            record.expires = expires;
            record.flags = origin.flags;
            return;
        }
        if !self.make_room(now) {
            return;
        }
        self.cache.entry(key).or_default().push(CachedRecord {
            data,
            expires,
            flags: origin.flags,
        });
    }

    /// Completes what can be completed and asks for target addresses once
    /// a resolution learns its SRV target.
    fn advance_resolves(&mut self, now: Instant) {
        let resolves = std::mem::take(&mut self.resolves);
        let mut pending = Vec::with_capacity(resolves.len());
        let mut questions = Vec::new();
        for mut resolve in resolves {
            if let Some(result) = self.lookup(&resolve, now) {
                log::debug!("resolve {} completed", resolve.id);
                self.event_outs
                    .push_back(DnsSdEvent::Resolved(resolve.id, result));
                continue;
            }
            if !resolve.host_queried
                && let Some((_, target, _)) = self.find_srv(&resolve.fullname, now)
            {
                resolve.host_queried = true;
                for typ in address_types(&resolve) {
                    questions.push((target.clone(), typ));
                }
            }
            pending.push(resolve);
        }
        self.resolves = pending;
        self.send_questions(questions, now);
    }

    fn expire(&mut self, now: Instant) {
        self.purge_cache(now);

        for browse in &mut self.browses {
            let expired: Vec<InstanceKey> = browse
                .known
                .iter()
                .filter(|(_, known)| known.expires <= now)
                .map(|(key, _)| key.clone())
                .collect();
            for key in expired {
                if let Some(known) = browse.known.remove(&key) {
                    log::debug!("{} '{}' expired", browse.id, known.instance.name);
                    self.event_outs.push_back(DnsSdEvent::InstanceRemoved(
                        browse.id,
                        known.instance,
                        known.flags,
                    ));
                }
            }
        }
    }

    fn next_deadline(&self) -> Option<Instant> {
        let browses = self.browses.iter().flat_map(|browse| {
            std::iter::once(browse.next_query)
                .chain(browse.all_for_now_at)
                .chain(browse.known.values().map(|known| known.expires))
        });
        let resolves = self
            .resolves
            .iter()
            .flat_map(|resolve| [resolve.next_query, resolve.deadline]);
        browses.chain(resolves).min()
    }
}

/// `now + delay`, clamped so that arming a timer never overflows.
fn after(now: Instant, delay: Duration) -> Instant {
    let delay = delay.min(MAX_TIMER_DELAY);
    now.checked_add(delay).unwrap_or(now)
}

/// Address record types to look for, in order of preference.
fn address_types(resolve: &Resolve) -> Vec<DnsType> {
    match resolve.family {
        IpProtocol::Inet => vec![DnsType::A],
        IpProtocol::Inet6 => vec![DnsType::Aaaa],
        IpProtocol::Unspec if resolve.instance.protocol == IpProtocol::Inet6 => {
            vec![DnsType::Aaaa, DnsType::A]
        }
        IpProtocol::Unspec => vec![DnsType::A, DnsType::Aaaa],
    }
}

/// Splits a PTR target `<instance>.<app>.<transport>.<domain>` into an
/// instance of the browsed type.
fn instance_of(browse: &Browse, target: &Name, origin: Origin) -> Option<ServiceInstance> {
    let labels = match target.labels() {
        Ok(labels) => labels,
        Err(err) => {
            log::warn!("{} malformed PTR target {target}: {err}", browse.id);
            return None;
        }
    };
    if labels.len() < 3 {
        return None;
    }
    let service_type = format!(
        "{}.{}",
        String::from_utf8_lossy(&labels[1]),
        String::from_utf8_lossy(&labels[2])
    );
    if !service_type.eq_ignore_ascii_case(browse.service_type.as_str()) {
        log::trace!("{} PTR target {target} is not a {}", browse.id, browse.service_type);
        return None;
    }
    let domain = labels[3..]
        .iter()
        .map(|label| String::from_utf8_lossy(label).into_owned())
        .collect::<Vec<String>>()
        .join(".");

    Some(ServiceInstance {
        interface: origin.interface,
        protocol: origin.protocol,
        name: String::from_utf8_lossy(&labels[0]).into_owned(),
        service_type: browse.service_type.clone(),
        domain: if domain.is_empty() {
            DEFAULT_DOMAIN.to_owned()
        } else {
            domain
        },
    })
}

fn instance_key(instance: &ServiceInstance) -> InstanceKey {
    (
        instance.interface,
        instance.protocol,
        instance.name.to_lowercase(),
    )
}

fn add_instance(
    browse: &mut Browse,
    target: &Name,
    origin: Origin,
    expires: Instant,
    max_known: usize,
) -> Option<DnsSdEvent> {
    let instance = instance_of(browse, target, origin)?;
    let key = instance_key(&instance);
    if let Some(known) = browse.known.get_mut(&key) {
        known.expires = expires;
        return None;
    }
    if browse.known.len() >= max_known {
        log::warn!("{} tracks {max_known} instances, ignoring '{}'", browse.id, instance.name);
        return None;
    }
    log::debug!("{} new instance '{}'", browse.id, instance.name);
    browse.known.insert(
        key,
        KnownInstance {
            instance: instance.clone(),
            flags: origin.flags,
            expires,
        },
    );
    Some(DnsSdEvent::InstanceAdded(browse.id, instance, origin.flags))
}

fn remove_instance(browse: &mut Browse, target: &Name, origin: Origin) -> Option<DnsSdEvent> {
    let instance = instance_of(browse, target, origin)?;
    let known = browse.known.remove(&instance_key(&instance))?;
    log::debug!("{} instance '{}' said goodbye", browse.id, instance.name);
    Some(DnsSdEvent::InstanceRemoved(browse.id, known.instance, origin.flags))
}

impl sansio::Protocol<TaggedBytesMut, (), ()> for DnsSd {
    type Rout = ();
    type Wout = TaggedBytesMut;
    type Eout = DnsSdEvent;
    type Error = Error;
    type Time = Instant;

    /// Process an incoming mDNS packet.
    ///
    /// Queries are ignored. Records of a response are cached, PTR records
    /// for a browsed type produce instance events, and pending resolutions
    /// complete once everything they need is cached.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ErrConnectionClosed`] if the engine has been closed.
    fn handle_read(&mut self, msg: TaggedBytesMut) -> Result<()> {
        self.check_open()?;
        self.process_message(&msg);
        Ok(())
    }

    /// DNS-SD doesn't produce read outputs; see `poll_event()`.
    fn poll_read(&mut self) -> Option<Self::Rout> {
        None
    }

    fn handle_write(&mut self, _msg: ()) -> Result<()> {
        Ok(())
    }

    /// Get the next packet to send to `packet.transport.peer_addr`.
    fn poll_write(&mut self) -> Option<Self::Wout> {
        self.write_outs.pop_front()
    }

    fn handle_event(&mut self, _evt: ()) -> Result<()> {
        Ok(())
    }

    fn poll_event(&mut self) -> Option<Self::Eout> {
        self.event_outs.pop_front()
    }

    /// Retries queries, fails resolutions past their deadline, reports
    /// `ALL_FOR_NOW` and expires cached records and instances.
    ///
    /// ```rust
    /// use sdbrowse::{DnsSd, DnsSdConfig, ServiceType};
    /// use sansio::Protocol;
    /// use std::time::{Duration, Instant};
    ///
    /// let mut engine = DnsSd::new(
    ///     DnsSdConfig::default().with_query_interval(Duration::from_millis(100)),
    /// );
    /// let now = Instant::now();
    /// engine.browse(&ServiceType::new("_http._tcp").unwrap(), now).unwrap();
    /// engine.poll_write();
    ///
    /// engine.handle_timeout(now + Duration::from_millis(150)).unwrap();
    /// assert!(engine.poll_write().is_some());
    /// ```
    fn handle_timeout(&mut self, now: Self::Time) -> Result<()> {
        self.check_open()?;

        let mut timed_out = Vec::new();
        self.resolves.retain(|resolve| {
            if resolve.deadline <= now {
                timed_out.push(resolve.id);
                false
            } else {
                true
            }
        });
        for id in timed_out {
            log::debug!("resolve {id} timed out");
            self.event_outs
                .push_back(DnsSdEvent::ResolveFailed(id, RESOLVE_TIMEOUT_REASON.to_owned()));
        }

        self.expire(now);

        let max_interval = self.config.max_query_interval.max(self.query_interval);
        let mut questions = Vec::new();
        for browse in &mut self.browses {
            if let Some(at) = browse.all_for_now_at
                && at <= now
            {
                browse.all_for_now_at = None;
                self.event_outs
                    .push_back(DnsSdEvent::Milestone(browse.id, Milestone::AllForNow));
            }
            if browse.next_query <= now {
                questions.push((browse.question.clone(), DnsType::Ptr));
                browse.interval = browse.interval.saturating_mul(2).min(max_interval);
                browse.next_query = after(now, browse.interval);
            }
        }

        let mut resolves = std::mem::take(&mut self.resolves);
        for resolve in &mut resolves {
            if resolve.next_query <= now {
                questions.extend(self.resolve_questions(resolve, now));
                resolve.interval = resolve.interval.saturating_mul(2).min(max_interval);
                resolve.next_query = after(now, resolve.interval);
            }
        }
        self.resolves = resolves;

        self.send_questions(questions, now);
        Ok(())
    }

    fn poll_timeout(&mut self) -> Option<Self::Time> {
        if self.closed {
            None
        } else {
            self.next_deadline()
        }
    }

    /// Drops every browse, resolution, cached record and queued packet or
    /// event. Afterwards `handle_read()` and `handle_timeout()` fail with
    /// [`Error::ErrConnectionClosed`].
    fn close(&mut self) -> Result<()> {
        self.closed = true;
        self.browses.clear();
        self.resolves.clear();
        self.cache.clear();
        self.write_outs.clear();
        self.event_outs.clear();
        Ok(())
    }
}
