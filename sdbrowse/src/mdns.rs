//! The bundled [`DiscoveryClient`]: the [`DnsSd`] engine on a multicast
//! socket, scheduled through the poll adapter.

use std::collections::{HashMap, VecDeque};
use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::os::fd::AsRawFd;
use std::time::Instant;

use bytes::BytesMut;
use sansio::Protocol;
use shared::{TaggedBytesMut, TransportContext, TransportMessage};

use crate::client::{
    BrowseEvent, BrowseId, ClientEvent, ClientFlags, ClientState, DiscoveryClient, ResolveOutcome,
};
use crate::config::DnsSdConfig;
use crate::iface::{InterfaceTable, unspecified};
use crate::poll::{Interest, Poll, PollEvent, TimeoutId, WatchId};
use crate::proto::{DnsSd, DnsSdEvent, ResolveId};
use crate::resolver::TaskKey;
use crate::socket::MulticastSocket;
use crate::types::{IfIndex, IpProtocol, ServiceInstance, ServiceType};
use shared::error::{Error, Result};

/// Multicast DNS-SD client.
///
/// Watches its socket for readability, and for writability while packets
/// are queued; one timeout follows the engine's next deadline. A socket
/// error other than would-block moves the client to
/// [`ClientState::Failure`].
pub struct MdnsClient {
    config: DnsSdConfig,
    socket: Option<UdpSocket>,
    engine: DnsSd,
    interfaces: InterfaceTable,

    watch: Option<WatchId>,
    timer: Option<TimeoutId>,
    interest: Interest,

    write_outs: VecDeque<TaggedBytesMut>,
    resolves: HashMap<ResolveId, TaskKey>,
    event_outs: VecDeque<ClientEvent>,
    state: ClientState,
    released: bool,
    buf: Vec<u8>,
}

impl MdnsClient {
    /// A client that binds its own multicast socket on connect.
    pub fn new(config: DnsSdConfig) -> Self {
        Self::build(config, None)
    }

    /// A client on an already bound socket.
    pub fn with_socket(config: DnsSdConfig, socket: UdpSocket) -> Self {
        Self::build(config, Some(socket))
    }

    fn build(config: DnsSdConfig, socket: Option<UdpSocket>) -> Self {
        let buf = vec![0u8; config.recv_buffer_size.max(512)];
        Self {
            engine: DnsSd::new(config.clone()),
            config,
            socket,
            interfaces: InterfaceTable::default(),
            watch: None,
            timer: None,
            interest: Interest::EMPTY,
            write_outs: VecDeque::new(),
            resolves: HashMap::new(),
            event_outs: VecDeque::new(),
            state: ClientState::Connecting,
            released: false,
            buf,
        }
    }

    pub fn state(&self) -> &ClientState {
        &self.state
    }

    pub fn pending_resolutions(&self) -> usize {
        self.resolves.len()
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.socket.as_ref()?.local_addr().ok()
    }

    fn check_ready(&self) -> Result<()> {
        if self.state == ClientState::Ready {
            Ok(())
        } else {
            Err(Error::ErrSessionNotReady)
        }
    }

    fn open_socket(&mut self) -> Result<&UdpSocket> {
        let socket = match self.socket.take() {
            Some(socket) => {
                socket.set_nonblocking(true)?;
                socket
            }
            None => {
                let mut builder =
                    MulticastSocket::new().with_recv_buffer_size(self.config.recv_buffer_size);
                if let Some(interface) = self.config.multicast_interface {
                    builder = builder.with_interface(interface);
                }
                builder.into_std()?
            }
        };
        Ok(&*self.socket.insert(socket))
    }

    /// Releases the socket registrations. Errors are logged; the
    /// registrations are gone either way.
    fn release(&mut self, poll: &mut dyn Poll) {
        if let Some(watch) = self.watch.take()
            && let Err(err) = poll.release_watch(watch)
        {
            log::warn!("releasing {watch}: {err}");
        }
        if let Some(timer) = self.timer.take()
            && let Err(err) = poll.release_timeout(timer)
        {
            log::warn!("releasing {timer}: {err}");
        }
        if let Err(err) = self.engine.close() {
            log::warn!("closing engine: {err}");
        }
        self.socket = None;
        self.write_outs.clear();
        self.resolves.clear();
        self.interest = Interest::EMPTY;
    }

    fn fail(&mut self, poll: &mut dyn Poll, reason: String) {
        if self.state.is_terminal() {
            return;
        }
        log::error!("mDNS client failure: {reason}");
        self.release(poll);
        self.state = ClientState::Failure(reason.clone());
        self.event_outs
            .push_back(ClientEvent::StateChanged(ClientState::Failure(reason)));
    }

    fn read_all(&mut self) -> Result<()> {
        let Some(socket) = self.socket.as_ref() else {
            return Ok(());
        };
        let local_addr = socket
            .local_addr()
            .unwrap_or_else(|_| SocketAddr::new(unspecified(false), 0));
        loop {
            match socket.recv_from(&mut self.buf) {
                Ok((n, peer_addr)) => {
                    let interface = self.interfaces.index_for(&peer_addr.ip());
                    log::trace!("received {n} bytes from {peer_addr} on interface {interface}");
                    self.engine.handle_read(TransportMessage {
                        now: Instant::now(),
                        transport: TransportContext {
                            local_addr,
                            peer_addr,
                            interface: interface.0,
                        },
                        message: BytesMut::from(&self.buf[..n]),
                    })?;
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err.into()),
            }
        }
    }

    fn flush(&mut self) -> Result<()> {
        let Some(socket) = self.socket.as_ref() else {
            return Ok(());
        };
        while let Some(packet) = self.write_outs.front() {
            match socket.send_to(&packet.message, packet.transport.peer_addr) {
                Ok(n) => {
                    log::trace!("sent {n} bytes to {}", packet.transport.peer_addr);
                    self.write_outs.pop_front();
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err.into()),
            }
        }
        Ok(())
    }

    /// Name of interface `index`. The interface list is read again when
    /// the index is not in it, since interfaces come and go.
    fn interface_name(&mut self, index: IfIndex) -> Option<String> {
        if index == IfIndex::UNSPEC {
            return None;
        }
        if self.interfaces.name_of(index).is_none() {
            match InterfaceTable::load() {
                Ok(table) => {
                    self.interfaces = table;
                    self.engine
                        .set_local_addresses(self.interfaces.local_addresses());
                }
                Err(err) => log::debug!("cannot list local interfaces: {err}"),
            }
        }
        self.interfaces.name_of(index).map(str::to_owned)
    }

    fn translate(&mut self, event: DnsSdEvent) {
        let event = match event {
            DnsSdEvent::InstanceAdded(id, instance, flags) => {
                ClientEvent::Browse(id, BrowseEvent::InstanceAdded(instance, flags))
            }
            DnsSdEvent::InstanceRemoved(id, instance, flags) => {
                let interface = self.interface_name(instance.interface);
                ClientEvent::Browse(id, BrowseEvent::InstanceRemoved(instance, flags, interface))
            }
            DnsSdEvent::Milestone(id, milestone) => {
                ClientEvent::Browse(id, BrowseEvent::SyncMilestone(milestone))
            }
            DnsSdEvent::Resolved(id, result) => match self.resolves.remove(&id) {
                Some(key) => ClientEvent::Resolve(key, ResolveOutcome::Resolved(result)),
                None => {
                    log::trace!("result for forgotten resolve {id}");
                    return;
                }
            },
            DnsSdEvent::ResolveFailed(id, reason) => match self.resolves.remove(&id) {
                Some(key) => ClientEvent::Resolve(key, ResolveOutcome::Failed(reason)),
                None => {
                    log::trace!("failure for forgotten resolve {id}");
                    return;
                }
            },
        };
        self.event_outs.push_back(event);
    }

    /// Moves packets and events out of the engine, sends what the socket
    /// takes, and brings interest and timer in line with what is left.
    fn pump(&mut self, poll: &mut dyn Poll) -> Result<()> {
        while let Some(packet) = self.engine.poll_write() {
            self.write_outs.push_back(packet);
        }
        if let Err(err) = self.flush() {
            self.fail(poll, err.to_string());
            return Ok(());
        }
        while let Some(event) = self.engine.poll_event() {
            self.translate(event);
        }

        if let Some(watch) = self.watch {
            let mut interest = Interest::READABLE;
            if !self.write_outs.is_empty() {
                interest |= Interest::WRITABLE;
            }
            if interest != self.interest {
                poll.update_interest(watch, interest)?;
                self.interest = interest;
            }
        }
        if let Some(timer) = self.timer {
            poll.reschedule(timer, self.engine.poll_timeout())?;
        }
        Ok(())
    }
}

impl DiscoveryClient for MdnsClient {
    fn connect(&mut self, poll: &mut dyn Poll, flags: ClientFlags) -> Result<()> {
        if self.watch.is_some() {
            return Ok(());
        }
        if self.released {
            return Err(Error::ErrSessionDisconnected);
        }
        self.event_outs
            .push_back(ClientEvent::StateChanged(ClientState::Connecting));

        let fd = self
            .open_socket()
            .map_err(|err| Error::ErrConnectionFailure(err.to_string()))?
            .as_raw_fd();

        self.interfaces = InterfaceTable::load().unwrap_or_else(|err| {
            log::warn!("cannot list local interfaces: {err}");
            InterfaceTable::default()
        });
        self.engine
            .set_local_addresses(self.interfaces.local_addresses());
        self.engine
            .set_ignore_own(flags.contains(ClientFlags::IGNORE_OWN));

        self.watch = Some(poll.register_watch(fd, Interest::READABLE)?);
        self.interest = Interest::READABLE;
        self.timer = Some(poll.register_timeout(None)?);

        self.state = ClientState::Ready;
        self.event_outs
            .push_back(ClientEvent::StateChanged(ClientState::Ready));
        log::debug!("mDNS client ready on {:?}", self.local_addr());
        Ok(())
    }

    fn disconnect(&mut self, poll: &mut dyn Poll) -> Result<()> {
        if self.released {
            return Ok(());
        }
        self.released = true;
        self.release(poll);
        self.event_outs.clear();
        if !self.state.is_terminal() {
            self.state = ClientState::Disconnected;
        }
        log::debug!("mDNS client disconnected");
        Ok(())
    }

    fn start_browsing(
        &mut self,
        poll: &mut dyn Poll,
        service_type: &ServiceType,
    ) -> Result<BrowseId> {
        self.check_ready()?;
        let id = self.engine.browse(service_type, Instant::now())?;
        self.pump(poll)?;
        Ok(id)
    }

    fn stop_browsing(&mut self, poll: &mut dyn Poll, id: BrowseId) -> Result<()> {
        if self.released || self.state.is_terminal() {
            return Ok(());
        }
        self.engine.cancel_browse(id)?;
        self.pump(poll)
    }

    fn start_resolving(
        &mut self,
        poll: &mut dyn Poll,
        key: TaskKey,
        instance: &ServiceInstance,
        family: IpProtocol,
    ) -> Result<()> {
        self.check_ready()?;
        let id = self.engine.resolve(instance, family, Instant::now())?;
        self.resolves.insert(id, key);
        self.pump(poll)
    }

    fn handle_poll_event(&mut self, poll: &mut dyn Poll, event: PollEvent) -> Result<()> {
        if self.state.is_terminal() {
            return Ok(());
        }
        match event {
            PollEvent::Ready(id, readiness) if Some(id) == self.watch => {
                if readiness.is_failure() {
                    let reason = self
                        .socket
                        .as_ref()
                        .and_then(|socket| socket.take_error().ok().flatten())
                        .map_or_else(|| "socket error".to_owned(), |err| err.to_string());
                    self.fail(poll, reason);
                    return Ok(());
                }
                if readiness.is_readable()
                    && let Err(err) = self.read_all()
                {
                    self.fail(poll, err.to_string());
                    return Ok(());
                }
                self.pump(poll)
            }
            PollEvent::Expired(id) if Some(id) == self.timer => {
                self.engine.handle_timeout(Instant::now())?;
                self.pump(poll)
            }
            other => {
                log::trace!("ignoring {other:?}");
                Ok(())
            }
        }
    }

    fn poll_event(&mut self) -> Option<ClientEvent> {
        self.event_outs.pop_front()
    }
}
