//! Socket utilities for mDNS.
//!
//! [`MulticastSocket`] builds the non-blocking UDP socket the bundled client
//! listens on.
//!
//! ```rust,ignore
//! use sdbrowse::MulticastSocket;
//!
//! let socket = MulticastSocket::new()
//!     .with_recv_buffer_size(9000)
//!     .into_std()?;
//! ```

use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};

use socket2::{Domain, Protocol, Socket, Type};

use crate::proto::{MDNS_MULTICAST_IPV4, MDNS_PORT};

/// A builder for UDP sockets joined to the mDNS group.
///
/// The resulting socket is:
///
/// - Bound to the mDNS port (on Linux to the group address itself, elsewhere
///   to `0.0.0.0`)
/// - Configured with `SO_REUSEADDR`, and `SO_REUSEPORT` where supported, so
///   it can share the port with a local responder
/// - Non-blocking
/// - Joined to 224.0.0.251 on the configured interface
#[derive(Debug, Clone, Default)]
pub struct MulticastSocket {
    local_ip: Option<Ipv4Addr>,
    local_port: Option<u16>,
    interface: Option<Ipv4Addr>,
    recv_buffer_size: Option<usize>,
}

impl MulticastSocket {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_local_ip(mut self, local_ip: Ipv4Addr) -> Self {
        self.local_ip = Some(local_ip);
        self
    }

    pub fn with_local_port(mut self, local_port: u16) -> Self {
        self.local_port = Some(local_port);
        self
    }

    /// Joins the group on the interface with this address instead of the
    /// kernel's choice (`INADDR_ANY`).
    pub fn with_interface(mut self, interface: Ipv4Addr) -> Self {
        self.interface = Some(interface);
        self
    }

    pub fn with_recv_buffer_size(mut self, size: usize) -> Self {
        self.recv_buffer_size = Some(size);
        self
    }

    fn bind_addr(&self) -> SocketAddr {
        let ip = if let Some(local_ip) = self.local_ip {
            local_ip
        } else if cfg!(target_os = "linux") {
            MDNS_MULTICAST_IPV4
        } else {
            // Binding to the group only works on Linux.
            Ipv4Addr::UNSPECIFIED
        };
        SocketAddr::new(IpAddr::V4(ip), self.local_port.unwrap_or(MDNS_PORT))
    }

    /// Creates, configures and binds the socket.
    ///
    /// # Errors
    ///
    /// Any failure to create the socket, set an option, bind, or join the
    /// multicast group.
    pub fn into_std(self) -> io::Result<UdpSocket> {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;

        socket.set_reuse_address(true)?;
        #[cfg(all(unix, not(target_os = "solaris"), not(target_os = "illumos")))]
        socket.set_reuse_port(true)?;
        socket.set_nonblocking(true)?;
        if let Some(size) = self.recv_buffer_size {
            socket.set_recv_buffer_size(size)?;
        }
        socket.set_multicast_loop_v4(true)?;

        let addr = self.bind_addr();
        socket.bind(&addr.into())?;

        let iface = self.interface.unwrap_or(Ipv4Addr::UNSPECIFIED);
        socket.join_multicast_v4(&MDNS_MULTICAST_IPV4, &iface)?;
        if let Some(interface) = self.interface {
            socket.set_multicast_if_v4(&interface)?;
        }
        log::debug!("mDNS socket bound to {addr}, joined {MDNS_MULTICAST_IPV4} on {iface}");

        Ok(socket.into())
    }
}
