//! Configuration for browsing and for the bundled multicast DNS-SD client.
//!
//! # Examples
//!
//! ```rust
//! use sdbrowse::{BrowseConfig, ClientFlags, DnsSdConfig, IpProtocol, ServiceType};
//! use std::time::Duration;
//!
//! let dns_sd = DnsSdConfig::default()
//!     .with_resolve_timeout(Duration::from_secs(10))
//!     .with_all_for_now_delay(Duration::from_millis(500));
//!
//! let browse = BrowseConfig::new(ServiceType::new("_http._tcp").unwrap())
//!     .with_client_flags(ClientFlags::IGNORE_OWN)
//!     .with_family(IpProtocol::Inet);
//! ```

use std::net::Ipv4Addr;
use std::time::Duration;

use crate::client::ClientFlags;
use crate::types::{IpProtocol, ServiceType};

/// Service type browsed when none is configured.
pub const DEFAULT_SERVICE_TYPE: &str = "_machinekit._tcp";

/// Delay before the first browse retry; doubled after every retry.
pub(crate) const DEFAULT_QUERY_INTERVAL: Duration = Duration::from_secs(1);

/// Upper bound for the browse retry interval (60 minutes).
pub(crate) const DEFAULT_MAX_QUERY_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// How long a resolution may take before it fails.
pub(crate) const DEFAULT_RESOLVE_TIMEOUT: Duration = Duration::from_secs(5);

/// How long after the browse starts `ALL_FOR_NOW` is reported.
pub(crate) const DEFAULT_ALL_FOR_NOW_DELAY: Duration = Duration::from_secs(1);

/// Receive buffer; mDNS packets may use the full jumbo-frame size.
pub(crate) const DEFAULT_RECV_BUFFER_SIZE: usize = 9000;

/// Records kept in the record cache at most.
pub(crate) const DEFAULT_MAX_CACHE_ENTRIES: usize = 4096;

/// Longest delay any timer is armed with; longer settings are clamped.
pub(crate) const MAX_TIMER_DELAY: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Records processed per message section; the rest is ignored.
pub(crate) const MAX_MESSAGE_RECORDS: usize = 64;

/// Configuration of the multicast DNS-SD client.
#[derive(Clone, Debug)]
pub struct DnsSdConfig {
    /// First retry interval of a browse query. Default: 1 second
    pub query_interval: Duration,

    /// Retry intervals double up to this bound. Default: 60 minutes
    pub max_query_interval: Duration,

    /// A resolution that has not completed after this long is reported as
    /// failed. Default: 5 seconds
    pub resolve_timeout: Duration,

    /// Delay after which a browse reports `ALL_FOR_NOW`. Default: 1 second
    pub all_for_now_delay: Duration,

    /// IPv4 address of the interface used to join the multicast group.
    /// `None` lets the kernel pick.
    pub multicast_interface: Option<Ipv4Addr>,

    /// Size of the datagram receive buffer. Default: 9000 bytes
    pub recv_buffer_size: usize,

    /// Upper bound on cached records, and on instances a single browse
    /// tracks. When the cache is full the record closest to expiry is
    /// evicted. Default: 4096
    pub max_cache_entries: usize,
}

impl Default for DnsSdConfig {
    fn default() -> Self {
        Self {
            query_interval: DEFAULT_QUERY_INTERVAL,
            max_query_interval: DEFAULT_MAX_QUERY_INTERVAL,
            resolve_timeout: DEFAULT_RESOLVE_TIMEOUT,
            all_for_now_delay: DEFAULT_ALL_FOR_NOW_DELAY,
            multicast_interface: None,
            recv_buffer_size: DEFAULT_RECV_BUFFER_SIZE,
            max_cache_entries: DEFAULT_MAX_CACHE_ENTRIES,
        }
    }
}

impl DnsSdConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the first browse retry interval. Zero falls back to the default.
    ///
    /// Every duration of this config is clamped to one year.
    pub fn with_query_interval(mut self, interval: Duration) -> Self {
        self.query_interval = interval;
        self
    }

    pub fn with_max_query_interval(mut self, interval: Duration) -> Self {
        self.max_query_interval = interval;
        self
    }

    /// Set the resolve timeout.
    ///
    /// ```rust
    /// use sdbrowse::DnsSdConfig;
    /// use std::time::Duration;
    ///
    /// let config = DnsSdConfig::default().with_resolve_timeout(Duration::from_secs(2));
    /// assert_eq!(config.resolve_timeout, Duration::from_secs(2));
    /// ```
    pub fn with_resolve_timeout(mut self, timeout: Duration) -> Self {
        self.resolve_timeout = timeout;
        self
    }

    pub fn with_all_for_now_delay(mut self, delay: Duration) -> Self {
        self.all_for_now_delay = delay;
        self
    }

    pub fn with_multicast_interface(mut self, interface: Ipv4Addr) -> Self {
        self.multicast_interface = Some(interface);
        self
    }

    pub fn with_recv_buffer_size(mut self, size: usize) -> Self {
        self.recv_buffer_size = size;
        self
    }

    pub fn with_max_cache_entries(mut self, max: usize) -> Self {
        self.max_cache_entries = max;
        self
    }
}

/// What to browse for and how the core drives the client.
#[derive(Clone, Debug)]
pub struct BrowseConfig {
    pub service_type: ServiceType,
    pub client_flags: ClientFlags,
    /// Address family resolvers ask for. Default: either
    pub family: IpProtocol,
}

impl BrowseConfig {
    pub fn new(service_type: ServiceType) -> Self {
        Self {
            service_type,
            client_flags: ClientFlags::NONE,
            family: IpProtocol::Unspec,
        }
    }

    pub fn with_client_flags(mut self, flags: ClientFlags) -> Self {
        self.client_flags = flags;
        self
    }

    pub fn with_family(mut self, family: IpProtocol) -> Self {
        self.family = family;
        self
    }
}
