//! Identities and results flowing through the browse/resolve pipeline.

use std::fmt;
use std::net::IpAddr;
use std::ops::{BitOr, BitOrAssign};
use std::str::FromStr;

use shared::error::{Error, Result};

/// Domain browsed when none is given.
pub const DEFAULT_DOMAIN: &str = "local";

/// A DNS-SD service type such as `_machinekit._tcp`.
///
/// The type is an application label followed by the transport label, both
/// underscore-prefixed. A trailing dot is accepted and dropped.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServiceType(String);

impl ServiceType {
    pub fn new(service_type: &str) -> Result<Self> {
        let trimmed = service_type.strip_suffix('.').unwrap_or(service_type);
        let invalid = || Error::ErrInvalidServiceType(service_type.to_owned());

        let (application, transport) = trimmed.split_once('.').ok_or_else(invalid)?;
        let app_label = application.strip_prefix('_').ok_or_else(invalid)?;
        if app_label.is_empty() || app_label.len() > 62 || app_label.contains(['\\', '.']) {
            return Err(invalid());
        }
        if !transport.eq_ignore_ascii_case("_tcp") && !transport.eq_ignore_ascii_case("_udp") {
            return Err(invalid());
        }

        Ok(ServiceType(trimmed.to_owned()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for ServiceType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        ServiceType::new(s)
    }
}

impl fmt::Display for ServiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Network interface index; `0` stands for "any interface".
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IfIndex(pub u32);

impl IfIndex {
    pub const UNSPEC: IfIndex = IfIndex(0);
}

impl fmt::Display for IfIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Network-protocol family of an instance or of a resolver's address
/// preference.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Hash)]
pub enum IpProtocol {
    Inet,
    Inet6,
    #[default]
    Unspec,
}

impl IpProtocol {
    pub fn of(addr: &IpAddr) -> IpProtocol {
        match addr {
            IpAddr::V4(_) => IpProtocol::Inet,
            IpAddr::V6(_) => IpProtocol::Inet6,
        }
    }

    /// Whether an address of this family satisfies the preference.
    pub fn accepts(&self, addr: &IpAddr) -> bool {
        match self {
            IpProtocol::Unspec => true,
            family => *family == IpProtocol::of(addr),
        }
    }
}

impl fmt::Display for IpProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match *self {
            IpProtocol::Inet => "IPv4",
            IpProtocol::Inet6 => "IPv6",
            IpProtocol::Unspec => "any",
        };
        write!(f, "{s}")
    }
}

/// One advertised service, identified by where it was seen and what it is
/// called.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServiceInstance {
    pub interface: IfIndex,
    pub protocol: IpProtocol,
    pub name: String,
    pub service_type: ServiceType,
    pub domain: String,
}

impl ServiceInstance {
    /// The instance's DNS name, e.g. `device-a._example._tcp.local.`, with
    /// dots and backslashes inside the instance label escaped.
    pub fn fullname(&self) -> String {
        let mut label = String::with_capacity(self.name.len());
        for c in self.name.chars() {
            if c == '.' || c == '\\' {
                label.push('\\');
            }
            label.push(c);
        }
        format!(
            "{label}.{}.{}.",
            self.service_type,
            self.domain.trim_end_matches('.')
        )
    }
}

/// Flags describing where a browse event or resolution result came from.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Hash)]
pub struct LookupFlags(u32);

impl LookupFlags {
    pub const NONE: LookupFlags = LookupFlags(0);
    /// Answered from the record cache.
    pub const CACHED: LookupFlags = LookupFlags(1);
    /// Came from wide-area DNS.
    pub const WIDE_AREA: LookupFlags = LookupFlags(1 << 1);
    /// Came from multicast DNS.
    pub const MULTICAST: LookupFlags = LookupFlags(1 << 2);
    /// The record originates from this host.
    pub const LOCAL: LookupFlags = LookupFlags(1 << 3);
    /// The record was announced by this process's own address.
    pub const OUR_OWN: LookupFlags = LookupFlags(1 << 4);

    pub fn contains(&self, other: LookupFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn bits(&self) -> u32 {
        self.0
    }
}

impl BitOr for LookupFlags {
    type Output = LookupFlags;

    fn bitor(self, rhs: LookupFlags) -> LookupFlags {
        LookupFlags(self.0 | rhs.0)
    }
}

impl BitOrAssign for LookupFlags {
    fn bitor_assign(&mut self, rhs: LookupFlags) {
        self.0 |= rhs.0;
    }
}

impl fmt::Display for LookupFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NAMES: [(LookupFlags, &str); 5] = [
            (LookupFlags::CACHED, "cached"),
            (LookupFlags::WIDE_AREA, "wide-area"),
            (LookupFlags::MULTICAST, "multicast"),
            (LookupFlags::LOCAL, "local"),
            (LookupFlags::OUR_OWN, "our-own"),
        ];
        let names: Vec<&str> = NAMES
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect();
        if names.is_empty() {
            write!(f, "none")
        } else {
            write!(f, "{}", names.join("|"))
        }
    }
}

/// The text metadata of a service, one `key=value` string per entry.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TxtRecord(pub Vec<String>);

impl TxtRecord {
    /// Looks up the value of `key`; keys compare case-insensitively.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.iter().find_map(|entry| {
            let (k, v) = entry.split_once('=').unwrap_or((entry.as_str(), ""));
            k.eq_ignore_ascii_case(key).then_some(v)
        })
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for TxtRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let quoted: Vec<String> = self.0.iter().map(|s| format!("\"{s}\"")).collect();
        write!(f, "{}", quoted.join(" "))
    }
}

/// A successfully resolved instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolutionResult {
    pub instance: ServiceInstance,
    pub host_name: String,
    pub address: IpAddr,
    pub port: u16,
    pub txt: TxtRecord,
    pub flags: LookupFlags,
}
