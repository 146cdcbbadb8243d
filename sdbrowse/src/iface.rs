//! Local network interfaces, used to attribute received packets to an
//! interface index and to recognise our own announcements.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use crate::types::IfIndex;
use shared::error::Result;

/// One address of a local interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceEntry {
    pub name: String,
    pub index: IfIndex,
    pub ip: IpAddr,
    pub netmask: IpAddr,
    pub loopback: bool,
}

impl InterfaceEntry {
    /// Whether `addr` lies in this entry's subnet.
    pub fn contains(&self, addr: &IpAddr) -> bool {
        match (self.ip, self.netmask, addr) {
            (IpAddr::V4(ip), IpAddr::V4(mask), IpAddr::V4(addr)) => {
                let mask = u32::from(mask);
                u32::from(ip) & mask == u32::from(*addr) & mask
            }
            (IpAddr::V6(ip), IpAddr::V6(mask), IpAddr::V6(addr)) => {
                let mask = u128::from(mask);
                u128::from(ip) & mask == u128::from(*addr) & mask
            }
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct InterfaceTable {
    entries: Vec<InterfaceEntry>,
}

impl InterfaceTable {
    /// Reads the addresses of all local interfaces.
    pub fn load() -> Result<Self> {
        let mut entries = Vec::new();
        for iface in if_addrs::get_if_addrs()? {
            let index = match nix::net::if_::if_nametoindex(iface.name.as_str()) {
                Ok(index) => IfIndex(index),
                Err(err) => {
                    log::debug!("no index for interface {}: {err}", iface.name);
                    IfIndex::UNSPEC
                }
            };
            let netmask = match &iface.addr {
                if_addrs::IfAddr::V4(v4) => IpAddr::V4(v4.netmask),
                if_addrs::IfAddr::V6(v6) => IpAddr::V6(v6.netmask),
            };
            entries.push(InterfaceEntry {
                loopback: iface.is_loopback(),
                ip: iface.ip(),
                name: iface.name,
                index,
                netmask,
            });
        }
        log::trace!("loaded {} interface addresses", entries.len());
        Ok(Self { entries })
    }

    pub fn from_entries(entries: Vec<InterfaceEntry>) -> Self {
        Self { entries }
    }

    pub fn entries(&self) -> &[InterfaceEntry] {
        &self.entries
    }

    /// Index of the interface a packet from `peer` most likely arrived on:
    /// the one owning the address, else the first whose subnet contains it.
    pub fn index_for(&self, peer: &IpAddr) -> IfIndex {
        self.entries
            .iter()
            .find(|entry| entry.ip == *peer)
            .or_else(|| {
                self.entries
                    .iter()
                    .find(|entry| !entry.loopback && entry.contains(peer))
            })
            .map(|entry| entry.index)
            .unwrap_or(IfIndex::UNSPEC)
    }

    /// Whether `addr` belongs to this host.
    pub fn is_local(&self, addr: &IpAddr) -> bool {
        addr.is_loopback() || self.entries.iter().any(|entry| entry.ip == *addr)
    }

    pub fn name_of(&self, index: IfIndex) -> Option<&str> {
        self.entries
            .iter()
            .find(|entry| entry.index == index)
            .map(|entry| entry.name.as_str())
    }

    pub fn local_addresses(&self) -> Vec<IpAddr> {
        self.entries.iter().map(|entry| entry.ip).collect()
    }
}

pub(crate) fn unspecified(v6: bool) -> IpAddr {
    if v6 {
        IpAddr::V6(Ipv6Addr::UNSPECIFIED)
    } else {
        IpAddr::V4(Ipv4Addr::UNSPECIFIED)
    }
}
