//! Interface snapshots.

use std::collections::BTreeSet;
use std::fmt;
use std::net::IpAddr;

/// Operational status of an interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum InterfaceStatus {
    /// The interface is up.
    Up,
    /// The interface is administratively or operationally down.
    Down,
    /// The platform did not report a status.
    #[default]
    Unknown,
}

impl fmt::Display for InterfaceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InterfaceStatus::Up => write!(f, "up"),
            InterfaceStatus::Down => write!(f, "down"),
            InterfaceStatus::Unknown => write!(f, "unknown"),
        }
    }
}

/// Coarse classification of an interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum InterfaceKind {
    /// Wired Ethernet.
    Wired,
    /// Wireless LAN.
    Wifi,
    /// Cellular / WWAN.
    Cellular,
    /// Loopback.
    Loopback,
    /// Tunnels, bridges and other virtual devices.
    Virtual,
    /// Unclassified.
    #[default]
    Unknown,
}

impl InterfaceKind {
    /// Stable string tag for this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            InterfaceKind::Wired => "wired",
            InterfaceKind::Wifi => "wifi",
            InterfaceKind::Cellular => "cellular",
            InterfaceKind::Loopback => "loopback",
            InterfaceKind::Virtual => "virtual",
            InterfaceKind::Unknown => "unknown",
        }
    }

    /// Guess the kind from a conventional interface name.
    ///
    /// Used when the platform does not report a link type.
    pub fn from_name(name: &str) -> Self {
        let name = name.to_ascii_lowercase();
        let starts = |prefixes: &[&str]| prefixes.iter().any(|p| name.starts_with(p));

        if name == "lo" || starts(&["lo0", "loopback"]) {
            InterfaceKind::Loopback
        } else if starts(&["wlan", "wlp", "wlx", "wifi"]) {
            InterfaceKind::Wifi
        } else if starts(&["wwan", "rmnet", "ccmni", "pdp_ip", "usb"]) {
            InterfaceKind::Cellular
        } else if starts(&["eth", "enp", "eno", "ens", "enx", "em"]) {
            InterfaceKind::Wired
        } else if starts(&[
            "tun", "tap", "utun", "wg", "veth", "docker", "br", "virbr", "vmnet", "ppp", "ipsec",
        ]) {
            InterfaceKind::Virtual
        } else {
            InterfaceKind::Unknown
        }
    }

    /// Whether traffic over this kind is metered unless the OS says otherwise.
    pub fn is_metered(&self) -> bool {
        matches!(self, InterfaceKind::Cellular)
    }
}

impl fmt::Display for InterfaceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time description of one network interface.
///
/// Snapshots are immutable. Two snapshots are equal when every field
/// matches, with addresses compared as a set.
#[derive(Debug, Clone)]
pub struct InterfaceSnapshot {
    name: String,
    index: u32,
    addresses: Vec<IpAddr>,
    status: InterfaceStatus,
    kind: InterfaceKind,
    is_expensive: bool,
}

impl InterfaceSnapshot {
    /// Start building a snapshot for the interface with the given index and name.
    pub fn builder(index: u32, name: impl Into<String>) -> InterfaceSnapshotBuilder {
        InterfaceSnapshotBuilder {
            name: name.into(),
            index,
            addresses: Vec::new(),
            status: InterfaceStatus::Unknown,
            kind: InterfaceKind::Unknown,
            is_expensive: None,
        }
    }

    /// Interface name (e.g., "eth0", "en0").
    pub fn name(&self) -> &str {
        &self.name
    }

    /// OS interface index.
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Assigned IP addresses, in OS order.
    pub fn addresses(&self) -> &[IpAddr] {
        &self.addresses
    }

    /// Operational status.
    pub fn status(&self) -> InterfaceStatus {
        self.status
    }

    /// Interface classification.
    pub fn kind(&self) -> InterfaceKind {
        self.kind
    }

    /// Whether the interface is metered or otherwise costly.
    pub fn is_expensive(&self) -> bool {
        self.is_expensive
    }

    /// Whether the interface is up.
    pub fn is_up(&self) -> bool {
        self.status == InterfaceStatus::Up
    }

    /// Whether this is a loopback interface.
    pub fn is_loopback(&self) -> bool {
        self.kind == InterfaceKind::Loopback
    }

    /// Whether at least one address is assigned.
    pub fn has_addresses(&self) -> bool {
        !self.addresses.is_empty()
    }

    /// Whether the interface can carry traffic to a remote peer.
    pub fn is_usable(&self) -> bool {
        self.is_up() && !self.is_loopback() && self.has_addresses()
    }

    /// Pick a source address of the requested family.
    ///
    /// Global IPv6 addresses are preferred over link-local ones.
    pub fn address_for_family(&self, ipv6: bool) -> Option<IpAddr> {
        let mut matching = self.addresses.iter().filter(|addr| addr.is_ipv6() == ipv6);
        if !ipv6 {
            return matching.next().copied();
        }
        let candidates: Vec<&IpAddr> = matching.collect();
        candidates
            .iter()
            .find(|addr| match addr {
                IpAddr::V6(v6) => !v6.is_unicast_link_local(),
                IpAddr::V4(_) => false,
            })
            .or_else(|| candidates.first())
            .map(|addr| **addr)
    }

    fn address_set(&self) -> BTreeSet<IpAddr> {
        self.addresses.iter().copied().collect()
    }
}

impl PartialEq for InterfaceSnapshot {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index
            && self.name == other.name
            && self.status == other.status
            && self.kind == other.kind
            && self.is_expensive == other.is_expensive
            && self.address_set() == other.address_set()
    }
}

impl Eq for InterfaceSnapshot {}

impl fmt::Display for InterfaceSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (#{}, {}, {})", self.name, self.index, self.kind, self.status)
    }
}

/// Builder for [`InterfaceSnapshot`].
#[derive(Debug, Clone)]
pub struct InterfaceSnapshotBuilder {
    name: String,
    index: u32,
    addresses: Vec<IpAddr>,
    status: InterfaceStatus,
    kind: InterfaceKind,
    is_expensive: Option<bool>,
}

impl InterfaceSnapshotBuilder {
    /// Add an address.
    pub fn address(mut self, address: impl Into<IpAddr>) -> Self {
        self.addresses.push(address.into());
        self
    }

    /// Add several addresses.
    pub fn addresses(mut self, addresses: impl IntoIterator<Item = IpAddr>) -> Self {
        self.addresses.extend(addresses);
        self
    }

    /// Set the status.
    pub fn status(mut self, status: InterfaceStatus) -> Self {
        self.status = status;
        self
    }

    /// Set the kind.
    pub fn kind(mut self, kind: InterfaceKind) -> Self {
        self.kind = kind;
        self
    }

    /// Override the expensive flag. Defaults to true for cellular interfaces.
    pub fn expensive(mut self, is_expensive: bool) -> Self {
        self.is_expensive = Some(is_expensive);
        self
    }

    /// Finish the snapshot.
    pub fn build(self) -> InterfaceSnapshot {
        let is_expensive = self.is_expensive.unwrap_or_else(|| self.kind.is_metered());
        InterfaceSnapshot {
            name: self.name,
            index: self.index,
            addresses: self.addresses,
            status: self.status,
            kind: self.kind,
            is_expensive,
        }
    }
}
