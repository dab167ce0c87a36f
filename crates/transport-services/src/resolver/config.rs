//! Name lookup configuration.

use std::net::SocketAddr;
use std::time::Duration;

/// Which address families a lookup asks for.
///
/// Racing needs both families, so anything narrower only makes sense on
/// single-stack hosts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum IpStrategy {
    /// Query A and AAAA records together.
    #[default]
    Both,
    /// Query A records only.
    Ipv4Only,
    /// Query AAAA records only.
    Ipv6Only,
}

/// Settings for [`HickoryLookup`](super::HickoryLookup).
///
/// With no nameservers the host's resolver configuration is used.
#[derive(Debug, Clone)]
pub struct DnsConfig {
    /// Nameservers to query instead of the system ones.
    pub nameservers: Vec<SocketAddr>,
    /// Families to look up.
    pub ip_strategy: IpStrategy,
    /// Consult the hosts file before querying.
    pub use_hosts_file: bool,
    /// Per-query timeout. Kept well below the establishment deadline.
    pub timeout: Duration,
}

impl Default for DnsConfig {
    fn default() -> Self {
        Self {
            nameservers: Vec::new(),
            ip_strategy: IpStrategy::Both,
            use_hosts_file: true,
            timeout: Duration::from_secs(3),
        }
    }
}

impl DnsConfig {
    /// Use the host's resolver configuration.
    pub fn system() -> Self {
        Self::default()
    }

    /// Query only `nameservers`.
    pub fn nameservers(nameservers: impl IntoIterator<Item = SocketAddr>) -> Self {
        Self {
            nameservers: nameservers.into_iter().collect(),
            ..Self::default()
        }
    }

    /// Whether the system configuration applies.
    pub fn uses_system_config(&self) -> bool {
        self.nameservers.is_empty()
    }

    /// Set the families to look up.
    pub fn ip_strategy(mut self, strategy: IpStrategy) -> Self {
        self.ip_strategy = strategy;
        self
    }

    /// Enable or disable the hosts file.
    pub fn hosts_file(mut self, enabled: bool) -> Self {
        self.use_hosts_file = enabled;
        self
    }

    /// Set the per-query timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}
