//! Endpoint resolution.
//!
//! Turns [`RemoteEndpoint`]s into an ordered list of [`ResolvedCandidate`]s,
//! one per (protocol stack, address) pair. Addresses of both families are
//! interleaved so a racing connector alternates between them (RFC 8305).

mod config;
mod lookup;

use std::collections::HashSet;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

pub use config::{DnsConfig, IpStrategy};
pub use lookup::{HickoryLookup, NameLookup, StaticLookup};

use crate::endpoint::RemoteEndpoint;
use crate::error::ResolutionError;
use crate::properties::ProtocolStack;

const TARGET: &str = "transport_services::resolver";

/// Local side a candidate is bound to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalBinding {
    /// Address (and port, 0 for any) to bind before connecting.
    pub address: SocketAddr,
    /// Interface the address belongs to, when known.
    pub interface: Option<String>,
    /// Whether that interface is expensive.
    pub is_expensive: bool,
}

/// One concrete attempt the establishment engine can make.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedCandidate {
    /// Remote socket address.
    pub address: SocketAddr,
    /// Protocol stack to attempt.
    pub stack: ProtocolStack,
    /// Hostname the address was resolved from, used for TLS server names.
    pub host: Option<String>,
    /// Local binding, if the preconnection constrains the local side.
    pub local: Option<LocalBinding>,
}

impl ResolvedCandidate {
    /// Create an unbound candidate.
    pub fn new(address: SocketAddr, stack: ProtocolStack) -> Self {
        Self {
            address,
            stack,
            host: None,
            local: None,
        }
    }

    /// Attach the hostname.
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    /// Attach a local binding.
    pub fn with_local(mut self, local: LocalBinding) -> Self {
        self.local = Some(local);
        self
    }

    /// Whether the candidate is bound to an expensive interface.
    pub fn is_expensive(&self) -> bool {
        self.local.as_ref().is_some_and(|local| local.is_expensive)
    }
}

impl fmt::Display for ResolvedCandidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} over {}", self.address, self.stack)?;
        if let Some(local) = &self.local {
            match &local.interface {
                Some(name) => write!(f, " via {name}")?,
                None => write!(f, " from {}", local.address)?,
            }
        }
        Ok(())
    }
}

/// Interleave address families, starting with the family of the first address.
///
/// Relative order within each family is kept and duplicates are dropped.
pub fn interleave_families(addresses: Vec<IpAddr>) -> Vec<IpAddr> {
    let mut seen = HashSet::new();
    let unique: Vec<IpAddr> = addresses.into_iter().filter(|a| seen.insert(*a)).collect();

    let Some(first_is_v6) = unique.first().map(IpAddr::is_ipv6) else {
        return unique;
    };
    let (primary, secondary): (Vec<IpAddr>, Vec<IpAddr>) =
        unique.into_iter().partition(|addr| addr.is_ipv6() == first_is_v6);

    let mut ordered = Vec::with_capacity(primary.len() + secondary.len());
    let mut primary = primary.into_iter();
    let mut secondary = secondary.into_iter();
    loop {
        match (primary.next(), secondary.next()) {
            (None, None) => break,
            (a, b) => ordered.extend(a.into_iter().chain(b)),
        }
    }
    ordered
}

/// Resolves remote endpoints into candidates.
#[derive(Clone)]
pub struct EndpointResolver {
    lookup: Arc<dyn NameLookup>,
}

impl EndpointResolver {
    /// Create a resolver over a lookup backend.
    pub fn new(lookup: impl NameLookup) -> Self {
        Self {
            lookup: Arc::new(lookup),
        }
    }

    /// Create a resolver over a shared lookup backend.
    pub fn from_shared(lookup: Arc<dyn NameLookup>) -> Self {
        Self { lookup }
    }

    /// Create a resolver using the system DNS configuration.
    pub fn system() -> Result<Self, ResolutionError> {
        Ok(Self::new(HickoryLookup::system()?))
    }

    /// Resolve `endpoint` to addresses in racing order.
    pub async fn resolve_addresses(
        &self,
        endpoint: &RemoteEndpoint,
    ) -> Result<Vec<SocketAddr>, ResolutionError> {
        let label = endpoint.host_label();
        let port = endpoint
            .effective_port()
            .ok_or_else(|| ResolutionError::new(&label, "no port or service specified"))?;

        let addresses = match (endpoint.address(), endpoint.hostname()) {
            (Some(address), _) => vec![address],
            (None, Some(hostname)) => match hostname.parse::<IpAddr>() {
                Ok(literal) => vec![literal],
                Err(_) => {
                    let found = self.lookup.lookup(hostname).await?;
                    tracing::debug!(target: TARGET, "Resolved {} to {} addresses", hostname, found.len());
                    found
                }
            },
            (None, None) => {
                return Err(ResolutionError::new(label, "no hostname or address specified"));
            }
        };

        let ordered = interleave_families(addresses);
        if ordered.is_empty() {
            return Err(ResolutionError::new(label, "no usable addresses"));
        }
        Ok(ordered
            .into_iter()
            .map(|ip| SocketAddr::new(ip, port))
            .collect())
    }

    /// Resolve `endpoint` into candidates for each usable stack.
    ///
    /// Candidates are ordered by stack preference, then by interleaved
    /// address. A protocol hint on the endpoint removes stacks that do not
    /// speak that protocol; when none remain the result is empty.
    pub async fn resolve(
        &self,
        endpoint: &RemoteEndpoint,
        stacks: &[ProtocolStack],
    ) -> Result<Vec<ResolvedCandidate>, ResolutionError> {
        let addresses = self.resolve_addresses(endpoint).await?;
        let host = endpoint
            .hostname()
            .filter(|hostname| hostname.parse::<IpAddr>().is_err())
            .map(str::to_string);

        let usable = stacks
            .iter()
            .filter(|stack| endpoint.protocol().is_none_or(|hint| stack.matches(hint)));

        let mut candidates = Vec::new();
        for stack in usable {
            for address in &addresses {
                let mut candidate = ResolvedCandidate::new(*address, *stack);
                candidate.host = host.clone();
                candidates.push(candidate);
            }
        }
        Ok(candidates)
    }

    /// Resolve several endpoints, merging duplicates (first occurrence wins).
    ///
    /// Fails only when no endpoint produced a candidate.
    pub async fn resolve_all(
        &self,
        endpoints: &[RemoteEndpoint],
        stacks: &[ProtocolStack],
    ) -> Result<Vec<ResolvedCandidate>, ResolutionError> {
        let mut candidates: Vec<ResolvedCandidate> = Vec::new();
        let mut seen = HashSet::new();
        let mut errors = Vec::new();

        for endpoint in endpoints {
            match self.resolve(endpoint, stacks).await {
                Ok(resolved) => candidates.extend(
                    resolved
                        .into_iter()
                        .filter(|c| seen.insert((c.address, c.stack))),
                ),
                Err(e) => {
                    tracing::debug!(target: TARGET, "Endpoint {} did not resolve: {}", endpoint, e);
                    errors.push(e);
                }
            }
        }

        if !candidates.is_empty() {
            return Ok(candidates);
        }
        match errors.len() {
            0 => Err(ResolutionError::new(
                endpoints
                    .iter()
                    .map(RemoteEndpoint::host_label)
                    .collect::<Vec<_>>()
                    .join(", "),
                "no endpoint matches a usable protocol stack",
            )),
            1 => Err(errors.remove(0)),
            _ => Err(ResolutionError::new(
                errors.iter().map(|e| e.host.as_str()).collect::<Vec<_>>().join(", "),
                errors.iter().map(|e| e.reason.as_str()).collect::<Vec<_>>().join("; "),
            )),
        }
    }
}

impl fmt::Debug for EndpointResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EndpointResolver").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::net::{Ipv4Addr, Ipv6Addr};

    use super::*;

    fn v4(last: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(192, 0, 2, last))
    }

    fn v6(last: u16) -> IpAddr {
        IpAddr::V6(Ipv6Addr::new(0x2001, 0xdb8, 0, 0, 0, 0, 0, last))
    }

    #[test]
    fn test_interleave_starts_with_first_family() {
        let ordered = interleave_families(vec![v6(1), v6(2), v6(3), v4(1), v4(2)]);
        assert_eq!(ordered, vec![v6(1), v4(1), v6(2), v4(2), v6(3)]);

        let ordered = interleave_families(vec![v4(1), v6(1), v6(2)]);
        assert_eq!(ordered, vec![v4(1), v6(1), v6(2)]);
    }

    #[test]
    fn test_interleave_single_family_keeps_order() {
        let ordered = interleave_families(vec![v4(3), v4(1), v4(2)]);
        assert_eq!(ordered, vec![v4(3), v4(1), v4(2)]);
    }

    #[test]
    fn test_interleave_drops_duplicates() {
        let ordered = interleave_families(vec![v4(1), v4(1), v6(1), v4(1)]);
        assert_eq!(ordered, vec![v4(1), v6(1)]);
        assert!(interleave_families(Vec::new()).is_empty());
    }
}
