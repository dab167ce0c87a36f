//! Local binding and ordering of race candidates.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use crate::endpoint::LocalEndpoint;
use crate::error::EstablishmentError;
use crate::path_monitor::InterfaceSnapshot;
use crate::properties::ProtocolStack;
use crate::resolver::{LocalBinding, ResolvedCandidate};

/// Bind each candidate to every compatible local endpoint.
///
/// With no local endpoints the candidates are returned unchanged. Otherwise
/// the result holds one candidate per compatible (candidate, local) pair,
/// keeping candidate order first and local order second. A local endpoint
/// is compatible when it can supply a source address of the candidate's
/// family.
pub fn bind_local_endpoints(
    candidates: Vec<ResolvedCandidate>,
    locals: &[LocalEndpoint],
    interfaces: &[InterfaceSnapshot],
) -> Result<Vec<ResolvedCandidate>, EstablishmentError> {
    if locals.is_empty() {
        return Ok(candidates);
    }

    for local in locals {
        if let Some(name) = local.interface() {
            if !interfaces.iter().any(|iface| iface.name() == name) {
                return Err(EstablishmentError::InvalidParameters(format!(
                    "unknown local interface '{name}'"
                )));
            }
        }
    }

    let mut bound = Vec::new();
    for candidate in &candidates {
        for local in locals {
            if let Some(binding) = binding_for(local, candidate.address, interfaces) {
                bound.push(candidate.clone().with_local(binding));
            }
        }
    }

    if bound.is_empty() && !candidates.is_empty() {
        return Err(EstablishmentError::InvalidParameters(
            "no local endpoint is compatible with any remote candidate".to_string(),
        ));
    }
    Ok(bound)
}

fn binding_for(
    local: &LocalEndpoint,
    remote: SocketAddr,
    interfaces: &[InterfaceSnapshot],
) -> Option<LocalBinding> {
    let ipv6 = remote.is_ipv6();
    let port = local.port().unwrap_or(0);

    let (address, iface) = match (local.interface(), local.address()) {
        (Some(name), address) => {
            let iface = interfaces.iter().find(|iface| iface.name() == name)?;
            let address = match address {
                Some(address) if iface.addresses().contains(&address) => address,
                Some(_) => return None,
                None => iface.address_for_family(ipv6)?,
            };
            (address, Some(iface))
        }
        (None, Some(address)) => {
            let iface = interfaces
                .iter()
                .find(|iface| iface.addresses().contains(&address));
            (address, iface)
        }
        (None, None) => {
            let unspecified = if ipv6 {
                IpAddr::V6(Ipv6Addr::UNSPECIFIED)
            } else {
                IpAddr::V4(Ipv4Addr::UNSPECIFIED)
            };
            (unspecified, None)
        }
    };

    if address.is_ipv6() != ipv6 {
        return None;
    }
    Some(LocalBinding {
        address: SocketAddr::new(address, port),
        interface: iface.map(|iface| iface.name().to_string()),
        is_expensive: iface.is_some_and(InterfaceSnapshot::is_expensive),
    })
}

/// Move expensive candidates after cheap ones within each stack group.
///
/// Stack groups keep their order of first appearance and the sort is
/// stable, so nothing else is reordered.
pub fn deprioritize_expensive(candidates: &mut [ResolvedCandidate]) {
    let mut stacks: Vec<ProtocolStack> = Vec::new();
    for candidate in candidates.iter() {
        if !stacks.contains(&candidate.stack) {
            stacks.push(candidate.stack);
        }
    }
    candidates.sort_by_key(|candidate| {
        let rank = stacks
            .iter()
            .position(|stack| *stack == candidate.stack)
            .unwrap_or(usize::MAX);
        (rank, candidate.is_expensive())
    });
}
