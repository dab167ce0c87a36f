//! Name lookup backends.

use std::collections::HashMap;
use std::net::IpAddr;

use futures_util::future::BoxFuture;
use hickory_resolver::config::{
    LookupIpStrategy, NameServerConfig, ResolveHosts, ResolverConfig, ResolverOpts,
};
use hickory_resolver::name_server::TokioConnectionProvider;
use hickory_resolver::proto::xfer::Protocol;
use hickory_resolver::{Resolver, TokioResolver};

use super::config::{DnsConfig, IpStrategy};
use crate::error::ResolutionError;

const TARGET: &str = "transport_services::resolver";

/// Turns a hostname into addresses.
///
/// Implementations return addresses in the order the name service
/// reported them.
pub trait NameLookup: Send + Sync + 'static {
    /// Look up `host`.
    fn lookup<'a>(&'a self, host: &'a str) -> BoxFuture<'a, Result<Vec<IpAddr>, ResolutionError>>;
}

/// DNS lookups through `hickory-resolver`.
pub struct HickoryLookup {
    resolver: TokioResolver,
}

impl HickoryLookup {
    /// Create a lookup backend with the given configuration.
    pub fn new(config: &DnsConfig) -> Result<Self, ResolutionError> {
        let (resolver_config, resolver_opts) = build_resolver_config(config);

        let resolver =
            Resolver::builder_with_config(resolver_config, TokioConnectionProvider::default())
                .with_options(resolver_opts)
                .build();

        Ok(Self { resolver })
    }

    /// Create a lookup backend using system DNS settings.
    pub fn system() -> Result<Self, ResolutionError> {
        Self::new(&DnsConfig::system())
    }

    /// Clear the DNS cache.
    pub fn clear_cache(&self) {
        self.resolver.clear_cache();
    }
}

impl std::fmt::Debug for HickoryLookup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HickoryLookup").finish_non_exhaustive()
    }
}

impl NameLookup for HickoryLookup {
    fn lookup<'a>(&'a self, host: &'a str) -> BoxFuture<'a, Result<Vec<IpAddr>, ResolutionError>> {
        Box::pin(async move {
            let response = self
                .resolver
                .lookup_ip(host)
                .await
                .map_err(|e| ResolutionError::new(host, e.to_string()))?;
            Ok(response.iter().collect())
        })
    }
}

/// Translate a [`DnsConfig`] into hickory's configuration and options.
fn build_resolver_config(config: &DnsConfig) -> (ResolverConfig, ResolverOpts) {
    let resolver_config = if config.uses_system_config() {
        match hickory_resolver::system_conf::read_system_conf() {
            Ok((system_config, _)) => system_config,
            Err(e) => {
                tracing::warn!(target: TARGET, "Failed to read system DNS configuration, using defaults: {}", e);
                ResolverConfig::default()
            }
        }
    } else {
        let mut resolver_config = ResolverConfig::new();
        for addr in &config.nameservers {
            resolver_config.add_name_server(NameServerConfig::new(*addr, Protocol::Udp));
            resolver_config.add_name_server(NameServerConfig::new(*addr, Protocol::Tcp));
        }
        resolver_config
    };

    let mut opts = ResolverOpts::default();
    opts.use_hosts_file = if config.use_hosts_file {
        ResolveHosts::Auto
    } else {
        ResolveHosts::Never
    };
    opts.timeout = config.timeout;
    opts.ip_strategy = match config.ip_strategy {
        IpStrategy::Both => LookupIpStrategy::Ipv4AndIpv6,
        IpStrategy::Ipv4Only => LookupIpStrategy::Ipv4Only,
        IpStrategy::Ipv6Only => LookupIpStrategy::Ipv6Only,
    };

    (resolver_config, opts)
}

/// Fixed in-memory host table.
///
/// Hostnames are matched case-insensitively, ignoring a trailing dot.
#[derive(Debug, Clone, Default)]
pub struct StaticLookup {
    hosts: HashMap<String, Vec<IpAddr>>,
}

impl StaticLookup {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a host, builder style.
    pub fn with_host(mut self, host: &str, addresses: impl IntoIterator<Item = IpAddr>) -> Self {
        self.insert(host, addresses);
        self
    }

    /// Add or replace a host.
    pub fn insert(&mut self, host: &str, addresses: impl IntoIterator<Item = IpAddr>) {
        self.hosts
            .insert(normalize(host), addresses.into_iter().collect());
    }
}

impl NameLookup for StaticLookup {
    fn lookup<'a>(&'a self, host: &'a str) -> BoxFuture<'a, Result<Vec<IpAddr>, ResolutionError>> {
        let result = self
            .hosts
            .get(&normalize(host))
            .cloned()
            .ok_or_else(|| ResolutionError::new(host, "host not found"));
        Box::pin(async move { result })
    }
}

fn normalize(host: &str) -> String {
    host.trim_end_matches('.').to_ascii_lowercase()
}
