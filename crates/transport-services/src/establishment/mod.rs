//! Connection establishment.
//!
//! The [`EstablishmentEngine`] turns a [`Preconnection`] into a
//! [`Connection`]:
//!
//! 1. select protocol stacks from the transport and security properties
//! 2. resolve every remote endpoint into candidates
//! 3. bind candidates to local endpoints and move expensive interfaces last
//! 4. race the candidates with staggered starts
//!
//! Individual candidate failures stay inside the race. They surface only
//! when every candidate fails, all together in
//! [`EstablishmentError::AllFailed`].

mod candidate;
mod config;
mod connector;
mod race;

use std::net::IpAddr;
use std::sync::Arc;

pub use candidate::{bind_local_endpoints, deprioritize_expensive};
pub use config::EstablishmentConfig;
pub use connector::{ByteStream, Connector, SocketConnector, TransportSession};
pub(crate) use connector::SessionIo;
pub use race::{AttemptOutcome, RacePhase, RaceReport, RaceWinner, race};

use crate::connection::Connection;
use crate::endpoint::RemoteEndpoint;
use crate::error::EstablishmentError;
use crate::path_monitor::{InterfaceSnapshot, InterfaceSource, PathMonitor, SystemInterfaces};
use crate::preconnection::Preconnection;
use crate::resolver::{EndpointResolver, ResolvedCandidate};

const TARGET: &str = "transport_services::establishment";

/// Establishes connections from preconnections.
#[derive(Clone)]
pub struct EstablishmentEngine {
    resolver: EndpointResolver,
    connector: Option<Arc<dyn Connector>>,
    interfaces: Option<Arc<dyn InterfaceSource>>,
    config: EstablishmentConfig,
}

impl EstablishmentEngine {
    /// Create an engine that resolves with `resolver` and connects with OS sockets.
    pub fn new(resolver: EndpointResolver) -> Self {
        Self {
            resolver,
            connector: None,
            interfaces: None,
            config: EstablishmentConfig::default(),
        }
    }

    /// Create an engine with the system resolver.
    ///
    /// Must be called within a `tokio` runtime.
    pub fn system() -> Result<Self, EstablishmentError> {
        Ok(Self::new(EndpointResolver::system()?))
    }

    /// Use a custom connector for every attempt.
    pub fn with_connector(self, connector: impl Connector) -> Self {
        self.with_shared_connector(Arc::new(connector))
    }

    /// Use a shared custom connector for every attempt.
    pub fn with_shared_connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Read local interfaces from `source` when binding local endpoints.
    pub fn with_interface_source(mut self, source: impl InterfaceSource) -> Self {
        self.interfaces = Some(Arc::new(source));
        self
    }

    /// Share the interface source of a path monitor.
    pub fn with_path_monitor(mut self, monitor: &PathMonitor) -> Self {
        self.interfaces = Some(monitor.source());
        self
    }

    /// Replace the racing configuration.
    pub fn with_config(mut self, config: EstablishmentConfig) -> Self {
        self.config = config;
        self
    }

    /// Racing configuration.
    pub fn config(&self) -> &EstablishmentConfig {
        &self.config
    }

    /// The resolver used for remote endpoints.
    pub fn resolver(&self) -> &EndpointResolver {
        &self.resolver
    }

    /// Compute the ordered candidate list for `preconnection` without connecting.
    pub async fn candidates(
        &self,
        preconnection: &Preconnection,
    ) -> Result<Vec<ResolvedCandidate>, EstablishmentError> {
        preconnection.validate()?;
        let stacks = preconnection.protocol_stacks()?;
        let resolved = self
            .resolver
            .resolve_all(preconnection.remote_endpoints(), &stacks)
            .await?;

        let locals = preconnection.local_endpoints();
        let interfaces = if locals.is_empty() {
            Vec::new()
        } else {
            self.local_interfaces(preconnection)?
        };

        let mut candidates = bind_local_endpoints(resolved, locals, &interfaces)?;
        deprioritize_expensive(&mut candidates);
        Ok(candidates)
    }

    /// Establish a connection for `preconnection`.
    pub async fn establish(
        &self,
        preconnection: &Preconnection,
    ) -> Result<Connection, EstablishmentError> {
        let candidates = self.candidates(preconnection).await?;

        let connector: Arc<dyn Connector> = match &self.connector {
            Some(connector) => Arc::clone(connector),
            None => Arc::new(SocketConnector::new(preconnection.security_parameters())?),
        };

        let mut config = self.config.clone();
        if let Some(timeout) = preconnection.transport_properties().connection_timeout {
            config.deadline = timeout;
        }

        let winner = race(connector, candidates, &config).await?;
        tracing::debug!(target: TARGET, "Race finished: {:?}", winner.report);

        let remote = origin_endpoint(preconnection.remote_endpoints(), &winner.candidate);
        let connection = Connection::new(
            winner.session,
            winner.candidate,
            remote,
            preconnection.transport_properties().clone(),
            winner.report,
        );
        connection.mark_established();
        Ok(connection)
    }

    fn local_interfaces(
        &self,
        preconnection: &Preconnection,
    ) -> Result<Vec<InterfaceSnapshot>, EstablishmentError> {
        let needs_interface = preconnection
            .local_endpoints()
            .iter()
            .any(|local| local.interface().is_some());

        let read = match &self.interfaces {
            Some(source) => source.interfaces(),
            None => SystemInterfaces::open().and_then(|source| source.interfaces()),
        };
        match read {
            Ok(interfaces) => Ok(interfaces),
            Err(e) if needs_interface => Err(EstablishmentError::InvalidParameters(format!(
                "cannot enumerate local interfaces: {e}"
            ))),
            Err(e) => {
                tracing::warn!(target: TARGET, "Failed to read local interfaces, binding without cost information: {}", e);
                Ok(Vec::new())
            }
        }
    }
}

impl std::fmt::Debug for EstablishmentEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EstablishmentEngine")
            .field("custom_connector", &self.connector.is_some())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// The remote endpoint a candidate was resolved from.
fn origin_endpoint(endpoints: &[RemoteEndpoint], candidate: &ResolvedCandidate) -> RemoteEndpoint {
    let ip = candidate.address.ip();
    let port = candidate.address.port();
    endpoints
        .iter()
        .filter(|endpoint| endpoint.effective_port() == Some(port))
        .find(|endpoint| {
            endpoint.address() == Some(ip)
                || endpoint.hostname().is_some_and(|hostname| {
                    candidate.host.as_deref() == Some(hostname)
                        || hostname.parse::<IpAddr>().ok() == Some(ip)
                })
        })
        .cloned()
        .unwrap_or_else(|| RemoteEndpoint::new().with_address(ip).with_port(port))
}
