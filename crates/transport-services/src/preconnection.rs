//! Preconnections collect everything needed to establish a connection.

use crate::connection::Connection;
use crate::endpoint::{LocalEndpoint, RemoteEndpoint};
use crate::error::EstablishmentError;
use crate::establishment::EstablishmentEngine;
use crate::properties::{ProtocolStack, TransportProperties};
use crate::resolver::{EndpointResolver, ResolvedCandidate};
use crate::security::SecurityParameters;

/// Remote and local endpoints plus transport and security properties.
///
/// # Example
///
/// ```ignore
/// use transport_services::{Preconnection, RemoteEndpoint};
///
/// let preconnection = Preconnection::new()
///     .with_remote(RemoteEndpoint::new().with_hostname("example.com").with_service("https"));
/// let connection = preconnection.initiate().await?;
/// connection.send(b"GET / HTTP/1.0\r\n\r\n").await?;
/// ```
#[derive(Debug, Clone, Default)]
pub struct Preconnection {
    remote: Vec<RemoteEndpoint>,
    local: Vec<LocalEndpoint>,
    properties: TransportProperties,
    security: SecurityParameters,
}

impl Preconnection {
    /// Create an empty preconnection with default properties.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a remote endpoint, builder style.
    pub fn with_remote(mut self, endpoint: RemoteEndpoint) -> Self {
        self.remote.push(endpoint);
        self
    }

    /// Add a local endpoint, builder style.
    pub fn with_local(mut self, endpoint: LocalEndpoint) -> Self {
        self.local.push(endpoint);
        self
    }

    /// Replace the transport properties.
    pub fn with_transport_properties(mut self, properties: TransportProperties) -> Self {
        self.properties = properties;
        self
    }

    /// Replace the security parameters.
    pub fn with_security_parameters(mut self, security: SecurityParameters) -> Self {
        self.security = security;
        self
    }

    /// Add a remote endpoint.
    pub fn add_remote(&mut self, endpoint: RemoteEndpoint) {
        self.remote.push(endpoint);
    }

    /// Add a local endpoint.
    pub fn add_local(&mut self, endpoint: LocalEndpoint) {
        self.local.push(endpoint);
    }

    /// Set the transport properties.
    pub fn set_transport_properties(&mut self, properties: TransportProperties) {
        self.properties = properties;
    }

    /// Set the security parameters.
    pub fn set_security_parameters(&mut self, security: SecurityParameters) {
        self.security = security;
    }

    /// Remote endpoints in insertion order.
    pub fn remote_endpoints(&self) -> &[RemoteEndpoint] {
        &self.remote
    }

    /// Local endpoints in insertion order.
    pub fn local_endpoints(&self) -> &[LocalEndpoint] {
        &self.local
    }

    /// Transport properties.
    pub fn transport_properties(&self) -> &TransportProperties {
        &self.properties
    }

    /// Security parameters.
    pub fn security_parameters(&self) -> &SecurityParameters {
        &self.security
    }

    /// Check that the preconnection can be established.
    pub fn validate(&self) -> Result<(), EstablishmentError> {
        if self.remote.is_empty() {
            return Err(EstablishmentError::InvalidParameters(
                "at least one remote endpoint is required".to_string(),
            ));
        }
        Ok(())
    }

    /// Protocol stacks to attempt, most preferred first.
    pub fn protocol_stacks(&self) -> Result<Vec<ProtocolStack>, EstablishmentError> {
        self.properties.protocol_stacks(&self.security)
    }

    /// Resolve every remote endpoint ahead of establishment.
    pub async fn resolve(
        &self,
        resolver: &EndpointResolver,
    ) -> Result<Vec<ResolvedCandidate>, EstablishmentError> {
        self.validate()?;
        let stacks = self.protocol_stacks()?;
        Ok(resolver.resolve_all(&self.remote, &stacks).await?)
    }

    /// Establish a connection with the system resolver and OS sockets.
    ///
    /// Must be called within a `tokio` runtime.
    pub async fn initiate(&self) -> Result<Connection, EstablishmentError> {
        let engine = EstablishmentEngine::system()?;
        self.initiate_with(&engine).await
    }

    /// Establish a connection with `engine`.
    pub async fn initiate_with(
        &self,
        engine: &EstablishmentEngine,
    ) -> Result<Connection, EstablishmentError> {
        engine.establish(self).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::properties::Preference;

    #[test]
    fn test_empty_preconnection_is_invalid() {
        let err = Preconnection::new().validate().unwrap_err();
        assert!(matches!(err, EstablishmentError::InvalidParameters(_)));
    }

    #[test]
    fn test_builder_keeps_endpoint_order() {
        let mut preconnection = Preconnection::new()
            .with_remote(RemoteEndpoint::new().with_hostname("a.test").with_port(1));
        preconnection.add_remote(RemoteEndpoint::new().with_hostname("b.test").with_port(2));

        let hosts: Vec<_> = preconnection
            .remote_endpoints()
            .iter()
            .filter_map(RemoteEndpoint::hostname)
            .collect();
        assert_eq!(hosts, vec!["a.test", "b.test"]);
        assert!(preconnection.validate().is_ok());
    }

    #[test]
    fn test_protocol_stacks_follow_properties() {
        let preconnection = Preconnection::new()
            .with_transport_properties(TransportProperties::datagram())
            .with_security_parameters(SecurityParameters::disabled());
        assert_eq!(preconnection.protocol_stacks().unwrap()[0], ProtocolStack::Udp);

        let preconnection = Preconnection::new().with_transport_properties(
            TransportProperties::new().multistreaming(Preference::Require),
        );
        assert!(preconnection.protocol_stacks().is_err());
    }
}
