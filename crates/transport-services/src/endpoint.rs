//! Remote and local endpoint descriptions.

use std::fmt;
use std::net::IpAddr;

/// Transport protocol hint attached to a remote endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    /// Plain TCP.
    Tcp,
    /// UDP.
    Udp,
    /// TLS over TCP.
    Tls,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Tcp => write!(f, "tcp"),
            Protocol::Udp => write!(f, "udp"),
            Protocol::Tls => write!(f, "tls"),
        }
    }
}

/// Map a well-known service name to its port.
pub fn well_known_port(service: &str) -> Option<u16> {
    match service.to_ascii_lowercase().as_str() {
        "http" => Some(80),
        "https" => Some(443),
        "ssh" => Some(22),
        "dns" | "domain" => Some(53),
        "smtp" => Some(25),
        "imap" => Some(143),
        "imaps" => Some(993),
        _ => None,
    }
}

/// Where to connect.
///
/// Every field is optional; a usable endpoint needs a host (hostname or
/// address) and a port (explicit or via a service name).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteEndpoint {
    hostname: Option<String>,
    address: Option<IpAddr>,
    port: Option<u16>,
    service: Option<String>,
    protocol: Option<Protocol>,
}

impl RemoteEndpoint {
    /// Create an empty endpoint.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the hostname. An IP literal here skips name lookup.
    pub fn with_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = Some(hostname.into());
        self
    }

    /// Set an explicit address.
    pub fn with_address(mut self, address: impl Into<IpAddr>) -> Self {
        self.address = Some(address.into());
        self
    }

    /// Set the port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Set a service name used when no port is given.
    pub fn with_service(mut self, service: impl Into<String>) -> Self {
        self.service = Some(service.into());
        self
    }

    /// Restrict the endpoint to one protocol.
    pub fn with_protocol(mut self, protocol: Protocol) -> Self {
        self.protocol = Some(protocol);
        self
    }

    /// The hostname, if set.
    pub fn hostname(&self) -> Option<&str> {
        self.hostname.as_deref()
    }

    /// The explicit address, if set.
    pub fn address(&self) -> Option<IpAddr> {
        self.address
    }

    /// The explicit port, if set.
    pub fn port(&self) -> Option<u16> {
        self.port
    }

    /// The service name, if set.
    pub fn service(&self) -> Option<&str> {
        self.service.as_deref()
    }

    /// The protocol hint, if set.
    pub fn protocol(&self) -> Option<Protocol> {
        self.protocol
    }

    /// The port to connect to: the explicit port, else the service's port.
    pub fn effective_port(&self) -> Option<u16> {
        self.port
            .or_else(|| self.service.as_deref().and_then(well_known_port))
    }

    /// A label for logs and errors.
    pub fn host_label(&self) -> String {
        match (&self.hostname, self.address) {
            (Some(hostname), _) => hostname.clone(),
            (None, Some(address)) => address.to_string(),
            (None, None) => "<unspecified>".to_string(),
        }
    }
}

impl fmt::Display for RemoteEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let host = self.host_label();
        match self.effective_port() {
            Some(port) if host.contains(':') => write!(f, "[{host}]:{port}"),
            Some(port) => write!(f, "{host}:{port}"),
            None => f.write_str(&host),
        }
    }
}

/// Constraints on the local side of a connection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocalEndpoint {
    interface: Option<String>,
    address: Option<IpAddr>,
    port: Option<u16>,
}

impl LocalEndpoint {
    /// Create an unconstrained local endpoint.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind through the named interface.
    pub fn with_interface(mut self, interface: impl Into<String>) -> Self {
        self.interface = Some(interface.into());
        self
    }

    /// Bind to a specific local address.
    pub fn with_address(mut self, address: impl Into<IpAddr>) -> Self {
        self.address = Some(address.into());
        self
    }

    /// Bind to a specific local port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// The interface constraint.
    pub fn interface(&self) -> Option<&str> {
        self.interface.as_deref()
    }

    /// The address constraint.
    pub fn address(&self) -> Option<IpAddr> {
        self.address
    }

    /// The port constraint.
    pub fn port(&self) -> Option<u16> {
        self.port
    }
}

#[cfg(test)]
mod tests {
    use std::net::{Ipv4Addr, Ipv6Addr};

    use super::*;

    #[test]
    fn test_service_ports() {
        assert_eq!(well_known_port("https"), Some(443));
        assert_eq!(well_known_port("HTTP"), Some(80));
        assert_eq!(well_known_port("imaps"), Some(993));
        assert_eq!(well_known_port("gopher"), None);
    }

    #[test]
    fn test_explicit_port_wins_over_service() {
        let endpoint = RemoteEndpoint::new()
            .with_hostname("example.com")
            .with_service("https")
            .with_port(8443);
        assert_eq!(endpoint.effective_port(), Some(8443));

        let endpoint = RemoteEndpoint::new().with_hostname("example.com").with_service("https");
        assert_eq!(endpoint.effective_port(), Some(443));
    }

    #[test]
    fn test_display() {
        let endpoint = RemoteEndpoint::new().with_hostname("example.com").with_port(80);
        assert_eq!(endpoint.to_string(), "example.com:80");

        let endpoint = RemoteEndpoint::new().with_address(Ipv6Addr::LOCALHOST).with_port(80);
        assert_eq!(endpoint.to_string(), "[::1]:80");

        let endpoint = RemoteEndpoint::new().with_address(Ipv4Addr::LOCALHOST);
        assert_eq!(endpoint.to_string(), "127.0.0.1");
        assert_eq!(RemoteEndpoint::new().host_label(), "<unspecified>");
    }

    #[test]
    fn test_local_endpoint_builder() {
        let local = LocalEndpoint::new().with_interface("eth0").with_port(5000);
        assert_eq!(local.interface(), Some("eth0"));
        assert_eq!(local.port(), Some(5000));
        assert_eq!(local.address(), None);
    }
}
