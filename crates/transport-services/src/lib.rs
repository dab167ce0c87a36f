//! Transport Services for Rust.
//!
//! This crate implements the core of a Transport Services (RFC 9622 style)
//! library:
//!
//! - **Path monitoring**: enumerate network interfaces and watch them for
//!   changes on a background thread
//! - **Endpoint resolution**: turn hostnames, addresses and service names
//!   into an ordered list of connection candidates
//! - **Establishment**: race candidates with staggered starts and keep the
//!   first one to complete its handshake
//! - **Connections**: send, receive and close over the winning transport,
//!   whatever protocol it speaks
//!
//! # Establishing a connection
//!
//! ```ignore
//! use transport_services::{Preconnection, RemoteEndpoint, SecurityParameters};
//!
//! let preconnection = Preconnection::new()
//!     .with_remote(RemoteEndpoint::new().with_hostname("example.com").with_port(443))
//!     .with_security_parameters(SecurityParameters::new().alpn_protocol("http/1.1"));
//!
//! let connection = preconnection.initiate().await?;
//! connection.send(b"GET / HTTP/1.1\r\nHost: example.com\r\n\r\n").await?;
//! let reply = connection.receive(4096).await?;
//! connection.close().await?;
//! ```
//!
//! # Watching interfaces
//!
//! ```ignore
//! use transport_services::PathMonitor;
//!
//! let monitor = PathMonitor::new()?;
//! let watcher = monitor.start_watching(|event| println!("{event}"))?;
//! // ...
//! watcher.stop();
//! ```
//!
//! # Logging
//!
//! Diagnostics go through `tracing` under the `transport_services::*`
//! targets. The crate never installs a subscriber.

pub mod connection;
pub mod endpoint;
pub mod error;
pub mod establishment;
pub mod path_monitor;
pub mod preconnection;
pub mod properties;
pub mod resolver;
pub mod security;

pub use connection::{Connection, ConnectionId, ConnectionState};
pub use endpoint::{LocalEndpoint, Protocol, RemoteEndpoint};
pub use error::{
    CandidateFailure, CloseError, Error, EstablishmentError, FailureReason, PathMonitorError,
    ReceiveError, ResolutionError, Result, SendError,
};
pub use establishment::{Connector, EstablishmentConfig, EstablishmentEngine, SocketConnector};
pub use path_monitor::{
    ChangeEvent, InterfaceKind, InterfaceSnapshot, InterfaceStatus, PathMonitor, Watcher,
};
pub use preconnection::Preconnection;
pub use properties::{Preference, ProtocolStack, TransportProperties};
pub use resolver::{DnsConfig, EndpointResolver, ResolvedCandidate};
pub use security::{Certificate, SecurityParameters, TlsVersion};
