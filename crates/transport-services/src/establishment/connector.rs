//! Connectors perform a single candidate attempt.

use std::fmt;
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;

use futures_util::future::BoxFuture;
use rustls::ClientConfig;
use rustls_pki_types::ServerName;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpSocket, TcpStream, UdpSocket};
use tokio_rustls::TlsConnector;

use crate::error::{EstablishmentError, FailureReason};
use crate::properties::ProtocolStack;
use crate::resolver::ResolvedCandidate;
use crate::security::SecurityParameters;

const TARGET: &str = "transport_services::establishment";

/// A bidirectional byte stream a session can carry.
pub trait ByteStream: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> ByteStream for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

pub(crate) enum SessionIo {
    Stream(Box<dyn ByteStream>),
    Datagram(UdpSocket),
}

/// The established transport a connection owns.
pub struct TransportSession {
    pub(crate) io: SessionIo,
    peer_addr: SocketAddr,
    local_addr: Option<SocketAddr>,
}

impl TransportSession {
    /// Wrap a connected byte stream.
    pub fn stream(io: impl ByteStream, peer_addr: SocketAddr) -> Self {
        Self {
            io: SessionIo::Stream(Box::new(io)),
            peer_addr,
            local_addr: None,
        }
    }

    /// Wrap a connected UDP socket.
    pub fn datagram(socket: UdpSocket) -> io::Result<Self> {
        let peer_addr = socket.peer_addr()?;
        let local_addr = socket.local_addr().ok();
        Ok(Self {
            io: SessionIo::Datagram(socket),
            peer_addr,
            local_addr,
        })
    }

    /// Record the local address.
    pub fn with_local_addr(mut self, local_addr: SocketAddr) -> Self {
        self.local_addr = Some(local_addr);
        self
    }

    /// Remote address.
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Local address, when known.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Whether this session carries datagrams.
    pub fn is_datagram(&self) -> bool {
        matches!(self.io, SessionIo::Datagram(_))
    }
}

impl fmt::Debug for TransportSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportSession")
            .field("datagram", &self.is_datagram())
            .field("peer_addr", &self.peer_addr)
            .field("local_addr", &self.local_addr)
            .finish()
    }
}

/// Performs one full connection attempt for a candidate.
///
/// The returned future is dropped when the attempt loses the race, so
/// implementations must release their sockets on drop.
pub trait Connector: Send + Sync + 'static {
    /// Attempt `candidate` through its complete handshake.
    fn connect<'a>(
        &'a self,
        candidate: &'a ResolvedCandidate,
    ) -> BoxFuture<'a, Result<TransportSession, FailureReason>>;
}

/// Connects with OS sockets through `tokio`, adding TLS via `tokio-rustls`.
#[derive(Clone)]
pub struct SocketConnector {
    tls: Option<Arc<ClientConfig>>,
    server_name: Option<String>,
}

impl SocketConnector {
    /// Create a connector for the given security parameters.
    pub fn new(security: &SecurityParameters) -> Result<Self, EstablishmentError> {
        Ok(Self {
            tls: security.client_config()?,
            server_name: security.server_name.clone(),
        })
    }

    async fn connect_tcp(candidate: &ResolvedCandidate) -> Result<TcpStream, FailureReason> {
        let socket = match candidate.address {
            SocketAddr::V4(_) => TcpSocket::new_v4()?,
            SocketAddr::V6(_) => TcpSocket::new_v6()?,
        };
        if let Some(local) = &candidate.local {
            socket.bind(local.address)?;
        }
        let stream = socket.connect(candidate.address).await?;
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!(target: TARGET, "Failed to set TCP_NODELAY: {}", e);
        }
        Ok(stream)
    }

    async fn connect_tls(
        &self,
        candidate: &ResolvedCandidate,
    ) -> Result<TransportSession, FailureReason> {
        let config = self.tls.clone().ok_or_else(|| {
            FailureReason::Handshake("TLS requested but security is disabled".to_string())
        })?;
        let name = self
            .server_name
            .clone()
            .or_else(|| candidate.host.clone())
            .unwrap_or_else(|| candidate.address.ip().to_string());
        let server_name = ServerName::try_from(name.clone())
            .map_err(|e| FailureReason::Handshake(format!("invalid server name '{name}': {e}")))?;

        let tcp = Self::connect_tcp(candidate).await?;
        let local_addr = tcp.local_addr().ok();
        let tls = TlsConnector::from(config)
            .connect(server_name, tcp)
            .await
            .map_err(|e| match FailureReason::from(&e) {
                FailureReason::Io(msg) => FailureReason::Handshake(msg),
                other => other,
            })?;

        let session = TransportSession::stream(tls, candidate.address);
        Ok(match local_addr {
            Some(addr) => session.with_local_addr(addr),
            None => session,
        })
    }

    async fn connect_udp(candidate: &ResolvedCandidate) -> Result<TransportSession, FailureReason> {
        let bind_addr = match (&candidate.local, candidate.address) {
            (Some(local), _) => local.address,
            (None, SocketAddr::V4(_)) => SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0),
            (None, SocketAddr::V6(_)) => SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), 0),
        };
        let socket = UdpSocket::bind(bind_addr).await?;
        socket.connect(candidate.address).await?;
        Ok(TransportSession::datagram(socket)?)
    }
}

impl fmt::Debug for SocketConnector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SocketConnector")
            .field("tls", &self.tls.is_some())
            .field("server_name", &self.server_name)
            .finish()
    }
}

impl Connector for SocketConnector {
    fn connect<'a>(
        &'a self,
        candidate: &'a ResolvedCandidate,
    ) -> BoxFuture<'a, Result<TransportSession, FailureReason>> {
        Box::pin(async move {
            match candidate.stack {
                ProtocolStack::Tcp => {
                    let stream = Self::connect_tcp(candidate).await?;
                    let local_addr = stream.local_addr().ok();
                    let session = TransportSession::stream(stream, candidate.address);
                    Ok(match local_addr {
                        Some(addr) => session.with_local_addr(addr),
                        None => session,
                    })
                }
                ProtocolStack::Tls => self.connect_tls(candidate).await,
                ProtocolStack::Udp => Self::connect_udp(candidate).await,
            }
        })
    }
}
