//! Established connections.
//!
//! A [`Connection`] owns exactly one transport session. Its reader and
//! writer halves sit behind separate async locks so a send and a receive
//! can proceed at the same time, while every state transition happens
//! under a single `parking_lot` mutex.
//!
//! `close` and `abort` publish a shutdown signal that wakes any pending
//! send or receive, which then return [`SendError::Closed`] or
//! [`ReceiveError::Closed`].

mod state;

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UdpSocket;
use tokio::sync::watch;

pub use state::{ConnectionId, ConnectionState};

use crate::endpoint::RemoteEndpoint;
use crate::error::{CloseError, ReceiveError, SendError};
use crate::establishment::{ByteStream, RaceReport, SessionIo, TransportSession};
use crate::properties::{ProtocolStack, TransportProperties};
use crate::resolver::ResolvedCandidate;

const TARGET: &str = "transport_services::connection";

enum ReadHalf {
    Stream(tokio::io::ReadHalf<Box<dyn ByteStream>>),
    Datagram(Arc<UdpSocket>),
}

impl ReadHalf {
    async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            ReadHalf::Stream(stream) => stream.read(buf).await,
            ReadHalf::Datagram(socket) => socket.recv(buf).await,
        }
    }
}

enum WriteHalf {
    Stream(tokio::io::WriteHalf<Box<dyn ByteStream>>),
    Datagram(Arc<UdpSocket>),
}

impl WriteHalf {
    async fn write(&mut self, data: &[u8]) -> io::Result<()> {
        match self {
            WriteHalf::Stream(stream) => {
                stream.write_all(data).await?;
                stream.flush().await
            }
            WriteHalf::Datagram(socket) => socket.send(data).await.map(|_| ()),
        }
    }

    async fn shutdown(&mut self) -> io::Result<()> {
        match self {
            WriteHalf::Stream(stream) => stream.shutdown().await,
            WriteHalf::Datagram(_) => Ok(()),
        }
    }
}

fn split(io: SessionIo) -> (ReadHalf, WriteHalf) {
    match io {
        SessionIo::Stream(stream) => {
            let (reader, writer) = tokio::io::split(stream);
            (ReadHalf::Stream(reader), WriteHalf::Stream(writer))
        }
        SessionIo::Datagram(socket) => {
            let socket = Arc::new(socket);
            (
                ReadHalf::Datagram(Arc::clone(&socket)),
                WriteHalf::Datagram(socket),
            )
        }
    }
}

#[derive(Debug)]
struct Lifecycle {
    state: ConnectionState,
    remote_closed: bool,
    closing_locally: bool,
}

/// A connection produced by the establishment engine.
pub struct Connection {
    id: ConnectionId,
    lifecycle: Mutex<Lifecycle>,
    reader: tokio::sync::Mutex<Option<ReadHalf>>,
    writer: tokio::sync::Mutex<Option<WriteHalf>>,
    shutdown: watch::Sender<bool>,
    candidate: ResolvedCandidate,
    remote: RemoteEndpoint,
    local_addr: Option<SocketAddr>,
    properties: TransportProperties,
    report: RaceReport,
}

static_assertions::assert_impl_all!(Connection: Send, Sync);

impl Connection {
    pub(crate) fn new(
        session: TransportSession,
        candidate: ResolvedCandidate,
        remote: RemoteEndpoint,
        properties: TransportProperties,
        report: RaceReport,
    ) -> Self {
        let local_addr = session.local_addr();
        let (reader, writer) = split(session.io);
        let (shutdown, _) = watch::channel(false);
        Self {
            id: ConnectionId::new(),
            lifecycle: Mutex::new(Lifecycle {
                state: ConnectionState::Establishing,
                remote_closed: false,
                closing_locally: false,
            }),
            reader: tokio::sync::Mutex::new(Some(reader)),
            writer: tokio::sync::Mutex::new(Some(writer)),
            shutdown,
            candidate,
            remote,
            local_addr,
            properties,
            report,
        }
    }

    pub(crate) fn mark_established(&self) {
        let mut lifecycle = self.lifecycle.lock();
        if lifecycle.state == ConnectionState::Establishing {
            lifecycle.state = ConnectionState::Established;
            tracing::debug!(target: TARGET, "{} established to {}", self.id, self.candidate);
        }
    }

    /// Connection identifier.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Current state.
    pub fn state(&self) -> ConnectionState {
        self.lifecycle.lock().state
    }

    /// The remote endpoint the winning candidate was resolved from.
    pub fn remote_endpoint(&self) -> &RemoteEndpoint {
        &self.remote
    }

    /// The remote socket address in use.
    pub fn remote_address(&self) -> SocketAddr {
        self.candidate.address
    }

    /// The local socket address, when known.
    pub fn local_address(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// The protocol stack in use.
    pub fn protocol(&self) -> ProtocolStack {
        self.candidate.stack
    }

    /// The winning candidate.
    pub fn candidate(&self) -> &ResolvedCandidate {
        &self.candidate
    }

    /// Transport properties the connection was established with.
    pub fn transport_properties(&self) -> &TransportProperties {
        &self.properties
    }

    /// Outcome of every candidate in the race that produced this connection.
    pub fn race_report(&self) -> &RaceReport {
        &self.report
    }

    /// Send `data`.
    ///
    /// Stream transports write all bytes before returning. Datagram
    /// transports send `data` as one datagram.
    pub async fn send(&self, data: &[u8]) -> Result<(), SendError> {
        match self.lifecycle.lock().state {
            ConnectionState::Established => {}
            ConnectionState::Establishing => return Err(SendError::NotEstablished),
            ConnectionState::Closing | ConnectionState::Closed | ConnectionState::Failed => {
                return Err(SendError::Closed);
            }
        }

        let mut shutdown = self.shutdown.subscribe();
        let mut writer = tokio::select! {
            guard = self.writer.lock() => guard,
            _ = shutdown.wait_for(|closed| *closed) => return Err(SendError::Closed),
        };
        let Some(half) = writer.as_mut() else {
            return Err(SendError::Closed);
        };

        let result = tokio::select! {
            result = half.write(data) => result,
            _ = shutdown.wait_for(|closed| *closed) => {
                *writer = None;
                return Err(SendError::Closed);
            }
        };

        result.map_err(|e| {
            self.fail("send", &e);
            SendError::Io(e.to_string())
        })
    }

    /// Receive up to `max` bytes.
    ///
    /// An empty vector means the peer closed its side in an orderly way;
    /// the connection moves to `Closing` and later receives keep returning
    /// empty vectors until the connection is closed.
    pub async fn receive(&self, max: usize) -> Result<Vec<u8>, ReceiveError> {
        if max == 0 {
            return Err(ReceiveError::EmptyBuffer);
        }
        {
            let lifecycle = self.lifecycle.lock();
            match lifecycle.state {
                ConnectionState::Established => {}
                ConnectionState::Establishing => return Err(ReceiveError::NotEstablished),
                ConnectionState::Closing if lifecycle.remote_closed && !lifecycle.closing_locally => {
                    return Ok(Vec::new());
                }
                ConnectionState::Closing | ConnectionState::Closed | ConnectionState::Failed => {
                    return Err(ReceiveError::Closed);
                }
            }
        }

        let mut shutdown = self.shutdown.subscribe();
        let mut reader = tokio::select! {
            guard = self.reader.lock() => guard,
            _ = shutdown.wait_for(|closed| *closed) => return Err(ReceiveError::Closed),
        };
        let Some(half) = reader.as_mut() else {
            return Err(ReceiveError::Closed);
        };

        let is_stream = matches!(half, ReadHalf::Stream(_));
        let mut buf = vec![0u8; max];
        let result = tokio::select! {
            result = half.read(&mut buf) => result,
            _ = shutdown.wait_for(|closed| *closed) => {
                *reader = None;
                return Err(ReceiveError::Closed);
            }
        };

        match result {
            Ok(0) if is_stream => {
                let mut lifecycle = self.lifecycle.lock();
                lifecycle.remote_closed = true;
                if lifecycle.state == ConnectionState::Established {
                    lifecycle.state = ConnectionState::Closing;
                    tracing::debug!(target: TARGET, "{} closed by peer", self.id);
                }
                Ok(Vec::new())
            }
            Ok(n) => {
                buf.truncate(n);
                Ok(buf)
            }
            Err(e) => {
                self.fail("receive", &e);
                Err(ReceiveError::Io(e.to_string()))
            }
        }
    }

    /// Close the connection gracefully.
    ///
    /// Pending sends and receives are woken and fail with `Closed`. Stream
    /// transports shut down their write side before the session is dropped.
    pub async fn close(&self) -> Result<(), CloseError> {
        let graceful = {
            let mut lifecycle = self.lifecycle.lock();
            match lifecycle.state {
                ConnectionState::Closed => return Err(CloseError::AlreadyClosed),
                _ if lifecycle.closing_locally => return Err(CloseError::AlreadyClosed),
                ConnectionState::Failed => {
                    lifecycle.closing_locally = true;
                    false
                }
                ConnectionState::Establishing => {
                    lifecycle.closing_locally = true;
                    lifecycle.state = ConnectionState::Closing;
                    false
                }
                ConnectionState::Established | ConnectionState::Closing => {
                    lifecycle.closing_locally = true;
                    lifecycle.state = ConnectionState::Closing;
                    true
                }
            }
        };
        self.shutdown.send_replace(true);

        {
            let mut writer = self.writer.lock().await;
            if graceful {
                if let Some(half) = writer.as_mut() {
                    if let Err(e) = half.shutdown().await {
                        tracing::debug!(target: TARGET, "{} shutdown failed: {}", self.id, e);
                    }
                }
            }
            *writer = None;
        }
        self.reader.lock().await.take();

        self.lifecycle.lock().state = ConnectionState::Closed;
        tracing::debug!(target: TARGET, "{} closed", self.id);
        Ok(())
    }

    /// Drop the session immediately without a graceful shutdown.
    ///
    /// Calling this on a closed connection does nothing.
    pub fn abort(&self) {
        {
            let mut lifecycle = self.lifecycle.lock();
            if lifecycle.state == ConnectionState::Closed {
                return;
            }
            lifecycle.state = ConnectionState::Closed;
            lifecycle.closing_locally = true;
        }
        self.shutdown.send_replace(true);

        // Halves held by a pending operation are released when it wakes.
        if let Ok(mut writer) = self.writer.try_lock() {
            writer.take();
        }
        if let Ok(mut reader) = self.reader.try_lock() {
            reader.take();
        }
        tracing::debug!(target: TARGET, "{} aborted", self.id);
    }

    fn fail(&self, operation: &str, error: &io::Error) {
        let mut lifecycle = self.lifecycle.lock();
        if !lifecycle.state.is_terminal() {
            lifecycle.state = ConnectionState::Failed;
        }
        tracing::warn!(target: TARGET, "{} {} failed: {}", self.id, operation, error);
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("candidate", &self.candidate)
            .field("local_addr", &self.local_addr)
            .finish_non_exhaustive()
    }
}
