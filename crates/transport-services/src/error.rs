//! Error types for transport services.

use std::fmt;
use std::io;

use crate::resolver::ResolvedCandidate;

/// Result type alias for transport services operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Crate-level error aggregating every subsystem error.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Path monitoring failed.
    #[error(transparent)]
    PathMonitor(#[from] PathMonitorError),

    /// Endpoint resolution failed.
    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    /// Connection establishment failed.
    #[error(transparent)]
    Establishment(#[from] EstablishmentError),

    /// Sending on a connection failed.
    #[error(transparent)]
    Send(#[from] SendError),

    /// Receiving on a connection failed.
    #[error(transparent)]
    Receive(#[from] ReceiveError),

    /// Closing a connection failed.
    #[error(transparent)]
    Close(#[from] CloseError),
}

/// Errors produced by the path monitor.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PathMonitorError {
    /// The OS enumeration mechanism could not be opened.
    #[error("Failed to initialize path monitor: {0}")]
    Init(String),

    /// The monitor already has an active watch.
    #[error("Path monitor is already watching for changes")]
    AlreadyWatching,

    /// A platform call failed after initialization.
    #[error("Platform error: {0}")]
    Platform(String),
}

/// Failure to turn a remote endpoint into connectable addresses.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Failed to resolve '{host}': {reason}")]
pub struct ResolutionError {
    /// The host label that failed (hostname, address or a placeholder).
    pub host: String,
    /// Human-readable reason.
    pub reason: String,
}

impl ResolutionError {
    /// Create a resolution error.
    pub fn new(host: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            reason: reason.into(),
        }
    }
}

/// Why a single candidate attempt did not produce the winning connection.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FailureReason {
    /// The peer actively refused the connection.
    #[error("connection refused")]
    Refused,
    /// The attempt ran out of time.
    #[error("timed out")]
    TimedOut,
    /// No route to the peer.
    #[error("unreachable")]
    Unreachable,
    /// The security handshake failed.
    #[error("handshake failed: {0}")]
    Handshake(String),
    /// Any other I/O failure.
    #[error("I/O error: {0}")]
    Io(String),
    /// The attempt lost the race or was aborted.
    #[error("cancelled")]
    Cancelled,
}

impl From<&io::Error> for FailureReason {
    fn from(error: &io::Error) -> Self {
        match error.kind() {
            io::ErrorKind::ConnectionRefused => Self::Refused,
            io::ErrorKind::TimedOut => Self::TimedOut,
            io::ErrorKind::HostUnreachable
            | io::ErrorKind::NetworkUnreachable
            | io::ErrorKind::AddrNotAvailable => Self::Unreachable,
            _ => Self::Io(error.to_string()),
        }
    }
}

impl From<io::Error> for FailureReason {
    fn from(error: io::Error) -> Self {
        Self::from(&error)
    }
}

/// A candidate together with the reason its attempt failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateFailure {
    /// The candidate that was attempted (or never started).
    pub candidate: ResolvedCandidate,
    /// Why it failed.
    pub reason: FailureReason,
}

impl fmt::Display for CandidateFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.candidate, self.reason)
    }
}

/// Errors produced while turning a preconnection into a connection.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EstablishmentError {
    /// The preconnection cannot be established as specified.
    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    /// No remote endpoint resolved to a usable candidate.
    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    /// Security parameters could not be turned into a TLS configuration.
    #[error("Security configuration error: {0}")]
    Security(String),

    /// Every candidate failed; one entry per candidate in candidate order.
    #[error("All {} candidates failed: {}", .0.len(), summarize(.0))]
    AllFailed(Vec<CandidateFailure>),
}

impl EstablishmentError {
    /// Per-candidate failures, empty unless this is `AllFailed`.
    pub fn failures(&self) -> &[CandidateFailure] {
        match self {
            Self::AllFailed(failures) => failures,
            _ => &[],
        }
    }
}

fn summarize(failures: &[CandidateFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Errors returned by [`Connection::send`](crate::connection::Connection::send).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SendError {
    /// The connection has not finished establishment.
    #[error("Connection is not established")]
    NotEstablished,
    /// The connection is closing, closed or failed.
    #[error("Connection is closed")]
    Closed,
    /// The transport reported an I/O failure; the connection is now failed.
    #[error("Send failed: {0}")]
    Io(String),
}

/// Errors returned by [`Connection::receive`](crate::connection::Connection::receive).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReceiveError {
    /// The connection has not finished establishment.
    #[error("Connection is not established")]
    NotEstablished,
    /// The connection was closed locally.
    #[error("Connection is closed")]
    Closed,
    /// A zero-capacity buffer was supplied.
    #[error("Receive buffer capacity must be non-zero")]
    EmptyBuffer,
    /// The transport reported an I/O failure; the connection is now failed.
    #[error("Receive failed: {0}")]
    Io(String),
}

/// Errors returned by [`Connection::close`](crate::connection::Connection::close).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CloseError {
    /// The connection is already closed or a close is in progress.
    #[error("Connection is already closed")]
    AlreadyClosed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_reason_from_io() {
        let refused = io::Error::from(io::ErrorKind::ConnectionRefused);
        assert_eq!(FailureReason::from(&refused), FailureReason::Refused);

        let timed_out = io::Error::from(io::ErrorKind::TimedOut);
        assert_eq!(FailureReason::from(timed_out), FailureReason::TimedOut);

        let unreachable = io::Error::from(io::ErrorKind::NetworkUnreachable);
        assert_eq!(FailureReason::from(unreachable), FailureReason::Unreachable);

        let other = io::Error::other("boom");
        assert!(matches!(FailureReason::from(other), FailureReason::Io(msg) if msg == "boom"));
    }

    #[test]
    fn test_resolution_error_display() {
        let err = ResolutionError::new("example.invalid", "no addresses");
        assert_eq!(err.to_string(), "Failed to resolve 'example.invalid': no addresses");
    }

    #[test]
    fn test_crate_error_from_subsystems() {
        let err: Error = PathMonitorError::AlreadyWatching.into();
        assert!(matches!(err, Error::PathMonitor(PathMonitorError::AlreadyWatching)));

        let err: Error = CloseError::AlreadyClosed.into();
        assert_eq!(err.to_string(), "Connection is already closed");
    }
}
