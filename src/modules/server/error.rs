//! Server error types.

use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;

use super::codec::FrameError;

/// Errors surfaced by listeners.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Failed to bind to the specified address.
    #[error("failed to bind to {address}: {source}")]
    BindError {
        /// The address that failed to bind.
        address: SocketAddr,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// Handlers were still running when the drain timeout elapsed and were
    /// force-closed.
    #[error("{remaining} connection(s) still open after {timeout:?}, forced close")]
    ShutdownTimeout {
        /// Connections force-closed.
        remaining: usize,
        /// Drain timeout that elapsed.
        timeout: Duration,
    },

    /// TLS listener without a TLS acceptor.
    #[error("listener '{listener}' uses TLS but no TLS context was provided")]
    MissingTlsContext {
        /// Listener name.
        listener: String,
    },

    /// Listener is not running.
    #[error("listener is not running")]
    NotRunning,

    /// Listener is already running.
    #[error("listener is already running")]
    AlreadyRunning,
}

impl ServerError {
    /// Soft errors are logged as warnings and never abort the process.
    #[must_use]
    pub fn is_soft(&self) -> bool {
        matches!(self, Self::ShutdownTimeout { .. })
    }
}

/// Result type alias for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Reasons a single connection ended abnormally.
///
/// These never leave the handler; each is logged, counted under
/// `errors_total{kind}` and resolved by closing the connection.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// No bytes arrived within the idle timeout.
    #[error("idle for {0:?}")]
    IdleTimeout(Duration),

    /// A write did not complete within the write timeout.
    #[error("write did not complete within {0:?}")]
    WriteTimeout(Duration),

    /// TLS handshake failed or timed out.
    #[error("TLS handshake failed: {0}")]
    Handshake(String),

    /// Peer sent a malformed or oversized frame.
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// Socket error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<FrameError> for ConnectionError {
    fn from(err: FrameError) -> Self {
        match err {
            FrameError::Io(e) => Self::Io(e),
            other => Self::Protocol(other.to_string()),
        }
    }
}

impl ConnectionError {
    /// Value of the `kind` label in `errors_total`.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::IdleTimeout(_) => "idle_timeout",
            Self::WriteTimeout(_) => "write_timeout",
            Self::Handshake(_) => "tls_handshake",
            Self::Protocol(_) => "protocol",
            Self::Io(_) => "io",
        }
    }
}
