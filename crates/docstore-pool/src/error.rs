//! Pool error types.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::conn::ServerAddress;

/// Errors surfaced by pool operations.
///
/// Every variant is terminal for the checkout attempt that observed it;
/// the pool never retries on the caller's behalf. Whether the *operation*
/// may be resent on a fresh connection is exposed via [`Error::is_retryable`].
#[derive(Debug, Error)]
pub enum Error {
    /// The pool reached its terminal closed state before or during checkout.
    #[error("attempted to check out a connection from closed connection pool {address}")]
    PoolClosed {
        /// Address of the pool.
        address: ServerAddress,
    },

    /// The pool was cleared while the checkout was queued or in flight.
    ///
    /// Carries the fault that triggered the clear. Labeled retry-safe: the
    /// server link was judged unusable as a whole, so the operation may be
    /// resent once a fresh connection is obtained.
    #[error("connection pool for {address} was cleared because another operation failed with: {cause}")]
    PoolCleared {
        /// Address of the pool.
        address: ServerAddress,
        /// The fault recorded at the clear.
        cause: Arc<ConnectionError>,
    },

    /// Specialization of [`Error::PoolCleared`] for clears that originated
    /// from a monitor-detected network failure rather than an
    /// operation-reported error. Same retry semantics; distinguished for
    /// diagnostics only.
    #[error("connection to {address} interrupted due to a network error detected by the server monitor: {cause}")]
    PoolClearedOnNetworkError {
        /// Address of the pool.
        address: ServerAddress,
        /// The fault recorded at the clear.
        cause: Arc<ConnectionError>,
    },

    /// The checkout was not satisfied before its deadline.
    ///
    /// Signals capacity exhaustion; the caller decides whether to retry.
    #[error("timed out after {waited:?} while checking out a connection from pool {address}")]
    WaitQueueTimeout {
        /// Address of the pool.
        address: ServerAddress,
        /// How long the request waited before failing.
        waited: Duration,
    },

    /// Establishing a new connection failed.
    ///
    /// The underlying transport error is propagated verbatim, never wrapped
    /// in one of the pool's own kinds.
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// Pool configuration error.
    #[error("pool configuration error: {0}")]
    Configuration(String),
}

impl Error {
    /// Whether the failed operation is safe to resend on a freshly obtained
    /// connection.
    ///
    /// This is the retry-safety label consumed by the external retry layer.
    /// Only pool-cleared failures carry it: the pool judged the whole link
    /// unusable, not the operation itself.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::PoolCleared { .. } | Self::PoolClearedOnNetworkError { .. }
        )
    }

    /// The pool address associated with this error, when there is one.
    #[must_use]
    pub fn address(&self) -> Option<&ServerAddress> {
        match self {
            Self::PoolClosed { address }
            | Self::PoolCleared { address, .. }
            | Self::PoolClearedOnNetworkError { address, .. }
            | Self::WaitQueueTimeout { address, .. } => Some(address),
            Self::Connection(_) | Self::Configuration(_) => None,
        }
    }
}

/// Failures produced while establishing or using a transport session.
///
/// Produced by [`Connector`](crate::conn::Connector) implementations and
/// reported back through
/// [`PooledConnection::check_in_with_error`](crate::pool::PooledConnection::check_in_with_error).
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// I/O error on the underlying transport.
    #[error("I/O error: {0}")]
    Io(Arc<std::io::Error>),

    /// The post-connect handshake failed.
    #[error("handshake failed: {0}")]
    Handshake(String),

    /// The link was severed by the peer.
    #[error("connection reset by peer")]
    Reset,

    /// The transport did not respond within its deadline.
    #[error("connection timed out")]
    Timeout,
}

impl ConnectionError {
    /// Whether this fault indicates the whole link is unusable.
    ///
    /// A network fault observed during use clears the owning pool; faults
    /// local to a single command (e.g. a failed handshake on one attempt)
    /// do not.
    #[must_use]
    pub fn is_network_error(&self) -> bool {
        matches!(self, Self::Io(_) | Self::Reset | Self::Timeout)
    }
}

impl From<std::io::Error> for ConnectionError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(Arc::new(err))
    }
}

/// Result type for pool operations.
pub type Result<T> = std::result::Result<T, Error>;
