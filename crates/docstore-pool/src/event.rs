//! Pool lifecycle events.
//!
//! Every externally observable pool transition emits a [`PoolEvent`] to the
//! listener installed at construction, alongside a `tracing` statement.
//! Listeners run inline on the emitting task and must not block.

use std::time::SystemTime;

use crate::conn::ServerAddress;

/// Why a connection was destroyed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The connection's generation predates the pool's current generation.
    Stale,
    /// The connection sat idle past the configured threshold.
    Idle,
    /// An error was observed on the connection during use.
    Error,
    /// The owning pool closed.
    PoolClosed,
}

/// Why a checkout attempt failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckoutFailedReason {
    /// The wait-queue deadline elapsed.
    Timeout,
    /// The pool was closed.
    PoolClosed,
    /// The pool was cleared while the request was queued or in flight.
    PoolCleared,
    /// Establishing a new connection failed.
    ConnectionError,
}

/// What happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PoolEventKind {
    /// The pool was constructed (paused, empty).
    PoolCreated,
    /// The pool transitioned to ready.
    PoolReady,
    /// The pool was cleared: generation bumped, idle destroyed.
    PoolCleared {
        /// Whether in-use links were severed as part of the clear.
        interrupted_in_use: bool,
    },
    /// The pool reached its terminal closed state.
    PoolClosed,
    /// A new connection finished establishment and handshake.
    ConnectionCreated {
        /// Connection id.
        id: u64,
    },
    /// A connection was destroyed.
    ConnectionClosed {
        /// Connection id.
        id: u64,
        /// Why it was destroyed.
        reason: CloseReason,
    },
    /// A connection was handed to a caller.
    ConnectionCheckedOut {
        /// Connection id.
        id: u64,
    },
    /// A caller returned a connection.
    ConnectionCheckedIn {
        /// Connection id.
        id: u64,
    },
    /// A checkout attempt began.
    CheckoutStarted,
    /// A checkout attempt failed.
    CheckoutFailed {
        /// Why it failed.
        reason: CheckoutFailedReason,
    },
}

/// A timestamped pool lifecycle event.
#[derive(Debug, Clone)]
pub struct PoolEvent {
    /// Address of the pool that emitted the event.
    pub address: ServerAddress,
    /// When the event was emitted.
    pub timestamp: SystemTime,
    /// What happened.
    pub kind: PoolEventKind,
}

impl PoolEvent {
    pub(crate) fn new(address: ServerAddress, kind: PoolEventKind) -> Self {
        Self {
            address,
            timestamp: SystemTime::now(),
            kind,
        }
    }
}

/// Observer for pool lifecycle events.
///
/// Install via [`PoolBuilder::listener`](crate::pool::PoolBuilder::listener).
pub trait PoolListener: Send + Sync {
    /// Called for every emitted event, in emission order per pool.
    fn on_event(&self, event: &PoolEvent);
}
