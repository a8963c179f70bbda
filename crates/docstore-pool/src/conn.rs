//! Pooled connection bookkeeping and the transport seams.
//!
//! The pool treats an established session as opaque: it owns only the
//! bookkeeping needed for reuse decisions (id, generation stamp, last-used
//! time) and a handle that can sever the link out-of-band while the
//! connection is checked out.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;

use crate::error::ConnectionError;

/// Network address of a single docstore server.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct ServerAddress {
    /// Hostname or IP address.
    pub host: String,
    /// TCP port.
    pub port: u16,
}

impl ServerAddress {
    /// Create an address from host and port.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for ServerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl fmt::Debug for ServerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self}")
    }
}

/// An established, authenticated transport session.
///
/// Implementations live in the wire-protocol layer; the pool only ever
/// closes them.
pub trait Transport: Send + fmt::Debug + 'static {
    /// Close the underlying link.
    ///
    /// The pool guarantees this is invoked at most once per session; the
    /// call itself is best-effort and must not block.
    fn shutdown(&mut self);
}

/// Establishes new transport sessions to one server.
///
/// Connecting and handshaking is the slow half of a checkout and always
/// runs outside the pool's critical section.
#[async_trait::async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Establish and authenticate a new session to `address`.
    async fn connect(&self, address: &ServerAddress)
    -> Result<Box<dyn Transport>, ConnectionError>;
}

/// Handle that severs a checked-out link from another task.
///
/// Cloned into the pool's in-use registry at checkout so that
/// `clear(…, interrupt_in_use = true)` and `close()` can reach sessions the
/// pool no longer owns. The operation layer observes the interrupt via
/// [`InterruptHandle::interrupted`] and abandons the link; the stale
/// check-in then destroys it.
#[derive(Clone, Debug)]
pub struct InterruptHandle {
    flag: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl InterruptHandle {
    pub(crate) fn new() -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            notify: Arc::new(Notify::new()),
        }
    }

    /// Mark the link severed and wake any task waiting on it.
    pub(crate) fn interrupt(&self) {
        self.flag.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    /// Whether the pool has severed this link.
    #[must_use]
    pub fn is_interrupted(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    /// Wait until the pool severs this link.
    ///
    /// Resolves immediately if the interrupt already fired.
    pub async fn interrupted(&self) {
        let notified = self.notify.notified();
        tokio::pin!(notified);
        // Register interest before checking the flag so a concurrent
        // interrupt cannot slip between the check and the await.
        notified.as_mut().enable();
        if self.is_interrupted() {
            return;
        }
        notified.await;
    }
}

/// One established session plus the bookkeeping the pool needs.
///
/// A connection whose generation stamp no longer matches the pool's current
/// generation is stale: it predates a fault and is destroyed instead of
/// reused.
pub struct Connection {
    id: u64,
    generation: u64,
    last_used_at: Instant,
    transport: Option<Box<dyn Transport>>,
    interrupt: InterruptHandle,
}

impl Connection {
    pub(crate) fn new(id: u64, generation: u64, transport: Box<dyn Transport>) -> Self {
        Self {
            id,
            generation,
            last_used_at: Instant::now(),
            transport: Some(transport),
            interrupt: InterruptHandle::new(),
        }
    }

    /// Identity of this connection, unique within its pool's lifetime.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The pool generation this connection was created under.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Whether this connection predates the pool's current generation.
    #[must_use]
    pub fn is_stale(&self, current_generation: u64) -> bool {
        self.generation != current_generation
    }

    /// Access the underlying transport session.
    ///
    /// `None` once the connection has been destroyed.
    #[must_use]
    pub fn transport(&mut self) -> Option<&mut dyn Transport> {
        self.transport.as_deref_mut()
    }

    /// Handle for observing out-of-band interruption.
    #[must_use]
    pub fn interrupt_handle(&self) -> InterruptHandle {
        self.interrupt.clone()
    }

    /// Whether the pool severed this link while it was checked out.
    #[must_use]
    pub fn is_interrupted(&self) -> bool {
        self.interrupt.is_interrupted()
    }

    pub(crate) fn mark_used(&mut self) {
        self.last_used_at = Instant::now();
    }

    pub(crate) fn idle_expired(&self, max_idle_time: Duration) -> bool {
        self.last_used_at.elapsed() > max_idle_time
    }

    /// Close the underlying transport.
    ///
    /// Idempotent: the transport is shut down on the first call and every
    /// subsequent call is a no-op. Returns `true` on the call that actually
    /// closed it.
    pub(crate) fn destroy(&mut self) -> bool {
        match self.transport.take() {
            Some(mut transport) => {
                transport.shutdown();
                true
            }
            None => false,
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.destroy();
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("generation", &self.generation)
            .field("interrupted", &self.is_interrupted())
            .finish_non_exhaustive()
    }
}
