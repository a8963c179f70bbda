//! Connection pool implementation.
//!
//! One pool owns every connection to a single server address. All shared
//! state (connection sets, counters, generation, state flag) lives in a
//! single [`PoolInner`] behind one mutex per pool: checkout, check-in and
//! clear each observe and mutate several of these fields as one atomic
//! step, which rules out lost wakeups and over-allocation by construction.
//! The slow half of a checkout, establishing and handshaking a new
//! transport, always runs outside that critical section under a
//! reserve-then-create-then-recheck discipline.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{Notify, oneshot};
use tokio::time::{Instant, timeout_at};

use crate::config::PoolConfig;
use crate::conn::{Connection, Connector, InterruptHandle, ServerAddress, Transport};
use crate::error::{ConnectionError, Error, Result};
use crate::event::{CheckoutFailedReason, CloseReason, PoolEvent, PoolEventKind, PoolListener};
use crate::maintain;
use crate::wait_queue::{WaitQueue, WaiterReply, WaiterRx};

/// Pool lifecycle states.
///
/// `Ready ⇄ Paused` via [`Pool::clear`] and [`Pool::ready`]; either state
/// may transition to `Closed`, which is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolState {
    /// Serving checkouts and keeping the minimum warm.
    Ready,
    /// Constructed but not yet ready, or cleared after a fault.
    Paused,
    /// Closed for good; every operation fails fast.
    Closed,
}

/// Snapshot of a pool's current occupancy.
#[derive(Debug, Clone, Copy)]
pub struct PoolStatus {
    /// Current lifecycle state.
    pub state: PoolState,
    /// Current generation.
    pub generation: u64,
    /// Idle connections available for reuse.
    pub idle: u32,
    /// Connections currently checked out.
    pub in_use: u32,
    /// Reserved-but-not-yet-established connections.
    pub pending: u32,
    /// Checkout requests queued on capacity.
    pub waiting: u32,
    /// Maximum allowed connections.
    pub max: u32,
}

/// Cumulative pool counters.
#[derive(Debug, Clone, Copy)]
pub struct PoolMetrics {
    /// Connections that completed establishment and handshake.
    pub connections_created: u64,
    /// Connections destroyed, for any reason.
    pub connections_closed: u64,
    /// Checkouts that returned a connection.
    pub checkouts_successful: u64,
    /// Checkouts that failed.
    pub checkouts_failed: u64,
}

impl PoolMetrics {
    /// Fraction of checkouts that succeeded. 1.0 when none were attempted.
    #[must_use]
    pub fn checkout_success_rate(&self) -> f64 {
        let total = self.checkouts_successful + self.checkouts_failed;
        if total == 0 {
            1.0
        } else {
            self.checkouts_successful as f64 / total as f64
        }
    }
}

#[derive(Default)]
struct Counters {
    connections_created: AtomicU64,
    connections_closed: AtomicU64,
    checkouts_successful: AtomicU64,
    checkouts_failed: AtomicU64,
}

/// Mutable pool state. One ownership domain, one mutex.
struct PoolInner {
    state: PoolState,
    generation: u64,
    next_conn_id: u64,
    idle: VecDeque<Connection>,
    in_use: HashMap<u64, InterruptHandle>,
    pending: u32,
    waiting: WaitQueue,
    server_error: Option<Arc<ConnectionError>>,
}

impl PoolInner {
    fn new() -> Self {
        Self {
            state: PoolState::Paused,
            generation: 0,
            next_conn_id: 0,
            idle: VecDeque::new(),
            in_use: HashMap::new(),
            pending: 0,
            waiting: WaitQueue::new(),
            server_error: None,
        }
    }

    fn total(&self) -> usize {
        self.idle.len() + self.in_use.len() + self.pending as usize
    }

    /// Reserve a pending slot and assign the connection id for it.
    fn reserve_slot(&mut self) -> u64 {
        self.pending += 1;
        let id = self.next_conn_id;
        self.next_conn_id += 1;
        id
    }

    /// Offer newly opened capacity to the queue head.
    ///
    /// Reserves a pending slot for the promoted waiter under this same
    /// critical section, so the capacity cannot be snatched before the
    /// waiter runs its own establishment.
    fn offer_open_capacity(&mut self, max_pool_size: u32) {
        if self.state == PoolState::Closed || self.waiting.is_empty() {
            return;
        }
        if self.total() >= max_pool_size as usize {
            return;
        }
        let id = self.reserve_slot();
        if !self.waiting.promote(id, self.generation) {
            self.pending = self.pending.saturating_sub(1);
        }
    }

    /// Release a reserved slot, handing the freed capacity to a waiter
    /// when one is queued.
    fn release_pending_slot(&mut self, max_pool_size: u32) {
        self.pending = self.pending.saturating_sub(1);
        self.offer_open_capacity(max_pool_size);
    }
}

/// Outcome of a completed establishment, after the generation re-read.
pub(crate) enum Established {
    /// Generation unchanged; the connection is usable.
    Ready(Connection),
    /// A clear moved the generation mid-establishment. The connection was
    /// destroyed and the slot released; the caller falls back to the wait
    /// queue.
    Stale,
}

/// State shared between pool handles, guards and the maintainer task.
pub(crate) struct PoolShared {
    address: ServerAddress,
    config: PoolConfig,
    connector: Arc<dyn Connector>,
    inner: Mutex<PoolInner>,
    maintain: Arc<Notify>,
    listener: Option<Arc<dyn PoolListener>>,
    counters: Counters,
}

impl PoolShared {
    pub(crate) fn address(&self) -> &ServerAddress {
        &self.address
    }

    pub(crate) fn config(&self) -> &PoolConfig {
        &self.config
    }

    pub(crate) fn maintainer_wakeup(&self) -> Arc<Notify> {
        Arc::clone(&self.maintain)
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.inner.lock().state == PoolState::Closed
    }

    fn emit(&self, kind: PoolEventKind) {
        if let Some(listener) = &self.listener {
            listener.on_event(&PoolEvent::new(self.address.clone(), kind));
        }
    }

    fn closed_error(&self) -> Error {
        Error::PoolClosed {
            address: self.address.clone(),
        }
    }

    /// Destroy connections outside the critical section.
    fn dispose(&self, conns: Vec<(Connection, CloseReason)>) {
        for (mut conn, reason) in conns {
            let id = conn.id();
            if conn.destroy() {
                self.counters.connections_closed.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(id, ?reason, address = %self.address, "connection closed");
                self.emit(PoolEventKind::ConnectionClosed { id, reason });
            }
        }
    }

    /// Checkout steps 1–4: reuse idle, establish under capacity, or queue.
    async fn acquire(
        self: &Arc<Self>,
        deadline: Option<Instant>,
        started: Instant,
    ) -> Result<Connection> {
        enum Plan {
            Reuse(Connection),
            Establish { id: u64, generation: u64 },
            Wait { rx: WaiterRx, waiter_id: u64 },
        }

        // Disabled after an establishment went stale mid-flight: that
        // checkout falls back to the queue instead of reserving again, and
        // a later promotion re-arms it.
        let mut allow_establish = true;
        loop {
            let (plan, stale) = {
                let mut inner = self.inner.lock();
                if inner.state == PoolState::Closed {
                    return Err(self.closed_error());
                }
                if inner.state == PoolState::Ready {
                    // The queue fall-back applies to the paused aftermath of
                    // a clear; once the pool is ready again this checkout
                    // may establish on its own.
                    allow_establish = true;
                }

                // Lazy eviction: any stale idle connection found during the
                // scan is destroyed, never reused.
                let mut stale = Vec::new();
                let mut reuse = None;
                while let Some(conn) = inner.idle.pop_back() {
                    if conn.is_stale(inner.generation) {
                        stale.push((conn, CloseReason::Stale));
                    } else {
                        reuse = Some(conn);
                        break;
                    }
                }

                let plan = if let Some(mut conn) = reuse {
                    conn.mark_used();
                    inner.in_use.insert(conn.id(), conn.interrupt_handle());
                    Plan::Reuse(conn)
                } else if allow_establish && inner.total() < self.config.max_pool_size as usize {
                    let id = inner.reserve_slot();
                    Plan::Establish {
                        id,
                        generation: inner.generation,
                    }
                } else {
                    let (tx, rx) = oneshot::channel();
                    let waiter_id = inner.waiting.push(tx);
                    Plan::Wait { rx, waiter_id }
                };
                (plan, stale)
            };
            self.dispose(stale);

            match plan {
                Plan::Reuse(conn) => return Ok(conn),
                Plan::Establish { id, generation } => {
                    match self.establish_checked_out(id, generation).await? {
                        Established::Ready(conn) => return Ok(conn),
                        Established::Stale => allow_establish = false,
                    }
                }
                Plan::Wait { rx, waiter_id } => {
                    match self.await_reply(rx, waiter_id, deadline, started).await? {
                        WaiterReply::HandOff(conn) => return Ok(conn),
                        WaiterReply::OpenSlot { id, generation } => {
                            match self.establish_checked_out(id, generation).await? {
                                Established::Ready(conn) => return Ok(conn),
                                Established::Stale => allow_establish = false,
                            }
                        }
                    }
                }
            }
        }
    }

    /// Suspend a queued checkout until one of its resolution paths fires.
    async fn await_reply(
        self: &Arc<Self>,
        mut rx: WaiterRx,
        waiter_id: u64,
        deadline: Option<Instant>,
        started: Instant,
    ) -> Result<WaiterReply> {
        match deadline {
            None => match (&mut rx).await {
                Ok(reply) => reply,
                Err(_) => Err(self.closed_error()),
            },
            Some(deadline) => match timeout_at(deadline, &mut rx).await {
                Ok(Ok(reply)) => reply,
                Ok(Err(_)) => Err(self.closed_error()),
                Err(_) => {
                    self.expire_waiter(waiter_id, rx);
                    Err(Error::WaitQueueTimeout {
                        address: self.address.clone(),
                        waited: started.elapsed(),
                    })
                }
            },
        }
    }

    /// Remove an expired wait-queue entry, then put back anything that was
    /// handed to it in the race between the deadline and the removal.
    fn expire_waiter(self: &Arc<Self>, waiter_id: u64, mut rx: WaiterRx) {
        {
            let mut inner = self.inner.lock();
            inner.waiting.remove(waiter_id);
        }
        // Replies are only sent while the entry is queued, so after the
        // removal above the channel is settled.
        match rx.try_recv() {
            Ok(Ok(WaiterReply::HandOff(conn))) => self.reinsert(conn, false),
            Ok(Ok(WaiterReply::OpenSlot { .. })) => {
                let mut inner = self.inner.lock();
                inner.release_pending_slot(self.config.max_pool_size);
            }
            Ok(Err(_)) | Err(_) => {}
        }
    }

    /// Complete an establishment for a checkout: connect outside the lock,
    /// then re-read the generation and register the connection in-use.
    pub(crate) async fn establish_checked_out(
        self: &Arc<Self>,
        id: u64,
        reserved_generation: u64,
    ) -> Result<Established> {
        let transport = match self.connector.connect(&self.address).await {
            Ok(transport) => transport,
            Err(error) => {
                tracing::debug!(id, error = %error, address = %self.address, "connection establishment failed");
                let mut inner = self.inner.lock();
                inner.release_pending_slot(self.config.max_pool_size);
                drop(inner);
                return Err(Error::Connection(error));
            }
        };

        let mut conn = Connection::new(id, reserved_generation, transport);
        let mut disposal = None;
        let outcome = {
            let mut inner = self.inner.lock();
            inner.pending = inner.pending.saturating_sub(1);
            if inner.state == PoolState::Closed {
                disposal = Some((conn, CloseReason::PoolClosed));
                Err(self.closed_error())
            } else if inner.generation != reserved_generation {
                // A clear happened mid-establishment; the connection is
                // stale before it was ever used.
                disposal = Some((conn, CloseReason::Stale));
                inner.offer_open_capacity(self.config.max_pool_size);
                Ok(Established::Stale)
            } else {
                conn.mark_used();
                inner.in_use.insert(id, conn.interrupt_handle());
                Ok(Established::Ready(conn))
            }
        };

        if let Some(entry) = disposal {
            self.dispose(vec![entry]);
        }
        if matches!(outcome, Ok(Established::Ready(_))) {
            self.counters.connections_created.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(id, generation = reserved_generation, address = %self.address, "connection established");
            self.emit(PoolEventKind::ConnectionCreated { id });
        }
        outcome
    }

    /// Complete a maintainer establishment: the finished connection goes to
    /// the queue head when someone is waiting, otherwise to the idle set.
    pub(crate) async fn establish_into_pool(self: &Arc<Self>, id: u64, reserved_generation: u64) {
        let transport = match self.connector.connect(&self.address).await {
            Ok(transport) => transport,
            Err(error) => {
                tracing::debug!(id, error = %error, address = %self.address, "warm-up establishment failed");
                let mut inner = self.inner.lock();
                inner.release_pending_slot(self.config.max_pool_size);
                return;
            }
        };

        let mut conn = Connection::new(id, reserved_generation, transport);
        let mut disposal = None;
        let mut created = false;
        {
            let mut inner = self.inner.lock();
            inner.pending = inner.pending.saturating_sub(1);
            if inner.state == PoolState::Closed {
                disposal = Some((conn, CloseReason::PoolClosed));
            } else if inner.generation != reserved_generation {
                disposal = Some((conn, CloseReason::Stale));
                inner.offer_open_capacity(self.config.max_pool_size);
            } else {
                conn.mark_used();
                created = true;
                if inner.waiting.is_empty() {
                    inner.idle.push_back(conn);
                } else {
                    let conn_id = conn.id();
                    inner.in_use.insert(conn_id, conn.interrupt_handle());
                    let mut slot = Some(conn);
                    if inner.waiting.hand_off(&mut slot).is_none() {
                        inner.in_use.remove(&conn_id);
                        if let Some(conn) = slot.take() {
                            inner.idle.push_back(conn);
                        }
                    }
                }
            }
        }

        if let Some(entry) = disposal {
            self.dispose(vec![entry]);
        }
        if created {
            self.counters.connections_created.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(id, generation = reserved_generation, address = %self.address, "connection established");
            self.emit(PoolEventKind::ConnectionCreated { id });
        }
    }

    /// Return a connection to the pool.
    pub(crate) fn check_in(self: &Arc<Self>, conn: Connection, observed: Option<Arc<ConnectionError>>) {
        tracing::trace!(id = conn.id(), address = %self.address, "connection checked in");
        self.emit(PoolEventKind::ConnectionCheckedIn { id: conn.id() });

        // A whole-link fault observed during use clears the pool before the
        // connection itself is dealt with.
        if let Some(error) = observed.as_ref() {
            if error.is_network_error() {
                self.clear_with(Arc::clone(error), false);
            }
        }

        self.reinsert(conn, observed.is_some());
    }

    /// Put a returned connection back into circulation, destroying it when
    /// it is no longer usable.
    fn reinsert(self: &Arc<Self>, conn: Connection, errored: bool) {
        let mut disposal = None;
        {
            let mut inner = self.inner.lock();
            inner.in_use.remove(&conn.id());

            let reason = if inner.state == PoolState::Closed {
                Some(CloseReason::PoolClosed)
            } else if errored {
                Some(CloseReason::Error)
            } else if conn.is_stale(inner.generation) || conn.is_interrupted() {
                Some(CloseReason::Stale)
            } else {
                None
            };

            match reason {
                Some(reason) => {
                    disposal = Some((conn, reason));
                    inner.offer_open_capacity(self.config.max_pool_size);
                }
                None => {
                    let mut conn = conn;
                    conn.mark_used();
                    if inner.waiting.is_empty() {
                        inner.idle.push_back(conn);
                    } else {
                        // Direct handoff: the connection never becomes
                        // visible as idle while someone is queued.
                        let conn_id = conn.id();
                        inner.in_use.insert(conn_id, conn.interrupt_handle());
                        let mut slot = Some(conn);
                        if inner.waiting.hand_off(&mut slot).is_none() {
                            inner.in_use.remove(&conn_id);
                            if let Some(conn) = slot.take() {
                                inner.idle.push_back(conn);
                            }
                        }
                    }
                }
            }
        }
        if let Some(entry) = disposal {
            self.dispose(vec![entry]);
        }
    }

    /// Invalidate the current generation of connections.
    pub(crate) fn clear_with(self: &Arc<Self>, cause: Arc<ConnectionError>, interrupt_in_use: bool) {
        let mut disposals = Vec::new();
        {
            let mut inner = self.inner.lock();
            if inner.state == PoolState::Closed {
                return;
            }
            inner.generation += 1;
            inner.state = PoolState::Paused;
            inner.server_error = Some(Arc::clone(&cause));

            while let Some(conn) = inner.idle.pop_front() {
                disposals.push((conn, CloseReason::Stale));
            }

            if interrupt_in_use {
                for handle in inner.in_use.values() {
                    handle.interrupt();
                }
            }

            let address = self.address.clone();
            if interrupt_in_use {
                inner.waiting.reject_all(|| Error::PoolClearedOnNetworkError {
                    address: address.clone(),
                    cause: Arc::clone(&cause),
                });
            } else {
                inner.waiting.reject_all(|| Error::PoolCleared {
                    address: address.clone(),
                    cause: Arc::clone(&cause),
                });
            }

            tracing::debug!(
                address = %self.address,
                generation = inner.generation,
                interrupt_in_use,
                cause = %cause,
                "pool cleared"
            );
        }
        self.dispose(disposals);
        self.emit(PoolEventKind::PoolCleared {
            interrupted_in_use: interrupt_in_use,
        });
    }

    /// `Paused → Ready`. No-op in any other state.
    pub(crate) fn mark_ready(self: &Arc<Self>) {
        let became_ready = {
            let mut inner = self.inner.lock();
            if inner.state != PoolState::Paused {
                false
            } else {
                inner.state = PoolState::Ready;
                inner.server_error = None;
                // Anyone parked on capacity may now establish again.
                while !inner.waiting.is_empty()
                    && inner.total() < self.config.max_pool_size as usize
                {
                    let id = inner.reserve_slot();
                    let generation = inner.generation;
                    if !inner.waiting.promote(id, generation) {
                        inner.pending = inner.pending.saturating_sub(1);
                        break;
                    }
                }
                true
            }
        };
        if became_ready {
            tracing::debug!(address = %self.address, "pool ready");
            self.emit(PoolEventKind::PoolReady);
            self.maintain.notify_one();
        }
    }

    /// Terminal transition. Idempotent; the second call does nothing.
    pub(crate) fn close_pool(self: &Arc<Self>) {
        let mut disposals = Vec::new();
        {
            let mut inner = self.inner.lock();
            if inner.state == PoolState::Closed {
                return;
            }
            inner.state = PoolState::Closed;

            while let Some(conn) = inner.idle.pop_front() {
                disposals.push((conn, CloseReason::PoolClosed));
            }
            // Best-effort severing of checked-out links; each is destroyed
            // for real at its next check-in.
            for handle in inner.in_use.values() {
                handle.interrupt();
            }
            inner.in_use.clear();

            let address = self.address.clone();
            inner
                .waiting
                .reject_all(|| Error::PoolClosed {
                    address: address.clone(),
                });
            tracing::debug!(address = %self.address, "pool closed");
        }
        self.dispose(disposals);
        self.emit(PoolEventKind::PoolClosed);
        self.maintain.notify_one();
    }

    /// One maintainer cycle: evict idle-expired connections, then refill
    /// toward the minimum while ready.
    pub(crate) async fn perform_maintenance(self: &Arc<Self>) {
        let mut disposals = Vec::new();
        let mut to_create = Vec::new();
        {
            let mut inner = self.inner.lock();
            if inner.state == PoolState::Closed {
                return;
            }

            if let Some(max_idle) = self.config.max_idle_time {
                let mut kept = VecDeque::with_capacity(inner.idle.len());
                while let Some(conn) = inner.idle.pop_front() {
                    if conn.idle_expired(max_idle) {
                        disposals.push((conn, CloseReason::Idle));
                    } else {
                        kept.push_back(conn);
                    }
                }
                inner.idle = kept;
            }

            if inner.state == PoolState::Ready {
                while inner.total() < self.config.min_pool_size as usize
                    && inner.total() < self.config.max_pool_size as usize
                {
                    let id = inner.reserve_slot();
                    to_create.push((id, inner.generation));
                }
            }
        }
        self.dispose(disposals);
        for (id, generation) in to_create {
            self.establish_into_pool(id, generation).await;
        }
    }
}

impl fmt::Debug for PoolShared {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("PoolShared")
            .field("address", &self.address)
            .field("state", &inner.state)
            .field("generation", &inner.generation)
            .field("idle", &inner.idle.len())
            .field("in_use", &inner.in_use.len())
            .field("pending", &inner.pending)
            .field("waiting", &inner.waiting.len())
            .finish_non_exhaustive()
    }
}

fn failure_reason(error: &Error) -> CheckoutFailedReason {
    match error {
        Error::PoolClosed { .. } => CheckoutFailedReason::PoolClosed,
        Error::PoolCleared { .. } | Error::PoolClearedOnNetworkError { .. } => {
            CheckoutFailedReason::PoolCleared
        }
        Error::WaitQueueTimeout { .. } => CheckoutFailedReason::Timeout,
        Error::Connection(_) | Error::Configuration(_) => CheckoutFailedReason::ConnectionError,
    }
}

/// A connection pool bound to one server address.
///
/// Cheap to clone; all clones share the same state. Pools are constructed
/// paused and start serving maintained connections only after the
/// monitoring layer signals [`Pool::ready`].
#[derive(Clone, Debug)]
pub struct Pool {
    shared: Arc<PoolShared>,
}

impl Pool {
    /// Start building a pool.
    #[must_use]
    pub fn builder() -> PoolBuilder {
        PoolBuilder::new()
    }

    /// The server address this pool is bound to.
    #[must_use]
    pub fn address(&self) -> &ServerAddress {
        self.shared.address()
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> PoolState {
        self.shared.inner.lock().state
    }

    /// Whether the pool reached its terminal closed state.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    /// The fault recorded at the most recent clear, if the pool has not
    /// been marked ready since.
    #[must_use]
    pub fn server_error(&self) -> Option<Arc<ConnectionError>> {
        self.shared.inner.lock().server_error.clone()
    }

    /// Snapshot of current occupancy.
    #[must_use]
    pub fn status(&self) -> PoolStatus {
        let inner = self.shared.inner.lock();
        PoolStatus {
            state: inner.state,
            generation: inner.generation,
            idle: inner.idle.len() as u32,
            in_use: inner.in_use.len() as u32,
            pending: inner.pending,
            waiting: inner.waiting.len() as u32,
            max: self.shared.config.max_pool_size,
        }
    }

    /// Cumulative counters.
    #[must_use]
    pub fn metrics(&self) -> PoolMetrics {
        let c = &self.shared.counters;
        PoolMetrics {
            connections_created: c.connections_created.load(Ordering::Relaxed),
            connections_closed: c.connections_closed.load(Ordering::Relaxed),
            checkouts_successful: c.checkouts_successful.load(Ordering::Relaxed),
            checkouts_failed: c.checkouts_failed.load(Ordering::Relaxed),
        }
    }

    /// Check out a connection, waiting up to the configured
    /// `wait_queue_timeout` when the pool is at capacity.
    pub async fn check_out(&self) -> Result<PooledConnection> {
        self.check_out_with_timeout(self.shared.config.wait_queue_timeout)
            .await
    }

    /// Check out a connection with an explicit deadline override.
    ///
    /// `None` waits indefinitely. The returned guard checks the connection
    /// back in when dropped.
    pub async fn check_out_with_timeout(
        &self,
        timeout: Option<Duration>,
    ) -> Result<PooledConnection> {
        self.shared.emit(PoolEventKind::CheckoutStarted);
        let started = Instant::now();
        let deadline = timeout.map(|t| started + t);

        match self.shared.acquire(deadline, started).await {
            Ok(conn) => {
                self.shared
                    .counters
                    .checkouts_successful
                    .fetch_add(1, Ordering::Relaxed);
                tracing::trace!(id = conn.id(), address = %self.shared.address, "connection checked out");
                self.shared
                    .emit(PoolEventKind::ConnectionCheckedOut { id: conn.id() });
                Ok(PooledConnection {
                    conn: Some(conn),
                    shared: Arc::clone(&self.shared),
                })
            }
            Err(error) => {
                self.shared
                    .counters
                    .checkouts_failed
                    .fetch_add(1, Ordering::Relaxed);
                tracing::debug!(error = %error, address = %self.shared.address, "checkout failed");
                self.shared.emit(PoolEventKind::CheckoutFailed {
                    reason: failure_reason(&error),
                });
                Err(error)
            }
        }
    }

    /// Invalidate every connection of the current generation.
    ///
    /// Idle connections are destroyed immediately; in-use connections are
    /// destroyed at their next check-in (or severed now when
    /// `interrupt_in_use` is set, for faults known to affect the whole
    /// link). Queued checkouts fail fast with a retry-labeled error.
    pub fn clear(&self, cause: ConnectionError, interrupt_in_use: bool) {
        self.shared.clear_with(Arc::new(cause), interrupt_in_use);
    }

    /// Mark the pool ready to serve. Signaled by the monitoring layer.
    pub fn ready(&self) {
        self.shared.mark_ready();
    }

    /// Close the pool for good. Idempotent.
    pub fn close(&self) {
        self.shared.close_pool();
    }
}

/// Builder for [`Pool`].
pub struct PoolBuilder {
    address: Option<ServerAddress>,
    connector: Option<Arc<dyn Connector>>,
    config: PoolConfig,
    listener: Option<Arc<dyn PoolListener>>,
}

impl PoolBuilder {
    fn new() -> Self {
        Self {
            address: None,
            connector: None,
            config: PoolConfig::default(),
            listener: None,
        }
    }

    /// Server address the pool connects to. Required.
    #[must_use]
    pub fn address(mut self, address: ServerAddress) -> Self {
        self.address = Some(address);
        self
    }

    /// Transport establishment collaborator. Required.
    #[must_use]
    pub fn connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Replace the whole configuration.
    #[must_use]
    pub fn config(mut self, config: PoolConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the maximum number of connections.
    #[must_use]
    pub fn max_pool_size(mut self, count: u32) -> Self {
        self.config.max_pool_size = count;
        self
    }

    /// Set the minimum number of connections to keep warm.
    #[must_use]
    pub fn min_pool_size(mut self, count: u32) -> Self {
        self.config.min_pool_size = count;
        self
    }

    /// Set the idle eviction threshold.
    #[must_use]
    pub fn max_idle_time(mut self, timeout: Duration) -> Self {
        self.config.max_idle_time = Some(timeout);
        self
    }

    /// Set the checkout wait deadline.
    #[must_use]
    pub fn wait_queue_timeout(mut self, timeout: Duration) -> Self {
        self.config.wait_queue_timeout = Some(timeout);
        self
    }

    /// Set the interval between maintainer cycles.
    #[must_use]
    pub fn maintenance_interval(mut self, interval: Duration) -> Self {
        self.config.maintenance_interval = interval;
        self
    }

    /// Install a lifecycle event listener.
    #[must_use]
    pub fn listener(mut self, listener: Arc<dyn PoolListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    /// Build the pool and spawn its maintainer task.
    ///
    /// Must be called within a Tokio runtime. The pool starts paused with
    /// zero connections.
    pub fn build(self) -> Result<Pool> {
        self.config.validate()?;
        let address = self
            .address
            .ok_or_else(|| Error::Configuration("address is required".into()))?;
        let connector = self
            .connector
            .ok_or_else(|| Error::Configuration("connector is required".into()))?;

        let shared = Arc::new(PoolShared {
            address,
            config: self.config,
            connector,
            inner: Mutex::new(PoolInner::new()),
            maintain: Arc::new(Notify::new()),
            listener: self.listener,
            counters: Counters::default(),
        });

        tracing::debug!(address = %shared.address, "pool created");
        shared.emit(PoolEventKind::PoolCreated);
        maintain::spawn(Arc::clone(&shared));

        Ok(Pool { shared })
    }
}

impl fmt::Debug for PoolBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolBuilder")
            .field("address", &self.address)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// A checked-out connection.
///
/// Dropping the guard checks the connection back in cleanly; use
/// [`PooledConnection::check_in_with_error`] to report an observed fault
/// instead.
pub struct PooledConnection {
    conn: Option<Connection>,
    shared: Arc<PoolShared>,
}

impl PooledConnection {
    fn conn(&self) -> &Connection {
        match &self.conn {
            Some(conn) => conn,
            // The option is emptied only by consuming methods and Drop.
            None => unreachable!(),
        }
    }

    /// Identity of the underlying connection.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.conn().id()
    }

    /// The pool generation the connection was created under.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.conn().generation()
    }

    /// Access the underlying transport session.
    #[must_use]
    pub fn transport(&mut self) -> Option<&mut dyn Transport> {
        self.conn.as_mut().and_then(Connection::transport)
    }

    /// Whether the pool severed this link while checked out.
    #[must_use]
    pub fn is_interrupted(&self) -> bool {
        self.conn().is_interrupted()
    }

    /// Wait until the pool severs this link.
    pub async fn interrupted(&self) {
        let handle = self.conn().interrupt_handle();
        handle.interrupted().await;
    }

    /// Check the connection back in explicitly. Equivalent to dropping.
    pub fn check_in(self) {
        drop(self);
    }

    /// Check the connection back in, reporting a fault observed while
    /// using it.
    ///
    /// The connection is destroyed. A fault classified as a whole-link
    /// network error additionally clears the pool.
    pub fn check_in_with_error(mut self, error: ConnectionError) {
        if let Some(conn) = self.conn.take() {
            self.shared.check_in(conn, Some(Arc::new(error)));
        }
    }

    /// Remove the connection from pool accounting and take ownership.
    ///
    /// The connection no longer counts toward the pool's capacity and is
    /// never returned to it; closing it becomes the caller's job.
    #[must_use]
    pub fn detach(mut self) -> Connection {
        match self.conn.take() {
            Some(conn) => {
                let mut inner = self.shared.inner.lock();
                inner.in_use.remove(&conn.id());
                inner.offer_open_capacity(self.shared.config.max_pool_size);
                conn
            }
            None => unreachable!(),
        }
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.shared.check_in(conn, None);
        }
    }
}

impl fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledConnection")
            .field("conn", &self.conn)
            .finish_non_exhaustive()
    }
}
