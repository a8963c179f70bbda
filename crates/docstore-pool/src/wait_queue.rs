//! FIFO backlog of checkout requests blocked on capacity.
//!
//! Entries are serviced in strict arrival order. Deadlines are enforced
//! reactively: the waiting task owns its own deadline (`timeout_at` around
//! the reply channel) and removes its entry once it expires, so the queue
//! itself never runs timers. A reply that races an expiring deadline is
//! reclaimed by the sender and offered to the next entry.

use std::collections::VecDeque;
use std::time::Instant;

use tokio::sync::oneshot;

use crate::conn::Connection;
use crate::error::Error;

/// Reply delivered to a queued checkout request.
pub(crate) enum WaiterReply {
    /// A freed connection handed directly to this waiter. It was never
    /// visible as idle to concurrent scans.
    HandOff(Connection),
    /// Capacity opened up; a pending slot (and connection id) has been
    /// reserved for this waiter, which now runs its own establishment.
    OpenSlot {
        /// Reserved connection id.
        id: u64,
        /// Pool generation read at reservation.
        generation: u64,
    },
}

pub(crate) type WaiterTx = oneshot::Sender<Result<WaiterReply, Error>>;
pub(crate) type WaiterRx = oneshot::Receiver<Result<WaiterReply, Error>>;

struct Waiter {
    id: u64,
    enqueued_at: Instant,
    tx: WaiterTx,
}

/// The backlog itself. Owned by the pool's critical section.
pub(crate) struct WaitQueue {
    entries: VecDeque<Waiter>,
    next_id: u64,
}

impl WaitQueue {
    pub(crate) fn new() -> Self {
        Self {
            entries: VecDeque::new(),
            next_id: 0,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Enqueue a request and return its entry id.
    pub(crate) fn push(&mut self, tx: WaiterTx) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.entries.push_back(Waiter {
            id,
            enqueued_at: Instant::now(),
            tx,
        });
        id
    }

    /// Hand a freed connection to the earliest live waiter.
    ///
    /// Takes the connection out of `slot` when an entry accepts it. Entries
    /// whose receivers are gone (deadline elapsed, caller dropped) are
    /// discarded along the way and the connection is reclaimed for the next
    /// entry. The connection is left in `slot` when no entry takes it.
    pub(crate) fn hand_off(&mut self, slot: &mut Option<Connection>) -> Option<u64> {
        while let Some(waiter) = self.entries.pop_front() {
            let conn = slot.take()?;
            match waiter.tx.send(Ok(WaiterReply::HandOff(conn))) {
                Ok(()) => {
                    tracing::trace!(
                        waiter = waiter.id,
                        waited_ms = waiter.enqueued_at.elapsed().as_millis() as u64,
                        "handed freed connection to queued checkout"
                    );
                    return Some(waiter.id);
                }
                // Receiver gave up; oneshot hands back the value it was
                // given, so reclaim the connection and keep going.
                Err(Ok(WaiterReply::HandOff(reclaimed))) => *slot = Some(reclaimed),
                Err(_) => {}
            }
        }
        None
    }

    /// Offer a reserved pending slot to the earliest live waiter.
    ///
    /// Returns `true` when an entry accepted the slot. The caller reserved
    /// the slot under the same critical section and must release it when
    /// this returns `false`.
    pub(crate) fn promote(&mut self, id: u64, generation: u64) -> bool {
        while let Some(waiter) = self.entries.pop_front() {
            if waiter
                .tx
                .send(Ok(WaiterReply::OpenSlot { id, generation }))
                .is_ok()
            {
                tracing::trace!(
                    waiter = waiter.id,
                    connection = id,
                    "promoted queued checkout to establish its own connection"
                );
                return true;
            }
        }
        false
    }

    /// Remove an entry after its deadline elapsed.
    ///
    /// Expired entries are usually at or near the front.
    pub(crate) fn remove(&mut self, id: u64) -> bool {
        match self.entries.iter().position(|w| w.id == id) {
            Some(pos) => {
                self.entries.remove(pos);
                true
            }
            None => false,
        }
    }

    /// Fail every queued entry, constructing a fresh error per entry.
    pub(crate) fn reject_all(&mut self, mut error: impl FnMut() -> Error) {
        for waiter in self.entries.drain(..) {
            let _ = waiter.tx.send(Err(error()));
        }
    }
}
