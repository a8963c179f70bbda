//! Background pool maintenance.
//!
//! One task per pool, spawned at construction. Each cycle evicts
//! idle-expired connections and, while the pool is ready, refills toward
//! `min_pool_size` under the same reserve-before-create discipline as
//! checkout. The task wakes on a fixed interval or when the pool signals
//! it: `ready()` to begin refilling without waiting out the interval,
//! `close()` to stop. It exits permanently once the pool closes.

use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::MissedTickBehavior;

use crate::pool::PoolShared;

pub(crate) fn spawn(shared: Arc<PoolShared>) {
    let wakeup = shared.maintainer_wakeup();
    let period = shared.config().maintenance_interval;
    tokio::spawn(run(Arc::downgrade(&shared), wakeup, period));
}

/// Holds only a weak reference between cycles, so a pool abandoned without
/// `close()` can still be freed once every handle is gone.
async fn run(pool: Weak<PoolShared>, wakeup: Arc<Notify>, period: Duration) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = interval.tick() => {}
            () = wakeup.notified() => {}
        }
        let Some(shared) = pool.upgrade() else { break };
        if shared.is_closed() {
            tracing::debug!(address = %shared.address(), "pool closed, maintainer stopping");
            break;
        }
        shared.perform_maintenance().await;
    }
}
