//! Process-wide maintenance scheduler
//!
//! A single worker runs at a configured cadence over every registered
//! pool: it evicts connections idle beyond the pool's threshold (down to
//! the core floor), runs keepalive probes on the oldest idle entries, and
//! reports the observability counters. Candidates are popped under the
//! pool lock and closed outside it; the worker never holds a pool lock
//! during I/O. It stops cleanly on global shutdown.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::constants::maintenance;
use crate::pool::manager::PoolManager;

pub(crate) struct MaintenanceScheduler {
    pools: Arc<DashMap<String, Arc<PoolManager>>>,
    interval: Duration,
    shutdown: Arc<Notify>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl MaintenanceScheduler {
    pub(crate) fn new(pools: Arc<DashMap<String, Arc<PoolManager>>>, interval: Duration) -> Self {
        Self {
            pools,
            interval,
            shutdown: Arc::new(Notify::new()),
            worker: Mutex::new(None),
        }
    }

    /// Spawn the worker if it is not already running. Called on first
    /// pool registration so an idle process never runs a timer.
    pub(crate) fn ensure_started(&self) {
        let mut worker = self.worker.lock().expect("scheduler lock poisoned");
        if worker.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return;
        }
        let pools = Arc::clone(&self.pools);
        let shutdown = Arc::clone(&self.shutdown);
        let interval = self.interval;
        *worker = Some(tokio::spawn(run(pools, shutdown, interval)));
    }

    /// Stop the worker. Pools themselves are shut down by the registry.
    pub(crate) fn stop(&self) {
        self.shutdown.notify_waiters();
        if let Some(handle) = self.worker.lock().expect("scheduler lock poisoned").take() {
            handle.abort();
        }
    }
}

async fn run(
    pools: Arc<DashMap<String, Arc<PoolManager>>>,
    shutdown: Arc<Notify>,
    interval: Duration,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    // The first tick fires immediately; skip it so a freshly registered
    // pool is not probed before it has seen any traffic.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.notified() => break,
        }

        // Snapshot first: pool cycles must not hold registry references
        // across awaits.
        let snapshot: Vec<Arc<PoolManager>> =
            pools.iter().map(|entry| Arc::clone(entry.value())).collect();

        for pool in snapshot {
            if pool.is_closed() {
                continue;
            }
            let evicted = pool.evict_idle(pool.limit_idle_time());
            let (checked, failed) = pool
                .keepalive_cycle(maintenance::KEEPALIVE_MAX_PER_CYCLE)
                .await;
            debug!(
                pool = %pool.name(),
                size = pool.pool_size(),
                peak = pool.peak_pool_size(),
                idle = pool.idle_count(),
                evicted,
                keepalive_checked = checked,
                keepalive_failed = failed,
                "maintenance cycle"
            );
        }
    }
}
