//! Pool manager
//!
//! Owns the idle chain and the full set of live proxies; implements
//! acquire/release, growth on demand, shrink, validation, and shutdown.
//!
//! Locking discipline: one `std::sync::Mutex` serializes chain mutation
//! together with the growth reservations that must be observed with it.
//! The lock is only ever held around in-memory operations; driver I/O
//! (connecting, probing, closing) happens outside it. `pool_size` is an
//! atomic read lock-free for fast-path checks; definitive grow/shrink
//! decisions re-check under the lock.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::config::PoolConfig;
use crate::datasource::DataSource;
use crate::error::PoolError;
use crate::tx::TransactionCoordinator;

use super::PoolStatus;
use super::chain::IdleChain;
use super::pooled::PooledConnection;
use super::probe::LivenessProbe;
use super::proxy::ConnectionProxy;

struct PoolShared {
    chain: IdleChain,
    /// Connections reserved by an in-flight fill. Observed together with
    /// the chain so concurrent acquires never over-allocate past max.
    pending: usize,
}

pub(crate) struct PoolManager {
    cfg: PoolConfig,
    source: Arc<dyn DataSource>,
    probe: Option<LivenessProbe>,
    self_ref: Weak<PoolManager>,
    shared: Mutex<PoolShared>,
    /// Every live proxy, owned by the pool; used for forced shutdown.
    all_proxies: Mutex<HashMap<u64, Arc<ConnectionProxy>>>,
    /// Signalled once per released or newly filled connection.
    not_empty: Notify,
    pool_size: AtomicUsize,
    peak_pool_size: AtomicUsize,
    closed: AtomicBool,
    next_proxy_id: AtomicU64,
}

impl std::fmt::Debug for PoolManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolManager")
            .field("name", &self.cfg.name)
            .field("pool_size", &self.pool_size())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl PoolManager {
    /// Create a pool and pre-populate it with `core_pool_size`
    /// connections; provision the test table once when configured.
    pub(crate) async fn init(
        cfg: PoolConfig,
        source: Arc<dyn DataSource>,
    ) -> Result<Arc<Self>, PoolError> {
        let probe = LivenessProbe::from_config(&cfg);
        let pool = Arc::new_cyclic(|weak| Self {
            cfg,
            source,
            probe,
            self_ref: weak.clone(),
            shared: Mutex::new(PoolShared {
                chain: IdleChain::new(),
                pending: 0,
            }),
            all_proxies: Mutex::new(HashMap::new()),
            not_empty: Notify::new(),
            pool_size: AtomicUsize::new(0),
            peak_pool_size: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
            next_proxy_id: AtomicU64::new(0),
        });

        let core = pool.cfg.core_pool_size;
        if core > 0 {
            pool.lock_shared().pending += core;
            pool.fill_reserved(core).await?;
        }
        if pool.probe.is_some() {
            pool.init_test_table().await?;
        }
        info!(pool = %pool.cfg.name, size = core, "pool initialized");
        Ok(pool)
    }

    fn lock_shared(&self) -> MutexGuard<'_, PoolShared> {
        self.shared.lock().expect("pool lock poisoned")
    }

    pub(crate) fn name(&self) -> &str {
        &self.cfg.name
    }

    pub(crate) fn limit_idle_time(&self) -> Duration {
        self.cfg.limit_idle_time
    }

    pub(crate) fn pool_size(&self) -> usize {
        self.pool_size.load(Ordering::Acquire)
    }

    pub(crate) fn peak_pool_size(&self) -> usize {
        self.peak_pool_size.load(Ordering::Acquire)
    }

    pub(crate) fn idle_count(&self) -> usize {
        self.lock_shared().chain.len()
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub(crate) fn status(&self) -> PoolStatus {
        let idle = self.idle_count();
        let size = self.pool_size();
        PoolStatus {
            pool_size: size,
            peak_pool_size: self.peak_pool_size(),
            idle_count: idle,
            in_use_count: size.saturating_sub(idle),
            max_pool_size: self.cfg.max_pool_size,
            closed: self.is_closed(),
        }
    }

    /// Check out a connection, growing the pool on demand.
    pub(crate) async fn acquire(
        self: &Arc<Self>,
        coordinator: Option<TransactionCoordinator>,
    ) -> Result<PooledConnection, PoolError> {
        let proxy = self.acquire_proxy().await?;
        Ok(PooledConnection::new(proxy, coordinator))
    }

    /// Bounded-wait variant: on expiry the acquire fails with `Timeout`
    /// and pool state is left unchanged.
    pub(crate) async fn acquire_timeout(
        self: &Arc<Self>,
        wait: Duration,
        coordinator: Option<TransactionCoordinator>,
    ) -> Result<PooledConnection, PoolError> {
        match tokio::time::timeout(wait, self.acquire_proxy()).await {
            Ok(result) => result.map(|proxy| PooledConnection::new(proxy, coordinator)),
            Err(_) => Err(PoolError::Timeout {
                pool: self.cfg.name.clone(),
                waited: wait,
            }),
        }
    }

    async fn acquire_proxy(self: &Arc<Self>) -> Result<Arc<ConnectionProxy>, PoolError> {
        let mut waited = false;
        loop {
            if self.is_closed() {
                return Err(if waited {
                    PoolError::Interrupted {
                        pool: self.cfg.name.clone(),
                    }
                } else {
                    PoolError::PoolClosed {
                        pool: self.cfg.name.clone(),
                    }
                });
            }

            // Register interest before checking the chain, so a release
            // racing with this check cannot be missed.
            let notified = self.not_empty.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            enum Next {
                Got(Arc<ConnectionProxy>),
                Grow(usize),
                Wait,
            }

            let next = {
                let mut shared = self.lock_shared();
                if let Some(proxy) = shared.chain.pop_most_recent() {
                    Next::Got(proxy)
                } else {
                    let size = self.pool_size.load(Ordering::Acquire);
                    let headroom = self
                        .cfg
                        .max_pool_size
                        .saturating_sub(size + shared.pending);
                    if headroom > 0 {
                        let n = self.cfg.acquire_increment.min(headroom);
                        shared.pending += n;
                        Next::Grow(n)
                    } else if shared.pending == 0 && self.cfg.useless_connection_exception {
                        return Err(PoolError::Exhausted {
                            pool: self.cfg.name.clone(),
                            max: self.cfg.max_pool_size,
                        });
                    } else {
                        Next::Wait
                    }
                }
            };

            match next {
                Next::Got(proxy) => {
                    proxy.mark_in_use();
                    if self.cfg.test_before_use && !self.validate(&proxy).await {
                        debug!(pool = %self.cfg.name, proxy = proxy.id(),
                               "connection failed validation, destroying and replacing");
                        self.discard(&proxy);
                        self.spawn_fill(1);
                        continue;
                    }
                    return Ok(proxy);
                }
                Next::Grow(n) => {
                    // Driver calls during growth are not cancellable: the
                    // fill runs as its own task so it completes (and keeps
                    // the accounting straight) even if this acquire is
                    // abandoned mid-wait.
                    let pool = Arc::clone(self);
                    let fill = tokio::spawn(async move { pool.fill_reserved(n).await });
                    match fill.await {
                        Ok(result) => result?,
                        Err(e) => return Err(PoolError::Driver(anyhow::anyhow!(e))),
                    }
                }
                Next::Wait => {
                    waited = true;
                    notified.await;
                }
            }
        }
    }

    /// Return a checked-out proxy to the pool.
    ///
    /// Releasing a proxy that is not checked out is a no-op: the owned
    /// `PooledConnection` already makes double release unrepresentable,
    /// so anything else reaching here is stale.
    pub(crate) fn release(&self, proxy: Arc<ConnectionProxy>) {
        if !proxy.is_in_use() {
            debug!(pool = %self.cfg.name, proxy = proxy.id(),
                   "ignoring release of a proxy that is not checked out");
            return;
        }
        proxy.drain_statements();
        let recyclable = proxy.restore_autocommit();
        if recyclable {
            // Re-checked under the pool lock: shutdown clears the chain
            // under this lock, so a closing pool can never re-admit us.
            let mut shared = self.lock_shared();
            if !self.is_closed() {
                proxy.mark_idle();
                shared.chain.add(proxy);
                drop(shared);
                self.not_empty.notify_one();
                return;
            }
        }
        self.discard(&proxy);
    }

    /// Open connections for a prior `pending` reservation of `n`, insert
    /// them into the chain, and publish `pool_size` once at the end.
    async fn fill_reserved(&self, n: usize) -> Result<(), PoolError> {
        let mut created = 0usize;
        let mut result = Ok(());
        for _ in 0..n {
            match self.try_get_connection().await {
                Ok(proxy) => {
                    // Re-checked after every connect so an in-flight fill
                    // aborts promptly on shutdown.
                    if self.is_closed() {
                        self.all_proxies.lock().expect("proxy set poisoned").remove(&proxy.id());
                        proxy.destroy();
                        result = Err(PoolError::PoolClosed {
                            pool: self.cfg.name.clone(),
                        });
                        break;
                    }
                    proxy.mark_idle();
                    self.lock_shared().chain.add(proxy);
                    self.not_empty.notify_one();
                    created += 1;
                }
                Err(e) => {
                    result = Err(e);
                    break;
                }
            }
        }

        let published = {
            // The reservation hand-off must be atomic with the size
            // publication, or a concurrent acquire could observe the
            // reservation gone before the size landed and over-allocate.
            let mut shared = self.lock_shared();
            shared.pending -= n;
            if created > 0 {
                let new_size = self.pool_size.fetch_add(created, Ordering::AcqRel) + created;
                self.peak_pool_size.fetch_max(new_size, Ordering::AcqRel);
                Some(new_size)
            } else {
                None
            }
        };
        if let Some(size) = published {
            debug!(pool = %self.cfg.name, created, size, "pool grown");
        }
        if result.is_err() {
            // Waiters counting on this fill must recheck and surface or
            // retry growth themselves.
            self.not_empty.notify_waiters();
        }
        result
    }

    /// Reserve up to `want` connections of headroom and fill them on a
    /// detached task. Used for validation replacements and keepalive
    /// refills, where the caller must not block on the driver.
    fn spawn_fill(&self, want: usize) {
        let n = {
            let mut shared = self.lock_shared();
            let size = self.pool_size.load(Ordering::Acquire);
            let headroom = self
                .cfg
                .max_pool_size
                .saturating_sub(size + shared.pending);
            let n = want.min(headroom);
            shared.pending += n;
            n
        };
        if n == 0 {
            return;
        }
        let Some(pool) = self.self_ref.upgrade() else {
            return;
        };
        tokio::spawn(async move {
            if let Err(e) = pool.fill_reserved(n).await {
                warn!(pool = %pool.cfg.name, "replacement fill failed: {e}");
            }
        });
    }

    /// Loop the driver until success or `acquire_retry_times + 1`
    /// failures.
    async fn try_get_connection(&self) -> Result<Arc<ConnectionProxy>, PoolError> {
        let mut attempts = 0usize;
        loop {
            attempts += 1;
            match self.source.get_common_connection().await {
                Ok(common) => {
                    let id = self.next_proxy_id.fetch_add(1, Ordering::Relaxed);
                    let proxy = ConnectionProxy::new(id, self.self_ref.clone(), common);
                    self.all_proxies
                        .lock()
                        .expect("proxy set poisoned")
                        .insert(id, Arc::clone(&proxy));
                    return Ok(proxy);
                }
                Err(e) => {
                    warn!(pool = %self.cfg.name, attempt = attempts,
                          "connect attempt failed: {e:#}");
                    if attempts > self.cfg.acquire_retry_times {
                        return Err(PoolError::ConnectFailed {
                            pool: self.cfg.name.clone(),
                            attempts,
                            source: e,
                        });
                    }
                }
            }
        }
    }

    async fn validate(&self, proxy: &Arc<ConnectionProxy>) -> bool {
        let Some(probe) = self.probe.clone() else {
            return true;
        };
        let Some(mut conn) = proxy.take_conn() else {
            return false;
        };
        let ok = probe.check(conn.as_mut()).await;
        proxy.restore_conn(conn);
        ok
    }

    /// Remove a proxy from the live set, close it, and account for it.
    /// Only the call that actually performs the close pays the
    /// `pool_size` decrement.
    fn discard(&self, proxy: &Arc<ConnectionProxy>) {
        self.all_proxies
            .lock()
            .expect("proxy set poisoned")
            .remove(&proxy.id());
        if proxy.destroy() {
            self.pool_size.fetch_sub(1, Ordering::AcqRel);
        }
    }

    /// Init-time test-table provisioning: uses a core connection when one
    /// exists, otherwise a throwaway one.
    async fn init_test_table(&self) -> Result<(), PoolError> {
        let Some(probe) = self.probe.clone() else {
            return Ok(());
        };
        if self.cfg.core_pool_size > 0 {
            let Some(proxy) = self.lock_shared().chain.pop_most_recent() else {
                return Ok(());
            };
            proxy.mark_in_use();
            let result = self.ensure_table_on(&probe, &proxy).await;
            proxy.mark_idle();
            self.lock_shared().chain.add(proxy);
            self.not_empty.notify_one();
            result
        } else {
            let proxy = self.try_get_connection().await?;
            proxy.mark_in_use();
            let result = self.ensure_table_on(&probe, &proxy).await;
            self.all_proxies
                .lock()
                .expect("proxy set poisoned")
                .remove(&proxy.id());
            proxy.destroy();
            result
        }
    }

    async fn ensure_table_on(
        &self,
        probe: &LivenessProbe,
        proxy: &Arc<ConnectionProxy>,
    ) -> Result<(), PoolError> {
        let Some(mut conn) = proxy.take_conn() else {
            return Err(PoolError::ProxyClosed);
        };
        let result = probe.ensure_table(conn.as_mut()).await;
        proxy.restore_conn(conn);
        result.map_err(PoolError::Driver)
    }

    /// Close chain entries idle longer than `threshold`, keeping at least
    /// `core_pool_size` connections. Returns the number evicted.
    pub(crate) fn evict_idle(&self, threshold: Duration) -> usize {
        let victims = {
            let mut shared = self.lock_shared();
            let size = self.pool_size.load(Ordering::Acquire);
            let excess = size.saturating_sub(self.cfg.core_pool_size);
            if excess == 0 {
                return 0;
            }
            shared.chain.remove_idle_longer_than(threshold, excess)
        };
        // Physical closes happen outside the pool lock.
        for proxy in &victims {
            self.discard(proxy);
        }
        if !victims.is_empty() {
            debug!(pool = %self.cfg.name, evicted = victims.len(), "idle connections evicted");
        }
        victims.len()
    }

    /// Probe the oldest idle entries; destroy the unhealthy ones and
    /// refill up to the core floor. Returns (checked, failed).
    pub(crate) async fn keepalive_cycle(&self, max_checks: usize) -> (usize, usize) {
        if self.probe.is_none() {
            return (0, 0);
        }
        let limit = self.idle_count().min(max_checks);
        let mut checked = 0usize;
        let mut failed = 0usize;
        for _ in 0..limit {
            let Some(proxy) = self.lock_shared().chain.pop_oldest() else {
                break;
            };
            proxy.mark_in_use();
            checked += 1;
            if self.validate(&proxy).await {
                proxy.mark_idle();
                self.lock_shared().chain.add(proxy);
                self.not_empty.notify_one();
            } else {
                failed += 1;
                self.discard(&proxy);
            }
        }
        if failed > 0 {
            warn!(pool = %self.cfg.name, failed, "keepalive destroyed unhealthy connections");
            let deficit = self
                .cfg
                .core_pool_size
                .saturating_sub(self.pool_size.load(Ordering::Acquire));
            if deficit > 0 {
                self.spawn_fill(deficit);
            }
        }
        (checked, failed)
    }

    /// Latch the pool closed, snapshot and replace the live set, and
    /// close every proxy in the snapshot. In-use proxies are closed on
    /// their next release; callers are never interrupted.
    pub(crate) fn shutdown(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        info!(pool = %self.cfg.name, "shutting down pool");
        self.lock_shared().chain.clear();
        let snapshot: Vec<_> = {
            let mut all = self.all_proxies.lock().expect("proxy set poisoned");
            all.drain().map(|(_, proxy)| proxy).collect()
        };
        let mut closed_now = 0usize;
        for proxy in snapshot {
            if proxy.force_close() {
                closed_now += 1;
            }
        }
        if closed_now > 0 {
            self.pool_size.fetch_sub(closed_now, Ordering::AcqRel);
        }
        // Blocked acquirers recheck and surface Interrupted.
        self.not_empty.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datasource::MockDataSource;

    fn cfg(core: usize, max: usize) -> PoolConfig {
        let mut cfg = PoolConfig::named("test");
        cfg.core_pool_size = core;
        cfg.max_pool_size = max;
        cfg
    }

    async fn pool_with(cfg: PoolConfig, source: MockDataSource) -> Arc<PoolManager> {
        PoolManager::init(cfg, Arc::new(source)).await.unwrap()
    }

    #[tokio::test]
    async fn test_init_prepopulates_core_size() {
        let pool = pool_with(cfg(3, 5), MockDataSource::new()).await;
        assert_eq!(pool.pool_size(), 3);
        assert_eq!(pool.idle_count(), 3);
        assert_eq!(pool.peak_pool_size(), 3);
    }

    #[tokio::test]
    async fn test_acquire_release_round_trip_preserves_state() {
        let pool = pool_with(cfg(2, 4), MockDataSource::new()).await;

        let conn = pool.acquire(None).await.unwrap();
        assert_eq!(pool.pool_size(), 2);
        assert_eq!(pool.idle_count(), 1);
        drop(conn);

        assert_eq!(pool.pool_size(), 2);
        assert_eq!(pool.idle_count(), 2);
        assert_eq!(pool.peak_pool_size(), 2);
    }

    #[tokio::test]
    async fn test_growth_is_clamped_to_max() {
        let mut config = cfg(0, 2);
        config.acquire_increment = 10;
        let source = MockDataSource::new();
        let pool = pool_with(config, source.clone()).await;

        let _conn = pool.acquire(None).await.unwrap();
        // Growth asked for 10 but headroom was 2.
        assert_eq!(pool.pool_size(), 2);
        assert_eq!(source.connect_attempts(), 2);
    }

    #[tokio::test]
    async fn test_exhaustion_fails_fast_when_configured() {
        let mut config = cfg(1, 1);
        config.useless_connection_exception = true;
        let pool = pool_with(config, MockDataSource::new()).await;

        let _held = pool.acquire(None).await.unwrap();
        let err = pool.acquire(None).await.unwrap_err();
        assert!(matches!(err, PoolError::Exhausted { max: 1, .. }));
    }

    #[tokio::test]
    async fn test_acquire_timeout_expires_without_state_change() {
        let config = cfg(1, 1);
        let pool = pool_with(config, MockDataSource::new()).await;

        let _held = pool.acquire(None).await.unwrap();
        let err = pool
            .acquire_timeout(Duration::from_millis(20), None)
            .await
            .unwrap_err();
        assert!(matches!(err, PoolError::Timeout { .. }));
        assert_eq!(pool.pool_size(), 1);
        assert_eq!(pool.idle_count(), 0);
    }

    #[tokio::test]
    async fn test_connect_failures_respect_retry_limit() {
        let mut config = cfg(0, 2);
        config.acquire_retry_times = 1;
        let source = MockDataSource::new().with_connect_failures(10);
        let result = PoolManager::init(config, Arc::new(source.clone())).await;
        // core = 0, so init succeeds without connecting.
        let pool = result.unwrap();

        let err = pool.acquire(None).await.unwrap_err();
        assert!(matches!(err, PoolError::ConnectFailed { attempts: 2, .. }));
        assert_eq!(source.connect_attempts(), 2);
        assert_eq!(pool.pool_size(), 0);
    }

    #[tokio::test]
    async fn test_release_of_unchecked_proxy_is_noop() {
        let pool = pool_with(cfg(1, 1), MockDataSource::new()).await;
        let conn = pool.acquire(None).await.unwrap();
        let proxy = conn.proxy_for_test();
        drop(conn);

        assert_eq!(pool.idle_count(), 1);
        // A stale second release must not duplicate the proxy in the chain.
        pool.release(proxy);
        assert_eq!(pool.idle_count(), 1);
        assert_eq!(pool.pool_size(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_closes_idle_and_fails_subsequent_acquires() {
        let pool = pool_with(cfg(2, 4), MockDataSource::new()).await;
        pool.shutdown();

        assert!(pool.is_closed());
        assert_eq!(pool.pool_size(), 0);
        assert_eq!(pool.idle_count(), 0);
        let err = pool.acquire(None).await.unwrap_err();
        assert!(matches!(err, PoolError::PoolClosed { .. }));
    }

    #[tokio::test]
    async fn test_in_use_connection_destroyed_on_release_after_shutdown() {
        let pool = pool_with(cfg(1, 1), MockDataSource::new()).await;
        let conn = pool.acquire(None).await.unwrap();
        pool.shutdown();

        assert_eq!(pool.pool_size(), 1);
        drop(conn);
        assert_eq!(pool.pool_size(), 0);
        assert_eq!(pool.idle_count(), 0);
    }

    #[tokio::test]
    async fn test_altered_autocommit_restored_on_release() {
        let source = MockDataSource::new();
        let pool = pool_with(cfg(1, 1), source.clone()).await;

        let conn = pool.acquire(None).await.unwrap();
        source.connections()[0].set_auto_commit(false);
        drop(conn);

        assert!(source.connections()[0].auto_commit());
        assert_eq!(pool.idle_count(), 1);
    }
}
