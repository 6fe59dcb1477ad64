//! # dbpool
//!
//! A pooled database-connection manager with distributed-transaction
//! enlistment. It amortizes session-establishment cost by keeping a
//! bounded reservoir of pre-opened physical connections, hands them out
//! as proxies whose `close()` releases instead of disconnecting, and
//! recycles them on return.
//!
//! ## Architecture
//!
//! The crate is organized into modules with clean separation of concerns:
//!
//! - **config**: configuration types, defaults, validation, and loading
//! - **datasource**: the driver seam (data-source factory, connection and
//!   statement capabilities, XA resources) plus a scriptable mock
//! - **pool**: the bounded reservoir: idle chain, connection proxy,
//!   pool manager, and the caller-facing `PooledConnection`
//! - **tx**: the per-caller transaction coordinator
//! - **scheduler**: the process-wide maintenance worker (idle eviction,
//!   keepalive, observability counters)
//!
//! ## Design Philosophy
//!
//! Callers see a pooled connection as a normal connection: closing it is
//! release. The pool owns its proxies; proxies hold only non-owning
//! back-references, so the pool always outlives what it hands out.
//! Transactions are never ambient: a caller that wants statement
//! execution enlisted passes its [`TransactionCoordinator`] explicitly
//! when acquiring.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use tracing::info;

// Module declarations
pub mod config;
mod constants;
pub mod datasource;
mod error;
pub mod logging;
mod pool;
mod scheduler;
mod statement;
pub mod tx;

// Public exports
pub use config::{Config, PoolConfig, create_default_config, load_config};
pub use error::PoolError;
pub use pool::{PoolStatus, PooledConnection};
pub use statement::{PreparedStatement, Statement};
pub use tx::{SuspendedTransaction, TransactionCoordinator, TxError, TxStatus};

// Internal imports
use datasource::DataSource;
use pool::manager::PoolManager;
use scheduler::MaintenanceScheduler;

/// Entry point: a registry of named pools behind one data-source facade.
///
/// Pools are registered with a configuration and the [`DataSource`] that
/// opens their physical connections. A single process-wide maintenance
/// worker services every registered pool.
pub struct PooledDataSource {
    pools: Arc<DashMap<String, Arc<PoolManager>>>,
    scheduler: MaintenanceScheduler,
    closed: AtomicBool,
}

impl std::fmt::Debug for PooledDataSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledDataSource")
            .field("pools", &self.pool_names())
            .field("closed", &self.closed.load(Ordering::Acquire))
            .finish()
    }
}

impl Default for PooledDataSource {
    fn default() -> Self {
        Self::new()
    }
}

impl PooledDataSource {
    /// Create an empty facade with the default maintenance cadence.
    pub fn new() -> Self {
        Self::with_maintenance_interval(constants::maintenance::DEFAULT_INTERVAL)
    }

    /// Create an empty facade with a custom maintenance cadence.
    pub fn with_maintenance_interval(interval: Duration) -> Self {
        let pools: Arc<DashMap<String, Arc<PoolManager>>> = Arc::new(DashMap::new());
        Self {
            scheduler: MaintenanceScheduler::new(Arc::clone(&pools), interval),
            pools,
            closed: AtomicBool::new(false),
        }
    }

    /// Register one pool: validate its configuration, pre-populate it,
    /// and bring it under maintenance. Pool names are unique within the
    /// facade.
    pub async fn register(
        &self,
        cfg: PoolConfig,
        source: Arc<dyn DataSource>,
    ) -> Result<(), PoolError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(PoolError::PoolClosed {
                pool: cfg.name.clone(),
            });
        }
        cfg.validate()
            .map_err(|e| PoolError::Config(e.to_string()))?;
        if self.pools.contains_key(&cfg.name) {
            return Err(PoolError::Config(format!(
                "a pool named '{}' is already registered",
                cfg.name
            )));
        }

        let name = cfg.name.clone();
        let pool = PoolManager::init(cfg, source).await?;
        match self.pools.entry(name.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                // Lost a registration race; tear down the duplicate.
                pool.shutdown();
                return Err(PoolError::Config(format!(
                    "a pool named '{name}' is already registered"
                )));
            }
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                entry.insert(pool);
            }
        }
        self.scheduler.ensure_started();
        info!(pool = %name, "pool registered");
        Ok(())
    }

    /// Load a configuration file and register every declared pool with
    /// its matching data source.
    pub async fn init_path(
        &self,
        path: impl AsRef<Path>,
        mut sources: HashMap<String, Arc<dyn DataSource>>,
    ) -> Result<(), PoolError> {
        let config = load_config(path).map_err(|e| PoolError::Config(format!("{e:#}")))?;
        for cfg in config.pools {
            let source = sources.remove(&cfg.name).ok_or_else(|| {
                PoolError::Config(format!("no data source provided for pool '{}'", cfg.name))
            })?;
            self.register(cfg, source).await?;
        }
        Ok(())
    }

    fn pool(&self, name: &str) -> Result<Arc<PoolManager>, PoolError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(PoolError::PoolClosed {
                pool: name.to_string(),
            });
        }
        self.pools
            .get(name)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| PoolError::Config(format!("unknown pool '{name}'")))
    }

    fn unique_pool(&self) -> Result<Arc<PoolManager>, PoolError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(PoolError::PoolClosed {
                pool: "<unique>".to_string(),
            });
        }
        let mut iter = self.pools.iter();
        let first = iter.next().ok_or_else(|| {
            PoolError::Config("no pool registered".to_string())
        })?;
        if iter.next().is_some() {
            return Err(PoolError::Config(
                "several pools are registered; use get_connection_from".to_string(),
            ));
        }
        Ok(Arc::clone(first.value()))
    }

    /// Check a connection out of the only registered pool.
    pub async fn get_connection(&self) -> Result<PooledConnection, PoolError> {
        self.unique_pool()?.acquire(None).await
    }

    /// Check a connection out of the named pool.
    pub async fn get_connection_from(&self, name: &str) -> Result<PooledConnection, PoolError> {
        self.pool(name)?.acquire(None).await
    }

    /// Bounded-wait acquire: fails with `Timeout` once `wait` elapses,
    /// leaving pool state unchanged.
    pub async fn get_connection_timeout(
        &self,
        name: &str,
        wait: Duration,
    ) -> Result<PooledConnection, PoolError> {
        self.pool(name)?.acquire_timeout(wait, None).await
    }

    /// Check a connection out of the named pool, bound to the caller's
    /// transaction coordinator: statement execution on it enlists the
    /// connection's XA resource into the coordinator's current
    /// transaction.
    pub async fn get_connection_tx(
        &self,
        name: &str,
        coordinator: &TransactionCoordinator,
    ) -> Result<PooledConnection, PoolError> {
        self.pool(name)?.acquire(Some(coordinator.clone())).await
    }

    /// Per-call credentials are rejected: pools are pre-credentialed by
    /// their data source.
    pub async fn get_connection_with_credentials(
        &self,
        _user: &str,
        _password: &str,
    ) -> Result<PooledConnection, PoolError> {
        Err(PoolError::CredentialsUnsupported)
    }

    /// Point-in-time statistics for the named pool.
    pub fn status(&self, name: &str) -> Option<PoolStatus> {
        self.pools.get(name).map(|entry| entry.value().status())
    }

    /// Live connections (idle + in-use) in the named pool.
    pub fn pool_size(&self, name: &str) -> Option<usize> {
        self.pools.get(name).map(|entry| entry.value().pool_size())
    }

    /// High-water mark of `pool_size` for the named pool.
    pub fn peak_pool_size(&self, name: &str) -> Option<usize> {
        self.pools
            .get(name)
            .map(|entry| entry.value().peak_pool_size())
    }

    /// Currently idle connections in the named pool.
    pub fn idle_count(&self, name: &str) -> Option<usize> {
        self.pools.get(name).map(|entry| entry.value().idle_count())
    }

    /// Names of every registered pool.
    pub fn pool_names(&self) -> Vec<String> {
        self.pools.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Whether the facade has been shut down.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Shut every pool down and stop the maintenance worker. Idempotent;
    /// connections still checked out are closed on their release.
    pub fn shutdown(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("shutting down all pools");
        for entry in self.pools.iter() {
            entry.value().shutdown();
        }
        self.pools.clear();
        self.scheduler.stop();
    }
}

impl Drop for PooledDataSource {
    fn drop(&mut self) {
        self.shutdown();
    }
}
