//! Caller-facing pooled connection view
//!
//! A `PooledConnection` looks like a normal connection, but closing it
//! (explicitly via [`PooledConnection::close`] or implicitly on drop)
//! releases the underlying proxy back to its pool instead of closing the
//! physical handle. The release path finds the pool through the proxy's
//! non-owning back-reference; if the pool is already gone, the physical
//! handle is simply closed.

use std::sync::Arc;

use crate::error::PoolError;
use crate::statement::{PreparedStatement, Statement};
use crate::tx::TransactionCoordinator;

use super::proxy::ConnectionProxy;

pub struct PooledConnection {
    proxy: Option<Arc<ConnectionProxy>>,
    coordinator: Option<TransactionCoordinator>,
}

impl std::fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection")
            .field("proxy", &self.proxy.as_ref().map(|p| p.id()))
            .field("transactional", &self.is_transactional())
            .finish()
    }
}

impl PooledConnection {
    pub(crate) fn new(
        proxy: Arc<ConnectionProxy>,
        coordinator: Option<TransactionCoordinator>,
    ) -> Self {
        Self {
            proxy: Some(proxy),
            coordinator,
        }
    }

    fn proxy(&self) -> &Arc<ConnectionProxy> {
        // The Option is only emptied by close/drop, which consume self.
        self.proxy.as_ref().expect("pooled connection already released")
    }

    /// Whether this connection can participate in distributed
    /// transactions.
    pub fn is_transactional(&self) -> bool {
        self.proxy
            .as_ref()
            .is_some_and(|p| p.xa_resource().is_some())
    }

    /// Create an unprepared statement handle. The handle is tracked and
    /// closed best-effort when this connection is released.
    pub fn create_statement(&self) -> Statement {
        Statement::new(Arc::clone(self.proxy()), self.coordinator.clone())
    }

    /// Prepare a statement for `sql`.
    pub async fn prepare_statement(&self, sql: &str) -> Result<PreparedStatement, PoolError> {
        let proxy = self.proxy();
        let mut conn = proxy.take_conn().ok_or(PoolError::ProxyClosed)?;
        let prepared = conn.prepare(sql).await;
        proxy.restore_conn(conn);
        let stmt = prepared.map_err(PoolError::Driver)?;
        Ok(PreparedStatement::new(
            Arc::clone(proxy),
            self.coordinator.clone(),
            sql.to_string(),
            stmt,
        ))
    }

    /// Release the connection back to its pool. Dropping the value has
    /// the same effect; this form just makes the intent explicit.
    pub fn close(self) {}

    #[cfg(test)]
    pub(crate) fn proxy_for_test(&self) -> Arc<ConnectionProxy> {
        Arc::clone(self.proxy())
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(proxy) = self.proxy.take() {
            match proxy.pool() {
                Some(pool) => pool.release(proxy),
                // Pool already gone; close the physical handle.
                None => {
                    proxy.destroy();
                }
            }
        }
    }
}
