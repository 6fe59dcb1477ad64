//! Statement invocation layer
//!
//! Statement handles are thin façades over the driver's statements. Every
//! invocation first checks that the owning proxy is still checked out
//! (use after release fails with `ProxyClosed`), then, when the pooled
//! connection is bound to a transaction coordinator and the connection is
//! XA-capable, enlists the proxy's XA resource into the current
//! transaction before delegating to the driver.
//!
//! Identity-style surfaces (`Debug`, the SQL accessor) are answered
//! locally without touching the driver, so a handle keeps a stable
//! identity across its whole life.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::datasource::DriverStatement;
use crate::error::PoolError;
use crate::pool::proxy::ConnectionProxy;
use crate::tx::TransactionCoordinator;

/// Shared statement state, reachable from the handle and (weakly) from
/// the owning proxy so release can drain still-open statements.
pub(crate) struct StatementCore {
    closed: AtomicBool,
    stmt: Mutex<Option<Box<dyn DriverStatement>>>,
}

impl StatementCore {
    pub(crate) fn new(stmt: Option<Box<dyn DriverStatement>>) -> Arc<Self> {
        Arc::new(Self {
            closed: AtomicBool::new(false),
            stmt: Mutex::new(stmt),
        })
    }

    pub(crate) fn invalidate(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let dropped = self.stmt.lock().expect("statement lock poisoned").take();
        drop(dropped);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn take_stmt(&self) -> Option<Box<dyn DriverStatement>> {
        self.stmt.lock().expect("statement lock poisoned").take()
    }

    fn restore_stmt(&self, stmt: Box<dyn DriverStatement>) {
        if !self.is_closed() {
            *self.stmt.lock().expect("statement lock poisoned") = Some(stmt);
        }
    }
}

fn precheck(proxy: &ConnectionProxy, core: &StatementCore) -> Result<(), PoolError> {
    if core.is_closed() || !proxy.is_in_use() {
        return Err(PoolError::ProxyClosed);
    }
    Ok(())
}

async fn enlist_if_transactional(
    proxy: &ConnectionProxy,
    coordinator: Option<&TransactionCoordinator>,
) -> Result<(), PoolError> {
    if let (Some(coordinator), Some(resource)) = (coordinator, proxy.xa_resource()) {
        coordinator.enlist_if_active(resource).await?;
    }
    Ok(())
}

/// An unprepared statement handle; SQL is supplied per invocation.
pub struct Statement {
    proxy: Arc<ConnectionProxy>,
    core: Arc<StatementCore>,
    coordinator: Option<TransactionCoordinator>,
}

impl std::fmt::Debug for Statement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Statement")
            .field("proxy", &self.proxy.id())
            .finish()
    }
}

impl Statement {
    pub(crate) fn new(
        proxy: Arc<ConnectionProxy>,
        coordinator: Option<TransactionCoordinator>,
    ) -> Self {
        let core = StatementCore::new(None);
        proxy.register_statement(Arc::downgrade(&core));
        Self {
            proxy,
            core,
            coordinator,
        }
    }

    async fn run<T>(
        &mut self,
        sql: &str,
        op: impl for<'a> FnOnce(
            &'a mut dyn DriverStatement,
        ) -> Pin<Box<dyn Future<Output = anyhow::Result<T>> + Send + 'a>>,
    ) -> Result<T, PoolError> {
        precheck(&self.proxy, &self.core)?;
        enlist_if_transactional(&self.proxy, self.coordinator.as_ref()).await?;

        let mut conn = self.proxy.take_conn().ok_or(PoolError::ProxyClosed)?;
        let result = async {
            let mut stmt = conn.prepare(sql).await?;
            op(stmt.as_mut()).await
        }
        .await;
        self.proxy.restore_conn(conn);
        result.map_err(PoolError::Driver)
    }

    /// Execute `sql`, reporting whether a result set was produced.
    pub async fn execute(&mut self, sql: &str) -> Result<bool, PoolError> {
        self.run(sql, |stmt| Box::pin(async move { stmt.execute().await }))
            .await
    }

    /// Execute `sql` and return the affected row count.
    pub async fn execute_update(&mut self, sql: &str) -> Result<u64, PoolError> {
        self.run(sql, |stmt| Box::pin(async move { stmt.execute_update().await }))
            .await
    }

    /// Execute a batch of statements, returning per-command counts.
    pub async fn execute_batch(&mut self, sqls: &[&str]) -> Result<Vec<u64>, PoolError> {
        precheck(&self.proxy, &self.core)?;
        enlist_if_transactional(&self.proxy, self.coordinator.as_ref()).await?;

        let mut conn = self.proxy.take_conn().ok_or(PoolError::ProxyClosed)?;
        let result = async {
            let mut counts = Vec::with_capacity(sqls.len());
            for sql in sqls {
                let mut stmt = conn.prepare(sql).await?;
                counts.push(stmt.execute_update().await?);
            }
            Ok::<_, anyhow::Error>(counts)
        }
        .await;
        self.proxy.restore_conn(conn);
        result.map_err(PoolError::Driver)
    }

    /// Close the handle. Dropping it has the same effect.
    pub fn close(self) {}
}

impl Drop for Statement {
    fn drop(&mut self) {
        self.core.invalidate();
    }
}

/// A statement prepared once and executed any number of times.
pub struct PreparedStatement {
    proxy: Arc<ConnectionProxy>,
    core: Arc<StatementCore>,
    coordinator: Option<TransactionCoordinator>,
    sql: String,
}

impl std::fmt::Debug for PreparedStatement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreparedStatement")
            .field("proxy", &self.proxy.id())
            .field("sql", &self.sql)
            .finish()
    }
}

impl PreparedStatement {
    pub(crate) fn new(
        proxy: Arc<ConnectionProxy>,
        coordinator: Option<TransactionCoordinator>,
        sql: String,
        stmt: Box<dyn DriverStatement>,
    ) -> Self {
        let core = StatementCore::new(Some(stmt));
        proxy.register_statement(Arc::downgrade(&core));
        Self {
            proxy,
            core,
            coordinator,
            sql,
        }
    }

    /// The SQL this statement was prepared with.
    pub fn sql(&self) -> &str {
        &self.sql
    }

    async fn run<T>(
        &mut self,
        op: impl for<'a> FnOnce(
            &'a mut dyn DriverStatement,
        ) -> Pin<Box<dyn Future<Output = anyhow::Result<T>> + Send + 'a>>,
    ) -> Result<T, PoolError> {
        precheck(&self.proxy, &self.core)?;
        enlist_if_transactional(&self.proxy, self.coordinator.as_ref()).await?;

        let mut stmt = self.core.take_stmt().ok_or(PoolError::ProxyClosed)?;
        let result = op(stmt.as_mut()).await;
        self.core.restore_stmt(stmt);
        result.map_err(PoolError::Driver)
    }

    /// Execute, reporting whether a result set was produced.
    pub async fn execute(&mut self) -> Result<bool, PoolError> {
        self.run(|stmt| Box::pin(async move { stmt.execute().await }))
            .await
    }

    /// Execute and return the affected row count.
    pub async fn execute_update(&mut self) -> Result<u64, PoolError> {
        self.run(|stmt| Box::pin(async move { stmt.execute_update().await }))
            .await
    }

    /// Execute the accumulated batch.
    pub async fn execute_batch(&mut self) -> Result<Vec<u64>, PoolError> {
        self.run(|stmt| Box::pin(async move { stmt.execute_batch().await }))
            .await
    }

    /// Close the handle. Dropping it has the same effect.
    pub fn close(self) {}
}

impl Drop for PreparedStatement {
    fn drop(&mut self) {
        self.core.invalidate();
    }
}
