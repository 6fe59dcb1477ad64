//! Scriptable in-memory data source for tests
//!
//! This implementation allows tests to exercise the pool without a real
//! database: connect attempts can be made to fail, individual
//! connections can be poisoned so the liveness probe rejects them, and
//! every executed statement and XA verb is recorded for assertions.
//!
//! # Examples
//!
//! ```
//! use dbpool::datasource::MockDataSource;
//!
//! let source = MockDataSource::new().with_connect_failures(2);
//! // The first two get_common_connection() calls will fail.
//! ```

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;

use super::driver::{DriverConnection, DriverStatement};
use super::xa::{EndFlag, XaResource, Xid};
use super::{CommonConnection, DataSource};

/// One XA verb observed by a [`MockDataSource`]'s resources.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XaEvent {
    Start(Xid),
    End(Xid, EndFlag),
    Commit { xid: Xid, one_phase: bool },
    Rollback(Xid),
}

#[derive(Debug)]
struct SourceShared {
    xa: bool,
    fail_connects: AtomicUsize,
    fail_xa_start: AtomicBool,
    attempts: AtomicUsize,
    connections: Mutex<Vec<MockConnectionHandle>>,
    xa_log: Mutex<Vec<XaEvent>>,
}

/// Scriptable mock data source
///
/// Cloning shares the underlying script and recordings, so a test can
/// keep a handle while the pool owns another.
#[derive(Debug, Clone)]
pub struct MockDataSource {
    shared: Arc<SourceShared>,
}

impl MockDataSource {
    /// Create a plain (non-XA) mock source.
    pub fn new() -> Self {
        Self::build(false)
    }

    /// Create an XA-capable mock source; every connection carries a
    /// recording [`XaResource`].
    pub fn new_xa() -> Self {
        Self::build(true)
    }

    fn build(xa: bool) -> Self {
        Self {
            shared: Arc::new(SourceShared {
                xa,
                fail_connects: AtomicUsize::new(0),
                fail_xa_start: AtomicBool::new(false),
                attempts: AtomicUsize::new(0),
                connections: Mutex::new(Vec::new()),
                xa_log: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Fail the next `n` connect attempts.
    #[must_use]
    pub fn with_connect_failures(self, n: usize) -> Self {
        self.shared.fail_connects.store(n, Ordering::SeqCst);
        self
    }

    /// Make every subsequent XA `start` fail, so enlistment errors can
    /// be provoked.
    pub fn set_fail_xa_start(&self, fail: bool) {
        self.shared.fail_xa_start.store(fail, Ordering::SeqCst);
    }

    /// Total connect attempts seen, including failed ones.
    pub fn connect_attempts(&self) -> usize {
        self.shared.attempts.load(Ordering::SeqCst)
    }

    /// Handles to every connection opened so far, in open order.
    pub fn connections(&self) -> Vec<MockConnectionHandle> {
        self.shared.connections.lock().unwrap().clone()
    }

    /// All XA verbs observed so far, in call order.
    pub fn xa_events(&self) -> Vec<XaEvent> {
        self.shared.xa_log.lock().unwrap().clone()
    }
}

impl Default for MockDataSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DataSource for MockDataSource {
    async fn get_common_connection(&self) -> Result<CommonConnection> {
        self.shared.attempts.fetch_add(1, Ordering::SeqCst);
        if self
            .shared
            .fail_connects
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(anyhow::anyhow!("mock data source: scripted connect failure"));
        }

        let state = Arc::new(ConnState {
            healthy: AtomicBool::new(true),
            auto_commit: AtomicBool::new(true),
            executed: Mutex::new(Vec::new()),
        });
        self.shared
            .connections
            .lock()
            .unwrap()
            .push(MockConnectionHandle {
                state: Arc::clone(&state),
            });

        let xa: Option<Arc<dyn XaResource>> = if self.shared.xa {
            Some(Arc::new(MockXaResource {
                shared: Arc::clone(&self.shared),
            }))
        } else {
            None
        };

        Ok(CommonConnection {
            connection: Box::new(MockConnection { state }),
            xa,
        })
    }
}

#[derive(Debug)]
struct ConnState {
    healthy: AtomicBool,
    auto_commit: AtomicBool,
    executed: Mutex<Vec<String>>,
}

/// Test-side handle to one opened mock connection
#[derive(Debug, Clone)]
pub struct MockConnectionHandle {
    state: Arc<ConnState>,
}

impl MockConnectionHandle {
    /// Make the connection fail every subsequent prepare/execute, so the
    /// liveness probe rejects it.
    pub fn poison(&self) {
        self.state.healthy.store(false, Ordering::SeqCst);
    }

    pub fn is_healthy(&self) -> bool {
        self.state.healthy.load(Ordering::SeqCst)
    }

    /// Current autocommit flag as the driver reports it.
    pub fn auto_commit(&self) -> bool {
        self.state.auto_commit.load(Ordering::SeqCst)
    }

    /// Flip autocommit behind the pool's back, simulating a caller that
    /// altered it while the connection was checked out.
    pub fn set_auto_commit(&self, enabled: bool) {
        self.state.auto_commit.store(enabled, Ordering::SeqCst);
    }

    /// Every statement executed on this connection, in order.
    pub fn executed(&self) -> Vec<String> {
        self.state.executed.lock().unwrap().clone()
    }
}

#[derive(Debug)]
struct MockConnection {
    state: Arc<ConnState>,
}

#[async_trait]
impl DriverConnection for MockConnection {
    async fn prepare(&mut self, sql: &str) -> Result<Box<dyn DriverStatement>> {
        if !self.state.healthy.load(Ordering::SeqCst) {
            return Err(anyhow::anyhow!("mock connection is poisoned"));
        }
        Ok(Box::new(MockStatement {
            sql: sql.to_string(),
            state: Arc::clone(&self.state),
        }))
    }

    async fn commit(&mut self) -> Result<()> {
        self.state
            .executed
            .lock()
            .unwrap()
            .push("<commit>".to_string());
        Ok(())
    }

    fn auto_commit(&self) -> bool {
        self.state.auto_commit.load(Ordering::SeqCst)
    }

    fn set_auto_commit(&mut self, enabled: bool) -> Result<()> {
        if !self.state.healthy.load(Ordering::SeqCst) {
            return Err(anyhow::anyhow!("mock connection is poisoned"));
        }
        self.state.auto_commit.store(enabled, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Debug)]
struct MockStatement {
    sql: String,
    state: Arc<ConnState>,
}

impl MockStatement {
    fn record(&self) -> Result<()> {
        if !self.state.healthy.load(Ordering::SeqCst) {
            return Err(anyhow::anyhow!("mock connection is poisoned"));
        }
        self.state.executed.lock().unwrap().push(self.sql.clone());
        Ok(())
    }
}

#[async_trait]
impl DriverStatement for MockStatement {
    async fn execute(&mut self) -> Result<bool> {
        self.record()?;
        Ok(true)
    }

    async fn execute_update(&mut self) -> Result<u64> {
        self.record()?;
        Ok(1)
    }

    async fn execute_batch(&mut self) -> Result<Vec<u64>> {
        self.record()?;
        Ok(vec![1])
    }
}

#[derive(Debug)]
struct MockXaResource {
    shared: Arc<SourceShared>,
}

impl MockXaResource {
    fn log(&self, event: XaEvent) {
        self.shared.xa_log.lock().unwrap().push(event);
    }
}

#[async_trait]
impl XaResource for MockXaResource {
    async fn start(&self, xid: Xid) -> Result<()> {
        if self.shared.fail_xa_start.load(Ordering::SeqCst) {
            return Err(anyhow::anyhow!("mock XA resource: scripted start failure"));
        }
        self.log(XaEvent::Start(xid));
        Ok(())
    }

    async fn end(&self, xid: Xid, flag: EndFlag) -> Result<()> {
        self.log(XaEvent::End(xid, flag));
        Ok(())
    }

    async fn commit(&self, xid: Xid, one_phase: bool) -> Result<()> {
        self.log(XaEvent::Commit { xid, one_phase });
        Ok(())
    }

    async fn rollback(&self, xid: Xid) -> Result<()> {
        self.log(XaEvent::Rollback(xid));
        Ok(())
    }
}
