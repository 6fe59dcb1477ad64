//! Managed wrapper around one physical connection
//!
//! A proxy tracks the lifecycle of its physical handle and the statements
//! created from it. The pool owns its proxies through `all_proxies`; the
//! proxy keeps only a non-owning back-reference to the pool, which is how
//! releasing a pooled connection finds its way home.
//!
//! State machine: FRESH on creation, IDLE while chained, IN_USE while
//! checked out, CLOSED after eviction, validation failure, or shutdown.
//! A CLOSED proxy is never present in the chain, and a proxy is in the
//! chain exactly when it is IDLE.

use std::sync::{Arc, Mutex, Weak};

use tracing::warn;

use crate::datasource::{CommonConnection, DriverConnection, XaResource};
use crate::statement::StatementCore;

use super::manager::PoolManager;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ProxyState {
    Fresh,
    Idle,
    InUse,
    Closed,
}

struct ProxyInner {
    conn: Option<Box<dyn DriverConnection>>,
    state: ProxyState,
    statements: Vec<Weak<StatementCore>>,
}

pub(crate) struct ConnectionProxy {
    id: u64,
    pool: Weak<PoolManager>,
    xa: Option<Arc<dyn XaResource>>,
    inner: Mutex<ProxyInner>,
}

impl std::fmt::Debug for ConnectionProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionProxy")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("xa", &self.xa.is_some())
            .finish()
    }
}

impl ConnectionProxy {
    pub(crate) fn new(id: u64, pool: Weak<PoolManager>, common: CommonConnection) -> Arc<Self> {
        Arc::new(Self {
            id,
            pool,
            xa: common.xa,
            inner: Mutex::new(ProxyInner {
                conn: Some(common.connection),
                state: ProxyState::Fresh,
                statements: Vec::new(),
            }),
        })
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn pool(&self) -> Option<Arc<PoolManager>> {
        self.pool.upgrade()
    }

    pub(crate) fn xa_resource(&self) -> Option<Arc<dyn XaResource>> {
        self.xa.clone()
    }

    pub(crate) fn state(&self) -> ProxyState {
        self.lock().state
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.state() == ProxyState::Closed
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ProxyInner> {
        self.inner.lock().expect("proxy lock poisoned")
    }

    /// IDLE (or FRESH, during fill) -> IN_USE.
    pub(crate) fn mark_in_use(&self) {
        let mut inner = self.lock();
        debug_assert!(
            matches!(inner.state, ProxyState::Idle | ProxyState::Fresh),
            "mark_in_use from {:?}",
            inner.state
        );
        inner.state = ProxyState::InUse;
    }

    /// FRESH/IN_USE -> IDLE, just before re-entering the chain.
    pub(crate) fn mark_idle(&self) {
        let mut inner = self.lock();
        debug_assert!(
            matches!(inner.state, ProxyState::Fresh | ProxyState::InUse),
            "mark_idle from {:?}",
            inner.state
        );
        inner.state = ProxyState::Idle;
    }

    /// Whether this proxy is currently checked out. Used by `release` to
    /// make releasing anything else a no-op.
    pub(crate) fn is_in_use(&self) -> bool {
        self.lock().state == ProxyState::InUse
    }

    /// Borrow the physical connection out of the proxy for a driver call.
    ///
    /// Returns `None` once the proxy is closed (or while another call has
    /// it out, which cannot happen for a single holder).
    pub(crate) fn take_conn(&self) -> Option<Box<dyn DriverConnection>> {
        self.lock().conn.take()
    }

    /// Return the physical connection after a driver call.
    pub(crate) fn restore_conn(&self, conn: Box<dyn DriverConnection>) {
        let mut inner = self.lock();
        // A proxy closed while its connection was out stays closed; the
        // handle is dropped here instead of being restored.
        if inner.state != ProxyState::Closed {
            inner.conn = Some(conn);
        }
    }

    /// Track a statement created from this proxy so release can drain it.
    pub(crate) fn register_statement(&self, core: Weak<StatementCore>) {
        let mut inner = self.lock();
        inner.statements.retain(|weak| weak.strong_count() > 0);
        inner.statements.push(core);
    }

    /// Close every still-open dependent statement, best-effort.
    pub(crate) fn drain_statements(&self) {
        let statements = {
            let mut inner = self.lock();
            std::mem::take(&mut inner.statements)
        };
        // Driver-side statement handles are dropped outside the proxy lock.
        for weak in statements {
            if let Some(core) = weak.upgrade() {
                core.invalidate();
            }
        }
    }

    /// Restore autocommit if the driver reports it was altered while the
    /// proxy was checked out. Returns false when restoration fails, in
    /// which case the proxy must be destroyed rather than recycled.
    pub(crate) fn restore_autocommit(&self) -> bool {
        let mut inner = self.lock();
        let Some(conn) = inner.conn.as_mut() else {
            return false;
        };
        if conn.auto_commit() {
            return true;
        }
        match conn.set_auto_commit(true) {
            Ok(()) => true,
            Err(e) => {
                warn!(proxy = self.id, "failed to restore autocommit: {e:#}");
                false
            }
        }
    }

    /// Close the physical handle and mark the proxy CLOSED.
    ///
    /// Returns whether this call performed the transition; racing
    /// closers see false, so the pool's accounting is charged exactly
    /// once. Dropping the boxed driver connection closes it best-effort.
    pub(crate) fn destroy(&self) -> bool {
        let (first, conn) = {
            let mut inner = self.lock();
            let first = inner.state != ProxyState::Closed;
            inner.state = ProxyState::Closed;
            (first, inner.conn.take())
        };
        drop(conn);
        self.drain_statements();
        first
    }

    /// Shutdown path: destroy unless currently checked out. An in-use
    /// proxy is left alone and destroyed on its next release.
    pub(crate) fn force_close(&self) -> bool {
        {
            let inner = self.lock();
            if inner.state == ProxyState::InUse {
                return false;
            }
        }
        self.destroy()
    }
}
