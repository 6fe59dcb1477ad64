//! Transaction coordinator
//!
//! One [`TransactionCoordinator`] carries the current-transaction slot for
//! one logical thread of execution. It is an explicit handle: callers that
//! cross task boundaries pass it along rather than relying on ambient
//! thread-local state. Cloning shares the slot, which is how the pool's
//! statement layer reaches the caller's transaction at execute time.
//!
//! The slot models the coordinator states as a sum: an empty slot is
//! `NONE`, an occupied slot is `ACTIVE` or `MARKED_ROLLBACK`, and a
//! suspended transaction lives inside the [`SuspendedTransaction`] handle
//! the caller owns until resume.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::datasource::{EndFlag, XaResource, Xid};

static NEXT_GLOBAL_ID: AtomicU64 = AtomicU64::new(1);

/// Errors raised by the coordinator and by resource enlist/delist.
#[derive(Debug, Error)]
pub enum TxError {
    #[error("a transaction is already active on this coordinator")]
    AlreadyActive,

    #[error("no transaction is active on this coordinator")]
    NotActive,

    #[error("transaction is marked rollback-only")]
    RollbackOnly,

    #[error("cannot resume: the coordinator already holds a transaction")]
    SlotOccupied,

    #[error("XA resource {op} failed")]
    Resource {
        op: &'static str,
        #[source]
        source: anyhow::Error,
    },
}

/// Externally observable state of the current transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxStatus {
    Active,
    MarkedRollback,
}

struct Enlistment {
    resource: Arc<dyn XaResource>,
    xid: Xid,
}

struct Transaction {
    global_id: u64,
    status: TxStatus,
    next_branch: u64,
    enlisted: Vec<Enlistment>,
}

impl Transaction {
    fn new() -> Self {
        Self {
            global_id: NEXT_GLOBAL_ID.fetch_add(1, Ordering::Relaxed),
            status: TxStatus::Active,
            next_branch: 0,
            enlisted: Vec::new(),
        }
    }
}

/// A transaction detached from its coordinator by `suspend`.
///
/// The handle retains the enlisted-resource list verbatim; dropping it
/// without resuming abandons those branches.
pub struct SuspendedTransaction(Transaction);

/// Per-caller current-transaction slot with enlist/delist support.
#[derive(Clone)]
pub struct TransactionCoordinator {
    slot: Arc<Mutex<Option<Transaction>>>,
}

impl std::fmt::Debug for TransactionCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionCoordinator").finish_non_exhaustive()
    }
}

impl Default for TransactionCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl TransactionCoordinator {
    pub fn new() -> Self {
        Self {
            slot: Arc::new(Mutex::new(None)),
        }
    }

    /// Begin a new transaction. Fails if one is already current.
    pub async fn begin(&self) -> Result<(), TxError> {
        let mut slot = self.slot.lock().await;
        if slot.is_some() {
            return Err(TxError::AlreadyActive);
        }
        let tx = Transaction::new();
        debug!(global_id = tx.global_id, "transaction begun");
        *slot = Some(tx);
        Ok(())
    }

    /// Status of the current transaction, or `None` when the slot is empty.
    pub async fn status(&self) -> Option<TxStatus> {
        self.slot.lock().await.as_ref().map(|tx| tx.status)
    }

    /// Mark the current transaction so it can only roll back.
    pub async fn set_rollback_only(&self) -> Result<(), TxError> {
        let mut slot = self.slot.lock().await;
        match slot.as_mut() {
            Some(tx) => {
                tx.status = TxStatus::MarkedRollback;
                Ok(())
            }
            None => Err(TxError::NotActive),
        }
    }

    /// Delist every enlisted resource with `SUCCESS`, then end+commit each
    /// branch and clear the slot.
    ///
    /// A transaction marked rollback-only is rolled back instead and
    /// [`TxError::RollbackOnly`] is returned.
    pub async fn commit(&self) -> Result<(), TxError> {
        let mut slot = self.slot.lock().await;
        let tx = slot.take().ok_or(TxError::NotActive)?;
        if tx.status == TxStatus::MarkedRollback {
            drop(slot);
            Self::rollback_branches(tx).await;
            return Err(TxError::RollbackOnly);
        }
        drop(slot);

        let mut first_error = None;
        for enlistment in &tx.enlisted {
            if let Err(e) = enlistment.resource.end(enlistment.xid, EndFlag::Success).await {
                warn!(xid = %enlistment.xid, "XA end failed during commit: {e:#}");
                first_error.get_or_insert(TxError::Resource {
                    op: "end",
                    source: e,
                });
            }
        }
        for enlistment in &tx.enlisted {
            if let Err(e) = enlistment.resource.commit(enlistment.xid, true).await {
                warn!(xid = %enlistment.xid, "XA commit failed: {e:#}");
                first_error.get_or_insert(TxError::Resource {
                    op: "commit",
                    source: e,
                });
            }
        }
        debug!(global_id = tx.global_id, resources = tx.enlisted.len(), "transaction committed");
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Delist every enlisted resource with `FAIL`, then end+rollback each
    /// branch and clear the slot.
    pub async fn rollback(&self) -> Result<(), TxError> {
        let mut slot = self.slot.lock().await;
        let tx = slot.take().ok_or(TxError::NotActive)?;
        drop(slot);
        debug!(global_id = tx.global_id, "transaction rolled back");
        Self::rollback_branches(tx).await;
        Ok(())
    }

    async fn rollback_branches(tx: Transaction) {
        // Best-effort on every branch: a failure on one resource must not
        // strand the remaining ones.
        for enlistment in &tx.enlisted {
            if let Err(e) = enlistment.resource.end(enlistment.xid, EndFlag::Fail).await {
                warn!(xid = %enlistment.xid, "XA end failed during rollback: {e:#}");
            }
        }
        for enlistment in &tx.enlisted {
            if let Err(e) = enlistment.resource.rollback(enlistment.xid).await {
                warn!(xid = %enlistment.xid, "XA rollback failed: {e:#}");
            }
        }
    }

    /// Detach the current transaction from the slot and hand it to the
    /// caller. Its enlisted resources travel with the handle.
    pub async fn suspend(&self) -> Result<SuspendedTransaction, TxError> {
        let mut slot = self.slot.lock().await;
        match slot.take() {
            Some(tx) if tx.status == TxStatus::Active => {
                debug!(global_id = tx.global_id, "transaction suspended");
                Ok(SuspendedTransaction(tx))
            }
            Some(tx) => {
                // Not suspendable; put it back untouched.
                *slot = Some(tx);
                Err(TxError::RollbackOnly)
            }
            None => Err(TxError::NotActive),
        }
    }

    /// Reinstall a suspended transaction as the current one.
    pub async fn resume(&self, suspended: SuspendedTransaction) -> Result<(), TxError> {
        let mut slot = self.slot.lock().await;
        if slot.is_some() {
            return Err(TxError::SlotOccupied);
        }
        debug!(global_id = suspended.0.global_id, "transaction resumed");
        *slot = Some(suspended.0);
        Ok(())
    }

    /// Enlist a resource with the current transaction.
    ///
    /// The resource is started on a fresh branch of the transaction;
    /// enlisting the same resource again is idempotent.
    pub async fn enlist(&self, resource: Arc<dyn XaResource>) -> Result<(), TxError> {
        let mut slot = self.slot.lock().await;
        let tx = slot.as_mut().ok_or(TxError::NotActive)?;
        Self::enlist_in(tx, resource).await
    }

    async fn enlist_in(tx: &mut Transaction, resource: Arc<dyn XaResource>) -> Result<(), TxError> {
        if tx
            .enlisted
            .iter()
            .any(|e| Arc::ptr_eq(&e.resource, &resource))
        {
            return Ok(());
        }
        tx.next_branch += 1;
        let xid = Xid {
            global: tx.global_id,
            branch: tx.next_branch,
        };
        resource
            .start(xid)
            .await
            .map_err(|e| TxError::Resource {
                op: "start",
                source: e,
            })?;
        debug!(%xid, "resource enlisted");
        tx.enlisted.push(Enlistment { resource, xid });
        Ok(())
    }

    /// Enlist `resource` only when a transaction is currently active.
    ///
    /// Returns whether an enlistment took place. This is the statement
    /// layer's entry point: execution outside any transaction proceeds
    /// without one.
    pub(crate) async fn enlist_if_active(
        &self,
        resource: Arc<dyn XaResource>,
    ) -> Result<bool, TxError> {
        let mut slot = self.slot.lock().await;
        match slot.as_mut() {
            Some(tx) => {
                Self::enlist_in(tx, resource).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Delist a resource from the current transaction with the given
    /// outcome flag. Unknown resources are ignored.
    pub async fn delist(
        &self,
        resource: &Arc<dyn XaResource>,
        flag: EndFlag,
    ) -> Result<(), TxError> {
        let mut slot = self.slot.lock().await;
        let tx = slot.as_mut().ok_or(TxError::NotActive)?;
        let Some(pos) = tx
            .enlisted
            .iter()
            .position(|e| Arc::ptr_eq(&e.resource, resource))
        else {
            return Ok(());
        };
        let enlistment = tx.enlisted.remove(pos);
        enlistment
            .resource
            .end(enlistment.xid, flag)
            .await
            .map_err(|e| TxError::Resource {
                op: "end",
                source: e,
            })
    }
}
