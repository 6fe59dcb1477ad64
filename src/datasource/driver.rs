//! Driver-side connection and statement capabilities
//!
//! The narrow capability set the pool needs from a database driver.
//! Physical close is drop-based: releasing the `Box` closes the handle,
//! so destruction of a proxy is best-effort by construction.

use std::fmt::Debug;

use anyhow::Result;
use async_trait::async_trait;

/// A prepared driver-side statement.
#[async_trait]
pub trait DriverStatement: Send + Debug {
    /// Execute and report whether a result set was produced.
    async fn execute(&mut self) -> Result<bool>;

    /// Execute and return the affected row count.
    async fn execute_update(&mut self) -> Result<u64>;

    /// Execute the accumulated batch, returning per-command counts.
    async fn execute_batch(&mut self) -> Result<Vec<u64>>;
}

/// A physical driver connection.
#[async_trait]
pub trait DriverConnection: Send + Debug {
    /// Prepare a statement for `sql`.
    async fn prepare(&mut self, sql: &str) -> Result<Box<dyn DriverStatement>>;

    /// Commit the connection's local transaction.
    async fn commit(&mut self) -> Result<()>;

    /// Whether autocommit is currently enabled on this connection.
    fn auto_commit(&self) -> bool;

    /// Toggle autocommit. Used on release to restore the handed-out
    /// default when a caller altered it.
    fn set_auto_commit(&mut self, enabled: bool) -> Result<()>;
}
