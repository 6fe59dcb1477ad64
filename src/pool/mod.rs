//! Connection pooling modules
//!
//! This module provides the bounded reservoir: the idle chain, the
//! per-connection proxy, the manager that ties them together, and the
//! `PooledConnection` view handed to callers.

pub(crate) mod chain;
pub(crate) mod manager;
mod pooled;
pub(crate) mod probe;
pub(crate) mod proxy;

pub use pooled::PooledConnection;

/// Point-in-time statistics for one pool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    /// Live connections, idle and in use.
    pub pool_size: usize,
    /// High-water mark of `pool_size` since creation.
    pub peak_pool_size: usize,
    /// Connections currently idle in the chain.
    pub idle_count: usize,
    /// Connections currently checked out.
    pub in_use_count: usize,
    /// Configured ceiling.
    pub max_pool_size: usize,
    /// Whether the pool has been shut down.
    pub closed: bool,
}
