//! Constants used throughout the connection pool
//!
//! This module centralizes magic numbers and default values
//! to improve maintainability and reduce duplication.

use std::time::Duration;

/// Pool sizing defaults
pub mod pool {
    /// Connections pre-opened at pool initialization
    pub const DEFAULT_CORE_POOL_SIZE: usize = 0;

    /// Hard ceiling on the total population (idle + in-use)
    pub const DEFAULT_MAX_POOL_SIZE: usize = 10;

    /// Batch size for growing the pool on demand
    pub const DEFAULT_ACQUIRE_INCREMENT: usize = 1;

    /// Extra attempts before a connect failure is surfaced
    pub const DEFAULT_ACQUIRE_RETRY_TIMES: usize = 0;

    /// Idle time after which a connection beyond the core size is evictable
    pub const DEFAULT_LIMIT_IDLE_SECS: u64 = 60;
}

/// Maintenance scheduler constants
pub mod maintenance {
    use super::Duration;

    /// Cadence of the process-wide maintenance worker
    pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(10);

    /// Upper bound on keepalive probes per pool per cycle
    pub const KEEPALIVE_MAX_PER_CYCLE: usize = 3;
}
