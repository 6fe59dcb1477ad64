//! Default values for configuration fields
//!
//! These functions back the `#[serde(default = ...)]` attributes so a
//! minimal TOML file (just a pool name) yields a working configuration.

use std::time::Duration;

use crate::constants::pool;

pub fn core_pool_size() -> usize {
    pool::DEFAULT_CORE_POOL_SIZE
}

pub fn max_pool_size() -> usize {
    pool::DEFAULT_MAX_POOL_SIZE
}

pub fn acquire_increment() -> usize {
    pool::DEFAULT_ACQUIRE_INCREMENT
}

pub fn acquire_retry_times() -> usize {
    pool::DEFAULT_ACQUIRE_RETRY_TIMES
}

pub fn limit_idle_time() -> Duration {
    Duration::from_secs(pool::DEFAULT_LIMIT_IDLE_SECS)
}
