//! Configuration type definitions
//!
//! This module contains the core configuration structures for the pool.
//! Recognized keys map one-to-one to the pool's tuning options; a pool
//! name is required and must be unique within the process.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::defaults;
use super::duration::duration_serde;

/// Top-level configuration: one entry per named pool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default, rename = "pool")]
    pub pools: Vec<PoolConfig>,
}

/// Tuning options for one pool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Pool name; required and unique within the process.
    pub name: String,

    /// Connections pre-opened at init.
    #[serde(default = "defaults::core_pool_size")]
    pub core_pool_size: usize,

    /// Hard ceiling on the total population (idle + in-use).
    #[serde(default = "defaults::max_pool_size")]
    pub max_pool_size: usize,

    /// Batch size for growth on demand.
    #[serde(default = "defaults::acquire_increment")]
    pub acquire_increment: usize,

    /// Extra attempts before a connect failure is surfaced.
    #[serde(default = "defaults::acquire_retry_times")]
    pub acquire_retry_times: usize,

    /// When true, exhaustion fails fast; when false, exhaustion blocks
    /// until a connection is released.
    #[serde(default)]
    pub useless_connection_exception: bool,

    /// Table used by the liveness probe. Setting only this derives the
    /// probe SQL pair.
    #[serde(default)]
    pub test_table_name: Option<String>,

    /// Probe query; derived from `test_table_name` when unset.
    #[serde(default)]
    pub test_query_sql: Option<String>,

    /// Probe table creation statement; derived from `test_table_name`
    /// when unset.
    #[serde(default)]
    pub test_create_sql: Option<String>,

    /// Validate connections on acquire; unhealthy ones are destroyed and
    /// replaced.
    #[serde(default)]
    pub test_before_use: bool,

    /// Connections idle longer than this are evictable down to
    /// `core_pool_size`. Seconds in config files.
    #[serde(default = "defaults::limit_idle_time", with = "duration_serde")]
    pub limit_idle_time: Duration,
}

impl PoolConfig {
    /// A configuration with defaults for everything but the name.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            core_pool_size: defaults::core_pool_size(),
            max_pool_size: defaults::max_pool_size(),
            acquire_increment: defaults::acquire_increment(),
            acquire_retry_times: defaults::acquire_retry_times(),
            useless_connection_exception: false,
            test_table_name: None,
            test_query_sql: None,
            test_create_sql: None,
            test_before_use: false,
            limit_idle_time: defaults::limit_idle_time(),
        }
    }

    /// Whether any liveness probe is configured.
    pub fn has_probe(&self) -> bool {
        self.test_table_name.is_some()
            || self.test_query_sql.is_some()
            || self.test_create_sql.is_some()
    }
}
