//! Configuration module
//!
//! This module handles all configuration types, defaults, validation,
//! and loading for the connection pool.

mod defaults;
mod duration;
mod loading;
mod types;
mod validation;

// Re-export public types
pub use loading::{create_default_config, has_pool_env_vars, load_config, load_config_from_env};
pub use types::{Config, PoolConfig};

// Re-export default functions for use in tests and other modules
pub use defaults::{
    acquire_increment, acquire_retry_times, core_pool_size, limit_idle_time, max_pool_size,
};
