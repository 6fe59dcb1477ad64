//! Configuration loading from files and environment variables
//!
//! Pools are normally declared in a TOML file. For container deployments
//! an indexed environment-variable scheme can declare them instead, and
//! takes precedence when present:
//! - `DBPOOL_0_NAME`, `DBPOOL_0_MAX_POOL_SIZE`, `DBPOOL_0_CORE_POOL_SIZE`, ...
//! - `DBPOOL_1_NAME`, ...

use anyhow::{Context, Result};
use std::path::Path;
use std::time::Duration;
use tracing::info;

use super::types::{Config, PoolConfig};

fn env_var(index: usize, key: &str) -> Option<String> {
    std::env::var(format!("DBPOOL_{index}_{key}")).ok()
}

/// Whether any indexed pool environment variables are set.
pub fn has_pool_env_vars() -> bool {
    std::env::var("DBPOOL_0_NAME").is_ok()
}

/// Build a configuration from indexed environment variables.
///
/// Returns `None` when no `DBPOOL_0_NAME` is present.
pub fn load_config_from_env() -> Option<Result<Config>> {
    let mut pools = Vec::new();
    let mut index = 0;

    loop {
        let Some(name) = env_var(index, "NAME") else {
            break;
        };

        // Unparseable values fall back to the field default.
        let mut pool = PoolConfig::named(name);
        if let Some(v) = env_var(index, "CORE_POOL_SIZE").and_then(|v| v.parse().ok()) {
            pool.core_pool_size = v;
        }
        if let Some(v) = env_var(index, "MAX_POOL_SIZE").and_then(|v| v.parse().ok()) {
            pool.max_pool_size = v;
        }
        if let Some(v) = env_var(index, "ACQUIRE_INCREMENT").and_then(|v| v.parse().ok()) {
            pool.acquire_increment = v;
        }
        if let Some(v) = env_var(index, "ACQUIRE_RETRY_TIMES").and_then(|v| v.parse().ok()) {
            pool.acquire_retry_times = v;
        }
        if let Some(v) = env_var(index, "USELESS_CONNECTION_EXCEPTION") {
            pool.useless_connection_exception = v == "1" || v.eq_ignore_ascii_case("true");
        }
        if let Some(v) = env_var(index, "TEST_TABLE_NAME") {
            pool.test_table_name = Some(v);
        }
        if let Some(v) = env_var(index, "TEST_BEFORE_USE") {
            pool.test_before_use = v == "1" || v.eq_ignore_ascii_case("true");
        }
        if let Some(v) = env_var(index, "LIMIT_IDLE_SECS").and_then(|v| v.parse().ok()) {
            pool.limit_idle_time = Duration::from_secs(v);
        }
        pools.push(pool);
        index += 1;
    }

    if pools.is_empty() {
        return None;
    }

    info!("Loaded {} pool(s) from environment variables", pools.len());
    let config = Config { pools };
    Some(config.validate().map(|()| config))
}

/// Load and validate a configuration file, with environment variables
/// taking precedence when present.
pub fn load_config(path: impl AsRef<Path>) -> Result<Config> {
    if let Some(from_env) = load_config_from_env() {
        return from_env;
    }

    let path = path.as_ref();
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    let config: Config = toml::from_str(&text)
        .with_context(|| format!("failed to parse config file {}", path.display()))?;
    config.validate()?;
    info!(
        "Loaded {} pool(s) from {}",
        config.pools.len(),
        path.display()
    );
    Ok(config)
}

/// Write a commented single-pool default configuration to `path` and
/// return it.
pub fn create_default_config(path: impl AsRef<Path>) -> Result<Config> {
    let config = Config {
        pools: vec![PoolConfig::named("default")],
    };
    let text = toml::to_string_pretty(&config).context("failed to serialize default config")?;
    let path = path.as_ref();
    std::fs::write(path, text)
        .with_context(|| format!("failed to write default config to {}", path.display()))?;
    info!("Created default config at {}", path.display());
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_is_an_error() {
        let result = load_config("/nonexistent/dbpool.toml");
        assert!(result.is_err());
    }

    #[test]
    fn test_env_loading_absent_without_vars() {
        // Serialized by the fact that no test in this module sets the vars.
        assert!(!has_pool_env_vars() || load_config_from_env().is_some());
    }
}
