//! Configuration validation
//!
//! Semantic checks that run before any pool is created: sizing sanity,
//! probe consistency, and name uniqueness across the process.

use anyhow::Result;
use std::collections::HashSet;

use super::types::{Config, PoolConfig};

impl Config {
    /// Validate the whole configuration, including cross-pool name
    /// uniqueness.
    pub fn validate(&self) -> Result<()> {
        if self.pools.is_empty() {
            return Err(anyhow::anyhow!(
                "configuration must declare at least one pool"
            ));
        }

        let mut names = HashSet::new();
        for pool in &self.pools {
            pool.validate()?;
            if !names.insert(pool.name.as_str()) {
                return Err(anyhow::anyhow!("duplicate pool name '{}'", pool.name));
            }
        }
        Ok(())
    }
}

impl PoolConfig {
    /// Validate a single pool entry.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(anyhow::anyhow!("pool name must not be empty"));
        }
        if self.max_pool_size == 0 {
            return Err(anyhow::anyhow!(
                "pool '{}': max_pool_size must be at least 1",
                self.name
            ));
        }
        if self.core_pool_size > self.max_pool_size {
            return Err(anyhow::anyhow!(
                "pool '{}': core_pool_size ({}) exceeds max_pool_size ({})",
                self.name,
                self.core_pool_size,
                self.max_pool_size
            ));
        }
        if self.acquire_increment == 0 {
            return Err(anyhow::anyhow!(
                "pool '{}': acquire_increment must be at least 1",
                self.name
            ));
        }
        if self.test_before_use && !self.has_probe() {
            return Err(anyhow::anyhow!(
                "pool '{}': test_before_use requires a test table or probe SQL",
                self.name
            ));
        }
        if self.test_table_name.is_none()
            && (self.test_query_sql.is_some() != self.test_create_sql.is_some())
        {
            return Err(anyhow::anyhow!(
                "pool '{}': test_query_sql and test_create_sql must be set together \
                 when no test_table_name is given",
                self.name
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_is_rejected() {
        let config = Config { pools: vec![] };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_duplicate_names_are_rejected() {
        let config = Config {
            pools: vec![PoolConfig::named("orders"), PoolConfig::named("orders")],
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn test_core_above_max_is_rejected() {
        let mut pool = PoolConfig::named("orders");
        pool.core_pool_size = 5;
        pool.max_pool_size = 3;
        assert!(pool.validate().is_err());
    }

    #[test]
    fn test_zero_increment_is_rejected() {
        let mut pool = PoolConfig::named("orders");
        pool.acquire_increment = 0;
        assert!(pool.validate().is_err());
    }

    #[test]
    fn test_test_before_use_needs_probe() {
        let mut pool = PoolConfig::named("orders");
        pool.test_before_use = true;
        assert!(pool.validate().is_err());

        pool.test_table_name = Some("pool_probe".to_string());
        assert!(pool.validate().is_ok());
    }

    #[test]
    fn test_probe_sql_must_come_in_pairs_without_table() {
        let mut pool = PoolConfig::named("orders");
        pool.test_query_sql = Some("SELECT 1 FROM probe".to_string());
        assert!(pool.validate().is_err());

        pool.test_create_sql = Some("CREATE TABLE probe (id INT)".to_string());
        assert!(pool.validate().is_ok());
    }
}
