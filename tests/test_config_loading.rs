//! Tests for configuration loading and facade wiring
//!
//! Covers TOML file loading, validation failures, default-config
//! creation, and `init_path` source matching.


use std::collections::HashMap;
use std::io::Write;
use std::sync::Arc;

use anyhow::Result;
use tempfile::NamedTempFile;

use dbpool::datasource::{DataSource, MockDataSource};
use dbpool::{PoolError, PooledDataSource, create_default_config, load_config};

fn write_temp(contents: &str) -> Result<NamedTempFile> {
    let mut file = NamedTempFile::new()?;
    file.write_all(contents.as_bytes())?;
    file.flush()?;
    Ok(file)
}

#[test]
fn test_load_config_from_file() -> Result<()> {
    let file = write_temp(
        r#"
[[pool]]
name = "orders"
core_pool_size = 2
max_pool_size = 8
acquire_increment = 2
useless_connection_exception = true
limit_idle_time = 120

[[pool]]
name = "billing"
test_table_name = "pool_probe"
test_before_use = true
"#,
    )?;

    let config = load_config(file.path())?;
    assert_eq!(config.pools.len(), 2);

    let orders = &config.pools[0];
    assert_eq!(orders.name, "orders");
    assert_eq!(orders.core_pool_size, 2);
    assert_eq!(orders.max_pool_size, 8);
    assert!(orders.useless_connection_exception);
    assert_eq!(orders.limit_idle_time.as_secs(), 120);

    let billing = &config.pools[1];
    assert!(billing.test_before_use);
    assert_eq!(billing.test_table_name.as_deref(), Some("pool_probe"));
    Ok(())
}

#[test]
fn test_invalid_sizing_fails_validation() -> Result<()> {
    let file = write_temp(
        r#"
[[pool]]
name = "orders"
core_pool_size = 9
max_pool_size = 3
"#,
    )?;

    let err = load_config(file.path()).unwrap_err();
    assert!(err.to_string().contains("core_pool_size"));
    Ok(())
}

#[test]
fn test_duplicate_pool_names_fail_validation() -> Result<()> {
    let file = write_temp(
        r#"
[[pool]]
name = "orders"

[[pool]]
name = "orders"
"#,
    )?;

    let err = load_config(file.path()).unwrap_err();
    assert!(err.to_string().contains("duplicate"));
    Ok(())
}

#[test]
fn test_create_default_config_round_trips() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("dbpool.toml");

    let created = create_default_config(&path)?;
    let loaded = load_config(&path)?;
    assert_eq!(created, loaded);
    assert_eq!(loaded.pools.len(), 1);
    assert_eq!(loaded.pools[0].name, "default");
    Ok(())
}

#[tokio::test]
async fn test_init_path_registers_declared_pools() -> Result<()> {
    let file = write_temp(
        r#"
[[pool]]
name = "orders"
core_pool_size = 1
max_pool_size = 2
"#,
    )?;

    let ds = PooledDataSource::new();
    let mut sources: HashMap<String, Arc<dyn DataSource>> = HashMap::new();
    sources.insert("orders".to_string(), Arc::new(MockDataSource::new()));
    ds.init_path(file.path(), sources).await.unwrap();

    assert_eq!(ds.pool_names(), vec!["orders".to_string()]);
    assert_eq!(ds.status("orders").unwrap().pool_size, 1);
    ds.shutdown();
    Ok(())
}

#[tokio::test]
async fn test_init_path_requires_a_source_per_pool() -> Result<()> {
    let file = write_temp(
        r#"
[[pool]]
name = "orders"
"#,
    )?;

    let ds = PooledDataSource::new();
    let err = ds.init_path(file.path(), HashMap::new()).await.unwrap_err();
    assert!(matches!(err, PoolError::Config(_)));
    assert!(err.to_string().contains("orders"));
    Ok(())
}
