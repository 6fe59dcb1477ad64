//! Benchmarks for the pool's hot path
//!
//! Measures the acquire/release round trip against a warm pool and the
//! statement invocation overhead over the raw driver call.
//!
//! Run with: cargo bench --bench acquire_release

use divan::{Bencher, black_box};
use std::sync::Arc;
use std::time::Duration;

use dbpool::datasource::MockDataSource;
use dbpool::{PoolConfig, PooledDataSource};

fn main() {
    divan::main();
}

fn warm_facade(core: usize, max: usize) -> (tokio::runtime::Runtime, PooledDataSource) {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .expect("runtime");
    let ds = PooledDataSource::with_maintenance_interval(Duration::from_secs(3600));
    runtime.block_on(async {
        let mut cfg = PoolConfig::named("bench");
        cfg.core_pool_size = core;
        cfg.max_pool_size = max;
        ds.register(cfg, Arc::new(MockDataSource::new()))
            .await
            .expect("register");
    });
    (runtime, ds)
}

#[divan::bench(sample_count = 100, sample_size = 100)]
fn acquire_release_warm(bencher: Bencher) {
    let (runtime, ds) = warm_facade(4, 4);
    bencher.bench_local(|| {
        runtime.block_on(async {
            let conn = ds.get_connection().await.expect("acquire");
            black_box(&conn);
            drop(conn);
        })
    });
}

#[divan::bench(sample_count = 100, sample_size = 50)]
fn statement_execute_update(bencher: Bencher) {
    let (runtime, ds) = warm_facade(1, 1);
    bencher.bench_local(|| {
        runtime.block_on(async {
            let conn = ds.get_connection().await.expect("acquire");
            let mut stmt = conn.create_statement();
            black_box(stmt.execute_update("UPDATE t SET n = 1").await.expect("execute"));
        })
    });
}

#[divan::bench(sample_count = 50, sample_size = 20)]
fn acquire_release_with_probe(bencher: Bencher) {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .expect("runtime");
    let ds = PooledDataSource::with_maintenance_interval(Duration::from_secs(3600));
    runtime.block_on(async {
        let mut cfg = PoolConfig::named("bench");
        cfg.core_pool_size = 2;
        cfg.max_pool_size = 2;
        cfg.test_table_name = Some("pool_probe".to_string());
        cfg.test_before_use = true;
        ds.register(cfg, Arc::new(MockDataSource::new()))
            .await
            .expect("register");
    });
    bencher.bench_local(|| {
        runtime.block_on(async {
            let conn = ds.get_connection().await.expect("acquire");
            black_box(&conn);
            drop(conn);
        })
    });
}
