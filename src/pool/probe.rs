//! Connection liveness probe and test-table provisioning
//!
//! A probe is a query against a configured test table. On acquire (when
//! `test_before_use` is set) and during keepalive cycles it decides
//! whether a connection is still usable; at pool init it is run once and
//! the table is created if the query fails.

use anyhow::Result;
use tracing::{debug, warn};

use crate::config::PoolConfig;
use crate::datasource::DriverConnection;

#[derive(Debug, Clone)]
pub(crate) struct LivenessProbe {
    query_sql: String,
    create_sql: String,
}

impl LivenessProbe {
    /// Build the probe from a pool's configuration, deriving the SQL pair
    /// from `test_table_name` when it is not given explicitly.
    pub(crate) fn from_config(cfg: &PoolConfig) -> Option<Self> {
        if !cfg.has_probe() {
            return None;
        }
        let table = cfg.test_table_name.as_deref();
        let query_sql = cfg
            .test_query_sql
            .clone()
            .or_else(|| table.map(|t| format!("SELECT 1 FROM {t}")))?;
        let create_sql = cfg
            .test_create_sql
            .clone()
            .or_else(|| table.map(|t| format!("CREATE TABLE {t} (id INT PRIMARY KEY)")))?;
        Some(Self {
            query_sql,
            create_sql,
        })
    }

    /// Run the probe query. A failure is an internal validation signal,
    /// never surfaced to callers.
    pub(crate) async fn check(&self, conn: &mut dyn DriverConnection) -> bool {
        match self.run_query(conn).await {
            Ok(()) => true,
            Err(e) => {
                debug!("liveness probe failed: {e:#}");
                false
            }
        }
    }

    async fn run_query(&self, conn: &mut dyn DriverConnection) -> Result<()> {
        let mut stmt = conn.prepare(&self.query_sql).await?;
        stmt.execute().await?;
        Ok(())
    }

    /// Init-time provisioning: run the probe query once and create the
    /// test table (then commit) when it fails.
    pub(crate) async fn ensure_table(&self, conn: &mut dyn DriverConnection) -> Result<()> {
        if let Err(e) = self.run_query(conn).await {
            warn!("probe query failed at init, creating test table: {e:#}");
            let mut stmt = conn.prepare(&self.create_sql).await?;
            stmt.execute().await?;
            conn.commit().await?;
        }
        Ok(())
    }
}
