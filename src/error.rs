//! Error types for the connection pool
//!
//! One variant per failure kind a caller can observe. Validation failures
//! are deliberately absent: a failed liveness probe is an internal signal
//! that triggers destroy-and-replace and is never surfaced directly.

use std::time::Duration;
use thiserror::Error;

use crate::tx::TxError;

/// Errors surfaced by pool operations
#[derive(Debug, Error)]
pub enum PoolError {
    /// The driver refused a connection after the configured retries.
    ///
    /// Fatal for the triggering acquire; the pool itself remains usable.
    #[error("pool '{pool}': could not open a connection after {attempts} attempt(s)")]
    ConnectFailed {
        pool: String,
        attempts: usize,
        #[source]
        source: anyhow::Error,
    },

    /// The pool is at `max_pool_size` and configured to fail fast on
    /// exhaustion instead of blocking.
    #[error("pool '{pool}': no connection left and the pool is at its maximum of {max}")]
    Exhausted { pool: String, max: usize },

    /// A bounded wait for an idle connection expired.
    ///
    /// Pool state is unchanged; the caller may simply retry.
    #[error("pool '{pool}': timed out after {waited:?} waiting for an idle connection")]
    Timeout { pool: String, waited: Duration },

    /// A blocked wait for an idle connection was woken by pool shutdown.
    #[error("pool '{pool}': wait for an idle connection was interrupted by shutdown")]
    Interrupted { pool: String },

    /// Operation on a proxy that was already released or destroyed.
    ///
    /// This is a caller bug: statement handles must not outlive the
    /// pooled connection they were created from.
    #[error("connection proxy is closed or has been returned to the pool")]
    ProxyClosed,

    /// Operation on a pool after `shutdown()`. Terminal.
    #[error("pool '{pool}' is closed")]
    PoolClosed { pool: String },

    /// Enlistment/delistment failure or an illegal coordinator transition.
    #[error(transparent)]
    Transaction(#[from] TxError),

    /// A driver-level failure passed through to the caller.
    #[error("driver error: {0}")]
    Driver(#[source] anyhow::Error),

    /// Invalid or inconsistent configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// The pool is pre-credentialed; per-call credentials are rejected.
    #[error("the pool is pre-credentialed; per-call credentials are not supported")]
    CredentialsUnsupported,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exhausted_message_names_pool_and_max() {
        let err = PoolError::Exhausted {
            pool: "orders".to_string(),
            max: 8,
        };
        let msg = err.to_string();
        assert!(msg.contains("orders"));
        assert!(msg.contains('8'));
    }

    #[test]
    fn test_connect_failed_preserves_source() {
        use std::error::Error;

        let err = PoolError::ConnectFailed {
            pool: "orders".to_string(),
            attempts: 3,
            source: anyhow::anyhow!("connection refused"),
        };
        assert!(err.source().is_some());
        assert!(err.to_string().contains("3 attempt(s)"));
    }

    #[test]
    fn test_transaction_error_is_transparent() {
        let err: PoolError = TxError::NotActive.into();
        assert_eq!(err.to_string(), TxError::NotActive.to_string());
    }

    #[test]
    fn test_timeout_reports_wait() {
        let err = PoolError::Timeout {
            pool: "orders".to_string(),
            waited: Duration::from_millis(250),
        };
        assert!(err.to_string().contains("250ms"));
    }
}
