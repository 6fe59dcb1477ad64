//! Data-source seam consumed by the pool
//!
//! The pool never talks to a concrete driver. It consumes the narrow
//! interfaces defined here: a [`DataSource`] that opens physical
//! connections, the [`DriverConnection`]/[`DriverStatement`] capability
//! set, and the [`XaResource`] distributed-transaction handle for
//! XA-capable sources. A scriptable [`MockDataSource`] lives alongside
//! the traits so tests never need a real database.

mod driver;
pub mod mock;
mod xa;

pub use driver::{DriverConnection, DriverStatement};
pub use mock::{MockConnectionHandle, MockDataSource, XaEvent};
pub use xa::{EndFlag, XaResource, Xid};

use std::fmt::Debug;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

/// A freshly opened physical connection together with its
/// distributed-transaction capability.
///
/// Plain sources leave `xa` empty; XA sources wrap the physical handle's
/// participation capability once, at open time.
pub struct CommonConnection {
    /// The physical driver connection. Dropping it closes the handle.
    pub connection: Box<dyn DriverConnection>,
    /// Present iff the source is XA-capable.
    pub xa: Option<Arc<dyn XaResource>>,
}

impl Debug for CommonConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommonConnection")
            .field("xa", &self.xa.is_some())
            .finish_non_exhaustive()
    }
}

/// Factory for physical connections
///
/// Implementations are driver glue and live outside this crate; the pool
/// only ever calls [`DataSource::get_common_connection`]. Errors are
/// reported as [`anyhow::Error`] and wrapped into the pool's typed
/// taxonomy at the boundary.
#[async_trait]
pub trait DataSource: Send + Sync + Debug {
    /// Open one new physical connection.
    async fn get_common_connection(&self) -> Result<CommonConnection>;
}
