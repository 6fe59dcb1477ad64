//! Distributed-transaction resource handle
//!
//! An [`XaResource`] represents one connection's capability to
//! participate in a global transaction. The pool enlists it before
//! statement execution and the coordinator drives end/commit/rollback.
//! Prepared-transaction recovery across process restarts is out of scope,
//! so the protocol here is single-phase.

use std::fmt::{self, Debug};

use anyhow::Result;
use async_trait::async_trait;

/// Branch identifier for one resource's work inside a global transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Xid {
    /// Identifier of the global transaction.
    pub global: u64,
    /// Branch qualifier, unique per enlisted resource.
    pub branch: u64,
}

impl fmt::Display for Xid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.global, self.branch)
    }
}

/// Outcome flag passed when a resource is delisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndFlag {
    /// The branch completed its work normally.
    Success,
    /// The branch failed; its work must be rolled back.
    Fail,
}

/// A connection's participation capability in a distributed transaction.
#[async_trait]
pub trait XaResource: Send + Sync + Debug {
    /// Associate the resource with a transaction branch.
    async fn start(&self, xid: Xid) -> Result<()>;

    /// Dissociate the resource from the branch with the given outcome.
    async fn end(&self, xid: Xid, flag: EndFlag) -> Result<()>;

    /// Commit the branch. `one_phase` skips the prepare round.
    async fn commit(&self, xid: Xid, one_phase: bool) -> Result<()>;

    /// Roll the branch back.
    async fn rollback(&self, xid: Xid) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_xid_display() {
        let xid = Xid {
            global: 7,
            branch: 2,
        };
        assert_eq!(xid.to_string(), "7:2");
    }

    #[test]
    fn test_xids_compare_by_value() {
        let a = Xid {
            global: 1,
            branch: 1,
        };
        let b = Xid {
            global: 1,
            branch: 1,
        };
        assert_eq!(a, b);
        assert_ne!(
            a,
            Xid {
                global: 1,
                branch: 2
            }
        );
    }
}
