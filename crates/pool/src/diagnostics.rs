//! Warnings the pool raises about caller misuse or leaked connections.
//!
//! The pool never logs these through ambient global state; each pool owns a
//! [`WarningSink`] (by default [`TracingSink`]) that tests and embedders can
//! replace.

use std::fmt;

use crate::connection::{ConnectionId, TransactionStatus};

/// A diagnostic warning emitted by a pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PoolWarning {
    /// A connection came back mid-transaction and was closed instead of
    /// being recycled.
    DirtyRelease {
        /// The discarded connection.
        connection: ConnectionId,
        /// Status observed at release time.
        status: TransactionStatus,
    },
    /// The pool was dropped with idle connections still open; they were
    /// force-closed.
    UnclosedOnDrop {
        /// How many idle connections were closed.
        count: usize,
    },
    /// A connection could not be returned to the free list because it was
    /// already full, and was closed.
    FreeListFull {
        /// The discarded connection.
        connection: ConnectionId,
    },
}

impl fmt::Display for PoolWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DirtyRelease { connection, status } => write!(
                f,
                "Invalid transaction status on released connection {connection}: {status}"
            ),
            Self::UnclosedOnDrop { count } => write!(f, "Unclosed {count} connections in pool"),
            Self::FreeListFull { connection } => {
                write!(f, "Free list full, closed connection {connection}")
            }
        }
    }
}

/// Destination for [`PoolWarning`]s.
pub trait WarningSink: Send + Sync {
    /// Record a warning raised by the pool called `pool`.
    fn warn(&self, pool: &str, warning: &PoolWarning);
}

/// Default sink: forwards every warning to `tracing::warn!`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl WarningSink for TracingSink {
    fn warn(&self, pool: &str, warning: &PoolWarning) {
        match warning {
            PoolWarning::DirtyRelease { connection, status } => tracing::warn!(
                pool,
                connection = %connection,
                status = %status,
                "Invalid transaction status on released connection"
            ),
            PoolWarning::UnclosedOnDrop { count } => tracing::warn!(
                pool,
                count,
                "Pool dropped with unclosed idle connections"
            ),
            PoolWarning::FreeListFull { connection } => tracing::warn!(
                pool,
                connection = %connection,
                "Free list full, closing connection"
            ),
        }
    }
}
