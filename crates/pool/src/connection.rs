//! Connector, connection and cursor contracts consumed by the pool.
//!
//! The pool never talks to the backing service itself. A [`Connector`]
//! opens connections; the pool only ever asks a [`Connection`] whether it is
//! closed, what its transaction status is, to close, or to open a cursor.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use crate::config::ConnectOptions;
use crate::error::Result;

/// Transaction status reported by a connection at release time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransactionStatus {
    /// No transaction in progress; safe to recycle.
    Idle,
    /// A command is currently executing.
    Active,
    /// Inside a transaction block that was neither committed nor rolled back.
    InTransaction,
    /// Inside a failed transaction block.
    InError,
    /// Status could not be determined.
    Unknown,
}

impl TransactionStatus {
    /// Whether a connection in this state may go back to the free list.
    #[must_use]
    pub fn is_idle(self) -> bool {
        self == Self::Idle
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Active => "active",
            Self::InTransaction => "in-transaction",
            Self::InError => "in-error",
            Self::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// Options for opening a cursor on a pooled connection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CursorOptions {
    /// Server-side cursor name; `None` opens a client-side cursor
    pub name: Option<String>,
    /// Whether the cursor may scroll backwards
    pub scrollable: Option<bool>,
    /// Keep the cursor open past the end of the transaction
    pub withhold: bool,
    /// Per-cursor statement timeout
    pub timeout: Option<Duration>,
}

impl CursorOptions {
    /// Options for a named server-side cursor.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Default::default()
        }
    }
}

/// A cursor layered on top of a pooled connection.
pub trait Cursor: Send + 'static {
    /// Close the cursor. Called exactly once by [`CursorGuard`](crate::CursorGuard).
    fn close(&mut self) -> Result<()>;
}

/// A live connection to the backing service.
///
/// `close` takes `&self` because [`Pool::terminate`](crate::Pool::terminate)
/// closes connections that callers are still holding.
#[async_trait]
pub trait Connection: Send + Sync + 'static {
    /// Cursor type produced by [`Connection::cursor`].
    type Cursor: Cursor;

    /// Close the connection. Must be idempotent.
    fn close(&self);

    /// Whether the connection has been closed.
    fn is_closed(&self) -> bool;

    /// Current transaction status.
    fn transaction_status(&self) -> TransactionStatus;

    /// Open a cursor on this connection.
    async fn cursor(&self, options: CursorOptions) -> Result<Self::Cursor>;
}

/// Factory that opens new connections for a pool.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Connection type produced by this connector.
    type Connection: Connection;

    /// Open a new connection.
    async fn connect(&self, options: &ConnectOptions) -> Result<Self::Connection>;
}

/// Process-unique identifier of a pooled connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub(crate) fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    /// Wrap a raw id. Mostly useful in tests.
    #[must_use]
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// The raw numeric id.
    #[must_use]
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A connection checked out of a pool.
///
/// Hand it back with [`Pool::release`](crate::Pool::release). The handle is
/// not `Clone`, so it can be released at most once.
pub struct PooledConnection<C> {
    id: ConnectionId,
    conn: Arc<C>,
}

impl<C> PooledConnection<C> {
    pub(crate) fn new(id: ConnectionId, conn: Arc<C>) -> Self {
        Self { id, conn }
    }

    /// Identifier of this connection.
    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub(crate) fn into_parts(self) -> (ConnectionId, Arc<C>) {
        (self.id, self.conn)
    }
}

impl<C> std::ops::Deref for PooledConnection<C> {
    type Target = C;

    fn deref(&self) -> &C {
        &self.conn
    }
}

impl<C: fmt::Debug> fmt::Debug for PooledConnection<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledConnection")
            .field("id", &self.id)
            .field("conn", &self.conn)
            .finish()
    }
}
