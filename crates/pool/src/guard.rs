//! RAII guards for scoped acquisition.
//!
//! [`ConnectionGuard`] releases its connection to the pool when dropped.
//! [`CursorGuard`] additionally owns a cursor opened on that connection and
//! closes it before the connection is released.

use crate::connection::{Connection, Cursor, PooledConnection};
use crate::error::Result;

type Release<C> = Box<dyn FnOnce(PooledConnection<C>) + Send + Sync>;

/// A checked-out connection that goes back to its pool on drop.
///
/// Use [`ConnectionGuard::detach`] to take the raw connection out; the
/// caller then owns the obligation to call [`Pool::release`](crate::Pool::release).
pub struct ConnectionGuard<C> {
    conn: Option<PooledConnection<C>>,
    release: Option<Release<C>>,
}

impl<C> ConnectionGuard<C> {
    /// Create a guard that hands `conn` to `release` when dropped.
    pub fn new<F>(conn: PooledConnection<C>, release: F) -> Self
    where
        F: FnOnce(PooledConnection<C>) + Send + Sync + 'static,
    {
        Self {
            conn: Some(conn),
            release: Some(Box::new(release)),
        }
    }

    /// Take the connection out of the guard without releasing it.
    #[must_use]
    pub fn detach(mut self) -> PooledConnection<C> {
        self.release.take();
        self.conn.take().expect("guard used after detach")
    }

    /// The checked-out handle, including its id.
    pub fn pooled(&self) -> &PooledConnection<C> {
        self.conn.as_ref().expect("guard used after detach")
    }
}

impl<C> std::ops::Deref for ConnectionGuard<C> {
    type Target = C;

    fn deref(&self) -> &C {
        self.pooled()
    }
}

impl<C> Drop for ConnectionGuard<C> {
    fn drop(&mut self) {
        if let (Some(conn), Some(release)) = (self.conn.take(), self.release.take()) {
            release(conn);
        }
    }
}

impl<C: std::fmt::Debug> std::fmt::Debug for ConnectionGuard<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionGuard")
            .field("conn", &self.conn)
            .finish()
    }
}

/// A cursor plus the pooled connection it runs on.
///
/// On drop the cursor is closed first; the connection is released second,
/// even when closing the cursor fails. Use [`CursorGuard::close`] to see
/// that failure.
pub struct CursorGuard<C: Connection> {
    cursor: Option<C::Cursor>,
    // Dropped after `Drop::drop` has closed the cursor.
    conn: ConnectionGuard<C>,
}

impl<C: Connection> CursorGuard<C> {
    pub(crate) fn new(cursor: C::Cursor, conn: ConnectionGuard<C>) -> Self {
        Self {
            cursor: Some(cursor),
            conn,
        }
    }

    /// The connection the cursor runs on.
    pub fn connection(&self) -> &C {
        &self.conn
    }

    /// Close the cursor, release the connection, then report how closing
    /// the cursor went. Dropping the guard does the same but only logs a
    /// close failure.
    pub fn close(mut self) -> Result<()> {
        let closed = match self.cursor.take() {
            Some(mut cursor) => cursor.close(),
            None => Ok(()),
        };
        drop(self);
        closed
    }
}

impl<C: Connection> std::ops::Deref for CursorGuard<C> {
    type Target = C::Cursor;

    fn deref(&self) -> &C::Cursor {
        self.cursor.as_ref().expect("cursor already closed")
    }
}

impl<C: Connection> std::ops::DerefMut for CursorGuard<C> {
    fn deref_mut(&mut self) -> &mut C::Cursor {
        self.cursor.as_mut().expect("cursor already closed")
    }
}

impl<C> std::fmt::Debug for CursorGuard<C>
where
    C: Connection + std::fmt::Debug,
    C::Cursor: std::fmt::Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CursorGuard")
            .field("cursor", &self.cursor)
            .field("conn", &self.conn)
            .finish()
    }
}

impl<C: Connection> Drop for CursorGuard<C> {
    fn drop(&mut self) {
        if let Some(mut cursor) = self.cursor.take()
            && let Err(error) = cursor.close()
        {
            tracing::warn!(%error, "Failed to close cursor before releasing its connection");
        }
    }
}
