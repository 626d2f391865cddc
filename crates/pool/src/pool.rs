//! Bounded connection pool.
//!
//! `Pool<F>` opens connections through the [`Connector`] `F`, keeps between
//! `min_size` and `max_size` of them, and hands them out one caller at a
//! time. Acquirers that find the pool saturated wait on a [`Condition`]
//! until a release, a clear, or a shutdown changes the picture.
//!
//! Bookkeeping lives behind a `parking_lot` mutex that is never held across
//! an `.await`, so [`Pool::release`], [`Pool::close`] and
//! [`Pool::terminate`] stay synchronous and can run from `Drop`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::condition::{Condition, Section, Wake};
use crate::config::PoolConfig;
use crate::connection::{Connection, ConnectionId, Connector, CursorOptions, PooledConnection};
use crate::diagnostics::{PoolWarning, TracingSink, WarningSink};
use crate::error::{Error, Result};
use crate::free_list::FreeList;
use crate::guard::{ConnectionGuard, CursorGuard};

/// Create a pool and, when `min_size > 0`, open `min_size` connections
/// before returning it.
///
/// # Errors
/// Returns [`Error::Configuration`] for invalid bounds, or whatever error
/// the connector raised while opening the initial connections.
pub async fn create_pool<F: Connector>(connector: F, config: PoolConfig) -> Result<Pool<F>> {
    let pool = Pool::new(connector, config)?;
    pool.fill().await?;
    Ok(pool)
}

/// Pool statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Idle + checked out + being opened.
    pub size: usize,
    /// Current number of idle connections.
    pub idle: usize,
    /// Current number of connections checked out.
    pub active: usize,
    /// Connections currently being opened.
    pub acquiring: usize,
    /// Force-closed connections still awaiting their late release.
    pub terminated: usize,
    /// Tasks blocked waiting for a connection.
    pub waiters: usize,
    /// Total connections ever opened.
    pub created: u64,
    /// Total connections ever closed by the pool.
    pub destroyed: u64,
    /// Total successful acquisitions.
    pub total_acquisitions: u64,
    /// Total releases back to the pool.
    pub total_releases: u64,
    /// Releases discarded because the connection was mid-transaction.
    pub dirty_releases: u64,
}

#[derive(Debug, Default)]
struct Counters {
    created: u64,
    destroyed: u64,
    total_acquisitions: u64,
    total_releases: u64,
    dirty_releases: u64,
}

/// An idle connection on the free list.
struct Idle<C> {
    id: ConnectionId,
    conn: Arc<C>,
}

struct PoolState<C> {
    free: FreeList<Idle<C>>,
    used: HashMap<ConnectionId, Arc<C>>,
    terminated: HashMap<ConnectionId, Arc<C>>,
    acquiring: usize,
    closing: bool,
    closed: bool,
    counters: Counters,
}

impl<C> PoolState<C> {
    fn new(max_size: usize) -> Self {
        Self {
            free: FreeList::with_capacity(max_size),
            used: HashMap::with_capacity(max_size),
            terminated: HashMap::new(),
            acquiring: 0,
            closing: false,
            closed: false,
            counters: Counters::default(),
        }
    }

    fn size(&self) -> usize {
        self.free.len() + self.used.len() + self.acquiring
    }

    fn has_room(&self) -> bool {
        self.size() < self.free.capacity()
    }
}

/// Inner shared state for the pool.
struct PoolInner<F: Connector> {
    connector: F,
    config: PoolConfig,
    sink: Arc<dyn WarningSink>,
    cond: Condition,
    state: Mutex<PoolState<F::Connection>>,
}

impl<F: Connector> PoolInner<F> {
    fn warn(&self, warning: &PoolWarning) {
        self.sink.warn(&self.config.name, warning);
    }
}

impl<F: Connector> Drop for PoolInner<F> {
    fn drop(&mut self) {
        let idle = self.state.get_mut().free.drain();
        if idle.is_empty() {
            return;
        }
        let count = idle.len();
        for entry in idle {
            entry.conn.close();
        }
        self.warn(&PoolWarning::UnclosedOnDrop { count });
    }
}

/// Tracks one in-flight connection open in `acquiring`.
///
/// The count is taken back either by [`Opening::complete`] (under the same
/// lock that files the new connection) or on drop, which covers connector
/// errors, timeouts and a cancelled `acquire`.
struct Opening<'a, C> {
    state: &'a Mutex<PoolState<C>>,
    done: bool,
}

impl<'a, C> Opening<'a, C> {
    fn begin(state: &'a Mutex<PoolState<C>>) -> Self {
        state.lock().acquiring += 1;
        Self { state, done: false }
    }

    fn complete(mut self, state: &mut PoolState<C>) {
        state.acquiring -= 1;
        self.done = true;
    }
}

impl<C> Drop for Opening<'_, C> {
    fn drop(&mut self) {
        if !self.done {
            self.state.lock().acquiring -= 1;
        }
    }
}

enum Checkout<C> {
    Ready(PooledConnection<C>),
    Stale(ConnectionId),
    Empty,
}

/// Bounded pool of connections opened by `F`.
///
/// Cloning is cheap and every clone refers to the same pool.
pub struct Pool<F: Connector> {
    inner: Arc<PoolInner<F>>,
}

impl<F: Connector> Clone for Pool<F> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<F: Connector> std::fmt::Debug for Pool<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let stats = self.stats();
        f.debug_struct("Pool")
            .field("name", &self.inner.config.name)
            .field("min_size", &self.inner.config.min_size)
            .field("max_size", &self.inner.config.max_size)
            .field("stats", &stats)
            .finish()
    }
}

impl<F: Connector> Pool<F> {
    /// Create an empty pool. No connection is opened until [`Pool::fill`]
    /// or [`Pool::acquire`]; see [`create_pool`] for the eager variant.
    ///
    /// # Errors
    /// Returns [`Error::Configuration`] if `config` is invalid.
    pub fn new(connector: F, config: PoolConfig) -> Result<Self> {
        Self::with_warning_sink(connector, config, Arc::new(TracingSink))
    }

    /// Like [`Pool::new`], routing diagnostics to `sink`.
    pub fn with_warning_sink(
        connector: F,
        config: PoolConfig,
        sink: Arc<dyn WarningSink>,
    ) -> Result<Self> {
        config.validate()?;
        let state = PoolState::new(config.max_size);
        Ok(Self {
            inner: Arc::new(PoolInner {
                connector,
                config,
                sink,
                cond: Condition::new(),
                state: Mutex::new(state),
            }),
        })
    }

    /// Diagnostics name of this pool.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.config.name
    }

    /// Idle + checked out + being opened.
    #[must_use]
    pub fn size(&self) -> usize {
        self.inner.state.lock().size()
    }

    /// Number of idle connections.
    #[must_use]
    pub fn free_size(&self) -> usize {
        self.inner.state.lock().free.len()
    }

    #[must_use]
    pub fn min_size(&self) -> usize {
        self.inner.config.min_size
    }

    #[must_use]
    pub fn max_size(&self) -> usize {
        self.inner.config.max_size
    }

    /// Timeout for opening a single connection.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.inner.config.connect.timeout
    }

    /// Whether statement echo is enabled on pooled connections.
    #[must_use]
    pub fn echo(&self) -> bool {
        self.inner.config.connect.echo
    }

    /// `true` once [`Pool::close`] or [`Pool::terminate`] was called.
    #[must_use]
    pub fn is_closing(&self) -> bool {
        self.inner.state.lock().closing
    }

    /// `true` once [`Pool::wait_closed`] has completed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().closed
    }

    /// Snapshot of the pool's counters.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        let waiters = self.inner.cond.waiters();
        let state = self.inner.state.lock();
        PoolStats {
            size: state.size(),
            idle: state.free.len(),
            active: state.used.len(),
            acquiring: state.acquiring,
            terminated: state.terminated.len(),
            waiters,
            created: state.counters.created,
            destroyed: state.counters.destroyed,
            total_acquisitions: state.counters.total_acquisitions,
            total_releases: state.counters.total_releases,
            dirty_releases: state.counters.dirty_releases,
        }
    }

    /// Open connections until the pool holds at least `min_size`.
    pub async fn fill(&self) -> Result<()> {
        if self.inner.config.min_size == 0 {
            return Ok(());
        }
        let section = self.inner.cond.lock().await;
        self.fill_free_pool(&section, false).await
    }

    /// Check a connection out of the pool, opening one if the pool is below
    /// `max_size` and nothing is idle, or waiting for a release otherwise.
    ///
    /// # Errors
    /// - [`Error::InvalidState`] if the pool is closing, including when it
    ///   starts closing while this call waits.
    /// - [`Error::Timeout`] if `acquire_timeout` elapses.
    /// - Any error the connector raises while opening a connection.
    pub async fn acquire(&self) -> Result<PooledConnection<F::Connection>> {
        match self.inner.config.acquire_timeout {
            Some(limit) => tokio::time::timeout(limit, self.acquire_inner())
                .await
                .map_err(|_| Error::timeout("acquire", limit))?,
            None => self.acquire_inner().await,
        }
    }

    async fn acquire_inner(&self) -> Result<PooledConnection<F::Connection>> {
        self.ensure_open()?;
        let mut section = self.inner.cond.lock().await;
        loop {
            self.fill_free_pool(&section, true).await?;
            // Re-checked after the fill: `close` may land during a connect.
            self.ensure_open()?;
            match self.checkout() {
                Checkout::Ready(conn) => return Ok(conn),
                Checkout::Stale(id) => {
                    tracing::debug!(
                        pool = %self.inner.config.name,
                        connection = %id,
                        "Discarded idle connection closed by the backend"
                    );
                }
                Checkout::Empty => section = self.inner.cond.wait(section).await,
            }
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.inner.state.lock().closing {
            return Err(Error::invalid_state(
                "cannot acquire a connection after closing the pool",
            ));
        }
        Ok(())
    }

    fn checkout(&self) -> Checkout<F::Connection> {
        let mut state = self.inner.state.lock();
        let Some(idle) = state.free.pop() else {
            return Checkout::Empty;
        };
        if idle.conn.is_closed() {
            state.counters.destroyed += 1;
            return Checkout::Stale(idle.id);
        }
        debug_assert!(
            !state.used.contains_key(&idle.id),
            "connection {} is both idle and in use",
            idle.id
        );
        state.used.insert(idle.id, Arc::clone(&idle.conn));
        state.counters.total_acquisitions += 1;
        Checkout::Ready(PooledConnection::new(idle.id, idle.conn))
    }

    /// Top up the free list. Requires the exclusive section.
    ///
    /// Always restores `min_size`; with `override_min` it also opens one
    /// connection beyond the minimum when nothing is idle and there is room.
    async fn fill_free_pool(&self, _section: &Section<'_>, override_min: bool) -> Result<()> {
        loop {
            let below_min = {
                let state = self.inner.state.lock();
                !state.closing && state.size() < self.inner.config.min_size
            };
            if !below_min {
                break;
            }
            self.open_connection().await?;
        }

        if !override_min {
            return Ok(());
        }
        let open_one = {
            let state = self.inner.state.lock();
            !state.closing && state.free.is_empty() && state.has_room()
        };
        if open_one {
            self.open_connection().await?;
        }
        Ok(())
    }

    async fn open_connection(&self) -> Result<()> {
        let inner = &*self.inner;
        let opening = Opening::begin(&inner.state);
        let options = &inner.config.connect;
        let conn = tokio::time::timeout(options.timeout, inner.connector.connect(options))
            .await
            .map_err(|_| Error::timeout("connect", options.timeout))??;

        let id = ConnectionId::next();
        let rejected = {
            let mut state = inner.state.lock();
            opening.complete(&mut state);
            state.counters.created += 1;
            match state.free.push(Idle {
                id,
                conn: Arc::new(conn),
            }) {
                Ok(()) => None,
                Err(idle) => {
                    state.counters.destroyed += 1;
                    Some(idle)
                }
            }
        };

        match rejected {
            None => tracing::debug!(pool = %inner.config.name, connection = %id, "Opened connection"),
            Some(idle) => {
                idle.conn.close();
                inner.warn(&PoolWarning::FreeListFull { connection: id });
            }
        }
        inner.cond.notify(Wake::One);
        Ok(())
    }

    /// Hand a connection back to the pool. Never blocks.
    ///
    /// A connection still inside a transaction is closed and dropped from
    /// the pool (with a [`PoolWarning::DirtyRelease`]); while the pool is
    /// closing every released connection is closed. A connection that
    /// [`Pool::terminate`] already force-closed is accepted and ignored.
    ///
    /// # Errors
    /// Returns [`Error::ContractViolation`] if the connection was not
    /// checked out of this pool.
    pub fn release(&self, conn: PooledConnection<F::Connection>) -> Result<()> {
        let inner = &*self.inner;
        let (id, conn) = conn.into_parts();

        let mut warning = None;
        let mut discard = None;
        let wake = {
            let mut state = inner.state.lock();
            if let Some(terminated) = state.terminated.remove(&id) {
                debug_assert!(terminated.is_closed(), "terminated connection {id} is open");
                return Ok(());
            }
            if state.used.remove(&id).is_none() {
                return Err(Error::ContractViolation { connection: id });
            }
            state.counters.total_releases += 1;

            if conn.is_closed() {
                state.counters.destroyed += 1;
            } else {
                let status = conn.transaction_status();
                if !status.is_idle() {
                    state.counters.dirty_releases += 1;
                    state.counters.destroyed += 1;
                    warning = Some(PoolWarning::DirtyRelease {
                        connection: id,
                        status,
                    });
                    discard = Some(conn);
                } else if state.closing {
                    state.counters.destroyed += 1;
                    discard = Some(conn);
                } else if let Err(idle) = state.free.push(Idle { id, conn }) {
                    state.counters.destroyed += 1;
                    warning = Some(PoolWarning::FreeListFull { connection: id });
                    discard = Some(idle.conn);
                }
            }

            if state.closing { Wake::All } else { Wake::One }
        };

        if let Some(conn) = discard {
            conn.close();
            tracing::debug!(pool = %inner.config.name, connection = %id, "Closed released connection");
        }
        if let Some(warning) = warning {
            inner.warn(&warning);
        }
        self.schedule_wakeup(wake);
        Ok(())
    }

    /// Notify waiters from a detached task so the caller never suspends.
    ///
    /// The task enters the exclusive section first, which orders the
    /// notification after any waiter that already checked its predicate.
    /// Without a runtime the calling thread takes the section itself.
    fn schedule_wakeup(&self, wake: Wake) {
        let inner = Arc::clone(&self.inner);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                drop(handle.spawn(async move {
                    let _section = inner.cond.lock().await;
                    inner.cond.notify(wake);
                }));
            }
            Err(_) => {
                let _section = inner.cond.blocking_lock();
                inner.cond.notify(wake);
            }
        }
    }

    fn discard_idle(&self) -> usize {
        let idle = {
            let mut state = self.inner.state.lock();
            let idle = state.free.drain();
            state.counters.destroyed += idle.len() as u64;
            idle
        };
        let count = idle.len();
        for entry in idle {
            entry.conn.close();
        }
        count
    }

    /// Close every idle connection. Checked-out connections and the pool's
    /// open/closing state are untouched.
    pub async fn clear(&self) {
        let _section = self.inner.cond.lock().await;
        let count = self.discard_idle();
        if count > 0 {
            tracing::debug!(pool = %self.inner.config.name, count, "Cleared idle connections");
        }
        self.inner.cond.notify(Wake::All);
    }

    /// Stop handing out connections. Connections still checked out are
    /// closed as they come back. Idempotent.
    pub fn close(&self) {
        {
            let mut state = self.inner.state.lock();
            if state.closed || state.closing {
                return;
            }
            state.closing = true;
        }
        tracing::debug!(pool = %self.inner.config.name, "Pool closing");
        self.schedule_wakeup(Wake::All);
    }

    /// Close the pool and force-close every checked-out connection now.
    ///
    /// Holders find their connection closed on next use; their eventual
    /// [`Pool::release`] is accepted once and ignored.
    pub fn terminate(&self) {
        self.close();

        let victims: Vec<Arc<F::Connection>> = {
            let mut state = self.inner.state.lock();
            let used: Vec<_> = state.used.drain().collect();
            state.counters.destroyed += used.len() as u64;
            used.into_iter()
                .map(|(id, conn)| {
                    state.terminated.insert(id, Arc::clone(&conn));
                    conn
                })
                .collect()
        };

        for conn in &victims {
            conn.close();
        }
        if !victims.is_empty() {
            tracing::debug!(
                pool = %self.inner.config.name,
                count = victims.len(),
                "Terminated checked-out connections"
            );
        }
        self.schedule_wakeup(Wake::All);
    }

    /// Wait until every connection has been returned and closed.
    ///
    /// Returns immediately after [`Pool::terminate`]; after a plain
    /// [`Pool::close`] it waits for each holder to release.
    ///
    /// # Errors
    /// Returns [`Error::InvalidState`] if the pool was never closed.
    pub async fn wait_closed(&self) -> Result<()> {
        {
            let state = self.inner.state.lock();
            if state.closed {
                return Ok(());
            }
            if !state.closing {
                return Err(Error::invalid_state(
                    "wait_closed() must be called after close()",
                ));
            }
        }

        self.discard_idle();
        let mut section = self.inner.cond.lock().await;
        loop {
            self.discard_idle();
            let drained = {
                let state = self.inner.state.lock();
                state.size() == state.free.len()
            };
            if drained {
                break;
            }
            section = self.inner.cond.wait(section).await;
        }
        self.inner.state.lock().closed = true;
        drop(section);

        tracing::debug!(pool = %self.inner.config.name, "Pool closed");
        Ok(())
    }

    /// Acquire a connection wrapped in a guard that releases it on drop.
    pub async fn connection(&self) -> Result<ConnectionGuard<F::Connection>> {
        let conn = self.acquire().await?;
        Ok(self.guard(conn))
    }

    /// Acquire a connection and open a cursor on it.
    ///
    /// Dropping the returned guard closes the cursor, then releases the
    /// connection. If the cursor cannot be opened the connection is
    /// released before the error is returned.
    pub async fn cursor(&self, options: CursorOptions) -> Result<CursorGuard<F::Connection>> {
        let conn = self.connection().await?;
        let cursor = conn.cursor(options).await?;
        Ok(CursorGuard::new(cursor, conn))
    }

    /// Wrap an already-acquired connection in a releasing guard.
    pub fn guard(&self, conn: PooledConnection<F::Connection>) -> ConnectionGuard<F::Connection> {
        let pool = self.clone();
        ConnectionGuard::new(conn, move |conn| {
            if let Err(error) = pool.release(conn) {
                tracing::error!(pool = %pool.name(), %error, "Failed to release scoped connection");
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    use async_trait::async_trait;

    use crate::config::ConnectOptions;
    use crate::connection::{Cursor, TransactionStatus};

    struct StubConnector;

    struct StubConnection {
        closed: AtomicBool,
    }

    struct StubCursor;

    impl Cursor for StubCursor {
        fn close(&mut self) -> Result<()> {
            Ok(())
        }
    }

    #[async_trait]
    impl Connection for StubConnection {
        type Cursor = StubCursor;

        fn close(&self) {
            self.closed.store(true, Ordering::SeqCst);
        }

        fn is_closed(&self) -> bool {
            self.closed.load(Ordering::SeqCst)
        }

        fn transaction_status(&self) -> TransactionStatus {
            TransactionStatus::Idle
        }

        async fn cursor(&self, _options: CursorOptions) -> Result<StubCursor> {
            Ok(StubCursor)
        }
    }

    #[async_trait]
    impl Connector for StubConnector {
        type Connection = StubConnection;

        async fn connect(&self, _options: &ConnectOptions) -> Result<StubConnection> {
            Ok(StubConnection {
                closed: AtomicBool::new(false),
            })
        }
    }

    async fn yield_many() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn acquire_cancelled_after_wakeup_hands_it_to_next_waiter() {
        let pool = Pool::new(StubConnector, PoolConfig::new("stub://", 0, 1)).unwrap();
        let held = pool.acquire().await.unwrap();

        let mut first = Box::pin(pool.acquire());
        assert!(futures::poll!(first.as_mut()).is_pending());
        let second = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.acquire().await.map(|conn| conn.id()) })
        };
        while pool.stats().waiters < 2 {
            tokio::task::yield_now().await;
        }

        let id = held.id();
        pool.release(held).unwrap();
        // The wakeup task notifies `first`.
        yield_many().await;

        let section = pool.inner.cond.lock().await;
        assert!(futures::poll!(first.as_mut()).is_pending());
        drop(first);
        drop(section);

        let woke = tokio::time::timeout(Duration::from_secs(1), second)
            .await
            .expect("idle connection should reach the remaining waiter")
            .unwrap()
            .unwrap();
        assert_eq!(woke, id);
        assert_eq!(pool.stats().waiters, 0);
    }

    #[test]
    fn close_without_runtime_wakes_blocked_acquirer() {
        let rt = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .unwrap();
        let pool = Pool::new(StubConnector, PoolConfig::new("stub://", 0, 1)).unwrap();

        let held = rt.block_on(pool.acquire()).unwrap();
        let waiter = {
            let pool = pool.clone();
            rt.spawn(async move { pool.acquire().await.map(|conn| conn.id()) })
        };
        while pool.stats().waiters == 0 {
            std::thread::yield_now();
        }

        // No runtime is entered on this thread.
        assert!(tokio::runtime::Handle::try_current().is_err());
        pool.close();

        let result = rt.block_on(async {
            tokio::time::timeout(Duration::from_secs(1), waiter)
                .await
                .expect("close should wake the waiter")
                .unwrap()
        });
        assert!(matches!(result, Err(Error::InvalidState { .. })));

        pool.release(held).unwrap();
        rt.block_on(pool.wait_closed()).unwrap();
        assert!(pool.is_closed());
    }
}
