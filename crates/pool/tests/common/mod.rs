//! Shared mock connector for integration tests.
#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use connpool::{
    ConnectOptions, Connection, Connector, Cursor, CursorOptions, Error, PoolConfig, PoolWarning,
    Result, TransactionStatus, WarningSink,
};
use parking_lot::Mutex;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn config(min_size: usize, max_size: usize) -> PoolConfig {
    PoolConfig::new("mock://db", min_size, max_size).name("test-pool")
}

/// Let detached wakeup tasks run.
pub async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}

// ---------------------------------------------------------------------------
// Connector
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Shared {
    opened: AtomicUsize,
    failures: AtomicUsize,
    delay: Mutex<Option<Duration>>,
    last_options: Mutex<Option<ConnectOptions>>,
    /// Closed flag of every connection ever opened, indexed by `serial - 1`.
    closed: Mutex<Vec<Arc<AtomicBool>>>,
    /// Ordered log of cursor closes and release-time status checks.
    events: Arc<Mutex<Vec<String>>>,
    cursor_closes: Arc<AtomicUsize>,
    fail_cursor: Arc<AtomicBool>,
    fail_cursor_close: Arc<AtomicBool>,
}

/// Connector that hands out [`MockConnection`]s numbered from 1.
#[derive(Clone, Default)]
pub struct MockConnector {
    shared: Arc<Shared>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` connect calls fail.
    pub fn fail_next(&self, n: usize) {
        self.shared.failures.store(n, Ordering::SeqCst);
    }

    /// Delay every connect call by `delay`.
    pub fn set_delay(&self, delay: Duration) {
        *self.shared.delay.lock() = Some(delay);
    }

    /// Make cursor creation fail on every connection.
    pub fn fail_cursor(&self, fail: bool) {
        self.shared.fail_cursor.store(fail, Ordering::SeqCst);
    }

    /// Make cursor close fail on every new cursor.
    pub fn fail_cursor_close(&self, fail: bool) {
        self.shared.fail_cursor_close.store(fail, Ordering::SeqCst);
    }

    pub fn opened(&self) -> usize {
        self.shared.opened.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self, serial: usize) -> bool {
        self.shared.closed.lock()[serial - 1].load(Ordering::SeqCst)
    }

    pub fn closed_count(&self) -> usize {
        self.shared
            .closed
            .lock()
            .iter()
            .filter(|flag| flag.load(Ordering::SeqCst))
            .count()
    }

    /// Simulate the backend dropping connection `serial`.
    pub fn kill(&self, serial: usize) {
        self.shared.closed.lock()[serial - 1].store(true, Ordering::SeqCst);
    }

    pub fn last_options(&self) -> Option<ConnectOptions> {
        self.shared.last_options.lock().clone()
    }

    pub fn cursor_closes(&self) -> usize {
        self.shared.cursor_closes.load(Ordering::SeqCst)
    }

    pub fn events(&self) -> Vec<String> {
        self.shared.events.lock().clone()
    }
}

#[async_trait]
impl Connector for MockConnector {
    type Connection = MockConnection;

    async fn connect(&self, options: &ConnectOptions) -> Result<MockConnection> {
        *self.shared.last_options.lock() = Some(options.clone());
        let delay = *self.shared.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let fail = self
            .shared
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if fail {
            return Err(Error::connect(
                "mock refused",
                std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused"),
            ));
        }

        let closed = Arc::new(AtomicBool::new(false));
        let serial = {
            let mut flags = self.shared.closed.lock();
            flags.push(Arc::clone(&closed));
            flags.len()
        };
        self.shared.opened.fetch_add(1, Ordering::SeqCst);

        Ok(MockConnection {
            serial,
            closed,
            status: Mutex::new(TransactionStatus::Idle),
            events: Arc::clone(&self.shared.events),
            cursor_closes: Arc::clone(&self.shared.cursor_closes),
            fail_cursor: Arc::clone(&self.shared.fail_cursor),
            fail_cursor_close: Arc::clone(&self.shared.fail_cursor_close),
        })
    }
}

// ---------------------------------------------------------------------------
// Connection / cursor
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct MockConnection {
    pub serial: usize,
    closed: Arc<AtomicBool>,
    status: Mutex<TransactionStatus>,
    events: Arc<Mutex<Vec<String>>>,
    cursor_closes: Arc<AtomicUsize>,
    fail_cursor: Arc<AtomicBool>,
    fail_cursor_close: Arc<AtomicBool>,
}

impl MockConnection {
    pub fn set_status(&self, status: TransactionStatus) {
        *self.status.lock() = status;
    }
}

#[async_trait]
impl Connection for MockConnection {
    type Cursor = MockCursor;

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn transaction_status(&self) -> TransactionStatus {
        self.events.lock().push(format!("status:{}", self.serial));
        *self.status.lock()
    }

    async fn cursor(&self, options: CursorOptions) -> Result<MockCursor> {
        if self.is_closed() {
            return Err(Error::cursor("connection is closed"));
        }
        if self.fail_cursor.load(Ordering::SeqCst) {
            return Err(Error::cursor("mock cursor failure"));
        }
        Ok(MockCursor {
            name: options.name,
            conn_serial: self.serial,
            fail_close: self.fail_cursor_close.load(Ordering::SeqCst),
            closes: Arc::clone(&self.cursor_closes),
            events: Arc::clone(&self.events),
        })
    }
}

#[derive(Debug)]
pub struct MockCursor {
    pub name: Option<String>,
    conn_serial: usize,
    fail_close: bool,
    closes: Arc<AtomicUsize>,
    events: Arc<Mutex<Vec<String>>>,
}

impl Cursor for MockCursor {
    fn close(&mut self) -> Result<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        self.events
            .lock()
            .push(format!("cursor-close:{}", self.conn_serial));
        if self.fail_close {
            return Err(Error::cursor("mock close failure"));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Warning sink
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct RecordingSink {
    warnings: Mutex<Vec<(String, PoolWarning)>>,
}

impl RecordingSink {
    pub fn warnings(&self) -> Vec<PoolWarning> {
        self.warnings.lock().iter().map(|(_, w)| w.clone()).collect()
    }

    pub fn pools(&self) -> Vec<String> {
        self.warnings.lock().iter().map(|(p, _)| p.clone()).collect()
    }
}

impl WarningSink for RecordingSink {
    fn warn(&self, pool: &str, warning: &PoolWarning) {
        self.warnings
            .lock()
            .push((pool.to_string(), warning.clone()));
    }
}
