//! # connpool
//!
//! Bounded asynchronous connection pool.
//!
//! Keeps between `min_size` and `max_size` connections opened by a
//! [`Connector`], hands each out to one caller at a time, checks every
//! returned connection before recycling it, and shuts down either
//! gracefully ([`Pool::close`] + [`Pool::wait_closed`]) or immediately
//! ([`Pool::terminate`]).
//!
//! ```ignore
//! let pool = connpool::create_pool(connector, PoolConfig::new(dsn, 1, 10)).await?;
//! {
//!     let conn = pool.connection().await?;
//!     // use *conn; released when `conn` goes out of scope
//! }
//! pool.close();
//! pool.wait_closed().await?;
//! ```

mod condition;
mod free_list;

pub mod config;
pub mod connection;
pub mod diagnostics;
pub mod error;
pub mod guard;
pub mod pool;

pub use config::{ConnectOptions, PoolConfig};
pub use connection::{
    Connection, ConnectionId, Connector, Cursor, CursorOptions, PooledConnection,
    TransactionStatus,
};
pub use diagnostics::{PoolWarning, TracingSink, WarningSink};
pub use error::{Error, Result};
pub use guard::{ConnectionGuard, CursorGuard};
pub use pool::{Pool, PoolStats, create_pool};
