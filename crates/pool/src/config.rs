//! Pool and connect configuration

use std::collections::HashMap;
use std::time::Duration;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default timeout handed to the connector for opening one connection.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(60);

/// Options forwarded verbatim to [`Connector::connect`](crate::Connector::connect).
///
/// The pool never interprets these beyond `timeout`, which also bounds
/// how long it waits for a single connection to open.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct ConnectOptions {
    /// Connection target (DSN, URL, socket path...)
    pub dsn: String,
    /// Timeout for opening a single connection
    pub timeout: Duration,
    /// Register JSON type adapters on new connections
    pub enable_json: bool,
    /// Register hstore type adapters on new connections
    pub enable_hstore: bool,
    /// Log every statement executed on pooled connections
    pub echo: bool,
    /// Extra connector-specific options
    pub extra: HashMap<String, String>,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            dsn: String::new(),
            timeout: DEFAULT_CONNECT_TIMEOUT,
            enable_json: true,
            enable_hstore: true,
            echo: false,
            extra: HashMap::new(),
        }
    }
}

impl ConnectOptions {
    /// Create connect options for the given target.
    pub fn new(dsn: impl Into<String>) -> Self {
        Self {
            dsn: dsn.into(),
            ..Default::default()
        }
    }

    /// Set the connect timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Enable/disable statement echo.
    pub fn echo(mut self, enabled: bool) -> Self {
        self.echo = enabled;
        self
    }

    /// Add a connector-specific option.
    pub fn option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }
}

/// Configuration for a connection pool
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct PoolConfig {
    /// Name used in diagnostics
    pub name: String,
    /// Minimum number of connections kept open
    pub min_size: usize,
    /// Maximum number of connections, idle and checked out together
    pub max_size: usize,
    /// Upper bound on how long `acquire` may wait; `None` waits forever
    pub acquire_timeout: Option<Duration>,
    /// Options passed to the connector
    pub connect: ConnectOptions,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            name: "pool".to_string(),
            min_size: 10,
            max_size: 10,
            acquire_timeout: None,
            connect: ConnectOptions::default(),
        }
    }
}

impl PoolConfig {
    /// Create a pool configuration for the given target and size bounds.
    pub fn new(dsn: impl Into<String>, min_size: usize, max_size: usize) -> Self {
        Self {
            min_size,
            max_size,
            connect: ConnectOptions::new(dsn),
            ..Default::default()
        }
    }

    /// Set the diagnostics name.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set the acquire timeout.
    pub fn acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = Some(timeout);
        self
    }

    /// Replace the connect options.
    pub fn connect(mut self, connect: ConnectOptions) -> Self {
        self.connect = connect;
        self
    }

    /// Validate pool configuration, returning an error if invalid.
    pub fn validate(&self) -> Result<()> {
        if self.max_size < self.min_size {
            return Err(Error::configuration(format!(
                "max_size ({}) must not be less than min_size ({})",
                self.max_size, self.min_size
            )));
        }
        if self.connect.timeout.is_zero() {
            return Err(Error::configuration(
                "connect timeout must be greater than zero",
            ));
        }
        if self.acquire_timeout.is_some_and(|t| t.is_zero()) {
            return Err(Error::configuration(
                "acquire_timeout must be greater than zero",
            ));
        }
        Ok(())
    }

    /// Parse and validate a JSON configuration document.
    #[cfg(feature = "serde")]
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json).map_err(|e| Error::Configuration {
            message: format!("invalid pool configuration: {e}"),
            source: Some(Box::new(e)),
        })?;
        config.validate()?;
        Ok(config)
    }
}
