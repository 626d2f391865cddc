//! Error types for the connection pool
use std::time::Duration;

use thiserror::Error;

use crate::connection::ConnectionId;

/// Result type for pool operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for every fallible pool operation
#[derive(Error, Debug)]
pub enum Error {
    /// Pool configuration is invalid
    #[error("Configuration error: {message}")]
    Configuration {
        /// The error message
        message: String,
        /// The underlying parse error (if any)
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Operation is not allowed in the pool's current lifecycle state
    #[error("Invalid pool state: {message}")]
    InvalidState {
        /// The error message
        message: String,
    },

    /// A connection was released to a pool that never handed it out
    #[error("Connection {connection} was not acquired from this pool")]
    ContractViolation {
        /// Identifier of the offending connection
        connection: ConnectionId,
    },

    /// The connector failed to open a connection
    #[error("Failed to open connection: {reason}")]
    Connect {
        /// The failure reason
        reason: String,
        /// The underlying error
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Opening or closing a cursor failed
    #[error("Cursor error: {reason}")]
    Cursor {
        /// The failure reason
        reason: String,
    },

    /// Operation timeout
    #[error("Operation '{operation}' timed out after {timeout_ms}ms")]
    Timeout {
        /// The operation that timed out
        operation: String,
        /// The timeout duration in milliseconds
        timeout_ms: u64,
    },
}

impl Error {
    /// Create a configuration error
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
            source: None,
        }
    }

    /// Create an invalid-state error
    pub fn invalid_state<S: Into<String>>(message: S) -> Self {
        Self::InvalidState {
            message: message.into(),
        }
    }

    /// Create a connect error wrapping the connector's own failure
    pub fn connect<S, E>(reason: S, source: E) -> Self
    where
        S: Into<String>,
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Connect {
            reason: reason.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a cursor error
    pub fn cursor<S: Into<String>>(reason: S) -> Self {
        Self::Cursor {
            reason: reason.into(),
        }
    }

    /// Create a timeout error for `operation`
    pub fn timeout<S: Into<String>>(operation: S, timeout: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
        }
    }

    /// Check if retrying the failed operation may succeed
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Connect { .. } | Self::Timeout { .. })
    }
}
