//! Pool error types.

use std::time::Duration;

use thiserror::Error;

/// Errors reported by a physical driver.
///
/// Every [`Driver`](crate::driver::Driver) implementation speaks this type,
/// so the pool can classify failures without knowing the backend.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum DriverError {
    /// Network or transport failure while talking to the database.
    #[error("connection failed: {0}")]
    Connection(String),

    /// The database rejected the credentials.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// An operation did not complete in time.
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    /// The database rejected the statement (syntax, constraint, ...).
    #[error("query failed ({code}): {message}")]
    Query {
        /// Backend-specific error code.
        code: String,
        /// Error message returned by the database.
        message: String,
    },

    /// The physical pool has been shut down.
    #[error("physical pool is closed")]
    Closed,
}

impl DriverError {
    /// Check if this error means the connection itself is unusable.
    ///
    /// Connections that failed this way are discarded on release instead
    /// of being returned to the idle set.
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::Connection(_) | Self::Authentication(_) | Self::Timeout(_) | Self::Closed
        )
    }

    /// Check if this error is transient and may succeed on retry.
    ///
    /// The pool never retries on its own; this is a hint for callers.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Connection(_) | Self::Timeout(_))
    }
}

/// Errors that can occur during pool operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PoolError {
    /// Error from the underlying driver, passed through unchanged.
    #[error(transparent)]
    Driver(#[from] DriverError),

    /// Failed to acquire a connection within the timeout.
    #[error("connection acquisition timeout after {0:?}")]
    AcquisitionTimeout(Duration),

    /// Pool is closed.
    #[error("pool '{pool}' is closed")]
    PoolClosed {
        /// Name of the closed pool.
        pool: String,
    },

    /// Pool configuration error.
    #[error("pool configuration error: {0}")]
    Configuration(String),
}

impl PoolError {
    /// Get the driver error, if this error came from the driver.
    #[must_use]
    pub fn driver_error(&self) -> Option<&DriverError> {
        match self {
            Self::Driver(err) => Some(err),
            _ => None,
        }
    }

    /// Check if this error is a connection-class failure.
    ///
    /// Acquisition timeouts count as connection errors.
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        match self {
            Self::Driver(err) => err.is_connection_error(),
            Self::AcquisitionTimeout(_) | Self::PoolClosed { .. } => true,
            Self::Configuration(_) => false,
        }
    }
}
