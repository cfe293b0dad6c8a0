//! Physical driver seam.
//!
//! This module defines the traits a database driver implements so that a
//! [`ManagedPool`](crate::pool::ManagedPool) can wrap it. The driver owns the
//! physical connections (creation, idle reaping, destruction); the managed
//! pool only checks connections out, runs statements on them, and hands
//! them back.
//!
//! # Trait objects
//!
//! All traits use `#[async_trait]` so they can be held as `dyn` objects.
//! The manager stores primary and replica drivers behind `Arc<dyn Driver>`
//! and never needs to know the concrete backend.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::PoolConfig;
use crate::error::DriverError;
use crate::value::{QueryResult, SqlValue};

/// Opens physical pools.
///
/// The manager calls [`open`](DriverFactory::open) once per configured pool
/// while it is being constructed. Implementations should create the pool
/// object immediately; whether they also dial the database is up to them,
/// because an unreachable endpoint is reported by the first health check.
#[async_trait]
pub trait DriverFactory: Send + Sync {
    /// Open the physical pool described by `config`.
    ///
    /// `name` is the logical pool name (`"primary"` or `"replica"`).
    async fn open(&self, name: &str, config: &PoolConfig) -> Result<Arc<dyn Driver>, DriverError>;
}

/// A physical connection pool for one database endpoint.
#[async_trait]
pub trait Driver: Send + Sync {
    /// Check out a connection.
    ///
    /// Waits until a connection is idle or a new one can be created. The
    /// caller bounds the wait with its own timeout and drops the future
    /// when it expires, so implementations must not hand out a connection
    /// from a cancelled call.
    async fn acquire(&self) -> Result<Acquired, DriverError>;

    /// Live connection counters.
    fn status(&self) -> DriverStatus;

    /// Shut the physical pool down, closing every connection.
    ///
    /// After this returns, [`acquire`](Driver::acquire) must fail.
    async fn close(&self) -> Result<(), DriverError>;
}

/// A checked-out physical connection.
#[async_trait]
pub trait Connection: Send {
    /// Execute a statement.
    async fn query(&mut self, sql: &str, params: &[SqlValue]) -> Result<QueryResult, DriverError>;

    /// Return the connection to its driver.
    ///
    /// With `discard` set, the driver destroys the connection instead of
    /// putting it back into the idle set.
    fn release(self: Box<Self>, discard: bool);
}

/// A connection handed out by [`Driver::acquire`].
pub struct Acquired {
    /// The checked-out connection.
    pub connection: Box<dyn Connection>,
    /// Whether the driver opened a new physical connection for this checkout.
    pub created: bool,
}

impl Acquired {
    /// Wrap a connection that was already idle in the pool.
    #[must_use]
    pub fn reused(connection: Box<dyn Connection>) -> Self {
        Self {
            connection,
            created: false,
        }
    }

    /// Wrap a freshly opened connection.
    #[must_use]
    pub fn created(connection: Box<dyn Connection>) -> Self {
        Self {
            connection,
            created: true,
        }
    }
}

impl std::fmt::Debug for Acquired {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Acquired")
            .field("created", &self.created)
            .finish_non_exhaustive()
    }
}

/// Connection counters reported by a driver.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriverStatus {
    /// Open physical connections (idle + checked out).
    pub total: u32,
    /// Connections sitting idle in the pool.
    pub idle: u32,
    /// Callers waiting for a connection.
    pub waiting: u32,
}

impl DriverStatus {
    /// Connections currently checked out.
    #[must_use]
    pub fn active(&self) -> u32 {
        self.total.saturating_sub(self.idle)
    }
}
