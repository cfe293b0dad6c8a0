//! # adaptive-pool
//!
//! Health-aware connection pool manager for a primary database and an
//! optional read replica.
//!
//! The physical pool (connecting, idle reaping, protocol) belongs to a
//! driver plugged in through the [`driver`] traits. This crate sits on top
//! of it and decides where each query goes, watches each endpoint's health,
//! and keeps rolling performance metrics.
//!
//! ## Features
//!
//! - Read/write routing with `primary`, `replica` and `auto` read preference
//! - Least-active-connections replica selection under `auto`
//! - Periodic health checks with healthy / degraded / unhealthy states
//! - Rolling query-time and wait-time averages over a bounded window
//! - Scoped connection checkout: connections are returned on every path
//! - Lifecycle and metrics events on a bounded broadcast channel
//!
//! ## Example
//!
//! ```rust,ignore
//! use adaptive_pool::{ManagerConfig, PoolConfig, PoolManager, ReadPreference};
//! use std::time::Duration;
//!
//! let config = ManagerConfig::new(PoolConfig::new("postgres://primary/app").max_connections(20))
//!     .replica(PoolConfig::new("postgres://replica/app"))
//!     .read_preference(ReadPreference::Auto)
//!     .health_check_interval(Duration::from_secs(10));
//!
//! let manager = PoolManager::new(config, &my_driver_factory).await?;
//!
//! let mut events = manager.subscribe();
//! let users = manager.query_read("SELECT * FROM users", &[]).await?;
//!
//! if !manager.is_ready() {
//!     // primary is unhealthy
//! }
//! manager.close().await?;
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod config;
pub mod driver;
pub mod error;
pub mod event;
pub mod health;
pub mod manager;
pub mod metrics;
pub mod pool;
pub mod routing;
pub mod value;

pub use config::{ManagerConfig, PoolConfig};
pub use driver::{Acquired, Connection, Driver, DriverFactory, DriverStatus};
pub use error::{DriverError, PoolError};
pub use event::{EventSink, PoolEvent};
pub use health::HealthStatus;
pub use manager::{PoolManager, QueryOptions};
pub use metrics::{ManagerMetrics, PoolMetrics, RollingWindow};
pub use pool::{ManagedPool, PoolOptions};
pub use routing::{PoolRole, ReadPreference};
pub use value::{QueryResult, Row, SqlValue};
