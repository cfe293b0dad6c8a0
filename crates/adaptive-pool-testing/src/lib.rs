//! # adaptive-pool-testing
//!
//! Test infrastructure for `adaptive-pool`.
//!
//! This crate provides an in-memory driver that stands in for a database,
//! so pool and manager behavior can be tested without a server.
//!
//! ## Features
//!
//! - [`MockDriver`]: connection accounting bounded by `max_connections`,
//!   scripted responses, simulated outages and latency
//! - [`MockDriverFactory`]: hands out mock drivers by pool name
//! - Fixtures for building a manager wired to mock drivers
//!
//! ## Example
//!
//! ```rust,ignore
//! use adaptive_pool_testing::fixtures::{ManagerFixture, quiet_manager_config};
//!
//! #[tokio::test]
//! async fn test_reads_use_replica() {
//!     let fixture = ManagerFixture::start(quiet_manager_config(true)).await.unwrap();
//!     fixture.primary.simulate_busy(5);
//!
//!     fixture.manager.query_read("SELECT 1", &[]).await.unwrap();
//!     assert_eq!(fixture.replica_driver().executed_count("SELECT 1"), 1);
//! }
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod factory;
pub mod fixtures;
pub mod mock_driver;

pub use factory::MockDriverFactory;
pub use fixtures::{ManagerFixture, fail_health_checks, quiet_manager_config};
pub use mock_driver::{MockDriver, MockDriverBuilder, MockDriverConfig, MockResponse};
