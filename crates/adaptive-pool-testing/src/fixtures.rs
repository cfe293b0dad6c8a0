//! Test fixture utilities.

use std::time::Duration;

use adaptive_pool::config::{ManagerConfig, PoolConfig};
use adaptive_pool::error::PoolError;
use adaptive_pool::health::HealthStatus;
use adaptive_pool::manager::PoolManager;
use adaptive_pool::pool::ManagedPool;

use crate::factory::MockDriverFactory;
use crate::mock_driver::MockDriver;

/// Connection string used for the primary in fixtures.
pub const PRIMARY_URL: &str = "postgres://primary.test/app";

/// Connection string used for the replica in fixtures.
pub const REPLICA_URL: &str = "postgres://replica.test/app";

/// Primary pool configuration with a short acquire timeout.
pub fn primary_config() -> PoolConfig {
    PoolConfig::new(PRIMARY_URL)
        .max_connections(10)
        .connection_timeout(Duration::from_millis(500))
}

/// Replica pool configuration with a short acquire timeout.
pub fn replica_config() -> PoolConfig {
    PoolConfig::new(REPLICA_URL)
        .max_connections(10)
        .connection_timeout(Duration::from_millis(500))
}

/// Manager configuration with both background tasks disabled.
///
/// Tests drive health checks through [`ManagedPool::check_health`] and
/// metrics through [`PoolManager::collect_metrics`], so nothing happens
/// behind their back.
pub fn quiet_manager_config(with_replica: bool) -> ManagerConfig {
    let config = ManagerConfig::new(primary_config())
        .health_check_interval(Duration::ZERO)
        .health_check_timeout(Duration::from_millis(200))
        .max_health_check_failures(3)
        .metrics_enabled(false);
    if with_replica {
        config.replica(replica_config())
    } else {
        config
    }
}

/// A manager wired to mock drivers, with handles to those drivers.
pub struct ManagerFixture {
    /// The manager under test.
    pub manager: PoolManager,
    /// Driver behind the primary pool.
    pub primary: MockDriver,
    /// Driver behind the replica pool, when one is configured.
    pub replica: Option<MockDriver>,
}

impl ManagerFixture {
    /// Build a manager for `config` on fresh mock drivers.
    pub async fn start(config: ManagerConfig) -> Result<Self, PoolError> {
        let primary = MockDriver::builder()
            .max_connections(config.primary.max_connections)
            .build();
        let mut factory = MockDriverFactory::new().with_driver("primary", primary.clone());
        let replica = config.replica.as_ref().map(|replica_config| {
            MockDriver::builder()
                .max_connections(replica_config.max_connections)
                .build()
        });
        if let Some(replica) = &replica {
            factory = factory.with_driver("replica", replica.clone());
        }

        let manager = PoolManager::new(config, &factory).await?;
        Ok(Self {
            manager,
            primary,
            replica,
        })
    }

    /// Replica driver handle.
    ///
    /// # Panics
    ///
    /// Panics if the fixture has no replica.
    #[allow(clippy::expect_used)]
    pub fn replica_driver(&self) -> &MockDriver {
        self.replica.as_ref().expect("fixture has no replica")
    }
}

/// Make `driver` unreachable and run `count` health checks on `pool`.
///
/// The driver stays unreachable afterwards; call
/// `driver.set_unreachable(false)` to let the pool recover.
pub async fn fail_health_checks(pool: &ManagedPool, driver: &MockDriver, count: u32) -> HealthStatus {
    driver.set_unreachable(true);
    let mut status = pool.health();
    for _ in 0..count {
        status = pool.check_health().await;
    }
    status
}
