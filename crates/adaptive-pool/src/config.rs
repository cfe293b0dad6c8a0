//! Pool and manager configuration.
//!
//! Both structs carry a full set of defaults. Deserializing a partial
//! document (or starting from [`Default::default()`] and calling builder
//! methods) fills every omitted field, and the resolved value is never
//! mutated once a pool has been built from it.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::PoolError;
use crate::routing::ReadPreference;

/// Default health check query.
pub const DEFAULT_HEALTH_CHECK_QUERY: &str = "SELECT 1";

/// Default number of samples kept in each rolling window.
pub const DEFAULT_ROLLING_WINDOW_SIZE: usize = 1000;

/// Configuration for one physical connection pool.
///
/// This struct is marked `#[non_exhaustive]` to allow adding new fields
/// in future minor versions without breaking changes. Use the builder
/// pattern methods or [`Default::default()`] to construct instances.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
#[non_exhaustive]
pub struct PoolConfig {
    /// Connection string or endpoint of the database.
    pub connection_string: String,

    /// Maximum number of connections allowed.
    pub max_connections: u32,

    /// Minimum number of connections to maintain.
    pub min_connections: u32,

    /// Time a connection can be idle before being closed.
    #[serde(with = "duration_ms")]
    pub idle_timeout: Duration,

    /// Time to wait for a connection before timing out.
    #[serde(with = "duration_ms")]
    pub connection_timeout: Duration,

    /// Time allowed for establishing a new physical connection.
    #[serde(with = "duration_ms")]
    pub create_timeout: Duration,

    /// Time allowed for tearing down a physical connection.
    #[serde(with = "duration_ms")]
    pub destroy_timeout: Duration,

    /// Delay between attempts to create a connection after a failure.
    #[serde(with = "duration_ms")]
    pub retry_interval: Duration,

    /// Whether the connection uses TLS.
    pub tls: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            connection_string: String::new(),
            max_connections: 20,
            min_connections: 2,
            idle_timeout: Duration::from_secs(30),
            connection_timeout: Duration::from_secs(10),
            create_timeout: Duration::from_secs(30),
            destroy_timeout: Duration::from_secs(5),
            retry_interval: Duration::from_millis(200),
            tls: false,
        }
    }
}

impl PoolConfig {
    /// Create a pool configuration for the given endpoint with default values.
    #[must_use]
    pub fn new(connection_string: impl Into<String>) -> Self {
        Self {
            connection_string: connection_string.into(),
            ..Self::default()
        }
    }

    /// Set the maximum number of connections.
    #[must_use]
    pub fn max_connections(mut self, count: u32) -> Self {
        self.max_connections = count;
        self
    }

    /// Set the minimum number of connections.
    #[must_use]
    pub fn min_connections(mut self, count: u32) -> Self {
        self.min_connections = count;
        self
    }

    /// Set the idle connection timeout.
    #[must_use]
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Set the connection acquisition timeout.
    #[must_use]
    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    /// Set the connection creation timeout.
    #[must_use]
    pub fn create_timeout(mut self, timeout: Duration) -> Self {
        self.create_timeout = timeout;
        self
    }

    /// Set the connection destruction timeout.
    #[must_use]
    pub fn destroy_timeout(mut self, timeout: Duration) -> Self {
        self.destroy_timeout = timeout;
        self
    }

    /// Set the delay between connection creation retries.
    #[must_use]
    pub fn retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    /// Enable or disable TLS.
    #[must_use]
    pub fn tls(mut self, enabled: bool) -> Self {
        self.tls = enabled;
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), PoolError> {
        if self.connection_string.trim().is_empty() {
            return Err(PoolError::Configuration(
                "connection_string must not be empty".into(),
            ));
        }
        if self.max_connections == 0 {
            return Err(PoolError::Configuration(
                "max_connections must be greater than 0".into(),
            ));
        }
        if self.min_connections > self.max_connections {
            return Err(PoolError::Configuration(
                "min_connections cannot be greater than max_connections".into(),
            ));
        }
        if self.connection_timeout.is_zero() {
            return Err(PoolError::Configuration(
                "connection_timeout must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}

/// Configuration for a [`PoolManager`](crate::manager::PoolManager).
///
/// Composes the primary pool, an optional replica pool, and the policy
/// shared by both.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
#[non_exhaustive]
pub struct ManagerConfig {
    /// Primary (read-write) pool.
    pub primary: PoolConfig,

    /// Optional read-only replica pool.
    pub replica: Option<PoolConfig>,

    /// Where read-only queries are sent.
    pub read_preference: ReadPreference,

    /// Whether `auto` read preference may pick the less loaded pool.
    pub load_balancing: bool,

    /// Interval between health checks. Zero disables the periodic check.
    #[serde(with = "duration_ms")]
    pub health_check_interval: Duration,

    /// Time a single health check may take before it counts as failed.
    #[serde(with = "duration_ms")]
    pub health_check_timeout: Duration,

    /// Consecutive failures after which a pool is marked unhealthy.
    pub max_health_check_failures: u32,

    /// Statement used by health checks.
    pub health_check_query: Arc<str>,

    /// Whether the periodic metrics snapshot is published.
    pub metrics_enabled: bool,

    /// Interval between metrics snapshots.
    #[serde(with = "duration_ms")]
    pub metrics_interval: Duration,

    /// Number of samples kept for rolling averages.
    pub rolling_window_size: usize,

    /// Capacity of the event channel before slow subscribers lag.
    pub event_capacity: usize,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            primary: PoolConfig::default(),
            replica: None,
            read_preference: ReadPreference::Auto,
            load_balancing: true,
            health_check_interval: Duration::from_secs(30),
            health_check_timeout: Duration::from_secs(5),
            max_health_check_failures: 3,
            health_check_query: Arc::from(DEFAULT_HEALTH_CHECK_QUERY),
            metrics_enabled: true,
            metrics_interval: Duration::from_secs(60),
            rolling_window_size: DEFAULT_ROLLING_WINDOW_SIZE,
            event_capacity: 256,
        }
    }
}

impl ManagerConfig {
    /// Create a manager configuration around a primary pool.
    #[must_use]
    pub fn new(primary: PoolConfig) -> Self {
        Self {
            primary,
            ..Self::default()
        }
    }

    /// Add a read replica.
    #[must_use]
    pub fn replica(mut self, replica: PoolConfig) -> Self {
        self.replica = Some(replica);
        self
    }

    /// Set the read preference.
    #[must_use]
    pub fn read_preference(mut self, preference: ReadPreference) -> Self {
        self.read_preference = preference;
        self
    }

    /// Enable or disable least-loaded selection under `auto`.
    #[must_use]
    pub fn load_balancing(mut self, enabled: bool) -> Self {
        self.load_balancing = enabled;
        self
    }

    /// Set the health check interval. Zero disables periodic checks.
    #[must_use]
    pub fn health_check_interval(mut self, interval: Duration) -> Self {
        self.health_check_interval = interval;
        self
    }

    /// Set the per-check timeout.
    #[must_use]
    pub fn health_check_timeout(mut self, timeout: Duration) -> Self {
        self.health_check_timeout = timeout;
        self
    }

    /// Set the consecutive-failure threshold.
    #[must_use]
    pub fn max_health_check_failures(mut self, count: u32) -> Self {
        self.max_health_check_failures = count;
        self
    }

    /// Set a custom health check query.
    #[must_use]
    pub fn health_check_query(mut self, query: impl Into<Arc<str>>) -> Self {
        self.health_check_query = query.into();
        self
    }

    /// Enable or disable the periodic metrics snapshot.
    #[must_use]
    pub fn metrics_enabled(mut self, enabled: bool) -> Self {
        self.metrics_enabled = enabled;
        self
    }

    /// Set the metrics snapshot interval.
    #[must_use]
    pub fn metrics_interval(mut self, interval: Duration) -> Self {
        self.metrics_interval = interval;
        self
    }

    /// Set the rolling window size.
    #[must_use]
    pub fn rolling_window_size(mut self, size: usize) -> Self {
        self.rolling_window_size = size;
        self
    }

    /// Set the event channel capacity.
    #[must_use]
    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    /// Validate the configuration, including both pool configurations.
    pub fn validate(&self) -> Result<(), PoolError> {
        self.primary.validate()?;
        if let Some(replica) = &self.replica {
            replica.validate()?;
        }
        if self.max_health_check_failures == 0 {
            return Err(PoolError::Configuration(
                "max_health_check_failures must be greater than 0".into(),
            ));
        }
        if !self.health_check_interval.is_zero() && self.health_check_timeout.is_zero() {
            return Err(PoolError::Configuration(
                "health_check_timeout must be greater than 0 when health checks are enabled"
                    .into(),
            ));
        }
        if self.metrics_enabled && self.metrics_interval.is_zero() {
            return Err(PoolError::Configuration(
                "metrics_interval must be greater than 0 when metrics are enabled".into(),
            ));
        }
        if self.rolling_window_size == 0 {
            return Err(PoolError::Configuration(
                "rolling_window_size must be greater than 0".into(),
            ));
        }
        if self.event_capacity == 0 {
            return Err(PoolError::Configuration(
                "event_capacity must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}

/// Durations are written as integer milliseconds.
mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub(super) fn serialize<S>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let millis = u64::try_from(value.as_millis()).unwrap_or(u64::MAX);
        serializer.serialize_u64(millis)
    }

    pub(super) fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn primary() -> PoolConfig {
        PoolConfig::new("postgres://primary/app")
    }

    #[test]
    fn test_default_config() {
        let config = ManagerConfig::default();
        assert_eq!(config.read_preference, ReadPreference::Auto);
        assert!(config.load_balancing);
        assert_eq!(config.max_health_check_failures, 3);
        assert_eq!(config.rolling_window_size, DEFAULT_ROLLING_WINDOW_SIZE);
        assert_eq!(&*config.health_check_query, DEFAULT_HEALTH_CHECK_QUERY);
        assert!(config.replica.is_none());
    }

    #[test]
    fn test_pool_config_builder_methods() {
        let config = PoolConfig::new("postgres://db/app")
            .max_connections(50)
            .min_connections(5)
            .idle_timeout(Duration::from_secs(120))
            .connection_timeout(Duration::from_secs(3))
            .create_timeout(Duration::from_secs(4))
            .destroy_timeout(Duration::from_secs(1))
            .retry_interval(Duration::from_millis(50))
            .tls(true);

        assert_eq!(config.max_connections, 50);
        assert_eq!(config.min_connections, 5);
        assert_eq!(config.idle_timeout, Duration::from_secs(120));
        assert_eq!(config.connection_timeout, Duration::from_secs(3));
        assert_eq!(config.create_timeout, Duration::from_secs(4));
        assert_eq!(config.destroy_timeout, Duration::from_secs(1));
        assert_eq!(config.retry_interval, Duration::from_millis(50));
        assert!(config.tls);
    }

    #[test]
    fn test_missing_primary_connection_string_is_rejected() {
        let err = ManagerConfig::default().validate().unwrap_err();
        assert!(err.to_string().contains("connection_string must not be empty"));
    }

    #[test]
    fn test_config_validation_min_greater_than_max() {
        let config = ManagerConfig::new(primary().min_connections(20).max_connections(10));

        let err = config.validate().unwrap_err();
        assert!(
            err.to_string()
                .contains("min_connections cannot be greater than max_connections")
        );
    }

    #[test]
    fn test_invalid_replica_is_rejected() {
        let config = ManagerConfig::new(primary()).replica(PoolConfig::new("").max_connections(1));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_failure_threshold_is_rejected() {
        let config = ManagerConfig::new(primary()).max_health_check_failures(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_disabled_health_checks_allow_zero_timeout() {
        let config = ManagerConfig::new(primary())
            .health_check_interval(Duration::ZERO)
            .health_check_timeout(Duration::ZERO);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_disabled_metrics_allow_zero_interval() {
        let config = ManagerConfig::new(primary())
            .metrics_enabled(false)
            .metrics_interval(Duration::ZERO);
        assert!(config.validate().is_ok());

        let config = config.metrics_enabled(true);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_document_merges_defaults() {
        let json = r#"{
            "primary": { "connection_string": "postgres://primary/app", "max_connections": 8 },
            "replica": { "connection_string": "postgres://replica/app" },
            "read_preference": "replica",
            "health_check_interval": 1500
        }"#;

        let config: ManagerConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.primary.max_connections, 8);
        assert_eq!(config.primary.min_connections, 2);
        assert_eq!(config.replica.as_ref().unwrap().max_connections, 20);
        assert_eq!(config.read_preference, ReadPreference::Replica);
        assert_eq!(config.health_check_interval, Duration::from_millis(1500));
        assert_eq!(config.health_check_timeout, Duration::from_secs(5));
        assert!(config.validate().is_ok());
    }
}
