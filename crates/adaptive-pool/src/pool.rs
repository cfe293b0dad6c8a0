//! Managed connection pool.
//!
//! A [`ManagedPool`] wraps one physical pool (one database endpoint). It
//! executes queries with scoped connection checkout, keeps rolling query
//! metrics, and classifies its own health with a periodic background check.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::config::{
    DEFAULT_HEALTH_CHECK_QUERY, DEFAULT_ROLLING_WINDOW_SIZE, ManagerConfig, PoolConfig,
};
use crate::driver::{Connection, Driver, DriverFactory, DriverStatus};
use crate::error::{DriverError, PoolError};
use crate::event::{EventSink, PoolEvent};
use crate::health::{HealthStatus, HealthTracker, Transition};
use crate::metrics::{ExecutionRecord, PoolMetrics, QueryStats};
use crate::value::{QueryResult, SqlValue};

/// Health-check and metrics settings for one pool.
///
/// A [`PoolManager`](crate::manager::PoolManager) derives these from its
/// [`ManagerConfig`] so both pools share one policy.
#[derive(Debug, Clone)]
pub struct PoolOptions {
    /// Interval between health checks. Zero disables the background check.
    pub health_check_interval: Duration,
    /// Time a single health check may take before it counts as failed.
    pub health_check_timeout: Duration,
    /// Consecutive failures after which the pool is unhealthy.
    pub max_health_check_failures: u32,
    /// Statement used by health checks.
    pub health_check_query: Arc<str>,
    /// Number of samples kept for rolling averages.
    pub rolling_window_size: usize,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self::from(&ManagerConfig::default())
    }
}

impl From<&ManagerConfig> for PoolOptions {
    fn from(config: &ManagerConfig) -> Self {
        Self {
            health_check_interval: config.health_check_interval,
            health_check_timeout: config.health_check_timeout,
            max_health_check_failures: config.max_health_check_failures,
            health_check_query: config.health_check_query.clone(),
            rolling_window_size: config.rolling_window_size,
        }
    }
}

impl PoolOptions {
    /// Options with periodic health checks disabled.
    #[must_use]
    pub fn without_health_checks() -> Self {
        Self {
            health_check_interval: Duration::ZERO,
            health_check_timeout: Duration::from_secs(5),
            max_health_check_failures: 3,
            health_check_query: Arc::from(DEFAULT_HEALTH_CHECK_QUERY),
            rolling_window_size: DEFAULT_ROLLING_WINDOW_SIZE,
        }
    }
}

/// A physical pool with health monitoring and rolling metrics.
///
/// All methods take `&self`; the pool is safe to share between tasks
/// (for example behind an `Arc`) without caller-side locking.
pub struct ManagedPool {
    inner: Arc<PoolInner>,
    shutdown: CancellationToken,
    health_task: Mutex<Option<JoinHandle<()>>>,
}

struct PoolInner {
    name: Arc<str>,
    config: PoolConfig,
    driver: Arc<dyn Driver>,
    health_check_timeout: Duration,
    health_check_query: Arc<str>,
    stats: Mutex<QueryStats>,
    health: Mutex<HealthTracker>,
    closed: AtomicBool,
    close_lock: tokio::sync::Mutex<()>,
    created_at: Instant,
    events: EventSink,
}

impl ManagedPool {
    /// Open the physical pool through `factory` and start monitoring it.
    ///
    /// The physical pool is opened immediately. An unreachable endpoint
    /// does not fail construction; it shows up as failing health checks.
    pub async fn open(
        name: &str,
        config: PoolConfig,
        factory: &dyn DriverFactory,
        options: PoolOptions,
        events: EventSink,
    ) -> Result<Self, PoolError> {
        config.validate()?;
        let driver = factory.open(name, &config).await?;
        Ok(Self::with_driver(name, config, driver, options, events))
    }

    /// Wrap an already opened physical pool.
    ///
    /// When `options.health_check_interval` is non-zero a background task
    /// is spawned, so this must be called from within a Tokio runtime.
    #[must_use]
    pub fn with_driver(
        name: &str,
        config: PoolConfig,
        driver: Arc<dyn Driver>,
        options: PoolOptions,
        events: EventSink,
    ) -> Self {
        let inner = Arc::new(PoolInner {
            name: Arc::from(name),
            config,
            driver,
            health_check_timeout: options.health_check_timeout,
            health_check_query: options.health_check_query,
            stats: Mutex::new(QueryStats::new(options.rolling_window_size)),
            health: Mutex::new(HealthTracker::new(options.max_health_check_failures)),
            closed: AtomicBool::new(false),
            close_lock: tokio::sync::Mutex::new(()),
            created_at: Instant::now(),
            events,
        });

        let shutdown = CancellationToken::new();
        let health_task = (!options.health_check_interval.is_zero()).then(|| {
            spawn_health_checks(
                inner.clone(),
                options.health_check_interval,
                shutdown.clone(),
            )
        });

        tracing::info!(
            pool = %inner.name,
            max_connections = inner.config.max_connections,
            min_connections = inner.config.min_connections,
            health_check_interval_ms = as_millis_u64(options.health_check_interval),
            "pool opened"
        );

        Self {
            inner,
            shutdown,
            health_task: Mutex::new(health_task),
        }
    }

    /// Pool name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// The configuration the pool was built from.
    #[must_use]
    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// Execute a statement on a pooled connection.
    ///
    /// The connection is returned to the driver on every exit path. The
    /// outcome and timings are folded into the pool's metrics before this
    /// returns. Driver errors are returned unchanged as
    /// [`PoolError::Driver`]; nothing is retried. On a closed pool the call
    /// fails with [`PoolError::PoolClosed`] and is counted as failed.
    pub async fn query(&self, sql: &str, params: &[SqlValue]) -> Result<QueryResult, PoolError> {
        self.inner.execute(sql, params).await
    }

    /// Snapshot of the pool's metrics.
    ///
    /// Connection counts are read from the live driver; the rest comes from
    /// the pool's counters. The snapshot is an independent copy.
    #[must_use]
    pub fn metrics(&self) -> PoolMetrics {
        self.inner.metrics()
    }

    /// Live connection counters from the driver.
    #[must_use]
    pub fn status(&self) -> DriverStatus {
        self.inner.driver.status()
    }

    /// Current health status.
    #[must_use]
    pub fn health(&self) -> HealthStatus {
        self.inner.health.lock().status()
    }

    /// Whether the last health check passed.
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.health() == HealthStatus::Healthy
    }

    /// Whether health checks are failing but the threshold is not reached.
    #[must_use]
    pub fn is_degraded(&self) -> bool {
        self.health() == HealthStatus::Degraded
    }

    /// Whether the consecutive-failure threshold has been reached.
    #[must_use]
    pub fn is_unhealthy(&self) -> bool {
        self.health() == HealthStatus::Unhealthy
    }

    /// Run one health check now and return the resulting status.
    ///
    /// This is the same check the background task runs on every tick.
    /// On a closed pool the current status is returned unchanged.
    pub async fn check_health(&self) -> HealthStatus {
        if self.is_closed() {
            return self.health();
        }
        self.inner.check_health().await
    }

    /// Check if the pool is closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    /// Stop health checks and close the physical pool.
    ///
    /// Subsequent queries fail with [`PoolError::PoolClosed`]. Closing an
    /// already closed pool is a no-op; a concurrent caller waits until the
    /// first close has finished.
    pub async fn close(&self) -> Result<(), PoolError> {
        let _guard = self.inner.close_lock.lock().await;
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        self.shutdown.cancel();
        let task = self.health_task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                tracing::warn!(
                    pool = %self.inner.name,
                    error = %e,
                    "health check task ended abnormally"
                );
            }
        }

        let result = self.inner.driver.close().await;
        self.inner.events.emit(PoolEvent::Close {
            pool: self.inner.name.clone(),
        });

        match &result {
            Ok(()) => tracing::info!(pool = %self.inner.name, "pool closed"),
            Err(e) => tracing::error!(pool = %self.inner.name, error = %e, "pool close failed"),
        }
        result.map_err(PoolError::from)
    }
}

impl Drop for ManagedPool {
    fn drop(&mut self) {
        // The health task holds its own reference to the inner state.
        self.shutdown.cancel();
    }
}

impl std::fmt::Debug for ManagedPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagedPool")
            .field("name", &self.inner.name)
            .field("health", &self.health())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl PoolInner {
    async fn execute(&self, sql: &str, params: &[SqlValue]) -> Result<QueryResult, PoolError> {
        let started_at = Instant::now();
        let (wait, result) = if self.is_closed() {
            let closed = PoolError::PoolClosed {
                pool: self.name.to_string(),
            };
            (Duration::ZERO, Err(closed))
        } else {
            let acquired = self.acquire(self.config.connection_timeout).await;
            let wait = started_at.elapsed();
            let result = match acquired {
                Ok(mut conn) => conn.query(sql, params).await.map_err(PoolError::from),
                Err(e) => Err(e),
            };
            (wait, result)
        };

        self.stats.lock().record(&ExecutionRecord {
            started_at,
            wait,
            duration: started_at.elapsed(),
            success: result.is_ok(),
        });

        if let Err(e) = &result {
            tracing::debug!(pool = %self.name, error = %e, "query failed");
            self.events.emit(PoolEvent::Error {
                pool: self.name.clone(),
                error: e.to_string(),
            });
        }
        result
    }

    async fn acquire(&self, timeout: Duration) -> Result<PooledConnection<'_>, PoolError> {
        let started = Instant::now();
        let acquired = match tokio::time::timeout(timeout, self.driver.acquire()).await {
            Ok(Ok(acquired)) => acquired,
            Ok(Err(e)) => return Err(e.into()),
            Err(_) => {
                tracing::debug!(
                    pool = %self.name,
                    timeout_ms = as_millis_u64(timeout),
                    "connection acquisition timed out"
                );
                return Err(PoolError::AcquisitionTimeout(timeout));
            }
        };
        let wait = started.elapsed();

        if acquired.created {
            self.events.emit(PoolEvent::Connect {
                pool: self.name.clone(),
            });
        }
        self.events.emit(PoolEvent::Acquire {
            pool: self.name.clone(),
            wait,
        });
        tracing::trace!(
            pool = %self.name,
            wait_us = u64::try_from(wait.as_micros()).unwrap_or(u64::MAX),
            "connection acquired"
        );

        Ok(PooledConnection {
            connection: Some(acquired.connection),
            discard: false,
            pool: self,
        })
    }

    async fn check_health(&self) -> HealthStatus {
        let started = Instant::now();
        let timeout = self.health_check_timeout;

        let outcome = tokio::time::timeout(timeout, async {
            let mut conn = self.acquire(timeout).await?;
            conn.query(&self.health_check_query, &[]).await?;
            Ok::<_, PoolError>(())
        })
        .await
        .unwrap_or_else(|_| Err(PoolError::Driver(DriverError::Timeout(timeout))));

        let duration = started.elapsed();
        // A check that overlapped close() says nothing about the endpoint.
        if self.is_closed() {
            return self.health.lock().status();
        }
        match outcome {
            Ok(()) => {
                let transition = self.health.lock().record_success(Utc::now());
                tracing::debug!(
                    pool = %self.name,
                    elapsed_ms = as_millis_u64(duration),
                    "health check passed"
                );
                self.events.emit(PoolEvent::HealthCheckSuccess {
                    pool: self.name.clone(),
                    duration,
                });
                self.on_transition(transition)
            }
            Err(e) => {
                let (transition, consecutive_failures) = {
                    let mut health = self.health.lock();
                    let transition = health.record_failure();
                    (transition, health.consecutive_failures())
                };
                tracing::warn!(
                    pool = %self.name,
                    error = %e,
                    consecutive_failures,
                    "health check failed"
                );
                self.events.emit(PoolEvent::HealthCheckFailure {
                    pool: self.name.clone(),
                    error: e.to_string(),
                    consecutive_failures,
                });
                self.on_transition(transition)
            }
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn on_transition(&self, transition: Transition) -> HealthStatus {
        if transition.changed() {
            match transition.to {
                HealthStatus::Healthy => {
                    tracing::info!(pool = %self.name, from = %transition.from, "pool recovered");
                }
                HealthStatus::Degraded => {
                    tracing::warn!(pool = %self.name, from = %transition.from, "pool degraded");
                }
                HealthStatus::Unhealthy => {
                    tracing::error!(pool = %self.name, from = %transition.from, "pool unhealthy");
                }
            }
            self.events.emit(PoolEvent::HealthChanged {
                pool: self.name.clone(),
                from: transition.from,
                to: transition.to,
            });
        }
        transition.to
    }

    fn metrics(&self) -> PoolMetrics {
        let status = self.driver.status();
        let (total_queries, successful_queries, failed_queries, avg_query_time_ms, avg_wait_time_ms) = {
            let stats = self.stats.lock();
            (
                stats.total(),
                stats.successful(),
                stats.failed(),
                stats.avg_query_time_ms(),
                stats.avg_wait_time_ms(),
            )
        };
        let (health, consecutive_failures, last_health_check) = {
            let tracker = self.health.lock();
            (
                tracker.status(),
                tracker.consecutive_failures(),
                tracker.last_success(),
            )
        };

        PoolMetrics {
            name: self.name.to_string(),
            total_connections: status.total,
            active_connections: status.active(),
            idle_connections: status.idle,
            waiting_clients: status.waiting,
            max_connections: self.config.max_connections,
            total_queries,
            successful_queries,
            failed_queries,
            avg_query_time_ms,
            avg_wait_time_ms,
            health,
            consecutive_failures,
            last_health_check,
            uptime_ms: as_millis_u64(self.created_at.elapsed()),
        }
    }
}

fn as_millis_u64(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn spawn_health_checks(
    inner: Arc<PoolInner>,
    interval: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately; checks start one interval in.
        ticker.tick().await;

        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }
            tokio::select! {
                () = shutdown.cancelled() => break,
                _ = inner.check_health() => {}
            }
        }
        tracing::trace!(pool = %inner.name, "health check task stopped");
    })
}

/// A connection checked out of a [`ManagedPool`].
///
/// When dropped, the connection is returned to the driver. A connection
/// that failed with a connection-class error is returned with the discard
/// flag so the driver destroys it.
struct PooledConnection<'a> {
    connection: Option<Box<dyn Connection>>,
    discard: bool,
    pool: &'a PoolInner,
}

impl PooledConnection<'_> {
    async fn query(&mut self, sql: &str, params: &[SqlValue]) -> Result<QueryResult, DriverError> {
        let Some(connection) = self.connection.as_mut() else {
            return Err(DriverError::Closed);
        };
        let result = connection.query(sql, params).await;
        if let Err(e) = &result {
            if e.is_connection_error() {
                self.discard = true;
            }
        }
        result
    }
}

impl Drop for PooledConnection<'_> {
    fn drop(&mut self) {
        let Some(connection) = self.connection.take() else {
            return;
        };
        connection.release(self.discard);
        if self.discard {
            tracing::debug!(pool = %self.pool.name, "broken connection discarded");
            self.pool.events.emit(PoolEvent::Remove {
                pool: self.pool.name.clone(),
            });
        } else {
            tracing::trace!(pool = %self.pool.name, "connection released");
        }
    }
}
