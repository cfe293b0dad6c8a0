//! Primary/replica pool manager.
//!
//! The [`PoolManager`] owns a mandatory primary [`ManagedPool`] and an
//! optional replica. It routes each query before execution, aggregates
//! health and metrics across both pools, and publishes a periodic metrics
//! snapshot on its event channel.
//!
//! Routing happens once per call. A query that fails is returned to the
//! caller as is; it is never re-issued against the other pool.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::config::ManagerConfig;
use crate::driver::DriverFactory;
use crate::error::PoolError;
use crate::event::{EventSink, PoolEvent};
use crate::health::{self, HealthStatus};
use crate::metrics::ManagerMetrics;
use crate::pool::{ManagedPool, PoolOptions};
use crate::routing::{self, PoolLoad, PoolRole, RoutingPolicy};
use crate::value::{QueryResult, SqlValue};

/// Per-call query options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueryOptions {
    /// Whether the statement only reads, making it eligible for the replica.
    pub read_only: bool,
}

impl QueryOptions {
    /// Options for a read-only statement.
    #[must_use]
    pub fn read_only() -> Self {
        Self { read_only: true }
    }

    /// Options for a statement that may write.
    #[must_use]
    pub fn write() -> Self {
        Self { read_only: false }
    }
}

/// Owner of the primary and replica pools.
///
/// Create one at process start and pass it (usually behind an `Arc`) to
/// whatever needs database access.
///
/// # Example
///
/// ```rust,ignore
/// use adaptive_pool::{ManagerConfig, PoolConfig, PoolManager, ReadPreference};
///
/// let config = ManagerConfig::new(PoolConfig::new("postgres://primary/app"))
///     .replica(PoolConfig::new("postgres://replica/app"))
///     .read_preference(ReadPreference::Auto);
///
/// let manager = PoolManager::new(config, &factory).await?;
/// let rows = manager.query_read("SELECT id FROM users", &[]).await?;
/// manager.query_write("UPDATE users SET seen = true WHERE id = $1", &[42.into()]).await?;
/// manager.close().await?;
/// ```
pub struct PoolManager {
    inner: Arc<ManagerInner>,
    shutdown: CancellationToken,
    metrics_task: Mutex<Option<JoinHandle<()>>>,
}

struct ManagerInner {
    config: ManagerConfig,
    policy: RoutingPolicy,
    primary: ManagedPool,
    replica: Option<ManagedPool>,
    events: EventSink,
}

impl PoolManager {
    /// Validate `config`, open the configured pools, and start background
    /// tasks.
    ///
    /// Fails without leaving anything running if the configuration is
    /// invalid or the factory refuses to open a physical pool. An endpoint
    /// that is merely unreachable does not fail construction; it is
    /// reported by health checks.
    pub async fn new(config: ManagerConfig, factory: &dyn DriverFactory) -> Result<Self, PoolError> {
        config.validate()?;

        let events = EventSink::new(config.event_capacity);
        let options = PoolOptions::from(&config);

        let primary = ManagedPool::open(
            PoolRole::Primary.as_str(),
            config.primary.clone(),
            factory,
            options.clone(),
            events.clone(),
        )
        .await?;

        let replica = match &config.replica {
            Some(replica_config) => {
                let opened = ManagedPool::open(
                    PoolRole::Replica.as_str(),
                    replica_config.clone(),
                    factory,
                    options,
                    events.clone(),
                )
                .await;
                match opened {
                    Ok(pool) => Some(pool),
                    Err(e) => {
                        if let Err(close_err) = primary.close().await {
                            tracing::warn!(error = %close_err, "failed to close primary after replica open failure");
                        }
                        return Err(e);
                    }
                }
            }
            None => None,
        };

        let policy = RoutingPolicy {
            read_preference: config.read_preference,
            load_balancing: config.load_balancing,
        };

        tracing::info!(
            replica = replica.is_some(),
            read_preference = %policy.read_preference,
            load_balancing = policy.load_balancing,
            "pool manager started"
        );

        let metrics_enabled = config.metrics_enabled;
        let metrics_interval = config.metrics_interval;
        let inner = Arc::new(ManagerInner {
            config,
            policy,
            primary,
            replica,
            events,
        });

        let shutdown = CancellationToken::new();
        let metrics_task = metrics_enabled
            .then(|| spawn_metrics_collection(inner.clone(), metrics_interval, shutdown.clone()));

        Ok(Self {
            inner,
            shutdown,
            metrics_task: Mutex::new(metrics_task),
        })
    }

    /// The resolved configuration.
    #[must_use]
    pub fn config(&self) -> &ManagerConfig {
        &self.inner.config
    }

    /// The primary pool.
    #[must_use]
    pub fn primary(&self) -> &ManagedPool {
        &self.inner.primary
    }

    /// The replica pool, if one is configured.
    #[must_use]
    pub fn replica(&self) -> Option<&ManagedPool> {
        self.inner.replica.as_ref()
    }

    /// Subscribe to pool and manager events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<PoolEvent> {
        self.inner.events.subscribe()
    }

    /// Execute a statement on the pool chosen by the routing policy.
    ///
    /// Errors from the chosen pool are returned unchanged.
    pub async fn query(
        &self,
        sql: &str,
        params: &[SqlValue],
        options: QueryOptions,
    ) -> Result<QueryResult, PoolError> {
        let role = self.select_pool(options.read_only);
        self.inner.pool(role).query(sql, params).await
    }

    /// Execute a read-only statement.
    pub async fn query_read(&self, sql: &str, params: &[SqlValue]) -> Result<QueryResult, PoolError> {
        self.query(sql, params, QueryOptions::read_only()).await
    }

    /// Execute a statement on the primary, bypassing the routing policy.
    pub async fn query_write(&self, sql: &str, params: &[SqlValue]) -> Result<QueryResult, PoolError> {
        self.inner.primary.query(sql, params).await
    }

    /// Decide which pool would serve a call right now.
    #[must_use]
    pub fn select_pool(&self, read_only: bool) -> PoolRole {
        self.inner.select_pool(read_only)
    }

    /// Metrics snapshots for every owned pool.
    #[must_use]
    pub fn all_metrics(&self) -> ManagerMetrics {
        self.inner.metrics()
    }

    /// Take a metrics snapshot and publish it as
    /// [`PoolEvent::MetricsCollected`], exactly as the periodic task does.
    pub fn collect_metrics(&self) -> ManagerMetrics {
        self.inner.collect_metrics()
    }

    /// Aggregated health of the owned pools.
    #[must_use]
    pub fn health_status(&self) -> HealthStatus {
        self.inner.health_status()
    }

    /// Whether the primary can serve traffic (healthy or degraded).
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.inner.primary.health().is_serviceable()
    }

    /// Stop the metrics task, then close the primary and the replica.
    ///
    /// Both pools are closed even if the first close fails; the first
    /// error encountered is returned.
    pub async fn close(&self) -> Result<(), PoolError> {
        self.shutdown.cancel();
        let task = self.metrics_task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "metrics task ended abnormally");
            }
        }

        let mut first_error = None;
        if let Err(e) = self.inner.primary.close().await {
            first_error = Some(e);
        }
        if let Some(replica) = &self.inner.replica {
            if let Err(e) = replica.close().await {
                first_error.get_or_insert(e);
            }
        }

        tracing::info!("pool manager closed");
        first_error.map_or(Ok(()), Err)
    }
}

impl Drop for PoolManager {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

impl std::fmt::Debug for PoolManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolManager")
            .field("primary", &self.inner.primary)
            .field("replica", &self.inner.replica)
            .field("policy", &self.inner.policy)
            .finish_non_exhaustive()
    }
}

impl ManagerInner {
    fn pool(&self, role: PoolRole) -> &ManagedPool {
        match (role, &self.replica) {
            (PoolRole::Replica, Some(replica)) => replica,
            _ => &self.primary,
        }
    }

    fn select_pool(&self, read_only: bool) -> PoolRole {
        let role = routing::route(
            read_only,
            self.policy,
            load_of(&self.primary),
            self.replica.as_ref().map(load_of),
        );
        tracing::trace!(read_only, pool = %role, "query routed");
        role
    }

    fn health_status(&self) -> HealthStatus {
        health::aggregate(
            self.primary.health(),
            self.replica.as_ref().map(ManagedPool::health),
        )
    }

    fn metrics(&self) -> ManagerMetrics {
        ManagerMetrics {
            primary: self.primary.metrics(),
            replica: self.replica.as_ref().map(ManagedPool::metrics),
            health: self.health_status(),
            collected_at: Utc::now(),
        }
    }

    fn collect_metrics(&self) -> ManagerMetrics {
        let metrics = self.metrics();
        tracing::debug!(
            health = %metrics.health,
            primary_active = metrics.primary.active_connections,
            primary_total_queries = metrics.primary.total_queries,
            primary_avg_query_ms = metrics.primary.avg_query_time_ms,
            replica_active = metrics.replica.as_ref().map(|r| r.active_connections),
            "metrics collected"
        );
        self.events
            .emit(PoolEvent::MetricsCollected(Box::new(metrics.clone())));
        metrics
    }
}

fn load_of(pool: &ManagedPool) -> PoolLoad {
    PoolLoad {
        health: pool.health(),
        active_connections: pool.status().active(),
    }
}

fn spawn_metrics_collection(
    inner: Arc<ManagerInner>,
    interval: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    inner.collect_metrics();
                }
            }
        }
        tracing::trace!("metrics task stopped");
    })
}
