//! Query metrics and rolling averages.
//!
//! Averages are computed over a bounded window of the most recent samples.
//! Older samples fall out of the window instead of being folded into the
//! average, so the statistic reflects current behavior.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::health::HealthStatus;

/// Fixed-capacity ring buffer of duration samples, in milliseconds.
///
/// Pushing is O(1) and never allocates after construction. Once full, each
/// push overwrites the oldest sample.
#[derive(Debug, Clone)]
pub struct RollingWindow {
    samples: Box<[f64]>,
    next: usize,
    len: usize,
    sum: f64,
}

impl RollingWindow {
    /// Create an empty window holding at most `capacity` samples.
    /// A capacity of zero is treated as one.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: vec![0.0; capacity.max(1)].into_boxed_slice(),
            next: 0,
            len: 0,
            sum: 0.0,
        }
    }

    /// Maximum number of samples retained.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.samples.len()
    }

    /// Number of samples currently retained.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether no sample has been recorded yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Record a sample.
    pub fn push(&mut self, sample: Duration) {
        let value = sample.as_secs_f64() * 1000.0;
        let capacity = self.samples.len();

        if self.len == capacity {
            self.sum -= self.samples[self.next];
        } else {
            self.len += 1;
        }
        self.samples[self.next] = value;
        self.sum += value;
        self.next = (self.next + 1) % capacity;

        // Re-sum once per lap so float drift from the running total cannot
        // accumulate.
        if self.next == 0 {
            self.sum = self.samples[..self.len].iter().sum();
        }
    }

    /// Mean of the retained samples in milliseconds, or 0 when empty.
    #[must_use]
    pub fn mean(&self) -> f64 {
        if self.len == 0 {
            0.0
        } else {
            (self.sum / self.len as f64).max(0.0)
        }
    }
}

/// Timing and outcome of one query. Consumed by [`QueryStats::record`].
#[derive(Debug, Clone, Copy)]
pub struct ExecutionRecord {
    /// When the query was submitted to the pool.
    pub started_at: Instant,
    /// Time spent waiting for a connection.
    pub wait: Duration,
    /// Time from submission until the query completed or failed.
    pub duration: Duration,
    /// Whether the query succeeded.
    pub success: bool,
}

/// Counters and rolling windows owned by one pool.
///
/// Counters and windows are updated together under the owner's lock, so a
/// snapshot never sees a count without its sample.
#[derive(Debug, Clone)]
pub struct QueryStats {
    total: u64,
    successful: u64,
    failed: u64,
    query_times: RollingWindow,
    wait_times: RollingWindow,
}

impl QueryStats {
    /// Create empty statistics with the given window size.
    #[must_use]
    pub fn new(window_size: usize) -> Self {
        Self {
            total: 0,
            successful: 0,
            failed: 0,
            query_times: RollingWindow::new(window_size),
            wait_times: RollingWindow::new(window_size),
        }
    }

    /// Fold one execution into the statistics.
    pub fn record(&mut self, record: &ExecutionRecord) {
        self.total += 1;
        if record.success {
            self.successful += 1;
        } else {
            self.failed += 1;
        }
        self.query_times.push(record.duration);
        self.wait_times.push(record.wait);
    }

    /// Total queries executed.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.total
    }

    /// Queries that succeeded.
    #[must_use]
    pub fn successful(&self) -> u64 {
        self.successful
    }

    /// Queries that failed.
    #[must_use]
    pub fn failed(&self) -> u64 {
        self.failed
    }

    /// Rolling mean query duration in milliseconds.
    #[must_use]
    pub fn avg_query_time_ms(&self) -> f64 {
        self.query_times.mean()
    }

    /// Rolling mean acquisition wait in milliseconds.
    #[must_use]
    pub fn avg_wait_time_ms(&self) -> f64 {
        self.wait_times.mean()
    }
}

/// Point-in-time metrics for one pool.
///
/// Returned by value; mutating a snapshot has no effect on the pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolMetrics {
    /// Pool name.
    pub name: String,
    /// Open physical connections.
    pub total_connections: u32,
    /// Connections currently checked out.
    pub active_connections: u32,
    /// Idle connections.
    pub idle_connections: u32,
    /// Callers waiting for a connection.
    pub waiting_clients: u32,
    /// Configured connection limit.
    pub max_connections: u32,
    /// Queries executed since the pool was created.
    pub total_queries: u64,
    /// Queries that succeeded.
    pub successful_queries: u64,
    /// Queries that failed.
    pub failed_queries: u64,
    /// Rolling mean query duration in milliseconds.
    pub avg_query_time_ms: f64,
    /// Rolling mean acquisition wait in milliseconds.
    pub avg_wait_time_ms: f64,
    /// Current health classification.
    pub health: HealthStatus,
    /// Failed health checks since the last success.
    pub consecutive_failures: u32,
    /// Time of the last successful health check.
    pub last_health_check: Option<DateTime<Utc>>,
    /// Milliseconds since the pool was created.
    pub uptime_ms: u64,
}

impl PoolMetrics {
    /// Fraction of the connection limit currently checked out, in `0.0..=1.0`.
    #[must_use]
    pub fn utilization(&self) -> f64 {
        if self.max_connections == 0 {
            return 0.0;
        }
        (f64::from(self.active_connections) / f64::from(self.max_connections)).min(1.0)
    }

    /// Fraction of executed queries that failed.
    #[must_use]
    pub fn error_rate(&self) -> f64 {
        if self.total_queries == 0 {
            return 0.0;
        }
        self.failed_queries as f64 / self.total_queries as f64
    }
}

/// Metrics for every pool a manager owns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManagerMetrics {
    /// Primary pool metrics.
    pub primary: PoolMetrics,
    /// Replica pool metrics, when a replica is configured.
    pub replica: Option<PoolMetrics>,
    /// Aggregated health.
    pub health: HealthStatus,
    /// When the snapshot was taken.
    pub collected_at: DateTime<Utc>,
}
