//! Health classification.
//!
//! A pool starts out [`HealthStatus::Healthy`]. Each failed health check
//! increments a consecutive-failure counter and moves the pool to
//! [`HealthStatus::Degraded`], or to [`HealthStatus::Unhealthy`] once the
//! counter reaches the configured threshold. A single successful check
//! clears the counter and restores `Healthy`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Three-state health of a pool or of the whole manager.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Health checks are passing.
    #[default]
    Healthy,
    /// Recent health checks failed, but fewer than the threshold.
    Degraded,
    /// The consecutive-failure threshold has been reached.
    Unhealthy,
}

impl HealthStatus {
    /// Whether the status still accepts traffic (healthy or degraded).
    #[must_use]
    pub fn is_serviceable(&self) -> bool {
        !matches!(self, Self::Unhealthy)
    }

    /// Lowercase name, as used in logs and serialized metrics.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Degraded => "degraded",
            Self::Unhealthy => "unhealthy",
        }
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Combine primary and replica health into one manager-level status.
///
/// With both pools present: both healthy gives `Healthy`, exactly one
/// healthy gives `Degraded`, neither healthy gives `Unhealthy`. Without a
/// replica the primary's status is reported as is.
#[must_use]
pub fn aggregate(primary: HealthStatus, replica: Option<HealthStatus>) -> HealthStatus {
    let Some(replica) = replica else {
        return primary;
    };
    match (
        primary == HealthStatus::Healthy,
        replica == HealthStatus::Healthy,
    ) {
        (true, true) => HealthStatus::Healthy,
        (true, false) | (false, true) => HealthStatus::Degraded,
        (false, false) => HealthStatus::Unhealthy,
    }
}

/// A change of status produced by one health-check outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    /// Status before the check.
    pub from: HealthStatus,
    /// Status after the check.
    pub to: HealthStatus,
}

impl Transition {
    /// Whether the status actually changed.
    #[must_use]
    pub fn changed(&self) -> bool {
        self.from != self.to
    }
}

/// Consecutive-failure state machine behind a pool's health status.
#[derive(Debug, Clone)]
pub struct HealthTracker {
    status: HealthStatus,
    consecutive_failures: u32,
    max_failures: u32,
    last_success: Option<DateTime<Utc>>,
}

impl HealthTracker {
    /// Create a tracker that becomes unhealthy after `max_failures`
    /// consecutive failures. A threshold of zero is treated as one.
    #[must_use]
    pub fn new(max_failures: u32) -> Self {
        Self {
            status: HealthStatus::Healthy,
            consecutive_failures: 0,
            max_failures: max_failures.max(1),
            last_success: None,
        }
    }

    /// Current status.
    #[must_use]
    pub fn status(&self) -> HealthStatus {
        self.status
    }

    /// Failures since the last successful check.
    #[must_use]
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Time of the last successful check.
    #[must_use]
    pub fn last_success(&self) -> Option<DateTime<Utc>> {
        self.last_success
    }

    /// Record a passing check.
    pub fn record_success(&mut self, at: DateTime<Utc>) -> Transition {
        let from = self.status;
        self.consecutive_failures = 0;
        self.status = HealthStatus::Healthy;
        self.last_success = Some(at);
        Transition {
            from,
            to: self.status,
        }
    }

    /// Record a failing check.
    pub fn record_failure(&mut self) -> Transition {
        let from = self.status;
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.status = if self.consecutive_failures >= self.max_failures {
            HealthStatus::Unhealthy
        } else {
            HealthStatus::Degraded
        };
        Transition {
            from,
            to: self.status,
        }
    }
}
