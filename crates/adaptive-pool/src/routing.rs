//! Read/write routing policy.
//!
//! [`route`] is a pure function of the call's intent, the configured
//! policy, and the pools' current state. The manager evaluates it on every
//! call; no decision is cached.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::PoolError;
use crate::health::HealthStatus;

/// Where read-only queries may be sent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadPreference {
    /// Reads always go to the primary.
    Primary,
    /// Reads go to the replica while it is healthy.
    Replica,
    /// Reads go to whichever healthy pool has fewer active connections,
    /// when load balancing is enabled.
    #[default]
    Auto,
}

impl FromStr for ReadPreference {
    type Err = PoolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "primary" => Ok(Self::Primary),
            "replica" => Ok(Self::Replica),
            "auto" => Ok(Self::Auto),
            other => Err(PoolError::Configuration(format!(
                "unknown read preference '{other}' (expected primary, replica or auto)"
            ))),
        }
    }
}

impl std::fmt::Display for ReadPreference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Primary => "primary",
            Self::Replica => "replica",
            Self::Auto => "auto",
        })
    }
}

/// Which pool a query is sent to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PoolRole {
    /// The read-write primary.
    Primary,
    /// The read-only replica.
    Replica,
}

impl PoolRole {
    /// Pool name used in logs, events and metrics.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Replica => "replica",
        }
    }
}

impl std::fmt::Display for PoolRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Routing-relevant state of one pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolLoad {
    /// Current health.
    pub health: HealthStatus,
    /// Connections currently checked out.
    pub active_connections: u32,
}

/// Routing policy, fixed at manager construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoutingPolicy {
    /// Read preference.
    pub read_preference: ReadPreference,
    /// Whether `auto` may pick the less loaded pool.
    pub load_balancing: bool,
}

/// Decide which pool serves a call.
///
/// Writes always go to the primary. Reads go to the primary when there is
/// no replica; otherwise the read preference decides:
///
/// - `primary`: primary.
/// - `replica`: replica if healthy, else primary.
/// - `auto`: replica only if load balancing is on, the replica is healthy,
///   and its active-connection count is strictly lower than the primary's.
///   Ties go to the primary.
///
/// Replication lag is not considered.
#[must_use]
pub fn route(
    read_only: bool,
    policy: RoutingPolicy,
    primary: PoolLoad,
    replica: Option<PoolLoad>,
) -> PoolRole {
    if !read_only {
        return PoolRole::Primary;
    }
    let Some(replica) = replica else {
        return PoolRole::Primary;
    };
    let replica_healthy = replica.health == HealthStatus::Healthy;

    match policy.read_preference {
        ReadPreference::Primary => PoolRole::Primary,
        ReadPreference::Replica if replica_healthy => PoolRole::Replica,
        ReadPreference::Replica => PoolRole::Primary,
        ReadPreference::Auto => {
            if policy.load_balancing
                && replica_healthy
                && replica.active_connections < primary.active_connections
            {
                PoolRole::Replica
            } else {
                PoolRole::Primary
            }
        }
    }
}
