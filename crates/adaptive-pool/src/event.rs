//! Pool lifecycle events.
//!
//! Events are published on a bounded broadcast channel. Publishing never
//! blocks and succeeds whether or not anyone is subscribed; a subscriber
//! that falls more than the channel capacity behind receives
//! [`RecvError::Lagged`](tokio::sync::broadcast::error::RecvError::Lagged)
//! and skips ahead.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;

use crate::health::HealthStatus;
use crate::metrics::ManagerMetrics;

/// Something that happened inside a pool or the manager.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum PoolEvent {
    /// The driver opened a new physical connection.
    Connect {
        /// Pool name.
        pool: Arc<str>,
    },
    /// A connection was checked out.
    Acquire {
        /// Pool name.
        pool: Arc<str>,
        /// Time spent waiting for it.
        wait: Duration,
    },
    /// A broken connection was discarded instead of returned.
    Remove {
        /// Pool name.
        pool: Arc<str>,
    },
    /// A query failed.
    Error {
        /// Pool name.
        pool: Arc<str>,
        /// Rendered error.
        error: String,
    },
    /// A health check passed.
    HealthCheckSuccess {
        /// Pool name.
        pool: Arc<str>,
        /// How long the check took.
        duration: Duration,
    },
    /// A health check failed.
    HealthCheckFailure {
        /// Pool name.
        pool: Arc<str>,
        /// Rendered error.
        error: String,
        /// Failures since the last success, including this one.
        consecutive_failures: u32,
    },
    /// A pool's health status changed.
    HealthChanged {
        /// Pool name.
        pool: Arc<str>,
        /// Previous status.
        from: HealthStatus,
        /// New status.
        to: HealthStatus,
    },
    /// Periodic metrics snapshot.
    MetricsCollected(Box<ManagerMetrics>),
    /// A pool was closed.
    Close {
        /// Pool name.
        pool: Arc<str>,
    },
}

impl PoolEvent {
    /// Event name, matching the names used in logs.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Connect { .. } => "connect",
            Self::Acquire { .. } => "acquire",
            Self::Remove { .. } => "remove",
            Self::Error { .. } => "error",
            Self::HealthCheckSuccess { .. } => "healthCheckSuccess",
            Self::HealthCheckFailure { .. } => "healthCheckFailure",
            Self::HealthChanged { .. } => "healthChanged",
            Self::MetricsCollected(_) => "metricsCollected",
            Self::Close { .. } => "close",
        }
    }

    /// Name of the pool the event concerns, if it concerns a single pool.
    #[must_use]
    pub fn pool(&self) -> Option<&str> {
        match self {
            Self::Connect { pool }
            | Self::Acquire { pool, .. }
            | Self::Remove { pool }
            | Self::Error { pool, .. }
            | Self::HealthCheckSuccess { pool, .. }
            | Self::HealthCheckFailure { pool, .. }
            | Self::HealthChanged { pool, .. }
            | Self::Close { pool } => Some(pool),
            Self::MetricsCollected(_) => None,
        }
    }
}

/// Publishing side of the event channel.
///
/// Cheap to clone; all clones feed the same subscribers.
#[derive(Debug, Clone)]
pub struct EventSink {
    sender: broadcast::Sender<PoolEvent>,
}

impl EventSink {
    /// Create a channel that buffers up to `capacity` events per subscriber.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish an event.
    pub fn emit(&self, event: PoolEvent) {
        // An error only means there are no subscribers right now.
        let _ = self.sender.send(event);
    }

    /// Subscribe to events published from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<PoolEvent> {
        self.sender.subscribe()
    }

    /// Number of live subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tokio::sync::broadcast::error::{RecvError, TryRecvError};

    #[test]
    fn test_emit_without_subscribers_is_fine() {
        let sink = EventSink::new(4);
        sink.emit(PoolEvent::Close {
            pool: Arc::from("primary"),
        });
        assert_eq!(sink.subscriber_count(), 0);
    }

    #[test]
    fn test_subscriber_receives_events_in_order() {
        let sink = EventSink::new(8);
        let mut rx = sink.subscribe();
        let pool: Arc<str> = Arc::from("replica");

        sink.emit(PoolEvent::Connect { pool: pool.clone() });
        sink.emit(PoolEvent::Remove { pool });

        assert_eq!(rx.try_recv().unwrap().name(), "connect");
        let event = rx.try_recv().unwrap();
        assert_eq!(event.name(), "remove");
        assert_eq!(event.pool(), Some("replica"));
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
    }

    #[tokio::test]
    async fn test_slow_subscriber_lags_instead_of_growing() {
        let sink = EventSink::new(2);
        let mut rx = sink.subscribe();
        for _ in 0..5 {
            sink.emit(PoolEvent::Close {
                pool: Arc::from("primary"),
            });
        }

        assert!(matches!(rx.recv().await, Err(RecvError::Lagged(3))));
        assert!(rx.recv().await.is_ok());
    }

    #[test]
    fn test_recv_wakes_on_emit() {
        let sink = EventSink::new(4);
        let mut rx = sink.subscribe();
        let mut recv = tokio_test::task::spawn(rx.recv());

        tokio_test::assert_pending!(recv.poll());
        sink.emit(PoolEvent::Connect {
            pool: Arc::from("primary"),
        });

        assert!(recv.is_woken());
        let event = tokio_test::assert_ready_ok!(recv.poll());
        assert_eq!(event.name(), "connect");
    }
}
