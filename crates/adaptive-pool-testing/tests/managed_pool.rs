//! Managed pool tests against the mock driver.
//!
//! ```bash
//! cargo test -p adaptive-pool-testing --test managed_pool
//! ```

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;

use adaptive_pool::{
    DriverError, EventSink, HealthStatus, ManagedPool, PoolConfig, PoolError, PoolEvent,
    PoolOptions, SqlValue,
};
use adaptive_pool_testing::fixtures::primary_config;
use adaptive_pool_testing::{MockDriver, MockResponse, fail_health_checks};
use tokio::sync::broadcast;

fn open_pool(driver: &MockDriver, config: PoolConfig, options: PoolOptions) -> (ManagedPool, EventSink) {
    let events = EventSink::new(256);
    let pool = ManagedPool::with_driver("primary", config, Arc::new(driver.clone()), options, events.clone());
    (pool, events)
}

fn quiet_pool(driver: &MockDriver) -> (ManagedPool, EventSink) {
    open_pool(driver, primary_config(), PoolOptions::without_health_checks())
}

fn drain(rx: &mut broadcast::Receiver<PoolEvent>) -> Vec<PoolEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

fn names(events: &[PoolEvent]) -> Vec<&'static str> {
    events.iter().map(PoolEvent::name).collect()
}

// =============================================================================
// Query Execution
// =============================================================================

#[tokio::test]
async fn test_query_returns_driver_rows() {
    let driver = MockDriver::builder()
        .with_response("SELECT name FROM users", MockResponse::scalar_string("alice"))
        .build();
    let (pool, _events) = quiet_pool(&driver);

    let result = pool
        .query("SELECT name FROM users", &[])
        .await
        .expect("query should succeed");

    assert_eq!(result.rows.len(), 1);
    assert_eq!(result.rows[0][0].as_str(), Some("alice"));
    assert_eq!(driver.executed_count("SELECT name FROM users"), 1);
}

#[tokio::test]
async fn test_query_passes_parameters_through() {
    let driver = MockDriver::builder()
        .with_default_response(MockResponse::Custom(Arc::new(|_: &str, params: &[SqlValue]| {
            MockResponse::affected(params.len() as u64)
        })))
        .build();
    let (pool, _events) = quiet_pool(&driver);

    let result = pool
        .query(
            "UPDATE users SET name = $1 WHERE id = $2",
            &[SqlValue::from("bob"), SqlValue::from(7_i64)],
        )
        .await
        .unwrap();

    assert_eq!(result.rows_affected, 2);
}

#[tokio::test]
async fn test_successful_query_updates_counters() {
    let driver = MockDriver::builder().build();
    let (pool, _events) = quiet_pool(&driver);

    let before = pool.metrics();
    pool.query("SELECT 1", &[]).await.unwrap();
    let after = pool.metrics();

    assert_eq!(after.total_queries, before.total_queries + 1);
    assert_eq!(after.successful_queries, before.successful_queries + 1);
    assert_eq!(after.failed_queries, before.failed_queries);
}

#[tokio::test]
async fn test_failed_query_surfaces_driver_error_unchanged() {
    let driver = MockDriver::builder()
        .with_response(
            "SELECT * FROM missing",
            MockResponse::query_error("42P01", "relation \"missing\" does not exist"),
        )
        .build();
    let (pool, _events) = quiet_pool(&driver);

    let err = pool.query("SELECT * FROM missing", &[]).await.unwrap_err();

    assert_eq!(
        err.driver_error(),
        Some(&DriverError::Query {
            code: "42P01".into(),
            message: "relation \"missing\" does not exist".into(),
        })
    );
    let metrics = pool.metrics();
    assert_eq!(metrics.total_queries, 1);
    assert_eq!(metrics.successful_queries, 0);
    assert_eq!(metrics.failed_queries, 1);
}

#[tokio::test]
async fn test_counters_sum_to_total() {
    let driver = MockDriver::builder()
        .with_response("BAD", MockResponse::query_error("42601", "syntax error"))
        .build();
    let (pool, _events) = quiet_pool(&driver);

    for i in 0..10 {
        let sql = if i % 3 == 0 { "BAD" } else { "SELECT 1" };
        let _ = pool.query(sql, &[]).await;
    }

    let metrics = pool.metrics();
    assert_eq!(metrics.total_queries, 10);
    assert_eq!(metrics.failed_queries, 4);
    assert_eq!(
        metrics.successful_queries + metrics.failed_queries,
        metrics.total_queries
    );
    assert!((metrics.error_rate() - 0.4).abs() < 1e-9);
}

// =============================================================================
// Connection Release
// =============================================================================

#[tokio::test]
async fn test_connection_released_after_success() {
    let driver = MockDriver::builder().build();
    let (pool, _events) = quiet_pool(&driver);

    pool.query("SELECT 1", &[]).await.unwrap();
    pool.query("SELECT 1", &[]).await.unwrap();

    assert_eq!(driver.checked_out(), 0);
    assert_eq!(driver.acquisitions(), 2);
    assert_eq!(driver.created_connections(), 1, "second query should reuse");
}

#[tokio::test]
async fn test_connection_released_after_statement_error() {
    let driver = MockDriver::builder()
        .with_default_response(MockResponse::query_error("23505", "duplicate key"))
        .build();
    let (pool, _events) = quiet_pool(&driver);

    for _ in 0..5 {
        assert!(pool.query("INSERT INTO t VALUES (1)", &[]).await.is_err());
    }

    assert_eq!(driver.checked_out(), 0);
    assert_eq!(driver.discarded_connections(), 0);
    assert_eq!(driver.created_connections(), 1);
}

#[tokio::test]
async fn test_broken_connection_is_discarded() {
    let driver = MockDriver::builder()
        .with_response("SELECT pg_sleep(10)", MockResponse::connection_error("server closed the connection"))
        .build();
    let (pool, events) = quiet_pool(&driver);
    let mut rx = events.subscribe();

    let err = pool.query("SELECT pg_sleep(10)", &[]).await.unwrap_err();
    assert!(err.is_connection_error());

    assert_eq!(driver.checked_out(), 0);
    assert_eq!(driver.open_connections(), 0);
    assert_eq!(driver.discarded_connections(), 1);
    assert_eq!(
        names(&drain(&mut rx)),
        vec!["connect", "acquire", "remove", "error"]
    );
}

#[tokio::test]
async fn test_query_events_for_new_and_reused_connections() {
    let driver = MockDriver::builder().build();
    let (pool, events) = quiet_pool(&driver);
    let mut rx = events.subscribe();

    pool.query("SELECT 1", &[]).await.unwrap();
    pool.query("SELECT 1", &[]).await.unwrap();

    let events = drain(&mut rx);
    assert_eq!(names(&events), vec!["connect", "acquire", "acquire"]);
    assert!(events.iter().all(|e| e.pool() == Some("primary")));
}

// =============================================================================
// Acquisition
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_acquisition_times_out() {
    let driver = MockDriver::builder()
        .acquire_delay(Duration::from_secs(5))
        .build();
    let config = primary_config().connection_timeout(Duration::from_millis(50));
    let (pool, _events) = open_pool(&driver, config, PoolOptions::without_health_checks());

    let err = pool.query("SELECT 1", &[]).await.unwrap_err();

    assert!(matches!(err, PoolError::AcquisitionTimeout(d) if d == Duration::from_millis(50)));
    assert_eq!(driver.executed_count("SELECT 1"), 0);
    let metrics = pool.metrics();
    assert_eq!(metrics.total_queries, 1);
    assert_eq!(metrics.failed_queries, 1);
}

#[tokio::test(start_paused = true)]
async fn test_saturated_pool_waits_up_to_timeout() {
    let driver = MockDriver::builder()
        .max_connections(1)
        .query_delay(Duration::from_secs(1))
        .build();
    let config = primary_config()
        .max_connections(1)
        .min_connections(0)
        .connection_timeout(Duration::from_millis(100));
    let (pool, _events) = open_pool(&driver, config, PoolOptions::without_health_checks());
    let pool = Arc::new(pool);

    let holder = {
        let pool = Arc::clone(&pool);
        tokio::spawn(async move { pool.query("SELECT slow", &[]).await })
    };
    tokio::task::yield_now().await;
    assert_eq!(driver.checked_out(), 1);

    let err = pool.query("SELECT 1", &[]).await.unwrap_err();
    assert!(matches!(err, PoolError::AcquisitionTimeout(_)));

    holder.await.unwrap().expect("holder query should complete");
    assert_eq!(driver.checked_out(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_wait_and_query_times_are_recorded() {
    let driver = MockDriver::builder()
        .acquire_delay(Duration::from_millis(40))
        .query_delay(Duration::from_millis(10))
        .build();
    let (pool, _events) = quiet_pool(&driver);

    pool.query("SELECT 1", &[]).await.unwrap();

    let metrics = pool.metrics();
    assert!(metrics.avg_wait_time_ms >= 40.0, "wait {}", metrics.avg_wait_time_ms);
    assert!(metrics.avg_query_time_ms >= 50.0, "query {}", metrics.avg_query_time_ms);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_queries_share_bounded_connections() {
    let driver = MockDriver::builder()
        .max_connections(4)
        .query_delay(Duration::from_millis(10))
        .build();
    let config = primary_config()
        .max_connections(4)
        .connection_timeout(Duration::from_secs(5));
    let (pool, _events) = open_pool(&driver, config, PoolOptions::without_health_checks());
    let pool = Arc::new(pool);

    let handles: Vec<_> = (0..20)
        .map(|_| {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move { pool.query("SELECT 1", &[]).await })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap().expect("query should succeed");
    }

    assert_eq!(pool.metrics().total_queries, 20);
    assert_eq!(pool.metrics().successful_queries, 20);
    assert!(driver.created_connections() <= 4);
    assert_eq!(driver.checked_out(), 0);
}

// =============================================================================
// Metrics Snapshots
// =============================================================================

#[tokio::test]
async fn test_metrics_snapshot_reflects_driver_counts() {
    let driver = MockDriver::builder().build();
    let (pool, _events) = quiet_pool(&driver);
    pool.query("SELECT 1", &[]).await.unwrap();
    driver.simulate_busy(3);

    let metrics = pool.metrics();
    assert_eq!(metrics.name, "primary");
    assert_eq!(metrics.max_connections, 10);
    assert_eq!(metrics.total_connections, 4);
    assert_eq!(metrics.idle_connections, 1);
    assert_eq!(metrics.active_connections, 3);
    assert_eq!(metrics.waiting_clients, 0);
    assert!((metrics.utilization() - 0.3).abs() < 1e-9);
}

#[tokio::test]
async fn test_metrics_snapshot_is_independent() {
    let driver = MockDriver::builder().build();
    let (pool, _events) = quiet_pool(&driver);
    pool.query("SELECT 1", &[]).await.unwrap();

    let mut first = pool.metrics();
    let second = pool.metrics();
    assert_eq!(first.total_queries, second.total_queries);
    assert_eq!(first.successful_queries, second.successful_queries);
    assert_eq!(first.health, second.health);

    first.total_queries = 999;
    first.health = HealthStatus::Unhealthy;
    let third = pool.metrics();
    assert_eq!(third.total_queries, 1);
    assert_eq!(third.health, HealthStatus::Healthy);
}

#[tokio::test]
async fn test_metrics_serialize_to_json() {
    let driver = MockDriver::builder().build();
    let (pool, _events) = quiet_pool(&driver);

    let json = serde_json::to_value(pool.metrics()).unwrap();
    assert_eq!(json["name"], "primary");
    assert_eq!(json["health"], "healthy");
    assert_eq!(json["total_queries"], 0);
    assert!(json["last_health_check"].is_null());
}

// =============================================================================
// Health Checks
// =============================================================================

#[tokio::test]
async fn test_new_pool_is_healthy() {
    let driver = MockDriver::builder().build();
    let (pool, _events) = quiet_pool(&driver);

    assert!(pool.is_healthy());
    let metrics = pool.metrics();
    assert_eq!(metrics.consecutive_failures, 0);
    assert!(metrics.last_health_check.is_none());
}

#[tokio::test]
async fn test_health_check_runs_configured_query() {
    let driver = MockDriver::builder().build();
    let options = PoolOptions {
        health_check_query: Arc::from("SELECT 42"),
        ..PoolOptions::without_health_checks()
    };
    let (pool, events) = open_pool(&driver, primary_config(), options);
    let mut rx = events.subscribe();

    assert_eq!(pool.check_health().await, HealthStatus::Healthy);

    assert_eq!(driver.executed_count("SELECT 42"), 1);
    assert!(pool.metrics().last_health_check.is_some());
    assert_eq!(pool.metrics().total_queries, 0, "health checks are not queries");
    assert_eq!(
        names(&drain(&mut rx)),
        vec!["connect", "acquire", "healthCheckSuccess"]
    );
}

#[tokio::test]
async fn test_health_degrades_then_becomes_unhealthy() {
    let driver = MockDriver::builder().build();
    let (pool, events) = quiet_pool(&driver);
    let mut rx = events.subscribe();

    assert_eq!(fail_health_checks(&pool, &driver, 1).await, HealthStatus::Degraded);
    assert!(pool.is_degraded());
    assert_eq!(fail_health_checks(&pool, &driver, 1).await, HealthStatus::Degraded);
    assert_eq!(fail_health_checks(&pool, &driver, 1).await, HealthStatus::Unhealthy);
    assert!(pool.is_unhealthy());
    assert_eq!(pool.metrics().consecutive_failures, 3);

    let changes: Vec<_> = drain(&mut rx)
        .into_iter()
        .filter_map(|e| match e {
            PoolEvent::HealthChanged { from, to, .. } => Some((from, to)),
            _ => None,
        })
        .collect();
    assert_eq!(
        changes,
        vec![
            (HealthStatus::Healthy, HealthStatus::Degraded),
            (HealthStatus::Degraded, HealthStatus::Unhealthy),
        ]
    );
}

#[tokio::test]
async fn test_health_failure_events_count_failures() {
    let driver = MockDriver::builder().build();
    let (pool, events) = quiet_pool(&driver);
    let mut rx = events.subscribe();

    fail_health_checks(&pool, &driver, 2).await;

    let counts: Vec<u32> = drain(&mut rx)
        .into_iter()
        .filter_map(|e| match e {
            PoolEvent::HealthCheckFailure {
                consecutive_failures,
                ..
            } => Some(consecutive_failures),
            _ => None,
        })
        .collect();
    assert_eq!(counts, vec![1, 2]);
}

#[tokio::test]
async fn test_single_success_recovers_unhealthy_pool() {
    let driver = MockDriver::builder().build();
    let (pool, _events) = quiet_pool(&driver);

    fail_health_checks(&pool, &driver, 5).await;
    assert!(pool.is_unhealthy());

    driver.set_unreachable(false);
    assert_eq!(pool.check_health().await, HealthStatus::Healthy);
    assert_eq!(pool.metrics().consecutive_failures, 0);
    assert!(pool.metrics().last_health_check.is_some());
}

#[tokio::test]
async fn test_unhealthy_pool_still_accepts_queries() {
    let driver = MockDriver::builder().build();
    let (pool, _events) = quiet_pool(&driver);

    fail_health_checks(&pool, &driver, 3).await;
    driver.set_unreachable(false);

    assert!(pool.is_unhealthy());
    pool.query("SELECT 1", &[]).await.expect("health does not gate queries");
}

#[tokio::test(start_paused = true)]
async fn test_slow_health_check_counts_as_failure() {
    let driver = MockDriver::builder()
        .query_delay(Duration::from_secs(10))
        .build();
    let options = PoolOptions {
        health_check_timeout: Duration::from_millis(50),
        ..PoolOptions::without_health_checks()
    };
    let (pool, _events) = open_pool(&driver, primary_config(), options);

    assert_eq!(pool.check_health().await, HealthStatus::Degraded);
    assert_eq!(driver.checked_out(), 0, "timed out check must release its connection");
}

// =============================================================================
// Close
// =============================================================================

#[tokio::test]
async fn test_close_rejects_further_queries() {
    let driver = MockDriver::builder().build();
    let (pool, events) = quiet_pool(&driver);
    pool.query("SELECT 1", &[]).await.unwrap();
    let mut rx = events.subscribe();

    pool.close().await.expect("close should succeed");

    assert!(pool.is_closed());
    assert!(driver.is_closed());
    let err = pool.query("SELECT 1", &[]).await.unwrap_err();
    assert!(matches!(err, PoolError::PoolClosed { ref pool } if pool == "primary"));
    assert_eq!(names(&drain(&mut rx)), vec!["close", "error"]);
}

#[tokio::test]
async fn test_rejected_query_counts_as_failed() {
    let driver = MockDriver::builder().build();
    let (pool, _events) = quiet_pool(&driver);
    pool.query("SELECT 1", &[]).await.unwrap();
    pool.close().await.unwrap();
    let before = pool.metrics();

    tokio_test::assert_err!(pool.query("SELECT 1", &[]).await);

    let after = pool.metrics();
    assert_eq!(before.total_queries, 1);
    assert_eq!(after.total_queries, 2);
    assert_eq!(after.failed_queries, 1);
    assert_eq!(after.successful_queries, 1);
    assert_eq!(driver.executed_count("SELECT 1"), 1, "closed pool never reaches the driver");
}

#[tokio::test]
async fn test_close_is_idempotent() {
    let driver = MockDriver::builder().build();
    let (pool, events) = quiet_pool(&driver);
    let mut rx = events.subscribe();

    pool.close().await.unwrap();
    pool.close().await.unwrap();

    assert_eq!(names(&drain(&mut rx)), vec!["close"]);
}

#[tokio::test]
async fn test_close_surfaces_driver_error() {
    let driver = MockDriver::builder().build();
    driver.fail_close(DriverError::Connection("socket already closed".into()));
    let (pool, _events) = quiet_pool(&driver);

    let err = pool.close().await.unwrap_err();

    assert_eq!(
        err.driver_error(),
        Some(&DriverError::Connection("socket already closed".into()))
    );
    assert!(pool.is_closed());
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_close_waits_for_first() {
    let driver = MockDriver::builder().build();
    driver.set_close_delay(Duration::from_secs(1));
    let (pool, events) = quiet_pool(&driver);
    let pool = Arc::new(pool);
    let mut rx = events.subscribe();

    let first = {
        let pool = pool.clone();
        tokio::spawn(async move { pool.close().await })
    };
    tokio::task::yield_now().await;
    assert!(pool.is_closed());
    assert!(!driver.is_closed(), "first close is still in the driver");

    pool.close().await.unwrap();
    assert!(driver.is_closed());

    first.await.unwrap().unwrap();
    assert_eq!(names(&drain(&mut rx)), vec!["close"]);
}

#[tokio::test(start_paused = true)]
async fn test_health_check_overlapping_close_is_not_recorded() {
    let driver = MockDriver::builder()
        .query_delay(Duration::from_secs(10))
        .build();
    let options = PoolOptions {
        health_check_timeout: Duration::from_secs(1),
        ..PoolOptions::without_health_checks()
    };
    let (pool, _events) = open_pool(&driver, primary_config(), options);
    let pool = Arc::new(pool);

    let check = {
        let pool = pool.clone();
        tokio::spawn(async move { pool.check_health().await })
    };
    tokio::task::yield_now().await;
    assert_eq!(driver.checked_out(), 1, "check is waiting on the statement");

    pool.close().await.unwrap();

    assert_eq!(check.await.unwrap(), HealthStatus::Healthy);
    assert_eq!(pool.health(), HealthStatus::Healthy);
    assert_eq!(pool.metrics().consecutive_failures, 0);
}

#[tokio::test]
async fn test_check_health_on_closed_pool_keeps_status() {
    let driver = MockDriver::builder().build();
    let (pool, _events) = quiet_pool(&driver);
    fail_health_checks(&pool, &driver, 1).await;
    pool.close().await.unwrap();

    assert_eq!(pool.check_health().await, HealthStatus::Degraded);
    assert_eq!(pool.metrics().consecutive_failures, 1);
}
