//! Read-replica routing walkthrough on mock drivers.
//!
//! Starts a manager with a primary and a replica, shows where reads and
//! writes land under load, takes the replica down until its health checks
//! mark it unhealthy, and prints the resulting metrics snapshot.
//!
//! # Running
//!
//! ```bash
//! cargo run -p adaptive-pool-testing --example read_replica
//! ```

// Allow common patterns in example code
#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::time::Duration;

use adaptive_pool::{HealthStatus, ManagerConfig, PoolEvent, PoolManager, ReadPreference};
use adaptive_pool_testing::fixtures::{primary_config, replica_config};
use adaptive_pool_testing::{MockDriver, MockDriverFactory};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    let primary = MockDriver::builder().max_connections(10).build();
    let replica = MockDriver::builder().max_connections(10).build();
    let factory = MockDriverFactory::new()
        .with_driver("primary", primary.clone())
        .with_driver("replica", replica.clone());

    let config = ManagerConfig::new(primary_config())
        .replica(replica_config())
        .read_preference("auto".parse::<ReadPreference>()?)
        .health_check_interval(Duration::from_millis(200))
        .health_check_timeout(Duration::from_millis(100))
        .max_health_check_failures(3)
        .metrics_interval(Duration::from_secs(1));

    let manager = PoolManager::new(config, &factory).await?;
    let mut events = manager.subscribe();
    let watcher = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            if let PoolEvent::HealthChanged { pool, from, to } = event {
                println!("  [event] {pool}: {from} -> {to}");
            }
        }
    });

    println!("=== Idle pools: reads stay on the primary ===");
    manager.query_read("SELECT 1", &[]).await?;
    println!("  read routed to {}", manager.select_pool(true));

    println!("\n=== Primary under load: reads move to the replica ===");
    primary.simulate_busy(6);
    replica.simulate_busy(1);
    manager.query_read("SELECT count(*) FROM orders", &[]).await?;
    println!("  read routed to {}", manager.select_pool(true));
    manager
        .query_write("INSERT INTO orders (id) VALUES (1)", &[])
        .await?;
    println!("  write routed to {}", manager.select_pool(false));

    println!("\n=== Replica outage ===");
    replica.set_unreachable(true);
    while manager.replica().map(|r| r.health()) != Some(HealthStatus::Unhealthy) {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    println!("  manager health: {}", manager.health_status());
    println!("  read routed to {}", manager.select_pool(true));

    println!("\n=== Replica back ===");
    replica.set_unreachable(false);
    while manager.replica().map(|r| r.health()) != Some(HealthStatus::Healthy) {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    println!("  manager health: {}", manager.health_status());

    println!("\n=== Metrics ===");
    let metrics = manager.all_metrics();
    println!("{}", serde_json::to_string_pretty(&metrics)?);

    manager.close().await?;
    watcher.abort();
    Ok(())
}
