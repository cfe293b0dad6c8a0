//! Mock driver factory.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use adaptive_pool::config::PoolConfig;
use adaptive_pool::driver::{Driver, DriverFactory};
use adaptive_pool::error::DriverError;
use async_trait::async_trait;
use parking_lot::Mutex;

use crate::mock_driver::MockDriver;

/// Hands out [`MockDriver`]s by pool name.
///
/// Drivers registered with [`with_driver`](Self::with_driver) are returned
/// for their name; any other name gets a fresh driver sized from the pool
/// configuration. Every driver handed out stays reachable through
/// [`driver`](Self::driver).
#[derive(Debug, Default)]
pub struct MockDriverFactory {
    drivers: Mutex<HashMap<String, MockDriver>>,
    failing: Mutex<HashSet<String>>,
    opened: Mutex<Vec<(String, PoolConfig)>>,
}

impl MockDriverFactory {
    /// Create an empty factory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the driver returned for `name`.
    pub fn with_driver(self, name: impl Into<String>, driver: MockDriver) -> Self {
        self.drivers.lock().insert(name.into(), driver);
        self
    }

    /// Make opening `name` fail with a connection error.
    pub fn fail_open(self, name: impl Into<String>) -> Self {
        self.failing.lock().insert(name.into());
        self
    }

    /// Driver handed out (or registered) for `name`.
    pub fn driver(&self, name: &str) -> Option<MockDriver> {
        self.drivers.lock().get(name).cloned()
    }

    /// Names and configurations passed to [`DriverFactory::open`], in order.
    pub fn opened(&self) -> Vec<(String, PoolConfig)> {
        self.opened.lock().clone()
    }
}

#[async_trait]
impl DriverFactory for MockDriverFactory {
    async fn open(&self, name: &str, config: &PoolConfig) -> Result<Arc<dyn Driver>, DriverError> {
        self.opened.lock().push((name.to_owned(), config.clone()));

        if self.failing.lock().contains(name) {
            return Err(DriverError::Connection(format!(
                "cannot open pool for {}",
                config.connection_string
            )));
        }

        let driver = self
            .drivers
            .lock()
            .entry(name.to_owned())
            .or_insert_with(|| {
                MockDriver::builder()
                    .max_connections(config.max_connections)
                    .build()
            })
            .clone();
        Ok(Arc::new(driver))
    }
}
