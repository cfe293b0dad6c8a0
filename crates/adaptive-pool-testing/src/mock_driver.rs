//! In-memory mock driver for unit testing.
//!
//! [`MockDriver`] implements the [`Driver`] seam without a database. It
//! keeps real connection accounting (open, idle, checked out, waiting)
//! bounded by `max_connections`, answers statements from a response table,
//! and exposes switches for simulating outages and slowness.
//!
//! ## Example
//!
//! ```rust,ignore
//! use adaptive_pool_testing::{MockDriver, MockResponse};
//!
//! let driver = MockDriver::builder()
//!     .max_connections(4)
//!     .with_response("SELECT name FROM users", MockResponse::scalar_string("alice"))
//!     .build();
//!
//! // Simulate the endpoint going away.
//! driver.set_unreachable(true);
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use adaptive_pool::driver::{Acquired, Connection, Driver, DriverStatus};
use adaptive_pool::error::DriverError;
use adaptive_pool::value::{QueryResult, Row, SqlValue};
use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Mock response configuration.
#[derive(Clone)]
pub enum MockResponse {
    /// Return rows.
    Rows(Vec<Row>),

    /// Return rows affected count (for INSERT/UPDATE/DELETE).
    RowsAffected(u64),

    /// Fail with the given driver error.
    Error(DriverError),

    /// Compute the response from the statement and its parameters.
    Custom(Arc<dyn Fn(&str, &[SqlValue]) -> MockResponse + Send + Sync>),
}

impl fmt::Debug for MockResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rows(rows) => f.debug_tuple("Rows").field(&rows.len()).finish(),
            Self::RowsAffected(n) => f.debug_tuple("RowsAffected").field(n).finish(),
            Self::Error(e) => f.debug_tuple("Error").field(e).finish(),
            Self::Custom(_) => f.debug_tuple("Custom").field(&"<fn>").finish(),
        }
    }
}

impl MockResponse {
    /// Create a scalar integer response.
    pub fn scalar_int(value: i32) -> Self {
        Self::Rows(vec![vec![SqlValue::Int(value)]])
    }

    /// Create a scalar string response.
    pub fn scalar_string(value: impl Into<String>) -> Self {
        Self::Rows(vec![vec![SqlValue::String(value.into())]])
    }

    /// Create an empty result.
    pub fn empty() -> Self {
        Self::Rows(Vec::new())
    }

    /// Create a rows-affected response.
    pub fn affected(count: u64) -> Self {
        Self::RowsAffected(count)
    }

    /// Create a statement error response.
    pub fn query_error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Error(DriverError::Query {
            code: code.into(),
            message: message.into(),
        })
    }

    /// Create a connection error response.
    pub fn connection_error(message: impl Into<String>) -> Self {
        Self::Error(DriverError::Connection(message.into()))
    }

    fn resolve(&self, sql: &str, params: &[SqlValue]) -> Result<QueryResult, DriverError> {
        match self {
            Self::Rows(rows) => Ok(QueryResult::from_rows(rows.clone())),
            Self::RowsAffected(n) => Ok(QueryResult::affected(*n)),
            Self::Error(e) => Err(e.clone()),
            Self::Custom(handler) => handler(sql, params).resolve(sql, params),
        }
    }
}

/// Mock driver configuration.
#[derive(Debug, Clone)]
pub struct MockDriverConfig {
    /// Maximum concurrently open connections.
    pub max_connections: u32,
    /// Responses keyed by exact statement text.
    pub responses: HashMap<String, MockResponse>,
    /// Response for statements not in `responses`.
    pub default_response: MockResponse,
    /// Delay before every checkout.
    pub acquire_delay: Duration,
    /// Delay before every statement completes.
    pub query_delay: Duration,
}

impl Default for MockDriverConfig {
    fn default() -> Self {
        Self {
            max_connections: 10,
            responses: HashMap::new(),
            default_response: MockResponse::scalar_int(1),
            acquire_delay: Duration::ZERO,
            query_delay: Duration::ZERO,
        }
    }
}

/// Builder for [`MockDriver`].
#[derive(Debug, Default)]
pub struct MockDriverBuilder {
    config: MockDriverConfig,
}

impl MockDriverBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the connection limit.
    pub fn max_connections(mut self, count: u32) -> Self {
        self.config.max_connections = count;
        self
    }

    /// Add a response for a specific statement.
    pub fn with_response(mut self, sql: impl Into<String>, response: MockResponse) -> Self {
        self.config.responses.insert(sql.into(), response);
        self
    }

    /// Set the response for unmatched statements.
    pub fn with_default_response(mut self, response: MockResponse) -> Self {
        self.config.default_response = response;
        self
    }

    /// Delay every checkout.
    pub fn acquire_delay(mut self, delay: Duration) -> Self {
        self.config.acquire_delay = delay;
        self
    }

    /// Delay every statement.
    pub fn query_delay(mut self, delay: Duration) -> Self {
        self.config.query_delay = delay;
        self
    }

    /// Build the driver.
    pub fn build(self) -> MockDriver {
        MockDriver::new(self.config)
    }
}

/// A mock physical pool.
///
/// Clones share state, so a test can keep a handle while the pool under
/// test owns another.
#[derive(Clone)]
pub struct MockDriver {
    state: Arc<MockState>,
}

struct MockState {
    permits: Arc<Semaphore>,
    max_connections: u32,
    responses: Mutex<HashMap<String, MockResponse>>,
    default_response: Mutex<MockResponse>,
    acquire_delay: Mutex<Duration>,
    query_delay: Mutex<Duration>,
    close_delay: Mutex<Duration>,
    counts: Mutex<Counts>,
    unreachable: AtomicBool,
    closed: AtomicBool,
    executed: Mutex<Vec<String>>,
    close_error: Mutex<Option<DriverError>>,
    acquisitions: AtomicU64,
    created: AtomicU64,
    discarded: AtomicU64,
}

#[derive(Debug, Default, Clone, Copy)]
struct Counts {
    open: u32,
    idle: u32,
    waiting: u32,
    simulated_busy: u32,
}

impl MockDriver {
    /// Create a new builder for the mock driver.
    pub fn builder() -> MockDriverBuilder {
        MockDriverBuilder::new()
    }

    /// Create a driver from a configuration.
    pub fn new(config: MockDriverConfig) -> Self {
        let max_connections = config.max_connections.max(1);
        Self {
            state: Arc::new(MockState {
                permits: Arc::new(Semaphore::new(max_connections as usize)),
                max_connections,
                responses: Mutex::new(config.responses),
                default_response: Mutex::new(config.default_response),
                acquire_delay: Mutex::new(config.acquire_delay),
                query_delay: Mutex::new(config.query_delay),
                close_delay: Mutex::new(Duration::ZERO),
                counts: Mutex::new(Counts::default()),
                unreachable: AtomicBool::new(false),
                closed: AtomicBool::new(false),
                executed: Mutex::new(Vec::new()),
                close_error: Mutex::new(None),
                acquisitions: AtomicU64::new(0),
                created: AtomicU64::new(0),
                discarded: AtomicU64::new(0),
            }),
        }
    }

    /// Make checkouts and statements fail with a connection error.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.state.unreachable.store(unreachable, Ordering::SeqCst);
    }

    /// Replace the response for a statement.
    pub fn set_response(&self, sql: impl Into<String>, response: MockResponse) {
        self.state.responses.lock().insert(sql.into(), response);
    }

    /// Replace the response for unmatched statements.
    pub fn set_default_response(&self, response: MockResponse) {
        *self.state.default_response.lock() = response;
    }

    /// Change the checkout delay.
    pub fn set_acquire_delay(&self, delay: Duration) {
        *self.state.acquire_delay.lock() = delay;
    }

    /// Change the statement delay.
    pub fn set_query_delay(&self, delay: Duration) {
        *self.state.query_delay.lock() = delay;
    }

    /// Make [`Driver::close`] take `delay` before it shuts anything down.
    pub fn set_close_delay(&self, delay: Duration) {
        *self.state.close_delay.lock() = delay;
    }

    /// Make [`Driver::close`] fail with `error` after closing.
    pub fn fail_close(&self, error: DriverError) {
        *self.state.close_error.lock() = Some(error);
    }

    /// Report `count` extra checked-out connections in [`Driver::status`],
    /// as if other clients were using the database.
    pub fn simulate_busy(&self, count: u32) {
        self.state.counts.lock().simulated_busy = count;
    }

    /// Connections currently checked out through this driver.
    pub fn checked_out(&self) -> u32 {
        let counts = *self.state.counts.lock();
        counts.open - counts.idle
    }

    /// Physical connections currently open.
    pub fn open_connections(&self) -> u32 {
        self.state.counts.lock().open
    }

    /// Successful checkouts so far.
    pub fn acquisitions(&self) -> u64 {
        self.state.acquisitions.load(Ordering::SeqCst)
    }

    /// Physical connections created so far.
    pub fn created_connections(&self) -> u64 {
        self.state.created.load(Ordering::SeqCst)
    }

    /// Connections destroyed on release so far.
    pub fn discarded_connections(&self) -> u64 {
        self.state.discarded.load(Ordering::SeqCst)
    }

    /// Statements executed so far, in order.
    pub fn executed(&self) -> Vec<String> {
        self.state.executed.lock().clone()
    }

    /// Number of executed statements matching `sql` exactly.
    pub fn executed_count(&self, sql: &str) -> usize {
        self.state
            .executed
            .lock()
            .iter()
            .filter(|s| s.as_str() == sql)
            .count()
    }

    /// Whether [`Driver::close`] has been called.
    pub fn is_closed(&self) -> bool {
        self.state.closed.load(Ordering::SeqCst)
    }

    /// Configured connection limit.
    pub fn max_connections(&self) -> u32 {
        self.state.max_connections
    }
}

impl fmt::Debug for MockDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockDriver")
            .field("max_connections", &self.state.max_connections)
            .field("counts", &*self.state.counts.lock())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

/// Decrements the waiting counter even if the checkout is cancelled.
struct WaitingGuard<'a>(&'a MockState);

impl<'a> WaitingGuard<'a> {
    fn enter(state: &'a MockState) -> Self {
        state.counts.lock().waiting += 1;
        Self(state)
    }
}

impl Drop for WaitingGuard<'_> {
    fn drop(&mut self) {
        let mut counts = self.0.counts.lock();
        counts.waiting = counts.waiting.saturating_sub(1);
    }
}

#[async_trait]
impl Driver for MockDriver {
    async fn acquire(&self) -> Result<Acquired, DriverError> {
        let state = &self.state;
        if state.closed.load(Ordering::SeqCst) {
            return Err(DriverError::Closed);
        }

        let delay = *state.acquire_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if state.unreachable.load(Ordering::SeqCst) {
            return Err(DriverError::Connection("connection refused".into()));
        }

        let permit = {
            let _waiting = WaitingGuard::enter(state);
            state
                .permits
                .clone()
                .acquire_owned()
                .await
                .map_err(|_| DriverError::Closed)?
        };

        let created = {
            let mut counts = state.counts.lock();
            if counts.idle > 0 {
                counts.idle -= 1;
                false
            } else {
                counts.open += 1;
                true
            }
        };
        state.acquisitions.fetch_add(1, Ordering::SeqCst);
        if created {
            state.created.fetch_add(1, Ordering::SeqCst);
        }
        tracing::trace!(created, "mock connection checked out");

        let connection = Box::new(MockConnection {
            state: self.state.clone(),
            _permit: permit,
        });
        Ok(if created {
            Acquired::created(connection)
        } else {
            Acquired::reused(connection)
        })
    }

    fn status(&self) -> DriverStatus {
        let counts = *self.state.counts.lock();
        DriverStatus {
            total: counts.open + counts.simulated_busy,
            idle: counts.idle,
            waiting: counts.waiting,
        }
    }

    async fn close(&self) -> Result<(), DriverError> {
        let delay = *self.state.close_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.state.closed.store(true, Ordering::SeqCst);
        self.state.permits.close();
        {
            let mut counts = self.state.counts.lock();
            counts.open -= counts.idle;
            counts.idle = 0;
        }
        match self.state.close_error.lock().take() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// A connection handed out by [`MockDriver`].
struct MockConnection {
    state: Arc<MockState>,
    _permit: OwnedSemaphorePermit,
}

#[async_trait]
impl Connection for MockConnection {
    async fn query(&mut self, sql: &str, params: &[SqlValue]) -> Result<QueryResult, DriverError> {
        self.state.executed.lock().push(sql.to_owned());

        let delay = *self.state.query_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.state.unreachable.load(Ordering::SeqCst) {
            return Err(DriverError::Connection("connection reset by peer".into()));
        }

        let response = self
            .state
            .responses
            .lock()
            .get(sql)
            .cloned()
            .unwrap_or_else(|| self.state.default_response.lock().clone());
        response.resolve(sql, params)
    }

    fn release(self: Box<Self>, discard: bool) {
        let mut counts = self.state.counts.lock();
        if discard || self.state.closed.load(Ordering::SeqCst) {
            counts.open -= 1;
            self.state.discarded.fetch_add(u64::from(discard), Ordering::SeqCst);
        } else {
            counts.idle += 1;
        }
    }
}
