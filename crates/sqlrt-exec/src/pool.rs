//! Connection-acquisition layer backing the resilient execution strategy
//! (C12, spec §4.12, §5). Grounded on the teacher's
//! `zqlz-connection::pool::{pool, stats, config}`, adapted so the pool
//! itself implements `sqlrt_core::ConnectionPool` (which hands back a bare
//! `Arc<dyn Connection>`, not a guard type) by wrapping every checked-out
//! connection in a small delegating [`PooledConnection`] that returns
//! itself to the idle queue on `Drop`.

use async_trait::async_trait;
use sqlrt_core::{Connection, ConnectionPool, Error, QueryResult, Result, StatementResult, Value};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Creates and validates the raw connections a [`Pool`] hands out.
#[async_trait]
pub trait ConnectionFactory: Send + Sync {
    async fn create(&self) -> Result<Arc<dyn Connection>>;

    /// Whether an idle connection is still fit to hand out. Defaults to
    /// "not closed"; a factory can add a cheap ping.
    async fn validate(&self, connection: &Arc<dyn Connection>) -> bool {
        !connection.is_closed()
    }
}

#[async_trait]
impl<T: ConnectionFactory + ?Sized> ConnectionFactory for Arc<T> {
    async fn create(&self) -> Result<Arc<dyn Connection>> {
        (**self).create().await
    }

    async fn validate(&self, connection: &Arc<dyn Connection>) -> bool {
        (**self).validate(connection).await
    }
}

/// Pool sizing and lifetime configuration (spec §B.4's config-struct rule).
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct PoolConfig {
    min_size: usize,
    max_size: usize,
    acquire_timeout_ms: u64,
    idle_timeout_ms: u64,
    max_lifetime_ms: u64,
}

impl PoolConfig {
    pub fn new(min_size: usize, max_size: usize) -> Self {
        assert!(max_size > 0, "pool max_size must be greater than zero");
        assert!(min_size <= max_size, "pool min_size must not exceed max_size");
        Self {
            min_size,
            max_size,
            acquire_timeout_ms: 30_000,
            idle_timeout_ms: 10 * 60_000,
            max_lifetime_ms: 30 * 60_000,
        }
    }

    pub fn with_acquire_timeout_ms(mut self, ms: u64) -> Self {
        self.acquire_timeout_ms = ms;
        self
    }

    pub fn with_idle_timeout_ms(mut self, ms: u64) -> Self {
        self.idle_timeout_ms = ms;
        self
    }

    pub fn with_max_lifetime_ms(mut self, ms: u64) -> Self {
        self.max_lifetime_ms = ms;
        self
    }

    pub fn min_size(&self) -> usize {
        self.min_size
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    pub fn max_lifetime(&self) -> Duration {
        Duration::from_millis(self.max_lifetime_ms)
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self::new(1, 10)
    }
}

/// Point-in-time pool occupancy (spec §B.6, grounded in
/// `zqlz-connection::pool::stats`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct PoolStats {
    pub total: usize,
    pub idle: usize,
    pub active: usize,
    pub waiting: usize,
}

impl PoolStats {
    pub fn new(total: usize, idle: usize, active: usize, waiting: usize) -> Self {
        Self { total, idle, active, waiting }
    }

    pub fn utilization(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.active as f64 / self.total as f64
        }
    }

    pub fn is_full(&self) -> bool {
        self.idle == 0 && self.waiting > 0
    }
}

impl Default for PoolStats {
    fn default() -> Self {
        Self::new(0, 0, 0, 0)
    }
}

struct IdleConnection {
    connection: Arc<dyn Connection>,
    created_at: Instant,
    last_used_at: Instant,
}

struct PoolInner {
    factory: Arc<dyn ConnectionFactory>,
    config: PoolConfig,
    idle: parking_lot::Mutex<VecDeque<IdleConnection>>,
    semaphore: Arc<Semaphore>,
    active_count: AtomicUsize,
    waiting_count: AtomicUsize,
}

/// A semaphore-gated, idle-queue-backed connection pool implementing
/// `sqlrt_core::ConnectionPool`.
pub struct Pool {
    inner: Arc<PoolInner>,
}

impl Pool {
    pub fn new(config: PoolConfig, factory: Arc<dyn ConnectionFactory>) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.max_size()));
        Self {
            inner: Arc::new(PoolInner {
                factory,
                config,
                idle: parking_lot::Mutex::new(VecDeque::new()),
                semaphore,
                active_count: AtomicUsize::new(0),
                waiting_count: AtomicUsize::new(0),
            }),
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    pub fn stats(&self) -> PoolStats {
        let idle = self.inner.idle.lock().len();
        let active = self.inner.active_count.load(Ordering::SeqCst);
        let waiting = self.inner.waiting_count.load(Ordering::SeqCst);
        PoolStats::new(idle + active, idle, active, waiting)
    }

    /// Closes and drops every currently idle connection. Does not touch
    /// connections on loan.
    pub async fn close_idle(&self) {
        let drained: Vec<IdleConnection> = {
            let mut idle = self.inner.idle.lock();
            idle.drain(..).collect()
        };
        for entry in drained {
            let _ = entry.connection.close().await;
        }
    }

    async fn take_idle(&self) -> Option<(Arc<dyn Connection>, Instant)> {
        loop {
            let candidate = self.inner.idle.lock().pop_front()?;
            let now = Instant::now();
            let expired = now.duration_since(candidate.created_at) > self.inner.config.max_lifetime()
                || now.duration_since(candidate.last_used_at) > self.inner.config.idle_timeout();
            if expired {
                tracing::debug!("pooled connection expired, closing and retrying idle queue");
                let _ = candidate.connection.close().await;
                continue;
            }
            if !self.inner.factory.validate(&candidate.connection).await {
                tracing::debug!("pooled connection failed validation, closing and retrying idle queue");
                let _ = candidate.connection.close().await;
                continue;
            }
            return Some((candidate.connection, candidate.created_at));
        }
    }
}

#[async_trait]
impl ConnectionPool for Pool {
    #[tracing::instrument(skip(self))]
    async fn acquire(&self, timeout: Duration) -> Result<Arc<dyn Connection>> {
        self.inner.waiting_count.fetch_add(1, Ordering::SeqCst);
        let permit_result =
            tokio::time::timeout(timeout, self.inner.semaphore.clone().acquire_owned()).await;
        self.inner.waiting_count.fetch_sub(1, Ordering::SeqCst);

        let permit = permit_result
            .map_err(|_| Error::Transient {
                message: "timed out acquiring a pooled connection".to_string(),
                sql_error_number: None,
            })?
            .map_err(|_| Error::Internal("connection pool semaphore closed".to_string()))?;

        let (connection, created_at) = match self.take_idle().await {
            Some((conn, created_at)) => (conn, created_at),
            None => {
                tracing::debug!("idle queue empty, creating a new connection");
                (self.inner.factory.create().await?, Instant::now())
            }
        };
        self.inner.active_count.fetch_add(1, Ordering::SeqCst);

        Ok(Arc::new(PooledConnection {
            inner: connection,
            pool: self.inner.clone(),
            created_at,
            explicitly_closed: AtomicBool::new(false),
            _permit: permit,
        }) as Arc<dyn Connection>)
    }
}

/// Wraps a checked-out connection; returns it to the pool's idle queue on
/// `Drop` unless it was explicitly closed or is already closed.
struct PooledConnection {
    inner: Arc<dyn Connection>,
    pool: Arc<PoolInner>,
    created_at: Instant,
    explicitly_closed: AtomicBool,
    _permit: OwnedSemaphorePermit,
}

#[async_trait]
impl Connection for PooledConnection {
    fn driver_name(&self) -> &str {
        self.inner.driver_name()
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> Result<StatementResult> {
        self.inner.execute(sql, params).await
    }

    async fn query(&self, sql: &str, params: &[Value]) -> Result<QueryResult> {
        self.inner.query(sql, params).await
    }

    async fn set_deadlock_priority_high(&self) -> Result<()> {
        self.inner.set_deadlock_priority_high().await
    }

    async fn close(&self) -> Result<()> {
        self.explicitly_closed.store(true, Ordering::SeqCst);
        self.inner.close().await
    }

    fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        self.pool.active_count.fetch_sub(1, Ordering::SeqCst);
        if !self.explicitly_closed.load(Ordering::SeqCst) && !self.inner.is_closed() {
            self.pool.idle.lock().push_back(IdleConnection {
                connection: self.inner.clone(),
                created_at: self.created_at,
                last_used_at: Instant::now(),
            });
        }
    }
}
