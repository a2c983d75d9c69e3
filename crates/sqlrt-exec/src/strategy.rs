//! Execution strategy (C12, spec §4.12): **Resilient** acquires a pooled
//! connection, runs the operation under the shared resilience pipeline, and
//! self-heals exactly once on a schema-drift SQL error (201/207/208/8144)
//! by invalidating and refetching the stored procedure's schema via C8
//! before retrying outside the pipeline. **Transactional** runs the
//! operation once against a caller-supplied connection with no retry,
//! breaker, or self-heal — the caller owns the transaction.

use sqlrt_core::{Connection, ConnectionPool, Error, InstanceId, Result};
use sqlrt_resilience::{AttemptInfo, ResiliencePipeline};
use sqlrt_schema::SchemaService;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub struct ResilientStrategy {
    pool: Arc<dyn ConnectionPool>,
    pipeline: Arc<ResiliencePipeline>,
    schema_service: Option<Arc<SchemaService>>,
    acquire_timeout: Duration,
}

impl ResilientStrategy {
    pub fn new(
        pool: Arc<dyn ConnectionPool>,
        pipeline: Arc<ResiliencePipeline>,
        schema_service: Option<Arc<SchemaService>>,
        acquire_timeout: Duration,
    ) -> Self {
        Self { pool, pipeline, schema_service, acquire_timeout }
    }

    /// Runs `operation` against a freshly acquired connection. `operation`
    /// is handed the connection and per-attempt info (so it can react to a
    /// requested deadlock-priority elevation) and may be invoked more than
    /// once by the pipeline's retry, plus once more outside it on a
    /// self-heal. `self_heal_sp_name`, when set, names the stored
    /// procedure whose schema should be invalidated and refetched on a
    /// schema-drift error before the single outside-pipeline retry.
    #[tracing::instrument(skip(self, operation), fields(instance = %instance))]
    pub async fn execute<F, Fut, T>(
        &self,
        instance: &InstanceId,
        self_heal_sp_name: Option<&str>,
        cancellation: &CancellationToken,
        command_timeout: Option<Duration>,
        mut operation: F,
    ) -> Result<T>
    where
        F: FnMut(Arc<dyn Connection>, AttemptInfo) -> Fut + Send,
        Fut: Future<Output = Result<T>> + Send,
        T: Send,
    {
        let connection = self.pool.acquire(self.acquire_timeout).await?;

        let result = self
            .pipeline
            .execute(cancellation, command_timeout, |info| {
                let connection = connection.clone();
                let op_fut = operation(connection.clone(), info);
                async move {
                    if info.elevate_deadlock_priority {
                        let _ = connection.set_deadlock_priority_high().await;
                    }
                    op_fut.await
                }
            })
            .await;

        match result {
            Err(Error::SchemaDrift { sql_error_number, message }) => {
                tracing::warn!(sql_error_number, "schema drift detected, self-healing and retrying once");
                if let (Some(name), Some(schema_service)) = (self_heal_sp_name, &self.schema_service) {
                    schema_service.invalidate_sp_schema(name, instance).await;
                    let _ = schema_service.get_sp_schema(name, instance).await;
                }
                let retry_info = AttemptInfo { attempt: 0, elevate_deadlock_priority: false };
                operation(connection, retry_info).await.map_err(|retry_err| {
                    tracing::warn!(error = %retry_err, original = %message, "self-heal retry also failed");
                    retry_err
                })
            }
            other => other,
        }
    }
}

/// Runs the operation exactly once, unmodified, against a caller-supplied
/// connection (spec §4.12's Transactional variant). No retry, no breaker,
/// no schema self-heal — the caller enlists every command in its own
/// transaction.
pub struct TransactionalStrategy {
    connection: Arc<dyn Connection>,
}

impl TransactionalStrategy {
    pub fn new(connection: Arc<dyn Connection>) -> Self {
        Self { connection }
    }

    pub async fn execute<F, Fut, T>(&self, mut operation: F) -> Result<T>
    where
        F: FnMut(Arc<dyn Connection>, AttemptInfo) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        operation(self.connection.clone(), AttemptInfo { attempt: 0, elevate_deadlock_priority: false }).await
    }
}

/// The execution strategy a request resolves to: fresh-connection-plus-
/// pipeline, or caller-supplied-connection-plus-transaction (spec §4.12).
pub enum Strategy {
    Resilient(ResilientStrategy),
    Transactional(TransactionalStrategy),
}

impl Strategy {
    #[allow(clippy::too_many_arguments)]
    pub async fn execute<F, Fut, T>(
        &self,
        instance: &InstanceId,
        self_heal_sp_name: Option<&str>,
        cancellation: &CancellationToken,
        command_timeout: Option<Duration>,
        operation: F,
    ) -> Result<T>
    where
        F: FnMut(Arc<dyn Connection>, AttemptInfo) -> Fut + Send,
        Fut: Future<Output = Result<T>> + Send,
        T: Send,
    {
        match self {
            Strategy::Resilient(inner) => {
                inner.execute(instance, self_heal_sp_name, cancellation, command_timeout, operation).await
            }
            Strategy::Transactional(inner) => inner.execute(operation).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use sqlrt_core::{QueryResult, StatementResult, Value};
    use sqlrt_resilience::ResiliencePipelineConfig;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FakeConnection;

    #[async_trait]
    impl Connection for FakeConnection {
        fn driver_name(&self) -> &str {
            "fake"
        }
        async fn execute(&self, _sql: &str, _params: &[Value]) -> Result<StatementResult> {
            Ok(StatementResult::default())
        }
        async fn query(&self, _sql: &str, _params: &[Value]) -> Result<QueryResult> {
            Ok(QueryResult::empty())
        }
        async fn close(&self) -> Result<()> {
            Ok(())
        }
        fn is_closed(&self) -> bool {
            false
        }
    }

    struct FakePool;

    #[async_trait]
    impl ConnectionPool for FakePool {
        async fn acquire(&self, _timeout: Duration) -> Result<Arc<dyn Connection>> {
            Ok(Arc::new(FakeConnection))
        }
    }

    #[tokio::test]
    async fn schema_drift_triggers_exactly_one_outside_pipeline_retry() {
        let strategy = ResilientStrategy::new(
            Arc::new(FakePool),
            Arc::new(ResiliencePipeline::new(ResiliencePipelineConfig::default())),
            None,
            Duration::from_secs(1),
        );
        let calls = Arc::new(AtomicU32::new(0));
        let calls2 = calls.clone();
        let result = strategy
            .execute(
                &InstanceId::from("db1"),
                None,
                &CancellationToken::new(),
                None,
                move |_conn, _info| {
                    let calls = calls2.clone();
                    async move {
                        let n = calls.fetch_add(1, Ordering::SeqCst);
                        if n == 0 {
                            Err(Error::SchemaDrift { message: "invalid column name".into(), sql_error_number: 207 })
                        } else {
                            Ok::<_, Error>(n)
                        }
                    }
                },
            )
            .await;
        assert_eq!(result.unwrap(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn transactional_strategy_runs_exactly_once() {
        let strategy = TransactionalStrategy::new(Arc::new(FakeConnection));
        let calls = Arc::new(AtomicU32::new(0));
        let calls2 = calls.clone();
        let result: Result<()> = strategy
            .execute(move |_conn, _info| {
                let calls = calls2.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(Error::Transient { message: "deadlock".into(), sql_error_number: Some(1205) })
                }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
