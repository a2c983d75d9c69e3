//! Executor (C13, spec §4.13): the single place every public operation
//! funnels through — chaos injection, schema-aware command binding,
//! C12-wrapped execution under C11's interceptor hooks, and row mapping.

use crate::batch_sizer::{AdaptiveBatchSizer, BatchSizerConfig, FlushOutcome};
use crate::binder::{bind_sp_parameters, bind_tvp_value, build_sp_command_text, NullChecking};
use crate::mapper::{map_rows, FromRow};
use crate::resumable::{resumable_query, CursorStore};
use crate::strategy::Strategy;
use async_trait::async_trait;
use futures::stream::Stream;
use serde::Serialize;
use sqlrt_core::{
    CommandType, Connection, DbRequest, Error, ExecutionOptions, InstanceId, ObjectName, QueryResult,
    Result, Row, SchemaMode, StatementResult, Value,
};
use sqlrt_accessors::{get_accessors, RowShape};
use sqlrt_resilience::{AttemptInfo, InterceptorChain, InterceptorContext};
use sqlrt_schema::SchemaService;
use sqlrt_tvp::ValidationMode;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc::Receiver;

/// Step 1 of the pipeline (spec §4.13): a hook a test harness can use to
/// inject faults ahead of a call. A no-op in production.
#[async_trait]
pub trait ChaosInjector: Send + Sync {
    async fn maybe_inject(&self, _command_text: &str) -> Result<()> {
        Ok(())
    }
}

pub struct NoopChaosInjector;

#[async_trait]
impl ChaosInjector for NoopChaosInjector {}

pub struct ExecutorConfig {
    pub interceptors: Arc<InterceptorChain>,
    pub chaos: Arc<dyn ChaosInjector>,
    pub schema_service: Option<Arc<SchemaService>>,
    pub null_checking: NullChecking,
    pub cursor_store: Arc<dyn CursorStore>,
    pub batch_sizer_config: BatchSizerConfig,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            interceptors: Arc::new(InterceptorChain::new()),
            chaos: Arc::new(NoopChaosInjector),
            schema_service: None,
            null_checking: NullChecking::Strict,
            cursor_store: Arc::new(crate::resumable::InMemoryCursorStore::new()),
            batch_sizer_config: BatchSizerConfig::default(),
        }
    }
}

/// Caller-supplied named-parameter bag; every public operation in this
/// module takes its parameters in this form so the binder (C3) has a
/// single, uniform input shape.
pub type Parameters = Vec<(String, Value)>;

enum Outcome {
    Statement(StatementResult),
    Query(QueryResult),
}

pub struct Executor {
    strategy: Strategy,
    config: ExecutorConfig,
}

impl Executor {
    pub fn new(strategy: Strategy, config: ExecutorConfig) -> Self {
        Self { strategy, config }
    }

    async fn resolve_command(
        &self,
        request: &DbRequest<Parameters>,
        options: &ExecutionOptions,
    ) -> Result<(String, Vec<Value>)> {
        match request.command_type {
            CommandType::StoredProcedure => {
                let object = ObjectName::normalise(&request.command_text);
                let parameters = match (options.schema_mode, &self.config.schema_service) {
                    (SchemaMode::None, _) | (_, None) => Vec::new(),
                    (_, Some(service)) => {
                        let schema = service.get_sp_schema(&request.command_text, &request.instance_id).await?;
                        schema.parameters.clone()
                    }
                };
                let bound = bind_sp_parameters(&parameters, &request.parameters, self.config.null_checking)?;
                Ok(build_sp_command_text(&object, &bound))
            }
            CommandType::Text | CommandType::TableDirect => {
                let values = request.parameters.iter().map(|(_, v)| v.clone()).collect();
                Ok((request.command_text.clone(), values))
            }
        }
    }

    fn self_heal_name(request: &DbRequest<Parameters>) -> Option<String> {
        matches!(request.command_type, CommandType::StoredProcedure).then(|| request.command_text.clone())
    }

    /// Runs the full five-step pipeline for one request, dispatching to
    /// `connection.execute` or `connection.query` depending on `as_query`.
    async fn dispatch(
        &self,
        request: DbRequest<Parameters>,
        options: ExecutionOptions,
        as_query: bool,
    ) -> Result<Outcome> {
        self.config.chaos.maybe_inject(&request.command_text).await?;

        let mut ctx = InterceptorContext::new(request.instance_id.clone(), request.cancellation.clone());
        self.config.interceptors.fire_executing(&request.command_text, &mut ctx).await;

        if ctx.suppress_execution() {
            let mock = ctx.mock_result().cloned();
            self.config
                .interceptors
                .fire_executed(&request.command_text, 0, mock.as_ref())
                .await;
            return Ok(match (as_query, mock) {
                (true, Some(value)) => Outcome::Query(QueryResult {
                    columns: vec![Default::default()],
                    rows: vec![Row::new(Arc::new(vec!["mock".to_string()]), vec![value])],
                }),
                (true, None) => Outcome::Query(QueryResult::empty()),
                (false, Some(value)) => Outcome::Statement(StatementResult { rows_affected: 0, scalar: Some(value) }),
                (false, None) => Outcome::Statement(StatementResult::default()),
            });
        }

        let self_heal_name = Self::self_heal_name(&request);
        let (command_text, values) = self.resolve_command(&request, &options).await?;

        let start = Instant::now();
        let cancellation = request.cancellation.clone();
        let command_timeout = options.command_timeout;
        let instance = request.instance_id.clone();

        let result: Result<Outcome> = self
            .strategy
            .execute(
                &instance,
                self_heal_name.as_deref(),
                &cancellation,
                command_timeout,
                |connection: Arc<dyn Connection>, _info: AttemptInfo| {
                    let command_text = command_text.clone();
                    let values = values.clone();
                    async move {
                        if as_query {
                            connection.query(&command_text, &values).await.map(Outcome::Query)
                        } else {
                            connection.execute(&command_text, &values).await.map(Outcome::Statement)
                        }
                    }
                },
            )
            .await;

        let duration_us = start.elapsed().as_micros() as u64;
        match &result {
            Ok(Outcome::Query(q)) => {
                let scalar = q.rows.first().and_then(|r| r.get(0)).cloned();
                self.config.interceptors.fire_executed(&command_text, duration_us, scalar.as_ref()).await;
            }
            Ok(Outcome::Statement(s)) => {
                self.config.interceptors.fire_executed(&command_text, duration_us, s.scalar.as_ref()).await;
            }
            Err(error) => {
                self.config.interceptors.fire_failed(&command_text, duration_us, error).await;
            }
        }
        result
    }

    pub async fn query<R: FromRow>(
        &self,
        request: DbRequest<Parameters>,
        options: ExecutionOptions,
    ) -> Result<Vec<R>> {
        match self.dispatch(request, options, true).await? {
            Outcome::Query(q) => map_rows(&q.rows),
            Outcome::Statement(_) => Err(Error::Internal("expected a query result, got a statement result".into())),
        }
    }

    pub async fn query_single<R: FromRow>(
        &self,
        request: DbRequest<Parameters>,
        options: ExecutionOptions,
    ) -> Result<Option<R>> {
        let rows = self.query::<R>(request, options).await?;
        Ok(rows.into_iter().next())
    }

    pub async fn execute_scalar<S: FromRow>(
        &self,
        request: DbRequest<Parameters>,
        options: ExecutionOptions,
    ) -> Result<Option<S>> {
        match self.dispatch(request, options, true).await? {
            Outcome::Query(q) => match q.rows.first() {
                Some(row) => S::from_row(row).map(Some),
                None => Ok(None),
            },
            Outcome::Statement(s) => match s.scalar {
                Some(value) => {
                    let row = Row::new(Arc::new(vec!["scalar".to_string()]), vec![value]);
                    S::from_row(&row).map(Some)
                }
                None => Ok(None),
            },
        }
    }

    pub async fn execute_non_query(&self, request: DbRequest<Parameters>, options: ExecutionOptions) -> Result<u64> {
        match self.dispatch(request, options, false).await? {
            Outcome::Statement(s) => Ok(s.rows_affected),
            Outcome::Query(q) => Ok(q.rows.len() as u64),
        }
    }

    /// `queryMultiple`: the driver surfaces one result set per call, so the
    /// reader this returns wraps that single `QueryResult` and reports
    /// exhaustion on the second `next_result` — a result-set-at-a-time
    /// cursor built on top of the core `Connection::query` shape rather
    /// than a separate driver primitive.
    pub async fn query_multiple(
        &self,
        request: DbRequest<Parameters>,
        options: ExecutionOptions,
    ) -> Result<MultiResultReader> {
        match self.dispatch(request, options, true).await? {
            Outcome::Query(q) => Ok(MultiResultReader { result: Some(q) }),
            Outcome::Statement(_) => Ok(MultiResultReader { result: None }),
        }
    }

    /// `bulkInsert<T>`: native-bulk-copy is out of reach of the
    /// `Connection` trait's `&[Value]` call shape, so this emits a
    /// multi-row `INSERT ... VALUES` built from `T`'s accessors, chunked
    /// by `batch_size`.
    pub async fn bulk_insert<T: RowShape>(
        &self,
        instance: &InstanceId,
        table: &str,
        rows: &[T],
        batch_size: usize,
    ) -> Result<u64> {
        if rows.is_empty() {
            return Ok(0);
        }
        let accessors = get_accessors::<T>()?;
        let object = ObjectName::normalise(table);
        let columns = accessors.properties();
        let mut total = 0u64;

        for chunk in rows.chunks(batch_size.max(1)) {
            let mut text = format!(
                "INSERT INTO {object} ({})",
                columns.iter().map(|c| format!("[{c}]")).collect::<Vec<_>>().join(", ")
            );
            let mut values = Vec::with_capacity(chunk.len() * columns.len());
            text.push_str(" VALUES ");
            for (row_idx, row) in chunk.iter().enumerate() {
                if row_idx > 0 {
                    text.push_str(", ");
                }
                text.push('(');
                for col_idx in 0..columns.len() {
                    if col_idx > 0 {
                        text.push_str(", ");
                    }
                    values.push(accessors.get(row, col_idx).unwrap_or(Value::Null));
                    text.push_str(&format!("@P{}", values.len()));
                }
                text.push(')');
            }

            let request = DbRequest::new(instance.clone(), text, CommandType::Text, named(&values));
            total += self.execute_non_query(request, ExecutionOptions::default()).await?;
        }
        Ok(total)
    }

    /// TVP-backed bulk insert via a stored procedure (spec §8 scenario S2):
    /// looks up `sp_name`'s schema to find `tvp_param_name`'s declared
    /// table-type, binds each chunk of `rows` into a `Value::Tvp` via
    /// [`bind_tvp_value`], and calls the procedure once per chunk, summing
    /// whatever scalar it returns (typically the row count inserted).
    /// Unlike `bulk_insert`'s `INSERT ... VALUES` text, this sends the
    /// whole chunk as a single rowset parameter.
    pub async fn bulk_insert_tvp<T: RowShape>(
        &self,
        instance: &InstanceId,
        sp_name: &str,
        tvp_param_name: &str,
        rows: &[T],
        batch_size: usize,
    ) -> Result<i64> {
        if rows.is_empty() {
            return Ok(0);
        }
        let schema_service = self
            .config
            .schema_service
            .as_ref()
            .ok_or_else(|| Error::Internal("bulk_insert_tvp requires a configured schema service".to_string()))?;

        let sp_schema = schema_service.get_sp_schema(sp_name, instance).await?;
        let param = sp_schema
            .find_parameter(tvp_param_name)
            .ok_or_else(|| Error::ParameterMissing(tvp_param_name.to_string()))?;
        let udt_type_name = param
            .udt_type_name
            .clone()
            .ok_or_else(|| Error::Internal(format!("parameter '{tvp_param_name}' is not TVP-typed")))?;
        let tvp_schema = schema_service.get_tvp_schema(&udt_type_name, instance).await?;

        let mut total = 0i64;
        for chunk in rows.chunks(batch_size.max(1)) {
            let tvp_value = bind_tvp_value(chunk, tvp_param_name, &tvp_schema, ValidationMode::Strict)?;
            let params: Parameters = vec![(tvp_param_name.to_string(), tvp_value)];
            let request = DbRequest::new(instance.clone(), sp_name, CommandType::StoredProcedure, params);
            if let Some(n) = self.execute_scalar::<i64>(request, ExecutionOptions::default()).await? {
                total += n;
            }
        }
        Ok(total)
    }

    /// `bulkUpdate<T>`/`bulkDelete<T>`: populates a session-scoped temp
    /// table via the same `INSERT ... VALUES` path, then runs one
    /// set-based `MERGE` (update) or `DELETE ... FROM ... JOIN` (delete)
    /// keyed on `key_columns` (spec §4.13's bulk-operations clause).
    pub async fn bulk_update<T: RowShape>(
        &self,
        instance: &InstanceId,
        table: &str,
        rows: &[T],
        key_columns: &[&str],
        update_columns: &[&str],
        batch_size: usize,
    ) -> Result<u64> {
        if rows.is_empty() {
            return Ok(0);
        }
        let temp_table = format!("#bulk_update_{}", ObjectName::normalise(table).cache_key().replace('.', "_"));
        self.bulk_insert(instance, &temp_table, rows, batch_size).await?;

        let object = ObjectName::normalise(table);
        let join_on = key_columns.iter().map(|k| format!("t.[{k}] = s.[{k}]")).collect::<Vec<_>>().join(" AND ");
        let set_clause = update_columns
            .iter()
            .map(|c| format!("t.[{c}] = s.[{c}]"))
            .collect::<Vec<_>>()
            .join(", ");
        let text = format!(
            "MERGE {object} AS t USING {temp_table} AS s ON {join_on} WHEN MATCHED THEN UPDATE SET {set_clause};"
        );
        let request = DbRequest::new(instance.clone(), text, CommandType::Text, Parameters::new());
        self.execute_non_query(request, ExecutionOptions::default()).await
    }

    pub async fn bulk_delete<T: RowShape>(
        &self,
        instance: &InstanceId,
        table: &str,
        rows: &[T],
        key_columns: &[&str],
        batch_size: usize,
    ) -> Result<u64> {
        if rows.is_empty() {
            return Ok(0);
        }
        let temp_table = format!("#bulk_delete_{}", ObjectName::normalise(table).cache_key().replace('.', "_"));
        self.bulk_insert(instance, &temp_table, rows, batch_size).await?;

        let object = ObjectName::normalise(table);
        let join_on = key_columns.iter().map(|k| format!("t.[{k}] = s.[{k}]")).collect::<Vec<_>>().join(" AND ");
        let text = format!("DELETE t FROM {object} AS t JOIN {temp_table} AS s ON {join_on};");
        let request = DbRequest::new(instance.clone(), text, CommandType::Text, Parameters::new());
        self.execute_non_query(request, ExecutionOptions::default()).await
    }

    /// Drains `reader` in adaptively-sized batches, flushing each through
    /// `flush` (one of `bulk_insert`/`bulk_update`/`bulk_delete`), and
    /// feeds the elapsed time and row count of each flush back into the
    /// batch sizer for the next one (spec §4.13's adaptive batch sizer).
    pub async fn bulk_pipeline<T, F, Fut>(
        &self,
        mut reader: Receiver<T>,
        initial_batch_size: u32,
        mut flush: F,
    ) -> Result<u64>
    where
        F: FnMut(Vec<T>) -> Fut,
        Fut: std::future::Future<Output = Result<u64>>,
    {
        let mut sizer_config = self.config.batch_sizer_config.clone();
        sizer_config.initial_batch_size = initial_batch_size;
        let mut sizer = AdaptiveBatchSizer::new(sizer_config);
        let mut total = 0u64;

        loop {
            let batch_size = sizer.current_batch_size() as usize;
            let mut batch = Vec::with_capacity(batch_size);
            while batch.len() < batch_size {
                match reader.recv().await {
                    Some(item) => batch.push(item),
                    None => break,
                }
            }
            if batch.is_empty() {
                return Ok(total);
            }

            let flushed = batch.len() as u32;
            let start = Instant::now();
            total += flush(batch).await?;
            sizer.record_flush(FlushOutcome {
                rows_flushed: flushed,
                elapsed: start.elapsed(),
                memory_pressure: 0.0,
                throttled: false,
            });

            if (flushed as usize) < batch_size {
                return Ok(total);
            }
        }
    }

    /// `queryResumable<C,R>` (spec §4.13): resumes from C14's stored
    /// cursor for `(instance, query_key)` when present, else
    /// `initial_cursor`. Takes `self` by `Arc` because each batch must
    /// call back into the executor from inside an owned, `'static`
    /// closure handed to the underlying stream.
    pub async fn query_resumable<C, R>(
        self: Arc<Self>,
        instance: InstanceId,
        query_key: String,
        initial_cursor: C,
        dry_run: bool,
        query_builder: impl Fn(C) -> DbRequest<Parameters> + Send + Sync + 'static,
        cursor_selector: impl FnMut(&R) -> C + Send + 'static,
        options: ExecutionOptions,
    ) -> std::pin::Pin<Box<dyn Stream<Item = Result<R>> + Send>>
    where
        C: Clone + Serialize + serde::de::DeserializeOwned + Send + Sync + 'static,
        R: FromRow + Send + 'static,
    {
        let starting_cursor = if dry_run {
            initial_cursor
        } else {
            match self.config.cursor_store.get_last_cursor(&instance, &query_key).await {
                Some(json) => serde_json::from_value(json).unwrap_or(initial_cursor),
                None => initial_cursor,
            }
        };

        let query_builder = Arc::new(query_builder);
        let executor = self.clone();
        let run_batch = move |cursor: C| {
            let executor = executor.clone();
            let query_builder = query_builder.clone();
            let options = options.clone();
            async move {
                let request = query_builder(cursor);
                executor.query::<R>(request, options).await
            }
        };

        let cursor_store = self.config.cursor_store.clone();
        resumable_query(instance, query_key, starting_cursor, cursor_store, dry_run, run_batch, cursor_selector)
    }
}

fn named(values: &[Value]) -> Parameters {
    values.iter().enumerate().map(|(i, v)| (format!("P{i}"), v.clone())).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::{Strategy, TransactionalStrategy};
    use sqlrt_accessors::ColumnDataType;
    use sqlrt_core::ColumnMeta;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct FakeConnection {
        query_result: QueryResult,
        statement_result: Mutex<StatementResult>,
        executed_commands: Mutex<Vec<String>>,
    }

    impl FakeConnection {
        fn with_query_result(query_result: QueryResult) -> Self {
            Self {
                query_result,
                statement_result: Mutex::new(StatementResult::default()),
                executed_commands: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Connection for FakeConnection {
        fn driver_name(&self) -> &str {
            "fake"
        }
        async fn execute(&self, sql: &str, _params: &[Value]) -> Result<StatementResult> {
            self.executed_commands.lock().unwrap().push(sql.to_string());
            Ok(self.statement_result.lock().unwrap().clone())
        }
        async fn query(&self, sql: &str, _params: &[Value]) -> Result<QueryResult> {
            self.executed_commands.lock().unwrap().push(sql.to_string());
            Ok(self.query_result.clone())
        }
        async fn close(&self) -> Result<()> {
            Ok(())
        }
        fn is_closed(&self) -> bool {
            false
        }
    }

    fn one_column_rows(values: Vec<Value>) -> QueryResult {
        QueryResult {
            columns: vec![ColumnMeta { name: "c0".to_string(), ordinal: 0, ..Default::default() }],
            rows: values.into_iter().map(|v| Row::new(Arc::new(vec!["c0".to_string()]), vec![v])).collect(),
        }
    }

    fn executor(connection: Arc<FakeConnection>) -> Executor {
        Executor::new(Strategy::Transactional(TransactionalStrategy::new(connection)), ExecutorConfig::default())
    }

    #[tokio::test]
    async fn query_maps_rows_through_from_row() {
        let connection = Arc::new(FakeConnection::with_query_result(one_column_rows(vec![
            Value::Int32(1),
            Value::Int32(2),
        ])));
        let exec = executor(connection);
        let request = DbRequest::new(InstanceId::from("db1"), "SELECT id FROM t", CommandType::Text, Parameters::new());
        let rows: Vec<i32> = exec.query(request, ExecutionOptions::default()).await.unwrap();
        assert_eq!(rows, vec![1, 2]);
    }

    #[tokio::test]
    async fn query_single_returns_none_on_empty_result() {
        let connection = Arc::new(FakeConnection::with_query_result(QueryResult::empty()));
        let exec = executor(connection);
        let request = DbRequest::new(InstanceId::from("db1"), "SELECT 1", CommandType::Text, Parameters::new());
        let row: Option<i32> = exec.query_single(request, ExecutionOptions::default()).await.unwrap();
        assert!(row.is_none());
    }

    #[tokio::test]
    async fn execute_scalar_reads_the_statement_result_scalar() {
        let connection = Arc::new(FakeConnection::with_query_result(QueryResult::empty()));
        *connection.statement_result.lock().unwrap() = StatementResult { rows_affected: 1, scalar: Some(Value::Int64(7)) };
        let exec = executor(connection);
        let request = DbRequest::new(InstanceId::from("db1"), "usp_DoThing", CommandType::StoredProcedure, Parameters::new());
        let scalar: Option<i64> = exec.execute_scalar(request, ExecutionOptions::default()).await.unwrap();
        assert_eq!(scalar, Some(7));
    }

    #[tokio::test]
    async fn an_interceptor_mock_suppresses_the_driver_call() {
        struct MockingInterceptor;
        #[async_trait]
        impl sqlrt_resilience::Interceptor for MockingInterceptor {
            async fn on_executing(&self, _command: &str, ctx: &mut InterceptorContext) {
                ctx.set_result(Value::Int32(99));
            }
        }
        let connection = Arc::new(FakeConnection::with_query_result(one_column_rows(vec![Value::Int32(1)])));
        let mut config = ExecutorConfig::default();
        config.interceptors = Arc::new(InterceptorChain::new());
        config.interceptors.register(Arc::new(MockingInterceptor));
        let exec = Executor::new(Strategy::Transactional(TransactionalStrategy::new(connection.clone())), config);

        let request = DbRequest::new(InstanceId::from("db1"), "SELECT id FROM t", CommandType::Text, Parameters::new());
        let rows: Vec<i32> = exec.query(request, ExecutionOptions::default()).await.unwrap();
        assert_eq!(rows, vec![99]);
        assert!(connection.executed_commands.lock().unwrap().is_empty(), "driver must not be called when suppressed");
    }

    struct Widget {
        id: i32,
    }

    impl RowShape for Widget {
        fn columns() -> Vec<sqlrt_accessors::ColumnDescriptor<Self>> {
            vec![sqlrt_accessors::ColumnDescriptor::new("Id", ColumnDataType::I32, |w| Value::Int32(w.id))]
        }
    }

    #[tokio::test]
    async fn bulk_insert_chunks_rows_by_batch_size() {
        let connection = Arc::new(FakeConnection::with_query_result(QueryResult::empty()));
        let exec = executor(connection.clone());
        let rows = vec![Widget { id: 1 }, Widget { id: 2 }, Widget { id: 3 }];
        let total = exec.bulk_insert(&InstanceId::from("db1"), "dbo.Widgets", &rows, 2).await.unwrap();
        assert_eq!(total, 0); // FakeConnection::execute returns the default StatementResult (0 rows affected)
        assert_eq!(connection.executed_commands.lock().unwrap().len(), 2, "3 rows at batch size 2 is two flushes");
    }

    #[tokio::test]
    async fn bulk_insert_tvp_requires_a_configured_schema_service() {
        let connection = Arc::new(FakeConnection::with_query_result(QueryResult::empty()));
        let exec = executor(connection);
        let rows = vec![Widget { id: 1 }];
        let err = exec
            .bulk_insert_tvp(&InstanceId::from("db1"), "usp_Core_Bulk_Insert_Users", "Users", &rows, 100)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Internal(_)));
    }

    #[tokio::test]
    async fn bulk_insert_tvp_is_a_noop_for_an_empty_slice() {
        let connection = Arc::new(FakeConnection::with_query_result(QueryResult::empty()));
        let exec = executor(connection);
        let rows: Vec<Widget> = Vec::new();
        let total = exec
            .bulk_insert_tvp(&InstanceId::from("db1"), "usp_Core_Bulk_Insert_Users", "Users", &rows, 100)
            .await
            .unwrap();
        assert_eq!(total, 0);
    }

    #[tokio::test]
    async fn bulk_pipeline_drains_the_channel_in_batches() {
        let connection = Arc::new(FakeConnection::with_query_result(QueryResult::empty()));
        let mut config = ExecutorConfig::default();
        config.batch_sizer_config = BatchSizerConfig {
            initial_batch_size: 3,
            min_batch_size: 3,
            max_batch_size: 3,
            ..BatchSizerConfig::default()
        };
        let exec = Executor::new(Strategy::Transactional(TransactionalStrategy::new(connection)), config);
        let (tx, rx) = tokio::sync::mpsc::channel(16);
        for i in 0..7 {
            tx.send(i).await.unwrap();
        }
        drop(tx);

        let flush_count = Arc::new(AtomicUsize::new(0));
        let flush_count2 = flush_count.clone();
        let total = exec
            .bulk_pipeline(rx, 3, move |batch: Vec<i32>| {
                flush_count2.fetch_add(1, Ordering::SeqCst);
                let n = batch.len() as u64;
                async move { Ok(n) }
            })
            .await
            .unwrap();
        assert_eq!(total, 7);
        assert!(flush_count.load(Ordering::SeqCst) >= 3, "7 rows at a fixed batch size of 3 needs at least 3 flushes");
    }

    #[tokio::test]
    async fn query_resumable_resumes_from_the_persisted_cursor() {
        let connection = Arc::new(FakeConnection::with_query_result(QueryResult::empty()));
        let mut config = ExecutorConfig::default();
        let cursor_store: Arc<dyn CursorStore> = Arc::new(crate::resumable::InMemoryCursorStore::new());
        cursor_store.save_cursor(&InstanceId::from("db1"), "q1", 1, serde_json::json!(5)).await;
        config.cursor_store = cursor_store;
        let exec = Arc::new(Executor::new(Strategy::Transactional(TransactionalStrategy::new(connection)), config));

        let all_rows: Vec<i32> = (1..=10).collect();
        let seen_cursor = Arc::new(Mutex::new(None));
        let seen_cursor2 = seen_cursor.clone();
        use futures::StreamExt;
        let stream = exec
            .query_resumable::<i32, i32>(
                InstanceId::from("db1"),
                "q1".to_string(),
                0,
                false,
                move |cursor: i32| {
                    *seen_cursor2.lock().unwrap() = Some(cursor);
                    DbRequest::new(InstanceId::from("db1"), "irrelevant", CommandType::Text, Parameters::new())
                },
                |row: &i32| *row,
                ExecutionOptions::default(),
            )
            .await;
        let _ = all_rows;
        let _: Vec<_> = stream.collect().await;
        assert_eq!(*seen_cursor.lock().unwrap(), Some(5), "must resume from the cursor already in the store, not initial_cursor");
    }
}

/// Disposable multi-resultset reader returned by `query_multiple`.
pub struct MultiResultReader {
    result: Option<QueryResult>,
}

impl MultiResultReader {
    pub fn next_result(&mut self) -> Option<QueryResult> {
        self.result.take()
    }

    pub fn read<R: FromRow>(&self) -> Result<Vec<R>> {
        match &self.result {
            Some(q) => map_rows(&q.rows),
            None => Ok(Vec::new()),
        }
    }

    pub fn read_single<R: FromRow>(&self) -> Result<Option<R>> {
        Ok(self.read::<R>()?.into_iter().next())
    }

    pub async fn dispose(self) {}
}
