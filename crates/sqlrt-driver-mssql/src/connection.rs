//! tiberius-backed [`Connection`] implementation (spec §5, §6).

use async_trait::async_trait;
use sqlrt_core::{ColumnMeta, Connection, QueryResult, Result, Row, StatementResult, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tiberius::{AuthMethod, Client, ColumnData, Config, EncryptionLevel, Row as TiberiusRow};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};

/// Connection parameters for a single SQL Server endpoint. Plain data,
/// mirroring the fields the teacher's `MssqlConnection::connect` takes
/// directly rather than through an IDE-specific config object.
#[derive(Debug, Clone)]
pub struct MssqlConnectOptions {
    pub host: String,
    pub port: u16,
    pub database: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub trust_cert: bool,
}

impl Default for MssqlConnectOptions {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1433,
            database: None,
            username: None,
            password: None,
            trust_cert: false,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MssqlConnectionError {
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("connection is closed")]
    ConnectionClosed,

    #[error("tiberius error: {0}")]
    Tiberius(#[from] tiberius::error::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<MssqlConnectionError> for sqlrt_core::Error {
    fn from(err: MssqlConnectionError) -> Self {
        match err {
            MssqlConnectionError::Tiberius(e) => classify_tiberius_error(e),
            other => sqlrt_core::Error::Driver(other.to_string()),
        }
    }
}

const SCHEMA_DRIFT_NUMBERS: [i32; 4] = [201, 207, 208, 8144];
const DEADLOCK_VICTIM: i32 = 1205;
const CLIENT_TIMEOUT: i32 = -2;
const NETWORK_FAMILY: [i32; 5] = [53, 233, 10053, 10054, 10060];
const AZURE_THROTTLING_FAMILY: [i32; 4] = [40613, 40197, 40501, 49918];

fn tiberius_error_number(e: &tiberius::error::Error) -> Option<i32> {
    match e {
        tiberius::error::Error::Server(token) => Some(token.code() as i32),
        _ => None,
    }
}

/// Lifts a raw tiberius error into the shared taxonomy, preserving the
/// SQL Server error number where one exists so the resilience pipeline
/// and the schema-drift self-heal in the execution strategy can route on
/// it. Numbers outside the known transient/drift catalogues surface as a
/// plain [`sqlrt_core::Error::Driver`] and are not retried.
fn classify_tiberius_error(e: tiberius::error::Error) -> sqlrt_core::Error {
    let number = tiberius_error_number(&e);
    let message = e.to_string();
    match number {
        Some(n) if SCHEMA_DRIFT_NUMBERS.contains(&n) => {
            sqlrt_core::Error::SchemaDrift { message, sql_error_number: n }
        }
        Some(n)
            if n == DEADLOCK_VICTIM
                || n == CLIENT_TIMEOUT
                || NETWORK_FAMILY.contains(&n)
                || AZURE_THROTTLING_FAMILY.contains(&n) =>
        {
            sqlrt_core::Error::Transient { message, sql_error_number: Some(n) }
        }
        _ => sqlrt_core::Error::Driver(message),
    }
}

/// A single tiberius connection. Single-threaded once opened (spec §5):
/// the client is behind a `tokio::sync::Mutex` purely to satisfy `Sync`,
/// not to allow concurrent use — one operation, one connection.
pub struct MssqlConnection {
    client: Mutex<Client<Compat<TcpStream>>>,
    closed: AtomicBool,
    database: Option<String>,
}

impl MssqlConnection {
    #[tracing::instrument(skip(password))]
    pub async fn connect(
        host: &str,
        port: u16,
        database: Option<&str>,
        username: Option<&str>,
        password: Option<&str>,
        trust_cert: bool,
    ) -> std::result::Result<Self, MssqlConnectionError> {
        tracing::debug!(host, port, "connecting to SQL Server");

        let mut config = Config::new();
        config.host(host);
        config.port(port);

        if let Some(db) = database {
            config.database(db);
        }
        if trust_cert {
            config.trust_cert();
        }
        config.encryption(EncryptionLevel::Required);

        match (username, password) {
            (Some(user), Some(pass)) => {
                config.authentication(AuthMethod::sql_server(user, pass));
            }
            (Some(user), None) => {
                config.authentication(AuthMethod::sql_server(user, ""));
            }
            (None, _) => {
                return Err(MssqlConnectionError::AuthenticationFailed(
                    "no credentials supplied and integrated auth is not available off Windows"
                        .to_string(),
                ));
            }
        }

        let tcp = TcpStream::connect(config.get_addr())
            .await
            .map_err(|e| MssqlConnectionError::ConnectionFailed(e.to_string()))?;
        tcp.set_nodelay(true)?;
        let compat = tcp.compat_write();

        let client = Client::connect(config, compat)
            .await
            .map_err(|e| MssqlConnectionError::ConnectionFailed(e.to_string()))?;

        tracing::debug!("connected to SQL Server");

        Ok(Self {
            client: Mutex::new(client),
            closed: AtomicBool::new(false),
            database: database.map(String::from),
        })
    }

    pub async fn connect_with(
        opts: &MssqlConnectOptions,
    ) -> std::result::Result<Self, MssqlConnectionError> {
        Self::connect(
            &opts.host,
            opts.port,
            opts.database.as_deref(),
            opts.username.as_deref(),
            opts.password.as_deref(),
            opts.trust_cert,
        )
        .await
    }

    fn ensure_not_closed(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(MssqlConnectionError::ConnectionClosed.into());
        }
        Ok(())
    }
}

#[async_trait]
impl Connection for MssqlConnection {
    fn driver_name(&self) -> &str {
        "mssql"
    }

    #[tracing::instrument(skip(self, params))]
    async fn execute(&self, sql: &str, params: &[Value]) -> Result<StatementResult> {
        self.ensure_not_closed()?;
        let start = std::time::Instant::now();
        let mut client = self.client.lock().await;

        let result = if params.is_empty() {
            client.execute(sql, &[]).await
        } else {
            let boxed = values_to_tiberius_params(params)?;
            let refs: Vec<&dyn tiberius::ToSql> =
                boxed.iter().map(|p| p.as_ref() as &dyn tiberius::ToSql).collect();
            client.execute(sql, &refs[..]).await
        };

        match result {
            Ok(exec_result) => {
                let rows_affected = exec_result.rows_affected().iter().sum::<u64>();
                tracing::debug!(
                    rows_affected,
                    duration_ms = start.elapsed().as_millis() as u64,
                    "execute completed"
                );
                Ok(StatementResult { rows_affected, scalar: None })
            }
            Err(e) => {
                tracing::error!(error = %e, "execute failed");
                Err(classify_tiberius_error(e))
            }
        }
    }

    #[tracing::instrument(skip(self, params))]
    async fn query(&self, sql: &str, params: &[Value]) -> Result<QueryResult> {
        self.ensure_not_closed()?;
        let start = std::time::Instant::now();
        let mut client = self.client.lock().await;

        let stream = if params.is_empty() {
            client.query(sql, &[]).await
        } else {
            let boxed = values_to_tiberius_params(params)?;
            let refs: Vec<&dyn tiberius::ToSql> =
                boxed.iter().map(|p| p.as_ref() as &dyn tiberius::ToSql).collect();
            client.query(sql, &refs[..]).await
        };

        let query_stream = stream.map_err(classify_tiberius_error)?;
        let tib_rows = query_stream
            .into_first_result()
            .await
            .map_err(classify_tiberius_error)?;

        let columns: Vec<ColumnMeta> = tib_rows
            .first()
            .map(|row| {
                row.columns()
                    .iter()
                    .enumerate()
                    .map(|(idx, col)| tiberius_column_to_meta(col, idx))
                    .collect()
            })
            .unwrap_or_default();
        let column_names = Arc::new(columns.iter().map(|c| c.name.clone()).collect::<Vec<_>>());

        let mut rows = Vec::with_capacity(tib_rows.len());
        for tib_row in tib_rows {
            rows.push(Row::new(column_names.clone(), tiberius_row_to_values(tib_row)?));
        }

        tracing::debug!(
            row_count = rows.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "query completed"
        );
        Ok(QueryResult { columns, rows })
    }

    async fn set_deadlock_priority_high(&self) -> Result<()> {
        self.ensure_not_closed()?;
        let mut client = self.client.lock().await;
        client
            .simple_query("SET DEADLOCK_PRIORITY HIGH")
            .await
            .map_err(classify_tiberius_error)?
            .into_results()
            .await
            .map_err(classify_tiberius_error)?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        tracing::debug!(database = ?self.database, "connection closed");
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

fn tiberius_column_to_meta(col: &tiberius::Column, ordinal: usize) -> ColumnMeta {
    ColumnMeta {
        name: col.name().to_string(),
        ordinal,
        sql_type: format!("{:?}", col.column_type()),
        nullable: true,
        max_length: None,
        precision: None,
        scale: None,
    }
}

fn tiberius_row_to_values(row: TiberiusRow) -> Result<Vec<Value>> {
    row.into_iter().map(column_data_to_value).collect()
}

/// Maps a single tiberius wire value onto [`Value`]. `DateTime`/
/// `SmallDateTime` reconstruct against the legacy 1900-01-01 epoch;
/// `DateTime2`/`Date`/`Time`/`DateTimeOffset` against 0001-01-01, matching
/// the TDS date-math the teacher's driver performs.
pub(crate) fn column_data_to_value(col_data: ColumnData<'static>) -> Result<Value> {
    match col_data {
        ColumnData::Bit(None) => Ok(Value::Null),
        ColumnData::Bit(Some(v)) => Ok(Value::Bool(v)),
        ColumnData::U8(None) => Ok(Value::Null),
        ColumnData::U8(Some(v)) => Ok(Value::Int32(v as i32)),
        ColumnData::I16(None) => Ok(Value::Null),
        ColumnData::I16(Some(v)) => Ok(Value::Int16(v)),
        ColumnData::I32(None) => Ok(Value::Null),
        ColumnData::I32(Some(v)) => Ok(Value::Int32(v)),
        ColumnData::I64(None) => Ok(Value::Null),
        ColumnData::I64(Some(v)) => Ok(Value::Int64(v)),
        ColumnData::F32(None) => Ok(Value::Null),
        ColumnData::F32(Some(v)) => Ok(Value::Float32(v)),
        ColumnData::F64(None) => Ok(Value::Null),
        ColumnData::F64(Some(v)) => Ok(Value::Float64(v)),
        ColumnData::String(None) => Ok(Value::Null),
        ColumnData::String(Some(v)) => Ok(Value::String(v.into_owned())),
        ColumnData::Guid(None) => Ok(Value::Null),
        ColumnData::Guid(Some(v)) => Ok(Value::Uuid(v)),
        ColumnData::Binary(None) => Ok(Value::Null),
        ColumnData::Binary(Some(v)) => Ok(Value::Bytes(v.into_owned())),
        ColumnData::Numeric(None) => Ok(Value::Null),
        ColumnData::Numeric(Some(v)) => Ok(Value::Decimal(v.to_string())),
        ColumnData::DateTime(None) => Ok(Value::Null),
        ColumnData::DateTime(Some(v)) => {
            let dt = chrono::NaiveDateTime::new(
                chrono::NaiveDate::from_ymd_opt(1900, 1, 1).unwrap()
                    + chrono::Duration::days(v.days() as i64),
                chrono::NaiveTime::from_num_seconds_from_midnight_opt(
                    (v.seconds_fragments() as f64 / 300.0) as u32,
                    0,
                )
                .unwrap_or_default(),
            );
            Ok(Value::DateTime(dt))
        }
        ColumnData::SmallDateTime(None) => Ok(Value::Null),
        ColumnData::SmallDateTime(Some(v)) => {
            let dt = chrono::NaiveDateTime::new(
                chrono::NaiveDate::from_ymd_opt(1900, 1, 1).unwrap()
                    + chrono::Duration::days(v.days() as i64),
                chrono::NaiveTime::from_num_seconds_from_midnight_opt(
                    (v.seconds_fragments() as u32) * 60,
                    0,
                )
                .unwrap_or_default(),
            );
            Ok(Value::DateTime(dt))
        }
        ColumnData::DateTime2(None) => Ok(Value::Null),
        ColumnData::DateTime2(Some(v)) => {
            let date = v.date();
            let time = v.time();
            let dt = chrono::NaiveDateTime::new(
                chrono::NaiveDate::from_ymd_opt(1, 1, 1).unwrap()
                    + chrono::Duration::days(date.days() as i64),
                chrono::NaiveTime::from_num_seconds_from_midnight_opt(
                    (time.increments() / 10_000_000) as u32,
                    ((time.increments() % 10_000_000) * 100) as u32,
                )
                .unwrap_or_default(),
            );
            Ok(Value::DateTime(dt))
        }
        ColumnData::DateTimeOffset(None) => Ok(Value::Null),
        ColumnData::DateTimeOffset(Some(v)) => {
            let dt2 = v.datetime2();
            let date = dt2.date();
            let time = dt2.time();
            let naive = chrono::NaiveDateTime::new(
                chrono::NaiveDate::from_ymd_opt(1, 1, 1).unwrap()
                    + chrono::Duration::days(date.days() as i64),
                chrono::NaiveTime::from_num_seconds_from_midnight_opt(
                    (time.increments() / 10_000_000) as u32,
                    ((time.increments() % 10_000_000) * 100) as u32,
                )
                .unwrap_or_default(),
            );
            let utc = chrono::DateTime::<chrono::Utc>::from_naive_utc_and_offset(naive, chrono::Utc);
            Ok(Value::DateTimeUtc(utc))
        }
        ColumnData::Date(None) => Ok(Value::Null),
        ColumnData::Date(Some(v)) => {
            let date = chrono::NaiveDate::from_ymd_opt(1, 1, 1).unwrap()
                + chrono::Duration::days(v.days() as i64);
            Ok(Value::Date(date))
        }
        ColumnData::Time(None) => Ok(Value::Null),
        ColumnData::Time(Some(v)) => {
            let time = chrono::NaiveTime::from_num_seconds_from_midnight_opt(
                (v.increments() / 10_000_000) as u32,
                ((v.increments() % 10_000_000) * 100) as u32,
            )
            .unwrap_or_default();
            Ok(Value::Time(time))
        }
        ColumnData::Xml(None) => Ok(Value::Null),
        ColumnData::Xml(Some(v)) => Ok(Value::String(v.into_owned().into_string())),
    }
}

#[derive(Debug)]
pub(crate) enum TiberiusParam {
    Null,
    Bool(bool),
    I16(i16),
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
    String(String),
    Bytes(Vec<u8>),
    Uuid(uuid::Uuid),
}

impl tiberius::ToSql for TiberiusParam {
    fn to_sql(&self) -> ColumnData<'_> {
        match self {
            TiberiusParam::Null => ColumnData::I32(None),
            TiberiusParam::Bool(v) => ColumnData::Bit(Some(*v)),
            TiberiusParam::I16(v) => ColumnData::I16(Some(*v)),
            TiberiusParam::I32(v) => ColumnData::I32(Some(*v)),
            TiberiusParam::I64(v) => ColumnData::I64(Some(*v)),
            TiberiusParam::F32(v) => ColumnData::F32(Some(*v)),
            TiberiusParam::F64(v) => ColumnData::F64(Some(*v)),
            TiberiusParam::String(v) => ColumnData::String(Some(std::borrow::Cow::Borrowed(v.as_str()))),
            TiberiusParam::Bytes(v) => ColumnData::Binary(Some(std::borrow::Cow::Borrowed(v.as_slice()))),
            TiberiusParam::Uuid(v) => ColumnData::Guid(Some(*v)),
        }
    }
}

/// Widens/stringifies [`Value`]s into tiberius parameters. Decimal/date/time
/// values go over the wire as their canonical string form and are cast back
/// by the server-side parameter type, the same trick the teacher's driver
/// uses rather than carrying tiberius's own decimal/date wire types here.
///
/// `Value::Tvp` has no `tiberius::ToSql` shape to widen into at all — the
/// crate's `ToSql` trait has no table-valued-parameter variant — so it is
/// carried as a JSON string of its rows and columns. A stored procedure
/// called this way will see the parameter as `nvarchar`, not its declared
/// table type; real TVP wire support needs a lower-level tiberius API this
/// driver does not yet drive (see DESIGN.md).
pub(crate) fn values_to_tiberius_params(values: &[Value]) -> Result<Vec<Box<TiberiusParam>>> {
    Ok(values
        .iter()
        .map(|v| {
            Box::new(match v {
                Value::Null => TiberiusParam::Null,
                Value::Bool(b) => TiberiusParam::Bool(*b),
                Value::Int8(i) => TiberiusParam::I16(*i as i16),
                Value::Int16(i) => TiberiusParam::I16(*i),
                Value::Int32(i) => TiberiusParam::I32(*i),
                Value::Int64(i) => TiberiusParam::I64(*i),
                Value::Float32(f) => TiberiusParam::F32(*f),
                Value::Float64(f) => TiberiusParam::F64(*f),
                Value::Decimal(d) => TiberiusParam::String(d.clone()),
                Value::String(s) => TiberiusParam::String(s.clone()),
                Value::Bytes(b) => TiberiusParam::Bytes(b.clone()),
                Value::Uuid(u) => TiberiusParam::Uuid(*u),
                Value::Date(d) => TiberiusParam::String(d.to_string()),
                Value::Time(t) => TiberiusParam::String(t.to_string()),
                Value::Duration(d) => TiberiusParam::String(duration_as_time_string(*d)),
                Value::DateTime(dt) => TiberiusParam::String(dt.to_string()),
                Value::DateTimeUtc(dt) => TiberiusParam::String(dt.to_string()),
                Value::Json(j) => TiberiusParam::String(j.to_string()),
                Value::Tvp(payload) => {
                    TiberiusParam::String(serde_json::to_string(payload.as_ref()).unwrap_or_default())
                }
            })
        })
        .collect())
}

/// Renders a midnight-relative duration as `HH:MM:SS.fffffff` (100ns ticks,
/// matching the `time(7)` precision the rest of this module assumes).
fn duration_as_time_string(d: chrono::Duration) -> String {
    let total_ns = d.num_nanoseconds().unwrap_or(0).max(0);
    let secs = total_ns / 1_000_000_000;
    let ticks_100ns = (total_ns % 1_000_000_000) / 100;
    format!("{:02}:{:02}:{:02}.{:07}", secs / 3600, (secs % 3600) / 60, secs % 60, ticks_100ns)
}

impl std::fmt::Debug for MssqlConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MssqlConnection")
            .field("database", &self.database)
            .field("closed", &self.closed.load(Ordering::SeqCst))
            .finish()
    }
}
