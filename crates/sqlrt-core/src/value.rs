//! Wire-agnostic value and row types (spec §3, §4.2).

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use std::sync::Arc;
use uuid::Uuid;

/// A database value that can represent any SQL Server scalar type.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    Int8(i8),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    Float32(f32),
    Float64(f64),
    /// Decimal/numeric/money, stored as a string to preserve precision.
    Decimal(String),
    String(String),
    Bytes(Vec<u8>),
    Uuid(Uuid),
    Date(NaiveDate),
    Time(NaiveTime),
    /// A time-of-day carried as its wire form: a duration since midnight
    /// rather than a wall-clock value (spec §4.2's TVP coercion list).
    /// Produced by a TVP column reader; never by a plain scalar read.
    Duration(Duration),
    DateTime(NaiveDateTime),
    DateTimeUtc(DateTime<Utc>),
    Json(serde_json::Value),
    /// A table-valued-parameter rowset (spec §4.3's TVP-binding clause).
    /// `Arc`-wrapped so binding a multi-thousand-row bulk payload doesn't
    /// deep-clone it on every retry attempt the executor takes.
    Tvp(Arc<TvpPayload>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int8(v) => Some(*v as i64),
            Value::Int16(v) => Some(*v as i64),
            Value::Int32(v) => Some(*v as i64),
            Value::Int64(v) => Some(*v),
            _ => None,
        }
    }
}

/// A single row produced by a query, paired with the column names it was
/// read against (shared across rows of the same result set).
#[derive(Debug, Clone)]
pub struct Row {
    values: Vec<Value>,
    columns: std::sync::Arc<Vec<String>>,
}

impl Row {
    pub fn new(columns: std::sync::Arc<Vec<String>>, values: Vec<Value>) -> Self {
        Self { values, columns }
    }

    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    pub fn get_by_name(&self, name: &str) -> Option<&Value> {
        self.columns
            .iter()
            .position(|c| c.eq_ignore_ascii_case(name))
            .and_then(|idx| self.values.get(idx))
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn into_values(self) -> Vec<Value> {
        self.values
    }
}

/// Column metadata as reported by the driver for an arbitrary result set.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ColumnMeta {
    pub name: String,
    pub ordinal: usize,
    pub sql_type: String,
    pub nullable: bool,
    pub max_length: Option<i32>,
    pub precision: Option<u8>,
    pub scale: Option<u8>,
}

/// Row-oriented TVP payload carried by [`Value::Tvp`] across the
/// `Connection` trait's `&[Value]`-only call boundary. Lives here rather
/// than referencing `sqlrt-tvp::ColumnarReader` directly, which would be a
/// crate cycle (`sqlrt-tvp` depends on `sqlrt-core`); the columnar reader
/// flattens into this shape once binding is complete.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct TvpPayload {
    pub udt_type_name: String,
    pub columns: Vec<ColumnMeta>,
    pub rows: Vec<Vec<Value>>,
}

/// A generic result set: columns plus rows.
#[derive(Debug, Clone, Default)]
pub struct QueryResult {
    pub columns: Vec<ColumnMeta>,
    pub rows: Vec<Row>,
}

impl QueryResult {
    pub fn empty() -> Self {
        Self::default()
    }
}

/// Result of a non-query statement execution.
#[derive(Debug, Clone, Default)]
pub struct StatementResult {
    pub rows_affected: u64,
    /// Scalar value returned via `RETURN` or an output parameter/OUTPUT
    /// clause, when the caller asked for one.
    pub scalar: Option<Value>,
}
