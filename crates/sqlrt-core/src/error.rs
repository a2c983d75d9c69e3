//! Error taxonomy shared by every subsystem (spec §7).

use thiserror::Error;

/// Core error type for sqlrt operations.
///
/// Variants are kinds, not wire-level exceptions: a transient SQL error
/// and a client-side timeout both surface as [`Error::Transient`] once
/// classified, carrying the original SQL error number where one exists.
#[derive(Error, Debug)]
pub enum Error {
    /// The requested stored procedure or TVP does not exist in the database.
    #[error("schema missing: {kind} '{name}' not found for instance {instance}")]
    SchemaMissing {
        instance: String,
        kind: &'static str,
        name: String,
    },

    /// A TVP row type structurally disagrees with the DB-side table type.
    #[error("schema validation failed for TVP '{tvp_name}': {reason}")]
    SchemaValidation {
        tvp_name: String,
        reason: String,
        column_name: Option<String>,
        ordinal: Option<usize>,
    },

    /// A required parameter was null under strict checking.
    #[error("required parameter '{0}' is missing")]
    ParameterMissing(String),

    /// A value does not fit the DB-side constraint (precision, range, date).
    #[error("value overflow for parameter '{param_name}': {constraint}")]
    ValueOverflow {
        param_name: String,
        constraint: String,
    },

    /// A retryable failure, exposed only if all retries are exhausted.
    #[error("transient failure (sql error {sql_error_number:?}): {message}")]
    Transient {
        message: String,
        sql_error_number: Option<i32>,
    },

    /// The circuit breaker is open; the call was fast-failed.
    #[error("circuit open (last sql error {last_sql_error_number:?})")]
    CircuitOpen {
        last_sql_error_number: Option<i32>,
    },

    /// Caught at the execution strategy; converted into a self-heal retry.
    /// Surfaces only if the retry also fails, carrying the original error.
    #[error("schema drift (sql error {sql_error_number}): {message}")]
    SchemaDrift {
        message: String,
        sql_error_number: i32,
    },

    /// Caller-driven cancellation. Never retried.
    #[error("operation cancelled")]
    Cancelled,

    /// An unexpected invariant violation — a bug, not a runtime condition.
    #[error("internal invariant violation: {0}")]
    Internal(String),

    /// Error surfaced by the underlying driver/transport.
    #[error("driver error: {0}")]
    Driver(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// The SQL Server error number carried by this error, if any.
    pub fn sql_error_number(&self) -> Option<i32> {
        match self {
            Error::Transient {
                sql_error_number, ..
            } => *sql_error_number,
            Error::CircuitOpen {
                last_sql_error_number,
            } => *last_sql_error_number,
            Error::SchemaDrift {
                sql_error_number, ..
            } => Some(*sql_error_number),
            _ => None,
        }
    }

    pub fn schema_missing(instance: impl Into<String>, kind: &'static str, name: impl Into<String>) -> Self {
        Error::SchemaMissing {
            instance: instance.into(),
            kind,
            name: name.into(),
        }
    }

    pub fn column_count_mismatch(tvp_name: impl Into<String>, expected: usize, actual: usize) -> Self {
        Error::SchemaValidation {
            tvp_name: tvp_name.into(),
            reason: format!("column count mismatch: expected {expected}, got {actual}"),
            column_name: None,
            ordinal: None,
        }
    }

    pub fn column_name_mismatch(
        tvp_name: impl Into<String>,
        ordinal: usize,
        expected: impl Into<String>,
        actual: impl Into<String>,
    ) -> Self {
        let expected = expected.into();
        let actual = actual.into();
        Error::SchemaValidation {
            tvp_name: tvp_name.into(),
            reason: format!("column name mismatch at ordinal {ordinal}: expected '{expected}', got '{actual}'"),
            column_name: Some(actual),
            ordinal: Some(ordinal),
        }
    }

    pub fn type_mismatch(
        tvp_name: impl Into<String>,
        ordinal: usize,
        column_name: impl Into<String>,
        declared: impl Into<String>,
        sql_type: impl Into<String>,
    ) -> Self {
        let column_name = column_name.into();
        let declared = declared.into();
        let sql_type = sql_type.into();
        Error::SchemaValidation {
            tvp_name: tvp_name.into(),
            reason: format!("column '{column_name}' declared as {declared} is not assignable to {sql_type}"),
            column_name: Some(column_name),
            ordinal: Some(ordinal),
        }
    }
}

/// Result alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, Error>;
