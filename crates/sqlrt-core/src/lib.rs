//! Shared data model, error taxonomy and trait contracts for the `sqlrt`
//! data-access runtime. Every other crate in the workspace depends on this
//! one; it depends on nothing internal.

mod error;
mod ids;
mod request;
mod schema_model;
mod traits;
mod value;

pub use error::{Error, Result};
pub use ids::{InstanceId, ObjectName};
pub use request::{CommandType, DbRequest, ExecutionOptions, SchemaMode};
pub use schema_model::{
    case_insensitive_hash, ParameterDirection, SpParameter, SpSchema, TvpColumn, TvpSchema,
    VERSION_NOT_FOUND,
};
pub use traits::{
    Connection, ConnectionPool, DistributedCache, EpochStorage, SchemaMetadataBatch,
    SchemaRepository, VersionRow,
};
pub use value::{ColumnMeta, QueryResult, Row, StatementResult, TvpPayload, Value};
