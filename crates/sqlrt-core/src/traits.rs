//! Trait contracts implemented by `sqlrt-driver-mssql` and consumed by
//! `sqlrt-schema` / `sqlrt-exec` (spec §4.5, §4.7, §6).

use crate::error::Result;
use crate::ids::InstanceId;
use crate::schema_model::{SpParameter, TvpColumn};
use crate::value::{QueryResult, StatementResult, Value};
use async_trait::async_trait;
use std::time::Duration;

/// A single open connection to the database. Single-threaded once opened
/// (spec §5): one operation, one connection, one thread of progress.
#[async_trait]
pub trait Connection: Send + Sync {
    fn driver_name(&self) -> &str;

    async fn execute(&self, sql: &str, params: &[Value]) -> Result<StatementResult>;

    async fn query(&self, sql: &str, params: &[Value]) -> Result<QueryResult>;

    /// Issue `SET DEADLOCK_PRIORITY HIGH` ahead of a deadlock-aware retry
    /// (spec §4.10). A no-op on connections that can't express this.
    async fn set_deadlock_priority_high(&self) -> Result<()> {
        Ok(())
    }

    async fn close(&self) -> Result<()>;

    fn is_closed(&self) -> bool;
}

/// Acquires connections for the execution strategy (spec §4.12, §5).
#[async_trait]
pub trait ConnectionPool: Send + Sync {
    async fn acquire(&self, timeout: Duration) -> Result<std::sync::Arc<dyn Connection>>;
}

/// Row of a single stored-procedure or TVP version, as returned by the
/// schema repository's version result sets (spec §6).
#[derive(Debug, Clone)]
pub struct VersionRow {
    pub name: String,
    pub version_token: i64,
}

/// All five result sets of the schema-discovery batch (spec §4.5, §6).
#[derive(Debug, Clone, Default)]
pub struct SchemaMetadataBatch {
    pub sp_versions: Vec<VersionRow>,
    pub sp_parameters: std::collections::HashMap<String, Vec<SpParameter>>,
    pub tvp_versions: Vec<VersionRow>,
    pub tvp_columns: std::collections::HashMap<String, Vec<TvpColumn>>,
    pub found_schemas: Vec<String>,
}

/// Issues the schema-discovery batch query and targeted lazy-load queries
/// (spec §4.5).
#[async_trait]
pub trait SchemaRepository: Send + Sync {
    async fn get_all_schema_metadata(
        &self,
        schemas: &[String],
        instance_id: &InstanceId,
    ) -> Result<SchemaMetadataBatch>;

    async fn get_sp_metadata(&self, name: &str, instance_id: &InstanceId) -> Result<Vec<SpParameter>>;

    async fn get_tvp_metadata(&self, name: &str, instance_id: &InstanceId) -> Result<Vec<TvpColumn>>;

    async fn get_object_version(&self, name: &str, instance_id: &InstanceId) -> Result<i64>;

    async fn get_tvp_version(&self, name: &str, instance_id: &InstanceId) -> Result<i64>;
}

/// External distributed KV store behind the C8 loader (spec §6). A real
/// deployment injects Redis or a shared-memory implementation; that
/// implementation is out of scope here (spec §1).
#[async_trait]
pub trait DistributedCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration, tags: &[String]) -> Result<()>;

    async fn remove(&self, key: &str) -> Result<()>;

    async fn remove_by_tag(&self, tag: &str) -> Result<()>;
}

/// Per-instance monotonic counter in shared storage plus local mirror
/// (spec §4.7, §6). Implementations must tolerate concurrent increments
/// racing a reader by at most one step.
#[async_trait]
pub trait EpochStorage: Send + Sync {
    async fn get_epoch(&self, instance_id: &InstanceId) -> Result<u64>;

    async fn increment_epoch(&self, instance_id: &InstanceId) -> Result<u64>;
}
