//! Schema-discovery batch query and targeted lazy-load queries (C5, spec
//! §4.5, §6). Grounded on `zqlz-driver-mssql/src/schema.rs`'s `sys.*`
//! catalog-query idiom, generalized from IDE introspection (tables/views/
//! indexes) to the stored-procedure/TVP metadata this runtime needs.

use async_trait::async_trait;
use sqlrt_core::{
    Connection, InstanceId, ParameterDirection, Result, SchemaMetadataBatch, SchemaRepository,
    SpParameter, TvpColumn, VersionRow,
};
use std::collections::HashMap;
use std::sync::Arc;

/// Issues the five-result-set schema batch and the targeted per-object
/// queries over an open [`Connection`].
pub struct TiberiusSchemaRepository {
    connection: Arc<dyn Connection>,
}

impl TiberiusSchemaRepository {
    pub fn new(connection: Arc<dyn Connection>) -> Self {
        Self { connection }
    }

    /// The five schema-discovery queries, run one after another over `self`'s
    /// connection and assembled into the batch result. Split out of
    /// `get_all_schema_metadata` so the transaction wrapper there can commit
    /// or roll back around a single fallible call.
    async fn run_batch_queries(&self, in_list: &str, params: &[sqlrt_core::Value]) -> Result<SchemaMetadataBatch> {
        let sp_versions_rows = self.connection.query(&sp_versions_query(in_list), params).await?;
        let sp_versions: Vec<VersionRow> = sp_versions_rows
            .rows
            .iter()
            .map(|r| VersionRow {
                name: r.get(0).and_then(|v| v.as_str()).unwrap_or("").to_string(),
                version_token: r.get(1).and_then(|v| v.as_i64()).unwrap_or(0),
            })
            .collect();

        let sp_param_rows = self.connection.query(&sp_parameters_query(in_list), params).await?;
        let mut sp_parameters: HashMap<String, Vec<SpParameter>> = HashMap::new();
        for row in &sp_param_rows.rows {
            let sp_name = row.get(0).and_then(|v| v.as_str()).unwrap_or("").to_string();
            sp_parameters
                .entry(sp_name)
                .or_default()
                .push(row_to_sp_parameter(row));
        }

        let tvp_versions_rows = self.connection.query(&tvp_versions_query(in_list), params).await?;
        let tvp_versions: Vec<VersionRow> = tvp_versions_rows
            .rows
            .iter()
            .map(|r| VersionRow {
                name: r.get(0).and_then(|v| v.as_str()).unwrap_or("").to_string(),
                version_token: r.get(1).and_then(|v| v.as_i64()).unwrap_or(0),
            })
            .collect();

        let tvp_column_rows = self.connection.query(&tvp_columns_query(in_list), params).await?;
        let mut tvp_columns: HashMap<String, Vec<TvpColumn>> = HashMap::new();
        for row in &tvp_column_rows.rows {
            let tvp_name = row.get(0).and_then(|v| v.as_str()).unwrap_or("").to_string();
            tvp_columns.entry(tvp_name).or_default().push(row_to_tvp_column(row));
        }

        let found_rows = self.connection.query(&found_schemas_query(in_list), params).await?;
        let found_schemas: Vec<String> = found_rows
            .rows
            .iter()
            .filter_map(|r| r.get(0).and_then(|v| v.as_str()).map(|s| s.to_string()))
            .collect();

        Ok(SchemaMetadataBatch {
            sp_versions,
            sp_parameters,
            tvp_versions,
            tvp_columns,
            found_schemas,
        })
    }
}

fn in_clause_params(schemas: &[String]) -> (String, Vec<sqlrt_core::Value>) {
    let placeholders: Vec<String> = (1..=schemas.len()).map(|i| format!("@P{i}")).collect();
    let params = schemas.iter().map(|s| sqlrt_core::Value::String(s.clone())).collect();
    (placeholders.join(", "), params)
}

#[async_trait]
impl SchemaRepository for TiberiusSchemaRepository {
    #[tracing::instrument(skip(self, schemas))]
    async fn get_all_schema_metadata(
        &self,
        schemas: &[String],
        instance_id: &InstanceId,
    ) -> Result<SchemaMetadataBatch> {
        if schemas.is_empty() {
            return Ok(SchemaMetadataBatch::default());
        }
        let (in_list, params) = in_clause_params(schemas);

        tracing::debug!(instance = %instance_id, schema_count = schemas.len(), "running schema discovery batch");

        // Five separate round trips, not one server-side batch — `Connection`
        // has no multi-resultset primitive (see DESIGN.md). Wrapping them in an
        // explicit transaction at least gives the batch a consistent snapshot
        // under the default READ COMMITTED isolation, instead of each query
        // seeing a potentially different commit of the catalog views.
        self.connection.execute("BEGIN TRANSACTION", &[]).await?;
        let batch_result = self.run_batch_queries(&in_list, &params).await;
        match batch_result {
            Ok(batch) => {
                self.connection.execute("COMMIT TRANSACTION", &[]).await?;
                Ok(batch)
            }
            Err(err) => {
                let _ = self.connection.execute("ROLLBACK TRANSACTION", &[]).await;
                Err(err)
            }
        }
    }

    async fn get_sp_metadata(&self, name: &str, _instance_id: &InstanceId) -> Result<Vec<SpParameter>> {
        let object_name = sqlrt_core::ObjectName::normalise(name);
        let result = self
            .connection
            .query(
                single_object_parameters_query(),
                &[
                    sqlrt_core::Value::String(object_name.schema().to_string()),
                    sqlrt_core::Value::String(object_name.name().to_string()),
                ],
            )
            .await?;
        Ok(result.rows.iter().map(row_to_sp_parameter_single).collect())
    }

    async fn get_tvp_metadata(&self, name: &str, _instance_id: &InstanceId) -> Result<Vec<TvpColumn>> {
        let object_name = sqlrt_core::ObjectName::normalise(name);
        let result = self
            .connection
            .query(
                single_tvp_columns_query(),
                &[
                    sqlrt_core::Value::String(object_name.schema().to_string()),
                    sqlrt_core::Value::String(object_name.name().to_string()),
                ],
            )
            .await?;
        Ok(result.rows.iter().map(row_to_tvp_column_single).collect())
    }

    async fn get_object_version(&self, name: &str, _instance_id: &InstanceId) -> Result<i64> {
        let object_name = sqlrt_core::ObjectName::normalise(name);
        let result = self
            .connection
            .query(
                "SELECT CAST(DATEDIFF(SECOND, '20000101', p.modify_date) AS BIGINT)
                 FROM sys.procedures p
                 INNER JOIN sys.schemas s ON p.schema_id = s.schema_id
                 WHERE s.name = @P1 AND p.name = @P2",
                &[
                    sqlrt_core::Value::String(object_name.schema().to_string()),
                    sqlrt_core::Value::String(object_name.name().to_string()),
                ],
            )
            .await?;
        Ok(result
            .rows
            .first()
            .and_then(|r| r.get(0))
            .and_then(|v| v.as_i64())
            .unwrap_or(sqlrt_core::VERSION_NOT_FOUND))
    }

    async fn get_tvp_version(&self, name: &str, _instance_id: &InstanceId) -> Result<i64> {
        let object_name = sqlrt_core::ObjectName::normalise(name);
        let result = self
            .connection
            .query(
                "SELECT CAST(DATEDIFF(SECOND, '20000101', tt.create_date) AS BIGINT)
                 FROM sys.table_types tt
                 INNER JOIN sys.schemas s ON tt.schema_id = s.schema_id
                 WHERE s.name = @P1 AND tt.name = @P2",
                &[
                    sqlrt_core::Value::String(object_name.schema().to_string()),
                    sqlrt_core::Value::String(object_name.name().to_string()),
                ],
            )
            .await?;
        Ok(result
            .rows
            .first()
            .and_then(|r| r.get(0))
            .and_then(|v| v.as_i64())
            .unwrap_or(sqlrt_core::VERSION_NOT_FOUND))
    }
}

fn row_to_sp_parameter(row: &sqlrt_core::Row) -> SpParameter {
    SpParameter {
        name: row.get(2).and_then(|v| v.as_str()).unwrap_or("").trim_start_matches('@').to_string(),
        udt_type_name: row.get(3).and_then(|v| v.as_str()).map(|s| s.to_string()),
        size: row.get(7).and_then(|v| v.as_i64()).unwrap_or(0) as i32,
        sql_type: row.get(4).and_then(|v| v.as_str()).unwrap_or("").to_string(),
        direction: direction_from_bool(row.get(9)),
        precision: row.get(5).and_then(|v| v.as_i64()).unwrap_or(0) as u8,
        scale: row.get(6).and_then(|v| v.as_i64()).unwrap_or(0) as u8,
        is_nullable: as_bool(row.get(8)),
        has_default: as_bool(row.get(10)),
    }
}

fn row_to_sp_parameter_single(row: &sqlrt_core::Row) -> SpParameter {
    SpParameter {
        name: row.get(0).and_then(|v| v.as_str()).unwrap_or("").trim_start_matches('@').to_string(),
        udt_type_name: row.get(1).and_then(|v| v.as_str()).map(|s| s.to_string()),
        size: row.get(5).and_then(|v| v.as_i64()).unwrap_or(0) as i32,
        sql_type: row.get(2).and_then(|v| v.as_str()).unwrap_or("").to_string(),
        direction: direction_from_bool(row.get(7)),
        precision: row.get(3).and_then(|v| v.as_i64()).unwrap_or(0) as u8,
        scale: row.get(4).and_then(|v| v.as_i64()).unwrap_or(0) as u8,
        is_nullable: as_bool(row.get(6)),
        has_default: as_bool(row.get(8)),
    }
}

fn row_to_tvp_column(row: &sqlrt_core::Row) -> TvpColumn {
    let name = row.get(2).and_then(|v| v.as_str()).unwrap_or("").to_string();
    let ordinal = row.get(1).and_then(|v| v.as_i64()).unwrap_or(0) as usize;
    let sql_type = row.get(3).and_then(|v| v.as_str()).unwrap_or("").to_string();
    let mut column = TvpColumn::new(name, ordinal, sql_type);
    column.precision = row.get(4).and_then(|v| v.as_i64()).unwrap_or(0) as u8;
    column.scale = row.get(5).and_then(|v| v.as_i64()).unwrap_or(0) as u8;
    column.max_length = row.get(6).and_then(|v| v.as_i64()).unwrap_or(-1) as i32;
    column.is_nullable = as_bool(row.get(7));
    column.is_identity = as_bool(row.get(8));
    column.is_computed = as_bool(row.get(9));
    column
}

fn row_to_tvp_column_single(row: &sqlrt_core::Row) -> TvpColumn {
    let name = row.get(0).and_then(|v| v.as_str()).unwrap_or("").to_string();
    let ordinal = row.get(1).and_then(|v| v.as_i64()).unwrap_or(0) as usize;
    let sql_type = row.get(2).and_then(|v| v.as_str()).unwrap_or("").to_string();
    let mut column = TvpColumn::new(name, ordinal, sql_type);
    column.precision = row.get(3).and_then(|v| v.as_i64()).unwrap_or(0) as u8;
    column.scale = row.get(4).and_then(|v| v.as_i64()).unwrap_or(0) as u8;
    column.max_length = row.get(5).and_then(|v| v.as_i64()).unwrap_or(-1) as i32;
    column.is_nullable = as_bool(row.get(6));
    column.is_identity = as_bool(row.get(7));
    column.is_computed = as_bool(row.get(8));
    column
}

fn as_bool(value: Option<&sqlrt_core::Value>) -> bool {
    matches!(value, Some(sqlrt_core::Value::Bool(true)) | Some(sqlrt_core::Value::Int32(1)))
}

fn direction_from_bool(is_output: Option<&sqlrt_core::Value>) -> ParameterDirection {
    if as_bool(is_output) {
        ParameterDirection::Out
    } else {
        ParameterDirection::In
    }
}

fn sp_versions_query(in_list: &str) -> String {
    format!(
        "SELECT s.name + '.' + p.name AS name,
                CAST(DATEDIFF(SECOND, '20000101', p.modify_date) AS BIGINT) AS version_token
         FROM sys.procedures p
         INNER JOIN sys.schemas s ON p.schema_id = s.schema_id
         WHERE s.name IN ({in_list})
         ORDER BY name"
    )
}

fn sp_parameters_query(in_list: &str) -> String {
    format!(
        "SELECT s.name + '.' + p.name AS sp_name, par.parameter_id AS ordinal, par.name AS param_name,
                TYPE_NAME(par.user_type_id) AS udt_type_name, TYPE_NAME(par.system_type_id) AS sql_type_name,
                par.precision, par.scale, par.max_length, par.is_nullable, par.is_output, par.has_default_value
         FROM sys.parameters par
         INNER JOIN sys.procedures p ON par.object_id = p.object_id
         INNER JOIN sys.schemas s ON p.schema_id = s.schema_id
         WHERE s.name IN ({in_list}) AND par.parameter_id > 0
         ORDER BY sp_name, ordinal"
    )
}

fn tvp_versions_query(in_list: &str) -> String {
    format!(
        "SELECT s.name + '.' + tt.name AS name,
                CAST(DATEDIFF(SECOND, '20000101', tt.create_date) AS BIGINT) AS version_token
         FROM sys.table_types tt
         INNER JOIN sys.schemas s ON tt.schema_id = s.schema_id
         WHERE s.name IN ({in_list})
         ORDER BY name"
    )
}

fn tvp_columns_query(in_list: &str) -> String {
    format!(
        "SELECT s.name + '.' + tt.name AS tvp_name, c.column_id AS ordinal, c.name AS column_name,
                TYPE_NAME(c.user_type_id) AS sql_type_name, c.precision, c.scale, c.max_length,
                c.is_nullable, c.is_identity, c.is_computed
         FROM sys.columns c
         INNER JOIN sys.table_types tt ON c.object_id = tt.type_table_object_id
         INNER JOIN sys.schemas s ON tt.schema_id = s.schema_id
         WHERE s.name IN ({in_list})
         ORDER BY tvp_name, ordinal"
    )
}

fn found_schemas_query(in_list: &str) -> String {
    format!("SELECT DISTINCT s.name FROM sys.schemas s WHERE s.name IN ({in_list})")
}

fn single_object_parameters_query() -> &'static str {
    "SELECT par.name AS param_name, TYPE_NAME(par.user_type_id) AS udt_type_name,
            TYPE_NAME(par.system_type_id) AS sql_type_name, par.precision, par.scale,
            par.max_length, par.is_nullable, par.is_output, par.has_default_value
     FROM sys.parameters par
     INNER JOIN sys.procedures p ON par.object_id = p.object_id
     INNER JOIN sys.schemas s ON p.schema_id = s.schema_id
     WHERE s.name = @P1 AND p.name = @P2 AND par.parameter_id > 0
     ORDER BY par.parameter_id"
}

fn single_tvp_columns_query() -> &'static str {
    "SELECT c.name AS column_name, c.column_id AS ordinal, TYPE_NAME(c.user_type_id) AS sql_type_name,
            c.precision, c.scale, c.max_length, c.is_nullable, c.is_identity, c.is_computed
     FROM sys.columns c
     INNER JOIN sys.table_types tt ON c.object_id = tt.type_table_object_id
     INNER JOIN sys.schemas s ON tt.schema_id = s.schema_id
     WHERE s.name = @P1 AND tt.name = @P2
     ORDER BY c.column_id"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_clause_params_numbers_placeholders_from_one() {
        let (in_list, params) = in_clause_params(&["dbo".to_string(), "core".to_string()]);
        assert_eq!(in_list, "@P1, @P2");
        assert_eq!(params.len(), 2);
    }
}
