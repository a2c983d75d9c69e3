//! TVP structural validator (C9, spec §4.9): compares a row type's
//! accessors against the DB-side table type before a TVP payload is sent.

use sqlrt_accessors::{Accessors, ColumnDataType, RowShape};
use sqlrt_core::{case_insensitive_hash, Error, Result, TvpColumn};

/// `Strict` propagates a validation failure; `LogOnly` logs it and still
/// marks the accessor validated so later calls skip re-checking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationMode {
    Strict,
    LogOnly,
}

/// Hashes are compared in groups of 8 — the width a 256-bit SIMD lane would
/// cover for 32-bit hash halves; stable Rust has no portable intrinsic for
/// this so the grouping is expressed as a plain loop with an early-exit
/// scalar fallback that pinpoints the exact ordinal on mismatch.
const HASH_BATCH: usize = 8;

/// Validates `T`'s accessors against `columns` (already ordered by
/// ordinal). Skips the check entirely once `accessors.is_validated()`.
#[tracing::instrument(skip(accessors, columns), fields(tvp_name, columns = columns.len()))]
pub fn validate<T: RowShape>(
    accessors: &Accessors<T>,
    tvp_name: &str,
    columns: &[TvpColumn],
    mode: ValidationMode,
) -> Result<()> {
    if accessors.is_validated() {
        return Ok(());
    }

    let properties = accessors.properties();
    if properties.len() != columns.len() {
        return finish(
            accessors,
            mode,
            Error::column_count_mismatch(tvp_name, properties.len(), columns.len()),
        );
    }

    let hashes: Vec<u64> = properties.iter().map(|name| case_insensitive_hash(name)).collect();
    if let Some(ordinal) = first_hash_mismatch(&hashes, columns) {
        return finish(
            accessors,
            mode,
            Error::column_name_mismatch(
                tvp_name,
                ordinal,
                properties[ordinal],
                columns[ordinal].name.clone(),
            ),
        );
    }

    let schema_table = accessors.schema_table();
    for (ordinal, (declared, column)) in schema_table.iter().zip(columns.iter()).enumerate() {
        if !is_assignable(declared.data_type, &column.sql_type) {
            return finish(
                accessors,
                mode,
                Error::type_mismatch(
                    tvp_name,
                    ordinal,
                    properties[ordinal],
                    format!("{:?}", declared.data_type),
                    column.sql_type.clone(),
                ),
            );
        }
    }

    accessors.mark_validated();
    Ok(())
}

/// Compares hashes `HASH_BATCH` at a time, falling back to a scalar scan
/// within the first mismatching batch to report the exact ordinal.
fn first_hash_mismatch(hashes: &[u64], columns: &[TvpColumn]) -> Option<usize> {
    for chunk_start in (0..hashes.len()).step_by(HASH_BATCH) {
        let chunk_end = (chunk_start + HASH_BATCH).min(hashes.len());
        let chunk_matches = hashes[chunk_start..chunk_end]
            .iter()
            .zip(&columns[chunk_start..chunk_end])
            .all(|(hash, column)| *hash == column.name_hash);
        if !chunk_matches {
            return (chunk_start..chunk_end).find(|&i| hashes[i] != columns[i].name_hash);
        }
    }
    None
}

fn finish<T: RowShape>(accessors: &Accessors<T>, mode: ValidationMode, err: Error) -> Result<()> {
    match mode {
        ValidationMode::Strict => Err(err),
        ValidationMode::LogOnly => {
            tracing::warn!(error = %err, "TVP structural validation failed, continuing in LogOnly mode");
            accessors.mark_validated();
            Ok(())
        }
    }
}

/// A fixed type-compatibility table: is a Rust-level column type assignable
/// to the named SQL Server type?
fn is_assignable(declared: ColumnDataType, sql_type: &str) -> bool {
    let sql_type = sql_type.to_ascii_lowercase();
    let sql_type = sql_type.as_str();
    match declared {
        ColumnDataType::Bool => matches!(sql_type, "bit"),
        ColumnDataType::I8 => matches!(sql_type, "tinyint"),
        ColumnDataType::I16 => matches!(sql_type, "smallint" | "tinyint"),
        ColumnDataType::I32 => matches!(sql_type, "int" | "smallint" | "tinyint"),
        ColumnDataType::I64 => matches!(sql_type, "bigint" | "int" | "smallint" | "tinyint"),
        ColumnDataType::F32 | ColumnDataType::F64 => matches!(sql_type, "real" | "float"),
        ColumnDataType::Decimal => matches!(sql_type, "decimal" | "numeric" | "money" | "smallmoney"),
        ColumnDataType::String => matches!(
            sql_type,
            "varchar" | "nvarchar" | "char" | "nchar" | "text" | "ntext" | "xml"
        ),
        ColumnDataType::Bytes => matches!(
            sql_type,
            "binary" | "varbinary" | "image" | "rowversion" | "timestamp"
        ),
        ColumnDataType::Uuid => matches!(sql_type, "uniqueidentifier"),
        ColumnDataType::Date => matches!(sql_type, "date"),
        ColumnDataType::Time => matches!(sql_type, "time"),
        ColumnDataType::DateTime => matches!(sql_type, "datetime" | "datetime2" | "smalldatetime"),
        ColumnDataType::DateTimeUtc => matches!(sql_type, "datetimeoffset"),
        ColumnDataType::Json => matches!(sql_type, "nvarchar" | "varchar" | "xml"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlrt_accessors::ColumnDescriptor;
    use sqlrt_core::Value;

    // Each test declares its own row type so the process-wide accessor
    // registry in `sqlrt-accessors` can't be shared (and raced) between
    // tests running concurrently in the same binary.
    macro_rules! widget_type {
        ($name:ident) => {
            struct $name {
                id: i32,
                name: String,
            }

            impl RowShape for $name {
                fn columns() -> Vec<ColumnDescriptor<Self>> {
                    vec![
                        ColumnDescriptor::new("Id", ColumnDataType::I32, |w| Value::Int32(w.id)),
                        ColumnDescriptor::new("Name", ColumnDataType::String, |w| {
                            Value::String(w.name.clone())
                        }),
                    ]
                }
            }
        };
    }

    fn tvp_column(name: &str, sql_type: &str) -> TvpColumn {
        TvpColumn::new(name.to_string(), 0, sql_type.to_string())
    }

    fn matching_columns() -> Vec<TvpColumn> {
        // Accessors order columns ordinally by name: "Id" < "Name".
        vec![tvp_column("Id", "int"), tvp_column("Name", "nvarchar")]
    }

    #[test]
    fn validates_successfully_and_marks_validated() {
        widget_type!(WidgetOk);
        let accessors = sqlrt_accessors::get_accessors::<WidgetOk>().unwrap();
        let result = validate(&accessors, "WidgetTvp", &matching_columns(), ValidationMode::Strict);
        assert!(result.is_ok());
        assert!(accessors.is_validated());
    }

    #[test]
    fn column_count_mismatch_is_rejected_in_strict_mode() {
        widget_type!(WidgetCountMismatch);
        let accessors = sqlrt_accessors::get_accessors::<WidgetCountMismatch>().unwrap();
        let columns = vec![tvp_column("Id", "int")];
        let err = validate(&accessors, "WidgetTvp", &columns, ValidationMode::Strict).unwrap_err();
        assert!(matches!(err, Error::SchemaValidation { .. }));
        assert!(!accessors.is_validated());
    }

    #[test]
    fn name_mismatch_reports_the_exact_ordinal() {
        widget_type!(WidgetNameMismatch);
        let accessors = sqlrt_accessors::get_accessors::<WidgetNameMismatch>().unwrap();
        let columns = vec![tvp_column("Id", "int"), tvp_column("Nope", "nvarchar")];
        let err = validate(&accessors, "WidgetTvp", &columns, ValidationMode::Strict).unwrap_err();
        match err {
            Error::SchemaValidation { ordinal, .. } => assert_eq!(ordinal, Some(1)),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn type_mismatch_is_rejected() {
        widget_type!(WidgetTypeMismatch);
        let accessors = sqlrt_accessors::get_accessors::<WidgetTypeMismatch>().unwrap();
        let columns = vec![tvp_column("Id", "datetime2"), tvp_column("Name", "nvarchar")];
        let err = validate(&accessors, "WidgetTvp", &columns, ValidationMode::Strict).unwrap_err();
        assert!(matches!(err, Error::SchemaValidation { .. }));
    }

    #[test]
    fn log_only_mode_swallows_failures_and_still_marks_validated() {
        widget_type!(WidgetLogOnly);
        let accessors = sqlrt_accessors::get_accessors::<WidgetLogOnly>().unwrap();
        let columns = vec![tvp_column("Id", "datetime2"), tvp_column("Name", "nvarchar")];
        let result = validate(&accessors, "WidgetTvp", &columns, ValidationMode::LogOnly);
        assert!(result.is_ok());
        assert!(accessors.is_validated());
    }

    #[test]
    fn already_validated_accessors_skip_the_check_entirely() {
        widget_type!(WidgetAlreadyValid);
        let accessors = sqlrt_accessors::get_accessors::<WidgetAlreadyValid>().unwrap();
        accessors.mark_validated();
        // Deliberately mismatched; should be ignored since already validated.
        let columns = vec![tvp_column("Id", "datetime2")];
        let result = validate(&accessors, "WidgetTvp", &columns, ValidationMode::Strict);
        assert!(result.is_ok());
    }
}
