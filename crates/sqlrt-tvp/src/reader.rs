//! `ColumnarReader` (spec §4.2): a forward-only row-reader over N column
//! buffers, consumed by the driver's bulk/TVP path.

use crate::column_data::ColumnData;
use sqlrt_accessors::{ColumnDataType, SchemaColumn};
use sqlrt_core::{ColumnMeta, Error, Result, TvpPayload, Value};
use std::collections::HashMap;

pub struct ColumnarReader {
    columns: Vec<ColumnData>,
    ordinal_map: HashMap<String, usize>,
    schema_table: Vec<SchemaColumn>,
    row_count: usize,
    current_row: i64,
    is_closed: bool,
}

impl ColumnarReader {
    /// `columns[i]` must correspond to `schema_table[i]`; all columns must
    /// report the same length, which becomes `row_count`.
    pub fn new(columns: Vec<ColumnData>, schema_table: Vec<SchemaColumn>) -> Result<Self> {
        if columns.len() != schema_table.len() {
            return Err(Error::Internal(format!(
                "columnar reader column/schema length mismatch: {} columns, {} schema entries",
                columns.len(),
                schema_table.len()
            )));
        }
        let row_count = columns.first().map(ColumnData::len).unwrap_or(0);
        for (idx, col) in columns.iter().enumerate() {
            if col.len() != row_count {
                return Err(Error::Internal(format!(
                    "columnar reader column {idx} has {} rows, expected {row_count}",
                    col.len()
                )));
            }
        }
        let ordinal_map = schema_table
            .iter()
            .enumerate()
            .map(|(i, c)| (c.column_name.to_ascii_lowercase(), i))
            .collect();
        Ok(Self {
            columns,
            ordinal_map,
            schema_table,
            row_count,
            current_row: -1,
            is_closed: false,
        })
    }

    pub fn schema_table(&self) -> &[SchemaColumn] {
        &self.schema_table
    }

    pub fn row_count(&self) -> usize {
        self.row_count
    }

    pub fn is_closed(&self) -> bool {
        self.is_closed
    }

    /// Advances the cursor and reports whether another row exists.
    pub fn read(&mut self) -> Result<bool> {
        if self.is_closed {
            return Err(Error::Internal("read on a disposed ColumnarReader".to_string()));
        }
        if (self.current_row + 1) as usize >= self.row_count {
            self.current_row = self.row_count as i64;
            return Ok(false);
        }
        self.current_row += 1;
        Ok(true)
    }

    pub fn get_value(&self, ordinal: usize) -> Result<Value> {
        self.current_row_checked()?;
        self.columns
            .get(ordinal)
            .ok_or_else(|| Error::Internal(format!("column ordinal {ordinal} out of range")))?
            .get_value(self.current_row as usize)
    }

    pub fn get_by_name(&self, name: &str) -> Result<Value> {
        let ordinal = *self
            .ordinal_map
            .get(&name.to_ascii_lowercase())
            .ok_or_else(|| Error::Internal(format!("no such column '{name}'")))?;
        self.get_value(ordinal)
    }

    fn current_row_checked(&self) -> Result<()> {
        if self.current_row < 0 || self.current_row as usize >= self.row_count {
            return Err(Error::Internal(
                "ColumnarReader read before the first row or past the last one".to_string(),
            ));
        }
        Ok(())
    }

    /// Drains every remaining row into a row-oriented [`TvpPayload`] — the
    /// shape [`Value::Tvp`] carries across the `Connection` trait's
    /// `&[Value]`-only call boundary, since `sqlrt_core::Value` cannot hold
    /// a `ColumnarReader` directly without a crate cycle. Consumes the
    /// reader; any rows already read via [`Self::read`] before this call
    /// are skipped.
    pub fn into_tvp_payload(mut self, udt_type_name: impl Into<String>) -> Result<TvpPayload> {
        let columns: Vec<ColumnMeta> = self
            .schema_table
            .iter()
            .enumerate()
            .map(|(ordinal, col)| ColumnMeta {
                name: col.column_name.clone(),
                ordinal,
                sql_type: sql_type_name(col.data_type).to_string(),
                nullable: col.allow_db_null,
                max_length: Some(col.column_size),
                precision: Some(col.numeric_precision),
                scale: Some(col.numeric_scale),
            })
            .collect();

        let column_count = self.columns.len();
        let mut rows = Vec::with_capacity(self.row_count);
        while self.read()? {
            let mut row = Vec::with_capacity(column_count);
            for ordinal in 0..column_count {
                row.push(self.get_value(ordinal)?);
            }
            rows.push(row);
        }

        Ok(TvpPayload { udt_type_name: udt_type_name.into(), columns, rows })
    }

    /// Disposes every column buffer exactly once, then marks the reader
    /// closed. Idempotent.
    pub fn dispose(&mut self) {
        if self.is_closed {
            return;
        }
        for column in &mut self.columns {
            column.dispose();
        }
        self.is_closed = true;
    }
}

impl Drop for ColumnarReader {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// A representative SQL Server type name per [`ColumnDataType`], used only
/// to describe a flattened [`TvpPayload`]'s columns; the server itself is
/// the authority on the table type's real column types.
fn sql_type_name(data_type: ColumnDataType) -> &'static str {
    match data_type {
        ColumnDataType::Bool => "bit",
        ColumnDataType::I8 => "tinyint",
        ColumnDataType::I16 => "smallint",
        ColumnDataType::I32 => "int",
        ColumnDataType::I64 => "bigint",
        ColumnDataType::F32 => "real",
        ColumnDataType::F64 => "float",
        ColumnDataType::Decimal => "decimal",
        ColumnDataType::String => "nvarchar",
        ColumnDataType::Bytes => "varbinary",
        ColumnDataType::Uuid => "uniqueidentifier",
        ColumnDataType::Date => "date",
        ColumnDataType::Time => "time",
        ColumnDataType::DateTime => "datetime2",
        ColumnDataType::DateTimeUtc => "datetimeoffset",
        ColumnDataType::Json => "nvarchar",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::ColumnBuffer;
    use pretty_assertions::assert_eq;

    fn schema_column(name: &str) -> SchemaColumn {
        SchemaColumn {
            column_name: name.to_string(),
            ordinal: 0,
            data_type: ColumnDataType::I32,
            allow_db_null: false,
            column_size: -1,
            numeric_precision: 0,
            numeric_scale: 0,
            is_unique: false,
            is_key: false,
            is_row_version: false,
            is_long: false,
            is_read_only: false,
            is_auto_increment: false,
        }
    }

    fn build_reader() -> ColumnarReader {
        let mut id_col = ColumnData::I32(ColumnBuffer::new());
        if let ColumnData::I32(b) = &mut id_col {
            b.push(Some(1)).unwrap();
            b.push(Some(2)).unwrap();
        }
        ColumnarReader::new(vec![id_col], vec![schema_column("Id")]).unwrap()
    }

    #[test]
    fn starts_before_the_first_row() {
        let mut reader = build_reader();
        assert!(reader.get_value(0).is_err());
        assert!(reader.read().unwrap());
        assert_eq!(reader.get_value(0).unwrap(), Value::Int32(1));
    }

    #[test]
    fn read_advances_monotonically_and_terminates() {
        let mut reader = build_reader();
        assert!(reader.read().unwrap());
        assert!(reader.read().unwrap());
        assert!(!reader.read().unwrap());
        assert!(!reader.read().unwrap());
    }

    #[test]
    fn get_by_name_is_case_insensitive() {
        let mut reader = build_reader();
        reader.read().unwrap();
        assert_eq!(reader.get_by_name("id").unwrap(), Value::Int32(1));
        assert_eq!(reader.get_by_name("ID").unwrap(), Value::Int32(1));
    }

    #[test]
    fn into_tvp_payload_flattens_every_row_in_order() {
        let reader = build_reader();
        let payload = reader.into_tvp_payload("dbo.IdTableType").unwrap();
        assert_eq!(payload.udt_type_name, "dbo.IdTableType");
        assert_eq!(payload.columns.len(), 1);
        assert_eq!(payload.columns[0].name, "Id");
        assert_eq!(payload.columns[0].sql_type, "int");
        assert_eq!(payload.rows, vec![vec![Value::Int32(1)], vec![Value::Int32(2)]]);
    }

    #[test]
    fn into_tvp_payload_skips_rows_already_consumed_via_read() {
        let mut reader = build_reader();
        reader.read().unwrap();
        let payload = reader.into_tvp_payload("dbo.IdTableType").unwrap();
        assert_eq!(payload.rows, vec![vec![Value::Int32(2)]]);
    }

    #[test]
    fn dispose_closes_the_reader_and_disposes_buffers() {
        let mut reader = build_reader();
        reader.read().unwrap();
        reader.dispose();
        assert!(reader.is_closed());
        assert!(reader.read().is_err());
        // Disposing twice must not panic.
        reader.dispose();
    }

    #[test]
    fn mismatched_column_and_schema_lengths_are_rejected() {
        let id_col = ColumnData::I32(ColumnBuffer::new());
        let err = ColumnarReader::new(vec![id_col], vec![]).unwrap_err();
        assert!(matches!(err, Error::Internal(_)));
    }
}
