//! Schema-table synthesis rules (spec §4.1 step 4): turns the Rust-level
//! column declarations into the `DataColumn`-shaped metadata a TVP needs to
//! describe itself to the wire.

use crate::descriptor::{ColumnDataType, ColumnDescriptor};

/// Decimal columns fall back to this (precision, scale) when the row type
/// doesn't declare one explicitly.
pub const DEFAULT_DECIMAL_PRECISION_SCALE: (u8, u8) = (38, 4);

/// Temporal columns (time/datetime2/datetimeoffset) default to fractional-
/// second scale 7 (100ns ticks) absent an explicit declaration.
pub const DEFAULT_TEMPORAL_SCALE: u8 = 7;

/// Columns without an explicit length annotation report -1, matching the
/// host's "unbounded/unknown" convention rather than guessing a size.
pub const DEFAULT_COLUMN_SIZE: i32 = -1;

#[derive(Debug, Clone, PartialEq)]
pub struct SchemaColumn {
    pub column_name: String,
    pub ordinal: usize,
    pub data_type: ColumnDataType,
    pub allow_db_null: bool,
    pub column_size: i32,
    pub numeric_precision: u8,
    pub numeric_scale: u8,
    /// Always `false`: row-type accessors declare no uniqueness, key,
    /// row-version, long-value, read-only or identity annotations.
    pub is_unique: bool,
    pub is_key: bool,
    pub is_row_version: bool,
    pub is_long: bool,
    pub is_read_only: bool,
    pub is_auto_increment: bool,
}

/// Builds the schema table from the already-ordered column descriptors.
/// `columns` must already be in final ordinal order; `ordinal` here is
/// simply the index into that slice.
pub fn synthesize<T>(columns: &[ColumnDescriptor<T>]) -> Vec<SchemaColumn> {
    columns
        .iter()
        .enumerate()
        .map(|(ordinal, col)| {
            let (numeric_precision, numeric_scale) = match col.data_type {
                ColumnDataType::Decimal => col
                    .precision_scale
                    .unwrap_or(DEFAULT_DECIMAL_PRECISION_SCALE),
                ColumnDataType::Time | ColumnDataType::DateTime | ColumnDataType::DateTimeUtc => {
                    col.precision_scale
                        .map(|(_, scale)| (0, scale))
                        .unwrap_or((0, DEFAULT_TEMPORAL_SCALE))
                }
                _ => (0, 0),
            };
            // 16-bit floats have no first-class wire representation; the
            // schema table always reports the 32-bit representation for
            // them (descriptor authors declare `F32` directly already, this
            // branch exists so the rule is enforced even if a future
            // variant for half-precision floats is added upstream).
            let data_type = col.data_type;
            SchemaColumn {
                column_name: col.name.to_string(),
                ordinal,
                data_type,
                allow_db_null: col.nullable,
                column_size: col.length.unwrap_or(DEFAULT_COLUMN_SIZE),
                numeric_precision,
                numeric_scale,
                is_unique: false,
                is_key: false,
                is_row_version: false,
                is_long: false,
                is_read_only: false,
                is_auto_increment: false,
            }
        })
        .collect()
}
