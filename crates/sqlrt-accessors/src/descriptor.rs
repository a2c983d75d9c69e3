//! The trait a row type implements to describe its columns (spec §4.1, §9
//! "prefer a code-generation path ... keep a runtime fallback").
//!
//! Rust has no safe runtime reflection over arbitrary struct fields, so the
//! "runtime fallback that reflects over the row type" is resolved by
//! requiring `T: RowShape` — the trait a derive macro would generate.
//! [`crate::registry::get_accessors`] performs the ordering, validation and
//! schema-table synthesis work described in §4.1 lazily, the first time a
//! type is used, which is the spirit of the fallback even though the field
//! list itself is supplied by the type rather than discovered by reflection.

use sqlrt_core::Value;

/// The DB-facing type of a column, used to synthesize the schema table
/// (spec §4.1 step 4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnDataType {
    Bool,
    I8,
    I16,
    I32,
    I64,
    /// 16-bit floats are represented as 32-bit floats in the schema table;
    /// callers declare `F32` regardless of the in-memory width.
    F32,
    F64,
    Decimal,
    String,
    Bytes,
    Uuid,
    Date,
    Time,
    DateTime,
    DateTimeUtc,
    Json,
}

/// One column as declared by a row type's `RowShape::columns()`.
pub struct ColumnDescriptor<T> {
    pub name: &'static str,
    pub data_type: ColumnDataType,
    /// Reference type or `Option<_>` at the Rust level — drives
    /// `AllowDBNull` in the schema table.
    pub nullable: bool,
    /// Declared (precision, scale) for decimal/temporal columns, else
    /// `None` to fall back to the step-4 defaults (38, 4) / scale 7.
    pub precision_scale: Option<(u8, u8)>,
    /// Declared length annotation; `None` means the step-4 default of -1.
    pub length: Option<i32>,
    /// Optional SQL-type-name override (the row-type marker's annotation).
    pub sql_type_name_override: Option<&'static str>,
    pub get: fn(&T) -> Value,
}

impl<T> ColumnDescriptor<T> {
    pub fn new(name: &'static str, data_type: ColumnDataType, get: fn(&T) -> Value) -> Self {
        Self {
            name,
            data_type,
            nullable: false,
            precision_scale: None,
            length: None,
            sql_type_name_override: None,
            get,
        }
    }

    pub fn nullable(mut self, nullable: bool) -> Self {
        self.nullable = nullable;
        self
    }

    pub fn precision_scale(mut self, precision: u8, scale: u8) -> Self {
        self.precision_scale = Some((precision, scale));
        self
    }

    pub fn length(mut self, length: i32) -> Self {
        self.length = Some(length);
        self
    }
}

/// Implemented by any row type usable as a TVP row or mapped result row.
/// Analogous to the generated accessor in the host system; see module docs.
pub trait RowShape: Sized + 'static {
    /// An explicit DB-side type name override for the whole row (the
    /// row-type marker's optional SQL-type-name), if any.
    fn explicit_sql_type_name() -> Option<&'static str> {
        None
    }

    /// Column descriptors in declaration order. [`crate::registry`] sorts
    /// these ordinally by name (spec §4.1 rule 2) before publishing.
    fn columns() -> Vec<ColumnDescriptor<Self>>;
}
