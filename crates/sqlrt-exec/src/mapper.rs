//! Row-to-result mapping (spec §4.13 step 5: "reflection-or-codegen; not
//! in the hard core"). [`FromRow`] is the seam a caller implements by hand
//! (or a future derive macro generates) for its own result types; this
//! crate only ships the scalar blanket impls `query`/`executeScalar` need.

use sqlrt_core::{Error, Result, Row, Value};

pub trait FromRow: Sized {
    fn from_row(row: &Row) -> Result<Self>;
}

impl FromRow for Row {
    fn from_row(row: &Row) -> Result<Self> {
        Ok(row.clone())
    }
}

macro_rules! impl_from_row_scalar {
    ($ty:ty, $variant:ident) => {
        impl FromRow for $ty {
            fn from_row(row: &Row) -> Result<Self> {
                match row.get(0) {
                    Some(Value::$variant(v)) => Ok(v.clone()),
                    Some(Value::Null) | None => Err(Error::Internal(format!(
                        "cannot map null column 0 into {}",
                        stringify!($ty)
                    ))),
                    Some(other) => Err(Error::Internal(format!(
                        "column 0 is {other:?}, expected {}",
                        stringify!($variant)
                    ))),
                }
            }
        }
    };
}

impl_from_row_scalar!(bool, Bool);
impl_from_row_scalar!(i8, Int8);
impl_from_row_scalar!(i16, Int16);
impl_from_row_scalar!(i32, Int32);
impl_from_row_scalar!(i64, Int64);
impl_from_row_scalar!(f32, Float32);
impl_from_row_scalar!(f64, Float64);
impl_from_row_scalar!(String, String);

impl<T: FromRow> FromRow for Option<T> {
    fn from_row(row: &Row) -> Result<Self> {
        if matches!(row.get(0), Some(Value::Null) | None) {
            return Ok(None);
        }
        T::from_row(row).map(Some)
    }
}

pub fn map_rows<R: FromRow>(rows: &[Row]) -> Result<Vec<R>> {
    rows.iter().map(R::from_row).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn row(values: Vec<Value>) -> Row {
        Row::new(Arc::new(vec!["c0".to_string()]), values)
    }

    #[test]
    fn maps_scalar_int_column() {
        let r = row(vec![Value::Int32(42)]);
        assert_eq!(i32::from_row(&r).unwrap(), 42);
    }

    #[test]
    fn null_scalar_errors_for_non_optional_target() {
        let r = row(vec![Value::Null]);
        assert!(i32::from_row(&r).is_err());
    }

    #[test]
    fn null_scalar_maps_to_none_for_optional_target() {
        let r = row(vec![Value::Null]);
        assert_eq!(Option::<i32>::from_row(&r).unwrap(), None);
    }

    #[test]
    fn type_mismatch_errors() {
        let r = row(vec![Value::String("oops".to_string())]);
        assert!(i32::from_row(&r).is_err());
    }
}
