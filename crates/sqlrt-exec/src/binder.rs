//! Parameter binder (C3, spec §4.3): validates and coerces caller-supplied
//! values against a stored procedure's known schema before handing them to
//! the driver, and builds the positional `EXEC` command text the
//! `Connection` trait's `&[Value]`-only call shape requires.

use chrono::Datelike;
use sqlrt_accessors::{get_accessors, RowShape};
use sqlrt_core::{Error, ObjectName, Result, SpParameter, TvpSchema, Value};
use sqlrt_tvp::{ColumnData, ColumnarReader, ValidationMode};
use std::sync::Arc;

/// Whether a missing required parameter is an error. Strict checking is the
/// default for stored-procedure calls; a caller that wants to rely on the
/// server-side default entirely can relax this.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NullChecking {
    Strict,
    Lenient,
}

/// A single scalar parameter after binding: validated, range-checked, and
/// coerced into the form the driver will send over the wire.
#[derive(Debug, Clone)]
pub struct BoundParameter {
    pub name: String,
    pub value: Value,
}

const LEGACY_DATETIME_TYPES: [&str; 2] = ["datetime", "smalldatetime"];
const DECIMAL_FAMILY: [&str; 4] = ["decimal", "numeric", "money", "smallmoney"];
const STRING_FAMILY: [&str; 6] = ["varchar", "nvarchar", "char", "nchar", "text", "ntext"];

/// Binds `supplied` values against `parameters` (as returned by
/// `SpSchema::parameters`). TVP-typed parameters are never coerced here —
/// the caller must have already produced their `Value::Tvp(..)` via
/// [`bind_tvp_value`], which runs the structural validation and columnar
/// binding [`bind_tvp_parameter`] performs; this function just carries that
/// value through in the parameter's declared position. Scalar parameters
/// absent from `supplied` are treated as `Value::Null`, which only passes
/// when the declared parameter is nullable, has a server-side default, or
/// `null_checking` is [`NullChecking::Lenient`].
pub fn bind_sp_parameters(
    parameters: &[SpParameter],
    supplied: &[(String, Value)],
    null_checking: NullChecking,
) -> Result<Vec<BoundParameter>> {
    let mut bound = Vec::with_capacity(parameters.len());
    for param in parameters {
        let supplied_value = supplied
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(&param.name))
            .map(|(_, value)| value.clone());

        if let Some(udt_type_name) = &param.udt_type_name {
            bound.push(bind_tvp_typed_parameter(param, udt_type_name, supplied_value, null_checking)?);
            continue;
        }

        let supplied_value = supplied_value.unwrap_or(Value::Null);
        if supplied_value.is_null()
            && !param.is_nullable
            && !param.has_default
            && null_checking == NullChecking::Strict
        {
            return Err(Error::ParameterMissing(param.name.clone()));
        }

        let coerced = coerce_and_check(param, supplied_value)?;
        bound.push(BoundParameter { name: param.name.clone(), value: coerced });
    }
    Ok(bound)
}

/// A TVP-typed parameter must already carry a `Value::Tvp(..)` built by
/// [`bind_tvp_value`] — there is no scalar coercion to fall back to for a
/// rowset. Missing-under-strict and wrong-shape both surface as binder
/// errors rather than being silently dropped, which is what the skip this
/// function replaces used to do.
fn bind_tvp_typed_parameter(
    param: &SpParameter,
    udt_type_name: &str,
    supplied_value: Option<Value>,
    null_checking: NullChecking,
) -> Result<BoundParameter> {
    match supplied_value {
        Some(value @ Value::Tvp(_)) => Ok(BoundParameter { name: param.name.clone(), value }),
        Some(Value::Null) | None => {
            if null_checking == NullChecking::Strict && !param.is_nullable && !param.has_default {
                return Err(Error::ParameterMissing(param.name.clone()));
            }
            Ok(BoundParameter { name: param.name.clone(), value: Value::Null })
        }
        Some(other) => Err(Error::Internal(format!(
            "parameter '{}' is TVP-typed ({udt_type_name}) and must be bound via bind_tvp_value, got {other:?}",
            param.name
        ))),
    }
}

fn coerce_and_check(param: &SpParameter, value: Value) -> Result<Value> {
    if value.is_null() {
        return Ok(value);
    }

    let sql_type = param.sql_type.to_ascii_lowercase();

    // Non-recognised complex values fall back to a JSON wide-character
    // string when the target column is itself string-shaped.
    if let Value::Json(json) = &value {
        if STRING_FAMILY.contains(&sql_type.as_str()) {
            return Ok(Value::String(json.to_string()));
        }
    }

    if DECIMAL_FAMILY.contains(&sql_type.as_str()) {
        if let Value::Decimal(text) = &value {
            check_decimal_overflow(&param.name, text, param.precision, param.scale)?;
        }
    }

    match sql_type.as_str() {
        "tinyint" => check_integer_range(&param.name, &value, 0, 255),
        "smallint" => check_integer_range(&param.name, &value, i16::MIN as i64, i16::MAX as i64),
        "int" => check_integer_range(&param.name, &value, i32::MIN as i64, i32::MAX as i64),
        _ => Ok(()),
    }?;

    if LEGACY_DATETIME_TYPES.contains(&sql_type.as_str()) {
        if let Value::DateTime(dt) = &value {
            if dt.date().year() < 1753 {
                return Err(Error::ValueOverflow {
                    param_name: param.name.clone(),
                    constraint: "legacy datetime cannot represent years before 1753".to_string(),
                });
            }
        }
    }

    Ok(value)
}

fn check_integer_range(param_name: &str, value: &Value, min: i64, max: i64) -> Result<()> {
    let Some(n) = value.as_i64() else { return Ok(()) };
    if n < min || n > max {
        return Err(Error::ValueOverflow {
            param_name: param_name.to_string(),
            constraint: format!("{n} is outside the representable range [{min}, {max}]"),
        });
    }
    Ok(())
}

/// `Decimal(precision, scale)` constrains the number of digits to the left
/// of the decimal point to `precision - scale` (spec §4.3, §8 boundary
/// case: `Decimal(4,2)` bound with `100.00` overflows).
fn check_decimal_overflow(param_name: &str, text: &str, precision: u8, scale: u8) -> Result<()> {
    let unsigned = text.strip_prefix('-').unwrap_or(text);
    let integer_part = unsigned.split('.').next().unwrap_or(unsigned);
    let integer_digits = integer_part.chars().filter(|c| c.is_ascii_digit()).count();
    let max_integer_digits = precision.saturating_sub(scale) as usize;
    if integer_digits > max_integer_digits {
        return Err(Error::ValueOverflow {
            param_name: param_name.to_string(),
            constraint: format!(
                "{integer_digits} integer digits exceed the {max_integer_digits} allowed by decimal({precision},{scale})"
            ),
        });
    }
    Ok(())
}

/// Converts a sequence of row-type values into a TVP's columnar wire
/// representation (C1 + C2, spec §4.3's TVP-binding clause), structurally
/// validated against the live DB schema via C9 unless already validated.
pub fn bind_tvp_parameter<T: RowShape>(
    rows: &[T],
    tvp_name: &str,
    tvp_schema: &TvpSchema,
    mode: ValidationMode,
) -> Result<ColumnarReader> {
    let accessors = get_accessors::<T>()?;
    sqlrt_tvp::validate(&accessors, tvp_name, &tvp_schema.columns, mode)?;

    let schema_table = accessors.schema_table().to_vec();
    let mut columns: Vec<ColumnData> = schema_table
        .iter()
        .map(|col| ColumnData::new_for_type(col.data_type))
        .collect();

    for row in rows {
        for (ordinal, column) in columns.iter_mut().enumerate() {
            let value = accessors.get(row, ordinal).unwrap_or(Value::Null);
            column.push_value(value)?;
        }
    }

    ColumnarReader::new(columns, schema_table)
}

/// [`bind_tvp_parameter`] plus the flattening step that lets the result
/// travel through the `Connection` trait's `&[Value]`-only call shape:
/// builds the columnar reader, drains it into a row-oriented
/// [`sqlrt_core::TvpPayload`], and wraps it as the `Value::Tvp` a caller
/// puts straight into a `Parameters` bag alongside the request's other
/// named arguments.
pub fn bind_tvp_value<T: RowShape>(
    rows: &[T],
    tvp_name: &str,
    tvp_schema: &TvpSchema,
    mode: ValidationMode,
) -> Result<Value> {
    let reader = bind_tvp_parameter(rows, tvp_name, tvp_schema, mode)?;
    let payload = reader.into_tvp_payload(tvp_name)?;
    Ok(Value::Tvp(Arc::new(payload)))
}

/// Builds `EXEC [schema].[name] @Param1 = @P1, @Param2 = @P2, ...` text
/// alongside the positional value list the driver's `&[Value]` call shape
/// expects, in the same order.
pub fn build_sp_command_text(object: &ObjectName, bound: &[BoundParameter]) -> (String, Vec<Value>) {
    let mut text = format!("EXEC {object}");
    let mut values = Vec::with_capacity(bound.len());
    for (i, param) in bound.iter().enumerate() {
        let placeholder = i + 1;
        if i == 0 {
            text.push(' ');
        } else {
            text.push_str(", ");
        }
        text.push_str(&format!("@{} = @P{placeholder}", param.name));
        values.push(param.value.clone());
    }
    (text, values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlrt_core::ParameterDirection;

    fn param(name: &str, sql_type: &str, nullable: bool, precision: u8, scale: u8) -> SpParameter {
        SpParameter {
            name: name.to_string(),
            udt_type_name: None,
            size: -1,
            sql_type: sql_type.to_string(),
            direction: ParameterDirection::In,
            precision,
            scale,
            is_nullable: nullable,
            has_default: false,
        }
    }

    #[test]
    fn required_parameter_missing_under_strict_checking() {
        let params = vec![param("UserId", "int", false, 0, 0)];
        let err = bind_sp_parameters(&params, &[], NullChecking::Strict).unwrap_err();
        assert!(matches!(err, Error::ParameterMissing(name) if name == "UserId"));
    }

    #[test]
    fn missing_nullable_parameter_binds_as_null() {
        let params = vec![param("Note", "nvarchar", true, 0, 0)];
        let bound = bind_sp_parameters(&params, &[], NullChecking::Strict).unwrap();
        assert_eq!(bound[0].value, Value::Null);
    }

    #[test]
    fn decimal_overflow_is_rejected() {
        let params = vec![param("Amount", "decimal", false, 4, 2)];
        let supplied = vec![("Amount".to_string(), Value::Decimal("100.00".to_string()))];
        let err = bind_sp_parameters(&params, &supplied, NullChecking::Strict).unwrap_err();
        assert!(matches!(err, Error::ValueOverflow { .. }));
    }

    #[test]
    fn decimal_within_bounds_is_accepted() {
        let params = vec![param("Amount", "decimal", false, 4, 2)];
        let supplied = vec![("Amount".to_string(), Value::Decimal("12.34".to_string()))];
        let bound = bind_sp_parameters(&params, &supplied, NullChecking::Strict).unwrap();
        assert_eq!(bound[0].value, Value::Decimal("12.34".to_string()));
    }

    #[test]
    fn small_integer_range_is_enforced() {
        let params = vec![param("Flag", "tinyint", false, 0, 0)];
        let supplied = vec![("Flag".to_string(), Value::Int32(300))];
        let err = bind_sp_parameters(&params, &supplied, NullChecking::Strict).unwrap_err();
        assert!(matches!(err, Error::ValueOverflow { .. }));
    }

    #[test]
    fn pre_1753_legacy_datetime_overflows() {
        let params = vec![param("CreatedAt", "datetime", false, 0, 0)];
        let ancient = chrono::NaiveDate::from_ymd_opt(1700, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        let supplied = vec![("CreatedAt".to_string(), Value::DateTime(ancient))];
        let err = bind_sp_parameters(&params, &supplied, NullChecking::Strict).unwrap_err();
        assert!(matches!(err, Error::ValueOverflow { .. }));
    }

    #[test]
    fn json_fallback_for_complex_values_into_string_columns() {
        let params = vec![param("Payload", "nvarchar", false, 0, 0)];
        let supplied = vec![("Payload".to_string(), Value::Json(serde_json::json!({"a": 1})))];
        let bound = bind_sp_parameters(&params, &supplied, NullChecking::Strict).unwrap();
        assert!(matches!(&bound[0].value, Value::String(s) if s.contains("\"a\"")));
    }

    fn tvp_param(name: &str, nullable: bool) -> SpParameter {
        let mut p = param(name, "TableType", nullable, 0, 0);
        p.udt_type_name = Some("dbo.ItemTableType".to_string());
        p
    }

    fn sample_tvp_value() -> Value {
        Value::Tvp(std::sync::Arc::new(sqlrt_core::TvpPayload {
            udt_type_name: "dbo.ItemTableType".to_string(),
            columns: vec![],
            rows: vec![],
        }))
    }

    #[test]
    fn tvp_typed_parameter_passes_its_bound_value_through() {
        let params = vec![tvp_param("Items", false)];
        let supplied = vec![("Items".to_string(), sample_tvp_value())];
        let bound = bind_sp_parameters(&params, &supplied, NullChecking::Strict).unwrap();
        assert!(matches!(&bound[0].value, Value::Tvp(_)));
    }

    #[test]
    fn required_tvp_parameter_missing_under_strict_checking() {
        let params = vec![tvp_param("Items", false)];
        let err = bind_sp_parameters(&params, &[], NullChecking::Strict).unwrap_err();
        assert!(matches!(err, Error::ParameterMissing(name) if name == "Items"));
    }

    #[test]
    fn missing_nullable_tvp_parameter_binds_as_null() {
        let params = vec![tvp_param("Items", true)];
        let bound = bind_sp_parameters(&params, &[], NullChecking::Strict).unwrap();
        assert_eq!(bound[0].value, Value::Null);
    }

    #[test]
    fn a_scalar_value_supplied_for_a_tvp_typed_parameter_is_rejected() {
        let params = vec![tvp_param("Items", false)];
        let supplied = vec![("Items".to_string(), Value::Int32(1))];
        let err = bind_sp_parameters(&params, &supplied, NullChecking::Strict).unwrap_err();
        assert!(matches!(err, Error::Internal(_)));
    }

    #[test]
    fn command_text_builds_named_positional_placeholders() {
        let object = ObjectName::normalise("usp_GetUser");
        let bound = vec![
            BoundParameter { name: "UserId".to_string(), value: Value::Int32(1) },
            BoundParameter { name: "Active".to_string(), value: Value::Bool(true) },
        ];
        let (text, values) = build_sp_command_text(&object, &bound);
        assert_eq!(text, "EXEC dbo.usp_GetUser @UserId = @P1, @Active = @P2");
        assert_eq!(values, vec![Value::Int32(1), Value::Bool(true)]);
    }
}
