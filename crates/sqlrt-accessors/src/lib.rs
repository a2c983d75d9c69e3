//! Row-accessor registry: the runtime substitute for a codegen'd ordinal
//! map, typed getters and schema table, keyed per row type (spec §4.1).

mod accessors;
mod descriptor;
mod registry;
mod schema_table;

pub use accessors::Accessors;
#[cfg(debug_assertions)]
pub use accessors::assert_accessors_match;
pub use descriptor::{ColumnDataType, ColumnDescriptor, RowShape};
pub use registry::{evict_if_oversized, get_accessors, registry_len};
pub use schema_table::{
    SchemaColumn, DEFAULT_COLUMN_SIZE, DEFAULT_DECIMAL_PRECISION_SCALE, DEFAULT_TEMPORAL_SCALE,
};

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use sqlrt_core::Value;

    struct Widget {
        id: i32,
        name: String,
        weight_kg: Option<f64>,
    }

    impl RowShape for Widget {
        fn columns() -> Vec<ColumnDescriptor<Self>> {
            vec![
                ColumnDescriptor::new("Id", ColumnDataType::I32, |w| Value::Int32(w.id)),
                ColumnDescriptor::new("Name", ColumnDataType::String, |w| {
                    Value::String(w.name.clone())
                })
                .length(256),
                ColumnDescriptor::new("WeightKg", ColumnDataType::F64, |w| {
                    w.weight_kg.map(Value::Float64).unwrap_or(Value::Null)
                })
                .nullable(true)
                .precision_scale(10, 3),
            ]
        }
    }

    struct NoColumns;

    impl RowShape for NoColumns {
        fn columns() -> Vec<ColumnDescriptor<Self>> {
            vec![]
        }
    }

    struct DuplicateName;

    impl RowShape for DuplicateName {
        fn columns() -> Vec<ColumnDescriptor<Self>> {
            vec![
                ColumnDescriptor::new("Id", ColumnDataType::I32, |_| Value::Null),
                ColumnDescriptor::new("id", ColumnDataType::I32, |_| Value::Null),
            ]
        }
    }

    #[test]
    fn orders_properties_ordinally_by_name() {
        registry::clear_for_test();
        let accessors = get_accessors::<Widget>().expect("builds");
        // "Id" < "Name" < "WeightKg" ordinally.
        assert_eq!(accessors.properties(), &["Id", "Name", "WeightKg"]);
        assert_eq!(accessors.ordinal_of("id"), Some(0));
        assert_eq!(accessors.ordinal_of("NAME"), Some(1));
        assert_eq!(accessors.ordinal_of("weightkg"), Some(2));
    }

    #[test]
    fn typed_getters_read_the_declared_values() {
        registry::clear_for_test();
        let accessors = get_accessors::<Widget>().expect("builds");
        let widget = Widget {
            id: 7,
            name: "bolt".to_string(),
            weight_kg: Some(0.5),
        };
        assert_eq!(accessors.get(&widget, 0), Some(Value::Int32(7)));
        assert_eq!(
            accessors.get_by_name(&widget, "Name"),
            Some(Value::String("bolt".to_string()))
        );
        assert_eq!(accessors.get_by_name(&widget, "WeightKg"), Some(Value::Float64(0.5)));
    }

    #[test]
    fn schema_table_applies_step_four_defaults() {
        registry::clear_for_test();
        let accessors = get_accessors::<Widget>().expect("builds");
        let table = accessors.schema_table();
        let weight = table.iter().find(|c| c.column_name == "WeightKg").unwrap();
        assert!(weight.allow_db_null);
        assert_eq!(weight.numeric_precision, 10);
        assert_eq!(weight.numeric_scale, 3);
        let id = table.iter().find(|c| c.column_name == "Id").unwrap();
        assert_eq!(id.column_size, DEFAULT_COLUMN_SIZE);
        assert!(!id.allow_db_null);
    }

    #[test]
    fn is_validated_is_false_until_marked() {
        registry::clear_for_test();
        let accessors = get_accessors::<Widget>().expect("builds");
        assert!(!accessors.is_validated());
        accessors.mark_validated();
        assert!(accessors.is_validated());
    }

    #[test]
    fn zero_properties_is_a_fatal_build_error() {
        registry::clear_for_test();
        let err = get_accessors::<NoColumns>().expect_err("must fail");
        assert!(matches!(err, sqlrt_core::Error::Internal(_)));
    }

    #[test]
    fn duplicate_column_names_are_rejected_case_insensitively() {
        registry::clear_for_test();
        let err = get_accessors::<DuplicateName>().expect_err("must fail");
        assert!(matches!(err, sqlrt_core::Error::Internal(_)));
    }

    #[test]
    fn repeated_lookups_return_the_same_cached_instance() {
        registry::clear_for_test();
        let first = get_accessors::<Widget>().expect("builds");
        let second = get_accessors::<Widget>().expect("builds");
        assert!(std::sync::Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn equivalence_check_accepts_two_builds_of_the_same_type() {
        registry::clear_for_test();
        let a = Accessors::<Widget>::build().expect("builds");
        let b = Accessors::<Widget>::build().expect("builds");
        assert_accessors_match(&a, &b);
    }

    #[test]
    fn eviction_clears_the_whole_registry_past_the_bound() {
        registry::clear_for_test();
        let _ = get_accessors::<Widget>().expect("builds");
        assert_eq!(registry_len(), 1);
        evict_if_oversized(0);
        assert_eq!(registry_len(), 0);
    }
}
