//! Built, validated accessor set for a single row type (spec §4.1 step 4-5).

use crate::descriptor::{ColumnDescriptor, RowShape};
use crate::schema_table::{synthesize, SchemaColumn};
use sqlrt_core::{Error, Result, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

/// Everything derived from `T::columns()` once, on first use, and cached
/// for the lifetime of the process (spec §3: `ordinalMap[properties[i]] ==
/// i`, `isValidated` monotonic false -> true).
pub struct Accessors<T: RowShape> {
    properties: Vec<&'static str>,
    ordinal_map: HashMap<String, usize>,
    typed_getters: Vec<fn(&T) -> Value>,
    schema_table: Vec<SchemaColumn>,
    explicit_sql_type_name: Option<&'static str>,
    is_validated: AtomicBool,
}

impl<T: RowShape> Accessors<T> {
    pub(crate) fn build() -> Result<Self> {
        let mut columns: Vec<ColumnDescriptor<T>> = T::columns();
        if columns.is_empty() {
            return Err(Error::Internal(format!(
                "row type {} exposes zero readable properties",
                std::any::type_name::<T>()
            )));
        }

        // Ordinal contract (spec §4.1 rule 2): properties are ordered by
        // name so that codegen and the runtime fallback agree regardless
        // of declaration order.
        columns.sort_by(|a, b| a.name.cmp(b.name));

        let mut ordinal_map = HashMap::with_capacity(columns.len());
        for (ordinal, col) in columns.iter().enumerate() {
            let key = col.name.to_ascii_lowercase();
            if ordinal_map.insert(key, ordinal).is_some() {
                return Err(Error::Internal(format!(
                    "row type {} declares column {:?} more than once",
                    std::any::type_name::<T>(),
                    col.name
                )));
            }
        }

        let schema_table = synthesize(&columns);
        let properties = columns.iter().map(|c| c.name).collect();
        let typed_getters = columns.iter().map(|c| c.get).collect();

        Ok(Self {
            properties,
            ordinal_map,
            typed_getters,
            schema_table,
            explicit_sql_type_name: T::explicit_sql_type_name(),
            is_validated: AtomicBool::new(false),
        })
    }

    pub fn properties(&self) -> &[&'static str] {
        &self.properties
    }

    pub fn ordinal_of(&self, name: &str) -> Option<usize> {
        self.ordinal_map.get(&name.to_ascii_lowercase()).copied()
    }

    pub fn get(&self, row: &T, ordinal: usize) -> Option<Value> {
        self.typed_getters.get(ordinal).map(|get| get(row))
    }

    pub fn get_by_name(&self, row: &T, name: &str) -> Option<Value> {
        self.ordinal_of(name).and_then(|ord| self.get(row, ord))
    }

    pub fn schema_table(&self) -> &[SchemaColumn] {
        &self.schema_table
    }

    pub fn explicit_sql_type_name(&self) -> Option<&'static str> {
        self.explicit_sql_type_name
    }

    pub fn is_validated(&self) -> bool {
        self.is_validated.load(Ordering::Acquire)
    }

    /// Flips `isValidated` to `true`. Called once by the TVP structural
    /// validator (C9) after a successful comparison against the live TVP
    /// schema; never flips back to `false`.
    pub fn mark_validated(&self) {
        self.is_validated.store(true, Ordering::Release);
    }
}

/// Debug-only equivalence check between two accessor sets built for the
/// same row type from different sources (e.g. a hand-written `RowShape`
/// impl versus one emitted by a future derive macro). Panics on mismatch;
/// compiled out in release builds.
#[cfg(debug_assertions)]
pub fn assert_accessors_match<T: RowShape>(a: &Accessors<T>, b: &Accessors<T>) {
    assert_eq!(
        a.properties(),
        b.properties(),
        "accessor property order mismatch for {}",
        std::any::type_name::<T>()
    );
    assert_eq!(
        a.schema_table(),
        b.schema_table(),
        "accessor schema table mismatch for {}",
        std::any::type_name::<T>()
    );
}

impl<T: RowShape> std::fmt::Debug for Accessors<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Accessors")
            .field("type", &std::any::type_name::<T>())
            .field("properties", &self.properties)
            .field("is_validated", &self.is_validated())
            .finish()
    }
}
