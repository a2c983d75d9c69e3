//! Process-wide, type-keyed cache of built [`Accessors`] (spec §4.1 step 5).

use crate::accessors::Accessors;
use crate::descriptor::RowShape;
use dashmap::DashMap;
use once_cell::sync::Lazy;
use sqlrt_core::Result;
use std::any::{Any, TypeId};
use std::sync::Arc;

static REGISTRY: Lazy<DashMap<TypeId, Arc<dyn Any + Send + Sync>>> = Lazy::new(DashMap::new);

/// Returns the cached accessors for `T`, building and registering them on
/// first use. Building is idempotent: a racing concurrent build simply
/// loses the insert and both callers observe the winner's instance.
pub fn get_accessors<T: RowShape>() -> Result<Arc<Accessors<T>>> {
    let type_id = TypeId::of::<T>();
    if let Some(existing) = REGISTRY.get(&type_id) {
        return Ok(downcast(existing.value().clone()));
    }

    let built = Arc::new(Accessors::<T>::build()?);
    let entry = REGISTRY
        .entry(type_id)
        .or_insert_with(|| built.clone() as Arc<dyn Any + Send + Sync>);
    Ok(downcast(entry.value().clone()))
}

fn downcast<T: RowShape>(any: Arc<dyn Any + Send + Sync>) -> Arc<Accessors<T>> {
    any.downcast::<Accessors<T>>()
        .expect("registry entry type mismatch for TypeId")
}

/// Present in the registry, regardless of type. For diagnostics and the
/// bounded-cache eviction in [`evict_if_oversized`].
pub fn registry_len() -> usize {
    REGISTRY.len()
}

/// Clears the entire registry once it grows past `max_entries`. Row-shape
/// types are a bounded, low-cardinality set in any real deployment, so a
/// full clear-and-rebuild on overflow is simpler than tracking per-entry
/// recency and cheap in practice (spec §4.1 step 5).
pub fn evict_if_oversized(max_entries: usize) {
    if REGISTRY.len() > max_entries {
        REGISTRY.clear();
    }
}

#[cfg(test)]
pub(crate) fn clear_for_test() {
    REGISTRY.clear();
}
