//! Negative cache (C4, spec §4.4): a flyweight "not found" marker keyed by
//! `{instanceId, kind, normalisedName}`.

use dashmap::DashMap;
use sqlrt_core::{Error, InstanceId, Result};
use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    Sp,
    Tvp,
}

impl ObjectKind {
    fn label(self) -> &'static str {
        match self {
            ObjectKind::Sp => "Sp",
            ObjectKind::Tvp => "Tvp",
        }
    }
}

#[derive(Clone, PartialEq, Eq, Hash)]
struct Key {
    instance: String,
    kind: ObjectKind,
    name: String,
}

/// Thread-safe, bounded table of "object does not exist" markers.
pub struct NegativeCache {
    entries: DashMap<Key, ()>,
    max_size: AtomicUsize,
}

impl NegativeCache {
    pub fn new(max_size: usize) -> Self {
        Self {
            entries: DashMap::new(),
            max_size: AtomicUsize::new(max_size),
        }
    }

    pub fn record(&self, instance: &InstanceId, kind: ObjectKind, name: &str) {
        if self.entries.len() >= self.max_size.load(Ordering::Relaxed) {
            self.entries.clear();
        }
        self.entries.insert(
            Key {
                instance: instance.as_str().to_string(),
                kind,
                name: name.to_ascii_lowercase(),
            },
            (),
        );
    }

    pub fn throw_if_present(&self, instance: &InstanceId, kind: ObjectKind, name: &str) -> Result<()> {
        let key = Key {
            instance: instance.as_str().to_string(),
            kind,
            name: name.to_ascii_lowercase(),
        };
        if self.entries.contains_key(&key) {
            return Err(Error::schema_missing(instance.as_str(), kind.label(), name));
        }
        Ok(())
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn configure_max_size(&self, n: usize) {
        self.max_size.store(n, Ordering::Relaxed);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

impl Default for NegativeCache {
    fn default() -> Self {
        // Negative caches are small by design (spec §4.4); a few thousand
        // entries already covers every object in a pathologically large
        // schema.
        Self::new(4096)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instance() -> InstanceId {
        InstanceId::from("db1")
    }

    #[test]
    fn records_and_throws_for_the_same_key() {
        let cache = NegativeCache::default();
        assert!(cache.throw_if_present(&instance(), ObjectKind::Sp, "dbo.Foo").is_ok());
        cache.record(&instance(), ObjectKind::Sp, "dbo.Foo");
        assert!(cache.throw_if_present(&instance(), ObjectKind::Sp, "dbo.Foo").is_err());
    }

    #[test]
    fn lookup_is_case_insensitive() {
        let cache = NegativeCache::default();
        cache.record(&instance(), ObjectKind::Tvp, "dbo.WidgetTvp");
        assert!(cache
            .throw_if_present(&instance(), ObjectKind::Tvp, "DBO.WIDGETTVP")
            .is_err());
    }

    #[test]
    fn sp_and_tvp_kinds_do_not_collide() {
        let cache = NegativeCache::default();
        cache.record(&instance(), ObjectKind::Sp, "dbo.Thing");
        assert!(cache.throw_if_present(&instance(), ObjectKind::Tvp, "dbo.Thing").is_ok());
    }

    #[test]
    fn reaching_the_bound_clears_the_whole_table() {
        let cache = NegativeCache::new(2);
        cache.record(&instance(), ObjectKind::Sp, "a");
        cache.record(&instance(), ObjectKind::Sp, "b");
        // Third insert observes len >= max_size and clears first.
        cache.record(&instance(), ObjectKind::Sp, "c");
        assert_eq!(cache.len(), 1);
    }
}
