//! Hybrid schema snapshot (C6, spec §4.6): an immutable L1 map overlaid by
//! a concurrent L2 map, merged by a single CAS-guarded background task.

use arc_swap::ArcSwap;
use dashmap::DashMap;
use smallvec::SmallVec;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// One entry, tagged with the instance it belongs to so `clear(instance)`
/// can filter without needing to reconstruct a composite string key.
struct Entry<V> {
    instance: Arc<str>,
    value: Arc<V>,
}

/// Hashes `{instanceId}:{name}` (case-insensitive) without heap-allocating
/// a composite string for the common case — the concatenation is written
/// into a stack buffer and only spills to the heap past 128 bytes, which
/// no real instance/name pair approaches.
fn composite_hash(instance: &str, name: &str) -> u64 {
    let mut buf: SmallVec<[u8; 128]> = SmallVec::with_capacity(instance.len() + 1 + name.len());
    buf.extend(instance.bytes().map(|b| b.to_ascii_lowercase()));
    buf.push(b':');
    buf.extend(name.bytes().map(|b| b.to_ascii_lowercase()));
    xxhash_rust::xxh3::xxh3_64(&buf)
}

/// Merge into L1 once L2 holds at least this many entries.
const DEFAULT_MERGE_THRESHOLD: usize = 64;

pub struct Snapshot<V> {
    l1: ArcSwap<HashMap<u64, Entry<V>>>,
    l2: DashMap<u64, Entry<V>>,
    is_merging: AtomicBool,
    bulk_load_suspended: AtomicBool,
    merge_threshold: usize,
}

impl<V> Snapshot<V> {
    pub fn new() -> Self {
        Self::with_merge_threshold(DEFAULT_MERGE_THRESHOLD)
    }

    pub fn with_merge_threshold(merge_threshold: usize) -> Self {
        Self {
            l1: ArcSwap::from_pointee(HashMap::new()),
            l2: DashMap::new(),
            is_merging: AtomicBool::new(false),
            bulk_load_suspended: AtomicBool::new(false),
            merge_threshold,
        }
    }

    pub fn get(&self, instance: &str, name: &str) -> Option<Arc<V>> {
        let key = composite_hash(instance, name);
        if let Some(entry) = self.l1.load().get(&key) {
            return Some(entry.value.clone());
        }
        self.l2.get(&key).map(|e| e.value.clone())
    }

    pub fn put(&self, instance: &str, name: &str, value: Arc<V>) {
        let key = composite_hash(instance, name);
        self.l2.insert(
            key,
            Entry {
                instance: Arc::from(instance),
                value,
            },
        );
        if !self.bulk_load_suspended.load(Ordering::Acquire) && self.l2.len() >= self.merge_threshold {
            self.try_merge();
        }
    }

    /// Copies L1, overlays every L2 entry (writer wins over the older L1
    /// entry), freezes the result and atomically swaps it in. Guarded by a
    /// single-flight CAS so only one merge runs at a time; a racing caller
    /// simply skips its merge attempt, matching spec §4.6.
    pub fn try_merge(&self) {
        if self
            .is_merging
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        let mut merged: HashMap<u64, Entry<V>> = HashMap::new();
        for (key, entry) in self.l1.load().iter() {
            merged.insert(
                *key,
                Entry {
                    instance: entry.instance.clone(),
                    value: entry.value.clone(),
                },
            );
        }
        for item in self.l2.iter() {
            merged.insert(
                *item.key(),
                Entry {
                    instance: item.value().instance.clone(),
                    value: item.value().value.clone(),
                },
            );
        }

        self.l1.store(Arc::new(merged));
        self.l2.clear();
        self.is_merging.store(false, Ordering::Release);
    }

    /// Removes every entry tagged with `instance` from both layers, then
    /// forces a merge so L1 reflects the removal immediately.
    pub fn clear_instance(&self, instance: &str) {
        self.l2.retain(|_, entry| entry.instance.as_ref() != instance);
        let filtered: HashMap<u64, Entry<V>> = self
            .l1
            .load()
            .iter()
            .filter(|(_, entry)| entry.instance.as_ref() != instance)
            .map(|(k, entry)| {
                (
                    *k,
                    Entry {
                        instance: entry.instance.clone(),
                        value: entry.value.clone(),
                    },
                )
            })
            .collect();
        self.l1.store(Arc::new(filtered));
    }

    /// Removes a single entry from both layers (used by
    /// `invalidateSpSchema`/`invalidateTvpSchema`, spec §4.8).
    pub fn remove(&self, instance: &str, name: &str) {
        let key = composite_hash(instance, name);
        self.l2.remove(&key);
        let filtered: HashMap<u64, Entry<V>> = self
            .l1
            .load()
            .iter()
            .filter(|(k, _)| **k != key)
            .map(|(k, entry)| {
                (
                    *k,
                    Entry {
                        instance: entry.instance.clone(),
                        value: entry.value.clone(),
                    },
                )
            })
            .collect();
        self.l1.store(Arc::new(filtered));
    }

    /// Suspends auto-merge for the duration of a bulk load; the returned
    /// guard triggers exactly one merge on drop (spec §4.6's "bulk-load
    /// scope").
    pub fn begin_bulk_load<'a>(&'a self) -> BulkLoadScope<'a, V> {
        self.bulk_load_suspended.store(true, Ordering::Release);
        BulkLoadScope { snapshot: self }
    }

    pub fn l1_len(&self) -> usize {
        self.l1.load().len()
    }

    pub fn l2_len(&self) -> usize {
        self.l2.len()
    }
}

impl<V> Default for Snapshot<V> {
    fn default() -> Self {
        Self::new()
    }
}

pub struct BulkLoadScope<'a, V> {
    snapshot: &'a Snapshot<V>,
}

impl<'a, V> Drop for BulkLoadScope<'a, V> {
    fn drop(&mut self) {
        self.snapshot.bulk_load_suspended.store(false, Ordering::Release);
        self.snapshot.try_merge();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_then_get_round_trips_through_l2() {
        let snapshot: Snapshot<i32> = Snapshot::new();
        snapshot.put("db1", "dbo.Foo", Arc::new(42));
        assert_eq!(*snapshot.get("db1", "dbo.Foo").unwrap(), 42);
        assert_eq!(snapshot.l2_len(), 1);
        assert_eq!(snapshot.l1_len(), 0);
    }

    #[test]
    fn lookup_is_case_insensitive() {
        let snapshot: Snapshot<i32> = Snapshot::new();
        snapshot.put("DB1", "dbo.Foo", Arc::new(1));
        assert_eq!(*snapshot.get("db1", "DBO.FOO").unwrap(), 1);
    }

    #[test]
    fn merge_moves_entries_from_l2_into_l1_and_clears_l2() {
        let snapshot: Snapshot<i32> = Snapshot::with_merge_threshold(1000);
        snapshot.put("db1", "dbo.Foo", Arc::new(1));
        snapshot.try_merge();
        assert_eq!(snapshot.l2_len(), 0);
        assert_eq!(snapshot.l1_len(), 1);
        assert_eq!(*snapshot.get("db1", "dbo.Foo").unwrap(), 1);
    }

    #[test]
    fn auto_merge_triggers_once_the_threshold_is_reached() {
        let snapshot: Snapshot<i32> = Snapshot::with_merge_threshold(2);
        snapshot.put("db1", "a", Arc::new(1));
        snapshot.put("db1", "b", Arc::new(2));
        assert_eq!(snapshot.l2_len(), 0);
        assert_eq!(snapshot.l1_len(), 2);
    }

    #[test]
    fn bulk_load_scope_suspends_auto_merge_until_drop() {
        let snapshot: Snapshot<i32> = Snapshot::with_merge_threshold(1);
        {
            let _scope = snapshot.begin_bulk_load();
            snapshot.put("db1", "a", Arc::new(1));
            snapshot.put("db1", "b", Arc::new(2));
            assert_eq!(snapshot.l1_len(), 0, "merge must not run while the scope is open");
        }
        assert_eq!(snapshot.l1_len(), 2, "dropping the scope triggers one merge");
    }

    #[test]
    fn remove_deletes_a_single_entry_from_both_layers() {
        let snapshot: Snapshot<i32> = Snapshot::with_merge_threshold(1000);
        snapshot.put("db1", "a", Arc::new(1));
        snapshot.put("db1", "b", Arc::new(2));
        snapshot.try_merge();
        snapshot.remove("db1", "a");
        assert!(snapshot.get("db1", "a").is_none());
        assert_eq!(*snapshot.get("db1", "b").unwrap(), 2);
    }

    #[test]
    fn clear_instance_removes_from_both_layers() {
        let snapshot: Snapshot<i32> = Snapshot::with_merge_threshold(1000);
        snapshot.put("db1", "a", Arc::new(1));
        snapshot.put("db2", "b", Arc::new(2));
        snapshot.try_merge();
        snapshot.put("db1", "c", Arc::new(3));
        snapshot.clear_instance("db1");
        assert!(snapshot.get("db1", "a").is_none());
        assert!(snapshot.get("db1", "c").is_none());
        assert!(snapshot.get("db2", "b").is_some());
    }
}
