//! Backing store pool for [`crate::buffer::ColumnBuffer`] (spec §4.2:
//! "releases the underlying pooled storage on dispose").
//!
//! `Vec<T>` allocations are pooled per `T` in a process-wide, type-keyed
//! free list — the same idea as the teacher's connection idle queue
//! (`zqlz-connection/src/pool/pool.rs`), generalized from connections to
//! column backing buffers.

use dashmap::DashMap;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::any::{Any, TypeId};

static POOL: Lazy<DashMap<TypeId, Mutex<Vec<Box<dyn Any + Send>>>>> = Lazy::new(DashMap::new);

pub(crate) fn acquire<T: 'static + Send>() -> Vec<T> {
    let type_id = TypeId::of::<T>();
    if let Some(bucket) = POOL.get(&type_id) {
        if let Some(boxed) = bucket.lock().pop() {
            return *boxed
                .downcast::<Vec<T>>()
                .expect("column buffer pool type mismatch");
        }
    }
    Vec::new()
}

pub(crate) fn release<T: 'static + Send>(mut buf: Vec<T>) {
    buf.clear();
    let type_id = TypeId::of::<T>();
    let bucket = POOL.entry(type_id).or_insert_with(|| Mutex::new(Vec::new()));
    bucket.lock().push(Box::new(buf));
}

#[cfg(test)]
pub(crate) fn clear_for_test() {
    POOL.clear();
}
