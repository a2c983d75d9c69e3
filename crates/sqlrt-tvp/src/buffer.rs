//! `ColumnBuffer<T>` (spec §4.2): amortised O(1) append, dynamic growth,
//! pooled backing storage, explicit use-after-dispose error.

use crate::pool;
use sqlrt_core::{Error, Result};

/// A single column's backing storage. Owned by the [`crate::reader::ColumnarReader`]
/// that holds it; disposing the reader disposes every buffer exactly once.
pub struct ColumnBuffer<T: 'static + Send> {
    data: Option<Vec<T>>,
}

impl<T: 'static + Send> ColumnBuffer<T> {
    pub fn new() -> Self {
        Self {
            data: Some(pool::acquire()),
        }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let mut data = pool::acquire::<T>();
        if data.capacity() < capacity {
            data.reserve(capacity - data.capacity());
        }
        Self { data: Some(data) }
    }

    /// Appends a value, doubling the backing allocation when full — `Vec`'s
    /// own growth policy already does this; pushing through here just keeps
    /// the dispose check in one place.
    pub fn push(&mut self, value: T) -> Result<()> {
        self.live_mut()?.push(value);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.data.as_ref().map(Vec::len).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, ordinal: usize) -> Result<&T> {
        self.live()?
            .get(ordinal)
            .ok_or_else(|| Error::Internal(format!("column buffer index {ordinal} out of range")))
    }

    pub fn is_disposed(&self) -> bool {
        self.data.is_none()
    }

    /// Releases the backing `Vec` back to the pool. Idempotent: disposing an
    /// already-disposed buffer is a no-op, matching the reader's "dispose
    /// all buffers exactly once on its own disposal" contract even if a
    /// caller also disposes a buffer directly.
    pub fn dispose(&mut self) {
        if let Some(data) = self.data.take() {
            pool::release(data);
        }
    }

    fn live(&self) -> Result<&Vec<T>> {
        self.data
            .as_ref()
            .ok_or_else(|| Error::Internal("use of a disposed ColumnBuffer".to_string()))
    }

    fn live_mut(&mut self) -> Result<&mut Vec<T>> {
        self.data
            .as_mut()
            .ok_or_else(|| Error::Internal("use of a disposed ColumnBuffer".to_string()))
    }
}

impl<T: 'static + Send> Default for ColumnBuffer<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: 'static + Send> Drop for ColumnBuffer<T> {
    fn drop(&mut self) {
        self.dispose();
    }
}
