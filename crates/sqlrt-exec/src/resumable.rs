//! Resumable cursor store and query loop (C14, spec §4.13, §4.14).
//!
//! [`CursorStore`] persists an opaquely-serialised cursor per
//! `(instance, queryKey)`; persistence is fire-and-forget and best-effort
//! ordered — a later save must never be clobbered by an earlier one still
//! in flight, which [`resumable_query`] guarantees by tagging every save
//! with a monotonically increasing sequence number.

use async_trait::async_trait;
use dashmap::DashMap;
use futures::stream::{self, Stream};
use serde::Serialize;
use serde_json::Value as Json;
use sqlrt_core::{InstanceId, Result};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Persists and recalls resumable-query cursors (spec §4.14: two
/// operations, no cleanup responsibility in the core).
#[async_trait]
pub trait CursorStore: Send + Sync {
    /// Stores `cursor` for `(instance, query_key)` unless a save tagged
    /// with a higher `sequence` has already landed for that key.
    async fn save_cursor(&self, instance: &InstanceId, query_key: &str, sequence: u64, cursor: Json);

    async fn get_last_cursor(&self, instance: &InstanceId, query_key: &str) -> Option<Json>;
}

struct StoredCursor {
    sequence: u64,
    cursor: Json,
}

/// In-memory [`CursorStore`] for tests and single-process deployments.
#[derive(Default)]
pub struct InMemoryCursorStore {
    entries: DashMap<(String, String), StoredCursor>,
}

impl InMemoryCursorStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CursorStore for InMemoryCursorStore {
    async fn save_cursor(&self, instance: &InstanceId, query_key: &str, sequence: u64, cursor: Json) {
        let key = (instance.as_str().to_string(), query_key.to_string());
        match self.entries.get(&key) {
            Some(existing) if existing.sequence >= sequence => {}
            _ => {
                self.entries.insert(key, StoredCursor { sequence, cursor });
            }
        }
    }

    async fn get_last_cursor(&self, instance: &InstanceId, query_key: &str) -> Option<Json> {
        let key = (instance.as_str().to_string(), query_key.to_string());
        self.entries.get(&key).map(|e| e.cursor.clone())
    }
}

/// Fires `save_cursor` on the store without waiting for it to land,
/// tagging it with the next sequence number so a slow earlier save can
/// never clobber a faster later one (spec §4.13's "best-effort ordering").
fn spawn_persist<C: Serialize>(
    store: Arc<dyn CursorStore>,
    instance: InstanceId,
    query_key: String,
    sequence: u64,
    cursor: C,
) {
    if let Ok(json) = serde_json::to_value(cursor) {
        tokio::spawn(async move {
            store.save_cursor(&instance, &query_key, sequence, json).await;
        });
    }
}

/// Drives the resumable-query loop (spec §4.13): repeatedly calls
/// `run_batch` with the current cursor, which must build and run a query
/// returning at most `B` rows and return them in arrival order. Persists
/// `cursor_selector(last_row)` after every completed batch (a batch is
/// "completed" once this stream has yielded every row in it) and
/// terminates cleanly, writing nothing, on a zero-row batch.
///
/// `dry_run` mirrors spec §4.13's dry-run mode: yields nothing and never
/// touches `store`.
#[allow(clippy::too_many_arguments)]
pub fn resumable_query<C, R, F, Fut>(
    instance: InstanceId,
    query_key: String,
    initial_cursor: C,
    store: Arc<dyn CursorStore>,
    dry_run: bool,
    mut run_batch: F,
    mut cursor_selector: impl FnMut(&R) -> C + Send + 'static,
) -> Pin<Box<dyn Stream<Item = Result<R>> + Send>>
where
    C: Clone + Serialize + Send + Sync + 'static,
    R: Send + 'static,
    F: FnMut(C) -> Fut + Send + 'static,
    Fut: Future<Output = Result<Vec<R>>> + Send,
{
    if dry_run {
        return Box::pin(stream::empty());
    }

    let sequence = Arc::new(AtomicU64::new(0));

    // `Draining` holds the cursor to resume from *after* the in-flight
    // batch is fully drained — kept separate from the per-row yield so
    // draining never loses track of whether another batch follows.
    enum State<C, R> {
        FetchBatch(C),
        Draining { next_cursor: C, pending: std::vec::IntoIter<R> },
        Done,
    }

    Box::pin(stream::unfold(State::FetchBatch(initial_cursor), move |mut state| {
        let store = store.clone();
        let instance = instance.clone();
        let query_key = query_key.clone();
        let sequence = sequence.clone();
        async move {
            loop {
                state = match state {
                    State::Done => return None,
                    State::Draining { next_cursor, mut pending } => match pending.next() {
                        Some(row) => return Some((Ok(row), State::Draining { next_cursor, pending })),
                        None => State::FetchBatch(next_cursor),
                    },
                    State::FetchBatch(cursor) => {
                        let batch = match run_batch(cursor).await {
                            Ok(rows) => rows,
                            Err(err) => return Some((Err(err), State::Done)),
                        };
                        if batch.is_empty() {
                            return None;
                        }
                        let next_cursor = cursor_selector(batch.last().expect("non-empty batch"));
                        let seq = sequence.fetch_add(1, Ordering::Relaxed) + 1;
                        spawn_persist(store, instance, query_key, seq, next_cursor.clone());

                        let mut iter = batch.into_iter();
                        let first = iter.next().expect("non-empty batch");
                        return Some((Ok(first), State::Draining { next_cursor, pending: iter }));
                    }
                };
            }
        }
    }))
}
