//! Epoch store & flush coordinator (C7, spec §4.7): a per-instance
//! monotonic counter in shared storage, mirrored locally so readers never
//! observe the epoch go backwards.

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use sqlrt_core::{EpochStorage, InstanceId, Result};
use std::sync::Arc;

/// A best-effort external-cache invalidation callback registered with the
/// flush coordinator. One hook failing does not abort the others; the
/// overall flush only reports success if every hook succeeded.
#[async_trait]
pub trait FlushHook: Send + Sync {
    async fn invalidate(&self, instance: &InstanceId) -> bool;
}

pub struct FlushCoordinator {
    epoch_storage: Arc<dyn EpochStorage>,
    local_mirror: DashMap<InstanceId, u64>,
    hooks: RwLock<Vec<Arc<dyn FlushHook>>>,
}

impl FlushCoordinator {
    pub fn new(epoch_storage: Arc<dyn EpochStorage>) -> Self {
        Self {
            epoch_storage,
            local_mirror: DashMap::new(),
            hooks: RwLock::new(Vec::new()),
        }
    }

    pub fn register_hook(&self, hook: Arc<dyn FlushHook>) {
        self.hooks.write().push(hook);
    }

    pub async fn get_epoch(&self, instance: &InstanceId) -> Result<u64> {
        self.epoch_storage.get_epoch(instance).await
    }

    pub async fn increment_epoch(&self, instance: &InstanceId) -> Result<u64> {
        self.epoch_storage.increment_epoch(instance).await
    }

    /// `incrementEpoch` + local purge + best-effort external hooks.
    /// Returns whether every hook succeeded; the increment and local purge
    /// themselves are infallible once the storage call succeeds.
    pub async fn flush(&self, instance: &InstanceId, purge_local: impl FnOnce()) -> Result<bool> {
        let new_epoch = self.increment_epoch(instance).await?;
        self.local_mirror.insert(instance.clone(), new_epoch);
        purge_local();

        let hooks: Vec<Arc<dyn FlushHook>> = self.hooks.read().clone();
        let mut all_succeeded = true;
        for hook in hooks {
            if !hook.invalidate(instance).await {
                all_succeeded = false;
            }
        }
        Ok(all_succeeded)
    }

    /// If shared storage reports a newer epoch than the local mirror,
    /// purges local caches for this instance and advances the mirror.
    /// Monotone: once a reader has observed version V it never falls back.
    pub async fn check_and_sync(&self, instance: &InstanceId, purge_local: impl FnOnce()) -> Result<bool> {
        let shared = self.epoch_storage.get_epoch(instance).await?;
        let local = self.local_mirror.get(instance).map(|v| *v).unwrap_or(0);
        if shared > local {
            purge_local();
            self.local_mirror.insert(instance.clone(), shared);
            Ok(true)
        } else {
            Ok(false)
        }
    }
}

/// Spawns a background task polling `checkAndSync` for every configured
/// instance at a fixed interval. A no-op (no task spawned) when `instances`
/// is empty, per spec §4.7.
pub fn spawn_watcher(
    coordinator: Arc<FlushCoordinator>,
    instances: Vec<InstanceId>,
    interval: std::time::Duration,
    purge_local: impl Fn(&InstanceId) + Send + Sync + 'static,
) -> Option<tokio::task::JoinHandle<()>> {
    if instances.is_empty() {
        return None;
    }
    Some(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            for instance in &instances {
                if let Err(error) = coordinator.check_and_sync(instance, || purge_local(instance)).await {
                    tracing::warn!(%error, %instance, "epoch watcher check_and_sync failed");
                }
            }
        }
    }))
}
