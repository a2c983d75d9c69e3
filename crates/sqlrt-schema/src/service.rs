//! Schema service (C8, spec §4.8) — the orchestration layer tying the
//! negative cache, hybrid snapshot, distributed cache and epoch store
//! together behind `getSpSchema`/`getTvpSchema`.

use crate::epoch::FlushCoordinator;
use crate::negative_cache::{NegativeCache, ObjectKind};
use crate::snapshot::Snapshot;
use crate::striped_lock::StripedLocks;
use rand::Rng;
use sqlrt_core::{
    DistributedCache, Error, InstanceId, ObjectName, Result, SchemaRepository, SpParameter,
    SpSchema, TvpColumn, TvpSchema, VERSION_NOT_FOUND,
};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct SchemaServiceConfig {
    /// How long a snapshot entry is considered fresh before `refreshSafe`
    /// is consulted.
    pub refresh_interval: Duration,
    /// Global kill switch for the whole caching path (spec §4.8 step 4).
    pub schema_caching_enabled: bool,
    /// Base TTL for distributed-cache writes; the actual TTL is jittered
    /// to `base * U[0.9, 1.2]` (spec §4.8 step 5).
    pub distributed_cache_base_ttl: Duration,
    /// How long `refreshSafe` waits to acquire its striped lock before
    /// falling back to the fail-safe path.
    pub refresh_lock_timeout: Duration,
    /// Staleness extension applied on a lock-acquire timeout.
    pub lock_timeout_extension: Duration,
    /// Staleness extension applied on any refresh failure.
    pub error_extension: Duration,
}

impl Default for SchemaServiceConfig {
    fn default() -> Self {
        Self {
            refresh_interval: Duration::from_secs(300),
            schema_caching_enabled: true,
            distributed_cache_base_ttl: Duration::from_secs(600),
            refresh_lock_timeout: Duration::from_secs(5),
            lock_timeout_extension: Duration::from_secs(10),
            error_extension: Duration::from_secs(60),
        }
    }
}

#[derive(serde::Serialize, serde::Deserialize)]
struct CachedSp {
    name: String,
    version_token: i64,
    parameters: Vec<SpParameter>,
}

#[derive(serde::Serialize, serde::Deserialize)]
struct CachedTvp {
    name: String,
    version_token: i64,
    columns: Vec<TvpColumn>,
}

pub struct SchemaService {
    repository: Arc<dyn SchemaRepository>,
    distributed_cache: Arc<dyn DistributedCache>,
    flush_coordinator: Arc<FlushCoordinator>,
    negative_cache: NegativeCache,
    sp_snapshot: Snapshot<SpSchema>,
    tvp_snapshot: Snapshot<TvpSchema>,
    striped_locks: StripedLocks,
    config: SchemaServiceConfig,
}

impl SchemaService {
    pub fn new(
        repository: Arc<dyn SchemaRepository>,
        distributed_cache: Arc<dyn DistributedCache>,
        flush_coordinator: Arc<FlushCoordinator>,
        config: SchemaServiceConfig,
    ) -> Self {
        Self {
            repository,
            distributed_cache,
            flush_coordinator,
            negative_cache: NegativeCache::default(),
            sp_snapshot: Snapshot::new(),
            tvp_snapshot: Snapshot::new(),
            striped_locks: StripedLocks::new(),
            config,
        }
    }

    #[tracing::instrument(skip(self), fields(instance = %instance, name))]
    pub async fn get_sp_schema(&self, name: &str, instance: &InstanceId) -> Result<Arc<SpSchema>> {
        let object = ObjectName::normalise(name);
        let key = object.cache_key();

        self.negative_cache.throw_if_present(instance, ObjectKind::Sp, &key)?;

        if let Some(existing) = self.sp_snapshot.get(instance.as_str(), &key) {
            if existing.last_checked_at.elapsed() <= self.config.refresh_interval {
                return Ok(existing);
            }
        }

        if !self.config.schema_caching_enabled {
            let loaded = Arc::new(self.load_sp(&object, instance).await?);
            return self.finish_sp(loaded, instance, &key, name);
        }

        let cache_key = format!("Sch:{}:SP:{}", instance.as_str(), key);
        let schema = match self.distributed_cache.get(&cache_key).await? {
            Some(bytes) => {
                let cached: CachedSp = serde_json::from_slice(&bytes)?;
                Arc::new(SpSchema {
                    name: cached.name,
                    version_token: cached.version_token,
                    last_checked_at: Instant::now(),
                    parameters: cached.parameters,
                })
            }
            None => {
                let loaded = self.load_sp(&object, instance).await?;
                self.write_sp_to_distributed_cache(&cache_key, instance, &loaded).await;
                Arc::new(loaded)
            }
        };

        let schema = if schema.last_checked_at.elapsed() > self.config.refresh_interval {
            self.refresh_sp_safe(&cache_key, schema, &object, instance).await
        } else {
            schema
        };

        self.finish_sp(schema, instance, &key, name)
    }

    fn finish_sp(
        &self,
        schema: Arc<SpSchema>,
        instance: &InstanceId,
        key: &str,
        original_name: &str,
    ) -> Result<Arc<SpSchema>> {
        if !schema.is_found() {
            self.negative_cache.record(instance, ObjectKind::Sp, key);
            return Err(Error::schema_missing(instance.as_str(), "Sp", original_name));
        }
        self.sp_snapshot.put(instance.as_str(), key, schema.clone());
        Ok(schema)
    }

    #[tracing::instrument(skip(self), fields(instance = %instance, name))]
    pub async fn get_tvp_schema(&self, name: &str, instance: &InstanceId) -> Result<Arc<TvpSchema>> {
        let object = ObjectName::normalise(name);
        let key = object.cache_key();

        self.negative_cache.throw_if_present(instance, ObjectKind::Tvp, &key)?;

        if let Some(existing) = self.tvp_snapshot.get(instance.as_str(), &key) {
            if existing.last_checked_at.elapsed() <= self.config.refresh_interval {
                return Ok(existing);
            }
        }

        if !self.config.schema_caching_enabled {
            let loaded = Arc::new(self.load_tvp(&object, instance).await?);
            return self.finish_tvp(loaded, instance, &key, name);
        }

        let cache_key = format!("Sch:{}:TVP:{}", instance.as_str(), key);
        let schema = match self.distributed_cache.get(&cache_key).await? {
            Some(bytes) => {
                let cached: CachedTvp = serde_json::from_slice(&bytes)?;
                Arc::new(TvpSchema {
                    name: cached.name,
                    version_token: cached.version_token,
                    last_checked_at: Instant::now(),
                    columns: cached.columns,
                })
            }
            None => {
                let loaded = self.load_tvp(&object, instance).await?;
                self.write_tvp_to_distributed_cache(&cache_key, instance, &loaded).await;
                Arc::new(loaded)
            }
        };

        let schema = if schema.last_checked_at.elapsed() > self.config.refresh_interval {
            self.refresh_tvp_safe(&cache_key, schema, &object, instance).await
        } else {
            schema
        };

        self.finish_tvp(schema, instance, &key, name)
    }

    fn finish_tvp(
        &self,
        schema: Arc<TvpSchema>,
        instance: &InstanceId,
        key: &str,
        original_name: &str,
    ) -> Result<Arc<TvpSchema>> {
        if !schema.is_found() {
            self.negative_cache.record(instance, ObjectKind::Tvp, key);
            return Err(Error::schema_missing(instance.as_str(), "Tvp", original_name));
        }
        self.tvp_snapshot.put(instance.as_str(), key, schema.clone());
        Ok(schema)
    }

    /// Bulk warm-up via the schema repository's single batch query. Writes
    /// go through a bulk-load scope on both snapshots so only one merge
    /// runs per snapshot, not one per object.
    pub async fn preload_schema(&self, schemas: &[String], instance: &InstanceId) -> Result<(usize, Vec<String>)> {
        let batch = self.repository.get_all_schema_metadata(schemas, instance).await?;
        let tags = vec![
            format!("Schema:{}", instance.as_str()),
            format!("Schema:{}:SP", instance.as_str()),
        ];

        {
            let _scope = self.sp_snapshot.begin_bulk_load();
            for version in &batch.sp_versions {
                let object = ObjectName::normalise(&version.name);
                let schema = Arc::new(SpSchema {
                    name: version.name.clone(),
                    version_token: version.version_token,
                    last_checked_at: Instant::now(),
                    parameters: batch.sp_parameters.get(&version.name).cloned().unwrap_or_default(),
                });
                self.sp_snapshot.put(instance.as_str(), &object.cache_key(), schema.clone());
                let cache_key = format!("Sch:{}:SP:{}", instance.as_str(), object.cache_key());
                self.write_sp_to_distributed_cache_tagged(&cache_key, &schema, &tags).await;
            }
        }

        let tvp_tags = vec![
            format!("Schema:{}", instance.as_str()),
            format!("Schema:{}:TVP", instance.as_str()),
        ];
        {
            let _scope = self.tvp_snapshot.begin_bulk_load();
            for version in &batch.tvp_versions {
                let object = ObjectName::normalise(&version.name);
                let schema = Arc::new(TvpSchema {
                    name: version.name.clone(),
                    version_token: version.version_token,
                    last_checked_at: Instant::now(),
                    columns: batch.tvp_columns.get(&version.name).cloned().unwrap_or_default(),
                });
                self.tvp_snapshot.put(instance.as_str(), &object.cache_key(), schema.clone());
                let cache_key = format!("Sch:{}:TVP:{}", instance.as_str(), object.cache_key());
                self.write_tvp_to_distributed_cache_tagged(&cache_key, &schema, &tvp_tags).await;
            }
        }

        let found_lower: Vec<String> = batch.found_schemas.iter().map(|s| s.to_ascii_lowercase()).collect();
        let missing: Vec<String> = schemas
            .iter()
            .filter(|s| !found_lower.contains(&s.to_ascii_lowercase()))
            .cloned()
            .collect();
        Ok((batch.found_schemas.len(), missing))
    }

    /// C8-level flush: epoch increment + local snapshot purge (fail-open,
    /// via `FlushCoordinator`) + distributed-cache tag purge.
    pub async fn flush_schema(&self, instance: &InstanceId) -> Result<bool> {
        let all_hooks_ok = self
            .flush_coordinator
            .flush(instance, || {
                self.sp_snapshot.clear_instance(instance.as_str());
                self.tvp_snapshot.clear_instance(instance.as_str());
            })
            .await?;
        self.negative_cache.clear();
        let _ = self
            .distributed_cache
            .remove_by_tag(&format!("Schema:{}", instance.as_str()))
            .await;
        Ok(all_hooks_ok)
    }

    /// Single-object purge from the snapshot and distributed cache.
    pub async fn invalidate_sp_schema(&self, name: &str, instance: &InstanceId) {
        let object = ObjectName::normalise(name);
        let key = object.cache_key();
        self.sp_snapshot.remove(instance.as_str(), &key);
        let cache_key = format!("Sch:{}:SP:{}", instance.as_str(), key);
        let _ = self.distributed_cache.remove(&cache_key).await;
    }

    pub async fn invalidate_tvp_schema(&self, name: &str, instance: &InstanceId) {
        let object = ObjectName::normalise(name);
        let key = object.cache_key();
        self.tvp_snapshot.remove(instance.as_str(), &key);
        let cache_key = format!("Sch:{}:TVP:{}", instance.as_str(), key);
        let _ = self.distributed_cache.remove(&cache_key).await;
    }

    async fn load_sp(&self, object: &ObjectName, instance: &InstanceId) -> Result<SpSchema> {
        let full_name = object.to_string();
        let version = self.repository.get_object_version(&full_name, instance).await?;
        if version == VERSION_NOT_FOUND {
            return Ok(SpSchema::not_found(full_name));
        }
        let parameters = self.repository.get_sp_metadata(&full_name, instance).await?;
        Ok(SpSchema {
            name: full_name,
            version_token: version,
            last_checked_at: Instant::now(),
            parameters,
        })
    }

    async fn load_tvp(&self, object: &ObjectName, instance: &InstanceId) -> Result<TvpSchema> {
        let full_name = object.to_string();
        let version = self.repository.get_tvp_version(&full_name, instance).await?;
        if version == VERSION_NOT_FOUND {
            return Ok(TvpSchema::not_found(full_name));
        }
        let columns = self.repository.get_tvp_metadata(&full_name, instance).await?;
        Ok(TvpSchema {
            name: full_name,
            version_token: version,
            last_checked_at: Instant::now(),
            columns,
        })
    }

    /// `refreshSafe` (spec §4.8). Never propagates an error: lock-timeout
    /// and refresh failures both resolve to an extended-staleness copy of
    /// `current` (fail-open).
    async fn refresh_sp_safe(
        &self,
        cache_key: &str,
        current: Arc<SpSchema>,
        object: &ObjectName,
        instance: &InstanceId,
    ) -> Arc<SpSchema> {
        let Some(_permit) = self
            .striped_locks
            .try_acquire(cache_key, self.config.refresh_lock_timeout)
            .await
        else {
            tracing::debug!(cache_key, metric = "lock-timeout", "refreshSafe stripe busy");
            return extend_sp(&current, self.config.lock_timeout_extension);
        };

        match self.do_refresh_sp(cache_key, &current, object, instance).await {
            Ok(schema) => schema,
            Err(error) => {
                tracing::warn!(%error, cache_key, metric = "error", "refreshSafe failed, extending staleness");
                extend_sp(&current, self.config.error_extension)
            }
        }
    }

    async fn do_refresh_sp(
        &self,
        cache_key: &str,
        current: &Arc<SpSchema>,
        object: &ObjectName,
        instance: &InstanceId,
    ) -> Result<Arc<SpSchema>> {
        let full_name = object.to_string();
        let db_version = self.repository.get_object_version(&full_name, instance).await?;

        if db_version == VERSION_NOT_FOUND {
            let not_found = Arc::new(SpSchema::not_found(full_name));
            self.write_sp_to_distributed_cache(cache_key, instance, &not_found).await;
            return Ok(not_found);
        }

        if db_version == current.version_token {
            let touched = Arc::new(SpSchema {
                name: current.name.clone(),
                version_token: current.version_token,
                last_checked_at: Instant::now(),
                parameters: current.parameters.clone(),
            });
            self.write_sp_to_distributed_cache(cache_key, instance, &touched).await;
            return Ok(touched);
        }

        let loaded = Arc::new(self.load_sp(object, instance).await?);
        self.write_sp_to_distributed_cache(cache_key, instance, &loaded).await;
        Ok(loaded)
    }

    async fn refresh_tvp_safe(
        &self,
        cache_key: &str,
        current: Arc<TvpSchema>,
        object: &ObjectName,
        instance: &InstanceId,
    ) -> Arc<TvpSchema> {
        let Some(_permit) = self
            .striped_locks
            .try_acquire(cache_key, self.config.refresh_lock_timeout)
            .await
        else {
            tracing::debug!(cache_key, metric = "lock-timeout", "refreshSafe stripe busy");
            return extend_tvp(&current, self.config.lock_timeout_extension);
        };

        match self.do_refresh_tvp(cache_key, &current, object, instance).await {
            Ok(schema) => schema,
            Err(error) => {
                tracing::warn!(%error, cache_key, metric = "error", "refreshSafe failed, extending staleness");
                extend_tvp(&current, self.config.error_extension)
            }
        }
    }

    async fn do_refresh_tvp(
        &self,
        cache_key: &str,
        current: &Arc<TvpSchema>,
        object: &ObjectName,
        instance: &InstanceId,
    ) -> Result<Arc<TvpSchema>> {
        let full_name = object.to_string();
        let db_version = self.repository.get_tvp_version(&full_name, instance).await?;

        if db_version == VERSION_NOT_FOUND {
            let not_found = Arc::new(TvpSchema::not_found(full_name));
            self.write_tvp_to_distributed_cache(cache_key, instance, &not_found).await;
            return Ok(not_found);
        }

        if db_version == current.version_token {
            let touched = Arc::new(TvpSchema {
                name: current.name.clone(),
                version_token: current.version_token,
                last_checked_at: Instant::now(),
                columns: current.columns.clone(),
            });
            self.write_tvp_to_distributed_cache(cache_key, instance, &touched).await;
            return Ok(touched);
        }

        let loaded = Arc::new(self.load_tvp(object, instance).await?);
        self.write_tvp_to_distributed_cache(cache_key, instance, &loaded).await;
        Ok(loaded)
    }

    fn jittered_ttl(&self) -> Duration {
        let factor = rand::thread_rng().gen_range(0.9..=1.2);
        Duration::from_secs_f64(self.config.distributed_cache_base_ttl.as_secs_f64() * factor)
    }

    async fn write_sp_to_distributed_cache(&self, cache_key: &str, instance: &InstanceId, schema: &SpSchema) {
        let tags = vec![
            format!("Schema:{}", instance.as_str()),
            format!("Schema:{}:SP", instance.as_str()),
        ];
        self.write_sp_to_distributed_cache_tagged(cache_key, schema, &tags).await;
    }

    async fn write_sp_to_distributed_cache_tagged(&self, cache_key: &str, schema: &SpSchema, tags: &[String]) {
        let payload = CachedSp {
            name: schema.name.clone(),
            version_token: schema.version_token,
            parameters: schema.parameters.clone(),
        };
        match serde_json::to_vec(&payload) {
            Ok(bytes) => {
                if let Err(error) = self
                    .distributed_cache
                    .set(cache_key, bytes, self.jittered_ttl(), tags)
                    .await
                {
                    tracing::warn!(%error, cache_key, "distributed cache write-back failed");
                }
            }
            Err(error) => tracing::warn!(%error, cache_key, "failed to serialize SP schema for cache write-back"),
        }
    }

    async fn write_tvp_to_distributed_cache(&self, cache_key: &str, instance: &InstanceId, schema: &TvpSchema) {
        let tags = vec![
            format!("Schema:{}", instance.as_str()),
            format!("Schema:{}:TVP", instance.as_str()),
        ];
        self.write_tvp_to_distributed_cache_tagged(cache_key, schema, &tags).await;
    }

    async fn write_tvp_to_distributed_cache_tagged(&self, cache_key: &str, schema: &TvpSchema, tags: &[String]) {
        let payload = CachedTvp {
            name: schema.name.clone(),
            version_token: schema.version_token,
            columns: schema.columns.clone(),
        };
        match serde_json::to_vec(&payload) {
            Ok(bytes) => {
                if let Err(error) = self
                    .distributed_cache
                    .set(cache_key, bytes, self.jittered_ttl(), tags)
                    .await
                {
                    tracing::warn!(%error, cache_key, "distributed cache write-back failed");
                }
            }
            Err(error) => tracing::warn!(%error, cache_key, "failed to serialize TVP schema for cache write-back"),
        }
    }
}

fn extend_sp(current: &Arc<SpSchema>, extension: Duration) -> Arc<SpSchema> {
    Arc::new(SpSchema {
        name: current.name.clone(),
        version_token: current.version_token,
        last_checked_at: current.last_checked_at + extension,
        parameters: current.parameters.clone(),
    })
}

fn extend_tvp(current: &Arc<TvpSchema>, extension: Duration) -> Arc<TvpSchema> {
    Arc::new(TvpSchema {
        name: current.name.clone(),
        version_token: current.version_token,
        last_checked_at: current.last_checked_at + extension,
        columns: current.columns.clone(),
    })
}
