//! Process-local [`DistributedCache`] stand-in (spec §1: the real KV store
//! is an external collaborator and out of scope; a deployment injects
//! Redis or a shared-memory implementation in its place).

use async_trait::async_trait;
use dashmap::DashMap;
use sqlrt_core::{DistributedCache, Result};
use std::time::{Duration, Instant};

struct Entry {
    value: Vec<u8>,
    expires_at: Instant,
    tags: Vec<String>,
}

#[derive(Default)]
pub struct InMemoryDistributedCache {
    entries: DashMap<String, Entry>,
}

impl InMemoryDistributedCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn is_live(entry: &Entry) -> bool {
        Instant::now() < entry.expires_at
    }
}

#[async_trait]
impl DistributedCache for InMemoryDistributedCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        match self.entries.get(key) {
            Some(entry) if Self::is_live(&entry) => Ok(Some(entry.value.clone())),
            Some(_) => {
                self.entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration, tags: &[String]) -> Result<()> {
        self.entries.insert(
            key.to_string(),
            Entry { value, expires_at: Instant::now() + ttl, tags: tags.to_vec() },
        );
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.entries.remove(key);
        Ok(())
    }

    async fn remove_by_tag(&self, tag: &str) -> Result<()> {
        self.entries.retain(|_, entry| !entry.tags.iter().any(|t| t == tag));
        Ok(())
    }
}
