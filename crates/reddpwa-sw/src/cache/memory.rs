//! In-process cache storage.

use async_trait::async_trait;
use hashbrown::HashMap;
use tokio::sync::RwLock;

use super::{CacheEntry, CacheStats, CacheStorage};
use crate::fetch::RequestKey;
use crate::{Result, ServiceWorkerError};

/// Cache storage held in memory; contents vanish with the process.
#[derive(Debug, Default)]
pub struct MemoryCacheStorage {
    caches: RwLock<HashMap<String, HashMap<RequestKey, CacheEntry>>>,
}

impl MemoryCacheStorage {
    /// Create empty storage.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheStorage for MemoryCacheStorage {
    async fn open(&self, name: &str) -> Result<()> {
        self.caches
            .write()
            .await
            .entry(name.to_string())
            .or_default();
        Ok(())
    }

    async fn has(&self, name: &str) -> Result<bool> {
        Ok(self.caches.read().await.contains_key(name))
    }

    async fn keys(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self.caches.read().await.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    async fn delete(&self, name: &str) -> Result<bool> {
        Ok(self.caches.write().await.remove(name).is_some())
    }

    async fn put(&self, name: &str, entry: CacheEntry) -> Result<()> {
        let mut caches = self.caches.write().await;
        let cache = caches
            .get_mut(name)
            .ok_or_else(|| ServiceWorkerError::NotFound(format!("cache {name}")))?;
        cache.insert(entry.key(), entry);
        Ok(())
    }

    async fn put_all(&self, name: &str, entries: Vec<CacheEntry>) -> Result<()> {
        let mut caches = self.caches.write().await;
        let cache = caches.entry(name.to_string()).or_default();
        for entry in entries {
            cache.insert(entry.key(), entry);
        }
        Ok(())
    }

    async fn match_entry(&self, name: &str, key: &RequestKey) -> Result<Option<CacheEntry>> {
        Ok(self
            .caches
            .read()
            .await
            .get(name)
            .and_then(|cache| cache.get(key))
            .cloned())
    }

    async fn entry_keys(&self, name: &str) -> Result<Vec<RequestKey>> {
        let mut keys: Vec<RequestKey> = self
            .caches
            .read()
            .await
            .get(name)
            .map(|cache| cache.keys().cloned().collect())
            .unwrap_or_default();
        keys.sort();
        Ok(keys)
    }

    async fn stats(&self, name: &str) -> Result<CacheStats> {
        let caches = self.caches.read().await;
        Ok(caches
            .get(name)
            .map(|cache| CacheStats {
                entries: cache.len(),
                total_bytes: cache.values().map(|e| e.body.len() as u64).sum(),
            })
            .unwrap_or_default())
    }
}
