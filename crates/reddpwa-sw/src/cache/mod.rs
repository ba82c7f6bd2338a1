//! Versioned response cache.
//!
//! A [`CacheStorage`] holds named cache instances, one per generation. The
//! [`CacheManager`] scopes a storage to the worker's own generation and adds
//! the lifecycle-level operations (precache, prune, clear).

use std::sync::Arc;

use async_trait::async_trait;
use http::header::{HeaderName, HeaderValue};
use http::{HeaderMap, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::fetch::{FetchResponse, RequestKey};
use crate::Result;

mod memory;
mod sqlite;

pub use memory::MemoryCacheStorage;
pub use sqlite::SqliteCacheStorage;

// ==================== Entry ====================

/// A cached request/response pair. Immutable once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Request URL.
    pub url: String,

    /// Request method.
    pub method: String,

    /// Response status.
    pub status: u16,

    /// Response headers, in order, repeated names allowed.
    pub headers: Vec<(String, String)>,

    /// Response body.
    pub body: Vec<u8>,

    /// Cached at timestamp (ms since epoch).
    pub cached_at: u64,
}

impl CacheEntry {
    /// Snapshot a response under a request identity.
    pub fn from_response(key: &RequestKey, response: &FetchResponse) -> Self {
        let headers = response
            .headers
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();

        Self {
            url: key.url.clone(),
            method: key.method.clone(),
            status: response.status.as_u16(),
            headers,
            body: response.body.to_vec(),
            cached_at: reddpwa_common::now_millis(),
        }
    }

    /// Identity this entry is stored under.
    pub fn key(&self) -> RequestKey {
        RequestKey {
            method: self.method.clone(),
            url: self.url.clone(),
        }
    }

    /// Rebuild a response marked as served from cache.
    pub fn to_response(&self) -> FetchResponse {
        let mut headers = HeaderMap::new();
        for (name, value) in &self.headers {
            if let (Ok(n), Ok(v)) = (
                HeaderName::try_from(name.as_str()),
                HeaderValue::try_from(value.as_str()),
            ) {
                headers.append(n, v);
            }
        }

        FetchResponse {
            status: StatusCode::from_u16(self.status).unwrap_or(StatusCode::OK),
            headers,
            body: self.body.clone().into(),
            from_cache: true,
        }
    }
}

/// Size summary of one cache instance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub entries: usize,
    pub total_bytes: u64,
}

// ==================== Storage ====================

/// Durable storage of named cache instances.
///
/// Writes are keyed by request identity and last-write-wins.
#[async_trait]
pub trait CacheStorage: Send + Sync {
    /// Open a cache (creates it if it doesn't exist).
    async fn open(&self, name: &str) -> Result<()>;

    /// Check if a cache exists.
    async fn has(&self, name: &str) -> Result<bool>;

    /// Names of all caches.
    async fn keys(&self) -> Result<Vec<String>>;

    /// Delete a cache and all its entries.
    async fn delete(&self, name: &str) -> Result<bool>;

    /// Store one entry in an existing cache.
    ///
    /// Fails with `NotFound` when the cache is missing; only `open` and
    /// `put_all` create caches.
    async fn put(&self, name: &str, entry: CacheEntry) -> Result<()>;

    /// Store a batch of entries atomically: either all land or none do.
    async fn put_all(&self, name: &str, entries: Vec<CacheEntry>) -> Result<()>;

    /// Look up an entry.
    async fn match_entry(&self, name: &str, key: &RequestKey) -> Result<Option<CacheEntry>>;

    /// Keys of all entries in a cache.
    async fn entry_keys(&self, name: &str) -> Result<Vec<RequestKey>>;

    /// Entry count and body bytes of a cache.
    async fn stats(&self, name: &str) -> Result<CacheStats>;
}

// ==================== Manager ====================

/// Cache storage scoped to one generation.
#[derive(Clone)]
pub struct CacheManager {
    storage: Arc<dyn CacheStorage>,
    name: String,
}

impl CacheManager {
    /// Create a manager for the named generation.
    pub fn new(storage: Arc<dyn CacheStorage>, name: impl Into<String>) -> Self {
        Self {
            storage,
            name: name.into(),
        }
    }

    /// This generation's cache name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The underlying storage.
    pub fn storage(&self) -> &Arc<dyn CacheStorage> {
        &self.storage
    }

    /// Whether this generation's cache exists.
    pub async fn exists(&self) -> Result<bool> {
        self.storage.has(&self.name).await
    }

    /// Commit a fully fetched precache batch.
    pub async fn precache(&self, entries: Vec<CacheEntry>) -> Result<()> {
        let count = entries.len();
        self.storage.put_all(&self.name, entries).await?;
        info!(cache = %self.name, entries = count, "Precache committed");
        Ok(())
    }

    /// Store a response under a request identity.
    pub async fn put(&self, key: &RequestKey, response: &FetchResponse) -> Result<()> {
        let entry = CacheEntry::from_response(key, response);
        self.storage.put(&self.name, entry).await?;
        debug!(cache = %self.name, key = %key, "Cached response");
        Ok(())
    }

    /// Look up a request identity in this generation.
    pub async fn match_request(&self, key: &RequestKey) -> Result<Option<FetchResponse>> {
        Ok(self
            .storage
            .match_entry(&self.name, key)
            .await?
            .map(|entry| entry.to_response()))
    }

    /// Delete every cache instance except this generation's.
    ///
    /// Returns the deleted names.
    pub async fn prune_others(&self) -> Result<Vec<String>> {
        let mut deleted = Vec::new();
        for name in self.storage.keys().await? {
            if name == self.name {
                continue;
            }
            if self.storage.delete(&name).await? {
                info!(cache = %name, current = %self.name, "Deleted stale cache");
                deleted.push(name);
            } else {
                warn!(cache = %name, "Stale cache vanished before deletion");
            }
        }
        Ok(deleted)
    }

    /// Size of this generation's cache.
    pub async fn stats(&self) -> Result<CacheStats> {
        self.storage.stats(&self.name).await
    }

    /// Delete every cache instance, this generation's included.
    pub async fn clear_all(&self) -> Result<usize> {
        let mut cleared = 0;
        for name in self.storage.keys().await? {
            if self.storage.delete(&name).await? {
                cleared += 1;
            }
        }
        info!(cleared, "Cleared all caches");
        Ok(cleared)
    }
}

impl std::fmt::Debug for CacheManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheManager")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}
