//! SQLite-backed durable cache storage.
//!
//! One row per cache instance plus one row per entry; entries cascade with
//! their cache. Batch writes run inside a single transaction.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info};

use super::{CacheEntry, CacheStats, CacheStorage};
use crate::fetch::RequestKey;
use crate::{Result, ServiceWorkerError};

/// Schema version - increment to trigger nuke-and-rebuild
const SCHEMA_VERSION: i32 = 1;

/// Durable cache storage in a SQLite database file.
pub struct SqliteCacheStorage {
    conn: Mutex<Connection>,
}

impl SqliteCacheStorage {
    /// Open or create storage at a database path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref())?;
        info!(path = %path.as_ref().display(), "Opened cache database");
        Self::init(conn)
    }

    /// Open a throwaway in-memory database.
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "foreign_keys", "ON")?;

        let version: i32 = conn
            .pragma_query_value(None, "user_version", |r| r.get(0))
            .unwrap_or(0);

        if version != 0 && version != SCHEMA_VERSION {
            info!(
                found = version,
                expected = SCHEMA_VERSION,
                "Cache schema version mismatch, rebuilding"
            );
            conn.execute_batch(
                "DROP TABLE IF EXISTS cache_entries;
                 DROP TABLE IF EXISTS caches;",
            )?;
        }

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS caches (
                name TEXT PRIMARY KEY NOT NULL,
                created_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS cache_entries (
                cache_name TEXT NOT NULL REFERENCES caches(name) ON DELETE CASCADE,
                method TEXT NOT NULL,
                url TEXT NOT NULL,
                status INTEGER NOT NULL,
                headers TEXT NOT NULL,
                body BLOB NOT NULL,
                cached_at INTEGER NOT NULL,
                PRIMARY KEY (cache_name, method, url)
            );
            "#,
        )?;

        conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| ServiceWorkerError::Storage("cache database lock poisoned".into()))
    }

    fn ensure_cache(conn: &Connection, name: &str) -> Result<()> {
        conn.execute(
            "INSERT OR IGNORE INTO caches (name, created_at) VALUES (?1, ?2)",
            params![name, reddpwa_common::now_millis() as i64],
        )?;
        Ok(())
    }

    fn cache_exists(conn: &Connection, name: &str) -> Result<bool> {
        let found: Option<i64> = conn
            .query_row("SELECT 1 FROM caches WHERE name = ?1", [name], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(found.is_some())
    }

    fn insert_entry(conn: &Connection, name: &str, entry: &CacheEntry) -> Result<()> {
        let headers = serde_json::to_string(&entry.headers)
            .map_err(|e| ServiceWorkerError::Storage(e.to_string()))?;
        conn.execute(
            "INSERT OR REPLACE INTO cache_entries
                 (cache_name, method, url, status, headers, body, cached_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                name,
                entry.method,
                entry.url,
                entry.status,
                headers,
                entry.body,
                entry.cached_at as i64
            ],
        )?;
        Ok(())
    }
}

#[async_trait]
impl CacheStorage for SqliteCacheStorage {
    async fn open(&self, name: &str) -> Result<()> {
        let conn = self.conn()?;
        Self::ensure_cache(&conn, name)
    }

    async fn has(&self, name: &str) -> Result<bool> {
        let conn = self.conn()?;
        Self::cache_exists(&conn, name)
    }

    async fn keys(&self) -> Result<Vec<String>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT name FROM caches ORDER BY name")?;
        let names = stmt
            .query_map([], |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        Ok(names)
    }

    async fn delete(&self, name: &str) -> Result<bool> {
        let conn = self.conn()?;
        let removed = conn.execute("DELETE FROM caches WHERE name = ?1", [name])?;
        Ok(removed > 0)
    }

    async fn put(&self, name: &str, entry: CacheEntry) -> Result<()> {
        let conn = self.conn()?;
        if !Self::cache_exists(&conn, name)? {
            return Err(ServiceWorkerError::NotFound(format!("cache {name}")));
        }
        Self::insert_entry(&conn, name, &entry)
    }

    async fn put_all(&self, name: &str, entries: Vec<CacheEntry>) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        Self::ensure_cache(&tx, name)?;
        for entry in &entries {
            Self::insert_entry(&tx, name, entry)?;
        }
        tx.commit()?;
        debug!(cache = %name, entries = entries.len(), "Batch committed");
        Ok(())
    }

    async fn match_entry(&self, name: &str, key: &RequestKey) -> Result<Option<CacheEntry>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                "SELECT status, headers, body, cached_at FROM cache_entries
                 WHERE cache_name = ?1 AND method = ?2 AND url = ?3",
                params![name, key.method, key.url],
                |row| {
                    Ok((
                        row.get::<_, u16>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, Vec<u8>>(2)?,
                        row.get::<_, i64>(3)?,
                    ))
                },
            )
            .optional()?;

        let Some((status, headers, body, cached_at)) = row else {
            return Ok(None);
        };

        let headers = serde_json::from_str(&headers)
            .map_err(|e| ServiceWorkerError::Storage(format!("corrupt headers: {e}")))?;

        Ok(Some(CacheEntry {
            url: key.url.clone(),
            method: key.method.clone(),
            status,
            headers,
            body,
            cached_at: cached_at.max(0) as u64,
        }))
    }

    async fn entry_keys(&self, name: &str) -> Result<Vec<RequestKey>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT method, url FROM cache_entries WHERE cache_name = ?1 ORDER BY method, url",
        )?;
        let keys = stmt
            .query_map([name], |row| {
                Ok(RequestKey {
                    method: row.get(0)?,
                    url: row.get(1)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(keys)
    }

    async fn stats(&self, name: &str) -> Result<CacheStats> {
        let conn = self.conn()?;
        let (entries, total_bytes): (i64, i64) = conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(LENGTH(body)), 0) FROM cache_entries
             WHERE cache_name = ?1",
            [name],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        Ok(CacheStats {
            entries: entries as usize,
            total_bytes: total_bytes as u64,
        })
    }
}

impl std::fmt::Debug for SqliteCacheStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteCacheStorage").finish_non_exhaustive()
    }
}
