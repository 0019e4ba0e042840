//! SQLite-backed persistent cache store.

use super::fence::FillFences;
use super::traits::{
    BucketCacheStats, CacheConfig, CacheEntry, CacheStats, CacheStore, CachedObjectInfo,
    FillToken,
};
use crate::backend::{FetchedObject, ObjectMeta};
use crate::clock::{to_chrono, Clock};
use crate::error::{GatewayError, Result};
use crate::resolver::BucketId;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::debug;

const ENTRY_COLUMNS: &str =
    "key, body, etag, content_type, last_modified_ms, fetched_at_ms, expires_at_ms";

/// Persistent cache store.
///
/// Thread-safe via an internal mutex on the connection. Timestamps are
/// stored as Unix milliseconds.
pub struct SqliteCacheStore {
    conn: Arc<Mutex<Connection>>,
    clock: Arc<dyn Clock>,
    config: CacheConfig,
    fences: Arc<FillFences>,
}

impl SqliteCacheStore {
    /// Open (or create) a store at the given database path.
    pub fn open(db_path: impl AsRef<Path>, clock: Arc<dyn Clock>) -> Result<Self> {
        Self::with_config(db_path, clock, CacheConfig::default())
    }

    pub fn with_config(
        db_path: impl AsRef<Path>,
        clock: Arc<dyn Clock>,
        config: CacheConfig,
    ) -> Result<Self> {
        let db_path = db_path.as_ref();

        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| GatewayError::Io {
                message: format!("Failed to create cache directory: {}", e),
                path: Some(parent.to_path_buf()),
                source: Some(e),
            })?;
        }

        let conn = Connection::open(db_path).map_err(|e| GatewayError::Database {
            message: format!("Failed to open cache database: {}", e),
            source: Some(e),
        })?;

        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(|e| GatewayError::Database {
                message: format!("Failed to set pragmas: {}", e),
                source: Some(e),
            })?;

        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
            clock,
            config,
            fences: FillFences::new(),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|e| GatewayError::Database {
            message: format!("Failed to lock database: {}", e),
            source: None,
        })
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.conn()?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS cache_entries (
                bucket_id TEXT NOT NULL,
                key TEXT NOT NULL,
                body BLOB NOT NULL,
                size_bytes INTEGER NOT NULL,
                etag TEXT,
                content_type TEXT,
                last_modified_ms INTEGER,
                fetched_at_ms INTEGER NOT NULL,
                expires_at_ms INTEGER NOT NULL,
                PRIMARY KEY (bucket_id, key)
            );

            -- Reaper scans
            CREATE INDEX IF NOT EXISTS idx_cache_expires
                ON cache_entries(expires_at_ms);

            -- Capacity reclamation, oldest first
            CREATE INDEX IF NOT EXISTS idx_cache_fetched
                ON cache_entries(fetched_at_ms);
            "#,
        )
        .map_err(|e| GatewayError::Database {
            message: format!("Failed to initialize cache schema: {}", e),
            source: Some(e),
        })
    }

    /// Current time truncated to what the database can hold.
    fn now_ms(&self) -> i64 {
        self.clock.now().timestamp_millis()
    }

    fn write_entry(
        conn: &Connection,
        bucket: &BucketId,
        key: &str,
        object: FetchedObject,
        now_ms: i64,
        ttl: Duration,
    ) -> Result<CacheEntry> {
        let fetched_at = from_millis(now_ms);
        let entry = CacheEntry::new(key, object, fetched_at, ttl);
        conn.execute(
            r#"
            INSERT OR REPLACE INTO cache_entries
            (bucket_id, key, body, size_bytes, etag, content_type,
             last_modified_ms, fetched_at_ms, expires_at_ms)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
            params![
                bucket.as_str(),
                key,
                &entry.body[..],
                entry.size() as i64,
                entry.meta.etag,
                entry.meta.content_type,
                entry.meta.last_modified.map(|t| t.timestamp_millis()),
                now_ms,
                entry.expires_at.timestamp_millis(),
            ],
        )
        .map_err(|e| GatewayError::Database {
            message: format!("Failed to store cache entry {}/{}: {}", bucket, key, e),
            source: Some(e),
        })?;
        Ok(entry)
    }

    fn enforce_capacity(&self) -> Result<()> {
        let Some(max) = self.config.max_size_bytes else {
            return Ok(());
        };
        let conn = self.conn()?;
        let total: i64 = conn.query_row(
            "SELECT COALESCE(SUM(size_bytes), 0) FROM cache_entries",
            [],
            |row| row.get(0),
        )?;
        if total as u64 <= max {
            return Ok(());
        }

        let excess = total as u64 - max;
        let mut stmt = conn.prepare(
            "SELECT bucket_id, key, size_bytes FROM cache_entries ORDER BY fetched_at_ms ASC",
        )?;
        let oldest: Vec<(String, String, i64)> = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?
            .collect::<std::result::Result<_, _>>()?;
        drop(stmt);

        let mut freed = 0u64;
        let mut reclaimed = 0;
        for (bucket_id, key, size) in oldest {
            if freed >= excess {
                break;
            }
            conn.execute(
                "DELETE FROM cache_entries WHERE bucket_id = ?1 AND key = ?2",
                params![bucket_id, key],
            )?;
            freed += size as u64;
            reclaimed += 1;
        }
        debug!("Reclaimed {} entries ({} bytes) to stay under {} bytes", reclaimed, freed, max);
        Ok(())
    }
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or(DateTime::<Utc>::MAX_UTC)
}

fn entry_from_row(row: &Row<'_>) -> rusqlite::Result<CacheEntry> {
    let body: Vec<u8> = row.get(1)?;
    let last_modified: Option<i64> = row.get(4)?;
    Ok(CacheEntry {
        key: row.get(0)?,
        meta: ObjectMeta {
            size: body.len() as u64,
            etag: row.get(2)?,
            content_type: row.get(3)?,
            last_modified: last_modified.map(from_millis),
        },
        body: Bytes::from(body),
        fetched_at: from_millis(row.get(5)?),
        expires_at: from_millis(row.get(6)?),
    })
}

impl CacheStore for SqliteCacheStore {
    fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    fn get(&self, bucket: &BucketId, key: &str) -> Result<Option<CacheEntry>> {
        let conn = self.conn()?;
        conn.query_row(
            &format!(
                "SELECT {} FROM cache_entries WHERE bucket_id = ?1 AND key = ?2",
                ENTRY_COLUMNS
            ),
            params![bucket.as_str(), key],
            entry_from_row,
        )
        .optional()
        .map_err(|e| GatewayError::Database {
            message: format!("Failed to query cache entry: {}", e),
            source: Some(e),
        })
    }

    fn put(
        &self,
        bucket: &BucketId,
        key: &str,
        object: FetchedObject,
        ttl: Duration,
    ) -> Result<CacheEntry> {
        let entry = {
            let conn = self.conn()?;
            Self::write_entry(&conn, bucket, key, object, self.now_ms(), ttl)?
        };
        self.enforce_capacity()?;
        Ok(entry)
    }

    fn begin_fill(&self, bucket: &BucketId, key: &str) -> FillToken {
        self.fences.begin(bucket, key)
    }

    fn complete_fill(
        &self,
        token: FillToken,
        object: FetchedObject,
        ttl: Duration,
    ) -> Result<Option<CacheEntry>> {
        let entry = {
            let conn = self.conn()?;
            if !self.fences.admits(&token) {
                debug!(
                    "Discarded fill of {}/{}: evicted while in flight",
                    token.bucket(),
                    token.key()
                );
                return Ok(None);
            }
            Self::write_entry(&conn, token.bucket(), token.key(), object, self.now_ms(), ttl)?
        };
        self.enforce_capacity()?;
        Ok(Some(entry))
    }

    fn list_keys(&self, bucket: &BucketId) -> Result<Vec<String>> {
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare("SELECT key FROM cache_entries WHERE bucket_id = ?1 ORDER BY key")?;
        let keys = stmt
            .query_map(params![bucket.as_str()], |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        Ok(keys)
    }

    fn list_entries(&self, bucket: &BucketId) -> Result<Vec<CachedObjectInfo>> {
        let now = self.clock.now();
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM cache_entries WHERE bucket_id = ?1 ORDER BY key",
            ENTRY_COLUMNS
        ))?;
        let entries = stmt
            .query_map(params![bucket.as_str()], entry_from_row)?
            .map(|row| row.map(|entry| entry.info(now)))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    fn evict(&self, bucket: &BucketId, key: &str) -> Result<bool> {
        let conn = self.conn()?;
        let deleted = conn
            .execute(
                "DELETE FROM cache_entries WHERE bucket_id = ?1 AND key = ?2",
                params![bucket.as_str(), key],
            )
            .map_err(|e| GatewayError::Database {
                message: format!("Failed to evict cache entry: {}", e),
                source: Some(e),
            })?;
        self.fences.fence_key(bucket, key);
        Ok(deleted > 0)
    }

    fn clear(&self, bucket: &BucketId) -> Result<usize> {
        let conn = self.conn()?;
        let deleted = conn
            .execute(
                "DELETE FROM cache_entries WHERE bucket_id = ?1",
                params![bucket.as_str()],
            )
            .map_err(|e| GatewayError::Database {
                message: format!("Failed to clear bucket cache: {}", e),
                source: Some(e),
            })?;
        self.fences.fence_bucket(bucket);
        debug!("Cleared {} entries from bucket {}", deleted, bucket);
        Ok(deleted)
    }

    fn purge_expired(&self, grace: Duration) -> Result<usize> {
        let cutoff = self
            .clock
            .now()
            .checked_sub_signed(to_chrono(grace))
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
            .timestamp_millis();

        let conn = self.conn()?;
        let deleted = conn
            .execute(
                "DELETE FROM cache_entries WHERE expires_at_ms <= ?1",
                params![cutoff],
            )
            .map_err(|e| GatewayError::Database {
                message: format!("Failed to purge expired entries: {}", e),
                source: Some(e),
            })?;
        if deleted > 0 {
            debug!("Purged {} expired cache entries", deleted);
        }
        Ok(deleted)
    }

    fn stats(&self) -> Result<CacheStats> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT bucket_id, COUNT(*), COALESCE(SUM(size_bytes), 0)
            FROM cache_entries
            GROUP BY bucket_id
            ORDER BY bucket_id
            "#,
        )?;
        let buckets = stmt
            .query_map([], |row| {
                let bucket_id: String = row.get(0)?;
                let entries: i64 = row.get(1)?;
                let bytes: i64 = row.get(2)?;
                Ok((bucket_id, entries, bytes))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?
            .into_iter()
            .filter_map(|(bucket_id, entries, bytes)| {
                BucketId::parse(&bucket_id).ok().map(|bucket_id| BucketCacheStats {
                    bucket_id,
                    entries: entries as usize,
                    bytes: bytes as u64,
                })
            })
            .collect::<Vec<_>>();

        Ok(CacheStats {
            total_entries: buckets.iter().map(|b| b.entries).sum(),
            total_bytes: buckets.iter().map(|b| b.bytes).sum(),
            max_size_bytes: self.config.max_size_bytes,
            buckets,
        })
    }
}
