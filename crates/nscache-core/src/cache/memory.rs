//! In-memory cache store.
//!
//! Entries live in one shard per bucket. The shard map lock is held (shared)
//! for as long as a shard lock is held, so `clear` can drop a whole shard
//! without racing a concurrent insert into it. No lock is held while the
//! caller does backend I/O.

use super::fence::FillFences;
use super::traits::{
    BucketCacheStats, CacheConfig, CacheEntry, CacheStats, CacheStore, CachedObjectInfo,
    FillToken,
};
use crate::backend::FetchedObject;
use crate::clock::{to_chrono, Clock};
use crate::error::Result;
use crate::resolver::BucketId;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;
use tracing::debug;

type Shard = Mutex<BTreeMap<String, CacheEntry>>;

/// Cache store held entirely in memory.
pub struct MemoryCacheStore {
    clock: Arc<dyn Clock>,
    config: CacheConfig,
    shards: RwLock<HashMap<BucketId, Arc<Shard>>>,
    total_bytes: AtomicU64,
    fences: Arc<FillFences>,
}

impl MemoryCacheStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self::with_config(clock, CacheConfig::default())
    }

    pub fn with_config(clock: Arc<dyn Clock>, config: CacheConfig) -> Self {
        Self {
            clock,
            config,
            shards: RwLock::new(HashMap::new()),
            total_bytes: AtomicU64::new(0),
            fences: FillFences::new(),
        }
    }

    /// Run `f` on the bucket's shard, creating it if needed.
    fn with_shard_mut<T>(
        &self,
        bucket: &BucketId,
        f: impl FnOnce(&mut BTreeMap<String, CacheEntry>) -> T,
    ) -> T {
        {
            let shards = self.shards.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(shard) = shards.get(bucket) {
                let mut entries = shard.lock().unwrap_or_else(PoisonError::into_inner);
                return f(&mut entries);
            }
        }
        let mut shards = self.shards.write().unwrap_or_else(PoisonError::into_inner);
        let shard = shards.entry(bucket.clone()).or_default().clone();
        let mut entries = shard.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut entries)
    }

    /// Run `f` on the bucket's shard if it exists.
    fn with_shard<T>(
        &self,
        bucket: &BucketId,
        f: impl FnOnce(&mut BTreeMap<String, CacheEntry>) -> T,
    ) -> Option<T> {
        let shards = self.shards.read().unwrap_or_else(PoisonError::into_inner);
        let shard = shards.get(bucket)?;
        let mut entries = shard.lock().unwrap_or_else(PoisonError::into_inner);
        Some(f(&mut entries))
    }

    fn insert(entries: &mut BTreeMap<String, CacheEntry>, entry: CacheEntry, total: &AtomicU64) {
        total.fetch_add(entry.size(), Ordering::SeqCst);
        if let Some(old) = entries.insert(entry.key.clone(), entry) {
            total.fetch_sub(old.size(), Ordering::SeqCst);
        }
    }

    /// Reclaim the oldest entries until the store is back under its bound.
    fn enforce_capacity(&self) {
        let Some(max) = self.config.max_size_bytes else {
            return;
        };
        if self.total_bytes.load(Ordering::SeqCst) <= max {
            return;
        }

        let mut candidates: Vec<(DateTime<Utc>, BucketId, String)> = {
            let shards = self.shards.read().unwrap_or_else(PoisonError::into_inner);
            shards
                .iter()
                .flat_map(|(bucket, shard)| {
                    let entries = shard.lock().unwrap_or_else(PoisonError::into_inner);
                    entries
                        .values()
                        .map(|e| (e.fetched_at, bucket.clone(), e.key.clone()))
                        .collect::<Vec<_>>()
                })
                .collect()
        };
        candidates.sort_by(|a, b| a.0.cmp(&b.0));

        let mut reclaimed = 0;
        for (fetched_at, bucket, key) in candidates {
            if self.total_bytes.load(Ordering::SeqCst) <= max {
                break;
            }
            let removed = self.with_shard(&bucket, |entries| {
                // Skip entries refreshed since the scan.
                if entries.get(&key).map(|e| e.fetched_at) == Some(fetched_at) {
                    entries.remove(&key)
                } else {
                    None
                }
            });
            if let Some(Some(entry)) = removed {
                self.total_bytes.fetch_sub(entry.size(), Ordering::SeqCst);
                reclaimed += 1;
            }
        }
        if reclaimed > 0 {
            debug!("Reclaimed {} entries to stay under {} bytes", reclaimed, max);
        }
    }
}

impl CacheStore for MemoryCacheStore {
    fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    fn get(&self, bucket: &BucketId, key: &str) -> Result<Option<CacheEntry>> {
        Ok(self
            .with_shard(bucket, |entries| entries.get(key).cloned())
            .flatten())
    }

    fn put(
        &self,
        bucket: &BucketId,
        key: &str,
        object: FetchedObject,
        ttl: Duration,
    ) -> Result<CacheEntry> {
        let entry = CacheEntry::new(key, object, self.clock.now(), ttl);
        self.with_shard_mut(bucket, |entries| {
            Self::insert(entries, entry.clone(), &self.total_bytes)
        });
        self.enforce_capacity();
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
        let entry = CacheEntry::new(token.key(), object, self.clock.now(), ttl);
        let stored = self.with_shard_mut(token.bucket(), |entries| {
            if !self.fences.admits(&token) {
                return false;
            }
            Self::insert(entries, entry.clone(), &self.total_bytes);
            true
        });
        if !stored {
            debug!(
                "Discarded fill of {}/{}: evicted while in flight",
                token.bucket(),
                token.key()
            );
            return Ok(None);
        }
        self.enforce_capacity();
        Ok(Some(entry))
    }

    fn list_keys(&self, bucket: &BucketId) -> Result<Vec<String>> {
        Ok(self
            .with_shard(bucket, |entries| entries.keys().cloned().collect())
            .unwrap_or_default())
    }

    fn list_entries(&self, bucket: &BucketId) -> Result<Vec<CachedObjectInfo>> {
        let now = self.clock.now();
        Ok(self
            .with_shard(bucket, |entries| {
                entries.values().map(|e| e.info(now)).collect()
            })
            .unwrap_or_default())
    }

    fn evict(&self, bucket: &BucketId, key: &str) -> Result<bool> {
        let removed = self.with_shard_mut(bucket, |entries| {
            let removed = entries.remove(key);
            self.fences.fence_key(bucket, key);
            removed
        });
        Ok(match removed {
            Some(entry) => {
                self.total_bytes.fetch_sub(entry.size(), Ordering::SeqCst);
                true
            }
            None => false,
        })
    }

    fn clear(&self, bucket: &BucketId) -> Result<usize> {
        let mut shards = self.shards.write().unwrap_or_else(PoisonError::into_inner);
        self.fences.fence_bucket(bucket);
        let Some(shard) = shards.remove(bucket) else {
            return Ok(0);
        };
        let entries = std::mem::take(&mut *shard.lock().unwrap_or_else(PoisonError::into_inner));
        let bytes: u64 = entries.values().map(CacheEntry::size).sum();
        self.total_bytes.fetch_sub(bytes, Ordering::SeqCst);
        debug!("Cleared {} entries from bucket {}", entries.len(), bucket);
        Ok(entries.len())
    }

    fn purge_expired(&self, grace: Duration) -> Result<usize> {
        let cutoff = self
            .clock
            .now()
            .checked_sub_signed(to_chrono(grace))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);

        let shards = self.shards.read().unwrap_or_else(PoisonError::into_inner);
        let mut purged = 0;
        for shard in shards.values() {
            let mut entries = shard.lock().unwrap_or_else(PoisonError::into_inner);
            let before = entries.len();
            let mut freed = 0;
            entries.retain(|_, e| {
                let keep = e.expires_at > cutoff;
                if !keep {
                    freed += e.size();
                }
                keep
            });
            self.total_bytes.fetch_sub(freed, Ordering::SeqCst);
            purged += before - entries.len();
        }
        if purged > 0 {
            debug!("Purged {} expired cache entries", purged);
        }
        Ok(purged)
    }

    fn stats(&self) -> Result<CacheStats> {
        let shards = self.shards.read().unwrap_or_else(PoisonError::into_inner);
        let mut buckets: Vec<BucketCacheStats> = shards
            .iter()
            .map(|(bucket, shard)| {
                let entries = shard.lock().unwrap_or_else(PoisonError::into_inner);
                BucketCacheStats {
                    bucket_id: bucket.clone(),
                    entries: entries.len(),
                    bytes: entries.values().map(CacheEntry::size).sum(),
                }
            })
            .filter(|b| b.entries > 0)
            .collect();
        buckets.sort_by(|a, b| a.bucket_id.as_str().cmp(b.bucket_id.as_str()));

        Ok(CacheStats {
            total_entries: buckets.iter().map(|b| b.entries).sum(),
            total_bytes: buckets.iter().map(|b| b.bytes).sum(),
            max_size_bytes: self.config.max_size_bytes,
            buckets,
        })
    }
}
