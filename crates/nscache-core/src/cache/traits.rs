//! Cache store trait and types.

use super::fence::FillFences;
use crate::backend::{FetchedObject, ObjectMeta};
use crate::clock::to_chrono;
use crate::error::Result;
use crate::resolver::BucketId;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Configuration for cache behavior.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Upper bound on stored body bytes. When exceeded, the entries with the
    /// oldest `fetched_at` are reclaimed. `None` means unbounded.
    pub max_size_bytes: Option<u64>,
}

/// A cached object.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: String,
    pub body: Bytes,
    pub meta: ObjectMeta,
    pub fetched_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl CacheEntry {
    /// Build an entry fetched at `now` that stays fresh for `ttl`.
    pub fn new(
        key: impl Into<String>,
        object: FetchedObject,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Self {
        Self {
            key: key.into(),
            body: object.body,
            meta: object.meta,
            fetched_at: now,
            expires_at: expiry(now, ttl),
        }
    }

    /// Fresh iff `now < expires_at`.
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }

    pub fn size(&self) -> u64 {
        self.body.len() as u64
    }

    pub fn info(&self, now: DateTime<Utc>) -> CachedObjectInfo {
        CachedObjectInfo {
            key: self.key.clone(),
            size: self.size(),
            etag: self.meta.etag.clone(),
            content_type: self.meta.content_type.clone(),
            last_modified: self.meta.last_modified,
            fetched_at: self.fetched_at,
            expires_at: self.expires_at,
            fresh: self.is_fresh(now),
        }
    }
}

/// `now + ttl`, saturating at the largest representable instant.
pub(crate) fn expiry(now: DateTime<Utc>, ttl: Duration) -> DateTime<Utc> {
    now.checked_add_signed(to_chrono(ttl))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// One row of a cached-object listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedObjectInfo {
    pub key: String,
    pub size: u64,
    pub etag: Option<String>,
    pub content_type: Option<String>,
    pub last_modified: Option<DateTime<Utc>>,
    pub fetched_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub fresh: bool,
}

/// Ticket for a cache fill, taken before the backend fetch starts.
///
/// [`CacheStore::complete_fill`] stores the fetched object only if the key
/// was not evicted, and its bucket not cleared, after the ticket was taken.
#[derive(Debug)]
pub struct FillToken {
    pub(crate) bucket: BucketId,
    pub(crate) key: String,
    pub(crate) seq: u64,
    pub(crate) fences: Arc<FillFences>,
}

impl FillToken {
    pub fn bucket(&self) -> &BucketId {
        &self.bucket
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for FillToken {
    fn drop(&mut self) {
        self.fences.release(self.seq);
    }
}

/// Entry count and bytes held for one bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketCacheStats {
    pub bucket_id: BucketId,
    pub entries: usize,
    pub bytes: u64,
}

/// Cache statistics across all buckets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheStats {
    pub total_entries: usize,
    pub total_bytes: u64,
    pub max_size_bytes: Option<u64>,
    pub buckets: Vec<BucketCacheStats>,
}

/// Storage for cached objects keyed by (bucket id, object key).
///
/// Entries stay stored after they go stale; freshness is a property of the
/// entry checked against the store's clock, not a reason to drop it. Only
/// `evict`, `clear`, `purge_expired` and capacity reclamation remove
/// entries. All operations are synchronous to match rusqlite's API.
pub trait CacheStore: Send + Sync {
    /// Current time on the store's clock.
    fn now(&self) -> DateTime<Utc>;

    /// Look up an entry, fresh or stale.
    fn get(&self, bucket: &BucketId, key: &str) -> Result<Option<CacheEntry>>;

    /// Insert or overwrite an entry fetched now.
    fn put(&self, bucket: &BucketId, key: &str, object: FetchedObject, ttl: Duration)
        -> Result<CacheEntry>;

    /// Take a fill ticket for `key`.
    fn begin_fill(&self, bucket: &BucketId, key: &str) -> FillToken;

    /// Store a fetched object under a fill ticket.
    ///
    /// Returns `None` without storing anything if an explicit evict or clear
    /// fenced the ticket.
    fn complete_fill(&self, token: FillToken, object: FetchedObject, ttl: Duration)
        -> Result<Option<CacheEntry>>;

    /// Sorted keys held for a bucket, fresh or stale.
    fn list_keys(&self, bucket: &BucketId) -> Result<Vec<String>>;

    /// Sorted listing rows for a bucket.
    fn list_entries(&self, bucket: &BucketId) -> Result<Vec<CachedObjectInfo>>;

    /// Remove one entry. Fences fills of that key that are in flight.
    fn evict(&self, bucket: &BucketId, key: &str) -> Result<bool>;

    /// Remove every entry of a bucket. Fences fills in that bucket.
    fn clear(&self, bucket: &BucketId) -> Result<usize>;

    /// Reclaim entries whose `expires_at + grace` has passed.
    fn purge_expired(&self, grace: Duration) -> Result<usize>;

    fn stats(&self) -> Result<CacheStats>;
}
