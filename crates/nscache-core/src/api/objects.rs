//! Object reads, writes and cache queries on Gateway.

use bytes::Bytes;

use crate::backend::ObjectMeta;
use crate::cache::CachedObjectInfo;
use crate::error::{GatewayError, Result};
use crate::orchestrator::ObjectRead;
use crate::resolver::validate_object_key;
use crate::Gateway;

impl Gateway {
    // ========================================
    // Reads
    // ========================================

    /// Read an object through the cache, fetching from the hubs on a miss
    /// or once the cached copy has expired.
    pub async fn get_object(&self, bucket: &str, key: &str) -> Result<ObjectRead> {
        self.inner().orchestrator.read(bucket, key).await
    }

    /// Metadata of a cached object. Never contacts the hub: an uncached key
    /// is `ObjectNotFound` even if the hub has it.
    pub fn head_object(&self, bucket: &str, key: &str) -> Result<CachedObjectInfo> {
        validate_object_key(key)?;
        let ns = self.inner().resolver.bucket(bucket)?;
        let store = &self.inner().store;
        store
            .get(&ns.id, key)?
            .map(|entry| entry.info(store.now()))
            .ok_or_else(|| GatewayError::ObjectNotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            })
    }

    /// Keys currently cached for a bucket, sorted. Hub-only keys are not
    /// listed.
    pub fn list_objects(&self, bucket: &str) -> Result<Vec<String>> {
        let ns = self.inner().resolver.bucket(bucket)?;
        self.inner().store.list_keys(&ns.id)
    }

    /// Cached entries of a bucket with their metadata and freshness.
    pub fn list_cached_objects(&self, bucket: &str) -> Result<Vec<CachedObjectInfo>> {
        let ns = self.inner().resolver.bucket(bucket)?;
        self.inner().store.list_entries(&ns.id)
    }

    // ========================================
    // Writes
    // ========================================

    /// Write to the bucket's primary hub. The cache is not updated; a cached
    /// copy keeps being served until its TTL runs out.
    pub async fn put_object(&self, bucket: &str, key: &str, body: Bytes) -> Result<ObjectMeta> {
        self.inner().orchestrator.put_object(bucket, key, body).await
    }

    /// Write directly to a hub resource, bypassing every namespace bucket.
    pub async fn put_direct(&self, resource: &str, key: &str, body: Bytes) -> Result<ObjectMeta> {
        self.inner().orchestrator.put_direct(resource, key, body).await
    }
}
