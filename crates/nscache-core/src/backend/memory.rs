//! In-process hub backend.
//!
//! Stands in for a remote object store in tests and in the server's
//! `memory` backend mode. Buckets are addressed by the hub's target bucket
//! name. Every `fetch` is counted so callers can assert how many times the
//! cache actually went to the hub.

use super::traits::{FetchedObject, ObjectBackend, ObjectMeta};
use crate::error::{GatewayError, Result};
use crate::resolver::HubResource;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone)]
struct StoredObject {
    body: Bytes,
    meta: ObjectMeta,
}

/// In-memory object store keyed by target bucket and object key.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    buckets: RwLock<HashMap<String, BTreeMap<String, StoredObject>>>,
    fetch_counts: RwLock<HashMap<(String, String), u64>>,
    total_fetches: AtomicU64,
    unavailable: AtomicBool,
    fetch_delay_ms: AtomicU64,
    auto_create: bool,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// A backend that creates a target bucket the first time a resource
    /// over it is probed or written to.
    pub fn auto_creating() -> Self {
        Self {
            auto_create: true,
            ..Self::default()
        }
    }

    /// Create an empty target bucket so probes against it succeed.
    pub fn create_bucket(&self, bucket: &str) {
        self.buckets
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(bucket.to_string())
            .or_default();
    }

    /// Remove a target bucket and everything in it.
    pub fn delete_bucket(&self, bucket: &str) -> bool {
        self.buckets
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(bucket)
            .is_some()
    }

    /// Write an object directly, creating the bucket if needed.
    pub fn insert(&self, bucket: &str, key: &str, body: impl Into<Bytes>) -> ObjectMeta {
        let body = body.into();
        let meta = ObjectMeta {
            size: body.len() as u64,
            etag: Some(etag_for(&body)),
            content_type: Some("application/octet-stream".to_string()),
            last_modified: Some(Utc::now()),
        };
        self.buckets
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(bucket.to_string())
            .or_default()
            .insert(
                key.to_string(),
                StoredObject {
                    body,
                    meta: meta.clone(),
                },
            );
        meta
    }

    /// Delete an object directly.
    pub fn remove(&self, bucket: &str, key: &str) -> bool {
        self.buckets
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .get_mut(bucket)
            .map(|objects| objects.remove(key).is_some())
            .unwrap_or(false)
    }

    /// Keys currently stored in a target bucket.
    pub fn keys(&self, bucket: &str) -> Vec<String> {
        self.buckets
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(bucket)
            .map(|objects| objects.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Simulate a transport outage: every call fails with `BackendUnavailable`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Add latency to every fetch.
    pub fn set_fetch_delay(&self, delay: Duration) {
        self.fetch_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Total number of `fetch` calls, successful or not.
    pub fn fetch_count(&self) -> u64 {
        self.total_fetches.load(Ordering::SeqCst)
    }

    /// Number of `fetch` calls for one object.
    pub fn fetch_count_for(&self, bucket: &str, key: &str) -> u64 {
        self.fetch_counts
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(bucket.to_string(), key.to_string()))
            .copied()
            .unwrap_or(0)
    }

    fn check_available(&self, hub: &HubResource) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(GatewayError::unavailable(&hub.name, "connection refused"))
        } else {
            Ok(())
        }
    }

    fn lookup(&self, hub: &HubResource, key: &str) -> Result<StoredObject> {
        let buckets = self.buckets.read().unwrap_or_else(PoisonError::into_inner);
        let objects = buckets.get(&hub.target_bucket).ok_or_else(|| {
            GatewayError::unavailable(
                &hub.name,
                format!("target bucket {} does not exist", hub.target_bucket),
            )
        })?;
        objects
            .get(key)
            .cloned()
            .ok_or_else(|| GatewayError::ObjectNotFound {
                bucket: hub.target_bucket.clone(),
                key: key.to_string(),
            })
    }
}

#[async_trait]
impl ObjectBackend for MemoryBackend {
    async fn fetch(&self, hub: &HubResource, key: &str) -> Result<FetchedObject> {
        self.total_fetches.fetch_add(1, Ordering::SeqCst);
        *self
            .fetch_counts
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry((hub.target_bucket.clone(), key.to_string()))
            .or_insert(0) += 1;

        let delay_ms = self.fetch_delay_ms.load(Ordering::SeqCst);
        if delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
        }

        self.check_available(hub)?;
        let stored = self.lookup(hub, key)?;
        debug!(
            "memory hub {} served {}/{} ({} bytes)",
            hub.name, hub.target_bucket, key, stored.meta.size
        );
        Ok(FetchedObject {
            body: stored.body,
            meta: stored.meta,
        })
    }

    async fn head(&self, hub: &HubResource, key: &str) -> Result<ObjectMeta> {
        self.check_available(hub)?;
        self.lookup(hub, key).map(|stored| stored.meta)
    }

    async fn put(&self, hub: &HubResource, key: &str, body: Bytes) -> Result<ObjectMeta> {
        self.check_available(hub)?;
        if self.auto_create {
            self.create_bucket(&hub.target_bucket);
        }
        if !self
            .buckets
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&hub.target_bucket)
        {
            return Err(GatewayError::HubRejected {
                resource: hub.name.clone(),
                status: 404,
                message: format!("PUT {}: no target bucket {}", key, hub.target_bucket),
            });
        }
        Ok(self.insert(&hub.target_bucket, key, body))
    }

    async fn probe(&self, hub: &HubResource) -> Result<()> {
        self.check_available(hub)?;
        if self.auto_create {
            self.create_bucket(&hub.target_bucket);
        }
        if self
            .buckets
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&hub.target_bucket)
        {
            Ok(())
        } else {
            Err(GatewayError::unavailable(
                &hub.name,
                format!("target bucket {} does not exist", hub.target_bucket),
            ))
        }
    }
}

/// Quoted hex digest, shaped like an S3 ETag.
fn etag_for(body: &[u8]) -> String {
    let digest = Sha256::digest(body);
    format!("\"{}\"", hex::encode(&digest[..16]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::{HubResource, HubResourceSpec};

    fn hub() -> HubResource {
        HubResource::from_spec(HubResourceSpec {
            name: "h1".into(),
            endpoint: "http://memory.local".into(),
            region: None,
            target_bucket: "target".into(),
            credentials_ref: None,
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_fetch_counts_and_not_found() {
        let backend = MemoryBackend::new();
        backend.insert("target", "a.txt", &b"hello"[..]);

        let fetched = backend.fetch(&hub(), "a.txt").await.unwrap();
        assert_eq!(&fetched.body[..], b"hello");
        assert_eq!(fetched.meta.size, 5);

        let missing = backend.fetch(&hub(), "b.txt").await;
        assert!(matches!(missing, Err(GatewayError::ObjectNotFound { .. })));

        assert_eq!(backend.fetch_count(), 2);
        assert_eq!(backend.fetch_count_for("target", "a.txt"), 1);
    }

    #[tokio::test]
    async fn test_put_without_target_bucket_is_rejected() {
        let backend = MemoryBackend::new();
        let err = backend
            .put(&hub(), "a.txt", Bytes::from_static(b"x"))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::HubRejected { status: 404, .. }));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_probe_requires_bucket() {
        let backend = MemoryBackend::new();
        assert!(backend.probe(&hub()).await.is_err());
        backend.create_bucket("target");
        assert!(backend.probe(&hub()).await.is_ok());
    }

    #[tokio::test]
    async fn test_unavailable() {
        let backend = MemoryBackend::new();
        backend.insert("target", "a.txt", &b"hello"[..]);
        backend.set_unavailable(true);
        let err = backend.fetch(&hub(), "a.txt").await.unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_auto_creating_probe() {
        let backend = MemoryBackend::auto_creating();
        assert!(backend.probe(&hub()).await.is_ok());
        assert!(backend.keys("target").is_empty());
    }

    #[test]
    fn test_overwrite_changes_etag() {
        let backend = MemoryBackend::new();
        let first = backend.insert("target", "a.txt", &b"one"[..]);
        let second = backend.insert("target", "a.txt", &b"two"[..]);
        assert_ne!(first.etag, second.etag);
        assert_eq!(backend.keys("target"), vec!["a.txt".to_string()]);
    }
}
