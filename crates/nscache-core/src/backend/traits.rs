//! Object backend trait and types.

use super::circuit_breaker::CircuitBreakerStats;
use crate::error::Result;
use crate::resolver::HubResource;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Metadata reported by a hub for one object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ObjectMeta {
    /// Object size in bytes.
    pub size: u64,
    /// Entity tag as reported by the hub (quoted, as S3 returns it).
    pub etag: Option<String>,
    /// MIME type, if the hub reported one.
    pub content_type: Option<String>,
    /// Last modification time on the hub.
    pub last_modified: Option<DateTime<Utc>>,
}

/// An object body together with its metadata.
#[derive(Debug, Clone)]
pub struct FetchedObject {
    pub body: Bytes,
    pub meta: ObjectMeta,
}

/// Connector to a remote object store.
///
/// Implementations hold no per-object state. `fetch` must distinguish a
/// missing object (`ObjectNotFound`) from a transport or auth failure
/// (`BackendUnavailable`) so the orchestrator can decide between retrying
/// and propagating.
#[async_trait]
pub trait ObjectBackend: Send + Sync {
    /// Read an object from the hub's target bucket.
    async fn fetch(&self, hub: &HubResource, key: &str) -> Result<FetchedObject>;

    /// Read only an object's metadata.
    async fn head(&self, hub: &HubResource, key: &str) -> Result<ObjectMeta>;

    /// Write an object straight to the hub. Never touches any cache.
    async fn put(&self, hub: &HubResource, key: &str, body: Bytes) -> Result<ObjectMeta>;

    /// Liveness probe of the hub's target bucket.
    async fn probe(&self, hub: &HubResource) -> Result<()>;

    /// Circuit breaker snapshots, for backends that keep them.
    fn circuit_stats(&self) -> Vec<CircuitBreakerStats> {
        Vec::new()
    }
}
