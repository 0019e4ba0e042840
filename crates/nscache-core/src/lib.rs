//! nscache core - headless namespace-cache gateway.
//!
//! A namespace bucket is a logical bucket backed by one or more hub
//! resources (remote S3-compatible buckets). Reads go through a local cache
//! with a per-bucket TTL; writes go around it to the hub. Listing a
//! namespace bucket shows what is cached, not what the hub holds.
//!
//! This crate has no HTTP/RPC layer; see `nscache-rpc` for the server.
//!
//! # Example
//!
//! ```rust,ignore
//! use nscache_core::{Gateway, HubResourceSpec, MemoryBackend};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> nscache_core::Result<()> {
//!     let hub = Arc::new(MemoryBackend::auto_creating());
//!     let gateway = Gateway::builder().backend(hub).build().await?;
//!
//!     gateway
//!         .create_hub_resource(HubResourceSpec::new("h1", "http://hub.local", "data"))
//!         .await?;
//!     gateway.create_namespace_bucket("ns1", "h1", 60_000).await?;
//!
//!     gateway.put_object("ns1", "testfile0.txt", "hello".into()).await?;
//!     let object = gateway.get_object("ns1", "testfile0.txt").await?;
//!     println!("{} bytes ({})", object.body.len(), object.source.as_str());
//!
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod cache;
pub mod clock;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod resolver;

mod api;

pub use backend::{
    CircuitBreakerStats, CircuitState, FetchedObject, HttpBackend, MemoryBackend, ObjectBackend,
    ObjectMeta, RetryConfig,
};
pub use cache::{
    CacheConfig, CacheEntry, CacheStats, CacheStore, CachedObjectInfo, MemoryCacheStore,
    SqliteCacheStore,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::GatewayConfig;
pub use error::{GatewayError, Result};
pub use orchestrator::{ObjectRead, OrchestratorStats, ReadPolicy, ReadSource};
pub use resolver::{
    BucketId, CreateBucketRequest, HubResource, HubResourceInfo, HubResourceSpec,
    NamespaceBucket, ResourceHealth,
};

pub use api::{GatewayBuilder, GatewayStats};

use api::GatewayInner;
use std::sync::Arc;

/// Main entry point for gateway operations.
///
/// Cheap to clone; all clones share the same registry, cache store and
/// in-flight fetch table.
#[derive(Clone)]
pub struct Gateway {
    inner: Arc<GatewayInner>,
}

impl Gateway {
    /// Create a builder for a gateway.
    pub fn builder() -> GatewayBuilder {
        GatewayBuilder::new()
    }

    /// Build a gateway from a configuration file's contents and bootstrap
    /// the resources and buckets it declares.
    pub async fn from_config(config: GatewayConfig) -> Result<Self> {
        GatewayBuilder::from_config(config).await
    }

    fn inner(&self) -> &GatewayInner {
        &self.inner
    }
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("buckets", &self.inner.resolver.list_buckets().len())
            .field("resources", &self.inner.resolver.list_hub_resources().len())
            .finish()
    }
}
