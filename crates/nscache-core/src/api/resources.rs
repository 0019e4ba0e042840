//! Hub resource and namespace bucket lifecycle on Gateway.

use std::sync::Arc;

use crate::error::Result;
use crate::resolver::{
    BucketId, CreateBucketRequest, HubResourceInfo, HubResourceSpec, NamespaceBucket,
};
use crate::Gateway;
use tracing::info;

impl Gateway {
    // ========================================
    // Hub Resources
    // ========================================

    /// Register a hub resource after a successful liveness probe.
    pub async fn create_hub_resource(&self, spec: HubResourceSpec) -> Result<HubResourceInfo> {
        self.inner().resolver.create_hub_resource(spec).await
    }

    /// Remove a hub resource no bucket references.
    pub fn delete_hub_resource(&self, name: &str) -> Result<()> {
        self.inner().resolver.delete_hub_resource(name)
    }

    pub fn list_hub_resources(&self) -> Vec<HubResourceInfo> {
        self.inner().resolver.list_hub_resources()
    }

    /// Probe a resource again and record the result.
    pub async fn check_resource_health(&self, name: &str) -> Result<HubResourceInfo> {
        self.inner().resolver.check_resource_health(name).await
    }

    // ========================================
    // Namespace Buckets
    // ========================================

    /// Create a namespace bucket over a single hub resource.
    pub async fn create_namespace_bucket(
        &self,
        name: &str,
        hub_resource: &str,
        ttl_ms: u64,
    ) -> Result<BucketId> {
        self.create_namespace_bucket_with(CreateBucketRequest::new(name, hub_resource, ttl_ms))
            .await
    }

    /// Create a namespace bucket over an ordered list of hub resources.
    pub async fn create_namespace_bucket_with(
        &self,
        request: CreateBucketRequest,
    ) -> Result<BucketId> {
        self.inner().resolver.create_namespace_bucket(request).await
    }

    /// Delete a namespace bucket and drop everything cached for it.
    ///
    /// Fills in flight for the bucket are fenced by the clear and will not
    /// be stored.
    pub fn delete_namespace_bucket(&self, id: &BucketId) -> Result<()> {
        let bucket = self.inner().resolver.delete_namespace_bucket(id)?;
        let cleared = self.inner().store.clear(id)?;
        info!(
            "Deleted namespace bucket {} ({} cached objects dropped)",
            bucket.name, cleared
        );
        Ok(())
    }

    pub fn bucket_info(&self, name: &str) -> Result<Arc<NamespaceBucket>> {
        self.inner().resolver.bucket(name)
    }

    pub fn list_namespace_buckets(&self) -> Vec<Arc<NamespaceBucket>> {
        self.inner().resolver.list_buckets()
    }
}
