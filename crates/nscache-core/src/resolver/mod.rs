//! Namespace resolver: the hub-resource registry and the bucket map.
//!
//! Resources are probed through the backend before they are registered and
//! again when a bucket over them is created. Probes run without any lock
//! held; the registry is only locked to check and insert.

mod naming;
mod types;

pub use naming::{validate_bucket_name, validate_object_key, validate_resource_name};
pub use types::{
    BucketId, CreateBucketRequest, HubResource, HubResourceInfo, HubResourceSpec,
    NamespaceBucket, ResolvedBucket, ResourceHealth,
};

use crate::backend::ObjectBackend;
use crate::clock::Clock;
use crate::error::{GatewayError, Result};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{info, warn};

#[derive(Debug, Clone)]
struct ResourceRecord {
    resource: Arc<HubResource>,
    health: ResourceHealth,
    checked_at: DateTime<Utc>,
}

impl ResourceRecord {
    fn info(&self) -> HubResourceInfo {
        HubResourceInfo {
            resource: (*self.resource).clone(),
            health: self.health.clone(),
            checked_at: self.checked_at,
        }
    }
}

#[derive(Default)]
struct Registry {
    resources: BTreeMap<String, ResourceRecord>,
    buckets: BTreeMap<String, Arc<NamespaceBucket>>,
    bucket_names: HashMap<BucketId, String>,
}

/// Maps namespace buckets to their hub resources.
pub struct NamespaceResolver {
    backend: Arc<dyn ObjectBackend>,
    clock: Arc<dyn Clock>,
    registry: RwLock<Registry>,
}

impl NamespaceResolver {
    pub fn new(backend: Arc<dyn ObjectBackend>, clock: Arc<dyn Clock>) -> Self {
        Self {
            backend,
            clock,
            registry: RwLock::new(Registry::default()),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Registry> {
        self.registry.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Registry> {
        self.registry.write().unwrap_or_else(PoisonError::into_inner)
    }

    async fn probe(&self, resource: &HubResource) -> ResourceHealth {
        match self.backend.probe(resource).await {
            Ok(()) => ResourceHealth::Healthy,
            Err(e) => {
                warn!("Hub resource {} failed its probe: {}", resource.name, e);
                ResourceHealth::Unhealthy {
                    reason: e.to_string(),
                }
            }
        }
    }

    // ========================================
    // Hub resources
    // ========================================

    /// Validate, probe and register a hub resource.
    ///
    /// A resource whose probe fails is not registered.
    pub async fn create_hub_resource(&self, spec: HubResourceSpec) -> Result<HubResourceInfo> {
        let resource = HubResource::from_spec(spec)?;
        if self.read().resources.contains_key(&resource.name) {
            return Err(GatewayError::ResourceAlreadyExists {
                resource: resource.name,
            });
        }

        if let ResourceHealth::Unhealthy { reason } = self.probe(&resource).await {
            return Err(GatewayError::UnhealthyResource {
                resource: resource.name,
                reason,
            });
        }

        let record = ResourceRecord {
            resource: Arc::new(resource),
            health: ResourceHealth::Healthy,
            checked_at: self.clock.now(),
        };
        let mut registry = self.write();
        if registry.resources.contains_key(&record.resource.name) {
            return Err(GatewayError::ResourceAlreadyExists {
                resource: record.resource.name.clone(),
            });
        }
        info!(
            "Registered hub resource {} ({}/{})",
            record.resource.name, record.resource.endpoint, record.resource.target_bucket
        );
        let info = record.info();
        registry
            .resources
            .insert(record.resource.name.clone(), record);
        Ok(info)
    }

    /// Remove a resource no bucket refers to.
    pub fn delete_hub_resource(&self, name: &str) -> Result<()> {
        let mut registry = self.write();
        if !registry.resources.contains_key(name) {
            return Err(GatewayError::UnknownResource {
                resource: name.to_string(),
            });
        }
        let users: Vec<String> = registry
            .buckets
            .values()
            .filter(|bucket| bucket.hub_resources.iter().any(|r| r == name))
            .map(|bucket| bucket.name.clone())
            .collect();
        if !users.is_empty() {
            return Err(GatewayError::ResourceInUse {
                resource: name.to_string(),
                buckets: users,
            });
        }
        registry.resources.remove(name);
        info!("Deleted hub resource {}", name);
        Ok(())
    }

    /// Probe a registered resource again and record the result.
    pub async fn check_resource_health(&self, name: &str) -> Result<HubResourceInfo> {
        let resource = self.hub_resource(name)?;
        let health = self.probe(&resource).await;
        let checked_at = self.clock.now();

        let mut registry = self.write();
        let record = registry
            .resources
            .get_mut(name)
            .ok_or_else(|| GatewayError::UnknownResource {
                resource: name.to_string(),
            })?;
        record.health = health;
        record.checked_at = checked_at;
        Ok(record.info())
    }

    pub fn hub_resource(&self, name: &str) -> Result<Arc<HubResource>> {
        self.read()
            .resources
            .get(name)
            .map(|record| record.resource.clone())
            .ok_or_else(|| GatewayError::UnknownResource {
                resource: name.to_string(),
            })
    }

    /// All registered resources, sorted by name.
    pub fn list_hub_resources(&self) -> Vec<HubResourceInfo> {
        self.read()
            .resources
            .values()
            .map(ResourceRecord::info)
            .collect()
    }

    // ========================================
    // Namespace buckets
    // ========================================

    /// Register a namespace bucket over one or more healthy hub resources.
    pub async fn create_namespace_bucket(&self, request: CreateBucketRequest) -> Result<BucketId> {
        if request.ttl_ms == 0 {
            return Err(GatewayError::InvalidTtl {
                ttl_ms: request.ttl_ms,
            });
        }
        validate_bucket_name(&request.name)?;
        if request.hub_resources.is_empty() {
            return Err(GatewayError::InvalidParams {
                message: format!("bucket {} needs at least one hub resource", request.name),
            });
        }

        let hubs = {
            let registry = self.read();
            if registry.buckets.contains_key(&request.name) {
                return Err(GatewayError::BucketAlreadyExists {
                    bucket: request.name,
                });
            }
            request
                .hub_resources
                .iter()
                .map(|name| {
                    registry
                        .resources
                        .get(name)
                        .map(|record| record.resource.clone())
                        .ok_or_else(|| GatewayError::UnknownResource {
                            resource: name.clone(),
                        })
                })
                .collect::<Result<Vec<_>>>()?
        };

        for hub in &hubs {
            let health = self.probe(hub).await;
            let checked_at = self.clock.now();
            if let Some(record) = self.write().resources.get_mut(&hub.name) {
                record.health = health.clone();
                record.checked_at = checked_at;
            }
            if let ResourceHealth::Unhealthy { reason } = health {
                return Err(GatewayError::UnhealthyResource {
                    resource: hub.name.clone(),
                    reason,
                });
            }
        }

        let mut registry = self.write();
        if registry.buckets.contains_key(&request.name) {
            return Err(GatewayError::BucketAlreadyExists {
                bucket: request.name,
            });
        }
        // A resource may have been deleted while the probes ran.
        if let Some(missing) = request
            .hub_resources
            .iter()
            .find(|name| !registry.resources.contains_key(*name))
        {
            return Err(GatewayError::UnknownResource {
                resource: missing.clone(),
            });
        }

        let bucket = NamespaceBucket {
            id: BucketId::derive(&request.name, &hubs),
            name: request.name,
            hub_resources: request.hub_resources,
            ttl_ms: request.ttl_ms,
            created_at: self.clock.now(),
        };
        info!(
            "Created namespace bucket {} ({}) over [{}], ttl {}ms",
            bucket.name,
            bucket.id,
            bucket.hub_resources.join(", "),
            bucket.ttl_ms
        );
        let id = bucket.id.clone();
        registry.bucket_names.insert(id.clone(), bucket.name.clone());
        registry.buckets.insert(bucket.name.clone(), Arc::new(bucket));
        Ok(id)
    }

    /// Unregister a bucket. Returns the removed bucket so the caller can
    /// drop its cache.
    pub fn delete_namespace_bucket(&self, id: &BucketId) -> Result<Arc<NamespaceBucket>> {
        let mut registry = self.write();
        let name = registry
            .bucket_names
            .remove(id)
            .ok_or_else(|| GatewayError::UnknownBucket {
                bucket: id.to_string(),
            })?;
        let bucket = registry
            .buckets
            .remove(&name)
            .ok_or_else(|| GatewayError::UnknownBucket {
                bucket: name.clone(),
            })?;
        info!("Deleted namespace bucket {} ({})", bucket.name, bucket.id);
        Ok(bucket)
    }

    /// Look up a bucket and its hubs, in read order.
    pub fn resolve(&self, bucket_name: &str) -> Result<ResolvedBucket> {
        let registry = self.read();
        let bucket = registry
            .buckets
            .get(bucket_name)
            .cloned()
            .ok_or_else(|| GatewayError::UnknownBucket {
                bucket: bucket_name.to_string(),
            })?;
        let hubs = bucket
            .hub_resources
            .iter()
            .map(|name| {
                registry
                    .resources
                    .get(name)
                    .map(|record| record.resource.clone())
                    .ok_or_else(|| GatewayError::UnknownResource {
                        resource: name.clone(),
                    })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(ResolvedBucket { bucket, hubs })
    }

    pub fn bucket(&self, name: &str) -> Result<Arc<NamespaceBucket>> {
        self.read()
            .buckets
            .get(name)
            .cloned()
            .ok_or_else(|| GatewayError::UnknownBucket {
                bucket: name.to_string(),
            })
    }

    pub fn bucket_by_id(&self, id: &BucketId) -> Result<Arc<NamespaceBucket>> {
        let registry = self.read();
        registry
            .bucket_names
            .get(id)
            .and_then(|name| registry.buckets.get(name))
            .cloned()
            .ok_or_else(|| GatewayError::UnknownBucket {
                bucket: id.to_string(),
            })
    }

    /// All buckets, sorted by name.
    pub fn list_buckets(&self) -> Vec<Arc<NamespaceBucket>> {
        self.read().buckets.values().cloned().collect()
    }
}
