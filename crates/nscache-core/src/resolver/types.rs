//! Namespace bucket and hub resource types.

use super::naming::{validate_bucket_name, validate_resource_name};
use crate::error::{GatewayError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use url::Url;
use uuid::Uuid;

/// Stable identifier of a namespace bucket.
///
/// Cache entries are keyed by this id rather than the bucket name, so a
/// bucket that is deleted and re-created under the same name starts cold.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BucketId(String);

impl BucketId {
    /// Stable id for a bucket over the given hubs.
    ///
    /// The same name over the same hub locations gives the same id, across
    /// restarts too. TTL is not part of the id; each entry carries its own
    /// expiry.
    pub fn derive(name: &str, hubs: &[Arc<HubResource>]) -> Self {
        let mut seed = format!("nscache:bucket/{}", name);
        for hub in hubs {
            seed.push_str(&format!("\n{}|{}|{}", hub.name, hub.endpoint, hub.target_bucket));
        }
        Self(Uuid::new_v5(&Uuid::NAMESPACE_URL, seed.as_bytes()).to_string())
    }

    #[cfg(test)]
    pub(crate) fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Parse an id received from a client.
    pub fn parse(value: &str) -> Result<Self> {
        Uuid::parse_str(value)
            .map(|uuid| Self(uuid.to_string()))
            .map_err(|e| GatewayError::InvalidParams {
                message: format!("Invalid bucket id '{}': {}", value, e),
            })
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for BucketId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Client-supplied description of a hub resource.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubResourceSpec {
    /// Resource name, unique within the gateway.
    pub name: String,
    /// Base URL of the object store (e.g. `https://s3.us-east-2.amazonaws.com`).
    pub endpoint: String,
    /// Region of the object store.
    #[serde(default)]
    pub region: Option<String>,
    /// Bucket on the object store that holds the data.
    #[serde(alias = "targetBucket")]
    pub target_bucket: String,
    /// Opaque reference to credentials held elsewhere.
    #[serde(default, alias = "credentialsRef")]
    pub credentials_ref: Option<String>,
}

impl HubResourceSpec {
    pub fn new(
        name: impl Into<String>,
        endpoint: impl Into<String>,
        target_bucket: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            endpoint: endpoint.into(),
            region: None,
            target_bucket: target_bucket.into(),
            credentials_ref: None,
        }
    }
}

/// A validated remote object-storage backend.
#[derive(Debug, Clone, Serialize)]
pub struct HubResource {
    pub name: String,
    pub endpoint: Url,
    pub region: String,
    pub target_bucket: String,
    pub credentials_ref: Option<String>,
}

impl HubResource {
    pub const DEFAULT_REGION: &'static str = "us-east-1";

    /// Validate a spec into a resource.
    pub fn from_spec(spec: HubResourceSpec) -> Result<Self> {
        validate_resource_name(&spec.name)?;
        validate_bucket_name(&spec.target_bucket)?;

        let endpoint = Url::parse(&spec.endpoint).map_err(|e| GatewayError::InvalidParams {
            message: format!("Invalid endpoint '{}' for {}: {}", spec.endpoint, spec.name, e),
        })?;
        if endpoint.cannot_be_a_base() {
            return Err(GatewayError::InvalidParams {
                message: format!("Endpoint '{}' cannot be used as a base URL", spec.endpoint),
            });
        }

        Ok(Self {
            name: spec.name,
            endpoint,
            region: spec
                .region
                .filter(|r| !r.is_empty())
                .unwrap_or_else(|| Self::DEFAULT_REGION.to_string()),
            target_bucket: spec.target_bucket,
            credentials_ref: spec.credentials_ref,
        })
    }

    /// Key used to group per-endpoint state such as circuit breakers.
    pub fn endpoint_key(&self) -> String {
        match (self.endpoint.host_str(), self.endpoint.port_or_known_default()) {
            (Some(host), Some(port)) => format!("{}:{}", host, port),
            (Some(host), None) => host.to_string(),
            _ => self.endpoint.as_str().to_string(),
        }
    }
}

/// Result of the most recent liveness probe of a resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ResourceHealth {
    Healthy,
    Unhealthy { reason: String },
}

/// Snapshot of a registered resource and its health.
#[derive(Debug, Clone, Serialize)]
pub struct HubResourceInfo {
    #[serde(flatten)]
    pub resource: HubResource,
    pub health: ResourceHealth,
    pub checked_at: DateTime<Utc>,
}

/// Request to create a namespace bucket over one or more hub resources.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateBucketRequest {
    pub name: String,
    /// Ordered resource names; the first is the primary hub.
    #[serde(alias = "hubResources")]
    pub hub_resources: Vec<String>,
    #[serde(alias = "ttlMs")]
    pub ttl_ms: u64,
}

impl CreateBucketRequest {
    /// Single-hub request.
    pub fn new(name: impl Into<String>, hub_resource: impl Into<String>, ttl_ms: u64) -> Self {
        Self {
            name: name.into(),
            hub_resources: vec![hub_resource.into()],
            ttl_ms,
        }
    }
}

/// A logical bucket served through the cache.
#[derive(Debug, Clone, Serialize)]
pub struct NamespaceBucket {
    pub id: BucketId,
    pub name: String,
    pub hub_resources: Vec<String>,
    pub ttl_ms: u64,
    pub created_at: DateTime<Utc>,
}

impl NamespaceBucket {
    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }

    /// The resource that receives write-around PUTs.
    pub fn primary_resource(&self) -> Option<&str> {
        self.hub_resources.first().map(String::as_str)
    }
}

/// A bucket together with its hub resources, in read order.
#[derive(Debug, Clone)]
pub struct ResolvedBucket {
    pub bucket: Arc<NamespaceBucket>,
    pub hubs: Vec<Arc<HubResource>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(endpoint: &str) -> HubResourceSpec {
        HubResourceSpec {
            name: "h1".into(),
            endpoint: endpoint.into(),
            region: None,
            target_bucket: "target-bucket".into(),
            credentials_ref: Some("aws-creds".into()),
        }
    }

    #[test]
    fn test_bucket_id_roundtrip() {
        let id = BucketId::generate();
        let parsed = BucketId::parse(id.as_str()).unwrap();
        assert_eq!(id, parsed);
        assert!(BucketId::parse("not-a-uuid").is_err());
    }

    #[test]
    fn test_bucket_id_is_stable_per_name_and_hubs() {
        let h1 = Arc::new(HubResource::from_spec(spec("http://hub.local:9000")).unwrap());
        let moved = Arc::new(HubResource::from_spec(spec("http://other.local:9000")).unwrap());

        let id = BucketId::derive("ns1", &[h1.clone()]);
        assert_eq!(id, BucketId::derive("ns1", &[h1.clone()]));
        assert!(BucketId::parse(id.as_str()).is_ok());
        assert_ne!(id, BucketId::derive("ns2", &[h1.clone()]));
        assert_ne!(id, BucketId::derive("ns1", &[moved]));
    }

    #[test]
    fn test_resource_from_spec_defaults_region() {
        let resource = HubResource::from_spec(spec("https://s3.us-east-2.amazonaws.com")).unwrap();
        assert_eq!(resource.region, HubResource::DEFAULT_REGION);
        assert_eq!(resource.endpoint_key(), "s3.us-east-2.amazonaws.com:443");
    }

    #[test]
    fn test_resource_rejects_bad_endpoint() {
        assert!(matches!(
            HubResource::from_spec(spec("not a url")),
            Err(GatewayError::InvalidParams { .. })
        ));
        assert!(HubResource::from_spec(spec("mailto:ops@example.com")).is_err());
    }

    #[test]
    fn test_health_serialization() {
        let json = serde_json::to_value(ResourceHealth::Unhealthy {
            reason: "timeout".into(),
        })
        .unwrap();
        assert_eq!(json["status"], "unhealthy");
        assert_eq!(json["reason"], "timeout");
    }
}
