//! Explicit cache removal, statistics and shutdown on Gateway.

use serde::Serialize;

use crate::backend::CircuitBreakerStats;
use crate::cache::CacheStats;
use crate::error::Result;
use crate::orchestrator::OrchestratorStats;
use crate::resolver::validate_object_key;
use crate::Gateway;
use tracing::{debug, info};

/// Snapshot of gateway counters.
#[derive(Debug, Clone, Serialize)]
pub struct GatewayStats {
    pub cache: CacheStats,
    pub reads: OrchestratorStats,
    pub circuits: Vec<CircuitBreakerStats>,
    pub buckets: usize,
    pub hub_resources: usize,
}

impl Gateway {
    /// Drop one cached object. Returns whether it was cached.
    ///
    /// A fill for the key that is already in flight will not be stored.
    pub fn evict_object(&self, bucket: &str, key: &str) -> Result<bool> {
        validate_object_key(key)?;
        let ns = self.inner().resolver.bucket(bucket)?;
        let evicted = self.inner().store.evict(&ns.id, key)?;
        debug!("Evict {}/{}: {}", bucket, key, evicted);
        Ok(evicted)
    }

    /// Drop everything cached for a bucket. Returns the number of entries.
    pub fn clear_bucket_cache(&self, bucket: &str) -> Result<usize> {
        let ns = self.inner().resolver.bucket(bucket)?;
        let cleared = self.inner().store.clear(&ns.id)?;
        info!("Cleared {} cached objects from {}", cleared, bucket);
        Ok(cleared)
    }

    /// Reclaim entries that expired more than the configured grace ago.
    pub fn reap_expired(&self) -> Result<usize> {
        self.inner().store.purge_expired(self.inner().expiry_grace)
    }

    pub fn stats(&self) -> Result<GatewayStats> {
        let inner = self.inner();
        Ok(GatewayStats {
            cache: inner.store.stats()?,
            reads: inner.orchestrator.stats(),
            circuits: inner.backend.circuit_stats(),
            buckets: inner.resolver.list_buckets().len(),
            hub_resources: inner.resolver.list_hub_resources().len(),
        })
    }

    /// Stop background work. Reads and writes keep working afterwards.
    pub async fn shutdown(&self) {
        if let Some(reaper) = self.inner().reaper.lock().await.take() {
            reaper.stop().await;
            info!("Cache reaper stopped");
        }
    }
}
