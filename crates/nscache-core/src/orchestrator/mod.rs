//! Read/write orchestration: read-through fills, write-around puts.
//!
//! A read checks the cache store first. A fresh entry is served directly;
//! a stale or missing one goes through the single-flight table so that at
//! most one backend fetch per (bucket, key) is in flight. The fetch runs in
//! a spawned task, so callers that give up do not cancel it for the rest.
//!
//! A stale entry with an ETag is first revalidated with a `HEAD` against the
//! primary hub. If the hub still reports the same ETag and size, the cached
//! body is stored again with a new TTL and no body is transferred.
//!
//! Writes never touch the cache. A hub-side overwrite stays invisible to
//! readers until the cached entry's TTL runs out.

mod flight;
mod reaper;

pub use reaper::{CacheReaper, ReaperHandle};

use crate::backend::{retry_backend, FetchedObject, ObjectBackend, ObjectMeta, RetryConfig};
use crate::cache::{CacheEntry, CacheStore, FillToken};
use crate::error::{GatewayError, Result};
use crate::resolver::{validate_object_key, HubResource, NamespaceResolver};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use flight::{Flight, FlightGuard, FlightTable};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Tunables for the read path.
#[derive(Debug, Clone, Default)]
pub struct ReadPolicy {
    /// Retry and per-attempt timeout for each hub fetch.
    pub retry: RetryConfig,
    /// Serve a stale entry when every hub is unavailable. Off by default:
    /// the backend error is returned and the stale entry stays in place.
    pub serve_stale_on_error: bool,
}

/// How a read was satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReadSource {
    /// Fresh cache entry, no backend call.
    Hit,
    /// This caller led a backend fetch.
    Miss,
    /// This caller joined another caller's fetch.
    Coalesced,
    /// Backend unavailable; a stale entry was served by policy.
    StaleFallback,
}

impl ReadSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReadSource::Hit => "HIT",
            ReadSource::Miss => "MISS",
            ReadSource::Coalesced => "COALESCED",
            ReadSource::StaleFallback => "STALE",
        }
    }
}

/// An object as returned to a reader.
#[derive(Debug, Clone)]
pub struct ObjectRead {
    pub key: String,
    pub body: Bytes,
    pub meta: ObjectMeta,
    pub fetched_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub source: ReadSource,
}

impl ObjectRead {
    fn from_entry(entry: CacheEntry, source: ReadSource) -> Self {
        Self {
            key: entry.key,
            body: entry.body,
            meta: entry.meta,
            fetched_at: entry.fetched_at,
            expires_at: entry.expires_at,
            source,
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    coalesced: AtomicU64,
    stale_served: AtomicU64,
    backend_fetches: AtomicU64,
    fetch_errors: AtomicU64,
    discarded_fills: AtomicU64,
    revalidated: AtomicU64,
}

/// Read-path counters.
#[derive(Debug, Clone, Default, Serialize)]
pub struct OrchestratorStats {
    pub hits: u64,
    pub misses: u64,
    pub coalesced: u64,
    pub stale_served: u64,
    pub backend_fetches: u64,
    pub fetch_errors: u64,
    pub discarded_fills: u64,
    pub revalidated: u64,
    pub in_flight: usize,
}

/// Everything a spawned fill needs, owned.
struct FillJob {
    bucket_name: String,
    key: String,
    ttl: Duration,
    hubs: Vec<Arc<HubResource>>,
    stale: Option<CacheEntry>,
    token: FillToken,
    store: Arc<dyn CacheStore>,
    backend: Arc<dyn ObjectBackend>,
    retry: RetryConfig,
    counters: Arc<Counters>,
}

impl FillJob {
    async fn run(self) -> Result<CacheEntry> {
        let fetched = match self.revalidate().await {
            Some(unchanged) => unchanged,
            None => {
                fetch_from_hubs(
                    self.backend.as_ref(),
                    &self.hubs,
                    &self.bucket_name,
                    &self.key,
                    &self.retry,
                    &self.counters,
                )
                .await?
            }
        };

        let fallback = fetched.clone();
        match self.store.complete_fill(self.token, fetched, self.ttl)? {
            Some(entry) => Ok(entry),
            None => {
                // Evicted or cleared mid-flight: hand the bytes to the callers
                // of this flight without caching them.
                self.counters.discarded_fills.fetch_add(1, Ordering::Relaxed);
                Ok(CacheEntry::new(self.key, fallback, self.store.now(), self.ttl))
            }
        }
    }

    /// Check a stale entry against the primary hub with a single `HEAD`.
    ///
    /// Returns the cached body with the hub's current metadata when ETag and
    /// size still match. Any other outcome, errors included, falls back to a
    /// full fetch, which applies retries and hub fall-through.
    async fn revalidate(&self) -> Option<FetchedObject> {
        let stale = self.stale.as_ref()?;
        let cached_etag = stale.meta.etag.as_deref()?;
        let hub = self.hubs.first()?;

        let head = self.backend.head(hub, &self.key);
        let result = match self.retry.attempt_timeout {
            Some(limit) => tokio::time::timeout(limit, head).await.ok()?,
            None => head.await,
        };
        match result {
            Ok(meta)
                if meta.etag.as_deref() == Some(cached_etag)
                    && meta.size == stale.body.len() as u64 =>
            {
                debug!(
                    "Revalidated {}/{} against {} (etag {})",
                    self.bucket_name, self.key, hub.name, cached_etag
                );
                self.counters.revalidated.fetch_add(1, Ordering::Relaxed);
                Some(FetchedObject {
                    body: stale.body.clone(),
                    meta,
                })
            }
            Ok(_) => None,
            Err(e) => {
                debug!(
                    "Revalidation of {}/{} on {} failed: {}",
                    self.bucket_name, self.key, hub.name, e
                );
                None
            }
        }
    }
}

/// Try each hub in order.
///
/// NotFound moves on to the next hub. If no hub has the object and at least
/// one was unavailable, the first unavailability error is returned;
/// otherwise `ObjectNotFound` for the namespace bucket.
async fn fetch_from_hubs(
    backend: &dyn ObjectBackend,
    hubs: &[Arc<HubResource>],
    bucket_name: &str,
    key: &str,
    retry: &RetryConfig,
    counters: &Counters,
) -> Result<FetchedObject> {
    let mut unavailable: Option<GatewayError> = None;

    for hub in hubs {
        counters.backend_fetches.fetch_add(1, Ordering::Relaxed);
        let (result, stats) = retry_backend(retry, &hub.name, || backend.fetch(hub, key)).await;
        match result {
            Ok(object) => {
                debug!(
                    "Fetched {}/{} from {} ({} bytes, {} attempts)",
                    bucket_name,
                    key,
                    hub.name,
                    object.body.len(),
                    stats.attempts
                );
                return Ok(object);
            }
            Err(GatewayError::ObjectNotFound { .. }) => {
                debug!("{} has no {}; trying next hub", hub.name, key);
            }
            Err(e) if e.is_retryable() => {
                counters.fetch_errors.fetch_add(1, Ordering::Relaxed);
                warn!("Hub {} unavailable for {}/{}: {}", hub.name, bucket_name, key, e);
                unavailable.get_or_insert(e);
            }
            Err(e) => {
                counters.fetch_errors.fetch_add(1, Ordering::Relaxed);
                return Err(e);
            }
        }
    }

    Err(unavailable.unwrap_or_else(|| GatewayError::ObjectNotFound {
        bucket: bucket_name.to_string(),
        key: key.to_string(),
    }))
}

/// Cache-fill state machine over a resolver, a cache store and a backend.
pub struct CacheOrchestrator {
    resolver: Arc<NamespaceResolver>,
    store: Arc<dyn CacheStore>,
    backend: Arc<dyn ObjectBackend>,
    policy: ReadPolicy,
    flights: Arc<FlightTable>,
    counters: Arc<Counters>,
}

impl CacheOrchestrator {
    pub fn new(
        resolver: Arc<NamespaceResolver>,
        store: Arc<dyn CacheStore>,
        backend: Arc<dyn ObjectBackend>,
        policy: ReadPolicy,
    ) -> Self {
        Self {
            resolver,
            store,
            backend,
            policy,
            flights: Arc::new(FlightTable::default()),
            counters: Arc::new(Counters::default()),
        }
    }

    pub fn policy(&self) -> &ReadPolicy {
        &self.policy
    }

    /// Read an object through the cache.
    pub async fn read(&self, bucket_name: &str, key: &str) -> Result<ObjectRead> {
        validate_object_key(key)?;
        let resolved = self.resolver.resolve(bucket_name)?;
        let bucket = resolved.bucket.clone();

        let cached = self.store.get(&bucket.id, key)?;
        if let Some(entry) = &cached {
            if entry.is_fresh(self.store.now()) {
                debug!("HIT {}/{}", bucket_name, key);
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                return Ok(ObjectRead::from_entry(entry.clone(), ReadSource::Hit));
            }
            debug!("STALE {}/{}: revalidating", bucket_name, key);
        }

        let store = &self.store;
        let flight = self.flights.join_or_lead(&bucket.id, key, || {
            Ok(store
                .get(&bucket.id, key)?
                .filter(|entry| entry.is_fresh(store.now())))
        })?;

        let (slot, source) = match flight {
            Flight::Fresh(entry) => {
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                return Ok(ObjectRead::from_entry(entry, ReadSource::Hit));
            }
            Flight::Join(slot) => {
                debug!("COALESCED {}/{}", bucket_name, key);
                self.counters.coalesced.fetch_add(1, Ordering::Relaxed);
                (slot, ReadSource::Coalesced)
            }
            Flight::Lead(guard, slot) => {
                debug!("MISS {}/{}", bucket_name, key);
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                let job = FillJob {
                    bucket_name: bucket.name.clone(),
                    key: key.to_string(),
                    ttl: bucket.ttl(),
                    hubs: resolved.hubs,
                    stale: cached.clone(),
                    token: self.store.begin_fill(&bucket.id, key),
                    store: self.store.clone(),
                    backend: self.backend.clone(),
                    retry: self.policy.retry.clone(),
                    counters: self.counters.clone(),
                };
                spawn_fill(guard, job);
                (slot, ReadSource::Miss)
            }
        };

        match flight::wait(slot).await {
            Ok(entry) => Ok(ObjectRead::from_entry(entry, source)),
            Err(e) if e.is_retryable() && self.policy.serve_stale_on_error => match cached {
                Some(stale) => {
                    warn!("Serving stale {}/{}: {}", bucket_name, key, e);
                    self.counters.stale_served.fetch_add(1, Ordering::Relaxed);
                    Ok(ObjectRead::from_entry(stale, ReadSource::StaleFallback))
                }
                None => Err(e),
            },
            Err(e) => Err(e),
        }
    }

    /// Write-around: write to the bucket's primary hub, leave the cache alone.
    pub async fn put_object(
        &self,
        bucket_name: &str,
        key: &str,
        body: Bytes,
    ) -> Result<ObjectMeta> {
        validate_object_key(key)?;
        let resolved = self.resolver.resolve(bucket_name)?;
        let hub = resolved
            .hubs
            .first()
            .ok_or_else(|| GatewayError::UnknownBucket {
                bucket: bucket_name.to_string(),
            })?;
        self.put_to_hub(hub, key, body).await
    }

    /// Write straight to a named hub resource.
    pub async fn put_direct(&self, resource: &str, key: &str, body: Bytes) -> Result<ObjectMeta> {
        validate_object_key(key)?;
        let hub = self.resolver.hub_resource(resource)?;
        self.put_to_hub(&hub, key, body).await
    }

    async fn put_to_hub(&self, hub: &HubResource, key: &str, body: Bytes) -> Result<ObjectMeta> {
        let backend = self.backend.as_ref();
        let (result, _) = retry_backend(&self.policy.retry, &hub.name, || {
            backend.put(hub, key, body.clone())
        })
        .await;
        let meta = result?;
        debug!("PUT {}/{} via {} ({} bytes)", hub.target_bucket, key, hub.name, meta.size);
        Ok(meta)
    }

    pub fn stats(&self) -> OrchestratorStats {
        let c = &self.counters;
        OrchestratorStats {
            hits: c.hits.load(Ordering::Relaxed),
            misses: c.misses.load(Ordering::Relaxed),
            coalesced: c.coalesced.load(Ordering::Relaxed),
            stale_served: c.stale_served.load(Ordering::Relaxed),
            backend_fetches: c.backend_fetches.load(Ordering::Relaxed),
            fetch_errors: c.fetch_errors.load(Ordering::Relaxed),
            discarded_fills: c.discarded_fills.load(Ordering::Relaxed),
            revalidated: c.revalidated.load(Ordering::Relaxed),
            in_flight: self.flights.in_flight(),
        }
    }
}

fn spawn_fill(guard: FlightGuard, job: FillJob) {
    tokio::spawn(async move {
        let outcome = job.run().await;
        guard.publish(outcome);
    });
}
