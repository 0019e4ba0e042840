//! Builder for configuring Gateway initialization.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::api::state::GatewayInner;
use crate::backend::{HttpBackend, MemoryBackend, ObjectBackend, RetryConfig};
use crate::cache::{CacheConfig, CacheStore, MemoryCacheStore, SqliteCacheStore};
use crate::clock::{Clock, SystemClock};
use crate::config::{BackendKind, CacheDefaults, GatewayConfig, StoreKind};
use crate::error::{GatewayError, Result};
use crate::orchestrator::{CacheOrchestrator, CacheReaper, ReadPolicy};
use crate::resolver::NamespaceResolver;
use crate::Gateway;
use tracing::info;

enum StoreChoice {
    Memory,
    Sqlite(PathBuf),
    Custom(Arc<dyn CacheStore>),
}

/// Builder for configuring Gateway initialization.
///
/// # Example
///
/// ```rust,ignore
/// use nscache_core::Gateway;
///
/// let gateway = Gateway::builder()
///     .sqlite("/var/lib/nscache/cache.sqlite")
///     .reaper(Duration::from_secs(30))
///     .build()
///     .await?;
/// ```
pub struct GatewayBuilder {
    backend: Option<Arc<dyn ObjectBackend>>,
    store: StoreChoice,
    clock: Arc<dyn Clock>,
    policy: ReadPolicy,
    max_size_bytes: Option<u64>,
    reaper_interval: Option<Duration>,
    expiry_grace: Duration,
}

impl Default for GatewayBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl GatewayBuilder {
    /// Create a builder with an in-memory cache and no reaper.
    pub fn new() -> Self {
        Self {
            backend: None,
            store: StoreChoice::Memory,
            clock: Arc::new(SystemClock),
            policy: ReadPolicy::default(),
            max_size_bytes: None,
            reaper_interval: None,
            expiry_grace: CacheDefaults::EXPIRY_GRACE,
        }
    }

    /// Backend connector for all hub resources.
    ///
    /// Default: an [`HttpBackend`] with the standard timeouts.
    pub fn backend(mut self, backend: Arc<dyn ObjectBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Use an already constructed cache store. Its own clock is used for
    /// freshness decisions.
    pub fn cache_store(mut self, store: Arc<dyn CacheStore>) -> Self {
        self.store = StoreChoice::Custom(store);
        self
    }

    /// Persist the cache in a SQLite database at `path`.
    pub fn sqlite(mut self, path: impl Into<PathBuf>) -> Self {
        self.store = StoreChoice::Sqlite(path.into());
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn read_policy(mut self, policy: ReadPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.policy.retry = retry;
        self
    }

    /// Serve stale entries when every hub is unavailable.
    ///
    /// Default: `false`
    pub fn serve_stale_on_error(mut self, enable: bool) -> Self {
        self.policy.serve_stale_on_error = enable;
        self
    }

    /// Cap the cache size; the oldest fills are reclaimed first.
    pub fn max_size_bytes(mut self, max: u64) -> Self {
        self.max_size_bytes = Some(max);
        self
    }

    /// Run the background reaper every `interval`.
    ///
    /// Default: no reaper (call `reap_expired` manually).
    pub fn reaper(mut self, interval: Duration) -> Self {
        self.reaper_interval = Some(interval);
        self
    }

    /// Grace period past expiry before an entry is reclaimed.
    pub fn expiry_grace(mut self, grace: Duration) -> Self {
        self.expiry_grace = grace;
        self
    }

    /// Apply a configuration file's cache and backend settings.
    pub fn with_config(mut self, config: &GatewayConfig) -> Result<Self> {
        config.validate()?;
        let cache = &config.cache;

        let backend: Arc<dyn ObjectBackend> = match config.backend {
            BackendKind::S3 => Arc::new(HttpBackend::new()?),
            BackendKind::Memory => Arc::new(MemoryBackend::auto_creating()),
        };
        self.backend = Some(backend);

        self.store = match (cache.store, &cache.path) {
            (StoreKind::Memory, _) => StoreChoice::Memory,
            (StoreKind::Sqlite, Some(path)) => StoreChoice::Sqlite(path.clone()),
            (StoreKind::Sqlite, None) => {
                return Err(GatewayError::Config {
                    message: "cache.path is required for the sqlite store".to_string(),
                })
            }
        };
        self.max_size_bytes = cache.max_size_bytes;
        self.reaper_interval = cache.reaper_interval();
        self.expiry_grace = cache.expiry_grace();
        self.policy = ReadPolicy {
            retry: RetryConfig::default()
                .with_max_attempts(cache.retry_attempts)
                .with_attempt_timeout(Some(cache.fetch_timeout())),
            serve_stale_on_error: cache.serve_stale_on_error,
        };
        Ok(self)
    }

    /// Build a gateway from configuration and register the hub resources
    /// and namespace buckets it declares.
    pub async fn from_config(config: GatewayConfig) -> Result<Gateway> {
        let gateway = Self::new().with_config(&config)?.build().await?;

        for spec in config.hub_resources {
            let info = gateway.create_hub_resource(spec).await?;
            info!("Bootstrapped hub resource {}", info.resource.name);
        }
        for request in config.namespace_buckets {
            let name = request.name.clone();
            let id = gateway.create_namespace_bucket_with(request).await?;
            info!("Bootstrapped namespace bucket {} ({})", name, id);
        }

        Ok(gateway)
    }

    /// Build the Gateway instance.
    ///
    /// Starting the reaper requires a running tokio runtime.
    pub async fn build(self) -> Result<Gateway> {
        let backend = match self.backend {
            Some(backend) => backend,
            None => Arc::new(HttpBackend::new()?),
        };

        let cache_config = CacheConfig {
            max_size_bytes: self.max_size_bytes,
        };
        let store: Arc<dyn CacheStore> = match self.store {
            StoreChoice::Memory => Arc::new(MemoryCacheStore::with_config(
                self.clock.clone(),
                cache_config,
            )),
            StoreChoice::Sqlite(path) => {
                let clock = self.clock.clone();
                let store = tokio::task::spawn_blocking(move || {
                    SqliteCacheStore::with_config(&path, clock, cache_config)
                })
                .await
                .map_err(|e| GatewayError::Other(format!("Cache store setup failed: {}", e)))??;
                Arc::new(store)
            }
            StoreChoice::Custom(store) => store,
        };

        let resolver = Arc::new(NamespaceResolver::new(backend.clone(), self.clock.clone()));
        let orchestrator =
            CacheOrchestrator::new(resolver.clone(), store.clone(), backend.clone(), self.policy);

        let reaper = self
            .reaper_interval
            .map(|interval| CacheReaper::start(store.clone(), interval, self.expiry_grace));

        Ok(Gateway {
            inner: Arc::new(GatewayInner {
                resolver,
                store,
                backend,
                orchestrator,
                expiry_grace: self.expiry_grace,
                reaper: tokio::sync::Mutex::new(reaper),
            }),
        })
    }
}
