//! Centralized configuration for the gateway.
//!
//! Constant groups hold the defaults; [`GatewayConfig`] is the optional JSON
//! file the server loads at startup to pick a backend, tune the cache and
//! register resources and buckets.

use crate::error::{GatewayError, Result};
use crate::resolver::{CreateBucketRequest, HubResourceSpec};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Cache defaults.
pub struct CacheDefaults;

impl CacheDefaults {
    pub const REAPER_INTERVAL: Duration = Duration::from_secs(30);
    /// How long a stale entry is kept past its expiry before the reaper
    /// reclaims it.
    pub const EXPIRY_GRACE: Duration = Duration::from_secs(300);
}

/// Network-related configuration.
pub struct NetworkConfig;

impl NetworkConfig {
    pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
    pub const PROBE_TIMEOUT: Duration = Duration::from_secs(5);
    pub const FETCH_TIMEOUT: Duration = Duration::from_secs(30);
    pub const MAX_RETRIES: u32 = 3;
    pub const RETRY_BASE_DELAY: Duration = Duration::from_millis(100);
    pub const RETRY_MAX_DELAY: Duration = Duration::from_secs(5);
    pub const CIRCUIT_BREAKER_FAILURE_THRESHOLD: u32 = 5;
    pub const CIRCUIT_BREAKER_RECOVERY_TIMEOUT: Duration = Duration::from_secs(30);
    pub const USER_AGENT: &'static str = concat!("nscache/", env!("CARGO_PKG_VERSION"));
    pub const MAX_PUT_BYTES: usize = 64 * 1024 * 1024;
}

/// Naming limits.
pub struct NamingRules;

impl NamingRules {
    pub const MAX_OBJECT_KEY_BYTES: usize = 1024;
}

/// Which object backend the gateway talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// S3-compatible HTTP endpoints.
    S3,
    /// In-process hub; target buckets are created on first probe.
    #[default]
    Memory,
}

/// Where cache entries live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    #[default]
    Memory,
    Sqlite,
}

/// Cache section of the configuration file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub store: StoreKind,
    /// SQLite database path, required for the sqlite store.
    pub path: Option<PathBuf>,
    pub max_size_bytes: Option<u64>,
    /// Reaper period; `0` disables the reaper.
    pub reaper_interval_ms: u64,
    pub expiry_grace_ms: u64,
    pub fetch_timeout_ms: u64,
    pub retry_attempts: u32,
    pub serve_stale_on_error: bool,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            store: StoreKind::Memory,
            path: None,
            max_size_bytes: None,
            reaper_interval_ms: CacheDefaults::REAPER_INTERVAL.as_millis() as u64,
            expiry_grace_ms: CacheDefaults::EXPIRY_GRACE.as_millis() as u64,
            fetch_timeout_ms: NetworkConfig::FETCH_TIMEOUT.as_millis() as u64,
            retry_attempts: NetworkConfig::MAX_RETRIES,
            serve_stale_on_error: false,
        }
    }
}

impl CacheSettings {
    pub fn reaper_interval(&self) -> Option<Duration> {
        (self.reaper_interval_ms > 0).then(|| Duration::from_millis(self.reaper_interval_ms))
    }

    pub fn expiry_grace(&self) -> Duration {
        Duration::from_millis(self.expiry_grace_ms)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }
}

/// Gateway configuration file.
///
/// ```json
/// {
///   "backend": "s3",
///   "cache": { "store": "sqlite", "path": "/var/lib/nscache/cache.sqlite" },
///   "hub_resources": [
///     { "name": "h1", "endpoint": "http://minio:9000", "target_bucket": "data" }
///   ],
///   "namespace_buckets": [
///     { "name": "ns1", "hub_resources": ["h1"], "ttl_ms": 60000 }
///   ]
/// }
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub backend: BackendKind,
    pub cache: CacheSettings,
    pub hub_resources: Vec<HubResourceSpec>,
    pub namespace_buckets: Vec<CreateBucketRequest>,
}

impl GatewayConfig {
    /// Load and validate a configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents =
            std::fs::read_to_string(path).map_err(|e| GatewayError::io_with_path(e, path))?;
        let config: GatewayConfig =
            serde_json::from_str(&contents).map_err(|e| GatewayError::Config {
                message: format!("Failed to parse {}: {}", path.display(), e),
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Check settings that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.cache.store == StoreKind::Sqlite && self.cache.path.is_none() {
            return Err(GatewayError::Config {
                message: "cache.path is required when cache.store is \"sqlite\"".to_string(),
            });
        }
        if self.cache.fetch_timeout_ms == 0 {
            return Err(GatewayError::Config {
                message: "cache.fetch_timeout_ms must be greater than zero".to_string(),
            });
        }
        if self.cache.retry_attempts == 0 {
            return Err(GatewayError::Config {
                message: "cache.retry_attempts must be at least 1".to_string(),
            });
        }
        for bucket in &self.namespace_buckets {
            if bucket.hub_resources.is_empty() {
                return Err(GatewayError::Config {
                    message: format!("namespace bucket {} lists no hub resources", bucket.name),
                });
            }
        }
        Ok(())
    }
}
