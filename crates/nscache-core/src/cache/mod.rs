//! Object cache stores.
//!
//! Provides the [`CacheStore`] trait with two implementations:
//! - [`MemoryCacheStore`]: per-bucket shards in process memory
//! - [`SqliteCacheStore`]: persistent store with WAL mode

mod fence;
mod memory;
mod sqlite;
mod traits;

pub use memory::MemoryCacheStore;
pub use sqlite::SqliteCacheStore;
pub use traits::{
    BucketCacheStats, CacheConfig, CacheEntry, CacheStats, CacheStore, CachedObjectInfo,
    FillToken,
};
