// src/cache/mod.rs
//
// Local object cache: size-bounded, ETag-validating, policy-driven, safe
// across processes sharing the cache directory. Filesystem primitives
// (atomic rename, per-entry lock files) are the sole coordination mechanism.

mod config;
mod entry;
mod eviction;
mod filesystem;
mod lock;
mod remote;

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::{MscError, Result};
use crate::types::StorageProvider;

pub use config::{parse_size, CacheBackendConfig, CacheConfig, EvictionPolicyConfig};
pub use entry::{CacheEntry, CacheKey};
pub use eviction::EvictionPolicy;
pub use filesystem::FileSystemCacheBackend;
pub use lock::{CacheFileLock, CacheLockGuard};
pub use remote::StorageProviderCacheBackend;

/// Storage interface for cached object bodies. Reads are best-effort: any
/// cache fault is a miss, never an error, so a cache problem can never mask a
/// successful backend read.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    fn use_etag(&self) -> bool;

    fn max_cache_size(&self) -> u64;

    /// Body for `key` when present and valid, updating its access time.
    async fn read(&self, key: &CacheKey) -> Option<Bytes>;

    async fn contains(&self, key: &CacheKey) -> bool;

    /// Atomically publish a body for `key`, then enforce the size bound.
    async fn set(&self, key: &CacheKey, body: Bytes) -> Result<()>;

    /// Remove an entry; removing a missing entry succeeds.
    async fn delete(&self, key: &CacheKey) -> Result<()>;

    /// Total body bytes currently stored.
    async fn cache_size(&self) -> u64;

    /// Reconcile in-memory hints with on-disk truth and apply deferred
    /// evictions. Returns false when another process holds the refresh lock.
    async fn refresh(&self) -> Result<bool>;

    /// Per-entry inter-process lock held while populating `key`. `None` when
    /// the backend needs no cross-process coordination.
    async fn acquire_lock(&self, key: &CacheKey) -> Result<Option<CacheLockGuard>>;
}

impl std::fmt::Debug for dyn CacheBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheBackend")
            .field("use_etag", &self.use_etag())
            .field("max_cache_size", &self.max_cache_size())
            .finish()
    }
}

/// Build the backend selected by the cache configuration: a second storage
/// profile when `storage_provider_profile` is set, the local filesystem
/// otherwise.
pub fn create_cache_backend(
    config: &CacheConfig,
    cache_storage_provider: Option<Arc<dyn StorageProvider>>,
) -> Result<Arc<dyn CacheBackend>> {
    if config.backend.storage_provider_profile.is_some() {
        let storage = cache_storage_provider.ok_or_else(|| {
            MscError::invalid_argument(
                "cache_backend.storage_provider_profile is set but no storage provider was built",
            )
        })?;
        Ok(Arc::new(StorageProviderCacheBackend::new(config, storage)?))
    } else {
        Ok(Arc::new(FileSystemCacheBackend::new(config)?))
    }
}
