// src/cache/remote.rs
//
// Early-access cache mode that delegates body storage to a second profile
// (typically a fast S3 Express class). The fingerprint/ETag protocol is the
// same as the local backend; the body lives remotely and eviction is a no-op
// because the backing store manages its own lifecycle.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::{debug, error};

use crate::error::{MscError, Result};
use crate::types::{PutOptions, StorageProvider};
use crate::url::join_paths;

use super::config::CacheConfig;
use super::entry::CacheKey;
use super::eviction::EvictionPolicy;
use super::lock::CacheLockGuard;
use super::CacheBackend;

const ETAG_METADATA_KEY: &str = "etag";

#[derive(Debug)]
pub struct StorageProviderCacheBackend {
    storage: Arc<dyn StorageProvider>,
    prefix: String,
    max_size: u64,
    use_etag: bool,
}

impl StorageProviderCacheBackend {
    pub fn new(config: &CacheConfig, storage: Arc<dyn StorageProvider>) -> Result<Self> {
        if config.eviction_policy.policy != EvictionPolicy::NoEviction {
            return Err(MscError::invalid_argument(
                "a storage-provider cache backend only supports the no_eviction policy",
            ));
        }
        Ok(Self {
            storage,
            prefix: config.backend.cache_path.to_string_lossy().trim_matches('/').to_string(),
            max_size: config.size_bytes()?,
            use_etag: config.use_etag,
        })
    }

    fn cache_path(&self, key: &CacheKey) -> String {
        join_paths(&self.prefix, &key.fingerprint())
    }
}

#[async_trait]
impl CacheBackend for StorageProviderCacheBackend {
    fn use_etag(&self) -> bool {
        self.use_etag
    }

    fn max_cache_size(&self) -> u64 {
        self.max_size
    }

    async fn read(&self, key: &CacheKey) -> Option<Bytes> {
        if !self.contains(key).await {
            return None;
        }
        match self.storage.get_object(&self.cache_path(key), None).await {
            Ok(body) => Some(body),
            Err(err) => {
                debug!(key = %key.key, error = %err, "remote cache read missed");
                None
            }
        }
    }

    async fn contains(&self, key: &CacheKey) -> bool {
        let metadata = match self
            .storage
            .get_object_metadata(&self.cache_path(key), true)
            .await
        {
            Ok(metadata) => metadata,
            Err(_) => return false,
        };
        if !self.use_etag {
            return true;
        }
        let stored = metadata
            .metadata
            .as_ref()
            .and_then(|tags| tags.get(ETAG_METADATA_KEY));
        stored.map(String::as_str) == key.etag.as_deref()
    }

    async fn set(&self, key: &CacheKey, body: Bytes) -> Result<()> {
        if body.len() as u64 > self.max_size {
            return Err(MscError::cache(format!(
                "object size ({} bytes) exceeds maximum cache size ({} bytes)",
                body.len(),
                self.max_size
            )));
        }
        let mut options = PutOptions::default();
        if let Some(etag) = &key.etag {
            let mut tags = HashMap::new();
            tags.insert(ETAG_METADATA_KEY.to_string(), etag.clone());
            options.metadata = Some(tags);
        }
        self.storage
            .put_object(&self.cache_path(key), body, &options)
            .await
    }

    async fn delete(&self, key: &CacheKey) -> Result<()> {
        self.storage.delete_object(&self.cache_path(key), None).await
    }

    async fn cache_size(&self) -> u64 {
        match self
            .storage
            .list_objects(&format!("{}/", self.prefix), &Default::default())
            .await
        {
            Ok(listed) => listed.iter().map(|meta| meta.content_length).sum(),
            Err(err) => {
                error!(error = %err, "failed to compute remote cache size");
                0
            }
        }
    }

    async fn refresh(&self) -> Result<bool> {
        // The backing store manages its own lifecycle.
        Ok(true)
    }

    async fn acquire_lock(&self, _key: &CacheKey) -> Result<Option<CacheLockGuard>> {
        // No cross-process coordination: remote writes are already atomic.
        Ok(None)
    }
}
