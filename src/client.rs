// src/client.rs
//
// StorageClient: the unified operation surface over one profile. Routes
// listings and metadata through the metadata provider when one is
// configured, reads through the cache when it pays off, and wraps every
// provider round-trip in the profile's retry policy.

use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use tracing::warn;

use crate::cache::{CacheBackend, CacheKey};
use crate::config::StorageClientConfig;
use crate::constants::{DEFAULT_CACHE_READ_THRESHOLD, DEFAULT_POSIX_PROFILE_NAME};
use crate::error::{ErrorKind, MscError, Result};
use crate::file::{ObjectFile, OpenMode};
use crate::retry::with_retry;
use crate::sync;
use crate::types::{ByteRange, ListOptions, ObjectMetadata, ObjectType, PutOptions};
use crate::url::format_msc_url;

struct ClientState {
    config: StorageClientConfig,
    /// Keys read at least once; repeat reads of small objects still go
    /// through the cache.
    recent_reads: Mutex<HashSet<String>>,
}

/// A client for interacting with one storage profile. Cheap to clone; all
/// clones share provider and cache state.
#[derive(Clone)]
pub struct StorageClient {
    state: Arc<ClientState>,
}

impl StorageClient {
    pub fn new(config: StorageClientConfig) -> Self {
        Self {
            state: Arc::new(ClientState {
                config,
                recent_reads: Mutex::new(HashSet::new()),
            }),
        }
    }

    pub fn profile(&self) -> &str {
        &self.state.config.profile
    }

    pub fn is_default_profile(&self) -> bool {
        self.profile() == DEFAULT_POSIX_PROFILE_NAME
    }

    fn storage(&self) -> &Arc<dyn crate::types::StorageProvider> {
        &self.state.config.storage_provider
    }

    fn metadata_provider(&self) -> Option<&Arc<dyn crate::types::MetadataProvider>> {
        self.state.config.metadata_provider.as_ref()
    }

    fn cache(&self) -> Option<&Arc<dyn CacheBackend>> {
        // The POSIX provider reads local disk already; caching it would only
        // duplicate bytes.
        if self.storage().provider_name() == "file" {
            return None;
        }
        self.state.config.cache.as_ref()
    }

    fn cache_read_threshold(&self) -> u64 {
        self.state
            .config
            .cache_config
            .as_ref()
            .map(|config| config.read_threshold)
            .unwrap_or(DEFAULT_CACHE_READ_THRESHOLD)
    }

    fn contextualize(&self, err: MscError, operation: &'static str, key: &str) -> MscError {
        err.with_operation(operation)
            .with_profile(self.profile().to_string())
            .with_key(key.to_string())
    }

    /// Physical path for a key, requiring the object to be tracked when a
    /// metadata provider is present.
    async fn realpath_existing(&self, path: &str, operation: &'static str) -> Result<String> {
        match self.metadata_provider() {
            None => Ok(path.to_string()),
            Some(provider) => {
                let (physical, exists) = provider.realpath(path).await?;
                if !exists {
                    return Err(self.contextualize(MscError::not_found(path), operation, path));
                }
                Ok(physical)
            }
        }
    }

    /// Physical path for a key that must NOT exist yet; a manifest-tracked
    /// namespace does not allow silent overwrites.
    async fn realpath_absent(&self, path: &str, operation: &'static str) -> Result<String> {
        match self.metadata_provider() {
            None => Ok(path.to_string()),
            Some(provider) => {
                let (physical, exists) = provider.realpath(path).await?;
                if exists {
                    return Err(self.contextualize(
                        MscError::conflict(format!(
                            "the file at \"{path}\" already exists; overwriting is not allowed \
                             when using a metadata provider"
                        )),
                        operation,
                        path,
                    ));
                }
                Ok(physical)
            }
        }
    }

    /// Authoritative metadata used for cache validation.
    async fn metadata_for_cache(&self, path: &str, physical: &str) -> Result<ObjectMetadata> {
        match self.metadata_provider() {
            Some(provider) => provider.get_object_metadata(path, true).await,
            None => self.storage().get_object_metadata(physical, true).await,
        }
    }

    /// Reads an object. Ranged reads never go through the cache; unranged
    /// reads do when the object is large enough or has been read before.
    pub async fn read(&self, path: &str, byte_range: Option<ByteRange>) -> Result<Bytes> {
        let physical = self.realpath_existing(path, "read").await?;
        let retry = &self.state.config.retry_config;

        if let Some(range) = byte_range {
            return with_retry(retry, "read", || {
                self.storage().get_object(&physical, Some(range))
            })
            .await
            .map_err(|err| self.contextualize(err, "read", path));
        }

        if let Some(cache) = self.cache() {
            let meta = self
                .metadata_for_cache(path, &physical)
                .await
                .map_err(|err| self.contextualize(err, "read", path))?;
            let etag = if cache.use_etag() { meta.etag.clone() } else { None };

            let repeat_read = {
                let mut recent = self
                    .state
                    .recent_reads
                    .lock()
                    .expect("recent read set poisoned");
                !recent.insert(path.to_string())
            };

            if meta.content_length >= self.cache_read_threshold() || repeat_read {
                return self
                    .read_through_cache(cache, path, &physical, etag)
                    .await
                    .map_err(|err| self.contextualize(err, "read", path));
            }
        }

        with_retry(retry, "read", || self.storage().get_object(&physical, None))
            .await
            .map_err(|err| self.contextualize(err, "read", path))
    }

    /// Cache read protocol: serve a valid entry, otherwise coordinate
    /// exactly one download under the per-entry lock. A cache fault never
    /// masks a successful backend read.
    async fn read_through_cache(
        &self,
        cache: &Arc<dyn CacheBackend>,
        path: &str,
        physical: &str,
        etag: Option<String>,
    ) -> Result<Bytes> {
        let key = CacheKey::new(self.profile(), path, etag);
        if let Some(body) = cache.read(&key).await {
            return Ok(body);
        }

        let guard = cache.acquire_lock(&key).await?;
        // Another process may have populated the entry while we waited.
        if let Some(body) = cache.read(&key).await {
            return Ok(body);
        }

        let retry = &self.state.config.retry_config;
        let body = with_retry(retry, "read", || self.storage().get_object(physical, None)).await?;
        if let Err(err) = cache.set(&key, body.clone()).await {
            warn!(key = %path, error = %err, "cache population failed; serving backend bytes");
        }
        drop(guard);
        Ok(body)
    }

    /// Writes an object. With a metadata provider, the addition is staged and
    /// becomes visible to other clients at the next `commit_metadata`.
    pub async fn write(&self, path: &str, body: Bytes) -> Result<()> {
        let physical = self.realpath_absent(path, "write").await?;
        let retry = &self.state.config.retry_config;
        let put_options = PutOptions::default();

        with_retry(retry, "write", || {
            self.storage()
                .put_object(&physical, body.clone(), &put_options)
        })
        .await
        .map_err(|err| self.contextualize(err, "write", path))?;

        self.stage_addition(path, &physical).await
    }

    /// Uploads a local file to the profile.
    pub async fn upload_file(&self, remote_path: &str, local_path: &Path) -> Result<()> {
        let physical = self.realpath_absent(remote_path, "write").await?;
        let retry = &self.state.config.retry_config;

        with_retry(retry, "write", || {
            self.storage().upload_file(&physical, local_path)
        })
        .await
        .map_err(|err| self.contextualize(err, "write", remote_path))?;

        self.stage_addition(remote_path, &physical).await
    }

    /// Downloads an object to the local file system.
    pub async fn download_file(&self, remote_path: &str, local_path: &Path) -> Result<()> {
        let physical = self.realpath_existing(remote_path, "read").await?;
        let metadata = match self.metadata_provider() {
            Some(provider) => Some(provider.get_object_metadata(remote_path, true).await?),
            None => None,
        };
        let retry = &self.state.config.retry_config;
        with_retry(retry, "read", || {
            self.storage()
                .download_file(&physical, local_path, metadata.as_ref())
        })
        .await
        .map_err(|err| self.contextualize(err, "read", remote_path))
    }

    /// Server-side copy within the profile.
    pub async fn copy(&self, src_path: &str, dest_path: &str) -> Result<()> {
        let physical_src = self.realpath_existing(src_path, "copy").await?;
        let physical_dest = self.realpath_absent(dest_path, "copy").await?;
        let retry = &self.state.config.retry_config;

        with_retry(retry, "copy", || {
            self.storage().copy_object(&physical_src, &physical_dest)
        })
        .await
        .map_err(|err| self.contextualize(err, "copy", src_path))?;

        self.stage_addition(dest_path, &physical_dest).await
    }

    /// Deletes an object, its staged manifest entry, and its cached copy.
    /// A missing cache entry is not an error.
    pub async fn delete(&self, path: &str) -> Result<()> {
        let physical = self.realpath_existing(path, "delete").await?;

        if let Some(provider) = self.metadata_provider() {
            provider.remove_pending(path).await?;
        }
        if let Some(cache) = self.cache() {
            // The fingerprint covers every etag generation of the key.
            let key = CacheKey::new(self.profile(), path, None);
            if let Err(err) = cache.delete(&key).await {
                warn!(key = %path, error = %err, "failed to drop cached copy");
            }
        }

        let retry = &self.state.config.retry_config;
        with_retry(retry, "delete", || self.storage().delete_object(&physical, None))
            .await
            .map_err(|err| self.contextualize(err, "delete", path))
    }

    /// Deletes every object under a prefix using the sync worker pool.
    pub async fn delete_recursive(&self, prefix: &str) -> Result<()> {
        sync::delete_prefix(self, prefix).await
    }

    /// Metadata for a key. Strict mode fails on missing keys; non-strict
    /// returns a zero-length file sentinel.
    pub async fn info(&self, path: &str, strict: bool) -> Result<ObjectMetadata> {
        let result = match self.metadata_provider() {
            None => self.storage().get_object_metadata(path, strict).await,
            Some(provider) => match provider.get_object_metadata(path, true).await {
                Ok(meta) => Ok(meta),
                Err(err) if err.kind() == ErrorKind::NotFound => {
                    // The key may name a directory: look for it in the parent
                    // listing.
                    match self.directory_info(provider.as_ref(), path).await {
                        Some(meta) => Ok(meta),
                        None => Err(err),
                    }
                }
                Err(err) => Err(err),
            },
        };

        match result {
            Ok(meta) => Ok(meta),
            Err(err) if err.kind() == ErrorKind::NotFound && !strict => {
                Ok(ObjectMetadata::sentinel(path))
            }
            Err(err) => Err(self.contextualize(err, "info", path)),
        }
    }

    async fn directory_info(
        &self,
        provider: &dyn crate::types::MetadataProvider,
        path: &str,
    ) -> Option<ObjectMetadata> {
        let target = format!("{}/", path.trim_end_matches('/'));
        let parent = match target.trim_end_matches('/').rsplit_once('/') {
            Some((parent, _)) => format!("{parent}/"),
            None => String::new(),
        };
        let options = ListOptions {
            include_directories: true,
            ..Default::default()
        };
        let entries = provider.list_objects(&parent, &options).await.ok()?;
        entries
            .into_iter()
            .find(|entry| entry.key == target && entry.object_type == ObjectType::Directory)
    }

    /// Lists objects under a prefix, from the metadata provider if present.
    pub async fn list(&self, prefix: &str, options: &ListOptions) -> Result<Vec<ObjectMetadata>> {
        let result = match self.metadata_provider() {
            Some(provider) => provider.list_objects(prefix, options).await,
            None => {
                let retry = &self.state.config.retry_config;
                with_retry(retry, "list", || self.storage().list_objects(prefix, options)).await
            }
        };
        result.map_err(|err| self.contextualize(err, "list", prefix))
    }

    /// Shell-style wildcard matching over the profile namespace.
    pub async fn glob(&self, pattern: &str, include_url_prefix: bool) -> Result<Vec<String>> {
        let matched = match self.metadata_provider() {
            Some(provider) => provider.glob(pattern).await,
            None => self.storage().glob(pattern).await,
        }
        .map_err(|err| self.contextualize(err, "list", pattern))?;

        if include_url_prefix {
            Ok(matched
                .into_iter()
                .map(|key| format_msc_url(self.profile(), &key))
                .collect())
        } else {
            Ok(matched)
        }
    }

    pub async fn is_file(&self, path: &str) -> Result<bool> {
        match self.metadata_provider() {
            Some(provider) => {
                let (_, exists) = provider.realpath(path).await?;
                Ok(exists)
            }
            None => self.storage().is_file(path).await,
        }
    }

    /// True when no object key starts with the prefix.
    pub async fn is_empty(&self, prefix: &str) -> Result<bool> {
        let listed = self.list(prefix, &ListOptions::default()).await?;
        Ok(listed.is_empty())
    }

    /// Opens a file-like handle. Reads pull the whole body through the
    /// normal read path (cache included); writes buffer locally and upload
    /// on close.
    pub async fn open(&self, path: &str, mode: OpenMode) -> Result<ObjectFile> {
        ObjectFile::open(self.clone(), path, mode).await
    }

    /// Commits pending metadata updates. With `prefix`, first stages every
    /// object under it from the storage provider (bulk registration).
    pub async fn commit_metadata(&self, prefix: Option<&str>) -> Result<Option<String>> {
        let Some(provider) = self.metadata_provider() else {
            return Ok(None);
        };
        if let Some(prefix) = prefix {
            let listed = self
                .storage()
                .list_objects(prefix, &ListOptions::default())
                .await
                .map_err(|err| self.contextualize(err, "commit", prefix))?;
            for object in listed {
                let virtual_path = object.key.clone();
                provider.add_pending(&virtual_path, object).await?;
            }
        }
        provider.commit().await
    }

    /// Syncs every object under `source_path` on `source` into
    /// `target_path` on this client; see the sync engine for semantics.
    pub async fn sync_from(
        &self,
        source: &StorageClient,
        source_path: &str,
        target_path: &str,
        delete_unmatched_files: bool,
    ) -> Result<()> {
        sync::sync_objects(source, self, source_path, target_path, delete_unmatched_files).await
    }

    pub(crate) fn debug_identity(&self) -> String {
        format!("{} ({})", self.profile(), self.storage().provider_name())
    }

    /// Write that replaces any tracked entry. Used by the sync engine, where
    /// re-copying a changed object is the point; the staged addition upserts
    /// the manifest entry.
    pub(crate) async fn overwrite(&self, path: &str, body: Bytes) -> Result<()> {
        let physical = match self.metadata_provider() {
            Some(provider) => provider.realpath(path).await?.0,
            None => path.to_string(),
        };
        let retry = &self.state.config.retry_config;
        let put_options = PutOptions::default();
        with_retry(retry, "write", || {
            self.storage()
                .put_object(&physical, body.clone(), &put_options)
        })
        .await
        .map_err(|err| self.contextualize(err, "write", path))?;
        self.stage_addition(path, &physical).await
    }

    pub(crate) async fn overwrite_from_file(&self, path: &str, local_path: &Path) -> Result<()> {
        let physical = match self.metadata_provider() {
            Some(provider) => provider.realpath(path).await?.0,
            None => path.to_string(),
        };
        let retry = &self.state.config.retry_config;
        with_retry(retry, "write", || {
            self.storage().upload_file(&physical, local_path)
        })
        .await
        .map_err(|err| self.contextualize(err, "write", path))?;
        self.stage_addition(path, &physical).await
    }

    async fn stage_addition(&self, path: &str, physical: &str) -> Result<()> {
        if let Some(provider) = self.metadata_provider() {
            let mut meta = self
                .storage()
                .get_object_metadata(physical, true)
                .await
                .map_err(|err| self.contextualize(err, "write", path))?;
            meta.key = physical.to_string();
            provider.add_pending(path, meta).await?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for StorageClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageClient")
            .field("profile", &self.profile())
            .field("provider", &self.storage().provider_name())
            .finish()
    }
}

impl StorageClient {
    /// Drop the repeat-read hint set (test hook).
    pub fn clear_read_hints(&self) {
        self.state
            .recent_reads
            .lock()
            .expect("recent read set poisoned")
            .clear();
    }
}
