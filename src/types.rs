// src/types.rs
//
// Core data model and the provider contracts every backend implements.
// Storage providers move bytes, metadata providers answer listings from a
// catalog, credentials providers mint tokens. A profile binds one of each.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::{DEFAULT_RETRY_ATTEMPTS, DEFAULT_RETRY_DELAY_SECS};
use crate::error::{MscError, Result};

/// Whether a key names an object or a synthesized directory entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectType {
    File,
    Directory,
}

impl Default for ObjectType {
    fn default() -> Self {
        ObjectType::File
    }
}

/// Provider-neutral object metadata. Directories have `content_length == 0`
/// and a key ending in `/`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectMetadata {
    /// Key relative to the provider's base path.
    pub key: String,
    pub content_length: u64,
    pub last_modified: DateTime<Utc>,
    #[serde(rename = "type", default)]
    pub object_type: ObjectType,
    /// Opaque entity tag; presence and format depend on the backend.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_class: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<HashMap<String, String>>,
}

impl ObjectMetadata {
    pub fn file(key: impl Into<String>, content_length: u64, last_modified: DateTime<Utc>) -> Self {
        Self {
            key: key.into(),
            content_length,
            last_modified,
            object_type: ObjectType::File,
            etag: None,
            storage_class: None,
            metadata: None,
        }
    }

    pub fn directory(key: impl Into<String>, last_modified: DateTime<Utc>) -> Self {
        Self {
            key: key.into(),
            content_length: 0,
            last_modified,
            object_type: ObjectType::Directory,
            etag: None,
            storage_class: None,
            metadata: None,
        }
    }

    /// Sentinel returned by non-strict `info` for missing keys.
    pub fn sentinel(key: impl Into<String>) -> Self {
        Self::file(key, 0, DateTime::<Utc>::MIN_UTC)
    }

    pub fn is_directory(&self) -> bool {
        self.object_type == ObjectType::Directory
    }
}

/// Byte-range read. Half-open internally: reads `[offset, offset + size)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub offset: u64,
    pub size: u64,
}

impl ByteRange {
    pub fn new(offset: u64, size: u64) -> Self {
        Self { offset, size }
    }

    pub fn end(&self) -> u64 {
        self.offset + self.size
    }
}

/// Credentials handed to a storage provider for authentication.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Credentials {
    pub access_key: String,
    pub secret_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    /// Expiration time in ISO-8601 format.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiration: Option<String>,
}

impl Credentials {
    pub fn is_expired(&self) -> bool {
        match &self.expiration {
            None => false,
            Some(raw) => match DateTime::parse_from_rfc3339(raw) {
                Ok(expiry) => expiry <= Utc::now(),
                Err(_) => false,
            },
        }
    }
}

/// Optional conditions and user metadata attached to a put.
#[derive(Debug, Clone, Default)]
pub struct PutOptions {
    pub metadata: Option<HashMap<String, String>>,
    pub if_match: Option<String>,
    pub if_none_match: Option<String>,
}

impl PutOptions {
    pub fn with_metadata(metadata: HashMap<String, String>) -> Self {
        Self {
            metadata: Some(metadata),
            ..Default::default()
        }
    }
}

/// Listing window. `start_after` is exclusive, `end_at` inclusive; neither key
/// has to exist.
#[derive(Debug, Clone, Default)]
pub struct ListOptions {
    pub start_after: Option<String>,
    pub end_at: Option<String>,
    /// When true, immediate subdirectories are returned alongside objects
    /// instead of being descended into.
    pub include_directories: bool,
}

impl ListOptions {
    pub(crate) fn validate(&self) -> Result<()> {
        if let (Some(start), Some(end)) = (&self.start_after, &self.end_at) {
            if start >= end {
                return Err(MscError::invalid_argument(format!(
                    "start_after ({start}) must be before end_at ({end})"
                )));
            }
        }
        Ok(())
    }

    pub(crate) fn admits(&self, key: &str) -> bool {
        if let Some(start) = &self.start_after {
            if key <= start.as_str() {
                return false;
            }
        }
        if let Some(end) = &self.end_at {
            if key > end.as_str() {
                return false;
            }
        }
        true
    }
}

/// Retry strategy applied around provider round-trips.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryConfig {
    /// Attempts before giving up. At least 1.
    pub attempts: u32,
    /// Base delay in seconds; doubled per attempt.
    pub delay: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            attempts: DEFAULT_RETRY_ATTEMPTS,
            delay: DEFAULT_RETRY_DELAY_SECS,
        }
    }
}

impl RetryConfig {
    pub fn new(attempts: u32, delay: f64) -> Result<Self> {
        if attempts < 1 {
            return Err(MscError::invalid_argument("retry attempts must be at least 1"));
        }
        if delay < 0.0 {
            return Err(MscError::invalid_argument("retry delay must be non-negative"));
        }
        Ok(Self { attempts, delay })
    }
}

/// Abstract interface to a storage backend. All keys are interpreted relative
/// to the provider's `base_path`, joined with forward slashes regardless of
/// host OS. Listed keys come back relative, sorted lexicographically.
#[async_trait]
pub trait StorageProvider: Send + Sync {
    /// Provider type name ("file", "memory", "s3", ...). Used for telemetry
    /// tags and registry diagnostics.
    fn provider_name(&self) -> &str;

    fn base_path(&self) -> &str;

    async fn put_object(&self, path: &str, body: Bytes, options: &PutOptions) -> Result<()>;

    async fn get_object(&self, path: &str, byte_range: Option<ByteRange>) -> Result<Bytes>;

    async fn copy_object(&self, src_path: &str, dest_path: &str) -> Result<()>;

    async fn delete_object(&self, path: &str, if_match: Option<&str>) -> Result<()>;

    /// HEAD-like metadata fetch. With `strict == false`, implementations may
    /// relax directory detection; missing keys still fail with `NotFound`.
    async fn get_object_metadata(&self, path: &str, strict: bool) -> Result<ObjectMetadata>;

    async fn list_objects(&self, prefix: &str, options: &ListOptions) -> Result<Vec<ObjectMetadata>>;

    async fn upload_file(&self, remote_path: &str, local_path: &Path) -> Result<()>;

    async fn download_file(
        &self,
        remote_path: &str,
        local_path: &Path,
        metadata: Option<&ObjectMetadata>,
    ) -> Result<()>;

    /// Shell-style wildcard matching over the provider namespace.
    async fn glob(&self, pattern: &str) -> Result<Vec<String>>;

    async fn is_file(&self, path: &str) -> Result<bool> {
        match self.get_object_metadata(path, true).await {
            Ok(meta) => Ok(!meta.is_directory()),
            Err(err) if err.kind() == crate::error::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err),
        }
    }
}

impl std::fmt::Debug for dyn StorageProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageProvider")
            .field("provider_name", &self.provider_name())
            .field("base_path", &self.base_path())
            .finish()
    }
}

/// Abstract interface to a metadata catalog that can answer listings without
/// touching the backend, and stage mutations for a later commit.
#[async_trait]
pub trait MetadataProvider: Send + Sync {
    async fn list_objects(&self, prefix: &str, options: &ListOptions) -> Result<Vec<ObjectMetadata>>;

    /// With `include_pending == false` only committed entries are visible.
    async fn get_object_metadata(&self, path: &str, include_pending: bool) -> Result<ObjectMetadata>;

    async fn glob(&self, pattern: &str) -> Result<Vec<String>>;

    /// Translates a user-visible path to the canonical physical path used by
    /// the storage provider, plus whether the object is currently tracked.
    async fn realpath(&self, path: &str) -> Result<(String, bool)>;

    /// Stage an addition; visible to this process immediately, to others after
    /// `commit`.
    async fn add_pending(&self, path: &str, metadata: ObjectMetadata) -> Result<()>;

    /// Stage a removal of a tracked path.
    async fn remove_pending(&self, path: &str) -> Result<()>;

    /// Persist pending mutations; returns the new generation id, or `None`
    /// when there was nothing to commit.
    async fn commit(&self) -> Result<Option<String>>;

    fn writable(&self) -> bool;
}

impl std::fmt::Debug for dyn MetadataProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetadataProvider")
            .field("writable", &self.writable())
            .finish()
    }
}

/// Abstract interface for sourcing credentials. Providers are responsible for
/// their own caching; `credentials` is called on demand.
#[async_trait]
pub trait CredentialsProvider: Send + Sync {
    async fn credentials(&self) -> Result<Credentials>;

    async fn refresh(&self) -> Result<()>;
}

impl std::fmt::Debug for dyn CredentialsProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialsProvider").finish()
    }
}

/// Static credentials loaded from configuration.
pub struct StaticCredentialsProvider {
    credentials: Credentials,
}

impl StaticCredentialsProvider {
    pub fn new(credentials: Credentials) -> Self {
        Self { credentials }
    }
}

#[async_trait]
impl CredentialsProvider for StaticCredentialsProvider {
    async fn credentials(&self) -> Result<Credentials> {
        if self.credentials.is_expired() {
            return Err(MscError::unauthorized("static credentials are expired"));
        }
        Ok(self.credentials.clone())
    }

    async fn refresh(&self) -> Result<()> {
        Ok(())
    }
}

/// Configuration needed to realize a storage provider through the registry.
#[derive(Debug, Clone)]
pub struct StorageProviderConfig {
    /// Provider type ("file", "memory", "s3", "gcs", "oci", "azure", "ais").
    pub provider_type: String,
    /// Provider-specific options (endpoint URLs, base_path, region, ...).
    pub options: serde_json::Value,
}

/// A bundle supplies all three providers together; when configured it
/// supersedes the individual provider fields of a profile.
pub trait ProviderBundle: Send + Sync {
    fn storage_provider_config(&self) -> StorageProviderConfig;

    fn credentials_provider(&self) -> Option<Arc<dyn CredentialsProvider>>;

    fn metadata_provider(&self) -> Option<Arc<dyn MetadataProvider>>;
}

/// Plain bundle built from per-profile configuration.
pub struct SimpleProviderBundle {
    storage_provider_config: StorageProviderConfig,
    credentials_provider: Option<Arc<dyn CredentialsProvider>>,
    metadata_provider: Option<Arc<dyn MetadataProvider>>,
}

impl SimpleProviderBundle {
    pub fn new(
        storage_provider_config: StorageProviderConfig,
        credentials_provider: Option<Arc<dyn CredentialsProvider>>,
        metadata_provider: Option<Arc<dyn MetadataProvider>>,
    ) -> Self {
        Self {
            storage_provider_config,
            credentials_provider,
            metadata_provider,
        }
    }
}

impl ProviderBundle for SimpleProviderBundle {
    fn storage_provider_config(&self) -> StorageProviderConfig {
        self.storage_provider_config.clone()
    }

    fn credentials_provider(&self) -> Option<Arc<dyn CredentialsProvider>> {
        self.credentials_provider.clone()
    }

    fn metadata_provider(&self) -> Option<Arc<dyn MetadataProvider>> {
        self.metadata_provider.clone()
    }
}
