// src/providers/memory.rs
//
// In-memory storage provider. Serves as the reference backend for the
// provider contract and as the deterministic substrate for the test suite;
// `attach` lets several provider instances (e.g. a data profile and its
// manifest profile) address the same bucket namespace.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use sha2::{Digest, Sha256};
use tokio::fs;

use crate::error::{ErrorKind, MscError, Result};
use crate::globmatch;
use crate::types::{
    ByteRange, ListOptions, ObjectMetadata, ObjectType, PutOptions, StorageProvider,
};
use crate::url::{join_paths, strip_base_path};

pub const PROVIDER: &str = "memory";

#[derive(Clone)]
struct StoredObject {
    body: Bytes,
    metadata: ObjectMetadata,
}

type Namespace = RwLock<BTreeMap<String, StoredObject>>;

pub struct MemoryStorageProvider {
    base_path: String,
    objects: Arc<Namespace>,
    get_calls: AtomicU64,
}

/// Process-wide namespaces keyed by bucket (first base-path component), so
/// every provider instance configured against the same bucket addresses the
/// same state, as a real backend would.
static SHARED_NAMESPACES: once_cell::sync::Lazy<
    std::sync::Mutex<std::collections::HashMap<String, Arc<Namespace>>>,
> = once_cell::sync::Lazy::new(Default::default);

impl MemoryStorageProvider {
    pub fn new(base_path: &str) -> Self {
        Self::with_namespace(base_path, Arc::new(RwLock::new(BTreeMap::new())))
    }

    /// Attach to the process-shared namespace for the bucket named by the
    /// base path. Used by the provider registry.
    pub fn attach(base_path: &str) -> Self {
        let bucket = base_path
            .trim_matches('/')
            .split('/')
            .next()
            .unwrap_or_default()
            .to_string();
        let namespace = SHARED_NAMESPACES
            .lock()
            .expect("shared namespace registry poisoned")
            .entry(bucket)
            .or_insert_with(|| Arc::new(RwLock::new(BTreeMap::new())))
            .clone();
        Self::with_namespace(base_path, namespace)
    }

    /// Share a namespace between provider instances with different base paths.
    pub fn with_namespace(base_path: &str, objects: Arc<Namespace>) -> Self {
        Self {
            base_path: base_path.trim_matches('/').to_string(),
            objects,
            get_calls: AtomicU64::new(0),
        }
    }

    pub fn namespace(&self) -> Arc<Namespace> {
        self.objects.clone()
    }

    /// Number of `get_object` calls served. Used by tests asserting that the
    /// cache coordinates exactly one download.
    pub fn get_call_count(&self) -> u64 {
        self.get_calls.load(Ordering::SeqCst)
    }

    fn full_key(&self, path: &str) -> String {
        join_paths(&self.base_path, path)
    }

    fn relative_key(&self, full: &str) -> String {
        strip_base_path(full, &self.base_path)
    }

    fn etag_of(body: &[u8]) -> String {
        let digest = Sha256::digest(body);
        hex_prefix(&digest, 16)
    }

    fn lookup(&self, path: &str) -> Result<StoredObject> {
        let full = self.full_key(path);
        self.objects
            .read()
            .expect("memory namespace lock poisoned")
            .get(&full)
            .cloned()
            .ok_or_else(|| MscError::not_found(path.to_string()))
    }
}

fn hex_prefix(digest: &[u8], len: usize) -> String {
    let mut out = String::with_capacity(len);
    for byte in digest {
        if out.len() >= len {
            break;
        }
        out.push_str(&format!("{byte:02x}"));
    }
    out.truncate(len);
    out
}

#[async_trait]
impl StorageProvider for MemoryStorageProvider {
    fn provider_name(&self) -> &str {
        PROVIDER
    }

    fn base_path(&self) -> &str {
        &self.base_path
    }

    async fn put_object(&self, path: &str, body: Bytes, options: &PutOptions) -> Result<()> {
        let full = self.full_key(path);
        let mut objects = self.objects.write().expect("memory namespace lock poisoned");

        if let Some(existing) = objects.get(&full) {
            if options.if_none_match.as_deref() == Some("*") {
                return Err(MscError::conflict(format!("object already exists: {path}")));
            }
            if let Some(expected) = options.if_match.as_deref() {
                if existing.metadata.etag.as_deref() != Some(expected) {
                    return Err(MscError::precondition_failed(format!(
                        "etag mismatch on {path}: expected {expected}"
                    )));
                }
            }
        } else if options.if_match.is_some() {
            return Err(MscError::precondition_failed(format!(
                "if-match given but object missing: {path}"
            )));
        }

        let mut metadata =
            ObjectMetadata::file(self.relative_key(&full), body.len() as u64, Utc::now());
        metadata.etag = Some(Self::etag_of(&body));
        metadata.metadata = options.metadata.clone();
        objects.insert(full, StoredObject { body, metadata });
        Ok(())
    }

    async fn get_object(&self, path: &str, byte_range: Option<ByteRange>) -> Result<Bytes> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        let object = self.lookup(path)?;
        match byte_range {
            None => Ok(object.body),
            Some(range) => {
                let len = object.body.len() as u64;
                if range.offset >= len {
                    return Ok(Bytes::new());
                }
                let end = range.end().min(len) as usize;
                Ok(object.body.slice(range.offset as usize..end))
            }
        }
    }

    async fn copy_object(&self, src_path: &str, dest_path: &str) -> Result<()> {
        let object = self.lookup(src_path)?;
        self.put_object(dest_path, object.body, &PutOptions::default())
            .await
    }

    async fn delete_object(&self, path: &str, if_match: Option<&str>) -> Result<()> {
        let full = self.full_key(path);
        let mut objects = self.objects.write().expect("memory namespace lock poisoned");
        if let Some(existing) = objects.get(&full) {
            if let Some(expected) = if_match {
                if existing.metadata.etag.as_deref() != Some(expected) {
                    return Err(MscError::precondition_failed(format!(
                        "etag mismatch on {path}: expected {expected}"
                    )));
                }
            }
            objects.remove(&full);
        }
        Ok(())
    }

    async fn get_object_metadata(&self, path: &str, strict: bool) -> Result<ObjectMetadata> {
        match self.lookup(path) {
            Ok(object) => Ok(object.metadata),
            Err(err) if err.kind() == ErrorKind::NotFound && strict => {
                // Check for an implicit directory.
                let dir_prefix = format!("{}/", self.full_key(path).trim_end_matches('/'));
                let objects = self.objects.read().expect("memory namespace lock poisoned");
                let is_dir = objects.range(dir_prefix.clone()..).next().is_some_and(|(key, _)| {
                    key.starts_with(&dir_prefix)
                });
                if is_dir {
                    let mut key = self.relative_key(self.full_key(path).as_str());
                    if !key.ends_with('/') {
                        key.push('/');
                    }
                    Ok(ObjectMetadata::directory(key, Utc::now()))
                } else {
                    Err(err)
                }
            }
            Err(err) => Err(err),
        }
    }

    async fn list_objects(&self, prefix: &str, options: &ListOptions) -> Result<Vec<ObjectMetadata>> {
        options.validate()?;
        let full_prefix = self.full_key(prefix);
        let objects = self.objects.read().expect("memory namespace lock poisoned");

        let mut results: Vec<ObjectMetadata> = Vec::new();
        let mut seen_dirs: Vec<String> = Vec::new();

        for (key, object) in objects.range(full_prefix.clone()..) {
            if !key.starts_with(&full_prefix) {
                break;
            }
            let relative = self.relative_key(key);
            if !options.admits(&relative) {
                continue;
            }
            if options.include_directories {
                let rel_prefix = self.relative_key(&full_prefix);
                let remainder = relative
                    .strip_prefix(&rel_prefix)
                    .unwrap_or(&relative)
                    .trim_start_matches('/');
                if let Some((subdir, _)) = remainder.split_once('/') {
                    let dir_key = if rel_prefix.is_empty() {
                        format!("{subdir}/")
                    } else {
                        format!("{}/{subdir}/", rel_prefix.trim_end_matches('/'))
                    };
                    if seen_dirs.last() != Some(&dir_key) {
                        seen_dirs.push(dir_key.clone());
                        results.push(ObjectMetadata::directory(
                            dir_key,
                            object.metadata.last_modified,
                        ));
                    }
                    continue;
                }
            }
            let mut meta = object.metadata.clone();
            meta.key = relative;
            results.push(meta);
        }

        results.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(results)
    }

    async fn upload_file(&self, remote_path: &str, local_path: &Path) -> Result<()> {
        let body = fs::read(local_path).await?;
        self.put_object(remote_path, Bytes::from(body), &PutOptions::default())
            .await
    }

    async fn download_file(
        &self,
        remote_path: &str,
        local_path: &Path,
        _metadata: Option<&ObjectMetadata>,
    ) -> Result<()> {
        let body = self.get_object(remote_path, None).await?;
        if let Some(parent) = local_path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(local_path, &body).await?;
        Ok(())
    }

    async fn glob(&self, pattern: &str) -> Result<Vec<String>> {
        let prefix = globmatch::extract_prefix_from_glob(pattern);
        let listed = self.list_objects(&prefix, &ListOptions::default()).await?;
        globmatch::match_keys(listed.iter().map(|meta| meta.key.as_str()), pattern)
    }

    async fn is_file(&self, path: &str) -> Result<bool> {
        match self.get_object_metadata(path, true).await {
            Ok(meta) => Ok(meta.object_type == ObjectType::File),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err),
        }
    }
}
