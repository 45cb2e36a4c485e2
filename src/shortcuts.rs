// src/shortcuts.rs
//
// Module-level convenience API: a process-wide client registry keyed by
// profile, URL dispatch (msc://, foreign schemes, POSIX paths, path
// mappings), and one-call wrappers over the client operations.

use std::collections::HashMap;

use bytes::Bytes;
use once_cell::sync::Lazy;
use tokio::sync::Mutex;

use crate::client::StorageClient;
use crate::config::{read_path_mapping, resolve_foreign_url, StorageClientConfig};
use crate::constants::{DEFAULT_POSIX_PROFILE_NAME, MSC_PROTOCOL};
use crate::error::Result;
use crate::file::{ObjectFile, OpenMode};
use crate::types::{ByteRange, ListOptions, ObjectMetadata};
use crate::url::{format_msc_url, parse_msc_url};

/// Profiles are constructed lazily on first use and retained until process
/// exit.
static CLIENT_REGISTRY: Lazy<Mutex<HashMap<String, StorageClient>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

/// Resolve a URL or path to its storage client and in-profile path.
///
/// `msc://profile/key` resolves directly; other URLs go through the
/// configured path mapping, the default POSIX profile (for `file://` and
/// absolute paths), or an implicit `_scheme-bucket` profile.
pub async fn resolve_storage_client(url: &str) -> Result<(StorageClient, String)> {
    let (profile, path) = if url.starts_with(MSC_PROTOCOL) || url.starts_with("msc:/") {
        parse_msc_url(url)?
    } else {
        let mapping = read_path_mapping();
        resolve_foreign_url(url, &mapping)?
    };

    {
        let registry = CLIENT_REGISTRY.lock().await;
        if let Some(client) = registry.get(&profile) {
            return Ok((client.clone(), path));
        }
    }

    // Construct outside the registry lock would allow a duplicate build;
    // holding it keeps construction exactly-once per profile.
    let mut registry = CLIENT_REGISTRY.lock().await;
    if let Some(client) = registry.get(&profile) {
        return Ok((client.clone(), path));
    }
    let client = StorageClient::new(StorageClientConfig::from_file(&profile).await?);
    registry.insert(profile, client.clone());
    Ok((client, path))
}

/// Clears the client registry. Typically used by tests.
pub async fn clear_client_registry() {
    CLIENT_REGISTRY.lock().await.clear();
}

/// Open a file-like object at the given URL.
pub async fn open(url: &str, mode: OpenMode) -> Result<ObjectFile> {
    let (client, path) = resolve_storage_client(url).await?;
    client.open(&path, mode).await
}

/// Read an object, optionally a byte range of it.
pub async fn read(url: &str, byte_range: Option<ByteRange>) -> Result<Bytes> {
    let (client, path) = resolve_storage_client(url).await?;
    client.read(&path, byte_range).await
}

/// Write an object.
pub async fn write(url: &str, body: Bytes) -> Result<()> {
    let (client, path) = resolve_storage_client(url).await?;
    client.write(&path, body).await
}

/// Delete an object; `recursive` removes everything under the path.
pub async fn delete(url: &str, recursive: bool) -> Result<()> {
    let (client, path) = resolve_storage_client(url).await?;
    if recursive {
        client.delete_recursive(&path).await
    } else {
        client.delete(&path).await
    }
}

/// List objects under a URL prefix. Returned keys carry the `msc://profile/`
/// prefix.
pub async fn list(url: &str, options: &ListOptions) -> Result<Vec<ObjectMetadata>> {
    let (client, prefix) = resolve_storage_client(url).await?;
    let mut listed = client.list(&prefix, options).await?;
    for object in &mut listed {
        object.key = format_msc_url(client.profile(), &object.key);
    }
    Ok(listed)
}

/// Metadata for an object.
pub async fn info(url: &str, strict: bool) -> Result<ObjectMetadata> {
    let (client, path) = resolve_storage_client(url).await?;
    client.info(&path, strict).await
}

/// Glob for keys matching a wildcard pattern. Results carry the URL prefix
/// except for plain paths on the default profile.
pub async fn glob(pattern: &str) -> Result<Vec<String>> {
    let (client, path) = resolve_storage_client(pattern).await?;
    let include_url_prefix =
        pattern.starts_with(MSC_PROTOCOL) || client.profile() != DEFAULT_POSIX_PROFILE_NAME;
    client.glob(&path, include_url_prefix).await
}

/// True when the URL names a file (not a directory or prefix).
pub async fn is_file(url: &str) -> Result<bool> {
    let (client, path) = resolve_storage_client(url).await?;
    client.is_file(&path).await
}

/// True when no objects exist under the URL prefix.
pub async fn is_empty(url: &str) -> Result<bool> {
    let (client, path) = resolve_storage_client(url).await?;
    client.is_empty(&path).await
}

/// Upload a local file to the URL.
pub async fn upload_file(url: &str, local_path: &std::path::Path) -> Result<()> {
    let (client, path) = resolve_storage_client(url).await?;
    client.upload_file(&path, local_path).await
}

/// Download the object at the URL to a local path.
pub async fn download_file(url: &str, local_path: &std::path::Path) -> Result<()> {
    let (client, path) = resolve_storage_client(url).await?;
    client.download_file(&path, local_path).await
}

/// Sync objects from one URL prefix to another, optionally deleting target
/// objects missing from the source.
pub async fn sync(source_url: &str, target_url: &str, delete_unmatched_files: bool) -> Result<()> {
    let (source_client, source_path) = resolve_storage_client(source_url).await?;
    let (target_client, target_path) = resolve_storage_client(target_url).await?;
    target_client
        .sync_from(&source_client, &source_path, &target_path, delete_unmatched_files)
        .await
}

/// Commit pending metadata updates for the URL's profile, registering
/// objects under the path first.
pub async fn commit_metadata(url: &str) -> Result<()> {
    let (client, path) = resolve_storage_client(url).await?;
    let prefix = if path.is_empty() { None } else { Some(path.as_str()) };
    client.commit_metadata(prefix).await?;
    Ok(())
}
