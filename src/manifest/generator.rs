// src/manifest/generator.rs
//
// Build a manifest generation from a live store: list everything under a
// prefix, stage it, and commit. Existing manifest generations themselves are
// excluded from the scan.

use std::sync::Arc;

use tracing::info;

use crate::constants::DEFAULT_MANIFEST_BASE_DIR;
use crate::error::Result;
use crate::manifest::provider::ManifestMetadataProvider;
use crate::types::{ListOptions, MetadataProvider, StorageProvider};

/// Scan `storage` under `prefix` and commit a fresh manifest generation at
/// `manifest_path`. Returns the new generation id, or `None` when the prefix
/// holds no objects at all.
pub async fn generate_manifest(
    storage: Arc<dyn StorageProvider>,
    prefix: &str,
    manifest_path: &str,
) -> Result<Option<String>> {
    let provider = ManifestMetadataProvider::new(storage.clone(), manifest_path, true).await?;

    let listed = storage.list_objects(prefix, &ListOptions::default()).await?;
    let mut staged = 0usize;
    for object in listed {
        if object
            .key
            .split('/')
            .any(|part| part == DEFAULT_MANIFEST_BASE_DIR)
        {
            continue;
        }
        let key = object.key.clone();
        provider.add_pending(&key, object).await?;
        staged += 1;
    }

    let generation = provider.commit().await?;
    info!(
        prefix,
        manifest_path,
        entries = staged,
        generation = generation.as_deref().unwrap_or("<none>"),
        "generated manifest"
    );
    Ok(generation)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::MemoryStorageProvider;
    use crate::types::PutOptions;
    use bytes::Bytes;

    #[tokio::test]
    async fn test_generate_then_list_matches_backend() {
        let storage = Arc::new(MemoryStorageProvider::new("bucket"));
        for key in ["data/a", "data/b", "other/c"] {
            storage
                .put_object(key, Bytes::from_static(b"xyz"), &PutOptions::default())
                .await
                .unwrap();
        }

        let generation = generate_manifest(storage.clone(), "", ".msc_manifests")
            .await
            .unwrap();
        assert!(generation.is_some());

        let provider = ManifestMetadataProvider::new(storage.clone(), ".msc_manifests", false)
            .await
            .unwrap();
        let manifest_keys: Vec<String> = provider
            .list_objects("data/", &ListOptions::default())
            .await
            .unwrap()
            .into_iter()
            .map(|meta| meta.key)
            .collect();
        let backend_keys: Vec<String> = storage
            .list_objects("data/", &ListOptions::default())
            .await
            .unwrap()
            .into_iter()
            .map(|meta| meta.key)
            .collect();
        assert_eq!(manifest_keys, backend_keys);
    }

    #[tokio::test]
    async fn test_regeneration_excludes_manifest_files() {
        let storage = Arc::new(MemoryStorageProvider::new("bucket"));
        storage
            .put_object("data/a", Bytes::from_static(b"x"), &PutOptions::default())
            .await
            .unwrap();

        generate_manifest(storage.clone(), "", ".msc_manifests")
            .await
            .unwrap();
        // Second run must not index the first run's manifest files.
        generate_manifest(storage.clone(), "", ".msc_manifests")
            .await
            .unwrap();

        let provider = ManifestMetadataProvider::new(storage, ".msc_manifests", false)
            .await
            .unwrap();
        let keys: Vec<String> = provider
            .list_objects("", &ListOptions::default())
            .await
            .unwrap()
            .into_iter()
            .map(|meta| meta.key)
            .collect();
        assert_eq!(keys, vec!["data/a".to_string()]);
    }
}
