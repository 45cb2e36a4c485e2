// tests/test_cache_behavior.rs
//
// Object cache end to end through the StorageClient: single-download
// coordination on a cold cache, ETag-driven refresh, FIFO eviction order,
// and the size bound.

mod common;

use std::path::Path;

use anyhow::Result;
use bytes::Bytes;
use mscio::cache::CacheKey;
use mscio::telemetry::{CounterName, Telemetry};
use mscio::{StorageClient, StorageClientConfig};
use std::sync::Arc;
use tempfile::TempDir;

fn cached_profile_config(bucket: &str, cache_dir: &Path, size: &str, policy: &str) -> serde_json::Value {
    serde_json::json!({
        "profiles": {
            "hot": {"storage_provider": {"type": "memory", "options": {"base_path": bucket}}}
        },
        "cache": {
            "size": size,
            "use_etag": true,
            "eviction_policy": {"policy": policy, "refresh_interval": 300},
            "cache_backend": {"cache_path": cache_dir.to_string_lossy()},
            // Cache every unranged read so the tests drive the cache path
            // deterministically.
            "read_threshold": 0
        },
        "opentelemetry": {"metrics": {"attributes": []}}
    })
}

async fn cached_client(
    bucket: &str,
    cache_dir: &Path,
    size: &str,
    policy: &str,
) -> Result<(StorageClient, Arc<Telemetry>)> {
    common::init_logging();
    let config = cached_profile_config(bucket, cache_dir, size, policy);
    let realized = StorageClientConfig::from_value(&config, "hot").await?;
    let telemetry = realized.telemetry.clone().expect("telemetry configured");
    Ok((StorageClient::new(realized), telemetry))
}

/// Backend `read` operations observed by the instrumentation layer.
fn backend_reads(telemetry: &Telemetry) -> f64 {
    telemetry
        .counter(CounterName::ResponseSum)
        .value_where(|attributes| {
            attributes.get("mscio.operation").map(String::as_str) == Some("read")
                && attributes.get("mscio.status").map(String::as_str) == Some("success")
        })
}

/// Total body bytes on disk: cache files that are not metadata, locks, or
/// the advisory index.
fn cache_body_bytes(cache_dir: &Path) -> u64 {
    std::fs::read_dir(cache_dir)
        .map(|entries| {
            entries
                .flatten()
                .filter(|entry| {
                    let name = entry.file_name().to_string_lossy().to_string();
                    !name.starts_with('.') && !name.ends_with(".meta") && !name.ends_with(".lock")
                })
                .filter_map(|entry| entry.metadata().ok())
                .map(|meta| meta.len())
                .sum()
        })
        .unwrap_or(0)
}

fn body_exists(cache_dir: &Path, profile: &str, key: &str) -> bool {
    cache_dir
        .join(CacheKey::new(profile, key, None).fingerprint())
        .exists()
}

#[tokio::test]
async fn test_concurrent_cold_reads_download_once() -> Result<()> {
    let cache_dir = TempDir::new()?;
    let (client, telemetry) =
        cached_client("it-cache-single-flight", cache_dir.path(), "1M", "fifo").await?;

    client.write("big/object", Bytes::from_static(b"payload-bytes")).await?;
    let writes_baseline = backend_reads(&telemetry);
    assert_eq!(writes_baseline, 0.0);

    let (first, second) = tokio::join!(
        client.read("big/object", None),
        client.read("big/object", None)
    );
    let first = first?;
    let second = second?;
    assert_eq!(first, second);
    assert_eq!(&first[..], b"payload-bytes");

    // Exactly one backend GET: the second reader waited on the entry lock
    // and served the freshly published body.
    assert_eq!(backend_reads(&telemetry), 1.0);

    // Further reads come from the cache entirely.
    client.read("big/object", None).await?;
    assert_eq!(backend_reads(&telemetry), 1.0);
    Ok(())
}

#[tokio::test]
async fn test_etag_change_refreshes_cached_body() -> Result<()> {
    let cache_dir = TempDir::new()?;
    let (client, telemetry) =
        cached_client("it-cache-etag", cache_dir.path(), "1M", "fifo").await?;

    client.write("doc", Bytes::from_static(b"version-A")).await?;
    assert_eq!(client.read("doc", None).await?, Bytes::from_static(b"version-A"));
    assert_eq!(backend_reads(&telemetry), 1.0);

    // Cached: no further backend reads.
    assert_eq!(client.read("doc", None).await?, Bytes::from_static(b"version-A"));
    assert_eq!(backend_reads(&telemetry), 1.0);

    // The backend moves to a new ETag; the next read observes the change,
    // fetches the fresh body, and replaces the cached one.
    client.write("doc", Bytes::from_static(b"version-B")).await?;
    assert_eq!(client.read("doc", None).await?, Bytes::from_static(b"version-B"));
    assert_eq!(backend_reads(&telemetry), 2.0);

    // The replacement is cached in turn.
    assert_eq!(client.read("doc", None).await?, Bytes::from_static(b"version-B"));
    assert_eq!(backend_reads(&telemetry), 2.0);
    Ok(())
}

#[tokio::test]
async fn test_fifo_eviction_order() -> Result<()> {
    let cache_dir = TempDir::new()?;
    let (client, _telemetry) =
        cached_client("it-cache-fifo", cache_dir.path(), "10", "fifo").await?;

    for key in ["k1", "k2", "k3"] {
        client.write(key, Bytes::from_static(b"1234")).await?;
    }
    for key in ["k1", "k2", "k3"] {
        client.read(key, None).await?;
        // Distinct insertion timestamps for a deterministic FIFO order.
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }

    // Three 4-byte bodies exceed the 10-byte bound: the first inserted entry
    // was evicted, the later two remain.
    assert!(!body_exists(cache_dir.path(), "hot", "k1"), "k1 should be evicted");
    assert!(body_exists(cache_dir.path(), "hot", "k2"));
    assert!(body_exists(cache_dir.path(), "hot", "k3"));
    assert!(cache_body_bytes(cache_dir.path()) <= 10);
    Ok(())
}

#[tokio::test]
async fn test_cache_bound_holds_under_churn() -> Result<()> {
    let cache_dir = TempDir::new()?;
    let (client, _telemetry) =
        cached_client("it-cache-bound", cache_dir.path(), "64", "lru").await?;

    for round in 0..10 {
        let key = format!("churn/{round}");
        client.write(&key, Bytes::from(vec![round as u8; 16])).await?;
        client.read(&key, None).await?;
    }

    assert!(
        cache_body_bytes(cache_dir.path()) <= 64,
        "cache grew past its bound: {} bytes",
        cache_body_bytes(cache_dir.path())
    );
    Ok(())
}

#[tokio::test]
async fn test_deleted_object_drops_cached_copy() -> Result<()> {
    let cache_dir = TempDir::new()?;
    let (client, _telemetry) =
        cached_client("it-cache-delete", cache_dir.path(), "1M", "fifo").await?;

    client.write("gone", Bytes::from_static(b"bytes")).await?;
    client.read("gone", None).await?;
    assert!(body_exists(cache_dir.path(), "hot", "gone"));

    client.delete("gone").await?;
    assert!(!body_exists(cache_dir.path(), "hot", "gone"));
    Ok(())
}
