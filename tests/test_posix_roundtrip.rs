// tests/test_posix_roundtrip.rs
//
// End-to-end coverage of the POSIX file profile through the StorageClient:
// round-trips, ranged reads, deletes, globbing, and file handles against a
// real temporary directory.

mod common;

use anyhow::Result;
use bytes::Bytes;
use mscio::{
    ByteRange, ErrorKind, ListOptions, ObjectType, OpenMode, StorageClient, StorageClientConfig,
};
use tempfile::TempDir;

async fn file_client(dir: &TempDir) -> Result<StorageClient> {
    common::init_logging();
    let config = serde_json::json!({
        "profiles": {
            "scratch": {
                "storage_provider": {
                    "type": "file",
                    "options": {"base_path": dir.path().to_string_lossy()}
                }
            }
        }
    });
    Ok(StorageClient::new(
        StorageClientConfig::from_value(&config, "scratch").await?,
    ))
}

#[tokio::test]
async fn test_posix_write_read_info() -> Result<()> {
    let dir = TempDir::new()?;
    let client = file_client(&dir).await?;

    client.write("a/b.txt", Bytes::from_static(b"hello")).await?;
    let body = client.read("a/b.txt", None).await?;
    assert_eq!(&body[..], b"hello");

    let meta = client.info("a/b.txt", true).await?;
    assert_eq!(meta.content_length, 5);
    assert_eq!(meta.object_type, ObjectType::File);
    assert!(meta.etag.is_some());

    // The object really is a plain file under the base path.
    let on_disk = std::fs::read(dir.path().join("a/b.txt"))?;
    assert_eq!(on_disk, b"hello");
    Ok(())
}

#[tokio::test]
async fn test_roundtrip_arbitrary_bytes() -> Result<()> {
    let dir = TempDir::new()?;
    let client = file_client(&dir).await?;

    let bodies: Vec<Vec<u8>> = vec![
        Vec::new(),
        vec![0u8],
        (0..=255u8).collect(),
        vec![0xffu8; 1 << 16],
    ];
    for (index, body) in bodies.into_iter().enumerate() {
        let key = format!("blob/{index}");
        client.write(&key, Bytes::from(body.clone())).await?;
        let back = client.read(&key, None).await?;
        assert_eq!(&back[..], &body[..], "mismatch for {key}");
    }
    Ok(())
}

#[tokio::test]
async fn test_ranged_reads_are_half_open() -> Result<()> {
    let dir = TempDir::new()?;
    let client = file_client(&dir).await?;
    client.write("range.bin", Bytes::from_static(b"0123456789")).await?;

    let chunk = client.read("range.bin", Some(ByteRange::new(3, 4))).await?;
    assert_eq!(&chunk[..], b"3456");
    Ok(())
}

#[tokio::test]
async fn test_delete_idempotence() -> Result<()> {
    let dir = TempDir::new()?;
    let client = file_client(&dir).await?;

    client.write("victim", Bytes::from_static(b"x")).await?;
    client.delete("victim").await?;
    client.delete("victim").await?;

    let err = client.read("victim", None).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    Ok(())
}

#[tokio::test]
async fn test_glob_double_star_semantics() -> Result<()> {
    let dir = TempDir::new()?;
    let client = file_client(&dir).await?;

    for key in ["a/b/c.tar", "a/d.tar", "a/b/e.txt"] {
        client.write(key, Bytes::from_static(b"data")).await?;
    }

    let mut matched = client.glob("**/*.tar", false).await?;
    matched.sort();
    assert_eq!(matched, vec!["a/b/c.tar".to_string(), "a/d.tar".to_string()]);

    // Single star does not cross slashes.
    let single = client.glob("a/*.tar", false).await?;
    assert_eq!(single, vec!["a/d.tar".to_string()]);
    Ok(())
}

#[tokio::test]
async fn test_listing_and_directories() -> Result<()> {
    let dir = TempDir::new()?;
    let client = file_client(&dir).await?;
    for key in ["data/x/1", "data/x/2", "data/y"] {
        client.write(key, Bytes::from_static(b"v")).await?;
    }

    let flat = client.list("data/", &ListOptions::default()).await?;
    let keys: Vec<&str> = flat.iter().map(|meta| meta.key.as_str()).collect();
    assert_eq!(keys, vec!["data/x/1", "data/x/2", "data/y"]);

    let with_dirs = client
        .list(
            "data/",
            &ListOptions {
                include_directories: true,
                ..Default::default()
            },
        )
        .await?;
    let dirs: Vec<&str> = with_dirs
        .iter()
        .filter(|meta| meta.is_directory())
        .map(|meta| meta.key.as_str())
        .collect();
    assert_eq!(dirs, vec!["data/x/"]);
    Ok(())
}

#[tokio::test]
async fn test_file_handles_flush_on_close() -> Result<()> {
    let dir = TempDir::new()?;
    let client = file_client(&dir).await?;

    let mut writer = client.open("handle.txt", OpenMode::Write).await?;
    writer.write(b"part one, ")?;
    // Nothing reaches the backend until close.
    assert_eq!(
        client.read("handle.txt", None).await.unwrap_err().kind(),
        ErrorKind::NotFound
    );
    writer.write(b"part two")?;
    writer.close().await?;

    let mut reader = client.open("handle.txt", OpenMode::Read).await?;
    assert_eq!(reader.read(None)?, Bytes::from_static(b"part one, part two"));
    reader.close().await?;
    Ok(())
}

#[tokio::test]
async fn test_upload_download_files() -> Result<()> {
    let dir = TempDir::new()?;
    let staging = TempDir::new()?;
    let client = file_client(&dir).await?;

    let local_source = staging.path().join("source.bin");
    std::fs::write(&local_source, b"uploaded-bytes")?;
    client.upload_file("up/loaded.bin", &local_source).await?;
    assert_eq!(
        client.read("up/loaded.bin", None).await?,
        Bytes::from_static(b"uploaded-bytes")
    );

    let local_target = staging.path().join("downloaded.bin");
    client.download_file("up/loaded.bin", &local_target).await?;
    assert_eq!(std::fs::read(&local_target)?, b"uploaded-bytes");
    Ok(())
}
