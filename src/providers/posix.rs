// src/providers/posix.rs
//
// POSIX file system storage provider. Writes publish atomically (temp file in
// the destination directory, fsync, rename) so readers never observe a
// partial object.

use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tracing::{trace, warn};

use crate::error::{ErrorKind, MscError, Result};
use crate::globmatch;
use crate::types::{
    ByteRange, ListOptions, ObjectMetadata, ObjectType, PutOptions, StorageProvider,
};
use crate::url::{join_paths, strip_base_path};

pub const PROVIDER: &str = "file";

pub struct PosixFileStorageProvider {
    base_path: String,
}

impl PosixFileStorageProvider {
    /// `base_path` must be absolute; an empty string means `/`.
    pub fn new(base_path: &str) -> Result<Self> {
        let base_path = if base_path.is_empty() { "/" } else { base_path };
        if !base_path.starts_with('/') {
            return Err(MscError::invalid_argument(format!(
                "the base_path {base_path} must be an absolute path"
            )));
        }
        Ok(Self {
            base_path: base_path.trim_end_matches('/').to_string() + "/",
        })
    }

    fn full_path(&self, path: &str) -> PathBuf {
        PathBuf::from(join_paths(&self.base_path, path))
    }

    fn relative_key(&self, full: &Path) -> String {
        strip_base_path(&full.to_string_lossy(), &self.base_path)
    }

    async fn metadata_from_path(&self, full: &Path) -> Result<ObjectMetadata> {
        let meta = fs::metadata(full)
            .await
            .map_err(|err| io_err(err, &full.to_string_lossy()))?;
        let modified = meta.modified().unwrap_or(UNIX_EPOCH);
        let last_modified: DateTime<Utc> = modified.into();

        if meta.is_dir() {
            let mut key = self.relative_key(full);
            if !key.ends_with('/') {
                key.push('/');
            }
            return Ok(ObjectMetadata::directory(key, last_modified));
        }

        let mtime_nanos = modified
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        let mut object = ObjectMetadata::file(self.relative_key(full), meta.len(), last_modified);
        object.etag = Some(format!("{:x}-{:x}", meta.len(), mtime_nanos));
        Ok(object)
    }

    /// Write `body` to `dest` atomically: temp file alongside, fsync, rename.
    async fn atomic_write(&self, dest: &Path, body: &[u8]) -> Result<()> {
        let parent = dest
            .parent()
            .ok_or_else(|| MscError::invalid_argument("object path has no parent directory"))?;
        fs::create_dir_all(parent)
            .await
            .map_err(|err| io_err(err, &parent.to_string_lossy()))?;

        let file_name = dest
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let tmp = parent.join(format!(".{}.{:08x}.tmp", file_name, rand::random::<u32>()));

        let result = async {
            let mut file = fs::File::create(&tmp).await?;
            file.write_all(body).await?;
            file.sync_all().await?;
            fs::rename(&tmp, dest).await?;
            Ok::<_, std::io::Error>(())
        }
        .await;

        if let Err(err) = result {
            let _ = fs::remove_file(&tmp).await;
            return Err(io_err(err, &dest.to_string_lossy()));
        }
        Ok(())
    }

    async fn check_if_match(&self, full: &Path, if_match: Option<&str>) -> Result<()> {
        if let Some(expected) = if_match {
            let current = self.metadata_from_path(full).await?;
            if current.etag.as_deref() != Some(expected) {
                return Err(MscError::precondition_failed(format!(
                    "etag mismatch: expected {expected}, found {}",
                    current.etag.as_deref().unwrap_or("<none>")
                )));
            }
        }
        Ok(())
    }

    /// Depth-first walk collecting file entries under `dir`, sorted per level.
    async fn walk_files(&self, dir: &Path, results: &mut Vec<ObjectMetadata>) -> Result<()> {
        let mut names = Vec::new();
        let mut entries = match fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(err) => return Err(io_err(err, &dir.to_string_lossy())),
        };
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|err| io_err(err, &dir.to_string_lossy()))?
        {
            names.push(entry.path());
        }
        names.sort();

        for path in names {
            if path.is_dir() {
                Box::pin(self.walk_files(&path, results)).await?;
            } else {
                results.push(self.metadata_from_path(&path).await?);
            }
        }
        Ok(())
    }
}

fn io_err(err: std::io::Error, path: &str) -> MscError {
    let kind = err.kind();
    let err = MscError::from(err).with_key(path.to_string());
    if kind == std::io::ErrorKind::NotFound {
        MscError::not_found(path.to_string())
    } else {
        err
    }
}

#[async_trait]
impl StorageProvider for PosixFileStorageProvider {
    fn provider_name(&self) -> &str {
        PROVIDER
    }

    fn base_path(&self) -> &str {
        &self.base_path
    }

    async fn put_object(&self, path: &str, body: Bytes, options: &PutOptions) -> Result<()> {
        let full = self.full_path(path);
        if options.if_none_match.as_deref() == Some("*") && full.exists() {
            return Err(MscError::conflict(format!("object already exists: {path}")));
        }
        self.check_if_match(&full, options.if_match.as_deref()).await?;
        if options.metadata.is_some() {
            // POSIX has no portable user-metadata store; keep the bytes, drop
            // the tags.
            trace!(path, "dropping user metadata on file backend");
        }
        self.atomic_write(&full, &body).await
    }

    async fn get_object(&self, path: &str, byte_range: Option<ByteRange>) -> Result<Bytes> {
        let full = self.full_path(path);
        match byte_range {
            None => {
                let data = fs::read(&full).await.map_err(|err| io_err(err, path))?;
                Ok(Bytes::from(data))
            }
            Some(range) => {
                let mut file = fs::File::open(&full).await.map_err(|err| io_err(err, path))?;
                let len = file
                    .metadata()
                    .await
                    .map_err(|err| io_err(err, path))?
                    .len();
                if range.offset >= len {
                    return Ok(Bytes::new());
                }
                file.seek(std::io::SeekFrom::Start(range.offset))
                    .await
                    .map_err(|err| io_err(err, path))?;
                let take = range.size.min(len - range.offset) as usize;
                let mut buffer = vec![0u8; take];
                file.read_exact(&mut buffer)
                    .await
                    .map_err(|err| io_err(err, path))?;
                Ok(Bytes::from(buffer))
            }
        }
    }

    async fn copy_object(&self, src_path: &str, dest_path: &str) -> Result<()> {
        let body = self.get_object(src_path, None).await?;
        self.atomic_write(&self.full_path(dest_path), &body).await
    }

    async fn delete_object(&self, path: &str, if_match: Option<&str>) -> Result<()> {
        let full = self.full_path(path);
        if !full.exists() {
            // Idempotent: deleting a missing object succeeds.
            return Ok(());
        }
        self.check_if_match(&full, if_match).await?;
        if full.is_file() {
            fs::remove_file(&full).await.map_err(|err| io_err(err, path))?;
        }
        Ok(())
    }

    async fn get_object_metadata(&self, path: &str, _strict: bool) -> Result<ObjectMetadata> {
        self.metadata_from_path(&self.full_path(path)).await
    }

    async fn list_objects(&self, prefix: &str, options: &ListOptions) -> Result<Vec<ObjectMetadata>> {
        options.validate()?;
        let full_prefix = join_paths(&self.base_path, prefix);
        let mut results = Vec::new();

        // The prefix is a string prefix over keys, not necessarily a
        // directory: list the parent and filter.
        let parent = if full_prefix.ends_with('/') {
            PathBuf::from(full_prefix.trim_end_matches('/'))
        } else {
            PathBuf::from(&full_prefix)
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from("/"))
        };

        let mut matching = Vec::new();
        let mut entries = match fs::read_dir(&parent).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(results),
            Err(err) => return Err(io_err(err, prefix)),
        };
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|err| io_err(err, prefix))?
        {
            let path = entry.path();
            if path.to_string_lossy().starts_with(full_prefix.trim_end_matches('/'))
                || full_prefix.ends_with('/')
            {
                matching.push(path);
            }
        }
        matching.sort();

        for path in matching {
            if path.is_file() {
                results.push(self.metadata_from_path(&path).await?);
            } else if path.is_dir() {
                if options.include_directories {
                    results.push(self.metadata_from_path(&path).await?);
                } else {
                    self.walk_files(&path, &mut results).await?;
                }
            }
        }

        results.retain(|meta| options.admits(&meta.key));
        results.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(results)
    }

    async fn upload_file(&self, remote_path: &str, local_path: &Path) -> Result<()> {
        let body = fs::read(local_path)
            .await
            .map_err(|err| io_err(err, &local_path.to_string_lossy()))?;
        self.atomic_write(&self.full_path(remote_path), &body).await
    }

    async fn download_file(
        &self,
        remote_path: &str,
        local_path: &Path,
        _metadata: Option<&ObjectMetadata>,
    ) -> Result<()> {
        let body = self.get_object(remote_path, None).await?;
        if let Some(parent) = local_path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|err| io_err(err, &parent.to_string_lossy()))?;
        }
        fs::write(local_path, &body)
            .await
            .map_err(|err| io_err(err, &local_path.to_string_lossy()))
    }

    async fn glob(&self, pattern: &str) -> Result<Vec<String>> {
        let prefix = globmatch::extract_prefix_from_glob(pattern);
        let listed = match self.list_objects(&prefix, &ListOptions::default()).await {
            Ok(listed) => listed,
            Err(err) if err.kind() == ErrorKind::NotFound => Vec::new(),
            Err(err) => {
                warn!(pattern, error = %err, "glob listing failed");
                return Err(err);
            }
        };
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

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn provider(dir: &TempDir) -> PosixFileStorageProvider {
        PosixFileStorageProvider::new(&dir.path().to_string_lossy()).unwrap()
    }

    #[tokio::test]
    async fn test_put_get_roundtrip() {
        let dir = TempDir::new().unwrap();
        let store = provider(&dir);

        store
            .put_object("a/b.txt", Bytes::from_static(b"hello"), &PutOptions::default())
            .await
            .unwrap();
        let body = store.get_object("a/b.txt", None).await.unwrap();
        assert_eq!(&body[..], b"hello");

        let meta = store.get_object_metadata("a/b.txt", true).await.unwrap();
        assert_eq!(meta.content_length, 5);
        assert_eq!(meta.key, "a/b.txt");
        assert!(meta.etag.is_some());
    }

    #[tokio::test]
    async fn test_ranged_get_half_open() {
        let dir = TempDir::new().unwrap();
        let store = provider(&dir);
        store
            .put_object("r.bin", Bytes::from_static(b"0123456789"), &PutOptions::default())
            .await
            .unwrap();

        let chunk = store
            .get_object("r.bin", Some(ByteRange::new(2, 3)))
            .await
            .unwrap();
        assert_eq!(&chunk[..], b"234");

        // Clamped at EOF.
        let tail = store
            .get_object("r.bin", Some(ByteRange::new(8, 10)))
            .await
            .unwrap();
        assert_eq!(&tail[..], b"89");
    }

    #[tokio::test]
    async fn test_missing_object_is_not_found() {
        let dir = TempDir::new().unwrap();
        let store = provider(&dir);
        let err = store.get_object("nope", None).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let store = provider(&dir);
        store
            .put_object("d.txt", Bytes::from_static(b"x"), &PutOptions::default())
            .await
            .unwrap();
        store.delete_object("d.txt", None).await.unwrap();
        store.delete_object("d.txt", None).await.unwrap();
        assert!(!store.is_file("d.txt").await.unwrap());
    }

    #[tokio::test]
    async fn test_list_recursive_and_sorted() {
        let dir = TempDir::new().unwrap();
        let store = provider(&dir);
        for key in ["p/b/2.txt", "p/a/1.txt", "p/c.txt", "q/other.txt"] {
            store
                .put_object(key, Bytes::from_static(b"x"), &PutOptions::default())
                .await
                .unwrap();
        }

        let listed = store.list_objects("p/", &ListOptions::default()).await.unwrap();
        let keys: Vec<&str> = listed.iter().map(|meta| meta.key.as_str()).collect();
        assert_eq!(keys, vec!["p/a/1.txt", "p/b/2.txt", "p/c.txt"]);
    }

    #[tokio::test]
    async fn test_list_include_directories() {
        let dir = TempDir::new().unwrap();
        let store = provider(&dir);
        for key in ["p/a/1.txt", "p/b/2.txt", "p/c.txt"] {
            store
                .put_object(key, Bytes::from_static(b"x"), &PutOptions::default())
                .await
                .unwrap();
        }
        let options = ListOptions {
            include_directories: true,
            ..Default::default()
        };
        let listed = store.list_objects("p/", &options).await.unwrap();
        let dirs: Vec<&str> = listed
            .iter()
            .filter(|m| m.is_directory())
            .map(|m| m.key.as_str())
            .collect();
        assert_eq!(dirs, vec!["p/a/", "p/b/"]);
    }

    #[tokio::test]
    async fn test_if_match_precondition() {
        let dir = TempDir::new().unwrap();
        let store = provider(&dir);
        store
            .put_object("e.txt", Bytes::from_static(b"v1"), &PutOptions::default())
            .await
            .unwrap();
        let options = PutOptions {
            if_match: Some("wrong-etag".into()),
            ..Default::default()
        };
        let err = store
            .put_object("e.txt", Bytes::from_static(b"v2"), &options)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PreconditionFailed);
    }

    #[tokio::test]
    async fn test_glob() {
        let dir = TempDir::new().unwrap();
        let store = provider(&dir);
        for key in ["a/b/c.tar", "a/d.tar", "a/b/e.txt"] {
            store
                .put_object(key, Bytes::from_static(b"x"), &PutOptions::default())
                .await
                .unwrap();
        }
        let mut matched = store.glob("**/*.tar").await.unwrap();
        matched.sort();
        assert_eq!(matched, vec!["a/b/c.tar".to_string(), "a/d.tar".to_string()]);
    }
}
