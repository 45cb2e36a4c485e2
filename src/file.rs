// src/file.rs
//
// File-like handle over an object. Reads load the body through the client's
// normal read path (cache included) and support seeking; writes buffer in
// memory and upload on close, so a failed commit surfaces on `close`, never
// on `write`.

use bytes::Bytes;
use tracing::warn;

use crate::client::StorageClient;
use crate::error::{MscError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    Read,
    Write,
    /// Write mode seeded with the existing body when the object exists.
    Append,
}

#[derive(Debug, Clone, Copy)]
pub enum SeekFrom {
    Start(u64),
    Current(i64),
    End(i64),
}

enum FileState {
    Reading { body: Bytes, position: u64 },
    Writing { buffer: Vec<u8> },
    Closed,
}

pub struct ObjectFile {
    client: StorageClient,
    path: String,
    state: FileState,
}

impl ObjectFile {
    pub(crate) async fn open(client: StorageClient, path: &str, mode: OpenMode) -> Result<Self> {
        let state = match mode {
            OpenMode::Read => {
                let body = client.read(path, None).await?;
                FileState::Reading { body, position: 0 }
            }
            OpenMode::Write => FileState::Writing { buffer: Vec::new() },
            OpenMode::Append => {
                let buffer = match client.read(path, None).await {
                    Ok(body) => body.to_vec(),
                    Err(err) if err.kind() == crate::error::ErrorKind::NotFound => Vec::new(),
                    Err(err) => return Err(err),
                };
                FileState::Writing { buffer }
            }
        };
        Ok(Self {
            client,
            path: path.to_string(),
            state,
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Read up to `size` bytes (the rest of the body when `None`).
    pub fn read(&mut self, size: Option<usize>) -> Result<Bytes> {
        match &mut self.state {
            FileState::Reading { body, position } => {
                let start = (*position).min(body.len() as u64) as usize;
                let end = match size {
                    Some(size) => (start + size).min(body.len()),
                    None => body.len(),
                };
                *position = end as u64;
                Ok(body.slice(start..end))
            }
            FileState::Writing { .. } => Err(MscError::invalid_argument(
                "file handle is open for writing",
            )),
            FileState::Closed => Err(MscError::invalid_argument("file handle is closed")),
        }
    }

    /// Buffer bytes for upload on close. Never touches the backend.
    pub fn write(&mut self, data: &[u8]) -> Result<usize> {
        match &mut self.state {
            FileState::Writing { buffer } => {
                buffer.extend_from_slice(data);
                Ok(data.len())
            }
            FileState::Reading { .. } => Err(MscError::invalid_argument(
                "file handle is open for reading",
            )),
            FileState::Closed => Err(MscError::invalid_argument("file handle is closed")),
        }
    }

    pub fn seek(&mut self, seek: SeekFrom) -> Result<u64> {
        match &mut self.state {
            FileState::Reading { body, position } => {
                let len = body.len() as i64;
                let target = match seek {
                    SeekFrom::Start(offset) => offset as i64,
                    SeekFrom::Current(delta) => *position as i64 + delta,
                    SeekFrom::End(delta) => len + delta,
                };
                if target < 0 {
                    return Err(MscError::invalid_argument("seek before start of file"));
                }
                *position = target as u64;
                Ok(*position)
            }
            _ => Err(MscError::invalid_argument(
                "seek is only supported in read mode",
            )),
        }
    }

    pub fn tell(&self) -> Result<u64> {
        match &self.state {
            FileState::Reading { position, .. } => Ok(*position),
            FileState::Writing { buffer } => Ok(buffer.len() as u64),
            FileState::Closed => Err(MscError::invalid_argument("file handle is closed")),
        }
    }

    /// Flush and release the handle. In write mode this uploads the buffered
    /// body; an upload failure surfaces here and leaves the handle open for
    /// another attempt.
    pub async fn close(&mut self) -> Result<()> {
        match std::mem::replace(&mut self.state, FileState::Closed) {
            FileState::Closed | FileState::Reading { .. } => Ok(()),
            FileState::Writing { buffer } => {
                let body = Bytes::from(buffer);
                match self.client.write(&self.path, body.clone()).await {
                    Ok(()) => Ok(()),
                    Err(err) => {
                        // Restore the buffer so the caller may retry close().
                        self.state = FileState::Writing {
                            buffer: body.to_vec(),
                        };
                        Err(err)
                    }
                }
            }
        }
    }
}

impl Drop for ObjectFile {
    fn drop(&mut self) {
        if let FileState::Writing { buffer } = &self.state {
            if !buffer.is_empty() {
                warn!(
                    path = %self.path,
                    buffered = buffer.len(),
                    "object file dropped with unflushed writes; call close()"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StorageClientConfig;

    async fn client(bucket: &str) -> StorageClient {
        let config = serde_json::json!({
            "profiles": {
                "test": {"storage_provider": {"type": "memory", "options": {"base_path": bucket}}}
            }
        });
        StorageClient::new(StorageClientConfig::from_value(&config, "test").await.unwrap())
    }

    #[tokio::test]
    async fn test_write_then_read_handle() {
        let client = client("file-handle").await;

        let mut writer = client.open("doc.txt", OpenMode::Write).await.unwrap();
        writer.write(b"hello ").unwrap();
        writer.write(b"world").unwrap();
        writer.close().await.unwrap();

        let mut reader = client.open("doc.txt", OpenMode::Read).await.unwrap();
        assert_eq!(reader.read(Some(5)).unwrap(), Bytes::from_static(b"hello"));
        assert_eq!(reader.read(None).unwrap(), Bytes::from_static(b" world"));
        assert_eq!(reader.read(None).unwrap(), Bytes::new());
        reader.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_seek_semantics() {
        let client = client("file-seek").await;
        client.write("s.bin", Bytes::from_static(b"0123456789")).await.unwrap();

        let mut reader = client.open("s.bin", OpenMode::Read).await.unwrap();
        reader.seek(SeekFrom::Start(4)).unwrap();
        assert_eq!(reader.read(Some(2)).unwrap(), Bytes::from_static(b"45"));
        reader.seek(SeekFrom::Current(-3)).unwrap();
        assert_eq!(reader.tell().unwrap(), 3);
        reader.seek(SeekFrom::End(-2)).unwrap();
        assert_eq!(reader.read(None).unwrap(), Bytes::from_static(b"89"));
        assert!(reader.seek(SeekFrom::Current(-100)).is_err());
    }

    #[tokio::test]
    async fn test_append_mode() {
        let client = client("file-append").await;
        client.write("log", Bytes::from_static(b"line1\n")).await.unwrap();

        let mut appender = client.open("log", OpenMode::Append).await.unwrap();
        appender.write(b"line2\n").unwrap();
        // The object is tracked plainly (no manifest), so rewriting is
        // allowed and close replaces the body.
        appender.close().await.unwrap();

        assert_eq!(
            client.read("log", None).await.unwrap(),
            Bytes::from_static(b"line1\nline2\n")
        );
    }

    #[tokio::test]
    async fn test_mode_misuse_is_rejected() {
        let client = client("file-modes").await;
        client.write("x", Bytes::from_static(b"v")).await.unwrap();

        let mut reader = client.open("x", OpenMode::Read).await.unwrap();
        assert!(reader.write(b"nope").is_err());

        let mut writer = client.open("y", OpenMode::Write).await.unwrap();
        assert!(writer.read(None).is_err());
        writer.close().await.unwrap();
    }
}
