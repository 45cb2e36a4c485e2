// src/cache/lock.rs
//
// Inter-process cache locks built on atomic lock-file creation. A lock file
// older than the configured timeout is treated as abandoned by a dead process
// and stolen.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};

use tracing::{debug, warn};

use crate::constants::DEFAULT_FILE_LOCK_TIMEOUT_SECS;
use crate::error::{MscError, Result};

const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Advisory file lock. `acquire` succeeds on exclusive creation of the lock
/// file; the guard removes it on drop.
pub struct CacheFileLock {
    path: PathBuf,
    stale_after: Duration,
}

#[derive(Debug)]
pub struct CacheLockGuard {
    path: PathBuf,
}

impl CacheFileLock {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            stale_after: Duration::from_secs(DEFAULT_FILE_LOCK_TIMEOUT_SECS),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Block (cooperatively) until the lock is acquired or `timeout` passes.
    pub async fn acquire(&self, timeout: Duration) -> Result<CacheLockGuard> {
        let deadline = Instant::now() + timeout;
        loop {
            match self.try_acquire()? {
                Some(guard) => return Ok(guard),
                None => {
                    if is_stale(&self.path, self.stale_after) {
                        warn!(path = %self.path.display(), "stealing stale cache lock");
                        let _ = std::fs::remove_file(&self.path);
                        continue;
                    }
                    if Instant::now() >= deadline {
                        return Err(MscError::cache(format!(
                            "timed out acquiring cache lock {}",
                            self.path.display()
                        )));
                    }
                    tokio::time::sleep(LOCK_POLL_INTERVAL).await;
                }
            }
        }
    }

    /// Non-blocking attempt; `None` when another process holds the lock.
    pub fn try_acquire(&self) -> Result<Option<CacheLockGuard>> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|err| MscError::cache(format!("cannot create lock directory: {err}")))?;
        }
        match std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.path)
        {
            Ok(file) => {
                use std::io::Write;
                let mut file = file;
                let _ = write!(file, "{}", std::process::id());
                debug!(path = %self.path.display(), "acquired cache lock");
                Ok(Some(CacheLockGuard {
                    path: self.path.clone(),
                }))
            }
            Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => Ok(None),
            Err(err) => Err(MscError::cache(format!(
                "cannot create lock file {}: {err}",
                self.path.display()
            ))),
        }
    }

    /// True while any live process holds this lock.
    pub fn is_held(&self) -> bool {
        self.path.exists() && !is_stale(&self.path, self.stale_after)
    }
}

fn is_stale(path: &Path, stale_after: Duration) -> bool {
    match std::fs::metadata(path).and_then(|meta| meta.modified()) {
        Ok(modified) => SystemTime::now()
            .duration_since(modified)
            .map(|age| age > stale_after)
            .unwrap_or(false),
        // Lock vanished between exists() and stat: not stale, just gone.
        Err(_) => false,
    }
}

impl Drop for CacheLockGuard {
    fn drop(&mut self) {
        if let Err(err) = std::fs::remove_file(&self.path) {
            if err.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %self.path.display(), error = %err, "failed to release cache lock");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_exclusive_acquisition_and_release() {
        let dir = TempDir::new().unwrap();
        let lock = CacheFileLock::new(dir.path().join("entry.lock"));

        let guard = lock.acquire(Duration::from_secs(1)).await.unwrap();
        assert!(lock.is_held());
        assert!(lock.try_acquire().unwrap().is_none());

        drop(guard);
        assert!(!lock.is_held());
        assert!(lock.try_acquire().unwrap().is_some());
    }

    #[tokio::test]
    async fn test_acquire_times_out_while_held() {
        let dir = TempDir::new().unwrap();
        let lock = CacheFileLock::new(dir.path().join("entry.lock"));
        let _guard = lock.acquire(Duration::from_secs(1)).await.unwrap();

        let second = CacheFileLock::new(dir.path().join("entry.lock"));
        let err = second.acquire(Duration::from_millis(80)).await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::CacheError);
    }

    #[tokio::test]
    async fn test_stale_lock_is_stolen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("entry.lock");
        std::fs::write(&path, "12345").unwrap();

        let mut lock = CacheFileLock::new(&path);
        lock.stale_after = Duration::from_millis(0);
        // The prewritten lock file is immediately stale and gets stolen.
        tokio::time::sleep(Duration::from_millis(5)).await;
        let guard = lock.acquire(Duration::from_secs(1)).await.unwrap();
        drop(guard);
    }
}
