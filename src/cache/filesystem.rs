// src/cache/filesystem.rs
//
// Local-disk cache backend. Bodies live at {cache_dir}/{fingerprint} with a
// sidecar .meta entry; insertion publishes atomically (temp file, fsync,
// rename) so readers never see a partial body. The filesystem is the
// authoritative state; the .index file is an advisory hint rebuilt on
// refresh.

use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::fs;
use tracing::{debug, trace, warn};

use crate::error::{MscError, Result};

use super::config::CacheConfig;
use super::entry::{CacheEntry, CacheKey};
use super::eviction::EvictionPolicy;
use super::lock::{CacheFileLock, CacheLockGuard};
use super::CacheBackend;

const META_SUFFIX: &str = ".meta";
const LOCK_SUFFIX: &str = ".lock";
const INDEX_FILENAME: &str = ".index";
const REFRESH_LOCK_FILENAME: &str = ".cache_refresh.lock";

pub struct FileSystemCacheBackend {
    cache_dir: PathBuf,
    max_size: u64,
    use_etag: bool,
    policy: EvictionPolicy,
    refresh_interval: Duration,
    last_refresh: Mutex<Instant>,
}

impl FileSystemCacheBackend {
    pub fn new(config: &CacheConfig) -> Result<Self> {
        let cache_dir = config.backend.cache_path.clone();
        std::fs::create_dir_all(&cache_dir)
            .map_err(|err| MscError::cache(format!("cannot create cache directory: {err}")))?;
        Ok(Self {
            cache_dir,
            max_size: config.size_bytes()?,
            use_etag: config.use_etag,
            policy: config.eviction_policy.policy,
            refresh_interval: Duration::from_secs(config.eviction_policy.refresh_interval),
            last_refresh: Mutex::new(Instant::now()),
        })
    }

    fn body_path(&self, fingerprint: &str) -> PathBuf {
        self.cache_dir.join(fingerprint)
    }

    fn meta_path(&self, fingerprint: &str) -> PathBuf {
        self.cache_dir.join(format!("{fingerprint}{META_SUFFIX}"))
    }

    fn lock_path(&self, fingerprint: &str) -> PathBuf {
        self.cache_dir.join(format!("{fingerprint}{LOCK_SUFFIX}"))
    }

    fn read_entry(&self, fingerprint: &str) -> Option<CacheEntry> {
        let raw = std::fs::read(self.meta_path(fingerprint)).ok()?;
        serde_json::from_slice(&raw).ok()
    }

    fn write_entry(&self, entry: &CacheEntry) -> Result<()> {
        let raw = serde_json::to_vec(entry)
            .map_err(|err| MscError::cache(format!("cannot encode cache entry: {err}")))?;
        std::fs::write(self.meta_path(&entry.fingerprint), raw)
            .map_err(|err| MscError::cache(format!("cannot write cache entry: {err}")))
    }

    fn etag_matches(&self, key: &CacheKey, entry: Option<&CacheEntry>) -> bool {
        if !self.use_etag {
            return true;
        }
        match entry {
            Some(entry) => entry.etag == key.etag,
            // Body without metadata: only trust it when validation is off.
            None => false,
        }
    }

    /// Scan the directory for entries; bodies missing a .meta sidecar get one
    /// synthesized from filesystem metadata so they still participate in
    /// eviction.
    fn scan_entries(&self) -> Vec<CacheEntry> {
        let mut entries = Vec::new();
        let read_dir = match std::fs::read_dir(&self.cache_dir) {
            Ok(read_dir) => read_dir,
            Err(err) => {
                warn!(error = %err, "cannot scan cache directory");
                return entries;
            }
        };
        for dir_entry in read_dir.flatten() {
            let name = dir_entry.file_name().to_string_lossy().to_string();
            if name.starts_with('.') || name.ends_with(META_SUFFIX) || name.ends_with(LOCK_SUFFIX) {
                continue;
            }
            let Ok(file_meta) = dir_entry.metadata() else {
                continue;
            };
            if !file_meta.is_file() {
                continue;
            }
            let entry = self.read_entry(&name).unwrap_or_else(|| {
                let nanos = |time: std::io::Result<std::time::SystemTime>| {
                    time.ok()
                        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                        .map(|d| d.as_nanos() as u64)
                        .unwrap_or(0)
                };
                CacheEntry {
                    fingerprint: name.clone(),
                    size: file_meta.len(),
                    inserted_at: nanos(file_meta.modified()),
                    last_accessed: nanos(file_meta.accessed()),
                    etag: None,
                }
            });
            entries.push(entry);
        }
        entries
    }

    fn remove_entry_files(&self, fingerprint: &str) {
        for path in [
            self.body_path(fingerprint),
            self.meta_path(fingerprint),
            self.lock_path(fingerprint),
        ] {
            if let Err(err) = std::fs::remove_file(&path) {
                if err.kind() != std::io::ErrorKind::NotFound {
                    warn!(path = %path.display(), error = %err, "failed to remove cache file");
                }
            }
        }
    }

    /// Evict per policy until total body bytes fit `max_size`. Entries whose
    /// lock is held by any process are skipped.
    fn enforce_capacity(&self) {
        if self.policy == EvictionPolicy::NoEviction {
            return;
        }
        let mut entries = self.scan_entries();
        let mut total: u64 = entries.iter().map(|entry| entry.size).sum();
        if total <= self.max_size {
            return;
        }

        self.policy.sort_victims(&mut entries);
        for victim in entries {
            if total <= self.max_size {
                break;
            }
            if CacheFileLock::new(self.lock_path(&victim.fingerprint)).is_held() {
                trace!(fingerprint = %victim.fingerprint, "skipping locked cache entry");
                continue;
            }
            debug!(
                fingerprint = %victim.fingerprint,
                size = victim.size,
                "evicting cache entry"
            );
            self.remove_entry_files(&victim.fingerprint);
            total = total.saturating_sub(victim.size);
        }
    }

    fn write_index(&self, entries: &[CacheEntry]) {
        match serde_json::to_vec(entries) {
            Ok(raw) => {
                // Advisory hint only; concurrent writers may overwrite it.
                if let Err(err) = std::fs::write(self.cache_dir.join(INDEX_FILENAME), raw) {
                    warn!(error = %err, "failed to write cache index");
                }
            }
            Err(err) => warn!(error = %err, "failed to encode cache index"),
        }
    }

    fn refresh_due(&self) -> bool {
        let last = self.last_refresh.lock().expect("cache refresh clock poisoned");
        last.elapsed() > self.refresh_interval
    }

    fn mark_refreshed(&self) {
        let mut last = self.last_refresh.lock().expect("cache refresh clock poisoned");
        *last = Instant::now();
    }

    async fn refresh_if_due(&self) {
        if self.refresh_due() {
            if let Err(err) = self.refresh().await {
                warn!(error = %err, "deferred cache refresh failed");
            }
        }
    }
}

#[async_trait]
impl CacheBackend for FileSystemCacheBackend {
    fn use_etag(&self) -> bool {
        self.use_etag
    }

    fn max_cache_size(&self) -> u64 {
        self.max_size
    }

    async fn read(&self, key: &CacheKey) -> Option<Bytes> {
        let fingerprint = key.fingerprint();
        let entry = self.read_entry(&fingerprint);
        if !self.etag_matches(key, entry.as_ref()) {
            return None;
        }
        match fs::read(self.body_path(&fingerprint)).await {
            Ok(body) => {
                if let Some(mut entry) = entry {
                    entry.touch();
                    let _ = self.write_entry(&entry);
                }
                Some(Bytes::from(body))
            }
            Err(_) => None,
        }
    }

    async fn contains(&self, key: &CacheKey) -> bool {
        let fingerprint = key.fingerprint();
        if !self.body_path(&fingerprint).exists() {
            return false;
        }
        self.etag_matches(key, self.read_entry(&fingerprint).as_ref())
    }

    async fn set(&self, key: &CacheKey, body: Bytes) -> Result<()> {
        let size = body.len() as u64;
        if size > self.max_size {
            debug!(
                key = %key.key,
                size,
                max = self.max_size,
                "object larger than the cache; not caching"
            );
            return Ok(());
        }

        let fingerprint = key.fingerprint();
        let final_path = self.body_path(&fingerprint);
        let tmp_path = self
            .cache_dir
            .join(format!(".{fingerprint}.{:08x}.tmp", rand::random::<u32>()));

        let publish = async {
            let mut file = fs::File::create(&tmp_path).await?;
            use tokio::io::AsyncWriteExt;
            file.write_all(&body).await?;
            file.sync_all().await?;
            fs::rename(&tmp_path, &final_path).await?;
            Ok::<_, std::io::Error>(())
        }
        .await;
        if let Err(err) = publish {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(MscError::cache(format!("failed to publish cache entry: {err}")));
        }

        self.write_entry(&CacheEntry::new(fingerprint, size, key.etag.clone()))?;

        // The bound is enforced on every insertion; refresh reconciles
        // anything deferred during high churn.
        self.enforce_capacity();
        self.refresh_if_due().await;
        Ok(())
    }

    async fn delete(&self, key: &CacheKey) -> Result<()> {
        self.remove_entry_files(&key.fingerprint());
        Ok(())
    }

    async fn cache_size(&self) -> u64 {
        self.scan_entries().iter().map(|entry| entry.size).sum()
    }

    async fn refresh(&self) -> Result<bool> {
        if self.policy == EvictionPolicy::NoEviction {
            self.mark_refreshed();
            return Ok(true);
        }
        let refresh_lock = CacheFileLock::new(self.cache_dir.join(REFRESH_LOCK_FILENAME));
        let Some(_guard) = refresh_lock.try_acquire()? else {
            // Another process is refreshing; wait for the next turn.
            return Ok(false);
        };
        self.enforce_capacity();
        self.write_index(&self.scan_entries());
        self.mark_refreshed();
        Ok(true)
    }

    async fn acquire_lock(&self, key: &CacheKey) -> Result<Option<CacheLockGuard>> {
        let lock = CacheFileLock::new(self.lock_path(&key.fingerprint()));
        let guard = lock
            .acquire(Duration::from_secs(
                crate::constants::DEFAULT_FILE_LOCK_TIMEOUT_SECS,
            ))
            .await?;
        Ok(Some(guard))
    }
}
