// src/cache/entry.rs
//
// Cache entry bookkeeping. The fingerprint is a collision-resistant hash of
// (profile, key) and names all on-disk state for one cached object.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Identifies one cacheable object, optionally pinned to an authoritative
/// ETag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheKey {
    pub profile: String,
    pub key: String,
    pub etag: Option<String>,
}

impl CacheKey {
    pub fn new(profile: &str, key: &str, etag: Option<String>) -> Self {
        Self {
            profile: profile.to_string(),
            key: key.to_string(),
            etag,
        }
    }

    /// SHA-256 over `profile/key`, hex encoded. Used as the cache file name.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.profile.as_bytes());
        hasher.update(b"/");
        hasher.update(self.key.as_bytes());
        let digest = hasher.finalize();
        digest.iter().map(|byte| format!("{byte:02x}")).collect()
    }
}

/// Serialized alongside each cached body as `{fingerprint}.meta`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub fingerprint: String,
    pub size: u64,
    /// Unix nanoseconds at insertion; FIFO eviction order.
    pub inserted_at: u64,
    /// Unix nanoseconds at last read; LRU eviction order.
    pub last_accessed: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
}

impl CacheEntry {
    pub fn new(fingerprint: String, size: u64, etag: Option<String>) -> Self {
        let now = unix_nanos_now();
        Self {
            fingerprint,
            size,
            inserted_at: now,
            last_accessed: now,
            etag,
        }
    }

    pub fn touch(&mut self) {
        self.last_accessed = unix_nanos_now();
    }
}

pub fn unix_nanos_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_is_stable_and_distinct() {
        let a = CacheKey::new("profile", "a/b.txt", None);
        let b = CacheKey::new("profile", "a/b.txt", Some("etag".into()));
        let c = CacheKey::new("other", "a/b.txt", None);

        // The ETag does not participate in the fingerprint.
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_ne!(a.fingerprint(), c.fingerprint());
        assert_eq!(a.fingerprint().len(), 64);
    }

    #[test]
    fn test_entry_serde_roundtrip() {
        let mut entry = CacheEntry::new("ff".repeat(32), 128, Some("tag".into()));
        entry.touch();
        let json = serde_json::to_string(&entry).unwrap();
        let back: CacheEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(back.size, 128);
        assert_eq!(back.etag.as_deref(), Some("tag"));
        assert!(back.last_accessed >= back.inserted_at);
    }
}
