// src/cache/config.rs
//
// Cache configuration: capacity with a unit suffix, ETag validation toggle,
// eviction policy, and the backend (local directory or a second storage
// profile).

use std::path::PathBuf;

use serde::Deserialize;

use crate::constants::{
    DEFAULT_CACHE_READ_THRESHOLD, DEFAULT_CACHE_REFRESH_INTERVAL_SECS, DEFAULT_CACHE_SIZE,
};
use crate::error::{MscError, Result};

use super::eviction::EvictionPolicy;

#[derive(Debug, Clone, Deserialize)]
pub struct EvictionPolicyConfig {
    pub policy: EvictionPolicy,
    /// Seconds between directory rescans.
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval: u64,
}

fn default_refresh_interval() -> u64 {
    DEFAULT_CACHE_REFRESH_INTERVAL_SECS
}

impl Default for EvictionPolicyConfig {
    fn default() -> Self {
        // FIFO is supported by both backends.
        Self {
            policy: EvictionPolicy::Fifo,
            refresh_interval: DEFAULT_CACHE_REFRESH_INTERVAL_SECS,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheBackendConfig {
    #[serde(default = "default_cache_path")]
    pub cache_path: PathBuf,
    /// When set, object bodies live under this profile's storage provider
    /// instead of the local disk.
    #[serde(default)]
    pub storage_provider_profile: Option<String>,
}

fn default_cache_path() -> PathBuf {
    std::env::temp_dir().join("mscio-cache")
}

impl Default for CacheBackendConfig {
    fn default() -> Self {
        Self {
            cache_path: default_cache_path(),
            storage_provider_profile: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    /// Capacity with a unit suffix: "512M", "10G", "1T".
    #[serde(default = "default_cache_size")]
    pub size: String,
    /// Validate cached bodies against the authoritative ETag.
    #[serde(default = "default_use_etag")]
    pub use_etag: bool,
    #[serde(default)]
    pub eviction_policy: EvictionPolicyConfig,
    #[serde(default, rename = "cache_backend")]
    pub backend: CacheBackendConfig,
    /// Unranged reads at or above this size are cached; smaller one-shot
    /// reads bypass.
    #[serde(default = "default_read_threshold")]
    pub read_threshold: u64,
}

fn default_cache_size() -> String {
    DEFAULT_CACHE_SIZE.to_string()
}

fn default_use_etag() -> bool {
    true
}

fn default_read_threshold() -> u64 {
    DEFAULT_CACHE_READ_THRESHOLD
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            size: default_cache_size(),
            use_etag: true,
            eviction_policy: EvictionPolicyConfig::default(),
            backend: CacheBackendConfig::default(),
            read_threshold: DEFAULT_CACHE_READ_THRESHOLD,
        }
    }
}

impl CacheConfig {
    pub fn size_bytes(&self) -> Result<u64> {
        parse_size(&self.size)
    }
}

/// Parse a size string with a K/M/G/T unit suffix into bytes.
pub fn parse_size(size: &str) -> Result<u64> {
    let size = size.trim();
    let (number, unit) = size.split_at(size.len().saturating_sub(1));
    let factor: u64 = match unit {
        "K" | "k" => 1024,
        "M" | "m" => 1024u64.pow(2),
        "G" | "g" => 1024u64.pow(3),
        "T" | "t" => 1024u64.pow(4),
        _ => {
            // No suffix: plain byte count.
            return size.parse::<u64>().map_err(|_| {
                MscError::invalid_argument(format!(
                    "invalid cache size \"{size}\": expected <N>[KMGT]"
                ))
            });
        }
    };
    let value: f64 = number.parse().map_err(|_| {
        MscError::invalid_argument(format!("invalid cache size \"{size}\": expected <N>[KMGT]"))
    })?;
    if value < 0.0 {
        return Err(MscError::invalid_argument(format!(
            "cache size must be non-negative, got \"{size}\""
        )));
    }
    Ok((value * factor as f64) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_size_units() {
        assert_eq!(parse_size("200K").unwrap(), 200 * 1024);
        assert_eq!(parse_size("500M").unwrap(), 500 * 1024 * 1024);
        assert_eq!(parse_size("10G").unwrap(), 10 * 1024u64.pow(3));
        assert_eq!(parse_size("1T").unwrap(), 1024u64.pow(4));
        assert_eq!(parse_size("1.5G").unwrap(), (1.5 * 1024f64.powi(3)) as u64);
        assert_eq!(parse_size("1024").unwrap(), 1024);
    }

    #[test]
    fn test_parse_size_invalid() {
        assert!(parse_size("abc").is_err());
        assert!(parse_size("10Q").is_err());
        assert!(parse_size("").is_err());
    }

    #[test]
    fn test_config_defaults_from_yaml() {
        let config: CacheConfig = serde_yaml::from_str("size: 20G\n").unwrap();
        assert_eq!(config.size, "20G");
        assert!(config.use_etag);
        assert_eq!(config.eviction_policy.policy, EvictionPolicy::Fifo);
        assert_eq!(config.eviction_policy.refresh_interval, 300);
        assert!(config.backend.storage_provider_profile.is_none());
    }

    #[test]
    fn test_full_config_from_yaml() {
        let yaml = r#"
size: 10M
use_etag: false
eviction_policy:
  policy: lru
  refresh_interval: 60
cache_backend:
  cache_path: /tmp/msc-test-cache
"#;
        let config: CacheConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.size_bytes().unwrap(), 10 * 1024 * 1024);
        assert!(!config.use_etag);
        assert_eq!(config.eviction_policy.policy, EvictionPolicy::Lru);
        assert_eq!(config.backend.cache_path, PathBuf::from("/tmp/msc-test-cache"));
    }
}
