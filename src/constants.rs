// src/constants.rs
//
// Centralized constants for mscio to avoid hardcoded values throughout the codebase

/// URL protocol prefix for profile-scoped addressing (`msc://profile/key`).
pub const MSC_PROTOCOL: &str = "msc://";

/// Profile name used for POSIX access rooted at `/`. Always defined.
pub const DEFAULT_POSIX_PROFILE_NAME: &str = "default";

/// Profile name synthesized for bare POSIX paths and `file://` URLs.
pub const IMPLICIT_FILE_PROFILE_NAME: &str = "_file";

/// URL schemes that may be resolved to implicit profiles.
pub const SUPPORTED_IMPLICIT_PROFILE_SCHEMES: &[&str] = &["s3", "gs", "ais", "file"];

/// Default retry attempts for storage operations
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 3;

/// Default base delay between retry attempts (seconds)
pub const DEFAULT_RETRY_DELAY_SECS: f64 = 1.0;

/// Default cache capacity when the config omits `size`
pub const DEFAULT_CACHE_SIZE: &str = "10G";

/// Default cache refresh interval (seconds)
pub const DEFAULT_CACHE_REFRESH_INTERVAL_SECS: u64 = 300;

/// Inter-process cache lock timeout (seconds). A lock file older than this is
/// considered stale and may be stolen.
pub const DEFAULT_FILE_LOCK_TIMEOUT_SECS: u64 = 600;

/// Reads at or above this size are routed through the cache (16 MiB).
/// Smaller one-shot reads bypass; repeat reads of the same key also cache.
pub const DEFAULT_CACHE_READ_THRESHOLD: u64 = 16 * 1024 * 1024;

/// Objects larger than this are spilled through a temporary file during sync
/// rather than buffered in memory (512 MiB).
pub const MEMORY_LOAD_LIMIT: u64 = 512 * 1024 * 1024;

// =============================================================================
// Manifest layout
// =============================================================================

/// Directory under a profile's base path holding timestamped manifest generations.
pub const DEFAULT_MANIFEST_BASE_DIR: &str = ".msc_manifests";

/// Index file name inside each generation directory.
pub const MANIFEST_INDEX_FILENAME: &str = "msc_manifest_index.json";

/// Child directory of a generation holding the part files.
pub const MANIFEST_PARTS_CHILD_DIR: &str = "parts";

/// Part file name prefix; the sequence number is zero-padded after it.
pub const MANIFEST_PART_PREFIX: &str = "msc_manifest_part";

/// Part file name suffix (line-delimited JSON).
pub const MANIFEST_PART_SUFFIX: &str = ".jsonl";

/// Zero padding for part sequence numbers ("000001").
pub const MANIFEST_SEQUENCE_PADDING: usize = 6;

/// Supported manifest index schema version.
pub const MANIFEST_VERSION: &str = "1.0";

/// Maximum records per manifest part written by commit.
pub const MANIFEST_MAX_PART_RECORDS: usize = 100_000;

/// Concurrent part fetches during a manifest load.
pub const MANIFEST_LOAD_CONCURRENCY: usize = 8;

// =============================================================================
// Environment variables
// =============================================================================

/// Selects a config file ahead of the default search paths.
pub const ENV_MSC_CONFIG: &str = "MSC_CONFIG";

/// Worker process count for the sync engine.
pub const ENV_MSC_NUM_PROCESSES: &str = "MSC_NUM_PROCESSES";

/// Worker threads per process for the sync engine.
pub const ENV_MSC_NUM_THREADS_PER_PROCESS: &str = "MSC_NUM_THREADS_PER_PROCESS";

/// Config file search order after `$MSC_CONFIG`: YAML first, then JSON.
pub fn msc_config_search_paths() -> Vec<std::path::PathBuf> {
    let home = std::env::var("HOME").unwrap_or_default();
    let home = std::path::Path::new(&home);
    vec![
        std::path::PathBuf::from("/etc/msc_config.yaml"),
        home.join(".config/msc/config.yaml"),
        home.join(".msc_config.yaml"),
        std::path::PathBuf::from("/etc/msc_config.json"),
        home.join(".config/msc/config.json"),
        home.join(".msc_config.json"),
    ]
}

/// Rclone config search order after the `rclone` binary directory and
/// `$XDG_CONFIG_HOME/rclone/rclone.conf`.
pub fn rclone_config_search_paths() -> Vec<std::path::PathBuf> {
    let home = std::env::var("HOME").unwrap_or_default();
    let home = std::path::Path::new(&home);
    vec![
        std::path::PathBuf::from("/etc/rclone.conf"),
        home.join(".config/rclone/rclone.conf"),
        home.join(".rclone.conf"),
    ]
}

// =============================================================================
// Telemetry
// =============================================================================

/// Collector poll interval. 1 second keeps per-export data volume small while
/// preserving high-frequency gauges.
pub const DEFAULT_COLLECT_INTERVAL_MILLIS: u64 = 1_000;

/// Bound on a single collect pass.
pub const DEFAULT_COLLECT_TIMEOUT_MILLIS: u64 = 10_000;

/// Exporter flush interval.
pub const DEFAULT_EXPORT_INTERVAL_MILLIS: u64 = 60_000;

/// Bound on a single export pass.
pub const DEFAULT_EXPORT_TIMEOUT_MILLIS: u64 = 30_000;

/// Samples retained in the collect ring before the oldest are dropped.
pub const DEFAULT_SAMPLE_RING_CAPACITY: usize = 65_536;

/// Loopback address of the cross-process telemetry manager.
pub const DEFAULT_TELEMETRY_MANAGER_ADDR: &str = "127.0.0.1:4315";

/// Spans faster than this are dropped by the tail sampler unless they errored
/// (milliseconds).
pub const DEFAULT_TAIL_SAMPLER_THRESHOLD_MILLIS: u64 = 1_000;
