// src/lib.rs
//
// mscio: a unified client over heterogeneous object and file stores.
// Callers address data as msc://{profile}/{key}; the library resolves the
// profile to a backend, translates paths, optionally accelerates listings
// with manifests, and optionally caches bodies locally.

pub mod constants;
pub mod error;
pub mod types;

pub mod globmatch;
pub mod retry;
pub mod url;

pub mod cache;
pub mod config;
pub mod manifest;
pub mod providers;
pub mod rclone;
pub mod telemetry;

pub mod client;
pub mod file;
pub mod shortcuts;
mod sync;

// ===== Core public API =====

pub use client::StorageClient;
pub use config::{PathMapping, StorageClientConfig};
pub use error::{ErrorKind, MscError, Result};
pub use file::{ObjectFile, OpenMode, SeekFrom};
pub use types::{
    ByteRange, Credentials, CredentialsProvider, ListOptions, MetadataProvider, ObjectMetadata,
    ObjectType, ProviderBundle, PutOptions, RetryConfig, SimpleProviderBundle, StorageProvider,
    StorageProviderConfig,
};

// Shortcut functions mirror the client surface for one-off calls.
pub use shortcuts::{
    clear_client_registry, commit_metadata, delete, download_file, glob, info, is_empty, is_file,
    list, open, read, resolve_storage_client, sync, upload_file, write,
};

// Manifest, cache, provider-registry, and telemetry entry points.
pub use cache::{CacheBackend, CacheConfig, EvictionPolicy};
pub use manifest::{generate_manifest, ManifestMetadataProvider};
pub use providers::{
    register_credentials_provider, register_provider_bundle, register_storage_provider,
    MemoryStorageProvider, PosixFileStorageProvider,
};
pub use telemetry::{
    DiperiodicExportingMetricReader, DiperiodicReaderConfig, Telemetry, TelemetryManager,
    TelemetryProxy,
};
