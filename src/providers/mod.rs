// src/providers/mod.rs
//
// Provider registry with pluggable backends. `type` strings in configuration
// resolve through a process-wide registry populated with the built-in
// providers at startup; host applications register vendor SDK bindings and
// provider bundles under their own names.

pub mod memory;
pub mod posix;

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use once_cell::sync::Lazy;
use tracing::debug;

use crate::error::{MscError, Result};
use crate::types::{
    Credentials, CredentialsProvider, ProviderBundle, StaticCredentialsProvider, StorageProvider,
};

pub use memory::MemoryStorageProvider;
pub use posix::PosixFileStorageProvider;

/// Everything a storage provider factory gets to work with.
pub struct StorageProviderContext {
    /// Provider-specific options from the profile config (`base_path`,
    /// endpoint URLs, region, ...).
    pub options: serde_json::Value,
    pub credentials: Option<Arc<dyn CredentialsProvider>>,
}

impl StorageProviderContext {
    pub fn option_str(&self, key: &str) -> Option<&str> {
        self.options.get(key).and_then(|v| v.as_str())
    }
}

pub type StorageProviderFactory =
    Arc<dyn Fn(StorageProviderContext) -> Result<Arc<dyn StorageProvider>> + Send + Sync>;

pub type CredentialsProviderFactory =
    Arc<dyn Fn(&serde_json::Value) -> Result<Arc<dyn CredentialsProvider>> + Send + Sync>;

pub type ProviderBundleFactory =
    Arc<dyn Fn(&serde_json::Value) -> Result<Arc<dyn ProviderBundle>> + Send + Sync>;

struct Registry {
    storage: HashMap<String, StorageProviderFactory>,
    credentials: HashMap<String, CredentialsProviderFactory>,
    bundles: HashMap<String, ProviderBundleFactory>,
}

static REGISTRY: Lazy<RwLock<Registry>> = Lazy::new(|| RwLock::new(Registry::with_builtins()));

impl Registry {
    fn with_builtins() -> Self {
        let mut storage: HashMap<String, StorageProviderFactory> = HashMap::new();

        storage.insert(
            "file".to_string(),
            Arc::new(|ctx: StorageProviderContext| {
                let base_path = ctx.option_str("base_path").unwrap_or("/");
                Ok(Arc::new(PosixFileStorageProvider::new(base_path)?) as Arc<dyn StorageProvider>)
            }),
        );

        storage.insert(
            "memory".to_string(),
            Arc::new(|ctx: StorageProviderContext| {
                let base_path = ctx.option_str("base_path").unwrap_or("");
                Ok(Arc::new(MemoryStorageProvider::attach(base_path)) as Arc<dyn StorageProvider>)
            }),
        );

        let mut credentials: HashMap<String, CredentialsProviderFactory> = HashMap::new();
        let static_factory: CredentialsProviderFactory = Arc::new(|options: &serde_json::Value| {
            let creds: Credentials = serde_json::from_value(options.clone()).map_err(|err| {
                MscError::invalid_argument(format!("invalid static credentials options: {err}"))
            })?;
            Ok(Arc::new(StaticCredentialsProvider::new(creds)) as Arc<dyn CredentialsProvider>)
        });
        // Rclone-derived configs use the per-backend names; plain configs may
        // use "static" directly.
        for name in ["static", "S3Credentials", "AzureCredentials", "AISCredentials"] {
            credentials.insert(name.to_string(), static_factory.clone());
        }

        Self {
            storage,
            credentials,
            bundles: HashMap::new(),
        }
    }
}

/// Register (or replace) a storage provider factory under a type name.
/// Vendor backends ("s3", "gcs", "oci", "azure", "ais") plug in here.
pub fn register_storage_provider(provider_type: &str, factory: StorageProviderFactory) {
    debug!(provider_type, "registering storage provider factory");
    REGISTRY
        .write()
        .expect("provider registry lock poisoned")
        .storage
        .insert(provider_type.to_string(), factory);
}

/// Register a credentials provider factory under a qualified name.
pub fn register_credentials_provider(provider_type: &str, factory: CredentialsProviderFactory) {
    debug!(provider_type, "registering credentials provider factory");
    REGISTRY
        .write()
        .expect("provider registry lock poisoned")
        .credentials
        .insert(provider_type.to_string(), factory);
}

/// Register a provider bundle factory under a qualified name.
pub fn register_provider_bundle(bundle_type: &str, factory: ProviderBundleFactory) {
    debug!(bundle_type, "registering provider bundle factory");
    REGISTRY
        .write()
        .expect("provider registry lock poisoned")
        .bundles
        .insert(bundle_type.to_string(), factory);
}

/// Build a storage provider of the given type.
pub fn build_storage_provider(
    provider_type: &str,
    context: StorageProviderContext,
) -> Result<Arc<dyn StorageProvider>> {
    let factory = {
        let registry = REGISTRY.read().expect("provider registry lock poisoned");
        registry.storage.get(provider_type).cloned()
    };
    match factory {
        Some(factory) => factory(context),
        None => {
            let mut supported: Vec<String> = {
                let registry = REGISTRY.read().expect("provider registry lock poisoned");
                registry.storage.keys().cloned().collect()
            };
            supported.sort();
            Err(MscError::invalid_argument(format!(
                "storage provider type \"{provider_type}\" is not registered; \
                 available types: {supported:?}"
            )))
        }
    }
}

/// Build a credentials provider of the given type.
pub fn build_credentials_provider(
    provider_type: &str,
    options: &serde_json::Value,
) -> Result<Arc<dyn CredentialsProvider>> {
    let factory = {
        let registry = REGISTRY.read().expect("provider registry lock poisoned");
        registry.credentials.get(provider_type).cloned()
    };
    match factory {
        Some(factory) => factory(options),
        None => Err(MscError::invalid_argument(format!(
            "credentials provider type \"{provider_type}\" is not registered"
        ))),
    }
}

/// Build a provider bundle of the given type.
pub fn build_provider_bundle(
    bundle_type: &str,
    options: &serde_json::Value,
) -> Result<Arc<dyn ProviderBundle>> {
    let factory = {
        let registry = REGISTRY.read().expect("provider registry lock poisoned");
        registry.bundles.get(bundle_type).cloned()
    };
    match factory {
        Some(factory) => factory(options),
        None => Err(MscError::invalid_argument(format!(
            "provider bundle type \"{bundle_type}\" is not registered"
        ))),
    }
}
