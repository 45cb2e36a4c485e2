// src/config.rs
//
// Declarative configuration: file discovery, environment-variable expansion,
// profile realization through the provider registry, path mapping, and
// implicit profiles synthesized for foreign URLs.

use std::path::PathBuf;
use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use tracing::{debug, warn};

use crate::cache::{create_cache_backend, CacheBackend, CacheConfig};
use crate::constants::{
    msc_config_search_paths, DEFAULT_POSIX_PROFILE_NAME, ENV_MSC_CONFIG, MSC_PROTOCOL,
    SUPPORTED_IMPLICIT_PROFILE_SCHEMES,
};
use crate::error::{MscError, Result};
use crate::manifest::ManifestMetadataProvider;
use crate::providers::{
    build_credentials_provider, build_provider_bundle, build_storage_provider,
    StorageProviderContext,
};
use crate::rclone::read_rclone_config;
use crate::telemetry::{
    telemetry_from_config, InstrumentedStorageProvider, TailSampler, Telemetry,
};
use crate::types::{
    CredentialsProvider, MetadataProvider, ProviderBundle, RetryConfig, StorageProvider,
    StorageProviderConfig,
};
use crate::url::{is_implicit_profile, join_paths, url_scheme, validate_profile_name};

/// Map a URL scheme onto the provider type realized for its implicit profile.
fn scheme_provider_type(scheme: &str) -> Option<&'static str> {
    match scheme {
        "s3" => Some("s3"),
        "gs" => Some("gcs"),
        "ais" => Some("ais"),
        "file" => Some("file"),
        _ => None,
    }
}

/// Configuration dictionary for one implicit profile.
pub fn create_implicit_profile_config(profile_name: &str, scheme: &str, base_path: &str) -> Value {
    let provider_type = scheme_provider_type(scheme).unwrap_or(scheme);
    serde_json::json!({
        "profiles": {
            profile_name: {
                "storage_provider": {
                    "type": provider_type,
                    "options": {"base_path": base_path}
                }
            }
        }
    })
}

fn default_posix_profile() -> Value {
    create_implicit_profile_config(DEFAULT_POSIX_PROFILE_NAME, "file", "/")
}

/// Recursively expand `${VAR}` and `$VAR` in every string value. Unresolved
/// references are left literal.
pub fn expand_env_vars(value: &Value) -> Value {
    static VAR_RE: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}|\$([A-Za-z_][A-Za-z0-9_]*)").unwrap());

    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, value)| (key.clone(), expand_env_vars(value)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(expand_env_vars).collect()),
        Value::String(raw) => {
            let expanded = VAR_RE.replace_all(raw, |captures: &regex::Captures| {
                let name = captures
                    .get(1)
                    .or_else(|| captures.get(2))
                    .map(|m| m.as_str())
                    .unwrap_or_default();
                match std::env::var(name) {
                    Ok(value) => value,
                    Err(_) => captures
                        .get(0)
                        .map(|m| m.as_str().to_string())
                        .unwrap_or_default(),
                }
            });
            Value::String(expanded.into_owned())
        }
        other => other.clone(),
    }
}

/// Recursively merge `extra` into `base` without overwriting; returns the
/// keys that collided.
pub fn merge_no_overwrite(base: &mut Value, extra: Value) -> Vec<String> {
    let mut conflicts = Vec::new();
    merge_inner(base, extra, &mut conflicts);
    conflicts
}

fn merge_inner(base: &mut Value, extra: Value, conflicts: &mut Vec<String>) {
    match (base, extra) {
        (Value::Object(base_map), Value::Object(extra_map)) => {
            for (key, extra_value) in extra_map {
                match base_map.get_mut(&key) {
                    None => {
                        base_map.insert(key, extra_value);
                    }
                    Some(base_value) => {
                        if base_value.is_object() && extra_value.is_object() {
                            merge_inner(base_value, extra_value, conflicts);
                        } else {
                            conflicts.push(key);
                        }
                    }
                }
            }
        }
        _ => conflicts.push("<root>".to_string()),
    }
}

/// Ordered path-mapping table: source prefixes (longest first) rewriting to
/// `msc://` destinations.
#[derive(Debug, Clone, Default)]
pub struct PathMapping {
    entries: Vec<(String, String)>,
}

impl PathMapping {
    pub fn from_value(config: &Value) -> Self {
        let mut entries = Vec::new();
        if let Some(mapping) = config.get("path_mapping").and_then(Value::as_object) {
            for (source, destination) in mapping {
                let Some(destination) = destination.as_str() else {
                    continue;
                };
                if !source.ends_with('/')
                    || !destination.starts_with(MSC_PROTOCOL)
                    || !destination.ends_with('/')
                {
                    warn!(source, destination, "ignoring malformed path mapping entry");
                    continue;
                }
                entries.push((normalize_source_prefix(source), destination.to_string()));
            }
        }
        // Longest prefix first so the most specific mapping wins.
        entries.sort_by(|a, b| b.0.len().cmp(&a.0.len()));
        Self { entries }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Rewrite `url` to its mapped `msc://` URL when a source prefix matches.
    pub fn find_mapping(&self, url: &str) -> Option<String> {
        let normalized = normalize_source_prefix(url);
        for (source, destination) in &self.entries {
            if let Some(remainder) = normalized.strip_prefix(source.as_str()) {
                return Some(join_paths(destination, remainder));
            }
        }
        None
    }
}

fn normalize_source_prefix(source: &str) -> String {
    source
        .strip_prefix("file://")
        .map(str::to_string)
        .unwrap_or_else(|| source.to_string())
}

/// Locate and parse the MSC configuration. `$MSC_CONFIG` wins, then the
/// standard search paths; the first existing file is used.
pub fn read_msc_config() -> Result<Option<(Value, PathBuf)>> {
    let mut candidates: Vec<PathBuf> = Vec::new();
    if let Ok(explicit) = std::env::var(ENV_MSC_CONFIG) {
        candidates.push(PathBuf::from(explicit));
    }
    candidates.extend(msc_config_search_paths());

    for path in candidates {
        if !path.is_file() {
            continue;
        }
        let raw = std::fs::read_to_string(&path).map_err(|err| {
            MscError::invalid_argument(format!("cannot read config {}: {err}", path.display()))
        })?;
        let parsed: Value = if path.extension().and_then(|ext| ext.to_str()) == Some("json") {
            serde_json::from_str(&raw).map_err(|err| {
                MscError::invalid_argument(format!("malformed config {}: {err}", path.display()))
            })?
        } else {
            serde_yaml::from_str(&raw).map_err(|err| {
                MscError::invalid_argument(format!("malformed config {}: {err}", path.display()))
            })?
        };
        debug!(path = %path.display(), "loaded MSC config");
        return Ok(Some((parsed, path)));
    }
    Ok(None)
}

/// Path mapping from the discovered configuration; empty when no config
/// exists or the section is absent.
pub fn read_path_mapping() -> PathMapping {
    match read_msc_config() {
        Ok(Some((config, _))) => PathMapping::from_value(&expand_env_vars(&config)),
        Ok(None) => PathMapping::default(),
        Err(err) => {
            warn!(error = %err, "failed to load path_mapping from MSC config");
            PathMapping::default()
        }
    }
}

/// Fully realized configuration for one profile.
#[derive(Debug)]
pub struct StorageClientConfig {
    pub profile: String,
    pub storage_provider: Arc<dyn StorageProvider>,
    pub credentials_provider: Option<Arc<dyn CredentialsProvider>>,
    pub metadata_provider: Option<Arc<dyn MetadataProvider>>,
    pub cache_config: Option<CacheConfig>,
    pub cache: Option<Arc<dyn CacheBackend>>,
    pub retry_config: RetryConfig,
    pub telemetry: Option<Arc<Telemetry>>,
}

impl StorageClientConfig {
    pub async fn from_yaml(config_yaml: &str, profile: &str) -> Result<Self> {
        let config: Value = serde_yaml::from_str(config_yaml)
            .map_err(|err| MscError::invalid_argument(format!("malformed YAML config: {err}")))?;
        Self::from_value(&config, profile).await
    }

    pub async fn from_json(config_json: &str, profile: &str) -> Result<Self> {
        let config: Value = serde_json::from_str(config_json)
            .map_err(|err| MscError::invalid_argument(format!("malformed JSON config: {err}")))?;
        Self::from_value(&config, profile).await
    }

    /// Build a profile from a parsed configuration dictionary.
    pub async fn from_value(config: &Value, profile: &str) -> Result<Self> {
        ConfigLoader::new(config.clone(), profile)?.build(None).await
    }

    /// Build a profile around a pre-built provider bundle; the bundle
    /// supersedes the profile's provider fields.
    pub async fn from_provider_bundle(
        config: &Value,
        profile: &str,
        bundle: Arc<dyn ProviderBundle>,
    ) -> Result<Self> {
        ConfigLoader::new(config.clone(), profile)?.build(Some(bundle)).await
    }

    /// Resolve `profile` through config discovery: MSC config merged with
    /// rclone remotes, the predefined `default` profile, and implicit
    /// profiles synthesized from their name.
    pub async fn from_file(profile: &str) -> Result<Self> {
        let msc_config = read_msc_config()?;
        let (mut merged, msc_path) = match msc_config {
            Some((config, path)) => (config, Some(path)),
            None => (serde_json::json!({}), None),
        };

        if let Some((rclone_config, rclone_path)) = read_rclone_config()? {
            let conflicts = merge_no_overwrite(&mut merged, rclone_config);
            if !conflicts.is_empty() {
                return Err(MscError::invalid_argument(format!(
                    "conflicting keys between {} and {}: {conflicts:?}",
                    msc_path
                        .as_deref()
                        .map(|p| p.display().to_string())
                        .unwrap_or_else(|| "MSC config (not found)".to_string()),
                    rclone_path.display()
                )));
            }
        }

        let has_profile = merged
            .get("profiles")
            .and_then(|profiles| profiles.get(profile))
            .is_some();

        if !has_profile {
            let implicit = if profile == DEFAULT_POSIX_PROFILE_NAME {
                default_posix_profile()
            } else if let Some(rest) = profile.strip_prefix('_') {
                match rest.split_once('-') {
                    Some((scheme, bucket))
                        if SUPPORTED_IMPLICIT_PROFILE_SCHEMES.contains(&scheme) =>
                    {
                        create_implicit_profile_config(profile, scheme, bucket)
                    }
                    Some((scheme, _)) => {
                        return Err(MscError::invalid_argument(format!(
                            "unsupported scheme in implicit profile: \"{scheme}\""
                        )))
                    }
                    None if profile == crate::constants::IMPLICIT_FILE_PROFILE_NAME => {
                        create_implicit_profile_config(profile, "file", "/")
                    }
                    None => {
                        return Err(MscError::invalid_argument(format!(
                            "invalid implicit profile format: \"{profile}\""
                        )))
                    }
                }
            } else {
                return Err(MscError::invalid_argument(format!(
                    "profile \"{profile}\" not found in configuration files"
                )));
            };
            // Merge so the implicit profile inherits cache and telemetry.
            merge_no_overwrite(&mut merged, implicit);
        }

        Self::from_value(&merged, profile).await
    }
}

struct ConfigLoader {
    config: Value,
    profile: String,
    profile_config: Value,
    telemetry: Option<Arc<Telemetry>>,
}

impl ConfigLoader {
    fn new(config: Value, profile: &str) -> Result<Self> {
        let mut config = expand_env_vars(&config);

        let mut profiles = config
            .get("profiles")
            .cloned()
            .unwrap_or_else(|| serde_json::json!({}));
        if !profiles.is_object() {
            return Err(MscError::invalid_argument("\"profiles\" must be a mapping"));
        }

        // The default POSIX profile is always available and can only be the
        // file provider.
        match profiles.get(DEFAULT_POSIX_PROFILE_NAME) {
            None => {
                profiles[DEFAULT_POSIX_PROFILE_NAME] =
                    default_posix_profile()["profiles"][DEFAULT_POSIX_PROFILE_NAME].clone();
            }
            Some(default_profile) => {
                let provider_type = default_profile
                    .pointer("/storage_provider/type")
                    .and_then(Value::as_str);
                if provider_type != Some("file") {
                    return Err(MscError::invalid_argument(format!(
                        "cannot override \"{DEFAULT_POSIX_PROFILE_NAME}\" profile with storage \
                         provider type {provider_type:?}; expected \"file\""
                    )));
                }
            }
        }

        // Reserved names are rejected for user-declared profiles.
        for name in profiles.as_object().map(|map| map.keys()).into_iter().flatten() {
            if name != DEFAULT_POSIX_PROFILE_NAME && !is_implicit_profile(name) {
                validate_profile_name(name)?;
            }
        }

        let profile_config = profiles.get(profile).cloned().ok_or_else(|| {
            let available: Vec<String> = profiles
                .as_object()
                .map(|map| map.keys().cloned().collect())
                .unwrap_or_default();
            MscError::invalid_argument(format!(
                "profile {profile} not found; available profiles: {available:?}"
            ))
        })?;

        // Keep the injected default profile visible to sibling lookups.
        config["profiles"] = profiles;

        let telemetry = match config.pointer("/opentelemetry/metrics") {
            Some(metrics) => Some(telemetry_from_config(Some(metrics), &config)?),
            None => None,
        };

        Ok(Self {
            config,
            profile: profile.to_string(),
            profile_config,
            telemetry,
        })
    }

    fn profiles(&self) -> &Value {
        static EMPTY: Lazy<Value> = Lazy::new(|| serde_json::json!({}));
        self.config.get("profiles").unwrap_or(&EMPTY)
    }

    fn build_credentials(
        &self,
        credentials_config: Option<&Value>,
    ) -> Result<Option<Arc<dyn CredentialsProvider>>> {
        let Some(credentials_config) = credentials_config else {
            return Ok(None);
        };
        let provider_type = credentials_config
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                MscError::invalid_argument("credentials_provider entry missing \"type\"")
            })?;
        let options = credentials_config
            .get("options")
            .cloned()
            .unwrap_or(Value::Null);
        build_credentials_provider(provider_type, &options).map(Some)
    }

    fn build_storage(
        &self,
        storage_config: &StorageProviderConfig,
        credentials: Option<Arc<dyn CredentialsProvider>>,
    ) -> Result<Arc<dyn StorageProvider>> {
        let provider = build_storage_provider(
            &storage_config.provider_type,
            StorageProviderContext {
                options: storage_config.options.clone(),
                credentials,
            },
        )?;
        Ok(match &self.telemetry {
            Some(telemetry) => Arc::new(InstrumentedStorageProvider::new(
                provider,
                telemetry.clone(),
                &self.profile,
                TailSampler::default(),
            )),
            None => provider,
        })
    }

    /// Build the storage provider of a sibling profile (manifest or cache
    /// placement). Such a profile must not itself carry a metadata provider.
    fn build_sibling_storage(&self, sibling: &str) -> Result<Arc<dyn StorageProvider>> {
        let sibling_config = self.profiles().get(sibling).ok_or_else(|| {
            MscError::invalid_argument(format!(
                "profile \"{sibling}\" referenced by storage_provider_profile does not exist"
            ))
        })?;
        if sibling_config.get("metadata_provider").is_some() {
            return Err(MscError::invalid_argument(format!(
                "profile \"{sibling}\" cannot have a metadata provider when used as a \
                 storage_provider_profile"
            )));
        }
        let storage_config = storage_provider_config(sibling_config)?;
        let credentials = self.build_credentials(sibling_config.get("credentials_provider"))?;
        self.build_storage(&storage_config, credentials)
    }

    async fn build_metadata_provider(
        &self,
        storage_config: &StorageProviderConfig,
        credentials: Option<Arc<dyn CredentialsProvider>>,
    ) -> Result<Option<Arc<dyn MetadataProvider>>> {
        let Some(metadata_config) = self.profile_config.get("metadata_provider") else {
            return Ok(None);
        };
        let provider_type = metadata_config
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| MscError::invalid_argument("metadata_provider entry missing \"type\""))?;
        if provider_type != "manifest" {
            return Err(MscError::invalid_argument(format!(
                "metadata provider type \"{provider_type}\" is not supported; use \"manifest\" \
                 or supply a provider_bundle"
            )));
        }

        let options = metadata_config.get("options").cloned().unwrap_or(Value::Null);
        let manifest_path = options
            .get("manifest_path")
            .and_then(Value::as_str)
            .unwrap_or(crate::constants::DEFAULT_MANIFEST_BASE_DIR);
        let writable = options
            .get("writable")
            .and_then(Value::as_bool)
            .unwrap_or(true);

        let manifest_storage = match options.get("storage_provider_profile").and_then(Value::as_str)
        {
            Some(sibling) => self.build_sibling_storage(sibling)?,
            None => self.build_storage(storage_config, credentials)?,
        };

        let provider =
            ManifestMetadataProvider::new(manifest_storage, manifest_path, writable).await?;
        Ok(Some(Arc::new(provider)))
    }

    fn build_cache(&self) -> Result<(Option<CacheConfig>, Option<Arc<dyn CacheBackend>>)> {
        let Some(cache_value) = self.config.get("cache") else {
            return Ok((None, None));
        };
        if cache_value.get("size_mb").is_some() || cache_value.get("location").is_some() {
            return Err(MscError::invalid_argument(
                "the cache properties \"size_mb\" and \"location\" are no longer supported; use \
                 \"size\" with a unit suffix and \"cache_backend.cache_path\"",
            ));
        }
        let cache_config: CacheConfig =
            serde_json::from_value(cache_value.clone()).map_err(|err| {
                MscError::invalid_argument(format!("invalid cache configuration: {err}"))
            })?;

        let cache_storage = match &cache_config.backend.storage_provider_profile {
            Some(sibling) => {
                if sibling == &self.profile {
                    warn!(
                        profile = %self.profile,
                        "the cache backend reuses the data profile; prefer a separate read-only \
                         profile"
                    );
                }
                Some(self.build_sibling_storage(sibling)?)
            }
            None => None,
        };

        let backend = create_cache_backend(&cache_config, cache_storage)?;
        Ok((Some(cache_config), Some(backend)))
    }

    fn retry_config(&self) -> Result<RetryConfig> {
        match self.profile_config.get("retry") {
            None => Ok(RetryConfig::default()),
            Some(retry_value) => {
                let attempts = retry_value
                    .get("attempts")
                    .and_then(Value::as_u64)
                    .unwrap_or(crate::constants::DEFAULT_RETRY_ATTEMPTS as u64)
                    as u32;
                let delay = retry_value
                    .get("delay")
                    .and_then(Value::as_f64)
                    .unwrap_or(crate::constants::DEFAULT_RETRY_DELAY_SECS);
                RetryConfig::new(attempts, delay)
            }
        }
    }

    async fn build(self, bundle: Option<Arc<dyn ProviderBundle>>) -> Result<StorageClientConfig> {
        // A configured provider_bundle supersedes the individual provider
        // fields; a caller-supplied bundle supersedes both.
        let bundle = match bundle {
            Some(bundle) => Some(bundle),
            None => match self.profile_config.get("provider_bundle") {
                Some(bundle_config) => {
                    let bundle_type = bundle_config
                        .get("type")
                        .and_then(Value::as_str)
                        .ok_or_else(|| {
                            MscError::invalid_argument("provider_bundle entry missing \"type\"")
                        })?;
                    let options = bundle_config.get("options").cloned().unwrap_or(Value::Null);
                    Some(build_provider_bundle(bundle_type, &options)?)
                }
                None => None,
            },
        };

        // A bundle supplies all three providers together and fully
        // supersedes the profile's individual provider fields.
        let (storage_config, credentials, metadata_provider) = match &bundle {
            Some(bundle) => (
                bundle.storage_provider_config(),
                bundle.credentials_provider(),
                bundle.metadata_provider(),
            ),
            None => {
                let storage_config = storage_provider_config(&self.profile_config)?;
                let credentials =
                    self.build_credentials(self.profile_config.get("credentials_provider"))?;
                let metadata_provider = self
                    .build_metadata_provider(&storage_config, credentials.clone())
                    .await?;
                (storage_config, credentials, metadata_provider)
            }
        };

        let storage_provider = self.build_storage(&storage_config, credentials.clone())?;
        let (cache_config, cache) = self.build_cache()?;
        let retry_config = self.retry_config()?;

        Ok(StorageClientConfig {
            profile: self.profile,
            storage_provider,
            credentials_provider: credentials,
            metadata_provider,
            cache_config,
            cache,
            retry_config,
            telemetry: self.telemetry,
        })
    }
}

fn storage_provider_config(profile_config: &Value) -> Result<StorageProviderConfig> {
    let storage_value = profile_config
        .get("storage_provider")
        .ok_or_else(|| MscError::invalid_argument("missing storage_provider in the profile config"))?;
    let provider_type = storage_value
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| MscError::invalid_argument("storage_provider entry missing \"type\""))?;
    Ok(StorageProviderConfig {
        provider_type: provider_type.to_string(),
        options: storage_value
            .get("options")
            .cloned()
            .unwrap_or(serde_json::json!({})),
    })
}

/// Resolve a non-`msc://` URL to `(profile, path)`: path mapping first, then
/// the default profile for POSIX paths, then an implicit profile.
pub fn resolve_foreign_url(url: &str, mapping: &PathMapping) -> Result<(String, String)> {
    if let Some(mapped) = mapping.find_mapping(url) {
        return crate::url::parse_msc_url(&mapped);
    }

    if let Some(path) = url.strip_prefix("file://") {
        return Ok((DEFAULT_POSIX_PROFILE_NAME.to_string(), path.to_string()));
    }
    if url.starts_with('/') {
        return Ok((DEFAULT_POSIX_PROFILE_NAME.to_string(), url.to_string()));
    }

    let Some(scheme) = url_scheme(url) else {
        // A bare relative path: anchor it to the working directory.
        let absolute = std::env::current_dir()
            .map_err(|err| MscError::invalid_argument(format!("cannot resolve \"{url}\": {err}")))?
            .join(url);
        return Ok((
            DEFAULT_POSIX_PROFILE_NAME.to_string(),
            absolute.to_string_lossy().to_string(),
        ));
    };

    if !SUPPORTED_IMPLICIT_PROFILE_SCHEMES.contains(&scheme.as_str()) {
        return Err(MscError::invalid_argument(format!(
            "unknown URL \"{url}\": expected {MSC_PROTOCOL}, a supported scheme (s3://, gs://, \
             ais://, file://), or a POSIX path"
        )));
    }

    let rest = &url[scheme.len() + 3..];
    let (bucket, key) = crate::url::split_path(rest);
    if bucket.is_empty() {
        return Err(MscError::invalid_argument(format!(
            "invalid URL \"{url}\": bucket name is required for {scheme}:// URLs"
        )));
    }
    Ok((format!("_{scheme}-{bucket}"), key))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_env_vars_leaves_unresolved_literal() {
        std::env::set_var("MSC_TEST_REGION", "us-east-1");
        let config = serde_json::json!({
            "region": "${MSC_TEST_REGION}",
            "endpoint": "$MSC_TEST_REGION.example.com",
            "missing": "${MSC_TEST_NOT_SET_ANYWHERE}",
            "nested": {"value": "prefix-${MSC_TEST_REGION}"},
            "count": 3
        });
        let expanded = expand_env_vars(&config);
        assert_eq!(expanded["region"], "us-east-1");
        assert_eq!(expanded["endpoint"], "us-east-1.example.com");
        assert_eq!(expanded["missing"], "${MSC_TEST_NOT_SET_ANYWHERE}");
        assert_eq!(expanded["nested"]["value"], "prefix-us-east-1");
        assert_eq!(expanded["count"], 3);
    }

    #[test]
    fn test_merge_no_overwrite_reports_conflicts() {
        let mut base = serde_json::json!({"profiles": {"a": {"x": 1}}, "cache": {"size": "1G"}});
        let extra = serde_json::json!({"profiles": {"b": {"y": 2}, "a": {"x": 9}}});
        let conflicts = merge_no_overwrite(&mut base, extra);
        assert_eq!(conflicts, vec!["x".to_string()]);
        assert!(base["profiles"]["b"].is_object());
        assert_eq!(base["profiles"]["a"]["x"], 1);
    }

    #[test]
    fn test_path_mapping_longest_prefix_wins() {
        let config = serde_json::json!({
            "path_mapping": {
                "s3://bucket/": "msc://coarse/",
                "s3://bucket/deep/": "msc://fine/",
                "/mnt/data/": "msc://posix-data/",
                "no-trailing-slash": "msc://bad/"
            }
        });
        let mapping = PathMapping::from_value(&config);
        assert_eq!(
            mapping.find_mapping("s3://bucket/deep/file.txt").unwrap(),
            "msc://fine/file.txt"
        );
        assert_eq!(
            mapping.find_mapping("s3://bucket/other.txt").unwrap(),
            "msc://coarse/other.txt"
        );
        assert_eq!(
            mapping.find_mapping("/mnt/data/a/b").unwrap(),
            "msc://posix-data/a/b"
        );
        assert!(mapping.find_mapping("/elsewhere/x").is_none());
    }

    #[test]
    fn test_resolve_foreign_urls() {
        let mapping = PathMapping::default();
        assert_eq!(
            resolve_foreign_url("/tmp/data.bin", &mapping).unwrap(),
            ("default".to_string(), "/tmp/data.bin".to_string())
        );
        assert_eq!(
            resolve_foreign_url("file:///tmp/x", &mapping).unwrap(),
            ("default".to_string(), "/tmp/x".to_string())
        );
        assert_eq!(
            resolve_foreign_url("s3://bucket1/a/b", &mapping).unwrap(),
            ("_s3-bucket1".to_string(), "a/b".to_string())
        );
        assert_eq!(
            resolve_foreign_url("gs://bucket2/key", &mapping).unwrap(),
            ("_gs-bucket2".to_string(), "key".to_string())
        );
        assert!(resolve_foreign_url("ftp://host/file", &mapping).is_err());
        assert!(resolve_foreign_url("s3:///missing-bucket", &mapping).is_err());
    }

    #[tokio::test]
    async fn test_profile_realization_with_memory_provider() {
        let config = serde_json::json!({
            "profiles": {
                "data": {"storage_provider": {"type": "memory", "options": {"base_path": "bucket"}}}
            }
        });
        let realized = StorageClientConfig::from_value(&config, "data").await.unwrap();
        assert_eq!(realized.profile, "data");
        assert_eq!(realized.storage_provider.provider_name(), "memory");
        assert!(realized.metadata_provider.is_none());
        assert!(realized.cache.is_none());
        assert_eq!(realized.retry_config, RetryConfig::default());
    }

    #[tokio::test]
    async fn test_unknown_profile_and_reserved_names() {
        let config = serde_json::json!({
            "profiles": {"data": {"storage_provider": {"type": "memory"}}}
        });
        let err = StorageClientConfig::from_value(&config, "nope").await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::InvalidArgument);

        let reserved = serde_json::json!({
            "profiles": {"_sneaky": {"storage_provider": {"type": "memory"}}}
        });
        let err = StorageClientConfig::from_value(&reserved, "_sneaky").await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::InvalidArgument);
    }

    #[tokio::test]
    async fn test_default_profile_cannot_be_overridden() {
        let config = serde_json::json!({
            "profiles": {"default": {"storage_provider": {"type": "memory"}}}
        });
        let err = StorageClientConfig::from_value(&config, "default").await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::InvalidArgument);
    }

    #[tokio::test]
    async fn test_default_profile_always_available() {
        let config = serde_json::json!({"profiles": {}});
        let realized = StorageClientConfig::from_value(&config, "default").await.unwrap();
        assert_eq!(realized.storage_provider.provider_name(), "file");
        assert_eq!(realized.storage_provider.base_path(), "/");
    }

    #[tokio::test]
    async fn test_retry_options() {
        let config = serde_json::json!({
            "profiles": {
                "data": {
                    "storage_provider": {"type": "memory"},
                    "retry": {"attempts": 5, "delay": 0.5}
                }
            }
        });
        let realized = StorageClientConfig::from_value(&config, "data").await.unwrap();
        assert_eq!(realized.retry_config.attempts, 5);
        assert_eq!(realized.retry_config.delay, 0.5);
    }

    #[tokio::test]
    async fn test_legacy_cache_keys_rejected() {
        let config = serde_json::json!({
            "profiles": {"data": {"storage_provider": {"type": "memory"}}},
            "cache": {"size_mb": 100}
        });
        let err = StorageClientConfig::from_value(&config, "data").await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::InvalidArgument);
    }
}
