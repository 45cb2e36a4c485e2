// src/rclone.rs
//
// Rclone interoperability: discover rclone.conf in the standard locations
// and translate its remotes into MSC profiles so existing rclone setups work
// unchanged. Keys keep their rclone names on the way in and are mapped onto
// the provider option names here.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde_json::{json, Value};
use tracing::debug;

use crate::constants::rclone_config_search_paths;
use crate::error::{MscError, Result};

/// Locate rclone.conf: next to the `rclone` binary on PATH, then
/// `$XDG_CONFIG_HOME/rclone/rclone.conf`, then the fixed search paths.
fn find_rclone_config() -> Option<PathBuf> {
    if let Some(binary) = find_executable("rclone") {
        let sibling = binary.with_file_name("rclone.conf");
        if sibling.is_file() {
            return Some(sibling);
        }
    }

    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        let candidate = Path::new(&xdg).join("rclone/rclone.conf");
        if candidate.is_file() {
            return Some(candidate);
        }
    }

    rclone_config_search_paths().into_iter().find(|path| path.is_file())
}

fn find_executable(name: &str) -> Option<PathBuf> {
    let path_var = std::env::var_os("PATH")?;
    std::env::split_paths(&path_var)
        .map(|dir| dir.join(name))
        .find(|candidate| candidate.is_file())
}

/// Minimal INI reader: `[section]` headers, `key = value` pairs, `#`/`;`
/// comment lines.
fn parse_ini(content: &str) -> BTreeMap<String, BTreeMap<String, String>> {
    let mut sections: BTreeMap<String, BTreeMap<String, String>> = BTreeMap::new();
    let mut current: Option<String> = None;

    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }
        if let Some(name) = line.strip_prefix('[').and_then(|rest| rest.strip_suffix(']')) {
            let name = name.trim().to_string();
            sections.entry(name.clone()).or_default();
            current = Some(name);
            continue;
        }
        if let (Some(section), Some((key, value))) = (&current, line.split_once('=')) {
            sections
                .get_mut(section)
                .expect("current section always inserted")
                .insert(key.trim().to_string(), value.trim().to_string());
        }
    }
    sections
}

fn set_if_exists(
    section: &BTreeMap<String, String>,
    target: &mut serde_json::Map<String, Value>,
    msc_key: &str,
    rclone_key: &str,
) {
    if let Some(value) = section.get(rclone_key) {
        target.insert(msc_key.to_string(), Value::String(value.clone()));
    }
}

/// Translate one remote into `{storage_provider, credentials_provider?}`.
/// Unknown remote types are skipped.
fn parse_section(section: &BTreeMap<String, String>) -> Option<Value> {
    let raw_type = section.get("type").map(String::as_str).unwrap_or("");
    let mut storage_options = serde_json::Map::new();
    let mut credential_options = serde_json::Map::new();
    let mut credentials_type: Option<&str> = None;

    let storage_type = match raw_type {
        "s3" | "s8k" => {
            set_if_exists(section, &mut storage_options, "region_name", "region");
            set_if_exists(section, &mut storage_options, "endpoint_url", "endpoint");
            set_if_exists(section, &mut storage_options, "base_path", "base_path");
            set_if_exists(section, &mut credential_options, "access_key", "access_key_id");
            set_if_exists(section, &mut credential_options, "secret_key", "secret_access_key");
            set_if_exists(section, &mut credential_options, "secret_key", "secret_key_id");
            set_if_exists(section, &mut credential_options, "token", "session_token");
            if credential_options.contains_key("access_key") {
                credentials_type = Some("S3Credentials");
            }
            raw_type
        }
        "azure" | "azureblob" => {
            set_if_exists(section, &mut storage_options, "endpoint_url", "endpoint");
            set_if_exists(section, &mut storage_options, "base_path", "base_path");
            set_if_exists(section, &mut credential_options, "access_key", "account");
            set_if_exists(section, &mut credential_options, "secret_key", "key");
            if credential_options.contains_key("access_key") {
                credentials_type = Some("AzureCredentials");
            }
            "azure"
        }
        "gcs" | "google cloud storage" => {
            set_if_exists(section, &mut storage_options, "project_id", "project_number");
            set_if_exists(section, &mut storage_options, "endpoint_url", "endpoint");
            set_if_exists(section, &mut storage_options, "base_path", "base_path");
            "gcs"
        }
        "oci" | "oracleobjectstorage" => {
            set_if_exists(section, &mut storage_options, "namespace", "namespace");
            set_if_exists(section, &mut storage_options, "base_path", "base_path");
            "oci"
        }
        "ais" => {
            set_if_exists(section, &mut storage_options, "endpoint", "endpoint");
            set_if_exists(section, &mut storage_options, "base_path", "base_path");
            "ais"
        }
        "file" | "local" | "memory" => {
            for (key, value) in section {
                if key != "type" {
                    storage_options.insert(key.clone(), Value::String(value.clone()));
                }
            }
            if raw_type == "local" {
                "file"
            } else {
                raw_type
            }
        }
        _ => return None,
    };

    storage_options
        .entry("base_path".to_string())
        .or_insert_with(|| Value::String(String::new()));

    let mut profile = serde_json::Map::new();
    profile.insert(
        "storage_provider".to_string(),
        json!({"type": storage_type, "options": Value::Object(storage_options)}),
    );
    if let Some(credentials_type) = credentials_type {
        profile.insert(
            "credentials_provider".to_string(),
            json!({"type": credentials_type, "options": Value::Object(credential_options)}),
        );
    }
    Some(Value::Object(profile))
}

/// Locate, parse, and translate rclone.conf into an MSC config fragment
/// (`{"profiles": {...}}`). `None` when no config exists.
pub fn read_rclone_config() -> Result<Option<(Value, PathBuf)>> {
    let Some(path) = find_rclone_config() else {
        return Ok(None);
    };
    let content = std::fs::read_to_string(&path).map_err(|err| {
        MscError::invalid_argument(format!("cannot read rclone config {}: {err}", path.display()))
    })?;

    let mut profiles = serde_json::Map::new();
    for (name, section) in parse_ini(&content) {
        if let Some(profile) = parse_section(&section) {
            profiles.insert(name, profile);
        }
    }
    debug!(path = %path.display(), remotes = profiles.len(), "loaded rclone config");
    Ok(Some((json!({"profiles": Value::Object(profiles)}), path)))
}
