// src/telemetry/attributes.rs
//
// Attributes providers contribute tag sets to every metric sample. Providers
// are applied in configuration order; on collision later providers override
// earlier ones.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{MscError, Result};

use super::Attributes;

pub trait AttributesProvider: Send + Sync {
    fn attributes(&self) -> Attributes;
}

/// Merge provider tag sets in order, later providers winning.
pub fn collect_attributes(providers: &[Arc<dyn AttributesProvider>]) -> Attributes {
    let mut merged = Attributes::new();
    for provider in providers {
        for (key, value) in provider.attributes() {
            merged.insert(key, value);
        }
    }
    merged
}

/// Fixed tags from configuration.
pub struct StaticAttributesProvider {
    attributes: Attributes,
}

impl StaticAttributesProvider {
    pub fn new(attributes: Attributes) -> Self {
        Self { attributes }
    }
}

impl AttributesProvider for StaticAttributesProvider {
    fn attributes(&self) -> Attributes {
        self.attributes.clone()
    }
}

/// Tags sourced from environment variables: attribute name -> variable name.
pub struct EnvironmentVariablesAttributesProvider {
    mapping: HashMap<String, String>,
}

impl EnvironmentVariablesAttributesProvider {
    pub fn new(mapping: HashMap<String, String>) -> Self {
        Self { mapping }
    }
}

impl AttributesProvider for EnvironmentVariablesAttributesProvider {
    fn attributes(&self) -> Attributes {
        self.mapping
            .iter()
            .filter_map(|(attribute, variable)| {
                std::env::var(variable)
                    .ok()
                    .map(|value| (attribute.clone(), value))
            })
            .collect()
    }
}

/// Host name tag.
pub struct HostAttributesProvider {
    attribute: String,
}

impl HostAttributesProvider {
    pub fn new(attribute: impl Into<String>) -> Self {
        Self {
            attribute: attribute.into(),
        }
    }
}

impl AttributesProvider for HostAttributesProvider {
    fn attributes(&self) -> Attributes {
        let hostname = std::env::var("HOSTNAME")
            .or_else(|_| std::env::var("HOST"))
            .unwrap_or_else(|_| "unknown".to_string());
        [(self.attribute.clone(), hostname)].into_iter().collect()
    }
}

/// Process id tag.
pub struct ProcessAttributesProvider {
    attribute: String,
}

impl ProcessAttributesProvider {
    pub fn new(attribute: impl Into<String>) -> Self {
        Self {
            attribute: attribute.into(),
        }
    }
}

impl AttributesProvider for ProcessAttributesProvider {
    fn attributes(&self) -> Attributes {
        [(self.attribute.clone(), std::process::id().to_string())]
            .into_iter()
            .collect()
    }
}

/// Calling thread tag.
pub struct ThreadAttributesProvider {
    attribute: String,
}

impl ThreadAttributesProvider {
    pub fn new(attribute: impl Into<String>) -> Self {
        Self {
            attribute: attribute.into(),
        }
    }
}

impl AttributesProvider for ThreadAttributesProvider {
    fn attributes(&self) -> Attributes {
        let thread = std::thread::current();
        let label = thread
            .name()
            .map(str::to_string)
            .unwrap_or_else(|| format!("{:?}", thread.id()));
        [(self.attribute.clone(), label)].into_iter().collect()
    }
}

/// Tags plucked from the loaded configuration by JSON pointer
/// (e.g. `/profiles/data/storage_provider/type`).
pub struct ConfigAttributesProvider {
    attributes: Attributes,
}

impl ConfigAttributesProvider {
    pub fn new(mapping: HashMap<String, String>, config: &serde_json::Value) -> Self {
        let attributes = mapping
            .into_iter()
            .filter_map(|(attribute, pointer)| {
                config.pointer(&pointer).map(|value| {
                    let rendered = match value {
                        serde_json::Value::String(s) => s.clone(),
                        other => other.to_string(),
                    };
                    (attribute, rendered)
                })
            })
            .collect();
        Self { attributes }
    }
}

impl AttributesProvider for ConfigAttributesProvider {
    fn attributes(&self) -> Attributes {
        self.attributes.clone()
    }
}

/// Realize one `{type, options}` attributes-provider config entry.
pub fn build_attributes_provider(
    config: &serde_json::Value,
    full_config: &serde_json::Value,
) -> Result<Arc<dyn AttributesProvider>> {
    let provider_type = config
        .get("type")
        .and_then(|value| value.as_str())
        .ok_or_else(|| MscError::invalid_argument("attributes provider entry missing \"type\""))?;
    let options = config
        .get("options")
        .cloned()
        .unwrap_or(serde_json::Value::Null);

    let string_map = |value: &serde_json::Value, key: &str| -> HashMap<String, String> {
        value
            .get(key)
            .and_then(|map| map.as_object())
            .map(|map| {
                map.iter()
                    .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                    .collect()
            })
            .unwrap_or_default()
    };

    match provider_type {
        "static" => {
            let attributes: Attributes = string_map(&options, "attributes").into_iter().collect();
            Ok(Arc::new(StaticAttributesProvider::new(attributes)))
        }
        "environment_variables" => Ok(Arc::new(EnvironmentVariablesAttributesProvider::new(
            string_map(&options, "attributes"),
        ))),
        "host" => Ok(Arc::new(HostAttributesProvider::new(
            options
                .get("attribute")
                .and_then(|value| value.as_str())
                .unwrap_or("host.name"),
        ))),
        "process" => Ok(Arc::new(ProcessAttributesProvider::new(
            options
                .get("attribute")
                .and_then(|value| value.as_str())
                .unwrap_or("process.pid"),
        ))),
        "thread" => Ok(Arc::new(ThreadAttributesProvider::new(
            options
                .get("attribute")
                .and_then(|value| value.as_str())
                .unwrap_or("thread.name"),
        ))),
        "msc_config" => Ok(Arc::new(ConfigAttributesProvider::new(
            string_map(&options, "attributes"),
            full_config,
        ))),
        other => Err(MscError::invalid_argument(format!(
            "unknown attributes provider type \"{other}\""
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_later_provider_overrides_earlier() {
        let first = Arc::new(StaticAttributesProvider::new(
            [("env".to_string(), "dev".to_string()), ("team".to_string(), "a".to_string())]
                .into_iter()
                .collect(),
        )) as Arc<dyn AttributesProvider>;
        let second = Arc::new(StaticAttributesProvider::new(
            [("env".to_string(), "prod".to_string())].into_iter().collect(),
        )) as Arc<dyn AttributesProvider>;

        let merged = collect_attributes(&[first, second]);
        assert_eq!(merged.get("env").map(String::as_str), Some("prod"));
        assert_eq!(merged.get("team").map(String::as_str), Some("a"));
    }

    #[test]
    fn test_process_and_thread_providers() {
        let process = ProcessAttributesProvider::new("process.pid");
        assert_eq!(
            process.attributes().get("process.pid").unwrap(),
            &std::process::id().to_string()
        );
        let thread = ThreadAttributesProvider::new("thread.name");
        assert!(!thread.attributes().get("thread.name").unwrap().is_empty());
    }

    #[test]
    fn test_config_provider_pointer() {
        let config = serde_json::json!({
            "profiles": {"data": {"storage_provider": {"type": "memory"}}}
        });
        let provider = ConfigAttributesProvider::new(
            [(
                "msc.provider".to_string(),
                "/profiles/data/storage_provider/type".to_string(),
            )]
            .into_iter()
            .collect(),
            &config,
        );
        assert_eq!(
            provider.attributes().get("msc.provider").map(String::as_str),
            Some("memory")
        );
    }

    #[test]
    fn test_build_from_config_entries() {
        let full = serde_json::json!({});
        let entry = serde_json::json!({
            "type": "static",
            "options": {"attributes": {"service.name": "mscio-tests"}}
        });
        let provider = build_attributes_provider(&entry, &full).unwrap();
        assert_eq!(
            provider.attributes().get("service.name").map(String::as_str),
            Some("mscio-tests")
        );

        let bad = serde_json::json!({"type": "nope"});
        assert!(build_attributes_provider(&bad, &full).is_err());
    }
}
