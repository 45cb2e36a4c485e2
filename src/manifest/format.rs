// src/manifest/format.rs
//
// On-disk manifest model. The index is a small JSON document referencing
// part files; each part is one JSON record per line. Paths in the index are
// relative to the generation directory.

use std::collections::HashMap;

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::{
    MANIFEST_PARTS_CHILD_DIR, MANIFEST_PART_PREFIX, MANIFEST_PART_SUFFIX,
    MANIFEST_SEQUENCE_PADDING, MANIFEST_VERSION,
};
use crate::error::{MscError, Result};
use crate::types::{ObjectMetadata, ObjectType};

/// Reference to one manifest part, relative to the generation directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestPartReference {
    pub path: String,
}

/// The manifest index document (`msc_manifest_index.json`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestIndex {
    pub version: String,
    pub parts: Vec<ManifestPartReference>,
}

impl ManifestIndex {
    pub fn new(parts: Vec<ManifestPartReference>) -> Self {
        Self {
            version: MANIFEST_VERSION.to_string(),
            parts,
        }
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        let index: ManifestIndex = serde_json::from_slice(bytes)
            .map_err(|err| MscError::manifest_corrupt(format!("invalid manifest index: {err}")))?;
        if index.version != MANIFEST_VERSION {
            return Err(MscError::manifest_corrupt(format!(
                "manifest version {} is not supported (expected {MANIFEST_VERSION})",
                index.version
            )));
        }
        Ok(index)
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self)
            .map_err(|err| MscError::manifest_corrupt(format!("failed to encode index: {err}")))
    }
}

/// One line of a manifest part. The wire format carries `size_bytes` where
/// the in-memory model uses `content_length`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestRecord {
    pub key: String,
    pub size_bytes: u64,
    pub last_modified: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<HashMap<String, String>>,
}

impl ManifestRecord {
    pub fn from_line(line: &str) -> Result<Self> {
        serde_json::from_str(line).map_err(|err| {
            MscError::manifest_corrupt(format!("invalid manifest part line: {err}: {line}"))
        })
    }

    pub fn to_line(&self) -> Result<String> {
        serde_json::to_string(self)
            .map_err(|err| MscError::manifest_corrupt(format!("failed to encode record: {err}")))
    }

    pub fn into_metadata(self) -> ObjectMetadata {
        ObjectMetadata {
            key: self.key,
            content_length: self.size_bytes,
            last_modified: self.last_modified,
            object_type: ObjectType::File,
            etag: self.etag,
            storage_class: None,
            metadata: self.metadata,
        }
    }

    pub fn from_metadata(key: &str, metadata: &ObjectMetadata) -> Self {
        Self {
            key: key.to_string(),
            size_bytes: metadata.content_length,
            last_modified: metadata.last_modified,
            etag: metadata.etag.clone(),
            metadata: metadata.metadata.clone(),
        }
    }
}

/// Relative path of part `sequence` within a generation directory.
pub fn part_file_path(sequence: usize) -> String {
    format!(
        "{MANIFEST_PARTS_CHILD_DIR}/{MANIFEST_PART_PREFIX}{sequence:0width$}{MANIFEST_PART_SUFFIX}",
        width = MANIFEST_SEQUENCE_PADDING
    )
}

/// Generation id for a commit: ISO-8601 UTC with nanosecond precision so ids
/// order lexicographically. Strictly exceeds `current`; an identical or
/// backwards wall clock is resolved by bumping the current id by one
/// nanosecond.
pub fn next_generation_id(current: Option<&str>) -> String {
    let candidate = format_generation_id(Utc::now());
    match current {
        Some(current_id) if candidate.as_str() <= current_id => {
            match DateTime::parse_from_rfc3339(current_id) {
                Ok(parsed) => {
                    format_generation_id(parsed.with_timezone(&Utc) + Duration::nanoseconds(1))
                }
                // A foreign generation id that is not a timestamp: fall back
                // to appending, which still sorts after it.
                Err(_) => format!("{current_id}-1"),
            }
        }
        _ => candidate,
    }
}

fn format_generation_id(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}
