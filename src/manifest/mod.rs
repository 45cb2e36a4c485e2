// src/manifest/mod.rs
//
// Manifest metadata subsystem: a pre-generated catalog of object metadata
// that replaces expensive backend listings. A manifest lives as timestamped
// immutable generations; each generation is an index JSON referencing
// line-delimited part files.

mod format;
mod generator;
mod provider;

pub use format::{next_generation_id, ManifestIndex, ManifestPartReference, ManifestRecord};
pub use generator::generate_manifest;
pub use provider::ManifestMetadataProvider;
