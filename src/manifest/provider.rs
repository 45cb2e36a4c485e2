// src/manifest/provider.rs
//
// Metadata provider backed by a manifest catalog. Listings and metadata
// lookups are served from an in-memory map loaded once from the current
// generation; mutations are buffered and persisted by committing a new
// generation. Pending mutations are visible to this process immediately and
// to other clients only after commit.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, StreamExt};
use tracing::{debug, warn};

use crate::constants::{
    DEFAULT_MANIFEST_BASE_DIR, MANIFEST_INDEX_FILENAME, MANIFEST_LOAD_CONCURRENCY,
    MANIFEST_MAX_PART_RECORDS,
};
use crate::error::{ErrorKind, MscError, Result};
use crate::globmatch;
use crate::manifest::format::{
    next_generation_id, part_file_path, ManifestIndex, ManifestPartReference, ManifestRecord,
};
use crate::types::{ListOptions, MetadataProvider, ObjectMetadata, PutOptions, StorageProvider};
use crate::url::join_paths;

#[derive(Default, Debug)]
struct ManifestState {
    /// Committed entries of the loaded generation.
    files: BTreeMap<String, ObjectMetadata>,
    pending_adds: BTreeMap<String, ObjectMetadata>,
    pending_removes: Vec<String>,
    /// Generation id (timestamp directory name) currently loaded.
    generation: Option<String>,
}

impl ManifestState {
    /// Committed view merged with pending adds minus pending removes.
    fn effective(&self) -> BTreeMap<String, ObjectMetadata> {
        let mut merged = self.files.clone();
        for (key, metadata) in &self.pending_adds {
            merged.insert(key.clone(), metadata.clone());
        }
        for key in &self.pending_removes {
            merged.remove(key);
        }
        merged
    }
}

#[derive(Debug)]
pub struct ManifestMetadataProvider {
    storage: Arc<dyn StorageProvider>,
    manifest_path: String,
    writable: bool,
    state: Mutex<ManifestState>,
}

impl ManifestMetadataProvider {
    /// Load the current generation (if any) through `storage`. `manifest_path`
    /// is relative to the storage provider's base path; it may name the
    /// manifest base directory, a generation directory, or the index file
    /// itself.
    pub async fn new(
        storage: Arc<dyn StorageProvider>,
        manifest_path: &str,
        writable: bool,
    ) -> Result<Self> {
        let provider = Self {
            storage,
            manifest_path: manifest_path.trim_matches('/').to_string(),
            writable,
            state: Mutex::new(ManifestState::default()),
        };
        provider.load().await?;
        Ok(provider)
    }

    /// Directory holding the timestamped generations.
    fn manifest_base_dir(&self) -> String {
        if self
            .manifest_path
            .split('/')
            .any(|part| part == DEFAULT_MANIFEST_BASE_DIR)
        {
            self.manifest_path.clone()
        } else {
            join_paths(&self.manifest_path, DEFAULT_MANIFEST_BASE_DIR)
        }
    }

    async fn find_index_path(&self) -> Result<Option<String>> {
        // Direct hits: an index file, or a generation directory.
        if self.storage.is_file(&self.manifest_path).await? {
            return Ok(Some(self.manifest_path.clone()));
        }
        let direct = join_paths(&self.manifest_path, MANIFEST_INDEX_FILENAME);
        if self.storage.is_file(&direct).await? {
            return Ok(Some(direct));
        }

        // Otherwise pick the newest generation under the manifest base dir.
        let pattern = join_paths(&self.manifest_base_dir(), &format!("*/{MANIFEST_INDEX_FILENAME}"));
        let mut candidates = self.storage.glob(&pattern).await?;
        candidates.sort();
        Ok(candidates.pop())
    }

    async fn load(&self) -> Result<()> {
        let index_path = match self.find_index_path().await? {
            Some(path) => path,
            None => {
                debug!(manifest_path = %self.manifest_path, "no manifest generation found; starting empty");
                return Ok(());
            }
        };

        let index_bytes = self
            .storage
            .get_object(&index_path, None)
            .await
            .map_err(|err| manifest_read_error(&index_path, err))?;
        let index = ManifestIndex::from_json(&index_bytes)?;

        let generation_dir = parent_dir(&index_path);
        let generation = generation_dir.rsplit('/').next().map(str::to_string);

        let parts: Vec<ManifestPartReference> = index.parts;
        let loads = stream::iter(parts.into_iter().map(|part| {
            let storage = self.storage.clone();
            let generation_dir = generation_dir.clone();
            async move {
                let part_path = join_paths(&generation_dir, &part.path);
                let bytes = storage
                    .get_object(&part_path, None)
                    .await
                    .map_err(|err| manifest_read_error(&part_path, err))?;
                parse_part(&bytes, &part_path)
            }
        }))
        .buffer_unordered(MANIFEST_LOAD_CONCURRENCY)
        .collect::<Vec<Result<Vec<(String, ObjectMetadata)>>>>()
        .await;

        let mut files = BTreeMap::new();
        let mut total = 0usize;
        for load in loads {
            for (key, metadata) in load? {
                total += 1;
                files.insert(key, metadata);
            }
        }
        debug!(
            manifest_path = %self.manifest_path,
            generation = generation.as_deref().unwrap_or("<direct>"),
            entries = total,
            "loaded manifest"
        );

        let mut state = self.state.lock().expect("manifest state lock poisoned");
        state.files = files;
        state.generation = generation;
        Ok(())
    }

    async fn write_generation(
        &self,
        entries: &BTreeMap<String, ObjectMetadata>,
        generation: &str,
    ) -> Result<()> {
        let generation_dir = join_paths(&self.manifest_base_dir(), generation);

        let records: Vec<String> = entries
            .iter()
            .map(|(key, metadata)| ManifestRecord::from_metadata(key, metadata).to_line())
            .collect::<Result<_>>()?;

        // Part files first, the index last: a reader that finds the index
        // finds every part it references.
        let mut part_refs = Vec::new();
        for (chunk_index, chunk) in records.chunks(MANIFEST_MAX_PART_RECORDS).enumerate() {
            let part_rel = part_file_path(chunk_index + 1);
            let part_path = join_paths(&generation_dir, &part_rel);
            let body = chunk.join("\n");
            self.storage
                .put_object(&part_path, Bytes::from(body), &PutOptions::default())
                .await?;
            part_refs.push(ManifestPartReference { path: part_rel });
        }
        if part_refs.is_empty() {
            // An empty namespace still commits one empty part so the
            // generation is well-formed.
            let part_rel = part_file_path(1);
            self.storage
                .put_object(
                    &join_paths(&generation_dir, &part_rel),
                    Bytes::new(),
                    &PutOptions::default(),
                )
                .await?;
            part_refs.push(ManifestPartReference { path: part_rel });
        }

        let index = ManifestIndex::new(part_refs);
        let index_path = join_paths(&generation_dir, MANIFEST_INDEX_FILENAME);
        self.storage
            .put_object(&index_path, Bytes::from(index.to_json()?), &PutOptions::default())
            .await
    }

    fn require_writable(&self, action: &str) -> Result<()> {
        if !self.writable {
            return Err(MscError::invalid_argument(format!(
                "manifest updates are not enabled for this profile (attempted to {action})"
            )));
        }
        Ok(())
    }

    /// Generation currently loaded, if any.
    pub fn generation(&self) -> Option<String> {
        self.state
            .lock()
            .expect("manifest state lock poisoned")
            .generation
            .clone()
    }
}

fn parent_dir(path: &str) -> String {
    match path.rsplit_once('/') {
        Some((dir, _)) => dir.to_string(),
        None => String::new(),
    }
}

fn manifest_read_error(path: &str, err: MscError) -> MscError {
    if err.kind() == ErrorKind::NotFound {
        MscError::manifest_corrupt(format!("manifest references missing file: {path}"))
    } else {
        err
    }
}

fn parse_part(bytes: &[u8], part_path: &str) -> Result<Vec<(String, ObjectMetadata)>> {
    // Streamed line-by-line so one bad line names its part.
    let text = std::str::from_utf8(bytes).map_err(|err| {
        MscError::manifest_corrupt(format!("manifest part {part_path} is not UTF-8: {err}"))
    })?;
    let mut entries = Vec::new();
    for line in text.lines() {
        if line.trim().is_empty() {
            continue;
        }
        let record = ManifestRecord::from_line(line)
            .map_err(|err| MscError::manifest_corrupt(format!("{part_path}: {}", err.message())))?;
        let metadata = record.into_metadata();
        entries.push((metadata.key.clone(), metadata));
    }
    Ok(entries)
}

#[async_trait]
impl MetadataProvider for ManifestMetadataProvider {
    async fn list_objects(&self, prefix: &str, options: &ListOptions) -> Result<Vec<ObjectMetadata>> {
        options.validate()?;
        let prefix = if !prefix.is_empty() && !prefix.ends_with('/') {
            format!("{prefix}/")
        } else {
            prefix.to_string()
        };

        let merged = {
            let state = self.state.lock().expect("manifest state lock poisoned");
            state.effective()
        };

        let mut results: Vec<ObjectMetadata> = Vec::new();
        let mut pending_directory: Option<ObjectMetadata> = None;

        for (key, metadata) in merged.range(prefix.clone()..) {
            if !key.starts_with(&prefix) {
                break;
            }
            if !options.admits(key) {
                continue;
            }

            if options.include_directories {
                let relative = key[prefix.len()..].trim_start_matches('/');
                if let Some((subdirectory, _)) = relative.split_once('/') {
                    let directory_name = format!("{prefix}{subdirectory}/");
                    match &mut pending_directory {
                        Some(pending) if pending.key == directory_name => {
                            pending.last_modified =
                                pending.last_modified.max(metadata.last_modified);
                        }
                        Some(pending) => {
                            results.push(pending.clone());
                            *pending = ObjectMetadata::directory(
                                directory_name,
                                metadata.last_modified,
                            );
                        }
                        None => {
                            pending_directory = Some(ObjectMetadata::directory(
                                directory_name,
                                metadata.last_modified,
                            ));
                        }
                    }
                    continue;
                }
            }

            let mut object = metadata.clone();
            object.key = key.clone();
            results.push(object);
        }

        if let Some(pending) = pending_directory {
            results.push(pending);
        }
        results.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(results)
    }

    async fn get_object_metadata(&self, path: &str, include_pending: bool) -> Result<ObjectMetadata> {
        let state = self.state.lock().expect("manifest state lock poisoned");
        if include_pending {
            if state.pending_removes.iter().any(|removed| removed == path) {
                return Err(MscError::not_found(path.to_string()));
            }
            if let Some(metadata) = state.pending_adds.get(path) {
                return Ok(metadata.clone());
            }
        }
        state
            .files
            .get(path)
            .cloned()
            .ok_or_else(|| MscError::not_found(path.to_string()))
    }

    async fn glob(&self, pattern: &str) -> Result<Vec<String>> {
        let merged = {
            let state = self.state.lock().expect("manifest state lock poisoned");
            state.effective()
        };
        globmatch::match_keys(merged.keys().map(String::as_str), pattern)
    }

    async fn realpath(&self, path: &str) -> Result<(String, bool)> {
        let state = self.state.lock().expect("manifest state lock poisoned");
        let removed = state.pending_removes.iter().any(|removed| removed == path);
        let exists =
            !removed && (state.files.contains_key(path) || state.pending_adds.contains_key(path));
        Ok((path.to_string(), exists))
    }

    async fn add_pending(&self, path: &str, metadata: ObjectMetadata) -> Result<()> {
        self.require_writable("add a file")?;
        let mut state = self.state.lock().expect("manifest state lock poisoned");
        state.pending_removes.retain(|removed| removed != path);
        state.pending_adds.insert(path.to_string(), metadata);
        Ok(())
    }

    async fn remove_pending(&self, path: &str) -> Result<()> {
        self.require_writable("remove a file")?;
        let mut state = self.state.lock().expect("manifest state lock poisoned");
        if state.pending_adds.remove(path).is_some() {
            return Ok(());
        }
        if !state.files.contains_key(path) {
            return Err(MscError::not_found(path.to_string()));
        }
        state.pending_removes.push(path.to_string());
        Ok(())
    }

    async fn commit(&self) -> Result<Option<String>> {
        self.require_writable("commit updates")?;

        // Snapshot under the lock; write outside it. Two racing committers
        // both succeed and the greater timestamp wins on next load.
        let (snapshot, generation) = {
            let state = self.state.lock().expect("manifest state lock poisoned");
            if state.pending_adds.is_empty() && state.pending_removes.is_empty() {
                return Ok(None);
            }
            (state.effective(), next_generation_id(state.generation.as_deref()))
        };

        if let Err(err) = self.write_generation(&snapshot, &generation).await {
            warn!(generation = %generation, error = %err, "manifest commit failed");
            return Err(err);
        }

        let mut state = self.state.lock().expect("manifest state lock poisoned");
        state.files = snapshot;
        state.pending_adds.clear();
        state.pending_removes.clear();
        state.generation = Some(generation.clone());
        Ok(Some(generation))
    }

    fn writable(&self) -> bool {
        self.writable
    }
}
