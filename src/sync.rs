// src/sync.rs
//
// Bulk sync engine: copy everything reachable under a source prefix into a
// target prefix on another (or the same) client, optionally deleting target
// objects the source does not have. Work fans out over a task pool sized by
// MSC_NUM_PROCESSES x MSC_NUM_THREADS_PER_PROCESS; deletions never precede
// copies, and per-object failures are collected and reported together.

use std::path::PathBuf;

use futures::stream::{self, StreamExt};
use tracing::{debug, info, warn};

use crate::client::StorageClient;
use crate::constants::{ENV_MSC_NUM_PROCESSES, ENV_MSC_NUM_THREADS_PER_PROCESS, MEMORY_LOAD_LIMIT};
use crate::error::{MscError, Result};
use crate::types::{ListOptions, ObjectMetadata};
use crate::url::join_paths;

const MAX_WORKER_PROCESSES: usize = 8;
const MAX_WORKER_THREADS: usize = 16;

/// Total copy parallelism: worker-process count times threads per process.
/// Workers share this address space; the env knobs size the pool the same
/// way they size a process fleet.
fn worker_parallelism() -> usize {
    let cpus = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4);
    let processes = env_usize(ENV_MSC_NUM_PROCESSES).unwrap_or_else(|| cpus.min(MAX_WORKER_PROCESSES));
    let threads =
        env_usize(ENV_MSC_NUM_THREADS_PER_PROCESS).unwrap_or_else(|| (cpus * 2).min(MAX_WORKER_THREADS));
    (processes.max(1) * threads.max(1)).max(1)
}

fn env_usize(name: &str) -> Option<usize> {
    std::env::var(name).ok().and_then(|raw| raw.parse().ok())
}

enum SyncOp {
    Copy(ObjectMetadata),
    Delete(String),
}

/// Source and target entries with equal relative keys compare by etag and
/// size when both etags exist; otherwise by size plus a target-is-newer
/// check.
fn matches(source: &ObjectMetadata, target: &ObjectMetadata) -> bool {
    if let (Some(source_etag), Some(target_etag)) = (&source.etag, &target.etag) {
        return source_etag == target_etag && source.content_length == target.content_length;
    }
    source.content_length == target.content_length && source.last_modified <= target.last_modified
}

fn relative_key(key: &str, prefix: &str) -> String {
    key.strip_prefix(prefix)
        .unwrap_or(key)
        .trim_start_matches('/')
        .to_string()
}

/// Merge the two sorted listings into copy and delete operations.
fn plan(
    source_listing: Vec<ObjectMetadata>,
    target_listing: Vec<ObjectMetadata>,
    source_path: &str,
    target_path: &str,
    delete_unmatched: bool,
) -> Vec<SyncOp> {
    enum Step {
        TakeSource,
        TakeTarget,
        TakeBoth { copy: bool },
    }

    let mut ops = Vec::new();
    let mut source_iter = source_listing.into_iter().peekable();
    let mut target_iter = target_listing.into_iter().peekable();

    loop {
        let step = match (source_iter.peek(), target_iter.peek()) {
            (Some(source), Some(target)) => {
                let source_key = relative_key(&source.key, source_path);
                let target_key = relative_key(&target.key, target_path);
                if source_key < target_key {
                    Step::TakeSource
                } else if source_key > target_key {
                    Step::TakeTarget
                } else {
                    Step::TakeBoth {
                        copy: !matches(source, target),
                    }
                }
            }
            (Some(_), None) => Step::TakeSource,
            (None, Some(_)) => Step::TakeTarget,
            (None, None) => break,
        };

        match step {
            Step::TakeSource => {
                if let Some(source) = source_iter.next() {
                    ops.push(SyncOp::Copy(source));
                }
            }
            Step::TakeTarget => {
                if let Some(target) = target_iter.next() {
                    if delete_unmatched {
                        ops.push(SyncOp::Delete(target.key));
                    }
                }
            }
            Step::TakeBoth { copy } => {
                let source = source_iter.next();
                target_iter.next();
                if copy {
                    if let Some(source) = source {
                        ops.push(SyncOp::Copy(source));
                    }
                }
            }
        }
    }
    ops
}

/// Copy one object from source to target, spilling through a temp file when
/// it is too large to buffer.
async fn copy_object(
    source: &StorageClient,
    target: &StorageClient,
    object: &ObjectMetadata,
    source_path: &str,
    target_path: &str,
) -> Result<()> {
    let target_key = join_paths(target_path, &relative_key(&object.key, source_path));
    debug!(from = %object.key, to = %target_key, "sync copy");

    if object.content_length < MEMORY_LOAD_LIMIT {
        let body = source.read(&object.key, None).await?;
        target.overwrite(&target_key, body).await
    } else {
        let spill: PathBuf = std::env::temp_dir().join(format!(
            ".mscio-sync-{}-{:08x}",
            std::process::id(),
            rand::random::<u32>()
        ));
        let result = async {
            source.download_file(&object.key, &spill).await?;
            target.overwrite_from_file(&target_key, &spill).await
        }
        .await;
        let _ = tokio::fs::remove_file(&spill).await;
        result
    }
}

/// Copy every object under `source_path` on `source` to `target_path` on
/// `target`. With `delete_unmatched`, target objects missing from the source
/// are deleted after the copy phase completes successfully.
pub(crate) async fn sync_objects(
    source: &StorageClient,
    target: &StorageClient,
    source_path: &str,
    target_path: &str,
    delete_unmatched: bool,
) -> Result<()> {
    let source_path = source_path.trim_start_matches('/');
    let target_path = target_path.trim_start_matches('/');

    if source.profile() == target.profile()
        && (source_path.starts_with(target_path) || target_path.starts_with(source_path))
    {
        return Err(MscError::invalid_argument(
            "source and target paths cannot overlap on the same storage client",
        ));
    }

    let source_listing = source.list(source_path, &ListOptions::default()).await?;
    let target_listing = target.list(target_path, &ListOptions::default()).await?;
    let ops = plan(
        source_listing,
        target_listing,
        source_path,
        target_path,
        delete_unmatched,
    );

    let mut copies = Vec::new();
    let mut deletions = Vec::new();
    for op in ops {
        match op {
            SyncOp::Copy(object) => copies.push(object),
            SyncOp::Delete(key) => deletions.push(key),
        }
    }
    info!(
        source = %source.debug_identity(),
        target = %target.debug_identity(),
        copies = copies.len(),
        deletions = deletions.len(),
        "sync planned"
    );

    let width = worker_parallelism();
    let failures: Vec<(String, MscError)> = stream::iter(copies.into_iter().map(|object| {
        let source = source.clone();
        let target = target.clone();
        async move {
            let key = object.key.clone();
            copy_object(&source, &target, &object, source_path, target_path)
                .await
                .err()
                .map(|err| (key, err))
        }
    }))
    .buffer_unordered(width)
    .filter_map(|failure| async move { failure })
    .collect()
    .await;

    if !failures.is_empty() {
        for (key, err) in &failures {
            warn!(key = %key, error = %err, "sync copy failed");
        }
        // Deletions never run after a failed copy phase.
        let failed_keys: Vec<&str> = failures.iter().map(|(key, _)| key.as_str()).collect();
        return Err(MscError::unavailable(format!(
            "sync copy phase failed for {} object(s): {failed_keys:?}",
            failures.len()
        ))
        .with_operation("sync"));
    }

    let delete_failures: Vec<(String, MscError)> = stream::iter(deletions.into_iter().map(|key| {
        let target = target.clone();
        async move {
            target
                .delete(&key)
                .await
                .err()
                .map(|err| (key, err))
        }
    }))
    .buffer_unordered(width)
    .filter_map(|failure| async move { failure })
    .collect()
    .await;

    target.commit_metadata(None).await?;

    if !delete_failures.is_empty() {
        let failed_keys: Vec<&str> = delete_failures.iter().map(|(key, _)| key.as_str()).collect();
        return Err(MscError::unavailable(format!(
            "sync delete phase failed for {} object(s): {failed_keys:?}",
            delete_failures.len()
        ))
        .with_operation("sync"));
    }
    Ok(())
}

/// Delete everything under `prefix` using the sync worker pool.
pub(crate) async fn delete_prefix(client: &StorageClient, prefix: &str) -> Result<()> {
    let listed = client.list(prefix, &ListOptions::default()).await?;
    let width = worker_parallelism();

    let failures: Vec<(String, MscError)> = stream::iter(listed.into_iter().map(|object| {
        let client = client.clone();
        async move {
            client
                .delete(&object.key)
                .await
                .err()
                .map(|err| (object.key, err))
        }
    }))
    .buffer_unordered(width)
    .filter_map(|failure| async move { failure })
    .collect()
    .await;

    client.commit_metadata(None).await?;

    if !failures.is_empty() {
        let failed_keys: Vec<&str> = failures.iter().map(|(key, _)| key.as_str()).collect();
        return Err(MscError::unavailable(format!(
            "recursive delete failed for {} object(s): {failed_keys:?}",
            failures.len()
        ))
        .with_operation("delete"));
    }
    Ok(())
}
