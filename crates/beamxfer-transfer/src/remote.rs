//! Lookups and recursive listings on managed collections.

use beamxfer_core::{BackendError, BackendResult, RemoteEntry, TransferBackend};

/// A file found under a directory, with its absolute path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RemoteFile {
    pub(crate) path: String,
    pub(crate) size: u64,
}

fn split_parent(path: &str) -> (&str, &str) {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rsplit_once('/') {
        Some(("", name)) => ("/", name),
        Some((parent, name)) => (parent, name),
        None => ("/", trimmed),
    }
}

/// Find the entry at `path`. `Ok(None)` when it does not exist.
///
/// Uses `stat` when the backend has it and falls back to listing the parent.
pub(crate) async fn find_remote_entry(
    backend: &dyn TransferBackend,
    endpoint_id: &str,
    path: &str,
) -> BackendResult<Option<RemoteEntry>> {
    match backend.stat(endpoint_id, path).await {
        Err(BackendError::Unsupported { .. }) => {}
        other => return other,
    }
    let (parent, name) = split_parent(path);
    match backend.list_directory(endpoint_id, parent).await {
        Ok(entries) => Ok(entries.into_iter().find(|entry| entry.name == name)),
        Err(err) if err.is_not_found() => Ok(None),
        Err(err) => Err(err),
    }
}

/// Every file below the directory `root`, depth first.
pub(crate) async fn list_files_recursive(
    backend: &dyn TransferBackend,
    endpoint_id: &str,
    root: &str,
) -> BackendResult<Vec<RemoteFile>> {
    let mut files = Vec::new();
    let mut pending = vec![root.trim_end_matches('/').to_string()];
    while let Some(dir) = pending.pop() {
        for entry in backend.list_directory(endpoint_id, &dir).await? {
            let path = format!("{dir}/{}", entry.name);
            if entry.is_dir() {
                pending.push(path);
            } else {
                files.push(RemoteFile {
                    path,
                    size: entry.size,
                });
            }
        }
    }
    files.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(files)
}
