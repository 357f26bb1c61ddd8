//! Write-then-rename helpers for every persisted mutation.
//!
//! Data is written to a temporary file in the destination directory, synced,
//! and renamed over the target, so readers observe either the old or the new
//! contents and never a partial write.

use std::io::Write;
use std::path::Path;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tempfile::NamedTempFile;

use crate::error::{ErrorContext, IndexError, IndexResult};

/// Creates a temporary file next to `path`.
pub(crate) fn temp_file_beside(path: &Path) -> IndexResult<NamedTempFile> {
    let dir = parent_dir(path);
    std::fs::create_dir_all(dir).write_context(dir)?;
    NamedTempFile::new_in(dir).write_context(dir)
}

/// Replaces `path` with `bytes` atomically.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> IndexResult<()> {
    let mut temp = temp_file_beside(path)?;
    temp.write_all(bytes).write_context(path)?;
    commit(temp, path)
}

/// Syncs `temp` and renames it over `path`.
pub(crate) fn commit(temp: NamedTempFile, path: &Path) -> IndexResult<()> {
    temp.as_file().sync_all().write_context(path)?;
    temp.persist(path).map_err(|e| IndexError::FileWrite {
        path: path.to_path_buf(),
        source: e.error,
    })?;
    sync_parent(path)
}

/// Syncs `temp` and renames it to `path`, failing if `path` already exists.
pub(crate) fn commit_new(temp: NamedTempFile, path: &Path) -> IndexResult<()> {
    temp.as_file().sync_all().write_context(path)?;
    temp.persist_noclobber(path).map_err(|e| IndexError::FileWrite {
        path: path.to_path_buf(),
        source: e.error,
    })?;
    sync_parent(path)
}

/// Serializes `value` as pretty JSON and replaces `path` atomically.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> IndexResult<()> {
    let json = serde_json::to_vec_pretty(value).map_err(|e| IndexError::PersistenceError {
        path: path.to_path_buf(),
        reason: format!("failed to serialize: {e}"),
    })?;
    write_atomic(path, &json)
}

/// Reads a JSON file, returning `None` when it does not exist.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> IndexResult<Option<T>> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e).read_context(path),
    };

    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|e| IndexError::PersistenceError {
            path: path.to_path_buf(),
            reason: format!("failed to parse: {e}"),
        })
}

fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    }
}

fn sync_parent(path: &Path) -> IndexResult<()> {
    #[cfg(unix)]
    {
        let dir = parent_dir(path);
        std::fs::File::open(dir)
            .and_then(|d| d.sync_all())
            .write_context(dir)?;
    }
    #[cfg(not(unix))]
    let _ = path;
    Ok(())
}
