//! Single-writer lock file.

use std::fs::{File, OpenOptions, TryLockError};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::{ErrorContext, IndexError, IndexResult};
use crate::storage::LOCK_FILE;

/// Exclusive writer guard on `writer.lock` in the index root.
///
/// Holds an OS advisory lock on the open file, so a second writer fails fast
/// instead of waiting. The lock goes away with the handle, including when the
/// process dies; the file itself stays behind and is reused by the next writer.
#[derive(Debug)]
pub struct WriterLock {
    path: PathBuf,
    _file: File,
}

impl WriterLock {
    /// # Errors
    /// `WriterLocked` if another writer holds the lock.
    pub fn acquire(root: &Path) -> IndexResult<Self> {
        let path = root.join(LOCK_FILE);
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .write_context(&path)?;

        match file.try_lock() {
            Ok(()) => {}
            Err(TryLockError::WouldBlock) => return Err(IndexError::WriterLocked { path }),
            Err(TryLockError::Error(e)) => return Err(e).write_context(&path),
        }

        // Owner pid
        file.set_len(0).write_context(&path)?;
        writeln!(file, "{}", std::process::id()).write_context(&path)?;
        tracing::debug!("acquired writer lock {}", path.display());
        Ok(Self { path, _file: file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for WriterLock {
    fn drop(&mut self) {
        tracing::debug!("released writer lock {}", self.path.display());
    }
}
