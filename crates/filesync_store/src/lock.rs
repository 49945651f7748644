//! Exclusive ownership of a target directory.

use crate::error::{StoreError, StoreResult};
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

/// Name of the lock file kept inside a locked directory.
pub const LOCK_FILE_NAME: &str = ".filesync.lock";

/// An advisory exclusive lock on a target directory.
///
/// Only one reconciler may write into a directory at a time. The lock is
/// released when the guard is dropped; the lock file itself stays and is
/// never reported by store listings.
#[derive(Debug)]
pub struct DirLock {
    path: PathBuf,
    _file: File,
}

impl DirLock {
    /// Acquires the lock for `dir` without blocking.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Locked`] if another process holds the lock, or
    /// an I/O error if the lock file cannot be opened.
    pub fn acquire(dir: &Path) -> StoreResult<Self> {
        let path = dir.join(LOCK_FILE_NAME);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| StoreError::io(&path, e))?;

        file.try_lock_exclusive()
            .map_err(|_| StoreError::Locked(dir.to_path_buf()))?;

        Ok(Self { path, _file: file })
    }

    /// Returns the path to the lock file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn second_lock_is_refused() {
        let dir = tempdir().unwrap();
        let first = DirLock::acquire(dir.path()).unwrap();
        assert!(first.path().exists());

        let second = DirLock::acquire(dir.path());
        assert!(matches!(second, Err(StoreError::Locked(_))));

        drop(first);
        assert!(DirLock::acquire(dir.path()).is_ok());
    }

    #[test]
    fn lock_in_missing_directory_fails() {
        let dir = tempdir().unwrap();
        let result = DirLock::acquire(&dir.path().join("missing"));
        assert!(matches!(result, Err(ref e) if e.is_not_found()));
    }
}
