//! Store trait definition.

use crate::error::{StoreError, StoreResult};
use crate::lock::LOCK_FILE_NAME;
use std::io::Write;
use std::path::Path;

/// Suffix of in-progress downloads.
///
/// A file named `<name>.part` is garbage until it is renamed to `<name>`.
pub const TEMP_SUFFIX: &str = ".part";

/// Returns the temporary name used while `name` is being written.
#[must_use]
pub fn temporary_name(name: &str) -> String {
    format!("{name}{TEMP_SUFFIX}")
}

/// Returns true for names that never count as present files.
#[must_use]
pub fn is_reserved_name(name: &str) -> bool {
    name.ends_with(TEMP_SUFFIX) || name == LOCK_FILE_NAME
}

/// Checks that `name` is a plain file name inside the target directory.
///
/// # Errors
///
/// Returns [`StoreError::InvalidName`] if the name is empty, is `.` or `..`,
/// contains a path separator or NUL, or collides with a reserved name.
pub fn validate_name(name: &str) -> StoreResult<()> {
    let invalid = name.is_empty()
        || name == "."
        || name == ".."
        || name.contains(['/', '\\', '\0'])
        || is_reserved_name(name);

    if invalid {
        Err(StoreError::InvalidName(name.to_string()))
    } else {
        Ok(())
    }
}

/// A writable handle whose final name appears only on [`AtomicFile::commit`].
///
/// Dropping the handle without committing leaves only the temporary
/// name behind, which listings ignore.
pub trait AtomicFile: Write + Send {
    /// Flushes the content and renames the temporary file to its final name.
    ///
    /// # Errors
    ///
    /// Returns an error if flushing or renaming fails. The final name is
    /// not visible in that case.
    fn commit(self: Box<Self>) -> StoreResult<()>;
}

/// The set of files the reconciler manages.
///
/// # Invariants
///
/// - `list` returns sorted final names, never temporary or lock names
/// - a name returned by `list` was fully written before it became visible
/// - `delete` of a missing name succeeds
/// - Stores must be `Send + Sync` for concurrent access
///
/// # Implementors
///
/// - [`super::DirectoryStore`] - OS directories
/// - [`super::InMemoryStore`] - For testing
pub trait FileStore: Send + Sync {
    /// Lists the names present in `dir`.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be enumerated.
    fn list(&self, dir: &Path) -> StoreResult<Vec<String>>;

    /// Opens a temporary file for `name` in `dir`.
    ///
    /// An existing temporary file for the same name is truncated.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is invalid or the file cannot be created.
    fn create_atomic(&self, dir: &Path, name: &str) -> StoreResult<Box<dyn AtomicFile>>;

    /// Removes `name` from `dir`. A name that is already gone is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the name exists but cannot be removed.
    fn delete(&self, dir: &Path, name: &str) -> StoreResult<()>;

    /// Removes leftover temporary files and returns their names.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be enumerated or a
    /// leftover cannot be removed.
    fn purge_temporaries(&self, dir: &Path) -> StoreResult<Vec<String>>;

    /// Lists entries of `dir` whose names are not valid UTF-8.
    ///
    /// Such entries can never be desired, so they are always extraneous.
    /// Names are returned in lossy form, for display only. Stores that
    /// cannot hold such names keep the default, which finds none.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be enumerated.
    fn list_undecodable(&self, _dir: &Path) -> StoreResult<Vec<String>> {
        Ok(Vec::new())
    }

    /// Removes every entry of `dir` whose name is not valid UTF-8 and
    /// returns their lossy names.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be enumerated or an
    /// entry cannot be removed.
    fn purge_undecodable(&self, _dir: &Path) -> StoreResult<Vec<String>> {
        Ok(Vec::new())
    }
}

impl<T: FileStore + ?Sized> FileStore for std::sync::Arc<T> {
    fn list(&self, dir: &Path) -> StoreResult<Vec<String>> {
        (**self).list(dir)
    }

    fn create_atomic(&self, dir: &Path, name: &str) -> StoreResult<Box<dyn AtomicFile>> {
        (**self).create_atomic(dir, name)
    }

    fn delete(&self, dir: &Path, name: &str) -> StoreResult<()> {
        (**self).delete(dir, name)
    }

    fn purge_temporaries(&self, dir: &Path) -> StoreResult<Vec<String>> {
        (**self).purge_temporaries(dir)
    }

    fn list_undecodable(&self, dir: &Path) -> StoreResult<Vec<String>> {
        (**self).list_undecodable(dir)
    }

    fn purge_undecodable(&self, dir: &Path) -> StoreResult<Vec<String>> {
        (**self).purge_undecodable(dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn temporary_names_are_reserved() {
        assert_eq!(temporary_name("plugin.jar"), "plugin.jar.part");
        assert!(is_reserved_name("plugin.jar.part"));
        assert!(is_reserved_name(LOCK_FILE_NAME));
        assert!(!is_reserved_name("plugin.jar"));
    }

    #[test]
    fn plain_names_are_valid() {
        assert!(validate_name("a").is_ok());
        assert!(validate_name("plugin-1.2.jar").is_ok());
        assert!(validate_name(".hidden").is_ok());
    }

    #[test]
    fn escaping_names_are_rejected() {
        for name in ["", ".", "..", "../etc", "a/b", "a\\b", "a\0b", "x.part", LOCK_FILE_NAME] {
            assert!(
                matches!(validate_name(name), Err(StoreError::InvalidName(_))),
                "{name:?} should be rejected"
            );
        }
    }
}
