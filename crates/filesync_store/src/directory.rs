//! OS directory store.

use crate::error::{StoreError, StoreResult};
use crate::store::{is_reserved_name, temporary_name, validate_name, AtomicFile, FileStore, TEMP_SUFFIX};
use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Entry names of one directory, split by whether they decode as UTF-8.
struct Entries {
    names: Vec<String>,
    undecodable: Vec<OsString>,
}

/// A store backed by real directories.
///
/// # Durability
///
/// `commit()` flushes the buffered content, calls `File::sync_all()` and
/// then renames `<name>.part` to `<name>` in the same directory, so the
/// rename never crosses file systems.
///
/// # Example
///
/// ```no_run
/// use filesync_store::{DirectoryStore, FileStore};
/// use std::io::Write;
/// use std::path::Path;
///
/// let store = DirectoryStore::new();
/// let dir = Path::new("/tmp/downloads");
/// let mut file = store.create_atomic(dir, "plugin.jar").unwrap();
/// file.write_all(b"bytes").unwrap();
/// file.commit().unwrap();
/// ```
#[derive(Debug, Default, Clone, Copy)]
pub struct DirectoryStore;

impl DirectoryStore {
    /// Creates a new directory store.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    fn read_entries(dir: &Path) -> StoreResult<Entries> {
        let read = fs::read_dir(dir).map_err(|e| StoreError::io(dir, e))?;
        let mut entries = Entries {
            names: Vec::new(),
            undecodable: Vec::new(),
        };

        for entry in read {
            let entry = entry.map_err(|e| StoreError::io(dir, e))?;
            match entry.file_name().into_string() {
                Ok(name) => entries.names.push(name),
                Err(raw) => entries.undecodable.push(raw),
            }
        }

        entries.names.sort();
        entries.undecodable.sort();
        Ok(entries)
    }
}

/// Removes a file, symlink or directory tree. A missing path is not an error.
fn remove_entry(path: &Path) -> StoreResult<()> {
    let metadata = match fs::symlink_metadata(path) {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "Already gone");
            return Ok(());
        }
        Err(e) => return Err(StoreError::io(path, e)),
    };

    let result = if metadata.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    };

    match result {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(StoreError::io(path, e)),
    }
}

impl FileStore for DirectoryStore {
    fn list(&self, dir: &Path) -> StoreResult<Vec<String>> {
        let mut names = Self::read_entries(dir)?.names;
        names.retain(|name| !is_reserved_name(name));
        Ok(names)
    }

    fn create_atomic(&self, dir: &Path, name: &str) -> StoreResult<Box<dyn AtomicFile>> {
        validate_name(name)?;

        let temp_path = dir.join(temporary_name(name));
        let file = File::create(&temp_path).map_err(|e| StoreError::io(&temp_path, e))?;

        Ok(Box::new(DirectoryFile {
            writer: BufWriter::new(file),
            temp_path,
            final_path: dir.join(name),
        }))
    }

    fn delete(&self, dir: &Path, name: &str) -> StoreResult<()> {
        if name.contains(['/', '\\']) || name == ".." || name == "." {
            return Err(StoreError::InvalidName(name.to_string()));
        }

        remove_entry(&dir.join(name))
    }

    fn purge_temporaries(&self, dir: &Path) -> StoreResult<Vec<String>> {
        let mut purged = Vec::new();

        for name in Self::read_entries(dir)?.names {
            if !name.ends_with(TEMP_SUFFIX) {
                continue;
            }
            let path = dir.join(&name);
            match fs::remove_file(&path) {
                Ok(()) => purged.push(name),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(StoreError::io(&path, e)),
            }
        }

        Ok(purged)
    }

    fn list_undecodable(&self, dir: &Path) -> StoreResult<Vec<String>> {
        let entries = Self::read_entries(dir)?;
        Ok(entries
            .undecodable
            .iter()
            .map(|raw| raw.to_string_lossy().into_owned())
            .collect())
    }

    fn purge_undecodable(&self, dir: &Path) -> StoreResult<Vec<String>> {
        let mut purged = Vec::new();

        for raw in Self::read_entries(dir)?.undecodable {
            let name = raw.to_string_lossy().into_owned();
            warn!(dir = %dir.display(), %name, "Removing entry with a non UTF-8 name");
            remove_entry(&dir.join(&raw))?;
            purged.push(name);
        }

        Ok(purged)
    }
}

/// An in-progress write to `<name>.part`.
struct DirectoryFile {
    writer: BufWriter<File>,
    temp_path: PathBuf,
    final_path: PathBuf,
}

impl Write for DirectoryFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.writer.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

impl AtomicFile for DirectoryFile {
    fn commit(self: Box<Self>) -> StoreResult<()> {
        let DirectoryFile {
            writer,
            temp_path,
            final_path,
        } = *self;

        let file = writer
            .into_inner()
            .map_err(|e| StoreError::io(&temp_path, e.into_error()))?;
        file.sync_all().map_err(|e| StoreError::io(&temp_path, e))?;
        drop(file);

        fs::rename(&temp_path, &final_path).map_err(|e| StoreError::io(&final_path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn list_missing_directory_fails() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("nope");

        let result = DirectoryStore::new().list(&missing);
        assert!(matches!(result, Err(ref e) if e.is_not_found()));
    }

    #[test]
    fn list_is_sorted_and_skips_reserved_names() {
        let dir = tempdir().unwrap();
        for name in ["b", "a", "c.part", crate::LOCK_FILE_NAME] {
            fs::write(dir.path().join(name), b"x").unwrap();
        }

        let names = DirectoryStore::new().list(dir.path()).unwrap();
        assert_eq!(names, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn commit_makes_final_name_visible() {
        let dir = tempdir().unwrap();
        let store = DirectoryStore::new();

        let mut file = store.create_atomic(dir.path(), "plugin.jar").unwrap();
        file.write_all(b"hello").unwrap();
        assert!(store.list(dir.path()).unwrap().is_empty());
        assert!(dir.path().join("plugin.jar.part").exists());

        file.commit().unwrap();
        assert_eq!(store.list(dir.path()).unwrap(), vec!["plugin.jar".to_string()]);
        assert_eq!(fs::read(dir.path().join("plugin.jar")).unwrap(), b"hello");
        assert!(!dir.path().join("plugin.jar.part").exists());
    }

    #[test]
    fn dropped_write_leaves_only_temporary() {
        let dir = tempdir().unwrap();
        let store = DirectoryStore::new();

        {
            let mut file = store.create_atomic(dir.path(), "a").unwrap();
            file.write_all(b"partial").unwrap();
        }

        assert!(store.list(dir.path()).unwrap().is_empty());
        assert!(dir.path().join("a.part").exists());
        assert!(!dir.path().join("a").exists());
    }

    #[test]
    fn create_truncates_stale_temporary() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.part"), b"stale stale stale").unwrap();
        let store = DirectoryStore::new();

        let mut file = store.create_atomic(dir.path(), "a").unwrap();
        file.write_all(b"new").unwrap();
        file.commit().unwrap();

        assert_eq!(fs::read(dir.path().join("a")).unwrap(), b"new");
    }

    #[test]
    fn create_rejects_invalid_names() {
        let dir = tempdir().unwrap();
        let result = DirectoryStore::new().create_atomic(dir.path(), "../escape");
        assert!(matches!(result, Err(StoreError::InvalidName(_))));
    }

    #[test]
    fn delete_tolerates_missing_file() {
        let dir = tempdir().unwrap();
        assert!(DirectoryStore::new().delete(dir.path(), "ghost").is_ok());
    }

    #[test]
    fn delete_removes_files_and_directories() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("file"), b"x").unwrap();
        fs::create_dir(dir.path().join("nested")).unwrap();
        fs::write(dir.path().join("nested").join("inner"), b"x").unwrap();
        let store = DirectoryStore::new();

        store.delete(dir.path(), "file").unwrap();
        store.delete(dir.path(), "nested").unwrap();

        assert!(store.list(dir.path()).unwrap().is_empty());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn undecodable_entries_are_found_and_purged() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let dir = tempdir().unwrap();
        let file = OsStr::from_bytes(b"stale-\xff.jar");
        let nested = OsStr::from_bytes(b"old-\xfe");
        fs::write(dir.path().join(file), b"x").unwrap();
        fs::create_dir(dir.path().join(nested)).unwrap();
        fs::write(dir.path().join(nested).join("inner"), b"x").unwrap();
        fs::write(dir.path().join("keep"), b"x").unwrap();
        let store = DirectoryStore::new();

        assert_eq!(store.list(dir.path()).unwrap(), vec!["keep".to_string()]);
        let found = store.list_undecodable(dir.path()).unwrap();
        assert_eq!(found, vec!["old-\u{fffd}".to_string(), "stale-\u{fffd}.jar".to_string()]);

        let purged = store.purge_undecodable(dir.path()).unwrap();
        assert_eq!(purged, found);
        assert!(!dir.path().join(file).exists());
        assert!(!dir.path().join(nested).exists());
        assert!(dir.path().join("keep").exists());
        assert!(store.list_undecodable(dir.path()).unwrap().is_empty());
    }

    #[test]
    fn purge_removes_only_temporaries() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("keep"), b"x").unwrap();
        fs::write(dir.path().join("gone.part"), b"x").unwrap();
        let store = DirectoryStore::new();

        let purged = store.purge_temporaries(dir.path()).unwrap();
        assert_eq!(purged, vec!["gone.part".to_string()]);
        assert!(dir.path().join("keep").exists());
        assert!(!dir.path().join("gone.part").exists());
    }
}
