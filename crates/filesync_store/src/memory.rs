//! In-memory store for testing.

use crate::error::{StoreError, StoreResult};
use crate::store::{is_reserved_name, temporary_name, validate_name, AtomicFile, FileStore, TEMP_SUFFIX};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// A failure the [`InMemoryStore`] should produce until cleared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreFault {
    /// Every `list` call fails.
    List,
    /// `create_atomic` fails for this name.
    Create(String),
    /// `commit` fails for this name.
    Commit(String),
    /// `delete` fails for this name.
    Delete(String),
}

#[derive(Debug, Default)]
struct MemoryState {
    dirs: BTreeMap<PathBuf, BTreeMap<String, Vec<u8>>>,
    mutations: u64,
    faults: Vec<StoreFault>,
}

impl MemoryState {
    fn has_fault(&self, fault: &StoreFault) -> bool {
        self.faults.contains(fault)
    }
}

/// An in-memory store.
///
/// This store keeps every directory as a sorted map of names to bytes and
/// is suitable for:
/// - Unit tests of the reconciler
/// - Asserting that a pass performed no mutations
/// - Injecting list, create, commit and delete failures
///
/// Temporary `.part` entries are kept in the raw entry map exactly like
/// a real directory would show them, so interrupted writes can be observed
/// with [`InMemoryStore::entries`].
///
/// # Thread Safety
///
/// Clones share the same state.
#[derive(Debug, Default, Clone)]
pub struct InMemoryStore {
    state: Arc<RwLock<MemoryState>>,
}

impl InMemoryStore {
    /// Creates a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store holding one empty directory.
    #[must_use]
    pub fn with_dir(dir: &Path) -> Self {
        let store = Self::new();
        store.state.write().dirs.entry(dir.to_path_buf()).or_default();
        store
    }

    /// Creates a store where `dir` already holds `names` (empty contents).
    #[must_use]
    pub fn with_files<'a>(dir: &Path, names: impl IntoIterator<Item = &'a str>) -> Self {
        let store = Self::with_dir(dir);
        for name in names {
            store.insert(dir, name, Vec::new());
        }
        store
    }

    /// Places a file without counting it as a mutation.
    pub fn insert(&self, dir: &Path, name: &str, content: Vec<u8>) {
        self.state
            .write()
            .dirs
            .entry(dir.to_path_buf())
            .or_default()
            .insert(name.to_string(), content);
    }

    /// Returns the content stored under `name`, if present.
    #[must_use]
    pub fn contents(&self, dir: &Path, name: &str) -> Option<Vec<u8>> {
        self.state
            .read()
            .dirs
            .get(dir)
            .and_then(|files| files.get(name).cloned())
    }

    /// Returns every raw entry in `dir`, including temporary names.
    #[must_use]
    pub fn entries(&self, dir: &Path) -> Vec<String> {
        self.state
            .read()
            .dirs
            .get(dir)
            .map(|files| files.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Returns the number of create, commit and delete calls so far.
    #[must_use]
    pub fn mutation_count(&self) -> u64 {
        self.state.read().mutations
    }

    /// Injects a failure.
    pub fn inject(&self, fault: StoreFault) {
        self.state.write().faults.push(fault);
    }

    /// Removes one injected failure.
    pub fn heal(&self, fault: &StoreFault) {
        self.state.write().faults.retain(|f| f != fault);
    }

    /// Removes all injected failures.
    pub fn clear_faults(&self) {
        self.state.write().faults.clear();
    }
}

impl FileStore for InMemoryStore {
    fn list(&self, dir: &Path) -> StoreResult<Vec<String>> {
        let state = self.state.read();
        if state.has_fault(&StoreFault::List) {
            return Err(StoreError::Injected(format!("list {}", dir.display())));
        }

        match state.dirs.get(dir) {
            Some(files) => Ok(files
                .keys()
                .filter(|name| !is_reserved_name(name))
                .cloned()
                .collect()),
            None => Err(StoreError::io(dir, io::Error::from(io::ErrorKind::NotFound))),
        }
    }

    fn create_atomic(&self, dir: &Path, name: &str) -> StoreResult<Box<dyn AtomicFile>> {
        validate_name(name)?;

        let mut state = self.state.write();
        state.mutations += 1;
        if state.has_fault(&StoreFault::Create(name.to_string())) {
            return Err(StoreError::Injected(format!("create {name}")));
        }

        let Some(files) = state.dirs.get_mut(dir) else {
            return Err(StoreError::io(dir, io::Error::from(io::ErrorKind::NotFound)));
        };
        files.insert(temporary_name(name), Vec::new());

        Ok(Box::new(MemoryFile {
            state: Arc::clone(&self.state),
            dir: dir.to_path_buf(),
            name: name.to_string(),
            buffer: Vec::new(),
        }))
    }

    fn delete(&self, dir: &Path, name: &str) -> StoreResult<()> {
        let mut state = self.state.write();
        state.mutations += 1;
        if state.has_fault(&StoreFault::Delete(name.to_string())) {
            return Err(StoreError::Injected(format!("delete {name}")));
        }

        if let Some(files) = state.dirs.get_mut(dir) {
            files.remove(name);
        }
        Ok(())
    }

    fn purge_temporaries(&self, dir: &Path) -> StoreResult<Vec<String>> {
        let mut state = self.state.write();
        let Some(files) = state.dirs.get_mut(dir) else {
            return Err(StoreError::io(dir, io::Error::from(io::ErrorKind::NotFound)));
        };

        let purged: Vec<String> = files
            .keys()
            .filter(|name| name.ends_with(TEMP_SUFFIX))
            .cloned()
            .collect();
        for name in &purged {
            files.remove(name);
        }
        state.mutations += purged.len() as u64;

        Ok(purged)
    }
}

struct MemoryFile {
    state: Arc<RwLock<MemoryState>>,
    dir: PathBuf,
    name: String,
    buffer: Vec<u8>,
}

impl Write for MemoryFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl AtomicFile for MemoryFile {
    fn commit(self: Box<Self>) -> StoreResult<()> {
        let MemoryFile {
            state,
            dir,
            name,
            buffer,
        } = *self;

        let mut state = state.write();
        state.mutations += 1;
        if state.has_fault(&StoreFault::Commit(name.clone())) {
            return Err(StoreError::Injected(format!("commit {name}")));
        }

        let files = state.dirs.entry(dir).or_default();
        files.remove(&temporary_name(&name));
        files.insert(name, buffer);
        Ok(())
    }
}
