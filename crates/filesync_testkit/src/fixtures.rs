//! Test fixtures and directory helpers.
//!
//! Provides temporary target directories on disk and fully in-memory
//! worlds (source, fetcher, store) for driving the reconciler.

use filesync_engine::{
    DesiredState, EngineConfig, FileFetcher, Fetcher, MemorySource, MockFetcher, Reconciler,
    RetryConfig,
};
use filesync_store::{DirectoryStore, FileStore, InMemoryStore};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

/// Target directory used by in-memory worlds.
pub const MEMORY_TARGET: &str = "/memory/target";

/// Reconciler over in-memory collaborators.
pub type MemoryReconciler<F = MockFetcher> = Reconciler<MemorySource, F, InMemoryStore>;

/// Reconciler over a real directory and local source files.
pub type DirectoryReconciler = Reconciler<MemorySource, FileFetcher, DirectoryStore>;

/// Retry settings small enough for tests that wait on requeues.
pub fn fast_retry() -> RetryConfig {
    RetryConfig::new(
        std::time::Duration::from_millis(1),
        std::time::Duration::from_millis(20),
    )
    .with_jitter(false)
}

/// Engine configuration for `target` with fast retries and no rate limit.
pub fn test_config(target: impl Into<PathBuf>) -> EngineConfig {
    EngineConfig::new(target)
        .with_retry(fast_retry())
        .with_rate_limit(None)
}

/// A temporary target directory plus a directory of source files.
pub struct TestTarget {
    /// Directory the reconciler owns.
    pub target: PathBuf,
    /// Directory holding source files that `file://` locations point at.
    pub sources: PathBuf,
    _temp_dir: TempDir,
}

impl TestTarget {
    /// Creates empty target and source directories.
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let target = temp_dir.path().join("target");
        let sources = temp_dir.path().join("sources");
        fs::create_dir(&target).expect("Failed to create target directory");
        fs::create_dir(&sources).expect("Failed to create sources directory");
        Self {
            target,
            sources,
            _temp_dir: temp_dir,
        }
    }

    /// Writes a source file and returns its `file://` location.
    pub fn source(&self, name: &str, body: &[u8]) -> String {
        let path = self.sources.join(name);
        fs::write(&path, body).expect("Failed to write source file");
        format!("file://{}", path.display())
    }

    /// Returns a location under the sources directory that does not exist yet.
    pub fn missing_source(&self, name: &str) -> String {
        self.sources.join(name).display().to_string()
    }

    /// Places a file directly into the target directory.
    pub fn place(&self, name: &str, body: &[u8]) {
        fs::write(self.target.join(name), body).expect("Failed to write target file");
    }

    /// Returns the visible file names of the target directory.
    pub fn listing(&self) -> Vec<String> {
        DirectoryStore::new()
            .list(&self.target)
            .expect("Failed to list target directory")
    }

    /// Returns every raw entry of the target directory, temporaries included.
    pub fn raw_entries(&self) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(&self.target)
            .expect("Failed to read target directory")
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| entry.file_name().into_string().ok())
            .collect();
        names.sort();
        names
    }

    /// Reads a file from the target directory.
    pub fn read(&self, name: &str) -> Vec<u8> {
        fs::read(self.target.join(name)).expect("Failed to read target file")
    }

    /// Builds a reconciler over this directory and `source`.
    pub fn reconciler(&self, source: Arc<MemorySource>) -> DirectoryReconciler {
        Reconciler::from_shared(
            test_config(&self.target),
            source,
            Arc::new(FileFetcher::new()),
            Arc::new(DirectoryStore::new()),
        )
    }
}

impl Default for TestTarget {
    fn default() -> Self {
        Self::new()
    }
}

/// Source, fetcher and store held entirely in memory.
///
/// Locations are `mem://<name>`; publishing a key serves each body at
/// its location and sets the desired state.
pub struct MemoryWorld {
    /// The desired-state source.
    pub source: Arc<MemorySource>,
    /// The fetcher serving published bodies.
    pub fetcher: Arc<MockFetcher>,
    /// The store holding the target directory.
    pub store: InMemoryStore,
}

impl MemoryWorld {
    /// Creates a world with an empty target directory.
    pub fn new() -> Self {
        Self {
            source: Arc::new(MemorySource::new()),
            fetcher: Arc::new(MockFetcher::new()),
            store: InMemoryStore::with_dir(Path::new(MEMORY_TARGET)),
        }
    }

    /// Creates a world whose target directory already holds `names`.
    pub fn with_files<'a>(names: impl IntoIterator<Item = &'a str>) -> Self {
        Self {
            store: InMemoryStore::with_files(Path::new(MEMORY_TARGET), names),
            ..Self::new()
        }
    }

    /// Returns the location a published file is served from.
    pub fn location(name: &str) -> String {
        format!("mem://{name}")
    }

    /// Serves every body and sets `key` to the resulting mapping.
    pub fn publish(&self, key: &str, files: &[(&str, &[u8])]) -> DesiredState {
        let desired: DesiredState = files
            .iter()
            .map(|(name, body)| {
                let location = Self::location(name);
                self.fetcher.serve(&location, body.to_vec());
                (name.to_string(), location)
            })
            .collect();
        self.source.set(key, desired.clone());
        desired
    }

    /// Returns the visible names in the target directory.
    pub fn listing(&self) -> Vec<String> {
        self.store
            .list(Path::new(MEMORY_TARGET))
            .expect("Failed to list memory target")
    }

    /// Returns the raw entries of the target directory, temporaries included.
    pub fn raw_entries(&self) -> Vec<String> {
        self.store.entries(Path::new(MEMORY_TARGET))
    }

    /// Returns the content of a file in the target directory.
    pub fn contents(&self, name: &str) -> Option<Vec<u8>> {
        self.store.contents(Path::new(MEMORY_TARGET), name)
    }

    /// Builds a reconciler over this world.
    pub fn reconciler(&self) -> MemoryReconciler {
        self.reconciler_with(Arc::clone(&self.fetcher))
    }

    /// Builds a reconciler over this world's source and store with another fetcher.
    pub fn reconciler_with<F: Fetcher>(&self, fetcher: Arc<F>) -> MemoryReconciler<F> {
        Reconciler::from_shared(
            test_config(MEMORY_TARGET),
            Arc::clone(&self.source),
            fetcher,
            Arc::new(self.store.clone()),
        )
    }
}

impl Default for MemoryWorld {
    fn default() -> Self {
        Self::new()
    }
}

/// Runs a test with a temporary target directory.
pub fn with_temp_target<F, R>(f: F) -> R
where
    F: FnOnce(&TestTarget) -> R,
{
    let target = TestTarget::new();
    f(&target)
}

/// Test scenario helpers.
pub mod scenarios {
    use super::*;

    /// A world where `key` wants `a.jar` and `b.jar` while `c.jar` is on disk.
    pub fn replace_one(key: &str) -> MemoryWorld {
        let world = MemoryWorld::with_files(["c.jar"]);
        world.publish(key, &[("a.jar", b"alpha"), ("b.jar", b"bravo")]);
        world
    }

    /// A world where `key` wants `count` files, none of which are present.
    pub fn fresh(key: &str, count: usize) -> MemoryWorld {
        let world = MemoryWorld::new();
        let names: Vec<String> = (0..count).map(|i| format!("file-{i:03}.bin")).collect();
        let bodies: Vec<Vec<u8>> = (0..count).map(|i| format!("body {i}").into_bytes()).collect();
        let files: Vec<(&str, &[u8])> = names
            .iter()
            .zip(&bodies)
            .map(|(name, body)| (name.as_str(), body.as_slice()))
            .collect();
        world.publish(key, &files);
        world
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use filesync_engine::Reconcile;

    #[test]
    fn test_memory_world_converges() {
        let world = scenarios::replace_one("ns/files");
        let outcome = world.reconciler().reconcile("ns/files").unwrap();

        assert_eq!(outcome.deleted, vec!["c.jar"]);
        assert_eq!(outcome.downloaded, vec!["a.jar", "b.jar"]);
        assert_eq!(world.listing(), vec!["a.jar", "b.jar"]);
        assert_eq!(world.contents("b.jar"), Some(b"bravo".to_vec()));
    }

    #[test]
    fn test_with_temp_target() {
        with_temp_target(|t| {
            let location = t.source("a.jar", b"alpha");
            let source = Arc::new(MemorySource::new());
            source.set("k", [("a.jar", location)].into_iter().collect());

            t.reconciler(source).reconcile("k").unwrap();
            assert_eq!(t.listing(), vec!["a.jar"]);
            assert_eq!(t.read("a.jar"), b"alpha");
        });
    }

    #[test]
    fn test_fresh_scenario() {
        let world = scenarios::fresh("k", 12);
        world.reconciler().reconcile("k").unwrap();
        assert_eq!(world.listing().len(), 12);
    }
}
