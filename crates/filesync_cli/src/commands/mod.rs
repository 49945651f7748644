//! CLI command implementations.

pub mod plan;
pub mod run;
pub mod sync;

use crate::Target;
use filesync_engine::{EngineConfig, ManifestSource, Reconciler, SchemeFetcher};
use filesync_store::{DirLock, DirectoryStore, FileStore};
use std::fs;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// The reconciler every command drives.
pub type Controller = Reconciler<ManifestSource, SchemeFetcher, DirectoryStore>;

/// Connects to the manifest namespace.
///
/// A missing namespace is unrecoverable: the error bubbles up to `main`,
/// which exits with status 1.
pub fn connect(target: &Target) -> Result<Arc<ManifestSource>, Box<dyn std::error::Error>> {
    Ok(Arc::new(ManifestSource::connect(&target.root, &target.namespace)?))
}

/// Builds the reconciler for `target`.
pub fn controller(
    source: Arc<ManifestSource>,
    config: EngineConfig,
) -> Result<Controller, Box<dyn std::error::Error>> {
    let fetcher = SchemeFetcher::with_timeout(config.fetch_timeout)?;
    Ok(Reconciler::from_shared(
        config,
        source,
        Arc::new(fetcher),
        Arc::new(DirectoryStore::new()),
    ))
}

/// Takes ownership of the download directory before mutating it.
///
/// Creates the directory if needed, locks it against a second controller
/// and sweeps partial downloads left by a previous crash.
pub fn prepare(target: &Target) -> Result<DirLock, Box<dyn std::error::Error>> {
    fs::create_dir_all(&target.download_path)?;
    let lock = DirLock::acquire(&target.download_path)?;
    let purged = DirectoryStore::new().purge_temporaries(&target.download_path)?;
    if !purged.is_empty() {
        warn!(count = purged.len(), "Removed leftover partial downloads");
    }
    Ok(lock)
}

/// Builds the engine configuration for `target`.
pub fn config(target: &Target, fetch_timeout_secs: u64) -> EngineConfig {
    EngineConfig::new(&target.download_path).with_fetch_timeout(Duration::from_secs(fetch_timeout_secs))
}
