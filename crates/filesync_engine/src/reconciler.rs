//! The reconciliation pass.

use crate::config::EngineConfig;
use crate::diff::Plan;
use crate::error::{DownloadError, ReconcileError, ReconcileResult};
use crate::fetch::Fetcher;
use crate::source::{DesiredState, DesiredStateSource};
use filesync_store::{validate_name, FileStore};
use std::collections::BTreeMap;
use std::io;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, info_span, warn};

/// Result of a successful pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileOutcome {
    /// Names removed from the directory.
    pub deleted: Vec<String>,
    /// Names downloaded into the directory.
    pub downloaded: Vec<String>,
    /// Bytes written by the downloads.
    pub bytes: u64,
    /// Duration of the pass.
    pub duration: Duration,
}

impl ReconcileOutcome {
    /// Returns true if the pass changed nothing.
    pub fn is_noop(&self) -> bool {
        self.deleted.is_empty() && self.downloaded.is_empty()
    }
}

/// Something that can reconcile a key.
///
/// The dispatcher only depends on this seam, so any pass implementation
/// can be driven by the worker pool.
pub trait Reconcile: Send + Sync {
    /// Runs one pass for `key`.
    fn reconcile(&self, key: &str) -> ReconcileResult<ReconcileOutcome>;
}

impl<T: Reconcile + ?Sized> Reconcile for Arc<T> {
    fn reconcile(&self, key: &str) -> ReconcileResult<ReconcileOutcome> {
        (**self).reconcile(key)
    }
}

/// Drives a target directory toward the desired state of a key.
///
/// # Algorithm
///
/// 1. Read the desired state (a deleted key means "no files")
/// 2. List the directory; failure aborts the pass
/// 3. Diff by name
/// 4. Delete every unwanted name, continuing past failures
/// 5. Download every missing name, continuing past failures
/// 6. Report the deletion failure first, then the download failure
///
/// The directory listing is taken fresh on every pass, so retrying a
/// partially successful pass only redoes what is still missing.
pub struct Reconciler<S, F, St> {
    config: EngineConfig,
    source: Arc<S>,
    fetcher: Arc<F>,
    store: Arc<St>,
}

impl<S, F, St> Reconciler<S, F, St>
where
    S: DesiredStateSource,
    F: Fetcher,
    St: FileStore,
{
    /// Creates a new reconciler.
    pub fn new(config: EngineConfig, source: S, fetcher: F, store: St) -> Self {
        Self::from_shared(config, Arc::new(source), Arc::new(fetcher), Arc::new(store))
    }

    /// Creates a reconciler over collaborators shared with other owners.
    pub fn from_shared(config: EngineConfig, source: Arc<S>, fetcher: Arc<F>, store: Arc<St>) -> Self {
        Self {
            config,
            source,
            fetcher,
            store,
        }
    }

    /// Returns the directory this reconciler owns.
    pub fn target_dir(&self) -> &Path {
        self.config.target_dir()
    }

    /// Returns the configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Reads the desired state and diffs it against the directory.
    ///
    /// This performs no mutation and is what a pass would do.
    pub fn plan(&self, key: &str) -> ReconcileResult<Plan> {
        let desired = self.desired_state(key)?;
        self.plan_for(&desired)
    }

    fn desired_state(&self, key: &str) -> ReconcileResult<DesiredState> {
        match self.source.get(key) {
            Ok(Some(desired)) => {
                info!(files = desired.len(), "Received desired state");
                for (name, location) in &desired {
                    debug!(%name, %location, "Desired file");
                }
                Ok(desired)
            }
            Ok(None) => {
                info!("Desired state no longer exists; converging to an empty directory");
                Ok(DesiredState::new())
            }
            Err(e) => {
                warn!(error = %e, "Fetching desired state failed");
                Err(e.into())
            }
        }
    }

    fn plan_for(&self, desired: &DesiredState) -> ReconcileResult<Plan> {
        let dir = self.target_dir();
        let present = self.store.list(dir).map_err(|source| {
            error!(dir = %dir.display(), error = %source, "Failed to list target directory");
            ReconcileError::ListFailure {
                dir: dir.to_path_buf(),
                source,
            }
        })?;

        let undecodable = self.store.list_undecodable(dir).map_err(|source| {
            error!(dir = %dir.display(), error = %source, "Failed to list target directory");
            ReconcileError::ListFailure {
                dir: dir.to_path_buf(),
                source,
            }
        })?;

        let plan = Plan::compute(desired, present.iter().map(String::as_str))
            .with_undecodable(undecodable);
        for name in &plan.to_purge {
            debug!(%name, "Name is not UTF-8 => delete");
        }
        for name in &plan.to_delete {
            debug!(%name, "Present but not desired => delete");
        }
        for name in plan.to_download.keys() {
            debug!(%name, "Desired but not present => download");
        }
        Ok(plan)
    }

    fn delete_all(&self, plan: &Plan) -> (Vec<String>, Vec<String>) {
        let dir = self.target_dir();
        let mut deleted = Vec::new();
        let mut failed = Vec::new();

        if !plan.to_purge.is_empty() {
            info!(count = plan.to_purge.len(), "Deleting entries with non UTF-8 names");
            match self.store.purge_undecodable(dir) {
                Ok(purged) => deleted.extend(purged),
                Err(e) => {
                    warn!(error = %e, "Failed to delete entries with non UTF-8 names");
                    failed.extend(plan.to_purge.iter().cloned());
                }
            }
        }

        for name in &plan.to_delete {
            info!(%name, "Deleting file");
            match self.store.delete(dir, name) {
                Ok(()) => deleted.push(name.clone()),
                Err(e) => {
                    warn!(%name, error = %e, "Failed to delete file");
                    failed.push(name.clone());
                }
            }
        }

        if !failed.is_empty() {
            warn!(count = failed.len(), "Some files failed to delete");
        }
        (deleted, failed)
    }

    fn download_all(&self, files: &BTreeMap<String, String>) -> (Vec<String>, Vec<String>, u64) {
        let mut downloaded = Vec::new();
        let mut failed = Vec::new();
        let mut bytes = 0;

        for (name, location) in files {
            info!(%name, %location, "Downloading file");
            match self.download_one(name, location) {
                Ok(written) => {
                    bytes += written;
                    downloaded.push(name.clone());
                }
                Err(e) if e.is_retryable() => {
                    warn!(%name, %location, error = %e, "Failed to download file");
                    failed.push(name.clone());
                }
                Err(e) => {
                    error!(
                        %name,
                        %location,
                        error = %e,
                        "Failed to download file; retrying cannot help until the desired state changes"
                    );
                    failed.push(name.clone());
                }
            }
        }

        if !failed.is_empty() {
            warn!(count = failed.len(), "Some files failed to download");
        }
        (downloaded, failed, bytes)
    }

    /// Streams one source into `<name>.part` and commits it to `<name>`.
    fn download_one(&self, name: &str, location: &str) -> Result<u64, DownloadError> {
        validate_name(name).map_err(|_| DownloadError::InvalidName(name.to_string()))?;

        let mut file = self
            .store
            .create_atomic(self.target_dir(), name)
            .map_err(DownloadError::Create)?;
        let mut body = self.fetcher.open(location).map_err(DownloadError::Fetch)?;
        let written = io::copy(&mut body, &mut file).map_err(DownloadError::Copy)?;
        file.commit().map_err(DownloadError::Commit)?;

        Ok(written)
    }
}

impl<S, F, St> Reconcile for Reconciler<S, F, St>
where
    S: DesiredStateSource,
    F: Fetcher,
    St: FileStore,
{
    fn reconcile(&self, key: &str) -> ReconcileResult<ReconcileOutcome> {
        let _span = info_span!("reconcile", %key).entered();
        let start = Instant::now();

        let desired = self.desired_state(key)?;
        let plan = self.plan_for(&desired)?;

        // Both phases run to completion before either failure is surfaced
        let (deleted, delete_failed) = self.delete_all(&plan);
        let (downloaded, download_failed, bytes) = self.download_all(&plan.to_download);

        if !delete_failed.is_empty() {
            return Err(ReconcileError::DeleteFailure {
                failed: delete_failed,
            });
        }
        if !download_failed.is_empty() {
            return Err(ReconcileError::DownloadFailure {
                failed: download_failed,
            });
        }

        let outcome = ReconcileOutcome {
            deleted,
            downloaded,
            bytes,
            duration: start.elapsed(),
        };
        info!(
            deleted = outcome.deleted.len(),
            downloaded = outcome.downloaded.len(),
            bytes = outcome.bytes,
            "Directory in sync"
        );
        Ok(outcome)
    }
}
