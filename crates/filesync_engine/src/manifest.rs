//! Manifest files as a desired-state source.
//!
//! A namespace is a directory; each key names a manifest `<key>.json` in
//! it holding a flat JSON object of file name to source location. A
//! missing manifest means the key was deleted.
//!
//! [`ManifestWatcher`] wakes on file system events for the namespace
//! directory and also rescans on a fixed interval, so a missed or
//! unsupported event only delays a change.

use crate::error::{EngineError, EngineResult, SourceError, SourceResult};
use crate::source::{ChangeSink, DesiredState, DesiredStateSource};
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle, Thread};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Reads manifests from a namespace directory.
#[derive(Debug, Clone)]
pub struct ManifestSource {
    namespace: String,
    dir: PathBuf,
}

impl ManifestSource {
    /// Connects to `<root>/<namespace>`.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::NotConnected`] if the namespace directory
    /// does not exist, which the process treats as an unrecoverable
    /// startup error.
    pub fn connect(root: &Path, namespace: &str) -> SourceResult<Self> {
        let dir = root.join(namespace);
        if !is_plain_segment(namespace) {
            return Err(SourceError::NotConnected(dir));
        }
        if !dir.is_dir() {
            return Err(SourceError::NotConnected(dir));
        }

        info!(namespace, dir = %dir.display(), "Connected to manifest namespace");
        Ok(Self {
            namespace: namespace.to_string(),
            dir,
        })
    }

    /// Returns the namespace name.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Returns the reconciliation key of manifest `name`: `<namespace>/<name>`.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::InvalidKey`] unless `name` is a plain name
    /// inside the namespace directory.
    pub fn key_for(&self, name: &str) -> SourceResult<String> {
        if !is_plain_segment(name) {
            return Err(SourceError::InvalidKey(name.to_string()));
        }
        Ok(format!("{}/{name}", self.namespace))
    }

    /// Returns the manifest path for `key` (either `<name>` or `<namespace>/<name>`).
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::InvalidKey`] if the name part of `key` would
    /// resolve outside the namespace directory.
    pub fn manifest_path(&self, key: &str) -> SourceResult<PathBuf> {
        let name = key
            .strip_prefix(&self.namespace)
            .and_then(|rest| rest.strip_prefix('/'))
            .unwrap_or(key);
        if !is_plain_segment(name) {
            return Err(SourceError::InvalidKey(key.to_string()));
        }
        Ok(self.dir.join(format!("{name}.json")))
    }

    /// Reads the raw manifest bytes, `None` if the manifest does not exist.
    fn read_raw(&self, key: &str) -> SourceResult<Option<Vec<u8>>> {
        let path = self.manifest_path(key)?;
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(SourceError::Unavailable {
                key: key.to_string(),
                message: format!("{}: {e}", path.display()),
            }),
        }
    }
}

/// A single path component that stays inside its parent directory.
fn is_plain_segment(name: &str) -> bool {
    !(name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\', '\0']))
}

impl DesiredStateSource for ManifestSource {
    fn get(&self, key: &str) -> SourceResult<Option<DesiredState>> {
        let Some(bytes) = self.read_raw(key)? else {
            return Ok(None);
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| SourceError::Malformed {
                key: key.to_string(),
                message: e.to_string(),
            })
    }
}

/// Watches manifests and reports add, update and delete as change notifications.
///
/// On spawn, every watched key whose manifest already exists is reported
/// once, so existing state converges without waiting for an edit. After
/// that, manifests are rescanned whenever the namespace directory changes
/// and at least every `interval`.
pub struct ManifestWatcher {
    stop: Arc<AtomicBool>,
    events: Option<RecommendedWatcher>,
    handle: Option<JoinHandle<()>>,
}

impl ManifestWatcher {
    /// Starts watching `keys`, rescanning at least every `interval`.
    pub fn spawn(
        source: Arc<ManifestSource>,
        keys: Vec<String>,
        sink: Arc<dyn ChangeSink>,
        interval: Duration,
    ) -> EngineResult<Self> {
        let mut seen: HashMap<String, Option<Vec<u8>>> = HashMap::new();
        for key in keys {
            let current = snapshot(&source, &key);
            if matches!(current, Some(Some(_))) {
                debug!(%key, "Manifest present at startup");
                sink.on_change(&key);
            }
            seen.insert(key, current.flatten());
        }

        let dir = source.dir.clone();
        let stop = Arc::new(AtomicBool::new(false));
        let handle = {
            let stop = Arc::clone(&stop);
            thread::Builder::new()
                .name("filesync-manifest-watcher".into())
                .spawn(move || {
                    while !stop.load(Ordering::SeqCst) {
                        thread::park_timeout(interval);
                        if stop.load(Ordering::SeqCst) {
                            break;
                        }
                        poll(&source, &mut seen, sink.as_ref());
                    }
                })
                .map_err(EngineError::Spawn)?
        };

        let events = watch_events(&dir, handle.thread().clone());

        Ok(Self {
            stop,
            events,
            handle: Some(handle),
        })
    }

    /// Returns true if file system events are delivered, false if the
    /// watcher only rescans on its interval.
    pub fn has_events(&self) -> bool {
        self.events.is_some()
    }

    /// Stops watching and joins the watcher thread.
    pub fn stop(&mut self) {
        drop(self.events.take());
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            handle.thread().unpark();
            if handle.join().is_err() {
                warn!("Manifest watcher exited by panic");
            }
        }
    }
}

impl Drop for ManifestWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Subscribes to changes in `dir`; each event wakes `rescan`.
///
/// Returns `None` if the platform watcher cannot be set up, leaving the
/// interval as the only trigger.
fn watch_events(dir: &Path, rescan: Thread) -> Option<RecommendedWatcher> {
    let handler = move |res: notify::Result<notify::Event>| match res {
        Ok(event) if matches!(event.kind, EventKind::Access(_)) => {}
        Ok(_) => rescan.unpark(),
        Err(e) => warn!(error = %e, "Manifest watch error"),
    };

    let mut watcher = match notify::recommended_watcher(handler) {
        Ok(watcher) => watcher,
        Err(e) => {
            warn!(error = %e, "File events unavailable; falling back to polling");
            return None;
        }
    };
    if let Err(e) = watcher.watch(dir, RecursiveMode::NonRecursive) {
        warn!(dir = %dir.display(), error = %e, "Cannot watch manifest directory; falling back to polling");
        return None;
    }

    debug!(dir = %dir.display(), "Watching manifest directory");
    Some(watcher)
}

/// Reads a manifest for change detection; `None` when it cannot be read.
fn snapshot(source: &ManifestSource, key: &str) -> Option<Option<Vec<u8>>> {
    match source.read_raw(key) {
        Ok(raw) => Some(raw),
        Err(e) => {
            warn!(%key, error = %e, "Cannot read manifest");
            None
        }
    }
}

fn poll(source: &ManifestSource, seen: &mut HashMap<String, Option<Vec<u8>>>, sink: &dyn ChangeSink) {
    for (key, last) in seen.iter_mut() {
        // An unreadable manifest keeps its last known content
        let Some(current) = snapshot(source, key) else {
            continue;
        };
        if current != *last {
            let event = match (&*last, &current) {
                (None, Some(_)) => "added",
                (Some(_), None) => "deleted",
                _ => "updated",
            };
            info!(%key, event, "Manifest changed");
            *last = current;
            sink.on_change(key);
        }
    }
}
