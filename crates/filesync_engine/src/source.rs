//! Desired-state contract and an in-memory source.

use crate::error::{SourceError, SourceResult};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::btree_map;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// The files one key wants present: file name to source location.
///
/// Serialized as a flat JSON object, e.g. `{"plugin.jar": "http://host/plugin.jar"}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DesiredState {
    files: BTreeMap<String, String>,
}

impl DesiredState {
    /// Creates an empty desired state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces one entry.
    pub fn insert(&mut self, name: impl Into<String>, location: impl Into<String>) {
        self.files.insert(name.into(), location.into());
    }

    /// Returns the source location for `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.files.get(name).map(String::as_str)
    }

    /// Returns true if `name` is desired.
    pub fn contains(&self, name: &str) -> bool {
        self.files.contains_key(name)
    }

    /// Iterates entries in name order.
    pub fn iter(&self) -> btree_map::Iter<'_, String, String> {
        self.files.iter()
    }

    /// Returns the number of desired files.
    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// Returns true if no files are desired.
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

impl<N: Into<String>, L: Into<String>> FromIterator<(N, L)> for DesiredState {
    fn from_iter<I: IntoIterator<Item = (N, L)>>(iter: I) -> Self {
        Self {
            files: iter
                .into_iter()
                .map(|(name, location)| (name.into(), location.into()))
                .collect(),
        }
    }
}

impl<'a> IntoIterator for &'a DesiredState {
    type Item = (&'a String, &'a String);
    type IntoIter = btree_map::Iter<'a, String, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.files.iter()
    }
}

/// Read access to the current desired state of a key.
///
/// Implementations wrap whatever watch mechanism produces the mapping.
/// The engine never inspects notification payloads; it always re-reads
/// through [`DesiredStateSource::get`].
pub trait DesiredStateSource: Send + Sync {
    /// Returns the desired state for `key`, or `None` if the key no longer exists.
    fn get(&self, key: &str) -> SourceResult<Option<DesiredState>>;
}

impl<T: DesiredStateSource + ?Sized> DesiredStateSource for Arc<T> {
    fn get(&self, key: &str) -> SourceResult<Option<DesiredState>> {
        (**self).get(key)
    }
}

/// Receiver of change notifications (add, update, delete) for keys.
pub trait ChangeSink: Send + Sync {
    /// Called whenever the desired state of `key` may have changed.
    fn on_change(&self, key: &str);
}

/// An in-memory desired-state source for testing.
///
/// Every `set`/`remove` notifies the subscribed sinks, the way an
/// informer fires add, update and delete handlers.
#[derive(Default)]
pub struct MemorySource {
    states: RwLock<HashMap<String, DesiredState>>,
    sinks: RwLock<Vec<Arc<dyn ChangeSink>>>,
    unavailable: AtomicBool,
}

impl MemorySource {
    /// Creates an empty source.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a sink for change notifications.
    pub fn subscribe(&self, sink: Arc<dyn ChangeSink>) {
        self.sinks.write().push(sink);
    }

    /// Creates or updates `key` and notifies subscribers.
    pub fn set(&self, key: &str, state: DesiredState) {
        self.states.write().insert(key.to_string(), state);
        self.notify(key);
    }

    /// Deletes `key` and notifies subscribers.
    pub fn remove(&self, key: &str) {
        self.states.write().remove(key);
        self.notify(key);
    }

    /// Makes every `get` fail until set back to `true`.
    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    fn notify(&self, key: &str) {
        let sinks = self.sinks.read().clone();
        for sink in sinks {
            sink.on_change(key);
        }
    }
}

impl DesiredStateSource for MemorySource {
    fn get(&self, key: &str) -> SourceResult<Option<DesiredState>> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(SourceError::Unavailable {
                key: key.to_string(),
                message: "source marked unavailable".into(),
            });
        }
        Ok(self.states.read().get(key).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<String>>);

    impl ChangeSink for Recorder {
        fn on_change(&self, key: &str) {
            self.0.lock().push(key.to_string());
        }
    }

    #[test]
    fn desired_state_is_ordered_by_name() {
        let state: DesiredState = [("b", "url2"), ("a", "url1")].into_iter().collect();
        let names: Vec<&String> = state.iter().map(|(name, _)| name).collect();
        assert_eq!(names, ["a", "b"]);
        assert_eq!(state.get("a"), Some("url1"));
        assert!(!state.contains("c"));
    }

    #[test]
    fn desired_state_json_shape() {
        let state: DesiredState = serde_json::from_str(r#"{"a":"http://h/a"}"#).unwrap();
        assert_eq!(state.get("a"), Some("http://h/a"));
        assert_eq!(serde_json::to_string(&state).unwrap(), r#"{"a":"http://h/a"}"#);
    }

    #[test]
    fn memory_source_notifies_on_every_change() {
        let source = MemorySource::new();
        let recorder = Arc::new(Recorder::default());
        source.subscribe(recorder.clone());

        source.set("ns/files", DesiredState::new());
        source.set("ns/files", [("a", "u")].into_iter().collect());
        source.remove("ns/files");

        assert_eq!(recorder.0.lock().len(), 3);
        assert_eq!(source.get("ns/files").unwrap(), None);
    }

    #[test]
    fn memory_source_unavailable() {
        let source = MemorySource::new();
        source.set_available(false);
        assert!(matches!(source.get("k"), Err(SourceError::Unavailable { .. })));
        source.set_available(true);
        assert!(source.get("k").unwrap().is_none());
    }
}
