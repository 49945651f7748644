//! Crash recovery testing for interrupted downloads.
//!
//! This module simulates a process dying part way through a download and
//! verifies that the final name never becomes visible, and that a
//! restarted controller sweeps the leftovers and converges.
//!
//! ## Test Strategy
//!
//! 1. **Crash during copy** - Only part of the body reaches `<name>.part`
//! 2. **Crash before rename** - The body is complete but never committed
//! 3. **Restart after crash** - Leftovers are swept and the pass converges
//! 4. **Committed file survives** - Files committed before a crash are kept
//!
//! ## Usage
//!
//! ```rust,ignore
//! use filesync_testkit::crash::CrashRecoveryHarness;
//!
//! let mut harness = CrashRecoveryHarness::new();
//! assert!(harness.run_all_tests().iter().all(|r| r.passed));
//! ```

use crate::fixtures::{test_config, TestTarget};
use filesync_engine::{FileFetcher, MemorySource, Reconcile, Reconciler};
use filesync_store::{AtomicFile, DirectoryStore, FileStore, StoreError, StoreResult};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io::{self, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Points at which a crash can be simulated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrashPoint {
    /// Crash after this many body bytes were written.
    DuringCopy {
        /// Bytes that reach the temporary file before the crash.
        after_bytes: usize,
    },
    /// Crash after the body was written but before the rename.
    BeforeCommit,
}

/// Result of a crash recovery test.
#[derive(Debug, Clone)]
pub struct CrashRecoveryResult {
    /// Whether the test passed.
    pub passed: bool,
    /// Description of what was tested.
    pub description: String,
    /// Expected visible files after the scenario.
    pub expected_files: Vec<String>,
    /// Actual visible files after the scenario.
    pub actual_files: Vec<String>,
    /// Any error message.
    pub error: Option<String>,
}

impl CrashRecoveryResult {
    fn check(description: &str, expected: &[&str], actual: Vec<String>, extra: Option<String>) -> Self {
        let expected_files: Vec<String> = expected.iter().map(|s| s.to_string()).collect();
        let mismatch = (expected_files != actual).then(|| "visible files differ".to_string());
        let error = extra.or(mismatch);
        Self {
            passed: error.is_none(),
            description: description.to_string(),
            expected_files,
            actual_files: actual,
            error,
        }
    }
}

/// A store wrapper that can simulate crashes for specific names.
pub struct CrashingStore<S: FileStore> {
    inner: S,
    armed: Mutex<HashMap<String, CrashPoint>>,
    crashed: Arc<AtomicBool>,
}

impl<S: FileStore> CrashingStore<S> {
    /// Creates a new crashing store wrapping an inner store.
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            armed: Mutex::new(HashMap::new()),
            crashed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Makes the next write of `name` crash at `point`.
    pub fn crash_at(&self, name: &str, point: CrashPoint) {
        self.armed.lock().insert(name.to_string(), point);
    }

    /// Returns whether a simulated crash happened.
    pub fn has_crashed(&self) -> bool {
        self.crashed.load(Ordering::SeqCst)
    }
}

impl<S: FileStore> FileStore for CrashingStore<S> {
    fn list(&self, dir: &Path) -> StoreResult<Vec<String>> {
        self.inner.list(dir)
    }

    fn create_atomic(&self, dir: &Path, name: &str) -> StoreResult<Box<dyn AtomicFile>> {
        let inner = self.inner.create_atomic(dir, name)?;
        let point = self.armed.lock().remove(name);
        let (budget, crash_on_commit) = match point {
            Some(CrashPoint::DuringCopy { after_bytes }) => (Some(after_bytes), false),
            Some(CrashPoint::BeforeCommit) => (None, true),
            None => (None, false),
        };
        Ok(Box::new(CrashingFile {
            inner,
            budget,
            crash_on_commit,
            crashed: Arc::clone(&self.crashed),
        }))
    }

    fn delete(&self, dir: &Path, name: &str) -> StoreResult<()> {
        self.inner.delete(dir, name)
    }

    fn purge_temporaries(&self, dir: &Path) -> StoreResult<Vec<String>> {
        self.inner.purge_temporaries(dir)
    }

    fn list_undecodable(&self, dir: &Path) -> StoreResult<Vec<String>> {
        self.inner.list_undecodable(dir)
    }

    fn purge_undecodable(&self, dir: &Path) -> StoreResult<Vec<String>> {
        self.inner.purge_undecodable(dir)
    }
}

struct CrashingFile {
    inner: Box<dyn AtomicFile>,
    budget: Option<usize>,
    crash_on_commit: bool,
    crashed: Arc<AtomicBool>,
}

impl Write for CrashingFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let Some(budget) = self.budget else {
            return self.inner.write(buf);
        };
        if budget == 0 {
            self.crashed.store(true, Ordering::SeqCst);
            self.inner.flush()?;
            return Err(io::Error::other("simulated crash during copy"));
        }
        let written = self.inner.write(&buf[..buf.len().min(budget)])?;
        self.budget = Some(budget - written);
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl AtomicFile for CrashingFile {
    fn commit(mut self: Box<Self>) -> StoreResult<()> {
        if self.crash_on_commit {
            self.crashed.store(true, Ordering::SeqCst);
            let _ = self.inner.flush();
            return Err(StoreError::Injected("simulated crash before rename".into()));
        }
        self.inner.commit()
    }
}

/// Crash recovery test harness over a real temporary directory.
pub struct CrashRecoveryHarness {
    target: TestTarget,
    results: Vec<CrashRecoveryResult>,
}

impl CrashRecoveryHarness {
    /// Creates a harness with fresh directories.
    pub fn new() -> Self {
        Self {
            target: TestTarget::new(),
            results: Vec::new(),
        }
    }

    /// Returns the directories the harness works in.
    pub fn target(&self) -> &TestTarget {
        &self.target
    }

    fn reset(&mut self) {
        self.target = TestTarget::new();
    }

    fn source_with(&self, files: &[(&str, &[u8])]) -> Arc<MemorySource> {
        let source = Arc::new(MemorySource::new());
        let desired = files
            .iter()
            .map(|(name, body)| (name.to_string(), self.target.source(name, body)))
            .collect();
        source.set("crash/files", desired);
        source
    }

    fn crashing_pass(&self, source: Arc<MemorySource>, store: Arc<CrashingStore<DirectoryStore>>) -> bool {
        let reconciler = Reconciler::from_shared(
            test_config(&self.target.target),
            source,
            Arc::new(FileFetcher::new()),
            store,
        );
        reconciler.reconcile("crash/files").is_err()
    }

    /// Restarts the way the binary does: sweep temporaries, then one pass.
    fn restart(&self, source: Arc<MemorySource>) -> Result<(), String> {
        DirectoryStore::new()
            .purge_temporaries(&self.target.target)
            .map_err(|e| e.to_string())?;
        self.target
            .reconciler(source)
            .reconcile("crash/files")
            .map(|_| ())
            .map_err(|e| e.to_string())
    }

    fn crash_hides_final_name(&mut self, point: CrashPoint, description: &str) -> CrashRecoveryResult {
        self.reset();
        let source = self.source_with(&[("big.bin", &[7u8; 4096])]);
        let store = Arc::new(CrashingStore::new(DirectoryStore::new()));
        store.crash_at("big.bin", point);

        let failed = self.crashing_pass(source, Arc::clone(&store));
        let raw = self.target.raw_entries();
        let extra = if !failed || !store.has_crashed() {
            Some("pass did not crash".to_string())
        } else if !raw.contains(&"big.bin.part".to_string()) {
            Some(format!("temporary file missing, raw entries {raw:?}"))
        } else {
            None
        };

        let result = CrashRecoveryResult::check(description, &[], self.target.listing(), extra);
        self.results.push(result.clone());
        result
    }

    /// Tests that a crash mid-copy leaves only the temporary name.
    pub fn test_crash_during_copy(&mut self) -> CrashRecoveryResult {
        self.crash_hides_final_name(
            CrashPoint::DuringCopy { after_bytes: 100 },
            "crash during copy hides the final name",
        )
    }

    /// Tests that a crash before the rename leaves only the temporary name.
    pub fn test_crash_before_commit(&mut self) -> CrashRecoveryResult {
        self.crash_hides_final_name(CrashPoint::BeforeCommit, "crash before rename hides the final name")
    }

    /// Tests that a restart sweeps leftovers and converges.
    pub fn test_restart_converges(&mut self) -> CrashRecoveryResult {
        self.reset();
        let source = self.source_with(&[("a.bin", b"alpha"), ("b.bin", b"bravo")]);
        let store = Arc::new(CrashingStore::new(DirectoryStore::new()));
        store.crash_at("b.bin", CrashPoint::DuringCopy { after_bytes: 2 });
        self.crashing_pass(Arc::clone(&source), store);

        let mut extra = self.restart(source).err();
        if extra.is_none() && self.target.raw_entries() != ["a.bin", "b.bin"] {
            extra = Some(format!("leftovers after restart: {:?}", self.target.raw_entries()));
        }
        if extra.is_none() && self.target.read("b.bin") != b"bravo" {
            extra = Some("b.bin content is not the full body".into());
        }

        let result = CrashRecoveryResult::check(
            "restart after crash converges",
            &["a.bin", "b.bin"],
            self.target.listing(),
            extra,
        );
        self.results.push(result.clone());
        result
    }

    /// Tests that files committed before a crash are kept, not refetched.
    pub fn test_committed_file_survives(&mut self) -> CrashRecoveryResult {
        self.reset();
        let source = self.source_with(&[("a.bin", b"alpha"), ("b.bin", b"bravo")]);
        let store = Arc::new(CrashingStore::new(DirectoryStore::new()));
        store.crash_at("b.bin", CrashPoint::BeforeCommit);
        self.crashing_pass(Arc::clone(&source), store);

        let committed = self.target.listing();
        // A changed source body must not reach a file that is already present
        self.target.source("a.bin", b"changed");
        let mut extra = self.restart(source).err();
        if extra.is_none() && self.target.read("a.bin") != b"alpha" {
            extra = Some("a.bin was downloaded again".into());
        }
        if extra.is_none() && committed != ["a.bin"] {
            extra = Some(format!("visible after crash: {committed:?}"));
        }

        let result = CrashRecoveryResult::check(
            "committed file survives a crash",
            &["a.bin", "b.bin"],
            self.target.listing(),
            extra,
        );
        self.results.push(result.clone());
        result
    }

    /// Runs every crash scenario.
    pub fn run_all_tests(&mut self) -> Vec<CrashRecoveryResult> {
        vec![
            self.test_crash_during_copy(),
            self.test_crash_before_commit(),
            self.test_restart_converges(),
            self.test_committed_file_survives(),
        ]
    }

    /// Returns a summary of every result recorded so far.
    pub fn summary(&self) -> String {
        let passed = self.results.iter().filter(|r| r.passed).count();
        let mut out = format!("Crash recovery: {passed}/{} passed\n", self.results.len());
        for result in &self.results {
            let mark = if result.passed { "PASS" } else { "FAIL" };
            out.push_str(&format!("  [{mark}] {}", result.description));
            if let Some(error) = &result.error {
                out.push_str(&format!(" ({error})"));
            }
            out.push('\n');
        }
        out
    }

    /// Returns true if every recorded result passed.
    pub fn all_passed(&self) -> bool {
        self.results.iter().all(|r| r.passed)
    }
}

impl Default for CrashRecoveryHarness {
    fn default() -> Self {
        Self::new()
    }
}
