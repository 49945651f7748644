//! Stress tests for the work queue and dispatcher.
//!
//! These tests verify behavior under bursts of change notifications
//! and concurrent workers.

use crate::fixtures::{fast_retry, MemoryWorld};
use crate::integration::ControllerHarness;
use filesync_engine::{
    DesiredState, Dispatcher, Reconcile, ReconcileOutcome, ReconcileResult, WorkQueue,
};
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Result of a stress test run.
#[derive(Debug, Clone)]
pub struct StressTestResult {
    /// Total passes performed.
    pub total_ops: usize,
    /// Passes that completed without violating an invariant.
    pub successful_ops: usize,
    /// Invariant violations observed.
    pub failed_ops: usize,
    /// Total duration.
    pub duration: Duration,
    /// Passes per second.
    pub ops_per_second: f64,
}

impl StressTestResult {
    /// Creates a new result.
    pub fn new(successful: usize, failed: usize, duration: Duration) -> Self {
        let total = successful + failed;
        let ops_per_second = if duration.as_secs_f64() > 0.0 {
            total as f64 / duration.as_secs_f64()
        } else {
            0.0
        };

        Self {
            total_ops: total,
            successful_ops: successful,
            failed_ops: failed,
            duration,
            ops_per_second,
        }
    }

    /// Prints a summary of the test.
    pub fn print_summary(&self, name: &str) {
        println!("\n=== {} ===", name);
        println!("Total passes: {}", self.total_ops);
        println!("Successful: {}", self.successful_ops);
        println!("Violations: {}", self.failed_ops);
        println!("Duration: {:?}", self.duration);
        println!("Throughput: {:.2} passes/sec", self.ops_per_second);
    }
}

/// Configuration for stress tests.
#[derive(Debug, Clone)]
pub struct StressConfig {
    /// Number of distinct keys.
    pub keys: usize,
    /// Change notifications per producer thread.
    pub changes: usize,
    /// Number of producer threads.
    pub producers: usize,
    /// Number of workers.
    pub workers: usize,
    /// Time each pass takes.
    pub pass_time: Duration,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            keys: 16,
            changes: 500,
            producers: 4,
            workers: 4,
            pass_time: Duration::from_micros(200),
        }
    }
}

/// A reconciler that records passes and detects concurrent passes of one key.
#[derive(Default)]
pub struct ExclusivityProbe {
    in_flight: Mutex<HashSet<String>>,
    passes: Mutex<HashMap<String, u64>>,
    violations: AtomicU64,
    pass_time: Duration,
}

impl ExclusivityProbe {
    /// Creates a probe whose passes take `pass_time`.
    pub fn new(pass_time: Duration) -> Self {
        Self {
            pass_time,
            ..Self::default()
        }
    }

    /// Returns the number of passes per key.
    pub fn passes(&self) -> HashMap<String, u64> {
        self.passes.lock().clone()
    }

    /// Returns how often a key was reconciled while already in flight.
    pub fn violations(&self) -> u64 {
        self.violations.load(Ordering::SeqCst)
    }
}

impl Reconcile for ExclusivityProbe {
    fn reconcile(&self, key: &str) -> ReconcileResult<ReconcileOutcome> {
        if !self.in_flight.lock().insert(key.to_string()) {
            self.violations.fetch_add(1, Ordering::SeqCst);
        }
        thread::sleep(self.pass_time);
        *self.passes.lock().entry(key.to_string()).or_insert(0) += 1;
        self.in_flight.lock().remove(key);
        Ok(ReconcileOutcome::default())
    }
}

fn wait_for_drain(queue: &WorkQueue<String>) {
    let deadline = Instant::now() + Duration::from_secs(30);
    while !(queue.is_empty() && queue.processing_len() == 0 && queue.delayed_len() == 0) {
        assert!(Instant::now() < deadline, "queue did not drain");
        thread::sleep(Duration::from_millis(1));
    }
}

/// Floods the queue with changes for many keys from several threads.
///
/// Violations count keys reconciled by two workers at once and keys never
/// reconciled after their last change.
pub fn stress_change_storm(config: &StressConfig) -> StressTestResult {
    let queue = Arc::new(WorkQueue::new(fast_retry()));
    let probe = Arc::new(ExclusivityProbe::new(config.pass_time));
    let dispatcher = Dispatcher::new(Arc::clone(&probe), Arc::clone(&queue), config.workers);
    dispatcher.start().expect("Failed to start dispatcher");

    let start = Instant::now();
    let handles: Vec<_> = (0..config.producers)
        .map(|t| {
            let queue = Arc::clone(&queue);
            let keys = config.keys;
            let changes = config.changes;
            thread::spawn(move || {
                for i in 0..changes {
                    queue.add(format!("key-{}", (t * changes + i) % keys));
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("Producer panicked");
    }
    wait_for_drain(&queue);
    let duration = start.elapsed();
    dispatcher.shutdown();

    let passes = probe.passes();
    let produced = config.keys.min(config.producers * config.changes);
    let missing = produced.saturating_sub(passes.len());
    let total: u64 = passes.values().sum();
    let violations = probe.violations() as usize + missing;

    StressTestResult::new((total as usize).saturating_sub(violations), violations, duration)
}

/// Republishes one key many times while workers reconcile it.
///
/// The directory must end up holding exactly the last published mapping,
/// in far fewer passes than there were changes.
pub fn stress_single_key_churn(config: &StressConfig) -> StressTestResult {
    let harness = ControllerHarness::start(MemoryWorld::new(), config.workers);

    let start = Instant::now();
    let mut last = DesiredState::new();
    for i in 0..config.changes {
        let names: Vec<String> = (0..4).map(|j| format!("v{}-{j}.bin", i % 7)).collect();
        let files: Vec<(&str, &[u8])> = names.iter().map(|n| (n.as_str(), n.as_bytes())).collect();
        last = harness.world.publish("churn/files", &files);
    }

    let expected: BTreeSet<String> = last.iter().map(|(name, _)| name.clone()).collect();
    harness.wait_until(|h| h.world.listing().into_iter().collect::<BTreeSet<_>>() == expected);
    harness.settle();
    let duration = start.elapsed();

    let stats = harness.shutdown();
    StressTestResult::new(stats.succeeded as usize, stats.failed as usize, duration)
}
