//! Worker pool that feeds keys from the queue to the reconciler.

use crate::error::{EngineError, EngineResult, ReconcileError, ReconcileResult};
use crate::queue::WorkQueue;
use crate::reconciler::{Reconcile, ReconcileOutcome};
use parking_lot::{Mutex, RwLock};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;
use tracing::{error, info, warn};

/// Lifecycle of a dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatcherState {
    /// Created, workers not started.
    Idle,
    /// Workers are pulling keys.
    Running,
    /// No new keys are handed out; in-flight passes are finishing.
    Stopping,
    /// All workers have exited.
    Stopped,
}

/// Statistics about processed keys.
#[derive(Debug, Clone, Default)]
pub struct DispatchStats {
    /// Passes that succeeded.
    pub succeeded: u64,
    /// Passes that failed and were requeued with backoff.
    pub failed: u64,
    /// Failed passes that panicked.
    pub panicked: u64,
    /// Time of the last successful pass.
    pub last_success: Option<Instant>,
    /// Last error message.
    pub last_error: Option<String>,
}

/// Runs a fixed pool of workers over a shared [`WorkQueue`].
///
/// Each worker blocks for the next key, reconciles it, and reports the
/// result to the queue: success forgets the key's backoff, failure
/// requeues it with a longer delay.
///
/// # Shutdown
///
/// Shutdown is graceful: [`Dispatcher::shutdown`] stops the queue from
/// handing out keys and waits for in-flight passes to finish. Passes are
/// not aborted mid-file; network reads are bounded by the fetch timeout.
pub struct Dispatcher<R: Reconcile + 'static> {
    reconciler: Arc<R>,
    queue: Arc<WorkQueue<String>>,
    workers: usize,
    handles: Mutex<Vec<JoinHandle<()>>>,
    state: RwLock<DispatcherState>,
    stats: Arc<RwLock<DispatchStats>>,
}

impl<R: Reconcile + 'static> Dispatcher<R> {
    /// Creates a dispatcher with `workers` threads (at least one).
    pub fn new(reconciler: R, queue: Arc<WorkQueue<String>>, workers: usize) -> Self {
        Self {
            reconciler: Arc::new(reconciler),
            queue,
            workers: workers.max(1),
            handles: Mutex::new(Vec::new()),
            state: RwLock::new(DispatcherState::Idle),
            stats: Arc::new(RwLock::new(DispatchStats::default())),
        }
    }

    /// Returns the queue workers pull from.
    pub fn queue(&self) -> &Arc<WorkQueue<String>> {
        &self.queue
    }

    /// Returns the reconciler.
    pub fn reconciler(&self) -> &Arc<R> {
        &self.reconciler
    }

    /// Gets the current state.
    pub fn state(&self) -> DispatcherState {
        *self.state.read()
    }

    /// Gets the current stats.
    pub fn stats(&self) -> DispatchStats {
        self.stats.read().clone()
    }

    /// Spawns the workers.
    pub fn start(&self) -> EngineResult<()> {
        {
            let mut state = self.state.write();
            if *state != DispatcherState::Idle {
                return Err(EngineError::InvalidStateTransition {
                    from: format!("{:?}", *state),
                    to: "Running".into(),
                });
            }
            *state = DispatcherState::Running;
        }

        info!(workers = self.workers, "Starting workers");
        let mut handles = self.handles.lock();
        for id in 0..self.workers {
            let reconciler = Arc::clone(&self.reconciler);
            let queue = Arc::clone(&self.queue);
            let stats = Arc::clone(&self.stats);

            let spawned = thread::Builder::new()
                .name(format!("filesync-worker-{id}"))
                .spawn(move || loop {
                    let step = panic::catch_unwind(AssertUnwindSafe(|| {
                        process_next_item(&*reconciler, &queue, &stats)
                    }));
                    match step {
                        Ok(true) => {}
                        Ok(false) => break,
                        Err(payload) => error!(
                            panic = %panic_message(payload.as_ref()),
                            "Worker panicked while handling a result"
                        ),
                    }
                });

            match spawned {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    drop(handles);
                    self.shutdown();
                    return Err(EngineError::Spawn(e));
                }
            }
        }

        Ok(())
    }

    /// Stops dequeuing and waits for in-flight passes to finish.
    pub fn shutdown(&self) {
        {
            let mut state = self.state.write();
            if matches!(*state, DispatcherState::Stopping | DispatcherState::Stopped) {
                return;
            }
            *state = DispatcherState::Stopping;
        }

        info!("Stopping workers");
        self.queue.shut_down();

        let handles: Vec<_> = self.handles.lock().drain(..).collect();
        for handle in handles {
            if handle.join().is_err() {
                error!("Worker thread exited by panic");
            }
        }

        *self.state.write() = DispatcherState::Stopped;
        info!("Workers stopped");
    }
}

impl<R: Reconcile + 'static> Drop for Dispatcher<R> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// A key held by a worker. Dropping it hands the key back to the queue.
struct InFlight<'a> {
    queue: &'a WorkQueue<String>,
    key: String,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.queue.done(&self.key);
    }
}

/// Takes one key, reconciles it and reports back. Returns false on shutdown.
fn process_next_item<R: Reconcile + ?Sized>(
    reconciler: &R,
    queue: &WorkQueue<String>,
    stats: &RwLock<DispatchStats>,
) -> bool {
    let Some(key) = queue.get() else {
        return false;
    };
    let item = InFlight { queue, key };

    let result = run_guarded(reconciler, &item.key);
    handle_result(queue, stats, &item.key, result);
    true
}

/// Runs a pass, turning a panic into a failed pass.
fn run_guarded<R: Reconcile + ?Sized>(reconciler: &R, key: &str) -> ReconcileResult<ReconcileOutcome> {
    match panic::catch_unwind(AssertUnwindSafe(|| reconciler.reconcile(key))) {
        Ok(result) => result,
        Err(payload) => Err(ReconcileError::Panicked(panic_message(payload.as_ref()))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

fn handle_result(
    queue: &WorkQueue<String>,
    stats: &RwLock<DispatchStats>,
    key: &str,
    result: ReconcileResult<ReconcileOutcome>,
) {
    match result {
        Ok(_) => {
            queue.forget(key);
            let mut stats = stats.write();
            stats.succeeded += 1;
            stats.last_success = Some(Instant::now());
        }
        Err(e) => {
            let failures = queue.num_requeues(key) + 1;
            warn!(%key, kind = e.kind(), failures, error = %e, "Reconcile failed; retrying with backoff");
            {
                let mut stats = stats.write();
                stats.failed += 1;
                if matches!(e, ReconcileError::Panicked(_)) {
                    stats.panicked += 1;
                }
                stats.last_error = Some(e.to_string());
            }
            queue.add_rate_limited(key.to_string());
        }
    }
}
