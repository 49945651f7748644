//! Controller test harness.
//!
//! Runs real dispatcher workers over in-memory collaborators, with the
//! source wired to the queue the way the binary wires its watcher.

use crate::fixtures::{fast_retry, MemoryReconciler, MemoryWorld};
use filesync_engine::{DispatchStats, Dispatcher, Fetcher, MockFetcher, WorkQueue};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// How long harness waits poll before giving up.
pub const CONVERGE_TIMEOUT: Duration = Duration::from_secs(10);

/// A running controller over a [`MemoryWorld`].
pub struct ControllerHarness<F: Fetcher + 'static = MockFetcher> {
    /// The world the controller reconciles.
    pub world: MemoryWorld,
    /// The queue fed by the source's change notifications.
    pub queue: Arc<WorkQueue<String>>,
    dispatcher: Dispatcher<MemoryReconciler<F>>,
}

impl ControllerHarness<MockFetcher> {
    /// Starts `workers` workers over `world` using its own fetcher.
    pub fn start(world: MemoryWorld, workers: usize) -> Self {
        let fetcher = Arc::clone(&world.fetcher);
        Self::start_with(world, fetcher, workers)
    }
}

impl<F: Fetcher + 'static> ControllerHarness<F> {
    /// Starts `workers` workers over `world`, fetching through `fetcher`.
    pub fn start_with(world: MemoryWorld, fetcher: Arc<F>, workers: usize) -> Self {
        let queue = Arc::new(WorkQueue::new(fast_retry()));
        world.source.subscribe(queue.clone());
        let dispatcher = Dispatcher::new(world.reconciler_with(fetcher), Arc::clone(&queue), workers);
        dispatcher.start().expect("Failed to start dispatcher");
        Self {
            world,
            queue,
            dispatcher,
        }
    }

    /// Returns the dispatcher statistics.
    pub fn stats(&self) -> DispatchStats {
        self.dispatcher.stats()
    }

    /// Waits until the target directory holds exactly `expected`.
    pub fn wait_for_listing(&self, expected: &[&str]) {
        let expected: BTreeSet<String> = expected.iter().map(|s| s.to_string()).collect();
        self.wait_until(|h| h.world.listing().into_iter().collect::<BTreeSet<_>>() == expected);
    }

    /// Waits until `condition` holds, panicking after [`CONVERGE_TIMEOUT`].
    pub fn wait_until(&self, mut condition: impl FnMut(&Self) -> bool) {
        let deadline = Instant::now() + CONVERGE_TIMEOUT;
        while !condition(self) {
            assert!(
                Instant::now() < deadline,
                "condition not reached; listing {:?}, stats {:?}",
                self.world.listing(),
                self.stats()
            );
            thread::sleep(Duration::from_millis(2));
        }
    }

    /// Waits until every queued key has been processed.
    pub fn settle(&self) {
        self.wait_until(|h| h.queue.is_empty() && h.queue.processing_len() == 0);
    }

    /// Stops the workers gracefully and returns the final statistics.
    pub fn shutdown(self) -> DispatchStats {
        self.dispatcher.shutdown();
        self.dispatcher.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_harness_follows_changes() {
        let h = ControllerHarness::start(MemoryWorld::with_files(["stale"]), 2);

        h.world.publish("ns/files", &[("a", b"1"), ("b", b"2")]);
        h.wait_for_listing(&["a", "b"]);

        h.world.publish("ns/files", &[("b", b"2")]);
        h.wait_for_listing(&["b"]);

        h.world.source.remove("ns/files");
        h.wait_for_listing(&[]);

        let stats = h.shutdown();
        assert!(stats.succeeded >= 3);
        assert_eq!(stats.failed, 0);
    }
}
