//! Scenario tests for the running controller.

use filesync_engine::MockFetcher;
use filesync_testkit::prelude::*;
use std::sync::Arc;

#[test]
fn flaky_source_converges_after_backoff() {
    let world = MemoryWorld::new();
    let mock = Arc::clone(&world.fetcher);
    let flaky = Arc::new(FlakyFetcher::new(mock));
    flaky.fail_times(&MemoryWorld::location("b.jar"), 3);
    let h = ControllerHarness::start_with(world, Arc::clone(&flaky), 1);

    h.world.publish("ns/files", &[("a.jar", b"alpha"), ("b.jar", b"bravo")]);
    h.wait_for_listing(&["a.jar", "b.jar"]);
    h.settle();

    assert_eq!(flaky.failures(), 3);
    // a.jar landed on the first pass and was never fetched again
    let opened = h.world.fetcher.opened();
    let a = MemoryWorld::location("a.jar");
    assert_eq!(opened.iter().filter(|l| **l == a).count(), 1);
    assert_eq!(h.queue.num_requeues("ns/files"), 0);

    let stats = h.shutdown();
    assert_eq!(stats.failed, 3);
    assert!(stats.succeeded >= 1);
}

#[test]
fn panicking_pass_is_retried_without_killing_workers() {
    let world = MemoryWorld::new();
    let fetcher = Arc::new(PanickingFetcher::new(Arc::clone(&world.fetcher)));
    fetcher.arm(&MemoryWorld::location("boom.jar"));
    let h = ControllerHarness::start_with(world, Arc::clone(&fetcher), 1);

    h.world.publish("ns/files", &[("boom.jar", b"x"), ("ok.jar", b"y")]);
    h.wait_until(|h| h.stats().panicked >= 2);

    fetcher.disarm(&MemoryWorld::location("boom.jar"));
    h.wait_for_listing(&["boom.jar", "ok.jar"]);

    // The same single worker keeps serving other keys
    h.world.publish("ns/other", &[("boom.jar", b"x"), ("ok.jar", b"y")]);
    h.settle();
    let stats = h.shutdown();
    assert!(stats.panicked >= 2);
    assert!(stats.last_error.unwrap_or_default().contains("panicked"));
}

#[test]
fn unavailable_source_is_retried() {
    let h = ControllerHarness::start(MemoryWorld::with_files(["old.jar"]), 2);

    h.world.source.set_available(false);
    h.world.publish("ns/files", &[("new.jar", b"n")]);
    h.wait_until(|h| h.stats().failed >= 2);
    assert_eq!(h.world.listing(), vec!["old.jar"]);

    h.world.source.set_available(true);
    h.wait_for_listing(&["new.jar"]);
    h.shutdown();
}

#[test]
fn bursts_of_changes_are_coalesced() {
    let world = MemoryWorld::new();
    let slow = Arc::new(SlowFetcher::new(
        Arc::clone(&world.fetcher),
        std::time::Duration::from_millis(20),
    ));
    let h = ControllerHarness::start_with(world, slow, 2);

    for i in 0..50 {
        let name = format!("v{i}.jar");
        h.world.publish("ns/files", &[(name.as_str(), b"x")]);
    }
    h.wait_for_listing(&["v49.jar"]);
    h.settle();

    let stats = h.shutdown();
    assert!(stats.succeeded < 50, "{} passes for 50 changes", stats.succeeded);
}

#[test]
fn mock_fetcher_is_the_default_harness_fetcher() {
    let world = MemoryWorld::new();
    let fetcher: &MockFetcher = &world.fetcher;
    fetcher.serve("mem://direct", b"d".to_vec());
    let h = ControllerHarness::start(world, 1);

    h.world.source.set("ns/files", [("direct", "mem://direct")].into_iter().collect());
    h.wait_for_listing(&["direct"]);
    assert_eq!(h.world.contents("direct"), Some(b"d".to_vec()));
    h.shutdown();
}
