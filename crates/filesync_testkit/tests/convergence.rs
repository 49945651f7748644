//! Convergence properties of the reconciliation pass.

use filesync_engine::{Reconcile, ReconcileError};
use filesync_testkit::prelude::*;
use proptest::prelude::*;
use std::collections::BTreeSet;
use std::path::Path;

fn world_for(scenario: &SyncScenario) -> MemoryWorld {
    let world = MemoryWorld::with_files(scenario.present.iter().map(String::as_str));
    let files: Vec<(&str, &[u8])> = scenario
        .desired
        .iter()
        .map(|name| (name.as_str(), name.as_bytes()))
        .collect();
    world.publish("ns/files", &files);
    world
}

fn listing_set(world: &MemoryWorld) -> BTreeSet<String> {
    world.listing().into_iter().collect()
}

proptest! {
    #![proptest_config(PropTestConfig::quick().to_proptest_config())]

    #[test]
    fn healthy_pass_converges_in_one_step(scenario in sync_scenario_strategy(10)) {
        let world = world_for(&scenario);

        world.reconciler().reconcile("ns/files").unwrap();
        prop_assert_eq!(listing_set(&world), scenario.desired.clone());
        for name in scenario.desired.difference(&scenario.present) {
            prop_assert_eq!(world.contents(name), Some(name.as_bytes().to_vec()));
        }
    }

    #[test]
    fn converged_pass_is_a_noop(scenario in sync_scenario_strategy(10)) {
        let world = world_for(&scenario);
        let reconciler = world.reconciler();
        reconciler.reconcile("ns/files").unwrap();

        let mutations = world.store.mutation_count();
        let opened = world.fetcher.opened().len();
        let outcome = reconciler.reconcile("ns/files").unwrap();

        prop_assert!(outcome.is_noop());
        prop_assert_eq!(world.store.mutation_count(), mutations);
        prop_assert_eq!(world.fetcher.opened().len(), opened);
    }

    #[test]
    fn failing_files_do_not_block_others(scenario in sync_scenario_strategy(10)) {
        let world = world_for(&scenario);
        for name in &scenario.failing {
            world.fetcher.fail(&MemoryWorld::location(name));
        }
        let reconciler = world.reconciler();

        let expected_failures = scenario.effective_failures();
        match reconciler.reconcile("ns/files") {
            Ok(_) => prop_assert!(expected_failures.is_empty()),
            Err(ReconcileError::DownloadFailure { failed }) => {
                prop_assert_eq!(failed, expected_failures);
            }
            Err(other) => prop_assert!(false, "unexpected error: {}", other),
        }
        prop_assert_eq!(listing_set(&world), scenario.expected_after_pass());

        // Retrying after the sources recover fetches only what is missing
        for name in &scenario.failing {
            world.fetcher.heal(&MemoryWorld::location(name));
        }
        let outcome = reconciler.reconcile("ns/files").unwrap();
        prop_assert_eq!(outcome.downloaded, scenario.effective_failures());
        prop_assert!(outcome.deleted.is_empty());
        prop_assert_eq!(listing_set(&world), scenario.desired.clone());
    }

    #[test]
    fn deleted_key_empties_directory(present in name_set_strategy(10)) {
        let world = MemoryWorld::with_files(present.iter().map(String::as_str));

        world.reconciler().reconcile("ns/gone").unwrap();
        prop_assert!(world.listing().is_empty());
    }

    #[test]
    fn hostile_names_never_escape_target(
        hostile in hostile_name_strategy(),
        valid in name_set_strategy(5),
    ) {
        let world = MemoryWorld::new();
        let mut files: Vec<(&str, &[u8])> = valid.iter().map(|n| (n.as_str(), b"ok".as_slice())).collect();
        files.push((hostile.as_str(), b"evil".as_slice()));
        world.publish("ns/files", &files);

        let err = world.reconciler().reconcile("ns/files").unwrap_err();
        let is_hostile_failure = matches!(
            &err,
            ReconcileError::DownloadFailure { failed } if failed == &vec![hostile.clone()]
        );
        prop_assert!(is_hostile_failure, "unexpected error: {}", err);
        prop_assert_eq!(listing_set(&world), valid.clone());
        prop_assert!(world.raw_entries().iter().all(|name| valid.contains(name)));
        prop_assert!(world.store.entries(Path::new("/memory")).is_empty());
    }
}

#[test]
fn crash_scenarios_recover() {
    let mut harness = CrashRecoveryHarness::new();
    harness.run_all_tests();
    assert!(harness.all_passed(), "{}", harness.summary());
}
