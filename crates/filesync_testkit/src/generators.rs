//! Property-based test generators using proptest.
//!
//! Provides strategies for desired states and directory contents that
//! respect the store's naming rules.

use filesync_engine::DesiredState;
use filesync_store::validate_name;
use proptest::prelude::*;
use std::collections::BTreeSet;

/// Strategy for generating valid file names.
pub fn file_name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z][a-z0-9_-]{0,11}(\\.(jar|bin|txt))?")
        .expect("Invalid regex")
        .prop_filter("File name must be storable", |s| validate_name(s).is_ok())
}

/// Strategy for generating names a store must refuse.
pub fn hostile_name_strategy() -> impl Strategy<Value = String> {
    prop_oneof![
        Just(String::new()),
        Just(".".to_string()),
        Just("..".to_string()),
        file_name_strategy().prop_map(|n| format!("../{n}")),
        file_name_strategy().prop_map(|n| format!("sub/{n}")),
        file_name_strategy().prop_map(|n| format!("{n}.part")),
    ]
}

/// Strategy for generating file contents.
pub fn body_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..256)
}

/// Strategy for a set of distinct file names.
pub fn name_set_strategy(max: usize) -> impl Strategy<Value = BTreeSet<String>> {
    prop::collection::btree_set(file_name_strategy(), 0..=max)
}

/// Strategy for a desired state whose locations are `mem://<name>`.
pub fn desired_state_strategy(max: usize) -> impl Strategy<Value = DesiredState> {
    name_set_strategy(max).prop_map(|names| {
        names
            .into_iter()
            .map(|name| {
                let location = format!("mem://{name}");
                (name, location)
            })
            .collect()
    })
}

/// A desired state, an initial directory and a subset of failing names.
#[derive(Debug, Clone)]
pub struct SyncScenario {
    /// Names the key wants.
    pub desired: BTreeSet<String>,
    /// Names already in the target directory.
    pub present: BTreeSet<String>,
    /// Desired names whose download fails.
    pub failing: BTreeSet<String>,
}

impl SyncScenario {
    /// Names the directory should hold after a pass.
    pub fn expected_after_pass(&self) -> BTreeSet<String> {
        self.desired
            .iter()
            .filter(|name| self.present.contains(*name) || !self.failing.contains(*name))
            .cloned()
            .collect()
    }

    /// Desired names that will actually be fetched and fail.
    pub fn effective_failures(&self) -> Vec<String> {
        self.failing
            .iter()
            .filter(|name| !self.present.contains(*name))
            .cloned()
            .collect()
    }
}

/// Strategy for generating sync scenarios.
pub fn sync_scenario_strategy(max: usize) -> impl Strategy<Value = SyncScenario> {
    (name_set_strategy(max), name_set_strategy(max))
        .prop_flat_map(|(desired, present)| {
            let candidates: Vec<String> = desired.iter().cloned().collect();
            let failing = prop::sample::subsequence(candidates.clone(), 0..=candidates.len());
            (Just(desired), Just(present), failing)
        })
        .prop_map(|(desired, present, failing)| SyncScenario {
            desired,
            present,
            failing: failing.into_iter().collect(),
        })
}

/// Configuration for property tests.
#[derive(Debug, Clone)]
pub struct PropTestConfig {
    /// Number of test cases to run.
    pub cases: u32,
    /// Maximum shrink iterations.
    pub max_shrink_iters: u32,
}

impl Default for PropTestConfig {
    fn default() -> Self {
        Self {
            cases: 256,
            max_shrink_iters: 1000,
        }
    }
}

impl PropTestConfig {
    /// Creates a configuration for quick tests.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            cases: 32,
            max_shrink_iters: 100,
        }
    }

    /// Creates a configuration for thorough tests.
    #[must_use]
    pub fn thorough() -> Self {
        Self {
            cases: 1024,
            max_shrink_iters: 10000,
        }
    }

    /// Converts to proptest config.
    #[must_use]
    pub fn to_proptest_config(&self) -> ProptestConfig {
        ProptestConfig {
            cases: self.cases,
            max_shrink_iters: self.max_shrink_iters,
            ..ProptestConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #![proptest_config(PropTestConfig::quick().to_proptest_config())]

        #[test]
        fn file_names_are_storable(name in file_name_strategy()) {
            prop_assert!(validate_name(&name).is_ok());
        }

        #[test]
        fn hostile_names_are_refused(name in hostile_name_strategy()) {
            prop_assert!(validate_name(&name).is_err());
        }

        #[test]
        fn failing_names_are_desired(scenario in sync_scenario_strategy(8)) {
            prop_assert!(scenario.failing.is_subset(&scenario.desired));
            prop_assert!(scenario.expected_after_pass().is_subset(&scenario.desired));
        }
    }
}
