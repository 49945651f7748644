//! Desired/actual diff.

use crate::source::DesiredState;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

/// What one pass has to do to make the directory match the desired state.
///
/// Only presence is compared: a name present on both sides is left alone
/// even if its source location changed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Plan {
    /// Desired names missing from the directory, with their source locations.
    pub to_download: BTreeMap<String, String>,
    /// Present names that are no longer desired.
    pub to_delete: Vec<String>,
    /// Present entries whose names are not valid UTF-8, in lossy form.
    ///
    /// No desired name can match them, so they are always removed.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub to_purge: Vec<String>,
}

impl Plan {
    /// Computes the plan for `desired` against the names currently present.
    pub fn compute<'a>(desired: &DesiredState, actual: impl IntoIterator<Item = &'a str>) -> Self {
        let actual: BTreeSet<&str> = actual.into_iter().collect();

        let to_delete = actual
            .iter()
            .filter(|name| !desired.contains(name))
            .map(|name| (*name).to_string())
            .collect();

        let to_download = desired
            .iter()
            .filter(|(name, _)| !actual.contains(name.as_str()))
            .map(|(name, location)| (name.clone(), location.clone()))
            .collect();

        Self {
            to_download,
            to_delete,
            to_purge: Vec::new(),
        }
    }

    /// Adds entries whose names are not valid UTF-8.
    pub fn with_undecodable(mut self, names: Vec<String>) -> Self {
        self.to_purge = names;
        self
    }

    /// Returns true if the directory already matches.
    pub fn is_empty(&self) -> bool {
        self.to_download.is_empty() && self.to_delete.is_empty() && self.to_purge.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn desired(pairs: &[(&str, &str)]) -> DesiredState {
        pairs.iter().copied().collect()
    }

    #[test]
    fn replaces_unwanted_with_missing() {
        let plan = Plan::compute(&desired(&[("a", "url1"), ("b", "url2")]), ["c"]);

        assert_eq!(plan.to_delete, vec!["c".to_string()]);
        assert_eq!(plan.to_download.len(), 2);
        assert_eq!(plan.to_download["a"], "url1");
        assert_eq!(plan.to_download["b"], "url2");
    }

    #[test]
    fn present_file_is_untouched_even_if_location_changed() {
        let plan = Plan::compute(&desired(&[("a", "url-new")]), ["a"]);
        assert!(plan.is_empty());
    }

    #[test]
    fn empty_desired_deletes_everything() {
        let plan = Plan::compute(&DesiredState::new(), ["x", "y"]);
        assert_eq!(plan.to_delete, vec!["x".to_string(), "y".to_string()]);
        assert!(plan.to_download.is_empty());
    }

    #[test]
    fn empty_directory_downloads_everything() {
        let plan = Plan::compute(&desired(&[("a", "u")]), std::iter::empty());
        assert_eq!(plan.to_download.len(), 1);
        assert!(plan.to_delete.is_empty());
    }

    #[test]
    fn undecodable_entries_make_the_plan_non_empty() {
        let plan = Plan::compute(&desired(&[("a", "u")]), ["a"]);
        assert!(plan.is_empty());

        let plan = plan.with_undecodable(vec!["bad-\u{fffd}".to_string()]);
        assert!(!plan.is_empty());
        assert_eq!(plan.to_purge, vec!["bad-\u{fffd}".to_string()]);
    }

    #[test]
    fn duplicate_listing_entries_are_harmless() {
        let plan = Plan::compute(&DesiredState::new(), ["x", "x"]);
        assert_eq!(plan.to_delete, vec!["x".to_string()]);
    }
}
