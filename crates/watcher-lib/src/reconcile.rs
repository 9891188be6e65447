//! Notification reconciliation
//!
//! Remembers which `(version, namespace)` pairs have been announced per
//! group so the same upgrade is not re-announced on every poll. Inside the
//! alert window everything is sent and the memory is rebuilt from scratch.

use crate::models::{GroupKey, GroupedResults, ResultGroup};
use std::collections::{BTreeSet, HashMap};

/// Process-lifetime record of announced results
#[derive(Debug, Default, Clone)]
pub struct RegisteredImageCache {
    entries: HashMap<GroupKey, BTreeSet<String>>,
}

impl RegisteredImageCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Announced entries for a group, if any
    pub fn get(&self, key: &GroupKey) -> Option<&BTreeSet<String>> {
        self.entries.get(key)
    }

    pub fn contains(&self, key: &GroupKey, result: &ResultGroup) -> bool {
        self.entries
            .get(key)
            .is_some_and(|entries| entries.contains(&result.registration()))
    }

    /// Number of groups tracked
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Total number of announced entries across all groups
    pub fn entry_count(&self) -> usize {
        self.entries.values().map(BTreeSet::len).sum()
    }

    /// Replace the whole cache with the entries of `results`
    pub fn replace_with(&mut self, results: &GroupedResults) {
        self.entries = results
            .iter()
            .map(|(key, group)| (key.clone(), group.iter().map(ResultGroup::registration).collect()))
            .collect();
    }

    /// Record entries for a group, keeping everything already recorded
    pub fn register(&mut self, key: &GroupKey, results: &[ResultGroup]) {
        self.entries
            .entry(key.clone())
            .or_default()
            .extend(results.iter().map(ResultGroup::registration));
    }
}

/// Filter detected upgrades against what was already announced and update
/// the cache accordingly
pub fn reconcile(
    detected: GroupedResults,
    cache: &mut RegisteredImageCache,
    within_window: bool,
) -> GroupedResults {
    if within_window {
        cache.replace_with(&detected);
        return detected;
    }

    let mut filtered = GroupedResults::new();
    for (key, group) in detected {
        let fresh: Vec<ResultGroup> = if cache.get(&key).is_some() {
            group
                .into_iter()
                .filter(|result| !cache.contains(&key, result))
                .collect()
        } else {
            group
        };

        if fresh.is_empty() {
            continue;
        }
        cache.register(&key, &fresh);
        filtered.insert(key, fresh);
    }
    filtered
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(image: &str) -> GroupKey {
        GroupKey::new("proj", "clus", image, "pod", "ctr")
    }

    fn result(namespace: &str, version: &str, upgrades: &[&str]) -> ResultGroup {
        let mut result = ResultGroup::new("img", namespace, version);
        result.upgrades = upgrades.iter().map(|u| u.to_string()).collect();
        result
    }

    fn detected(entries: Vec<(&str, Vec<ResultGroup>)>) -> GroupedResults {
        entries.into_iter().map(|(image, v)| (key(image), v)).collect()
    }

    #[test]
    fn test_first_sighting_outside_window_is_sent_and_cached() {
        let mut cache = RegisteredImageCache::new();
        let input = detected(vec![("img", vec![result("ns1", "1.0", &["1.1"])])]);

        let output = reconcile(input.clone(), &mut cache, false);

        assert_eq!(output, input);
        let entries = cache.get(&key("img")).unwrap();
        assert_eq!(entries.len(), 1);
        assert!(entries.contains("1.0|ns1"));
    }

    #[test]
    fn test_cached_pair_is_dropped() {
        let mut cache = RegisteredImageCache::new();
        let input = detected(vec![("img", vec![result("ns1", "1.0", &["1.1"])])]);
        reconcile(input, &mut cache, false);

        // A newer upgrade tag does not change the cached (version, namespace)
        let next = detected(vec![("img", vec![result("ns1", "1.0", &["1.1", "1.2"])])]);
        let output = reconcile(next, &mut cache, false);

        assert!(output.is_empty());
    }

    #[test]
    fn test_reconcile_is_idempotent_outside_window() {
        let mut cache = RegisteredImageCache::new();
        let input = detected(vec![
            ("a", vec![result("ns1", "1.0", &["1.1"]), result("ns2", "2.0", &["2.1"])]),
            ("b", vec![result("ns1", "v3", &["v4"])]),
        ]);

        let first = reconcile(input.clone(), &mut cache, false);
        let second = reconcile(input.clone(), &mut cache, false);

        assert_eq!(first, input);
        assert!(second.is_empty());
    }

    #[test]
    fn test_only_new_pairs_are_emitted_and_cache_grows() {
        let mut cache = RegisteredImageCache::new();
        reconcile(
            detected(vec![("img", vec![result("ns1", "1.0", &["1.1"])])]),
            &mut cache,
            false,
        );

        let output = reconcile(
            detected(vec![(
                "img",
                vec![result("ns1", "1.0", &["1.1"]), result("ns2", "1.0", &["1.1"])],
            )]),
            &mut cache,
            false,
        );

        let group = &output[&key("img")];
        assert_eq!(group.len(), 1);
        assert_eq!(group[0].namespace, "ns2");

        let entries = cache.get(&key("img")).unwrap();
        assert!(entries.contains("1.0|ns1"));
        assert!(entries.contains("1.0|ns2"));
    }

    #[test]
    fn test_outside_window_never_removes_entries() {
        let mut cache = RegisteredImageCache::new();
        reconcile(
            detected(vec![("a", vec![result("ns1", "1.0", &["1.1"])])]),
            &mut cache,
            false,
        );
        reconcile(
            detected(vec![("b", vec![result("ns1", "2.0", &["2.1"])])]),
            &mut cache,
            false,
        );

        assert_eq!(cache.len(), 2);
        assert!(cache.get(&key("a")).unwrap().contains("1.0|ns1"));
    }

    #[test]
    fn test_within_window_sends_everything_and_replaces_cache() {
        let mut cache = RegisteredImageCache::new();
        reconcile(
            detected(vec![("old", vec![result("ns1", "1.0", &["1.1"])])]),
            &mut cache,
            false,
        );

        let input = detected(vec![("img", vec![result("ns1", "1.0", &["1.1"])])]);
        reconcile(input.clone(), &mut cache, false);

        let output = reconcile(input.clone(), &mut cache, true);

        assert_eq!(output, input);
        assert_eq!(cache.len(), 1);
        assert!(cache.get(&key("old")).is_none());
        let entries = cache.get(&key("img")).unwrap();
        assert_eq!(entries.iter().collect::<Vec<_>>(), vec!["1.0|ns1"]);
    }

    #[test]
    fn test_empty_detection_within_window_clears_cache() {
        let mut cache = RegisteredImageCache::new();
        reconcile(
            detected(vec![("img", vec![result("ns1", "1.0", &["1.1"])])]),
            &mut cache,
            false,
        );

        let output = reconcile(GroupedResults::new(), &mut cache, true);

        assert!(output.is_empty());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_matching_is_exact() {
        let mut cache = RegisteredImageCache::new();
        reconcile(
            detected(vec![("img", vec![result("ns1", "1.0", &["1.1"])])]),
            &mut cache,
            false,
        );

        let output = reconcile(
            detected(vec![("img", vec![result("NS1", "1.0", &["1.1"])])]),
            &mut cache,
            false,
        );
        assert_eq!(output[&key("img")].len(), 1);
        assert_eq!(cache.entry_count(), 2);
    }
}
