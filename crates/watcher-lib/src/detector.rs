//! Upgrade detection
//!
//! Looks up the tag list of every group's repository and keeps only the
//! results that have at least one upgrade available.

use crate::error::DetectionError;
use crate::models::GroupedResults;
use crate::registry::TagSource;
use crate::version::VersionPolicy;
use std::sync::Arc;
use tracing::{debug, warn};

/// Outcome counters of one detection pass
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DetectionStats {
    pub repositories_queried: usize,
    pub repositories_failed: usize,
    pub upgrades_found: usize,
}

impl DetectionStats {
    /// `AllSourcesFailed` when every queried repository failed
    pub fn failure(&self) -> Option<DetectionError> {
        (self.repositories_queried > 0 && self.repositories_failed == self.repositories_queried)
            .then_some(DetectionError::AllSourcesFailed {
                attempted: self.repositories_queried,
            })
    }
}

/// Matches deployed versions against upstream tags
pub struct UpgradeDetector {
    source: Arc<dyn TagSource>,
    policy: VersionPolicy,
}

impl UpgradeDetector {
    pub fn new(source: Arc<dyn TagSource>, policy: VersionPolicy) -> Self {
        Self { source, policy }
    }

    pub fn policy(&self) -> &VersionPolicy {
        &self.policy
    }

    /// Attach upgrade tags to every result and drop results without any.
    /// Groups whose repository cannot be listed are skipped.
    pub async fn detect(&self, results: GroupedResults) -> GroupedResults {
        self.detect_with_stats(results).await.0
    }

    /// Same as [`detect`](Self::detect), also returning counters
    pub async fn detect_with_stats(
        &self,
        results: GroupedResults,
    ) -> (GroupedResults, DetectionStats) {
        let mut upgrades = GroupedResults::new();
        let mut stats = DetectionStats::default();

        for (key, group) in results {
            let repository = key.repository().to_string();
            stats.repositories_queried += 1;

            let candidates = match self.source.fetch_tags(&repository).await {
                Ok(candidates) => candidates,
                Err(e) => {
                    stats.repositories_failed += 1;
                    warn!(
                        repository = %repository,
                        group = %key,
                        error = %e,
                        "Failed to fetch tags, skipping group this cycle"
                    );
                    continue;
                }
            };

            let mut with_upgrades = Vec::new();
            for mut result in group {
                for candidate in &candidates {
                    if self
                        .policy
                        .is_upgrade(&repository, &result.version, &candidate.name)
                    {
                        result.upgrades.push(candidate.name.clone());
                    }
                }
                if !result.upgrades.is_empty() {
                    stats.upgrades_found += result.upgrades.len();
                    with_upgrades.push(result);
                }
            }

            if with_upgrades.is_empty() {
                debug!(group = %key, "No upgrades available");
            } else {
                upgrades.insert(key, with_upgrades);
            }
        }

        (upgrades, stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RegistryFetchError;
    use crate::models::{GroupKey, ResultGroup};
    use crate::registry::UpgradeCandidate;
    use async_trait::async_trait;
    use std::collections::{HashMap, HashSet};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Mock tag source serving fixed tag lists
    struct MockTagSource {
        tags: HashMap<String, Vec<&'static str>>,
        call_count: AtomicUsize,
    }

    impl MockTagSource {
        fn new(tags: Vec<(&str, Vec<&'static str>)>) -> Self {
            Self {
                tags: tags
                    .into_iter()
                    .map(|(repo, tags)| (repo.to_string(), tags))
                    .collect(),
                call_count: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl TagSource for MockTagSource {
        async fn fetch_tags(
            &self,
            repository: &str,
        ) -> Result<Vec<UpgradeCandidate>, RegistryFetchError> {
            self.call_count.fetch_add(1, Ordering::SeqCst);
            match self.tags.get(repository) {
                Some(tags) => Ok(tags.iter().map(|t| UpgradeCandidate::new(*t)).collect()),
                None => Err(RegistryFetchError::Status {
                    url: format!("mock://{}", repository),
                    status: 404,
                }),
            }
        }
    }

    fn key(image: &str) -> GroupKey {
        GroupKey::new("proj", "clus", image, "pod", "ctr")
    }

    fn grouped(entries: Vec<(&str, Vec<ResultGroup>)>) -> GroupedResults {
        entries.into_iter().map(|(image, v)| (key(image), v)).collect()
    }

    #[tokio::test]
    async fn test_upgrades_attached_in_registry_order() {
        let source = Arc::new(MockTagSource::new(vec![(
            "nginx",
            vec!["1.3", "latest", "1.1", "0.9", "1.2-alpine", "1.2"],
        )]));
        let detector = UpgradeDetector::new(source, VersionPolicy::default());

        let results = grouped(vec![("nginx", vec![ResultGroup::new("nginx", "ns1", "1.0")])]);
        let upgrades = detector.detect(results).await;

        let group = &upgrades[&key("nginx")];
        assert_eq!(group.len(), 1);
        assert_eq!(group[0].upgrades, vec!["1.3", "1.1", "1.2"]);
    }

    #[tokio::test]
    async fn test_groups_without_upgrades_are_dropped() {
        let source = Arc::new(MockTagSource::new(vec![
            ("nginx", vec!["1.0", "0.9"]),
            ("redis", vec!["5.0.1"]),
        ]));
        let detector = UpgradeDetector::new(source, VersionPolicy::default());

        let results = grouped(vec![
            ("nginx", vec![ResultGroup::new("nginx", "ns1", "1.0")]),
            (
                "redis",
                vec![
                    ResultGroup::new("redis", "ns1", "5.0.0"),
                    ResultGroup::new("redis", "ns2", "5.0.1"),
                ],
            ),
        ]);
        let upgrades = detector.detect(results).await;

        assert!(!upgrades.contains_key(&key("nginx")));
        let redis = &upgrades[&key("redis")];
        assert_eq!(redis.len(), 1);
        assert_eq!(redis[0].namespace, "ns1");
    }

    #[tokio::test]
    async fn test_one_failed_repository_does_not_fail_detection() {
        let source = Arc::new(MockTagSource::new(vec![("redis", vec!["5.0.1"])]));
        let detector = UpgradeDetector::new(source.clone(), VersionPolicy::default());

        let results = grouped(vec![
            ("unreachable/image", vec![ResultGroup::new("x", "ns1", "1.0")]),
            ("redis", vec![ResultGroup::new("redis", "ns1", "5.0.0")]),
        ]);
        let (upgrades, stats) = detector.detect_with_stats(results).await;

        assert_eq!(source.call_count.load(Ordering::SeqCst), 2);
        assert_eq!(upgrades.len(), 1);
        assert_eq!(stats.repositories_failed, 1);
        assert_eq!(stats.upgrades_found, 1);
    }

    #[tokio::test]
    async fn test_all_repositories_failed() {
        let source = Arc::new(MockTagSource::new(vec![]));
        let detector = UpgradeDetector::new(source, VersionPolicy::default());

        let results = grouped(vec![("a/b", vec![ResultGroup::new("a/b", "ns1", "1.0")])]);
        let (upgrades, stats) = detector.detect_with_stats(results).await;

        assert!(upgrades.is_empty());
        assert!(matches!(
            stats.failure(),
            Some(DetectionError::AllSourcesFailed { attempted: 1 })
        ));
    }

    #[tokio::test]
    async fn test_empty_input_is_not_an_error() {
        let source = Arc::new(MockTagSource::new(vec![]));
        let detector = UpgradeDetector::new(source, VersionPolicy::default());

        let (upgrades, stats) = detector.detect_with_stats(GroupedResults::new()).await;
        assert!(upgrades.is_empty());
        assert!(stats.failure().is_none());
    }

    #[tokio::test]
    async fn test_per_image_ignore_list() {
        let image = "gcr.io/google_containers/nginx-ingress-controller";
        let source = Arc::new(MockTagSource::new(vec![(image, vec!["0.61", "0.62", "0.63"])]));
        let mut ignore = HashMap::new();
        ignore.insert(
            image.to_string(),
            HashSet::from(["0.61".to_string(), "0.62".to_string()]),
        );
        let policy = VersionPolicy::new(vec!["latest".to_string()], ignore);
        let detector = UpgradeDetector::new(source, policy);

        let results = grouped(vec![(image, vec![ResultGroup::new(image, "ns1", "0.60")])]);
        let upgrades = detector.detect(results).await;

        assert_eq!(upgrades[&key(image)][0].upgrades, vec!["0.63"]);
    }
}
