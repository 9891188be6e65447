//! Core data models for the tag watcher

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// One container of one pod, as read from the cluster
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkloadRecord {
    pub namespace: String,
    pub pod_phase: String,
    pub pod_name: String,
    pub container_name: String,
    pub image_reference: String,
}

/// Key of a workload group tracked across cycles
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GroupKey {
    pub project: String,
    pub cluster: String,
    pub image: String,
    pub pod_template: String,
    pub container: String,
}

impl GroupKey {
    pub fn new(
        project: impl Into<String>,
        cluster: impl Into<String>,
        image: impl Into<String>,
        pod_template: impl Into<String>,
        container: impl Into<String>,
    ) -> Self {
        Self {
            project: project.into(),
            cluster: cluster.into(),
            image: image.into(),
            pod_template: pod_template.into(),
            container: container.into(),
        }
    }

    /// Repository reference used to look up available tags
    pub fn repository(&self) -> &str {
        &self.image
    }
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}:{}",
            self.project, self.cluster, self.image, self.pod_template, self.container
        )
    }
}

/// Error parsing the colon-joined key representation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidGroupKey(pub String);

impl fmt::Display for InvalidGroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid group key: {}", self.0)
    }
}

impl std::error::Error for InvalidGroupKey {}

impl FromStr for GroupKey {
    type Err = InvalidGroupKey;

    /// The image may itself contain `:` (registry port), so project and
    /// cluster are taken from the left and pod/container from the right.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || InvalidGroupKey(s.to_string());

        let mut left = s.splitn(3, ':');
        let project = left.next().ok_or_else(invalid)?;
        let cluster = left.next().ok_or_else(invalid)?;
        let rest = left.next().ok_or_else(invalid)?;

        let mut right = rest.rsplitn(3, ':');
        let container = right.next().ok_or_else(invalid)?;
        let pod_template = right.next().ok_or_else(invalid)?;
        let image = right.next().ok_or_else(invalid)?;

        Ok(Self::new(project, cluster, image, pod_template, container))
    }
}

/// Aggregated instances sharing one (namespace, version) under a group key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultGroup {
    pub name: String,
    pub namespace: String,
    pub quantity: u64,
    pub version: String,
    pub upgrades: Vec<String>,
}

impl ResultGroup {
    pub fn new(name: impl Into<String>, namespace: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            quantity: 1,
            version: version.into(),
            upgrades: Vec::new(),
        }
    }

    /// Cache entry identifying this result: `version|namespace`
    pub fn registration(&self) -> String {
        format!("{}|{}", self.version, self.namespace)
    }

    /// Upgrade list as rendered in reports, e.g. `Upgrades: 1.1, 1.2`
    pub fn upgrades_line(&self) -> String {
        format!("Upgrades: {}", self.upgrades.join(", "))
    }
}

/// Results of one cycle, ordered by group key
pub type GroupedResults = BTreeMap<GroupKey, Vec<ResultGroup>>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group_key_display() {
        let key = GroupKey::new("proj", "clus", "img", "pod", "ctr");
        assert_eq!(key.to_string(), "proj:clus:img:pod:ctr");
    }

    #[test]
    fn test_group_key_parse_roundtrip_with_port() {
        let key = GroupKey::new("proj", "clus", "localhost:5000/team/app", "app-web", "web");
        let parsed: GroupKey = key.to_string().parse().unwrap();
        assert_eq!(parsed, key);
    }

    #[test]
    fn test_group_key_parse_rejects_short_keys() {
        assert!("proj:clus:img".parse::<GroupKey>().is_err());
        assert!("proj".parse::<GroupKey>().is_err());
    }

    #[test]
    fn test_registration_string() {
        let result = ResultGroup::new("img", "ns1", "1.0");
        assert_eq!(result.registration(), "1.0|ns1");
    }

    #[test]
    fn test_upgrades_line() {
        let mut result = ResultGroup::new("img", "ns1", "1.0");
        result.upgrades = vec!["1.1".to_string(), "1.2".to_string()];
        assert_eq!(result.upgrades_line(), "Upgrades: 1.1, 1.2");
    }
}
