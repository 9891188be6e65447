//! Workload snapshots
//!
//! Lists the pods running in the cluster, flattens them into one record per
//! container and aggregates the records into result groups.

use crate::error::SnapshotFetchError;
use crate::identity::ClusterIdentity;
use crate::models::{GroupKey, GroupedResults, ResultGroup, WorkloadRecord};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, ListParams};
use kube::Client;
use std::collections::HashSet;
use tracing::debug;

/// Source of the current workload list
#[async_trait]
pub trait WorkloadSource: Send + Sync {
    async fn fetch(&self) -> Result<Vec<WorkloadRecord>, SnapshotFetchError>;
}

/// Workload source backed by the Kubernetes API
pub struct KubeWorkloadSource {
    client: Client,
}

impl KubeWorkloadSource {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Connect using in-cluster config or the local kubeconfig
    pub async fn try_default() -> Result<Self, SnapshotFetchError> {
        Ok(Self::new(Client::try_default().await?))
    }
}

#[async_trait]
impl WorkloadSource for KubeWorkloadSource {
    async fn fetch(&self) -> Result<Vec<WorkloadRecord>, SnapshotFetchError> {
        let pods: Api<Pod> = Api::all(self.client.clone());
        let list = pods.list(&ListParams::default()).await?;
        debug!(pods = list.items.len(), "Fetched pod list");
        Ok(list.items.iter().flat_map(records_from_pod).collect())
    }
}

/// One record per container of a pod
pub fn records_from_pod(pod: &Pod) -> Vec<WorkloadRecord> {
    let namespace = pod.metadata.namespace.clone().unwrap_or_default();
    let pod_name = pod.metadata.name.clone().unwrap_or_default();
    let pod_phase = pod
        .status
        .as_ref()
        .and_then(|s| s.phase.clone())
        .unwrap_or_default();

    let Some(spec) = pod.spec.as_ref() else {
        return Vec::new();
    };

    spec.containers
        .iter()
        .map(|container| WorkloadRecord {
            namespace: namespace.clone(),
            pod_phase: pod_phase.clone(),
            pod_name: pod_name.clone(),
            container_name: container.name.clone(),
            image_reference: container.image.clone().unwrap_or_default(),
        })
        .collect()
}

/// Which workloads take part in detection
#[derive(Debug, Clone)]
pub struct WorkloadFilter {
    pub ignore_namespaces: HashSet<String>,
    pub allowed_phases: HashSet<String>,
}

impl Default for WorkloadFilter {
    fn default() -> Self {
        Self {
            ignore_namespaces: HashSet::from(["kube-system".to_string()]),
            allowed_phases: HashSet::from(["Running".to_string()]),
        }
    }
}

impl WorkloadFilter {
    pub fn accepts(&self, record: &WorkloadRecord) -> bool {
        !self.ignore_namespaces.contains(&record.namespace)
            && self.allowed_phases.contains(&record.pod_phase)
    }
}

/// Split an image reference into image name and tag.
///
/// The tag separator is the last `:` after the last `/`, so a registry port
/// is not mistaken for a tag. A trailing `@digest` is ignored. Returns
/// `None` when the reference has no tag.
pub fn split_image_reference(reference: &str) -> Option<(&str, &str)> {
    let reference = reference.split_once('@').map_or(reference, |(name, _)| name);
    let name_start = reference.rfind('/').map_or(0, |idx| idx + 1);
    let colon = reference[name_start..].rfind(':')? + name_start;
    Some((&reference[..colon], &reference[colon + 1..]))
}

/// Generic pod name shared by all replicas: the pod name without its last
/// two hyphen-separated segments (e.g. `web-3229788801-zl7bq` → `web`)
pub fn pod_template_name(pod_name: &str) -> String {
    let segments: Vec<&str> = pod_name.split('-').collect();
    if segments.len() <= 2 {
        return String::new();
    }
    segments[..segments.len() - 2].join("-")
}

/// Aggregate records into result groups for this cluster
pub fn group_workloads(
    records: &[WorkloadRecord],
    identity: &ClusterIdentity,
    filter: &WorkloadFilter,
) -> GroupedResults {
    let mut grouped = GroupedResults::new();

    for record in records.iter().filter(|r| filter.accepts(r)) {
        let Some((image, version)) = split_image_reference(&record.image_reference) else {
            continue;
        };

        let key = GroupKey::new(
            &identity.project,
            &identity.cluster,
            image,
            pod_template_name(&record.pod_name),
            &record.container_name,
        );

        let group = grouped.entry(key).or_default();
        match group
            .iter()
            .position(|r| r.namespace == record.namespace && r.version == version)
        {
            Some(idx) => group[idx].quantity += 1,
            None => group.push(ResultGroup::new(image, &record.namespace, version)),
        }
    }

    grouped
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{Container, PodSpec, PodStatus};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    fn record(namespace: &str, phase: &str, pod: &str, image: &str) -> WorkloadRecord {
        WorkloadRecord {
            namespace: namespace.to_string(),
            pod_phase: phase.to_string(),
            pod_name: pod.to_string(),
            container_name: "app".to_string(),
            image_reference: image.to_string(),
        }
    }

    fn identity() -> ClusterIdentity {
        ClusterIdentity::new("proj", "clus")
    }

    #[test]
    fn test_split_image_reference() {
        assert_eq!(
            split_image_reference("acme/webapp:v0.0.1-alpha"),
            Some(("acme/webapp", "v0.0.1-alpha"))
        );
        assert_eq!(
            split_image_reference("localhost:5000/team/app:1.2"),
            Some(("localhost:5000/team/app", "1.2"))
        );
        assert_eq!(split_image_reference("nginx:1.25@sha256:abc"), Some(("nginx", "1.25")));
        assert_eq!(split_image_reference("nginx"), None);
        assert_eq!(split_image_reference("localhost:5000/team/app"), None);
    }

    #[test]
    fn test_pod_template_name() {
        assert_eq!(pod_template_name("webapp-3229788801-zl7bq"), "webapp");
        assert_eq!(pod_template_name("my-web-app-3229788801-zl7bq"), "my-web-app");
        assert_eq!(pod_template_name("db-0"), "");
        assert_eq!(pod_template_name("single"), "");
    }

    #[test]
    fn test_group_workloads_filters() {
        let records = vec![
            record("kube-system", "Running", "dns-1-a", "coredns:1.0"),
            record("default", "Pending", "web-1-a", "nginx:1.0"),
            record("default", "Running", "web-1-b", "nginx"),
            record("default", "Running", "web-1-c", "nginx:1.0"),
        ];

        let grouped = group_workloads(&records, &identity(), &WorkloadFilter::default());

        assert_eq!(grouped.len(), 1);
        let (key, group) = grouped.iter().next().unwrap();
        assert_eq!(key.to_string(), "proj:clus:nginx:web:app");
        assert_eq!(group.len(), 1);
        assert_eq!(group[0].version, "1.0");
    }

    #[test]
    fn test_group_workloads_counts_instances() {
        let records = vec![
            record("ns1", "Running", "web-1-a", "nginx:1.0"),
            record("ns1", "Running", "web-1-b", "nginx:1.0"),
            record("ns2", "Running", "web-2-a", "nginx:1.0"),
            record("ns1", "Running", "web-3-a", "nginx:1.1"),
        ];

        let grouped = group_workloads(&records, &identity(), &WorkloadFilter::default());
        let group = &grouped[&GroupKey::new("proj", "clus", "nginx", "web", "app")];

        assert_eq!(group.len(), 3);
        assert_eq!(group[0].namespace, "ns1");
        assert_eq!(group[0].quantity, 2);
        assert_eq!(group[1].namespace, "ns2");
        assert_eq!(group[1].quantity, 1);
        assert_eq!(group[2].version, "1.1");
        assert!(group.iter().all(|r| r.upgrades.is_empty()));
    }

    #[test]
    fn test_records_from_pod() {
        let pod = Pod {
            metadata: ObjectMeta {
                name: Some("web-1-a".to_string()),
                namespace: Some("default".to_string()),
                ..Default::default()
            },
            spec: Some(PodSpec {
                containers: vec![
                    Container {
                        name: "web".to_string(),
                        image: Some("nginx:1.25".to_string()),
                        ..Default::default()
                    },
                    Container {
                        name: "sidecar".to_string(),
                        image: Some("envoyproxy/envoy:v1.28.0".to_string()),
                        ..Default::default()
                    },
                ],
                ..Default::default()
            }),
            status: Some(PodStatus {
                phase: Some("Running".to_string()),
                ..Default::default()
            }),
        };

        let records = records_from_pod(&pod);

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].namespace, "default");
        assert_eq!(records[0].pod_phase, "Running");
        assert_eq!(records[1].container_name, "sidecar");
        assert_eq!(records[1].image_reference, "envoyproxy/envoy:v1.28.0");
    }
}
