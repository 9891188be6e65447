//! Project and cluster names used in group keys
//!
//! Explicit configuration wins. Otherwise the GCE metadata server is asked,
//! and anything that fails there becomes `UNK`.

use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

/// Placeholder when a name cannot be determined
pub const UNKNOWN: &str = "UNK";

/// Default metadata server base URL
pub const DEFAULT_METADATA_ENDPOINT: &str = "http://metadata/computeMetadata/v1/";

const PROJECT_PATH: &str = "project/project-id";
const CLUSTER_PATH: &str = "instance/attributes/cluster-name";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterIdentity {
    pub project: String,
    pub cluster: String,
}

impl ClusterIdentity {
    pub fn new(project: impl Into<String>, cluster: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            cluster: cluster.into(),
        }
    }

    pub fn unknown() -> Self {
        Self::new(UNKNOWN, UNKNOWN)
    }

    /// Resolve both names, consulting the metadata server only for the ones
    /// not given explicitly
    pub async fn resolve(
        project: Option<String>,
        cluster: Option<String>,
        metadata: &MetadataClient,
    ) -> Self {
        let project = match project {
            Some(p) => p,
            None => metadata.get_or_unknown(PROJECT_PATH).await,
        };
        let cluster = match cluster {
            Some(c) => c,
            None => metadata.get_or_unknown(CLUSTER_PATH).await,
        };
        Self { project, cluster }
    }
}

/// Minimal client for the compute metadata server
pub struct MetadataClient {
    client: Client,
    endpoint: String,
}

impl MetadataClient {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        Ok(Self {
            client: Client::builder().timeout(timeout).build()?,
            endpoint: endpoint.into(),
        })
    }

    /// Fetch one metadata value
    pub async fn get(&self, path: &str) -> Result<String, reqwest::Error> {
        let url = format!("{}/{}", self.endpoint.trim_end_matches('/'), path);
        let value = self
            .client
            .get(&url)
            .header("Metadata-Flavor", "Google")
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        debug!(path = %path, "Read compute metadata");
        Ok(value.trim().to_string())
    }

    async fn get_or_unknown(&self, path: &str) -> String {
        match self.get(path).await {
            Ok(value) if !value.is_empty() => value,
            Ok(_) => UNKNOWN.to_string(),
            Err(e) => {
                warn!(path = %path, error = %e, "Compute metadata unavailable");
                UNKNOWN.to_string()
            }
        }
    }
}
