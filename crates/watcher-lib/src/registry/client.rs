//! HTTP tag source covering all supported registries

use super::{docker_hub, split_host, v2, TagListing, TagSource, UpgradeCandidate};
use crate::error::RegistryFetchError;
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, warn};

/// Default Docker Hub endpoint for v1 listings
pub const DEFAULT_DOCKER_HUB_URL: &str = "https://registry.hub.docker.com";

/// Base URLs used to reach registries
#[derive(Debug, Clone)]
pub struct RegistryEndpoints {
    /// Base for Docker Hub v1 listings
    pub docker_hub: String,
    /// Base for all v2 listings. `None` means `https://{host}` of the
    /// repository reference.
    pub v2_override: Option<String>,
}

impl Default for RegistryEndpoints {
    fn default() -> Self {
        Self {
            docker_hub: DEFAULT_DOCKER_HUB_URL.to_string(),
            v2_override: None,
        }
    }
}

impl RegistryEndpoints {
    /// Listing URL for a repository in the given format
    pub fn tags_url(&self, listing: &TagListing, repository: &str) -> String {
        match listing {
            TagListing::DockerHubV1 => docker_hub::tags_url(&self.docker_hub, repository),
            TagListing::GcrV2 | TagListing::GenericV2 => {
                let (host, path) = split_host(repository);
                match &self.v2_override {
                    Some(base) => v2::tags_url(base, path),
                    None => v2::tags_url(&format!("https://{}", host), path),
                }
            }
        }
    }
}

/// Tag source that talks to registries over HTTP
pub struct RegistryClient {
    client: Client,
    endpoints: RegistryEndpoints,
}

impl RegistryClient {
    /// Create a client with the given per-request timeout
    pub fn new(endpoints: RegistryEndpoints, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client, endpoints })
    }

    pub fn endpoints(&self) -> &RegistryEndpoints {
        &self.endpoints
    }
}

#[async_trait]
impl TagSource for RegistryClient {
    async fn fetch_tags(&self, repository: &str) -> Result<Vec<UpgradeCandidate>, RegistryFetchError> {
        let listing = TagListing::for_repository(repository);
        let url = self.endpoints.tags_url(&listing, repository);
        debug!(repository = %repository, url = %url, listing = ?listing, "Fetching tag list");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|source| RegistryFetchError::Request {
                url: url.clone(),
                source,
            })?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            warn!(status = status.as_u16(), url = %url, "Bad status code from registry");
            return Err(RegistryFetchError::Status {
                url,
                status: status.as_u16(),
            });
        }

        let body = response
            .bytes()
            .await
            .map_err(|source| RegistryFetchError::Request {
                url: url.clone(),
                source,
            })?;

        let tags = listing
            .decode(&body)
            .map_err(|source| RegistryFetchError::Decode { url, source })?;

        Ok(tags.into_iter().map(UpgradeCandidate::new).collect())
    }
}
