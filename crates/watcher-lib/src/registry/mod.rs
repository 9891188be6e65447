//! Tag listings from container registries
//!
//! Every registry wire format ends up as the same flat, ordered list of
//! tag names. Which format to use is decided from the repository reference
//! alone by [`TagListing::for_repository`].

mod client;
mod docker_hub;
mod v2;

pub use client::{RegistryClient, RegistryEndpoints, DEFAULT_DOCKER_HUB_URL};
pub use docker_hub::DockerHubTag;
pub use v2::{GcrTagList, V2TagList};

use crate::error::RegistryFetchError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A tag available upstream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpgradeCandidate {
    pub name: String,
}

impl UpgradeCandidate {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// Source of available tags for a repository
#[async_trait]
pub trait TagSource: Send + Sync {
    /// Fetch all tags returned by a single listing call, in registry order
    async fn fetch_tags(&self, repository: &str) -> Result<Vec<UpgradeCandidate>, RegistryFetchError>;
}

/// Registry wire format for a repository
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TagListing {
    /// `gcr.io` v2 listing with manifest metadata
    GcrV2,
    /// Plain v2 `tags/list` (quay.io, zalan.do)
    GenericV2,
    /// Docker Hub v1 repository tags
    DockerHubV1,
}

impl TagListing {
    /// Pick the listing format by substring match, in priority order
    pub fn for_repository(repository: &str) -> Self {
        if repository.contains("gcr.io") {
            TagListing::GcrV2
        } else if repository.contains("quay.io") || repository.contains("zalan.do") {
            TagListing::GenericV2
        } else {
            TagListing::DockerHubV1
        }
    }

    /// Normalize a response body to tag names
    pub fn decode(&self, body: &[u8]) -> Result<Vec<String>, serde_json::Error> {
        match self {
            TagListing::GcrV2 => Ok(serde_json::from_slice::<GcrTagList>(body)?.tags),
            TagListing::GenericV2 => Ok(serde_json::from_slice::<V2TagList>(body)?.into_tags()),
            TagListing::DockerHubV1 => Ok(serde_json::from_slice::<Vec<DockerHubTag>>(body)?
                .into_iter()
                .map(|tag| tag.name)
                .collect()),
        }
    }
}

/// Split `host/path` into its host and repository path
pub(crate) fn split_host(repository: &str) -> (&str, &str) {
    repository.split_once('/').unwrap_or((repository, ""))
}
