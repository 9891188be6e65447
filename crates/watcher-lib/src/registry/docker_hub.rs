//! Docker Hub v1 repository tags
//!
//! e.g. `https://registry.hub.docker.com/v1/repositories/library/nginx/tags`

use serde::{Deserialize, Serialize};

/// One entry of the v1 tags array
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DockerHubTag {
    #[serde(default)]
    pub layer: String,
    pub name: String,
}

/// Listing URL for a Docker Hub repository
pub(crate) fn tags_url(base: &str, repository: &str) -> String {
    format!(
        "{}/v1/repositories/{}/tags",
        base.trim_end_matches('/'),
        repository
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tags_url() {
        assert_eq!(
            tags_url("https://registry.hub.docker.com/", "acme/webapp"),
            "https://registry.hub.docker.com/v1/repositories/acme/webapp/tags"
        );
    }
}
