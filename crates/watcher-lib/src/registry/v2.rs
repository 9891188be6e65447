//! Registry v2 `tags/list` responses

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Plain v2 tag list
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct V2TagList {
    #[serde(default)]
    pub name: String,
    pub tags: Option<Vec<String>>,
}

impl V2TagList {
    pub fn into_tags(self) -> Vec<String> {
        self.tags.unwrap_or_default()
    }
}

/// gcr.io tag list, which carries per-digest manifest metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GcrTagList {
    #[serde(default)]
    pub child: Vec<String>,
    #[serde(default)]
    pub manifest: HashMap<String, GcrManifest>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GcrManifest {
    #[serde(default)]
    pub image_size_bytes: String,
    #[serde(default)]
    pub layer_id: String,
    #[serde(default)]
    pub media_type: String,
    #[serde(default)]
    pub tag: Vec<String>,
    #[serde(default)]
    pub time_created_ms: String,
    #[serde(default)]
    pub time_uploaded_ms: String,
}

/// Listing URL for a v2 repository path under `base`
pub(crate) fn tags_url(base: &str, path: &str) -> String {
    format!("{}/v2/{}/tags/list", base.trim_end_matches('/'), path)
}
