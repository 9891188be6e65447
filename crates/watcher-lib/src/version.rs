//! Version tag comparison
//!
//! Tags are only compared when they share a shape with the deployed
//! version: same `v` prefix, same `-suffix` and the same number of numeric
//! components. Anything else is "not an upgrade", never an error.

use serde::Serialize;
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

/// Tags that are never offered as upgrades unless configured otherwise
pub const DEFAULT_IGNORED_TAGS: &[&str] = &["latest"];

/// Structured form of a tag string
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParsedVersion {
    pub has_prefix_v: bool,
    pub numeric: Vec<u64>,
    pub suffix: String,
}

impl ParsedVersion {
    /// Parse a tag. Never fails: segments that are not integers are dropped.
    pub fn parse(tag: &str) -> Self {
        let has_prefix_v = tag.starts_with('v');

        let suffix = match tag.rfind('-') {
            Some(idx) => tag[idx + 1..].to_string(),
            None => String::new(),
        };

        let mut core = if has_prefix_v { &tag[1..] } else { tag };
        if let Some(idx) = core.rfind('-') {
            core = &core[..idx];
        }

        let numeric = core
            .split('.')
            .filter_map(|segment| segment.parse::<u64>().ok())
            .collect();

        Self {
            has_prefix_v,
            numeric,
            suffix,
        }
    }

    /// Whether two versions share prefix, suffix and arity
    pub fn is_comparable(&self, other: &Self) -> bool {
        self.has_prefix_v == other.has_prefix_v
            && self.suffix == other.suffix
            && self.numeric.len() == other.numeric.len()
    }
}

impl PartialOrd for ParsedVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        if !self.is_comparable(other) {
            return None;
        }
        Some(self.numeric.cmp(&other.numeric))
    }
}

/// Whether `candidate` is a strict upgrade over `current`, honoring only
/// the default tag ignore-set
pub fn is_upgrade(current: &str, candidate: &str) -> bool {
    if DEFAULT_IGNORED_TAGS.contains(&candidate) {
        return false;
    }
    compare_tags(current, candidate)
}

fn compare_tags(current: &str, candidate: &str) -> bool {
    let current = ParsedVersion::parse(current);
    let candidate = ParsedVersion::parse(candidate);
    matches!(candidate.partial_cmp(&current), Some(Ordering::Greater))
}

/// Ignore rules applied on top of the numeric comparison
#[derive(Debug, Clone)]
pub struct VersionPolicy {
    /// Tags never considered an upgrade for any image
    pub ignore_tags: HashSet<String>,
    /// Specific tags to skip, per image name
    pub ignore_images: HashMap<String, HashSet<String>>,
}

impl Default for VersionPolicy {
    fn default() -> Self {
        Self {
            ignore_tags: DEFAULT_IGNORED_TAGS.iter().map(|t| t.to_string()).collect(),
            ignore_images: HashMap::new(),
        }
    }
}

impl VersionPolicy {
    pub fn new(
        ignore_tags: impl IntoIterator<Item = String>,
        ignore_images: HashMap<String, HashSet<String>>,
    ) -> Self {
        Self {
            ignore_tags: ignore_tags.into_iter().collect(),
            ignore_images,
        }
    }

    /// Parse a per-image ignore list of the form `image=tag,tag;image=tag`
    pub fn parse_ignore_images(raw: &str) -> HashMap<String, HashSet<String>> {
        let mut images: HashMap<String, HashSet<String>> = HashMap::new();
        for entry in raw.split(';').map(str::trim).filter(|e| !e.is_empty()) {
            let Some((image, tags)) = entry.split_once('=') else {
                continue;
            };
            let tags = tags
                .split(',')
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(str::to_string);
            images
                .entry(image.trim().to_string())
                .or_default()
                .extend(tags);
        }
        images
    }

    /// Whether `candidate` is an upgrade over `current` for `image`
    pub fn is_upgrade(&self, image: &str, current: &str, candidate: &str) -> bool {
        if self.ignore_tags.contains(candidate) {
            return false;
        }
        if self
            .ignore_images
            .get(image)
            .is_some_and(|tags| tags.contains(candidate))
        {
            return false;
        }
        compare_tags(current, candidate)
    }
}
