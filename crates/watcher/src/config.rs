//! Watcher configuration
//!
//! Read from an optional file (path in `TAGWATCH_CONFIG`) overlaid with
//! `TAGWATCH_*` environment variables.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::time::Duration;
use watcher_lib::error::IssueTrackerError;
use watcher_lib::identity::DEFAULT_METADATA_ENDPOINT;
use watcher_lib::registry::{RegistryEndpoints, DEFAULT_DOCKER_HUB_URL};
use watcher_lib::snapshot::WorkloadFilter;
use watcher_lib::tracker::JiraParams;
use watcher_lib::{AlertSchedule, AlertTimeZone, VersionPolicy};

const DEFAULT_CONFIG_PATH: &str = "/etc/tag-watcher/config";
const ENV_PREFIX: &str = "TAGWATCH";

#[derive(Debug, Clone, Deserialize)]
pub struct WatcherConfig {
    /// Port for /healthz, /readyz and /metrics
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// Alert schedule, `DAY|HHMM` or `HHMM`
    #[serde(default)]
    pub schedule: String,

    /// IANA zone name, `UTC` or `Local`
    #[serde(default)]
    pub timezone: String,

    #[serde(default)]
    pub slack_webhook_url: Option<String>,

    #[serde(default)]
    pub jira_url: Option<String>,

    /// `user|pass|project|issueType|field:value,field:value`
    #[serde(default)]
    pub jira_params: Option<String>,

    /// Comma-separated namespaces to skip
    #[serde(default = "default_ignore_namespaces")]
    pub ignore_namespaces: String,

    /// Comma-separated pod phases to inspect
    #[serde(default = "default_allowed_phases")]
    pub allowed_phases: String,

    /// Comma-separated tags never treated as upgrades
    #[serde(default = "default_ignore_tags")]
    pub ignore_tags: String,

    /// Per-image ignored tags, `image=tag,tag;image=tag`
    #[serde(default)]
    pub ignore_images: String,

    #[serde(default)]
    pub project_name: Option<String>,

    #[serde(default)]
    pub cluster_name: Option<String>,

    #[serde(default = "default_metadata_endpoint")]
    pub metadata_endpoint: String,

    #[serde(default = "default_docker_hub_url")]
    pub docker_hub_url: String,

    /// Base URL for all v2 registry listings instead of `https://{host}`
    #[serde(default)]
    pub registry_v2_url: Option<String>,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_api_port() -> u16 {
    8080
}

fn default_ignore_namespaces() -> String {
    "kube-system".to_string()
}

fn default_allowed_phases() -> String {
    "Running".to_string()
}

fn default_ignore_tags() -> String {
    "latest".to_string()
}

fn default_metadata_endpoint() -> String {
    DEFAULT_METADATA_ENDPOINT.to_string()
}

fn default_docker_hub_url() -> String {
    DEFAULT_DOCKER_HUB_URL.to_string()
}

fn default_request_timeout() -> u64 {
    30
}

fn split_list(raw: &str) -> HashSet<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value.clone().filter(|v| !v.trim().is_empty())
}

impl WatcherConfig {
    /// Load configuration from the default file location and environment
    pub fn load() -> Result<Self> {
        let path = std::env::var(format!("{}_CONFIG", ENV_PREFIX))
            .unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::load_from(&path)
    }

    pub fn load_from(path: &str) -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(config::Environment::with_prefix(ENV_PREFIX))
            .build()
            .with_context(|| format!("Failed to read configuration from {}", path))?;

        config
            .try_deserialize()
            .context("Invalid watcher configuration")
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn alert_schedule(&self) -> AlertSchedule {
        AlertSchedule::parse(&self.schedule)
    }

    pub fn alert_timezone(&self) -> AlertTimeZone {
        AlertTimeZone::from_name(&self.timezone)
    }

    pub fn version_policy(&self) -> VersionPolicy {
        VersionPolicy::new(
            split_list(&self.ignore_tags),
            VersionPolicy::parse_ignore_images(&self.ignore_images),
        )
    }

    pub fn workload_filter(&self) -> WorkloadFilter {
        WorkloadFilter {
            ignore_namespaces: split_list(&self.ignore_namespaces),
            allowed_phases: split_list(&self.allowed_phases),
        }
    }

    pub fn registry_endpoints(&self) -> RegistryEndpoints {
        RegistryEndpoints {
            docker_hub: self.docker_hub_url.trim_end_matches('/').to_string(),
            v2_override: non_empty(&self.registry_v2_url)
                .map(|url| url.trim_end_matches('/').to_string()),
        }
    }

    pub fn slack_webhook(&self) -> Option<String> {
        non_empty(&self.slack_webhook_url)
    }

    /// Issue tracker URL and parameters, when both are configured
    pub fn jira(&self) -> Option<(String, Result<JiraParams, IssueTrackerError>)> {
        let url = non_empty(&self.jira_url)?;
        let params = non_empty(&self.jira_params)?;
        Some((url, JiraParams::parse(&params)))
    }
}
