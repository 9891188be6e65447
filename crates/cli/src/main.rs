//! Tag Watcher CLI
//!
//! Operator tooling for checking version comparisons, registry tag lists
//! and alert windows, and for running one detection pass by hand.

mod commands;
mod output;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use commands::{compare, scan, tags, window};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use watcher_lib::identity::{ClusterIdentity, UNKNOWN};
use watcher_lib::registry::{RegistryClient, RegistryEndpoints, DEFAULT_DOCKER_HUB_URL};
use watcher_lib::snapshot::WorkloadFilter;
use watcher_lib::{UpgradeDetector, VersionPolicy};

/// Tag Watcher CLI
#[derive(Parser)]
#[command(name = "twctl")]
#[command(author, version, about = "CLI for Tag Watcher", long_about = None)]
pub struct Cli {
    /// Output format
    #[arg(long, short, global = true, default_value = "table")]
    pub format: output::OutputFormat,

    /// Comma-separated tags never treated as upgrades
    #[arg(long, global = true, env = "TAGWATCH_IGNORE_TAGS", default_value = "latest")]
    pub ignore_tags: String,

    /// Per-image ignored tags, `image=tag,tag;image=tag`
    #[arg(long, global = true, env = "TAGWATCH_IGNORE_IMAGES", default_value = "")]
    pub ignore_images: String,

    #[command(subcommand)]
    pub command: Commands,
}

/// Registry connection settings
#[derive(clap::Args)]
pub struct RegistryArgs {
    /// Docker Hub base URL
    #[arg(long, env = "TAGWATCH_DOCKER_HUB_URL", default_value = DEFAULT_DOCKER_HUB_URL)]
    pub docker_hub_url: String,

    /// Base URL for v2 registry listings instead of https://{host}
    #[arg(long, env = "TAGWATCH_REGISTRY_V2_URL")]
    pub registry_v2_url: Option<String>,

    /// Per-request timeout in seconds
    #[arg(long, env = "TAGWATCH_REQUEST_TIMEOUT_SECS", default_value_t = 30)]
    pub timeout_secs: u64,
}

impl RegistryArgs {
    fn client(&self) -> Result<RegistryClient> {
        let endpoints = RegistryEndpoints {
            docker_hub: self.docker_hub_url.trim_end_matches('/').to_string(),
            v2_override: self
                .registry_v2_url
                .as_deref()
                .filter(|url| !url.is_empty())
                .map(|url| url.trim_end_matches('/').to_string()),
        };
        RegistryClient::new(endpoints, Duration::from_secs(self.timeout_secs))
            .context("Failed to create registry client")
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Check whether one tag is an upgrade over another
    Compare {
        /// Deployed tag
        current: String,
        /// Candidate tag
        candidate: String,
    },

    /// List registry tags for an image and mark the upgrades
    Tags {
        /// Image reference with tag, e.g. nginx:1.25
        image: String,

        #[command(flatten)]
        registry: RegistryArgs,
    },

    /// Evaluate an alert schedule
    Window {
        /// Schedule, DAY|HHMM or HHMM
        schedule: String,

        /// IANA zone name, UTC or Local
        #[arg(long, env = "TAGWATCH_TIMEZONE", default_value = "")]
        timezone: String,

        /// Evaluate at this RFC 3339 instant instead of now
        #[arg(long)]
        at: Option<String>,
    },

    /// Detect upgrades in the current kube context without notifying
    Scan {
        /// Project name used in group keys
        #[arg(long, env = "TAGWATCH_PROJECT_NAME", default_value = UNKNOWN)]
        project: String,

        /// Cluster name used in group keys
        #[arg(long, env = "TAGWATCH_CLUSTER_NAME", default_value = UNKNOWN)]
        cluster: String,

        /// Comma-separated namespaces to skip
        #[arg(long, env = "TAGWATCH_IGNORE_NAMESPACES", default_value = "kube-system")]
        ignore_namespaces: String,

        /// Comma-separated pod phases to inspect
        #[arg(long, env = "TAGWATCH_ALLOWED_PHASES", default_value = "Running")]
        allowed_phases: String,

        #[command(flatten)]
        registry: RegistryArgs,
    },
}

fn split_list(raw: &str) -> HashSet<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let policy = VersionPolicy::new(
        split_list(&cli.ignore_tags),
        VersionPolicy::parse_ignore_images(&cli.ignore_images),
    );

    match cli.command {
        Commands::Compare { current, candidate } => {
            compare::compare(&policy, &current, &candidate, cli.format)?;
        }
        Commands::Tags { image, registry } => {
            tags::show_tags(&registry.client()?, &policy, &image, cli.format).await?;
        }
        Commands::Window {
            schedule,
            timezone,
            at,
        } => {
            window::show_window(&schedule, &timezone, at.as_deref(), cli.format)?;
        }
        Commands::Scan {
            project,
            cluster,
            ignore_namespaces,
            allowed_phases,
            registry,
        } => {
            let detector = UpgradeDetector::new(Arc::new(registry.client()?), policy);
            let filter = WorkloadFilter {
                ignore_namespaces: split_list(&ignore_namespaces),
                allowed_phases: split_list(&allowed_phases),
            };
            scan::scan(
                &detector,
                &ClusterIdentity::new(project, cluster),
                &filter,
                cli.format,
            )
            .await?;
        }
    }

    Ok(())
}
