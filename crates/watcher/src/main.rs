//! Tag Watcher - container image upgrade detector
//!
//! Runs inside the cluster, periodically compares the image tags of
//! running pods with their registries and reports available upgrades.

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use watcher_lib::{
    api::{self, AppState},
    health::{components, HealthRegistry},
    identity::{ClusterIdentity, MetadataClient},
    notify::SlackNotifier,
    observability::{StructuredLogger, WatcherMetrics},
    registry::RegistryClient,
    snapshot::KubeWorkloadSource,
    tracker::JiraTracker,
    UpgradeDetector, WatchLoopBuilder,
};

mod config;

const WATCHER_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting tag-watcher");

    let config = config::WatcherConfig::load()?;
    let timeout = config.request_timeout();

    let health_registry = HealthRegistry::new();
    for component in [
        components::SNAPSHOT,
        components::REGISTRY,
        components::NOTIFIER,
        components::ISSUE_TRACKER,
    ] {
        health_registry.register(component).await;
    }

    let metrics = WatcherMetrics::new();

    let metadata = MetadataClient::new(&config.metadata_endpoint, timeout)
        .context("Failed to create metadata client")?;
    let identity = ClusterIdentity::resolve(
        config.project_name.clone(),
        config.cluster_name.clone(),
        &metadata,
    )
    .await;
    info!(project = %identity.project, cluster = %identity.cluster, "Watcher configured");

    let logger = StructuredLogger::new(&identity.cluster);
    let schedule = config.alert_schedule();
    let timezone = config.alert_timezone();
    logger.log_startup(WATCHER_VERSION, &schedule.to_string(), &config.timezone);

    let workloads = KubeWorkloadSource::try_default()
        .await
        .context("Failed to create Kubernetes client")?;
    let registry = RegistryClient::new(config.registry_endpoints(), timeout)
        .context("Failed to create registry client")?;
    let notifier = SlackNotifier::new(config.slack_webhook(), timeout)
        .context("Failed to create Slack notifier")?;

    let mut builder = WatchLoopBuilder::new()
        .workloads(Arc::new(workloads))
        .detector(UpgradeDetector::new(
            Arc::new(registry),
            config.version_policy(),
        ))
        .notifier(Arc::new(notifier))
        .identity(identity)
        .filter(config.workload_filter())
        .schedule(schedule)
        .timezone(timezone)
        .health(health_registry.clone());

    match config.jira() {
        Some((url, Ok(params))) => {
            let tracker = JiraTracker::new(&url, params, timeout)
                .context("Failed to create issue tracker client")?;
            info!(jira_url = %url, "Issue tracking enabled");
            builder = builder.tracker(Arc::new(tracker));
        }
        Some((_, Err(e))) => {
            warn!(error = %e, "Issue tracking disabled");
            health_registry
                .set_degraded(components::ISSUE_TRACKER, e.to_string())
                .await;
        }
        None => info!("Issue tracking not configured"),
    }

    let watch = builder.build()?;

    let app_state = Arc::new(AppState::new(health_registry.clone(), metrics));
    let api_port = config.api_port;
    tokio::spawn(async move {
        if let Err(e) = api::serve(api_port, app_state).await {
            error!(error = %e, port = api_port, "API server failed");
        }
    });

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let watch_handle = tokio::spawn(watch.run(shutdown_rx));

    health_registry.set_ready(true).await;

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    logger.log_shutdown("SIGINT received");

    let _ = shutdown_tx.send(());
    if let Err(e) = watch_handle.await {
        error!(error = %e, "Watch loop terminated abnormally");
    }

    Ok(())
}
