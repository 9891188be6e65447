//! One-off detection pass against the current kube context

use anyhow::{Context, Result};
use colored::Colorize;
use serde::Serialize;
use tabled::Tabled;
use watcher_lib::identity::ClusterIdentity;
use watcher_lib::snapshot::{group_workloads, KubeWorkloadSource, WorkloadFilter, WorkloadSource};
use watcher_lib::{GroupedResults, UpgradeDetector};

use crate::output::{color_tags, print_info, print_success, print_table, print_warning, OutputFormat};

#[derive(Tabled, Serialize)]
struct UpgradeRow {
    #[tabled(rename = "Image")]
    image: String,
    #[tabled(rename = "Pod")]
    pod: String,
    #[tabled(rename = "Container")]
    container: String,
    #[tabled(rename = "Namespace")]
    namespace: String,
    #[tabled(rename = "Version")]
    version: String,
    #[tabled(rename = "Qty")]
    quantity: u64,
    #[tabled(rename = "Upgrades")]
    upgrades: String,
}

fn rows(results: &GroupedResults, format: OutputFormat) -> Vec<UpgradeRow> {
    results
        .iter()
        .flat_map(|(key, group)| {
            group.iter().map(move |result| UpgradeRow {
                image: key.image.clone(),
                pod: key.pod_template.clone(),
                container: key.container.clone(),
                namespace: result.namespace.clone(),
                version: result.version.clone(),
                quantity: result.quantity,
                upgrades: match format {
                    OutputFormat::Table => color_tags(&result.upgrades),
                    OutputFormat::Json => result.upgrades.join(", "),
                },
            })
        })
        .collect()
}

/// Snapshot the cluster, detect upgrades and print them. Nothing is
/// cached or sent anywhere.
pub async fn scan(
    detector: &UpgradeDetector,
    identity: &ClusterIdentity,
    filter: &WorkloadFilter,
    format: OutputFormat,
) -> Result<()> {
    let source = KubeWorkloadSource::try_default()
        .await
        .context("Failed to connect to Kubernetes")?;
    let records = source
        .fetch()
        .await
        .context("Failed to list pods")?;

    let grouped = group_workloads(&records, identity, filter);
    let inspected = grouped.len();
    if let OutputFormat::Table = format {
        print_info(&format!(
            "Inspecting {} workload groups from {} containers",
            inspected,
            records.len()
        ));
    }

    let (upgrades, stats) = detector.detect_with_stats(grouped).await;

    match format {
        OutputFormat::Json => print_table(&rows(&upgrades, format), format),
        OutputFormat::Table => {
            if stats.repositories_failed > 0 {
                print_warning(&format!(
                    "{} of {} registry lookups failed",
                    stats.repositories_failed, stats.repositories_queried
                ));
            }
            if upgrades.is_empty() {
                print_success("All images are up to date");
                return Ok(());
            }

            println!();
            print_table(&rows(&upgrades, format), format);
            println!(
                "\n{} of {} groups have upgrades available",
                upgrades.len().to_string().bold(),
                inspected
            );
        }
    }

    Ok(())
}
