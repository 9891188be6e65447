//! Registry tag listing command

use anyhow::{anyhow, Context, Result};
use colored::Colorize;
use serde::Serialize;
use tabled::Tabled;
use watcher_lib::registry::{RegistryClient, TagListing, TagSource};
use watcher_lib::snapshot::split_image_reference;
use watcher_lib::VersionPolicy;

use crate::output::{color_flag, print_json, print_table, print_warning, OutputFormat};

#[derive(Tabled, Serialize)]
struct TagRow {
    #[tabled(rename = "Tag")]
    tag: String,
    #[tabled(rename = "Upgrade")]
    #[serde(skip)]
    upgrade_marker: String,
    #[tabled(skip)]
    upgrade: bool,
}

#[derive(Serialize)]
struct TagReport<'a> {
    image: &'a str,
    current: &'a str,
    url: String,
    tags: Vec<String>,
    upgrades: Vec<String>,
}

/// Fetch the tag list of an image and mark the upgrades over its tag
pub async fn show_tags(
    client: &RegistryClient,
    policy: &VersionPolicy,
    reference: &str,
    format: OutputFormat,
) -> Result<()> {
    let (image, current) = split_image_reference(reference)
        .ok_or_else(|| anyhow!("Image reference '{}' has no tag", reference))?;

    let url = client
        .endpoints()
        .tags_url(&TagListing::for_repository(image), image);
    let candidates = client
        .fetch_tags(image)
        .await
        .with_context(|| format!("Failed to list tags for {}", image))?;

    let rows: Vec<TagRow> = candidates
        .into_iter()
        .map(|c| {
            let upgrade = policy.is_upgrade(image, current, &c.name);
            TagRow {
                upgrade_marker: color_flag(upgrade),
                tag: c.name,
                upgrade,
            }
        })
        .collect();

    match format {
        OutputFormat::Json => print_json(&TagReport {
            image,
            current,
            url,
            upgrades: rows.iter().filter(|r| r.upgrade).map(|r| r.tag.clone()).collect(),
            tags: rows.into_iter().map(|r| r.tag).collect(),
        }),
        OutputFormat::Table => {
            println!("Image:   {}", image.cyan());
            println!("Current: {}", current.cyan());
            println!("Source:  {}", url.dimmed());
            println!();
            print_table(&rows, format);

            let upgrades = rows.iter().filter(|r| r.upgrade).count();
            if upgrades == 0 {
                print_warning("No upgrades available");
            } else {
                println!("\n{} of {} tags are upgrades", upgrades, rows.len());
            }
        }
    }

    Ok(())
}
