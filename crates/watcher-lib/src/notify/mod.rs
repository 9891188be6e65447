//! Chat notifications
//!
//! The report is a single text blob with one code block per group. Lists
//! are capped so one noisy image cannot flood the channel.

mod slack;

pub use slack::SlackNotifier;

use crate::error::NotifierError;
use crate::models::{GroupedResults, ResultGroup};
use async_trait::async_trait;
use std::fmt::Write;

/// Maximum list items shown per field before summarizing the rest
const MAX_LISTED: usize = 5;

/// Message sent in the alert window when nothing needs upgrading
pub const NOTHING_TO_REPORT: &str = "No image upgrades detected";

/// Trait for chat notification channels
#[async_trait]
pub trait ChatNotifier: Send + Sync {
    /// Whether a destination is configured
    fn enabled(&self) -> bool;

    /// Post a text message
    async fn send(&self, text: &str) -> Result<(), NotifierError>;
}

/// Comma-separated list of at most five items, with `" + N more"` appended
/// when items were left out
pub fn capped_list<I, S>(items: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let items: Vec<S> = items.into_iter().collect();
    let mut out = items
        .iter()
        .take(MAX_LISTED)
        .map(|s| s.as_ref())
        .collect::<Vec<_>>()
        .join(", ");
    if items.len() > MAX_LISTED {
        let _ = write!(out, " + {} more", items.len() - MAX_LISTED);
    }
    out
}

/// Render detected upgrades as a chat report
pub fn format_report(results: &GroupedResults) -> String {
    let mut out = String::new();
    for (key, group) in results {
        let _ = write!(
            out,
            "```project: {}\ncluster: {}\nimage: {}\nnamespaces: {}\ncurrent-versions: {}\nnew-versions: {}```\n",
            key.project,
            key.cluster,
            key.image,
            capped_list(group.iter().map(|r| r.namespace.as_str())),
            capped_list(group.iter().map(|r| r.version.as_str())),
            capped_list(group.iter().flat_map(|r: &ResultGroup| r.upgrades.iter())),
        );
    }
    out
}
