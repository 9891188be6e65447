//! Version comparison command

use anyhow::Result;
use colored::Colorize;
use serde::Serialize;
use watcher_lib::version::ParsedVersion;
use watcher_lib::VersionPolicy;

use crate::output::{print_info, print_json, print_success, print_warning, OutputFormat};

#[derive(Debug, Serialize)]
pub struct Comparison {
    pub current: ParsedVersion,
    pub candidate: ParsedVersion,
    pub upgrade: bool,
    pub reason: &'static str,
}

/// Compare two tags under the given policy and explain the verdict
pub fn evaluate(policy: &VersionPolicy, current: &str, candidate: &str) -> Comparison {
    let parsed_current = ParsedVersion::parse(current);
    let parsed_candidate = ParsedVersion::parse(candidate);
    let upgrade = policy.is_upgrade("", current, candidate);

    let reason = if upgrade {
        "candidate is newer"
    } else if policy.ignore_tags.contains(candidate) {
        "candidate tag is ignored"
    } else if parsed_current.has_prefix_v != parsed_candidate.has_prefix_v {
        "'v' prefix differs"
    } else if parsed_current.suffix != parsed_candidate.suffix {
        "suffix differs"
    } else if parsed_current.numeric.len() != parsed_candidate.numeric.len() {
        "number of version components differs"
    } else {
        "candidate is not newer"
    };

    Comparison {
        current: parsed_current,
        candidate: parsed_candidate,
        upgrade,
        reason,
    }
}

pub fn compare(
    policy: &VersionPolicy,
    current: &str,
    candidate: &str,
    format: OutputFormat,
) -> Result<()> {
    let comparison = evaluate(policy, current, candidate);

    match format {
        OutputFormat::Json => print_json(&comparison),
        OutputFormat::Table => {
            if comparison.upgrade {
                print_success(&format!(
                    "{} is an upgrade over {}",
                    candidate.green().bold(),
                    current
                ));
            } else {
                print_warning(&format!("{} is not an upgrade over {}", candidate, current));
            }
            print_info(comparison.reason);
        }
    }

    Ok(())
}
