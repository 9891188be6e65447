//! Alert window evaluation command

use anyhow::{Context, Result};
use chrono::{DateTime, FixedOffset, Utc};
use colored::Colorize;
use serde::Serialize;
use watcher_lib::{next_sleep_seconds, AlertSchedule, AlertTimeZone};

use crate::output::{color_flag, print_json, OutputFormat};

#[derive(Debug, Serialize)]
pub struct WindowEvaluation {
    pub schedule: String,
    pub evaluated_at: DateTime<FixedOffset>,
    pub within_window: bool,
    pub next_sleep_seconds: u64,
}

pub fn evaluate(
    schedule: &str,
    timezone: &str,
    at: Option<&str>,
) -> Result<WindowEvaluation> {
    let schedule = AlertSchedule::parse(schedule);
    let timezone = AlertTimeZone::from_name(timezone);

    let instant = match at {
        Some(raw) => DateTime::parse_from_rfc3339(raw)
            .with_context(|| format!("Invalid RFC 3339 timestamp '{}'", raw))?
            .with_timezone(&Utc),
        None => Utc::now(),
    };
    let evaluated_at = timezone.localize(instant);
    let within_window = schedule.is_within_window(&evaluated_at);

    Ok(WindowEvaluation {
        schedule: schedule.to_string(),
        evaluated_at,
        within_window,
        next_sleep_seconds: next_sleep_seconds(within_window),
    })
}

pub fn show_window(
    schedule: &str,
    timezone: &str,
    at: Option<&str>,
    format: OutputFormat,
) -> Result<()> {
    let evaluation = evaluate(schedule, timezone, at)?;

    match format {
        OutputFormat::Json => print_json(&evaluation),
        OutputFormat::Table => {
            println!("{}", "Alert Window".bold());
            println!("{}", "=".repeat(40));
            println!("Schedule:      {}", evaluation.schedule.cyan());
            println!("Evaluated at:  {}", evaluation.evaluated_at.to_rfc3339());
            println!("Within window: {}", color_flag(evaluation.within_window));
            println!("Next sleep:    {}s", evaluation.next_sleep_seconds);
        }
    }

    Ok(())
}
