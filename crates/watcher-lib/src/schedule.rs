//! Alert window scheduling
//!
//! A schedule is either daily (`"HHMM"`) or weekly (`"DAY|HHMM"`). The
//! window opens at the configured minute and stays open for five minutes.
//! Polls inside the window send the full report.

use chrono::{DateTime, Datelike, Duration, FixedOffset, Local, Offset, TimeZone, Utc, Weekday};
use chrono_tz::Tz;
use std::fmt;
use tracing::warn;

/// Length of the alert window
pub const WINDOW_SECS: i64 = 300;

/// Sleep after a poll inside the window, so the next poll lands past it
pub const IN_WINDOW_SLEEP_SECS: u64 = 360;

/// Sleep between polls outside the window
pub const POLL_SLEEP_SECS: u64 = 60;

/// Sleep after a cycle failed before reaching the scheduler
pub const FALLBACK_SLEEP_SECS: u64 = 300;

const DEFAULT_HOUR: u32 = 10;
const DEFAULT_MINUTE: u32 = 0;

/// Recurring alert window start
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlertSchedule {
    pub weekday: Option<Weekday>,
    pub hour: u32,
    pub minute: u32,
}

impl Default for AlertSchedule {
    fn default() -> Self {
        Self {
            weekday: None,
            hour: DEFAULT_HOUR,
            minute: DEFAULT_MINUTE,
        }
    }
}

impl fmt::Display for AlertSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.weekday {
            Some(day) => write!(f, "{}|{:02}{:02}", weekday_name(day), self.hour, self.minute),
            None => write!(f, "{:02}{:02}", self.hour, self.minute),
        }
    }
}

impl AlertSchedule {
    /// Parse a schedule string. Malformed input falls back to daily at 10:00
    /// (or to 10:00 on the given weekday when only the time is malformed).
    pub fn parse(schedule: &str) -> Self {
        let parts: Vec<&str> = schedule.split('|').collect();
        let weekday = parse_weekday(parts[0]);

        let time = match weekday {
            Some(_) => parts.get(1).copied(),
            None => Some(parts[0]),
        };
        let (hour, minute) = time.and_then(parse_hhmm).unwrap_or((DEFAULT_HOUR, DEFAULT_MINUTE));

        Self {
            weekday,
            hour,
            minute,
        }
    }

    /// Start of the window on the day of `at`, in the timezone of `at`
    fn window_start(&self, at: &DateTime<FixedOffset>) -> Option<DateTime<FixedOffset>> {
        if self.weekday.is_some_and(|day| at.weekday() != day) {
            return None;
        }
        let naive = at.date_naive().and_hms_opt(self.hour, self.minute, 0)?;
        at.offset().from_local_datetime(&naive).single()
    }

    /// Whether `now` lies in `[start, start + 300s)`. A window that starts
    /// shortly before midnight also covers the first minutes of the next day.
    pub fn is_within_window(&self, now: &DateTime<FixedOffset>) -> bool {
        let window = Duration::seconds(WINDOW_SECS);
        [*now, *now - Duration::days(1)]
            .iter()
            .filter_map(|day| self.window_start(day))
            .any(|start| *now >= start && *now < start + window)
    }
}

/// Seconds to sleep before the next poll
pub fn next_sleep_seconds(within_window: bool) -> u64 {
    if within_window {
        IN_WINDOW_SLEEP_SECS
    } else {
        POLL_SLEEP_SECS
    }
}

fn parse_weekday(day: &str) -> Option<Weekday> {
    match day.to_uppercase().as_str() {
        "MONDAY" => Some(Weekday::Mon),
        "TUESDAY" => Some(Weekday::Tue),
        "WEDNESDAY" => Some(Weekday::Wed),
        "THURSDAY" => Some(Weekday::Thu),
        "FRIDAY" => Some(Weekday::Fri),
        "SATURDAY" => Some(Weekday::Sat),
        "SUNDAY" => Some(Weekday::Sun),
        _ => None,
    }
}

fn weekday_name(day: Weekday) -> &'static str {
    match day {
        Weekday::Mon => "MONDAY",
        Weekday::Tue => "TUESDAY",
        Weekday::Wed => "WEDNESDAY",
        Weekday::Thu => "THURSDAY",
        Weekday::Fri => "FRIDAY",
        Weekday::Sat => "SATURDAY",
        Weekday::Sun => "SUNDAY",
    }
}

fn parse_hhmm(time: &str) -> Option<(u32, u32)> {
    if time.len() != 4 || !time.is_ascii() {
        return None;
    }
    let hour: u32 = time[0..2].parse().ok()?;
    let minute: u32 = time[2..4].parse().ok()?;
    (hour < 24 && minute < 60).then_some((hour, minute))
}

/// Timezone the schedule is evaluated in
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AlertTimeZone {
    Utc,
    Local,
    Named(Tz),
}

impl AlertTimeZone {
    /// Resolve a zone name: empty or `UTC` is UTC, `Local` is the host
    /// zone, anything else must be an IANA name (UTC otherwise).
    pub fn from_name(name: &str) -> Self {
        match name.trim() {
            "" | "UTC" => AlertTimeZone::Utc,
            "Local" => AlertTimeZone::Local,
            other => match other.parse::<Tz>() {
                Ok(tz) => AlertTimeZone::Named(tz),
                Err(_) => {
                    warn!(timezone = %other, "Unknown timezone, falling back to UTC");
                    AlertTimeZone::Utc
                }
            },
        }
    }

    /// Express a UTC instant in this zone
    pub fn localize(&self, instant: DateTime<Utc>) -> DateTime<FixedOffset> {
        match self {
            AlertTimeZone::Utc => instant.with_timezone(&Utc.fix()),
            AlertTimeZone::Local => {
                let local = instant.with_timezone(&Local);
                local.with_timezone(&local.offset().fix())
            }
            AlertTimeZone::Named(tz) => {
                let zoned = instant.with_timezone(tz);
                zoned.with_timezone(&zoned.offset().fix())
            }
        }
    }

    pub fn now(&self) -> DateTime<FixedOffset> {
        self.localize(Utc::now())
    }
}
