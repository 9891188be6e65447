//! Prometheus metrics and structured event logging for the watcher

use crate::models::{GroupKey, ResultGroup};
use crate::tracker::TrackerOutcome;
use prometheus::{
    register_histogram, register_int_counter, register_int_gauge, Histogram, IntCounter,
    IntGauge,
};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Cycle durations are dominated by registry round trips
const CYCLE_BUCKETS: &[f64] = &[0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0];

static GLOBAL_METRICS: OnceLock<WatcherMetricsInner> = OnceLock::new();

struct WatcherMetricsInner {
    upgrades_available: IntGauge,
    cycle_duration_seconds: Histogram,
    registry_fetch_errors: IntCounter,
    snapshot_errors: IntCounter,
    notifications_sent: IntCounter,
    cache_entries: IntGauge,
}

impl WatcherMetricsInner {
    fn new() -> Self {
        Self {
            upgrades_available: register_int_gauge!(
                "tag_watcher_upgrades_available",
                "Workload groups with at least one upgrade in the last detection"
            )
            .expect("Failed to register upgrades_available"),

            cycle_duration_seconds: register_histogram!(
                "tag_watcher_cycle_duration_seconds",
                "Time spent on one snapshot, detection and notification cycle",
                CYCLE_BUCKETS.to_vec()
            )
            .expect("Failed to register cycle_duration_seconds"),

            registry_fetch_errors: register_int_counter!(
                "tag_watcher_registry_fetch_errors_total",
                "Repository tag list requests that failed"
            )
            .expect("Failed to register registry_fetch_errors"),

            snapshot_errors: register_int_counter!(
                "tag_watcher_snapshot_errors_total",
                "Workload snapshots that could not be fetched"
            )
            .expect("Failed to register snapshot_errors"),

            notifications_sent: register_int_counter!(
                "tag_watcher_notifications_sent_total",
                "Chat messages posted successfully"
            )
            .expect("Failed to register notifications_sent"),

            cache_entries: register_int_gauge!(
                "tag_watcher_cache_entries",
                "Announced (version, namespace) pairs held in the registered image cache"
            )
            .expect("Failed to register cache_entries"),
        }
    }
}

/// Handle to the process-wide watcher metrics. Clones share the same
/// underlying collectors.
#[derive(Clone)]
pub struct WatcherMetrics {
    _private: (),
}

impl Default for WatcherMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl WatcherMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(WatcherMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &WatcherMetricsInner {
        GLOBAL_METRICS.get_or_init(WatcherMetricsInner::new)
    }

    pub fn set_upgrades_available(&self, groups: usize) {
        self.inner().upgrades_available.set(groups as i64);
    }

    pub fn observe_cycle_duration(&self, duration_secs: f64) {
        self.inner().cycle_duration_seconds.observe(duration_secs);
    }

    pub fn add_registry_fetch_errors(&self, count: usize) {
        self.inner().registry_fetch_errors.inc_by(count as u64);
    }

    pub fn inc_snapshot_errors(&self) {
        self.inner().snapshot_errors.inc();
    }

    pub fn inc_notifications_sent(&self) {
        self.inner().notifications_sent.inc();
    }

    pub fn set_cache_entries(&self, entries: usize) {
        self.inner().cache_entries.set(entries as i64);
    }
}

/// Logger for recurring watcher events, each tagged with an `event` field
#[derive(Clone)]
pub struct StructuredLogger {
    cluster: String,
}

impl StructuredLogger {
    pub fn new(cluster: impl Into<String>) -> Self {
        Self {
            cluster: cluster.into(),
        }
    }

    pub fn log_startup(&self, version: &str, schedule: &str, timezone: &str) {
        info!(
            event = "watcher_started",
            cluster = %self.cluster,
            watcher_version = %version,
            schedule = %schedule,
            timezone = %timezone,
            "Tag watcher started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "watcher_shutdown",
            cluster = %self.cluster,
            reason = %reason,
            "Tag watcher shutting down"
        );
    }

    /// Summary of one finished cycle
    pub fn log_cycle(
        &self,
        duration_secs: f64,
        detected_groups: usize,
        reported_groups: usize,
        within_window: bool,
        sleep_secs: u64,
    ) {
        info!(
            event = "cycle_completed",
            cluster = %self.cluster,
            duration_secs = duration_secs,
            detected_groups = detected_groups,
            reported_groups = reported_groups,
            within_window = within_window,
            sleep_secs = sleep_secs,
            "Watch cycle completed"
        );
    }

    pub fn log_upgrade(&self, key: &GroupKey, result: &ResultGroup) {
        info!(
            event = "upgrade_found",
            cluster = %self.cluster,
            group = %key,
            namespace = %result.namespace,
            version = %result.version,
            quantity = result.quantity,
            upgrades = ?result.upgrades,
            "Image upgrade available"
        );
    }

    pub fn log_notification(&self, groups: usize, success: bool) {
        if success {
            info!(
                event = "notification_sent",
                cluster = %self.cluster,
                groups = groups,
                "Posted upgrade report"
            );
        } else {
            warn!(
                event = "notification_failed",
                cluster = %self.cluster,
                groups = groups,
                "Failed to post upgrade report"
            );
        }
    }

    pub fn log_issue(&self, key: &GroupKey, outcome: &TrackerOutcome) {
        match outcome {
            TrackerOutcome::Created { issue } => info!(
                event = "issue_created",
                cluster = %self.cluster,
                group = %key,
                issue = %issue,
                "Created upgrade issue"
            ),
            TrackerOutcome::Commented { issue, comments } => info!(
                event = "issue_commented",
                cluster = %self.cluster,
                group = %key,
                issue = %issue,
                comments = comments,
                "Commented on upgrade issue"
            ),
            TrackerOutcome::Unchanged { issue } => info!(
                event = "issue_unchanged",
                cluster = %self.cluster,
                group = %key,
                issue = %issue,
                "Upgrade issue already up to date"
            ),
            TrackerOutcome::Ambiguous { matches } => warn!(
                event = "issue_ambiguous",
                cluster = %self.cluster,
                group = %key,
                matches = matches,
                "Several open issues match group"
            ),
        }
    }
}
