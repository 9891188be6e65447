//! The watch loop
//!
//! One cycle takes a workload snapshot, looks up upgrades, reconciles them
//! against what was already announced and reports the rest. The cycle
//! returns how long to sleep before the next one.

use crate::detector::UpgradeDetector;
use crate::health::{components, HealthRegistry};
use crate::identity::ClusterIdentity;
use crate::models::{GroupedResults, WorkloadRecord};
use crate::notify::{format_report, ChatNotifier, NOTHING_TO_REPORT};
use crate::observability::{StructuredLogger, WatcherMetrics};
use crate::reconcile::{reconcile, RegisteredImageCache};
use crate::schedule::{
    next_sleep_seconds, AlertSchedule, AlertTimeZone, FALLBACK_SLEEP_SECS,
};
use crate::snapshot::{group_workloads, WorkloadFilter, WorkloadSource};
use crate::tracker::{IssueTracker, TrackerOutcome};
use anyhow::Result;
use chrono::{DateTime, FixedOffset};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{error, info, warn};

/// What a single cycle did
#[derive(Debug, Clone, PartialEq)]
pub struct CycleReport {
    /// Groups with upgrades before reconciliation
    pub detected_groups: usize,
    /// Groups that were sent out
    pub reported: GroupedResults,
    pub within_window: bool,
    /// Whether a chat message was posted
    pub notified: bool,
    pub sleep: Duration,
}

impl CycleReport {
    fn aborted() -> Self {
        Self {
            detected_groups: 0,
            reported: GroupedResults::new(),
            within_window: false,
            notified: false,
            sleep: Duration::from_secs(FALLBACK_SLEEP_SECS),
        }
    }
}

pub struct WatchLoop {
    workloads: Arc<dyn WorkloadSource>,
    detector: UpgradeDetector,
    notifier: Arc<dyn ChatNotifier>,
    tracker: Option<Arc<dyn IssueTracker>>,
    identity: ClusterIdentity,
    filter: WorkloadFilter,
    schedule: AlertSchedule,
    timezone: AlertTimeZone,
    cache: RegisteredImageCache,
    health: HealthRegistry,
    metrics: WatcherMetrics,
    logger: StructuredLogger,
}

impl WatchLoop {
    pub fn cache(&self) -> &RegisteredImageCache {
        &self.cache
    }

    /// Run cycles until a shutdown signal arrives
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        info!(
            schedule = %self.schedule,
            timezone = ?self.timezone,
            "Starting watch loop"
        );

        loop {
            let report = self.cycle(None).await;

            tokio::select! {
                _ = tokio::time::sleep(report.sleep) => {}
                _ = shutdown.recv() => {
                    info!("Shutting down watch loop");
                    break;
                }
            }
        }
    }

    /// Run one cycle, evaluating the alert window at `now`
    pub async fn run_cycle(&mut self, now: DateTime<FixedOffset>) -> CycleReport {
        self.cycle(Some(now)).await
    }

    async fn cycle(&mut self, at: Option<DateTime<FixedOffset>>) -> CycleReport {
        let started = Instant::now();
        let workloads = match self.workloads.fetch().await {
            Ok(workloads) => workloads,
            Err(e) => return self.abort_snapshot(e.to_string()).await,
        };
        let now = at.unwrap_or_else(|| self.timezone.now());
        let report = self.process(workloads, now).await;
        self.finish(&report, started);
        report
    }

    async fn abort_snapshot(&self, message: String) -> CycleReport {
        error!(
            error = %message,
            sleep_secs = FALLBACK_SLEEP_SECS,
            "Failed to fetch workload snapshot"
        );
        self.metrics.inc_snapshot_errors();
        self.health
            .set_unhealthy(components::SNAPSHOT, message)
            .await;
        CycleReport::aborted()
    }

    fn finish(&self, report: &CycleReport, started: Instant) {
        let elapsed = started.elapsed().as_secs_f64();
        self.metrics.observe_cycle_duration(elapsed);
        self.logger.log_cycle(
            elapsed,
            report.detected_groups,
            report.reported.len(),
            report.within_window,
            report.sleep.as_secs(),
        );
    }

    async fn process(
        &mut self,
        workloads: Vec<WorkloadRecord>,
        now: DateTime<FixedOffset>,
    ) -> CycleReport {
        self.health.set_healthy(components::SNAPSHOT).await;

        let within_window = self.schedule.is_within_window(&now);
        let grouped = group_workloads(&workloads, &self.identity, &self.filter);

        let (detected, stats) = self.detector.detect_with_stats(grouped).await;
        self.metrics.add_registry_fetch_errors(stats.repositories_failed);
        if let Some(e) = stats.failure() {
            error!(error = %e, "No registry could be listed this cycle");
            self.health
                .set_unhealthy(components::REGISTRY, e.to_string())
                .await;
        } else if stats.repositories_failed > 0 {
            self.health
                .set_degraded(
                    components::REGISTRY,
                    format!(
                        "{} of {} repositories failed",
                        stats.repositories_failed, stats.repositories_queried
                    ),
                )
                .await;
        } else {
            self.health.set_healthy(components::REGISTRY).await;
        }

        let detected_groups = detected.len();
        self.metrics.set_upgrades_available(detected_groups);

        let reported = reconcile(detected, &mut self.cache, within_window);
        self.metrics.set_cache_entries(self.cache.entry_count());

        for (key, group) in &reported {
            for result in group {
                self.logger.log_upgrade(key, result);
            }
        }

        let notified = if !reported.is_empty() || within_window {
            let text = if reported.is_empty() {
                NOTHING_TO_REPORT.to_string()
            } else {
                format_report(&reported)
            };
            self.notify(&text, reported.len()).await
        } else {
            false
        };

        self.track_issues(&reported).await;

        CycleReport {
            detected_groups,
            reported,
            within_window,
            notified,
            sleep: Duration::from_secs(next_sleep_seconds(within_window)),
        }
    }

    async fn notify(&self, text: &str, groups: usize) -> bool {
        match self.notifier.send(text).await {
            Ok(()) if !self.notifier.enabled() => false,
            Ok(()) => {
                self.metrics.inc_notifications_sent();
                self.health.set_healthy(components::NOTIFIER).await;
                self.logger.log_notification(groups, true);
                true
            }
            Err(e) => {
                warn!(error = %e, "Failed to post to chat webhook");
                self.health
                    .set_degraded(components::NOTIFIER, e.to_string())
                    .await;
                self.logger.log_notification(groups, false);
                false
            }
        }
    }

    async fn track_issues(&self, reported: &GroupedResults) {
        let Some(tracker) = &self.tracker else {
            return;
        };

        let mut failures = 0;
        for (key, group) in reported {
            match tracker.report(key, group).await {
                Ok(outcome) => {
                    self.logger.log_issue(key, &outcome);
                    let line = match &outcome {
                        TrackerOutcome::Created { issue } => {
                            Some(format!("just created {}", tracker.browse_url(issue)))
                        }
                        TrackerOutcome::Commented { issue, .. } => {
                            Some(format!("just commented on {}", tracker.browse_url(issue)))
                        }
                        _ => None,
                    };
                    if let Some(line) = line {
                        self.notify(&line, 1).await;
                    }
                }
                Err(e) => {
                    failures += 1;
                    warn!(group = %key, error = %e, "Failed to report group to issue tracker");
                }
            }
        }

        if failures > 0 {
            self.health
                .set_degraded(
                    components::ISSUE_TRACKER,
                    format!("{} group(s) could not be reported", failures),
                )
                .await;
        } else {
            self.health.set_healthy(components::ISSUE_TRACKER).await;
        }
    }
}

/// Builder for the watch loop
pub struct WatchLoopBuilder {
    workloads: Option<Arc<dyn WorkloadSource>>,
    detector: Option<UpgradeDetector>,
    notifier: Option<Arc<dyn ChatNotifier>>,
    tracker: Option<Arc<dyn IssueTracker>>,
    identity: ClusterIdentity,
    filter: WorkloadFilter,
    schedule: AlertSchedule,
    timezone: AlertTimeZone,
    health: HealthRegistry,
}

impl WatchLoopBuilder {
    pub fn new() -> Self {
        Self {
            workloads: None,
            detector: None,
            notifier: None,
            tracker: None,
            identity: ClusterIdentity::unknown(),
            filter: WorkloadFilter::default(),
            schedule: AlertSchedule::default(),
            timezone: AlertTimeZone::Utc,
            health: HealthRegistry::new(),
        }
    }

    pub fn workloads(mut self, workloads: Arc<dyn WorkloadSource>) -> Self {
        self.workloads = Some(workloads);
        self
    }

    pub fn detector(mut self, detector: UpgradeDetector) -> Self {
        self.detector = Some(detector);
        self
    }

    pub fn notifier(mut self, notifier: Arc<dyn ChatNotifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Optional issue tracker; without one, groups are only posted to chat
    pub fn tracker(mut self, tracker: Arc<dyn IssueTracker>) -> Self {
        self.tracker = Some(tracker);
        self
    }

    pub fn identity(mut self, identity: ClusterIdentity) -> Self {
        self.identity = identity;
        self
    }

    pub fn filter(mut self, filter: WorkloadFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn schedule(mut self, schedule: AlertSchedule) -> Self {
        self.schedule = schedule;
        self
    }

    pub fn timezone(mut self, timezone: AlertTimeZone) -> Self {
        self.timezone = timezone;
        self
    }

    pub fn health(mut self, health: HealthRegistry) -> Self {
        self.health = health;
        self
    }

    pub fn build(self) -> Result<WatchLoop> {
        let workloads = self
            .workloads
            .ok_or_else(|| anyhow::anyhow!("Workload source is required"))?;
        let detector = self
            .detector
            .ok_or_else(|| anyhow::anyhow!("Upgrade detector is required"))?;
        let notifier = self
            .notifier
            .ok_or_else(|| anyhow::anyhow!("Notifier is required"))?;

        let logger = StructuredLogger::new(&self.identity.cluster);
        Ok(WatchLoop {
            workloads,
            detector,
            notifier,
            tracker: self.tracker,
            identity: self.identity,
            filter: self.filter,
            schedule: self.schedule,
            timezone: self.timezone,
            cache: RegisteredImageCache::new(),
            health: self.health,
            metrics: WatcherMetrics::new(),
            logger,
        })
    }
}

impl Default for WatchLoopBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{IssueTrackerError, NotifierError, RegistryFetchError, SnapshotFetchError};
    use crate::models::{GroupKey, ResultGroup};
    use crate::registry::{TagSource, UpgradeCandidate};
    use crate::version::VersionPolicy;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::collections::HashMap;
    use std::sync::Mutex;

    struct MockWorkloads {
        records: Mutex<Result<Vec<WorkloadRecord>, String>>,
    }

    impl MockWorkloads {
        fn new(images: &[&str]) -> Self {
            let records = images
                .iter()
                .enumerate()
                .map(|(i, image)| WorkloadRecord {
                    namespace: "default".to_string(),
                    pod_phase: "Running".to_string(),
                    pod_name: format!("app{}-1234-abcd", i),
                    container_name: "app".to_string(),
                    image_reference: image.to_string(),
                })
                .collect();
            Self {
                records: Mutex::new(Ok(records)),
            }
        }

        fn failing() -> Self {
            Self {
                records: Mutex::new(Err("connection refused".to_string())),
            }
        }
    }

    #[async_trait]
    impl WorkloadSource for MockWorkloads {
        async fn fetch(&self) -> Result<Vec<WorkloadRecord>, SnapshotFetchError> {
            self.records
                .lock()
                .unwrap()
                .clone()
                .map_err(SnapshotFetchError::Unavailable)
        }
    }

    struct MockTags {
        tags: HashMap<String, Vec<String>>,
    }

    #[async_trait]
    impl TagSource for MockTags {
        async fn fetch_tags(
            &self,
            repository: &str,
        ) -> Result<Vec<UpgradeCandidate>, RegistryFetchError> {
            match self.tags.get(repository) {
                Some(tags) => Ok(tags.iter().map(UpgradeCandidate::new).collect()),
                None => Err(RegistryFetchError::Status {
                    url: repository.to_string(),
                    status: 404,
                }),
            }
        }
    }

    #[derive(Default)]
    struct RecordingNotifier {
        sent: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ChatNotifier for RecordingNotifier {
        fn enabled(&self) -> bool {
            true
        }

        async fn send(&self, text: &str) -> Result<(), NotifierError> {
            self.sent.lock().unwrap().push(text.to_string());
            Ok(())
        }
    }

    struct CreatingTracker;

    #[async_trait]
    impl IssueTracker for CreatingTracker {
        async fn report(
            &self,
            _key: &GroupKey,
            _results: &[ResultGroup],
        ) -> Result<TrackerOutcome, IssueTrackerError> {
            Ok(TrackerOutcome::Created {
                issue: "OPS-1".to_string(),
            })
        }

        fn browse_url(&self, issue: &str) -> String {
            format!("https://jira.example.com/browse/{}", issue)
        }
    }

    fn detector(tags: &[(&str, &[&str])]) -> UpgradeDetector {
        let tags = tags
            .iter()
            .map(|(repo, tags)| (repo.to_string(), tags.iter().map(|t| t.to_string()).collect()))
            .collect();
        UpgradeDetector::new(Arc::new(MockTags { tags }), VersionPolicy::default())
    }

    /// 2024-01-02 is a Tuesday
    fn at(hour: u32, minute: u32) -> DateTime<FixedOffset> {
        FixedOffset::east_opt(0)
            .unwrap()
            .with_ymd_and_hms(2024, 1, 2, hour, minute, 0)
            .unwrap()
    }

    fn build(
        workloads: MockWorkloads,
        detector: UpgradeDetector,
        notifier: Arc<RecordingNotifier>,
    ) -> WatchLoopBuilder {
        WatchLoopBuilder::new()
            .workloads(Arc::new(workloads))
            .detector(detector)
            .notifier(notifier)
            .identity(ClusterIdentity::new("proj", "clus"))
            .schedule(AlertSchedule::parse("1000"))
    }

    #[test]
    fn test_builder_requires_collaborators() {
        assert!(WatchLoopBuilder::new().build().is_err());
        assert!(WatchLoopBuilder::new()
            .detector(detector(&[]))
            .notifier(Arc::new(RecordingNotifier::default()))
            .build()
            .is_err());
    }

    #[tokio::test]
    async fn test_new_upgrade_is_announced_once() {
        let notifier = Arc::new(RecordingNotifier::default());
        let mut watch = build(
            MockWorkloads::new(&["nginx:1.0"]),
            detector(&[("nginx", &["1.0", "1.1", "latest"])]),
            notifier.clone(),
        )
        .build()
        .unwrap();

        let first = watch.run_cycle(at(12, 0)).await;
        assert_eq!(first.detected_groups, 1);
        assert_eq!(first.reported.len(), 1);
        assert!(first.notified);
        assert!(!first.within_window);
        assert_eq!(first.sleep, Duration::from_secs(60));

        let second = watch.run_cycle(at(12, 1)).await;
        assert_eq!(second.detected_groups, 1);
        assert!(second.reported.is_empty());
        assert!(!second.notified);

        let sent = notifier.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].contains("image: nginx"));
        assert!(sent[0].contains("new-versions: 1.1"));
        assert_eq!(watch.cache().entry_count(), 1);
    }

    #[tokio::test]
    async fn test_window_resends_everything() {
        let notifier = Arc::new(RecordingNotifier::default());
        let mut watch = build(
            MockWorkloads::new(&["nginx:1.0"]),
            detector(&[("nginx", &["1.1"])]),
            notifier.clone(),
        )
        .build()
        .unwrap();

        watch.run_cycle(at(9, 0)).await;
        let report = watch.run_cycle(at(10, 2)).await;

        assert!(report.within_window);
        assert_eq!(report.reported.len(), 1);
        assert_eq!(report.sleep, Duration::from_secs(360));
        assert_eq!(notifier.sent.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_window_without_upgrades_sends_placeholder() {
        let notifier = Arc::new(RecordingNotifier::default());
        let mut watch = build(
            MockWorkloads::new(&["nginx:1.1"]),
            detector(&[("nginx", &["1.0", "1.1"])]),
            notifier.clone(),
        )
        .build()
        .unwrap();

        let report = watch.run_cycle(at(10, 0)).await;

        assert!(report.notified);
        let sent = notifier.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0], NOTHING_TO_REPORT);
    }

    #[tokio::test]
    async fn test_snapshot_failure_falls_back() {
        let notifier = Arc::new(RecordingNotifier::default());
        let health = HealthRegistry::new();
        let mut watch = build(MockWorkloads::failing(), detector(&[]), notifier.clone())
            .health(health.clone())
            .build()
            .unwrap();

        let report = watch.run_cycle(at(10, 0)).await;

        assert_eq!(report.sleep, Duration::from_secs(FALLBACK_SLEEP_SECS));
        assert!(notifier.sent.lock().unwrap().is_empty());
        let status = health.health().await;
        assert_eq!(
            status.components[components::SNAPSHOT].status,
            crate::health::ComponentStatus::Unhealthy
        );
    }

    #[tokio::test]
    async fn test_window_report_survives_registry_outage() {
        let notifier = Arc::new(RecordingNotifier::default());
        let health = HealthRegistry::new();
        let mut watch = build(
            MockWorkloads::new(&["nginx:1.0"]),
            detector(&[]),
            notifier.clone(),
        )
        .health(health.clone())
        .build()
        .unwrap();

        let report = watch.run_cycle(at(10, 1)).await;

        assert!(report.within_window);
        assert!(report.notified);
        assert_eq!(report.sleep, Duration::from_secs(360));
        assert!(report.reported.is_empty());
        let sent = notifier.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0], NOTHING_TO_REPORT);
        drop(sent);

        let status = health.health().await;
        assert_eq!(
            status.components[components::REGISTRY].status,
            crate::health::ComponentStatus::Unhealthy
        );
    }

    #[tokio::test]
    async fn test_all_registries_failing_keeps_polling() {
        let notifier = Arc::new(RecordingNotifier::default());
        let mut watch = build(
            MockWorkloads::new(&["nginx:1.0", "redis:6.0"]),
            detector(&[]),
            notifier.clone(),
        )
        .build()
        .unwrap();

        let report = watch.run_cycle(at(12, 0)).await;

        assert_eq!(report.sleep, Duration::from_secs(60));
        assert!(report.reported.is_empty());
        assert!(!report.notified);
        assert!(watch.cache().is_empty());
    }

    #[tokio::test]
    async fn test_one_failing_registry_does_not_block_others() {
        let notifier = Arc::new(RecordingNotifier::default());
        let mut watch = build(
            MockWorkloads::new(&["nginx:1.0", "redis:6.0"]),
            detector(&[("redis", &["6.1"])]),
            notifier.clone(),
        )
        .build()
        .unwrap();

        let report = watch.run_cycle(at(12, 0)).await;

        assert_eq!(report.sleep, Duration::from_secs(60));
        assert_eq!(report.reported.len(), 1);
        let key = report.reported.keys().next().unwrap();
        assert_eq!(key.image, "redis");
    }

    #[tokio::test]
    async fn test_tracker_links_are_posted() {
        let notifier = Arc::new(RecordingNotifier::default());
        let mut watch = build(
            MockWorkloads::new(&["nginx:1.0"]),
            detector(&[("nginx", &["1.1"])]),
            notifier.clone(),
        )
        .tracker(Arc::new(CreatingTracker))
        .build()
        .unwrap();

        watch.run_cycle(at(12, 0)).await;

        let sent = notifier.sent.lock().unwrap();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[1], "just created https://jira.example.com/browse/OPS-1");
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let notifier = Arc::new(RecordingNotifier::default());
        let watch = build(MockWorkloads::new(&[]), detector(&[]), notifier)
            .build()
            .unwrap();

        let (tx, rx) = broadcast::channel(1);
        let handle = tokio::spawn(watch.run(rx));
        tx.send(()).unwrap();

        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("watch loop did not stop")
            .unwrap();
    }
}
