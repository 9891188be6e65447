//! Library for detecting container image upgrades in a Kubernetes cluster
//!
//! This crate provides:
//! - Workload snapshots and grouping
//! - Registry tag lookups and version comparison
//! - Reconciliation against already announced upgrades
//! - Chat and issue tracker reporting
//! - Health checks and observability

pub mod api;
pub mod detector;
pub mod error;
pub mod health;
pub mod identity;
pub mod models;
pub mod notify;
pub mod observability;
pub mod reconcile;
pub mod registry;
pub mod schedule;
pub mod snapshot;
pub mod tracker;
pub mod version;
pub mod watch;

pub use detector::{DetectionStats, UpgradeDetector};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{StructuredLogger, WatcherMetrics};
pub use schedule::{next_sleep_seconds, AlertSchedule, AlertTimeZone};
pub use version::{is_upgrade, VersionPolicy};
pub use watch::{CycleReport, WatchLoop, WatchLoopBuilder};
