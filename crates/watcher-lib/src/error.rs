//! Error taxonomy for a watch cycle
//!
//! Only a snapshot failure (or a cycle where every registry failed) aborts
//! a cycle. Everything else is logged and absorbed by the caller.

use thiserror::Error;

/// The workload list could not be retrieved from the cluster
#[derive(Debug, Error)]
pub enum SnapshotFetchError {
    #[error("Kubernetes API request failed: {0}")]
    Kube(#[from] kube::Error),

    #[error("Snapshot unavailable: {0}")]
    Unavailable(String),
}

/// A single repository's tag list could not be retrieved
#[derive(Debug, Error)]
pub enum RegistryFetchError {
    #[error("Request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Bad status code ({status}) trying to access {url}")]
    Status { url: String, status: u16 },

    #[error("Failed to decode tag list from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Upgrade detection could not produce any data for the cycle
#[derive(Debug, Error)]
pub enum DetectionError {
    #[error("All {attempted} registry queries failed")]
    AllSourcesFailed { attempted: usize },
}

/// Posting to the chat webhook failed
#[derive(Debug, Error)]
pub enum NotifierError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Webhook rejected message with status {status}: {body}")]
    Status { status: u16, body: String },
}

/// Talking to the issue tracker failed
#[derive(Debug, Error)]
pub enum IssueTrackerError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Issue tracker returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Invalid issue tracker parameters: {0}")]
    InvalidParams(String),

    #[error("Invalid issue tracker URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}
