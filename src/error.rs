//! Error types for citation resolution and job processing.

use crate::types::JobStatus;
use std::time::Duration;

/// Errors that can occur while resolving citations or running jobs.
#[derive(Debug, thiserror::Error)]
pub enum HarvestError {
    /// HTTP request failed (network, timeout, etc.)
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// A remote API returned an error status code.
    #[error("API error (HTTP {status}): {message}")]
    Api { status: u16, message: String },

    /// Rate limited by the remote API (HTTP 429).
    #[error("Rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Option<Duration> },

    /// Failed to parse a remote response.
    #[error("Failed to parse response: {0}")]
    Parse(String),

    /// The submitted batch is empty or cannot be segmented.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The extraction service could not segment the batch.
    #[error("Extraction failed: {0}")]
    Extraction(String),

    /// Resource not found (unknown job, HTTP 404, ...).
    #[error("Not found: {0}")]
    NotFound(String),

    /// An entry with this canonical identifier already exists.
    #[error("Duplicate identifier: {0}")]
    DuplicateIdentifier(String),

    /// The job is completed, failed or cancelled and can no longer change.
    #[error("Job {job_id} already finished as {status}")]
    JobFinished { job_id: String, status: JobStatus },

    /// The durable store rejected or failed a write.
    #[error("Store error: {0}")]
    Store(String),

    /// Filesystem error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A worker failed in a way it could not recover from.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl HarvestError {
    /// Whether this error comes from a single outbound call that a caller may
    /// swallow and move past.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Http(_) | Self::Api { .. } | Self::RateLimited { .. } | Self::Parse(_)
        )
    }
}

impl HarvestError {
    /// The final status of the job, when this error reports a finished job.
    pub fn finished_status(&self) -> Option<JobStatus> {
        match self {
            Self::JobFinished { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Convenience alias for Results using [`HarvestError`].
pub type Result<T> = std::result::Result<T, HarvestError>;
