//! Canonical job types produced by the normalizer.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Remote job lifecycle state after vocabulary normalization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Accepted, waiting in the remote queue.
    Queued,
    /// Waiting on an external condition.
    Pending,
    /// Being prepared; also the fallback for unknown vocabulary.
    Processing,
    /// Transferring bytes.
    Downloading,
    /// Finished; file links should become available.
    Completed,
    /// Failed remotely.
    Failed,
    /// Cancelled remotely.
    Cancelled,
}

impl JobState {
    /// Returns the canonical lowercase label.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Downloading => "downloading",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Returns true when the remote job will make no further progress.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Correlation pair linking a local item to its remote job.
///
/// Either side may be missing. The hash can rotate server-side between polls.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TorboxJobReference {
    /// Numeric or string job identifier, stringified.
    pub job_id: Option<String>,
    /// Opaque job hash.
    pub job_hash: Option<String>,
}

impl TorboxJobReference {
    /// Builds a reference, discarding blank sides.
    #[must_use]
    pub fn new(job_id: Option<String>, job_hash: Option<String>) -> Self {
        let clean = |value: Option<String>| {
            value
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        Self {
            job_id: clean(job_id),
            job_hash: clean(job_hash),
        }
    }

    /// Returns true when at least one side is present.
    #[must_use]
    pub fn is_present(&self) -> bool {
        self.job_id.is_some() || self.job_hash.is_some()
    }

    /// Returns the job id as an integer, when it is one.
    #[must_use]
    pub fn numeric_id(&self) -> Option<u64> {
        self.job_id.as_deref().and_then(|id| id.parse().ok())
    }
}

impl fmt::Display for TorboxJobReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.job_id, &self.job_hash) {
            (Some(id), Some(hash)) => write!(f, "{id}/{hash}"),
            (Some(id), None) => write!(f, "{id}"),
            (None, Some(hash)) => write!(f, "{hash}"),
            (None, None) => write!(f, "<none>"),
        }
    }
}

/// Canonical remote job status.
#[derive(Debug, Clone, PartialEq)]
pub struct TorboxJobStatus {
    /// Stringified job id.
    pub job_id: Option<String>,
    /// Job hash.
    pub job_hash: Option<String>,
    /// Normalized state.
    pub status: JobState,
    /// Percent complete, clamped to [0, 100] and rounded to 2 decimals.
    pub progress: f64,
    /// Total size, when reported.
    pub bytes_total: Option<u64>,
    /// Bytes transferred, when reported.
    pub bytes_downloaded: Option<u64>,
    /// Human-readable server message.
    pub message: Option<String>,
    /// Raw record, kept for diagnostics and link extraction.
    pub raw: Value,
}

impl TorboxJobStatus {
    /// Returns the correlation pair carried by this status.
    #[must_use]
    pub fn reference(&self) -> TorboxJobReference {
        TorboxJobReference::new(self.job_id.clone(), self.job_hash.clone())
    }
}

/// A downloadable file exposed by a completed job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TorboxFileLink {
    /// Direct download URL.
    pub url: String,
    /// Server-suggested filename.
    pub filename: Option<String>,
    /// Size in bytes, when reported.
    pub size_bytes: Option<u64>,
    /// Expiry, kept as the opaque string the server sent.
    pub expires_at: Option<String>,
}
