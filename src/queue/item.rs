//! Queue item types and status definitions.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::QueueError;
use crate::jobs::TorboxJobReference;

/// Owner used when the producer supplies none.
pub const UNKNOWN_OWNER: &str = "unknown";

/// Status of a queue item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    /// Waiting to be claimed by a sweep.
    Pending,
    /// Claimed; remote job being created.
    Active,
    /// Remote job exists and is being polled.
    Downloading,
    /// Held by the user.
    Paused,
    /// Media materialized locally.
    Completed,
    /// Failed or cancelled; can be retried.
    Failed,
}

impl QueueStatus {
    /// Returns the persisted string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Downloading => "downloading",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Completed and failed items never advance on their own.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for QueueStatus {
    type Err = QueueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "active" => Ok(Self::Active),
            "downloading" => Ok(Self::Downloading),
            "paused" => Ok(Self::Paused),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            _ => Err(QueueError::invalid_status(s)),
        }
    }
}

/// A single item in the download queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueItem {
    /// UUID v4 identifier.
    pub id: String,
    /// Source link handed to Torbox.
    pub url: String,
    /// Account or channel the media belongs to.
    pub owner: String,
    /// Free-form caption.
    #[serde(default)]
    pub caption: String,
    /// Thumbnail URL.
    #[serde(default)]
    pub thumbnail: Option<String>,
    /// Search keywords.
    #[serde(default)]
    pub keywords: Vec<String>,
    /// Current state.
    pub status: QueueStatus,
    /// Percent complete, 0-100.
    #[serde(default)]
    pub progress: f64,
    /// Last failure message.
    #[serde(default)]
    pub error: Option<String>,
    /// Remote job id.
    #[serde(default)]
    pub job_id: Option<String>,
    /// Remote job hash.
    #[serde(default)]
    pub job_hash: Option<String>,
    /// Materialized media path.
    #[serde(default)]
    pub local_path: Option<String>,
    /// When the item was queued.
    pub added_at: DateTime<Utc>,
    /// When the media landed on disk.
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    /// Number of explicit retries.
    #[serde(default)]
    pub retry_count: u32,
}

impl QueueItem {
    /// Returns the remote job reference, if either side is known.
    #[must_use]
    pub fn job_reference(&self) -> Option<TorboxJobReference> {
        let reference = TorboxJobReference::new(self.job_id.clone(), self.job_hash.clone());
        reference.is_present().then_some(reference)
    }

    /// Clears every field tied to a remote job lifecycle.
    pub fn clear_job_fields(&mut self) {
        self.job_id = None;
        self.job_hash = None;
        self.progress = 0.0;
        self.local_path = None;
        self.completed_at = None;
    }
}

/// Producer input for [`QueueEngine::add_to_queue`](super::QueueEngine::add_to_queue).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewQueueItem {
    /// Source link; required.
    pub url: String,
    /// Owner; defaults to `"unknown"`.
    #[serde(default)]
    pub owner: Option<String>,
    /// Caption; defaults to empty.
    #[serde(default)]
    pub caption: Option<String>,
    /// Thumbnail URL.
    #[serde(default)]
    pub thumbnail: Option<String>,
    /// Keywords; defaults to empty.
    #[serde(default)]
    pub keywords: Vec<String>,
}

impl NewQueueItem {
    /// Creates an input with only a URL.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    /// Sets the owner.
    #[must_use]
    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    /// Sets the caption.
    #[must_use]
    pub fn with_caption(mut self, caption: impl Into<String>) -> Self {
        self.caption = Some(caption.into());
        self
    }

    /// Sets the thumbnail URL.
    #[must_use]
    pub fn with_thumbnail(mut self, thumbnail: impl Into<String>) -> Self {
        self.thumbnail = Some(thumbnail.into());
        self
    }

    /// Sets the keywords.
    #[must_use]
    pub fn with_keywords(mut self, keywords: Vec<String>) -> Self {
        self.keywords = keywords;
        self
    }

    /// Checks the input without consuming it.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Validation`] when the URL is blank.
    pub fn validate(&self) -> Result<(), QueueError> {
        if self.url.trim().is_empty() {
            return Err(QueueError::validation("url must not be empty"));
        }
        Ok(())
    }

    /// Builds a fresh pending item with defaults applied.
    #[must_use]
    pub fn into_item(self, added_at: DateTime<Utc>) -> QueueItem {
        let owner = self
            .owner
            .map(|owner| owner.trim().to_string())
            .filter(|owner| !owner.is_empty())
            .unwrap_or_else(|| UNKNOWN_OWNER.to_string());
        let keywords = self
            .keywords
            .into_iter()
            .map(|keyword| keyword.trim().to_string())
            .filter(|keyword| !keyword.is_empty())
            .collect();

        QueueItem {
            id: Uuid::new_v4().to_string(),
            url: self.url.trim().to_string(),
            owner,
            caption: self.caption.unwrap_or_default(),
            thumbnail: self.thumbnail.filter(|thumb| !thumb.trim().is_empty()),
            keywords,
            status: QueueStatus::Pending,
            progress: 0.0,
            error: None,
            job_id: None,
            job_hash: None,
            local_path: None,
            added_at,
            completed_at: None,
            retry_count: 0,
        }
    }
}
