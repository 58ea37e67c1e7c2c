//! Provenance sidecar written next to each media file.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use super::MaterializeError;
use crate::queue::QueueItem;

/// Extension of sidecar files.
pub const SIDECAR_EXTENSION: &str = "json";

/// Sidecar document.
///
/// Every field has a default so that partially written or older sidecars
/// still deserialize.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Sidecar {
    /// Owner of the media.
    pub owner: String,
    /// Caption.
    pub caption: String,
    /// Keywords.
    pub keywords: Vec<String>,
    /// When the item was queued.
    pub added_at: Option<DateTime<Utc>>,
    /// Source link the job was created from.
    pub source: String,
    /// Thumbnail URL.
    pub thumbnail: Option<String>,
    /// Remote job id.
    pub job_id: Option<String>,
    /// Remote job hash.
    pub job_hash: Option<String>,
}

impl Sidecar {
    /// Captures provenance from a queue item.
    #[must_use]
    pub fn from_item(item: &QueueItem) -> Self {
        Self {
            owner: item.owner.clone(),
            caption: item.caption.clone(),
            keywords: item.keywords.clone(),
            added_at: Some(item.added_at),
            source: item.url.clone(),
            thumbnail: item.thumbnail.clone(),
            job_id: item.job_id.clone(),
            job_hash: item.job_hash.clone(),
        }
    }
}

/// Sidecar path for a media file: same basename, `.json` extension.
#[must_use]
pub fn sidecar_path(media_path: &Path) -> PathBuf {
    media_path.with_extension(SIDECAR_EXTENSION)
}

/// Writes the sidecar atomically (temp file, then rename).
///
/// # Errors
///
/// Returns [`MaterializeError`] on serialization or I/O failure; the temp
/// file is removed on a failed rename.
#[instrument(skip(sidecar), fields(path = %path.display()))]
pub async fn write_sidecar(path: &Path, sidecar: &Sidecar) -> Result<(), MaterializeError> {
    let serialized = serde_json::to_vec_pretty(sidecar)?;
    let temp_path = path.with_extension(format!("{SIDECAR_EXTENSION}.{}.tmp", std::process::id()));

    tokio::fs::write(&temp_path, &serialized)
        .await
        .map_err(|e| MaterializeError::io(&temp_path, e))?;

    if let Err(error) = tokio::fs::rename(&temp_path, path).await {
        let _ = tokio::fs::remove_file(&temp_path).await;
        return Err(MaterializeError::io(path, error));
    }

    debug!("sidecar written");
    Ok(())
}

/// Reads a sidecar, returning `None` when it is missing or unreadable.
pub async fn read_sidecar(path: &Path) -> Option<Sidecar> {
    let raw = tokio::fs::read(path).await.ok()?;
    match serde_json::from_slice(&raw) {
        Ok(sidecar) => Some(sidecar),
        Err(error) => {
            debug!(path = %path.display(), error = %error, "ignoring corrupt sidecar");
            None
        }
    }
}
