//! Browsable view of the download directory.
//!
//! Entries are rebuilt from the filesystem on every scan; sidecars enrich
//! them but are never required.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, instrument};

use crate::materialize::{DEFAULT_MEDIA_EXTENSION, is_plain_filename, read_sidecar, sidecar_path};
use crate::queue::UNKNOWN_OWNER;

/// Library failures.
#[derive(Debug, Error)]
pub enum LibraryError {
    /// The requested name is not a bare filename.
    #[error("invalid library filename '{0}': path components are not allowed")]
    InvalidFilename(String),

    /// The name does not carry the library media extension.
    #[error(
        "'{0}' is not a library media file; only .{ext} files can be deleted",
        ext = DEFAULT_MEDIA_EXTENSION
    )]
    NotMedia(String),

    /// Named media file does not exist.
    #[error("library file not found: {0}")]
    NotFound(String),

    /// Filesystem failure.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path involved.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
}

/// One media file in the library.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LibraryItem {
    /// File stem.
    pub id: String,
    /// File name with extension.
    pub filename: String,
    /// Absolute path.
    pub path: PathBuf,
    /// Size in bytes.
    pub size: u64,
    /// Owner from the sidecar, or `unknown`.
    pub owner: String,
    /// Caption from the sidecar.
    pub caption: String,
    /// Keywords from the sidecar.
    pub keywords: Vec<String>,
    /// Sidecar `addedAt`, falling back to the file modification time.
    pub added_at: DateTime<Utc>,
    /// Thumbnail URL from the sidecar.
    pub thumbnail: Option<String>,
}

/// Scans and prunes a download directory.
#[derive(Debug, Clone)]
pub struct LibraryScanner {
    dir: PathBuf,
}

impl LibraryScanner {
    /// Creates a scanner over `dir`.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Lists media files, newest first.
    ///
    /// A missing directory yields an empty list.
    ///
    /// # Errors
    ///
    /// Returns [`LibraryError::Io`] if the directory exists but cannot be read.
    #[instrument(skip(self), fields(dir = %self.dir.display()))]
    pub async fn scan(&self) -> Result<Vec<LibraryItem>, LibraryError> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                debug!("library directory does not exist");
                return Ok(Vec::new());
            }
            Err(error) => return Err(self.io_error(&self.dir, error)),
        };

        let mut items = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| self.io_error(&self.dir, e))?
        {
            let path = entry.path();
            if !is_media_file(&path) {
                continue;
            }
            let metadata = match entry.metadata().await {
                Ok(metadata) if metadata.is_file() => metadata,
                Ok(_) => continue,
                Err(error) => {
                    debug!(path = %path.display(), error = %error, "skipping unreadable entry");
                    continue;
                }
            };
            items.push(build_item(path, &metadata).await);
        }

        items.sort_by(|a, b| b.added_at.cmp(&a.added_at));
        debug!(count = items.len(), "library scanned");
        Ok(items)
    }

    /// Removes a media file and its sidecar.
    ///
    /// A missing sidecar is not an error.
    ///
    /// # Errors
    ///
    /// - [`LibraryError::InvalidFilename`] for names with path components
    /// - [`LibraryError::NotMedia`] for names the scan would not list
    /// - [`LibraryError::NotFound`] when the media file does not exist
    /// - [`LibraryError::Io`] for other filesystem failures
    #[instrument(skip(self), fields(dir = %self.dir.display()))]
    pub async fn delete(&self, filename: &str) -> Result<(), LibraryError> {
        if !is_plain_filename(filename) {
            return Err(LibraryError::InvalidFilename(filename.to_string()));
        }
        if !is_media_file(Path::new(filename)) {
            return Err(LibraryError::NotMedia(filename.to_string()));
        }

        let media_path = self.dir.join(filename);
        match tokio::fs::remove_file(&media_path).await {
            Ok(()) => {}
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                return Err(LibraryError::NotFound(filename.to_string()));
            }
            Err(error) => return Err(self.io_error(&media_path, error)),
        }

        let sidecar = sidecar_path(&media_path);
        match tokio::fs::remove_file(&sidecar).await {
            Ok(()) => {}
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                debug!("no sidecar to remove");
            }
            Err(error) => return Err(self.io_error(&sidecar, error)),
        }

        info!(filename, "library entry deleted");
        Ok(())
    }

    #[allow(clippy::unused_self)]
    fn io_error(&self, path: &Path, source: std::io::Error) -> LibraryError {
        LibraryError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

fn is_media_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case(DEFAULT_MEDIA_EXTENSION))
}

async fn build_item(path: PathBuf, metadata: &std::fs::Metadata) -> LibraryItem {
    let filename = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let id = path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default();
    let modified: DateTime<Utc> = metadata
        .modified()
        .map(DateTime::<Utc>::from)
        .unwrap_or_else(|_| Utc::now());

    let sidecar = read_sidecar(&sidecar_path(&path)).await.unwrap_or_default();
    let owner = if sidecar.owner.trim().is_empty() {
        UNKNOWN_OWNER.to_string()
    } else {
        sidecar.owner
    };

    LibraryItem {
        id,
        filename,
        size: metadata.len(),
        owner,
        caption: sidecar.caption,
        keywords: sidecar.keywords,
        added_at: sidecar.added_at.unwrap_or(modified),
        thumbnail: sidecar.thumbnail,
        path,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[tokio::test]
    async fn test_scan_missing_dir_is_empty() {
        let temp = TempDir::new().unwrap();
        let scanner = LibraryScanner::new(temp.path().join("absent"));
        assert!(scanner.scan().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_scan_filters_extension_case_insensitively() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("a.mp4"), b"1").unwrap();
        std::fs::write(temp.path().join("b.MP4"), b"22").unwrap();
        std::fs::write(temp.path().join("c.mkv"), b"3").unwrap();
        std::fs::write(temp.path().join("a.json"), b"{}").unwrap();
        std::fs::create_dir(temp.path().join("d.mp4")).unwrap();

        let mut ids: Vec<String> = LibraryScanner::new(temp.path())
            .scan()
            .await
            .unwrap()
            .into_iter()
            .map(|item| item.id)
            .collect();
        ids.sort();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_delete_rejects_path_components() {
        let temp = TempDir::new().unwrap();
        let scanner = LibraryScanner::new(temp.path());
        for name in ["../x.mp4", "sub/x.mp4", "..", ""] {
            assert!(
                matches!(scanner.delete(name).await, Err(LibraryError::InvalidFilename(_))),
                "{name}"
            );
        }
    }

    #[tokio::test]
    async fn test_delete_rejects_non_media_and_keeps_files() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("notes.txt"), b"keep").unwrap();
        std::fs::write(temp.path().join("notes.json"), b"{}").unwrap();
        let scanner = LibraryScanner::new(temp.path());

        for name in ["notes.txt", "notes.json", "notes"] {
            assert!(
                matches!(scanner.delete(name).await, Err(LibraryError::NotMedia(_))),
                "{name}"
            );
        }
        assert!(temp.path().join("notes.txt").exists());
        assert!(temp.path().join("notes.json").exists());
    }

    #[tokio::test]
    async fn test_delete_missing_media_is_not_found() {
        let temp = TempDir::new().unwrap();
        let result = LibraryScanner::new(temp.path()).delete("nope.mp4").await;
        assert!(matches!(result, Err(LibraryError::NotFound(_))));
    }
}
