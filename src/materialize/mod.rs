//! Writing completed downloads to the local library.
//!
//! [`FileMaterializer`] resolves a filename for a file link, streams the media
//! bytes to disk and writes the provenance sidecar next to it.

mod filename;
mod sidecar;

use std::path::{Path, PathBuf};

use futures_util::StreamExt;
use thiserror::Error;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

pub use filename::{
    DEFAULT_MEDIA_EXTENSION, extension_from_url, is_plain_filename, owner_slug, resolve_filename,
    resolve_unique_path, sanitize_filename,
};
pub use sidecar::{SIDECAR_EXTENSION, Sidecar, read_sidecar, sidecar_path, write_sidecar};

use crate::jobs::TorboxFileLink;
use crate::queue::QueueItem;
use crate::torbox::{ByteStream, TorboxError};

/// Errors produced while materializing media.
#[derive(Debug, Error)]
pub enum MaterializeError {
    /// Filesystem failure.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path involved.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The media stream failed mid-transfer.
    #[error("media stream failed: {0}")]
    Stream(#[from] TorboxError),

    /// Sidecar could not be serialized.
    #[error("sidecar serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),

    /// The owning poller was torn down mid-transfer.
    #[error("materialization cancelled")]
    Cancelled,
}

impl MaterializeError {
    pub(crate) fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Streams media into a download directory.
#[derive(Debug, Clone)]
pub struct FileMaterializer {
    download_dir: PathBuf,
}

impl FileMaterializer {
    /// Creates a materializer targeting `download_dir`.
    #[must_use]
    pub fn new(download_dir: impl Into<PathBuf>) -> Self {
        Self {
            download_dir: download_dir.into(),
        }
    }

    /// Returns the target directory.
    #[must_use]
    pub fn download_dir(&self) -> &Path {
        &self.download_dir
    }

    /// Writes `stream` to disk for `item` and records its sidecar.
    ///
    /// Returns the media path. A partially written media file is removed
    /// when the stream fails.
    ///
    /// # Errors
    ///
    /// Returns [`MaterializeError`] if the directory cannot be created, the
    /// stream fails, or a write fails.
    pub async fn materialize(
        &self,
        item: &QueueItem,
        link: &TorboxFileLink,
        stream: ByteStream,
    ) -> Result<PathBuf, MaterializeError> {
        self.materialize_until_cancelled(item, link, stream, &CancellationToken::new())
            .await
    }

    /// Like [`materialize`](Self::materialize), but stops as soon as `cancel`
    /// fires. A cancelled transfer leaves neither media nor sidecar behind.
    ///
    /// # Errors
    ///
    /// Returns [`MaterializeError::Cancelled`] when `cancel` fires before the
    /// sidecar is written, plus every error of `materialize`.
    #[instrument(skip(self, item, stream, cancel), fields(item_id = %item.id, url = %link.url))]
    pub async fn materialize_until_cancelled(
        &self,
        item: &QueueItem,
        link: &TorboxFileLink,
        stream: ByteStream,
        cancel: &CancellationToken,
    ) -> Result<PathBuf, MaterializeError> {
        tokio::fs::create_dir_all(&self.download_dir)
            .await
            .map_err(|e| MaterializeError::io(&self.download_dir, e))?;

        let filename = resolve_filename(item, link);
        let (media_path, file) = reserve_paths(&self.download_dir, &filename).await?;
        debug!(path = %media_path.display(), "resolved media path");

        let result = match stream_to_file(file, stream, &media_path, cancel).await {
            Ok(bytes) if cancel.is_cancelled() => {
                debug!(bytes, "transfer finished after cancellation");
                Err(MaterializeError::Cancelled)
            }
            Ok(bytes) => write_sidecar(&sidecar_path(&media_path), &Sidecar::from_item(item))
                .await
                .map(|()| bytes),
            Err(error) => Err(error),
        };

        match result {
            Ok(bytes) => {
                info!(path = %media_path.display(), bytes, "media materialized");
                Ok(media_path)
            }
            Err(error) => {
                debug!(path = %media_path.display(), error = %error, "cleaning up partial files");
                let _ = tokio::fs::remove_file(&media_path).await;
                let _ = tokio::fs::remove_file(sidecar_path(&media_path)).await;
                Err(error)
            }
        }
    }
}

const MAX_RESERVE_ATTEMPTS: usize = 5;

/// Claims a media path and its sidecar path with `create_new`, so concurrent
/// pollers never share a stem. The sidecar is left as an empty placeholder
/// until [`write_sidecar`] replaces it.
async fn reserve_paths(dir: &Path, filename: &str) -> Result<(PathBuf, File), MaterializeError> {
    let mut attempt = 0;
    loop {
        attempt += 1;
        let media_path = resolve_unique_path(dir, filename);
        let file = match create_new(&media_path).await {
            Ok(file) => file,
            Err(error)
                if error.kind() == std::io::ErrorKind::AlreadyExists
                    && attempt < MAX_RESERVE_ATTEMPTS =>
            {
                continue;
            }
            Err(error) => return Err(MaterializeError::io(&media_path, error)),
        };

        let sidecar = sidecar_path(&media_path);
        match create_new(&sidecar).await {
            Ok(_) => return Ok((media_path, file)),
            Err(error) => {
                drop(file);
                let _ = tokio::fs::remove_file(&media_path).await;
                if error.kind() != std::io::ErrorKind::AlreadyExists
                    || attempt >= MAX_RESERVE_ATTEMPTS
                {
                    return Err(MaterializeError::io(&sidecar, error));
                }
            }
        }
    }
}

async fn create_new(path: &Path) -> std::io::Result<File> {
    OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .await
}

async fn stream_to_file(
    file: File,
    mut stream: ByteStream,
    path: &Path,
    cancel: &CancellationToken,
) -> Result<u64, MaterializeError> {
    let mut writer = BufWriter::new(file);
    let mut bytes_written: u64 = 0;

    loop {
        let next = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(MaterializeError::Cancelled),
            next = stream.next() => next,
        };
        let Some(chunk) = next else {
            break;
        };
        let chunk = chunk?;
        writer
            .write_all(&chunk)
            .await
            .map_err(|e| MaterializeError::io(path, e))?;
        bytes_written += chunk.len() as u64;
    }

    writer
        .flush()
        .await
        .map_err(|e| MaterializeError::io(path, e))?;

    Ok(bytes_written)
}
