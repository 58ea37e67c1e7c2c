//! The job API seam used by the resolver and the queue engine.

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::BoxStream;
use serde_json::Value;

use super::TorboxError;

/// Streamed body of a media download.
pub type ByteStream = BoxStream<'static, Result<Bytes, TorboxError>>;

/// Typed Torbox operations.
///
/// [`TorboxClient`](super::TorboxClient) is the production implementation;
/// tests substitute in-memory fakes.
#[async_trait]
pub trait JobApi: Send + Sync {
    /// Fetches the authenticated user profile (`GET /v1/api/user/me`).
    async fn check_connection(&self) -> Result<Value, TorboxError>;

    /// Creates a remote web-download job and returns the raw creation payload.
    async fn create_job(&self, link: &str, name: Option<&str>) -> Result<Value, TorboxError>;

    /// Fetches the full job listing in whatever shape the server returns.
    async fn list_jobs(&self) -> Result<Value, TorboxError>;

    /// Direct hash-keyed job lookup.
    async fn job_by_hash(&self, hash: &str) -> Result<Value, TorboxError>;

    /// Secondary id-filtered web-download listing.
    async fn web_downloads_by_id(&self, id: &str) -> Result<Value, TorboxError>;

    /// Cancels a remote job by numeric id.
    async fn cancel_job(&self, job_id: u64) -> Result<(), TorboxError>;

    /// Opens a streamed GET on a file link.
    async fn download(&self, url: &str) -> Result<ByteStream, TorboxError>;
}
