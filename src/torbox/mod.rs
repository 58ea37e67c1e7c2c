//! Torbox API transport.
//!
//! This module provides:
//! - [`TorboxClient`] - authenticated HTTP client with retry/backoff
//! - [`JobApi`] - the typed operation seam consumed by the resolver and engine
//! - [`TorboxError`] / [`TorboxErrorKind`] - the closed error taxonomy
//! - [`RetryPolicy`] - exponential backoff configuration

mod api;
mod client;
mod constants;
mod envelope;
mod error;
mod retry;

pub use api::{ByteStream, JobApi};
pub use client::{
    RequestBody, TorboxClient, TorboxConfig, parse_retry_after, redact_api_key,
};
pub use constants::{DEFAULT_BASE_URL, default_user_agent};
pub use envelope::{body_snippet, envelope_message};
pub use error::{TorboxError, TorboxErrorKind};
pub use retry::{
    DEFAULT_MAX_RETRIES, FailureType, RetryDecision, RetryPolicy, classify_error,
};
