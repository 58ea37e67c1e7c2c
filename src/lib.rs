//! Torbox Fetch Core Library
//!
//! This library tracks remote Torbox web-download jobs: links are queued,
//! submitted as remote jobs, polled until the remote side finishes, and the
//! resulting media is streamed into a local library with a provenance sidecar.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`torbox`] - Authenticated HTTP client, envelope unwrapping and retry policy
//! - [`jobs`] - Normalization of job payloads and job lookup strategies
//! - [`queue`] - Queue items, persistence and the per-item state machine
//! - [`materialize`] - Streaming media to disk and writing sidecars
//! - [`library`] - Scanning and pruning the download directory
//! - [`settings`] - Config file and environment settings
//! - [`db`] - Database connection and schema management

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod db;
pub mod jobs;
pub mod library;
pub mod materialize;
pub mod queue;
pub mod settings;
pub mod torbox;

// Re-export commonly used types
pub use db::{Database, DbError};
pub use jobs::{JobResolver, JobState, TorboxFileLink, TorboxJobReference, TorboxJobStatus};
pub use library::{LibraryError, LibraryItem, LibraryScanner};
pub use materialize::{FileMaterializer, MaterializeError};
pub use queue::{
    EngineConfig, EngineError, NewQueueItem, QueueEngine, QueueError, QueueItem, QueueStatus,
    QueueStore, SqliteQueueStore,
};
pub use settings::{FileSettings, Settings, SettingsError, SettingsValues};
pub use torbox::{
    DEFAULT_MAX_RETRIES, JobApi, RetryPolicy, TorboxClient, TorboxConfig, TorboxError,
    TorboxErrorKind,
};
