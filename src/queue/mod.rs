//! Download queue: items, persistence and the engine that drives them.
//!
//! # Overview
//!
//! The queue system consists of:
//! - [`QueueEngine`] - Owns the ordered item list and runs the per-item state machine
//! - [`QueueItem`] - Individual queue entry with provenance and job fields
//! - [`QueueStatus`] - Item lifecycle states
//! - [`QueueStore`] - Whole-list persistence seam (`SQLite` or in-memory)
//! - [`QueueError`] - Operation error types
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use torbox_core::queue::{EngineConfig, NewQueueItem, QueueEngine, SqliteQueueStore};
//! use torbox_core::Database;
//!
//! let db = Database::new(Path::new("queue.db")).await?;
//! let engine = QueueEngine::load(
//!     Arc::new(SqliteQueueStore::new(db)),
//!     api,
//!     settings,
//!     EngineConfig::default(),
//! )
//! .await?;
//!
//! engine.add_to_queue(vec![NewQueueItem::new("https://host/post/1")]).await?;
//! let sweep = engine.start()?;
//! ```

mod engine;
mod error;
mod item;
mod store;

pub use engine::{
    CANCELLED_BY_USER, DEFAULT_MAX_NOT_FOUND_POLLS, DEFAULT_POLL_INTERVAL, DEFAULT_SWEEP_INTERVAL,
    EngineConfig, EngineError, MAX_IN_FLIGHT_LIMIT, QueueEngine,
};
pub use error::{QueueDbErrorKind, QueueError};
pub use item::{NewQueueItem, QueueItem, QueueStatus, UNKNOWN_OWNER};
pub use store::{MemoryQueueStore, QUEUE_ITEMS_KEY, QueueStore, SqliteQueueStore};

/// Result type for queue operations.
pub type Result<T> = std::result::Result<T, QueueError>;
