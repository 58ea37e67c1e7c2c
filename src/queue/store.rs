//! Persistence port for the queue snapshot.
//!
//! The engine rewrites the whole item list on every mutation, so the port is
//! just `load`/`save` of the full snapshot.

use std::sync::Mutex;

use async_trait::async_trait;
use tracing::{debug, instrument};

use super::error::QueueError;
use super::item::QueueItem;
use crate::db::Database;

/// Durable key holding the serialized item list.
pub const QUEUE_ITEMS_KEY: &str = "queue.items";

/// Load/save of the full queue snapshot.
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Reads the persisted items; an empty store yields an empty list.
    async fn load(&self) -> Result<Vec<QueueItem>, QueueError>;

    /// Replaces the persisted items.
    async fn save(&self, items: &[QueueItem]) -> Result<(), QueueError>;
}

/// SQLite-backed store writing the snapshot as JSON under [`QUEUE_ITEMS_KEY`].
#[derive(Debug, Clone)]
pub struct SqliteQueueStore {
    db: Database,
}

impl SqliteQueueStore {
    /// Wraps an open database.
    #[must_use]
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl QueueStore for SqliteQueueStore {
    #[instrument(skip(self))]
    async fn load(&self) -> Result<Vec<QueueItem>, QueueError> {
        let Some(raw) = self.db.get(QUEUE_ITEMS_KEY).await? else {
            debug!("no persisted queue snapshot");
            return Ok(Vec::new());
        };
        let items: Vec<QueueItem> = serde_json::from_str(&raw)?;
        debug!(count = items.len(), "loaded queue snapshot");
        Ok(items)
    }

    #[instrument(skip(self, items), fields(count = items.len()))]
    async fn save(&self, items: &[QueueItem]) -> Result<(), QueueError> {
        let raw = serde_json::to_string(items)?;
        self.db.put(QUEUE_ITEMS_KEY, &raw).await?;
        Ok(())
    }
}

/// Volatile store for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryQueueStore {
    items: Mutex<Vec<QueueItem>>,
    saves: Mutex<usize>,
}

impl MemoryQueueStore {
    /// Creates a store pre-populated with `items`.
    #[must_use]
    pub fn with_items(items: Vec<QueueItem>) -> Self {
        Self {
            items: Mutex::new(items),
            saves: Mutex::new(0),
        }
    }

    /// Returns the last saved snapshot.
    #[must_use]
    pub fn snapshot(&self) -> Vec<QueueItem> {
        self.items
            .lock()
            .map(|items| items.clone())
            .unwrap_or_default()
    }

    /// Returns how many times `save` has been called.
    #[must_use]
    pub fn save_count(&self) -> usize {
        self.saves.lock().map(|count| *count).unwrap_or_default()
    }
}

#[async_trait]
impl QueueStore for MemoryQueueStore {
    async fn load(&self) -> Result<Vec<QueueItem>, QueueError> {
        Ok(self.snapshot())
    }

    async fn save(&self, items: &[QueueItem]) -> Result<(), QueueError> {
        let mut stored = self
            .items
            .lock()
            .map_err(|_| QueueError::Serialization("memory store poisoned".to_string()))?;
        *stored = items.to_vec();
        if let Ok(mut saves) = self.saves.lock() {
            *saves += 1;
        }
        Ok(())
    }
}
