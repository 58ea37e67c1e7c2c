//! CLI command handlers.

mod check;
mod config;
mod library;
mod queue;
mod run;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use torbox_core::settings::resolve_default_db_path;
use torbox_core::{
    DEFAULT_MAX_RETRIES, Database, EngineConfig, FileSettings, QueueEngine, RetryPolicy, Settings,
    SqliteQueueStore, TorboxClient, TorboxConfig,
};
use tracing::debug;

pub use check::run_check_command;
pub use config::{
    run_config_set_base_url_command, run_config_set_dir_command, run_config_set_key_command,
    run_config_show_command,
};
pub use library::{run_library_delete_command, run_library_scan_command};
pub use queue::{Transition, run_add_command, run_list_command, run_transition_command};
pub use run::run_engine_command;

/// Settings plus resolved storage locations shared by every command.
pub struct AppContext {
    settings: FileSettings,
    db_path: PathBuf,
}

impl AppContext {
    /// Loads settings and resolves the queue database path.
    pub fn load(config: Option<&Path>, db: Option<&Path>) -> Result<Self> {
        let settings = FileSettings::load(config).context("failed to load settings")?;
        settings
            .values()
            .validate()
            .context("invalid settings in config file")?;
        let db_path = db
            .map(Path::to_path_buf)
            .or_else(resolve_default_db_path)
            .context("cannot determine the queue database location; pass --db <PATH>")?;
        debug!(db = %db_path.display(), config = ?settings.path(), "context resolved");
        Ok(Self { settings, db_path })
    }

    pub fn settings(&self) -> &FileSettings {
        &self.settings
    }

    pub fn settings_mut(&mut self) -> &mut FileSettings {
        &mut self.settings
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// Builds the Torbox client from the effective key, host and retry budget.
    pub fn client(&self) -> Result<TorboxClient> {
        let retries = self
            .settings
            .values()
            .max_retries
            .unwrap_or(DEFAULT_MAX_RETRIES);
        let config = TorboxConfig::new(self.settings.api_base_url(), self.settings.api_key())
            .with_retry_policy(RetryPolicy::with_max_retries(retries));
        TorboxClient::new(config).context("failed to build Torbox client")
    }

    /// Opens the queue database and loads the engine with startup reconciliation.
    pub async fn open_engine(&self) -> Result<QueueEngine> {
        if let Some(parent) = self.db_path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("failed to create database directory {}", parent.display())
            })?;
        }
        let db = Database::new(&self.db_path)
            .await
            .with_context(|| format!("failed to open queue database {}", self.db_path.display()))?;

        let engine = QueueEngine::load(
            Arc::new(SqliteQueueStore::new(db)),
            Arc::new(self.client()?),
            Arc::new(self.settings.clone()),
            EngineConfig::from_values(self.settings.values()),
        )
        .await
        .context("failed to load queue")?;
        Ok(engine)
    }
}
