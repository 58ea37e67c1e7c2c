//! Queue engine: the per-item state machine driving remote jobs to local files.
//!
//! A periodic sweep claims at most one claimable item per tick, gated by a
//! semaphore whose owned permit lives inside the spawned poller task. Each
//! poller owns a [`CancellationToken`] and a session number; results are
//! applied only while the poller still owns the item, so pause/cancel take
//! effect immediately even when an HTTP call is in flight.
//!
//! All mutations go through one [`tokio::sync::Mutex`] and are followed by a
//! full-list flush through the [`QueueStore`] while the lock is held.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{Instrument, debug, info, info_span, instrument, warn};

use super::error::QueueError;
use super::item::{NewQueueItem, QueueItem, QueueStatus};
use super::store::QueueStore;
use crate::jobs::{
    JobResolver, JobState, TorboxFileLink, TorboxJobReference, TorboxJobStatus,
    extract_file_links, reference_from_payload,
};
use crate::materialize::{FileMaterializer, MaterializeError};
use crate::settings::{Settings, SettingsValues};
use crate::torbox::{JobApi, TorboxError};

/// Error recorded on items cancelled by the user.
pub const CANCELLED_BY_USER: &str = "Cancelled by user";

/// Default sweep period.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(2);

/// Default poll period per in-flight item.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Default consecutive unresolved polls before an item fails.
pub const DEFAULT_MAX_NOT_FOUND_POLLS: u32 = 12;

/// Upper bound on concurrent in-flight items.
pub const MAX_IN_FLIGHT_LIMIT: usize = 8;

/// Engine tunables.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Sweep period.
    pub sweep_interval: Duration,
    /// Poll period for each in-flight item.
    pub poll_interval: Duration,
    /// Concurrent in-flight items (clamped to `1..=8`).
    pub max_in_flight: usize,
    /// Consecutive unresolved polls tolerated.
    pub max_not_found_polls: u32,
    /// Whether cancel also deletes the remote job.
    pub remote_cancel: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_in_flight: 1,
            max_not_found_polls: DEFAULT_MAX_NOT_FOUND_POLLS,
            remote_cancel: true,
        }
    }
}

impl EngineConfig {
    /// Applies file settings over the defaults.
    #[must_use]
    pub fn from_values(values: &SettingsValues) -> Self {
        let defaults = Self::default();
        Self {
            sweep_interval: values
                .sweep_interval_secs
                .map_or(defaults.sweep_interval, Duration::from_secs),
            poll_interval: values
                .poll_interval_secs
                .map_or(defaults.poll_interval, Duration::from_secs),
            max_in_flight: values.max_in_flight.unwrap_or(defaults.max_in_flight),
            max_not_found_polls: defaults.max_not_found_polls,
            remote_cancel: values.remote_cancel.unwrap_or(defaults.remote_cancel),
        }
    }
}

/// Engine failures surfaced to callers of user operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Validation or persistence failure.
    #[error(transparent)]
    Queue(#[from] QueueError),

    /// `start` was called twice.
    #[error("queue engine already started")]
    AlreadyStarted,
}

struct Poller {
    session: u64,
    token: CancellationToken,
}

#[derive(Default)]
struct EngineState {
    items: Vec<QueueItem>,
    pollers: HashMap<String, Poller>,
}

impl EngineState {
    fn owns(&self, id: &str, session: u64) -> bool {
        self.pollers.get(id).is_some_and(|p| p.session == session)
    }

    fn item_mut(&mut self, id: &str) -> Result<&mut QueueItem, QueueError> {
        self.items
            .iter_mut()
            .find(|item| item.id == id)
            .ok_or_else(|| QueueError::ItemNotFound(id.to_string()))
    }

    fn teardown(&mut self, id: &str) {
        if let Some(poller) = self.pollers.remove(id) {
            poller.token.cancel();
            debug!(item_id = id, session = poller.session, "poller torn down");
        }
    }

    fn is_claimable(&self, item: &QueueItem) -> bool {
        if self.pollers.contains_key(&item.id) {
            return false;
        }
        match item.status {
            QueueStatus::Pending => true,
            QueueStatus::Downloading => item.job_reference().is_some(),
            _ => false,
        }
    }
}

struct EngineInner {
    state: Mutex<EngineState>,
    store: Arc<dyn QueueStore>,
    api: Arc<dyn JobApi>,
    settings: Arc<dyn Settings>,
    config: EngineConfig,
    permits: Arc<Semaphore>,
    shutdown: CancellationToken,
    background: TaskTracker,
    next_session: AtomicU64,
    started: AtomicBool,
    unsaved: AtomicBool,
}

/// Owns the ordered item list and drives each item through its lifecycle.
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct QueueEngine {
    inner: Arc<EngineInner>,
}

impl QueueEngine {
    /// Loads the persisted queue and reconciles items interrupted mid-flight.
    ///
    /// - `active` items return to `pending` with job fields cleared
    /// - `downloading` items with a job reference stay `downloading` and are
    ///   re-adopted by the next sweep
    /// - `downloading` items without a reference return to `pending`
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Queue`] if the store cannot be read or the
    /// reconciled snapshot cannot be written.
    #[instrument(skip_all)]
    pub async fn load(
        store: Arc<dyn QueueStore>,
        api: Arc<dyn JobApi>,
        settings: Arc<dyn Settings>,
        config: EngineConfig,
    ) -> Result<Self, EngineError> {
        let mut config = config;
        config.max_in_flight = config.max_in_flight.clamp(1, MAX_IN_FLIGHT_LIMIT);
        config.max_not_found_polls = config.max_not_found_polls.max(1);

        let mut items = store.load().await?;
        let mut reconciled = 0usize;
        for item in &mut items {
            match item.status {
                QueueStatus::Active => {
                    item.status = QueueStatus::Pending;
                    item.clear_job_fields();
                    reconciled += 1;
                }
                QueueStatus::Downloading if item.job_reference().is_none() => {
                    item.status = QueueStatus::Pending;
                    item.clear_job_fields();
                    reconciled += 1;
                }
                _ => {}
            }
        }

        let engine = Self {
            inner: Arc::new(EngineInner {
                permits: Arc::new(Semaphore::new(config.max_in_flight)),
                state: Mutex::new(EngineState {
                    items,
                    pollers: HashMap::new(),
                }),
                store,
                api,
                settings,
                config,
                shutdown: CancellationToken::new(),
                background: TaskTracker::new(),
                next_session: AtomicU64::new(1),
                started: AtomicBool::new(false),
                unsaved: AtomicBool::new(false),
            }),
        };

        let state = engine.inner.state.lock().await;
        if reconciled > 0 {
            info!(reconciled, "reset interrupted items");
            engine.flush(&state).await?;
        }
        info!(count = state.items.len(), "queue loaded");
        drop(state);

        Ok(engine)
    }

    /// Returns the effective configuration.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Validates and appends new items.
    ///
    /// The whole batch is validated before anything is appended.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Validation`] for a blank URL, or a persistence
    /// error (the items stay queued in memory).
    #[instrument(skip_all, fields(count = items.len()))]
    pub async fn add_to_queue(
        &self,
        items: Vec<NewQueueItem>,
    ) -> Result<Vec<QueueItem>, EngineError> {
        for input in &items {
            input.validate()?;
        }

        let now = Utc::now();
        let created: Vec<QueueItem> = items.into_iter().map(|input| input.into_item(now)).collect();

        let mut state = self.inner.state.lock().await;
        state.items.extend(created.iter().cloned());
        info!(added = created.len(), total = state.items.len(), "items queued");
        self.flush(&state).await?;
        Ok(created)
    }

    /// Returns a snapshot of all items in queue order.
    pub async fn list(&self) -> Vec<QueueItem> {
        self.inner.state.lock().await.items.clone()
    }

    /// Returns one item by id.
    pub async fn get(&self, id: &str) -> Option<QueueItem> {
        self.inner
            .state
            .lock()
            .await
            .items
            .iter()
            .find(|item| item.id == id)
            .cloned()
    }

    /// Number of items with a live poller.
    pub async fn in_flight(&self) -> usize {
        self.inner.state.lock().await.pollers.len()
    }

    /// True when nothing is in flight and nothing can be claimed.
    pub async fn is_idle(&self) -> bool {
        let state = self.inner.state.lock().await;
        state.pollers.is_empty() && !state.items.iter().any(|item| state.is_claimable(item))
    }

    /// Pauses a pending, active or downloading item.
    ///
    /// The remote job is left untouched. Returns `false` (no change) for any
    /// other state.
    ///
    /// # Errors
    ///
    /// [`QueueError::ItemNotFound`] for an unknown id, or a persistence error.
    #[instrument(skip(self))]
    pub async fn pause(&self, id: &str) -> Result<bool, EngineError> {
        let mut state = self.inner.state.lock().await;
        let item = state.item_mut(id)?;
        if !matches!(
            item.status,
            QueueStatus::Pending | QueueStatus::Active | QueueStatus::Downloading
        ) {
            debug!(status = %item.status, "pause ignored");
            return Ok(false);
        }
        item.status = QueueStatus::Paused;
        state.teardown(id);
        info!(item_id = id, "item paused");
        self.flush(&state).await?;
        Ok(true)
    }

    /// Moves a paused item back to pending, clearing its error.
    ///
    /// # Errors
    ///
    /// [`QueueError::ItemNotFound`] for an unknown id, or a persistence error.
    #[instrument(skip(self))]
    pub async fn resume(&self, id: &str) -> Result<bool, EngineError> {
        let mut state = self.inner.state.lock().await;
        let item = state.item_mut(id)?;
        if item.status != QueueStatus::Paused {
            debug!(status = %item.status, "resume ignored");
            return Ok(false);
        }
        item.status = QueueStatus::Pending;
        item.error = None;
        info!(item_id = id, "item resumed");
        self.flush(&state).await?;
        Ok(true)
    }

    /// Fails a non-terminal item with [`CANCELLED_BY_USER`].
    ///
    /// When remote cancel is enabled and the item has a numeric job id, the
    /// remote job is deleted in a background task (awaited by
    /// [`shutdown`](Self::shutdown)); its outcome never changes the local
    /// result.
    ///
    /// # Errors
    ///
    /// [`QueueError::ItemNotFound`] for an unknown id, or a persistence error.
    #[instrument(skip(self))]
    pub async fn cancel(&self, id: &str) -> Result<bool, EngineError> {
        let mut state = self.inner.state.lock().await;
        let item = state.item_mut(id)?;
        if item.status.is_terminal() {
            debug!(status = %item.status, "cancel ignored");
            return Ok(false);
        }
        item.status = QueueStatus::Failed;
        item.error = Some(CANCELLED_BY_USER.to_string());
        let remote_job = item
            .job_reference()
            .as_ref()
            .and_then(TorboxJobReference::numeric_id);
        state.teardown(id);
        info!(item_id = id, "item cancelled");

        if self.inner.config.remote_cancel
            && let Some(job_id) = remote_job
        {
            self.spawn_remote_cancel(job_id);
        }

        self.flush(&state).await?;
        Ok(true)
    }

    /// Moves a failed item back to pending with its job fields cleared.
    ///
    /// # Errors
    ///
    /// [`QueueError::ItemNotFound`] for an unknown id, or a persistence error.
    #[instrument(skip(self))]
    pub async fn retry(&self, id: &str) -> Result<bool, EngineError> {
        let mut state = self.inner.state.lock().await;
        let item = state.item_mut(id)?;
        if item.status != QueueStatus::Failed {
            debug!(status = %item.status, "retry ignored");
            return Ok(false);
        }
        item.status = QueueStatus::Pending;
        item.clear_job_fields();
        item.error = None;
        item.retry_count += 1;
        info!(item_id = id, retry_count = item.retry_count, "item retried");
        self.flush(&state).await?;
        Ok(true)
    }

    /// Runs one sweep tick: claims the first claimable item if a permit is free.
    ///
    /// A snapshot left unsaved by an earlier failed flush is written first.
    ///
    /// Returns the claimed item id.
    ///
    /// # Errors
    ///
    /// Returns a persistence error from flushing the claim.
    pub async fn sweep_once(&self) -> Result<Option<String>, EngineError> {
        if self.inner.shutdown.is_cancelled() {
            return Ok(None);
        }
        if self.inner.unsaved.load(Ordering::SeqCst) {
            let state = self.inner.state.lock().await;
            if self.flush(&state).await.is_ok() {
                info!("unsaved queue snapshot persisted");
            }
        }
        let Ok(permit) = Arc::clone(&self.inner.permits).try_acquire_owned() else {
            return Ok(None);
        };

        let mut state = self.inner.state.lock().await;
        let Some(index) = state.items.iter().position(|item| state.is_claimable(item)) else {
            return Ok(None);
        };

        let session = self.inner.next_session.fetch_add(1, Ordering::SeqCst);
        let token = self.inner.shutdown.child_token();
        let item = &mut state.items[index];
        let id = item.id.clone();
        if item.status == QueueStatus::Pending {
            item.status = QueueStatus::Active;
            item.error = None;
        }
        info!(item_id = %id, session, status = %item.status, "item claimed");
        state.pollers.insert(
            id.clone(),
            Poller {
                session,
                token: token.clone(),
            },
        );
        let flushed = self.flush(&state).await;
        drop(state);

        let engine = self.clone();
        let span = info_span!("poller", item_id = %id, session);
        tokio::spawn(
            engine
                .run_poller(id.clone(), session, token, permit)
                .instrument(span),
        );

        flushed.map(|()| Some(id))
    }

    /// Spawns the periodic sweep loop.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::AlreadyStarted`] on a second call.
    pub fn start(&self) -> Result<JoinHandle<()>, EngineError> {
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return Err(EngineError::AlreadyStarted);
        }

        let engine = self.clone();
        let shutdown = self.inner.shutdown.clone();
        let period = self.inner.config.sweep_interval;
        Ok(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    () = shutdown.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                if let Err(error) = engine.sweep_once().await {
                    warn!(error = %error, "sweep failed");
                }
            }
            debug!("sweep loop stopped");
        }))
    }

    /// Stops the sweep, tears down every poller and waits for outstanding
    /// remote cancel requests.
    ///
    /// Items keep their persisted state and are reconciled on the next load.
    pub async fn shutdown(&self) {
        self.inner.shutdown.cancel();
        {
            let mut state = self.inner.state.lock().await;
            let ids: Vec<String> = state.pollers.keys().cloned().collect();
            for id in ids {
                state.teardown(&id);
            }
        }
        self.inner.background.close();
        self.inner.background.wait().await;
        info!("queue engine shut down");
    }

    /// Persists the full list. A failure marks the snapshot unsaved until the
    /// next successful flush.
    async fn flush(&self, state: &EngineState) -> Result<(), EngineError> {
        match self.inner.store.save(&state.items).await {
            Ok(()) => {
                self.inner.unsaved.store(false, Ordering::SeqCst);
                Ok(())
            }
            Err(error) => {
                warn!(error = %error, "queue flush failed");
                self.inner.unsaved.store(true, Ordering::SeqCst);
                Err(error.into())
            }
        }
    }

    fn spawn_remote_cancel(&self, job_id: u64) {
        let api = Arc::clone(&self.inner.api);
        self.inner.background.spawn(async move {
            match api.cancel_job(job_id).await {
                Ok(()) => info!(job_id, "remote job cancelled"),
                Err(error) => warn!(job_id, error = %error, "remote cancel failed"),
            }
        });
    }

    async fn run_poller(
        self,
        id: String,
        session: u64,
        token: CancellationToken,
        _permit: OwnedSemaphorePermit,
    ) {
        if let Err(message) = self.drive(&id, session, &token).await {
            warn!(error = %message, "item failed");
            self.apply(
                &id,
                session,
                &[QueueStatus::Active, QueueStatus::Downloading],
                |item| {
                    item.status = QueueStatus::Failed;
                    item.error = Some(message);
                    true
                },
            )
            .await;
        }

        let mut state = self.inner.state.lock().await;
        if state.owns(&id, session) {
            state.pollers.remove(&id);
        }
        debug!("poller finished");
    }

    /// Drives one item until it completes, fails, or the poller loses ownership.
    ///
    /// `Err` carries the message recorded on the failed item.
    async fn drive(&self, id: &str, session: u64, token: &CancellationToken) -> Result<(), String> {
        let Some(item) = self.owned_item(id, session).await else {
            return Ok(());
        };

        if item.job_reference().is_none() {
            let payload = self
                .inner
                .api
                .create_job(&item.url, None)
                .await
                .map_err(|e| e.to_string())?;
            let reference = reference_from_payload(&payload)
                .ok_or_else(|| "job creation response carried no job id or hash".to_string())?;
            info!(job = %reference, "remote job created");

            let applied = self
                .apply(id, session, &[QueueStatus::Active], |item| {
                    item.job_id = reference.job_id.clone();
                    item.job_hash = reference.job_hash.clone();
                    item.status = QueueStatus::Downloading;
                    item.progress = 0.0;
                    true
                })
                .await;
            if !applied {
                return Ok(());
            }
        } else {
            let applied = self
                .apply(
                    id,
                    session,
                    &[QueueStatus::Active, QueueStatus::Downloading],
                    |item| {
                        let changed = item.status == QueueStatus::Active;
                        item.status = QueueStatus::Downloading;
                        changed
                    },
                )
                .await;
            if !applied {
                return Ok(());
            }
            debug!("re-adopting existing remote job");
        }

        let mut ticker = tokio::time::interval(self.inner.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut not_found_polls: u32 = 0;

        loop {
            tokio::select! {
                () = token.cancelled() => return Ok(()),
                _ = ticker.tick() => {}
            }

            let Some(item) = self.owned_item(id, session).await else {
                return Ok(());
            };
            let Some(reference) = item.job_reference() else {
                return Err("job reference lost".to_string());
            };

            let resolved = JobResolver::new(self.inner.api.as_ref())
                .resolve(&reference)
                .await
                .map_err(|e| e.to_string())?;

            let Some(status) = resolved else {
                not_found_polls += 1;
                debug!(not_found_polls, "remote job not found");
                if not_found_polls >= self.inner.config.max_not_found_polls {
                    return Err(format!(
                        "Remote job {reference} not found after {not_found_polls} polls"
                    ));
                }
                continue;
            };
            not_found_polls = 0;

            match status.status {
                JobState::Completed => match first_link(&status, &reference) {
                    Ok(link) => return self.complete(id, session, token, &link, &status).await,
                    Err(error) => {
                        debug!(error = %error, "waiting for file links");
                        self.record_progress(id, session, &status).await;
                    }
                },
                JobState::Failed | JobState::Cancelled => {
                    return Err(status
                        .message
                        .clone()
                        .unwrap_or_else(|| format!("Remote job {}", status.status)));
                }
                _ => {
                    if !self.record_progress(id, session, &status).await {
                        return Ok(());
                    }
                }
            }
        }
    }

    async fn complete(
        &self,
        id: &str,
        session: u64,
        token: &CancellationToken,
        link: &TorboxFileLink,
        status: &TorboxJobStatus,
    ) -> Result<(), String> {
        let dir = self
            .inner
            .settings
            .require_download_dir()
            .map_err(|e| e.to_string())?;
        if !self.record_progress(id, session, status).await {
            return Ok(());
        }
        let Some(item) = self.owned_item(id, session).await else {
            return Ok(());
        };

        let stream = tokio::select! {
            () = token.cancelled() => return Ok(()),
            stream = self.inner.api.download(&link.url) => stream.map_err(|e| e.to_string())?,
        };
        let path = match FileMaterializer::new(dir)
            .materialize_until_cancelled(&item, link, stream, token)
            .await
        {
            Ok(path) => path,
            Err(MaterializeError::Cancelled) => {
                debug!("transfer abandoned; item changed while materializing");
                return Ok(());
            }
            Err(error) => return Err(error.to_string()),
        };

        let local_path = path.display().to_string();
        let applied = self
            .apply(id, session, &[QueueStatus::Downloading], |item| {
                item.status = QueueStatus::Completed;
                item.progress = 100.0;
                item.completed_at = Some(Utc::now());
                item.local_path = Some(local_path);
                item.error = None;
                true
            })
            .await;
        if applied {
            info!(path = %path.display(), "item completed");
        } else {
            debug!("completion discarded; item changed while materializing");
        }
        Ok(())
    }

    /// Applies the monotonic progress rule and records a rotated hash.
    ///
    /// Returns `false` when the poller no longer owns a downloading item.
    async fn record_progress(&self, id: &str, session: u64, status: &TorboxJobStatus) -> bool {
        self.apply(id, session, &[QueueStatus::Downloading], |item| {
            let mut changed = false;
            if status.progress > item.progress {
                item.progress = status.progress;
                changed = true;
            }
            if let Some(hash) = &status.job_hash
                && item.job_hash.as_ref() != Some(hash)
            {
                debug!(old = ?item.job_hash, new = %hash, "job hash rotated");
                item.job_hash = Some(hash.clone());
                changed = true;
            }
            if item.job_id.is_none()
                && let Some(job_id) = &status.job_id
            {
                item.job_id = Some(job_id.clone());
                changed = true;
            }
            changed
        })
        .await
    }

    async fn owned_item(&self, id: &str, session: u64) -> Option<QueueItem> {
        let state = self.inner.state.lock().await;
        if !state.owns(id, session) {
            return None;
        }
        state.items.iter().find(|item| item.id == id).cloned()
    }

    /// Mutates an item if this poller session still owns it and its status is
    /// one of `expected`. `mutate` returns whether anything changed; changes
    /// are flushed.
    ///
    /// Returns `false` when the result was discarded.
    async fn apply<F>(&self, id: &str, session: u64, expected: &[QueueStatus], mutate: F) -> bool
    where
        F: FnOnce(&mut QueueItem) -> bool,
    {
        let mut state = self.inner.state.lock().await;
        if !state.owns(id, session) {
            debug!("discarding result from stale poller");
            return false;
        }
        let Some(item) = state.items.iter_mut().find(|item| item.id == id) else {
            return false;
        };
        if !expected.contains(&item.status) {
            debug!(status = %item.status, "discarding result for changed item");
            return false;
        }
        if mutate(item) {
            // A failed flush leaves the snapshot unsaved; the next sweep retries it.
            let _ = self.flush(&state).await;
        }
        true
    }
}

fn first_link(
    status: &TorboxJobStatus,
    reference: &TorboxJobReference,
) -> Result<TorboxFileLink, TorboxError> {
    extract_file_links(&status.raw)
        .into_iter()
        .next()
        .ok_or_else(|| TorboxError::NoLinksYet {
            job: reference.to_string(),
        })
}
