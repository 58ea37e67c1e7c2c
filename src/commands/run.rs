//! `run`: drive the queue engine with a progress spinner until interrupted.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use torbox_core::{QueueEngine, QueueItem, QueueStatus, Settings};
use tracing::{info, warn};

use super::AppContext;
use crate::cli::RunArgs;

const IDLE_CHECK_INTERVAL: Duration = Duration::from_millis(250);
const SPINNER_REFRESH: Duration = Duration::from_millis(120);

pub async fn run_engine_command(ctx: &AppContext, args: &RunArgs, show_progress: bool) -> Result<()> {
    ctx.settings()
        .require_download_dir()
        .context("cannot run without a download directory")?;
    if ctx.settings().api_key().is_none() {
        warn!("no API key configured; remote calls will fail");
    }

    let engine = ctx.open_engine().await?;
    let sweep = engine.start()?;
    let (progress, stop) = spawn_progress_ui(show_progress, engine.clone());
    info!(until_idle = args.until_idle, "queue engine running");

    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.context("failed to listen for Ctrl-C")?;
            info!("interrupted; stopping");
        }
        () = wait_until_idle(&engine), if args.until_idle => {
            info!("queue idle; stopping");
        }
    }

    stop.store(true, Ordering::SeqCst);
    if let Some(handle) = progress {
        let _ = handle.await;
    }
    engine.shutdown().await;
    let _ = sweep.await;

    let items = engine.list().await;
    let count = |status: QueueStatus| items.iter().filter(|item| item.status == status).count();
    println!(
        "completed = {}, failed = {}, pending = {}, paused = {}, in_flight = {}",
        count(QueueStatus::Completed),
        count(QueueStatus::Failed),
        count(QueueStatus::Pending),
        count(QueueStatus::Paused),
        count(QueueStatus::Active) + count(QueueStatus::Downloading),
    );
    Ok(())
}

async fn wait_until_idle(engine: &QueueEngine) {
    loop {
        tokio::time::sleep(IDLE_CHECK_INTERVAL).await;
        if engine.is_idle().await {
            return;
        }
    }
}

/// Spawns the progress UI (spinner) when requested.
/// Returns (handle, stop) so the caller can signal stop and await the handle.
fn spawn_progress_ui(
    use_spinner: bool,
    engine: QueueEngine,
) -> (Option<tokio::task::JoinHandle<()>>, Arc<AtomicBool>) {
    if !use_spinner {
        return (None, Arc::new(AtomicBool::new(true)));
    }
    let stop = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&stop);
    let handle = tokio::spawn(async move {
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(
            ProgressStyle::with_template("{spinner} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        spinner.enable_steady_tick(Duration::from_millis(100));

        while !flag.load(Ordering::SeqCst) {
            spinner.set_message(progress_message(&engine.list().await));
            tokio::time::sleep(SPINNER_REFRESH).await;
        }

        spinner.finish_and_clear();
    });
    (Some(handle), stop)
}

fn progress_message(items: &[QueueItem]) -> String {
    let done = items.iter().filter(|item| item.status.is_terminal()).count();
    let current = items.iter().find(|item| {
        matches!(item.status, QueueStatus::Active | QueueStatus::Downloading)
    });
    match current {
        Some(item) => format!(
            "[{done}/{}] {} {} {:.0}%",
            items.len(),
            item.owner,
            item.status,
            item.progress
        ),
        None => format!("[{done}/{}] waiting for work...", items.len()),
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use torbox_core::NewQueueItem;

    use super::*;

    fn item(status: QueueStatus, progress: f64) -> QueueItem {
        let mut item = NewQueueItem::new("https://x").with_owner("chan").into_item(Utc::now());
        item.status = status;
        item.progress = progress;
        item
    }

    #[test]
    fn test_progress_message_reports_first_in_flight_item() {
        let items = vec![
            item(QueueStatus::Completed, 100.0),
            item(QueueStatus::Downloading, 42.4),
            item(QueueStatus::Pending, 0.0),
        ];
        assert_eq!(progress_message(&items), "[1/3] chan downloading 42%");
    }

    #[test]
    fn test_progress_message_idle() {
        let items = vec![item(QueueStatus::Failed, 0.0)];
        assert_eq!(progress_message(&items), "[1/1] waiting for work...");
    }

    #[tokio::test]
    async fn test_spawn_progress_ui_disabled_returns_stopped() {
        let (handle, stop) = spawn_progress_ui(false, test_engine().await);
        assert!(handle.is_none());
        assert!(stop.load(Ordering::SeqCst));
    }

    async fn test_engine() -> QueueEngine {
        use torbox_core::queue::MemoryQueueStore;
        use torbox_core::{EngineConfig, FileSettings, SettingsValues, TorboxClient, TorboxConfig};

        QueueEngine::load(
            Arc::new(MemoryQueueStore::default()),
            Arc::new(TorboxClient::new(TorboxConfig::default()).unwrap()),
            Arc::new(FileSettings::from_values(SettingsValues::default())),
            EngineConfig::default(),
        )
        .await
        .unwrap()
    }
}
