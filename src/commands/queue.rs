//! Queue command handlers: add, list and the user transitions.

use anyhow::Result;
use torbox_core::{NewQueueItem, QueueEngine, QueueItem};

use super::AppContext;
use crate::cli::AddArgs;

/// User-initiated item transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Pause,
    Resume,
    Cancel,
    Retry,
}

impl Transition {
    fn verb(self) -> &'static str {
        match self {
            Self::Pause => "paused",
            Self::Resume => "resumed",
            Self::Cancel => "cancelled",
            Self::Retry => "re-queued",
        }
    }

    async fn apply(self, engine: &QueueEngine, id: &str) -> Result<bool> {
        let changed = match self {
            Self::Pause => engine.pause(id).await?,
            Self::Resume => engine.resume(id).await?,
            Self::Cancel => engine.cancel(id).await?,
            Self::Retry => engine.retry(id).await?,
        };
        Ok(changed)
    }
}

pub async fn run_add_command(ctx: &AppContext, args: &AddArgs) -> Result<()> {
    let engine = ctx.open_engine().await?;
    let inputs = args
        .urls
        .iter()
        .map(|url| {
            let mut input = NewQueueItem::new(url.trim()).with_keywords(args.keywords.clone());
            if let Some(owner) = &args.owner {
                input = input.with_owner(owner.clone());
            }
            if let Some(caption) = &args.caption {
                input = input.with_caption(caption.clone());
            }
            if let Some(thumbnail) = &args.thumbnail {
                input = input.with_thumbnail(thumbnail.clone());
            }
            input
        })
        .collect();

    let created = engine.add_to_queue(inputs).await?;
    for item in &created {
        println!("queued {} {}", item.id, item.url);
    }
    engine.shutdown().await;
    Ok(())
}

pub async fn run_list_command(ctx: &AppContext) -> Result<()> {
    let engine = ctx.open_engine().await?;
    let items = engine.list().await;
    if items.is_empty() {
        println!("queue is empty");
    }
    for item in &items {
        println!("{}", format_item_line(item));
    }
    engine.shutdown().await;
    Ok(())
}

pub async fn run_transition_command(
    ctx: &AppContext,
    transition: Transition,
    id: &str,
) -> Result<()> {
    let engine = ctx.open_engine().await?;
    let changed = transition.apply(&engine, id).await;
    // Waits for a remote cancel request, if one was issued.
    engine.shutdown().await;

    if changed? {
        println!("{id} {}", transition.verb());
    } else {
        let status = engine
            .get(id)
            .await
            .map_or_else(|| "unknown".to_string(), |item| item.status.to_string());
        println!("{id} is {status}; nothing to do");
    }
    Ok(())
}

fn format_item_line(item: &QueueItem) -> String {
    let mut line = format!(
        "{}  {:<11} {:>6.2}%  {}  {}",
        item.id, item.status, item.progress, item.owner, item.url
    );
    if let Some(path) = &item.local_path {
        line.push_str(&format!("  -> {path}"));
    }
    if let Some(error) = &item.error {
        line.push_str(&format!("  [{error}]"));
    }
    line
}
