//! Library command handlers: scan and delete.

use anyhow::{Context, Result};
use torbox_core::{LibraryScanner, Settings};

use super::AppContext;

fn scanner(ctx: &AppContext) -> Result<LibraryScanner> {
    let dir = ctx
        .settings()
        .require_download_dir()
        .context("library needs a download directory")?;
    Ok(LibraryScanner::new(dir))
}

pub async fn run_library_scan_command(ctx: &AppContext) -> Result<()> {
    let items = scanner(ctx)?.scan().await?;
    if items.is_empty() {
        println!("library is empty");
    }
    for item in &items {
        println!(
            "{}  {:>10}  {}  {}  {}",
            item.filename,
            item.size,
            item.added_at.format("%Y-%m-%d %H:%M"),
            item.owner,
            item.caption
        );
    }
    Ok(())
}

pub async fn run_library_delete_command(ctx: &AppContext, filename: &str) -> Result<()> {
    scanner(ctx)?.delete(filename).await?;
    println!("deleted {filename}");
    Ok(())
}
