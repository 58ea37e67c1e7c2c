//! Config command handlers: show and update settings.

use std::path::Path;

use anyhow::{Context, Result};
use torbox_core::torbox::redact_api_key;
use torbox_core::{DEFAULT_MAX_RETRIES, EngineConfig, Settings};

use super::AppContext;

pub fn run_config_show_command(ctx: &AppContext) -> Result<()> {
    let settings = ctx.settings();
    let values = settings.values();
    let engine = EngineConfig::from_values(values);

    let resolved_path = settings.path().map_or_else(
        || "<unresolved>".to_string(),
        |path| path.display().to_string(),
    );
    println!("config_path = {resolved_path}");
    println!(
        "config_file = {}",
        if settings.path().is_some_and(Path::exists) {
            "loaded"
        } else {
            "not found (using defaults)"
        }
    );
    let api_key = match settings.api_key() {
        Some(key) if settings.api_key_from_env() => format!("{} (env)", redact_api_key(&key)),
        Some(key) => redact_api_key(&key),
        None => "<not set>".to_string(),
    };
    println!("api_key = {api_key}");
    println!("api_base_url = {}", settings.api_base_url());
    println!(
        "download_dir = {}",
        values
            .download_dir
            .as_ref()
            .map_or_else(|| "<not set>".to_string(), |dir| dir.display().to_string())
    );
    println!("db_path = {}", ctx.db_path().display());
    println!("poll_interval_secs = {}", engine.poll_interval.as_secs());
    println!("sweep_interval_secs = {}", engine.sweep_interval.as_secs());
    println!("max_in_flight = {}", engine.max_in_flight);
    println!(
        "max_retries = {}",
        values.max_retries.unwrap_or(DEFAULT_MAX_RETRIES)
    );
    println!("remote_cancel = {}", engine.remote_cancel);

    Ok(())
}

pub fn run_config_set_key_command(ctx: &mut AppContext, key: &str) -> Result<()> {
    ctx.settings_mut().set_api_key(key)?;
    save(ctx)?;
    println!("api_key saved ({})", redact_api_key(key.trim()));
    Ok(())
}

pub fn run_config_set_dir_command(ctx: &mut AppContext, dir: &Path) -> Result<()> {
    let dir = if dir.is_absolute() {
        dir.to_path_buf()
    } else {
        std::env::current_dir()
            .context("failed to resolve current directory")?
            .join(dir)
    };
    ctx.settings_mut().set_download_dir(&dir)?;
    save(ctx)?;
    println!("download_dir = {}", dir.display());
    Ok(())
}

pub fn run_config_set_base_url_command(ctx: &mut AppContext, url: &str) -> Result<()> {
    ctx.settings_mut().set_api_base_url(url)?;
    save(ctx)?;
    println!("api_base_url = {}", ctx.settings().api_base_url());
    Ok(())
}

fn save(ctx: &AppContext) -> Result<()> {
    ctx.settings().save().context("failed to save config file")
}
