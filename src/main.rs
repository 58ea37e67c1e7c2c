//! CLI entry point for the torbox-fetch tool.

use std::io::IsTerminal;

use anyhow::Result;
use clap::Parser;
use tracing::debug;

mod cli;
mod commands;

use cli::{Cli, Command, ConfigCommand, LibraryCommand};
use commands::{AppContext, Transition};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let cli = Cli::parse();

    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let default_level = if cli.quiet {
        "error"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_ansi(std::io::stderr().is_terminal())
        .with_env_filter(filter)
        .init();

    debug!(command = ?cli.command, "CLI arguments parsed");

    let mut ctx = AppContext::load(cli.config.as_deref(), cli.db.as_deref())?;

    match &cli.command {
        Command::Add(args) => commands::run_add_command(&ctx, args).await,
        Command::List => commands::run_list_command(&ctx).await,
        Command::Pause { id } => commands::run_transition_command(&ctx, Transition::Pause, id).await,
        Command::Resume { id } => {
            commands::run_transition_command(&ctx, Transition::Resume, id).await
        }
        Command::Cancel { id } => {
            commands::run_transition_command(&ctx, Transition::Cancel, id).await
        }
        Command::Retry { id } => commands::run_transition_command(&ctx, Transition::Retry, id).await,
        Command::Run(args) => {
            let show_progress = !cli.quiet && std::io::stderr().is_terminal();
            commands::run_engine_command(&ctx, args, show_progress).await
        }
        Command::Check => commands::run_check_command(&ctx).await,
        Command::Library { command } => match command {
            None => commands::run_library_scan_command(&ctx).await,
            Some(LibraryCommand::Delete { filename }) => {
                commands::run_library_delete_command(&ctx, filename).await
            }
        },
        Command::Config { command } => match command {
            ConfigCommand::Show => commands::run_config_show_command(&ctx),
            ConfigCommand::SetKey { key } => commands::run_config_set_key_command(&mut ctx, key),
            ConfigCommand::SetDir { path } => commands::run_config_set_dir_command(&mut ctx, path),
            ConfigCommand::SetBaseUrl { url } => {
                commands::run_config_set_base_url_command(&mut ctx, url)
            }
        },
    }
}
