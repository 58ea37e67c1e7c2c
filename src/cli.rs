//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// Queue and track Torbox web-download jobs.
///
/// Links are submitted to Torbox as remote jobs, polled until the remote side
/// finishes, and the resulting media is saved into a local library.
#[derive(Parser, Debug)]
#[command(name = "torbox-fetch")]
#[command(author, version, about)]
pub struct Cli {
    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Config file path (defaults to $XDG_CONFIG_HOME/torbox-fetch/config.toml)
    #[arg(long, value_name = "PATH", global = true)]
    pub config: Option<PathBuf>,

    /// Queue database path (defaults to $XDG_DATA_HOME/torbox-fetch/queue.db)
    #[arg(long, value_name = "PATH", global = true)]
    pub db: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Queue one or more links
    Add(AddArgs),

    /// Show the queue
    List,

    /// Pause a pending or in-flight item
    Pause {
        /// Queue item id
        id: String,
    },

    /// Resume a paused item
    Resume {
        /// Queue item id
        id: String,
    },

    /// Cancel an item (and its remote job when enabled)
    Cancel {
        /// Queue item id
        id: String,
    },

    /// Re-queue a failed item
    Retry {
        /// Queue item id
        id: String,
    },

    /// Process the queue until interrupted
    Run(RunArgs),

    /// Verify the API key against Torbox
    Check,

    /// Browse or prune the download directory
    Library {
        #[command(subcommand)]
        command: Option<LibraryCommand>,
    },

    /// Show or change settings
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[derive(Args, Debug, Clone)]
pub struct AddArgs {
    /// Links to queue
    #[arg(required = true, value_name = "URL")]
    pub urls: Vec<String>,

    /// Owner recorded on each item
    #[arg(long)]
    pub owner: Option<String>,

    /// Caption recorded on each item
    #[arg(long)]
    pub caption: Option<String>,

    /// Thumbnail URL recorded on each item
    #[arg(long)]
    pub thumbnail: Option<String>,

    /// Keyword recorded on each item (repeatable)
    #[arg(long = "keyword", value_name = "KEYWORD")]
    pub keywords: Vec<String>,
}

#[derive(Args, Debug, Clone, Default)]
pub struct RunArgs {
    /// Exit once nothing is in flight and nothing is claimable
    #[arg(long)]
    pub until_idle: bool,
}

#[derive(Subcommand, Debug)]
pub enum LibraryCommand {
    /// Delete a media file and its sidecar
    Delete {
        /// Bare filename inside the download directory
        filename: String,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Store the Torbox API key
    SetKey {
        /// API key
        key: String,
    },

    /// Set the download directory
    SetDir {
        /// Directory media is saved into
        path: PathBuf,
    },

    /// Override the Torbox API host
    SetBaseUrl {
        /// http(s) base URL
        url: String,
    },

    /// Show the effective configuration
    Show,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_requires_subcommand() {
        let err = Cli::try_parse_from(["torbox-fetch"]).unwrap_err();
        assert!(matches!(
            err.kind(),
            clap::error::ErrorKind::DisplayHelpOnMissingArgumentOrSubcommand
                | clap::error::ErrorKind::MissingSubcommand
        ));
    }

    #[test]
    fn test_cli_verbose_flag_increments_count() {
        let cli = Cli::try_parse_from(["torbox-fetch", "-vv", "list"]).unwrap();
        assert_eq!(cli.verbose, 2);

        let cli = Cli::try_parse_from(["torbox-fetch", "list", "--verbose"]).unwrap();
        assert_eq!(cli.verbose, 1);
    }

    #[test]
    fn test_cli_quiet_and_paths_are_global() {
        let cli = Cli::try_parse_from([
            "torbox-fetch",
            "list",
            "-q",
            "--config",
            "/tmp/c.toml",
            "--db",
            "/tmp/q.db",
        ])
        .unwrap();
        assert!(cli.quiet);
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/c.toml")));
        assert_eq!(cli.db, Some(PathBuf::from("/tmp/q.db")));
    }

    #[test]
    fn test_cli_help_flag_shows_usage() {
        let err = Cli::try_parse_from(["torbox-fetch", "--help"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayHelp);
    }

    #[test]
    fn test_cli_version_flag_shows_version() {
        let err = Cli::try_parse_from(["torbox-fetch", "--version"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayVersion);
    }

    // ==================== Add ====================

    #[test]
    fn test_add_collects_metadata_and_repeated_keywords() {
        let cli = Cli::try_parse_from([
            "torbox-fetch",
            "add",
            "https://a",
            "https://b",
            "--owner",
            "chan",
            "--keyword",
            "x",
            "--keyword",
            "y",
        ])
        .unwrap();
        let Command::Add(args) = cli.command else {
            panic!("expected add");
        };
        assert_eq!(args.urls, vec!["https://a", "https://b"]);
        assert_eq!(args.owner.as_deref(), Some("chan"));
        assert_eq!(args.keywords, vec!["x", "y"]);
        assert!(args.caption.is_none());
    }

    #[test]
    fn test_add_requires_url() {
        let err = Cli::try_parse_from(["torbox-fetch", "add"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);
    }

    // ==================== Transitions, run, library, config ====================

    #[test]
    fn test_transition_commands_take_id() {
        for name in ["pause", "resume", "cancel", "retry"] {
            let cli = Cli::try_parse_from(["torbox-fetch", name, "abc"]).unwrap();
            let id = match cli.command {
                Command::Pause { id }
                | Command::Resume { id }
                | Command::Cancel { id }
                | Command::Retry { id } => id,
                other => panic!("unexpected {other:?}"),
            };
            assert_eq!(id, "abc");
        }
    }

    #[test]
    fn test_run_until_idle_flag() {
        let cli = Cli::try_parse_from(["torbox-fetch", "run", "--until-idle"]).unwrap();
        assert!(matches!(cli.command, Command::Run(RunArgs { until_idle: true })));
    }

    #[test]
    fn test_library_scan_and_delete() {
        let cli = Cli::try_parse_from(["torbox-fetch", "library"]).unwrap();
        assert!(matches!(cli.command, Command::Library { command: None }));

        let cli = Cli::try_parse_from(["torbox-fetch", "library", "delete", "a.mp4"]).unwrap();
        assert!(matches!(
            cli.command,
            Command::Library {
                command: Some(LibraryCommand::Delete { ref filename })
            } if filename == "a.mp4"
        ));
    }

    #[test]
    fn test_config_subcommands() {
        let cli = Cli::try_parse_from(["torbox-fetch", "config", "set-key", "k"]).unwrap();
        assert!(matches!(
            cli.command,
            Command::Config { command: ConfigCommand::SetKey { ref key } } if key == "k"
        ));

        let cli = Cli::try_parse_from(["torbox-fetch", "config", "set-base-url", "https://h"]).unwrap();
        assert!(matches!(
            cli.command,
            Command::Config { command: ConfigCommand::SetBaseUrl { .. } }
        ));

        let err = Cli::try_parse_from(["torbox-fetch", "config"]).unwrap_err();
        assert!(matches!(
            err.kind(),
            clap::error::ErrorKind::DisplayHelpOnMissingArgumentOrSubcommand
                | clap::error::ErrorKind::MissingSubcommand
        ));
    }
}
