//! CLI parser and dispatch.

mod init;
mod links;
mod run;

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};

use archivist::abid::{Abid, AbidSource};
use archivist::config::{load_settings_with_options, LoadOptions};
use archivist::models::Link;
use archivist::LinkEdit;

#[derive(Parser)]
#[command(name = "archivist")]
#[command(about = "Archive URLs with several redundant capture methods")]
#[command(version)]
pub struct Cli {
    /// Data directory (overrides config file)
    #[arg(long, short = 't', global = true, env = "ARCHIVIST_DATA")]
    data: Option<PathBuf>,

    /// Config file path (overrides auto-discovery)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Check if verbose mode is enabled (for early logging setup).
pub fn is_verbose() -> bool {
    std::env::args().any(|arg| arg == "-v" || arg == "--verbose")
}

#[derive(Subcommand)]
enum Commands {
    /// Create the data directory, database and identifier salt
    Init,

    /// Queue a URL for archiving
    Add {
        url: String,
        /// Tag to attach (repeatable)
        #[arg(long = "tag", short = 'g')]
        tags: Vec<String>,
        /// Only run these extractors (repeatable)
        #[arg(long)]
        only: Vec<String>,
        /// Re-run extractors even when their output exists
        #[arg(long)]
        overwrite: bool,
    },

    /// Show a link with its jobs and history
    Status {
        /// Link id (with or without the lnk_ prefix)
        id: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// List links, newest first
    List {
        /// Filter by status: queued, started or sealed
        #[arg(long)]
        status: Option<String>,
        #[arg(short, long, default_value = "50")]
        limit: usize,
    },

    /// Change a link's title or tags
    Edit {
        id: String,
        #[arg(long)]
        title: Option<String>,
        /// Replace the tags (repeatable)
        #[arg(long = "tag", short = 'g')]
        tags: Option<Vec<String>>,
        /// New URL (refused: the id is derived from it)
        #[arg(long)]
        url: Option<String>,
    },

    /// Run a sealed link through every extractor again
    Rearchive {
        id: String,
        /// Replace existing artifacts instead of skipping them
        #[arg(long)]
        overwrite: bool,
    },

    /// Run the workers
    Run {
        /// Process until nothing is pending, then exit
        #[arg(long)]
        once: bool,
        /// With --once, give up after this many seconds
        #[arg(long, default_value = "3600")]
        deadline: u64,
    },
}

pub(crate) fn parse_link_id(raw: &str) -> anyhow::Result<Abid> {
    Abid::parse_with_prefix(raw.trim(), Link::PREFIX)
        .with_context(|| format!("'{}' is not a link id", raw))
}

pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let options = LoadOptions {
        config_path: cli.config,
        data: cli.data,
    };
    let (settings, _config) = load_settings_with_options(options).await;

    match cli.command {
        Commands::Init => init::cmd_init(settings).await,
        Commands::Add {
            url,
            tags,
            only,
            overwrite,
        } => links::cmd_add(settings, &url, tags, only, overwrite).await,
        Commands::Status { id, json } => links::cmd_status(settings, &id, json).await,
        Commands::List { status, limit } => {
            links::cmd_list(settings, status.as_deref(), limit).await
        }
        Commands::Edit {
            id,
            title,
            tags,
            url,
        } => {
            let edit = LinkEdit { url, title, tags };
            links::cmd_edit(settings, &id, edit).await
        }
        Commands::Rearchive { id, overwrite } => {
            links::cmd_rearchive(settings, &id, overwrite).await
        }
        Commands::Run { once, deadline } => run::cmd_run(settings, once, deadline).await,
    }
}
