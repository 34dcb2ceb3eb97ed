//! `pagekeep`: archive web pages for offline reading.

mod commands;
mod records;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use log::LevelFilter;
use pagekeep_logging::LogDestination;

/// Command-line interface for the PageKeep archiver.
#[derive(Parser, Debug)]
#[command(author, version, about = "Offline web page archiver")]
struct Cli {
    /// Primary (synced) archive root
    #[arg(long, env = "PAGEKEEP_ARCHIVE_ROOT", default_value = "archive", global = true)]
    archive_root: PathBuf,
    /// Local cache root for extracted fallback bundles
    #[arg(long, env = "PAGEKEEP_CACHE_ROOT", default_value = "cache", global = true)]
    cache_root: PathBuf,
    /// Directory holding the record file and bundle sidecars
    #[arg(long, env = "PAGEKEEP_STATE_DIR", default_value = ".pagekeep", global = true)]
    state_dir: PathBuf,
    /// Also write the log to this file
    #[arg(long, value_name = "PATH", global = true)]
    log_file: Option<PathBuf>,
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Register an item to archive
    Add { id: String, url: String },
    /// Capture an item's page and its assets
    Archive(ArchiveArgs),
    /// Attach a downloaded document to an item
    Document { id: String, file: PathBuf },
    /// Print the best available copy of an item
    Resolve {
        id: String,
        /// Skip the primary tier and extract the fallback bundle
        #[arg(long)]
        force_extract: bool,
    },
    /// Drop extracted fallback copies once the primary tier is present
    Cleanup { id: String },
    /// List items with their archive badge
    List,
    /// Bundle a directory into a single blob
    Pack { dir: PathBuf, out: PathBuf },
    /// Restore a bundle into a directory
    Unpack { bundle: PathBuf, dir: PathBuf },
}

#[derive(clap::Args, Debug)]
struct ArchiveArgs {
    id: String,
    /// JSON capture payload rendered by a logged-in session
    #[arg(long, value_name = "PATH")]
    payload: Option<PathBuf>,
    /// JSON array of session cookies to use with --payload
    #[arg(long, value_name = "PATH", requires = "payload")]
    cookies: Option<PathBuf>,
    /// Per-request timeout for page and asset downloads, in seconds
    #[arg(long, default_value_t = 30)]
    request_timeout: u64,
    /// Budget for the rendering engine, in seconds
    #[arg(long, default_value_t = 20)]
    render_timeout: u64,
}

impl ArchiveArgs {
    fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout)
    }

    fn render_timeout(&self) -> Duration {
        Duration::from_secs(self.render_timeout)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    let destination = match &cli.log_file {
        Some(path) => LogDestination::Both(path.clone()),
        None => LogDestination::Terminal,
    };
    pagekeep_logging::initialize(destination, level);

    commands::run(&cli).await
}
