//! Filesync CLI
//!
//! Keeps a download directory holding exactly the files a manifest names.
//!
//! # Commands
//!
//! - `run` - Watch the manifest and reconcile until interrupted
//! - `sync` - Run a single reconciliation pass
//! - `plan` - Show what a pass would delete and download
//! - `version` - Show version information

mod commands;

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Filesync reconciliation controller.
#[derive(Parser)]
#[command(name = "filesync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Where the desired state lives and which directory it describes.
#[derive(Args, Debug, Clone)]
pub struct Target {
    /// Directory holding one subdirectory of manifests per namespace
    #[arg(long, env = "FILESYNC_ROOT", default_value = "/etc/filesync")]
    pub root: PathBuf,

    /// Namespace of the manifest
    #[arg(short, long, env = "FILESYNC_NAMESPACE", default_value = "default")]
    pub namespace: String,

    /// Name of the manifest to follow
    #[arg(short, long, env = "FILESYNC_MANIFEST", default_value = "my-config-map")]
    pub manifest: String,

    /// Directory to keep in sync
    #[arg(short, long, env = "FILESYNC_DOWNLOAD_PATH", default_value = "/tmp/downloads")]
    pub download_path: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// Watch the manifest and reconcile until interrupted
    Run {
        #[command(flatten)]
        target: Target,

        /// Number of reconciliation workers
        #[arg(short, long, default_value = "1")]
        workers: usize,

        /// Manifest poll interval in milliseconds
        #[arg(long, default_value = "1000")]
        poll_interval: u64,

        /// Remote fetch timeout in seconds
        #[arg(long, default_value = "30")]
        fetch_timeout: u64,
    },

    /// Run a single reconciliation pass
    Sync {
        #[command(flatten)]
        target: Target,

        /// Remote fetch timeout in seconds
        #[arg(long, default_value = "30")]
        fetch_timeout: u64,
    },

    /// Show what a pass would delete and download
    Plan {
        #[command(flatten)]
        target: Target,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Run {
            target,
            workers,
            poll_interval,
            fetch_timeout,
        } => {
            commands::run::run(&target, workers, poll_interval, fetch_timeout)?;
        }
        Commands::Sync {
            target,
            fetch_timeout,
        } => {
            commands::sync::run(&target, fetch_timeout)?;
        }
        Commands::Plan { target, format } => {
            commands::plan::run(&target, &format)?;
        }
        Commands::Version => {
            println!("filesync v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
