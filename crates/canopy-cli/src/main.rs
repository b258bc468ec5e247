//! Canopy CLI - canopy command

use anyhow::{Context, Result};
use canopy_core::CanopyConfig;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

mod cmd;
mod logging;

/// Canopy - consolidated filesystem watching
#[derive(Parser)]
#[command(name = "canopy")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file (default: <config dir>/canopy/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Watch one or more directories and print changes
    Watch {
        /// Directories or files to watch
        #[arg(required = true)]
        roots: Vec<PathBuf>,
        /// Only report direct children of each root
        #[arg(long)]
        non_recursive: bool,
        /// Also report modifications and debug logs
        #[arg(short, long)]
        verbose: bool,
        /// Print one JSON object per event
        #[arg(long)]
        json: bool,
        /// Use the polling backend
        #[arg(long)]
        poll: bool,
        /// Gitignore-style pattern to exclude (repeatable)
        #[arg(long = "exclude", value_name = "GLOB")]
        excludes: Vec<String>,
        /// Print the watcher tree after attaching
        #[arg(long)]
        tree: bool,
    },
    /// Show configuration location or a sample file
    Config {
        /// Print the resolved configuration path
        #[arg(long, conflicts_with = "example")]
        path: bool,
        /// Print a commented sample configuration
        #[arg(long)]
        example: bool,
    },
    /// Show backend and manager status
    Status {
        /// Directories to attach before reporting
        roots: Vec<PathBuf>,
        /// Print status as JSON
        #[arg(long)]
        json: bool,
    },
}

fn load_config(path: Option<&Path>) -> Result<CanopyConfig> {
    CanopyConfig::load_or_default(path).context("Failed to load configuration")
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = load_config(cli.config.as_deref())?;

    let verbose = matches!(cli.command, Commands::Watch { verbose: true, .. });
    let _guard = logging::init(&config.logging, verbose)?;

    match cli.command {
        Commands::Watch { roots, non_recursive, verbose, json, poll, excludes, tree } => {
            if poll {
                config.watcher.backend = canopy_core::BackendKind::Poll;
            }
            let opts = cmd::watch::WatchArgs {
                roots,
                recursive: !non_recursive,
                verbose,
                json,
                excludes,
                tree,
            };
            cmd::watch::run(&config, opts).await
        }
        Commands::Config { path, example } => cmd::config::run(cli.config.as_deref(), &config, path, example),
        Commands::Status { roots, json } => cmd::status::run(&config, &roots, json).await,
    }
}
