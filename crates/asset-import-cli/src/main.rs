mod commands;
mod config;
mod prompt;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use asset_import::{AssetManager, AutoConfirm, ImportSettings};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::prompt::TerminalPrompt;

#[derive(Parser)]
#[command(name = "asset-import")]
#[command(about = "Copy game assets from slow media into a local cache")]
struct Cli {
    /// Log debug output to stderr (RUST_LOG overrides)
    #[arg(long, short, global = true)]
    verbose: bool,
    /// Settings file (defaults to the user config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Import a file or directory and print its local path
    Import {
        /// File or directory to import
        source: PathBuf,
        /// Use the host's copy tool and show progress
        #[arg(long)]
        progress: bool,
        /// Skip the large-file confirmation
        #[arg(long, short)]
        yes: bool,
        /// Copy to scratch space instead of the cache
        #[arg(long)]
        no_cache: bool,
        /// Skip post-copy verification
        #[arg(long)]
        no_verify: bool,
        /// Number of retries after a failed copy
        #[arg(long)]
        retries: Option<u32>,
    },
    /// Remove a temporary import
    Cleanup {
        /// Path previously printed by `import`
        path: PathBuf,
    },
    /// Inspect or clear the asset cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Subcommand)]
enum CacheAction {
    /// Show cache size and item count
    Stats,
    /// List cached sources
    List,
    /// Delete every cached item
    Clear,
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn build_manager(settings: ImportSettings) -> Result<AssetManager> {
    let root = settings.temp_root();
    AssetManager::new(settings)
        .with_context(|| format!("failed to open asset cache under {}", root.display()))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let mut settings = config::load_config(cli.config.as_deref()).import;

    match cli.command {
        Command::Import {
            source,
            progress,
            yes,
            no_cache,
            no_verify,
            retries,
        } => {
            if no_cache {
                settings.cache_enabled = false;
            }
            if no_verify {
                settings.verify_on_import = false;
            }
            if let Some(retries) = retries {
                settings.retry_attempts = retries;
            }

            let manager = build_manager(settings)?;
            let manager = if yes {
                manager.with_prompt(Arc::new(AutoConfirm(true)))
            } else {
                manager.with_prompt(Arc::new(TerminalPrompt))
            };
            commands::import::run(&manager, &source, progress).await
        }
        Command::Cleanup { path } => {
            let manager = build_manager(settings)?;
            commands::cleanup::run(&manager, &path).await
        }
        Command::Cache { action } => {
            let manager = build_manager(settings)?;
            match action {
                CacheAction::Stats => commands::cache::stats(&manager).await,
                CacheAction::List => commands::cache::list(&manager),
                CacheAction::Clear => commands::cache::clear(&manager).await,
            }
        }
    }
}
