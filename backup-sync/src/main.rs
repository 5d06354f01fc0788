//! backup-sync - Main entry point
//!
//! Mirrors a local tree onto a remote one, keeping per-run backups of
//! everything it overwrites or deletes.

use anyhow::Result;
use backup_sync::config::{Config, Transport};
use backup_sync::remote::{sftp, LocalDirFs, RemoteFs};
use backup_sync::transfer::ConsoleProgress;
use backup_sync::{utils, SyncError, SyncExecutor, SyncReport};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE", default_value = "config.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,

    /// Never draw a progress bar
    #[arg(long)]
    no_progress: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration
    let config = Config::load(&args.config)?;

    // Initialize logging
    let log_level = args.log_level.as_deref().unwrap_or(&config.log.level);
    utils::logger::init(log_level, config.log.file.as_deref())?;

    tracing::info!("{}", "=".repeat(60));
    tracing::info!(
        "Sync started (backup-sync v{}, config: {})",
        env!("CARGO_PKG_VERSION"),
        args.config.display()
    );

    let show_bar = config.log.file.is_some() && !args.no_progress;
    let result = sync(&config, show_bar).await;

    match &result {
        Ok(report) if report.has_failures() => {
            tracing::warn!("{} paths failed, see the errors above", report.failed)
        }
        Ok(_) => {}
        Err(e) => tracing::error!("Sync aborted: {}", e),
    }
    tracing::info!("Sync finished");

    result.map(|_| ()).map_err(Into::into)
}

async fn sync(config: &Config, show_bar: bool) -> std::result::Result<SyncReport, SyncError> {
    let fs: Arc<dyn RemoteFs> = match config.remote.transport {
        Transport::Sftp => {
            let remote = config.remote.clone();
            Arc::new(tokio::task::spawn_blocking(move || sftp::connect(&remote)).await??)
        }
        Transport::Local => Arc::new(LocalDirFs::new()),
    };

    let progress = Arc::new(ConsoleProgress::new(show_bar));
    SyncExecutor::new(fs, config.sync_options(), progress).run().await
}
