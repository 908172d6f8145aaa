//! cbfsd - callback file store server
//!
//! Usage:
//!   cbfsd [--config FILE] [--socket PATH] [--data-dir DIR] [--notify-workers N]

use std::path::PathBuf;

use anyhow::{Context, Result};
use cbfs_config::{logging::init_logging, Config};
use cbfs_server::run_server;
use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "cbfsd", version, about = "Callback cache-consistency file server")]
struct Cli {
    /// Config file (default: ~/.cbfs/config.toml merged with .cbfs/config.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Unix socket to listen on
    #[arg(long)]
    socket: Option<PathBuf>,

    /// Flat directory whose files are loaded at startup
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Notification worker count
    #[arg(long)]
    notify_workers: Option<usize>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::load_from(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => Config::load().context("Failed to load config")?,
    };

    if let Some(socket) = cli.socket {
        config.server.socket = socket;
    }
    if let Some(dir) = cli.data_dir {
        config.server.data_dir = Some(dir);
    }
    if let Some(workers) = cli.notify_workers {
        anyhow::ensure!(workers > 0, "--notify-workers must be at least 1");
        config.server.notify_workers = workers;
    }

    init_logging(config.log.level);

    run_server(config.server, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    })
    .await
}
