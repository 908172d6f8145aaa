//! # cbfs-server
//!
//! Authoritative file store with callback-based cache invalidation.
//!
//! ## Architecture
//!
//! `cbfsd` keeps every file in memory and tracks which registered clients
//! have fetched which names. When a file is created, edited, removed or
//! renamed, each client holding a copy is told to drop it:
//! - [`store::FileStore`] owns name → contents and reports mutations
//! - [`registry::ClientRegistry`] maps client IDs to their live connection
//! - [`cache_index::CacheIndex`] remembers who fetched what
//! - [`broadcast::InvalidationBroadcaster`] fans notices out on a worker pool
//!
//! ## Communication
//!
//! Clients talk to the server over a Unix Domain Socket using the framed
//! bincode protocol in `cbfs-ipc`. Invalidation notices ride the same stream.

pub mod bootstrap;
pub mod broadcast;
pub mod cache_index;
pub mod commands;
pub mod error;
pub mod record;
pub mod registry;
pub mod service;
pub mod socket;
pub mod store;

pub use error::{Result, ServerError};
pub use service::FileService;

use std::future::Future;
use std::sync::Arc;

use anyhow::Context;
use cbfs_config::{log_server_info, log_server_warn, ServerConfig};

use crate::commands::CommandHandler;

/// Main server entry point. Runs until `shutdown` resolves or the listener
/// fails, then removes the socket file.
pub async fn run_server<F>(config: ServerConfig, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()>,
{
    let socket = config.socket.display().to_string();
    log_server_info!(
        "Starting cbfsd",
        socket = socket.as_str(),
        notify_workers = config.notify_workers,
        notify_queue = config.notify_queue
    );

    let service = Arc::new(FileService::start(&config));

    if let Some(dir) = &config.data_dir {
        bootstrap::load_directory(service.store(), dir)
            .with_context(|| format!("Failed to load data directory {}", dir.display()))?;
    }

    if let Some(parent) = config.socket.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create socket directory {}", parent.display()))?;
    }
    let listener = socket::bind(&config.socket)
        .with_context(|| format!("Failed to bind {}", config.socket.display()))?;

    let handler = Arc::new(CommandHandler::new(Arc::clone(&service)));
    let result = tokio::select! {
        result = socket::run_listener(listener, handler, config.connection_queue) => result,
        _ = shutdown => {
            log_server_info!("Shutdown requested");
            Ok(())
        }
    };

    let stats = service.notify_stats();
    log_server_info!(
        "Server stopped",
        files = service.store().len(),
        clients = service.registry().len(),
        delivered = stats.delivered,
        dropped = stats.dropped,
        failed = stats.failed
    );

    if let Err(e) = std::fs::remove_file(&config.socket) {
        let error = e.to_string();
        log_server_warn!("Failed to remove socket", error = error.as_str());
    }

    result
}
