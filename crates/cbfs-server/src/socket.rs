//! Unix Domain Socket listener for cbfsd
//!
//! Each connection gets a writer task draining one outbound queue. Responses
//! and invalidation notices share that queue, so a notice never interleaves
//! with a half-written response.

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use cbfs_config::{log_ipc_debug, log_server_error, log_server_info, log_server_warn};
use cbfs_ipc::frame::{read_frame, write_frame};
use cbfs_ipc::{FaultKind, FrameError, Request, Response, ServerFrame};
use tokio::net::unix::OwnedReadHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc;

use crate::commands::{CommandHandler, ConnectionContext};
use crate::registry::ConnectionId;

/// Bind the listener, replacing a stale socket file
pub fn bind(path: &Path) -> std::io::Result<UnixListener> {
    if path.exists() {
        std::fs::remove_file(path)?;
    }
    let listener = UnixListener::bind(path)?;
    let socket = path.display().to_string();
    log_server_info!("Listening for connections", socket = socket.as_str());
    Ok(listener)
}

/// Accept connections forever
pub async fn run_listener(
    listener: UnixListener,
    handler: Arc<CommandHandler>,
    connection_queue: usize,
) -> Result<()> {
    loop {
        match listener.accept().await {
            Ok((stream, _addr)) => {
                let handler = Arc::clone(&handler);
                tokio::spawn(async move {
                    if let Err(e) = handle_client(stream, handler, connection_queue).await {
                        let error = e.to_string();
                        log_server_warn!("Client handler error", error = error.as_str());
                    }
                });
            }
            Err(e) => {
                let error = e.to_string();
                log_server_error!("Accept failed", error = error.as_str());
            }
        }
    }
}

async fn handle_client(
    stream: UnixStream,
    handler: Arc<CommandHandler>,
    connection_queue: usize,
) -> Result<()> {
    let connection = ConnectionId::next();
    log_ipc_debug!("Client connected", connection = connection.0);

    let (mut reader, mut writer) = stream.into_split();
    let (tx, mut rx) = mpsc::channel::<ServerFrame>(connection_queue.max(1));

    let writer_task = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if let Err(e) = write_frame(&mut writer, &frame).await {
                let error = e.to_string();
                log_ipc_debug!("Write failed, closing writer", error = error.as_str());
                break;
            }
        }
    });

    let ctx = Arc::new(ConnectionContext::new(connection, tx.clone()));
    let result = serve(&mut reader, &handler, &ctx, &tx).await;

    handler.disconnect(&ctx);
    // The writer may be parked on a peer that stopped reading
    writer_task.abort();
    log_ipc_debug!("Client disconnected", connection = connection.0);
    result
}

async fn serve(
    reader: &mut OwnedReadHalf,
    handler: &Arc<CommandHandler>,
    ctx: &Arc<ConnectionContext>,
    tx: &mpsc::Sender<ServerFrame>,
) -> Result<()> {
    loop {
        let request: Request = match read_frame(reader).await {
            Ok(Some(request)) => request,
            Ok(None) => return Ok(()),
            Err(FrameError::Codec(e)) => {
                let message = format!("Deserialize error: {}", e);
                log_server_warn!("Failed to deserialize request", error = message.as_str());
                let response = Response::fault(FaultKind::Protocol, message);
                if tx.send(ServerFrame::Response(response)).await.is_err() {
                    return Ok(());
                }
                continue;
            }
            Err(e) => {
                let error = e.to_string();
                log_server_warn!("Invalid frame, dropping client", error = error.as_str());
                return Ok(());
            }
        };

        let handler = Arc::clone(handler);
        let ctx = Arc::clone(ctx);
        let response =
            tokio::task::spawn_blocking(move || handler.handle_request(&ctx, request)).await?;

        if tx.send(ServerFrame::Response(response)).await.is_err() {
            return Ok(());
        }
    }
}
