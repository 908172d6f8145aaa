//! Request dispatch for cbfsd

use std::sync::Arc;

use bytes::Bytes;
use cbfs_config::{log_server_debug, log_server_info, log_server_warn};
use cbfs_ipc::{Request, Response, ServerFrame, PROTOCOL_VERSION};
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::error::{Result, ServerError};
use crate::registry::{Callback, ConnectionId};
use crate::service::FileService;

/// Per-connection state the handler needs to bind a client to its socket
pub struct ConnectionContext {
    id: ConnectionId,
    outbound: mpsc::Sender<ServerFrame>,
    registered: Mutex<Option<String>>,
}

impl ConnectionContext {
    pub fn new(id: ConnectionId, outbound: mpsc::Sender<ServerFrame>) -> Self {
        Self {
            id,
            outbound,
            registered: Mutex::new(None),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Client ID bound to this connection, if any
    pub fn client_id(&self) -> Option<String> {
        self.registered.lock().clone()
    }
}

pub struct CommandHandler {
    service: Arc<FileService>,
}

impl CommandHandler {
    pub fn new(service: Arc<FileService>) -> Self {
        Self { service }
    }

    pub fn service(&self) -> &FileService {
        &self.service
    }

    /// Handle one request. Blocking: store and registry calls take sync locks.
    pub fn handle_request(&self, ctx: &ConnectionContext, request: Request) -> Response {
        let op = request.op();
        log_server_debug!("Request", op = op, connection = ctx.id.0);

        match self.dispatch(ctx, request) {
            Ok(response) => response,
            Err(e) => {
                let message = e.to_string();
                log_server_debug!("Request failed", op = op, error = message.as_str());
                Response::fault(e.fault_kind(), message)
            }
        }
    }

    fn dispatch(&self, ctx: &ConnectionContext, request: Request) -> Result<Response> {
        match request {
            Request::Handshake {
                client_version,
                protocol_version,
            } => {
                log_server_info!(
                    "Handshake",
                    client_version = client_version.as_str(),
                    protocol_version = protocol_version,
                    connection = ctx.id.0
                );
                if protocol_version != PROTOCOL_VERSION {
                    return Err(ServerError::UnsupportedProtocol {
                        client: protocol_version,
                        server: PROTOCOL_VERSION,
                    });
                }
                Ok(Response::HandshakeAck {
                    server_version: env!("CARGO_PKG_VERSION").to_string(),
                    protocol_version: PROTOCOL_VERSION,
                })
            }

            Request::Register { client_id } => self.register(ctx, client_id),

            Request::Unregister { client_id } => {
                self.service.unregister(&client_id)?;
                let mut bound = ctx.registered.lock();
                if bound.as_deref() == Some(client_id.as_str()) {
                    *bound = None;
                }
                Ok(Response::Ack)
            }

            Request::ListFiles => Ok(Response::Files {
                names: self.service.list_files(),
            }),

            Request::CreateFile {
                client_id,
                name,
                data,
            } => {
                self.service
                    .create_file(&client_id, &name, Bytes::from(data))?;
                Ok(Response::Ack)
            }

            Request::OpenFile { client_id, name } => {
                let data = self.service.open_file(&client_id, &name)?;
                Ok(Response::Contents {
                    data: data.to_vec(),
                })
            }

            Request::RemoveFile { name } => {
                self.service.remove_file(&name)?;
                Ok(Response::Ack)
            }

            Request::EditFile { name, data } => {
                self.service.edit_file(&name, &data)?;
                Ok(Response::Ack)
            }

            Request::RenameFile { name, new_name } => {
                self.service.rename_file(&name, &new_name)?;
                Ok(Response::Ack)
            }
        }
    }

    /// A connection carries at most one registered client
    fn register(&self, ctx: &ConnectionContext, client_id: String) -> Result<Response> {
        let mut bound = ctx.registered.lock();
        if let Some(existing) = bound.as_ref() {
            log_server_warn!(
                "Connection already carries a client",
                connection = ctx.id.0,
                client_id = existing.as_str()
            );
            return Err(ServerError::RegistrationConflict {
                id: existing.clone(),
            });
        }

        let callback = Callback::new(ctx.id, ctx.outbound.clone());
        self.service.register(&client_id, callback)?;
        *bound = Some(client_id);
        Ok(Response::Ack)
    }

    /// Release whatever the connection still holds
    pub fn disconnect(&self, ctx: &ConnectionContext) {
        if let Some(client_id) = ctx.registered.lock().take() {
            self.service.disconnect(&client_id, ctx.id);
        }
    }
}
