//! A registered client connection to cbfsd.
//!
//! One reader task owns the read half of the socket. It hands each
//! `Response` to the single outstanding call and applies each `Notice` to the
//! [`ClientCache`] before publishing it on the invalidation stream.

use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use cbfs_config::{log_client_debug, log_client_info, log_client_warn};
use cbfs_ipc::frame::{read_frame, write_frame};
use cbfs_ipc::{Notice, Request, Response, ServerFrame, PROTOCOL_VERSION};
use parking_lot::Mutex;
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;

use crate::cache::ClientCache;
use crate::error::{ClientError, Result};

/// Capacity of the invalidation event stream; slow subscribers lag
const EVENT_CAPACITY: usize = 256;

#[derive(Default)]
struct Pending {
    waiter: Option<oneshot::Sender<Response>>,
    /// Replies still owed to calls whose futures were dropped
    abandoned: usize,
    closed: bool,
}

/// Settles `Pending` for a call whose future is dropped before its reply.
///
/// The server answers in order, so a reply owed to a fully written request
/// is skipped by the reader. A request cut off mid-write may have left a
/// partial frame on the socket; the session is then unusable.
struct InFlight<'a> {
    pending: &'a Mutex<Pending>,
    written: bool,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        let mut pending = self.pending.lock();
        // No waiter left: the reply was already routed, or the reader is gone
        if pending.waiter.take().is_none() {
            return;
        }
        if self.written {
            pending.abandoned += 1;
        } else {
            pending.closed = true;
        }
    }
}

pub struct Session {
    client_id: String,
    writer: tokio::sync::Mutex<OwnedWriteHalf>,
    pending: Arc<Mutex<Pending>>,
    cache: ClientCache,
    /// Never read; kept so callers can resubscribe. Closes with the reader.
    events: broadcast::Receiver<String>,
    reader: JoinHandle<()>,
}

impl Session {
    /// Connect, handshake and register as `client_id`
    pub async fn connect(socket: &Path, client_id: &str) -> Result<Self> {
        let stream = UnixStream::connect(socket).await?;
        let (read_half, write_half) = stream.into_split();

        let pending = Arc::new(Mutex::new(Pending::default()));
        let cache = ClientCache::new();
        let (event_tx, events) = broadcast::channel(EVENT_CAPACITY);

        let reader = tokio::spawn(run_reader(
            read_half,
            Arc::clone(&pending),
            cache.clone(),
            event_tx,
        ));

        let session = Self {
            client_id: client_id.to_string(),
            writer: tokio::sync::Mutex::new(write_half),
            pending,
            cache,
            events,
            reader,
        };

        // 1. Handshake
        let handshake = Request::Handshake {
            client_version: env!("CARGO_PKG_VERSION").to_string(),
            protocol_version: PROTOCOL_VERSION,
        };
        match session.call(handshake).await? {
            Response::HandshakeAck { server_version, .. } => {
                log_client_debug!("Handshake", server_version = server_version.as_str());
            }
            other => return Err(ClientError::UnexpectedResponse(other)),
        }

        // 2. Register
        let register = Request::Register {
            client_id: session.client_id.clone(),
        };
        session.expect_ack(register).await?;
        log_client_info!("Registered", client_id = client_id);

        Ok(session)
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn cache(&self) -> &ClientCache {
        &self.cache
    }

    /// Names invalidated by the server from now on, in arrival order.
    /// The stream ends when the connection does.
    pub fn invalidations(&self) -> broadcast::Receiver<String> {
        self.events.resubscribe()
    }

    pub async fn list_files(&self) -> Result<Vec<String>> {
        match self.call(Request::ListFiles).await? {
            Response::Files { names } => Ok(names),
            other => Err(ClientError::UnexpectedResponse(other)),
        }
    }

    /// Serve from the cache when `Valid`, otherwise fetch and cache
    pub async fn open_file(&self, name: &str) -> Result<Bytes> {
        if let Some(data) = self.cache.get_cached(name) {
            log_client_debug!("Cache hit", name = name);
            return Ok(data);
        }

        let seen = self.cache.notice_count(name);
        let request = Request::OpenFile {
            client_id: self.client_id.clone(),
            name: name.to_string(),
        };
        match self.call(request).await? {
            Response::Contents { data } => {
                let data = Bytes::from(data);
                if !self.cache.store_fetched(name, data.clone(), seen) {
                    log_client_debug!("Fetched copy already stale", name = name);
                }
                Ok(data)
            }
            other => Err(ClientError::UnexpectedResponse(other)),
        }
    }

    pub async fn create_file(&self, name: &str, data: Bytes) -> Result<()> {
        let seen = self.cache.notice_count(name);
        let request = Request::CreateFile {
            client_id: self.client_id.clone(),
            name: name.to_string(),
            data: data.to_vec(),
        };
        self.expect_ack(request).await?;
        self.store_written(name, data, seen);
        Ok(())
    }

    pub async fn edit_file(&self, name: &str, data: Bytes) -> Result<()> {
        let seen = self.cache.notice_count(name);
        let request = Request::EditFile {
            name: name.to_string(),
            data: data.to_vec(),
        };
        self.expect_ack(request).await?;
        self.store_written(name, data, seen);
        Ok(())
    }

    pub async fn remove_file(&self, name: &str) -> Result<()> {
        let request = Request::RemoveFile {
            name: name.to_string(),
        };
        self.expect_ack(request).await?;
        self.cache.remove(name);
        Ok(())
    }

    /// The renamed file is not cached under its new name until opened
    pub async fn rename_file(&self, name: &str, new_name: &str) -> Result<()> {
        let request = Request::RenameFile {
            name: name.to_string(),
            new_name: new_name.to_string(),
        };
        self.expect_ack(request).await?;
        self.cache.remove(name);
        Ok(())
    }

    /// Stop receiving notices. The connection stays open.
    pub async fn unregister(&self) -> Result<()> {
        let request = Request::Unregister {
            client_id: self.client_id.clone(),
        };
        self.expect_ack(request).await?;
        log_client_info!("Unregistered", client_id = self.client_id.as_str());
        Ok(())
    }

    /// Unregister and close the connection
    pub async fn close(self) -> Result<()> {
        self.unregister().await
    }

    /// A notice that overtook the ack may stand for a later write by
    /// someone else, so the written bytes are only kept as `Invalid`.
    fn store_written(&self, name: &str, data: Bytes, seen: u64) {
        if !self.cache.store_fetched(name, data, seen) {
            log_client_debug!("Written copy already stale", name = name);
        }
    }

    async fn expect_ack(&self, request: Request) -> Result<()> {
        match self.call(request).await? {
            Response::Ack => Ok(()),
            other => Err(ClientError::UnexpectedResponse(other)),
        }
    }

    /// One request in flight at a time; the writer lock is held until the
    /// matching response arrives. Dropping the future mid-call is tolerated
    /// (see [`InFlight`]).
    async fn call(&self, request: Request) -> Result<Response> {
        let mut writer = self.writer.lock().await;

        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock();
            if pending.closed {
                return Err(ClientError::Disconnected);
            }
            pending.waiter = Some(tx);
        }

        // Declared after `writer`, so it settles before the lock is released
        let mut in_flight = InFlight {
            pending: &self.pending,
            written: false,
        };
        write_frame(&mut *writer, &request).await?;
        in_flight.written = true;

        let response = rx.await.map_err(|_| ClientError::Disconnected)?;
        drop(in_flight);
        drop(writer);

        match response {
            Response::Fault { kind, message } => Err(ClientError::Remote { kind, message }),
            response => Ok(response),
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

async fn run_reader(
    mut reader: OwnedReadHalf,
    pending: Arc<Mutex<Pending>>,
    cache: ClientCache,
    events: broadcast::Sender<String>,
) {
    loop {
        match read_frame::<_, ServerFrame>(&mut reader).await {
            Ok(Some(ServerFrame::Response(response))) => {
                let waiter = {
                    let mut pending = pending.lock();
                    if pending.abandoned > 0 {
                        pending.abandoned -= 1;
                        log_client_debug!("Skipping reply to a dropped call");
                        continue;
                    }
                    pending.waiter.take()
                };
                match waiter {
                    Some(tx) => {
                        let _ = tx.send(response);
                    }
                    None => log_client_warn!("Dropping unsolicited response"),
                }
            }
            Ok(Some(ServerFrame::Notice(Notice::Invalidate { name }))) => {
                let flipped = cache.invalidate(&name);
                log_client_debug!("Invalidation", name = name.as_str(), flipped = flipped);
                // No subscribers is fine
                let _ = events.send(name);
            }
            Ok(None) => break,
            Err(e) => {
                let error = e.to_string();
                log_client_warn!("Connection read failed", error = error.as_str());
                break;
            }
        }
    }

    let mut pending = pending.lock();
    pending.closed = true;
    // Dropping the waiter fails the outstanding call
    pending.waiter = None;
}
