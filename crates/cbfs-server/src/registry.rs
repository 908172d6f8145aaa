//! Connected clients and how to reach each one.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use cbfs_config::log_server_info;
use cbfs_ipc::{Notice, ServerFrame};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::error::{require, Result, ServerError};

static NEXT_CONNECTION: AtomicU64 = AtomicU64::new(1);

/// Identifies one accepted socket connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub u64);

impl ConnectionId {
    pub fn next() -> Self {
        Self(NEXT_CONNECTION.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

#[derive(Error, Debug)]
pub enum DeliveryError {
    #[error("client handle is inactive")]
    Inactive,

    #[error("connection {0} is closed")]
    Closed(ConnectionId),

    #[error("connection {0} outbound queue is full")]
    Full(ConnectionId),
}

/// Capability to push notices to one client: the owning connection plus
/// its outbound frame queue.
#[derive(Debug, Clone)]
pub struct Callback {
    connection: ConnectionId,
    sender: mpsc::Sender<ServerFrame>,
}

impl Callback {
    pub fn new(connection: ConnectionId, sender: mpsc::Sender<ServerFrame>) -> Self {
        Self { connection, sender }
    }

    pub fn connection(&self) -> ConnectionId {
        self.connection
    }

    /// Never waits. A connection whose queue is full misses the notice.
    pub fn send_invalidate(&self, name: &str) -> std::result::Result<(), DeliveryError> {
        let frame = ServerFrame::Notice(Notice::Invalidate {
            name: name.to_string(),
        });
        self.sender.try_send(frame).map_err(|e| match e {
            TrySendError::Full(_) => DeliveryError::Full(self.connection),
            TrySendError::Closed(_) => DeliveryError::Closed(self.connection),
        })
    }
}

#[derive(Debug)]
pub struct ClientHandle {
    id: String,
    callback: Callback,
    active: AtomicBool,
}

impl ClientHandle {
    fn new(id: String, callback: Callback) -> Self {
        Self {
            id,
            callback,
            active: AtomicBool::new(true),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn connection(&self) -> ConnectionId {
        self.callback.connection()
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    fn deactivate(&self) {
        self.active.store(false, Ordering::Release);
    }

    pub fn deliver_invalidate(&self, name: &str) -> std::result::Result<(), DeliveryError> {
        if !self.is_active() {
            return Err(DeliveryError::Inactive);
        }
        self.callback.send_invalidate(name)
    }
}

#[derive(Debug, Default)]
pub struct ClientRegistry {
    clients: DashMap<String, Arc<ClientHandle>>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rejects an id that already has an active handle
    pub fn register(&self, id: &str, callback: Callback) -> Result<Arc<ClientHandle>> {
        require(id, "client ID")?;
        match self.clients.entry(id.to_string()) {
            Entry::Occupied(_) => Err(ServerError::RegistrationConflict { id: id.to_string() }),
            Entry::Vacant(slot) => {
                let connection = callback.connection().to_string();
                let handle = Arc::new(ClientHandle::new(id.to_string(), callback));
                slot.insert(Arc::clone(&handle));
                log_server_info!(
                    "Client registered",
                    client_id = id,
                    connection = connection.as_str()
                );
                Ok(handle)
            }
        }
    }

    pub fn unregister(&self, id: &str) -> Result<Arc<ClientHandle>> {
        require(id, "client ID")?;
        let (_, handle) = self
            .clients
            .remove(id)
            .ok_or_else(|| ServerError::UnknownClient { id: id.to_string() })?;
        handle.deactivate();
        log_server_info!(
            "Client unregistered",
            client_id = id,
            remaining = self.clients.len()
        );
        Ok(handle)
    }

    /// Unregister `id` only if it is still bound to `connection`.
    /// Used when a connection drops without unregistering.
    pub fn unregister_connection(&self, id: &str, connection: ConnectionId) -> bool {
        match self
            .clients
            .remove_if(id, |_, handle| handle.connection() == connection)
        {
            Some((_, handle)) => {
                handle.deactivate();
                log_server_info!(
                    "Client dropped with its connection",
                    client_id = id,
                    remaining = self.clients.len()
                );
                true
            }
            None => false,
        }
    }

    pub fn lookup(&self, id: &str) -> Result<Arc<ClientHandle>> {
        self.clients
            .get(id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| ServerError::UnknownClient { id: id.to_string() })
    }

    pub fn is_registered(&self, id: &str) -> bool {
        self.clients.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn callback() -> (Callback, mpsc::Receiver<ServerFrame>) {
        let (tx, rx) = mpsc::channel(8);
        (Callback::new(ConnectionId::next(), tx), rx)
    }

    #[test]
    fn test_register_rejects_conflict() {
        let registry = ClientRegistry::new();
        let (cb1, _rx1) = callback();
        let (cb2, _rx2) = callback();
        let first = registry.register("alice", cb1).unwrap();

        let err = registry.register("alice", cb2).unwrap_err();
        assert!(matches!(err, ServerError::RegistrationConflict { .. }));
        // The original handle is still the reachable one
        assert_eq!(
            registry.lookup("alice").unwrap().connection(),
            first.connection()
        );
    }

    #[test]
    fn test_unregister_deactivates_and_removes() {
        let registry = ClientRegistry::new();
        let (cb, _rx) = callback();
        let handle = registry.register("alice", cb).unwrap();

        registry.unregister("alice").unwrap();
        assert!(!handle.is_active());
        assert!(registry.lookup("alice").is_err());
        assert!(matches!(
            registry.unregister("alice").unwrap_err(),
            ServerError::UnknownClient { .. }
        ));
    }

    #[test]
    fn test_reregister_after_unregister() {
        let registry = ClientRegistry::new();
        let (cb1, _rx1) = callback();
        let (cb2, _rx2) = callback();
        registry.register("alice", cb1).unwrap();
        registry.unregister("alice").unwrap();
        assert!(registry.register("alice", cb2).is_ok());
    }

    #[test]
    fn test_unregister_connection_checks_owner() {
        let registry = ClientRegistry::new();
        let (cb, _rx) = callback();
        let handle = registry.register("alice", cb).unwrap();

        assert!(!registry.unregister_connection("alice", ConnectionId::next()));
        assert!(registry.is_registered("alice"));
        assert!(registry.unregister_connection("alice", handle.connection()));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_empty_id_is_invalid() {
        let registry = ClientRegistry::new();
        let (cb, _rx) = callback();
        assert!(matches!(
            registry.register("", cb).unwrap_err(),
            ServerError::InvalidArgument(_)
        ));
    }

    #[tokio::test]
    async fn test_deliver_pushes_notice_frame() {
        let registry = ClientRegistry::new();
        let (cb, mut rx) = callback();
        let handle = registry.register("alice", cb).unwrap();

        handle.deliver_invalidate("f").unwrap();
        assert_eq!(
            rx.recv().await,
            Some(ServerFrame::Notice(Notice::Invalidate {
                name: "f".to_string()
            }))
        );
    }

    #[tokio::test]
    async fn test_inactive_handle_is_not_delivered() {
        let registry = ClientRegistry::new();
        let (cb, mut rx) = callback();
        let handle = registry.register("alice", cb).unwrap();
        registry.unregister("alice").unwrap();

        let err = handle.deliver_invalidate("f").unwrap_err();
        assert!(matches!(err, DeliveryError::Inactive));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_closed_connection_reports_error() {
        let (cb, rx) = callback();
        drop(rx);
        assert!(matches!(
            cb.send_invalidate("f").unwrap_err(),
            DeliveryError::Closed(_)
        ));
    }

    #[tokio::test]
    async fn test_full_connection_queue_fails_immediately() {
        let (tx, mut rx) = mpsc::channel(1);
        let cb = Callback::new(ConnectionId::next(), tx);
        cb.send_invalidate("f").unwrap();

        assert!(matches!(
            cb.send_invalidate("g").unwrap_err(),
            DeliveryError::Full(_)
        ));
        // The queued notice is untouched
        assert_eq!(
            rx.recv().await,
            Some(ServerFrame::Notice(Notice::Invalidate {
                name: "f".to_string()
            }))
        );
    }
}
