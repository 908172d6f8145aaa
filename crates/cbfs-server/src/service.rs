//! RPC core: the operations clients invoke, composed over explicit store,
//! registry, cache index and broadcaster instances.

use std::sync::Arc;

use bytes::Bytes;
use cbfs_config::{log_server_debug, ServerConfig};

use crate::broadcast::{InvalidationBroadcaster, StatsSnapshot};
use crate::cache_index::CacheIndex;
use crate::error::{require, Result};
use crate::registry::{Callback, ClientRegistry, ConnectionId};
use crate::store::FileStore;

pub struct FileService {
    store: Arc<FileStore>,
    registry: Arc<ClientRegistry>,
    index: Arc<CacheIndex>,
    broadcaster: Arc<InvalidationBroadcaster>,
}

impl FileService {
    /// Build fresh instances and spawn the notification workers.
    /// Must be called from within a Tokio runtime.
    pub fn start(config: &ServerConfig) -> Self {
        let registry = Arc::new(ClientRegistry::new());
        let index = Arc::new(CacheIndex::new());
        let broadcaster = Arc::new(InvalidationBroadcaster::start(
            Arc::clone(&registry),
            Arc::clone(&index),
            config.notify_workers,
            config.notify_queue,
        ));
        let store = Arc::new(FileStore::with_invalidator(broadcaster.clone()));

        Self {
            store,
            registry,
            index,
            broadcaster,
        }
    }

    pub fn store(&self) -> &FileStore {
        &self.store
    }

    pub fn registry(&self) -> &ClientRegistry {
        &self.registry
    }

    pub fn cache_index(&self) -> &CacheIndex {
        &self.index
    }

    pub fn notify_stats(&self) -> StatsSnapshot {
        self.broadcaster.stats()
    }

    pub fn register(&self, client_id: &str, callback: Callback) -> Result<()> {
        self.registry.register(client_id, callback).map(|_| ())
    }

    /// Unregister and drop the client from every cache-index set
    pub fn unregister(&self, client_id: &str) -> Result<()> {
        self.registry.unregister(client_id)?;
        self.forget(client_id);
        Ok(())
    }

    /// Connection teardown; a no-op if `client_id` has since been bound elsewhere
    pub fn disconnect(&self, client_id: &str, connection: ConnectionId) {
        if self.registry.unregister_connection(client_id, connection) {
            self.forget(client_id);
        }
    }

    pub fn list_files(&self) -> Vec<String> {
        self.store.list().into_iter().collect()
    }

    /// The creator holds the new contents, so it joins the cache index
    pub fn create_file(&self, client_id: &str, name: &str, data: Bytes) -> Result<()> {
        require(client_id, "client ID")?;
        self.tracked(client_id, name, || self.store.create(name, data))
    }

    pub fn open_file(&self, client_id: &str, name: &str) -> Result<Bytes> {
        require(client_id, "client ID")?;
        self.tracked(client_id, name, || self.store.read(name))
    }

    pub fn remove_file(&self, name: &str) -> Result<()> {
        self.store.delete(name)
    }

    /// Returns whether the contents changed
    pub fn edit_file(&self, name: &str, data: &[u8]) -> Result<bool> {
        self.store.modify(name, data)
    }

    pub fn rename_file(&self, name: &str, new_name: &str) -> Result<()> {
        self.store.rename(name, new_name)
    }

    /// Record the caller as a holder of `name`, then run `op`.
    ///
    /// The index entry exists before the store is touched, so any mutation
    /// that follows `op` sees the caller among the holders. A failed `op`
    /// withdraws the entry again if this call added it.
    fn tracked<T>(
        &self,
        client_id: &str,
        name: &str,
        op: impl FnOnce() -> Result<T>,
    ) -> Result<T> {
        let added = self.record(client_id, name)?;
        match op() {
            Ok(value) => Ok(value),
            Err(e) => {
                if added {
                    self.index.forget_cached(client_id, name);
                }
                Err(e)
            }
        }
    }

    /// Returns true if a new entry was added and kept
    fn record(&self, client_id: &str, name: &str) -> Result<bool> {
        if !self.registry.is_registered(client_id) {
            log_server_debug!(
                "Serving unregistered client without tracking",
                client_id = client_id,
                name = name
            );
            return Ok(false);
        }
        let added = self.index.record_cached(client_id, name)?;

        // An unregister that ran between the check and the insert has
        // already pruned the index; take the entry back out.
        if !self.registry.is_registered(client_id) {
            if added {
                self.index.forget_cached(client_id, name);
            }
            return Ok(false);
        }
        Ok(added)
    }

    fn forget(&self, client_id: &str) {
        let pruned = self.index.forget_client(client_id);
        log_server_debug!("Pruned cache index", client_id = client_id, files = pruned);
    }
}
