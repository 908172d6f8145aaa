//! Authoritative name → record directory.
//!
//! ## Locking
//!
//! - `create`, `delete` and `rename` hold the store-wide namespace mutex for
//!   their whole check-then-mutate sequence.
//! - `read` and `modify` never touch the namespace mutex: they resolve the
//!   record through the concurrent map and then take only that record's lock.
//!
//! After a successful mutation the store hands the affected (old) name to its
//! [`Invalidate`] sink, outside of every lock.

use std::collections::BTreeSet;
use std::sync::Arc;

use bytes::Bytes;
use cbfs_config::{log_server_debug, log_server_info};
use dashmap::DashMap;
use parking_lot::Mutex;

use crate::error::{require, Result, ServerError};
use crate::record::FileRecord;

/// Receives the name of every file whose contents clients must drop
pub trait Invalidate: Send + Sync {
    fn invalidate(&self, name: &str);
}

pub struct FileStore {
    files: DashMap<String, Arc<FileRecord>>,
    namespace: Mutex<()>,
    invalidator: Option<Arc<dyn Invalidate>>,
}

impl Default for FileStore {
    fn default() -> Self {
        Self::new()
    }
}

impl FileStore {
    /// A store that dispatches no invalidations
    pub fn new() -> Self {
        Self {
            files: DashMap::new(),
            namespace: Mutex::new(()),
            invalidator: None,
        }
    }

    pub fn with_invalidator(invalidator: Arc<dyn Invalidate>) -> Self {
        Self {
            invalidator: Some(invalidator),
            ..Self::new()
        }
    }

    pub fn create(&self, name: &str, data: Bytes) -> Result<()> {
        require(name, "file name")?;
        {
            let _ns = self.namespace.lock();
            if self.files.contains_key(name) {
                return Err(ServerError::AlreadyExists {
                    name: name.to_string(),
                });
            }
            self.files
                .insert(name.to_string(), Arc::new(FileRecord::new(data)));
        }
        log_server_info!("File created", name = name);
        self.dispatch(name);
        Ok(())
    }

    pub fn read(&self, name: &str) -> Result<Bytes> {
        let record = self.lookup(name)?;
        record.read().ok_or_else(|| ServerError::Deleted {
            name: name.to_string(),
        })
    }

    /// Returns whether the contents changed. Only a change is broadcast.
    pub fn modify(&self, name: &str, new_data: &[u8]) -> Result<bool> {
        let record = self.lookup(name)?;
        let changed = record.modify(new_data).ok_or_else(|| ServerError::Deleted {
            name: name.to_string(),
        })?;
        log_server_debug!("File modified", name = name, changed = changed);
        if changed {
            self.dispatch(name);
        }
        Ok(changed)
    }

    pub fn delete(&self, name: &str) -> Result<()> {
        require(name, "file name")?;
        {
            let _ns = self.namespace.lock();
            let (_, record) = self
                .files
                .remove(name)
                .ok_or_else(|| ServerError::NotFound {
                    name: name.to_string(),
                })?;
            // Waits for in-flight readers and writers of this record
            record.deactivate();
        }
        log_server_info!("File deleted", name = name);
        self.dispatch(name);
        Ok(())
    }

    /// Move the record at `name` to `new_name`. The destination is checked
    /// first, so a collision is reported even when `name` is also missing.
    pub fn rename(&self, name: &str, new_name: &str) -> Result<()> {
        require(name, "file name")?;
        require(new_name, "new file name")?;
        {
            let _ns = self.namespace.lock();
            if self.files.contains_key(new_name) {
                return Err(ServerError::AlreadyExists {
                    name: new_name.to_string(),
                });
            }
            let (_, record) = self
                .files
                .remove(name)
                .ok_or_else(|| ServerError::NotFound {
                    name: name.to_string(),
                })?;
            self.files.insert(new_name.to_string(), record);
        }
        log_server_info!("File renamed", name = name, new_name = new_name);
        self.dispatch(name);
        Ok(())
    }

    /// Point-in-time snapshot of live names
    pub fn list(&self) -> BTreeSet<String> {
        self.files.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.files.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    fn lookup(&self, name: &str) -> Result<Arc<FileRecord>> {
        require(name, "file name")?;
        // Clone the Arc so the map shard guard is released before locking the record
        self.files
            .get(name)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| ServerError::NotFound {
                name: name.to_string(),
            })
    }

    fn dispatch(&self, name: &str) {
        if let Some(invalidator) = &self.invalidator {
            invalidator.invalidate(name);
        }
    }
}
