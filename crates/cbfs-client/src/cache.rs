//! Local copies of fetched files.
//!
//! Each known name is `Absent`, `Valid` or `Invalid`. Only a `Valid` entry is
//! ever served; anything else sends the caller back to the server.
//!
//! A notice can race a fetch: the server may invalidate a name after it
//! answered an `OpenFile` but before the reply is stored here. Every notice
//! bumps a per-name counter, and [`ClientCache::store_fetched`] refuses to
//! mark data valid if the counter moved since the fetch started.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheState {
    Absent,
    Valid,
    Invalid,
}

#[derive(Debug, Clone)]
struct CacheEntry {
    data: Bytes,
    valid: bool,
}

#[derive(Debug, Default)]
struct Inner {
    entries: HashMap<String, CacheEntry>,
    notices: HashMap<String, u64>,
}

/// Shared handle; clones see the same entries
#[derive(Debug, Clone, Default)]
pub struct ClientCache {
    inner: Arc<RwLock<Inner>>,
}

impl ClientCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store fresh data as `Valid`, replacing whatever was there
    pub fn store(&self, name: &str, data: Bytes) {
        self.inner
            .write()
            .entries
            .insert(name.to_string(), CacheEntry { data, valid: true });
    }

    /// Store data fetched after observing `seen` notices for `name`.
    /// Returns false if a notice arrived meanwhile; the entry is then kept
    /// `Invalid` so the next read goes back to the server.
    pub fn store_fetched(&self, name: &str, data: Bytes, seen: u64) -> bool {
        let mut inner = self.inner.write();
        let current = inner.notices.get(name).copied().unwrap_or(0);
        let valid = current == seen;
        inner
            .entries
            .insert(name.to_string(), CacheEntry { data, valid });
        valid
    }

    /// Number of notices seen for `name` so far
    pub fn notice_count(&self, name: &str) -> u64 {
        self.inner.read().notices.get(name).copied().unwrap_or(0)
    }

    /// Apply an inbound notice. Returns true if a `Valid` entry flipped.
    pub fn invalidate(&self, name: &str) -> bool {
        let mut inner = self.inner.write();
        *inner.notices.entry(name.to_string()).or_insert(0) += 1;
        match inner.entries.get_mut(name) {
            Some(entry) if entry.valid => {
                entry.valid = false;
                true
            }
            _ => false,
        }
    }

    /// Cached bytes, only while `Valid`
    pub fn get_cached(&self, name: &str) -> Option<Bytes> {
        self.inner
            .read()
            .entries
            .get(name)
            .filter(|entry| entry.valid)
            .map(|entry| entry.data.clone())
    }

    pub fn state(&self, name: &str) -> CacheState {
        match self.inner.read().entries.get(name) {
            None => CacheState::Absent,
            Some(entry) if entry.valid => CacheState::Valid,
            Some(_) => CacheState::Invalid,
        }
    }

    /// Returns true if an entry existed
    pub fn remove(&self, name: &str) -> bool {
        self.inner.write().entries.remove(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.inner.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().entries.is_empty()
    }
}
