//! Which clients hold a cached copy of which file.
//!
//! Entries are never removed by an invalidation: a client that fetched a
//! file keeps hearing about it. They go away only through
//! [`CacheIndex::forget_client`].

use std::collections::BTreeSet;

use dashmap::DashMap;

use crate::error::{require, Result};

#[derive(Debug, Default)]
pub struct CacheIndex {
    holders: DashMap<String, BTreeSet<String>>,
}

impl CacheIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Idempotent. Returns true if `client_id` was newly added for `file_name`.
    pub fn record_cached(&self, client_id: &str, file_name: &str) -> Result<bool> {
        require(client_id, "client ID")?;
        require(file_name, "file name")?;
        Ok(self
            .holders
            .entry(file_name.to_string())
            .or_default()
            .insert(client_id.to_string()))
    }

    /// Snapshot of clients to notify for `file_name`
    pub fn holders(&self, file_name: &str) -> Vec<String> {
        self.holders
            .get(file_name)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn is_cached_by(&self, client_id: &str, file_name: &str) -> bool {
        self.holders
            .get(file_name)
            .is_some_and(|set| set.contains(client_id))
    }

    /// Drop one (client, file) pair. Returns true if it was present.
    pub fn forget_cached(&self, client_id: &str, file_name: &str) -> bool {
        let removed = {
            let Some(mut set) = self.holders.get_mut(file_name) else {
                return false;
            };
            set.remove(client_id)
        };
        self.holders.remove_if(file_name, |_, set| set.is_empty());
        removed
    }

    /// Drop `client_id` from every set. Returns how many sets it was in.
    pub fn forget_client(&self, client_id: &str) -> usize {
        let mut removed = 0;
        self.holders.retain(|_, set| {
            if set.remove(client_id) {
                removed += 1;
            }
            !set.is_empty()
        });
        removed
    }

    /// Number of file names with at least one holder
    pub fn len(&self) -> usize {
        self.holders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.holders.is_empty()
    }
}
