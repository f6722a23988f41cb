//! In-memory namespace index shared by the memory and filesystem stores.

use std::collections::HashMap;

use super::{CachedEntry, RequestKey, StorageError};

// One live namespace and its entries, keyed by `RequestKey::as_str`.
#[derive(Debug)]
struct Namespace {
    name: String,
    entries: HashMap<String, CachedEntry>,
}

/// Live namespaces in creation order, plus the byte total charged to the quota.
#[derive(Debug, Default)]
pub(crate) struct NamespaceIndex {
    namespaces: Vec<Namespace>,
    used_bytes: u64,
}

impl NamespaceIndex {
    /// Searches the newest namespace first.
    pub(crate) fn lookup(&self, key: &RequestKey) -> Option<CachedEntry> {
        self.namespaces
            .iter()
            .rev()
            .find_map(|ns| ns.entries.get(key.as_str()))
            .cloned()
    }

    pub(crate) fn contains(&self, name: &str) -> bool {
        self.namespaces.iter().any(|ns| ns.name == name)
    }

    pub(crate) fn names(&self) -> Vec<String> {
        self.namespaces.iter().map(|ns| ns.name.clone()).collect()
    }

    pub(crate) fn used_bytes(&self) -> u64 {
        self.used_bytes
    }

    /// Fails with [`StorageError::QuotaExceeded`] if storing `entry` into
    /// `namespace` would push usage past `quota`. A replaced entry's bytes are
    /// credited back first.
    pub(crate) fn check_quota(
        &self,
        namespace: &str,
        entry: &CachedEntry,
        quota: Option<u64>,
    ) -> Result<(), StorageError> {
        let Some(quota) = quota else {
            return Ok(());
        };
        let replaced = self
            .namespaces
            .iter()
            .find(|ns| ns.name == namespace)
            .and_then(|ns| ns.entries.get(entry.key().as_str()))
            .map_or(0, CachedEntry::size);
        let needed = entry.size();
        let available = quota.saturating_sub(self.used_bytes - replaced);
        if needed > available {
            return Err(StorageError::QuotaExceeded { needed, available });
        }
        Ok(())
    }

    /// Adds an empty namespace. Returns `false` if it already existed.
    pub(crate) fn create(&mut self, name: &str) -> bool {
        if self.contains(name) {
            return false;
        }
        self.namespaces.push(Namespace {
            name: name.to_owned(),
            entries: HashMap::new(),
        });
        true
    }

    /// Stores `entry` in its namespace, creating the namespace if needed.
    pub(crate) fn insert(&mut self, entry: CachedEntry) {
        self.create(entry.namespace());
        let size = entry.size();
        if let Some(ns) = self
            .namespaces
            .iter_mut()
            .find(|ns| ns.name == entry.namespace())
        {
            if let Some(old) = ns.entries.insert(entry.key().as_str().to_owned(), entry) {
                self.used_bytes -= old.size();
            }
            self.used_bytes += size;
        }
    }

    /// Drops a namespace and all its entries. Returns `false` if it did not exist.
    pub(crate) fn remove(&mut self, name: &str) -> bool {
        let Some(pos) = self.namespaces.iter().position(|ns| ns.name == name) else {
            return false;
        };
        let ns = self.namespaces.remove(pos);
        let freed: u64 = ns.entries.values().map(CachedEntry::size).sum();
        self.used_bytes -= freed;
        true
    }
}
