//! Cache store — namespaced, versioned storage of request → response entries.
//!
//! A store holds any number of *namespaces*, each an independently deletable
//! partition tagged with a deployment version (`static-v3`, `dynamic-v3`).
//! Lookups search every live namespace, newest first, and return the first
//! hit. Deleting a namespace is atomic with respect to lookups: a reader sees
//! either the whole namespace or none of it.
//!
//! Two implementations share one in-memory index:
//!
//! - [`FsCacheStore`] — durable; every write lands on disk before it is visible.
//! - [`MemoryCacheStore`] — process-local, for embedding and tests.

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::http::Response;

mod entry;
mod fs;
mod index;
mod memory;

pub use entry::{CachedEntry, RequestKey};
pub use fs::FsCacheStore;
pub use memory::MemoryCacheStore;

/// Errors surfaced by a [`CacheStore`]. None of them are retried internally.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage quota exceeded: entry needs {needed} bytes, {available} available")]
    QuotaExceeded { needed: u64, available: u64 },

    #[error("storage I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("corrupt cache record {}: {reason}", path.display())]
    Corrupt { path: PathBuf, reason: String },

    #[error("invalid namespace name {0:?}")]
    InvalidNamespace(String),
}

impl StorageError {
    /// `true` for [`QuotaExceeded`](Self::QuotaExceeded), which callers may
    /// want to treat differently from a transient I/O failure.
    pub fn is_quota(&self) -> bool {
        matches!(self, Self::QuotaExceeded { .. })
    }
}

/// A namespaced response cache.
///
/// Implementations guarantee that a concurrent `put` and `lookup` on the same
/// key never observe a half-written entry, and that namespace deletion is
/// invisible to readers until complete. No cross-key transactions are offered.
#[async_trait]
pub trait CacheStore: Send + Sync + 'static {
    /// Stores `response` under `key` in `namespace`, replacing any previous
    /// entry for that key there. Creates the namespace if it does not exist.
    async fn put(
        &self,
        namespace: &str,
        key: &RequestKey,
        response: &Response,
        stored_at: DateTime<Utc>,
    ) -> Result<(), StorageError>;

    /// Searches all live namespaces for `key`, most recently created first.
    async fn lookup(&self, key: &RequestKey) -> Result<Option<CachedEntry>, StorageError>;

    /// Removes a namespace and every entry in it. Returns `false` when there
    /// was nothing to delete; that is not an error.
    async fn delete_namespace(&self, name: &str) -> Result<bool, StorageError>;

    /// Names of the live namespaces, in creation order.
    async fn list_namespaces(&self) -> Result<Vec<String>, StorageError>;

    /// Creates `name` as an empty namespace if it does not exist yet.
    async fn ensure_namespace(&self, name: &str) -> Result<(), StorageError>;
}

/// Namespace names double as directory names, so they are restricted to
/// `[A-Za-z0-9._-]`, must not start with `.`, and must not be empty. Names
/// ending in `.json` or `.tmp` would collide with the store's own files
/// (`namespaces.json` and its temp sibling).
pub(crate) fn validate_namespace(name: &str) -> Result<(), StorageError> {
    let valid = !name.is_empty()
        && !name.starts_with('.')
        && !name.ends_with(".json")
        && !name.ends_with(".tmp")
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'_' | b'-'));
    if valid {
        Ok(())
    } else {
        Err(StorageError::InvalidNamespace(name.to_owned()))
    }
}
