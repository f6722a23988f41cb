//! Process-local [`CacheStore`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::index::NamespaceIndex;
use super::{CacheStore, CachedEntry, RequestKey, StorageError, validate_namespace};
use crate::http::Response;

/// A [`CacheStore`] that lives only as long as the process.
///
/// Same semantics as [`FsCacheStore`](super::FsCacheStore), including the
/// optional byte quota, minus durability.
#[derive(Debug, Default)]
pub struct MemoryCacheStore {
    index: RwLock<NamespaceIndex>,
    quota_bytes: Option<u64>,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Limits the total bytes stored across all namespaces.
    #[must_use]
    pub fn with_quota(mut self, quota_bytes: u64) -> Self {
        self.quota_bytes = Some(quota_bytes);
        self
    }

    /// Bytes currently charged against the quota.
    pub async fn used_bytes(&self) -> u64 {
        self.index.read().await.used_bytes()
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn put(
        &self,
        namespace: &str,
        key: &RequestKey,
        response: &Response,
        stored_at: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        validate_namespace(namespace)?;
        let entry = CachedEntry::new(namespace, key.clone(), response.clone(), stored_at);
        let mut index = self.index.write().await;
        index.check_quota(namespace, &entry, self.quota_bytes)?;
        index.insert(entry);
        Ok(())
    }

    async fn lookup(&self, key: &RequestKey) -> Result<Option<CachedEntry>, StorageError> {
        Ok(self.index.read().await.lookup(key))
    }

    async fn delete_namespace(&self, name: &str) -> Result<bool, StorageError> {
        Ok(self.index.write().await.remove(name))
    }

    async fn list_namespaces(&self) -> Result<Vec<String>, StorageError> {
        Ok(self.index.read().await.names())
    }

    async fn ensure_namespace(&self, name: &str) -> Result<(), StorageError> {
        validate_namespace(name)?;
        self.index.write().await.create(name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::{Method, StatusCode};

    fn key(url: &str) -> RequestKey {
        RequestKey::new(&Method::Get, url)
    }

    #[tokio::test]
    async fn put_then_lookup() {
        let store = MemoryCacheStore::new();
        let response = Response::new(StatusCode::Ok).body("hello");
        store
            .put("dynamic-v1", &key("http://o/a"), &response, Utc::now())
            .await
            .unwrap();

        let hit = store.lookup(&key("http://o/a")).await.unwrap().unwrap();
        assert_eq!(hit.namespace(), "dynamic-v1");
        assert_eq!(hit.response().body_ref().as_ref(), b"hello");
        assert!(store.lookup(&key("http://o/b")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn delete_namespace_twice_matches_once() {
        let store = MemoryCacheStore::new();
        let response = Response::new(StatusCode::Ok).body("x");
        store
            .put("static-v1", &key("http://o/"), &response, Utc::now())
            .await
            .unwrap();
        store.ensure_namespace("dynamic-v1").await.unwrap();

        assert!(store.delete_namespace("static-v1").await.unwrap());
        let after_once = store.list_namespaces().await.unwrap();
        assert!(!store.delete_namespace("static-v1").await.unwrap());
        let after_twice = store.list_namespaces().await.unwrap();

        assert_eq!(after_once, after_twice);
        assert_eq!(after_twice, vec!["dynamic-v1"]);
        assert!(store.lookup(&key("http://o/")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn quota_error_is_distinct() {
        let store = MemoryCacheStore::new().with_quota(16);
        let big = Response::new(StatusCode::Ok).body("x".repeat(64));
        let err = store
            .put("dynamic-v1", &key("http://o/big"), &big, Utc::now())
            .await
            .unwrap_err();
        assert!(err.is_quota());
        assert_eq!(store.used_bytes().await, 0);
    }
}
