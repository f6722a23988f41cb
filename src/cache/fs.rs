//! Durable [`CacheStore`] backed by a directory tree.
//!
//! Layout under the root directory:
//!
//! ```text
//! namespaces.json            live namespace names, creation order (searched newest first)
//! <namespace>/<sha256>.json  one record per entry, named by hash of the request key
//! ```
//!
//! Every file is written to a `.tmp` sibling and renamed into place, so a
//! crash never leaves a half-written record or manifest. Namespace deletion
//! rewrites the manifest first and removes the directory second; a directory
//! that is not listed in the manifest is leftover garbage and is swept on open.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use tokio::fs;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::entry::EntryRecord;
use super::index::NamespaceIndex;
use super::{CacheStore, CachedEntry, RequestKey, StorageError, validate_namespace};
use crate::http::Response;

const MANIFEST: &str = "namespaces.json";
const RECORD_EXT: &str = "json";
const TEMP_EXT: &str = "tmp";

static TEMP_SEQ: AtomicU64 = AtomicU64::new(0);

/// A [`CacheStore`] whose writes survive process restarts.
///
/// All entries are also held in memory, so lookups never touch the disk. A
/// `put` writes its record to a private temp file before taking the index
/// lock, then renames it into place and updates the index under the lock.
/// `delete_namespace` holds the lock across the manifest rewrite, so readers
/// never see a namespace that is only half gone.
///
/// # Examples
///
/// ```rust,no_run
/// use cacheroute::cache::{CacheStore, FsCacheStore};
///
/// # async fn run() -> Result<(), cacheroute::cache::StorageError> {
/// let store = FsCacheStore::open("/var/cache/cacheroute", Some(64 * 1024 * 1024)).await?;
/// println!("{:?}", store.list_namespaces().await?);
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct FsCacheStore {
    root: PathBuf,
    quota_bytes: Option<u64>,
    index: RwLock<NamespaceIndex>,
}

impl FsCacheStore {
    /// Opens (or creates) a store rooted at `root` and loads every live
    /// namespace into memory.
    ///
    /// Unreadable records are logged and removed; the cache can always be
    /// refilled from the network.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Io`] if the root cannot be created or listed,
    /// and [`StorageError::Corrupt`] if the namespace manifest is unreadable.
    pub async fn open(root: impl Into<PathBuf>, quota_bytes: Option<u64>) -> Result<Self, StorageError> {
        let root = root.into();
        fs::create_dir_all(&root).await.map_err(io_at(&root))?;

        let names = read_manifest(&root).await?;
        let mut index = NamespaceIndex::default();
        for name in &names {
            index.create(name);
            load_namespace(&root, name, &mut index).await?;
        }
        sweep_orphans(&root, &names).await?;

        info!(
            root = %root.display(),
            namespaces = names.len(),
            bytes = index.used_bytes(),
            "cache store opened"
        );

        Ok(Self {
            root,
            quota_bytes,
            index: RwLock::new(index),
        })
    }

    /// Root directory of the store.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Bytes currently charged against the quota.
    pub async fn used_bytes(&self) -> u64 {
        self.index.read().await.used_bytes()
    }

    fn namespace_dir(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    fn record_path(&self, namespace: &str, key: &RequestKey) -> PathBuf {
        self.namespace_dir(namespace)
            .join(format!("{}.{RECORD_EXT}", record_stem(key)))
    }

    // Unique per call, so concurrent puts of one key never share a temp file.
    fn temp_path(&self, namespace: &str, key: &RequestKey) -> PathBuf {
        let seq = TEMP_SEQ.fetch_add(1, Ordering::Relaxed);
        self.namespace_dir(namespace)
            .join(format!("{}.{seq}.{TEMP_EXT}", record_stem(key)))
    }

    // Publishes a record already written to `temp`. Only the quota check, the
    // manifest update for a new namespace, and the rename happen under the lock.
    async fn commit(&self, entry: CachedEntry, temp: &Path, path: &Path) -> Result<(), StorageError> {
        let mut index = self.index.write().await;
        index.check_quota(entry.namespace(), &entry, self.quota_bytes)?;
        self.create_namespace_locked(&mut index, entry.namespace()).await?;
        fs::rename(temp, path).await.map_err(io_at(path))?;
        index.insert(entry);
        Ok(())
    }

    // Caller holds the index write lock.
    async fn create_namespace_locked(
        &self,
        index: &mut NamespaceIndex,
        name: &str,
    ) -> Result<(), StorageError> {
        if index.contains(name) {
            return Ok(());
        }
        let dir = self.namespace_dir(name);
        fs::create_dir_all(&dir).await.map_err(io_at(&dir))?;

        let mut names = index.names();
        names.push(name.to_owned());
        write_manifest(&self.root, &names).await?;

        index.create(name);
        debug!(namespace = name, "namespace created");
        Ok(())
    }
}

#[async_trait]
impl CacheStore for FsCacheStore {
    async fn put(
        &self,
        namespace: &str,
        key: &RequestKey,
        response: &Response,
        stored_at: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        validate_namespace(namespace)?;
        let entry = CachedEntry::new(namespace, key.clone(), response.clone(), stored_at);
        let path = self.record_path(namespace, key);
        let bytes = serde_json::to_vec(&EntryRecord::from(&entry)).map_err(|e| {
            StorageError::Corrupt {
                path: path.clone(),
                reason: e.to_string(),
            }
        })?;

        let dir = self.namespace_dir(namespace);
        fs::create_dir_all(&dir).await.map_err(io_at(&dir))?;
        let temp = self.temp_path(namespace, key);
        fs::write(&temp, &bytes).await.map_err(io_at(&temp))?;

        let committed = self.commit(entry, &temp, &path).await;
        if committed.is_err() {
            if let Err(e) = fs::remove_file(&temp).await {
                if e.kind() != ErrorKind::NotFound {
                    warn!(path = %temp.display(), error = %e, "failed to remove rejected write");
                }
            }
        }
        committed?;

        debug!(namespace, key = %key, bytes = bytes.len(), "entry stored");
        Ok(())
    }

    async fn lookup(&self, key: &RequestKey) -> Result<Option<CachedEntry>, StorageError> {
        Ok(self.index.read().await.lookup(key))
    }

    async fn delete_namespace(&self, name: &str) -> Result<bool, StorageError> {
        let mut index = self.index.write().await;
        if !index.contains(name) {
            return Ok(false);
        }

        let remaining: Vec<String> = index.names().into_iter().filter(|n| n != name).collect();
        write_manifest(&self.root, &remaining).await?;
        index.remove(name);

        // The namespace is already gone from the manifest; a failure here only
        // leaves garbage for the next open to sweep.
        let dir = self.namespace_dir(name);
        if let Err(e) = fs::remove_dir_all(&dir).await {
            if e.kind() != ErrorKind::NotFound {
                warn!(namespace = name, error = %e, "failed to remove namespace directory");
            }
        }

        info!(namespace = name, "namespace deleted");
        Ok(true)
    }

    async fn list_namespaces(&self) -> Result<Vec<String>, StorageError> {
        Ok(self.index.read().await.names())
    }

    async fn ensure_namespace(&self, name: &str) -> Result<(), StorageError> {
        validate_namespace(name)?;
        let mut index = self.index.write().await;
        self.create_namespace_locked(&mut index, name).await
    }
}

fn record_stem(key: &RequestKey) -> String {
    hex::encode(Sha256::digest(key.as_str().as_bytes()))
}

fn io_at(path: &Path) -> impl FnOnce(std::io::Error) -> StorageError + '_ {
    move |source| StorageError::Io {
        path: path.to_path_buf(),
        source,
    }
}

async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StorageError> {
    let temp = path.with_extension(TEMP_EXT);
    fs::write(&temp, bytes).await.map_err(io_at(&temp))?;
    fs::rename(&temp, path).await.map_err(io_at(path))
}

async fn read_manifest(root: &Path) -> Result<Vec<String>, StorageError> {
    let path = root.join(MANIFEST);
    let bytes = match fs::read(&path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(source) => return Err(StorageError::Io { path, source }),
    };
    let names: Vec<String> = serde_json::from_slice(&bytes).map_err(|e| StorageError::Corrupt {
        path: path.clone(),
        reason: e.to_string(),
    })?;
    for name in &names {
        validate_namespace(name)?;
    }
    Ok(names)
}

async fn write_manifest(root: &Path, names: &[String]) -> Result<(), StorageError> {
    let path = root.join(MANIFEST);
    let bytes = serde_json::to_vec(names).map_err(|e| StorageError::Corrupt {
        path: path.clone(),
        reason: e.to_string(),
    })?;
    write_atomic(&path, &bytes).await
}

async fn load_namespace(root: &Path, name: &str, index: &mut NamespaceIndex) -> Result<(), StorageError> {
    let dir = root.join(name);
    let mut entries = match fs::read_dir(&dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            fs::create_dir_all(&dir).await.map_err(io_at(&dir))?;
            return Ok(());
        }
        Err(source) => return Err(StorageError::Io { path: dir, source }),
    };

    while let Some(file) = entries.next_entry().await.map_err(io_at(&dir))? {
        let path = file.path();
        match path.extension().and_then(|e| e.to_str()) {
            Some(RECORD_EXT) => {}
            Some(TEMP_EXT) => {
                discard(&path, "interrupted write").await;
                continue;
            }
            _ => continue,
        }

        let bytes = fs::read(&path).await.map_err(io_at(&path))?;
        let entry = serde_json::from_slice::<EntryRecord>(&bytes)
            .map_err(|e| e.to_string())
            .and_then(|record| record.into_entry(name));
        match entry {
            Ok(entry) => index.insert(entry),
            Err(reason) => {
                warn!(path = %path.display(), %reason, "unreadable cache record");
                discard(&path, "unreadable record").await;
            }
        }
    }
    Ok(())
}

async fn sweep_orphans(root: &Path, live: &[String]) -> Result<(), StorageError> {
    let mut entries = fs::read_dir(root).await.map_err(io_at(root))?;
    while let Some(file) = entries.next_entry().await.map_err(io_at(root))? {
        let path = file.path();
        let is_dir = file.file_type().await.map(|t| t.is_dir()).unwrap_or(false);
        let name = file.file_name();
        let name = name.to_string_lossy();

        if is_dir && !live.iter().any(|n| *n == name) {
            info!(namespace = %name, "sweeping orphaned namespace directory");
            if let Err(e) = fs::remove_dir_all(&path).await {
                warn!(path = %path.display(), error = %e, "failed to sweep directory");
            }
        } else if !is_dir && path.extension().and_then(|e| e.to_str()) == Some(TEMP_EXT) {
            discard(&path, "interrupted write").await;
        }
    }
    Ok(())
}

async fn discard(path: &Path, why: &str) {
    debug!(path = %path.display(), why, "removing file");
    if let Err(e) = fs::remove_file(path).await {
        warn!(path = %path.display(), error = %e, "failed to remove file");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::http::{Method, StatusCode};

    fn scratch_dir() -> PathBuf {
        std::env::temp_dir().join(format!("cacheroute-fs-{}", uuid::Uuid::new_v4()))
    }

    fn key(url: &str) -> RequestKey {
        RequestKey::new(&Method::Get, url)
    }

    #[tokio::test]
    async fn entries_survive_reopen() {
        let dir = scratch_dir();
        {
            let store = FsCacheStore::open(&dir, None).await.unwrap();
            let response = Response::new(StatusCode::Ok)
                .header("Content-Type", "text/css")
                .body("body{}");
            store
                .put("static-v1", &key("http://o/site.css"), &response, Utc::now())
                .await
                .unwrap();
            store.ensure_namespace("dynamic-v1").await.unwrap();
        }

        let store = FsCacheStore::open(&dir, None).await.unwrap();
        assert_eq!(
            store.list_namespaces().await.unwrap(),
            vec!["static-v1", "dynamic-v1"]
        );
        let hit = store.lookup(&key("http://o/site.css")).await.unwrap().unwrap();
        assert_eq!(hit.response().body_ref().as_ref(), b"body{}");
        assert_eq!(hit.response().headers().get("content-type"), Some("text/css"));

        fs::remove_dir_all(&dir).await.unwrap();
    }

    #[tokio::test]
    async fn deleted_namespace_stays_deleted() {
        let dir = scratch_dir();
        {
            let store = FsCacheStore::open(&dir, None).await.unwrap();
            let response = Response::new(StatusCode::Ok).body("old");
            store
                .put("dynamic-v0", &key("http://o/a"), &response, Utc::now())
                .await
                .unwrap();
            assert!(store.delete_namespace("dynamic-v0").await.unwrap());
            assert!(!store.delete_namespace("dynamic-v0").await.unwrap());
            assert!(!dir.join("dynamic-v0").exists());
        }

        let store = FsCacheStore::open(&dir, None).await.unwrap();
        assert!(store.list_namespaces().await.unwrap().is_empty());
        assert!(store.lookup(&key("http://o/a")).await.unwrap().is_none());

        fs::remove_dir_all(&dir).await.unwrap();
    }

    #[tokio::test]
    async fn orphan_directories_are_swept() {
        let dir = scratch_dir();
        fs::create_dir_all(dir.join("static-v0")).await.unwrap();
        fs::write(dir.join("static-v0").join("x.json"), b"{}").await.unwrap();

        let store = FsCacheStore::open(&dir, None).await.unwrap();
        assert!(store.list_namespaces().await.unwrap().is_empty());
        assert!(!dir.join("static-v0").exists());

        fs::remove_dir_all(&dir).await.unwrap();
    }

    #[tokio::test]
    async fn corrupt_record_is_dropped_on_open() {
        let dir = scratch_dir();
        {
            let store = FsCacheStore::open(&dir, None).await.unwrap();
            store.ensure_namespace("dynamic-v1").await.unwrap();
        }
        let bogus = dir.join("dynamic-v1").join("deadbeef.json");
        fs::write(&bogus, b"not json").await.unwrap();

        let store = FsCacheStore::open(&dir, None).await.unwrap();
        assert_eq!(store.used_bytes().await, 0);
        assert!(!bogus.exists());

        fs::remove_dir_all(&dir).await.unwrap();
    }

    #[tokio::test]
    async fn quota_rejects_without_writing() {
        let dir = scratch_dir();
        let store = FsCacheStore::open(&dir, Some(32)).await.unwrap();
        let response = Response::new(StatusCode::Ok).body("y".repeat(128));

        let err = store
            .put("dynamic-v1", &key("http://o/big"), &response, Utc::now())
            .await
            .unwrap_err();
        assert!(err.is_quota());
        assert!(store.list_namespaces().await.unwrap().is_empty());
        assert!(!store.record_path("dynamic-v1", &key("http://o/big")).exists());
        let mut leftovers = fs::read_dir(dir.join("dynamic-v1")).await.unwrap();
        assert!(leftovers.next_entry().await.unwrap().is_none());

        fs::remove_dir_all(&dir).await.unwrap();
    }

    #[tokio::test]
    async fn invalid_namespace_is_rejected() {
        let dir = scratch_dir();
        let store = FsCacheStore::open(&dir, None).await.unwrap();
        let err = store.ensure_namespace("../outside").await.unwrap_err();
        assert!(matches!(err, StorageError::InvalidNamespace(_)));

        let response = Response::new(StatusCode::Ok).body("x");
        let err = store
            .put(MANIFEST, &key("http://o/"), &response, Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::InvalidNamespace(_)));
        assert!(store.list_namespaces().await.unwrap().is_empty());
        assert!(!dir.join(MANIFEST).is_dir());

        fs::remove_dir_all(&dir).await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_writers_readers_and_deletion() {
        const OLD_KEYS: usize = 16;
        let dir = scratch_dir();
        let store = Arc::new(FsCacheStore::open(&dir, None).await.unwrap());
        let old_url = |i: usize| format!("http://o/old/{i}");
        for i in 0..OLD_KEYS {
            let response = Response::new(StatusCode::Ok).body(format!("old-{i}"));
            store
                .put("dynamic-v0", &key(&old_url(i)), &response, Utc::now())
                .await
                .unwrap();
        }

        let mut tasks = Vec::new();
        for writer in 0..4 {
            let store = Arc::clone(&store);
            tasks.push(tokio::spawn(async move {
                for round in 0..25 {
                    let tag = format!("{writer}:{round};");
                    let response = Response::new(StatusCode::Ok)
                        .header("X-Tag", tag.clone())
                        .body(tag.repeat(64));
                    store
                        .put("dynamic-v1", &key("http://o/shared"), &response, Utc::now())
                        .await
                        .unwrap();
                }
            }));
        }

        for _ in 0..4 {
            let store = Arc::clone(&store);
            tasks.push(tokio::spawn(async move {
                let mut old_gone = false;
                for _ in 0..100 {
                    if let Some(hit) = store.lookup(&key("http://o/shared")).await.unwrap() {
                        let tag = hit.response().headers().get("x-tag").unwrap().to_owned();
                        assert_eq!(hit.response().body_ref().as_ref(), tag.repeat(64).as_bytes());
                    }

                    let listed = store
                        .list_namespaces()
                        .await
                        .unwrap()
                        .iter()
                        .any(|n| n == "dynamic-v0");
                    if old_gone {
                        assert!(!listed, "deleted namespace came back");
                    }
                    if !listed {
                        old_gone = true;
                        for i in 0..OLD_KEYS {
                            assert!(store.lookup(&key(&old_url(i))).await.unwrap().is_none());
                        }
                    }
                    tokio::task::yield_now().await;
                }
            }));
        }

        let deleter = Arc::clone(&store);
        tasks.push(tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(2)).await;
            assert!(deleter.delete_namespace("dynamic-v0").await.unwrap());
        }));

        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(store.list_namespaces().await.unwrap(), vec!["dynamic-v1"]);
        let live = store.lookup(&key("http://o/shared")).await.unwrap().unwrap();

        let mut files = fs::read_dir(dir.join("dynamic-v1")).await.unwrap();
        let mut count = 0;
        while let Some(file) = files.next_entry().await.unwrap() {
            assert_eq!(file.path().extension().and_then(|e| e.to_str()), Some(RECORD_EXT));
            count += 1;
        }
        assert_eq!(count, 1);

        let reopened = FsCacheStore::open(&dir, None).await.unwrap();
        let durable = reopened.lookup(&key("http://o/shared")).await.unwrap().unwrap();
        assert_eq!(durable.response().body_ref(), live.response().body_ref());
        assert_eq!(reopened.used_bytes().await, store.used_bytes().await);

        fs::remove_dir_all(&dir).await.unwrap();
    }
}
