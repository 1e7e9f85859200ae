//! [`BlobStorage`] over any [`ObjectStore`].

use std::fmt::Debug;
use std::path::Path as FsPath;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use futures::TryStreamExt;
use object_store::local::LocalFileSystem;
use object_store::memory::InMemory;
use object_store::path::Path;
use object_store::{ObjectStore, PutPayload};
use tracing::{debug, trace};

use crate::core::{BlobKey, BlobStorage};
use crate::error::{BlobError, StorageError, StorageResult};

/// Blob storage backed by an object store.
pub struct ObjectStoreBlobStorage {
    store: Arc<dyn ObjectStore>,
    name: &'static str,
    open_sessions: AtomicUsize,
}

impl Debug for ObjectStoreBlobStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectStoreBlobStorage")
            .field("name", &self.name)
            .field("store", &self.store.to_string())
            .field("open_sessions", &self.open_sessions())
            .finish()
    }
}

impl ObjectStoreBlobStorage {
    /// Wraps an existing object store.
    pub fn new(store: Arc<dyn ObjectStore>, name: &'static str) -> Self {
        Self {
            store,
            name,
            open_sessions: AtomicUsize::new(0),
        }
    }

    /// Creates a volatile in-memory blob store.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemory::new()), "memory")
    }

    /// Creates a blob store rooted at a local directory, creating it if needed.
    pub fn local(root: impl AsRef<FsPath>) -> StorageResult<Self> {
        let root = root.as_ref();
        std::fs::create_dir_all(root).map_err(|e| unavailable("local", root, e))?;
        let store =
            LocalFileSystem::new_with_prefix(root).map_err(|e| unavailable("local", root, e))?;
        debug!(root = %root.display(), "Opened local blob store");
        Ok(Self::new(Arc::new(store), "local"))
    }

    /// Creates a blob store in an S3 bucket.
    #[cfg(feature = "s3")]
    pub fn s3(bucket: &str, region: Option<&str>, endpoint: Option<&str>) -> StorageResult<Self> {
        use object_store::aws::AmazonS3Builder;

        let mut builder = AmazonS3Builder::from_env().with_bucket_name(bucket);
        if let Some(region) = region {
            builder = builder.with_region(region);
        }
        if let Some(endpoint) = endpoint {
            builder = builder.with_endpoint(endpoint).with_allow_http(true);
        }

        let store = builder.build().map_err(|e| {
            StorageError::Blob(BlobError::Unavailable {
                backend_name: "s3".to_string(),
                message: format!("failed to build S3 store for bucket '{bucket}': {e}"),
            })
        })?;
        debug!(bucket, "Opened S3 blob store");
        Ok(Self::new(Arc::new(store), "s3"))
    }

    /// Returns the number of sessions currently open.
    pub fn open_sessions(&self) -> usize {
        self.open_sessions.load(Ordering::SeqCst)
    }

    fn operation_error(
        &self,
        operation: &'static str,
        key: &str,
        err: object_store::Error,
    ) -> StorageError {
        StorageError::Blob(BlobError::Operation {
            backend_name: self.name.to_string(),
            operation,
            key: key.to_string(),
            message: err.to_string(),
            source: Some(Box::new(err)),
        })
    }
}

fn unavailable(name: &str, root: &FsPath, err: impl std::fmt::Display) -> StorageError {
    StorageError::Blob(BlobError::Unavailable {
        backend_name: name.to_string(),
        message: format!("cannot use '{}': {}", root.display(), err),
    })
}

fn path_of(key: &BlobKey) -> Path {
    Path::from(key.as_str())
}

#[async_trait]
impl BlobStorage for ObjectStoreBlobStorage {
    fn backend_name(&self) -> &'static str {
        self.name
    }

    async fn open(&self) -> StorageResult<()> {
        let open = self.open_sessions.fetch_add(1, Ordering::SeqCst) + 1;
        trace!(backend = self.name, open, "Opened blob session");
        Ok(())
    }

    fn close(&self) {
        let _ = self
            .open_sessions
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        trace!(backend = self.name, "Closed blob session");
    }

    async fn store(&self, key: &BlobKey, bytes: Vec<u8>) -> StorageResult<()> {
        self.store
            .put(&path_of(key), PutPayload::from(bytes))
            .await
            .map_err(|e| self.operation_error("store", key.as_str(), e))?;
        Ok(())
    }

    async fn fetch(&self, key: &BlobKey) -> StorageResult<Option<Vec<u8>>> {
        let result = match self.store.get(&path_of(key)).await {
            Ok(result) => result,
            Err(object_store::Error::NotFound { .. }) => return Ok(None),
            Err(e) => return Err(self.operation_error("fetch", key.as_str(), e)),
        };
        let bytes = result
            .bytes()
            .await
            .map_err(|e| self.operation_error("fetch", key.as_str(), e))?;
        Ok(Some(bytes.to_vec()))
    }

    async fn delete(&self, keys: &[BlobKey]) -> StorageResult<()> {
        for key in keys {
            match self.store.delete(&path_of(key)).await {
                Ok(()) | Err(object_store::Error::NotFound { .. }) => {}
                Err(e) => return Err(self.operation_error("delete", key.as_str(), e)),
            }
        }
        Ok(())
    }

    async fn delete_all(&self) -> StorageResult<()> {
        let locations: Vec<Path> = self
            .store
            .list(None)
            .map_ok(|meta| meta.location)
            .try_collect()
            .await
            .map_err(|e| self.operation_error("list", "", e))?;

        for location in &locations {
            match self.store.delete(location).await {
                Ok(()) | Err(object_store::Error::NotFound { .. }) => {}
                Err(e) => return Err(self.operation_error("delete", location.as_ref(), e)),
            }
        }
        debug!(backend = self.name, count = locations.len(), "Deleted all blobs");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::BlobStore;
    use crate::key::ResourceKey;

    fn key(id: &str, version: &str) -> BlobKey {
        BlobKey::from_resource_key(&ResourceKey::versioned("Binary", id, version)).unwrap()
    }

    async fn exercise(storage: ObjectStoreBlobStorage) {
        storage.store(&key("a", "1"), b"one".to_vec()).await.unwrap();
        storage.store(&key("a", "2"), b"two".to_vec()).await.unwrap();
        storage.store(&key("b", "1"), b"three".to_vec()).await.unwrap();

        assert_eq!(
            storage.fetch(&key("a", "1")).await.unwrap().as_deref(),
            Some(&b"one"[..])
        );
        assert!(storage.fetch(&key("x", "1")).await.unwrap().is_none());

        storage.delete(&[key("a", "1"), key("missing", "1")]).await.unwrap();
        assert!(storage.fetch(&key("a", "1")).await.unwrap().is_none());
        assert!(storage.fetch(&key("a", "2")).await.unwrap().is_some());

        storage.delete_all().await.unwrap();
        assert!(storage.fetch(&key("a", "2")).await.unwrap().is_none());
        assert!(storage.fetch(&key("b", "1")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_in_memory_operations() {
        exercise(ObjectStoreBlobStorage::in_memory()).await;
    }

    #[tokio::test]
    async fn test_local_operations() {
        let dir = tempfile::tempdir().unwrap();
        let storage = ObjectStoreBlobStorage::local(dir.path().join("blobs")).unwrap();
        assert_eq!(storage.backend_name(), "local");
        exercise(storage).await;
    }

    #[tokio::test]
    async fn test_store_overwrites() {
        let storage = ObjectStoreBlobStorage::in_memory();
        storage.store(&key("a", "1"), b"old".to_vec()).await.unwrap();
        storage.store(&key("a", "1"), b"new".to_vec()).await.unwrap();
        assert_eq!(
            storage.fetch(&key("a", "1")).await.unwrap().as_deref(),
            Some(&b"new"[..])
        );
    }

    #[tokio::test]
    async fn test_sessions_close_on_drop() {
        let storage = Arc::new(ObjectStoreBlobStorage::in_memory());
        let store = BlobStore::new(storage.clone());
        {
            let _first = store.session().await.unwrap();
            let _second = store.session().await.unwrap();
            assert_eq!(storage.open_sessions(), 2);
        }
        assert_eq!(storage.open_sessions(), 0);

        storage.close();
        assert_eq!(storage.open_sessions(), 0);
    }
}
