//! Blob storage for externalized binary payloads.
//!
//! [`BlobStorage`] is the backend seam. [`BlobStore`] wraps a backend and
//! hands out [`BlobSession`] guards: a session is opened on creation and
//! closed when the guard is dropped, whichever way the caller leaves.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{IntegrityError, KeyError, StorageResult};
use crate::key::ResourceKey;

/// Identifies one blob: `collection/resourceId/versionId`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlobKey(String);

impl BlobKey {
    /// Builds the blob key of a fully versioned resource key.
    pub fn from_resource_key(key: &ResourceKey) -> Result<Self, KeyError> {
        match (&key.resource_id, &key.version_id) {
            (Some(id), Some(version)) => Ok(Self(format!("{}/{}/{}", key.collection, id, version))),
            (None, _) => Err(KeyError::MissingResourceId {
                collection: key.collection.clone(),
            }),
            (Some(_), None) => Err(KeyError::MissingVersionId {
                key: key.to_string(),
            }),
        }
    }

    /// Returns the key as a path-like string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BlobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A backend holding raw bytes by [`BlobKey`].
#[async_trait]
pub trait BlobStorage: Send + Sync + fmt::Debug {
    /// Returns a human-readable name for this backend.
    fn backend_name(&self) -> &'static str;

    /// Prepares the backend for a sequence of calls.
    async fn open(&self) -> StorageResult<()>;

    /// Releases whatever `open` acquired. Must not fail.
    fn close(&self);

    /// Writes bytes, replacing any existing blob with the same key.
    async fn store(&self, key: &BlobKey, bytes: Vec<u8>) -> StorageResult<()>;

    /// Reads bytes; `None` if the blob does not exist.
    async fn fetch(&self, key: &BlobKey) -> StorageResult<Option<Vec<u8>>>;

    /// Deletes blobs. Absent blobs are ignored.
    async fn delete(&self, keys: &[BlobKey]) -> StorageResult<()>;

    /// Deletes every blob.
    async fn delete_all(&self) -> StorageResult<()>;
}

/// Adapter over a [`BlobStorage`] backend.
#[derive(Debug, Clone)]
pub struct BlobStore {
    backend: Arc<dyn BlobStorage>,
}

impl BlobStore {
    /// Wraps a backend.
    pub fn new(backend: Arc<dyn BlobStorage>) -> Self {
        Self { backend }
    }

    /// Returns the backend name.
    pub fn backend_name(&self) -> &'static str {
        self.backend.backend_name()
    }

    /// Opens a scoped session.
    pub async fn session(&self) -> StorageResult<BlobSession<'_>> {
        self.backend.open().await?;
        Ok(BlobSession {
            backend: self.backend.as_ref(),
        })
    }
}

/// An open blob session. Closes the backend session on drop.
pub struct BlobSession<'a> {
    backend: &'a dyn BlobStorage,
}

impl BlobSession<'_> {
    /// Writes a blob.
    pub async fn store(&self, key: &BlobKey, bytes: Vec<u8>) -> StorageResult<()> {
        self.backend.store(key, bytes).await
    }

    /// Reads a blob that a stored record claims exists.
    ///
    /// A missing blob is an integrity violation.
    pub async fn fetch(&self, key: &BlobKey) -> StorageResult<Vec<u8>> {
        match self.backend.fetch(key).await? {
            Some(bytes) => Ok(bytes),
            None => Err(IntegrityError::MissingBlob {
                key: key.to_string(),
            }
            .into()),
        }
    }

    /// Deletes blobs; absent ones are ignored.
    pub async fn delete(&self, keys: &[BlobKey]) -> StorageResult<()> {
        if keys.is_empty() {
            return Ok(());
        }
        self.backend.delete(keys).await
    }

    /// Deletes every blob.
    pub async fn delete_all(&self) -> StorageResult<()> {
        self.backend.delete_all().await
    }
}

impl Drop for BlobSession<'_> {
    fn drop(&mut self) {
        self.backend.close();
    }
}
