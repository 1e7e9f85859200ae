//! Monotonic identifiers.
//!
//! Two counters live in the `counters` collection as `{_id, last}` documents:
//! `resourceId` for logical ids and `versionId` for version ids. Both are
//! increased with the document store's atomic counter primitive, so values
//! are unique and increasing across every process sharing the store.

use std::sync::Arc;

use tracing::debug;

use crate::error::StorageResult;
use crate::key::ResourceKey;
use crate::types::collections;

/// Counter id for logical resource ids.
pub const RESOURCE_COUNTER: &str = "resourceId";

/// Counter id for version ids.
pub const VERSION_COUNTER: &str = "versionId";

/// Hands out resource and version sequence numbers.
#[derive(Debug, Clone)]
pub struct SequenceGenerator {
    documents: Arc<dyn super::DocumentStore>,
}

impl SequenceGenerator {
    /// Creates a generator over a document store.
    pub fn new(documents: Arc<dyn super::DocumentStore>) -> Self {
        Self { documents }
    }

    /// Returns the next resource sequence number.
    pub async fn next_resource_sequence(&self) -> StorageResult<i64> {
        self.documents
            .increment_counter(collections::COUNTERS, RESOURCE_COUNTER)
            .await
    }

    /// Returns the next version sequence number.
    pub async fn next_version_sequence(&self) -> StorageResult<i64> {
        self.documents
            .increment_counter(collections::COUNTERS, VERSION_COUNTER)
            .await
    }

    /// Makes sure later resource sequence numbers are greater than `seq`.
    ///
    /// Used after importing resources whose numeric ids were assigned elsewhere.
    pub async fn ensure_sequence_floor(&self, seq: i64) -> StorageResult<()> {
        let last = self
            .documents
            .raise_counter(collections::COUNTERS, RESOURCE_COUNTER, seq)
            .await?;
        debug!(floor = seq, last, "Ensured resource sequence floor");
        Ok(())
    }

    /// Makes sure later version sequence numbers are greater than `seq`.
    pub async fn ensure_version_floor(&self, seq: i64) -> StorageResult<()> {
        let last = self
            .documents
            .raise_counter(collections::COUNTERS, VERSION_COUNTER, seq)
            .await?;
        debug!(floor = seq, last, "Ensured version sequence floor");
        Ok(())
    }

    /// Assigns a fresh key in `collection`, with both a new id and a new version.
    pub async fn next_key(&self, collection: &str) -> StorageResult<ResourceKey> {
        let id = self.next_resource_sequence().await?;
        let version = self.next_version_sequence().await?;
        Ok(ResourceKey::versioned(
            collection,
            id.to_string(),
            version.to_string(),
        ))
    }

    /// Assigns a new version to an existing logical resource.
    pub async fn next_version_key(&self, key: &ResourceKey) -> StorageResult<ResourceKey> {
        let version = self.next_version_sequence().await?;
        Ok(key.with_version(version.to_string())?)
    }
}
