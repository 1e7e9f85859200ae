//! Search indexer hook.

use async_trait::async_trait;

use crate::error::StorageResult;
use crate::types::Entry;

/// Receives committed entries for indexing.
///
/// The record store calls this after a batch commits. Errors are logged by
/// the store and never fail the write that triggered them.
#[async_trait]
pub trait SearchIndexer: Send + Sync + std::fmt::Debug {
    /// Indexes one entry.
    async fn process(&self, entry: &Entry) -> StorageResult<()>;

    /// Indexes a batch of entries.
    async fn process_batch(&self, entries: &[Entry]) -> StorageResult<()> {
        for entry in entries {
            self.process(entry).await?;
        }
        Ok(())
    }

    /// Drops the whole index.
    async fn clean(&self) -> StorageResult<()>;
}

/// An indexer that does nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopIndexer;

#[async_trait]
impl SearchIndexer for NoopIndexer {
    async fn process(&self, _entry: &Entry) -> StorageResult<()> {
        Ok(())
    }

    async fn process_batch(&self, _entries: &[Entry]) -> StorageResult<()> {
        Ok(())
    }

    async fn clean(&self) -> StorageResult<()> {
        Ok(())
    }
}
