//! Batch transactions over a non-transactional document store.
//!
//! A [`BatchTransaction`] groups the writes of one batch under a batch id and
//! records a compensating action for each of them. On failure the
//! compensations run in reverse dependency order:
//!
//! 1. delete every document this batch inserted (matched by record id *and*
//!    batch id, so documents owned by other batches are never touched);
//! 2. flip every record this batch superseded back to `current`, unless a
//!    concurrent batch has already made another version current;
//! 3. re-insert every document this batch displaced.
//!
//! Every step runs even when an earlier one fails.
//!
//! Readers may observe a batch half-applied. Sequence numbers drawn and blobs
//! written while the batch was pending are not reverted.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::error::{StorageError, StorageResult, TransactionError};
use crate::key::ResourceKey;
use crate::types::{RecordState, collections, fields};

use super::document::{Document, DocumentStore, FindQuery, Filter};

/// Lifecycle of a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchState {
    /// Writes may still be applied.
    Pending,
    /// All writes succeeded.
    Committed,
    /// Compensations ran.
    RolledBack,
}

impl fmt::Display for BatchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BatchState::Pending => write!(f, "pending"),
            BatchState::Committed => write!(f, "committed"),
            BatchState::RolledBack => write!(f, "rolled back"),
        }
    }
}

/// Coordinates the writes of one batch in the `resources` collection.
pub struct BatchTransaction {
    documents: Arc<dyn DocumentStore>,
    batch_id: Uuid,
    state: BatchState,
    inserted: Vec<String>,
    superseded: Vec<String>,
    displaced: Vec<Document>,
}

impl fmt::Debug for BatchTransaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchTransaction")
            .field("batch_id", &self.batch_id)
            .field("state", &self.state)
            .field("inserted", &self.inserted.len())
            .field("superseded", &self.superseded.len())
            .field("displaced", &self.displaced.len())
            .finish()
    }
}

impl BatchTransaction {
    /// Starts a pending batch.
    pub fn begin(documents: Arc<dyn DocumentStore>, batch_id: Uuid) -> Self {
        debug!(batch_id = %batch_id, "Began batch");
        Self {
            documents,
            batch_id,
            state: BatchState::Pending,
            inserted: Vec::new(),
            superseded: Vec::new(),
            displaced: Vec::new(),
        }
    }

    /// Returns the batch id.
    pub fn batch_id(&self) -> Uuid {
        self.batch_id
    }

    /// Returns the current state.
    pub fn state(&self) -> BatchState {
        self.state
    }

    fn ensure_pending(&self) -> StorageResult<()> {
        if self.state == BatchState::Pending {
            Ok(())
        } else {
            Err(TransactionError::NotPending {
                batch_id: self.batch_id,
                state: self.state.to_string(),
            }
            .into())
        }
    }

    /// Flips the current versions of the given logical resources to `superseded`.
    ///
    /// Keys are compared on collection and resource id; versions are ignored.
    pub async fn supersede(&mut self, keys: &[ResourceKey]) -> StorageResult<u64> {
        self.ensure_pending()?;

        let mut by_collection: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
        for key in keys {
            if let Some(id) = key.resource_id.as_deref() {
                by_collection
                    .entry(key.collection.as_str())
                    .or_default()
                    .push(id);
            }
        }

        let mut record_ids = Vec::new();
        for (collection, ids) in by_collection {
            let query = FindQuery::new(
                Filter::eq(fields::COLLECTION, collection)
                    .and(Filter::is_in(fields::RESOURCE_ID, ids))
                    .and(Filter::eq(fields::STATE, RecordState::Current.as_str())),
            )
            .include(&[]);
            for doc in self.documents.find(collections::RESOURCES, &query).await? {
                if let Some(Value::String(id)) = doc.get(fields::ID) {
                    record_ids.push(id.clone());
                }
            }
        }

        if record_ids.is_empty() {
            return Ok(0);
        }

        self.superseded.extend(record_ids.iter().cloned());
        let updated = self
            .documents
            .update_many(
                collections::RESOURCES,
                &Filter::is_in(fields::ID, record_ids),
                &state_update(RecordState::Superseded),
            )
            .await?;
        debug!(batch_id = %self.batch_id, count = updated, "Superseded current versions");
        Ok(updated)
    }

    /// Removes the stored document with `record_id`, remembering it so a
    /// rollback can put it back. Returns the removed document.
    pub async fn displace(&mut self, record_id: &str) -> StorageResult<Option<Document>> {
        self.ensure_pending()?;

        let filter = Filter::id(record_id);
        let Some(existing) = self
            .documents
            .find_one(collections::RESOURCES, &filter)
            .await?
        else {
            return Ok(None);
        };

        self.documents
            .delete_many(collections::RESOURCES, &filter)
            .await?;
        self.displaced.push(existing.clone());
        Ok(Some(existing))
    }

    /// Inserts the batch's documents.
    pub async fn insert_batch(&mut self, documents: Vec<Document>) -> StorageResult<()> {
        self.ensure_pending()?;

        for doc in &documents {
            if let Some(Value::String(id)) = doc.get(fields::ID) {
                self.inserted.push(id.clone());
            }
        }
        let count = documents.len();
        self.documents
            .insert_many(collections::RESOURCES, documents)
            .await?;
        debug!(batch_id = %self.batch_id, count, "Inserted batch documents");
        Ok(())
    }

    /// Marks the batch as committed.
    pub fn commit(mut self) -> StorageResult<()> {
        self.ensure_pending()?;
        self.state = BatchState::Committed;
        debug!(
            batch_id = %self.batch_id,
            inserted = self.inserted.len(),
            superseded = self.superseded.len(),
            "Committed batch"
        );
        Ok(())
    }

    /// Runs the compensating actions.
    ///
    /// All compensations are attempted. The first failure is returned and
    /// any later ones are logged.
    pub async fn rollback(&mut self) -> StorageResult<()> {
        self.ensure_pending()?;
        self.state = BatchState::RolledBack;

        let mut errors = Vec::new();

        if !self.inserted.is_empty() {
            let filter = Filter::is_in(fields::ID, self.inserted.iter().cloned())
                .and(Filter::eq(fields::BATCH_ID, self.batch_id.to_string()));
            if let Err(e) = self
                .documents
                .delete_many(collections::RESOURCES, &filter)
                .await
            {
                errors.push(e);
            }
        }

        for record_id in &self.superseded {
            let restored = self
                .documents
                .update_many(
                    collections::RESOURCES,
                    &Filter::id(record_id.as_str()),
                    &state_update(RecordState::Current),
                )
                .await;
            match restored {
                Ok(_) => {}
                // A concurrent batch owns the current version now.
                Err(e) if e.is_constraint_violation() => {
                    debug!(
                        batch_id = %self.batch_id,
                        record_id = %record_id,
                        "Superseded record stays superseded"
                    );
                }
                Err(e) => errors.push(e),
            }
        }

        for doc in self.displaced.drain(..) {
            if let Err(e) = self.documents.upsert(collections::RESOURCES, doc).await {
                errors.push(e);
            }
        }

        let mut errors = errors.into_iter();
        match errors.next() {
            None => {
                debug!(batch_id = %self.batch_id, "Rolled back batch");
                Ok(())
            }
            Some(first) => {
                for other in errors {
                    warn!(batch_id = %self.batch_id, error = %other, "Compensation failed");
                }
                Err(first)
            }
        }
    }

    /// Rolls back because of `cause` and returns the error to surface.
    pub async fn fail(mut self, cause: StorageError) -> StorageError {
        let batch_id = self.batch_id;
        match self.rollback().await {
            Ok(()) => TransactionError::Failed {
                batch_id,
                source: Box::new(cause),
            }
            .into(),
            Err(rollback) => {
                error!(
                    batch_id = %batch_id,
                    cause = %cause,
                    rollback_error = %rollback,
                    "Batch rollback failed"
                );
                TransactionError::RollbackFailed {
                    batch_id,
                    cause: Box::new(cause),
                    rollback: Box::new(rollback),
                }
                .into()
            }
        }
    }
}

impl Drop for BatchTransaction {
    fn drop(&mut self) {
        if self.state == BatchState::Pending {
            warn!(
                batch_id = %self.batch_id,
                inserted = self.inserted.len(),
                "Batch dropped while pending; writes were neither committed nor rolled back"
            );
        }
    }
}

fn state_update(state: RecordState) -> Document {
    let mut set = Document::new();
    set.insert(
        fields::STATE.to_string(),
        Value::String(state.as_str().to_string()),
    );
    set
}
