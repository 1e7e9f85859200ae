//! The versioned record store.
//!
//! [`RecordStore`] owns handles to a [`DocumentStore`], an optional blob
//! backend and a [`SearchIndexer`]. It is `Send + Sync` and cheap to clone;
//! share it behind an `Arc` or clone it freely.
//!
//! Every logical resource has exactly one `current` version. The backing
//! store enforces this with a unique partial index on
//! `(@collection, resourceId)` restricted to current records, which
//! [`RecordStore::init`] creates.
//!
//! # Example
//!
//! ```no_run
//! # #[cfg(feature = "sqlite")]
//! # async fn example() -> helios_record_store::StorageResult<()> {
//! use std::sync::Arc;
//! use helios_record_store::backends::sqlite::SqliteBackend;
//! use helios_record_store::config::StoreConfig;
//! use helios_record_store::store::RecordStore;
//! use helios_record_store::types::Entry;
//! use serde_json::json;
//!
//! let backend = SqliteBackend::in_memory()?;
//! backend.init_schema()?;
//! let store = RecordStore::new(Arc::new(backend), StoreConfig::default());
//! store.init().await?;
//!
//! let entry = Entry::resource(json!({
//!     "resourceType": "Patient",
//!     "id": "1",
//!     "meta": {"versionId": "1"}
//! }));
//! store.add(entry, None).await?;
//!
//! let current = store.find_by_id("Patient", "1").await?;
//! assert!(current.is_some());
//! # Ok(())
//! # }
//! ```

mod read;
mod write;

use std::collections::BTreeSet;
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::StoreConfig;
use crate::core::{
    BlobKey, BlobStorage, BlobStore, Document, DocumentStore, Filter, FindQuery, IndexSpec,
    NoopIndexer, SearchIndexer, SequenceGenerator,
};
use crate::error::{SerializationError, StorageResult};
use crate::key::ResourceKey;
use crate::types::{Entry, RecordState, Snapshot, Tag, collections, fields};

pub use read::ListParams;

/// Versioned record storage engine.
#[derive(Debug, Clone)]
pub struct RecordStore {
    documents: Arc<dyn DocumentStore>,
    blobs: Option<BlobStore>,
    indexer: Arc<dyn SearchIndexer>,
    sequence: SequenceGenerator,
    config: StoreConfig,
}

impl RecordStore {
    /// Creates a store without blob externalization and with a no-op indexer.
    pub fn new(documents: Arc<dyn DocumentStore>, config: StoreConfig) -> Self {
        Self {
            sequence: SequenceGenerator::new(documents.clone()),
            documents,
            blobs: None,
            indexer: Arc::new(NoopIndexer),
            config,
        }
    }

    /// Attaches a blob backend. Binary payloads written from now on are
    /// externalized to it.
    pub fn with_blob_storage(mut self, backend: Arc<dyn BlobStorage>) -> Self {
        self.blobs = Some(BlobStore::new(backend));
        self
    }

    /// Sets the search indexer notified after each commit.
    pub fn with_indexer(mut self, indexer: Arc<dyn SearchIndexer>) -> Self {
        self.indexer = indexer;
        self
    }

    /// Returns the configuration.
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Returns the sequence generator sharing this store's document store.
    pub fn sequence(&self) -> &SequenceGenerator {
        &self.sequence
    }

    /// Returns `true` if binary payloads are externalized.
    pub fn externalizes_binaries(&self) -> bool {
        self.blobs.is_some()
    }

    /// Returns the index definitions of the `resources` collection.
    pub fn required_indices() -> Vec<IndexSpec> {
        vec![
            IndexSpec::new("resources_state_kind_collection")
                .asc(fields::STATE)
                .asc(fields::ENTRY_KIND)
                .asc(fields::COLLECTION),
            IndexSpec::new("resources_id_state")
                .asc(fields::COLLECTION)
                .asc(fields::RESOURCE_ID)
                .asc(fields::STATE),
            IndexSpec::new("resources_date_collection")
                .desc(fields::VERSION_DATE)
                .asc(fields::COLLECTION),
            IndexSpec::new("resources_batch").asc(fields::BATCH_ID),
            IndexSpec::new("resources_single_current")
                .asc(fields::COLLECTION)
                .asc(fields::RESOURCE_ID)
                .unique()
                .partial(Filter::eq(fields::STATE, RecordState::Current.as_str())),
        ]
    }

    /// Creates the indices the store relies on. Idempotent.
    pub async fn init(&self) -> StorageResult<()> {
        for index in Self::required_indices() {
            self.documents
                .ensure_index(collections::RESOURCES, &index)
                .await?;
        }
        info!(
            backend = self.documents.backend_name(),
            blob_backend = self.blobs.as_ref().map(BlobStore::backend_name),
            "Record store initialized"
        );
        Ok(())
    }

    /// Erases every record, counter, snapshot and blob, then rebuilds the indices.
    pub async fn clean(&self) -> StorageResult<()> {
        warn!(backend = self.documents.backend_name(), "Erasing all stored data");

        for collection in [
            collections::RESOURCES,
            collections::COUNTERS,
            collections::SNAPSHOTS,
        ] {
            self.documents.drop_collection(collection).await?;
        }

        if let Some(blobs) = &self.blobs {
            let session = blobs.session().await?;
            session.delete_all().await?;
        }

        if let Err(e) = self.indexer.clean().await {
            warn!(error = %e, "Search indexer failed to clean");
        }

        self.init().await?;
        info!("Record store cleaned");
        Ok(())
    }

    /// Permanently deletes every record written in `batch_id`, blobs first.
    ///
    /// Returns the number of records deleted. Purging an unknown batch is a no-op.
    pub async fn purge_batch(&self, batch_id: Uuid) -> StorageResult<u64> {
        let filter = Filter::eq(fields::BATCH_ID, batch_id.to_string());

        if let Some(blobs) = &self.blobs {
            let query = FindQuery::new(filter.clone().and(Filter::eq(fields::EXTERNALIZED, true)))
                .include(&[
                    fields::RESOURCE_ID,
                    fields::VERSION_ID,
                    fields::COLLECTION,
                ]);
            let mut keys = Vec::new();
            for doc in self.documents.find(collections::RESOURCES, &query).await? {
                keys.push(blob_key_of(&doc)?);
            }
            if !keys.is_empty() {
                let session = blobs.session().await?;
                session.delete(&keys).await?;
            }
        }

        let deleted = self
            .documents
            .delete_many(collections::RESOURCES, &filter)
            .await?;
        info!(batch_id = %batch_id, deleted, "Purged batch");
        Ok(deleted)
    }

    /// Returns the distinct tags in use, optionally within one collection.
    pub async fn list_tags(&self, collection: Option<&str>) -> StorageResult<BTreeSet<Tag>> {
        let filter = match collection {
            Some(collection) => Filter::eq(fields::COLLECTION, collection),
            None => Filter::All,
        };
        let values = self
            .documents
            .distinct(collections::RESOURCES, fields::CATEGORY, &filter)
            .await?;

        let mut tags = BTreeSet::new();
        for value in values {
            let tag: Tag = serde_json::from_value(value).map_err(|e| SerializationError::Shape {
                message: format!("invalid tag: {}", e),
            })?;
            tags.insert(tag);
        }
        Ok(tags)
    }

    /// Persists a snapshot, replacing any snapshot with the same id.
    pub async fn store_snapshot(&self, snapshot: &Snapshot) -> StorageResult<()> {
        let mut document = match serde_json::to_value(snapshot)? {
            Value::Object(map) => map,
            _ => {
                return Err(SerializationError::Shape {
                    message: format!("snapshot {} did not serialize to an object", snapshot.id),
                }
                .into());
            }
        };
        document.insert(fields::ID.to_string(), Value::String(snapshot.id.clone()));
        self.documents
            .upsert(collections::SNAPSHOTS, document)
            .await?;
        debug!(snapshot_id = %snapshot.id, keys = snapshot.keys.len(), "Stored snapshot");
        Ok(())
    }

    /// Loads a snapshot.
    pub async fn get_snapshot(&self, id: &str) -> StorageResult<Option<Snapshot>> {
        let Some(mut document) = self
            .documents
            .find_one(collections::SNAPSHOTS, &Filter::id(id))
            .await?
        else {
            return Ok(None);
        };
        document.remove(fields::ID);
        let snapshot = serde_json::from_value(Value::Object(document)).map_err(|source| {
            SerializationError::Decode {
                record_id: format!("snapshot {}", id),
                source,
            }
        })?;
        Ok(Some(snapshot))
    }

    async fn notify_indexer(&self, entries: &[Entry]) {
        let result = match entries {
            [single] => self.indexer.process(single).await,
            many => self.indexer.process_batch(many).await,
        };
        if let Err(e) = result {
            warn!(error = %e, count = entries.len(), "Search indexing failed after commit");
        }
    }
}

/// Reads the blob key of an externalized record.
fn blob_key_of(document: &Document) -> StorageResult<BlobKey> {
    let key = ResourceKey::versioned(
        string_field(document, fields::COLLECTION)?,
        string_field(document, fields::RESOURCE_ID)?,
        string_field(document, fields::VERSION_ID)?,
    );
    Ok(BlobKey::from_resource_key(&key)?)
}

fn string_field<'a>(document: &'a Document, name: &str) -> StorageResult<&'a str> {
    document
        .get(name)
        .and_then(Value::as_str)
        .ok_or_else(|| {
            SerializationError::Shape {
                message: format!(
                    "externalized record {} has no string {}",
                    document.get(fields::ID).unwrap_or(&Value::Null),
                    name
                ),
            }
            .into()
        })
}
