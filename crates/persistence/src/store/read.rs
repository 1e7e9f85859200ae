//! Read paths: lookups, history and listings.

use std::collections::HashMap;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::core::{BlobKey, BlobSession, Filter, FindQuery};
use crate::error::{BlobError, IntegrityError, StorageResult};
use crate::key::ResourceKey;
use crate::types::record::RecordDocument;
use crate::types::{
    Entry, EntryKind, EntrySummary, RecordState, collections, fields, format_version_date,
};

use super::RecordStore;

/// Filters for listing and history scans.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListParams {
    /// Restrict to one collection.
    pub collection: Option<String>,
    /// Only versions written strictly after this instant.
    pub since: Option<DateTime<Utc>>,
    /// Include resources whose current version is a deletion marker.
    ///
    /// Only current listings honor this; history always shows deletions.
    pub include_deleted: bool,
    /// Maximum number of results; the store default applies when `None`.
    pub limit: Option<usize>,
}

impl ListParams {
    /// Creates empty parameters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Restricts to one collection.
    pub fn collection(mut self, collection: impl Into<String>) -> Self {
        self.collection = Some(collection.into());
        self
    }

    /// Only versions written after `since`.
    pub fn since(mut self, since: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self
    }

    /// Includes deleted resources in current listings.
    pub fn include_deleted(mut self) -> Self {
        self.include_deleted = true;
        self
    }

    /// Limits the number of results.
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

impl RecordStore {
    /// Returns the current version of a resource, which may be a deletion marker.
    pub async fn find_by_id(&self, collection: &str, id: &str) -> StorageResult<Option<Entry>> {
        let filter = Filter::eq(fields::COLLECTION, collection)
            .and(Filter::eq(fields::RESOURCE_ID, id))
            .and(Filter::eq(fields::STATE, RecordState::Current.as_str()));
        self.find_single(&filter).await
    }

    /// Returns one exact version in any state.
    pub async fn find_by_version(
        &self,
        collection: &str,
        id: &str,
        version: &str,
    ) -> StorageResult<Option<Entry>> {
        let record_id = ResourceKey::versioned(collection, id, version).record_id()?;
        self.find_single(&Filter::id(record_id)).await
    }

    /// Returns the given versions in the order requested.
    ///
    /// Every key must be fully versioned and must exist.
    pub async fn find_many_by_version(&self, keys: &[ResourceKey]) -> StorageResult<Vec<Entry>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let record_ids = keys
            .iter()
            .map(ResourceKey::record_id)
            .collect::<Result<Vec<_>, _>>()?;

        let query = FindQuery::new(Filter::is_in(fields::ID, record_ids.iter().cloned()));
        let mut by_id: HashMap<String, RecordDocument> = HashMap::new();
        for doc in self.documents.find(collections::RESOURCES, &query).await? {
            let record = RecordDocument::from_document(doc)?;
            by_id.insert(record.record_id.clone(), record);
        }

        let session = self.blob_session_for(by_id.values()).await?;
        let mut entries = Vec::with_capacity(record_ids.len());
        for record_id in &record_ids {
            let record = by_id
                .get(record_id)
                .cloned()
                .ok_or_else(|| IntegrityError::MissingVersion {
                    key: record_id.clone(),
                })?;
            entries.push(rehydrate(record, session.as_ref()).await?);
        }
        Ok(entries)
    }

    /// Lists the current version of every resource, newest first.
    pub async fn list_current(&self, params: &ListParams) -> StorageResult<Vec<EntrySummary>> {
        let filter = Filter::eq(fields::STATE, RecordState::Current.as_str());
        self.list(filter, params).await
    }

    /// Lists every version of every resource, newest first.
    ///
    /// Deletion markers are always included.
    pub async fn list_history(&self, params: &ListParams) -> StorageResult<Vec<EntrySummary>> {
        let params = ListParams {
            include_deleted: true,
            ..params.clone()
        };
        self.list(Filter::All, &params).await
    }

    /// Lists every version of one resource, newest first.
    ///
    /// The key's collection overrides any collection in `params`. Deletion
    /// markers are always included.
    pub async fn list_history_for_id(
        &self,
        key: &ResourceKey,
        params: &ListParams,
    ) -> StorageResult<Vec<EntrySummary>> {
        let id = key.resource_id.clone().ok_or_else(|| {
            crate::error::KeyError::MissingResourceId {
                collection: key.collection.clone(),
            }
        })?;
        let params = ListParams {
            collection: Some(key.collection.clone()),
            include_deleted: true,
            ..params.clone()
        };
        self.list(Filter::eq(fields::RESOURCE_ID, id), &params).await
    }

    async fn list(&self, base: Filter, params: &ListParams) -> StorageResult<Vec<EntrySummary>> {
        let mut filter = base;
        if let Some(collection) = &params.collection {
            filter = filter.and(Filter::eq(fields::COLLECTION, collection.as_str()));
        }
        if let Some(since) = params.since {
            filter = filter.and(Filter::gt(fields::VERSION_DATE, format_version_date(since)));
        }
        if !params.include_deleted {
            filter = filter.and(Filter::ne(fields::ENTRY_KIND, EntryKind::Deleted.as_str()));
        }

        let query = FindQuery::new(filter)
            .sort_desc(fields::VERSION_DATE)
            .exclude(&[fields::PAYLOAD, fields::DELETED, fields::CATEGORY])
            .limit(params.limit.unwrap_or(self.config.default_list_limit));

        self.documents
            .find(collections::RESOURCES, &query)
            .await?
            .into_iter()
            .map(|doc| RecordDocument::from_document(doc)?.summary())
            .collect()
    }

    async fn find_single(&self, filter: &Filter) -> StorageResult<Option<Entry>> {
        let Some(doc) = self
            .documents
            .find_one(collections::RESOURCES, filter)
            .await?
        else {
            return Ok(None);
        };
        let record = RecordDocument::from_document(doc)?;
        let session = self.blob_session_for(std::iter::once(&record)).await?;
        Ok(Some(rehydrate(record, session.as_ref()).await?))
    }

    /// Opens a blob session if any of the records needs one.
    async fn blob_session_for<'a>(
        &self,
        mut records: impl Iterator<Item = &'a RecordDocument>,
    ) -> StorageResult<Option<BlobSession<'_>>> {
        if !records.any(|r| r.externalized) {
            return Ok(None);
        }
        match &self.blobs {
            Some(blobs) => Ok(Some(blobs.session().await?)),
            None => Err(BlobError::Unavailable {
                backend_name: "none".to_string(),
                message: "stored records reference externalized binaries but no blob backend is attached"
                    .to_string(),
            }
            .into()),
        }
    }
}

/// Turns a record back into an entry, restoring externalized binary content.
async fn rehydrate(
    record: RecordDocument,
    session: Option<&BlobSession<'_>>,
) -> StorageResult<Entry> {
    let blob_key = if record.externalized {
        Some(BlobKey::from_resource_key(&record.key())?)
    } else {
        None
    };
    let mut entry = record.into_entry()?;

    if let (Some(key), Some(session)) = (blob_key, session) {
        let bytes = session.fetch(&key).await?;
        if let Some(object) = entry.payload_mut().and_then(Value::as_object_mut) {
            object.insert("data".to_string(), Value::String(STANDARD.encode(bytes)));
        }
    }
    Ok(entry)
}
