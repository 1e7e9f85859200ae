//! The persisted shape of a versioned record.
//!
//! Storage metadata lives in `@`-prefixed fields next to the payload and is
//! stripped again when a document is turned back into an [`Entry`].

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::core::document::Document;
use crate::error::{KeyError, SerializationError, StorageError, StorageResult};
use crate::key::ResourceKey;

use super::entry::{DeletedMarker, Entry, EntryContent, EntryKind, EntrySummary, RecordState, Tag};

/// Collection names used in the document store.
pub mod collections {
    /// Versioned records.
    pub const RESOURCES: &str = "resources";
    /// Sequence counters.
    pub const COUNTERS: &str = "counters";
    /// Persisted snapshots.
    pub const SNAPSHOTS: &str = "snapshots";
}

/// Field names of a stored record.
pub mod fields {
    /// Document id; the record id `collection/id/_history/version`.
    pub const ID: &str = "_id";
    /// Logical resource id.
    pub const RESOURCE_ID: &str = "resourceId";
    /// Version id.
    pub const VERSION_ID: &str = "@versionId";
    /// Collection (resource type).
    pub const COLLECTION: &str = "@collection";
    /// Write timestamp, RFC 3339 UTC with microseconds.
    pub const VERSION_DATE: &str = "@versionDate";
    /// `current` or `superseded`.
    pub const STATE: &str = "@state";
    /// `Resource` or `Deleted`.
    pub const ENTRY_KIND: &str = "@entryKind";
    /// Batch the record was written in.
    pub const BATCH_ID: &str = "@batchId";
    /// Resource payload.
    pub const PAYLOAD: &str = "payload";
    /// Deletion marker.
    pub const DELETED: &str = "deleted";
    /// Tags.
    pub const CATEGORY: &str = "category";
    /// Set on `Binary` records whose content lives in the blob store.
    pub const EXTERNALIZED: &str = "@externalized";
}

/// Formats a timestamp so that lexical order equals chronological order.
pub fn format_version_date(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// A versioned record as stored in the `resources` collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct RecordDocument {
    #[serde(rename = "_id")]
    pub record_id: String,
    #[serde(rename = "resourceId")]
    pub resource_id: String,
    #[serde(rename = "@versionId")]
    pub version_id: String,
    #[serde(rename = "@collection")]
    pub collection: String,
    #[serde(rename = "@versionDate")]
    pub version_date: String,
    #[serde(rename = "@state")]
    pub state: RecordState,
    #[serde(rename = "@entryKind")]
    pub kind: EntryKind,
    #[serde(rename = "@batchId")]
    pub batch_id: Uuid,
    #[serde(rename = "@externalized", default, skip_serializing_if = "is_false")]
    pub externalized: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted: Option<DeletedMarker>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub category: Vec<Tag>,
}

impl RecordDocument {
    /// Builds the stored shape of a stamped, fully keyed entry.
    pub fn from_entry(
        entry: Entry,
        key: &ResourceKey,
        state: RecordState,
        batch_id: Uuid,
    ) -> StorageResult<Self> {
        let record_id = key.record_id()?;
        let (Some(resource_id), Some(version_id)) = (key.resource_id.clone(), key.version_id.clone())
        else {
            return Err(KeyError::MissingVersionId {
                key: key.to_string(),
            }
            .into());
        };
        let kind = entry.kind();
        let (payload, deleted) = match entry.content {
            EntryContent::Resource(payload) => (Some(payload), None),
            EntryContent::Deleted(marker) => (None, Some(marker)),
        };

        Ok(Self {
            record_id,
            resource_id,
            version_id,
            collection: key.collection.clone(),
            version_date: format_version_date(entry.last_updated.unwrap_or_else(Utc::now)),
            state,
            kind,
            batch_id,
            externalized: false,
            base: entry.base,
            payload,
            deleted,
            category: entry.tags,
        })
    }

    /// Serializes into a document.
    pub fn to_document(&self) -> StorageResult<Document> {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(_) => Err(SerializationError::Shape {
                message: format!("record {} did not serialize to an object", self.record_id),
            }
            .into()),
            Err(source) => Err(SerializationError::Encode {
                record_id: self.record_id.clone(),
                source,
            }
            .into()),
        }
    }

    /// Reconstitutes a record from a document.
    pub fn from_document(document: Document) -> StorageResult<Self> {
        let record_id = document
            .get(fields::ID)
            .and_then(Value::as_str)
            .unwrap_or("<unknown>")
            .to_string();
        serde_json::from_value(Value::Object(document))
            .map_err(|source| SerializationError::Decode { record_id, source }.into())
    }

    /// Returns the record's fully versioned key.
    pub fn key(&self) -> ResourceKey {
        let key = ResourceKey::versioned(&self.collection, &self.resource_id, &self.version_id);
        match &self.base {
            Some(base) => key.with_base(base.clone()),
            None => key,
        }
    }

    /// Parses the stored timestamp.
    pub fn timestamp(&self) -> StorageResult<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(&self.version_date)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| {
                StorageError::Serialization(SerializationError::Shape {
                    message: format!(
                        "record {} has invalid {}: {}",
                        self.record_id,
                        fields::VERSION_DATE,
                        e
                    ),
                })
            })
    }

    /// Returns the content-free summary of this record.
    pub fn summary(&self) -> StorageResult<EntrySummary> {
        Ok(EntrySummary {
            key: self.key(),
            kind: self.kind,
            timestamp: self.timestamp()?,
            state: self.state,
        })
    }

    /// Converts back into an entry, dropping all storage metadata.
    pub fn into_entry(self) -> StorageResult<Entry> {
        let last_updated = Some(self.timestamp()?);
        let content = match (self.kind, self.payload, self.deleted) {
            (EntryKind::Resource, Some(payload), _) => EntryContent::Resource(payload),
            (EntryKind::Deleted, _, Some(marker)) => EntryContent::Deleted(marker),
            (kind, _, _) => {
                return Err(SerializationError::Shape {
                    message: format!(
                        "record {} of kind {} has no content",
                        self.record_id,
                        kind.as_str()
                    ),
                }
                .into());
            }
        };

        Ok(Entry {
            base: self.base,
            content,
            tags: self.category,
            last_updated,
        })
    }
}
