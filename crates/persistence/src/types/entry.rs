//! Entries: the records handed to and returned from the store.

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::key::{self, ResourceKey};

/// Collection whose payloads are raw binaries and may be externalized.
pub const BINARY_COLLECTION: &str = "Binary";

/// A versioned record: either a resource payload or a deletion marker.
///
/// # Examples
///
/// ```
/// use helios_record_store::types::{Entry, Tag};
/// use serde_json::json;
///
/// let entry = Entry::resource(json!({"resourceType": "Patient", "id": "1"}))
///     .with_tag(Tag::new("vip", "http://example.org/tags"));
///
/// assert_eq!(entry.collection(), Some("Patient"));
/// assert!(!entry.is_deleted());
/// assert_eq!(entry.key().unwrap().to_string(), "Patient/1");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    /// Base URL the entry was addressed with, if absolute.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base: Option<String>,

    /// The payload or deletion marker.
    pub content: EntryContent,

    /// Tags carried by this version.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<Tag>,

    /// Timestamp assigned when the version was written.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<DateTime<Utc>>,
}

/// What an entry carries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value")]
pub enum EntryContent {
    /// An opaque resource payload keyed by `resourceType`, `id` and `meta.versionId`.
    Resource(Value),
    /// A tombstone recording that the resource was deleted.
    Deleted(DeletedMarker),
}

/// A deletion marker. Carries its own key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeletedMarker {
    /// Collection of the deleted resource.
    pub collection: String,
    /// Logical id of the deleted resource.
    pub resource_id: String,
    /// Version id of this tombstone.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version_id: Option<String>,
    /// Free-text reason for the deletion.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl DeletedMarker {
    /// Creates an unversioned marker.
    pub fn new(collection: impl Into<String>, resource_id: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            resource_id: resource_id.into(),
            version_id: None,
            reason: None,
        }
    }

    /// Sets the deletion reason.
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

/// A tag: `(term, scheme, label)`.
///
/// Ordered by term, then scheme, then label.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Tag {
    /// The tag value.
    pub term: String,
    /// The scheme (code system) the term belongs to.
    pub scheme: String,
    /// Human readable label.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl Tag {
    /// Creates a tag without a label.
    pub fn new(term: impl Into<String>, scheme: impl Into<String>) -> Self {
        Self {
            term: term.into(),
            scheme: scheme.into(),
            label: None,
        }
    }

    /// Sets the label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }
}

impl Entry {
    /// Creates an entry carrying a resource payload.
    pub fn resource(payload: Value) -> Self {
        Self {
            base: None,
            content: EntryContent::Resource(payload),
            tags: Vec::new(),
            last_updated: None,
        }
    }

    /// Creates an entry carrying a deletion marker.
    pub fn deleted(marker: DeletedMarker) -> Self {
        Self {
            base: None,
            content: EntryContent::Deleted(marker),
            tags: Vec::new(),
            last_updated: None,
        }
    }

    /// Sets the base URL.
    pub fn with_base(mut self, base: impl Into<String>) -> Self {
        self.base = Some(base.into());
        self
    }

    /// Adds a tag.
    pub fn with_tag(mut self, tag: Tag) -> Self {
        self.tags.push(tag);
        self
    }

    /// Returns the entry's key.
    pub fn key(&self) -> Result<ResourceKey, crate::error::KeyError> {
        key::extract_key(self)
    }

    /// Returns the collection, if it can be determined.
    pub fn collection(&self) -> Option<&str> {
        match &self.content {
            EntryContent::Resource(payload) => payload.get("resourceType").and_then(Value::as_str),
            EntryContent::Deleted(marker) => Some(&marker.collection),
        }
    }

    /// Returns `true` for deletion markers.
    pub fn is_deleted(&self) -> bool {
        matches!(self.content, EntryContent::Deleted(_))
    }

    /// Returns `true` for `Binary` resource payloads.
    pub fn is_binary(&self) -> bool {
        !self.is_deleted() && self.collection() == Some(BINARY_COLLECTION)
    }

    /// Returns the resource payload, if any.
    pub fn payload(&self) -> Option<&Value> {
        match &self.content {
            EntryContent::Resource(payload) => Some(payload),
            EntryContent::Deleted(_) => None,
        }
    }

    /// Returns the resource payload mutably, if any.
    pub fn payload_mut(&mut self) -> Option<&mut Value> {
        match &mut self.content {
            EntryContent::Resource(payload) => Some(payload),
            EntryContent::Deleted(_) => None,
        }
    }

    /// Stamps the entry with its write time, mirroring it into `meta.lastUpdated`.
    ///
    /// The time is truncated to microseconds, the precision it is stored at.
    pub fn stamp(&mut self, now: DateTime<Utc>) {
        let now = now.trunc_subsecs(6);
        self.last_updated = Some(now);
        if let Some(object) = self.payload_mut().and_then(Value::as_object_mut) {
            let meta = object
                .entry("meta")
                .or_insert_with(|| Value::Object(Map::new()));
            if let Some(meta) = meta.as_object_mut() {
                meta.insert(
                    "lastUpdated".to_string(),
                    Value::String(now.to_rfc3339_opts(SecondsFormat::Micros, true)),
                );
            }
        }
    }

    /// Returns the kind of this entry.
    pub fn kind(&self) -> EntryKind {
        match self.content {
            EntryContent::Resource(_) => EntryKind::Resource,
            EntryContent::Deleted(_) => EntryKind::Deleted,
        }
    }
}

/// Kind of a stored version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntryKind {
    /// A resource payload.
    Resource,
    /// A deletion marker.
    Deleted,
}

impl EntryKind {
    /// Returns the stored representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryKind::Resource => "Resource",
            EntryKind::Deleted => "Deleted",
        }
    }
}

/// State of a stored version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordState {
    /// The newest version of its resource.
    Current,
    /// Replaced by a newer version.
    Superseded,
}

impl RecordState {
    /// Returns the stored representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordState::Current => "current",
            RecordState::Superseded => "superseded",
        }
    }
}

/// A content-free listing result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntrySummary {
    /// Fully versioned key.
    pub key: ResourceKey,
    /// Resource or deletion marker.
    pub kind: EntryKind,
    /// When the version was written.
    pub timestamp: DateTime<Utc>,
    /// Current or superseded.
    pub state: RecordState,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_stamp_sets_meta_last_updated() {
        let mut entry = Entry::resource(json!({"resourceType": "Patient", "id": "1"}));
        let now = Utc::now();
        entry.stamp(now);

        assert_eq!(entry.last_updated, Some(now));
        let stamped = entry.payload().unwrap()["meta"]["lastUpdated"]
            .as_str()
            .unwrap()
            .to_string();
        let parsed = DateTime::parse_from_rfc3339(&stamped).unwrap();
        assert_eq!(parsed.timestamp_micros(), now.timestamp_micros());
    }

    #[test]
    fn test_stamp_on_deleted_marker() {
        let mut entry = Entry::deleted(DeletedMarker::new("Patient", "1"));
        let now = Utc::now();
        entry.stamp(now);
        assert_eq!(entry.last_updated, Some(now));
        assert_eq!(entry.kind(), EntryKind::Deleted);
    }

    #[test]
    fn test_binary_detection() {
        let binary = Entry::resource(json!({"resourceType": "Binary", "id": "b"}));
        assert!(binary.is_binary());

        let patient = Entry::resource(json!({"resourceType": "Patient", "id": "p"}));
        assert!(!patient.is_binary());

        let deleted = Entry::deleted(DeletedMarker::new("Binary", "b"));
        assert!(!deleted.is_binary());
    }

    #[test]
    fn test_tag_ordering() {
        let mut tags = vec![
            Tag::new("b", "s1"),
            Tag::new("a", "s2"),
            Tag::new("a", "s1").with_label("x"),
            Tag::new("a", "s1"),
        ];
        tags.sort();
        assert_eq!(tags[0], Tag::new("a", "s1"));
        assert_eq!(tags[1], Tag::new("a", "s1").with_label("x"));
        assert_eq!(tags[2], Tag::new("a", "s2"));
        assert_eq!(tags[3], Tag::new("b", "s1"));
    }

    #[test]
    fn test_state_serialization() {
        assert_eq!(
            serde_json::to_value(RecordState::Current).unwrap(),
            json!("current")
        );
        assert_eq!(
            serde_json::to_value(EntryKind::Deleted).unwrap(),
            json!("Deleted")
        );
    }
}
