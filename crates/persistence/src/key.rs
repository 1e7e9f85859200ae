//! Resource addressing.
//!
//! A [`ResourceKey`] names a collection, a logical resource within it, or one
//! exact version of that resource, optionally qualified by the base URL of the
//! server that owns it. Everything here is pure; nothing touches storage.
//!
//! # Examples
//!
//! ```
//! use helios_record_store::config::LocalEndpoint;
//! use helios_record_store::key::ResourceKey;
//!
//! let key = ResourceKey::parse("http://example.org/fhir/Patient/1/_history/2").unwrap();
//! assert_eq!(key.collection, "Patient");
//! assert_eq!(key.resource_id.as_deref(), Some("1"));
//! assert_eq!(key.version_id.as_deref(), Some("2"));
//! assert_eq!(key.to_string(), "Patient/1/_history/2");
//!
//! let local = LocalEndpoint::new(Some("http://example.org/fhir"));
//! assert!(key.is_internal(&local));
//! ```

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::config::LocalEndpoint;
use crate::error::KeyError;
use crate::types::{Entry, EntryContent};

/// Path segment separating a resource id from its version id.
pub const HISTORY_SEGMENT: &str = "_history";

static TEMPORARY_ID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(urn:uuid:|urn:oid:|cid:)").expect("temporary id pattern is valid")
});

static COLLECTION_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9_]*$").expect("collection pattern is valid"));

/// The identity of a resource, or of one version of it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ResourceKey {
    /// Base URL of the owning server, when the key is absolute.
    pub base: Option<String>,
    /// Collection (resource type), e.g. `Patient`.
    pub collection: String,
    /// Logical id, stable across versions.
    pub resource_id: Option<String>,
    /// Version id, unique once assigned.
    pub version_id: Option<String>,
}

impl ResourceKey {
    /// Creates a key for a collection.
    pub fn collection(collection: impl Into<String>) -> Self {
        Self {
            base: None,
            collection: collection.into(),
            resource_id: None,
            version_id: None,
        }
    }

    /// Creates a key for a logical resource.
    pub fn new(collection: impl Into<String>, resource_id: impl Into<String>) -> Self {
        Self {
            base: None,
            collection: collection.into(),
            resource_id: Some(resource_id.into()),
            version_id: None,
        }
    }

    /// Creates a key for one version of a resource.
    pub fn versioned(
        collection: impl Into<String>,
        resource_id: impl Into<String>,
        version_id: impl Into<String>,
    ) -> Self {
        Self {
            base: None,
            collection: collection.into(),
            resource_id: Some(resource_id.into()),
            version_id: Some(version_id.into()),
        }
    }

    /// Sets the base URL.
    pub fn with_base(mut self, base: impl Into<String>) -> Self {
        self.base = Some(base.into().trim_end_matches('/').to_string());
        self
    }

    /// Parses a relative (`Patient/1/_history/2`) or absolute
    /// (`http://host/fhir/Patient/1/_history/2`) key.
    pub fn parse(input: &str) -> Result<Self, KeyError> {
        let malformed = |reason: &str| KeyError::Malformed {
            input: input.to_string(),
            reason: reason.to_string(),
        };

        let trimmed = input.trim().trim_end_matches('/');
        if trimmed.is_empty() {
            return Err(malformed("empty key"));
        }

        let absolute = trimmed.contains("://");
        let segments: Vec<&str> = trimmed.split('/').collect();

        let (prefix_len, collection, resource_id, version_id) =
            if let Some(h) = segments.iter().position(|s| *s == HISTORY_SEGMENT) {
                if h + 2 != segments.len() {
                    return Err(malformed("expected exactly one segment after _history"));
                }
                let version = segments[h + 1];
                if h == 0 || segments[h - 1].is_empty() {
                    let collection = if h >= 2 { segments[h - 2] } else { "" };
                    return Err(KeyError::MissingResourceId {
                        collection: collection.to_string(),
                    });
                }
                if h < 2 {
                    return Err(malformed("missing collection"));
                }
                (h - 2, segments[h - 2], Some(segments[h - 1]), Some(version))
            } else if absolute {
                let n = segments.len();
                if n >= 2 && is_collection_name(segments[n - 2]) {
                    (n - 2, segments[n - 2], Some(segments[n - 1]), None)
                } else if is_collection_name(segments[n - 1]) {
                    (n - 1, segments[n - 1], None, None)
                } else {
                    return Err(malformed("no collection segment found"));
                }
            } else {
                match segments.as_slice() {
                    [collection] => (0, *collection, None, None),
                    [collection, id] => (0, *collection, Some(*id), None),
                    _ => return Err(malformed("too many path segments")),
                }
            };

        if !is_collection_name(collection) {
            return Err(malformed("invalid collection name"));
        }
        if resource_id.is_some_and(str::is_empty) {
            return Err(malformed("empty resource id"));
        }
        if version_id.is_some_and(str::is_empty) {
            return Err(malformed("empty version id"));
        }

        let base = if prefix_len > 0 {
            let base = segments[..prefix_len].join("/");
            if !base.contains("://") {
                return Err(malformed("relative key cannot have a path prefix"));
            }
            Some(base)
        } else {
            None
        };

        Ok(Self {
            base,
            collection: collection.to_string(),
            resource_id: resource_id.map(str::to_string),
            version_id: version_id.map(str::to_string),
        })
    }

    /// Returns the same key without a version.
    pub fn without_version(&self) -> Self {
        Self {
            version_id: None,
            ..self.clone()
        }
    }

    /// Returns the same key pinned to `version_id`.
    ///
    /// Fails if the key has no resource id.
    pub fn with_version(&self, version_id: impl Into<String>) -> Result<Self, KeyError> {
        if self.resource_id.is_none() {
            return Err(KeyError::MissingResourceId {
                collection: self.collection.clone(),
            });
        }
        Ok(Self {
            version_id: Some(version_id.into()),
            ..self.clone()
        })
    }

    /// Returns `true` if the key names one exact version.
    pub fn has_version(&self) -> bool {
        self.resource_id.is_some() && self.version_id.is_some()
    }

    /// Returns the record id (`collection/id/_history/version`) of a versioned key.
    pub fn record_id(&self) -> Result<String, KeyError> {
        match (&self.resource_id, &self.version_id) {
            (Some(_), Some(_)) => Ok(self.without_base().to_string()),
            (None, _) => Err(KeyError::MissingResourceId {
                collection: self.collection.clone(),
            }),
            (Some(_), None) => Err(KeyError::MissingVersionId {
                key: self.to_string(),
            }),
        }
    }

    /// Returns the key with the base stripped.
    pub fn without_base(&self) -> Self {
        Self {
            base: None,
            ..self.clone()
        }
    }

    /// Renders the key as an absolute URI, using the key's own base or,
    /// failing that, the local endpoint.
    pub fn to_uri(&self, endpoint: &LocalEndpoint) -> String {
        match self.base.as_deref().or(endpoint.base()) {
            Some(base) => format!("{}/{}", base, self),
            None => self.to_string(),
        }
    }

    /// Returns `true` if the key is owned by another server.
    pub fn is_foreign(&self, endpoint: &LocalEndpoint) -> bool {
        match &self.base {
            Some(base) => !endpoint.matches(base),
            None => false,
        }
    }

    /// Returns `true` if the resource id is a temporary identifier
    /// (`urn:uuid:`, `urn:oid:` or `cid:`).
    pub fn is_temporary(&self) -> bool {
        self.resource_id
            .as_deref()
            .is_some_and(|id| TEMPORARY_ID.is_match(id))
    }

    /// Returns `true` if the key is neither temporary nor foreign.
    pub fn is_internal(&self, endpoint: &LocalEndpoint) -> bool {
        !(self.is_temporary() || self.is_foreign(endpoint))
    }

    fn to_reference(&self) -> String {
        match &self.base {
            Some(base) => format!("{}/{}", base, self),
            None => self.to_string(),
        }
    }
}

fn is_collection_name(segment: &str) -> bool {
    COLLECTION_NAME.is_match(segment)
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.collection)?;
        if let Some(id) = &self.resource_id {
            write!(f, "/{}", id)?;
            if let Some(version) = &self.version_id {
                write!(f, "/{}/{}", HISTORY_SEGMENT, version)?;
            }
        }
        Ok(())
    }
}

impl std::str::FromStr for ResourceKey {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ResourceKey {
    type Error = KeyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ResourceKey> for String {
    fn from(key: ResourceKey) -> Self {
        key.to_reference()
    }
}

/// Reads the key an entry carries.
///
/// Resources carry it in `resourceType`, `id` and `meta.versionId`; deletion
/// markers carry it explicitly. A version without a resource id is rejected.
pub fn extract_key(entry: &Entry) -> Result<ResourceKey, KeyError> {
    let (collection, resource_id, version_id) = match &entry.content {
        EntryContent::Resource(payload) => {
            let collection = payload
                .get("resourceType")
                .and_then(Value::as_str)
                .ok_or(KeyError::MissingCollection)?;
            let id = payload.get("id").and_then(Value::as_str);
            let version = payload
                .get("meta")
                .and_then(|m| m.get("versionId"))
                .and_then(Value::as_str);
            (
                collection.to_string(),
                id.map(str::to_string),
                version.map(str::to_string),
            )
        }
        EntryContent::Deleted(marker) => (
            marker.collection.clone(),
            Some(marker.resource_id.clone()),
            marker.version_id.clone(),
        ),
    };

    if version_id.is_some() && resource_id.as_deref().is_none_or(str::is_empty) {
        return Err(KeyError::MissingResourceId { collection });
    }

    Ok(ResourceKey {
        base: entry.base.clone(),
        collection,
        resource_id,
        version_id,
    })
}

/// Writes a key's resource id and version id back onto an entry.
///
/// Fails when the entry is a resource whose payload is not a JSON object.
pub fn apply(key: &ResourceKey, entry: &mut Entry) -> Result<(), KeyError> {
    match &mut entry.content {
        EntryContent::Resource(payload) => {
            let Some(object) = payload.as_object_mut() else {
                return Err(KeyError::Malformed {
                    input: key.to_string(),
                    reason: "resource payload is not a JSON object".to_string(),
                });
            };
            if let Some(id) = &key.resource_id {
                object.insert("id".to_string(), Value::String(id.clone()));
            }
            if let Some(version) = &key.version_id {
                let meta = object
                    .entry("meta")
                    .or_insert_with(|| Value::Object(Map::new()));
                if !meta.is_object() {
                    *meta = Value::Object(Map::new());
                }
                if let Some(meta) = meta.as_object_mut() {
                    meta.insert("versionId".to_string(), Value::String(version.clone()));
                }
            }
        }
        EntryContent::Deleted(marker) => {
            if let Some(id) = &key.resource_id {
                marker.resource_id = id.clone();
            }
            if key.version_id.is_some() {
                marker.version_id = key.version_id.clone();
            }
        }
    }
    Ok(())
}
