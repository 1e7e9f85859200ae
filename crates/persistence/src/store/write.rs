//! Write paths: add, batch add and replace.

use std::collections::{HashMap, HashSet};
use std::slice;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::Utc;
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use crate::core::{BatchTransaction, BlobKey, Document};
use crate::error::{BackendError, KeyError, StorageError, StorageResult, ValidationError};
use crate::key::ResourceKey;
use crate::types::record::RecordDocument;
use crate::types::{Entry, RecordState};

use super::RecordStore;

/// An entry that passed validation.
struct Prepared {
    entry: Entry,
    key: ResourceKey,
    content: Option<Vec<u8>>,
}

impl RecordStore {
    /// Writes one entry as the new current version of its resource.
    ///
    /// The entry must carry its resource id and version id. A fresh batch id
    /// is generated when `batch_id` is `None`.
    pub async fn add(&self, entry: Entry, batch_id: Option<Uuid>) -> StorageResult<Entry> {
        let mut written = self.add_batch(vec![entry], batch_id).await?;
        written.pop().ok_or_else(|| {
            StorageError::Backend(BackendError::Internal {
                backend_name: self.documents.backend_name().to_string(),
                message: "single-entry batch returned no entry".to_string(),
                source: None,
            })
        })
    }

    /// Writes entries as one batch.
    ///
    /// Either every entry is stored or, after rollback, none is. Within the
    /// batch only the last version of each resource becomes current.
    /// Returns the stamped entries.
    pub async fn add_batch(
        &self,
        entries: Vec<Entry>,
        batch_id: Option<Uuid>,
    ) -> StorageResult<Vec<Entry>> {
        if entries.is_empty() {
            return Ok(Vec::new());
        }
        let batch_id = batch_id.unwrap_or_else(Uuid::new_v4);

        let mut prepared = entries
            .into_iter()
            .enumerate()
            .map(|(index, entry)| self.prepare(index, entry))
            .collect::<StorageResult<Vec<_>>>()?;

        let now = Utc::now();
        for item in &mut prepared {
            item.entry.stamp(now);
        }

        self.externalize(&prepared).await?;

        let mut last_index: HashMap<(&str, &str), usize> = HashMap::new();
        for (index, item) in prepared.iter().enumerate() {
            if let Some(id) = item.key.resource_id.as_deref() {
                last_index.insert((item.key.collection.as_str(), id), index);
            }
        }

        let mut documents = Vec::with_capacity(prepared.len());
        let mut logical = Vec::new();
        let mut seen = HashSet::new();
        for (index, item) in prepared.iter().enumerate() {
            let id = item.key.resource_id.as_deref().unwrap_or_default();
            let state = if last_index.get(&(item.key.collection.as_str(), id)) == Some(&index) {
                RecordState::Current
            } else {
                RecordState::Superseded
            };
            documents.push(self.to_document(item, state, batch_id)?);

            let unversioned = item.key.without_version().without_base();
            if seen.insert(unversioned.clone()) {
                logical.push(unversioned);
            }
        }

        let mut tx = BatchTransaction::begin(self.documents.clone(), batch_id);
        if let Err(cause) = apply_batch(&mut tx, &logical, documents).await {
            return Err(tx.fail(cause).await);
        }
        tx.commit()?;

        let written: Vec<Entry> = prepared.into_iter().map(|p| p.entry).collect();
        debug!(batch_id = %batch_id, count = written.len(), "Added batch");
        self.notify_indexer(&written).await;
        Ok(written)
    }

    /// Overwrites the stored version with the same record id in place.
    ///
    /// The replaced version keeps its current/superseded state and no other
    /// version is touched. If the version does not exist yet it is written
    /// as the new current version.
    pub async fn replace(&self, entry: Entry, batch_id: Option<Uuid>) -> StorageResult<Entry> {
        let batch_id = batch_id.unwrap_or_else(Uuid::new_v4);
        let mut prepared = self.prepare(0, entry)?;
        prepared.entry.stamp(Utc::now());

        self.externalize(slice::from_ref(&prepared)).await?;

        let mut tx = BatchTransaction::begin(self.documents.clone(), batch_id);
        if let Err(cause) = self.apply_replace(&mut tx, &prepared, batch_id).await {
            return Err(tx.fail(cause).await);
        }
        tx.commit()?;

        debug!(batch_id = %batch_id, key = %prepared.key, "Replaced record");
        self.notify_indexer(slice::from_ref(&prepared.entry)).await;
        Ok(prepared.entry)
    }

    async fn apply_replace(
        &self,
        tx: &mut BatchTransaction,
        item: &Prepared,
        batch_id: Uuid,
    ) -> StorageResult<()> {
        let record_id = item.key.record_id()?;
        let state = match tx.displace(&record_id).await? {
            Some(previous) => RecordDocument::from_document(previous)?.state,
            None => {
                tx.supersede(slice::from_ref(&item.key)).await?;
                RecordState::Current
            }
        };
        let document = self.to_document(item, state, batch_id)?;
        tx.insert_batch(vec![document]).await
    }

    /// Checks one entry before anything is written.
    fn prepare(&self, index: usize, entry: Entry) -> StorageResult<Prepared> {
        let key = match entry.key() {
            Err(KeyError::MissingResourceId { .. }) => {
                return Err(ValidationError::MissingResourceId { index }.into());
            }
            other => other?,
        };
        if key.resource_id.is_none() {
            return Err(ValidationError::MissingResourceId { index }.into());
        }
        if key.version_id.is_none() {
            return Err(ValidationError::MissingVersionId {
                index,
                key: key.to_string(),
            }
            .into());
        }

        let content = match entry.payload() {
            Some(payload) if !payload.is_object() => {
                return Err(ValidationError::PayloadNotObject {
                    key: key.to_string(),
                }
                .into());
            }
            Some(payload) if entry.is_binary() => {
                binary_content(&key, payload, self.config.max_binary_size)?
            }
            _ => None,
        };

        Ok(Prepared {
            entry,
            key,
            content,
        })
    }

    /// Writes binary content to the blob store, when one is attached.
    async fn externalize(&self, items: &[Prepared]) -> StorageResult<()> {
        let Some(blobs) = &self.blobs else {
            return Ok(());
        };
        if items.iter().all(|item| item.content.is_none()) {
            return Ok(());
        }

        let session = blobs.session().await?;
        for item in items {
            if let Some(bytes) = &item.content {
                let key = BlobKey::from_resource_key(&item.key)?;
                session.store(&key, bytes.clone()).await?;
                debug!(blob = %key, size = bytes.len(), "Externalized binary");
            }
        }
        Ok(())
    }

    fn to_document(
        &self,
        item: &Prepared,
        state: RecordState,
        batch_id: Uuid,
    ) -> StorageResult<Document> {
        let externalized = self.blobs.is_some() && item.content.is_some();
        let mut entry = item.entry.clone();
        if externalized {
            if let Some(object) = entry.payload_mut().and_then(Value::as_object_mut) {
                object.remove("data");
            }
        }

        let mut record = RecordDocument::from_entry(entry, &item.key, state, batch_id)?;
        record.externalized = externalized;
        record.to_document()
    }
}

async fn apply_batch(
    tx: &mut BatchTransaction,
    logical: &[ResourceKey],
    documents: Vec<Document>,
) -> StorageResult<()> {
    tx.supersede(logical).await?;
    tx.insert_batch(documents).await
}

/// Decodes and checks a Binary payload's content.
fn binary_content(
    key: &ResourceKey,
    payload: &Value,
    max_size: usize,
) -> StorageResult<Option<Vec<u8>>> {
    let data = match payload.get("data") {
        None | Some(Value::Null) => return Ok(None),
        Some(Value::String(data)) => data,
        Some(_) => {
            return Err(ValidationError::InvalidBinary {
                key: key.to_string(),
                message: "data must be a base64 string".to_string(),
            }
            .into());
        }
    };

    let has_content_type = payload
        .get("contentType")
        .and_then(Value::as_str)
        .is_some_and(|ct| !ct.is_empty());
    if !has_content_type {
        return Err(ValidationError::MissingContentType {
            key: key.to_string(),
        }
        .into());
    }

    let bytes = STANDARD
        .decode(data)
        .map_err(|e| ValidationError::InvalidBinary {
            key: key.to_string(),
            message: e.to_string(),
        })?;

    if bytes.len() > max_size {
        return Err(StorageError::SizeLimitExceeded {
            max: max_size,
            actual: bytes.len(),
        });
    }
    Ok(Some(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn binary_key() -> ResourceKey {
        ResourceKey::versioned("Binary", "b1", "1")
    }

    #[test]
    fn test_binary_content_decodes() {
        let payload = json!({
            "resourceType": "Binary",
            "contentType": "text/plain",
            "data": STANDARD.encode(b"hello")
        });
        let bytes = binary_content(&binary_key(), &payload, 1024).unwrap();
        assert_eq!(bytes.as_deref(), Some(&b"hello"[..]));
    }

    #[test]
    fn test_binary_without_data_has_no_content() {
        let payload = json!({"resourceType": "Binary", "contentType": "text/plain"});
        assert!(
            binary_content(&binary_key(), &payload, 1024)
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn test_binary_size_limit_is_on_decoded_bytes() {
        let payload = json!({
            "resourceType": "Binary",
            "contentType": "application/octet-stream",
            "data": STANDARD.encode([0u8; 11])
        });
        let err = binary_content(&binary_key(), &payload, 10).unwrap_err();
        assert!(matches!(
            err,
            StorageError::SizeLimitExceeded {
                max: 10,
                actual: 11
            }
        ));

        assert!(binary_content(&binary_key(), &payload, 11).is_ok());
    }

    #[test]
    fn test_binary_requires_content_type() {
        let payload = json!({"resourceType": "Binary", "data": "aGk="});
        let err = binary_content(&binary_key(), &payload, 1024).unwrap_err();
        assert!(matches!(
            err,
            StorageError::Validation(ValidationError::MissingContentType { .. })
        ));
    }

    #[test]
    fn test_binary_rejects_bad_base64() {
        let payload = json!({
            "resourceType": "Binary",
            "contentType": "text/plain",
            "data": "not base64!!"
        });
        let err = binary_content(&binary_key(), &payload, 1024).unwrap_err();
        assert!(matches!(
            err,
            StorageError::Validation(ValidationError::InvalidBinary { .. })
        ));
    }
}
