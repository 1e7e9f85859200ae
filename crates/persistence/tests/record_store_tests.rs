//! Record store integration tests: reads, writes and history.

mod common;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use serde_json::json;

use common::*;
use helios_record_store::backends::sqlite::SqliteBackend;
use helios_record_store::config::StoreConfig;
use helios_record_store::core::SearchIndexer;
use helios_record_store::error::{
    BackendError, IntegrityError, StorageError, StorageResult, TransactionError, ValidationError,
};
use helios_record_store::key::ResourceKey;
use helios_record_store::store::{ListParams, RecordStore};
use helios_record_store::types::{Entry, EntryKind, RecordState, Tag};

// ============================================================================
// Add / Find
// ============================================================================

#[tokio::test]
async fn test_add_and_find_by_id() {
    let store = create_store().await;

    let written = store.add(patient("1", "1", "Smith"), None).await.unwrap();
    assert!(written.last_updated.is_some());
    assert_eq!(
        written.payload().unwrap()["meta"]["lastUpdated"],
        json!(written.last_updated.unwrap().to_rfc3339_opts(chrono::SecondsFormat::Micros, true))
    );

    let found = store.find_by_id("Patient", "1").await.unwrap().unwrap();
    assert_eq!(found, written);
    assert_eq!(family_of(&found), Some("Smith"));
}

#[tokio::test]
async fn test_payload_round_trip_has_no_storage_metadata() {
    let store = create_store().await;
    store.add(patient("1", "1", "Smith"), None).await.unwrap();

    let found = store.find_by_id("Patient", "1").await.unwrap().unwrap();
    let payload = found.payload().unwrap().as_object().unwrap();
    for key in payload.keys() {
        assert!(!key.starts_with('@'), "storage field {key} leaked");
        assert_ne!(key, "_id");
    }
    assert_eq!(payload["id"], "1");
    assert_eq!(payload["meta"]["versionId"], "1");
}

#[tokio::test]
async fn test_find_missing_returns_none() {
    let store = create_store().await;
    assert!(store.find_by_id("Patient", "nope").await.unwrap().is_none());
    assert!(
        store
            .find_by_version("Patient", "nope", "1")
            .await
            .unwrap()
            .is_none()
    );
}

#[tokio::test]
async fn test_tags_are_kept() {
    let store = create_store().await;
    let entry = patient("1", "1", "Smith").with_tag(Tag::new("vip", "http://example.org/tags"));
    store.add(entry, None).await.unwrap();

    let found = store.find_by_id("Patient", "1").await.unwrap().unwrap();
    assert_eq!(found.tags, vec![Tag::new("vip", "http://example.org/tags")]);
}

// ============================================================================
// Versioning
// ============================================================================

#[tokio::test]
async fn test_single_current_after_adds() {
    let store = create_store().await;
    store.add(patient("1", "1", "Smith"), None).await.unwrap();
    store.add(patient("1", "2", "Jones"), None).await.unwrap();
    store.add(patient("2", "1", "Brown"), None).await.unwrap();

    let current = store
        .list_current(&ListParams::new().collection("Patient"))
        .await
        .unwrap();
    assert_eq!(current.len(), 2);
    assert!(current.iter().all(|s| s.state == RecordState::Current));

    let ids: Vec<_> = current
        .iter()
        .map(|s| s.key.without_version().to_string())
        .collect();
    assert!(ids.contains(&"Patient/1".to_string()));
    assert!(ids.contains(&"Patient/2".to_string()));

    let current_one = current
        .iter()
        .find(|s| s.key.resource_id.as_deref() == Some("1"))
        .unwrap();
    assert_eq!(current_one.key.version_id.as_deref(), Some("2"));
}

#[tokio::test]
async fn test_patient_history_scenario() {
    let store = create_store().await;

    store.add(patient("1", "1", "Smith"), None).await.unwrap();
    store.add(patient("1", "2", "Smythe"), None).await.unwrap();

    let current = store.find_by_id("Patient", "1").await.unwrap().unwrap();
    assert_eq!(family_of(&current), Some("Smythe"));

    let v1 = store
        .find_by_version("Patient", "1", "1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(family_of(&v1), Some("Smith"));

    let history = store
        .list_history_for_id(&ResourceKey::new("Patient", "1"), &ListParams::new())
        .await
        .unwrap();
    let versions: Vec<_> = history
        .iter()
        .map(|s| s.key.version_id.clone().unwrap())
        .collect();
    assert_eq!(versions, vec!["2", "1"]);
    assert_eq!(history[0].state, RecordState::Current);
    assert_eq!(history[1].state, RecordState::Superseded);
}

#[tokio::test]
async fn test_deletion_marker_becomes_current() {
    let store = create_store().await;
    store.add(patient("1", "1", "Smith"), None).await.unwrap();
    store.add(deletion("Patient", "1", "2"), None).await.unwrap();

    let current = store.find_by_id("Patient", "1").await.unwrap().unwrap();
    assert!(current.is_deleted());
    assert_eq!(current.kind(), EntryKind::Deleted);

    let listed = store
        .list_current(&ListParams::new().collection("Patient"))
        .await
        .unwrap();
    assert!(listed.is_empty());

    let with_deleted = store
        .list_current(&ListParams::new().collection("Patient").include_deleted())
        .await
        .unwrap();
    assert_eq!(with_deleted.len(), 1);
    assert_eq!(with_deleted[0].kind, EntryKind::Deleted);

    let history = store
        .list_history_for_id(&ResourceKey::new("Patient", "1"), &ListParams::new())
        .await
        .unwrap();
    assert_eq!(history.len(), 2);
}

#[tokio::test]
async fn test_history_includes_deletions() {
    let store = create_store().await;
    store.add(patient("1", "1", "Smith"), None).await.unwrap();
    store.add(deletion("Patient", "1", "2"), None).await.unwrap();

    let history = store
        .list_history_for_id(&ResourceKey::new("Patient", "1"), &ListParams::new())
        .await
        .unwrap();
    let versions: Vec<_> = history
        .iter()
        .map(|s| (s.key.version_id.clone().unwrap(), s.kind))
        .collect();
    assert_eq!(
        versions,
        vec![
            ("2".to_string(), EntryKind::Deleted),
            ("1".to_string(), EntryKind::Resource)
        ]
    );

    let all = store.list_history(&ListParams::new()).await.unwrap();
    assert_eq!(all.len(), 2);
    assert_eq!(all[0].kind, EntryKind::Deleted);
}

#[tokio::test]
async fn test_list_history_since_and_limit() {
    let store = create_store().await;
    store.add(patient("1", "1", "A"), None).await.unwrap();
    tokio::time::sleep(Duration::from_millis(5)).await;
    let since = Utc::now();
    tokio::time::sleep(Duration::from_millis(5)).await;
    store.add(patient("1", "2", "B"), None).await.unwrap();
    store.add(observation("9", "1"), None).await.unwrap();

    let after = store
        .list_history(&ListParams::new().since(since))
        .await
        .unwrap();
    assert_eq!(after.len(), 2);
    assert_eq!(after[0].key.collection, "Observation");

    let limited = store
        .list_history(&ListParams::new().limit(1))
        .await
        .unwrap();
    assert_eq!(limited.len(), 1);

    let patients = store
        .list_history(&ListParams::new().collection("Patient"))
        .await
        .unwrap();
    assert_eq!(patients.len(), 2);
}

#[tokio::test]
async fn test_default_list_limit() {
    let config = StoreConfig {
        default_list_limit: 3,
        ..Default::default()
    };
    let store = create_store_with(config).await;
    for i in 0..5 {
        store
            .add(patient(&i.to_string(), "1", "Smith"), None)
            .await
            .unwrap();
    }

    let listed = store.list_current(&ListParams::new()).await.unwrap();
    assert_eq!(listed.len(), 3);
    // Newest first.
    assert_eq!(listed[0].key.resource_id.as_deref(), Some("4"));
}

#[tokio::test]
async fn test_find_many_by_version_keeps_request_order() {
    let store = create_store().await;
    store.add(patient("1", "1", "A"), None).await.unwrap();
    store.add(patient("1", "2", "B"), None).await.unwrap();
    store.add(observation("7", "1"), None).await.unwrap();

    let keys = vec![
        ResourceKey::versioned("Observation", "7", "1"),
        ResourceKey::versioned("Patient", "1", "1"),
        ResourceKey::versioned("Patient", "1", "2"),
    ];
    let entries = store.find_many_by_version(&keys).await.unwrap();
    let found: Vec<_> = entries.iter().map(|e| e.key().unwrap()).collect();
    assert_eq!(found, keys);

    assert!(store.find_many_by_version(&[]).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_find_many_by_version_missing_key_fails() {
    let store = create_store().await;
    store.add(patient("1", "1", "A"), None).await.unwrap();

    let err = store
        .find_many_by_version(&[
            ResourceKey::versioned("Patient", "1", "1"),
            ResourceKey::versioned("Patient", "1", "9"),
        ])
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        StorageError::Integrity(IntegrityError::MissingVersion { .. })
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_writers_leave_one_current() {
    let dir = tempfile::tempdir().unwrap();
    let backend = SqliteBackend::open(dir.path().join("records.db")).unwrap();
    backend.init_schema().unwrap();
    let store = Arc::new(RecordStore::new(Arc::new(backend), StoreConfig::default()));
    store.init().await.unwrap();
    store.add(patient("1", "0", "Seed"), None).await.unwrap();

    let mut handles = Vec::new();
    for version in 1..=16 {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            store
                .add(patient("1", &version.to_string(), "Writer"), None)
                .await
        }));
    }

    let mut succeeded = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => succeeded += 1,
            Err(StorageError::Transaction(TransactionError::Failed { .. })) => {}
            Err(other) => panic!("unexpected error: {other:?}"),
        }
    }
    assert!(succeeded >= 1);

    let current = store
        .list_current(&ListParams::new().collection("Patient"))
        .await
        .unwrap();
    assert_eq!(current.len(), 1);

    let history = store
        .list_history_for_id(&ResourceKey::new("Patient", "1"), &ListParams::new())
        .await
        .unwrap();
    assert_eq!(history.len(), succeeded + 1);
    let current_count = history
        .iter()
        .filter(|s| s.state == RecordState::Current)
        .count();
    assert_eq!(current_count, 1);
}

// ============================================================================
// Replace
// ============================================================================

#[tokio::test]
async fn test_replace_superseded_version_keeps_state() {
    let store = create_store().await;
    store.add(patient("1", "1", "Smith"), None).await.unwrap();
    store.add(patient("1", "2", "Jones"), None).await.unwrap();

    store
        .replace(patient("1", "1", "Corrected"), None)
        .await
        .unwrap();

    let current = store.find_by_id("Patient", "1").await.unwrap().unwrap();
    assert_eq!(family_of(&current), Some("Jones"));

    let v1 = store
        .find_by_version("Patient", "1", "1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(family_of(&v1), Some("Corrected"));

    let history = store
        .list_history_for_id(&ResourceKey::new("Patient", "1"), &ListParams::new())
        .await
        .unwrap();
    assert_eq!(history.len(), 2);
}

#[tokio::test]
async fn test_replace_current_version_in_place() {
    let store = create_store().await;
    store.add(patient("1", "1", "Smith"), None).await.unwrap();
    store
        .replace(patient("1", "1", "Corrected"), None)
        .await
        .unwrap();

    let current = store.find_by_id("Patient", "1").await.unwrap().unwrap();
    assert_eq!(family_of(&current), Some("Corrected"));
    let history = store
        .list_history_for_id(&ResourceKey::new("Patient", "1"), &ListParams::new())
        .await
        .unwrap();
    assert_eq!(history.len(), 1);
}

#[tokio::test]
async fn test_replace_unknown_version_becomes_current() {
    let store = create_store().await;
    store.add(patient("1", "1", "Smith"), None).await.unwrap();
    store.replace(patient("1", "5", "New"), None).await.unwrap();

    let current = store.find_by_id("Patient", "1").await.unwrap().unwrap();
    assert_eq!(family_of(&current), Some("New"));

    let old = store
        .list_history_for_id(&ResourceKey::new("Patient", "1"), &ListParams::new())
        .await
        .unwrap();
    assert_eq!(old.len(), 2);
    assert_eq!(old[1].state, RecordState::Superseded);
}

// ============================================================================
// Validation
// ============================================================================

#[tokio::test]
async fn test_add_without_version_is_rejected() {
    let store = create_store().await;
    let entry = Entry::resource(json!({"resourceType": "Patient", "id": "1"}));

    let err = store.add(entry, None).await.unwrap_err();
    assert!(matches!(
        err,
        StorageError::Validation(ValidationError::MissingVersionId { .. })
    ));
    assert!(err.is_rejected_before_io());
    assert!(store.find_by_id("Patient", "1").await.unwrap().is_none());
}

#[tokio::test]
async fn test_add_without_id_is_rejected() {
    let store = create_store().await;
    let entry = Entry::resource(json!({"resourceType": "Patient", "meta": {"versionId": "1"}}));

    let err = store.add(entry, None).await.unwrap_err();
    assert!(matches!(
        err,
        StorageError::Validation(ValidationError::MissingResourceId { index: 0 })
    ));
}

#[tokio::test]
async fn test_add_without_resource_type_is_rejected() {
    let store = create_store().await;
    let entry = Entry::resource(json!({"id": "1", "meta": {"versionId": "1"}}));

    let err = store.add(entry, None).await.unwrap_err();
    assert!(matches!(err, StorageError::Key(_)));
}

// ============================================================================
// Search Indexer
// ============================================================================

#[derive(Debug, Default)]
struct RecordingIndexer {
    seen: Mutex<Vec<String>>,
    fail: bool,
}

#[async_trait]
impl SearchIndexer for RecordingIndexer {
    async fn process(&self, entry: &Entry) -> StorageResult<()> {
        if self.fail {
            return Err(BackendError::QueryError {
                message: "index offline".to_string(),
            }
            .into());
        }
        self.seen.lock().push(entry.key()?.to_string());
        Ok(())
    }

    async fn clean(&self) -> StorageResult<()> {
        self.seen.lock().clear();
        Ok(())
    }
}

#[tokio::test]
async fn test_indexer_sees_committed_entries() {
    let indexer = Arc::new(RecordingIndexer::default());
    let store = RecordStore::new(create_backend(), StoreConfig::default())
        .with_indexer(indexer.clone());
    store.init().await.unwrap();

    store
        .add_batch(vec![patient("1", "1", "A"), observation("2", "1")], None)
        .await
        .unwrap();
    assert_eq!(
        *indexer.seen.lock(),
        vec!["Patient/1/_history/1", "Observation/2/_history/1"]
    );

    store.clean().await.unwrap();
    assert!(indexer.seen.lock().is_empty());
}

#[tokio::test]
async fn test_indexer_failure_does_not_fail_write() {
    let indexer = Arc::new(RecordingIndexer {
        fail: true,
        ..Default::default()
    });
    let store = RecordStore::new(create_backend(), StoreConfig::default())
        .with_indexer(indexer);
    store.init().await.unwrap();

    store.add(patient("1", "1", "A"), None).await.unwrap();
    assert!(store.find_by_id("Patient", "1").await.unwrap().is_some());
}
