//! Batch write, rollback and purge tests.

mod common;

use std::sync::Arc;

use serde_json::json;
use uuid::Uuid;

use common::*;
use helios_record_store::config::StoreConfig;
use helios_record_store::error::{StorageError, TransactionError, ValidationError};
use helios_record_store::key::ResourceKey;
use helios_record_store::store::{ListParams, RecordStore};
use helios_record_store::types::{Entry, RecordState};

async fn create_faulty_store() -> (RecordStore, Arc<FaultyDocuments>) {
    let documents = Arc::new(FaultyDocuments::new(create_backend()));
    let store = RecordStore::new(documents.clone(), StoreConfig::default());
    store.init().await.expect("Failed to initialize store");
    (store, documents)
}

// ============================================================================
// Batch Semantics
// ============================================================================

#[tokio::test]
async fn test_batch_marks_last_version_current() {
    let store = create_store().await;
    let written = store
        .add_batch(
            vec![
                patient("1", "1", "A"),
                patient("1", "2", "B"),
                patient("2", "1", "C"),
                patient("1", "3", "D"),
            ],
            None,
        )
        .await
        .unwrap();
    assert_eq!(written.len(), 4);

    let current = store.find_by_id("Patient", "1").await.unwrap().unwrap();
    assert_eq!(family_of(&current), Some("D"));

    let history = store
        .list_history_for_id(&ResourceKey::new("Patient", "1"), &ListParams::new())
        .await
        .unwrap();
    assert_eq!(history.len(), 3);
    let current_count = history
        .iter()
        .filter(|s| s.state == RecordState::Current)
        .count();
    assert_eq!(current_count, 1);
}

#[tokio::test]
async fn test_batch_shares_one_timestamp() {
    let store = create_store().await;
    let written = store
        .add_batch(vec![patient("1", "1", "A"), observation("2", "1")], None)
        .await
        .unwrap();
    assert_eq!(written[0].last_updated, written[1].last_updated);
}

#[tokio::test]
async fn test_empty_batch_is_noop() {
    let store = create_store().await;
    assert!(store.add_batch(vec![], None).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_invalid_batch_persists_nothing() {
    let store = create_store().await;
    store.add(patient("1", "1", "Existing"), None).await.unwrap();

    let invalid = Entry::resource(json!({"resourceType": "Patient", "id": "3"}));
    let err = store
        .add_batch(
            vec![patient("1", "2", "A"), patient("2", "1", "B"), invalid],
            None,
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        StorageError::Validation(ValidationError::MissingVersionId { index: 2, .. })
    ));

    let current = store.find_by_id("Patient", "1").await.unwrap().unwrap();
    assert_eq!(family_of(&current), Some("Existing"));
    assert!(store.find_by_id("Patient", "2").await.unwrap().is_none());
}

// ============================================================================
// Rollback
// ============================================================================

#[tokio::test]
async fn test_insert_failure_rolls_back() {
    let (store, documents) = create_faulty_store().await;
    store.add(patient("1", "1", "Existing"), None).await.unwrap();

    documents.fail_insert_after(1);
    let batch_id = Uuid::new_v4();
    let err = store
        .add_batch(
            vec![patient("1", "2", "A"), patient("2", "1", "B")],
            Some(batch_id),
        )
        .await
        .unwrap_err();
    match err {
        StorageError::Transaction(TransactionError::Failed { batch_id: id, .. }) => {
            assert_eq!(id, batch_id)
        }
        other => panic!("unexpected error: {other:?}"),
    }

    // The superseded version is current again and the partial insert is gone.
    let current = store.find_by_id("Patient", "1").await.unwrap().unwrap();
    assert_eq!(family_of(&current), Some("Existing"));
    assert!(
        store
            .find_by_version("Patient", "1", "2")
            .await
            .unwrap()
            .is_none()
    );
    assert!(store.find_by_id("Patient", "2").await.unwrap().is_none());

    // The store keeps working after a rollback.
    store.add(patient("1", "2", "Retry"), None).await.unwrap();
    let current = store.find_by_id("Patient", "1").await.unwrap().unwrap();
    assert_eq!(family_of(&current), Some("Retry"));
}

#[tokio::test]
async fn test_failed_rollback_reports_both_errors() {
    let (store, documents) = create_faulty_store().await;
    store.add(patient("1", "1", "Existing"), None).await.unwrap();

    documents.fail_insert_after(1);
    documents.fail_deletes();
    let err = store
        .add_batch(vec![patient("1", "2", "A"), patient("2", "1", "B")], None)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        StorageError::Transaction(TransactionError::RollbackFailed { .. })
    ));
    documents.heal();
}

#[tokio::test]
async fn test_failed_compensation_does_not_skip_the_rest() {
    let (store, documents) = create_faulty_store().await;
    store.add(patient("1", "1", "Existing"), None).await.unwrap();

    documents.fail_insert_after(0);
    documents.fail_deletes();
    let err = store
        .add(patient("1", "2", "A"), None)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        StorageError::Transaction(TransactionError::RollbackFailed { .. })
    ));
    documents.heal();

    // Deleting the batch's inserts failed, but the superseded version was
    // still restored.
    let current = store.find_by_id("Patient", "1").await.unwrap().unwrap();
    assert_eq!(family_of(&current), Some("Existing"));
}

#[tokio::test]
async fn test_replace_failure_restores_displaced_version() {
    let (store, documents) = create_faulty_store().await;
    store.add(patient("1", "1", "Original"), None).await.unwrap();

    documents.fail_insert_after(0);
    let err = store
        .replace(patient("1", "1", "Corrected"), None)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        StorageError::Transaction(TransactionError::Failed { .. })
    ));

    let current = store.find_by_id("Patient", "1").await.unwrap().unwrap();
    assert_eq!(family_of(&current), Some("Original"));
}

// ============================================================================
// Purge
// ============================================================================

#[tokio::test]
async fn test_purge_batch_removes_only_that_batch() {
    let store = create_store().await;
    let keep = Uuid::new_v4();
    let purge = Uuid::new_v4();
    store
        .add_batch(vec![patient("1", "1", "Keep")], Some(keep))
        .await
        .unwrap();
    store
        .add_batch(vec![patient("2", "1", "A"), observation("3", "1")], Some(purge))
        .await
        .unwrap();

    assert_eq!(store.purge_batch(purge).await.unwrap(), 2);
    assert!(store.find_by_id("Patient", "2").await.unwrap().is_none());
    assert!(store.find_by_id("Observation", "3").await.unwrap().is_none());
    assert!(store.find_by_id("Patient", "1").await.unwrap().is_some());

    // Purging again, or purging an unknown batch, is satisfied.
    assert_eq!(store.purge_batch(purge).await.unwrap(), 0);
    assert_eq!(store.purge_batch(Uuid::new_v4()).await.unwrap(), 0);
}

#[tokio::test]
async fn test_clean_erases_everything() {
    let store = create_store().await;
    store.add(patient("1", "1", "A"), None).await.unwrap();
    store.sequence().next_resource_sequence().await.unwrap();

    store.clean().await.unwrap();

    assert!(store.find_by_id("Patient", "1").await.unwrap().is_none());
    assert!(
        store
            .list_history(&ListParams::new().include_deleted())
            .await
            .unwrap()
            .is_empty()
    );
    assert_eq!(store.sequence().next_resource_sequence().await.unwrap(), 1);

    // Indices are recreated and versioning works as before.
    store.add(patient("1", "1", "A"), None).await.unwrap();
    store.add(patient("1", "2", "B"), None).await.unwrap();
    let current = store.find_by_id("Patient", "1").await.unwrap().unwrap();
    assert_eq!(family_of(&current), Some("B"));
}
