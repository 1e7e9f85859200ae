//! Test infrastructure for the record store.
//!
//! Builds in-memory stores, fixture entries and a fault-injecting document
//! store for rollback tests.

#![allow(dead_code)]

pub mod faults;
pub mod fixtures;

use std::sync::Arc;

use helios_record_store::backends::blob::ObjectStoreBlobStorage;
use helios_record_store::backends::sqlite::SqliteBackend;
use helios_record_store::config::StoreConfig;
use helios_record_store::store::RecordStore;

pub use faults::*;
pub use fixtures::*;

/// Creates an initialized in-memory SQLite backend.
pub fn create_backend() -> Arc<SqliteBackend> {
    let backend = SqliteBackend::in_memory().expect("Failed to create SQLite backend");
    backend.init_schema().expect("Failed to initialize schema");
    Arc::new(backend)
}

/// Creates an initialized record store without blob externalization.
pub async fn create_store() -> RecordStore {
    create_store_with(StoreConfig::default()).await
}

/// Creates an initialized record store with a custom configuration.
pub async fn create_store_with(config: StoreConfig) -> RecordStore {
    let store = RecordStore::new(create_backend(), config);
    store.init().await.expect("Failed to initialize store");
    store
}

/// Creates an initialized record store externalizing binaries to memory.
pub async fn create_blob_store() -> (RecordStore, Arc<ObjectStoreBlobStorage>) {
    let blobs = Arc::new(ObjectStoreBlobStorage::in_memory());
    let store = RecordStore::new(create_backend(), StoreConfig::default())
        .with_blob_storage(blobs.clone());
    store.init().await.expect("Failed to initialize store");
    (store, blobs)
}
