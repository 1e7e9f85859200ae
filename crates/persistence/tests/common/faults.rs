//! A document store that fails on demand.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use serde_json::Value;

use helios_record_store::core::{Document, DocumentStore, Filter, FindQuery, IndexSpec};
use helios_record_store::error::{BackendError, StorageError, StorageResult};

/// Sentinel meaning "never fail".
const NEVER: usize = usize::MAX;

fn injected(operation: &str) -> StorageError {
    StorageError::Backend(BackendError::Internal {
        backend_name: "faulty".to_string(),
        message: format!("injected {} failure", operation),
        source: None,
    })
}

/// Wraps a document store, failing `insert_many` after a number of
/// documents and optionally failing every `delete_many`.
#[derive(Debug)]
pub struct FaultyDocuments {
    inner: Arc<dyn DocumentStore>,
    insert_budget: AtomicUsize,
    fail_deletes: AtomicBool,
}

impl FaultyDocuments {
    /// Wraps `inner` without any armed fault.
    pub fn new(inner: Arc<dyn DocumentStore>) -> Self {
        Self {
            inner,
            insert_budget: AtomicUsize::new(NEVER),
            fail_deletes: AtomicBool::new(false),
        }
    }

    /// The next `insert_many` writes `count` documents, then fails.
    pub fn fail_insert_after(&self, count: usize) {
        self.insert_budget.store(count, Ordering::SeqCst);
    }

    /// Makes every `delete_many` fail.
    pub fn fail_deletes(&self) {
        self.fail_deletes.store(true, Ordering::SeqCst);
    }

    /// Clears all armed faults.
    pub fn heal(&self) {
        self.insert_budget.store(NEVER, Ordering::SeqCst);
        self.fail_deletes.store(false, Ordering::SeqCst);
    }
}

#[async_trait]
impl DocumentStore for FaultyDocuments {
    fn backend_name(&self) -> &'static str {
        "faulty"
    }

    async fn insert_one(&self, collection: &str, document: Document) -> StorageResult<()> {
        self.inner.insert_one(collection, document).await
    }

    async fn insert_many(&self, collection: &str, documents: Vec<Document>) -> StorageResult<()> {
        let budget = self.insert_budget.swap(NEVER, Ordering::SeqCst);
        if budget >= documents.len() {
            return self.inner.insert_many(collection, documents).await;
        }
        let partial = documents.into_iter().take(budget).collect();
        self.inner.insert_many(collection, partial).await?;
        Err(injected("insert"))
    }

    async fn upsert(&self, collection: &str, document: Document) -> StorageResult<()> {
        self.inner.upsert(collection, document).await
    }

    async fn find(&self, collection: &str, query: &FindQuery) -> StorageResult<Vec<Document>> {
        self.inner.find(collection, query).await
    }

    async fn update_many(
        &self,
        collection: &str,
        filter: &Filter,
        set: &Document,
    ) -> StorageResult<u64> {
        self.inner.update_many(collection, filter, set).await
    }

    async fn delete_many(&self, collection: &str, filter: &Filter) -> StorageResult<u64> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(injected("delete"));
        }
        self.inner.delete_many(collection, filter).await
    }

    async fn distinct(
        &self,
        collection: &str,
        field: &str,
        filter: &Filter,
    ) -> StorageResult<Vec<Value>> {
        self.inner.distinct(collection, field, filter).await
    }

    async fn increment_counter(&self, collection: &str, id: &str) -> StorageResult<i64> {
        self.inner.increment_counter(collection, id).await
    }

    async fn raise_counter(&self, collection: &str, id: &str, floor: i64) -> StorageResult<i64> {
        self.inner.raise_counter(collection, id, floor).await
    }

    async fn ensure_index(&self, collection: &str, index: &IndexSpec) -> StorageResult<()> {
        self.inner.ensure_index(collection, index).await
    }

    async fn drop_collection(&self, collection: &str) -> StorageResult<()> {
        self.inner.drop_collection(collection).await
    }
}
