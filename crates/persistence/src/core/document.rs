//! The document store contract.
//!
//! The record store never talks to a database directly. It needs a store of
//! JSON documents grouped into named collections that offers per-document
//! atomic writes, atomic counters and equality/range queries on indexed
//! fields. Multi-document writes are *not* required to be atomic.

use std::fmt;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::error::StorageResult;
use crate::types::fields;

/// A stored JSON document. Every document carries a string `_id`.
pub type Document = Map<String, Value>;

/// A predicate over document fields.
///
/// Field names address top-level document fields.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// Matches every document.
    All,
    /// `field == value`.
    Eq(String, Value),
    /// `field != value`, also matching documents without the field.
    Ne(String, Value),
    /// `field > value`.
    Gt(String, Value),
    /// `field` equals one of the values.
    In(String, Vec<Value>),
    /// All sub-filters match.
    And(Vec<Filter>),
}

impl Filter {
    /// `field == value`.
    pub fn eq(field: &str, value: impl Into<Value>) -> Self {
        Filter::Eq(field.to_string(), value.into())
    }

    /// `field != value`.
    pub fn ne(field: &str, value: impl Into<Value>) -> Self {
        Filter::Ne(field.to_string(), value.into())
    }

    /// `field > value`.
    pub fn gt(field: &str, value: impl Into<Value>) -> Self {
        Filter::Gt(field.to_string(), value.into())
    }

    /// `field IN values`.
    pub fn is_in<I, V>(field: &str, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Filter::In(field.to_string(), values.into_iter().map(Into::into).collect())
    }

    /// `_id == id`.
    pub fn id(id: impl Into<String>) -> Self {
        Filter::Eq(fields::ID.to_string(), Value::String(id.into()))
    }

    /// Conjunction with another filter, flattening nested conjunctions.
    pub fn and(self, other: Filter) -> Self {
        match (self, other) {
            (Filter::All, f) | (f, Filter::All) => f,
            (Filter::And(mut left), Filter::And(right)) => {
                left.extend(right);
                Filter::And(left)
            }
            (Filter::And(mut left), f) => {
                left.push(f);
                Filter::And(left)
            }
            (f, Filter::And(mut right)) => {
                right.insert(0, f);
                Filter::And(right)
            }
            (left, right) => Filter::And(vec![left, right]),
        }
    }
}

/// Sort order for a query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortSpec {
    /// Field to sort on.
    pub field: String,
    /// Descending when `true`.
    pub descending: bool,
}

/// Which fields a query returns.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Projection {
    /// Whole documents.
    #[default]
    All,
    /// Only these fields (plus `_id`).
    Include(Vec<String>),
    /// Everything except these fields.
    Exclude(Vec<String>),
}

impl Projection {
    /// Applies the projection to a document.
    pub fn apply(&self, mut document: Document) -> Document {
        match self {
            Projection::All => document,
            Projection::Include(keep) => {
                document.retain(|k, _| k == fields::ID || keep.iter().any(|f| f == k));
                document
            }
            Projection::Exclude(drop) => {
                for field in drop {
                    document.remove(field);
                }
                document
            }
        }
    }
}

/// A filtered, sorted, projected and limited scan of one collection.
#[derive(Debug, Clone, PartialEq)]
pub struct FindQuery {
    /// Documents to return.
    pub filter: Filter,
    /// Order of results. Ties are broken by insertion order in the same direction.
    pub sort: Option<SortSpec>,
    /// Fields to return.
    pub projection: Projection,
    /// Maximum number of results.
    pub limit: Option<usize>,
}

impl FindQuery {
    /// Creates an unsorted, unlimited query.
    pub fn new(filter: Filter) -> Self {
        Self {
            filter,
            sort: None,
            projection: Projection::All,
            limit: None,
        }
    }

    /// Sorts descending on `field`.
    pub fn sort_desc(mut self, field: &str) -> Self {
        self.sort = Some(SortSpec {
            field: field.to_string(),
            descending: true,
        });
        self
    }

    /// Sorts ascending on `field`.
    pub fn sort_asc(mut self, field: &str) -> Self {
        self.sort = Some(SortSpec {
            field: field.to_string(),
            descending: false,
        });
        self
    }

    /// Drops `fields` from results.
    pub fn exclude(mut self, fields: &[&str]) -> Self {
        self.projection = Projection::Exclude(fields.iter().map(|f| f.to_string()).collect());
        self
    }

    /// Keeps only `fields` (and `_id`) in results.
    pub fn include(mut self, fields: &[&str]) -> Self {
        self.projection = Projection::Include(fields.iter().map(|f| f.to_string()).collect());
        self
    }

    /// Limits the number of results.
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// One field of an index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexField {
    /// Field name.
    pub field: String,
    /// Descending when `true`.
    pub descending: bool,
}

/// A compound, optionally unique and optionally partial index.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexSpec {
    /// Index name, unique per collection.
    pub name: String,
    /// Indexed fields in order.
    pub fields: Vec<IndexField>,
    /// Rejects writes that would duplicate the indexed fields.
    pub unique: bool,
    /// Only documents matching this filter are indexed.
    pub partial: Option<Filter>,
}

impl IndexSpec {
    /// Creates an empty index definition.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
            unique: false,
            partial: None,
        }
    }

    /// Adds an ascending field.
    pub fn asc(mut self, field: &str) -> Self {
        self.fields.push(IndexField {
            field: field.to_string(),
            descending: false,
        });
        self
    }

    /// Adds a descending field.
    pub fn desc(mut self, field: &str) -> Self {
        self.fields.push(IndexField {
            field: field.to_string(),
            descending: true,
        });
        self
    }

    /// Makes the index unique.
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Restricts the index to documents matching `filter`.
    pub fn partial(mut self, filter: Filter) -> Self {
        self.partial = Some(filter);
        self
    }
}

/// A store of JSON documents grouped into collections.
///
/// Implementations must guarantee:
///
/// - single-document writes are atomic;
/// - [`increment_counter`](DocumentStore::increment_counter) and
///   [`raise_counter`](DocumentStore::raise_counter) are linearizable;
/// - unique indices are enforced on every write, including updates.
///
/// `insert_many` stops at the first failing document; documents written
/// before the failure stay written.
#[async_trait]
pub trait DocumentStore: Send + Sync + fmt::Debug {
    /// Returns a human-readable name for this backend.
    fn backend_name(&self) -> &'static str;

    /// Inserts one document. Fails if its `_id` already exists.
    async fn insert_one(&self, collection: &str, document: Document) -> StorageResult<()>;

    /// Inserts documents in order. Not atomic.
    async fn insert_many(&self, collection: &str, documents: Vec<Document>) -> StorageResult<()>;

    /// Inserts or fully replaces the document with the same `_id`.
    async fn upsert(&self, collection: &str, document: Document) -> StorageResult<()>;

    /// Runs a query.
    async fn find(&self, collection: &str, query: &FindQuery) -> StorageResult<Vec<Document>>;

    /// Returns the first document matching `filter`.
    async fn find_one(&self, collection: &str, filter: &Filter) -> StorageResult<Option<Document>> {
        let query = FindQuery::new(filter.clone()).limit(1);
        Ok(self.find(collection, &query).await?.into_iter().next())
    }

    /// Sets top-level fields on every matching document. Returns the number updated.
    async fn update_many(
        &self,
        collection: &str,
        filter: &Filter,
        set: &Document,
    ) -> StorageResult<u64>;

    /// Deletes every matching document. Returns the number deleted.
    async fn delete_many(&self, collection: &str, filter: &Filter) -> StorageResult<u64>;

    /// Returns the distinct values of `field` among matching documents.
    ///
    /// Array values are unwound: each element counts as a value.
    async fn distinct(
        &self,
        collection: &str,
        field: &str,
        filter: &Filter,
    ) -> StorageResult<Vec<Value>>;

    /// Atomically creates-or-increments the counter document `id` and
    /// returns the new value. A fresh counter returns 1.
    async fn increment_counter(&self, collection: &str, id: &str) -> StorageResult<i64>;

    /// Atomically raises the counter document `id` to at least `floor` and
    /// returns the resulting value.
    async fn raise_counter(&self, collection: &str, id: &str, floor: i64) -> StorageResult<i64>;

    /// Creates an index if it does not exist.
    async fn ensure_index(&self, collection: &str, index: &IndexSpec) -> StorageResult<()>;

    /// Removes a collection with all of its documents and indices.
    /// Dropping a missing collection succeeds.
    async fn drop_collection(&self, collection: &str) -> StorageResult<()>;
}
