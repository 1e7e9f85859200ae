//! Core storage abstractions.
//!
//! - [`DocumentStore`] - the contract the engine needs from a database
//! - [`BlobStorage`] / [`BlobStore`] - externalized binary payloads
//! - [`SequenceGenerator`] - monotonic resource and version ids
//! - [`BatchTransaction`] - batch writes with compensating rollback
//! - [`SearchIndexer`] - post-commit indexing hook

pub mod blob;
pub mod document;
pub mod indexer;
pub mod sequence;
pub mod transaction;

pub use blob::{BlobKey, BlobSession, BlobStorage, BlobStore};
pub use document::{
    Document, DocumentStore, Filter, FindQuery, IndexField, IndexSpec, Projection, SortSpec,
};
pub use indexer::{NoopIndexer, SearchIndexer};
pub use sequence::{RESOURCE_COUNTER, SequenceGenerator, VERSION_COUNTER};
pub use transaction::{BatchState, BatchTransaction};
