//! Helios Record Store
//!
//! This crate provides the versioned record storage engine of the Helios FHIR
//! Server. Every write creates a new immutable version of a resource; older
//! versions stay readable as history. Exactly one version of each logical
//! resource is `current`.
//!
//! # Features
//!
//! - **Versioning**: Full resource history, deletions recorded as tombstones
//! - **Batches**: All-or-nothing multi-entry writes with compensating rollback
//! - **Binary externalization**: Large binary content kept in a blob store
//! - **Sequences**: Atomic resource-id and version-id counters
//! - **Snapshots**: Stored result-set snapshots for paging
//!
//! # Backend Features
//!
//! - `sqlite` (default) - SQLite document store with in-memory and file modes
//! - `s3` - S3-compatible blob storage
//!
//! # Architecture
//!
//! - [`key`] - Resource keys and their parsing
//! - [`types`] - Entries, stored records and snapshots
//! - [`error`] - Error types for all operations
//! - [`config`] - Store configuration
//! - [`core`] - Storage traits, transactions and sequences
//! - [`store`] - The [`RecordStore`] itself
//! - [`backends`] - Document and blob backend implementations
//!
//! # Quick Start
//!
//! ```
//! use helios_record_store::key::ResourceKey;
//! use helios_record_store::types::Entry;
//! use serde_json::json;
//!
//! let entry = Entry::resource(json!({
//!     "resourceType": "Patient",
//!     "id": "patient-123",
//!     "meta": {"versionId": "1"}
//! }));
//!
//! let key = entry.key().unwrap();
//! assert_eq!(key, ResourceKey::versioned("Patient", "patient-123", "1"));
//! assert_eq!(key.to_string(), "Patient/patient-123/_history/1");
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod backends;
pub mod config;
pub mod core;
pub mod error;
pub mod key;
pub mod store;
pub mod types;

// Re-export commonly used types at crate root
pub use config::StoreConfig;
pub use error::{StorageError, StorageResult};
pub use key::ResourceKey;
pub use store::{ListParams, RecordStore};
pub use types::{Entry, EntrySummary, Snapshot, Tag};

// Re-export core traits
pub use core::{BlobStorage, DocumentStore, SearchIndexer};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name.
pub const NAME: &str = env!("CARGO_PKG_NAME");
