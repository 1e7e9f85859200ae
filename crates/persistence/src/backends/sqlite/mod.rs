//! SQLite document store.
//!
//! Implements [`DocumentStore`](crate::core::DocumentStore) on top of a
//! single SQLite table. It supports both in-memory databases (great for
//! testing) and file-based databases (for development and small
//! deployments).
//!
//! # Example
//!
//! ```no_run
//! use helios_record_store::backends::sqlite::SqliteBackend;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let backend = SqliteBackend::in_memory()?;
//! backend.init_schema()?;
//! # Ok(())
//! # }
//! ```
//!
//! # Schema
//!
//! ```sql
//! CREATE TABLE documents (
//!     collection TEXT NOT NULL,
//!     doc_id TEXT NOT NULL,
//!     body TEXT NOT NULL CHECK (json_valid(body)),
//!     PRIMARY KEY (collection, doc_id)
//! );
//! ```
//!
//! Secondary indices are expression indices over `json_extract(body, ...)`,
//! scoped to one collection by a partial-index predicate.

mod backend;
mod documents;
mod query_builder;
mod schema;

pub use backend::{SqliteBackend, SqliteBackendConfig};
