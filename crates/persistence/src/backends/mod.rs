//! Storage backend implementations.
//!
//! Document stores implement [`DocumentStore`](crate::core::DocumentStore);
//! blob stores implement [`BlobStorage`](crate::core::BlobStorage).
//!
//! # Available Backends
//!
//! | Backend | Feature | Description |
//! |---------|---------|-------------|
//! | SQLite | `sqlite` | Embedded document store, in memory or on disk |
//! | Memory blobs | always | Volatile blob storage for tests |
//! | Local blobs | always | Blob files under a directory |
//! | S3 blobs | `s3` | Blob objects in an S3-compatible bucket |
//!
//! # Example
//!
//! ```no_run
//! # #[cfg(feature = "sqlite")]
//! use helios_record_store::backends::sqlite::SqliteBackend;
//!
//! # #[cfg(feature = "sqlite")]
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // Create an in-memory SQLite backend
//! let backend = SqliteBackend::in_memory()?;
//!
//! // Or use a file-based database
//! let backend = SqliteBackend::open("./data/records.db")?;
//! # Ok(())
//! # }
//! ```

pub mod blob;

#[cfg(feature = "sqlite")]
pub mod sqlite;
