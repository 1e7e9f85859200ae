//! Blob storage backends for externalized binary content.
//!
//! Every backend is an [`ObjectStoreBlobStorage`] over an
//! [`object_store::ObjectStore`]: in memory, on the local filesystem, or in
//! an S3 bucket (feature `s3`). [`BlobBackendConfig`] selects one.

mod config;
mod store;

pub use config::BlobBackendConfig;
pub use store::ObjectStoreBlobStorage;
